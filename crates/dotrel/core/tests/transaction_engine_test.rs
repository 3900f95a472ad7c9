// Dotrel
// Copyright (C) 2025 Synerthink

// This program is free software: you can redistribute it and/or modify
// it under the terms of the GNU Affero General Public License as published by
// the Free Software Foundation, either version 3 of the License, or
// (at your option) any later version.

// This program is distributed in the hope that it will be useful,
// but WITHOUT ANY WARRANTY; without even the implied warranty of
// MERCHANTABILITY or FITNESS FOR A PARTICULAR PURPOSE.  See the
// GNU Affero General Public License for more details.

// You should have received a copy of the GNU Affero General Public License
// along with this program.  If not, see <http://www.gnu.org/licenses/>.

//! Concurrency scenarios for the transaction engine: lock interaction
//! between workers, pool admission, timeouts, and lifecycle events.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::mpsc::{self, Sender};
use std::sync::{Arc, Condvar, Mutex, OnceLock};
use std::thread;
use std::time::Duration;

use dotrel_core::transaction_engine::{
    Command, CommandExecutor, CommandKind, EventKind, LockManager, MemoryBlockDirectory,
    NoopExecutor, RecordingExecutor, TransactionConfig, TransactionEvent, TransactionOutcome,
    TransactionSystem, TxnError, TxnResult,
};

fn directory() -> MemoryBlockDirectory {
    let mut directory = MemoryBlockDirectory::new();
    directory.insert("student", 100, 101);
    directory.insert("professor", 200, 203);
    directory.insert("course", 202, 206);
    directory
}

fn system_with(
    executor: Arc<dyn CommandExecutor>,
    config: TransactionConfig,
) -> TransactionSystem {
    TransactionSystem::new(config, Arc::new(directory()), executor)
}

/// Executor that records whether the lock table was populated while the
/// batch ran.
struct ProbeExecutor {
    locks: OnceLock<Arc<LockManager>>,
    saw_live_lock: AtomicBool,
}

impl ProbeExecutor {
    fn new() -> Self {
        Self {
            locks: OnceLock::new(),
            saw_live_lock: AtomicBool::new(false),
        }
    }
}

impl CommandExecutor for ProbeExecutor {
    fn execute(&self, _commands: &[Command]) -> TxnResult<()> {
        if let Some(locks) = self.locks.get()
            && !locks.is_idle()
        {
            self.saw_live_lock.store(true, Ordering::SeqCst);
        }
        Ok(())
    }
}

/// Executor that holds batches of one command kind open until the gate is
/// released, announcing each held batch on a channel.
struct GateExecutor {
    gated_kind: CommandKind,
    open: Mutex<bool>,
    opened: Condvar,
    entered: Mutex<Option<Sender<()>>>,
}

impl GateExecutor {
    fn new(gated_kind: CommandKind, entered: Sender<()>) -> Self {
        Self {
            gated_kind,
            open: Mutex::new(false),
            opened: Condvar::new(),
            entered: Mutex::new(Some(entered)),
        }
    }

    fn release(&self) {
        *self.open.lock().unwrap() = true;
        self.opened.notify_all();
    }
}

impl CommandExecutor for GateExecutor {
    fn execute(&self, commands: &[Command]) -> TxnResult<()> {
        if commands.iter().all(|command| command.kind != self.gated_kind) {
            return Ok(());
        }

        if let Some(entered) = self.entered.lock().unwrap().as_ref() {
            let _ = entered.send(());
        }

        let mut open = self.open.lock().unwrap();
        while !*open {
            let (guard, timeout) = self
                .opened
                .wait_timeout(open, Duration::from_secs(10))
                .unwrap();
            open = guard;
            if timeout.timed_out() {
                return Err(TxnError::ExecutorFailure("gate never opened".to_string()));
            }
        }
        Ok(())
    }
}

/// Executor requiring two batches to be inside `execute` at the same time.
struct RendezvousExecutor {
    arrived: Mutex<usize>,
    all_here: Condvar,
}

impl RendezvousExecutor {
    fn new() -> Self {
        Self {
            arrived: Mutex::new(0),
            all_here: Condvar::new(),
        }
    }
}

impl CommandExecutor for RendezvousExecutor {
    fn execute(&self, _commands: &[Command]) -> TxnResult<()> {
        let mut arrived = self.arrived.lock().unwrap();
        *arrived += 1;
        self.all_here.notify_all();

        while *arrived < 2 {
            let (guard, timeout) = self
                .all_here
                .wait_timeout(arrived, Duration::from_secs(5))
                .unwrap();
            arrived = guard;
            if timeout.timed_out() {
                return Err(TxnError::ExecutorFailure(
                    "readers never overlapped".to_string(),
                ));
            }
        }
        Ok(())
    }
}

struct FailingExecutor;

impl CommandExecutor for FailingExecutor {
    fn execute(&self, _commands: &[Command]) -> TxnResult<()> {
        Err(TxnError::ExecutorFailure("simulated table fault".to_string()))
    }
}

#[test]
fn test_single_reader_holds_lock_through_execute() {
    let executor = Arc::new(ProbeExecutor::new());
    let system = system_with(executor.clone(), TransactionConfig::default());
    let _ = executor.locks.set(Arc::clone(system.locks()));

    let outcome = system
        .submit(vec![Command::new("student", CommandKind::Select)])
        .wait();

    assert!(outcome.is_committed());
    assert!(executor.saw_live_lock.load(Ordering::SeqCst));
    assert!(system.locks().is_idle());
}

#[test]
fn test_two_readers_hold_shared_locks_concurrently() {
    let executor = Arc::new(RendezvousExecutor::new());
    let system = system_with(executor, TransactionConfig::default());

    let first = system.submit(vec![Command::new("student", CommandKind::Select)]);
    let second = system.submit(vec![Command::new("student", CommandKind::Select)]);

    assert!(first.wait().is_committed());
    assert!(second.wait().is_committed());
    assert!(system.locks().is_idle());
}

#[test]
fn test_writer_queues_behind_reader() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let executor = Arc::new(GateExecutor::new(CommandKind::Select, entered_tx));
    let system = system_with(executor.clone(), TransactionConfig::default());

    let event_log = Arc::new(Mutex::new(Vec::new()));
    for kind in [
        EventKind::LockReleased,
        EventKind::TransactionFinished,
        EventKind::AllTransactionsFinished,
    ] {
        let event_log = Arc::clone(&event_log);
        system.events().subscribe(
            kind,
            Arc::new(move |event: &TransactionEvent| {
                event_log.lock().unwrap().push(event.clone());
            }),
        );
    }

    let reader = system.submit(vec![Command::new("student", CommandKind::Select)]);
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    // The reader is inside the executor and holds its shared lock; the
    // writer must queue behind it.
    let writer = system.submit(vec![Command::new("student", CommandKind::Update)]);
    thread::sleep(Duration::from_millis(100));
    assert!(event_log.lock().unwrap().is_empty());

    executor.release();
    assert!(reader.wait().is_committed());
    assert!(writer.wait().is_committed());
    system.await_quiescence();
    assert!(system.locks().is_idle());

    let log = event_log.lock().unwrap();
    // The reader's lock release is the first observable event; it is what
    // wakes the queued writer.
    assert_eq!(log.first(), Some(&TransactionEvent::LockReleased));
    let finished: Vec<_> = log
        .iter()
        .filter_map(|event| match event {
            TransactionEvent::TransactionFinished(_, outcome) => Some(outcome.clone()),
            _ => None,
        })
        .collect();
    assert_eq!(finished.len(), 2);
    assert!(finished.iter().all(TransactionOutcome::is_committed));
    let all_finished = log
        .iter()
        .filter(|event| matches!(event, TransactionEvent::AllTransactionsFinished))
        .count();
    assert_eq!(all_finished, 1);
}

#[test]
fn test_executor_receives_whole_batch_once() {
    let executor = Arc::new(RecordingExecutor::new());
    let system = system_with(executor.clone(), TransactionConfig::default());

    let batch = vec![
        Command::new("student", CommandKind::Select),
        Command::new("professor", CommandKind::Update),
    ];
    let outcome = system.submit(batch.clone()).wait();

    assert!(outcome.is_committed());
    // Locks for every command are taken first; the executor then sees the
    // batch exactly once, in submission order.
    assert_eq!(executor.batches(), vec![batch]);
}

#[test]
fn test_reentrant_exclusive_in_one_batch() {
    // Both commands lock the same block exclusively; the second acquisition
    // must be satisfied by the first grant instead of deadlocking.
    let system = system_with(Arc::new(NoopExecutor), TransactionConfig::default());

    let outcome = system
        .submit(vec![
            Command::new("student", CommandKind::Update),
            Command::new("student", CommandKind::Delete),
        ])
        .wait();

    assert!(outcome.is_committed());
    assert!(system.locks().is_idle());
}

#[test]
fn test_overlapping_tables_release_every_held_block() {
    // professor and course share block 202; the union of acquired
    // addresses must be released exactly once at commit.
    let system = system_with(Arc::new(NoopExecutor), TransactionConfig::default());

    let outcome = system
        .submit(vec![
            Command::new("professor", CommandKind::Update),
            Command::new("course", CommandKind::Select),
        ])
        .wait();

    assert!(outcome.is_committed());
    assert!(system.locks().is_idle());
    let stats = system.locks().statistics();
    assert_eq!(stats.granted_requests, 0);
    assert_eq!(stats.live_resources, 0);
}

#[test]
fn test_pool_admission_bound() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let executor = Arc::new(GateExecutor::new(CommandKind::Update, entered_tx));
    let system = system_with(
        executor.clone(),
        TransactionConfig {
            max_active_transactions: 2,
            ..TransactionConfig::default()
        },
    );

    let first = system.submit(vec![Command::new("professor", CommandKind::Update)]);
    let second = system.submit(vec![Command::new("student", CommandKind::Update)]);
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    assert_eq!(system.active_transactions(), 2);
    assert!(matches!(
        system.try_submit(vec![Command::new("course", CommandKind::Select)]),
        Err(TxnError::PoolSaturated)
    ));

    executor.release();
    assert!(first.wait().is_committed());
    assert!(second.wait().is_committed());
    system.await_quiescence();

    // A freed slot admits new work again.
    let third = system.submit(vec![Command::new("course", CommandKind::Select)]);
    assert!(third.wait().is_committed());
}

#[test]
fn test_lock_timeout_aborts_second_writer() {
    let (entered_tx, entered_rx) = mpsc::channel();
    let executor = Arc::new(GateExecutor::new(CommandKind::Update, entered_tx));
    let system = system_with(
        executor.clone(),
        TransactionConfig {
            lock_wait_timeout: Some(Duration::from_millis(100)),
            ..TransactionConfig::default()
        },
    );

    let holder = system.submit(vec![Command::new("student", CommandKind::Update)]);
    entered_rx.recv_timeout(Duration::from_secs(5)).unwrap();

    let blocked = system.submit(vec![Command::new("student", CommandKind::Update)]);
    match blocked.wait() {
        TransactionOutcome::Aborted(TxnError::LockTimeout { address, .. }) => {
            assert_eq!(address.0, 100);
        }
        other => panic!("expected lock timeout, got {other:?}"),
    }

    executor.release();
    assert!(holder.wait().is_committed());
    system.await_quiescence();
    assert!(system.locks().is_idle());
}

#[test]
fn test_missing_blocks_aborts_and_releases() {
    let system = system_with(Arc::new(NoopExecutor), TransactionConfig::default());

    let outcome = system
        .submit(vec![
            Command::new("student", CommandKind::Update),
            Command::new("no_such_table", CommandKind::Select),
        ])
        .wait();

    assert_eq!(
        outcome,
        TransactionOutcome::Aborted(TxnError::MissingBlocks("no_such_table".to_string()))
    );
    // The lock taken for the first command must not leak.
    assert!(system.locks().is_idle());
}

#[test]
fn test_executor_failure_aborts_and_releases() {
    let system = system_with(Arc::new(FailingExecutor), TransactionConfig::default());

    let outcome = system
        .submit(vec![Command::new("student", CommandKind::Update)])
        .wait();

    assert_eq!(
        outcome,
        TransactionOutcome::Aborted(TxnError::ExecutorFailure(
            "simulated table fault".to_string()
        ))
    );
    assert!(system.locks().is_idle());
}

#[test]
fn test_quiescence_leaves_empty_lock_table() {
    let system = system_with(Arc::new(NoopExecutor), TransactionConfig::default());

    let all_finished = Arc::new(AtomicBool::new(false));
    {
        let all_finished = Arc::clone(&all_finished);
        system.events().subscribe(
            EventKind::AllTransactionsFinished,
            Arc::new(move |_event| {
                all_finished.store(true, Ordering::SeqCst);
            }),
        );
    }

    let submissions: Vec<_> = (0..10)
        .map(|i| {
            let (table, kind) = match i % 3 {
                0 => ("student", CommandKind::Select),
                1 => ("professor", CommandKind::Update),
                _ => ("course", CommandKind::Delete),
            };
            system.submit(vec![Command::new(table, kind)])
        })
        .collect();

    for submission in submissions {
        assert!(submission.wait().is_committed());
    }
    system.await_quiescence();

    assert_eq!(system.active_transactions(), 0);
    assert!(system.locks().is_idle());
    assert!(all_finished.load(Ordering::SeqCst));
}
