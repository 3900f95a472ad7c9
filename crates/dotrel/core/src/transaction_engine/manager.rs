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

//! Transaction admission and worker lifecycle.
//!
//! The manager admits command batches into a bounded pool of worker threads.
//! Each worker acquires every lock its batch needs (strict two-phase
//! locking), invokes the external executor once, and releases all locks in a
//! single phase on commit or abort. Terminal transitions are announced on the
//! event bus.

use std::sync::mpsc::{self, Receiver, Sender};
use std::sync::{Arc, Condvar, Mutex};
use std::thread;

use tracing::debug;

use super::events::{EventBus, EventKind, TransactionEvent};
use super::lib::{
    BlockAddress, BlockDirectory, Command, CommandExecutor, TransactionConfig, TransactionId,
    TransactionOutcome, TxnError, TxnResult,
};
use super::lock_manager::LockManager;
use super::lock_table::LockStatistics;

/// Handle returned for each submitted batch.
pub struct Submission {
    id: TransactionId,
    outcome: Receiver<TransactionOutcome>,
}

impl Submission {
    pub fn id(&self) -> TransactionId {
        self.id
    }

    /// Block until the transaction reaches a terminal state.
    pub fn wait(self) -> TransactionOutcome {
        self.outcome.recv().unwrap_or(TransactionOutcome::Aborted(
            TxnError::ExecutorFailure("transaction worker disappeared".to_string()),
        ))
    }
}

/// Admission bookkeeping guarded by one mutex.
struct PoolState {
    active: usize,
    next_txn_id: u64,
}

pub struct TransactionManager {
    locks: Arc<LockManager>,
    events: Arc<EventBus>,
    directory: Arc<dyn BlockDirectory>,
    executor: Arc<dyn CommandExecutor>,
    pool: Mutex<PoolState>,
    /// Wakes blocked submitters when a worker slot frees up.
    admission: Condvar,
    /// Wakes quiescence waiters when the active count drops.
    quiescence: Condvar,
    max_active: usize,
}

impl TransactionManager {
    pub fn new(
        config: &TransactionConfig,
        locks: Arc<LockManager>,
        events: Arc<EventBus>,
        directory: Arc<dyn BlockDirectory>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        Self {
            locks,
            events,
            directory,
            executor,
            pool: Mutex::new(PoolState {
                active: 0,
                next_txn_id: 1,
            }),
            admission: Condvar::new(),
            quiescence: Condvar::new(),
            max_active: config.max_active_transactions,
        }
    }

    /// Submit a batch, blocking the caller while the worker pool is full.
    pub fn submit(self: &Arc<Self>, batch: Vec<Command>) -> Submission {
        let txn = {
            let mut pool = self.pool.lock().unwrap();
            while pool.active >= self.max_active {
                pool = self.admission.wait(pool).unwrap();
            }
            Self::admit(&mut pool)
        };
        self.spawn_worker(txn, batch)
    }

    /// Submit a batch without blocking; fails when the pool is full.
    pub fn try_submit(self: &Arc<Self>, batch: Vec<Command>) -> TxnResult<Submission> {
        let txn = {
            let mut pool = self.pool.lock().unwrap();
            if pool.active >= self.max_active {
                return Err(TxnError::PoolSaturated);
            }
            Self::admit(&mut pool)
        };
        Ok(self.spawn_worker(txn, batch))
    }

    /// Block until no transaction is in flight.
    pub fn await_quiescence(&self) {
        let mut pool = self.pool.lock().unwrap();
        while pool.active > 0 {
            pool = self.quiescence.wait(pool).unwrap();
        }
    }

    /// Number of currently running workers.
    pub fn active_transactions(&self) -> usize {
        self.pool.lock().unwrap().active
    }

    pub fn lock_statistics(&self) -> LockStatistics {
        self.locks.statistics()
    }

    fn admit(pool: &mut PoolState) -> TransactionId {
        pool.active += 1;
        let txn = TransactionId(pool.next_txn_id);
        pool.next_txn_id += 1;
        txn
    }

    fn spawn_worker(self: &Arc<Self>, txn: TransactionId, batch: Vec<Command>) -> Submission {
        let (sender, receiver): (Sender<TransactionOutcome>, _) = mpsc::channel();
        let manager = Arc::clone(self);
        thread::spawn(move || {
            let outcome = manager.run_transaction(txn, &batch);
            manager.finish(txn, &outcome);
            let _ = sender.send(outcome);
        });

        Submission {
            id: txn,
            outcome: receiver,
        }
    }

    /// Execute one batch to its terminal state. All locks acquired along the
    /// way are tracked as a union and released together in one phase,
    /// regardless of how the transaction ends.
    fn run_transaction(&self, txn: TransactionId, batch: &[Command]) -> TransactionOutcome {
        let mut held: Vec<BlockAddress> = Vec::new();
        let result = self.lock_and_execute(txn, batch, &mut held);

        if !held.is_empty() {
            self.locks.release_all(txn, &held);
            self.events.publish(&TransactionEvent::LockReleased);
        }

        match result {
            Ok(()) => {
                debug!(%txn, "transaction committed");
                TransactionOutcome::Committed
            }
            Err(error) => {
                debug!(%txn, %error, "transaction aborted");
                TransactionOutcome::Aborted(error)
            }
        }
    }

    fn lock_and_execute(
        &self,
        txn: TransactionId,
        batch: &[Command],
        held: &mut Vec<BlockAddress>,
    ) -> TxnResult<()> {
        for command in batch {
            let addresses = self.directory.block_addresses(&command.table);
            if addresses.is_empty() {
                return Err(TxnError::MissingBlocks(command.table.clone()));
            }

            let mode = command.kind.lock_mode();
            for address in addresses {
                self.locks.acquire(address, mode, txn)?;
                if !held.contains(&address) {
                    held.push(address);
                }
            }
        }

        self.executor.execute(batch)
    }

    /// Worker epilogue: free the pool slot and announce the terminal
    /// transition; the last worker out also announces quiescence.
    fn finish(&self, txn: TransactionId, outcome: &TransactionOutcome) {
        let all_finished = {
            let mut pool = self.pool.lock().unwrap();
            pool.active -= 1;
            self.admission.notify_one();
            self.quiescence.notify_all();
            pool.active == 0
        };

        self.events
            .publish(&TransactionEvent::TransactionFinished(txn, outcome.clone()));
        if all_finished {
            self.events.publish(&TransactionEvent::AllTransactionsFinished);
        }
    }
}

/// The assembled transaction engine: lock manager, event bus and transaction
/// manager wired together.
///
/// Construction registers the one internal subscription the protocol relies
/// on: a lock-release event broadcasts the lock manager's condition variable
/// so that every waiter re-checks its grant predicate.
pub struct TransactionSystem {
    locks: Arc<LockManager>,
    events: Arc<EventBus>,
    manager: Arc<TransactionManager>,
}

impl TransactionSystem {
    pub fn new(
        config: TransactionConfig,
        directory: Arc<dyn BlockDirectory>,
        executor: Arc<dyn CommandExecutor>,
    ) -> Self {
        let events = Arc::new(EventBus::new());
        let locks = Arc::new(LockManager::new(&config));

        {
            let locks = Arc::clone(&locks);
            events.subscribe(
                EventKind::LockReleased,
                Arc::new(move |_event| locks.notify_waiters()),
            );
        }

        let manager = Arc::new(TransactionManager::new(
            &config,
            Arc::clone(&locks),
            Arc::clone(&events),
            directory,
            executor,
        ));

        Self {
            locks,
            events,
            manager,
        }
    }

    pub fn submit(&self, batch: Vec<Command>) -> Submission {
        self.manager.submit(batch)
    }

    pub fn try_submit(&self, batch: Vec<Command>) -> TxnResult<Submission> {
        self.manager.try_submit(batch)
    }

    pub fn await_quiescence(&self) {
        self.manager.await_quiescence();
    }

    pub fn active_transactions(&self) -> usize {
        self.manager.active_transactions()
    }

    pub fn events(&self) -> &Arc<EventBus> {
        &self.events
    }

    pub fn locks(&self) -> &Arc<LockManager> {
        &self.locks
    }
}
