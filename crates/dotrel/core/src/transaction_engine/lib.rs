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

// Common types and collaborator traits for the transaction engine

use std::collections::HashMap;
use std::fmt;
use std::sync::Mutex;
use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Integer identifier of a storage block; the lock granularity.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct BlockAddress(pub u64);

impl fmt::Display for BlockAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Identifier of one transaction, allocated sequentially by the manager.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub struct TransactionId(pub u64);

impl fmt::Display for TransactionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Lock mode for concurrency control.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum LockMode {
    /// Shared lock for reading
    Shared,
    /// Exclusive lock for writing
    Exclusive,
}

/// Kind of a submitted command; determines the lock mode of its blocks.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum CommandKind {
    Select,
    Insert,
    Update,
    Delete,
}

impl CommandKind {
    /// Lock mode this command requires on every block it touches.
    pub fn lock_mode(self) -> LockMode {
        match self {
            CommandKind::Select => LockMode::Shared,
            CommandKind::Insert | CommandKind::Update | CommandKind::Delete => LockMode::Exclusive,
        }
    }
}

/// One command of a transaction batch. The parameters are opaque to the
/// engine and passed through to the executor unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Command {
    /// Name of the target table
    pub table: String,
    /// Kind of operation
    pub kind: CommandKind,
    /// Executor-specific payload (row values, predicates, ...)
    pub parameters: Option<serde_json::Value>,
}

impl Command {
    pub fn new(table: impl Into<String>, kind: CommandKind) -> Self {
        Self {
            table: table.into(),
            kind,
            parameters: None,
        }
    }

    pub fn with_parameters(mut self, parameters: serde_json::Value) -> Self {
        self.parameters = Some(parameters);
        self
    }
}

/// Transaction engine configuration options
#[derive(Debug, Clone)]
pub struct TransactionConfig {
    /// Fixed size of the lock table bucket array
    pub hash_buckets: usize,
    /// Upper bound on concurrently running transaction workers
    pub max_active_transactions: usize,
    /// Maximum time a lock acquisition may wait; `None` waits forever
    pub lock_wait_timeout: Option<Duration>,
}

impl Default for TransactionConfig {
    fn default() -> Self {
        Self {
            hash_buckets: 1024,
            max_active_transactions: 10,
            lock_wait_timeout: None,
        }
    }
}

/// Error types specific to transaction execution
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TxnError {
    #[error("lock wait on block {address} timed out after {waited:?}")]
    LockTimeout {
        address: BlockAddress,
        waited: Duration,
    },

    #[error("no storage blocks found for table {0}")]
    MissingBlocks(String),

    #[error("executor failure: {0}")]
    ExecutorFailure(String),

    #[error("transaction pool is saturated")]
    PoolSaturated,
}

/// Result type for transaction operations
pub type TxnResult<T> = std::result::Result<T, TxnError>;

/// Terminal state of a transaction, reported through its submission handle.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransactionOutcome {
    Committed,
    Aborted(TxnError),
}

impl TransactionOutcome {
    pub fn is_committed(&self) -> bool {
        matches!(self, TransactionOutcome::Committed)
    }
}

/// Resolves the storage blocks a command on a table touches.
///
/// This is an external collaborator of the engine; block layout and segment
/// bookkeeping live outside the transaction core.
pub trait BlockDirectory: Send + Sync {
    fn block_addresses(&self, table: &str) -> Vec<BlockAddress>;
}

/// Applies a batch of commands to the underlying tables.
///
/// Invoked exactly once per transaction, after every lock of the batch has
/// been granted; the locks are held for the whole call.
pub trait CommandExecutor: Send + Sync {
    fn execute(&self, commands: &[Command]) -> TxnResult<()>;
}

/// In-memory block directory mapping each table to a contiguous address
/// range, `from` inclusive to `to` exclusive.
#[derive(Debug, Default)]
pub struct MemoryBlockDirectory {
    ranges: HashMap<String, (u64, u64)>,
}

impl MemoryBlockDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn insert(&mut self, table: impl Into<String>, from: u64, to: u64) {
        self.ranges.insert(table.into(), (from, to));
    }
}

impl BlockDirectory for MemoryBlockDirectory {
    fn block_addresses(&self, table: &str) -> Vec<BlockAddress> {
        match self.ranges.get(table) {
            Some(&(from, to)) => (from..to).map(BlockAddress).collect(),
            None => Vec::new(),
        }
    }
}

/// Executor that accepts every batch without touching any table. Useful for
/// exercising the locking protocol in isolation.
#[derive(Debug, Default)]
pub struct NoopExecutor;

impl CommandExecutor for NoopExecutor {
    fn execute(&self, _commands: &[Command]) -> TxnResult<()> {
        Ok(())
    }
}

/// Executor that accepts every batch and records it, so tests and demos can
/// inspect what reached the execution layer and in which order.
#[derive(Debug, Default)]
pub struct RecordingExecutor {
    batches: Mutex<Vec<Vec<Command>>>,
}

impl RecordingExecutor {
    pub fn new() -> Self {
        Self::default()
    }

    /// Batches executed so far, in execution order.
    pub fn batches(&self) -> Vec<Vec<Command>> {
        self.batches.lock().unwrap().clone()
    }
}

impl CommandExecutor for RecordingExecutor {
    fn execute(&self, commands: &[Command]) -> TxnResult<()> {
        self.batches.lock().unwrap().push(commands.to_vec());
        Ok(())
    }
}
