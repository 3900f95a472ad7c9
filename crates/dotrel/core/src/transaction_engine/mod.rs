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

// Transaction Engine Module
// Strict two-phase-locking transaction execution over shared storage blocks

pub mod events;
pub mod lib;
pub mod lock_manager;
pub mod lock_table;
pub mod manager;

// Public exports
pub use events::{EventBus, EventKind, HandlerId, TransactionEvent};
pub use lib::{
    BlockAddress, BlockDirectory, Command, CommandExecutor, CommandKind, LockMode,
    MemoryBlockDirectory, NoopExecutor, RecordingExecutor, TransactionConfig, TransactionId,
    TransactionOutcome, TxnError, TxnResult,
};
pub use lock_manager::LockManager;
pub use lock_table::{LockStatistics, LockTable};
pub use manager::{Submission, TransactionManager, TransactionSystem};
