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

//! Lock acquisition and release protocol.
//!
//! A single mutex guards the whole lock table; a single condition variable
//! carries every waiter. Releases broadcast and each waiter re-evaluates its
//! own grant predicate. Coarse, but sufficient for the bounded worker pool
//! the transaction manager runs.

use std::sync::{Condvar, Mutex};
use std::time::{Duration, Instant};

use tracing::trace;

use super::lib::{BlockAddress, LockMode, TransactionConfig, TransactionId, TxnError, TxnResult};
use super::lock_table::{LockStatistics, LockTable};

pub struct LockManager {
    table: Mutex<LockTable>,
    waiters: Condvar,
    wait_timeout: Option<Duration>,
}

impl LockManager {
    pub fn new(config: &TransactionConfig) -> Self {
        Self {
            table: Mutex::new(LockTable::new(config.hash_buckets)),
            waiters: Condvar::new(),
            wait_timeout: config.lock_wait_timeout,
        }
    }

    /// Acquire a lock on one block, blocking until the grant predicate holds.
    ///
    /// A transaction keeps at most one request per address: re-acquiring an
    /// already granted lock returns immediately, and a Shared holder asking
    /// for Exclusive upgrades its request in place and waits for the stronger
    /// grant. With a configured wait timeout, an expired wait unlinks the
    /// request again and fails with `LockTimeout`.
    pub fn acquire(
        &self,
        address: BlockAddress,
        mode: LockMode,
        txn: TransactionId,
    ) -> TxnResult<()> {
        let started = Instant::now();
        let deadline = self.wait_timeout.map(|timeout| started + timeout);

        let mut table = self.table.lock().unwrap();
        let entry = table.get_or_create(address, mode);
        let request = match table.find_request(entry, txn) {
            Some(existing) => {
                if mode == LockMode::Exclusive && table.request_mode(existing) == LockMode::Shared {
                    table.upgrade_request(existing);
                }
                existing
            }
            None => table.push_request(entry, txn, mode),
        };

        loop {
            if table.request_granted(request) || table.try_grant(entry, request) {
                trace!(%address, %txn, ?mode, "lock granted");
                return Ok(());
            }

            table = match deadline {
                None => self.waiters.wait(table).unwrap(),
                Some(deadline) => {
                    let now = Instant::now();
                    if now >= deadline {
                        table.unlink_request(entry, request);
                        return Err(TxnError::LockTimeout {
                            address,
                            waited: started.elapsed(),
                        });
                    }
                    self.waiters.wait_timeout(table, deadline - now).unwrap().0
                }
            };
        }
    }

    /// Release every lock `txn` holds on the given addresses in one phase.
    /// Entries whose queue empties are dropped from their bucket ring.
    /// Returns the number of addresses actually released; the caller is
    /// expected to publish a lock-release event, whose subscriber wakes the
    /// waiters.
    pub fn release_all(&self, txn: TransactionId, addresses: &[BlockAddress]) -> usize {
        let mut table = self.table.lock().unwrap();
        let mut released = 0;
        for &address in addresses {
            if table.release_transaction(address, txn) {
                trace!(%address, %txn, "lock released");
                released += 1;
            }
        }
        released
    }

    /// Broadcast to every waiter so each re-checks its grant predicate.
    pub fn notify_waiters(&self) {
        self.waiters.notify_all();
    }

    /// Granted mode `txn` currently holds on `address`, if any.
    pub fn granted_mode(&self, address: BlockAddress, txn: TransactionId) -> Option<LockMode> {
        self.table.lock().unwrap().granted_mode(address, txn)
    }

    /// True when no resource entry is live in any bucket.
    pub fn is_idle(&self) -> bool {
        self.table.lock().unwrap().is_idle()
    }

    pub fn statistics(&self) -> LockStatistics {
        self.table.lock().unwrap().statistics()
    }
}
