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

//! Hashed lock table.
//!
//! Maps block addresses to per-resource lock queues. Each bucket of the fixed
//! hash array anchors a circular doubly linked ring of resource entries that
//! collide on the bucket; each entry owns a circular FIFO ring of lock
//! requests. Both rings live in index-addressed arenas so that unlink stays
//! O(1) without owning back-references. The structure itself is not
//! synchronized; `LockManager` guards it with a single mutex.

use super::lib::{BlockAddress, LockMode, TransactionId};

/// Stable arena index of a resource entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct EntryIndex(usize);

/// Stable arena index of a lock request.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub(crate) struct RequestIndex(usize);

/// One waiter or holder record inside a resource queue.
#[derive(Debug)]
struct RequestNode {
    txn: TransactionId,
    mode: LockMode,
    granted: bool,
    next: RequestIndex,
    prev: RequestIndex,
}

/// Lock-queue container for one block address.
#[derive(Debug)]
struct EntryNode {
    address: BlockAddress,
    /// Dominant granted mode, updated whenever the queue head is granted.
    mode: LockMode,
    /// Oldest request of the queue; its `prev` is the queue tail.
    queue_head: Option<RequestIndex>,
    next: EntryIndex,
    prev: EntryIndex,
}

/// Counters describing the current lock table population.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockStatistics {
    /// Requests currently granted
    pub granted_requests: usize,
    /// Requests currently waiting
    pub waiting_requests: usize,
    /// Block addresses with a live resource entry
    pub live_resources: usize,
}

pub struct LockTable {
    buckets: Vec<Option<EntryIndex>>,
    entries: Vec<Option<EntryNode>>,
    free_entries: Vec<EntryIndex>,
    requests: Vec<Option<RequestNode>>,
    free_requests: Vec<RequestIndex>,
}

impl LockTable {
    /// Create a table with a fixed number of hash buckets.
    pub fn new(hash_buckets: usize) -> Self {
        assert!(hash_buckets > 0, "lock table needs at least one bucket");
        Self {
            buckets: (0..hash_buckets).map(|_| None).collect(),
            entries: Vec::new(),
            free_entries: Vec::new(),
            requests: Vec::new(),
            free_requests: Vec::new(),
        }
    }

    /// Bucket slot of a block address. Plain modulo hashing; collisions are
    /// expected and resolved by walking the bucket ring.
    fn bucket_of(&self, address: BlockAddress) -> usize {
        (address.0 % self.buckets.len() as u64) as usize
    }

    fn entry(&self, index: EntryIndex) -> &EntryNode {
        self.entries[index.0].as_ref().expect("stale entry index")
    }

    fn entry_mut(&mut self, index: EntryIndex) -> &mut EntryNode {
        self.entries[index.0].as_mut().expect("stale entry index")
    }

    fn request(&self, index: RequestIndex) -> &RequestNode {
        self.requests[index.0].as_ref().expect("stale request index")
    }

    fn request_mut(&mut self, index: RequestIndex) -> &mut RequestNode {
        self.requests[index.0].as_mut().expect("stale request index")
    }

    /// Walk the bucket ring once, looking for the entry of `address`.
    pub(crate) fn lookup(&self, address: BlockAddress) -> Option<EntryIndex> {
        let head = self.buckets[self.bucket_of(address)]?;
        let mut current = head;
        loop {
            if self.entry(current).address == address {
                return Some(current);
            }
            current = self.entry(current).next;
            if current == head {
                return None;
            }
        }
    }

    /// Find the entry of `address`, appending a fresh one to its bucket ring
    /// if none exists yet. A fresh entry in an empty bucket forms a
    /// single-element ring.
    pub(crate) fn get_or_create(&mut self, address: BlockAddress, mode: LockMode) -> EntryIndex {
        if let Some(existing) = self.lookup(address) {
            return existing;
        }

        let index = self.alloc_entry(EntryNode {
            address,
            mode,
            queue_head: None,
            next: EntryIndex(0),
            prev: EntryIndex(0),
        });

        let bucket = self.bucket_of(address);
        match self.buckets[bucket] {
            None => {
                let entry = self.entry_mut(index);
                entry.next = index;
                entry.prev = index;
                self.buckets[bucket] = Some(index);
            }
            Some(head) => {
                let tail = self.entry(head).prev;
                {
                    let entry = self.entry_mut(index);
                    entry.next = head;
                    entry.prev = tail;
                }
                self.entry_mut(tail).next = index;
                self.entry_mut(head).prev = index;
            }
        }
        index
    }

    /// Unlink an entry from its bucket ring and free its arena slot. The
    /// caller must have emptied the request queue first.
    fn remove_entry(&mut self, index: EntryIndex) {
        let (address, next, prev) = {
            let entry = self.entry(index);
            debug_assert!(entry.queue_head.is_none(), "removing entry with live queue");
            (entry.address, entry.next, entry.prev)
        };

        let bucket = self.bucket_of(address);
        if next == index {
            self.buckets[bucket] = None;
        } else {
            self.entry_mut(prev).next = next;
            self.entry_mut(next).prev = prev;
            if self.buckets[bucket] == Some(index) {
                self.buckets[bucket] = Some(next);
            }
        }

        self.entries[index.0] = None;
        self.free_entries.push(index);
    }

    /// Append a request at the queue tail (`head.prev`).
    pub(crate) fn push_request(
        &mut self,
        entry: EntryIndex,
        txn: TransactionId,
        mode: LockMode,
    ) -> RequestIndex {
        let index = self.alloc_request(RequestNode {
            txn,
            mode,
            granted: false,
            next: RequestIndex(0),
            prev: RequestIndex(0),
        });

        match self.entry(entry).queue_head {
            None => {
                let request = self.request_mut(index);
                request.next = index;
                request.prev = index;
                self.entry_mut(entry).queue_head = Some(index);
            }
            Some(head) => {
                let tail = self.request(head).prev;
                {
                    let request = self.request_mut(index);
                    request.next = head;
                    request.prev = tail;
                }
                self.request_mut(tail).next = index;
                self.request_mut(head).prev = index;
            }
        }
        index
    }

    /// Unlink one request from its entry's queue. Removing the last request
    /// also removes the entry from its bucket, so an empty queue never
    /// outlives its final waiter.
    pub(crate) fn unlink_request(&mut self, entry: EntryIndex, index: RequestIndex) {
        let (next, prev) = {
            let request = self.request(index);
            (request.next, request.prev)
        };

        if next == index {
            self.entry_mut(entry).queue_head = None;
        } else {
            self.request_mut(prev).next = next;
            self.request_mut(next).prev = prev;
            if self.entry(entry).queue_head == Some(index) {
                self.entry_mut(entry).queue_head = Some(next);
            }
        }

        self.requests[index.0] = None;
        self.free_requests.push(index);

        if self.entry(entry).queue_head.is_none() {
            self.remove_entry(entry);
        }
    }

    /// Find the request of `txn` in the entry's queue, if any.
    pub(crate) fn find_request(
        &self,
        entry: EntryIndex,
        txn: TransactionId,
    ) -> Option<RequestIndex> {
        let head = self.entry(entry).queue_head?;
        let mut current = head;
        loop {
            if self.request(current).txn == txn {
                return Some(current);
            }
            current = self.request(current).next;
            if current == head {
                return None;
            }
        }
    }

    pub(crate) fn request_mode(&self, index: RequestIndex) -> LockMode {
        self.request(index).mode
    }

    pub(crate) fn request_granted(&self, index: RequestIndex) -> bool {
        self.request(index).granted
    }

    /// Turn an already queued request into an exclusive one; the grant is
    /// revoked until the predicate holds for the stronger mode.
    pub(crate) fn upgrade_request(&mut self, index: RequestIndex) {
        let request = self.request_mut(index);
        request.mode = LockMode::Exclusive;
        request.granted = false;
    }

    /// Evaluate the grant predicate for one request and record the grant when
    /// it holds:
    /// - the request is the queue head (oldest): granted, and the entry's
    ///   dominant mode becomes the request mode;
    /// - the head holds Shared and the request is Shared: granted;
    /// - the head holds Exclusive for the same transaction: granted
    ///   (re-entrance).
    pub(crate) fn try_grant(&mut self, entry: EntryIndex, index: RequestIndex) -> bool {
        let head = match self.entry(entry).queue_head {
            Some(head) => head,
            None => return false,
        };

        if head == index {
            let mode = self.request(index).mode;
            self.entry_mut(entry).mode = mode;
            self.request_mut(index).granted = true;
            return true;
        }

        let (head_mode, head_txn) = {
            let head = self.request(head);
            (head.mode, head.txn)
        };
        let (mode, txn) = {
            let request = self.request(index);
            (request.mode, request.txn)
        };

        let compatible = (head_mode == LockMode::Shared && mode == LockMode::Shared)
            || (head_mode == LockMode::Exclusive && head_txn == txn);
        if compatible {
            self.request_mut(index).granted = true;
        }
        compatible
    }

    /// Unlink every request of `txn` on `address`. A transaction holds at
    /// most one request per address, but the queue is scanned until no match
    /// remains. Returns whether anything was released.
    pub(crate) fn release_transaction(&mut self, address: BlockAddress, txn: TransactionId) -> bool {
        let mut released = false;
        while let Some(entry) = self.lookup(address) {
            match self.find_request(entry, txn) {
                Some(request) => {
                    self.unlink_request(entry, request);
                    released = true;
                }
                None => break,
            }
        }
        released
    }

    /// Granted mode `txn` currently holds on `address`, if any.
    pub(crate) fn granted_mode(
        &self,
        address: BlockAddress,
        txn: TransactionId,
    ) -> Option<LockMode> {
        let entry = self.lookup(address)?;
        let request = self.find_request(entry, txn)?;
        let request = self.request(request);
        request.granted.then_some(request.mode)
    }

    /// True when every bucket is empty.
    pub fn is_idle(&self) -> bool {
        self.buckets.iter().all(Option::is_none)
    }

    pub fn statistics(&self) -> LockStatistics {
        let granted_requests = self.requests.iter().flatten().filter(|r| r.granted).count();
        let total_requests = self.requests.iter().flatten().count();
        LockStatistics {
            granted_requests,
            waiting_requests: total_requests - granted_requests,
            live_resources: self.entries.iter().flatten().count(),
        }
    }

    fn alloc_entry(&mut self, node: EntryNode) -> EntryIndex {
        match self.free_entries.pop() {
            Some(index) => {
                self.entries[index.0] = Some(node);
                index
            }
            None => {
                self.entries.push(Some(node));
                EntryIndex(self.entries.len() - 1)
            }
        }
    }

    fn alloc_request(&mut self, node: RequestNode) -> RequestIndex {
        match self.free_requests.pop() {
            Some(index) => {
                self.requests[index.0] = Some(node);
                index
            }
            None => {
                self.requests.push(Some(node));
                RequestIndex(self.requests.len() - 1)
            }
        }
    }
}
