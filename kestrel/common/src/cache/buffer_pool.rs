// Licensed to the Apache Software Foundation (ASF) under one
// or more contributor license agreements.  See the NOTICE file
// distributed with this work for additional information
// regarding copyright ownership.  The ASF licenses this file
// to you under the Apache License, Version 2.0 (the
// "License"); you may not use this file except in compliance
// with the License.  You may obtain a copy of the License at
//
//   http://www.apache.org/licenses/LICENSE-2.0
//
// Unless required by applicable law or agreed to in writing,
// software distributed under the License is distributed on an
// "AS IS" BASIS, WITHOUT WARRANTIES OR CONDITIONS OF ANY
// KIND, either express or implied.  See the License for the
// specific language governing permissions and limitations
// under the License.

//! Process-wide blob byte cache with LRU-K eviction.
//!
//! Each key tracks its last K access timestamps; eviction removes the key
//! whose K-th most recent access is oldest, ties broken by insertion order.
//! Real accesses (get and set) are stamped from one clock; synthetic
//! accesses live in a second clock domain that is always older than any
//! real access, so keys without a full history lose to established keys.
//! An entry with exactly one real access gets one synthetic access the
//! first time it comes up for eviction, its "second chance".
//!
//! All operations are total: no I/O, nothing fails. `set` may push the
//! cache over its soft capacity; the owner decides when to call `evict`.

use std::collections::VecDeque;

use bytes::Bytes;
use hashbrown::HashMap;
use log::trace;
use parking_lot::Mutex;

/// Real access timestamps start here; synthetic ones count up from zero,
/// so every synthetic access is older than every real one.
const REAL_CLOCK_BASE: u64 = 1 << 48;

/// Observability counters for the buffer pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct BufferPoolStats {
    pub hits: u64,
    pub misses: u64,
    pub evictions: u64,
    pub inserts: u64,
}

#[derive(Debug)]
struct Entry {
    value: Bytes,
    /// The most recent K access timestamps, oldest first.
    accesses: VecDeque<u64>,
    real_accesses: usize,
    second_chance_used: bool,
    insertion_seq: u64,
}

impl Entry {
    /// Timestamp of the K-th most recent access.
    fn kth_access(&self) -> u64 {
        *self.accesses.front().unwrap_or(&0)
    }

    /// Record an access, keeping the K most recent timestamps in ascending
    /// order. Synthetic and real clocks are separate domains, so ordering
    /// is by value, not by arrival.
    fn record(&mut self, timestamp: u64, k: usize) {
        let position = self.accesses.partition_point(|t| *t <= timestamp);
        self.accesses.insert(position, timestamp);
        while self.accesses.len() > k {
            self.accesses.pop_front();
        }
    }
}

#[derive(Debug)]
struct Inner {
    entries: HashMap<u64, Entry>,
    real_clock: u64,
    synthetic_clock: u64,
    insertions: u64,
    bytes: usize,
    stats: BufferPoolStats,
}

/// LRU-K cache from blob-path hashes to shared immutable byte buffers.
#[derive(Debug)]
pub struct BufferPool {
    inner: Mutex<Inner>,
    capacity: usize,
    k: usize,
}

impl BufferPool {
    pub fn new(capacity: usize, k: usize) -> Self {
        Self {
            inner: Mutex::new(Inner {
                entries: HashMap::new(),
                real_clock: REAL_CLOCK_BASE,
                synthetic_clock: 0,
                insertions: 0,
                bytes: 0,
                stats: BufferPoolStats::default(),
            }),
            capacity,
            k: k.max(1),
        }
    }

    /// Look up a key, recording a real access on hit. Never evicts.
    pub fn get(&self, key: u64) -> Option<Bytes> {
        let mut inner = self.inner.lock();
        inner.real_clock += 1;
        let timestamp = inner.real_clock;
        match inner.entries.get_mut(&key) {
            Some(entry) => {
                entry.record(timestamp, self.k);
                entry.real_accesses += 1;
                let value = entry.value.clone();
                inner.stats.hits += 1;
                Some(value)
            }
            None => {
                inner.stats.misses += 1;
                None
            }
        }
    }

    /// Insert or replace a key. Counts as the entry's first real access;
    /// the remaining K-1 access slots are filled with synthetic history.
    /// May push the cache over its soft capacity.
    pub fn set(&self, key: u64, value: Bytes) {
        let mut inner = self.inner.lock();
        inner.real_clock += 1;
        inner.insertions += 1;
        inner.stats.inserts += 1;
        let real_timestamp = inner.real_clock;
        let insertion_seq = inner.insertions;

        let mut accesses = VecDeque::with_capacity(self.k);
        for _ in 0..self.k - 1 {
            inner.synthetic_clock += 1;
            accesses.push_back(inner.synthetic_clock);
        }
        accesses.push_back(real_timestamp);

        if let Some(previous) = inner.entries.get(&key) {
            inner.bytes -= previous.value.len();
        }
        inner.bytes += value.len();
        inner.entries.insert(
            key,
            Entry {
                value,
                accesses,
                real_accesses: 1,
                second_chance_used: false,
                insertion_seq,
            },
        );
    }

    /// Remove and return the key with the oldest K-th most recent access.
    ///
    /// An entry with exactly one real access gets a synthetic access the
    /// first time it is selected here and the selection repeats; once every
    /// candidate has had its chance the oldest loses.
    pub fn evict(&self) -> Option<u64> {
        let mut inner = self.inner.lock();
        loop {
            let victim = inner
                .entries
                .iter()
                .min_by_key(|(_, entry)| (entry.kth_access(), entry.insertion_seq))
                .map(|(key, _)| *key)?;

            let entry = inner.entries.get_mut(&victim).expect("victim exists");
            if entry.real_accesses == 1 && !entry.second_chance_used {
                entry.second_chance_used = true;
                inner.synthetic_clock += 1;
                let timestamp = inner.synthetic_clock;
                let entry = inner.entries.get_mut(&victim).expect("victim exists");
                entry.record(timestamp, self.k);
                continue;
            }

            let entry = inner.entries.remove(&victim).expect("victim exists");
            inner.bytes -= entry.value.len();
            inner.stats.evictions += 1;
            trace!("buffer pool evicted key {victim:#x}");
            return Some(victim);
        }
    }

    /// Bytes currently cached.
    pub fn size_bytes(&self) -> usize {
        self.inner.lock().bytes
    }

    /// Soft capacity in bytes.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// True while the cache holds more than its soft capacity.
    pub fn over_capacity(&self) -> bool {
        self.size_bytes() > self.capacity
    }

    pub fn stats(&self) -> BufferPoolStats {
        self.inner.lock().stats
    }
}
