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

//! Arena of ref-counted byte segments for morsel payloads.
//!
//! A fixed byte arena carved into used and free segments. `commit` copies a
//! payload in and hands back an opaque ref id; readers either copy out or
//! borrow zero-copy under a latch. Two compaction levels reclaim space:
//! L1 coalesces adjacent free segments, L2 slides non-latched used segments
//! toward offset zero. A latched segment is never relocated.
//!
//! One lock guards all bookkeeping. Zero-copy reads stay valid while their
//! latch is held because the arena itself never reallocates and compaction
//! skips latched segments.

use hashbrown::HashMap;
use log::trace;
use parking_lot::Mutex;

/// Observability counters for the memory pool.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct MemoryPoolStats {
    pub commits: u64,
    pub failed_commits: u64,
    pub reads: u64,
    pub releases: u64,
    pub l1_compactions: u64,
    pub l2_compactions: u64,
}

#[derive(Debug, Clone, Copy)]
struct Segment {
    start: usize,
    length: usize,
}

#[derive(Debug, Clone, Copy)]
struct UsedSegment {
    start: usize,
    length: usize,
    latches: u32,
}

#[derive(Debug)]
struct Inner {
    arena: Box<[u8]>,
    free: Vec<Segment>,
    used: HashMap<i64, UsedSegment>,
    next_ref: i64,
    stats: MemoryPoolStats,
}

/// Fixed-capacity byte arena with latch-aware compaction.
#[derive(Debug)]
pub struct MemoryPool {
    inner: Mutex<Inner>,
    capacity: usize,
}

impl MemoryPool {
    pub fn new(capacity: usize) -> Self {
        let capacity = capacity.max(1);
        Self {
            inner: Mutex::new(Inner {
                arena: vec![0u8; capacity].into_boxed_slice(),
                free: vec![Segment {
                    start: 0,
                    length: capacity,
                }],
                used: HashMap::new(),
                next_ref: 1,
                stats: MemoryPoolStats::default(),
            }),
            capacity,
        }
    }

    /// Copy `data` into the arena. Returns the segment's ref id, or -1 when
    /// the pool cannot hold it even after both compaction levels.
    pub fn commit(&self, data: &[u8]) -> i64 {
        let mut inner = self.inner.lock();
        let length = data.len();

        let ref_id = inner.next_ref;
        if length == 0 {
            inner.next_ref += 1;
            inner.stats.commits += 1;
            inner.used.insert(
                ref_id,
                UsedSegment {
                    start: 0,
                    length: 0,
                    latches: 0,
                },
            );
            return ref_id;
        }

        let total_free: usize = inner.free.iter().map(|s| s.length).sum();
        if total_free < length {
            inner.stats.failed_commits += 1;
            return -1;
        }

        let mut slot = find_free_segment(&inner.free, length);
        if slot.is_none() {
            level1_compaction(&mut inner);
            slot = find_free_segment(&inner.free, length);
        }
        if slot.is_none() {
            level2_compaction(&mut inner);
            slot = find_free_segment(&inner.free, length);
        }
        let Some(index) = slot else {
            // latched segments can fragment the arena beyond repair
            inner.stats.failed_commits += 1;
            return -1;
        };

        let segment = inner.free.remove(index);
        if segment.length > length {
            inner.free.push(Segment {
                start: segment.start + length,
                length: segment.length - length,
            });
        }
        inner.arena[segment.start..segment.start + length].copy_from_slice(data);
        inner.next_ref += 1;
        inner.stats.commits += 1;
        inner.used.insert(
            ref_id,
            UsedSegment {
                start: segment.start,
                length,
                latches: 0,
            },
        );
        ref_id
    }

    /// Copy a committed payload out of the arena.
    pub fn read(&self, ref_id: i64) -> Option<Vec<u8>> {
        let mut inner = self.inner.lock();
        inner.stats.reads += 1;
        let segment = *inner.used.get(&ref_id)?;
        Some(inner.arena[segment.start..segment.start + segment.length].to_vec())
    }

    /// Borrow a committed payload zero-copy. The segment is latched for the
    /// lifetime of the returned view and cannot be relocated or released
    /// until the view drops (or [`MemoryPool::unlatch`] balances it out).
    pub fn read_zero_copy(&self, ref_id: i64) -> Option<PoolView<'_>> {
        let mut guard = self.inner.lock();
        let inner = &mut *guard;
        inner.stats.reads += 1;
        let segment = inner.used.get_mut(&ref_id)?;
        segment.latches += 1;
        let ptr = inner.arena[segment.start..].as_ptr();
        let len = segment.length;
        Some(PoolView {
            pool: self,
            ref_id,
            ptr,
            len,
        })
    }

    /// Decrement a segment's latch counter. Returns false for unknown refs
    /// or an unlatched segment.
    pub fn unlatch(&self, ref_id: i64) -> bool {
        let mut inner = self.inner.lock();
        match inner.used.get_mut(&ref_id) {
            Some(segment) if segment.latches > 0 => {
                segment.latches -= 1;
                true
            }
            _ => false,
        }
    }

    /// Return a segment to the free list. Refuses while latched.
    pub fn release(&self, ref_id: i64) -> bool {
        let mut inner = self.inner.lock();
        let Some(segment) = inner.used.get(&ref_id).copied() else {
            return false;
        };
        if segment.latches > 0 {
            return false;
        }
        inner.used.remove(&ref_id);
        if segment.length > 0 {
            inner.free.push(Segment {
                start: segment.start,
                length: segment.length,
            });
        }
        inner.stats.releases += 1;
        true
    }

    /// Total bytes currently free (possibly fragmented).
    pub fn available(&self) -> usize {
        self.inner.lock().free.iter().map(|s| s.length).sum()
    }

    pub fn capacity(&self) -> usize {
        self.capacity
    }

    pub fn stats(&self) -> MemoryPoolStats {
        self.inner.lock().stats
    }
}

/// Zero-copy borrow of a pool segment, latched until dropped.
pub struct PoolView<'a> {
    pool: &'a MemoryPool,
    ref_id: i64,
    ptr: *const u8,
    len: usize,
}

impl PoolView<'_> {
    pub fn as_bytes(&self) -> &[u8] {
        // Safety: the latch taken in read_zero_copy pins the segment: L2
        // compaction skips latched segments, release refuses them, and the
        // arena allocation itself lives as long as the pool borrow held
        // by this view.
        unsafe { std::slice::from_raw_parts(self.ptr, self.len) }
    }
}

impl std::ops::Deref for PoolView<'_> {
    type Target = [u8];

    fn deref(&self) -> &Self::Target {
        self.as_bytes()
    }
}

impl Drop for PoolView<'_> {
    fn drop(&mut self) {
        self.pool.unlatch(self.ref_id);
    }
}

fn find_free_segment(free: &[Segment], length: usize) -> Option<usize> {
    free.iter().position(|segment| segment.length >= length)
}

/// L1: merge adjacent free segments.
fn level1_compaction(inner: &mut Inner) {
    inner.stats.l1_compactions += 1;
    inner.free.sort_unstable_by_key(|segment| segment.start);
    let mut merged: Vec<Segment> = Vec::with_capacity(inner.free.len());
    for segment in inner.free.drain(..) {
        match merged.last_mut() {
            Some(last) if last.start + last.length == segment.start => {
                last.length += segment.length;
            }
            _ => merged.push(segment),
        }
    }
    inner.free = merged;
}

/// L2: slide non-latched used segments toward offset zero and rebuild the
/// free list from the gaps. Latched segments hold their position.
fn level2_compaction(inner: &mut Inner) {
    inner.stats.l2_compactions += 1;
    trace!("memory pool level 2 compaction");

    let mut refs: Vec<i64> = inner.used.keys().copied().collect();
    refs.sort_unstable_by_key(|r| inner.used[r].start);

    let mut offset = 0usize;
    for ref_id in &refs {
        let segment = inner.used[ref_id];
        if segment.length == 0 {
            continue;
        }
        if segment.latches == 0 && segment.start != offset && segment.start > offset {
            inner
                .arena
                .copy_within(segment.start..segment.start + segment.length, offset);
            if let Some(entry) = inner.used.get_mut(ref_id) {
                entry.start = offset;
            }
        }
        let segment = inner.used[ref_id];
        offset = offset.max(segment.start + segment.length);
    }

    // rebuild the free list from the gaps between used segments
    refs.sort_unstable_by_key(|r| inner.used[r].start);
    let mut free = Vec::new();
    let mut cursor = 0usize;
    for ref_id in &refs {
        let segment = inner.used[ref_id];
        if segment.length == 0 {
            continue;
        }
        if segment.start > cursor {
            free.push(Segment {
                start: cursor,
                length: segment.start - cursor,
            });
        }
        cursor = cursor.max(segment.start + segment.length);
    }
    if cursor < inner.arena.len() {
        free.push(Segment {
            start: cursor,
            length: inner.arena.len() - cursor,
        });
    }
    inner.free = free;
}

// Safety: the raw pointer in PoolView targets latched arena memory that is
// never moved or mutated while the view exists.
unsafe impl Send for PoolView<'_> {}
unsafe impl Sync for PoolView<'_> {}
