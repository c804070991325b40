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

//! Open-addressed hash set and multimap over u64 keys.
//!
//! Purpose-built so the same containers serve DISTINCT, COUNT DISTINCT and
//! hash-join builds. Quadratic probing over a power-of-two table, resized at
//! 0.7 occupancy. Slot states are encoded in the key itself: `EMPTY` (0) and
//! `TOMBSTONE` (u64::MAX) are reserved, and real keys that land on a
//! sentinel are rehashed onto fixed substitutes before insertion.

const EMPTY: u64 = 0;
const TOMBSTONE: u64 = u64::MAX;
const LOAD_FACTOR: f64 = 0.7;
const MIN_CAPACITY: usize = 16;

/// Substitutes for keys that collide with the slot sentinels.
const EMPTY_SUBSTITUTE: u64 = 0x9e37_79b9_7f4a_7c15;
const TOMBSTONE_SUBSTITUTE: u64 = 0x6a09_e667_f3bc_c909;

#[inline]
fn rotate_sentinel(key: u64) -> u64 {
    match key {
        EMPTY => EMPTY_SUBSTITUTE,
        TOMBSTONE => TOMBSTONE_SUBSTITUTE,
        other => other,
    }
}

/// Quadratic probe sequence over a power-of-two table.
#[inline]
fn probe(slot: usize, step: usize, mask: usize) -> usize {
    (slot + (step * (step + 1)) / 2) & mask
}

/// Open-addressed set of u64 keys.
#[derive(Debug, Clone)]
pub struct FlatHashSet {
    slots: Vec<u64>,
    items: usize,
    mask: usize,
}

impl Default for FlatHashSet {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatHashSet {
    pub fn new() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }

    /// A set pre-sized so `expected` inserts do not trigger a resize.
    pub fn with_capacity(expected: usize) -> Self {
        let capacity = table_capacity(expected);
        Self {
            slots: vec![EMPTY; capacity],
            items: 0,
            mask: capacity - 1,
        }
    }

    /// Insert a key, returning true when the key was not already present.
    pub fn insert(&mut self, key: u64) -> bool {
        if (self.items + 1) as f64 > self.slots.len() as f64 * LOAD_FACTOR {
            self.grow();
        }
        let key = rotate_sentinel(key);
        let origin = (key as usize) & self.mask;
        let mut first_tombstone: Option<usize> = None;
        for step in 0..self.slots.len() {
            let slot = probe(origin, step, self.mask);
            match self.slots[slot] {
                EMPTY => {
                    let target = first_tombstone.unwrap_or(slot);
                    self.slots[target] = key;
                    self.items += 1;
                    return true;
                }
                TOMBSTONE => {
                    if first_tombstone.is_none() {
                        first_tombstone = Some(slot);
                    }
                }
                occupant if occupant == key => return false,
                _ => {}
            }
        }
        unreachable!("flat hash set probe sequence exhausted")
    }

    pub fn contains(&self, key: u64) -> bool {
        let key = rotate_sentinel(key);
        let origin = (key as usize) & self.mask;
        for step in 0..self.slots.len() {
            let slot = probe(origin, step, self.mask);
            match self.slots[slot] {
                EMPTY => return false,
                occupant if occupant == key => return true,
                _ => {}
            }
        }
        false
    }

    /// Remove a key, returning true when it was present.
    pub fn remove(&mut self, key: u64) -> bool {
        let key = rotate_sentinel(key);
        let origin = (key as usize) & self.mask;
        for step in 0..self.slots.len() {
            let slot = probe(origin, step, self.mask);
            match self.slots[slot] {
                EMPTY => return false,
                occupant if occupant == key => {
                    self.slots[slot] = TOMBSTONE;
                    self.items -= 1;
                    return true;
                }
                _ => {}
            }
        }
        false
    }

    /// Number of keys currently held.
    pub fn items(&self) -> usize {
        self.items
    }

    fn grow(&mut self) {
        let old = std::mem::replace(&mut self.slots, vec![EMPTY; (self.mask + 1) * 2]);
        self.mask = self.slots.len() - 1;
        self.items = 0;
        for key in old {
            if key != EMPTY && key != TOMBSTONE {
                self.insert_rehashed(key);
            }
        }
    }

    // insert a key that has already been sentinel-rotated
    fn insert_rehashed(&mut self, key: u64) {
        let origin = (key as usize) & self.mask;
        for step in 0..self.slots.len() {
            let slot = probe(origin, step, self.mask);
            if self.slots[slot] == EMPTY {
                self.slots[slot] = key;
                self.items += 1;
                return;
            }
        }
        unreachable!("flat hash set rehash probe sequence exhausted")
    }
}

/// Open-addressed multimap from u64 keys to i64 row indices, used by
/// hash-join builds and group-by: `insert` appends to the key's index list.
#[derive(Debug, Clone)]
pub struct FlatHashMap {
    keys: Vec<u64>,
    values: Vec<Vec<i64>>,
    items: usize,
    mask: usize,
}

impl Default for FlatHashMap {
    fn default() -> Self {
        Self::new()
    }
}

impl FlatHashMap {
    pub fn new() -> Self {
        Self::with_capacity(MIN_CAPACITY)
    }

    pub fn with_capacity(expected: usize) -> Self {
        let capacity = table_capacity(expected);
        Self {
            keys: vec![EMPTY; capacity],
            values: vec![Vec::new(); capacity],
            items: 0,
            mask: capacity - 1,
        }
    }

    /// Append `value` to the key's index list, returning true when the key
    /// was new.
    pub fn insert(&mut self, key: u64, value: i64) -> bool {
        if (self.items + 1) as f64 > self.keys.len() as f64 * LOAD_FACTOR {
            self.grow();
        }
        let key = rotate_sentinel(key);
        let origin = (key as usize) & self.mask;
        for step in 0..self.keys.len() {
            let slot = probe(origin, step, self.mask);
            match self.keys[slot] {
                EMPTY | TOMBSTONE => {
                    self.keys[slot] = key;
                    self.values[slot].push(value);
                    self.items += 1;
                    return true;
                }
                occupant if occupant == key => {
                    self.values[slot].push(value);
                    return false;
                }
                _ => {}
            }
        }
        unreachable!("flat hash map probe sequence exhausted")
    }

    /// All row indices recorded for `key`, in insertion order.
    pub fn get(&self, key: u64) -> Option<&[i64]> {
        let key = rotate_sentinel(key);
        let origin = (key as usize) & self.mask;
        for step in 0..self.keys.len() {
            let slot = probe(origin, step, self.mask);
            match self.keys[slot] {
                EMPTY => return None,
                occupant if occupant == key => return Some(&self.values[slot]),
                _ => {}
            }
        }
        None
    }

    /// Number of distinct keys currently held.
    pub fn items(&self) -> usize {
        self.items
    }

    /// Visit every (key, indices) pair. Iteration order is table order and
    /// not stable across resizes.
    pub fn for_each(&self, mut visitor: impl FnMut(u64, &[i64])) {
        for (slot, key) in self.keys.iter().enumerate() {
            if *key != EMPTY && *key != TOMBSTONE {
                visitor(*key, &self.values[slot]);
            }
        }
    }

    fn grow(&mut self) {
        let new_capacity = (self.mask + 1) * 2;
        let old_keys = std::mem::replace(&mut self.keys, vec![EMPTY; new_capacity]);
        let old_values = std::mem::replace(&mut self.values, vec![Vec::new(); new_capacity]);
        self.mask = new_capacity - 1;
        self.items = 0;
        for (key, values) in old_keys.into_iter().zip(old_values) {
            if key != EMPTY && key != TOMBSTONE {
                self.reinsert(key, values);
            }
        }
    }

    fn reinsert(&mut self, key: u64, values: Vec<i64>) {
        let origin = (key as usize) & self.mask;
        for step in 0..self.keys.len() {
            let slot = probe(origin, step, self.mask);
            if self.keys[slot] == EMPTY {
                self.keys[slot] = key;
                self.values[slot] = values;
                self.items += 1;
                return;
            }
        }
        unreachable!("flat hash map rehash probe sequence exhausted")
    }
}

fn table_capacity(expected: usize) -> usize {
    let needed = ((expected.max(1) as f64 / LOAD_FACTOR).ceil() as usize).max(MIN_CAPACITY);
    needed.next_power_of_two()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn set_insert_and_items() {
        let mut set = FlatHashSet::new();
        assert!(set.insert(42));
        assert!(!set.insert(42));
        assert!(set.insert(43));
        assert_eq!(set.items(), 2);
        assert!(set.contains(42));
        assert!(!set.contains(44));
    }

    #[test]
    fn set_handles_sentinel_keys() {
        let mut set = FlatHashSet::new();
        assert!(set.insert(0));
        assert!(set.insert(u64::MAX));
        assert!(!set.insert(0));
        assert!(!set.insert(u64::MAX));
        assert!(set.contains(0));
        assert!(set.contains(u64::MAX));
        assert_eq!(set.items(), 2);
    }

    #[test]
    fn set_survives_growth() {
        let mut set = FlatHashSet::new();
        for key in 1..=10_000u64 {
            assert!(set.insert(key.wrapping_mul(0x9e3779b97f4a7c15)));
        }
        assert_eq!(set.items(), 10_000);
        for key in 1..=10_000u64 {
            assert!(set.contains(key.wrapping_mul(0x9e3779b97f4a7c15)));
        }
    }

    #[test]
    fn set_remove_leaves_probe_chain_intact() {
        let mut set = FlatHashSet::with_capacity(16);
        // keys that all land on the same origin slot
        let base = 5u64;
        let keys: Vec<u64> = (0..4).map(|i| base + (i * (set.mask as u64 + 1))).collect();
        for key in &keys {
            set.insert(*key);
        }
        assert!(set.remove(keys[1]));
        for (i, key) in keys.iter().enumerate() {
            assert_eq!(set.contains(*key), i != 1);
        }
        // a re-insert may reuse the tombstone
        assert!(set.insert(keys[1]));
        assert!(set.contains(keys[1]));
    }

    #[test]
    fn map_is_a_multimap() {
        let mut map = FlatHashMap::new();
        assert!(map.insert(7, 0));
        assert!(!map.insert(7, 3));
        assert!(!map.insert(7, 9));
        assert!(map.insert(8, 1));
        assert_eq!(map.get(7), Some(&[0, 3, 9][..]));
        assert_eq!(map.get(8), Some(&[1][..]));
        assert_eq!(map.get(9), None);
        assert_eq!(map.items(), 2);
    }

    #[test]
    fn map_preserves_lists_across_growth() {
        let mut map = FlatHashMap::new();
        for row in 0..5_000i64 {
            map.insert((row % 97) as u64 + 1, row);
        }
        assert_eq!(map.items(), 97);
        let rows = map.get(1 + 13).unwrap();
        assert!(rows.iter().all(|r| r % 97 == 13));
        assert_eq!(rows.len(), 5_000 / 97 + usize::from(13 < 5_000 % 97) as usize);
    }
}
