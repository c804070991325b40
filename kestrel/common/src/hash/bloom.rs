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

//! Split-block bloom filter over row fingerprints.
//!
//! The first stage of hash-join prefiltering: probe rows that cannot be in
//! the build side are dropped before the hash table is touched. Blocks are
//! 256 bits; the upper 32 bits of a fingerprint select the block, the lower
//! 32 bits derive one bit in each of the block's eight words. No false
//! negatives; the false-positive rate tracks the sizing target.

use arrow::array::{ArrayRef, BooleanArray};

use crate::error::Result;
use crate::hash::row::{create_row_hashes, NULL_HASH};

/// Per-word salts for deriving eight bit positions from the low half of a
/// fingerprint. Same constants the Parquet split-block filter uses.
const SALT: [u32; 8] = [
    0x47b6_137b,
    0x4497_4d91,
    0x8824_ad5b,
    0xa2b7_289d,
    0x7054_95c7,
    0x2df1_424b,
    0x9efc_4947,
    0x5c6b_fb31,
];

const WORDS_PER_BLOCK: usize = 8;
const BITS_PER_BLOCK: usize = 256;

/// A split-block bloom filter sized for a target false-positive rate.
#[derive(Debug, Clone)]
pub struct BloomFilter {
    blocks: Vec<[u32; WORDS_PER_BLOCK]>,
    items: usize,
}

impl BloomFilter {
    /// Size the filter for `expected_items` at the given false-positive
    /// rate target (clamped to a sane range).
    pub fn new(expected_items: usize, target_fpr: f64) -> Self {
        let expected = expected_items.max(1) as f64;
        let fpr = target_fpr.clamp(0.0001, 0.5);
        // classic bloom sizing doubled: split-block filters need more bits
        // per key than the textbook formula to hold the same rate
        let ln2 = std::f64::consts::LN_2;
        let bits = (-expected * fpr.ln() / (ln2 * ln2) * 2.0).ceil() as usize;
        let num_blocks = bits.div_ceil(BITS_PER_BLOCK).next_power_of_two();
        Self {
            blocks: vec![[0u32; WORDS_PER_BLOCK]; num_blocks],
            items: 0,
        }
    }

    /// Add one fingerprint. The null sentinel is never stored; null keys
    /// cannot match anything.
    pub fn insert_hash(&mut self, hash: u64) {
        if hash == NULL_HASH {
            return;
        }
        let block = self.block_index(hash);
        let mask = Self::block_mask(hash as u32);
        let block = &mut self.blocks[block];
        for (word, bits) in block.iter_mut().zip(mask) {
            *word |= bits;
        }
        self.items += 1;
    }

    /// Build a filter over the fingerprints of every non-null value in the
    /// column.
    pub fn build_from_column(column: &ArrayRef, target_fpr: f64) -> Result<Self> {
        let hashes = create_row_hashes(std::slice::from_ref(column))?;
        let mut filter = Self::new(column.len() - column.null_count(), target_fpr);
        for hash in hashes {
            filter.insert_hash(hash);
        }
        Ok(filter)
    }

    /// Build a filter over precomputed row fingerprints.
    pub fn build_from_hashes(hashes: &[u64], target_fpr: f64) -> Self {
        let mut filter = Self::new(hashes.len(), target_fpr);
        for hash in hashes {
            filter.insert_hash(*hash);
        }
        filter
    }

    /// Probe a single fingerprint. Never a false negative.
    pub fn possibly_contains(&self, hash: u64) -> bool {
        if hash == NULL_HASH {
            return false;
        }
        let block = &self.blocks[self.block_index(hash)];
        let mask = Self::block_mask(hash as u32);
        block
            .iter()
            .zip(mask)
            .all(|(word, bits)| word & bits == bits)
    }

    /// Vectorized probe: one bit per input fingerprint. Null-sentinel rows
    /// probe false.
    pub fn possibly_contains_many(&self, hashes: &[u64]) -> BooleanArray {
        hashes
            .iter()
            .map(|hash| Some(self.possibly_contains(*hash)))
            .collect()
    }

    /// Number of fingerprints inserted.
    pub fn items(&self) -> usize {
        self.items
    }

    /// Bytes occupied by the bit blocks.
    pub fn size_in_bytes(&self) -> usize {
        self.blocks.len() * BITS_PER_BLOCK / 8
    }

    // upper half of the fingerprint selects the block without modulo bias
    #[inline]
    fn block_index(&self, hash: u64) -> usize {
        (((hash >> 32) * self.blocks.len() as u64) >> 32) as usize
    }

    // one bit in each word, derived from the lower half
    #[inline]
    fn block_mask(low: u32) -> [u32; WORDS_PER_BLOCK] {
        let mut mask = [0u32; WORDS_PER_BLOCK];
        for (i, salt) in SALT.iter().enumerate() {
            mask[i] = 1 << (low.wrapping_mul(*salt) >> 27);
        }
        mask
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use arrow::array::{Int64Array, StringArray};
    use rand::rngs::StdRng;
    use rand::{Rng, SeedableRng};
    use std::sync::Arc;

    #[test]
    fn no_false_negatives() {
        let column: ArrayRef = Arc::new(Int64Array::from_iter_values(0..10_000));
        let filter = BloomFilter::build_from_column(&column, 0.05).unwrap();
        let hashes = create_row_hashes(&[column]).unwrap();
        for hash in hashes {
            assert!(filter.possibly_contains(hash));
        }
    }

    #[test]
    fn chunk_layout_does_not_matter() {
        let column: ArrayRef = Arc::new(StringArray::from(vec![
            Some("Io"),
            Some("Europa"),
            None,
            Some("Ganymede"),
        ]));
        let filter = BloomFilter::build_from_column(&column, 0.05).unwrap();
        // probing a slice must see the same fingerprints
        let sliced = column.slice(1, 3);
        let hashes = create_row_hashes(&[sliced]).unwrap();
        let matches = filter.possibly_contains_many(&hashes);
        assert!(matches.value(0));
        assert!(!matches.value(1)); // null probes false
        assert!(matches.value(2));
    }

    #[test]
    fn null_keys_never_match() {
        let column: ArrayRef = Arc::new(Int64Array::from(vec![Some(1), None]));
        let filter = BloomFilter::build_from_column(&column, 0.05).unwrap();
        assert!(!filter.possibly_contains(NULL_HASH));
        assert_eq!(filter.items(), 1);
    }

    #[test]
    fn false_positive_rate_is_within_target() {
        const BUILD: usize = 100_000;
        const PROBES: usize = 1_000_000;
        let mut rng = StdRng::seed_from_u64(0x5eed);
        let members: Vec<u64> = (0..BUILD).map(|_| rng.gen::<u64>() | 1 << 63).collect();
        let filter = BloomFilter::build_from_hashes(&members, 0.05);

        // draws from a disjoint key space, so every hit is a false positive
        let mut false_positives = 0usize;
        for _ in 0..PROBES {
            let probe = rng.gen::<u64>() & !(1 << 63);
            if filter.possibly_contains(probe) {
                false_positives += 1;
            }
        }
        let rate = false_positives as f64 / PROBES as f64;
        assert!(rate <= 0.05, "observed false positive rate {rate}");
    }
}
