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

//! Columnar statistics carried alongside relations.
//!
//! Bounds for every physical type are normalized into signed 64-bit space by
//! a total function, so the optimizer can compare a predicate literal against
//! a column range without caring what the column's type is. The special
//! sentinel [`NULL_SENTINEL`] encodes "no value"; everything else saturates
//! into `[MIN_BOUND, MAX_BOUND]`.

use indexmap::IndexMap;

use crate::error::{Error, Result};

/// Encodes NULL (and NaN) in bound space. Reserved: no real value maps here.
pub const NULL_SENTINEL: i64 = i64::MIN;
/// Smallest encodable bound.
pub const MIN_BOUND: i64 = i64::MIN + 1;
/// Largest encodable bound.
pub const MAX_BOUND: i64 = i64::MAX;

/// Clamp an integer into encodable bound space.
pub fn to_int_i64(value: i64) -> i64 {
    value.max(MIN_BOUND)
}

/// Clamp an unsigned integer into encodable bound space.
pub fn to_int_u64(value: u64) -> i64 {
    i64::try_from(value).unwrap_or(MAX_BOUND)
}

/// Normalize a float: finite values truncate to their integer part,
/// infinities saturate, NaN becomes the null sentinel.
pub fn to_int_f64(value: f64) -> i64 {
    if value.is_nan() {
        NULL_SENTINEL
    } else if value == f64::INFINITY {
        MAX_BOUND
    } else if value == f64::NEG_INFINITY {
        MIN_BOUND
    } else if value >= MAX_BOUND as f64 {
        MAX_BOUND
    } else if value <= MIN_BOUND as f64 {
        MIN_BOUND
    } else {
        value.trunc() as i64
    }
}

/// Days since the epoch pass through unchanged.
pub fn to_int_date(days_since_epoch: i32) -> i64 {
    days_since_epoch as i64
}

/// Microseconds since the epoch (UTC) pass through, clamped.
pub fn to_int_timestamp_micros(micros: i64) -> i64 {
    to_int_i64(micros)
}

/// Time of day folds to seconds since midnight.
pub fn to_int_time_seconds(seconds_of_day: u32) -> i64 {
    seconds_of_day as i64
}

/// Decimals round to the nearest integer, then clamp.
pub fn to_int_decimal(unscaled: i128, scale: i8) -> i64 {
    if scale <= 0 {
        let shifted = unscaled.saturating_mul(10i128.saturating_pow((-scale) as u32));
        return shifted.clamp(MIN_BOUND as i128, MAX_BOUND as i128) as i64;
    }
    let divisor = 10i128.saturating_pow(scale as u32);
    let quotient = unscaled / divisor;
    let remainder = unscaled % divisor;
    // round half away from zero
    let rounded = if remainder.abs() * 2 >= divisor {
        quotient + unscaled.signum()
    } else {
        quotient
    };
    rounded.clamp(MIN_BOUND as i128, MAX_BOUND as i128) as i64
}

/// Strings and binary fold to their first eight bytes, big-endian packed,
/// which preserves prefix order. Lossy for ordering beyond eight bytes.
pub fn to_int_bytes(value: &[u8]) -> i64 {
    let mut packed = [0u8; 8];
    let take = value.len().min(8);
    packed[..take].copy_from_slice(&value[..take]);
    let wide = u64::from_be_bytes(packed);
    i64::try_from(wide).unwrap_or(MAX_BOUND)
}

/// Per-column statistics aggregated for a whole relation.
///
/// Columns are keyed by their stable 64-bit identity, not by name, so
/// statistics survive renames. The struct is cheap to clone and merges
/// conservatively: bounds widen, null counts add.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationStatistics {
    /// Exact row count when known.
    pub record_count: u64,
    /// Estimated row count when the exact count has not been observed.
    pub record_count_estimate: u64,
    /// Lowest normalized value seen per column.
    pub lower_bounds: IndexMap<u64, i64>,
    /// Highest normalized value seen per column.
    pub upper_bounds: IndexMap<u64, i64>,
    /// Nulls seen per column.
    pub null_counts: IndexMap<u64, u64>,
    /// Estimated distinct values per column.
    pub cardinality_estimates: IndexMap<u64, u64>,
}

impl RelationStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Lower the recorded lower bound for `column` if `value` is beneath it.
    /// The null sentinel never becomes a bound.
    pub fn update_lower(&mut self, column: u64, value: i64) {
        if value == NULL_SENTINEL {
            return;
        }
        let entry = self.lower_bounds.entry(column).or_insert(value);
        if value < *entry {
            *entry = value;
        }
    }

    /// Raise the recorded upper bound for `column` if `value` is above it.
    pub fn update_upper(&mut self, column: u64, value: i64) {
        if value == NULL_SENTINEL {
            return;
        }
        let entry = self.upper_bounds.entry(column).or_insert(value);
        if value > *entry {
            *entry = value;
        }
    }

    /// Accumulate nulls observed in `column`.
    pub fn add_null(&mut self, column: u64, count: u64) {
        *self.null_counts.entry(column).or_insert(0) += count;
    }

    /// Record a distinct-cardinality estimate for `column`, keeping the
    /// larger of the recorded and offered estimates.
    pub fn set_cardinality(&mut self, column: u64, estimate: u64) {
        let entry = self.cardinality_estimates.entry(column).or_insert(estimate);
        if estimate > *entry {
            *entry = estimate;
        }
    }

    pub fn lower_bound(&self, column: u64) -> Option<i64> {
        self.lower_bounds.get(&column).copied()
    }

    pub fn upper_bound(&self, column: u64) -> Option<i64> {
        self.upper_bounds.get(&column).copied()
    }

    pub fn null_count(&self, column: u64) -> Option<u64> {
        self.null_counts.get(&column).copied()
    }

    /// Merge another relation's statistics into this one: bounds widen,
    /// counts add (saturating), cardinalities add as an upper bound.
    pub fn merge(&mut self, other: &RelationStatistics) {
        self.record_count = self.record_count.saturating_add(other.record_count);
        self.record_count_estimate = self
            .record_count_estimate
            .saturating_add(other.record_count_estimate);
        for (column, value) in &other.lower_bounds {
            self.update_lower(*column, *value);
        }
        for (column, value) in &other.upper_bounds {
            self.update_upper(*column, *value);
        }
        for (column, count) in &other.null_counts {
            self.add_null(*column, *count);
        }
        for (column, estimate) in &other.cardinality_estimates {
            let entry = self.cardinality_estimates.entry(*column).or_insert(0);
            *entry = entry.saturating_add(*estimate);
        }
    }

    /// Serialize to a compact byte string: a fixed header followed by the
    /// four maps, each entry a length-prefixed key and a fixed-width value.
    /// Round-trips losslessly through [`RelationStatistics::from_bytes`].
    pub fn to_bytes(&self) -> Vec<u8> {
        let mut out = Vec::with_capacity(64);
        out.extend_from_slice(&self.record_count.to_le_bytes());
        out.extend_from_slice(&self.record_count_estimate.to_le_bytes());
        write_i64_map(&mut out, &self.lower_bounds);
        write_i64_map(&mut out, &self.upper_bounds);
        write_u64_map(&mut out, &self.null_counts);
        write_u64_map(&mut out, &self.cardinality_estimates);
        out
    }

    /// Deserialize statistics previously produced by
    /// [`RelationStatistics::to_bytes`].
    pub fn from_bytes(bytes: &[u8]) -> Result<Self> {
        let mut reader = ByteReader::new(bytes);
        let record_count = reader.read_u64()?;
        let record_count_estimate = reader.read_u64()?;
        let lower_bounds = read_i64_map(&mut reader)?;
        let upper_bounds = read_i64_map(&mut reader)?;
        let null_counts = read_u64_map(&mut reader)?;
        let cardinality_estimates = read_u64_map(&mut reader)?;
        Ok(Self {
            record_count,
            record_count_estimate,
            lower_bounds,
            upper_bounds,
            null_counts,
            cardinality_estimates,
        })
    }
}

fn write_key(out: &mut Vec<u8>, key: u64) {
    let key = key.to_be_bytes();
    out.extend_from_slice(&(key.len() as u32).to_le_bytes());
    out.extend_from_slice(&key);
}

fn write_i64_map(out: &mut Vec<u8>, map: &IndexMap<u64, i64>) {
    out.extend_from_slice(&(map.len() as u32).to_le_bytes());
    for (key, value) in map {
        write_key(out, *key);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

fn write_u64_map(out: &mut Vec<u8>, map: &IndexMap<u64, u64>) {
    out.extend_from_slice(&(map.len() as u32).to_le_bytes());
    for (key, value) in map {
        write_key(out, *key);
        out.extend_from_slice(&value.to_le_bytes());
    }
}

struct ByteReader<'a> {
    bytes: &'a [u8],
    offset: usize,
}

impl<'a> ByteReader<'a> {
    fn new(bytes: &'a [u8]) -> Self {
        Self { bytes, offset: 0 }
    }

    fn take(&mut self, len: usize) -> Result<&'a [u8]> {
        let end = self.offset + len;
        if end > self.bytes.len() {
            return Err(Error::Internal(
                "truncated statistics byte string".to_string(),
            ));
        }
        let slice = &self.bytes[self.offset..end];
        self.offset = end;
        Ok(slice)
    }

    fn read_u32(&mut self) -> Result<u32> {
        let raw: [u8; 4] = self.take(4)?.try_into().unwrap();
        Ok(u32::from_le_bytes(raw))
    }

    fn read_u64(&mut self) -> Result<u64> {
        let raw: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(u64::from_le_bytes(raw))
    }

    fn read_i64(&mut self) -> Result<i64> {
        let raw: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(i64::from_le_bytes(raw))
    }

    fn read_key(&mut self) -> Result<u64> {
        let len = self.read_u32()? as usize;
        if len != 8 {
            return Err(Error::Internal(format!(
                "statistics key has unexpected width {len}"
            )));
        }
        let raw: [u8; 8] = self.take(8)?.try_into().unwrap();
        Ok(u64::from_be_bytes(raw))
    }
}

fn read_i64_map(reader: &mut ByteReader<'_>) -> Result<IndexMap<u64, i64>> {
    let entries = reader.read_u32()? as usize;
    let mut map = IndexMap::with_capacity(entries);
    for _ in 0..entries {
        let key = reader.read_key()?;
        map.insert(key, reader.read_i64()?);
    }
    Ok(map)
}

fn read_u64_map(reader: &mut ByteReader<'_>) -> Result<IndexMap<u64, u64>> {
    let entries = reader.read_u32()? as usize;
    let mut map = IndexMap::with_capacity(entries);
    for _ in 0..entries {
        let key = reader.read_key()?;
        map.insert(key, reader.read_u64()?);
    }
    Ok(map)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn float_normalization_is_total() {
        assert_eq!(to_int_f64(3.9), 3);
        assert_eq!(to_int_f64(-3.9), -3);
        assert_eq!(to_int_f64(f64::INFINITY), MAX_BOUND);
        assert_eq!(to_int_f64(f64::NEG_INFINITY), MIN_BOUND);
        assert_eq!(to_int_f64(f64::NAN), NULL_SENTINEL);
        assert_eq!(to_int_f64(1e300), MAX_BOUND);
        assert_eq!(to_int_f64(-1e300), MIN_BOUND);
    }

    #[test]
    fn integer_clamp_reserves_the_sentinel() {
        assert_eq!(to_int_i64(i64::MIN), MIN_BOUND);
        assert_eq!(to_int_i64(0), 0);
        assert_eq!(to_int_u64(u64::MAX), MAX_BOUND);
    }

    #[test]
    fn byte_prefix_preserves_order() {
        let values: Vec<&[u8]> = vec![b"", b"a", b"apple", b"apples", b"banana", b"zz"];
        let encoded: Vec<i64> = values.iter().map(|v| to_int_bytes(v)).collect();
        let mut sorted = encoded.clone();
        sorted.sort_unstable();
        assert_eq!(encoded, sorted);
    }

    #[test]
    fn decimal_rounds_half_away_from_zero() {
        assert_eq!(to_int_decimal(12345, 2), 123); // 123.45
        assert_eq!(to_int_decimal(12350, 2), 124); // 123.50
        assert_eq!(to_int_decimal(-12350, 2), -124);
        assert_eq!(to_int_decimal(7, 0), 7);
        assert_eq!(to_int_decimal(7, -2), 700);
    }

    #[test]
    fn bounds_are_monotone() {
        let mut stats = RelationStatistics::new();
        stats.update_lower(1, 10);
        stats.update_lower(1, 5);
        stats.update_lower(1, 7);
        stats.update_upper(1, 10);
        stats.update_upper(1, 20);
        stats.update_upper(1, 15);
        assert_eq!(stats.lower_bound(1), Some(5));
        assert_eq!(stats.upper_bound(1), Some(20));

        // the sentinel never becomes a bound
        stats.update_lower(1, NULL_SENTINEL);
        assert_eq!(stats.lower_bound(1), Some(5));
    }

    #[test]
    fn merge_widens_and_accumulates() {
        let mut left = RelationStatistics::new();
        left.record_count = 9;
        left.update_lower(1, 1);
        left.update_upper(1, 9);
        left.add_null(2, 3);

        let mut right = RelationStatistics::new();
        right.record_count = 4;
        right.update_lower(1, -2);
        right.update_upper(1, 4);
        right.add_null(2, 1);

        left.merge(&right);
        assert_eq!(left.record_count, 13);
        assert_eq!(left.lower_bound(1), Some(-2));
        assert_eq!(left.upper_bound(1), Some(9));
        assert_eq!(left.null_count(2), Some(4));
    }

    #[test]
    fn serialization_round_trips() {
        let mut stats = RelationStatistics::new();
        stats.record_count = 177;
        stats.record_count_estimate = 180;
        stats.update_lower(3, -40);
        stats.update_upper(3, 900);
        stats.update_lower(9, to_int_bytes(b"Mercury"));
        stats.add_null(3, 12);
        stats.set_cardinality(3, 9);

        let bytes = stats.to_bytes();
        let restored = RelationStatistics::from_bytes(&bytes).unwrap();
        assert_eq!(stats, restored);
    }

    #[test]
    fn truncated_bytes_are_rejected() {
        let stats = RelationStatistics::new();
        let bytes = stats.to_bytes();
        assert!(RelationStatistics::from_bytes(&bytes[..bytes.len() - 1]).is_err());
    }
}
