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

//! Deterministic u64 row fingerprints over Arrow arrays.
//!
//! The same fingerprints feed hash joins, DISTINCT, GROUP BY and the bloom
//! prefilters, so the contract is strict: per-cell hashes are fixed per
//! physical type, a row with any null in the key set collapses to
//! [`NULL_HASH`], and sliced or re-chunked arrays hash identically to their
//! flat equivalents. All access goes through the typed accessors, which
//! resolve array offsets.

use arrow::array::*;
use arrow::datatypes::*;
use arrow_array::ArrowPrimitiveType;

use crate::error::{Error, Result};

/// Fingerprint of any row with a null in its key set. Such rows never match
/// in joins.
pub const NULL_HASH: u64 = 0x7fb5_d329_728e_a185;

/// Fingerprint of an empty list cell.
pub const EMPTY_LIST_HASH: u64 = 0x9fb2_1c65_1e98_df25;

/// Canonical NaN bit pattern, so NaN == NaN for fingerprint purposes.
const CANONICAL_NAN: u64 = 0x7ff8_0000_0000_0000;

const SEED: u64 = 0x243f_6a88_85a3_08d3;
const MIX_C1: u64 = 0xbf58_476d_1ce4_e5b9;
const MIX_C2: u64 = 0x94d0_49bb_1331_11eb;

/// Fold a cell hash into an accumulator with an avalanche step, so column
/// order matters and nearby values diverge.
#[inline]
pub fn avalanche_fold(state: u64, cell: u64) -> u64 {
    let mut h = (state ^ cell).wrapping_mul(MIX_C1);
    h ^= h >> 30;
    h = h.wrapping_mul(MIX_C2);
    h ^= h >> 31;
    h
}

/// 64-bit city-style mix over a byte string (MurmurHash64A, fixed seed).
pub fn hash_bytes(bytes: &[u8]) -> u64 {
    const M: u64 = 0xc6a4_a793_5bd1_e995;
    const R: u32 = 47;
    const HASH_SEED: u64 = 0x8445_d61a_4e77_4912;

    let len = bytes.len();
    let mut h = HASH_SEED ^ (len as u64).wrapping_mul(M);

    let mut chunks = bytes.chunks_exact(8);
    for chunk in &mut chunks {
        let mut k = u64::from_le_bytes(chunk.try_into().unwrap());
        k = k.wrapping_mul(M);
        k ^= k >> R;
        k = k.wrapping_mul(M);
        h ^= k;
        h = h.wrapping_mul(M);
    }

    let tail = chunks.remainder();
    if !tail.is_empty() {
        let mut k = 0u64;
        for (i, byte) in tail.iter().enumerate() {
            k |= (*byte as u64) << (8 * i);
        }
        h ^= k;
        h = h.wrapping_mul(M);
    }

    h ^= h >> R;
    h = h.wrapping_mul(M);
    h ^= h >> R;
    h
}

/// Compute one fingerprint per row over the given key columns.
///
/// All columns must have the same length. A row with a null in any column
/// gets [`NULL_HASH`].
pub fn create_row_hashes(columns: &[ArrayRef]) -> Result<Vec<u64>> {
    let Some(first) = columns.first() else {
        return Ok(Vec::new());
    };
    let num_rows = first.len();
    let mut rows = vec![SEED; num_rows];
    let mut any_null = vec![false; num_rows];

    for column in columns {
        if column.len() != num_rows {
            return Err(Error::Internal(
                "row hash over columns of unequal length".to_string(),
            ));
        }
        let cells = cell_hashes(column.as_ref())?;
        for (row, cell) in cells.into_iter().enumerate() {
            if cell == NULL_HASH {
                any_null[row] = true;
            } else {
                rows[row] = avalanche_fold(rows[row], cell);
            }
        }
    }

    for (row, null) in any_null.into_iter().enumerate() {
        if null {
            rows[row] = NULL_HASH;
        } else if rows[row] == NULL_HASH {
            // a real row must never alias the null sentinel
            rows[row] = NULL_HASH ^ 1;
        }
    }
    Ok(rows)
}

/// Per-cell hash for a single column; nulls hash to [`NULL_HASH`].
pub fn cell_hashes(array: &dyn Array) -> Result<Vec<u64>> {
    match array.data_type() {
        DataType::Null => Ok(vec![NULL_HASH; array.len()]),
        DataType::Boolean => {
            let array = array.as_boolean();
            Ok(each_cell(array.len(), array.nulls(), |i| {
                array.value(i) as u64
            }))
        }
        DataType::Int8 => hash_primitive::<Int8Type>(array, |v| v as i64 as u64),
        DataType::Int16 => hash_primitive::<Int16Type>(array, |v| v as i64 as u64),
        DataType::Int32 => hash_primitive::<Int32Type>(array, |v| v as i64 as u64),
        DataType::Int64 => hash_primitive::<Int64Type>(array, |v| v as u64),
        DataType::UInt8 => hash_primitive::<UInt8Type>(array, |v| v as u64),
        DataType::UInt16 => hash_primitive::<UInt16Type>(array, |v| v as u64),
        DataType::UInt32 => hash_primitive::<UInt32Type>(array, |v| v as u64),
        DataType::UInt64 => hash_primitive::<UInt64Type>(array, |v| v),
        DataType::Float32 => hash_primitive::<Float32Type>(array, |v| float_bits(v as f64)),
        DataType::Float64 => hash_primitive::<Float64Type>(array, |v| float_bits(v)),
        DataType::Date32 => hash_primitive::<Date32Type>(array, |v| v as i64 as u64),
        DataType::Date64 => hash_primitive::<Date64Type>(array, |v| v as u64),
        DataType::Time32(TimeUnit::Second) => {
            hash_primitive::<Time32SecondType>(array, |v| v as i64 as u64)
        }
        DataType::Time64(TimeUnit::Microsecond) => {
            hash_primitive::<Time64MicrosecondType>(array, |v| v as u64)
        }
        DataType::Timestamp(TimeUnit::Microsecond, _) => {
            hash_primitive::<TimestampMicrosecondType>(array, |v| v as u64)
        }
        DataType::Timestamp(TimeUnit::Nanosecond, _) => {
            hash_primitive::<TimestampNanosecondType>(array, |v| v as u64)
        }
        DataType::Timestamp(TimeUnit::Millisecond, _) => {
            hash_primitive::<TimestampMillisecondType>(array, |v| v as u64)
        }
        DataType::Timestamp(TimeUnit::Second, _) => {
            hash_primitive::<TimestampSecondType>(array, |v| v as u64)
        }
        DataType::Decimal128(_, _) => hash_primitive::<Decimal128Type>(array, wide_bits),
        DataType::Interval(IntervalUnit::MonthDayNano) => {
            let array = array
                .as_any()
                .downcast_ref::<IntervalMonthDayNanoArray>()
                .ok_or_else(|| Error::Internal("interval downcast failed".to_string()))?;
            Ok(each_cell(array.len(), array.nulls(), |i| {
                let v = array.value(i);
                let packed = ((v.months as u64) << 32) | (v.days as u32 as u64);
                avalanche_fold(packed, v.nanoseconds as u64)
            }))
        }
        DataType::Utf8 => {
            let array = array.as_string::<i32>();
            Ok(each_cell(array.len(), array.nulls(), |i| {
                hash_bytes(array.value(i).as_bytes())
            }))
        }
        DataType::LargeUtf8 => {
            let array = array.as_string::<i64>();
            Ok(each_cell(array.len(), array.nulls(), |i| {
                hash_bytes(array.value(i).as_bytes())
            }))
        }
        DataType::Binary => {
            let array = array.as_binary::<i32>();
            Ok(each_cell(array.len(), array.nulls(), |i| {
                hash_bytes(array.value(i))
            }))
        }
        DataType::LargeBinary => {
            let array = array.as_binary::<i64>();
            Ok(each_cell(array.len(), array.nulls(), |i| {
                hash_bytes(array.value(i))
            }))
        }
        DataType::FixedSizeBinary(_) => {
            let array = array
                .as_any()
                .downcast_ref::<FixedSizeBinaryArray>()
                .ok_or_else(|| Error::Internal("fixed size binary downcast failed".to_string()))?;
            Ok(each_cell(array.len(), array.nulls(), |i| {
                hash_bytes(array.value(i))
            }))
        }
        DataType::List(_) => hash_list(array.as_list::<i32>()),
        DataType::LargeList(_) => hash_list(array.as_list::<i64>()),
        DataType::Struct(_) => {
            let array = array.as_struct();
            let mut field_cells = Vec::with_capacity(array.num_columns());
            for column in array.columns() {
                field_cells.push(cell_hashes(column.as_ref())?);
            }
            Ok(each_cell(array.len(), array.nulls(), |i| {
                let mut h = SEED;
                for cells in &field_cells {
                    h = avalanche_fold(h, cells[i]);
                }
                h
            }))
        }
        other => Err(Error::UnsupportedSyntax(format!(
            "no fingerprint defined for column type {other}"
        ))),
    }
}

fn each_cell(
    len: usize,
    nulls: Option<&arrow_buffer::NullBuffer>,
    value: impl Fn(usize) -> u64,
) -> Vec<u64> {
    match nulls {
        None => (0..len).map(value).collect(),
        Some(nulls) => (0..len)
            .map(|i| if nulls.is_null(i) { NULL_HASH } else { value(i) })
            .collect(),
    }
}

fn hash_primitive<T: ArrowPrimitiveType>(
    array: &dyn Array,
    bits: impl Fn(T::Native) -> u64,
) -> Result<Vec<u64>> {
    let array = array
        .as_any()
        .downcast_ref::<PrimitiveArray<T>>()
        .ok_or_else(|| Error::Internal("primitive downcast failed".to_string()))?;
    Ok(each_cell(array.len(), array.nulls(), |i| {
        bits(array.value(i))
    }))
}

/// Canonicalize -0.0 to +0.0 and NaN to a fixed pattern before bit-casting.
#[inline]
fn float_bits(value: f64) -> u64 {
    if value.is_nan() {
        CANONICAL_NAN
    } else if value == 0.0 {
        0
    } else {
        value.to_bits()
    }
}

#[inline]
fn wide_bits(value: i128) -> u64 {
    let low = value as u64;
    let high = (value >> 64) as u64;
    avalanche_fold(high, low)
}

fn hash_list<O: OffsetSizeTrait>(array: &GenericListArray<O>) -> Result<Vec<u64>> {
    let element_cells = cell_hashes(array.values().as_ref())?;
    let offsets = array.value_offsets();
    // the child values buffer is shared across slices; offsets are absolute
    Ok((0..array.len())
        .map(|i| {
            if array.is_null(i) {
                return NULL_HASH;
            }
            let start = offsets[i].as_usize();
            let end = offsets[i + 1].as_usize();
            if start == end {
                return EMPTY_LIST_HASH;
            }
            let mut h = SEED;
            for cell in &element_cells[start..end] {
                h = avalanche_fold(h, *cell);
            }
            h
        })
        .collect())
}
