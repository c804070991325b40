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

//! Parquet decoding.
//!
//! Parquet gets the full decoder contract: a metadata-only read exposing
//! per-row-group per-column statistics, codecs, encodings and bloom filter
//! placement; a bloom probe against a candidate value; and projected data
//! decode. Relation statistics come from the file metadata, never from a
//! data scan.

use arrow::array::RecordBatchReader;
use arrow::datatypes::SchemaRef;
use bytes::Bytes;
use kestrel_common::error::{Error, Result};
use kestrel_common::stats::{self, RelationStatistics};
use kestrel_expr::value::Value;
use parquet::arrow::arrow_reader::ParquetRecordBatchReaderBuilder;
use parquet::arrow::ProjectionMask;
use parquet::basic::{Compression, Encoding};
use parquet::file::reader::{FileReader, SerializedFileReader};
use parquet::file::statistics::Statistics;

use super::{DecodedBlob, Decoder};

pub struct ParquetDecoder;

impl Decoder for ParquetDecoder {
    fn name(&self) -> &'static str {
        "parquet"
    }

    fn decode(&self, bytes: &Bytes, projection: Option<&[usize]>) -> Result<DecodedBlob> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())
            .map_err(|e| decode_error(e))?;
        let statistics = statistics_from_metadata(builder.metadata().as_ref());

        let builder = match projection {
            Some(indices) => {
                let mask = ProjectionMask::roots(
                    builder.parquet_schema(),
                    indices.iter().copied(),
                );
                builder.with_projection(mask)
            }
            None => builder,
        };
        let reader = builder.build().map_err(|e| decode_error(e))?;
        let schema = reader.schema();
        let mut batches = Vec::new();
        let mut num_rows = 0usize;
        for batch in reader {
            let batch = batch.map_err(|e| Error::Decode {
                blob: "<parquet>".to_string(),
                message: e.to_string(),
            })?;
            num_rows += batch.num_rows();
            batches.push(batch);
        }
        Ok(DecodedBlob {
            num_rows,
            num_columns: schema.fields().len(),
            schema,
            batches,
            statistics,
        })
    }

    fn metadata(&self, bytes: &Bytes) -> Result<(SchemaRef, RelationStatistics)> {
        let builder = ParquetRecordBatchReaderBuilder::try_new(bytes.clone())
            .map_err(|e| decode_error(e))?;
        let statistics = statistics_from_metadata(builder.metadata().as_ref());
        Ok((builder.schema().clone(), statistics))
    }
}

fn decode_error(e: parquet::errors::ParquetError) -> Error {
    Error::Decode {
        blob: "<parquet>".to_string(),
        message: e.to_string(),
    }
}

/// Per-row-group per-column facts from the footer, for tooling and
/// row-group pruning.
#[derive(Debug, Clone)]
pub struct ColumnChunkFacts {
    pub column: String,
    pub null_count: Option<u64>,
    pub lower_bound: Option<i64>,
    pub upper_bound: Option<i64>,
    pub codec: Compression,
    pub encodings: Vec<Encoding>,
    pub bloom_filter_offset: Option<i64>,
    pub bloom_filter_length: Option<i32>,
}

/// Metadata-only read: row count plus one [`ColumnChunkFacts`] per column
/// per row group.
pub fn read_metadata(bytes: &Bytes) -> Result<(u64, Vec<Vec<ColumnChunkFacts>>)> {
    let reader = SerializedFileReader::new(bytes.clone()).map_err(decode_error)?;
    let metadata = reader.metadata();
    let mut row_groups = Vec::with_capacity(metadata.num_row_groups());
    for group in metadata.row_groups() {
        let mut columns = Vec::with_capacity(group.num_columns());
        for column in group.columns() {
            let (lower, upper, nulls) = column
                .statistics()
                .map(bounds_of)
                .unwrap_or((None, None, None));
            columns.push(ColumnChunkFacts {
                column: column.column_path().string(),
                null_count: nulls,
                lower_bound: lower,
                upper_bound: upper,
                codec: column.compression(),
                encodings: column.encodings().to_vec(),
                bloom_filter_offset: column.bloom_filter_offset(),
                bloom_filter_length: column.bloom_filter_length(),
            });
        }
        row_groups.push(columns);
    }
    Ok((metadata.file_metadata().num_rows() as u64, row_groups))
}

/// Probe a column chunk's bloom filter for a candidate value. `None` when
/// the chunk carries no filter (the candidate may or may not be present).
pub fn bloom_probe(
    bytes: &Bytes,
    row_group: usize,
    column: usize,
    candidate: &Value,
) -> Result<Option<bool>> {
    let reader = SerializedFileReader::new(bytes.clone()).map_err(decode_error)?;
    let group = reader.get_row_group(row_group).map_err(decode_error)?;
    let Some(filter) = group.get_column_bloom_filter(column) else {
        return Ok(None);
    };
    let hit = match candidate {
        Value::Int64(v) => filter.check(v),
        Value::Utf8(v) => filter.check(&v.as_str()),
        Value::Binary(v) => filter.check(v),
        _ => return Ok(None),
    };
    Ok(Some(hit))
}

/// Fold footer statistics into relation statistics keyed by column
/// ordinal.
fn statistics_from_metadata(metadata: &parquet::file::metadata::ParquetMetaData) -> RelationStatistics {
    let mut relation = RelationStatistics::new();
    relation.record_count = metadata.file_metadata().num_rows() as u64;
    for group in metadata.row_groups() {
        for (ordinal, column) in group.columns().iter().enumerate() {
            let Some(column_stats) = column.statistics() else {
                continue;
            };
            let (lower, upper, nulls) = bounds_of(column_stats);
            if let Some(lower) = lower {
                relation.update_lower(ordinal as u64, lower);
            }
            if let Some(upper) = upper {
                relation.update_upper(ordinal as u64, upper);
            }
            if let Some(nulls) = nulls {
                relation.add_null(ordinal as u64, nulls);
            }
        }
    }
    relation
}

/// Normalize one chunk's min/max/null-count into bound space.
fn bounds_of(column_stats: &Statistics) -> (Option<i64>, Option<i64>, Option<u64>) {
    let nulls = Some(column_stats.null_count());
    if !column_stats.has_min_max_set() {
        return (None, None, nulls);
    }
    let (lower, upper) = match column_stats {
        Statistics::Int32(s) => (
            Some(stats::to_int_i64(*s.min() as i64)),
            Some(stats::to_int_i64(*s.max() as i64)),
        ),
        Statistics::Int64(s) => (
            Some(stats::to_int_i64(*s.min())),
            Some(stats::to_int_i64(*s.max())),
        ),
        Statistics::Float(s) => (
            Some(stats::to_int_f64(*s.min() as f64)),
            Some(stats::to_int_f64(*s.max() as f64)),
        ),
        Statistics::Double(s) => (
            Some(stats::to_int_f64(*s.min())),
            Some(stats::to_int_f64(*s.max())),
        ),
        Statistics::ByteArray(s) => (
            Some(stats::to_int_bytes(s.min().data())),
            Some(stats::to_int_bytes(s.max().data())),
        ),
        Statistics::FixedLenByteArray(s) => (
            Some(stats::to_int_bytes(s.min().data())),
            Some(stats::to_int_bytes(s.max().data())),
        ),
        Statistics::Boolean(s) => (Some(*s.min() as i64), Some(*s.max() as i64)),
        Statistics::Int96(_) => (None, None),
    };
    (lower, upper, nulls)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::record_batch::RecordBatch;
    use parquet::arrow::ArrowWriter;
    use parquet::file::properties::WriterProperties;

    use super::*;

    fn sample_parquet() -> Bytes {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 3, 4])),
                Arc::new(StringArray::from(vec![
                    Some("Mercury"),
                    Some("Venus"),
                    None,
                    Some("Mars"),
                ])),
            ],
        )
        .unwrap();
        let mut out = Vec::new();
        let properties = WriterProperties::builder()
            .set_bloom_filter_enabled(true)
            .build();
        let mut writer = ArrowWriter::try_new(&mut out, schema, Some(properties)).unwrap();
        writer.write(&batch).unwrap();
        writer.close().unwrap();
        Bytes::from(out)
    }

    #[test]
    fn decode_round_trips_with_projection() {
        let bytes = sample_parquet();
        let decoded = ParquetDecoder.decode(&bytes, Some(&[1])).unwrap();
        assert_eq!(decoded.num_rows, 4);
        assert_eq!(decoded.num_columns, 1);
        assert_eq!(decoded.schema.field(0).name(), "name");
    }

    #[test]
    fn metadata_exposes_bounds_and_nulls() {
        let bytes = sample_parquet();
        let (_, statistics) = ParquetDecoder.metadata(&bytes).unwrap();
        assert_eq!(statistics.record_count, 4);
        assert_eq!(statistics.lower_bound(0), Some(1));
        assert_eq!(statistics.upper_bound(0), Some(4));
        assert_eq!(statistics.null_count(1), Some(1));
    }

    #[test]
    fn metadata_only_read_lists_chunk_facts() {
        let bytes = sample_parquet();
        let (rows, groups) = read_metadata(&bytes).unwrap();
        assert_eq!(rows, 4);
        assert_eq!(groups.len(), 1);
        assert_eq!(groups[0].len(), 2);
        assert!(groups[0][0].bloom_filter_offset.is_some());
        assert_eq!(groups[0][1].null_count, Some(1));
    }

    #[test]
    fn bloom_probe_finds_present_values() {
        let bytes = sample_parquet();
        assert_eq!(
            bloom_probe(&bytes, 0, 0, &Value::Int64(3)).unwrap(),
            Some(true)
        );
        assert_eq!(
            bloom_probe(&bytes, 0, 1, &Value::Utf8("Venus".into())).unwrap(),
            Some(true)
        );
    }
}
