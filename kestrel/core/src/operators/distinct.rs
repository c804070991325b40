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

//! DISTINCT: the group-by structure without aggregates. One representative
//! row per group, in first-seen order; NULLs group together.

use arrow::array::ArrayRef;
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use kestrel_common::error::{Error, Result};
use kestrel_common::hash::row::create_row_hashes;
use kestrel_common::hash::FlatHashMap;
use kestrel_expr::schema::RelationSchema;

use crate::execution::morsel::{Morsel, Payload};
use crate::execution::stats::QueryStatistics;
use crate::operators::{rows_equal, take_rows, Leg, PhysicalOperator};

pub struct DistinctOperator {
    schema: RelationSchema,
    buffer: Vec<RecordBatch>,
    buffered_bytes: usize,
    memory_limit: usize,
    morsel_size: usize,
    statistics: QueryStatistics,
}

impl DistinctOperator {
    pub fn new(schema: RelationSchema, memory_limit: usize, morsel_size: usize) -> Self {
        Self {
            schema,
            buffer: Vec::new(),
            buffered_bytes: 0,
            memory_limit,
            morsel_size: morsel_size.max(1),
            statistics: QueryStatistics::new(),
        }
    }

    fn flush(&mut self) -> Result<Vec<Payload>> {
        if self.buffer.is_empty() {
            return Ok(vec![Payload::Eos]);
        }
        let combined = concat_batches(&self.schema.to_physical_schema(), &self.buffer)?;
        self.buffer.clear();

        let columns: Vec<ArrayRef> = combined.columns().to_vec();
        let hashes = create_row_hashes(&columns)?;

        let mut representatives: Vec<i64> = Vec::new();
        let mut buckets = FlatHashMap::with_capacity(combined.num_rows());
        for (row, hash) in hashes.iter().enumerate() {
            let mut seen = false;
            if let Some(candidates) = buckets.get(*hash) {
                for candidate in candidates {
                    let representative = representatives[*candidate as usize] as usize;
                    if rows_equal(&columns, representative, &columns, row, true)? {
                        seen = true;
                        break;
                    }
                }
            }
            if !seen {
                let ordinal = representatives.len() as i64;
                representatives.push(row as i64);
                buckets.insert(*hash, ordinal);
            }
        }
        self.statistics
            .add("rows_out", representatives.len() as u64);

        let deduplicated = take_rows(&combined, &representatives)?;
        let mut out = Vec::new();
        let mut offset = 0;
        while offset < deduplicated.num_rows() {
            let length = self.morsel_size.min(deduplicated.num_rows() - offset);
            out.push(Payload::Morsel(Morsel::new(
                self.schema.clone(),
                deduplicated.slice(offset, length),
            )?));
            offset += length;
        }
        out.push(Payload::Eos);
        Ok(out)
    }
}

impl PhysicalOperator for DistinctOperator {
    fn name(&self) -> &'static str {
        "DISTINCT"
    }

    fn schema(&self) -> &RelationSchema {
        &self.schema
    }

    fn step(&mut self, payload: Payload, _leg: Leg) -> Result<Vec<Payload>> {
        match payload {
            Payload::Morsel(morsel) => {
                self.buffered_bytes += morsel.size_bytes();
                if self.buffered_bytes > self.memory_limit {
                    self.buffer.clear();
                    return Err(Error::ResourcesExhausted(format!(
                        "distinct buffer exceeded {} bytes",
                        self.memory_limit
                    )));
                }
                self.statistics.add("rows_in", morsel.num_rows() as u64);
                self.buffer.push(morsel.into_batch());
                Ok(vec![])
            }
            Payload::Eos => self.flush(),
        }
    }

    fn statistics(&self) -> QueryStatistics {
        self.statistics.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::Int64Array;
    use arrow::datatypes::DataType;
    use kestrel_expr::schema::ColumnDef;

    use super::*;

    fn schema() -> RelationSchema {
        RelationSchema::new(vec![ColumnDef::new(1, "planetId", DataType::Int64)])
    }

    fn morsel(values: Vec<Option<i64>>) -> Payload {
        let batch = RecordBatch::try_new(
            schema().to_physical_schema(),
            vec![Arc::new(Int64Array::from(values))],
        )
        .unwrap();
        Payload::Morsel(Morsel::new(schema(), batch).unwrap())
    }

    #[test]
    fn duplicates_collapse_keeping_first_seen_order() {
        let mut distinct = DistinctOperator::new(schema(), 1 << 30, 100);
        distinct
            .step(morsel(vec![Some(4), Some(3), Some(4)]), Leg::Only)
            .unwrap();
        distinct
            .step(morsel(vec![Some(3), Some(5), None, None]), Leg::Only)
            .unwrap();
        let out = distinct.step(Payload::Eos, Leg::Only).unwrap();
        let Payload::Morsel(out) = &out[0] else {
            panic!("expected a morsel")
        };
        let values: Vec<Option<i64>> = out
            .batch()
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap()
            .iter()
            .collect();
        // NULLs group together, one representative survives
        assert_eq!(values, vec![Some(4), Some(3), Some(5), None]);
    }

    #[test]
    fn empty_input_is_just_eos() {
        let mut distinct = DistinctOperator::new(schema(), 1 << 30, 100);
        let out = distinct.step(Payload::Eos, Leg::Only).unwrap();
        assert_eq!(out.len(), 1);
        assert!(matches!(out[0], Payload::Eos));
    }
}
