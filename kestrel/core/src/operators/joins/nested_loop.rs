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

//! Nested-loop equi-join for tiny build sides.
//!
//! When the build side is small, walking it directly beats building a hash
//! table. A bloom filter over the build rows still runs first as a cheap
//! early-out for probe rows that cannot match.

use std::time::Instant;

use arrow::array::ArrayRef;
use arrow::compute::{concat_batches, filter_record_batch};
use arrow::record_batch::RecordBatch;
use kestrel_common::error::{Error, Result};
use kestrel_common::hash::row::create_row_hashes;
use kestrel_common::hash::BloomFilter;
use kestrel_expr::logical::ColumnRef;
use kestrel_expr::schema::RelationSchema;

use crate::execution::morsel::{Morsel, Payload};
use crate::execution::stats::QueryStatistics;
use crate::operators::joins::align_tables;
use crate::operators::{rows_equal, Leg, PhysicalOperator};

pub struct NestedLoopJoinOperator {
    left_keys: Vec<ColumnRef>,
    right_keys: Vec<ColumnRef>,
    schema: RelationSchema,
    left_schema: RelationSchema,
    right_schema: RelationSchema,
    build_buffer: Vec<RecordBatch>,
    build: Option<(RecordBatch, Vec<ArrayRef>, BloomFilter)>,
    pending_probes: Vec<Morsel>,
    bloom_fpr: f64,
    statistics: QueryStatistics,
}

impl NestedLoopJoinOperator {
    pub fn new(
        left_keys: Vec<ColumnRef>,
        right_keys: Vec<ColumnRef>,
        left_schema: RelationSchema,
        right_schema: RelationSchema,
        bloom_fpr: f64,
    ) -> Self {
        let schema = left_schema.join(&right_schema, false, false);
        Self {
            left_keys,
            right_keys,
            schema,
            left_schema,
            right_schema,
            build_buffer: Vec::new(),
            build: None,
            pending_probes: Vec::new(),
            bloom_fpr,
            statistics: QueryStatistics::new(),
        }
    }

    fn finish_build(&mut self) -> Result<()> {
        let table = concat_batches(
            &self.left_schema.to_physical_schema(),
            &self.build_buffer,
        )?;
        self.build_buffer.clear();
        let morsel = Morsel::new(self.left_schema.clone(), table.clone())?;
        let key_columns: Vec<ArrayRef> = self
            .left_keys
            .iter()
            .map(|key| morsel.column(key.id))
            .collect::<Result<_>>()?;

        let started = Instant::now();
        let hashes = create_row_hashes(&key_columns)?;
        let bloom = BloomFilter::build_from_hashes(&hashes, self.bloom_fpr);
        self.statistics.add(
            "time_build_bloom_filter",
            started.elapsed().as_nanos() as u64,
        );
        self.statistics.increment("feature_bloom_filter");

        self.build = Some((table, key_columns, bloom));
        Ok(())
    }

    fn probe(&mut self, morsel: Morsel) -> Result<Option<Payload>> {
        let Some((table, build_keys, bloom)) = &self.build else {
            return Err(Error::Internal(
                "probe before nested loop join build".to_string(),
            ));
        };
        if table.num_rows() == 0 || morsel.num_rows() == 0 {
            return Ok(None);
        }

        let probe_columns: Vec<ArrayRef> = self
            .right_keys
            .iter()
            .map(|key| morsel.column(key.id))
            .collect::<Result<_>>()?;
        let hashes = create_row_hashes(&probe_columns)?;
        let possible = bloom.possibly_contains_many(&hashes);
        let eliminated = possible.false_count();
        if eliminated > 0 {
            self.statistics
                .add("rows_eliminated_by_bloom_filter", eliminated as u64);
        }
        let survivors = filter_record_batch(morsel.batch(), &possible)?;
        if survivors.num_rows() == 0 {
            return Ok(None);
        }
        let survivor_morsel = Morsel::new(self.right_schema.clone(), survivors.clone())?;
        let survivor_keys: Vec<ArrayRef> = self
            .right_keys
            .iter()
            .map(|key| survivor_morsel.column(key.id))
            .collect::<Result<_>>()?;

        // the full equality cross-check, directly
        let mut left_rows: Vec<Option<i64>> = Vec::new();
        let mut right_rows: Vec<Option<i64>> = Vec::new();
        for probe_row in 0..survivors.num_rows() {
            for build_row in 0..table.num_rows() {
                if rows_equal(build_keys, build_row, &survivor_keys, probe_row, false)? {
                    left_rows.push(Some(build_row as i64));
                    right_rows.push(Some(probe_row as i64));
                }
            }
        }
        if left_rows.is_empty() {
            return Ok(None);
        }
        self.statistics.add("rows_out", left_rows.len() as u64);
        let aligned =
            align_tables(&self.schema, table, &survivors, &left_rows, &right_rows)?;
        Ok(Some(Payload::Morsel(aligned)))
    }
}

impl PhysicalOperator for NestedLoopJoinOperator {
    fn name(&self) -> &'static str {
        "NESTED LOOP JOIN"
    }

    fn config(&self) -> String {
        let pairs: Vec<String> = self
            .left_keys
            .iter()
            .zip(&self.right_keys)
            .map(|(l, r)| format!("{l} = {r}"))
            .collect();
        format!("({})", pairs.join(" AND "))
    }

    fn schema(&self) -> &RelationSchema {
        &self.schema
    }

    fn step(&mut self, payload: Payload, leg: Leg) -> Result<Vec<Payload>> {
        match (leg, payload) {
            (Leg::Left, Payload::Morsel(morsel)) => {
                self.build_buffer.push(morsel.into_batch());
                Ok(vec![])
            }
            (Leg::Left, Payload::Eos) => {
                self.finish_build()?;
                let mut outputs = Vec::new();
                for pending in std::mem::take(&mut self.pending_probes) {
                    if let Some(payload) = self.probe(pending)? {
                        outputs.push(payload);
                    }
                }
                Ok(outputs)
            }
            (Leg::Right | Leg::Only, Payload::Morsel(morsel)) => {
                if self.build.is_none() {
                    self.pending_probes.push(morsel);
                    return Ok(vec![]);
                }
                Ok(self.probe(morsel)?.into_iter().collect())
            }
            (Leg::Right | Leg::Only, Payload::Eos) => Ok(vec![Payload::Eos]),
        }
    }

    fn statistics(&self) -> QueryStatistics {
        self.statistics.clone()
    }
}
