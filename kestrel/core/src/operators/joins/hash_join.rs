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

//! Inner hash join.
//!
//! Build phase on the left leg: accumulate everything, fingerprint the key
//! columns into a multimap `hash → row indices` and a bloom filter. Probe
//! phase on the right leg: bloom-prefilter each morsel, then walk the
//! candidate lists and re-check full key equality to resolve fingerprint
//! collisions (and list/decimal/string keys). Null keys never match.

use std::time::Instant;

use arrow::array::ArrayRef;
use arrow::compute::{concat_batches, filter_record_batch};
use arrow::record_batch::RecordBatch;
use kestrel_common::error::{Error, Result};
use kestrel_common::hash::row::create_row_hashes;
use kestrel_common::hash::{BloomFilter, FlatHashMap, NULL_HASH};
use kestrel_expr::logical::ColumnRef;
use kestrel_expr::schema::RelationSchema;

use crate::execution::morsel::{Morsel, Payload};
use crate::execution::stats::QueryStatistics;
use crate::operators::joins::align_tables;
use crate::operators::{rows_equal, Leg, PhysicalOperator};

struct BuildSide {
    table: RecordBatch,
    key_columns: Vec<ArrayRef>,
    map: FlatHashMap,
    bloom: BloomFilter,
}

pub struct HashJoinOperator {
    left_keys: Vec<ColumnRef>,
    right_keys: Vec<ColumnRef>,
    schema: RelationSchema,
    left_schema: RelationSchema,
    right_schema: RelationSchema,
    build_buffer: Vec<RecordBatch>,
    buffered_bytes: usize,
    memory_limit: usize,
    bloom_fpr: f64,
    build: Option<BuildSide>,
    /// Probe morsels that arrived before the build side finished.
    pending_probes: Vec<Morsel>,
    statistics: QueryStatistics,
}

impl HashJoinOperator {
    pub fn new(
        left_keys: Vec<ColumnRef>,
        right_keys: Vec<ColumnRef>,
        left_schema: RelationSchema,
        right_schema: RelationSchema,
        memory_limit: usize,
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
            buffered_bytes: 0,
            memory_limit,
            bloom_fpr,
            build: None,
            pending_probes: Vec::new(),
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
        let mut map = FlatHashMap::with_capacity(table.num_rows());
        for (row, hash) in hashes.iter().enumerate() {
            if *hash != NULL_HASH {
                map.insert(*hash, row as i64);
            }
        }
        self.statistics.add(
            "time_build_hash_table",
            started.elapsed().as_nanos() as u64,
        );

        let started = Instant::now();
        let bloom = BloomFilter::build_from_hashes(&hashes, self.bloom_fpr);
        self.statistics.add(
            "time_build_bloom_filter",
            started.elapsed().as_nanos() as u64,
        );
        self.statistics.increment("feature_bloom_filter");

        self.build = Some(BuildSide {
            table,
            key_columns,
            map,
            bloom,
        });
        Ok(())
    }

    fn probe(&mut self, morsel: Morsel) -> Result<Option<Payload>> {
        let build = self
            .build
            .as_ref()
            .ok_or_else(|| Error::Internal("probe before hash join build".to_string()))?;
        if build.table.num_rows() == 0 || morsel.num_rows() == 0 {
            return Ok(None);
        }

        let probe_columns: Vec<ArrayRef> = self
            .right_keys
            .iter()
            .map(|key| morsel.column(key.id))
            .collect::<Result<_>>()?;
        let hashes = create_row_hashes(&probe_columns)?;

        // bloom prefilter drops rows that cannot possibly match
        let possible = build.bloom.possibly_contains_many(&hashes);
        let eliminated = possible.false_count();
        if eliminated > 0 {
            self.statistics
                .add("rows_eliminated_by_bloom_filter", eliminated as u64);
        }
        let survivors = filter_record_batch(morsel.batch(), &possible)?;
        let surviving_hashes: Vec<u64> = hashes
            .iter()
            .zip(0..)
            .filter(|(_, row)| possible.value(*row))
            .map(|(hash, _)| *hash)
            .collect();
        if survivors.num_rows() == 0 {
            return Ok(None);
        }
        let surviving_columns: Vec<ArrayRef> = {
            let survivor_morsel = Morsel::new(self.right_schema.clone(), survivors.clone())?;
            self.right_keys
                .iter()
                .map(|key| survivor_morsel.column(key.id))
                .collect::<Result<_>>()?
        };

        let mut left_rows: Vec<Option<i64>> = Vec::new();
        let mut right_rows: Vec<Option<i64>> = Vec::new();
        for (probe_row, hash) in surviving_hashes.iter().enumerate() {
            let Some(candidates) = build.map.get(*hash) else {
                continue;
            };
            for candidate in candidates {
                // hash equality is not key equality
                if rows_equal(
                    &build.key_columns,
                    *candidate as usize,
                    &surviving_columns,
                    probe_row,
                    false,
                )? {
                    left_rows.push(Some(*candidate));
                    right_rows.push(Some(probe_row as i64));
                }
            }
        }
        if left_rows.is_empty() {
            return Ok(None);
        }
        self.statistics.add("rows_out", left_rows.len() as u64);
        let aligned = align_tables(
            &self.schema,
            &build.table,
            &survivors,
            &left_rows,
            &right_rows,
        )?;
        Ok(Some(Payload::Morsel(aligned)))
    }
}

impl PhysicalOperator for HashJoinOperator {
    fn name(&self) -> &'static str {
        "INNER JOIN"
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
                self.buffered_bytes += morsel.size_bytes();
                if self.buffered_bytes > self.memory_limit {
                    self.build_buffer.clear();
                    return Err(Error::ResourcesExhausted(format!(
                        "hash join build side exceeded {} bytes",
                        self.memory_limit
                    )));
                }
                self.statistics.add("rows_build", morsel.num_rows() as u64);
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

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::DataType;
    use kestrel_expr::schema::ColumnDef;

    use super::*;

    fn left_schema() -> RelationSchema {
        RelationSchema::new(vec![
            ColumnDef::new(1, "id", DataType::Int64),
            ColumnDef::new(2, "name", DataType::Utf8),
        ])
    }

    fn right_schema() -> RelationSchema {
        RelationSchema::new(vec![ColumnDef::new(3, "planetId", DataType::Int64)])
    }

    fn operator() -> HashJoinOperator {
        HashJoinOperator::new(
            vec![ColumnRef::new(1, "id")],
            vec![ColumnRef::new(3, "planetId")],
            left_schema(),
            right_schema(),
            1 << 30,
            0.05,
        )
    }

    fn left_morsel(ids: Vec<Option<i64>>, names: Vec<&str>) -> Payload {
        let batch = RecordBatch::try_new(
            left_schema().to_physical_schema(),
            vec![
                Arc::new(Int64Array::from(ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap();
        Payload::Morsel(Morsel::new(left_schema(), batch).unwrap())
    }

    fn right_morsel(ids: Vec<Option<i64>>) -> Payload {
        let batch = RecordBatch::try_new(
            right_schema().to_physical_schema(),
            vec![Arc::new(Int64Array::from(ids))],
        )
        .unwrap();
        Payload::Morsel(Morsel::new(right_schema(), batch).unwrap())
    }

    fn joined_rows(outputs: Vec<Payload>) -> usize {
        outputs
            .iter()
            .map(|p| match p {
                Payload::Morsel(m) => m.num_rows(),
                Payload::Eos => 0,
            })
            .sum()
    }

    #[test]
    fn build_then_probe_matches_pairs() {
        let mut join = operator();
        join.step(
            left_morsel(vec![Some(1), Some(2)], vec!["Mercury", "Venus"]),
            Leg::Left,
        )
        .unwrap();
        assert!(join.step(Payload::Eos, Leg::Left).unwrap().is_empty());

        let out = join
            .step(right_morsel(vec![Some(2), Some(2), Some(7)]), Leg::Right)
            .unwrap();
        assert_eq!(joined_rows(out), 2);
        let out = join.step(Payload::Eos, Leg::Right).unwrap();
        assert!(matches!(out[0], Payload::Eos));
    }

    #[test]
    fn null_keys_never_match() {
        let mut join = operator();
        join.step(
            left_morsel(vec![Some(1), None], vec!["Mercury", "ghost"]),
            Leg::Left,
        )
        .unwrap();
        join.step(Payload::Eos, Leg::Left).unwrap();
        let out = join
            .step(right_morsel(vec![None, Some(1)]), Leg::Right)
            .unwrap();
        assert_eq!(joined_rows(out), 1);
    }

    #[test]
    fn bloom_filter_reports_eliminations() {
        let mut join = operator();
        join.step(left_morsel(vec![Some(1)], vec!["Mercury"]), Leg::Left)
            .unwrap();
        join.step(Payload::Eos, Leg::Left).unwrap();
        join.step(right_morsel(vec![Some(100), Some(200), Some(1)]), Leg::Right)
            .unwrap();
        let stats = join.statistics();
        assert!(stats.get("rows_eliminated_by_bloom_filter") >= 1);
        assert!(stats.get("time_build_bloom_filter") > 0);
    }

    #[test]
    fn early_probes_are_buffered() {
        let mut join = operator();
        // probe arrives first: nothing emitted yet
        assert!(join
            .step(right_morsel(vec![Some(1)]), Leg::Right)
            .unwrap()
            .is_empty());
        join.step(left_morsel(vec![Some(1)], vec!["Mercury"]), Leg::Left)
            .unwrap();
        // build EOS flushes the pending probe
        let out = join.step(Payload::Eos, Leg::Left).unwrap();
        assert_eq!(joined_rows(out), 1);
    }
}
