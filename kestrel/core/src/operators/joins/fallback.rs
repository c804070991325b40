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

//! Buffered fallback join for LEFT/RIGHT/FULL OUTER, SEMI, ANTI and CROSS.
//!
//! Both inputs are collected fully, then joined through the Arrow take
//! kernels. SEMI and ANTI keep only left columns. ANTI is null-aware when
//! lowered from `NOT IN`: a NULL anywhere in the right key column empties
//! the result, and NULL left keys never qualify. Key types without a
//! fingerprint fail with `UnsupportedSyntax` before any row moves.

use arrow::array::ArrayRef;
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use kestrel_common::error::{Error, Result};
use kestrel_common::hash::row::create_row_hashes;
use kestrel_common::hash::{FlatHashMap, NULL_HASH};
use kestrel_expr::logical::{ColumnRef, JoinType};
use kestrel_expr::schema::RelationSchema;

use crate::execution::morsel::{Morsel, Payload};
use crate::execution::stats::QueryStatistics;
use crate::operators::joins::align_tables;
use crate::operators::{rows_equal, take_rows, Leg, PhysicalOperator};

pub struct FallbackJoinOperator {
    join_type: JoinType,
    left_keys: Vec<ColumnRef>,
    right_keys: Vec<ColumnRef>,
    /// NOT IN semantics: right-side NULL keys poison the whole anti join.
    null_aware: bool,
    schema: RelationSchema,
    left_schema: RelationSchema,
    right_schema: RelationSchema,
    left_buffer: Vec<RecordBatch>,
    right_buffer: Vec<RecordBatch>,
    left_done: bool,
    right_done: bool,
    buffered_bytes: usize,
    memory_limit: usize,
    morsel_size: usize,
    statistics: QueryStatistics,
}

impl FallbackJoinOperator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        join_type: JoinType,
        left_keys: Vec<ColumnRef>,
        right_keys: Vec<ColumnRef>,
        null_aware: bool,
        left_schema: RelationSchema,
        right_schema: RelationSchema,
        memory_limit: usize,
        morsel_size: usize,
    ) -> Self {
        let schema = match join_type {
            // semi and anti joins never surface right columns
            JoinType::Semi | JoinType::Anti => left_schema.clone(),
            JoinType::Left => left_schema.join(&right_schema, false, true),
            JoinType::Right => left_schema.join(&right_schema, true, false),
            JoinType::Full => left_schema.join(&right_schema, true, true),
            _ => left_schema.join(&right_schema, false, false),
        };
        Self {
            join_type,
            left_keys,
            right_keys,
            null_aware,
            schema,
            left_schema,
            right_schema,
            left_buffer: Vec::new(),
            right_buffer: Vec::new(),
            left_done: false,
            right_done: false,
            buffered_bytes: 0,
            memory_limit,
            morsel_size: morsel_size.max(1),
            statistics: QueryStatistics::new(),
        }
    }

    fn flush(&mut self) -> Result<Vec<Payload>> {
        let left = concat_batches(&self.left_schema.to_physical_schema(), &self.left_buffer)?;
        let right =
            concat_batches(&self.right_schema.to_physical_schema(), &self.right_buffer)?;
        self.left_buffer.clear();
        self.right_buffer.clear();

        let output = match self.join_type {
            JoinType::Cross => self.cross(&left, &right)?,
            _ => self.keyed(&left, &right)?,
        };

        let mut payloads = Vec::new();
        if let Some(batch) = output {
            self.statistics.add("rows_out", batch.num_rows() as u64);
            let mut offset = 0;
            while offset < batch.num_rows() {
                let length = self.morsel_size.min(batch.num_rows() - offset);
                payloads.push(Payload::Morsel(Morsel::new(
                    self.schema.clone(),
                    batch.slice(offset, length),
                )?));
                offset += length;
            }
        }
        payloads.push(Payload::Eos);
        Ok(payloads)
    }

    fn cross(&self, left: &RecordBatch, right: &RecordBatch) -> Result<Option<RecordBatch>> {
        if left.num_rows() == 0 || right.num_rows() == 0 {
            return Ok(None);
        }
        let mut left_rows = Vec::with_capacity(left.num_rows() * right.num_rows());
        let mut right_rows = Vec::with_capacity(left.num_rows() * right.num_rows());
        for i in 0..left.num_rows() {
            for j in 0..right.num_rows() {
                left_rows.push(Some(i as i64));
                right_rows.push(Some(j as i64));
            }
        }
        let morsel = align_tables(&self.schema, left, right, &left_rows, &right_rows)?;
        Ok(Some(morsel.into_batch()))
    }

    fn keyed(&self, left: &RecordBatch, right: &RecordBatch) -> Result<Option<RecordBatch>> {
        let left_morsel = Morsel::new(self.left_schema.clone(), left.clone())?;
        let right_morsel = Morsel::new(self.right_schema.clone(), right.clone())?;
        let left_keys: Vec<ArrayRef> = self
            .left_keys
            .iter()
            .map(|key| left_morsel.column(key.id))
            .collect::<Result<_>>()?;
        let right_keys: Vec<ArrayRef> = self
            .right_keys
            .iter()
            .map(|key| right_morsel.column(key.id))
            .collect::<Result<_>>()?;

        let left_hashes = create_row_hashes(&left_keys)?;
        let right_hashes = create_row_hashes(&right_keys)?;

        if self.null_aware
            && self.join_type == JoinType::Anti
            && right_hashes.iter().any(|hash| *hash == NULL_HASH)
        {
            // x NOT IN (…, NULL, …) is never true
            return Ok(None);
        }

        let mut table = FlatHashMap::with_capacity(right.num_rows());
        for (row, hash) in right_hashes.iter().enumerate() {
            if *hash != NULL_HASH {
                table.insert(*hash, row as i64);
            }
        }

        let mut matched_right = vec![false; right.num_rows()];
        let mut left_rows: Vec<Option<i64>> = Vec::new();
        let mut right_rows: Vec<Option<i64>> = Vec::new();
        let mut kept_left: Vec<i64> = Vec::new();

        for (row, hash) in left_hashes.iter().enumerate() {
            let mut matches: Vec<i64> = Vec::new();
            if *hash != NULL_HASH {
                if let Some(candidates) = table.get(*hash) {
                    for candidate in candidates {
                        if rows_equal(
                            &left_keys,
                            row,
                            &right_keys,
                            *candidate as usize,
                            false,
                        )? {
                            matches.push(*candidate);
                        }
                    }
                }
            }
            match self.join_type {
                JoinType::Semi => {
                    if !matches.is_empty() {
                        kept_left.push(row as i64);
                    }
                }
                JoinType::Anti => {
                    // null keys compare as unknown and never qualify
                    if matches.is_empty() && *hash != NULL_HASH {
                        kept_left.push(row as i64);
                    }
                }
                _ => {
                    if matches.is_empty() {
                        if matches!(self.join_type, JoinType::Left | JoinType::Full) {
                            left_rows.push(Some(row as i64));
                            right_rows.push(None);
                        }
                    } else {
                        for m in matches {
                            matched_right[m as usize] = true;
                            left_rows.push(Some(row as i64));
                            right_rows.push(Some(m));
                        }
                    }
                }
            }
        }

        match self.join_type {
            JoinType::Semi | JoinType::Anti => {
                if kept_left.is_empty() {
                    return Ok(None);
                }
                Ok(Some(take_rows(left, &kept_left)?))
            }
            _ => {
                if matches!(self.join_type, JoinType::Right | JoinType::Full) {
                    for (row, matched) in matched_right.iter().enumerate() {
                        if !matched {
                            left_rows.push(None);
                            right_rows.push(Some(row as i64));
                        }
                    }
                }
                if left_rows.is_empty() {
                    return Ok(None);
                }
                let morsel =
                    align_tables(&self.schema, left, right, &left_rows, &right_rows)?;
                Ok(Some(morsel.into_batch()))
            }
        }
    }
}

impl PhysicalOperator for FallbackJoinOperator {
    fn name(&self) -> &'static str {
        match self.join_type {
            JoinType::Left => "LEFT OUTER JOIN",
            JoinType::Right => "RIGHT OUTER JOIN",
            JoinType::Full => "FULL OUTER JOIN",
            JoinType::Semi => "SEMI JOIN",
            JoinType::Anti => "ANTI JOIN",
            _ => "CROSS JOIN",
        }
    }

    fn config(&self) -> String {
        if self.left_keys.is_empty() {
            return String::new();
        }
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
                self.track_memory(&morsel)?;
                self.left_buffer.push(morsel.into_batch());
                Ok(vec![])
            }
            (Leg::Right | Leg::Only, Payload::Morsel(morsel)) => {
                self.track_memory(&morsel)?;
                self.right_buffer.push(morsel.into_batch());
                Ok(vec![])
            }
            (Leg::Left, Payload::Eos) => {
                self.left_done = true;
                if self.right_done {
                    self.flush()
                } else {
                    Ok(vec![])
                }
            }
            (Leg::Right | Leg::Only, Payload::Eos) => {
                self.right_done = true;
                if self.left_done {
                    self.flush()
                } else {
                    Ok(vec![])
                }
            }
        }
    }

    fn statistics(&self) -> QueryStatistics {
        self.statistics.clone()
    }
}

impl FallbackJoinOperator {
    fn track_memory(&mut self, morsel: &Morsel) -> Result<()> {
        self.buffered_bytes += morsel.size_bytes();
        if self.buffered_bytes > self.memory_limit {
            self.left_buffer.clear();
            self.right_buffer.clear();
            return Err(Error::ResourcesExhausted(format!(
                "join buffer exceeded {} bytes",
                self.memory_limit
            )));
        }
        Ok(())
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

    fn operator(join_type: JoinType, null_aware: bool) -> FallbackJoinOperator {
        FallbackJoinOperator::new(
            join_type,
            vec![ColumnRef::new(1, "id")],
            vec![ColumnRef::new(3, "planetId")],
            null_aware,
            left_schema(),
            right_schema(),
            1 << 30,
            1000,
        )
    }

    fn feed(
        join: &mut FallbackJoinOperator,
        left_ids: Vec<Option<i64>>,
        names: Vec<&str>,
        right_ids: Vec<Option<i64>>,
    ) -> Vec<Payload> {
        let left = RecordBatch::try_new(
            left_schema().to_physical_schema(),
            vec![
                Arc::new(Int64Array::from(left_ids)),
                Arc::new(StringArray::from(names)),
            ],
        )
        .unwrap();
        join.step(
            Payload::Morsel(Morsel::new(left_schema(), left).unwrap()),
            Leg::Left,
        )
        .unwrap();
        let right = RecordBatch::try_new(
            right_schema().to_physical_schema(),
            vec![Arc::new(Int64Array::from(right_ids))],
        )
        .unwrap();
        join.step(
            Payload::Morsel(Morsel::new(right_schema(), right).unwrap()),
            Leg::Right,
        )
        .unwrap();
        join.step(Payload::Eos, Leg::Left).unwrap();
        join.step(Payload::Eos, Leg::Right).unwrap()
    }

    fn names_of(payloads: &[Payload]) -> Vec<Option<String>> {
        payloads
            .iter()
            .filter_map(|p| match p {
                Payload::Morsel(m) => Some(m),
                Payload::Eos => None,
            })
            .flat_map(|m| {
                let names = m.column(2).unwrap();
                let names = names.as_any().downcast_ref::<StringArray>().unwrap();
                names
                    .iter()
                    .map(|v| v.map(str::to_string))
                    .collect::<Vec<_>>()
            })
            .collect()
    }

    #[test]
    fn anti_join_keeps_unmatched_left_rows() {
        let mut join = operator(JoinType::Anti, true);
        let out = feed(
            &mut join,
            vec![Some(1), Some(2), Some(3)],
            vec!["Mercury", "Venus", "Earth"],
            vec![Some(3), Some(3)],
        );
        assert_eq!(
            names_of(&out),
            vec![Some("Mercury".to_string()), Some("Venus".to_string())]
        );
    }

    #[test]
    fn null_aware_anti_join_is_emptied_by_right_nulls() {
        let mut join = operator(JoinType::Anti, true);
        let out = feed(
            &mut join,
            vec![Some(1), Some(2)],
            vec!["Mercury", "Venus"],
            vec![Some(9), None],
        );
        assert!(names_of(&out).is_empty());
    }

    #[test]
    fn plain_anti_join_survives_right_nulls() {
        let mut join = operator(JoinType::Anti, false);
        let out = feed(
            &mut join,
            vec![Some(1), Some(9)],
            vec!["Mercury", "Pluto"],
            vec![Some(9), None],
        );
        assert_eq!(names_of(&out), vec![Some("Mercury".to_string())]);
    }

    #[test]
    fn semi_join_emits_each_matching_left_row_once() {
        let mut join = operator(JoinType::Semi, false);
        let out = feed(
            &mut join,
            vec![Some(3), Some(4)],
            vec!["Earth", "Mars"],
            vec![Some(3), Some(3), Some(3)],
        );
        assert_eq!(names_of(&out), vec![Some("Earth".to_string())]);
    }

    #[test]
    fn full_outer_join_null_extends_both_sides() {
        let mut join = operator(JoinType::Full, false);
        let out = feed(
            &mut join,
            vec![Some(1), Some(3)],
            vec!["Mercury", "Earth"],
            vec![Some(3), Some(8)],
        );
        let rows: usize = out
            .iter()
            .map(|p| match p {
                Payload::Morsel(m) => m.num_rows(),
                Payload::Eos => 0,
            })
            .sum();
        // Mercury unmatched, Earth matched, 8 unmatched
        assert_eq!(rows, 3);
    }

    #[test]
    fn cross_join_produces_every_pair() {
        let mut join = FallbackJoinOperator::new(
            JoinType::Cross,
            vec![],
            vec![],
            false,
            left_schema(),
            right_schema(),
            1 << 30,
            1000,
        );
        let out = feed(
            &mut join,
            vec![Some(1), Some(2)],
            vec!["Mercury", "Venus"],
            vec![Some(7), Some(8), Some(9)],
        );
        let rows: usize = out
            .iter()
            .map(|p| match p {
                Payload::Morsel(m) => m.num_rows(),
                Payload::Eos => 0,
            })
            .sum();
        assert_eq!(rows, 6);
    }
}
