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

//! Group-by and aggregation.
//!
//! A blocking operator: all input is collected, then grouped in two
//! passes. Pass one computes row fingerprints over the grouping columns
//! and buckets row indices in a flat hash multimap, re-checking real key
//! equality when appending to an existing bucket because fingerprints
//! collide. Pass two computes the aggregate values per group.
//!
//! Null policy follows SQL: `COUNT(*)` counts everything, `COUNT(col)`,
//! `SUM`, `AVG`, `MIN` and `MAX` ignore nulls, and NULL group keys form
//! their own group.

use arrow::array::ArrayRef;
use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use kestrel_common::error::{Error, Result};
use kestrel_common::hash::row::{cell_hashes, create_row_hashes};
use kestrel_common::hash::{FlatHashMap, FlatHashSet, NULL_HASH};
use kestrel_expr::expr::AggregateKind;
use kestrel_expr::logical::{AggregateSpec, ColumnRef};
use kestrel_expr::schema::RelationSchema;
use kestrel_expr::value::Value;

use crate::execution::morsel::{Morsel, Payload};
use crate::execution::stats::QueryStatistics;
use crate::operators::values::build_array;
use crate::operators::{rows_equal, Leg, PhysicalOperator};

pub struct AggregateOperator {
    group_by: Vec<ColumnRef>,
    aggregates: Vec<AggregateSpec>,
    /// Output: aggregate columns first, then the grouping columns.
    schema: RelationSchema,
    input_schema: RelationSchema,
    buffer: Vec<RecordBatch>,
    buffered_bytes: usize,
    memory_limit: usize,
    statistics: QueryStatistics,
}

impl AggregateOperator {
    pub fn new(
        group_by: Vec<ColumnRef>,
        aggregates: Vec<AggregateSpec>,
        schema: RelationSchema,
        input_schema: RelationSchema,
        memory_limit: usize,
    ) -> Self {
        Self {
            group_by,
            aggregates,
            schema,
            input_schema,
            buffer: Vec::new(),
            buffered_bytes: 0,
            memory_limit,
            statistics: QueryStatistics::new(),
        }
    }

    fn flush(&mut self) -> Result<Vec<Payload>> {
        let combined = concat_batches(
            &self.input_schema.to_physical_schema(),
            &self.buffer,
        )?;
        self.buffer.clear();
        let morsel = Morsel::new(self.input_schema.clone(), combined)?;

        let groups = self.build_groups(&morsel)?;
        self.statistics.add("groups", groups.len() as u64);

        // pass two: aggregate values per group
        let mut aggregate_columns: Vec<Vec<Value>> =
            vec![Vec::with_capacity(groups.len()); self.aggregates.len()];
        for group in &groups {
            for (ordinal, spec) in self.aggregates.iter().enumerate() {
                let argument = spec
                    .arg
                    .as_ref()
                    .map(|arg| morsel.column(arg.id))
                    .transpose()?;
                aggregate_columns[ordinal].push(compute_aggregate(
                    spec.kind,
                    argument.as_ref(),
                    group,
                )?);
            }
        }

        let mut columns: Vec<ArrayRef> = Vec::with_capacity(self.schema.len());
        for (spec, cells) in self.aggregates.iter().zip(&aggregate_columns) {
            columns.push(build_array(cells, &spec.output.data_type)?);
        }
        if !self.group_by.is_empty() {
            // one representative row per group carries the key columns
            let representatives: arrow::array::UInt64Array = groups
                .iter()
                .map(|group| Some(group.first().copied().unwrap_or(0) as u64))
                .collect();
            for key in &self.group_by {
                let column = morsel.column(key.id)?;
                columns.push(arrow::compute::take(&column, &representatives, None)?);
            }
        }

        let batch = RecordBatch::try_new(self.schema.to_physical_schema(), columns)?;
        Ok(vec![
            Payload::Morsel(Morsel::new(self.schema.clone(), batch)?),
            Payload::Eos,
        ])
    }

    /// Bucket row indices by group key. Without grouping columns the whole
    /// input is one group, even when empty.
    fn build_groups(&self, morsel: &Morsel) -> Result<Vec<Vec<i64>>> {
        if self.group_by.is_empty() {
            return Ok(vec![(0..morsel.num_rows() as i64).collect()]);
        }
        let key_columns: Vec<ArrayRef> = self
            .group_by
            .iter()
            .map(|key| morsel.column(key.id))
            .collect::<Result<_>>()?;
        let hashes = create_row_hashes(&key_columns)?;

        // `groups` is append-only; the multimap buckets group ordinals by
        // fingerprint
        let mut groups: Vec<Vec<i64>> = Vec::new();
        let mut bucket_groups = FlatHashMap::with_capacity(morsel.num_rows());
        for (row, hash) in hashes.iter().enumerate() {
            let row = row as i64;
            let mut placed = false;
            if let Some(candidates) = bucket_groups.get(*hash) {
                // fingerprints collide: re-check real key equality
                for group_ordinal in candidates {
                    let group = &groups[*group_ordinal as usize];
                    let representative = group[0] as usize;
                    if rows_equal(
                        &key_columns,
                        representative,
                        &key_columns,
                        row as usize,
                        true,
                    )? {
                        groups[*group_ordinal as usize].push(row);
                        placed = true;
                        break;
                    }
                }
            }
            if !placed {
                let ordinal = groups.len() as i64;
                groups.push(vec![row]);
                bucket_groups.insert(*hash, ordinal);
            }
        }
        Ok(groups)
    }
}

impl PhysicalOperator for AggregateOperator {
    fn name(&self) -> &'static str {
        "AGGREGATE"
    }

    fn config(&self) -> String {
        let aggregates: Vec<String> =
            self.aggregates.iter().map(|a| a.to_string()).collect();
        if self.group_by.is_empty() {
            format!("({})", aggregates.join(", "))
        } else {
            let keys: Vec<String> = self.group_by.iter().map(|k| k.to_string()).collect();
            format!("({}) GROUP BY ({})", aggregates.join(", "), keys.join(", "))
        }
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
                        "aggregation buffer exceeded {} bytes",
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

/// One aggregate value over the rows of a group.
fn compute_aggregate(
    kind: AggregateKind,
    argument: Option<&ArrayRef>,
    group: &[i64],
) -> Result<Value> {
    match kind {
        AggregateKind::Count => match argument {
            // COUNT(*) counts every row, nulls included
            None => Ok(Value::Int64(group.len() as i64)),
            Some(column) => {
                let non_null = group
                    .iter()
                    .filter(|row| !column.is_null(**row as usize))
                    .count();
                Ok(Value::Int64(non_null as i64))
            }
        },
        AggregateKind::CountDistinct => {
            let column = required(argument, "COUNT(DISTINCT)")?;
            let cells = cell_hashes(column.as_ref())?;
            let mut seen = FlatHashSet::with_capacity(group.len());
            for row in group {
                let cell = cells[*row as usize];
                if cell != NULL_HASH {
                    seen.insert(cell);
                }
            }
            Ok(Value::Int64(seen.items() as i64))
        }
        AggregateKind::Sum => {
            let column = required(argument, "SUM")?;
            sum_of(column, group)
        }
        AggregateKind::Min | AggregateKind::Max => {
            let column = required(argument, kind.name())?;
            let mut best: Option<Value> = None;
            for row in group {
                let row = *row as usize;
                if column.is_null(row) {
                    continue;
                }
                let value = Value::try_from_array(column.as_ref(), row)?;
                best = Some(match best {
                    None => value,
                    Some(current) => {
                        let replace = match value.partial_cmp_sql(&current) {
                            Some(std::cmp::Ordering::Less) => kind == AggregateKind::Min,
                            Some(std::cmp::Ordering::Greater) => kind == AggregateKind::Max,
                            _ => false,
                        };
                        if replace {
                            value
                        } else {
                            current
                        }
                    }
                });
            }
            Ok(best.unwrap_or(Value::Null))
        }
        AggregateKind::Avg => {
            let column = required(argument, "AVG")?;
            let mut sum = 0f64;
            let mut count = 0usize;
            for row in group {
                let row = *row as usize;
                if column.is_null(row) {
                    continue;
                }
                let value = Value::try_from_array(column.as_ref(), row)?;
                let Some(value) = value.as_f64() else {
                    return Err(Error::InvalidSyntax(
                        "AVG over a non-numeric column".to_string(),
                    ));
                };
                sum += value;
                count += 1;
            }
            if count == 0 {
                Ok(Value::Null)
            } else {
                Ok(Value::Float64(sum / count as f64))
            }
        }
        AggregateKind::HashOne => {
            let column = required(argument, "HASH_ONE")?;
            match group.first() {
                Some(row) => Value::try_from_array(column.as_ref(), *row as usize),
                None => Ok(Value::Null),
            }
        }
    }
}

fn required<'a>(argument: Option<&'a ArrayRef>, name: &str) -> Result<&'a ArrayRef> {
    argument.ok_or_else(|| Error::InvalidSyntax(format!("{name} requires an argument")))
}

fn sum_of(column: &ArrayRef, group: &[i64]) -> Result<Value> {
    let mut int_sum = 0i64;
    let mut float_sum = 0f64;
    let mut any = false;
    let mut all_integral = true;
    for row in group {
        let row = *row as usize;
        if column.is_null(row) {
            continue;
        }
        let value = Value::try_from_array(column.as_ref(), row)?;
        match value {
            Value::Int64(v) => {
                int_sum = int_sum.wrapping_add(v);
                float_sum += v as f64;
            }
            Value::UInt64(v) => {
                int_sum = int_sum.wrapping_add(v as i64);
                float_sum += v as f64;
            }
            other => {
                let Some(v) = other.as_f64() else {
                    return Err(Error::InvalidSyntax(
                        "SUM over a non-numeric column".to_string(),
                    ));
                };
                all_integral = false;
                float_sum += v;
            }
        }
        any = true;
    }
    if !any {
        return Ok(Value::Null);
    }
    if all_integral {
        Ok(Value::Int64(int_sum))
    } else {
        Ok(Value::Float64(float_sum))
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::DataType;
    use kestrel_expr::schema::ColumnDef;

    use super::*;

    fn input_schema() -> RelationSchema {
        RelationSchema::new(vec![
            ColumnDef::new(1, "planetId", DataType::Int64),
            ColumnDef::new(2, "name", DataType::Utf8),
        ])
    }

    fn input_morsel() -> Payload {
        let schema = input_schema();
        let batch = RecordBatch::try_new(
            schema.to_physical_schema(),
            vec![
                Arc::new(Int64Array::from(vec![
                    Some(3),
                    Some(4),
                    Some(4),
                    None,
                    Some(3),
                ])),
                Arc::new(StringArray::from(vec![
                    Some("Moon"),
                    Some("Phobos"),
                    Some("Deimos"),
                    None,
                    Some("Moon"),
                ])),
            ],
        )
        .unwrap();
        Payload::Morsel(Morsel::new(schema, batch).unwrap())
    }

    fn count_star_spec() -> AggregateSpec {
        AggregateSpec {
            kind: AggregateKind::Count,
            arg: None,
            distinct: false,
            output: ColumnDef::new(10, "count", DataType::Int64),
        }
    }

    #[test]
    fn group_by_buckets_with_null_group() {
        let schema = RelationSchema::new(vec![
            ColumnDef::new(10, "count", DataType::Int64),
            ColumnDef::new(1, "planetId", DataType::Int64),
        ]);
        let mut aggregate = AggregateOperator::new(
            vec![ColumnRef::new(1, "planetId")],
            vec![count_star_spec()],
            schema,
            input_schema(),
            1 << 30,
        );
        aggregate.step(input_morsel(), Leg::Only).unwrap();
        let out = aggregate.step(Payload::Eos, Leg::Only).unwrap();
        let Payload::Morsel(out) = &out[0] else {
            panic!("expected a morsel")
        };
        // groups: {3: 2 rows}, {4: 2 rows}, {NULL: 1 row}
        assert_eq!(out.num_rows(), 3);
        let counts = out.column(10).unwrap();
        let counts = counts.as_any().downcast_ref::<Int64Array>().unwrap();
        let mut sorted: Vec<i64> = counts.values().to_vec();
        sorted.sort_unstable();
        assert_eq!(sorted, vec![1, 2, 2]);
    }

    #[test]
    fn count_column_ignores_nulls_count_star_does_not() {
        let schema = RelationSchema::new(vec![
            ColumnDef::new(10, "count_star", DataType::Int64),
            ColumnDef::new(11, "count_name", DataType::Int64),
        ]);
        let mut aggregate = AggregateOperator::new(
            vec![],
            vec![
                count_star_spec(),
                AggregateSpec {
                    kind: AggregateKind::Count,
                    arg: Some(ColumnRef::new(2, "name")),
                    distinct: false,
                    output: ColumnDef::new(11, "count_name", DataType::Int64),
                },
            ],
            schema,
            input_schema(),
            1 << 30,
        );
        aggregate.step(input_morsel(), Leg::Only).unwrap();
        let out = aggregate.step(Payload::Eos, Leg::Only).unwrap();
        let Payload::Morsel(out) = &out[0] else {
            panic!("expected a morsel")
        };
        assert_eq!(out.num_rows(), 1);
        let star = out.column(10).unwrap();
        assert_eq!(
            star.as_any().downcast_ref::<Int64Array>().unwrap().value(0),
            5
        );
        let named = out.column(11).unwrap();
        assert_eq!(
            named.as_any().downcast_ref::<Int64Array>().unwrap().value(0),
            4
        );
    }

    #[test]
    fn count_distinct_uses_fingerprints() {
        let schema = RelationSchema::new(vec![ColumnDef::new(
            10,
            "distinct_names",
            DataType::Int64,
        )]);
        let mut aggregate = AggregateOperator::new(
            vec![],
            vec![AggregateSpec {
                kind: AggregateKind::CountDistinct,
                arg: Some(ColumnRef::new(2, "name")),
                distinct: true,
                output: ColumnDef::new(10, "distinct_names", DataType::Int64),
            }],
            schema,
            input_schema(),
            1 << 30,
        );
        aggregate.step(input_morsel(), Leg::Only).unwrap();
        let out = aggregate.step(Payload::Eos, Leg::Only).unwrap();
        let Payload::Morsel(out) = &out[0] else {
            panic!("expected a morsel")
        };
        // Moon, Phobos, Deimos; the null does not count
        let result = out.column(10).unwrap();
        assert_eq!(
            result.as_any().downcast_ref::<Int64Array>().unwrap().value(0),
            3
        );
    }

    #[test]
    fn empty_input_still_produces_a_global_row() {
        let schema = RelationSchema::new(vec![ColumnDef::new(10, "count", DataType::Int64)]);
        let mut aggregate = AggregateOperator::new(
            vec![],
            vec![count_star_spec()],
            schema,
            input_schema(),
            1 << 30,
        );
        let out = aggregate.step(Payload::Eos, Leg::Only).unwrap();
        let Payload::Morsel(out) = &out[0] else {
            panic!("expected a morsel")
        };
        assert_eq!(out.num_rows(), 1);
        let counts = out.column(10).unwrap();
        assert_eq!(
            counts.as_any().downcast_ref::<Int64Array>().unwrap().value(0),
            0
        );
    }
}
