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

//! CROSS JOIN UNNEST: replicate each input row once per array element,
//! appending a column holding the scalar element.
//!
//! Not really a join; it is stateless and streaming. Options: distinct
//! mode suppresses duplicate elements through a flat hash set that
//! persists across morsels; single-column projection short-circuits the
//! replication and emits just the flat element list; inline conditions
//! filter elements during the unnest.

use arrow::array::{Array, AsArray};
use kestrel_common::error::{Error, Result};
use kestrel_common::hash::FlatHashSet;
use kestrel_expr::logical::{ColumnRef, UnnestSource};
use kestrel_expr::schema::{ColumnDef, RelationSchema};
use kestrel_expr::value::Value;

use crate::execution::morsel::{Morsel, Payload};
use crate::execution::stats::QueryStatistics;
use crate::operators::values::build_array;
use crate::operators::{take_rows, Leg, PhysicalOperator};

pub struct UnnestOperator {
    source: UnnestSource,
    target: ColumnDef,
    distinct: bool,
    filters: Option<Vec<Value>>,
    single_column: bool,
    schema: RelationSchema,
    seen: FlatHashSet,
    statistics: QueryStatistics,
}

impl UnnestOperator {
    pub fn new(
        source: UnnestSource,
        target: ColumnDef,
        distinct: bool,
        filters: Option<Vec<Value>>,
        single_column: bool,
        input_schema: RelationSchema,
    ) -> Self {
        let schema = if single_column {
            RelationSchema::new(vec![target.clone()])
        } else {
            let mut columns = input_schema.columns().to_vec();
            columns.push(target.clone());
            RelationSchema::new(columns)
        };
        Self {
            source,
            target,
            distinct,
            filters,
            single_column,
            schema,
            seen: FlatHashSet::new(),
            statistics: QueryStatistics::new(),
        }
    }

    fn element_passes(&mut self, element: &Value) -> bool {
        if let Some(allowed) = &self.filters {
            let matches = allowed.iter().any(|candidate| {
                element.partial_cmp_sql(candidate) == Some(std::cmp::Ordering::Equal)
            });
            if !matches {
                return false;
            }
        }
        if self.distinct {
            return self.seen.insert(element.fingerprint_cell());
        }
        true
    }

    fn explode(&mut self, morsel: &Morsel) -> Result<(Vec<i64>, Vec<Value>)> {
        let mut indices = Vec::new();
        let mut elements = Vec::new();
        let source = self.source.clone();
        match &source {
            UnnestSource::Literal(values) => {
                for row in 0..morsel.num_rows() {
                    for value in values {
                        if self.element_passes(value) {
                            indices.push(row as i64);
                            elements.push(value.clone());
                        }
                    }
                }
            }
            UnnestSource::Column(ColumnRef { id, .. }) => {
                let column = morsel.column(*id)?;
                let lists = column
                    .as_list_opt::<i32>()
                    .ok_or_else(|| {
                        Error::InvalidSyntax(format!(
                            "UNNEST argument must be an array, got {}",
                            column.data_type()
                        ))
                    })?;
                for row in 0..lists.len() {
                    // null arrays produce no rows
                    if lists.is_null(row) {
                        continue;
                    }
                    let element_array = lists.value(row);
                    for i in 0..element_array.len() {
                        let element = Value::try_from_array(element_array.as_ref(), i)?;
                        if self.element_passes(&element) {
                            indices.push(row as i64);
                            elements.push(element);
                        }
                    }
                }
            }
        }
        Ok((indices, elements))
    }
}

impl PhysicalOperator for UnnestOperator {
    fn name(&self) -> &'static str {
        "CROSS JOIN UNNEST"
    }

    fn config(&self) -> String {
        let mut config = format!("({})", self.target.name);
        if let Some(filters) = &self.filters {
            let rendered: Vec<String> = filters.iter().map(|v| v.to_string()).collect();
            config.push_str(&format!(" IN ({})", rendered.join(", ")));
        }
        if self.distinct {
            config.push_str(" DISTINCT");
        }
        config
    }

    fn schema(&self) -> &RelationSchema {
        &self.schema
    }

    fn step(&mut self, payload: Payload, _leg: Leg) -> Result<Vec<Payload>> {
        match payload {
            Payload::Eos => Ok(vec![Payload::Eos]),
            Payload::Morsel(morsel) => {
                let (indices, elements) = self.explode(&morsel)?;
                self.statistics.add("rows_out", elements.len() as u64);
                if elements.is_empty() {
                    return Ok(vec![]);
                }
                let element_array = build_array(&elements, &self.target.data_type)?;

                let batch = if self.single_column {
                    // downstream only reads the unnested column; skip the
                    // replication entirely
                    arrow::record_batch::RecordBatch::try_new(
                        self.schema.to_physical_schema(),
                        vec![element_array],
                    )?
                } else {
                    let replicated = take_rows(morsel.batch(), &indices)?;
                    let mut columns = replicated.columns().to_vec();
                    columns.push(element_array);
                    arrow::record_batch::RecordBatch::try_new(
                        self.schema.to_physical_schema(),
                        columns,
                    )?
                };
                Ok(vec![Payload::Morsel(Morsel::new(
                    self.schema.clone(),
                    batch,
                )?)])
            }
        }
    }

    fn statistics(&self) -> QueryStatistics {
        self.statistics.clone()
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Int64Array, Int64Builder, ListBuilder, StringArray};
    use arrow::datatypes::DataType;
    use arrow::record_batch::RecordBatch;
    use kestrel_expr::schema::ColumnDef;

    use super::*;

    fn list_schema() -> RelationSchema {
        RelationSchema::new(vec![
            ColumnDef::new(1, "name", DataType::Utf8),
            ColumnDef::new(
                2,
                "moons",
                DataType::List(Arc::new(arrow::datatypes::Field::new(
                    "item",
                    DataType::Int64,
                    true,
                ))),
            ),
        ])
    }

    fn list_morsel() -> Payload {
        let mut builder = ListBuilder::new(Int64Builder::new());
        builder.append_value([Some(1), Some(2)]);
        builder.append_value::<Vec<Option<i64>>, i64>(vec![]);
        builder.append_null();
        builder.append_value([Some(2), Some(3)]);
        let schema = list_schema();
        let batch = RecordBatch::try_new(
            schema.to_physical_schema(),
            vec![
                Arc::new(StringArray::from(vec!["a", "b", "c", "d"])),
                Arc::new(builder.finish()),
            ],
        )
        .unwrap();
        Payload::Morsel(Morsel::new(schema, batch).unwrap())
    }

    fn target() -> ColumnDef {
        ColumnDef::new(9, "moon", DataType::Int64)
    }

    fn values_of(payloads: &[Payload]) -> Vec<i64> {
        payloads
            .iter()
            .filter_map(|p| match p {
                Payload::Morsel(m) => Some(m),
                Payload::Eos => None,
            })
            .flat_map(|m| {
                let column = m.column(9).unwrap();
                column
                    .as_any()
                    .downcast_ref::<Int64Array>()
                    .unwrap()
                    .values()
                    .to_vec()
            })
            .collect()
    }

    #[test]
    fn rows_replicate_per_element() {
        let mut unnest = UnnestOperator::new(
            UnnestSource::Column(ColumnRef::new(2, "moons")),
            target(),
            false,
            None,
            false,
            list_schema(),
        );
        let out = unnest.step(list_morsel(), Leg::Only).unwrap();
        assert_eq!(values_of(&out), vec![1, 2, 2, 3]);
        let Payload::Morsel(m) = &out[0] else {
            panic!("expected a morsel")
        };
        // empty and null arrays contribute no rows
        assert_eq!(m.num_rows(), 4);
        let names = m.column(1).unwrap();
        let names = names.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(names.value(0), "a");
        assert_eq!(names.value(2), "d");
    }

    #[test]
    fn distinct_mode_suppresses_duplicates_across_morsels() {
        let mut unnest = UnnestOperator::new(
            UnnestSource::Column(ColumnRef::new(2, "moons")),
            target(),
            true,
            None,
            true,
            list_schema(),
        );
        let out = unnest.step(list_morsel(), Leg::Only).unwrap();
        assert_eq!(values_of(&out), vec![1, 2, 3]);
        // a second morsel sees the same set
        let out = unnest.step(list_morsel(), Leg::Only).unwrap();
        assert!(out.is_empty());
    }

    #[test]
    fn inline_conditions_filter_elements() {
        let mut unnest = UnnestOperator::new(
            UnnestSource::Column(ColumnRef::new(2, "moons")),
            target(),
            false,
            Some(vec![Value::Int64(2)]),
            false,
            list_schema(),
        );
        let out = unnest.step(list_morsel(), Leg::Only).unwrap();
        assert_eq!(values_of(&out), vec![2, 2]);
    }

    #[test]
    fn literal_sources_tile_per_row() {
        let schema = RelationSchema::new(vec![ColumnDef::new(1, "name", DataType::Utf8)]);
        let batch = RecordBatch::try_new(
            schema.to_physical_schema(),
            vec![Arc::new(StringArray::from(vec!["x", "y"]))],
        )
        .unwrap();
        let morsel = Payload::Morsel(Morsel::new(schema.clone(), batch).unwrap());
        let mut unnest = UnnestOperator::new(
            UnnestSource::Literal(vec![Value::Int64(10), Value::Int64(20)]),
            target(),
            false,
            None,
            false,
            schema,
        );
        let out = unnest.step(morsel, Leg::Only).unwrap();
        assert_eq!(values_of(&out), vec![10, 20, 10, 20]);
    }

    #[test]
    fn single_column_short_circuits_replication() {
        let mut unnest = UnnestOperator::new(
            UnnestSource::Column(ColumnRef::new(2, "moons")),
            target(),
            false,
            None,
            true,
            list_schema(),
        );
        assert_eq!(unnest.schema().len(), 1);
        let out = unnest.step(list_morsel(), Leg::Only).unwrap();
        assert_eq!(values_of(&out), vec![1, 2, 2, 3]);
    }
}
