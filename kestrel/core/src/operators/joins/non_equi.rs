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

//! Non-equi nested-loop join: comparator in {!=, <, <=, >, >=}.
//!
//! Every (left, right) pair where both cells are non-null is evaluated
//! against the comparator. Output ordering is row-major over the left
//! side.

use std::cmp::Ordering;

use arrow::compute::concat_batches;
use arrow::record_batch::RecordBatch;
use kestrel_common::error::{Error, Result};
use kestrel_expr::expr::Operator;
use kestrel_expr::logical::ColumnRef;
use kestrel_expr::schema::RelationSchema;
use kestrel_expr::value::Value;

use crate::execution::morsel::{Morsel, Payload};
use crate::execution::stats::QueryStatistics;
use crate::operators::joins::align_tables;
use crate::operators::{Leg, PhysicalOperator};

pub struct NonEquiJoinOperator {
    left_key: ColumnRef,
    comparator: Operator,
    right_key: ColumnRef,
    schema: RelationSchema,
    left_schema: RelationSchema,
    right_schema: RelationSchema,
    build_buffer: Vec<RecordBatch>,
    build: Option<RecordBatch>,
    pending_probes: Vec<Morsel>,
    statistics: QueryStatistics,
}

impl NonEquiJoinOperator {
    pub fn new(
        left_key: ColumnRef,
        comparator: Operator,
        right_key: ColumnRef,
        left_schema: RelationSchema,
        right_schema: RelationSchema,
    ) -> Result<Self> {
        if !matches!(
            comparator,
            Operator::NotEq | Operator::Lt | Operator::LtEq | Operator::Gt | Operator::GtEq
        ) {
            return Err(Error::UnsupportedSyntax(format!(
                "comparator {comparator} is not valid for a non-equi join"
            )));
        }
        let schema = left_schema.join(&right_schema, false, false);
        Ok(Self {
            left_key,
            comparator,
            right_key,
            schema,
            left_schema,
            right_schema,
            build_buffer: Vec::new(),
            build: None,
            pending_probes: Vec::new(),
            statistics: QueryStatistics::new(),
        })
    }

    fn probe(&mut self, morsel: Morsel) -> Result<Option<Payload>> {
        let Some(table) = &self.build else {
            return Err(Error::Internal(
                "probe before non-equi join build".to_string(),
            ));
        };
        if table.num_rows() == 0 || morsel.num_rows() == 0 {
            return Ok(None);
        }
        let left_column = Morsel::new(self.left_schema.clone(), table.clone())?
            .column(self.left_key.id)?;
        let right_column = morsel.column(self.right_key.id)?;

        let mut left_rows: Vec<Option<i64>> = Vec::new();
        let mut right_rows: Vec<Option<i64>> = Vec::new();
        // row-major over the left side
        for left_row in 0..table.num_rows() {
            if left_column.is_null(left_row) {
                continue;
            }
            let left_value = Value::try_from_array(left_column.as_ref(), left_row)?;
            for right_row in 0..morsel.num_rows() {
                if right_column.is_null(right_row) {
                    continue;
                }
                let right_value = Value::try_from_array(right_column.as_ref(), right_row)?;
                if comparator_holds(self.comparator, &left_value, &right_value) {
                    left_rows.push(Some(left_row as i64));
                    right_rows.push(Some(right_row as i64));
                }
            }
        }
        if left_rows.is_empty() {
            return Ok(None);
        }
        self.statistics.add("rows_out", left_rows.len() as u64);
        let aligned = align_tables(
            &self.schema,
            table,
            morsel.batch(),
            &left_rows,
            &right_rows,
        )?;
        Ok(Some(Payload::Morsel(aligned)))
    }
}

fn comparator_holds(comparator: Operator, left: &Value, right: &Value) -> bool {
    let Some(ordering) = left.partial_cmp_sql(right) else {
        return false;
    };
    match comparator {
        Operator::NotEq => ordering != Ordering::Equal,
        Operator::Lt => ordering == Ordering::Less,
        Operator::LtEq => ordering != Ordering::Greater,
        Operator::Gt => ordering == Ordering::Greater,
        Operator::GtEq => ordering != Ordering::Less,
        _ => false,
    }
}

impl PhysicalOperator for NonEquiJoinOperator {
    fn name(&self) -> &'static str {
        "NON EQUI JOIN"
    }

    fn config(&self) -> String {
        format!(
            "({} {} {})",
            self.left_key, self.comparator, self.right_key
        )
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
                let table = concat_batches(
                    &self.left_schema.to_physical_schema(),
                    &self.build_buffer,
                )?;
                self.build_buffer.clear();
                self.build = Some(table);
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

    use arrow::array::Int64Array;
    use arrow::datatypes::DataType;
    use kestrel_expr::schema::ColumnDef;

    use super::*;

    #[test]
    fn value_greater_than_threshold_yields_six_pairs() {
        let left_schema =
            RelationSchema::new(vec![ColumnDef::new(1, "value", DataType::Int64)]);
        let right_schema =
            RelationSchema::new(vec![ColumnDef::new(2, "threshold", DataType::Int64)]);
        let mut join = NonEquiJoinOperator::new(
            ColumnRef::new(1, "value"),
            Operator::Gt,
            ColumnRef::new(2, "threshold"),
            left_schema.clone(),
            right_schema.clone(),
        )
        .unwrap();

        let left = RecordBatch::try_new(
            left_schema.to_physical_schema(),
            vec![Arc::new(Int64Array::from(vec![10, 20, 30, 40]))],
        )
        .unwrap();
        join.step(
            Payload::Morsel(Morsel::new(left_schema, left).unwrap()),
            Leg::Left,
        )
        .unwrap();
        join.step(Payload::Eos, Leg::Left).unwrap();

        let right = RecordBatch::try_new(
            right_schema.to_physical_schema(),
            vec![Arc::new(Int64Array::from(vec![15, 25, 35, 45]))],
        )
        .unwrap();
        let out = join
            .step(
                Payload::Morsel(Morsel::new(right_schema, right).unwrap()),
                Leg::Right,
            )
            .unwrap();
        let Payload::Morsel(out) = &out[0] else {
            panic!("expected a morsel")
        };

        let values = out.column(1).unwrap();
        let values = values.as_any().downcast_ref::<Int64Array>().unwrap();
        let thresholds = out.column(2).unwrap();
        let thresholds = thresholds.as_any().downcast_ref::<Int64Array>().unwrap();
        let pairs: Vec<(i64, i64)> = values
            .values()
            .iter()
            .zip(thresholds.values())
            .map(|(v, t)| (*v, *t))
            .collect();
        assert_eq!(
            pairs,
            vec![(20, 15), (30, 15), (30, 25), (40, 15), (40, 25), (40, 35)]
        );
    }

    #[test]
    fn equality_comparators_are_rejected() {
        let schema = RelationSchema::new(vec![ColumnDef::new(1, "v", DataType::Int64)]);
        assert!(NonEquiJoinOperator::new(
            ColumnRef::new(1, "v"),
            Operator::Eq,
            ColumnRef::new(1, "v"),
            schema.clone(),
            schema,
        )
        .is_err());
    }

    #[test]
    fn null_cells_never_pair() {
        let left_schema = RelationSchema::new(vec![ColumnDef::new(1, "v", DataType::Int64)]);
        let right_schema = RelationSchema::new(vec![ColumnDef::new(2, "t", DataType::Int64)]);
        let mut join = NonEquiJoinOperator::new(
            ColumnRef::new(1, "v"),
            Operator::NotEq,
            ColumnRef::new(2, "t"),
            left_schema.clone(),
            right_schema.clone(),
        )
        .unwrap();

        let left = RecordBatch::try_new(
            left_schema.to_physical_schema(),
            vec![Arc::new(Int64Array::from(vec![Some(1), None]))],
        )
        .unwrap();
        join.step(
            Payload::Morsel(Morsel::new(left_schema, left).unwrap()),
            Leg::Left,
        )
        .unwrap();
        join.step(Payload::Eos, Leg::Left).unwrap();

        let right = RecordBatch::try_new(
            right_schema.to_physical_schema(),
            vec![Arc::new(Int64Array::from(vec![Some(2), None]))],
        )
        .unwrap();
        let out = join
            .step(
                Payload::Morsel(Morsel::new(right_schema, right).unwrap()),
                Leg::Right,
            )
            .unwrap();
        let Payload::Morsel(out) = &out[0] else {
            panic!("expected a morsel")
        };
        // only (1, 2) qualifies
        assert_eq!(out.num_rows(), 1);
    }
}
