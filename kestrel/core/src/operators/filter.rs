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

//! Vectorized filter. NULL predicate results drop the row.

use arrow::compute::filter_record_batch;
use kestrel_common::error::Result;
use kestrel_expr::expr::Expr;
use kestrel_expr::schema::RelationSchema;

use crate::evaluator::Evaluator;
use crate::execution::morsel::{Morsel, Payload};
use crate::execution::stats::QueryStatistics;
use crate::operators::{Leg, PhysicalOperator};

pub struct FilterOperator {
    predicate: Expr,
    schema: RelationSchema,
    evaluator: Evaluator,
    statistics: QueryStatistics,
}

impl FilterOperator {
    pub fn new(predicate: Expr, schema: RelationSchema, evaluator: Evaluator) -> Self {
        Self {
            predicate,
            schema,
            evaluator,
            statistics: QueryStatistics::new(),
        }
    }
}

impl PhysicalOperator for FilterOperator {
    fn name(&self) -> &'static str {
        "FILTER"
    }

    fn config(&self) -> String {
        format!("({})", self.predicate)
    }

    fn schema(&self) -> &RelationSchema {
        &self.schema
    }

    fn step(&mut self, payload: Payload, _leg: Leg) -> Result<Vec<Payload>> {
        match payload {
            Payload::Eos => Ok(vec![Payload::Eos]),
            Payload::Morsel(morsel) => {
                self.statistics.add("rows_in", morsel.num_rows() as u64);
                let mask = self.evaluator.evaluate_predicate(&self.predicate, &morsel)?;
                let filtered = filter_record_batch(morsel.batch(), &mask)?;
                if filtered.num_rows() == 0 {
                    return Ok(vec![]);
                }
                self.statistics.add("rows_out", filtered.num_rows() as u64);
                Ok(vec![Payload::Morsel(Morsel::new(
                    self.schema.clone(),
                    filtered,
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

    use arrow::array::Int64Array;
    use arrow::datatypes::DataType;
    use arrow::record_batch::RecordBatch;
    use kestrel_expr::expr::Operator;
    use kestrel_expr::registry::FunctionRegistry;
    use kestrel_expr::schema::ColumnDef;
    use kestrel_expr::value::Value;

    use super::*;

    #[test]
    fn rows_failing_the_predicate_are_dropped() {
        let schema = RelationSchema::new(vec![ColumnDef::new(1, "id", DataType::Int64)]);
        let batch = RecordBatch::try_new(
            schema.to_physical_schema(),
            vec![Arc::new(Int64Array::from(vec![Some(3), Some(7), None]))],
        )
        .unwrap();
        let morsel = Morsel::new(schema.clone(), batch).unwrap();

        let mut filter = FilterOperator::new(
            Expr::binary(
                Expr::column(1, "id"),
                Operator::Gt,
                Expr::literal(Value::Int64(4)),
            ),
            schema,
            Evaluator::new(Arc::new(FunctionRegistry::standard())),
        );
        assert_eq!(filter.config(), "(id > 4)");

        let out = filter.step(Payload::Morsel(morsel), Leg::Only).unwrap();
        let Payload::Morsel(out) = &out[0] else {
            panic!("expected a morsel")
        };
        // the NULL row is dropped with the non-matching row
        assert_eq!(out.num_rows(), 1);
        assert_eq!(filter.statistics().get("rows_in"), 3);
        assert_eq!(filter.statistics().get("rows_out"), 1);
    }

    #[test]
    fn fully_filtered_morsels_vanish() {
        let schema = RelationSchema::new(vec![ColumnDef::new(1, "id", DataType::Int64)]);
        let batch = RecordBatch::try_new(
            schema.to_physical_schema(),
            vec![Arc::new(Int64Array::from(vec![1, 2]))],
        )
        .unwrap();
        let morsel = Morsel::new(schema.clone(), batch).unwrap();
        let mut filter = FilterOperator::new(
            Expr::literal(Value::Boolean(false)),
            schema,
            Evaluator::new(Arc::new(FunctionRegistry::standard())),
        );
        assert!(filter
            .step(Payload::Morsel(morsel), Leg::Only)
            .unwrap()
            .is_empty());
        assert!(matches!(
            filter.step(Payload::Eos, Leg::Only).unwrap()[0],
            Payload::Eos
        ));
    }
}
