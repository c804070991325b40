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

//! Projection: select, reorder and compute columns. Unused input columns
//! are never materialized; plain column references are pass-through.

use arrow::record_batch::RecordBatch;
use kestrel_common::error::Result;
use kestrel_expr::expr::Expr;
use kestrel_expr::schema::RelationSchema;

use crate::evaluator::Evaluator;
use crate::execution::morsel::{Morsel, Payload};
use crate::operators::{Leg, PhysicalOperator};

pub struct ProjectOperator {
    exprs: Vec<Expr>,
    schema: RelationSchema,
    evaluator: Evaluator,
}

impl ProjectOperator {
    pub fn new(exprs: Vec<Expr>, schema: RelationSchema, evaluator: Evaluator) -> Self {
        Self {
            exprs,
            schema,
            evaluator,
        }
    }
}

impl PhysicalOperator for ProjectOperator {
    fn name(&self) -> &'static str {
        "PROJECT"
    }

    fn config(&self) -> String {
        let names: Vec<String> = self
            .schema
            .columns()
            .iter()
            .map(|c| c.name.clone())
            .collect();
        format!("({})", names.join(", "))
    }

    fn schema(&self) -> &RelationSchema {
        &self.schema
    }

    fn step(&mut self, payload: Payload, _leg: Leg) -> Result<Vec<Payload>> {
        match payload {
            Payload::Eos => Ok(vec![Payload::Eos]),
            Payload::Morsel(morsel) => {
                let mut columns = Vec::with_capacity(self.exprs.len());
                for expr in &self.exprs {
                    columns.push(self.evaluator.evaluate(expr, &morsel)?);
                }
                let batch =
                    RecordBatch::try_new(self.schema.to_physical_schema(), columns)?;
                Ok(vec![Payload::Morsel(Morsel::new(
                    self.schema.clone(),
                    batch,
                )?)])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::Int64Array;
    use arrow::datatypes::DataType;
    use kestrel_expr::expr::Operator;
    use kestrel_expr::registry::FunctionRegistry;
    use kestrel_expr::schema::ColumnDef;
    use kestrel_expr::value::Value;

    use super::*;

    #[test]
    fn computed_columns_evaluate_per_row() {
        let input_schema = RelationSchema::new(vec![ColumnDef::new(1, "id", DataType::Int64)]);
        let batch = RecordBatch::try_new(
            input_schema.to_physical_schema(),
            vec![Arc::new(Int64Array::from(vec![1, 2, 3]))],
        )
        .unwrap();
        let morsel = Morsel::new(input_schema, batch).unwrap();

        let output_schema = RelationSchema::new(vec![
            ColumnDef::new(1, "id", DataType::Int64),
            ColumnDef::new(9, "id_plus_one", DataType::Int64),
        ]);
        let mut project = ProjectOperator::new(
            vec![
                Expr::column(1, "id"),
                Expr::binary(
                    Expr::column(1, "id"),
                    Operator::Plus,
                    Expr::literal(Value::Int64(1)),
                ),
            ],
            output_schema,
            Evaluator::new(Arc::new(FunctionRegistry::standard())),
        );

        let out = project.step(Payload::Morsel(morsel), Leg::Only).unwrap();
        let Payload::Morsel(out) = &out[0] else {
            panic!("expected a morsel")
        };
        let computed = out.column(9).unwrap();
        let computed = computed.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(computed.values(), &[2, 3, 4]);
    }
}
