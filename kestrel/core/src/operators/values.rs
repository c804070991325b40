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

//! VALUES: a source operator over literal rows. Also carries SHOW output,
//! which is just a pre-rendered literal relation.

use std::sync::Arc;

use arrow::array::*;
use arrow::datatypes::{DataType, TimeUnit};
use arrow::record_batch::RecordBatch;
use kestrel_common::error::{Error, Result};
use kestrel_expr::schema::RelationSchema;
use kestrel_expr::value::Value;

use crate::execution::morsel::{Morsel, Payload};
use crate::operators::{Leg, PhysicalOperator};

pub struct ValuesOperator {
    rows: Vec<Vec<Value>>,
    schema: RelationSchema,
    emitted: bool,
    done: bool,
}

impl ValuesOperator {
    pub fn new(rows: Vec<Vec<Value>>, schema: RelationSchema) -> Self {
        Self {
            rows,
            schema,
            emitted: false,
            done: false,
        }
    }
}

impl PhysicalOperator for ValuesOperator {
    fn name(&self) -> &'static str {
        "VALUES"
    }

    fn config(&self) -> String {
        format!("({} rows)", self.rows.len())
    }

    fn schema(&self) -> &RelationSchema {
        &self.schema
    }

    fn is_source(&self) -> bool {
        true
    }

    fn pump(&mut self) -> Result<Payload> {
        if self.done {
            return Ok(Payload::Eos);
        }
        if self.emitted || self.rows.is_empty() {
            self.done = true;
            return Ok(Payload::Eos);
        }
        self.emitted = true;

        // SELECT without FROM binds as zero columns and one row
        if self.schema.is_empty() {
            let options =
                arrow::record_batch::RecordBatchOptions::new().with_row_count(Some(self.rows.len()));
            let batch = RecordBatch::try_new_with_options(
                self.schema.to_physical_schema(),
                vec![],
                &options,
            )?;
            return Ok(Payload::Morsel(Morsel::new(self.schema.clone(), batch)?));
        }

        let mut columns = Vec::with_capacity(self.schema.len());
        for (ordinal, column) in self.schema.columns().iter().enumerate() {
            let cells: Vec<Value> = self
                .rows
                .iter()
                .map(|row| row.get(ordinal).cloned().unwrap_or(Value::Null))
                .collect();
            columns.push(build_array(&cells, &column.data_type)?);
        }
        let batch = RecordBatch::try_new(self.schema.to_physical_schema(), columns)?;
        Ok(Payload::Morsel(Morsel::new(self.schema.clone(), batch)?))
    }

    fn step(&mut self, _payload: Payload, _leg: Leg) -> Result<Vec<Payload>> {
        Err(Error::Internal("values operators are never stepped".to_string()))
    }
}

/// Build one typed array from scalar cells, null-filling mismatches.
pub fn build_array(cells: &[Value], data_type: &DataType) -> Result<ArrayRef> {
    Ok(match data_type {
        DataType::Null => new_null_array(&DataType::Null, cells.len()),
        DataType::Boolean => Arc::new(
            cells
                .iter()
                .map(|v| v.as_bool())
                .collect::<BooleanArray>(),
        ),
        DataType::Int64 => Arc::new(cells.iter().map(|v| v.as_i64()).collect::<Int64Array>()),
        DataType::UInt64 => Arc::new(
            cells
                .iter()
                .map(|v| match v {
                    Value::UInt64(v) => Some(*v),
                    Value::Int64(v) => u64::try_from(*v).ok(),
                    _ => None,
                })
                .collect::<UInt64Array>(),
        ),
        DataType::Float64 => Arc::new(
            cells
                .iter()
                .map(|v| if v.is_null() { None } else { v.as_f64() })
                .collect::<Float64Array>(),
        ),
        DataType::Utf8 => Arc::new(
            cells
                .iter()
                .map(|v| match v {
                    Value::Utf8(s) => Some(s.clone()),
                    _ => None,
                })
                .collect::<StringArray>(),
        ),
        DataType::Binary => {
            let owned: Vec<Option<&[u8]>> = cells
                .iter()
                .map(|v| match v {
                    Value::Binary(b) => Some(b.as_slice()),
                    _ => None,
                })
                .collect();
            Arc::new(BinaryArray::from_opt_vec(owned))
        }
        DataType::Date32 => Arc::new(
            cells
                .iter()
                .map(|v| match v {
                    Value::Date32(d) => Some(*d),
                    _ => None,
                })
                .collect::<Date32Array>(),
        ),
        DataType::Timestamp(TimeUnit::Microsecond, _) => Arc::new(
            cells
                .iter()
                .map(|v| match v {
                    Value::TimestampMicros(t) => Some(*t),
                    _ => None,
                })
                .collect::<TimestampMicrosecondArray>(),
        ),
        other => {
            return Err(Error::UnsupportedSyntax(format!(
                "literal rows of type {other} are not supported"
            )))
        }
    })
}

#[cfg(test)]
mod tests {
    use kestrel_expr::schema::ColumnDef;

    use super::*;

    #[test]
    fn values_emit_once_then_eos() {
        let schema = RelationSchema::new(vec![ColumnDef::new(1, "v", DataType::Boolean)]);
        let mut values = ValuesOperator::new(
            vec![
                vec![Value::Boolean(true)],
                vec![Value::Boolean(false)],
                vec![Value::Null],
            ],
            schema,
        );
        let Payload::Morsel(morsel) = values.pump().unwrap() else {
            panic!("expected a morsel")
        };
        assert_eq!(morsel.num_rows(), 3);
        assert!(morsel.batch().column(0).is_null(2));
        assert!(matches!(values.pump().unwrap(), Payload::Eos));
    }

    #[test]
    fn empty_values_emit_only_eos() {
        let schema = RelationSchema::new(vec![ColumnDef::new(1, "v", DataType::Int64)]);
        let mut values = ValuesOperator::new(vec![], schema);
        assert!(matches!(values.pump().unwrap(), Payload::Eos));
    }

    #[test]
    fn mixed_integers_promote_through_as_i64() {
        let array = build_array(
            &[Value::Int64(1), Value::Null, Value::Int64(-3)],
            &DataType::Int64,
        )
        .unwrap();
        let array = array.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(array.iter().collect::<Vec<_>>(), vec![Some(1), None, Some(-3)]);
    }
}
