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

//! Join operators.
//!
//! Hash join for equi-joins with a moderate build side, nested-loop for
//! tiny build sides (both bloom-prefiltered), a comparator nested-loop for
//! non-equi conditions, CROSS JOIN UNNEST for array explosion, and a
//! buffered fallback join for the outer/semi/anti shapes.

use arrow::array::UInt64Array;
use arrow::record_batch::RecordBatch;
use kestrel_common::error::Result;
use kestrel_expr::schema::RelationSchema;

use crate::execution::morsel::Morsel;

pub mod fallback;
pub mod hash_join;
pub mod nested_loop;
pub mod non_equi;
pub mod unnest;

pub use fallback::FallbackJoinOperator;
pub use hash_join::HashJoinOperator;
pub use nested_loop::NestedLoopJoinOperator;
pub use non_equi::NonEquiJoinOperator;
pub use unnest::UnnestOperator;

/// Materialize aligned (left_row, right_row) pairs against the stored
/// tables. `None` on either side produces a null-extended row.
pub fn align_tables(
    schema: &RelationSchema,
    left: &RecordBatch,
    right: &RecordBatch,
    left_rows: &[Option<i64>],
    right_rows: &[Option<i64>],
) -> Result<Morsel> {
    let left_indices: UInt64Array = left_rows.iter().map(|i| i.map(|i| i as u64)).collect();
    let right_indices: UInt64Array = right_rows.iter().map(|i| i.map(|i| i as u64)).collect();

    let mut columns = Vec::with_capacity(left.num_columns() + right.num_columns());
    for column in left.columns() {
        columns.push(arrow::compute::take(column, &left_indices, None)?);
    }
    for column in right.columns() {
        columns.push(arrow::compute::take(column, &right_indices, None)?);
    }
    let batch = RecordBatch::try_new(schema.to_physical_schema(), columns)?;
    Morsel::new(schema.clone(), batch)
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::{Array, Int64Array, StringArray};
    use arrow::datatypes::DataType;
    use kestrel_expr::schema::ColumnDef;

    use super::*;

    #[test]
    fn alignment_null_extends_missing_sides() {
        let left_schema = RelationSchema::new(vec![ColumnDef::new(1, "id", DataType::Int64)]);
        let right_schema =
            RelationSchema::new(vec![ColumnDef::new(2, "name", DataType::Utf8)]);
        let combined = left_schema.join(&right_schema, false, true);

        let left = RecordBatch::try_new(
            left_schema.to_physical_schema(),
            vec![Arc::new(Int64Array::from(vec![10, 20]))],
        )
        .unwrap();
        let right = RecordBatch::try_new(
            right_schema.to_physical_schema(),
            vec![Arc::new(StringArray::from(vec!["Io", "Europa"]))],
        )
        .unwrap();

        let morsel = align_tables(
            &combined,
            &left,
            &right,
            &[Some(0), Some(1)],
            &[Some(1), None],
        )
        .unwrap();
        assert_eq!(morsel.num_rows(), 2);
        let names = morsel.column(2).unwrap();
        let names = names.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(names.value(0), "Europa");
        assert!(names.is_null(1));
    }
}
