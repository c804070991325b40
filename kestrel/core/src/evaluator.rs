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

//! Vectorized expression evaluation.
//!
//! Expressions are walked bottom-up; every internal node dispatches to an
//! Arrow compute kernel. Three-valued logic throughout: comparisons with
//! NULL yield NULL, AND/OR use the Kleene kernels, `IS [NOT] TRUE/FALSE/
//! NULL` are total, and COALESCE/IFNULL/NULLIF and CASE short-circuit via
//! masks. `WHERE` coerces NULL to false at the filter boundary, not here.

use std::sync::Arc;

use arrow::array::*;
use arrow::compute::kernels::numeric;
use arrow::compute::kernels::zip::zip;
use arrow::compute::{and_kleene, cast, is_not_null, is_null, not, or_kleene};
use arrow::datatypes::DataType;
use kestrel_common::error::{Error, Result};
use kestrel_expr::expr::{Expr, Operator};
use kestrel_expr::registry::FunctionRegistry;
use kestrel_expr::value::Value;

use crate::execution::morsel::Morsel;

/// Evaluates expression trees against morsels.
pub struct Evaluator {
    registry: Arc<FunctionRegistry>,
}

impl Evaluator {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self { registry }
    }

    /// Evaluate an expression to one array of `morsel.num_rows()` values.
    pub fn evaluate(&self, expr: &Expr, morsel: &Morsel) -> Result<ArrayRef> {
        let num_rows = morsel.num_rows();
        match expr {
            Expr::Column { id, .. } => morsel.column(*id),
            Expr::Literal(value) => value.to_array(num_rows),
            Expr::BinaryOp { left, op, right } => {
                let left = self.evaluate(left, morsel)?;
                let right = self.evaluate(right, morsel)?;
                self.binary(left, *op, right)
            }
            Expr::Not(inner) => {
                let inner = self.evaluate(inner, morsel)?;
                let inner = as_boolean(&inner)?;
                Ok(Arc::new(not(&inner)?))
            }
            Expr::Negative(inner) => {
                let inner = self.evaluate(inner, morsel)?;
                Ok(numeric::neg(inner.as_ref())?)
            }
            Expr::IsNull(inner) => {
                let inner = self.evaluate(inner, morsel)?;
                Ok(Arc::new(is_null(&inner)?))
            }
            Expr::IsNotNull(inner) => {
                let inner = self.evaluate(inner, morsel)?;
                Ok(Arc::new(is_not_null(&inner)?))
            }
            Expr::IsTrue(inner) => self.is_bool(inner, morsel, true, false),
            Expr::IsNotTrue(inner) => self.is_bool(inner, morsel, true, true),
            Expr::IsFalse(inner) => self.is_bool(inner, morsel, false, false),
            Expr::IsNotFalse(inner) => self.is_bool(inner, morsel, false, true),
            Expr::InList {
                expr,
                list,
                negated,
            } => self.in_list(expr, list, *negated, morsel),
            Expr::Case {
                operand,
                when_then,
                else_expr,
            } => self.case(operand.as_deref(), when_then, else_expr.as_deref(), morsel),
            Expr::Function { name, args } => self.function(name, args, morsel),
            Expr::Aggregate { .. } => Err(Error::Internal(
                "aggregate expressions must be lowered before evaluation".to_string(),
            )),
        }
    }

    /// Evaluate a predicate for `WHERE`: NULL coerces to false.
    pub fn evaluate_predicate(&self, expr: &Expr, morsel: &Morsel) -> Result<BooleanArray> {
        let values = self.evaluate(expr, morsel)?;
        let values = as_boolean(&values)?;
        Ok((0..values.len())
            .map(|i| Some(values.is_valid(i) && values.value(i)))
            .collect())
    }

    fn binary(&self, left: ArrayRef, op: Operator, right: ArrayRef) -> Result<ArrayRef> {
        match op {
            Operator::And => {
                let left = as_boolean(&left)?;
                let right = as_boolean(&right)?;
                Ok(Arc::new(and_kleene(&left, &right)?))
            }
            Operator::Or => {
                let left = as_boolean(&left)?;
                let right = as_boolean(&right)?;
                Ok(Arc::new(or_kleene(&left, &right)?))
            }
            Operator::Eq
            | Operator::NotEq
            | Operator::Lt
            | Operator::LtEq
            | Operator::Gt
            | Operator::GtEq => {
                let (left, right) = coerce_pair(left, right)?;
                let result = match op {
                    Operator::Eq => arrow_ord::cmp::eq(&left, &right)?,
                    Operator::NotEq => arrow_ord::cmp::neq(&left, &right)?,
                    Operator::Lt => arrow_ord::cmp::lt(&left, &right)?,
                    Operator::LtEq => arrow_ord::cmp::lt_eq(&left, &right)?,
                    Operator::Gt => arrow_ord::cmp::gt(&left, &right)?,
                    Operator::GtEq => arrow_ord::cmp::gt_eq(&left, &right)?,
                    _ => unreachable!(),
                };
                Ok(Arc::new(result))
            }
            Operator::Like | Operator::NotLike | Operator::ILike | Operator::NotILike => {
                let left = cast(&left, &DataType::Utf8)?;
                let right = cast(&right, &DataType::Utf8)?;
                let result = match op {
                    Operator::Like => arrow_string::like::like(&left, &right)?,
                    Operator::NotLike => {
                        arrow_string::like::nlike(&left, &right)?
                    }
                    Operator::ILike => {
                        arrow_string::like::ilike(&left, &right)?
                    }
                    Operator::NotILike => {
                        arrow_string::like::nilike(&left, &right)?
                    }
                    _ => unreachable!(),
                };
                Ok(Arc::new(result))
            }
            Operator::Plus
            | Operator::Minus
            | Operator::Multiply
            | Operator::Divide
            | Operator::Modulo => {
                let (left, right) = coerce_pair(left, right)?;
                let result = match op {
                    Operator::Plus => numeric::add(&left, &right)?,
                    Operator::Minus => numeric::sub(&left, &right)?,
                    Operator::Multiply => numeric::mul(&left, &right)?,
                    Operator::Divide => numeric::div(&left, &right)?,
                    Operator::Modulo => numeric::rem(&left, &right)?,
                    _ => unreachable!(),
                };
                Ok(result)
            }
        }
    }

    /// `x IS TRUE` and friends: total functions, never NULL.
    fn is_bool(
        &self,
        inner: &Expr,
        morsel: &Morsel,
        wanted: bool,
        negated: bool,
    ) -> Result<ArrayRef> {
        let values = self.evaluate(inner, morsel)?;
        let values = as_boolean(&values)?;
        let result: BooleanArray = (0..values.len())
            .map(|i| {
                let matches = values.is_valid(i) && values.value(i) == wanted;
                Some(matches != negated)
            })
            .collect();
        Ok(Arc::new(result))
    }

    /// `x IN (…)`: OR of equalities with SQL null semantics; a NULL item
    /// turns misses into NULL, and `NOT IN` is the Kleene negation.
    fn in_list(
        &self,
        expr: &Expr,
        list: &[Expr],
        negated: bool,
        morsel: &Morsel,
    ) -> Result<ArrayRef> {
        let needle = self.evaluate(expr, morsel)?;
        let num_rows = morsel.num_rows();
        let mut acc: Option<BooleanArray> = None;
        let mut has_null_item = false;
        for item in list {
            if matches!(item, Expr::Literal(Value::Null)) {
                has_null_item = true;
                continue;
            }
            let item = self.evaluate(item, morsel)?;
            let (left, right) = coerce_pair(needle.clone(), item)?;
            let matches = arrow_ord::cmp::eq(&left, &right)?;
            acc = Some(match acc {
                Some(previous) => or_kleene(&previous, &matches)?,
                None => matches,
            });
        }
        let mut result = match acc {
            Some(result) => result,
            None => BooleanArray::from(vec![Some(false); num_rows]),
        };
        if has_null_item {
            // a NULL element means "maybe": false results become NULL
            let maybe = BooleanArray::new_null(num_rows);
            result = or_kleene(&result, &maybe)?;
        }
        if negated {
            result = not(&result)?;
        }
        Ok(Arc::new(result))
    }

    fn case(
        &self,
        operand: Option<&Expr>,
        when_then: &[(Expr, Expr)],
        else_expr: Option<&Expr>,
        morsel: &Morsel,
    ) -> Result<ArrayRef> {
        let num_rows = morsel.num_rows();
        let operand = operand
            .map(|operand| self.evaluate(operand, morsel))
            .transpose()?;

        // evaluate branches and layer them back to front
        let mut result: Option<ArrayRef> = else_expr
            .map(|else_expr| self.evaluate(else_expr, morsel))
            .transpose()?;
        for (when, then) in when_then.iter().rev() {
            let condition = match &operand {
                Some(operand) => {
                    let when = self.evaluate(when, morsel)?;
                    let (left, right) = coerce_pair(operand.clone(), when)?;
                    arrow_ord::cmp::eq(&left, &right)?
                }
                None => {
                    let when = self.evaluate(when, morsel)?;
                    as_boolean(&when)?
                }
            };
            // NULL conditions never take the branch
            let mask: BooleanArray = (0..num_rows)
                .map(|i| Some(condition.is_valid(i) && condition.value(i)))
                .collect();
            let then = self.evaluate(then, morsel)?;
            result = Some(match result {
                Some(fallback) => {
                    let (then, fallback) = coerce_pair(then, fallback)?;
                    zip(&mask, &then, &fallback)?
                }
                None => {
                    let nulls = new_null_array(then.data_type(), num_rows);
                    zip(&mask, &then, &nulls)?
                }
            });
        }
        result.ok_or_else(|| Error::InvalidSyntax("CASE with no branches".to_string()))
    }

    fn function(&self, name: &str, args: &[Expr], morsel: &Morsel) -> Result<ArrayRef> {
        let num_rows = morsel.num_rows();
        // null-steering functions short-circuit instead of dispatching
        match name.to_uppercase().as_str() {
            "COALESCE" | "IFNULL" => {
                let mut result: Option<ArrayRef> = None;
                for arg in args {
                    let arg = self.evaluate(arg, morsel)?;
                    result = Some(match result {
                        None => arg,
                        Some(previous) => {
                            let missing = is_null(&previous)?;
                            let (arg, previous) = coerce_pair(arg, previous)?;
                            zip(&missing, &arg, &previous)?
                        }
                    });
                }
                return result
                    .ok_or_else(|| Error::InvalidSyntax(format!("{name} needs arguments")));
            }
            "NULLIF" => {
                if args.len() != 2 {
                    return Err(Error::InvalidSyntax(
                        "NULLIF takes exactly two arguments".to_string(),
                    ));
                }
                let left = self.evaluate(&args[0], morsel)?;
                let right = self.evaluate(&args[1], morsel)?;
                let (first, second) = coerce_pair(left.clone(), right)?;
                let equal = arrow_ord::cmp::eq(&first, &second)?;
                let mask: BooleanArray = (0..num_rows)
                    .map(|i| Some(equal.is_valid(i) && equal.value(i)))
                    .collect();
                let nulls = new_null_array(left.data_type(), num_rows);
                return Ok(zip(&mask, &nulls, &left)?);
            }
            _ => {}
        }

        let entry = self.registry.resolve(name, args.len())?;
        let mut evaluated = Vec::with_capacity(args.len());
        for arg in args {
            evaluated.push(self.evaluate(arg, morsel)?);
        }
        (entry.kernel)(&evaluated, num_rows)
    }
}

/// View an array as booleans; an all-NULL untyped array casts through.
fn as_boolean(array: &ArrayRef) -> Result<BooleanArray> {
    let array = if array.data_type() == &DataType::Null {
        cast(array, &DataType::Boolean)?
    } else {
        array.clone()
    };
    array
        .as_any()
        .downcast_ref::<BooleanArray>()
        .cloned()
        .ok_or_else(|| {
            Error::InvalidSyntax(format!(
                "expected a boolean expression, got {}",
                array.data_type()
            ))
        })
}

/// Bring two arrays to one comparable type, mirroring SQL's implicit
/// numeric promotion.
fn coerce_pair(left: ArrayRef, right: ArrayRef) -> Result<(ArrayRef, ArrayRef)> {
    let target = common_type(left.data_type(), right.data_type())?;
    let left = if left.data_type() == &target {
        left
    } else {
        cast(&left, &target)?
    };
    let right = if right.data_type() == &target {
        right
    } else {
        cast(&right, &target)?
    };
    Ok((left, right))
}

fn common_type(left: &DataType, right: &DataType) -> Result<DataType> {
    use DataType::*;
    if left == right {
        return Ok(left.clone());
    }
    if left == &Null {
        return Ok(right.clone());
    }
    if right == &Null {
        return Ok(left.clone());
    }

    let numeric_rank = |dt: &DataType| -> Option<u8> {
        match dt {
            Int8 | Int16 | Int32 | Int64 => Some(1),
            UInt8 | UInt16 | UInt32 => Some(1),
            UInt64 => Some(2),
            Decimal128(_, _) => Some(3),
            Float32 | Float64 => Some(4),
            _ => None,
        }
    };
    if let (Some(left_rank), Some(right_rank)) = (numeric_rank(left), numeric_rank(right)) {
        let rank = left_rank.max(right_rank);
        return Ok(match rank {
            1 => Int64,
            2 => {
                // Int64 vs UInt64 widens through float to keep totality
                if numeric_rank(left) != numeric_rank(right) {
                    Float64
                } else {
                    UInt64
                }
            }
            _ => Float64,
        });
    }
    match (left, right) {
        (Utf8, LargeUtf8) | (LargeUtf8, Utf8) => Ok(Utf8),
        (Utf8, Boolean) | (Boolean, Utf8) => Ok(Utf8),
        (Date32, Timestamp(unit, zone)) | (Timestamp(unit, zone), Date32) => {
            Ok(Timestamp(*unit, zone.clone()))
        }
        _ => Err(Error::UnsupportedSyntax(format!(
            "no comparison between {left} and {right}"
        ))),
    }
}

#[cfg(test)]
mod tests {
    use arrow::record_batch::RecordBatch;
    use kestrel_expr::schema::{ColumnDef, RelationSchema};

    use super::*;

    fn tristate_morsel() -> Morsel {
        let schema = RelationSchema::new(vec![ColumnDef::new(1, "v", DataType::Boolean)]);
        let batch = RecordBatch::try_new(
            schema.to_physical_schema(),
            vec![Arc::new(BooleanArray::from(vec![
                Some(true),
                Some(false),
                None,
            ]))],
        )
        .unwrap();
        Morsel::new(schema, batch).unwrap()
    }

    fn evaluator() -> Evaluator {
        Evaluator::new(Arc::new(FunctionRegistry::standard()))
    }

    fn booleans(array: &ArrayRef) -> Vec<Option<bool>> {
        array
            .as_any()
            .downcast_ref::<BooleanArray>()
            .unwrap()
            .iter()
            .collect()
    }

    #[test]
    fn is_not_true_keeps_false_and_null() {
        // the battery case: WHERE v IS NOT TRUE → {false, null}
        let morsel = tristate_morsel();
        let expr = Expr::IsNotTrue(Box::new(Expr::column(1, "v")));
        let result = evaluator().evaluate(&expr, &morsel).unwrap();
        assert_eq!(
            booleans(&result),
            vec![Some(false), Some(true), Some(true)]
        );
    }

    #[test]
    fn where_coerces_null_to_false() {
        let morsel = tristate_morsel();
        let mask = evaluator()
            .evaluate_predicate(&Expr::column(1, "v"), &morsel)
            .unwrap();
        assert_eq!(
            mask.iter().collect::<Vec<_>>(),
            vec![Some(true), Some(false), Some(false)]
        );
    }

    #[test]
    fn null_or_true_is_true() {
        let morsel = tristate_morsel();
        let expr = Expr::or(
            Expr::literal(Value::Null),
            Expr::literal(Value::Boolean(true)),
        );
        let result = evaluator().evaluate(&expr, &morsel).unwrap();
        assert_eq!(booleans(&result), vec![Some(true); 3]);

        let expr = Expr::and(
            Expr::literal(Value::Null),
            Expr::literal(Value::Boolean(true)),
        );
        let result = evaluator().evaluate(&expr, &morsel).unwrap();
        assert_eq!(booleans(&result), vec![None; 3]);
    }

    #[test]
    fn comparing_with_null_yields_null() {
        let morsel = tristate_morsel();
        let expr = Expr::binary(
            Expr::column(1, "v"),
            Operator::Eq,
            Expr::literal(Value::Null),
        );
        let result = evaluator().evaluate(&expr, &morsel).unwrap();
        assert_eq!(booleans(&result), vec![None, None, None]);
    }

    #[test]
    fn in_list_with_null_item_follows_sql() {
        let schema = RelationSchema::new(vec![ColumnDef::new(1, "n", DataType::Int64)]);
        let batch = RecordBatch::try_new(
            schema.to_physical_schema(),
            vec![Arc::new(Int64Array::from(vec![Some(1), Some(5), None]))],
        )
        .unwrap();
        let morsel = Morsel::new(schema, batch).unwrap();

        // n IN (1, NULL): 1 → true, 5 → NULL, NULL → NULL
        let expr = Expr::InList {
            expr: Box::new(Expr::column(1, "n")),
            list: vec![
                Expr::literal(Value::Int64(1)),
                Expr::literal(Value::Null),
            ],
            negated: false,
        };
        let result = evaluator().evaluate(&expr, &morsel).unwrap();
        assert_eq!(booleans(&result), vec![Some(true), None, None]);

        // n NOT IN (1, 2): true only for non-null misses
        let expr = Expr::InList {
            expr: Box::new(Expr::column(1, "n")),
            list: vec![
                Expr::literal(Value::Int64(1)),
                Expr::literal(Value::Int64(2)),
            ],
            negated: true,
        };
        let result = evaluator().evaluate(&expr, &morsel).unwrap();
        assert_eq!(booleans(&result), vec![Some(false), Some(true), None]);
    }

    #[test]
    fn case_short_circuits_in_order() {
        let schema = RelationSchema::new(vec![ColumnDef::new(1, "n", DataType::Int64)]);
        let batch = RecordBatch::try_new(
            schema.to_physical_schema(),
            vec![Arc::new(Int64Array::from(vec![1, 2, 3]))],
        )
        .unwrap();
        let morsel = Morsel::new(schema, batch).unwrap();

        let expr = Expr::Case {
            operand: None,
            when_then: vec![
                (
                    Expr::binary(
                        Expr::column(1, "n"),
                        Operator::Lt,
                        Expr::literal(Value::Int64(2)),
                    ),
                    Expr::literal(Value::Utf8("small".into())),
                ),
                (
                    Expr::binary(
                        Expr::column(1, "n"),
                        Operator::Lt,
                        Expr::literal(Value::Int64(3)),
                    ),
                    Expr::literal(Value::Utf8("medium".into())),
                ),
            ],
            else_expr: Some(Box::new(Expr::literal(Value::Utf8("large".into())))),
        };
        let result = evaluator().evaluate(&expr, &morsel).unwrap();
        let result = result.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(result.value(0), "small");
        assert_eq!(result.value(1), "medium");
        assert_eq!(result.value(2), "large");
    }

    #[test]
    fn coalesce_takes_the_first_non_null() {
        let schema = RelationSchema::new(vec![ColumnDef::new(1, "n", DataType::Int64)]);
        let batch = RecordBatch::try_new(
            schema.to_physical_schema(),
            vec![Arc::new(Int64Array::from(vec![Some(7), None]))],
        )
        .unwrap();
        let morsel = Morsel::new(schema, batch).unwrap();

        let expr = Expr::Function {
            name: "COALESCE".to_string(),
            args: vec![Expr::column(1, "n"), Expr::literal(Value::Int64(42))],
        };
        let result = evaluator().evaluate(&expr, &morsel).unwrap();
        let result = result.as_any().downcast_ref::<Int64Array>().unwrap();
        assert_eq!(result.value(0), 7);
        assert_eq!(result.value(1), 42);
    }

    #[test]
    fn mixed_numerics_compare_after_promotion() {
        let schema = RelationSchema::new(vec![ColumnDef::new(1, "n", DataType::Int64)]);
        let batch = RecordBatch::try_new(
            schema.to_physical_schema(),
            vec![Arc::new(Int64Array::from(vec![3, 4]))],
        )
        .unwrap();
        let morsel = Morsel::new(schema, batch).unwrap();
        let expr = Expr::binary(
            Expr::column(1, "n"),
            Operator::Gt,
            Expr::literal(Value::Float64(3.5)),
        );
        let result = evaluator().evaluate(&expr, &morsel).unwrap();
        assert_eq!(booleans(&result), vec![Some(false), Some(true)]);
    }
}
