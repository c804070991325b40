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

//! Constant folding: evaluate deterministic literal subtrees at plan time.
//!
//! Volatile functions (`NOW`, `RANDOM`) are left in place. Boolean folding
//! follows Kleene logic, so `NULL OR TRUE` folds to `TRUE` and `NULL AND
//! TRUE` folds to `NULL`.

use std::cell::Cell;
use std::cmp::Ordering;

use kestrel_common::error::Result;
use kestrel_expr::expr::{Expr, Operator};
use kestrel_expr::logical::{LogicalNode, LogicalPlan};
use kestrel_expr::registry::FunctionRegistry;
use kestrel_expr::value::Value;

use crate::{OptimizerContext, OptimizerStrategy};

pub struct ConstantFolding;

impl OptimizerStrategy for ConstantFolding {
    fn name(&self) -> &'static str {
        "constant_folding"
    }

    fn optimize(&self, mut plan: LogicalPlan, ctx: &mut OptimizerContext) -> Result<LogicalPlan> {
        let registry = ctx.registry.clone();
        let folds = Cell::new(0u64);
        for id in plan.graph.nodes() {
            let Some(node) = plan.graph.node_mut(&id) else {
                continue;
            };
            match node {
                LogicalNode::Filter(filter) => {
                    filter.predicate = fold_expr(filter.predicate.clone(), &registry, &folds);
                }
                LogicalNode::Project(project) => {
                    let exprs = std::mem::take(&mut project.exprs);
                    project.exprs = exprs
                        .into_iter()
                        .map(|e| fold_expr(e, &registry, &folds))
                        .collect();
                }
                _ => {}
            }
        }
        for _ in 0..folds.get() {
            ctx.bump("optimization_constant_fold");
        }
        Ok(plan)
    }
}

fn fold_expr(expr: Expr, registry: &FunctionRegistry, folds: &Cell<u64>) -> Expr {
    expr.transform(&|node| match fold_once(&node, registry) {
        Some(folded) => {
            folds.set(folds.get() + 1);
            Expr::Literal(folded)
        }
        None => node,
    })
}

/// Try to fold one node whose children are already folded. Returns the
/// literal result, or None when the node is not a foldable constant.
fn fold_once(expr: &Expr, registry: &FunctionRegistry) -> Option<Value> {
    match expr {
        Expr::BinaryOp { left, op, right } => {
            let (Expr::Literal(left), Expr::Literal(right)) = (left.as_ref(), right.as_ref())
            else {
                return fold_boolean_shortcut(expr);
            };
            fold_binary(left, *op, right)
        }
        Expr::Not(inner) => match inner.as_ref() {
            Expr::Literal(Value::Boolean(v)) => Some(Value::Boolean(!v)),
            Expr::Literal(Value::Null) => Some(Value::Null),
            _ => None,
        },
        Expr::Negative(inner) => match inner.as_ref() {
            Expr::Literal(Value::Int64(v)) => Some(Value::Int64(-v)),
            Expr::Literal(Value::Float64(v)) => Some(Value::Float64(-v)),
            Expr::Literal(Value::Null) => Some(Value::Null),
            _ => None,
        },
        Expr::IsNull(inner) => match inner.as_ref() {
            Expr::Literal(value) => Some(Value::Boolean(value.is_null())),
            _ => None,
        },
        Expr::IsNotNull(inner) => match inner.as_ref() {
            Expr::Literal(value) => Some(Value::Boolean(!value.is_null())),
            _ => None,
        },
        Expr::IsTrue(inner) => fold_is(inner, Some(true), false),
        Expr::IsNotTrue(inner) => fold_is(inner, Some(true), true),
        Expr::IsFalse(inner) => fold_is(inner, Some(false), false),
        Expr::IsNotFalse(inner) => fold_is(inner, Some(false), true),
        Expr::Function { name, args } => {
            // impure functions must never fold
            if registry.is_volatile(name) {
                return None;
            }
            if !args.iter().all(|a| matches!(a, Expr::Literal(_))) {
                return None;
            }
            // literal-argument scalar calls are folded through the kernel
            let entry = registry.resolve(name, args.len()).ok()?;
            let arrays: Vec<_> = args
                .iter()
                .filter_map(|a| match a {
                    Expr::Literal(value) => value.to_array(1).ok(),
                    _ => None,
                })
                .collect();
            let result = (entry.kernel)(&arrays, 1).ok()?;
            Value::try_from_array(result.as_ref(), 0).ok()
        }
        _ => None,
    }
}

fn fold_is(inner: &Expr, wanted: Option<bool>, negated: bool) -> Option<Value> {
    let Expr::Literal(value) = inner else {
        return None;
    };
    let actual = match value {
        Value::Boolean(v) => Some(*v),
        Value::Null => None,
        _ => return None,
    };
    let result = actual == wanted;
    Some(Value::Boolean(result != negated))
}

/// Kleene shortcuts where only one side is literal: `x AND FALSE` is FALSE,
/// `x OR TRUE` is TRUE. The dual cases (`x AND TRUE`, `x OR FALSE`) reduce
/// to `x` only when `x` is boolean-typed, which is not provable here, so
/// they are left alone.
fn fold_boolean_shortcut(expr: &Expr) -> Option<Value> {
    let Expr::BinaryOp { left, op, right } = expr else {
        return None;
    };
    let literal = |e: &Expr| match e {
        Expr::Literal(Value::Boolean(v)) => Some(Some(*v)),
        Expr::Literal(Value::Null) => Some(None),
        _ => None,
    };
    match op {
        Operator::And => {
            let side = literal(left).or_else(|| literal(right))?;
            if side == Some(false) {
                return Some(Value::Boolean(false));
            }
            None
        }
        Operator::Or => {
            let side = literal(left).or_else(|| literal(right))?;
            if side == Some(true) {
                return Some(Value::Boolean(true));
            }
            None
        }
        _ => None,
    }
}

fn fold_binary(left: &Value, op: Operator, right: &Value) -> Option<Value> {
    match op {
        Operator::And | Operator::Or => fold_kleene(left, op, right),
        Operator::Eq
        | Operator::NotEq
        | Operator::Lt
        | Operator::LtEq
        | Operator::Gt
        | Operator::GtEq => {
            if left.is_null() || right.is_null() {
                // x OP NULL is NULL for any comparator
                return Some(Value::Null);
            }
            let ordering = left.partial_cmp_sql(right)?;
            let result = match op {
                Operator::Eq => ordering == Ordering::Equal,
                Operator::NotEq => ordering != Ordering::Equal,
                Operator::Lt => ordering == Ordering::Less,
                Operator::LtEq => ordering != Ordering::Greater,
                Operator::Gt => ordering == Ordering::Greater,
                Operator::GtEq => ordering != Ordering::Less,
                _ => return None,
            };
            Some(Value::Boolean(result))
        }
        Operator::Plus | Operator::Minus | Operator::Multiply | Operator::Divide
        | Operator::Modulo => {
            if left.is_null() || right.is_null() {
                return Some(Value::Null);
            }
            fold_arithmetic(left, op, right)
        }
        _ => None,
    }
}

fn fold_kleene(left: &Value, op: Operator, right: &Value) -> Option<Value> {
    let as_tristate = |value: &Value| match value {
        Value::Boolean(v) => Some(Some(*v)),
        Value::Null => Some(None),
        _ => None,
    };
    let left = as_tristate(left)?;
    let right = as_tristate(right)?;
    let result = match op {
        Operator::And => match (left, right) {
            (Some(false), _) | (_, Some(false)) => Some(false),
            (Some(true), Some(true)) => Some(true),
            _ => None,
        },
        Operator::Or => match (left, right) {
            (Some(true), _) | (_, Some(true)) => Some(true),
            (Some(false), Some(false)) => Some(false),
            _ => None,
        },
        _ => return None,
    };
    Some(match result {
        Some(v) => Value::Boolean(v),
        None => Value::Null,
    })
}

fn fold_arithmetic(left: &Value, op: Operator, right: &Value) -> Option<Value> {
    // integer pairs stay integral, everything else promotes to float
    if let (Some(l), Some(r)) = (left.as_i64(), right.as_i64()) {
        let folded = match op {
            Operator::Plus => l.checked_add(r),
            Operator::Minus => l.checked_sub(r),
            Operator::Multiply => l.checked_mul(r),
            Operator::Divide => {
                if r == 0 {
                    return None;
                }
                l.checked_div(r)
            }
            Operator::Modulo => {
                if r == 0 {
                    return None;
                }
                l.checked_rem(r)
            }
            _ => None,
        };
        return folded.map(Value::Int64);
    }
    let l = left.as_f64()?;
    let r = right.as_f64()?;
    let folded = match op {
        Operator::Plus => l + r,
        Operator::Minus => l - r,
        Operator::Multiply => l * r,
        Operator::Divide => l / r,
        Operator::Modulo => l % r,
        _ => return None,
    };
    Some(Value::Float64(folded))
}
