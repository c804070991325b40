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

//! Typed expression trees.
//!
//! Column references are resolved to stable identities at bind time; the
//! display name rides along only for EXPLAIN and error messages. The
//! `Display` rendering here is the exact surface the plan-text assertions
//! read, e.g. `id > 4`.

use std::fmt;

use crate::schema::ColumnId;
use crate::value::Value;

/// Binary operators over expressions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Operator {
    Eq,
    NotEq,
    Lt,
    LtEq,
    Gt,
    GtEq,
    Plus,
    Minus,
    Multiply,
    Divide,
    Modulo,
    And,
    Or,
    Like,
    NotLike,
    ILike,
    NotILike,
}

impl Operator {
    /// True for the comparison subset that yields booleans.
    pub fn is_comparison(&self) -> bool {
        matches!(
            self,
            Operator::Eq
                | Operator::NotEq
                | Operator::Lt
                | Operator::LtEq
                | Operator::Gt
                | Operator::GtEq
                | Operator::Like
                | Operator::NotLike
                | Operator::ILike
                | Operator::NotILike
        )
    }

    /// Mirror of the operator with sides swapped: `a < b` ⇔ `b > a`.
    pub fn swap(&self) -> Option<Operator> {
        Some(match self {
            Operator::Eq => Operator::Eq,
            Operator::NotEq => Operator::NotEq,
            Operator::Lt => Operator::Gt,
            Operator::LtEq => Operator::GtEq,
            Operator::Gt => Operator::Lt,
            Operator::GtEq => Operator::LtEq,
            _ => return None,
        })
    }
}

impl fmt::Display for Operator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let symbol = match self {
            Operator::Eq => "=",
            Operator::NotEq => "!=",
            Operator::Lt => "<",
            Operator::LtEq => "<=",
            Operator::Gt => ">",
            Operator::GtEq => ">=",
            Operator::Plus => "+",
            Operator::Minus => "-",
            Operator::Multiply => "*",
            Operator::Divide => "/",
            Operator::Modulo => "%",
            Operator::And => "AND",
            Operator::Or => "OR",
            Operator::Like => "LIKE",
            Operator::NotLike => "NOT LIKE",
            Operator::ILike => "ILIKE",
            Operator::NotILike => "NOT ILIKE",
        };
        write!(f, "{symbol}")
    }
}

/// Aggregate function kinds supported by the group-by core.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AggregateKind {
    Count,
    CountDistinct,
    Sum,
    Min,
    Max,
    Avg,
    /// Stable representative of a group, the GROUP BY ALL helper.
    HashOne,
}

impl AggregateKind {
    pub fn name(&self) -> &'static str {
        match self {
            AggregateKind::Count => "COUNT",
            AggregateKind::CountDistinct => "COUNT_DISTINCT",
            AggregateKind::Sum => "SUM",
            AggregateKind::Min => "MIN",
            AggregateKind::Max => "MAX",
            AggregateKind::Avg => "AVG",
            AggregateKind::HashOne => "HASH_ONE",
        }
    }

    /// Whether the aggregate's result depends on input ordering.
    pub fn requires_ordered_input(&self) -> bool {
        false
    }
}

/// A typed expression tree node.
#[derive(Debug, Clone, PartialEq)]
pub enum Expr {
    /// Resolved column reference; `name` is display-only.
    Column { id: ColumnId, name: String },
    Literal(Value),
    BinaryOp {
        left: Box<Expr>,
        op: Operator,
        right: Box<Expr>,
    },
    Not(Box<Expr>),
    Negative(Box<Expr>),
    IsNull(Box<Expr>),
    IsNotNull(Box<Expr>),
    IsTrue(Box<Expr>),
    IsNotTrue(Box<Expr>),
    IsFalse(Box<Expr>),
    IsNotFalse(Box<Expr>),
    InList {
        expr: Box<Expr>,
        list: Vec<Expr>,
        negated: bool,
    },
    Case {
        /// `CASE <operand> WHEN ...`; None for the searched form.
        operand: Option<Box<Expr>>,
        when_then: Vec<(Expr, Expr)>,
        else_expr: Option<Box<Expr>>,
    },
    /// Scalar function call, resolved against the registry at bind time.
    Function { name: String, args: Vec<Expr> },
    /// Aggregate call; only valid in aggregate positions.
    Aggregate {
        kind: AggregateKind,
        /// None for COUNT(*).
        arg: Option<Box<Expr>>,
        distinct: bool,
    },
}

impl Expr {
    pub fn column(id: ColumnId, name: impl Into<String>) -> Self {
        Expr::Column {
            id,
            name: name.into(),
        }
    }

    pub fn literal(value: Value) -> Self {
        Expr::Literal(value)
    }

    pub fn binary(left: Expr, op: Operator, right: Expr) -> Self {
        Expr::BinaryOp {
            left: Box::new(left),
            op,
            right: Box::new(right),
        }
    }

    pub fn and(left: Expr, right: Expr) -> Self {
        Expr::binary(left, Operator::And, right)
    }

    pub fn or(left: Expr, right: Expr) -> Self {
        Expr::binary(left, Operator::Or, right)
    }

    /// Fold a list of conjuncts into one AND tree; None for an empty list.
    pub fn conjunction(exprs: impl IntoIterator<Item = Expr>) -> Option<Expr> {
        exprs.into_iter().reduce(Expr::and)
    }

    /// Every column identity referenced anywhere in this tree.
    pub fn column_ids(&self) -> Vec<ColumnId> {
        let mut ids = Vec::new();
        self.collect_columns(&mut ids);
        ids
    }

    fn collect_columns(&self, ids: &mut Vec<ColumnId>) {
        match self {
            Expr::Column { id, .. } => {
                if !ids.contains(id) {
                    ids.push(*id);
                }
            }
            Expr::Literal(_) => {}
            Expr::BinaryOp { left, right, .. } => {
                left.collect_columns(ids);
                right.collect_columns(ids);
            }
            Expr::Not(inner)
            | Expr::Negative(inner)
            | Expr::IsNull(inner)
            | Expr::IsNotNull(inner)
            | Expr::IsTrue(inner)
            | Expr::IsNotTrue(inner)
            | Expr::IsFalse(inner)
            | Expr::IsNotFalse(inner) => inner.collect_columns(ids),
            Expr::InList { expr, list, .. } => {
                expr.collect_columns(ids);
                for item in list {
                    item.collect_columns(ids);
                }
            }
            Expr::Case {
                operand,
                when_then,
                else_expr,
            } => {
                if let Some(operand) = operand {
                    operand.collect_columns(ids);
                }
                for (when, then) in when_then {
                    when.collect_columns(ids);
                    then.collect_columns(ids);
                }
                if let Some(else_expr) = else_expr {
                    else_expr.collect_columns(ids);
                }
            }
            Expr::Function { args, .. } => {
                for arg in args {
                    arg.collect_columns(ids);
                }
            }
            Expr::Aggregate { arg, .. } => {
                if let Some(arg) = arg {
                    arg.collect_columns(ids);
                }
            }
        }
    }

    /// True when any node in the tree is an aggregate call.
    pub fn contains_aggregate(&self) -> bool {
        match self {
            Expr::Aggregate { .. } => true,
            Expr::Column { .. } | Expr::Literal(_) => false,
            Expr::BinaryOp { left, right, .. } => {
                left.contains_aggregate() || right.contains_aggregate()
            }
            Expr::Not(inner)
            | Expr::Negative(inner)
            | Expr::IsNull(inner)
            | Expr::IsNotNull(inner)
            | Expr::IsTrue(inner)
            | Expr::IsNotTrue(inner)
            | Expr::IsFalse(inner)
            | Expr::IsNotFalse(inner) => inner.contains_aggregate(),
            Expr::InList { expr, list, .. } => {
                expr.contains_aggregate() || list.iter().any(Expr::contains_aggregate)
            }
            Expr::Case {
                operand,
                when_then,
                else_expr,
            } => {
                operand.as_deref().is_some_and(Expr::contains_aggregate)
                    || when_then
                        .iter()
                        .any(|(w, t)| w.contains_aggregate() || t.contains_aggregate())
                    || else_expr.as_deref().is_some_and(Expr::contains_aggregate)
            }
            Expr::Function { args, .. } => args.iter().any(Expr::contains_aggregate),
        }
    }

    /// Rewrite the tree bottom-up through `rewriter`.
    pub fn transform(self, rewriter: &impl Fn(Expr) -> Expr) -> Expr {
        let mapped = match self {
            Expr::BinaryOp { left, op, right } => Expr::BinaryOp {
                left: Box::new(left.transform(rewriter)),
                op,
                right: Box::new(right.transform(rewriter)),
            },
            Expr::Not(inner) => Expr::Not(Box::new(inner.transform(rewriter))),
            Expr::Negative(inner) => Expr::Negative(Box::new(inner.transform(rewriter))),
            Expr::IsNull(inner) => Expr::IsNull(Box::new(inner.transform(rewriter))),
            Expr::IsNotNull(inner) => Expr::IsNotNull(Box::new(inner.transform(rewriter))),
            Expr::IsTrue(inner) => Expr::IsTrue(Box::new(inner.transform(rewriter))),
            Expr::IsNotTrue(inner) => Expr::IsNotTrue(Box::new(inner.transform(rewriter))),
            Expr::IsFalse(inner) => Expr::IsFalse(Box::new(inner.transform(rewriter))),
            Expr::IsNotFalse(inner) => Expr::IsNotFalse(Box::new(inner.transform(rewriter))),
            Expr::InList {
                expr,
                list,
                negated,
            } => Expr::InList {
                expr: Box::new(expr.transform(rewriter)),
                list: list.into_iter().map(|e| e.transform(rewriter)).collect(),
                negated,
            },
            Expr::Case {
                operand,
                when_then,
                else_expr,
            } => Expr::Case {
                operand: operand.map(|o| Box::new(o.transform(rewriter))),
                when_then: when_then
                    .into_iter()
                    .map(|(w, t)| (w.transform(rewriter), t.transform(rewriter)))
                    .collect(),
                else_expr: else_expr.map(|e| Box::new(e.transform(rewriter))),
            },
            Expr::Function { name, args } => Expr::Function {
                name,
                args: args.into_iter().map(|a| a.transform(rewriter)).collect(),
            },
            Expr::Aggregate {
                kind,
                arg,
                distinct,
            } => Expr::Aggregate {
                kind,
                arg: arg.map(|a| Box::new(a.transform(rewriter))),
                distinct,
            },
            leaf => leaf,
        };
        rewriter(mapped)
    }
}

impl fmt::Display for Expr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Expr::Column { name, .. } => write!(f, "{name}"),
            Expr::Literal(value) => write!(f, "{value}"),
            Expr::BinaryOp { left, op, right } => match op {
                Operator::And | Operator::Or => write!(f, "({left} {op} {right})"),
                _ => write!(f, "{left} {op} {right}"),
            },
            Expr::Not(inner) => write!(f, "NOT {inner}"),
            Expr::Negative(inner) => write!(f, "-{inner}"),
            Expr::IsNull(inner) => write!(f, "{inner} IS NULL"),
            Expr::IsNotNull(inner) => write!(f, "{inner} IS NOT NULL"),
            Expr::IsTrue(inner) => write!(f, "{inner} IS TRUE"),
            Expr::IsNotTrue(inner) => write!(f, "{inner} IS NOT TRUE"),
            Expr::IsFalse(inner) => write!(f, "{inner} IS FALSE"),
            Expr::IsNotFalse(inner) => write!(f, "{inner} IS NOT FALSE"),
            Expr::InList {
                expr,
                list,
                negated,
            } => {
                let keyword = if *negated { "NOT IN" } else { "IN" };
                write!(f, "{expr} {keyword} (")?;
                for (i, item) in list.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{item}")?;
                }
                write!(f, ")")
            }
            Expr::Case {
                operand,
                when_then,
                else_expr,
            } => {
                write!(f, "CASE")?;
                if let Some(operand) = operand {
                    write!(f, " {operand}")?;
                }
                for (when, then) in when_then {
                    write!(f, " WHEN {when} THEN {then}")?;
                }
                if let Some(else_expr) = else_expr {
                    write!(f, " ELSE {else_expr}")?;
                }
                write!(f, " END")
            }
            Expr::Function { name, args } => {
                write!(f, "{name}(")?;
                for (i, arg) in args.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{arg}")?;
                }
                write!(f, ")")
            }
            Expr::Aggregate {
                kind,
                arg,
                distinct,
            } => {
                let distinct = if *distinct { "DISTINCT " } else { "" };
                match arg {
                    Some(arg) => write!(f, "{}({distinct}{arg})", kind.name()),
                    None => write!(f, "{}(*)", kind.name()),
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn display_matches_plan_text_assertions() {
        let expr = Expr::binary(
            Expr::column(3, "id"),
            Operator::Gt,
            Expr::literal(Value::Int64(4)),
        );
        assert_eq!(expr.to_string(), "id > 4");

        let range = Expr::and(
            Expr::binary(
                Expr::column(5, "planetId"),
                Operator::GtEq,
                Expr::literal(Value::Int64(1)),
            ),
            Expr::binary(
                Expr::column(5, "planetId"),
                Operator::LtEq,
                Expr::literal(Value::Int64(9)),
            ),
        );
        assert_eq!(range.to_string(), "(planetId >= 1 AND planetId <= 9)");
    }

    #[test]
    fn column_collection_deduplicates() {
        let expr = Expr::and(
            Expr::binary(
                Expr::column(1, "id"),
                Operator::Gt,
                Expr::literal(Value::Int64(1)),
            ),
            Expr::binary(
                Expr::column(1, "id"),
                Operator::Lt,
                Expr::literal(Value::Int64(9)),
            ),
        );
        assert_eq!(expr.column_ids(), vec![1]);
    }

    #[test]
    fn aggregate_detection_sees_through_nesting() {
        let expr = Expr::binary(
            Expr::Aggregate {
                kind: AggregateKind::Count,
                arg: None,
                distinct: false,
            },
            Operator::Gt,
            Expr::literal(Value::Int64(5)),
        );
        assert!(expr.contains_aggregate());
        assert!(!Expr::column(1, "id").contains_aggregate());
    }

    #[test]
    fn operator_swap_mirrors_comparisons() {
        assert_eq!(Operator::Lt.swap(), Some(Operator::Gt));
        assert_eq!(Operator::GtEq.swap(), Some(Operator::LtEq));
        assert_eq!(Operator::Eq.swap(), Some(Operator::Eq));
        assert_eq!(Operator::Plus.swap(), None);
    }
}
