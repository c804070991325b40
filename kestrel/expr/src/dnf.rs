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

//! Flat DNF predicates and their simplification.
//!
//! A filter in disjunctive normal form is a list of clauses; each clause is
//! an AND-list of `(column, op, value)` triples. Scans accept predicates in
//! this shape, and the simplifier below deduplicates, absorbs and factors
//! them into a canonical tree:
//!
//! * dedup: identical predicates within a clause, identical clauses in the
//!   DNF, keep one;
//! * absorption: a clause that is a superset of another clause is redundant;
//! * factoring: the largest predicate group common to every clause of a
//!   subset is pulled into a shared AND-prefix, recursively.
//!
//! Factoring is greedy with deterministic ties, and idempotent.

use std::collections::BTreeSet;
use std::fmt;

use indexmap::IndexMap;
use itertools::Itertools;

use crate::expr::{Expr, Operator};
use crate::schema::ColumnId;
use crate::value::Value;

/// Canonical comparison set for DNF triples. The declaration order is the
/// canonical predicate order within a clause: equalities, then lower
/// bounds, then upper bounds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum CmpOp {
    Eq,
    NotEq,
    Gt,
    GtEq,
    Lt,
    LtEq,
    Like,
    NotLike,
}

impl CmpOp {
    pub fn from_operator(op: Operator) -> Option<CmpOp> {
        Some(match op {
            Operator::Eq => CmpOp::Eq,
            Operator::NotEq => CmpOp::NotEq,
            Operator::Lt => CmpOp::Lt,
            Operator::LtEq => CmpOp::LtEq,
            Operator::Gt => CmpOp::Gt,
            Operator::GtEq => CmpOp::GtEq,
            Operator::Like => CmpOp::Like,
            Operator::NotLike => CmpOp::NotLike,
            _ => return None,
        })
    }

    pub fn to_operator(self) -> Operator {
        match self {
            CmpOp::Eq => Operator::Eq,
            CmpOp::NotEq => Operator::NotEq,
            CmpOp::Lt => Operator::Lt,
            CmpOp::LtEq => Operator::LtEq,
            CmpOp::Gt => Operator::Gt,
            CmpOp::GtEq => Operator::GtEq,
            CmpOp::Like => Operator::Like,
            CmpOp::NotLike => Operator::NotLike,
        }
    }
}

impl fmt::Display for CmpOp {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.to_operator())
    }
}

/// One `(column, op, value)` triple.
#[derive(Debug, Clone, PartialEq)]
pub struct Predicate {
    pub column: ColumnId,
    /// Display name for plan rendering.
    pub column_name: String,
    pub op: CmpOp,
    pub value: Value,
}

impl Predicate {
    pub fn new(column: ColumnId, column_name: impl Into<String>, op: CmpOp, value: Value) -> Self {
        Self {
            column,
            column_name: column_name.into(),
            op,
            value,
        }
    }

    /// Deterministic identity and ordering key.
    pub fn key(&self) -> (ColumnId, CmpOp, String) {
        (self.column, self.op, self.value.to_string())
    }

    /// The equivalent expression tree.
    pub fn to_expr(&self) -> Expr {
        Expr::binary(
            Expr::column(self.column, self.column_name.clone()),
            self.op.to_operator(),
            Expr::literal(self.value.clone()),
        )
    }
}

impl fmt::Display for Predicate {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} {} {}", self.column_name, self.op, self.value)
    }
}

/// An AND-list of predicates.
pub type Clause = Vec<Predicate>;

/// Canonical simplification output: a tree of AND/OR over predicate
/// clauses, with factored common prefixes.
#[derive(Debug, Clone, PartialEq)]
pub enum DnfExpr {
    /// AND of the contained predicates.
    Clause(Clause),
    /// OR of the branches.
    Or(Vec<DnfExpr>),
    /// `common AND (rest)`, the factored form.
    Factored { common: Clause, rest: Box<DnfExpr> },
}

impl DnfExpr {
    /// Distribute back to flat DNF clauses.
    pub fn to_clauses(&self) -> Vec<Clause> {
        match self {
            DnfExpr::Clause(clause) => vec![clause.clone()],
            DnfExpr::Or(branches) => branches.iter().flat_map(|b| b.to_clauses()).collect(),
            DnfExpr::Factored { common, rest } => rest
                .to_clauses()
                .into_iter()
                .map(|mut clause| {
                    let mut merged = common.clone();
                    merged.append(&mut clause);
                    merged
                })
                .collect(),
        }
    }

    /// The equivalent expression tree, for filter operators and EXPLAIN.
    pub fn to_expr(&self) -> Option<Expr> {
        match self {
            DnfExpr::Clause(clause) => {
                Expr::conjunction(clause.iter().map(Predicate::to_expr))
            }
            DnfExpr::Or(branches) => branches
                .iter()
                .filter_map(DnfExpr::to_expr)
                .reduce(Expr::or),
            DnfExpr::Factored { common, rest } => {
                let common = Expr::conjunction(common.iter().map(Predicate::to_expr));
                match (common, rest.to_expr()) {
                    (Some(common), Some(rest)) => Some(Expr::and(common, rest)),
                    (Some(common), None) => Some(common),
                    (None, rest) => rest,
                }
            }
        }
    }
}

impl fmt::Display for DnfExpr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DnfExpr::Clause(clause) => {
                for (i, predicate) in clause.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{predicate}")?;
                }
                Ok(())
            }
            DnfExpr::Or(branches) => {
                for (i, branch) in branches.iter().enumerate() {
                    if i > 0 {
                        write!(f, " OR ")?;
                    }
                    write!(f, "({branch})")?;
                }
                Ok(())
            }
            DnfExpr::Factored { common, rest } => {
                for (i, predicate) in common.iter().enumerate() {
                    if i > 0 {
                        write!(f, " AND ")?;
                    }
                    write!(f, "{predicate}")?;
                }
                write!(f, " AND ({rest})")
            }
        }
    }
}

/// Normalize flat DNF clauses: dedup predicates within each clause, order
/// them deterministically, drop empty clauses, dedup identical clauses.
pub fn normalise(clauses: Vec<Clause>) -> Vec<Clause> {
    let mut seen_clauses: BTreeSet<Vec<(ColumnId, CmpOp, String)>> = BTreeSet::new();
    let mut out = Vec::new();
    for clause in clauses {
        let mut unique: IndexMap<(ColumnId, CmpOp, String), Predicate> = IndexMap::new();
        for predicate in clause {
            unique.entry(predicate.key()).or_insert(predicate);
        }
        if unique.is_empty() {
            continue;
        }
        let mut predicates: Vec<Predicate> = unique.into_values().collect();
        predicates.sort_by(|a, b| a.key().cmp(&b.key()));
        let signature: Vec<_> = predicates.iter().map(Predicate::key).collect();
        if seen_clauses.insert(signature) {
            out.push(predicates);
        }
    }
    out
}

/// Simplify flat DNF clauses into a canonical tree. Returns None when the
/// input reduces to no restriction at all.
pub fn simplify(clauses: Vec<Clause>) -> Option<DnfExpr> {
    let clauses = normalise(clauses);
    if clauses.is_empty() {
        return None;
    }

    // unique predicate table, ordered by key; clauses become index sets
    let mut table: Vec<Predicate> = Vec::new();
    let mut index_of: IndexMap<(ColumnId, CmpOp, String), usize> = IndexMap::new();
    for clause in &clauses {
        for predicate in clause {
            index_of.entry(predicate.key()).or_insert_with(|| {
                table.push(predicate.clone());
                table.len() - 1
            });
        }
    }
    // re-number so that index order == key order, keeping ties deterministic
    let mut order: Vec<usize> = (0..table.len()).collect();
    order.sort_by(|a, b| table[*a].key().cmp(&table[*b].key()));
    let mut rank = vec![0usize; table.len()];
    for (new_index, old_index) in order.iter().enumerate() {
        rank[*old_index] = new_index;
    }
    let mut sorted_table = table.clone();
    sorted_table.sort_by(|a, b| a.key().cmp(&b.key()));

    let index_sets: Vec<BTreeSet<usize>> = clauses
        .iter()
        .map(|clause| {
            clause
                .iter()
                .map(|p| rank[index_of[&p.key()]])
                .collect::<BTreeSet<usize>>()
        })
        .collect();

    // absorption: a clause that is a superset of another is redundant
    let absorbed: Vec<BTreeSet<usize>> = index_sets
        .iter()
        .filter(|clause| {
            !index_sets
                .iter()
                .any(|other| other != *clause && other.is_subset(clause))
        })
        .cloned()
        .collect();
    if absorbed.is_empty() {
        return None;
    }

    Some(factor_clauses(&absorbed, &sorted_table))
}

/// Greedy factoring with deterministic ties: pull the largest predicate
/// group shared by the most clauses into a common AND-prefix, recurse on
/// the residuals.
fn factor_clauses(clauses: &[BTreeSet<usize>], table: &[Predicate]) -> DnfExpr {
    let to_clause = |set: &BTreeSet<usize>| -> Clause {
        set.iter().map(|i| table[*i].clone()).collect()
    };

    if clauses.len() == 1 {
        return DnfExpr::Clause(to_clause(&clauses[0]));
    }

    // predicate frequencies across clauses
    let counts = clauses.iter().flatten().copied().counts();
    let max_freq = counts.values().copied().max().unwrap_or(0);
    if max_freq <= 1 {
        return DnfExpr::Or(clauses.iter().map(|c| DnfExpr::Clause(to_clause(c))).collect());
    }

    // group max-frequency predicates by identical support set (the clause
    // indices they appear in)
    let mut groups: IndexMap<BTreeSet<usize>, BTreeSet<usize>> = IndexMap::new();
    for predicate in counts
        .iter()
        .filter(|(_, count)| **count == max_freq)
        .map(|(predicate, _)| *predicate)
        .sorted()
    {
        let support: BTreeSet<usize> = clauses
            .iter()
            .positions(|clause| clause.contains(&predicate))
            .collect();
        groups.entry(support).or_default().insert(predicate);
    }

    // best group: most predicates, then lexicographically smallest
    let (signature, group) = groups
        .iter()
        .min_by(|(_, a), (_, b)| {
            b.len()
                .cmp(&a.len())
                .then_with(|| a.iter().collect::<Vec<_>>().cmp(&b.iter().collect::<Vec<_>>()))
        })
        .map(|(sig, group)| (sig.clone(), group.clone()))
        .expect("max_freq > 1 implies at least one group");

    let with_clauses: Vec<BTreeSet<usize>> = signature
        .iter()
        .map(|i| clauses[*i].clone())
        .collect();
    let without_clauses: Vec<BTreeSet<usize>> = clauses
        .iter()
        .enumerate()
        .filter(|(i, _)| !signature.contains(i))
        .map(|(_, c)| c.clone())
        .collect();

    let reduced_with: Vec<BTreeSet<usize>> = with_clauses
        .iter()
        .map(|clause| clause.difference(&group).copied().collect())
        .collect();

    let common: Clause = group.iter().map(|i| table[*i].clone()).collect();

    // common AND (TRUE OR …) collapses to just the common block
    if reduced_with.iter().all(|c| c.is_empty()) {
        if without_clauses.is_empty() {
            return DnfExpr::Clause(common);
        }
        let mut branches = vec![DnfExpr::Clause(common)];
        push_branches(&mut branches, factor_clauses(&without_clauses, table));
        return DnfExpr::Or(branches);
    }

    let survivors: Vec<BTreeSet<usize>> = reduced_with
        .into_iter()
        .filter(|c| !c.is_empty())
        .collect();
    let factored_with = DnfExpr::Factored {
        common,
        rest: Box::new(factor_clauses(&survivors, table)),
    };

    if without_clauses.is_empty() {
        return factored_with;
    }
    let mut branches = vec![factored_with];
    push_branches(&mut branches, factor_clauses(&without_clauses, table));
    DnfExpr::Or(branches)
}

fn push_branches(branches: &mut Vec<DnfExpr>, expr: DnfExpr) {
    match expr {
        DnfExpr::Or(items) => branches.extend(items),
        other => branches.push(other),
    }
}
