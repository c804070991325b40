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

//! Statistics pruning: compare the literal predicates sitting on each scan
//! against the column bounds and null counts.
//!
//! Three outcomes per scan: provably empty (the physical scan emits a
//! single empty morsel), provably all-rows (the predicate is discarded),
//! or unchanged. Decisions are conservative: only exact type families
//! (integers, dates, timestamps, booleans) participate, and "all rows
//! pass" additionally requires a zero null count because a NULL comparison
//! never passes a WHERE.

use arrow::datatypes::DataType;
use kestrel_common::error::Result;
use kestrel_common::stats::RelationStatistics;
use kestrel_expr::dnf::{Clause, CmpOp, Predicate};
use kestrel_expr::logical::{LogicalNode, LogicalPlan, ScanNode};
use kestrel_expr::value::Value;
use log::debug;

use crate::{OptimizerContext, OptimizerStrategy};

pub struct StatisticsPruning;

impl OptimizerStrategy for StatisticsPruning {
    fn name(&self) -> &'static str {
        "statistics_pruning"
    }

    fn optimize(&self, mut plan: LogicalPlan, ctx: &mut OptimizerContext) -> Result<LogicalPlan> {
        for id in plan.graph.nodes() {
            let Some(LogicalNode::Scan(scan)) = plan.graph.node_mut(&id) else {
                continue;
            };
            if scan.predicates.is_empty() {
                continue;
            }
            match prune_scan(scan) {
                Outcome::Unchanged => {}
                Outcome::AllRows => {
                    debug!("scan of '{}' is provably all-rows", scan.dataset);
                    scan.predicates.clear();
                    ctx.bump("optimization_statistics_pruning");
                }
                Outcome::Empty => {
                    debug!("scan of '{}' is provably empty", scan.dataset);
                    scan.pruned_empty = true;
                    ctx.bump("optimization_statistics_pruning");
                }
                Outcome::Narrowed(clauses) => {
                    scan.predicates = clauses;
                    ctx.bump("optimization_statistics_pruning");
                }
            }
        }
        Ok(plan)
    }
}

enum Outcome {
    Unchanged,
    AllRows,
    Empty,
    Narrowed(Vec<Clause>),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Tri {
    True,
    False,
    Unknown,
}

fn prune_scan(scan: &ScanNode) -> Outcome {
    let mut changed = false;
    let mut kept_clauses: Vec<Clause> = Vec::with_capacity(scan.predicates.len());
    for clause in &scan.predicates {
        let mut kept: Clause = Vec::with_capacity(clause.len());
        let mut clause_false = false;
        for predicate in clause {
            match evaluate(predicate, scan, &scan.statistics) {
                Tri::True => changed = true,
                Tri::False => {
                    clause_false = true;
                    changed = true;
                    break;
                }
                Tri::Unknown => kept.push(predicate.clone()),
            }
        }
        if clause_false {
            continue;
        }
        if kept.is_empty() {
            // every predicate in the clause holds for every row, so the
            // whole disjunction is satisfied
            return Outcome::AllRows;
        }
        kept_clauses.push(kept);
    }
    if !changed {
        return Outcome::Unchanged;
    }
    if kept_clauses.is_empty() {
        return Outcome::Empty;
    }
    Outcome::Narrowed(kept_clauses)
}

/// Exact bound encodings only: these families round-trip through `to_int`
/// without loss.
fn exact_family(data_type: &DataType) -> bool {
    matches!(
        data_type,
        DataType::Int8
            | DataType::Int16
            | DataType::Int32
            | DataType::Int64
            | DataType::UInt8
            | DataType::UInt16
            | DataType::UInt32
            | DataType::UInt64
            | DataType::Boolean
            | DataType::Date32
            | DataType::Timestamp(_, _)
    )
}

fn exact_value(value: &Value) -> bool {
    matches!(
        value,
        Value::Int64(_)
            | Value::UInt64(_)
            | Value::Boolean(_)
            | Value::Date32(_)
            | Value::TimestampMicros(_)
    )
}

fn evaluate(predicate: &Predicate, scan: &ScanNode, stats: &RelationStatistics) -> Tri {
    let Some(column) = scan.schema.column_by_id(predicate.column) else {
        return Tri::Unknown;
    };
    if !exact_family(&column.data_type) || !exact_value(&predicate.value) {
        return Tri::Unknown;
    }
    let (Some(lower), Some(upper)) = (
        stats.lower_bound(predicate.column),
        stats.upper_bound(predicate.column),
    ) else {
        return Tri::Unknown;
    };
    let value = predicate.value.to_bound();
    let nulls = stats.null_count(predicate.column).unwrap_or(u64::MAX);

    // provably false: no row can satisfy the comparison
    let impossible = match predicate.op {
        CmpOp::Gt => upper <= value,
        CmpOp::GtEq => upper < value,
        CmpOp::Lt => lower >= value,
        CmpOp::LtEq => lower > value,
        CmpOp::Eq => value < lower || value > upper,
        CmpOp::NotEq => lower == upper && lower == value,
        _ => false,
    };
    if impossible {
        return Tri::False;
    }

    // provably true needs every row to pass, so nulls must be absent
    if nulls != 0 {
        return Tri::Unknown;
    }
    let certain = match predicate.op {
        CmpOp::Gt => lower > value,
        CmpOp::GtEq => lower >= value,
        CmpOp::Lt => upper < value,
        CmpOp::LtEq => upper <= value,
        CmpOp::Eq => lower == upper && lower == value,
        CmpOp::NotEq => value < lower || value > upper,
        _ => false,
    };
    if certain {
        Tri::True
    } else {
        Tri::Unknown
    }
}

#[cfg(test)]
mod tests {
    use arrow::datatypes::DataType;
    use kestrel_expr::schema::{ColumnDef, RelationSchema};

    use super::*;

    fn scan_with_bounds(lower: i64, upper: i64, nulls: u64, predicates: Vec<Clause>) -> ScanNode {
        let mut statistics = RelationStatistics::new();
        statistics.record_count = 9;
        statistics.update_lower(1, lower);
        statistics.update_upper(1, upper);
        statistics.add_null(1, nulls);
        ScanNode {
            dataset: "planets".into(),
            alias: None,
            schema: RelationSchema::new(vec![ColumnDef::new(1, "id", DataType::Int64)]),
            projection: None,
            predicates,
            limit: None,
            pruned_empty: false,
            statistics,
        }
    }

    fn pred(op: CmpOp, value: i64) -> Predicate {
        Predicate::new(1, "id", op, Value::Int64(value))
    }

    #[test]
    fn impossible_predicates_mark_the_scan_empty() {
        let scan = scan_with_bounds(1, 9, 0, vec![vec![pred(CmpOp::Gt, 9)]]);
        assert!(matches!(prune_scan(&scan), Outcome::Empty));

        let scan = scan_with_bounds(1, 9, 0, vec![vec![pred(CmpOp::Eq, 42)]]);
        assert!(matches!(prune_scan(&scan), Outcome::Empty));
    }

    #[test]
    fn certain_predicates_clear_the_filter() {
        let scan = scan_with_bounds(1, 9, 0, vec![vec![pred(CmpOp::GtEq, 1)]]);
        assert!(matches!(prune_scan(&scan), Outcome::AllRows));
    }

    #[test]
    fn nulls_block_the_all_rows_conclusion() {
        let scan = scan_with_bounds(1, 9, 3, vec![vec![pred(CmpOp::GtEq, 1)]]);
        assert!(matches!(prune_scan(&scan), Outcome::Unchanged));
    }

    #[test]
    fn uncertain_predicates_stay() {
        let scan = scan_with_bounds(1, 9, 0, vec![vec![pred(CmpOp::Gt, 4)]]);
        assert!(matches!(prune_scan(&scan), Outcome::Unchanged));
    }

    #[test]
    fn false_clauses_drop_but_others_stay() {
        let scan = scan_with_bounds(
            1,
            9,
            0,
            vec![vec![pred(CmpOp::Gt, 100)], vec![pred(CmpOp::Gt, 4)]],
        );
        match prune_scan(&scan) {
            Outcome::Narrowed(clauses) => {
                assert_eq!(clauses.len(), 1);
                assert_eq!(clauses[0][0].value, Value::Int64(4));
            }
            other => panic!("expected narrowed, got {:?}", discriminant_name(&other)),
        }
    }

    fn discriminant_name(outcome: &Outcome) -> &'static str {
        match outcome {
            Outcome::Unchanged => "Unchanged",
            Outcome::AllRows => "AllRows",
            Outcome::Empty => "Empty",
            Outcome::Narrowed(_) => "Narrowed",
        }
    }
}
