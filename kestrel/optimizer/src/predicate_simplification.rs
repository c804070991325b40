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

//! DNF simplification pass: dedup, absorption and factoring over the
//! normalized filter predicates, producing the canonical tree.

use kestrel_common::error::Result;
use kestrel_expr::dnf;
use kestrel_expr::logical::{LogicalNode, LogicalPlan};

use crate::predicate_rewriter::to_dnf;
use crate::{OptimizerContext, OptimizerStrategy};

pub struct PredicateSimplification;

impl OptimizerStrategy for PredicateSimplification {
    fn name(&self) -> &'static str {
        "predicate_simplification"
    }

    fn optimize(&self, mut plan: LogicalPlan, ctx: &mut OptimizerContext) -> Result<LogicalPlan> {
        for id in plan.graph.nodes() {
            let Some(LogicalNode::Filter(filter)) = plan.graph.node(&id) else {
                continue;
            };
            let Some(clauses) = to_dnf(&filter.predicate) else {
                continue;
            };
            // single-predicate filters have nothing to absorb or factor
            if clauses.len() == 1 && clauses[0].len() <= 1 {
                continue;
            }
            let Some(tree) = dnf::simplify(clauses) else {
                continue;
            };
            let Some(rewritten) = tree.to_expr() else {
                continue;
            };
            if let Some(LogicalNode::Filter(filter)) = plan.graph.node_mut(&id) {
                if filter.predicate != rewritten {
                    ctx.bump("optimization_predicate_simplification");
                    filter.predicate = rewritten;
                }
            }
        }
        Ok(plan)
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use kestrel_expr::expr::{Expr, Operator};
    use kestrel_expr::logical::{FilterNode, ScanNode};
    use kestrel_expr::registry::FunctionRegistry;
    use kestrel_expr::schema::{ColumnDef, RelationSchema};
    use kestrel_expr::value::Value;

    use super::*;

    fn filter_plan(predicate: Expr) -> (LogicalPlan, String) {
        let mut plan = LogicalPlan::new();
        let schema = RelationSchema::new(vec![
            ColumnDef::new(1, "a", arrow::datatypes::DataType::Int64),
            ColumnDef::new(2, "b", arrow::datatypes::DataType::Int64),
        ]);
        let scan = plan.push(LogicalNode::Scan(ScanNode {
            dataset: "t".into(),
            alias: None,
            schema: schema.clone(),
            projection: None,
            predicates: vec![],
            limit: None,
            pruned_empty: false,
            statistics: Default::default(),
        }));
        let filter = plan.push(LogicalNode::Filter(FilterNode { predicate, schema }));
        plan.graph.add_edge(scan, filter.clone());
        (plan, filter)
    }

    #[test]
    fn absorption_applies_to_filter_predicates() {
        // a = 1 OR (a = 1 AND b = 2)  →  a = 1
        let a = Expr::binary(
            Expr::column(1, "a"),
            Operator::Eq,
            Expr::literal(Value::Int64(1)),
        );
        let b = Expr::binary(
            Expr::column(2, "b"),
            Operator::Eq,
            Expr::literal(Value::Int64(2)),
        );
        let (plan, filter_id) = filter_plan(Expr::or(a.clone(), Expr::and(a.clone(), b)));

        let mut ctx = OptimizerContext::new(Arc::new(FunctionRegistry::standard()));
        let plan = PredicateSimplification.optimize(plan, &mut ctx).unwrap();

        let Some(LogicalNode::Filter(filter)) = plan.node(&filter_id) else {
            panic!("filter vanished")
        };
        assert_eq!(filter.predicate, a);
        assert_eq!(ctx.counter("optimization_predicate_simplification"), 1);
    }
}
