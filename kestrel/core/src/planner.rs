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

//! The physical planner: lower the optimized logical plan to a DAG of
//! push-based operators.
//!
//! Every logical node lowers to exactly one physical operator. Join
//! selection: equi-joins with a moderate build side become hash joins,
//! tiny build sides take the nested loop, non-equality comparators take
//! the comparator nested loop, CROSS JOIN UNNEST explodes in place, and
//! the outer/semi/anti shapes go through the buffered fallback join.

use kestrel_common::error::{Error, Result};
use kestrel_common::EngineConfig;
use kestrel_expr::logical::{
    JoinCondition, JoinNode, JoinType, LogicalNode, LogicalPlan,
};
use kestrel_expr::schema::RelationSchema;

use crate::engine::Engine;
use crate::evaluator::Evaluator;
use crate::operators::joins::{
    FallbackJoinOperator, HashJoinOperator, NestedLoopJoinOperator, NonEquiJoinOperator,
    UnnestOperator,
};
use crate::operators::{
    aggregate::AggregateOperator, distinct::DistinctOperator, filter::FilterOperator,
    limit::LimitOperator, project::ProjectOperator, scan::ScanOperator, sort::SortOperator,
    union::UnionOperator, values::ValuesOperator, PhysicalOperator, PhysicalPlan,
};

/// Lower an optimized logical plan.
pub fn create_physical_plan(logical: &LogicalPlan, engine: &Engine) -> Result<PhysicalPlan> {
    let config = engine.config();
    let mut physical = PhysicalPlan::new();

    for id in logical.graph.nodes() {
        let Some(node) = logical.node(&id) else {
            continue;
        };
        let operator = lower_node(logical, &id, node, engine, config)?;
        physical.add_operator(id.clone(), operator);
    }
    for (source, target, label) in logical.graph.edges() {
        match label {
            Some(label) => {
                physical
                    .graph
                    .add_labelled_edge(source.clone(), target.clone(), label.clone())
            }
            None => physical.graph.add_edge(source.clone(), target.clone()),
        }
    }
    physical.validate()?;
    Ok(physical)
}

fn lower_node(
    logical: &LogicalPlan,
    id: &str,
    node: &LogicalNode,
    engine: &Engine,
    config: &EngineConfig,
) -> Result<Box<dyn PhysicalOperator>> {
    let evaluator = || Evaluator::new(engine.registry());
    Ok(match node {
        LogicalNode::Scan(scan) => {
            let dataset = engine.catalog().dataset(&scan.dataset)?;
            Box::new(ScanOperator::new(
                scan.dataset.clone(),
                dataset,
                scan.schema.clone(),
                scan.projection.clone(),
                scan.predicates.clone(),
                scan.limit,
                scan.pruned_empty,
                config.morsel_size_rows,
                evaluator(),
            )?)
        }
        LogicalNode::Filter(filter) => Box::new(FilterOperator::new(
            filter.predicate.clone(),
            input_schema(logical, id)?,
            evaluator(),
        )),
        LogicalNode::Project(project) => Box::new(ProjectOperator::new(
            project.exprs.clone(),
            project.schema.clone(),
            evaluator(),
        )),
        LogicalNode::Limit(limit) => Box::new(LimitOperator::new(
            limit.limit,
            limit.offset,
            input_schema(logical, id)?,
        )),
        LogicalNode::Sort(sort) => Box::new(SortOperator::new(
            sort.keys.clone(),
            sort.limit,
            input_schema(logical, id)?,
            config.blocking_operator_memory_limit,
            config.morsel_size_rows,
        )),
        LogicalNode::Distinct(_) => Box::new(DistinctOperator::new(
            input_schema(logical, id)?,
            config.blocking_operator_memory_limit,
            config.morsel_size_rows,
        )),
        LogicalNode::Aggregate(aggregate) => Box::new(AggregateOperator::new(
            aggregate.group_by.clone(),
            aggregate.aggregates.clone(),
            aggregate.schema.clone(),
            input_schema(logical, id)?,
            config.blocking_operator_memory_limit,
        )),
        LogicalNode::Union(union) => Box::new(UnionOperator::new(union.schema.clone())),
        LogicalNode::Values(values) => Box::new(ValuesOperator::new(
            values.rows.clone(),
            values.schema.clone(),
        )),
        LogicalNode::Show(show) => Box::new(ValuesOperator::new(
            show.rows.clone(),
            show.schema.clone(),
        )),
        LogicalNode::Unnest(unnest) => Box::new(UnnestOperator::new(
            unnest.source.clone(),
            unnest.target.clone(),
            unnest.distinct,
            unnest.filters.clone(),
            unnest.single_column,
            input_schema(logical, id)?,
        )),
        // left behind only when the optimizer was skipped; identity
        LogicalNode::Subquery(subquery) => {
            Box::new(UnionOperator::new(subquery.schema.clone()))
        }
        LogicalNode::Join(join) => lower_join(logical, id, join, config)?,
        LogicalNode::Explain(_) | LogicalNode::Set(_) => {
            return Err(Error::Internal(format!(
                "{} nodes are handled before physical planning",
                node.node_type()
            )))
        }
    })
}

fn lower_join(
    logical: &LogicalPlan,
    id: &str,
    join: &JoinNode,
    config: &EngineConfig,
) -> Result<Box<dyn PhysicalOperator>> {
    let left_schema = leg_schema(logical, id, "left")?;
    let right_schema = leg_schema(logical, id, "right")?;

    Ok(match (&join.join_type, &join.condition) {
        (JoinType::Inner, JoinCondition::Equi { left, right }) => {
            // a tiny build side skips the hash table entirely
            let build_rows = leg_record_estimate(logical, id, "left");
            if build_rows <= config.nested_loop_join_threshold as u64 {
                Box::new(NestedLoopJoinOperator::new(
                    left.clone(),
                    right.clone(),
                    left_schema,
                    right_schema,
                    config.bloom_filter_fpr,
                ))
            } else {
                Box::new(HashJoinOperator::new(
                    left.clone(),
                    right.clone(),
                    left_schema,
                    right_schema,
                    config.blocking_operator_memory_limit,
                    config.bloom_filter_fpr,
                ))
            }
        }
        (_, JoinCondition::NonEqui { left, op, right }) => {
            Box::new(NonEquiJoinOperator::new(
                left.clone(),
                *op,
                right.clone(),
                left_schema,
                right_schema,
            )?)
        }
        // an ON-less join behaves as a cross join regardless of keyword
        (JoinType::Cross, _) | (_, JoinCondition::None) => Box::new(FallbackJoinOperator::new(
            JoinType::Cross,
            vec![],
            vec![],
            false,
            left_schema,
            right_schema,
            config.blocking_operator_memory_limit,
            config.morsel_size_rows,
        )),
        (
            join_type @ (JoinType::Left
            | JoinType::Right
            | JoinType::Full
            | JoinType::Semi
            | JoinType::Anti),
            JoinCondition::Equi { left, right },
        ) => Box::new(FallbackJoinOperator::new(
            *join_type,
            left.clone(),
            right.clone(),
            // our anti joins are lowered from NOT IN and are null-aware
            *join_type == JoinType::Anti,
            left_schema,
            right_schema,
            config.blocking_operator_memory_limit,
            config.morsel_size_rows,
        )),
        (join_type, condition) => {
            return Err(Error::UnsupportedSyntax(format!(
                "{join_type} JOIN with condition {condition:?} is not supported"
            )))
        }
    })
}

fn input_schema(logical: &LogicalPlan, id: &str) -> Result<RelationSchema> {
    let input = logical
        .input_of(id)
        .ok_or_else(|| Error::Internal(format!("operator '{id}' has no input")))?;
    logical
        .node(&input)
        .map(|node| node.schema())
        .ok_or_else(|| Error::Internal(format!("operator '{id}' input vanished")))
}

fn leg_schema(logical: &LogicalPlan, join_id: &str, leg: &str) -> Result<RelationSchema> {
    let child = logical
        .graph
        .incoming_edges(join_id)
        .into_iter()
        .find(|(_, _, label)| label.as_deref() == Some(leg))
        .map(|(source, _, _)| source)
        .ok_or_else(|| Error::Internal(format!("join '{join_id}' is missing its {leg} leg")))?;
    logical
        .node(&child)
        .map(|node| node.schema())
        .ok_or_else(|| Error::Internal(format!("join '{join_id}' {leg} leg vanished")))
}

/// Record-count estimate of a join leg's subtree, for build-side sizing.
fn leg_record_estimate(logical: &LogicalPlan, join_id: &str, leg: &str) -> u64 {
    let Some(child) = logical
        .graph
        .incoming_edges(join_id)
        .into_iter()
        .find(|(_, _, label)| label.as_deref() == Some(leg))
        .map(|(source, _, _)| source)
    else {
        return u64::MAX;
    };
    let mut total = 0u64;
    let mut stack = vec![child];
    while let Some(id) = stack.pop() {
        match logical.node(&id) {
            Some(LogicalNode::Scan(scan)) => {
                total = total.saturating_add(
                    scan.statistics
                        .record_count
                        .max(scan.statistics.record_count_estimate),
                );
            }
            Some(LogicalNode::Values(values)) => {
                total = total.saturating_add(values.rows.len() as u64);
            }
            _ => {}
        }
        for (source, _, _) in logical.graph.incoming_edges(&id) {
            stack.push(source);
        }
    }
    total
}
