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

//! Logical plan optimization.
//!
//! Strategies are trait objects registered once, applied in a fixed order;
//! each takes the plan and returns a possibly rewritten plan plus counters
//! for observability. The order matters: predicates are normalized before
//! they are simplified, compacted, then pushed; statistics pruning and
//! correlated-filter synthesis run once predicates sit on the scans.

use std::sync::Arc;

use kestrel_common::error::Result;
use kestrel_expr::logical::LogicalPlan;
use kestrel_expr::registry::FunctionRegistry;
use log::debug;

pub mod constant_folding;
pub mod correlated_filters;
pub mod limit_pushdown;
pub mod operator_removal;
pub mod predicate_compaction;
pub mod predicate_pushdown;
pub mod predicate_rewriter;
pub mod predicate_simplification;
pub mod projection_pushdown;
pub mod statistics_pruning;

use constant_folding::ConstantFolding;
use correlated_filters::CorrelatedFilters;
use limit_pushdown::LimitPushdown;
use operator_removal::OperatorRemoval;
use predicate_compaction::PredicateCompaction;
use predicate_pushdown::PredicatePushdown;
use predicate_rewriter::PredicateNormalization;
use predicate_simplification::PredicateSimplification;
use projection_pushdown::ProjectionPushdown;
use statistics_pruning::StatisticsPruning;

/// Shared state passed through every pass: the function registry (for
/// volatility) and the per-query optimization counters.
pub struct OptimizerContext {
    pub registry: Arc<FunctionRegistry>,
    counters: indexmap::IndexMap<&'static str, u64>,
}

impl OptimizerContext {
    pub fn new(registry: Arc<FunctionRegistry>) -> Self {
        Self {
            registry,
            counters: indexmap::IndexMap::new(),
        }
    }

    /// Record that an optimization fired.
    pub fn bump(&mut self, counter: &'static str) {
        *self.counters.entry(counter).or_insert(0) += 1;
    }

    pub fn counter(&self, counter: &str) -> u64 {
        self.counters.get(counter).copied().unwrap_or(0)
    }

    pub fn counters(&self) -> impl Iterator<Item = (&'static str, u64)> + '_ {
        self.counters.iter().map(|(name, value)| (*name, *value))
    }
}

/// A single rewrite pass over the logical plan.
pub trait OptimizerStrategy {
    fn name(&self) -> &'static str;

    fn optimize(&self, plan: LogicalPlan, ctx: &mut OptimizerContext) -> Result<LogicalPlan>;
}

/// The ordered strategy list. Built once at startup; EXPLAIN and tests rely
/// on this order being stable.
pub struct Optimizer {
    strategies: Vec<Box<dyn OptimizerStrategy + Send + Sync>>,
}

impl Default for Optimizer {
    fn default() -> Self {
        Self::standard()
    }
}

impl Optimizer {
    /// The standard pass pipeline.
    pub fn standard() -> Self {
        Self {
            strategies: vec![
                Box::new(ConstantFolding),
                Box::new(PredicateNormalization),
                Box::new(PredicateSimplification),
                Box::new(PredicateCompaction),
                Box::new(PredicatePushdown),
                Box::new(ProjectionPushdown),
                Box::new(StatisticsPruning),
                Box::new(CorrelatedFilters),
                Box::new(LimitPushdown),
                Box::new(OperatorRemoval),
            ],
        }
    }

    pub fn optimize(
        &self,
        mut plan: LogicalPlan,
        ctx: &mut OptimizerContext,
    ) -> Result<LogicalPlan> {
        for strategy in &self.strategies {
            plan = strategy.optimize(plan, ctx)?;
            debug!("applied optimizer strategy {}", strategy.name());
        }
        plan.validate()?;
        Ok(plan)
    }
}
