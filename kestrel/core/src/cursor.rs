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

//! The query surface: connections and DB-API style cursors.
//!
//! One entry point takes a SQL string plus optional positional (`?`) or
//! named (`:name`) parameters and runs the full pipeline: parse → bind →
//! visibility filters → optimize → lower → execute. Results come back row
//! by row (`fetchone`/`fetchmany`/`fetchall`) or as one Arrow batch.
//! Warnings accumulate on `messages` without failing the query.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Instant;

use arrow::compute::concat_batches;
use arrow::datatypes::DataType;
use arrow::record_batch::RecordBatch;
use kestrel_common::error::{Error, Result};
use kestrel_expr::dnf::{Clause, CmpOp, Predicate};
use kestrel_expr::logical::{LogicalNode, LogicalPlan};
use kestrel_expr::schema::RelationSchema;
use kestrel_expr::value::Value;
use kestrel_optimizer::predicate_pushdown::merge_dnf;
use kestrel_optimizer::OptimizerContext;
use log::debug;
use parking_lot::Mutex;
use sqlparser::dialect::GenericDialect;
use sqlparser::parser::Parser;

use crate::binder::Binder;
pub use crate::binder::Params;
use crate::engine::Engine;
use crate::execution::executor::{Executor, QueryHandle};
use crate::execution::morsel::Morsel;
use crate::execution::stats::QueryStatistics;
use crate::explain::render_physical_plan;
use crate::operators::values::build_array;
use crate::planner::create_physical_plan;

/// A visibility filter: DNF over (column name, op, value), AND-ed into
/// every scan of the dataset it guards.
pub type VisibilityFilter = Vec<Vec<(String, CmpOp, Value)>>;

/// A connection: per-session variables over a shared engine.
pub struct Connection {
    engine: Engine,
    variables: Arc<Mutex<HashMap<String, Value>>>,
}

impl Connection {
    pub fn new(engine: Engine) -> Self {
        Self {
            engine,
            variables: Arc::new(Mutex::new(HashMap::new())),
        }
    }

    pub fn cursor(&self) -> Cursor {
        Cursor {
            engine: self.engine.clone(),
            variables: self.variables.clone(),
            visibility: HashMap::new(),
            messages: Vec::new(),
            statistics: QueryStatistics::new(),
            result: None,
            executed_plan: String::new(),
            fetch_position: 0,
            handle: QueryHandle::new(),
        }
    }

    pub fn variables(&self) -> HashMap<String, Value> {
        self.variables.lock().clone()
    }
}

struct ResultSet {
    batches: Vec<RecordBatch>,
    schema: RelationSchema,
}

/// DB-API style cursor.
pub struct Cursor {
    engine: Engine,
    variables: Arc<Mutex<HashMap<String, Value>>>,
    visibility: HashMap<String, VisibilityFilter>,
    messages: Vec<String>,
    statistics: QueryStatistics,
    result: Option<ResultSet>,
    executed_plan: String,
    fetch_position: usize,
    handle: QueryHandle,
}

impl std::fmt::Debug for Cursor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Cursor")
            .field("executed_plan", &self.executed_plan)
            .field("fetch_position", &self.fetch_position)
            .finish()
    }
}

impl Cursor {
    /// Attach a visibility filter for a dataset; it is AND-ed into every
    /// scan of that dataset before optimization, so pruning and pushdown
    /// benefit.
    pub fn set_visibility_filter(&mut self, dataset: impl Into<String>, filter: VisibilityFilter) {
        self.visibility.insert(dataset.into().to_lowercase(), filter);
    }

    /// Cooperative cancellation handle for the running query.
    pub fn handle(&self) -> QueryHandle {
        self.handle.clone()
    }

    /// Execute one statement.
    pub fn execute(&mut self, sql: &str, params: Params) -> Result<&mut Self> {
        self.result = None;
        self.fetch_position = 0;
        self.statistics = QueryStatistics::new();
        self.executed_plan.clear();
        self.handle = QueryHandle::new();

        let planning_started = Instant::now();
        let statements = Parser::parse_sql(&GenericDialect {}, sql)
            .map_err(|e| Error::InvalidSyntax(e.to_string()))?;
        let statement = match statements.len() {
            0 => return Err(Error::InvalidSyntax("empty statement".to_string())),
            1 => statements.into_iter().next().ok_or_else(|| {
                Error::Internal("single statement vanished".to_string())
            })?,
            n => {
                return Err(Error::UnsupportedSyntax(format!(
                    "expected one statement, got {n}"
                )))
            }
        };

        let catalog = self.engine.catalog();
        let registry = self.engine.registry();
        let binder = Binder::new(catalog.as_ref(), registry.as_ref(), params);
        let mut plan = binder.bind(statement)?;
        self.statistics.set(
            "time_planning",
            planning_started.elapsed().as_nanos() as u64,
        );

        // SET statements update the session without executing a plan
        if let Ok(exit) = plan.exit() {
            if let Some(LogicalNode::Set(set)) = plan.node(&exit) {
                const KNOWN_VARIABLES: &[&str] = &["timezone", "morsel_size", "user"];
                if !KNOWN_VARIABLES.contains(&set.variable.to_lowercase().as_str()) {
                    self.messages
                        .push(format!("unrecognized variable '{}'", set.variable));
                }
                self.variables
                    .lock()
                    .insert(set.variable.to_lowercase(), set.value.clone());
                self.result = Some(ResultSet {
                    batches: vec![],
                    schema: RelationSchema::empty(),
                });
                return Ok(self);
            }
        }

        // EXPLAIN renders the optimized physical plan instead of running it
        let mut explain_schema: Option<RelationSchema> = None;
        if let Ok(exit) = plan.exit() {
            if let Some(LogicalNode::Explain(explain)) = plan.node(&exit) {
                explain_schema = Some(explain.schema.clone());
                plan.graph.remove_node(&exit, false);
            }
        }

        self.apply_visibility_filters(&mut plan);

        let optimize_started = Instant::now();
        let mut ctx = OptimizerContext::new(self.engine.registry());
        let plan = self.engine.optimizer().optimize(plan, &mut ctx)?;
        for (counter, count) in ctx.counters() {
            self.statistics.set(counter, count);
        }
        self.statistics.set(
            "time_optimizing",
            optimize_started.elapsed().as_nanos() as u64,
        );

        let physical = create_physical_plan(&plan, &self.engine)?;
        self.executed_plan = render_physical_plan(&physical).join("\n");
        debug!("executing plan:\n{}", self.executed_plan);

        if let Some(schema) = explain_schema {
            let rows: Vec<Value> = self
                .executed_plan
                .lines()
                .map(|line| Value::Utf8(line.to_string()))
                .collect();
            let column = build_array(&rows, &DataType::Utf8)?;
            let batch = RecordBatch::try_new(schema.to_physical_schema(), vec![column])?;
            self.result = Some(ResultSet {
                batches: vec![batch],
                schema,
            });
            return Ok(self);
        }

        let executing_started = Instant::now();
        let executor = Executor::new(self.engine.config(), self.handle.clone());
        let outcome = executor.execute(physical)?;
        self.statistics.merge(&outcome.statistics);
        self.statistics.set(
            "time_executing",
            executing_started.elapsed().as_nanos() as u64,
        );

        self.result = Some(ResultSet {
            batches: outcome.batches,
            schema: outcome.schema,
        });
        Ok(self)
    }

    fn apply_visibility_filters(&self, plan: &mut LogicalPlan) {
        if self.visibility.is_empty() {
            return;
        }
        for id in plan.graph.nodes() {
            let Some(LogicalNode::Scan(scan)) = plan.graph.node_mut(&id) else {
                continue;
            };
            let Some(filter) = self.visibility.get(&scan.dataset.to_lowercase()) else {
                continue;
            };
            let mut clauses: Vec<Clause> = Vec::with_capacity(filter.len());
            let mut resolved = true;
            for clause in filter {
                let mut bound = Vec::with_capacity(clause.len());
                for (name, op, value) in clause {
                    match scan.schema.resolve(None, name) {
                        Ok(column) => bound.push(Predicate::new(
                            column.id,
                            column.name.clone(),
                            *op,
                            value.clone(),
                        )),
                        Err(_) => {
                            resolved = false;
                            break;
                        }
                    }
                }
                if !resolved {
                    break;
                }
                clauses.push(bound);
            }
            if resolved {
                scan.predicates = merge_dnf(std::mem::take(&mut scan.predicates), clauses);
            }
        }
    }

    /// Number of rows in the current result.
    pub fn rowcount(&self) -> usize {
        self.result
            .as_ref()
            .map(|r| r.batches.iter().map(RecordBatch::num_rows).sum())
            .unwrap_or(0)
    }

    /// Column names and types of the current result.
    pub fn description(&self) -> Vec<(String, DataType)> {
        self.result
            .as_ref()
            .map(|r| {
                r.schema
                    .columns()
                    .iter()
                    .map(|c| (c.name.clone(), c.data_type.clone()))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Warnings accumulated across executions on this cursor.
    pub fn messages(&self) -> &[String] {
        &self.messages
    }

    pub fn stats(&self) -> &QueryStatistics {
        &self.statistics
    }

    /// The rendered physical plan of the last execution.
    pub fn executed_plan(&self) -> &str {
        &self.executed_plan
    }

    pub fn fetchone(&mut self) -> Result<Option<Vec<Value>>> {
        let rows = self.fetch_rows(self.fetch_position, 1)?;
        self.fetch_position += rows.len();
        Ok(rows.into_iter().next())
    }

    pub fn fetchmany(&mut self, count: usize) -> Result<Vec<Vec<Value>>> {
        let rows = self.fetch_rows(self.fetch_position, count)?;
        self.fetch_position += rows.len();
        Ok(rows)
    }

    pub fn fetchall(&mut self) -> Result<Vec<Vec<Value>>> {
        let rows = self.fetch_rows(self.fetch_position, usize::MAX)?;
        self.fetch_position += rows.len();
        Ok(rows)
    }

    fn fetch_rows(&self, start: usize, count: usize) -> Result<Vec<Vec<Value>>> {
        let Some(result) = &self.result else {
            return Err(Error::InvalidSyntax(
                "no statement has been executed".to_string(),
            ));
        };
        let mut rows = Vec::new();
        let mut skip = start;
        for batch in &result.batches {
            if rows.len() >= count {
                break;
            }
            if skip >= batch.num_rows() {
                skip -= batch.num_rows();
                continue;
            }
            for row in skip..batch.num_rows() {
                if rows.len() >= count {
                    break;
                }
                let mut cells = Vec::with_capacity(batch.num_columns());
                for column in batch.columns() {
                    cells.push(Value::try_from_array(column.as_ref(), row)?);
                }
                rows.push(cells);
            }
            skip = 0;
        }
        Ok(rows)
    }

    /// The whole result as a single Arrow batch with display column names.
    pub fn arrow(&self) -> Result<RecordBatch> {
        let Some(result) = &self.result else {
            return Err(Error::InvalidSyntax(
                "no statement has been executed".to_string(),
            ));
        };
        let display = result.schema.to_display_schema();
        if result.batches.is_empty() {
            return Ok(RecordBatch::new_empty(display));
        }
        let combined =
            concat_batches(&result.schema.to_physical_schema(), &result.batches)?;
        Ok(RecordBatch::try_new(display, combined.columns().to_vec())?)
    }

    /// The whole result as morsels, for embedding callers.
    pub fn morsels(&self) -> Result<Vec<Morsel>> {
        let Some(result) = &self.result else {
            return Err(Error::InvalidSyntax(
                "no statement has been executed".to_string(),
            ));
        };
        result
            .batches
            .iter()
            .map(|batch| Morsel::new(result.schema.clone(), batch.clone()))
            .collect()
    }
}
