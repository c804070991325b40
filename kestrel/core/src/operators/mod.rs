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

//! Physical operators.
//!
//! Every operator is an explicit state machine: a struct owning its buffer
//! and progress cursor. `step` is a synchronous call consuming one payload
//! on one leg and returning whatever the operator emits in response. The
//! executor owns all scheduling; operators never block waiting for input.

use arrow::array::{ArrayRef, UInt64Array};
use arrow::record_batch::RecordBatch;
use kestrel_common::error::{Error, Result};
use kestrel_expr::graph::Graph;
use kestrel_expr::schema::RelationSchema;
use kestrel_expr::value::Value;

use crate::execution::morsel::Payload;
use crate::execution::stats::QueryStatistics;

pub mod aggregate;
pub mod distinct;
pub mod filter;
pub mod joins;
pub mod limit;
pub mod project;
pub mod scan;
pub mod sort;
pub mod union;
pub mod values;

/// Which input leg a payload arrived on. Single-input operators always see
/// [`Leg::Only`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Leg {
    Only,
    Left,
    Right,
}

impl Leg {
    pub fn from_label(label: Option<&str>) -> Leg {
        match label {
            Some("left") => Leg::Left,
            Some("right") => Leg::Right,
            _ => Leg::Only,
        }
    }
}

/// A push-based physical operator.
pub trait PhysicalOperator: Send {
    /// Operator type tag, the first token of its EXPLAIN line.
    fn name(&self) -> &'static str;

    /// Operator configuration for EXPLAIN; empty when there is nothing
    /// interesting to show.
    fn config(&self) -> String {
        String::new()
    }

    /// The schema of every morsel this operator emits.
    fn schema(&self) -> &RelationSchema;

    /// True for leaf operators that produce morsels on their own.
    fn is_source(&self) -> bool {
        false
    }

    /// Produce the next payload from a source operator. The executor calls
    /// this until it returns [`Payload::Eos`].
    fn pump(&mut self) -> Result<Payload> {
        Err(Error::Internal(format!(
            "operator '{}' is not a source",
            self.name()
        )))
    }

    /// Consume one payload on one leg; return everything emitted in
    /// response. EOS arrives per leg exactly once.
    fn step(&mut self, payload: Payload, leg: Leg) -> Result<Vec<Payload>>;

    /// This operator's counters, folded into the query statistics after
    /// execution.
    fn statistics(&self) -> QueryStatistics {
        QueryStatistics::new()
    }
}

/// A DAG of physical operators with labelled legs. Exactly one exit node
/// (the sink); at least one entry (a source).
pub struct PhysicalPlan {
    pub graph: Graph<Box<dyn PhysicalOperator>>,
}

impl Default for PhysicalPlan {
    fn default() -> Self {
        Self::new()
    }
}

impl PhysicalPlan {
    pub fn new() -> Self {
        Self {
            graph: Graph::new(),
        }
    }

    pub fn add_operator(&mut self, id: impl Into<String>, operator: Box<dyn PhysicalOperator>) {
        self.graph.add_node(id, operator);
    }

    pub fn exit(&self) -> Result<String> {
        let exits = self.graph.exit_points();
        match exits.len() {
            1 => Ok(exits.into_iter().next().unwrap_or_default()),
            n => Err(Error::Internal(format!(
                "physical plan has {n} exits, expected exactly 1"
            ))),
        }
    }

    /// Structural invariants: acyclic, one sink, at least one source leaf.
    pub fn validate(&self) -> Result<()> {
        if !self.graph.is_acyclic() {
            return Err(Error::Internal("physical plan contains a cycle".to_string()));
        }
        self.exit()?;
        let entries = self.graph.entry_points();
        if entries.is_empty() {
            return Err(Error::Internal("physical plan has no entry points".to_string()));
        }
        for entry in entries {
            let is_source = self
                .graph
                .node(&entry)
                .map(|op| op.is_source())
                .unwrap_or(false);
            if !is_source {
                return Err(Error::Internal(format!(
                    "physical plan entry '{entry}' is not a source operator"
                )));
            }
        }
        Ok(())
    }
}

/// Cell-by-cell row comparison used to resolve fingerprint collisions.
/// `nulls_equal` selects grouping semantics (NULL groups with NULL) versus
/// join semantics (NULL matches nothing).
pub fn rows_equal(
    left_columns: &[ArrayRef],
    left_row: usize,
    right_columns: &[ArrayRef],
    right_row: usize,
    nulls_equal: bool,
) -> Result<bool> {
    for (left, right) in left_columns.iter().zip(right_columns) {
        let left_null = left.is_null(left_row);
        let right_null = right.is_null(right_row);
        if left_null || right_null {
            if left_null && right_null && nulls_equal {
                continue;
            }
            return Ok(false);
        }
        let left_value = Value::try_from_array(left.as_ref(), left_row)?;
        let right_value = Value::try_from_array(right.as_ref(), right_row)?;
        if left_value.partial_cmp_sql(&right_value) != Some(std::cmp::Ordering::Equal) {
            return Ok(false);
        }
    }
    Ok(true)
}

/// Gather the given rows of a batch.
pub fn take_rows(batch: &RecordBatch, indices: &[i64]) -> Result<RecordBatch> {
    let indices: UInt64Array = indices.iter().map(|i| Some(*i as u64)).collect();
    let columns = batch
        .columns()
        .iter()
        .map(|column| arrow::compute::take(column, &indices, None))
        .collect::<std::result::Result<Vec<_>, _>>()?;
    Ok(RecordBatch::try_new(batch.schema(), columns)?)
}
