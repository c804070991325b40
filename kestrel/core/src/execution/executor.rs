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

//! The push-based executor.
//!
//! Single-threaded cooperative scheduling: one task queue, one worker loop.
//! Sources are pumped depth-first; every morsel a source emits is pushed
//! through the downstream operators until the queue drains, then the source
//! is pumped again. EOS is delivered to an operator leg only once every
//! incoming edge of that leg has finished. A query-level cancel flag and
//! wall-clock deadline are checked between morsels.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Instant;

use arrow::record_batch::RecordBatch;
use hashbrown::HashMap;
use kestrel_common::error::{Error, Result};
use kestrel_common::EngineConfig;
use kestrel_expr::schema::RelationSchema;
use log::trace;

use crate::execution::morsel::Payload;
use crate::execution::stats::QueryStatistics;
use crate::operators::{Leg, PhysicalPlan};

/// Cooperative cancellation handle for a running query.
#[derive(Debug, Clone, Default)]
pub struct QueryHandle {
    cancelled: Arc<AtomicBool>,
}

impl QueryHandle {
    pub fn new() -> Self {
        Self::default()
    }

    /// Request cancellation; the executor notices at the next morsel
    /// boundary.
    pub fn cancel(&self) {
        self.cancelled.store(true, Ordering::Relaxed);
    }

    pub fn is_cancelled(&self) -> bool {
        self.cancelled.load(Ordering::Relaxed)
    }
}

/// What a finished query hands back to the cursor.
#[derive(Debug)]
pub struct ExecutionResult {
    pub batches: Vec<RecordBatch>,
    pub schema: RelationSchema,
    pub statistics: QueryStatistics,
}

pub struct Executor {
    handle: QueryHandle,
    deadline: Option<Instant>,
}

impl Executor {
    pub fn new(config: &EngineConfig, handle: QueryHandle) -> Self {
        Self {
            handle,
            deadline: config.query_timeout.map(|timeout| Instant::now() + timeout),
        }
    }

    /// Drive the plan to completion and collect the sink's output.
    pub fn execute(&self, mut plan: PhysicalPlan) -> Result<ExecutionResult> {
        plan.validate()?;
        let exit = plan.exit()?;
        let schema = plan
            .graph
            .node(&exit)
            .map(|op| op.schema().clone())
            .unwrap_or_default();

        let mut state = RunState::new(&plan, exit.clone());
        let entries = plan.graph.entry_points();

        let run = (|| -> Result<()> {
            for entry in entries {
                loop {
                    self.check_liveness()?;
                    let payload = plan
                        .graph
                        .node_mut(&entry)
                        .ok_or_else(|| Error::Internal(format!("missing source '{entry}'")))?
                        .pump()?;
                    let done = matches!(payload, Payload::Eos);
                    state.dispatch(&plan, &entry, payload);
                    self.drain(&mut plan, &mut state)?;
                    if done || state.finished {
                        break;
                    }
                }
                if state.finished {
                    break;
                }
            }
            Ok(())
        })();

        // on error, cancel peers and release operator state before
        // surfacing a single error to the caller
        if let Err(error) = run {
            self.handle.cancel();
            drop(plan);
            return Err(error);
        }

        let mut statistics = QueryStatistics::new();
        for id in plan.graph.nodes() {
            if let Some(operator) = plan.graph.node(&id) {
                statistics.merge(&operator.statistics());
            }
        }

        Ok(ExecutionResult {
            batches: state.results,
            schema,
            statistics,
        })
    }

    fn drain(&self, plan: &mut PhysicalPlan, state: &mut RunState) -> Result<()> {
        while let Some((node_id, payload, leg)) = state.queue.pop_front() {
            if state.finished {
                state.queue.clear();
                break;
            }
            self.check_liveness()?;

            if matches!(payload, Payload::Eos) {
                // deliver EOS only when every incoming edge of this leg
                // has finished
                let remaining = state
                    .pending_eos
                    .get_mut(&(node_id.clone(), leg))
                    .ok_or_else(|| {
                        Error::Internal(format!("unexpected EOS for '{node_id}'"))
                    })?;
                *remaining = remaining.saturating_sub(1);
                if *remaining > 0 {
                    continue;
                }
            }

            trace!("step {node_id} ({leg:?})");
            let outputs = plan
                .graph
                .node_mut(&node_id)
                .ok_or_else(|| Error::Internal(format!("missing operator '{node_id}'")))?
                .step(payload, leg)?;
            for output in outputs {
                state.dispatch(plan, &node_id, output);
            }
        }
        Ok(())
    }

    fn check_liveness(&self) -> Result<()> {
        if self.handle.is_cancelled() {
            return Err(Error::Cancelled("query was cancelled".to_string()));
        }
        if let Some(deadline) = self.deadline {
            if Instant::now() > deadline {
                self.handle.cancel();
                return Err(Error::Cancelled("query timeout exceeded".to_string()));
            }
        }
        Ok(())
    }
}

struct RunState {
    queue: VecDeque<(String, Payload, Leg)>,
    /// Incoming edges still open, per (node, leg).
    pending_eos: HashMap<(String, Leg), usize>,
    results: Vec<RecordBatch>,
    exit: String,
    finished: bool,
}

impl RunState {
    fn new(plan: &PhysicalPlan, exit: String) -> Self {
        let mut pending_eos: HashMap<(String, Leg), usize> = HashMap::new();
        for (_, target, label) in plan.graph.edges() {
            let leg = Leg::from_label(label.as_deref());
            *pending_eos.entry((target.clone(), leg)).or_insert(0) += 1;
        }
        Self {
            queue: VecDeque::new(),
            pending_eos,
            results: Vec::new(),
            exit,
            finished: false,
        }
    }

    /// Route one operator output: collect at the sink, fan out everywhere
    /// else.
    fn dispatch(&mut self, plan: &PhysicalPlan, from: &str, payload: Payload) {
        if from == self.exit {
            match payload {
                Payload::Morsel(morsel) => {
                    if morsel.num_rows() > 0 {
                        self.results.push(morsel.into_batch());
                    }
                }
                Payload::Eos => self.finished = true,
            }
            return;
        }
        for (_, target, label) in plan.graph.outgoing_edges(from) {
            let leg = Leg::from_label(label.as_deref());
            self.queue.push_back((target, payload.clone(), leg));
        }
    }
}
