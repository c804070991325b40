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

//! EXPLAIN rendering: the physical DAG as text, sink first, inputs
//! indented below their consumer. Each line is `OPERATOR (config)`.

use crate::operators::PhysicalPlan;

/// One line per operator, depth-indented from the sink.
pub fn render_physical_plan(plan: &PhysicalPlan) -> Vec<String> {
    let Ok(exit) = plan.exit() else {
        return vec![];
    };
    let mut lines = Vec::new();
    render_node(plan, &exit, 0, &mut lines);
    lines
}

fn render_node(plan: &PhysicalPlan, id: &str, depth: usize, lines: &mut Vec<String>) {
    let Some(operator) = plan.graph.node(id) else {
        return;
    };
    let config = operator.config();
    let columns: Vec<&str> = operator
        .schema()
        .columns()
        .iter()
        .map(|c| c.name.as_str())
        .collect();
    let mut line = format!("{}{}", "  ".repeat(depth), operator.name());
    if !config.is_empty() {
        line.push(' ');
        line.push_str(&config);
    }
    if !columns.is_empty() {
        line.push_str(&format!(" [{}]", columns.join(", ")));
    }
    lines.push(line);

    // left leg renders before right for two-input operators
    let mut inputs = plan.graph.incoming_edges(id);
    inputs.sort_by_key(|(_, _, label)| match label.as_deref() {
        Some("left") => 0,
        Some("right") => 1,
        _ => 2,
    });
    for (source, _, _) in inputs {
        render_node(plan, &source, depth + 1, lines);
    }
}
