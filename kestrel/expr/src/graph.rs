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

//! A string-keyed DAG with labelled edges.
//!
//! Plans are graphs of node ids with payloads in a side table; nodes carry
//! no back-pointers, so rewrites are cheap and ownership stays flat. Edge
//! labels name the consuming leg of a two-input operator ("left"/"right").

use std::collections::VecDeque;

use indexmap::map::IndexMap;

/// One edge: source, target, optional leg label.
pub type Edge = (String, String, Option<String>);

/// Directed graph with node payloads of type `N`.
#[derive(Debug, Clone)]
pub struct Graph<N> {
    nodes: IndexMap<String, N>,
    edges: Vec<Edge>,
}

impl<N> Default for Graph<N> {
    fn default() -> Self {
        Self::new()
    }
}

impl<N> Graph<N> {
    pub fn new() -> Self {
        Self {
            nodes: IndexMap::new(),
            edges: Vec::new(),
        }
    }

    /// Insert or replace a node.
    pub fn add_node(&mut self, id: impl Into<String>, payload: N) {
        self.nodes.insert(id.into(), payload);
    }

    /// Add a directed edge; endpoints need not exist yet.
    pub fn add_edge(&mut self, source: impl Into<String>, target: impl Into<String>) {
        self.edges.push((source.into(), target.into(), None));
    }

    /// Add a directed edge labelled with the consuming leg.
    pub fn add_labelled_edge(
        &mut self,
        source: impl Into<String>,
        target: impl Into<String>,
        label: impl Into<String>,
    ) {
        self.edges.push((source.into(), target.into(), Some(label.into())));
    }

    pub fn node(&self, id: &str) -> Option<&N> {
        self.nodes.get(id)
    }

    pub fn node_mut(&mut self, id: &str) -> Option<&mut N> {
        self.nodes.get_mut(id)
    }

    /// Node ids in insertion order.
    pub fn nodes(&self) -> Vec<String> {
        self.nodes.keys().cloned().collect()
    }

    pub fn edges(&self) -> &[Edge] {
        &self.edges
    }

    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    pub fn outgoing_edges(&self, id: &str) -> Vec<Edge> {
        self.edges
            .iter()
            .filter(|(source, _, _)| source == id)
            .cloned()
            .collect()
    }

    pub fn incoming_edges(&self, id: &str) -> Vec<Edge> {
        self.edges
            .iter()
            .filter(|(_, target, _)| target == id)
            .cloned()
            .collect()
    }

    /// Nodes with no incoming edges.
    pub fn entry_points(&self) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|id| self.incoming_edges(id).is_empty())
            .cloned()
            .collect()
    }

    /// Nodes with no outgoing edges.
    pub fn exit_points(&self) -> Vec<String> {
        self.nodes
            .keys()
            .filter(|id| self.outgoing_edges(id).is_empty())
            .cloned()
            .collect()
    }

    /// True when no directed cycle exists.
    pub fn is_acyclic(&self) -> bool {
        // Kahn's algorithm: repeatedly strip zero-in-degree nodes
        let mut in_degree: IndexMap<&str, usize> =
            self.nodes.keys().map(|id| (id.as_str(), 0)).collect();
        for (_, target, _) in &self.edges {
            if let Some(degree) = in_degree.get_mut(target.as_str()) {
                *degree += 1;
            }
        }
        let mut queue: VecDeque<&str> = in_degree
            .iter()
            .filter(|(_, degree)| **degree == 0)
            .map(|(id, _)| *id)
            .collect();
        let mut visited = 0usize;
        while let Some(id) = queue.pop_front() {
            visited += 1;
            for (_, target, _) in self.edges.iter().filter(|(source, _, _)| source == id) {
                if let Some(degree) = in_degree.get_mut(target.as_str()) {
                    *degree -= 1;
                    if *degree == 0 {
                        queue.push_back(target.as_str());
                    }
                }
            }
        }
        visited == self.nodes.len()
    }

    /// Depth-first visit order starting from the entry points.
    pub fn depth_first_search(&self) -> Vec<String> {
        let mut order = Vec::new();
        let mut stack: Vec<String> = self.entry_points();
        stack.reverse();
        while let Some(id) = stack.pop() {
            if order.contains(&id) {
                continue;
            }
            order.push(id.clone());
            let mut targets: Vec<String> = self
                .outgoing_edges(&id)
                .into_iter()
                .map(|(_, target, _)| target)
                .collect();
            targets.reverse();
            stack.extend(targets);
        }
        order
    }

    /// Edges reachable from `start` within `depth` hops (unlimited when
    /// `None`).
    pub fn breadth_first_search(&self, start: &str, depth: Option<usize>) -> Vec<Edge> {
        let mut reached = Vec::new();
        let mut frontier = vec![start.to_string()];
        let mut visited = vec![start.to_string()];
        let mut hops = 0usize;
        loop {
            if let Some(limit) = depth {
                if hops >= limit {
                    break;
                }
            }
            let mut next = Vec::new();
            for id in &frontier {
                for edge in self.outgoing_edges(id) {
                    if !visited.contains(&edge.1) {
                        visited.push(edge.1.clone());
                        next.push(edge.1.clone());
                    }
                    if !reached.contains(&edge) {
                        reached.push(edge);
                    }
                }
            }
            if next.is_empty() {
                break;
            }
            frontier = next;
            hops += 1;
        }
        reached
    }

    /// Shortest path from `start` to `goal` by hop count, endpoints
    /// included; empty when unreachable.
    pub fn shortest_path(&self, start: &str, goal: &str) -> Vec<String> {
        if start == goal {
            return vec![start.to_string()];
        }
        let mut predecessor: IndexMap<String, String> = IndexMap::new();
        let mut queue = VecDeque::from([start.to_string()]);
        while let Some(id) = queue.pop_front() {
            for (_, target, _) in self.outgoing_edges(&id) {
                if target != start && !predecessor.contains_key(&target) {
                    predecessor.insert(target.clone(), id.clone());
                    if target == goal {
                        let mut path = vec![goal.to_string()];
                        let mut cursor = goal.to_string();
                        while let Some(previous) = predecessor.get(&cursor) {
                            path.push(previous.clone());
                            cursor = previous.clone();
                        }
                        path.reverse();
                        return path;
                    }
                    queue.push_back(target);
                }
            }
        }
        Vec::new()
    }

    /// Collapse the graph by a node-type tag for diagrams: one node per
    /// tag, one edge per distinct (source-tag, target-tag) pair.
    pub fn epitomize(&self, tag: impl Fn(&N) -> String) -> Graph<String> {
        let mut summary = Graph::new();
        for payload in self.nodes.values() {
            let name = tag(payload);
            if summary.node(&name).is_none() {
                summary.add_node(name.clone(), name);
            }
        }
        for (source, target, label) in &self.edges {
            let (Some(source_node), Some(target_node)) =
                (self.nodes.get(source), self.nodes.get(target))
            else {
                continue;
            };
            let source_tag = tag(source_node);
            let target_tag = tag(target_node);
            let exists = summary
                .edges()
                .iter()
                .any(|(s, t, _)| *s == source_tag && *t == target_tag);
            if !exists {
                match label {
                    Some(label) => {
                        summary.add_labelled_edge(source_tag, target_tag, label.clone())
                    }
                    None => summary.add_edge(source_tag, target_tag),
                }
            }
        }
        summary
    }

    /// Remove a node, splicing its incoming edges onto its outgoing
    /// targets so the remaining graph stays connected.
    pub fn remove_node(&mut self, id: &str, reconnect: bool) -> Option<N> {
        let payload = self.nodes.shift_remove(id)?;
        let incoming = self.incoming_edges(id);
        let outgoing = self.outgoing_edges(id);
        self.edges
            .retain(|(source, target, _)| source != id && target != id);
        if reconnect {
            for (source, _, _) in &incoming {
                for (_, target, label) in &outgoing {
                    self.edges
                        .push((source.clone(), target.clone(), label.clone()));
                }
            }
        }
        Some(payload)
    }

    /// Remove every edge between `source` and `target`.
    pub fn remove_edge(&mut self, source: &str, target: &str) {
        self.edges
            .retain(|(s, t, _)| !(s == source && t == target));
    }

    /// Insert a node on the edge between `source` and `target`, keeping the
    /// displaced edge's label on the new downstream edge.
    pub fn insert_between(&mut self, id: impl Into<String>, payload: N, source: &str, target: &str) {
        let id = id.into();
        let label = self
            .edges
            .iter()
            .find(|(s, t, _)| s == source && t == target)
            .and_then(|(_, _, label)| label.clone());
        self.edges
            .retain(|(s, t, _)| !(s == source && t == target));
        self.nodes.insert(id.clone(), payload);
        self.edges.push((source.to_string(), id.clone(), None));
        self.edges.push((id, target.to_string(), label));
    }
}
