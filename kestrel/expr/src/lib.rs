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

//! Expression trees, schemas and logical plans for kestrel.
//!
//! The binder produces a [`logical::LogicalPlan`] from the parsed AST; the
//! optimizer rewrites it; the physical planner lowers it. Everything in
//! between speaks the types in this crate: scalar [`value::Value`]s, typed
//! [`expr::Expr`] trees, flat-DNF predicates, and the id-keyed plan graph.

pub mod dnf;
pub mod expr;
pub mod graph;
pub mod logical;
pub mod registry;
pub mod schema;
pub mod value;

pub use expr::{Expr, Operator};
pub use graph::Graph;
pub use logical::{LogicalNode, LogicalPlan};
pub use schema::{ColumnDef, ColumnId, RelationSchema};
pub use value::Value;
