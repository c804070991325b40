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

//! kestrel: an embeddable, single-process SQL query engine.
//!
//! kestrel reads columnar data (Parquet, CSV, JSONL, Arrow IPC) from local
//! and blob stores and returns result sets as Arrow tables. Queries run
//! through a bind → optimize → lower → execute pipeline: the binder turns a
//! parsed AST into a typed logical plan, the optimizer rewrites it, the
//! physical planner lowers it to a DAG of push-based operators, and the
//! executor drives morsels from the scans to the sink.
//!
//! ```no_run
//! use kestrel::Engine;
//!
//! let engine = Engine::default();
//! let mut cursor = engine.connect().cursor();
//! cursor.execute("SELECT name FROM planets WHERE id > 4", Default::default()).unwrap();
//! for row in cursor.fetchall().unwrap() {
//!     println!("{row:?}");
//! }
//! ```

pub mod binder;
pub mod catalog;
pub mod cursor;
pub mod datasource;
pub mod engine;
pub mod evaluator;
pub mod execution;
pub mod explain;
pub mod operators;
pub mod planner;
pub mod sample_data;

pub use cursor::{Connection, Cursor, Params};
pub use engine::Engine;
pub use kestrel_common::{EngineConfig, Error, Result};
pub use kestrel_expr::value::Value;
