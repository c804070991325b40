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

//! Shared primitives for the kestrel query engine.
//!
//! This crate holds the pieces every other kestrel crate leans on: the error
//! taxonomy, engine configuration, columnar statistics, the u64 hash cores
//! (flat containers, bloom filter, row fingerprints) and the two shared
//! caches (the LRU-K buffer pool and the arena-backed memory pool).

pub mod cache;
pub mod config;
pub mod error;
pub mod hash;
pub mod stats;

pub use config::EngineConfig;
pub use error::{Error, Result};
