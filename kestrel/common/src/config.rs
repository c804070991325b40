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

//! Engine configuration.

use std::time::Duration;

/// Tunables for a kestrel [`Engine`](https://docs.rs/kestrel). One instance
/// is built at startup and shared read-only by every query.
#[derive(Debug, Clone)]
pub struct EngineConfig {
    /// Maximum rows per morsel emitted by scans and rebuilt by blocking
    /// operators.
    pub morsel_size_rows: usize,
    /// Soft capacity of the blob byte cache in bytes.
    pub buffer_pool_capacity: usize,
    /// K for the buffer pool's LRU-K eviction policy.
    pub buffer_pool_k: usize,
    /// Size of the morsel payload arena in bytes.
    pub memory_pool_capacity: usize,
    /// Bytes a blocking operator (sort, aggregate, join build) may
    /// accumulate before the query fails with `ResourcesExhausted`.
    pub blocking_operator_memory_limit: usize,
    /// Target false-positive rate for join bloom prefilters.
    pub bloom_filter_fpr: f64,
    /// Build sides at or below this row count use a nested-loop join
    /// instead of building a hash table.
    pub nested_loop_join_threshold: usize,
    /// Per-query wall clock limit; `None` disables the timeout.
    pub query_timeout: Option<Duration>,
    /// Rows between cancellation checks inside long scans.
    pub cancellation_check_interval_rows: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            morsel_size_rows: 10_000,
            buffer_pool_capacity: 256 * 1024 * 1024,
            buffer_pool_k: 2,
            memory_pool_capacity: 64 * 1024 * 1024,
            blocking_operator_memory_limit: 1024 * 1024 * 1024,
            bloom_filter_fpr: 0.05,
            nested_loop_join_threshold: 1_000,
            query_timeout: None,
            cancellation_check_interval_rows: 100_000,
        }
    }
}

impl EngineConfig {
    /// Config with a morsel size suitable for unit tests, so multi-morsel
    /// paths are exercised with small inputs.
    pub fn for_tests() -> Self {
        Self {
            morsel_size_rows: 64,
            ..Default::default()
        }
    }
}
