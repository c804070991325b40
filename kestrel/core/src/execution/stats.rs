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

//! Per-query statistics bag.
//!
//! Operators keep their own counters (`rows_read`,
//! `rows_eliminated_by_bloom_filter`, `time_build_bloom_filter`, …); the
//! executor folds them into one bag the cursor hands back to the caller,
//! together with the optimizer counters.

use indexmap::IndexMap;

/// Named u64 counters. Additive on merge.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct QueryStatistics {
    counters: IndexMap<String, u64>,
}

impl QueryStatistics {
    pub fn new() -> Self {
        Self::default()
    }

    /// Add `amount` to a counter, creating it at zero.
    pub fn add(&mut self, counter: &str, amount: u64) {
        if let Some(existing) = self.counters.get_mut(counter) {
            *existing += amount;
        } else {
            self.counters.insert(counter.to_string(), amount);
        }
    }

    pub fn increment(&mut self, counter: &str) {
        self.add(counter, 1);
    }

    pub fn set(&mut self, counter: &str, value: u64) {
        self.counters.insert(counter.to_string(), value);
    }

    pub fn get(&self, counter: &str) -> u64 {
        self.counters.get(counter).copied().unwrap_or(0)
    }

    /// Fold another bag into this one.
    pub fn merge(&mut self, other: &QueryStatistics) {
        for (counter, amount) in &other.counters {
            self.add(counter, *amount);
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, u64)> + '_ {
        self.counters.iter().map(|(name, value)| (name.as_str(), *value))
    }

    pub fn is_empty(&self) -> bool {
        self.counters.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn counters_accumulate_and_merge() {
        let mut a = QueryStatistics::new();
        a.add("rows_read", 100);
        a.increment("blobs_read");

        let mut b = QueryStatistics::new();
        b.add("rows_read", 77);

        a.merge(&b);
        assert_eq!(a.get("rows_read"), 177);
        assert_eq!(a.get("blobs_read"), 1);
        assert_eq!(a.get("missing"), 0);
    }
}
