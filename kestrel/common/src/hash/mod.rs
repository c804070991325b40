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

//! The u64 hash cores shared by joins, aggregation and DISTINCT: the flat
//! open-addressed containers, deterministic row fingerprints over Arrow
//! arrays, and the split-block bloom filter.

pub mod bloom;
pub mod flat;
pub mod row;

pub use bloom::BloomFilter;
pub use flat::{FlatHashMap, FlatHashSet};
pub use row::{create_row_hashes, hash_bytes, EMPTY_LIST_HASH, NULL_HASH};
