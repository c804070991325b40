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

//! Blocking sort: collect every input morsel, stable multi-key sort on
//! EOS with per-column NULLS FIRST/LAST, then emit in order. A pushed-down
//! limit turns the sort into Top-N.

use arrow::compute::{concat_batches, lexsort_to_indices, take, SortColumn, SortOptions};
use arrow::record_batch::RecordBatch;
use kestrel_common::error::{Error, Result};
use kestrel_expr::logical::SortKey;
use kestrel_expr::schema::RelationSchema;

use crate::execution::morsel::{Morsel, Payload};
use crate::operators::{Leg, PhysicalOperator};

pub struct SortOperator {
    keys: Vec<SortKey>,
    limit: Option<usize>,
    schema: RelationSchema,
    buffer: Vec<RecordBatch>,
    buffered_bytes: usize,
    memory_limit: usize,
    morsel_size: usize,
}

impl SortOperator {
    pub fn new(
        keys: Vec<SortKey>,
        limit: Option<usize>,
        schema: RelationSchema,
        memory_limit: usize,
        morsel_size: usize,
    ) -> Self {
        Self {
            keys,
            limit,
            schema,
            buffer: Vec::new(),
            buffered_bytes: 0,
            memory_limit,
            morsel_size: morsel_size.max(1),
        }
    }

    fn flush(&mut self) -> Result<Vec<Payload>> {
        if self.buffer.is_empty() {
            return Ok(vec![Payload::Eos]);
        }
        let combined = concat_batches(&self.schema.to_physical_schema(), &self.buffer)?;
        self.buffer.clear();

        let mut sort_columns = Vec::with_capacity(self.keys.len());
        for key in &self.keys {
            let index = self.schema.index_of(key.column.id).ok_or_else(|| {
                Error::Internal(format!("sort key '{}' not in input", key.column))
            })?;
            sort_columns.push(SortColumn {
                values: combined.column(index).clone(),
                options: Some(SortOptions {
                    descending: !key.ascending,
                    nulls_first: key.nulls_first,
                }),
            });
        }
        let indices = lexsort_to_indices(&sort_columns, self.limit)?;
        let columns = combined
            .columns()
            .iter()
            .map(|column| take(column, &indices, None))
            .collect::<std::result::Result<Vec<_>, _>>()?;
        let sorted = RecordBatch::try_new(self.schema.to_physical_schema(), columns)?;

        let mut out = Vec::new();
        let mut offset = 0;
        while offset < sorted.num_rows() {
            let length = self.morsel_size.min(sorted.num_rows() - offset);
            out.push(Payload::Morsel(Morsel::new(
                self.schema.clone(),
                sorted.slice(offset, length),
            )?));
            offset += length;
        }
        out.push(Payload::Eos);
        Ok(out)
    }
}

impl PhysicalOperator for SortOperator {
    fn name(&self) -> &'static str {
        "SORT"
    }

    fn config(&self) -> String {
        let keys: Vec<String> = self.keys.iter().map(|k| k.to_string()).collect();
        match self.limit {
            Some(limit) => format!("({}) TOP {limit}", keys.join(", ")),
            None => format!("({})", keys.join(", ")),
        }
    }

    fn schema(&self) -> &RelationSchema {
        &self.schema
    }

    fn step(&mut self, payload: Payload, _leg: Leg) -> Result<Vec<Payload>> {
        match payload {
            Payload::Morsel(morsel) => {
                self.buffered_bytes += morsel.size_bytes();
                if self.buffered_bytes > self.memory_limit {
                    self.buffer.clear();
                    return Err(Error::ResourcesExhausted(format!(
                        "sort buffer exceeded {} bytes",
                        self.memory_limit
                    )));
                }
                self.buffer.push(morsel.into_batch());
                Ok(vec![])
            }
            Payload::Eos => self.flush(),
        }
    }
}
