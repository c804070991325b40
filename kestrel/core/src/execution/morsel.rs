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

//! Morsels: the unit of work between operators.
//!
//! A morsel is a batch of rows in columnar form with its logical schema and
//! a schema fingerprint. Morsels are immutable once produced; operators
//! yield new ones. The end-of-stream marker is a distinct payload variant,
//! never an empty morsel.

use arrow::record_batch::RecordBatch;
use kestrel_common::error::{Error, Result};
use kestrel_common::hash::row::avalanche_fold;
use kestrel_common::stats::RelationStatistics;
use kestrel_expr::schema::{ColumnId, RelationSchema};

/// What travels along a plan edge.
#[derive(Debug, Clone)]
pub enum Payload {
    Morsel(Morsel),
    /// End of stream for the producing leg. Distinct from an empty morsel.
    Eos,
}

/// A batch of rows between a producer and a consumer.
#[derive(Debug, Clone)]
pub struct Morsel {
    batch: RecordBatch,
    schema: RelationSchema,
    fingerprint: u64,
    statistics: Option<RelationStatistics>,
}

impl Morsel {
    /// Wrap a record batch whose physical fields match `schema`.
    pub fn new(schema: RelationSchema, batch: RecordBatch) -> Result<Self> {
        if batch.num_columns() != schema.len() {
            return Err(Error::Internal(format!(
                "morsel has {} columns but its schema has {}",
                batch.num_columns(),
                schema.len()
            )));
        }
        let fingerprint = schema_fingerprint(&schema);
        Ok(Self {
            batch,
            schema,
            fingerprint,
            statistics: None,
        })
    }

    /// A zero-row morsel with the correct physical schema.
    pub fn empty(schema: RelationSchema) -> Result<Self> {
        let batch = RecordBatch::new_empty(schema.to_physical_schema());
        Self::new(schema, batch)
    }

    pub fn with_statistics(mut self, statistics: RelationStatistics) -> Self {
        self.statistics = Some(statistics);
        self
    }

    pub fn num_rows(&self) -> usize {
        self.batch.num_rows()
    }

    pub fn batch(&self) -> &RecordBatch {
        &self.batch
    }

    pub fn into_batch(self) -> RecordBatch {
        self.batch
    }

    pub fn schema(&self) -> &RelationSchema {
        &self.schema
    }

    pub fn schema_fingerprint(&self) -> u64 {
        self.fingerprint
    }

    pub fn statistics(&self) -> Option<&RelationStatistics> {
        self.statistics.as_ref()
    }

    /// Bytes held by this morsel's buffers.
    pub fn size_bytes(&self) -> usize {
        self.batch.get_array_memory_size()
    }

    /// A column by its stable identity.
    pub fn column(&self, id: ColumnId) -> Result<arrow::array::ArrayRef> {
        let index = self
            .schema
            .index_of(id)
            .ok_or_else(|| Error::Internal(format!("morsel does not carry column {id}")))?;
        Ok(self.batch.column(index).clone())
    }

    /// Same rows, new schema: used by operators that re-stamp columns
    /// without touching data.
    pub fn with_schema(self, schema: RelationSchema) -> Result<Self> {
        Self::new(schema, self.batch)
    }
}

/// Order- and type-sensitive fingerprint over the schema's column
/// identities.
fn schema_fingerprint(schema: &RelationSchema) -> u64 {
    let mut h = 0x0123_4567_89ab_cdef;
    for column in schema.columns() {
        h = avalanche_fold(h, column.id);
        h = avalanche_fold(
            h,
            kestrel_common::hash::hash_bytes(column.data_type.to_string().as_bytes()),
        );
    }
    h
}
