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

//! LIMIT/OFFSET: skip then take, emitting EOS the instant the quota is met
//! so upstreams stop producing.

use kestrel_common::error::Result;
use kestrel_expr::schema::RelationSchema;

use crate::execution::morsel::{Morsel, Payload};
use crate::operators::{Leg, PhysicalOperator};

pub struct LimitOperator {
    limit: Option<usize>,
    offset: usize,
    schema: RelationSchema,
    skipped: usize,
    taken: usize,
    done: bool,
}

impl LimitOperator {
    pub fn new(limit: Option<usize>, offset: usize, schema: RelationSchema) -> Self {
        Self {
            limit,
            offset,
            schema,
            skipped: 0,
            taken: 0,
            done: false,
        }
    }
}

impl PhysicalOperator for LimitOperator {
    fn name(&self) -> &'static str {
        "LIMIT"
    }

    fn config(&self) -> String {
        match (self.limit, self.offset) {
            (Some(limit), 0) => format!("{limit}"),
            (Some(limit), offset) => format!("{limit} OFFSET {offset}"),
            (None, offset) => format!("ALL OFFSET {offset}"),
        }
    }

    fn schema(&self) -> &RelationSchema {
        &self.schema
    }

    fn step(&mut self, payload: Payload, _leg: Leg) -> Result<Vec<Payload>> {
        if self.done {
            // quota met earlier; swallow stragglers, including the EOS the
            // upstream owes us
            return Ok(vec![]);
        }
        match payload {
            Payload::Eos => {
                self.done = true;
                Ok(vec![Payload::Eos])
            }
            Payload::Morsel(morsel) => {
                let mut batch = morsel.batch().clone();

                // skip phase
                if self.skipped < self.offset {
                    let to_skip = (self.offset - self.skipped).min(batch.num_rows());
                    self.skipped += to_skip;
                    if to_skip == batch.num_rows() {
                        return Ok(vec![]);
                    }
                    batch = batch.slice(to_skip, batch.num_rows() - to_skip);
                }

                // take phase
                if let Some(limit) = self.limit {
                    let remaining = limit.saturating_sub(self.taken);
                    if remaining == 0 {
                        self.done = true;
                        return Ok(vec![Payload::Eos]);
                    }
                    if batch.num_rows() > remaining {
                        batch = batch.slice(0, remaining);
                    }
                    self.taken += batch.num_rows();
                    let mut out = vec![Payload::Morsel(Morsel::new(
                        self.schema.clone(),
                        batch,
                    )?)];
                    if self.taken >= limit {
                        self.done = true;
                        out.push(Payload::Eos);
                    }
                    return Ok(out);
                }

                self.taken += batch.num_rows();
                Ok(vec![Payload::Morsel(Morsel::new(self.schema.clone(), batch)?)])
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use arrow::array::Int64Array;
    use arrow::datatypes::DataType;
    use arrow::record_batch::RecordBatch;
    use kestrel_expr::schema::ColumnDef;

    use super::*;

    fn morsel(schema: &RelationSchema, values: Vec<i64>) -> Payload {
        let batch = RecordBatch::try_new(
            schema.to_physical_schema(),
            vec![Arc::new(Int64Array::from(values))],
        )
        .unwrap();
        Payload::Morsel(Morsel::new(schema.clone(), batch).unwrap())
    }

    fn rows(payloads: &[Payload]) -> usize {
        payloads
            .iter()
            .map(|p| match p {
                Payload::Morsel(m) => m.num_rows(),
                Payload::Eos => 0,
            })
            .sum()
    }

    #[test]
    fn quota_emits_eos_immediately() {
        let schema = RelationSchema::new(vec![ColumnDef::new(1, "n", DataType::Int64)]);
        let mut limit = LimitOperator::new(Some(3), 0, schema.clone());

        let out = limit
            .step(morsel(&schema, vec![1, 2]), Leg::Only)
            .unwrap();
        assert_eq!(rows(&out), 2);
        assert_eq!(out.len(), 1);

        // the quota completes mid-morsel: rows are trimmed and EOS follows
        let out = limit
            .step(morsel(&schema, vec![3, 4, 5]), Leg::Only)
            .unwrap();
        assert_eq!(rows(&out), 1);
        assert!(matches!(out.last(), Some(Payload::Eos)));

        // anything after the quota is swallowed
        assert!(limit
            .step(morsel(&schema, vec![6]), Leg::Only)
            .unwrap()
            .is_empty());
        assert!(limit.step(Payload::Eos, Leg::Only).unwrap().is_empty());
    }

    #[test]
    fn offset_skips_across_morsels() {
        let schema = RelationSchema::new(vec![ColumnDef::new(1, "n", DataType::Int64)]);
        let mut limit = LimitOperator::new(Some(2), 3, schema.clone());

        assert!(limit
            .step(morsel(&schema, vec![1, 2]), Leg::Only)
            .unwrap()
            .is_empty());
        let out = limit
            .step(morsel(&schema, vec![3, 4, 5]), Leg::Only)
            .unwrap();
        // skipped 3, then takes 4 and 5, quota met
        assert_eq!(rows(&out), 2);
        assert!(matches!(out.last(), Some(Payload::Eos)));
    }
}
