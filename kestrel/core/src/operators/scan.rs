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

//! The scan operator: the leaf that turns a dataset into morsels.
//!
//! Decode happens on the first pump; pushed-down predicates (including the
//! AND-ed visibility filters) apply immediately after decode, the limit is
//! honored by emitting EOS the moment it is met, and a statistics-pruned
//! scan produces a single empty morsel with the correct schema.

use std::collections::VecDeque;
use std::sync::Arc;

use arrow::compute::filter_record_batch;
use arrow::record_batch::RecordBatch;
use kestrel_common::error::{Error, Result};
use kestrel_expr::dnf::Clause;
use kestrel_expr::expr::Expr;
use kestrel_expr::schema::RelationSchema;
use kestrel_optimizer::predicate_rewriter::dnf_to_expr;

use crate::catalog::DataSet;
use crate::evaluator::Evaluator;
use crate::execution::morsel::{Morsel, Payload};
use crate::execution::stats::QueryStatistics;
use crate::operators::{Leg, PhysicalOperator};

enum ScanState {
    NotStarted,
    Emitting { chunks: VecDeque<RecordBatch> },
    Finishing,
    Done,
}

pub struct ScanOperator {
    dataset_name: String,
    dataset: Arc<dyn DataSet>,
    /// Output schema after projection.
    output_schema: RelationSchema,
    /// Source ordinals handed to the decoder.
    ordinals: Vec<usize>,
    predicate: Option<Expr>,
    predicate_text: String,
    limit: Option<usize>,
    pruned_empty: bool,
    morsel_size: usize,
    evaluator: Evaluator,
    state: ScanState,
    produced: usize,
    statistics: QueryStatistics,
}

impl ScanOperator {
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        dataset_name: impl Into<String>,
        dataset: Arc<dyn DataSet>,
        source_schema: RelationSchema,
        projection: Option<Vec<u64>>,
        predicates: Vec<Clause>,
        limit: Option<usize>,
        pruned_empty: bool,
        morsel_size: usize,
        evaluator: Evaluator,
    ) -> Result<Self> {
        let projected_ids = match &projection {
            Some(ids) => ids.clone(),
            None => source_schema.column_ids(),
        };
        let mut ordinals = Vec::with_capacity(projected_ids.len());
        for id in &projected_ids {
            ordinals.push(source_schema.index_of(*id).ok_or_else(|| {
                Error::Internal(format!("scan projection references unknown column {id}"))
            })?);
        }
        let output_schema = source_schema.project(&projected_ids)?;
        let predicate_text = match kestrel_expr::dnf::simplify(predicates.clone()) {
            Some(tree) => tree.to_string(),
            None => String::new(),
        };
        let predicate = if predicates.is_empty() {
            None
        } else {
            Some(dnf_to_expr(&predicates))
        };
        Ok(Self {
            dataset_name: dataset_name.into(),
            dataset,
            output_schema,
            ordinals,
            predicate,
            predicate_text,
            limit,
            pruned_empty,
            morsel_size: morsel_size.max(1),
            evaluator,
            state: ScanState::NotStarted,
            produced: 0,
            statistics: QueryStatistics::new(),
        })
    }

    fn load(&mut self) -> Result<VecDeque<RecordBatch>> {
        let batches = self.dataset.read(Some(&self.ordinals))?;
        let physical = self.output_schema.to_physical_schema();
        let mut chunks = VecDeque::new();
        for batch in batches {
            self.statistics.add("rows_read", batch.num_rows() as u64);
            self.statistics
                .add("bytes_processed", batch.get_array_memory_size() as u64);
            // re-stamp decoder field names onto the bound identities
            let batch = RecordBatch::try_new(physical.clone(), batch.columns().to_vec())?;
            let mut offset = 0;
            while offset < batch.num_rows() {
                let length = self.morsel_size.min(batch.num_rows() - offset);
                chunks.push_back(batch.slice(offset, length));
                offset += length;
            }
        }
        self.statistics
            .set("columns_read", self.ordinals.len() as u64);
        self.statistics.increment("partitions_scanned");
        Ok(chunks)
    }

    fn next_morsel(&mut self) -> Result<Option<Morsel>> {
        loop {
            let chunk = match &mut self.state {
                ScanState::Emitting { chunks } => chunks.pop_front(),
                _ => None,
            };
            let Some(chunk) = chunk else {
                return Ok(None);
            };

            let mut morsel = Morsel::new(self.output_schema.clone(), chunk)?;
            if let Some(predicate) = &self.predicate {
                let mask = self.evaluator.evaluate_predicate(predicate, &morsel)?;
                let filtered = filter_record_batch(morsel.batch(), &mask)?;
                morsel = Morsel::new(self.output_schema.clone(), filtered)?;
            }
            if let Some(limit) = self.limit {
                let remaining = limit.saturating_sub(self.produced);
                if remaining == 0 {
                    return Ok(None);
                }
                if morsel.num_rows() > remaining {
                    let trimmed = morsel.batch().slice(0, remaining);
                    morsel = Morsel::new(self.output_schema.clone(), trimmed)?;
                }
            }
            if morsel.num_rows() == 0 {
                continue;
            }
            self.produced += morsel.num_rows();
            return Ok(Some(morsel));
        }
    }
}

impl PhysicalOperator for ScanOperator {
    fn name(&self) -> &'static str {
        "SCAN"
    }

    fn config(&self) -> String {
        let mut config = format!("({})", self.dataset_name);
        if self.pruned_empty {
            config.push_str(" PRUNED");
        }
        if !self.predicate_text.is_empty() {
            config.push_str(&format!(" FILTER ({})", self.predicate_text));
        }
        if let Some(limit) = self.limit {
            config.push_str(&format!(" LIMIT {limit}"));
        }
        config
    }

    fn schema(&self) -> &RelationSchema {
        &self.output_schema
    }

    fn is_source(&self) -> bool {
        true
    }

    fn pump(&mut self) -> Result<Payload> {
        loop {
            match &mut self.state {
                ScanState::NotStarted => {
                    if self.pruned_empty {
                        self.state = ScanState::Finishing;
                        return Ok(Payload::Morsel(Morsel::empty(self.output_schema.clone())?));
                    }
                    let chunks = self.load()?;
                    self.state = ScanState::Emitting { chunks };
                }
                ScanState::Emitting { .. } => match self.next_morsel()? {
                    Some(morsel) => return Ok(Payload::Morsel(morsel)),
                    None => {
                        self.state = ScanState::Done;
                        return Ok(Payload::Eos);
                    }
                },
                ScanState::Finishing => {
                    self.state = ScanState::Done;
                    return Ok(Payload::Eos);
                }
                ScanState::Done => return Ok(Payload::Eos),
            }
        }
    }

    fn step(&mut self, _payload: Payload, _leg: Leg) -> Result<Vec<Payload>> {
        Err(Error::Internal("scan operators are never stepped".to_string()))
    }

    fn statistics(&self) -> QueryStatistics {
        self.statistics.clone()
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};
    use kestrel_expr::dnf::{CmpOp, Predicate};
    use kestrel_expr::registry::FunctionRegistry;
    use kestrel_expr::schema::ColumnDef;
    use kestrel_expr::value::Value;

    use super::*;
    use crate::catalog::MemoryDataSet;

    fn planets_like() -> (Arc<dyn DataSet>, RelationSchema) {
        let arrow_schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, false),
        ]));
        let batch = RecordBatch::try_new(
            arrow_schema.clone(),
            vec![
                Arc::new(Int64Array::from_iter_values(1..=9)),
                Arc::new(StringArray::from(vec![
                    "Mercury", "Venus", "Earth", "Mars", "Jupiter", "Saturn", "Uranus",
                    "Neptune", "Pluto",
                ])),
            ],
        )
        .unwrap();
        let dataset: Arc<dyn DataSet> = Arc::new(MemoryDataSet::new(arrow_schema, vec![batch]));
        let schema = RelationSchema::new(vec![
            ColumnDef::new(1, "id", DataType::Int64),
            ColumnDef::new(2, "name", DataType::Utf8),
        ]);
        (dataset, schema)
    }

    fn drain(operator: &mut ScanOperator) -> Vec<Morsel> {
        let mut morsels = Vec::new();
        loop {
            match operator.pump().unwrap() {
                Payload::Morsel(morsel) => morsels.push(morsel),
                Payload::Eos => return morsels,
            }
        }
    }

    fn evaluator() -> Evaluator {
        Evaluator::new(Arc::new(FunctionRegistry::standard()))
    }

    #[test]
    fn morsels_respect_the_row_cap() {
        let (dataset, schema) = planets_like();
        let mut scan = ScanOperator::new(
            "planets", dataset, schema, None, vec![], None, false, 4, evaluator(),
        )
        .unwrap();
        let morsels = drain(&mut scan);
        assert_eq!(
            morsels.iter().map(Morsel::num_rows).collect::<Vec<_>>(),
            vec![4, 4, 1]
        );
        assert_eq!(scan.statistics().get("rows_read"), 9);
    }

    #[test]
    fn predicates_apply_immediately_after_decode() {
        let (dataset, schema) = planets_like();
        let predicates = vec![vec![Predicate::new(1, "id", CmpOp::Gt, Value::Int64(4))]];
        let mut scan = ScanOperator::new(
            "planets", dataset, schema, None, predicates, None, false, 100, evaluator(),
        )
        .unwrap();
        assert_eq!(scan.config(), "(planets) FILTER (id > 4)");
        let morsels = drain(&mut scan);
        assert_eq!(morsels.iter().map(Morsel::num_rows).sum::<usize>(), 5);
    }

    #[test]
    fn limits_stop_production_early() {
        let (dataset, schema) = planets_like();
        let mut scan = ScanOperator::new(
            "planets", dataset, schema, None, vec![], Some(3), false, 2, evaluator(),
        )
        .unwrap();
        let morsels = drain(&mut scan);
        assert_eq!(morsels.iter().map(Morsel::num_rows).sum::<usize>(), 3);
    }

    #[test]
    fn pruned_scans_emit_one_empty_morsel() {
        let (dataset, schema) = planets_like();
        let mut scan = ScanOperator::new(
            "planets", dataset, schema, None, vec![], None, true, 100, evaluator(),
        )
        .unwrap();
        let morsels = drain(&mut scan);
        assert_eq!(morsels.len(), 1);
        assert_eq!(morsels[0].num_rows(), 0);
        assert_eq!(morsels[0].schema().len(), 2);
    }

    #[test]
    fn projection_restricts_output_columns() {
        let (dataset, schema) = planets_like();
        let mut scan = ScanOperator::new(
            "planets",
            dataset,
            schema,
            Some(vec![2]),
            vec![],
            None,
            false,
            100,
            evaluator(),
        )
        .unwrap();
        let morsels = drain(&mut scan);
        assert_eq!(morsels[0].schema().len(), 1);
        assert_eq!(morsels[0].schema().columns()[0].name, "name");
    }
}
