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

//! The catalog boundary: dataset names to readable relations.
//!
//! Datasets expose a source schema, relation statistics keyed by column
//! ordinal (the binder rekeys them onto stable column identities), and a
//! projected read. The in-memory catalog is read-mostly; registration
//! happens at startup.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use kestrel_common::error::{Error, Result};
use kestrel_common::hash::FlatHashSet;
use kestrel_common::stats::RelationStatistics;
use kestrel_expr::value::Value;
use parking_lot::RwLock;

/// A readable relation.
pub trait DataSet: Send + Sync {
    /// Source schema with the dataset's own field names.
    fn schema(&self) -> SchemaRef;

    /// Statistics keyed by column ordinal.
    fn statistics(&self) -> RelationStatistics;

    /// Materialize the dataset, restricted to the given column ordinals.
    fn read(&self, projection: Option<&[usize]>) -> Result<Vec<RecordBatch>>;
}

/// Resolves dataset names. Read-only after startup.
pub trait Catalog: Send + Sync {
    fn dataset(&self, name: &str) -> Result<Arc<dyn DataSet>>;

    fn names(&self) -> Vec<String>;
}

/// A dataset held fully in memory.
pub struct MemoryDataSet {
    schema: SchemaRef,
    batches: Vec<RecordBatch>,
    statistics: RelationStatistics,
}

impl MemoryDataSet {
    pub fn new(schema: SchemaRef, batches: Vec<RecordBatch>) -> Self {
        let statistics = compute_statistics(&batches);
        Self {
            schema,
            batches,
            statistics,
        }
    }
}

impl DataSet for MemoryDataSet {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn statistics(&self) -> RelationStatistics {
        self.statistics.clone()
    }

    fn read(&self, projection: Option<&[usize]>) -> Result<Vec<RecordBatch>> {
        match projection {
            None => Ok(self.batches.clone()),
            Some(indices) => self
                .batches
                .iter()
                .map(|batch| batch.project(indices).map_err(Error::from))
                .collect(),
        }
    }
}

/// Name-keyed catalog of datasets.
#[derive(Default)]
pub struct MemoryCatalog {
    datasets: RwLock<Vec<(String, Arc<dyn DataSet>)>>,
}

impl MemoryCatalog {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, name: impl Into<String>, dataset: Arc<dyn DataSet>) {
        let name = name.into().to_lowercase();
        let mut datasets = self.datasets.write();
        datasets.retain(|(existing, _)| *existing != name);
        datasets.push((name, dataset));
    }
}

impl Catalog for MemoryCatalog {
    fn dataset(&self, name: &str) -> Result<Arc<dyn DataSet>> {
        let wanted = name.to_lowercase();
        self.datasets
            .read()
            .iter()
            .find(|(name, _)| *name == wanted)
            .map(|(_, dataset)| dataset.clone())
            .ok_or_else(|| Error::DatasetNotFound(name.to_string()))
    }

    fn names(&self) -> Vec<String> {
        self.datasets
            .read()
            .iter()
            .map(|(name, _)| name.clone())
            .collect()
    }
}

/// Column bounds, null counts and cardinality estimates from a full pass
/// over in-memory batches, keyed by column ordinal.
pub fn compute_statistics(batches: &[RecordBatch]) -> RelationStatistics {
    let mut statistics = RelationStatistics::new();
    let mut distinct: Vec<FlatHashSet> = Vec::new();
    for batch in batches {
        statistics.record_count += batch.num_rows() as u64;
        distinct.resize_with(batch.num_columns().max(distinct.len()), FlatHashSet::new);
        for (ordinal, column) in batch.columns().iter().enumerate() {
            let key = ordinal as u64;
            statistics.add_null(key, column.null_count() as u64);
            let Ok(cells) =
                kestrel_common::hash::row::cell_hashes(column.as_ref())
            else {
                continue;
            };
            for cell in cells {
                if cell != kestrel_common::hash::NULL_HASH {
                    distinct[ordinal].insert(cell);
                }
            }
            for row in 0..column.len() {
                if column.is_null(row) {
                    continue;
                }
                let Ok(value) = Value::try_from_array(column.as_ref(), row) else {
                    continue;
                };
                let bound = value.to_bound();
                statistics.update_lower(key, bound);
                statistics.update_upper(key, bound);
            }
        }
    }
    for (ordinal, set) in distinct.iter().enumerate() {
        if set.items() > 0 {
            statistics.set_cardinality(ordinal as u64, set.items() as u64);
        }
    }
    statistics
}

#[cfg(test)]
mod tests {
    use arrow::array::{Int64Array, StringArray};
    use arrow::datatypes::{DataType, Field, Schema};

    use super::*;

    fn sample() -> MemoryDataSet {
        let schema = Arc::new(Schema::new(vec![
            Field::new("id", DataType::Int64, false),
            Field::new("name", DataType::Utf8, true),
        ]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![
                Arc::new(Int64Array::from(vec![1, 2, 2, 9])),
                Arc::new(StringArray::from(vec![
                    Some("Mercury"),
                    Some("Venus"),
                    None,
                    Some("Pluto"),
                ])),
            ],
        )
        .unwrap();
        MemoryDataSet::new(schema, vec![batch])
    }

    #[test]
    fn statistics_cover_bounds_nulls_and_cardinality() {
        let stats = sample().statistics();
        assert_eq!(stats.record_count, 4);
        assert_eq!(stats.lower_bound(0), Some(1));
        assert_eq!(stats.upper_bound(0), Some(9));
        assert_eq!(stats.null_count(1), Some(1));
        assert_eq!(stats.cardinality_estimates.get(&0), Some(&3));
    }

    #[test]
    fn lookup_is_case_insensitive() {
        let catalog = MemoryCatalog::new();
        catalog.register("Planets", Arc::new(sample()));
        assert!(catalog.dataset("planets").is_ok());
        assert!(catalog.dataset("PLANETS").is_ok());
        assert!(matches!(
            catalog.dataset("comets"),
            Err(Error::DatasetNotFound(_))
        ));
    }

    #[test]
    fn projected_reads_keep_row_counts() {
        let dataset = sample();
        let batches = dataset.read(Some(&[1])).unwrap();
        assert_eq!(batches[0].num_columns(), 1);
        assert_eq!(batches[0].num_rows(), 4);
    }
}
