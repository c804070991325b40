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

//! The engine context.
//!
//! Everything process-wide lives here: configuration, the blob buffer
//! pool, the morsel memory pool, the function registry, the catalog and
//! the optimizer. Queries receive the context instead of reaching for
//! globals; the registry and catalog are read-only once queries start.

use std::sync::Arc;

use kestrel_common::cache::{BufferPool, MemoryPool};
use kestrel_common::error::Result;
use kestrel_common::EngineConfig;
use kestrel_expr::registry::FunctionRegistry;
use kestrel_optimizer::Optimizer;

use crate::catalog::{Catalog, DataSet, MemoryCatalog};
use crate::cursor::Connection;
use crate::datasource::{BlobDataSet, LocalBlobReader};
use crate::sample_data::register_sample_data;

struct EngineInner {
    config: EngineConfig,
    buffer_pool: Arc<BufferPool>,
    memory_pool: Arc<MemoryPool>,
    registry: Arc<FunctionRegistry>,
    catalog: Arc<MemoryCatalog>,
    optimizer: Optimizer,
}

/// A cheaply clonable handle to the engine context.
#[derive(Clone)]
pub struct Engine {
    inner: Arc<EngineInner>,
}

impl Default for Engine {
    fn default() -> Self {
        Self::new(EngineConfig::default())
    }
}

impl Engine {
    pub fn new(config: EngineConfig) -> Self {
        let catalog = Arc::new(MemoryCatalog::new());
        register_sample_data(&catalog);
        Self {
            inner: Arc::new(EngineInner {
                buffer_pool: Arc::new(BufferPool::new(
                    config.buffer_pool_capacity,
                    config.buffer_pool_k,
                )),
                memory_pool: Arc::new(MemoryPool::new(config.memory_pool_capacity)),
                registry: Arc::new(FunctionRegistry::standard()),
                catalog,
                optimizer: Optimizer::standard(),
                config,
            }),
        }
    }

    /// Open a connection.
    pub fn connect(&self) -> Connection {
        Connection::new(self.clone())
    }

    /// Register an in-memory or custom dataset under a name.
    pub fn register_dataset(&self, name: impl Into<String>, dataset: Arc<dyn DataSet>) {
        self.inner.catalog.register(name, dataset);
    }

    /// Register a dataset backed by a local blob; the format comes from
    /// the file extension.
    pub fn register_blob_dataset(
        &self,
        name: impl Into<String>,
        path: impl Into<String>,
    ) -> Result<()> {
        let dataset = BlobDataSet::try_new(
            path,
            Arc::new(LocalBlobReader::new()),
            self.inner.buffer_pool.clone(),
        )?;
        self.inner.catalog.register(name, Arc::new(dataset));
        Ok(())
    }

    pub fn config(&self) -> &EngineConfig {
        &self.inner.config
    }

    pub fn buffer_pool(&self) -> Arc<BufferPool> {
        self.inner.buffer_pool.clone()
    }

    pub fn memory_pool(&self) -> Arc<MemoryPool> {
        self.inner.memory_pool.clone()
    }

    pub fn registry(&self) -> Arc<FunctionRegistry> {
        self.inner.registry.clone()
    }

    pub fn catalog(&self) -> Arc<dyn Catalog> {
        self.inner.catalog.clone()
    }

    pub fn optimizer(&self) -> &Optimizer {
        &self.inner.optimizer
    }
}
