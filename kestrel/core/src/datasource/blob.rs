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

//! The blob reader boundary.
//!
//! The core sees one interface: give me the bytes at a path. Connector
//! crates implement it for their stores; the local implementation here is
//! backed by `object_store`'s filesystem store. Hints are advisory and may
//! be ignored by implementations that have no use for them.

use std::sync::Arc;

use bytes::Bytes;
use futures::executor::block_on;
use kestrel_common::error::{Error, Result};
use object_store::local::LocalFileSystem;
use object_store::path::Path as StorePath;
use object_store::ObjectStore;

/// Advisory OS hints for an upcoming read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ReadHint {
    Sequential,
    WillNeed,
    DropAfter,
}

/// Reads whole blobs by path.
pub trait BlobReader: Send + Sync {
    fn read_blob(&self, path: &str, hints: &[ReadHint]) -> Result<Bytes>;
}

/// Local-filesystem blob reader.
pub struct LocalBlobReader {
    store: Arc<LocalFileSystem>,
}

impl Default for LocalBlobReader {
    fn default() -> Self {
        Self::new()
    }
}

impl LocalBlobReader {
    pub fn new() -> Self {
        Self {
            store: Arc::new(LocalFileSystem::new()),
        }
    }
}

impl BlobReader for LocalBlobReader {
    fn read_blob(&self, path: &str, _hints: &[ReadHint]) -> Result<Bytes> {
        let store_path = StorePath::from_filesystem_path(path)
            .map_err(|e| Error::BlobNotFound(format!("{path}: {e}")))?;
        let result = block_on(async {
            let response = self.store.get(&store_path).await?;
            response.bytes().await
        });
        match result {
            Ok(bytes) => Ok(bytes),
            Err(object_store::Error::NotFound { .. }) => {
                Err(Error::BlobNotFound(path.to_string()))
            }
            Err(e) => Err(Error::Decode {
                blob: path.to_string(),
                message: e.to_string(),
            }),
        }
    }
}
