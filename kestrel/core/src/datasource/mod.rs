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

//! Format decoders and blob-backed datasets.
//!
//! A decoder turns raw bytes plus a projection into Arrow batches and
//! relation statistics. Formats are selected by file extension; ORC is
//! recognized but unsupported. Blob bytes flow through the engine's LRU-K
//! buffer pool, and a failing decode is retried once per blob before the
//! scan fails.

use std::sync::Arc;

use arrow::datatypes::SchemaRef;
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use kestrel_common::cache::BufferPool;
use kestrel_common::error::{Error, Result};
use kestrel_common::hash::hash_bytes;
use kestrel_common::stats::RelationStatistics;
use log::{debug, warn};

pub mod blob;
pub mod csv;
pub mod ipc;
pub mod jsonl;
pub mod parquet;

pub use blob::{BlobReader, LocalBlobReader, ReadHint};

use crate::catalog::{compute_statistics, DataSet};

/// What a decoder hands back: row/column counts, the schema, the decoded
/// batches and the relation statistics (keyed by column ordinal).
pub struct DecodedBlob {
    pub num_rows: usize,
    pub num_columns: usize,
    pub schema: SchemaRef,
    pub batches: Vec<RecordBatch>,
    pub statistics: RelationStatistics,
}

/// A format decoder. `projection` is a list of source column ordinals;
/// `None` decodes everything.
pub trait Decoder: Send + Sync {
    fn name(&self) -> &'static str;

    fn decode(&self, bytes: &Bytes, projection: Option<&[usize]>) -> Result<DecodedBlob>;

    /// Schema and statistics without materializing data, where the format
    /// allows it. The default decodes and throws the data away.
    fn metadata(&self, bytes: &Bytes) -> Result<(SchemaRef, RelationStatistics)> {
        let decoded = self.decode(bytes, None)?;
        Ok((decoded.schema, decoded.statistics))
    }
}

/// Pick a decoder from the blob path's extension.
pub fn decoder_for_path(path: &str) -> Result<Arc<dyn Decoder>> {
    let extension = path
        .rsplit('.')
        .next()
        .unwrap_or_default()
        .to_ascii_lowercase();
    match extension.as_str() {
        "parquet" => Ok(Arc::new(parquet::ParquetDecoder)),
        "csv" => Ok(Arc::new(csv::CsvDecoder)),
        "jsonl" | "ndjson" => Ok(Arc::new(jsonl::JsonlDecoder)),
        "arrow" | "ipc" | "feather" => Ok(Arc::new(ipc::IpcDecoder)),
        "orc" => Err(Error::UnsupportedSyntax(
            "ORC decoding is not supported".to_string(),
        )),
        other => Err(Error::UnsupportedSyntax(format!(
            "no decoder for '.{other}' files"
        ))),
    }
}

/// A dataset backed by a single blob. The schema and statistics are read
/// at registration; data decodes on demand through the buffer pool.
pub struct BlobDataSet {
    path: String,
    reader: Arc<dyn BlobReader>,
    pool: Arc<BufferPool>,
    decoder: Arc<dyn Decoder>,
    schema: SchemaRef,
    statistics: RelationStatistics,
}

impl BlobDataSet {
    pub fn try_new(
        path: impl Into<String>,
        reader: Arc<dyn BlobReader>,
        pool: Arc<BufferPool>,
    ) -> Result<Self> {
        let path = path.into();
        let decoder = decoder_for_path(&path)?;
        let bytes = read_through_pool(&path, reader.as_ref(), &pool)?;
        let (schema, statistics) = decoder.metadata(&bytes)?;
        Ok(Self {
            path,
            reader,
            pool,
            decoder,
            schema,
            statistics,
        })
    }
}

impl DataSet for BlobDataSet {
    fn schema(&self) -> SchemaRef {
        self.schema.clone()
    }

    fn statistics(&self) -> RelationStatistics {
        self.statistics.clone()
    }

    fn read(&self, projection: Option<&[usize]>) -> Result<Vec<RecordBatch>> {
        let bytes = read_through_pool(&self.path, self.reader.as_ref(), &self.pool)?;
        match self.decoder.decode(&bytes, projection) {
            Ok(decoded) => Ok(decoded.batches),
            Err(first_error) => {
                // one retry per blob with a fresh read, then the scan fails
                warn!(
                    "decode of '{}' failed ({first_error}), retrying once",
                    self.path
                );
                let bytes = self.reader.read_blob(&self.path, &[ReadHint::Sequential])?;
                self.decoder
                    .decode(&bytes, projection)
                    .map(|decoded| decoded.batches)
            }
        }
    }
}

/// Fetch blob bytes through the process-wide LRU-K cache.
pub fn read_through_pool(
    path: &str,
    reader: &dyn BlobReader,
    pool: &BufferPool,
) -> Result<Bytes> {
    let key = hash_bytes(path.as_bytes());
    if let Some(bytes) = pool.get(key) {
        return Ok(bytes);
    }
    let bytes = reader.read_blob(path, &[ReadHint::Sequential, ReadHint::WillNeed])?;
    pool.set(key, bytes.clone());
    while pool.over_capacity() {
        if pool.evict().is_none() {
            break;
        }
    }
    debug!("cached blob '{path}' ({} bytes)", bytes.len());
    Ok(bytes)
}

/// Shared fallback for formats without embedded statistics: scan the
/// decoded batches.
pub fn statistics_from_batches(batches: &[RecordBatch]) -> RelationStatistics {
    compute_statistics(batches)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn extensions_select_decoders() {
        assert_eq!(decoder_for_path("data/file.parquet").unwrap().name(), "parquet");
        assert_eq!(decoder_for_path("x.csv").unwrap().name(), "csv");
        assert_eq!(decoder_for_path("x.jsonl").unwrap().name(), "jsonl");
        assert_eq!(decoder_for_path("x.arrow").unwrap().name(), "ipc");
        assert!(matches!(
            decoder_for_path("x.orc"),
            Err(Error::UnsupportedSyntax(_))
        ));
        assert!(decoder_for_path("x.xlsx").is_err());
    }
}
