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

//! Arrow IPC decoding: file format first, stream format as the fallback.

use std::io::Cursor;
use std::sync::Arc;

use arrow::ipc::reader::{FileReader, StreamReader};
use arrow::record_batch::RecordBatch;
use bytes::Bytes;
use kestrel_common::error::{Error, Result};

use super::{statistics_from_batches, DecodedBlob, Decoder};

pub struct IpcDecoder;

impl Decoder for IpcDecoder {
    fn name(&self) -> &'static str {
        "ipc"
    }

    fn decode(&self, bytes: &Bytes, projection: Option<&[usize]>) -> Result<DecodedBlob> {
        let projection_vec = projection.map(|indices| indices.to_vec());
        let batches = read_file_format(bytes, projection_vec.clone())
            .or_else(|_| read_stream_format(bytes, projection_vec))?;

        let schema = batches
            .first()
            .map(|batch| batch.schema())
            .unwrap_or_else(|| Arc::new(arrow::datatypes::Schema::empty()));
        let num_rows = batches.iter().map(RecordBatch::num_rows).sum();
        let statistics = statistics_from_batches(&batches);
        Ok(DecodedBlob {
            num_rows,
            num_columns: schema.fields().len(),
            schema,
            batches,
            statistics,
        })
    }
}

fn read_file_format(bytes: &Bytes, projection: Option<Vec<usize>>) -> Result<Vec<RecordBatch>> {
    let reader =
        FileReader::try_new(Cursor::new(bytes.as_ref()), projection).map_err(ipc_error)?;
    reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(ipc_error)
}

fn read_stream_format(bytes: &Bytes, projection: Option<Vec<usize>>) -> Result<Vec<RecordBatch>> {
    let reader =
        StreamReader::try_new(Cursor::new(bytes.as_ref()), projection).map_err(ipc_error)?;
    reader
        .collect::<std::result::Result<Vec<_>, _>>()
        .map_err(ipc_error)
}

fn ipc_error(e: arrow::error::ArrowError) -> Error {
    Error::Decode {
        blob: "<ipc>".to_string(),
        message: e.to_string(),
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::Int64Array;
    use arrow::datatypes::{DataType, Field, Schema};
    use arrow::ipc::writer::FileWriter;

    use super::*;

    fn sample_ipc() -> Bytes {
        let schema = Arc::new(Schema::new(vec![Field::new("id", DataType::Int64, false)]));
        let batch = RecordBatch::try_new(
            schema.clone(),
            vec![Arc::new(Int64Array::from(vec![5, 6, 7]))],
        )
        .unwrap();
        let mut out = Vec::new();
        let mut writer = FileWriter::try_new(&mut out, &schema).unwrap();
        writer.write(&batch).unwrap();
        writer.finish().unwrap();
        Bytes::from(out)
    }

    #[test]
    fn file_format_round_trips() {
        let bytes = sample_ipc();
        let decoded = IpcDecoder.decode(&bytes, None).unwrap();
        assert_eq!(decoded.num_rows, 3);
        assert_eq!(decoded.schema.field(0).name(), "id");
        assert_eq!(decoded.statistics.lower_bound(0), Some(5));
        assert_eq!(decoded.statistics.upper_bound(0), Some(7));
    }

    #[test]
    fn truncated_streams_fail_decode() {
        let bytes = sample_ipc();
        let truncated = bytes.slice(0..bytes.len() / 2);
        assert!(IpcDecoder.decode(&truncated, None).is_err());
    }
}
