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

//! JSONL (newline-delimited JSON) decoding.
//!
//! The schema is inferred from the parsed values, then the arrow JSON
//! reader materializes batches. Projection applies after decode; JSONL has
//! no columnar layout to push it into.

use std::io::{BufReader, Cursor};
use std::sync::Arc;

use arrow::json::reader::{infer_json_schema_from_iterator, ReaderBuilder};
use bytes::Bytes;
use kestrel_common::error::{Error, Result};

use super::{statistics_from_batches, DecodedBlob, Decoder};

pub struct JsonlDecoder;

impl Decoder for JsonlDecoder {
    fn name(&self) -> &'static str {
        "jsonl"
    }

    fn decode(&self, bytes: &Bytes, projection: Option<&[usize]>) -> Result<DecodedBlob> {
        let text = std::str::from_utf8(bytes).map_err(|e| Error::Decode {
            blob: "<jsonl>".to_string(),
            message: format!("not valid utf-8: {e}"),
        })?;
        let values: Result<Vec<serde_json::Value>> = text
            .lines()
            .filter(|line| !line.trim().is_empty())
            .map(|line| {
                serde_json::from_str(line).map_err(|e| Error::Decode {
                    blob: "<jsonl>".to_string(),
                    message: format!("malformed JSON line: {e}"),
                })
            })
            .collect();
        let values = values?;

        let schema = infer_json_schema_from_iterator(values.iter().map(|v| Ok(v.clone())))
            .map_err(|e| Error::Decode {
                blob: "<jsonl>".to_string(),
                message: e.to_string(),
            })?;
        let schema = Arc::new(schema);

        let reader = ReaderBuilder::new(schema.clone())
            .build(BufReader::new(Cursor::new(bytes.as_ref())))
            .map_err(|e| Error::Decode {
                blob: "<jsonl>".to_string(),
                message: e.to_string(),
            })?;

        let mut batches = Vec::new();
        let mut num_rows = 0usize;
        for batch in reader {
            let mut batch = batch.map_err(|e| Error::Decode {
                blob: "<jsonl>".to_string(),
                message: e.to_string(),
            })?;
            if let Some(indices) = projection {
                batch = batch.project(indices)?;
            }
            num_rows += batch.num_rows();
            batches.push(batch);
        }
        let out_schema = match projection {
            Some(indices) => Arc::new(schema.project(indices)?),
            None => schema,
        };
        let statistics = statistics_from_batches(&batches);
        Ok(DecodedBlob {
            num_rows,
            num_columns: out_schema.fields().len(),
            schema: out_schema,
            batches,
            statistics,
        })
    }
}

#[cfg(test)]
mod tests {
    use arrow::array::{Int64Array, StringArray};

    use super::*;

    #[test]
    fn lines_become_rows() {
        let bytes = Bytes::from_static(
            b"{\"id\": 1, \"name\": \"Mercury\"}\n{\"id\": 2, \"name\": \"Venus\"}\n",
        );
        let decoded = JsonlDecoder.decode(&bytes, None).unwrap();
        assert_eq!(decoded.num_rows, 2);
        let batch = &decoded.batches[0];
        let ids = batch
            .column_by_name("id")
            .unwrap()
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(ids.value(0), 1);
        let names = batch
            .column_by_name("name")
            .unwrap()
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(names.value(1), "Venus");
    }

    #[test]
    fn malformed_lines_fail_decode() {
        let bytes = Bytes::from_static(b"{\"id\": 1}\nnot json\n");
        assert!(matches!(
            JsonlDecoder.decode(&bytes, None),
            Err(Error::Decode { .. })
        ));
    }

    #[test]
    fn blank_lines_are_ignored() {
        let bytes = Bytes::from_static(b"{\"id\": 1}\n\n{\"id\": 2}\n");
        let decoded = JsonlDecoder.decode(&bytes, None).unwrap();
        assert_eq!(decoded.num_rows, 2);
    }
}
