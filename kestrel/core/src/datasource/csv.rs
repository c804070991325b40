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

//! CSV decoding with header-based schema inference.

use std::io::Cursor;
use std::sync::Arc;

use arrow::csv::reader::Format;
use arrow::csv::ReaderBuilder;
use bytes::Bytes;
use kestrel_common::error::{Error, Result};

use super::{statistics_from_batches, DecodedBlob, Decoder};

pub struct CsvDecoder;

impl Decoder for CsvDecoder {
    fn name(&self) -> &'static str {
        "csv"
    }

    fn decode(&self, bytes: &Bytes, projection: Option<&[usize]>) -> Result<DecodedBlob> {
        let format = Format::default().with_header(true);
        let (schema, _) = format
            .infer_schema(Cursor::new(bytes.as_ref()), None)
            .map_err(|e| Error::Decode {
                blob: "<csv>".to_string(),
                message: e.to_string(),
            })?;
        let schema = Arc::new(schema);

        let mut builder = ReaderBuilder::new(schema.clone()).with_header(true);
        if let Some(indices) = projection {
            builder = builder.with_projection(indices.to_vec());
        }
        let reader = builder
            .build(Cursor::new(bytes.as_ref()))
            .map_err(|e| Error::Decode {
                blob: "<csv>".to_string(),
                message: e.to_string(),
            })?;

        let mut batches = Vec::new();
        let mut num_rows = 0usize;
        for batch in reader {
            let batch = batch.map_err(|e| Error::Decode {
                blob: "<csv>".to_string(),
                message: e.to_string(),
            })?;
            num_rows += batch.num_rows();
            batches.push(batch);
        }
        let out_schema = batches
            .first()
            .map(|batch| batch.schema())
            .unwrap_or_else(|| match projection {
                Some(indices) => {
                    Arc::new(schema.project(indices).unwrap_or_else(|_| (*schema).clone()))
                }
                None => schema.clone(),
            });
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
    fn headers_drive_inference() {
        let bytes = Bytes::from_static(b"id,name\n1,Mercury\n2,Venus\n");
        let decoded = CsvDecoder.decode(&bytes, None).unwrap();
        assert_eq!(decoded.num_rows, 2);
        assert_eq!(decoded.schema.field(0).name(), "id");
        let ids = decoded.batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<Int64Array>()
            .unwrap();
        assert_eq!(ids.value(1), 2);
    }

    #[test]
    fn projection_restricts_columns() {
        let bytes = Bytes::from_static(b"id,name\n1,Mercury\n");
        let decoded = CsvDecoder.decode(&bytes, Some(&[1])).unwrap();
        assert_eq!(decoded.num_columns, 1);
        let names = decoded.batches[0]
            .column(0)
            .as_any()
            .downcast_ref::<StringArray>()
            .unwrap();
        assert_eq!(names.value(0), "Mercury");
    }

    #[test]
    fn garbage_fails_as_decode_error() {
        let bytes = Bytes::from_static(b"a,b\n1,2\n1,2,3,4,5\n");
        assert!(matches!(
            CsvDecoder.decode(&bytes, None),
            Err(Error::Decode { .. })
        ));
    }
}
