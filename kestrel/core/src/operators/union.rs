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

//! UNION ALL: forward morsels from every branch. The branches were already
//! projected onto shared column identities at bind time, and the executor
//! delivers one EOS only after every branch finished. UNION (distinct)
//! plans a DISTINCT above this operator.

use kestrel_common::error::Result;
use kestrel_expr::schema::RelationSchema;

use crate::execution::morsel::Payload;
use crate::operators::{Leg, PhysicalOperator};

pub struct UnionOperator {
    schema: RelationSchema,
}

impl UnionOperator {
    pub fn new(schema: RelationSchema) -> Self {
        Self { schema }
    }
}

impl PhysicalOperator for UnionOperator {
    fn name(&self) -> &'static str {
        "UNION"
    }

    fn schema(&self) -> &RelationSchema {
        &self.schema
    }

    fn step(&mut self, payload: Payload, _leg: Leg) -> Result<Vec<Payload>> {
        Ok(vec![payload])
    }
}
