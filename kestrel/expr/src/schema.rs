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

//! Relation schemas with stable column identities.
//!
//! Columns are identified by a 64-bit id assigned once at binding and kept
//! through renames, projections and joins; physical batches name their
//! fields `c{id}` so operators never resolve by display name. The display
//! name and optional relation qualifier ride along for user-facing output.

use std::sync::Arc;

use arrow::datatypes::{DataType, Field, Schema as ArrowSchema, SchemaRef};
use kestrel_common::error::{Error, Result};

/// Stable 64-bit column identity.
pub type ColumnId = u64;

/// The physical field name a column uses inside record batches.
pub fn physical_name(id: ColumnId) -> String {
    format!("c{id}")
}

/// One column of a relation.
#[derive(Debug, Clone, PartialEq)]
pub struct ColumnDef {
    pub id: ColumnId,
    /// Display name, alias-aware.
    pub name: String,
    /// Relation qualifier (table name or alias), when bound from one.
    pub relation: Option<String>,
    pub data_type: DataType,
    pub nullable: bool,
}

impl ColumnDef {
    pub fn new(id: ColumnId, name: impl Into<String>, data_type: DataType) -> Self {
        Self {
            id,
            name: name.into(),
            relation: None,
            data_type,
            nullable: true,
        }
    }

    pub fn with_relation(mut self, relation: impl Into<String>) -> Self {
        self.relation = Some(relation.into());
        self
    }

    pub fn with_nullable(mut self, nullable: bool) -> Self {
        self.nullable = nullable;
        self
    }

    /// The arrow field this column occupies in physical batches.
    pub fn to_physical_field(&self) -> Field {
        Field::new(physical_name(self.id), self.data_type.clone(), self.nullable)
    }
}

/// An ordered set of columns: what every operator publishes at plan time.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RelationSchema {
    columns: Vec<ColumnDef>,
}

impl RelationSchema {
    pub fn new(columns: Vec<ColumnDef>) -> Self {
        Self { columns }
    }

    pub fn empty() -> Self {
        Self { columns: vec![] }
    }

    pub fn columns(&self) -> &[ColumnDef] {
        &self.columns
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    pub fn column_ids(&self) -> Vec<ColumnId> {
        self.columns.iter().map(|c| c.id).collect()
    }

    /// Index of a column by identity.
    pub fn index_of(&self, id: ColumnId) -> Option<usize> {
        self.columns.iter().position(|c| c.id == id)
    }

    pub fn column_by_id(&self, id: ColumnId) -> Option<&ColumnDef> {
        self.columns.iter().find(|c| c.id == id)
    }

    /// Resolve a possibly-qualified display name. Unqualified lookups that
    /// match more than one column are ambiguous.
    pub fn resolve(&self, relation: Option<&str>, name: &str) -> Result<&ColumnDef> {
        let matches: Vec<&ColumnDef> = self
            .columns
            .iter()
            .filter(|c| {
                c.name.eq_ignore_ascii_case(name)
                    && match relation {
                        Some(wanted) => c
                            .relation
                            .as_deref()
                            .is_some_and(|r| r.eq_ignore_ascii_case(wanted)),
                        None => true,
                    }
            })
            .collect();
        match matches.len() {
            1 => Ok(matches[0]),
            0 => Err(Error::ColumnNotFound {
                column: name.to_string(),
                suggestion: self.suggest(name),
            }),
            _ => Err(Error::AmbiguousIdentifier {
                identifier: name.to_string(),
                candidates: matches
                    .iter()
                    .map(|c| match &c.relation {
                        Some(relation) => format!("{relation}.{}", c.name),
                        None => c.name.clone(),
                    })
                    .collect(),
            }),
        }
    }

    /// Closest existing name by edit distance, for did-you-mean hints.
    pub fn suggest(&self, name: &str) -> Option<String> {
        let lowered = name.to_lowercase();
        self.columns
            .iter()
            .map(|c| (levenshtein(&lowered, &c.name.to_lowercase()), &c.name))
            .filter(|(distance, _)| *distance <= 2)
            .min_by_key(|(distance, _)| *distance)
            .map(|(_, name)| name.clone())
    }

    /// Restrict to the given identities, keeping their order.
    pub fn project(&self, ids: &[ColumnId]) -> Result<RelationSchema> {
        let mut columns = Vec::with_capacity(ids.len());
        for id in ids {
            let column = self
                .column_by_id(*id)
                .ok_or_else(|| Error::Internal(format!("projection references unknown column {id}")))?;
            columns.push(column.clone());
        }
        Ok(RelationSchema::new(columns))
    }

    /// Schema of a join output: left columns then right columns. Columns on
    /// the null-producing side of an outer join become nullable.
    pub fn join(&self, right: &RelationSchema, left_nullable: bool, right_nullable: bool) -> Self {
        let mut columns = Vec::with_capacity(self.len() + right.len());
        for column in &self.columns {
            let mut column = column.clone();
            column.nullable |= left_nullable;
            columns.push(column);
        }
        for column in &right.columns {
            let mut column = column.clone();
            column.nullable |= right_nullable;
            columns.push(column);
        }
        RelationSchema::new(columns)
    }

    /// Re-qualify every column under a new relation alias.
    pub fn realias(&self, relation: &str) -> Self {
        RelationSchema::new(
            self.columns
                .iter()
                .map(|c| c.clone().with_relation(relation))
                .collect(),
        )
    }

    /// The arrow schema of physical batches for this relation.
    pub fn to_physical_schema(&self) -> SchemaRef {
        Arc::new(ArrowSchema::new(
            self.columns
                .iter()
                .map(|c| c.to_physical_field())
                .collect::<Vec<_>>(),
        ))
    }

    /// The arrow schema with display names, for result surfaces.
    pub fn to_display_schema(&self) -> SchemaRef {
        Arc::new(ArrowSchema::new(
            self.columns
                .iter()
                .map(|c| Field::new(&c.name, c.data_type.clone(), c.nullable))
                .collect::<Vec<_>>(),
        ))
    }
}

/// Iterative two-row Levenshtein distance.
fn levenshtein(a: &str, b: &str) -> usize {
    let a: Vec<char> = a.chars().collect();
    let b: Vec<char> = b.chars().collect();
    if a.is_empty() {
        return b.len();
    }
    let mut previous: Vec<usize> = (0..=b.len()).collect();
    let mut current = vec![0usize; b.len() + 1];
    for (i, ca) in a.iter().enumerate() {
        current[0] = i + 1;
        for (j, cb) in b.iter().enumerate() {
            let substitution = previous[j] + usize::from(ca != cb);
            current[j + 1] = substitution
                .min(previous[j + 1] + 1)
                .min(current[j] + 1);
        }
        std::mem::swap(&mut previous, &mut current);
    }
    previous[b.len()]
}
