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

//! Error taxonomy for the kestrel engine.
//!
//! Operators and planners return [`Result`] everywhere; errors convert to the
//! host surface only at the outermost API. The variants are behavioral, one
//! per failure policy, so callers can match on what to do rather than where
//! the failure came from.

use arrow::error::ArrowError;
use thiserror::Error;

/// Result type for kestrel operations
pub type Result<T, E = Error> = std::result::Result<T, E>;

/// Engine error. Each variant corresponds to one failure policy: fail the
/// statement immediately, fail the scan after a retry, or fail the query and
/// release buffers.
#[derive(Error, Debug)]
pub enum Error {
    /// The statement could not be parsed or bound into a valid plan.
    #[error("Invalid syntax: {0}")]
    InvalidSyntax(String),

    /// A referenced column does not exist in any visible schema. Carries an
    /// optional did-you-mean suggestion.
    #[error("Column '{column}' not found{}", suggestion_suffix(.suggestion))]
    ColumnNotFound {
        column: String,
        suggestion: Option<String>,
    },

    /// A referenced dataset is not registered in the catalog.
    #[error("Dataset '{0}' not found")]
    DatasetNotFound(String),

    /// More than one visible schema exposes the referenced name.
    #[error("Identifier '{identifier}' is ambiguous, qualify with one of: {candidates:?}")]
    AmbiguousIdentifier {
        identifier: String,
        candidates: Vec<String>,
    },

    /// Placeholder count or naming does not match the supplied parameters.
    #[error("Parameter error: {0}")]
    Parameter(String),

    /// The statement uses syntax the engine recognizes but does not support.
    #[error("Unsupported syntax: {0}")]
    UnsupportedSyntax(String),

    /// The caller lacks the permission bit for this statement type.
    #[error("Permission denied: {0}")]
    PermissionDenied(String),

    /// A blocking operator exceeded its memory threshold, or a pool could
    /// not satisfy an allocation.
    #[error("Resources exhausted: {0}")]
    ResourcesExhausted(String),

    /// A blob decoded to something other than what its format promised.
    #[error("Decode error in '{blob}': {message}")]
    Decode { blob: String, message: String },

    /// The blob reader could not locate the requested path.
    #[error("Blob not found: {0}")]
    BlobNotFound(String),

    /// The per-query wall-clock timeout elapsed.
    #[error("Query cancelled: {0}")]
    Cancelled(String),

    /// Wraps errors surfaced by the arrow kernels.
    #[error("Arrow error: {0}")]
    Arrow(#[from] ArrowError),

    /// An invariant inside the engine was violated. Always a bug.
    #[error("Internal error: {0}. This is a bug in kestrel, please report it")]
    Internal(String),
}

fn suggestion_suffix(suggestion: &Option<String>) -> String {
    match suggestion {
        Some(s) => format!(", did you mean '{s}'?"),
        None => String::new(),
    }
}

impl Error {
    /// Shorthand for a [`Error::ColumnNotFound`] without a suggestion.
    pub fn column_not_found(column: impl Into<String>) -> Self {
        Self::ColumnNotFound {
            column: column.into(),
            suggestion: None,
        }
    }
}

impl From<std::io::Error> for Error {
    fn from(e: std::io::Error) -> Self {
        match e.kind() {
            std::io::ErrorKind::NotFound => Error::BlobNotFound(e.to_string()),
            _ => Error::Decode {
                blob: "<io>".to_string(),
                message: e.to_string(),
            },
        }
    }
}

/// Construct an [`Error::InvalidSyntax`] with string interpolation
#[macro_export]
macro_rules! syntax_err {
    ($($arg:tt)*) => {
        return Err($crate::error::Error::InvalidSyntax(format!($($arg)*)))
    };
}

/// Construct an [`Error::UnsupportedSyntax`] with string interpolation
#[macro_export]
macro_rules! unsupported_err {
    ($($arg:tt)*) => {
        return Err($crate::error::Error::UnsupportedSyntax(format!($($arg)*)))
    };
}

/// Construct an [`Error::Internal`] with string interpolation
#[macro_export]
macro_rules! internal_err {
    ($($arg:tt)*) => {
        return Err($crate::error::Error::Internal(format!($($arg)*)))
    };
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn error_messages_are_stable() {
        let err = Error::ColumnNotFound {
            column: "planetid".to_string(),
            suggestion: Some("planetId".to_string()),
        };
        assert_eq!(
            err.to_string(),
            "Column 'planetid' not found, did you mean 'planetId'?"
        );

        let err = Error::column_not_found("x");
        assert_eq!(err.to_string(), "Column 'x' not found");

        let err = Error::ResourcesExhausted("sort buffer over 1073741824 bytes".to_string());
        assert!(err.to_string().starts_with("Resources exhausted"));
    }

    #[test]
    fn io_not_found_maps_to_blob_not_found() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone.parquet");
        let err: Error = io.into();
        assert!(matches!(err, Error::BlobNotFound(_)));
    }
}
