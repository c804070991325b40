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

//! The scalar and aggregate function registry.
//!
//! Functions are rows in a table keyed by name: arity, volatility, a return
//! type rule and a vectorized kernel. The binder resolves calls against this
//! table once; execution just dispatches the kernel. Impure functions are
//! marked volatile and survive constant folding.

use std::sync::Arc;

use arrow::array::*;
use arrow::compute::cast;
use arrow::datatypes::{DataType, TimeUnit};
use indexmap::IndexMap;
use kestrel_common::error::{Error, Result};

use crate::expr::AggregateKind;

/// How many arguments a function accepts.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Arity {
    Exact(usize),
    Variadic { min: usize },
}

impl Arity {
    fn accepts(&self, count: usize) -> bool {
        match self {
            Arity::Exact(n) => count == *n,
            Arity::Variadic { min } => count >= *min,
        }
    }
}

/// Whether repeated evaluation with the same arguments yields the same
/// result. Volatile functions are never constant-folded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Volatility {
    Immutable,
    Volatile,
}

/// Vectorized kernel: evaluated argument arrays (all `num_rows` long) in,
/// one array out.
pub type ScalarKernel = fn(&[ArrayRef], usize) -> Result<ArrayRef>;

/// One registry row.
pub struct FunctionEntry {
    pub name: &'static str,
    pub arity: Arity,
    pub volatility: Volatility,
    pub return_type: fn(&[DataType]) -> DataType,
    pub kernel: ScalarKernel,
}

/// Name-keyed function table, read-only after startup.
pub struct FunctionRegistry {
    entries: IndexMap<&'static str, FunctionEntry>,
}

impl Default for FunctionRegistry {
    fn default() -> Self {
        Self::standard()
    }
}

impl FunctionRegistry {
    /// The registry with the engine's standard function library.
    pub fn standard() -> Self {
        let mut registry = Self {
            entries: IndexMap::new(),
        };
        let entries = [
            FunctionEntry {
                name: "ABS",
                arity: Arity::Exact(1),
                volatility: Volatility::Immutable,
                return_type: |args| args.first().cloned().unwrap_or(DataType::Float64),
                kernel: abs_kernel,
            },
            FunctionEntry {
                name: "CEIL",
                arity: Arity::Exact(1),
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Float64,
                kernel: |args, rows| float_unary(args, rows, f64::ceil),
            },
            FunctionEntry {
                name: "FLOOR",
                arity: Arity::Exact(1),
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Float64,
                kernel: |args, rows| float_unary(args, rows, f64::floor),
            },
            FunctionEntry {
                name: "ROUND",
                arity: Arity::Exact(1),
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Float64,
                kernel: |args, rows| float_unary(args, rows, f64::round),
            },
            FunctionEntry {
                name: "SQRT",
                arity: Arity::Exact(1),
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Float64,
                kernel: |args, rows| float_unary(args, rows, f64::sqrt),
            },
            FunctionEntry {
                name: "UPPER",
                arity: Arity::Exact(1),
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Utf8,
                kernel: |args, rows| string_unary(args, rows, |s| s.to_uppercase()),
            },
            FunctionEntry {
                name: "LOWER",
                arity: Arity::Exact(1),
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Utf8,
                kernel: |args, rows| string_unary(args, rows, |s| s.to_lowercase()),
            },
            FunctionEntry {
                name: "TRIM",
                arity: Arity::Exact(1),
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Utf8,
                kernel: |args, rows| string_unary(args, rows, |s| s.trim().to_string()),
            },
            FunctionEntry {
                name: "LENGTH",
                arity: Arity::Exact(1),
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Int64,
                kernel: length_kernel,
            },
            FunctionEntry {
                name: "LEFT",
                arity: Arity::Exact(2),
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Utf8,
                kernel: |args, rows| substring_edge(args, rows, true),
            },
            FunctionEntry {
                name: "RIGHT",
                arity: Arity::Exact(2),
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Utf8,
                kernel: |args, rows| substring_edge(args, rows, false),
            },
            FunctionEntry {
                name: "CONCAT",
                arity: Arity::Variadic { min: 1 },
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Utf8,
                kernel: concat_kernel,
            },
            FunctionEntry {
                name: "GREATEST",
                arity: Arity::Variadic { min: 1 },
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Float64,
                kernel: |args, rows| extremum(args, rows, f64::max),
            },
            FunctionEntry {
                name: "LEAST",
                arity: Arity::Variadic { min: 1 },
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Float64,
                kernel: |args, rows| extremum(args, rows, f64::min),
            },
            FunctionEntry {
                name: "REGEXP_REPLACE",
                arity: Arity::Exact(3),
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Utf8,
                kernel: regexp_replace_kernel,
            },
            FunctionEntry {
                name: "NOW",
                arity: Arity::Exact(0),
                volatility: Volatility::Volatile,
                return_type: |_| DataType::Timestamp(TimeUnit::Microsecond, None),
                kernel: now_kernel,
            },
            FunctionEntry {
                name: "CURRENT_DATE",
                arity: Arity::Exact(0),
                volatility: Volatility::Volatile,
                return_type: |_| DataType::Date32,
                kernel: current_date_kernel,
            },
            FunctionEntry {
                name: "RANDOM",
                arity: Arity::Exact(0),
                volatility: Volatility::Volatile,
                return_type: |_| DataType::Float64,
                kernel: random_kernel,
            },
            FunctionEntry {
                name: "VERSION",
                arity: Arity::Exact(0),
                volatility: Volatility::Immutable,
                return_type: |_| DataType::Utf8,
                kernel: version_kernel,
            },
        ];
        for entry in entries {
            registry.entries.insert(entry.name, entry);
        }
        registry
    }

    /// Resolve a call: unknown names and arity mismatches fail at bind
    /// time, not during execution.
    pub fn resolve(&self, name: &str, arg_count: usize) -> Result<&FunctionEntry> {
        let upper = name.to_uppercase();
        let entry = self.entries.get(upper.as_str()).ok_or_else(|| {
            Error::UnsupportedSyntax(format!("function '{name}' is not defined"))
        })?;
        if !entry.arity.accepts(arg_count) {
            return Err(Error::InvalidSyntax(format!(
                "function '{}' does not accept {arg_count} arguments",
                entry.name
            )));
        }
        Ok(entry)
    }

    pub fn is_volatile(&self, name: &str) -> bool {
        self.entries
            .get(name.to_uppercase().as_str())
            .map(|entry| entry.volatility == Volatility::Volatile)
            .unwrap_or(false)
    }

    /// Aggregate names resolve to a compile-time kind; `hash_list` is the
    /// legacy alias of `hash_one`.
    pub fn resolve_aggregate(name: &str, distinct: bool) -> Option<AggregateKind> {
        let kind = match name.to_uppercase().as_str() {
            "COUNT" if distinct => AggregateKind::CountDistinct,
            "COUNT" => AggregateKind::Count,
            "COUNT_DISTINCT" => AggregateKind::CountDistinct,
            "SUM" => AggregateKind::Sum,
            "MIN" => AggregateKind::Min,
            "MAX" => AggregateKind::Max,
            "AVG" | "MEAN" => AggregateKind::Avg,
            "HASH_ONE" | "HASH_LIST" => AggregateKind::HashOne,
            _ => return None,
        };
        Some(kind)
    }
}

fn as_float(array: &ArrayRef) -> Result<Float64Array> {
    let array = cast(array, &DataType::Float64)?;
    Ok(array
        .as_any()
        .downcast_ref::<Float64Array>()
        .ok_or_else(|| Error::Internal("cast to float64 failed".to_string()))?
        .clone())
}

fn as_string(array: &ArrayRef) -> Result<StringArray> {
    let array = cast(array, &DataType::Utf8)?;
    Ok(array
        .as_any()
        .downcast_ref::<StringArray>()
        .ok_or_else(|| Error::Internal("cast to utf8 failed".to_string()))?
        .clone())
}

fn abs_kernel(args: &[ArrayRef], _rows: usize) -> Result<ArrayRef> {
    match args[0].data_type() {
        DataType::Int64 => {
            let array = args[0]
                .as_any()
                .downcast_ref::<Int64Array>()
                .ok_or_else(|| Error::Internal("abs downcast failed".to_string()))?;
            Ok(Arc::new(array.unary::<_, arrow::datatypes::Int64Type>(i64::wrapping_abs)) as ArrayRef)
        }
        _ => {
            let array = as_float(&args[0])?;
            Ok(Arc::new(array.unary::<_, arrow::datatypes::Float64Type>(f64::abs)) as ArrayRef)
        }
    }
}

fn float_unary(args: &[ArrayRef], _rows: usize, op: fn(f64) -> f64) -> Result<ArrayRef> {
    let array = as_float(&args[0])?;
    Ok(Arc::new(array.unary::<_, arrow::datatypes::Float64Type>(op)) as ArrayRef)
}

fn string_unary(
    args: &[ArrayRef],
    _rows: usize,
    op: impl Fn(&str) -> String,
) -> Result<ArrayRef> {
    let array = as_string(&args[0])?;
    let out: StringArray = array.iter().map(|v| v.map(&op)).collect();
    Ok(Arc::new(out))
}

fn length_kernel(args: &[ArrayRef], _rows: usize) -> Result<ArrayRef> {
    let array = as_string(&args[0])?;
    let out: Int64Array = array
        .iter()
        .map(|v| v.map(|s| s.chars().count() as i64))
        .collect();
    Ok(Arc::new(out))
}

fn substring_edge(args: &[ArrayRef], _rows: usize, from_left: bool) -> Result<ArrayRef> {
    let strings = as_string(&args[0])?;
    let counts = as_float(&args[1])?;
    let out: StringArray = strings
        .iter()
        .enumerate()
        .map(|(row, value)| {
            let value = value?;
            if counts.is_null(row) {
                return None;
            }
            let take = (counts.value(row).max(0.0) as usize).min(value.chars().count());
            Some(if from_left {
                value.chars().take(take).collect::<String>()
            } else {
                let skip = value.chars().count() - take;
                value.chars().skip(skip).collect::<String>()
            })
        })
        .collect();
    Ok(Arc::new(out))
}

fn concat_kernel(args: &[ArrayRef], rows: usize) -> Result<ArrayRef> {
    let mut columns = Vec::with_capacity(args.len());
    for arg in args {
        columns.push(as_string(arg)?);
    }
    let out: StringArray = (0..rows)
        .map(|row| {
            let mut joined = String::new();
            for column in &columns {
                if column.is_null(row) {
                    return None;
                }
                joined.push_str(column.value(row));
            }
            Some(joined)
        })
        .collect();
    Ok(Arc::new(out))
}

fn extremum(args: &[ArrayRef], rows: usize, pick: fn(f64, f64) -> f64) -> Result<ArrayRef> {
    let mut columns = Vec::with_capacity(args.len());
    for arg in args {
        columns.push(as_float(arg)?);
    }
    let out: Float64Array = (0..rows)
        .map(|row| {
            let mut best: Option<f64> = None;
            for column in &columns {
                if column.is_null(row) {
                    // SQL GREATEST/LEAST: any NULL argument yields NULL
                    return None;
                }
                let value = column.value(row);
                best = Some(match best {
                    Some(current) => pick(current, value),
                    None => value,
                });
            }
            best
        })
        .collect();
    Ok(Arc::new(out))
}

/// Replacement goes through the deterministic `regex` engine; patterns are
/// compiled per distinct value per batch.
fn regexp_replace_kernel(args: &[ArrayRef], rows: usize) -> Result<ArrayRef> {
    let inputs = as_string(&args[0])?;
    let patterns = as_string(&args[1])?;
    let replacements = as_string(&args[2])?;

    let mut compiled: IndexMap<String, regex::Regex> = IndexMap::new();
    let out: StringArray = (0..rows)
        .map(|row| {
            if inputs.is_null(row) || patterns.is_null(row) || replacements.is_null(row) {
                return Ok(None);
            }
            let pattern = patterns.value(row);
            if !compiled.contains_key(pattern) {
                let regex = regex::Regex::new(pattern).map_err(|e| {
                    Error::InvalidSyntax(format!("invalid regular expression '{pattern}': {e}"))
                })?;
                compiled.insert(pattern.to_string(), regex);
            }
            let regex = &compiled[pattern];
            Ok(Some(
                regex
                    .replace_all(inputs.value(row), replacements.value(row))
                    .into_owned(),
            ))
        })
        .collect::<Result<Vec<Option<String>>>>()?
        .into_iter()
        .collect();
    Ok(Arc::new(out))
}

fn now_kernel(_args: &[ArrayRef], rows: usize) -> Result<ArrayRef> {
    let micros = chrono::Utc::now().timestamp_micros();
    Ok(Arc::new(TimestampMicrosecondArray::from(vec![micros; rows])) as ArrayRef)
}

fn current_date_kernel(_args: &[ArrayRef], rows: usize) -> Result<ArrayRef> {
    let today = chrono::Utc::now().date_naive();
    let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1)
        .ok_or_else(|| Error::Internal("epoch construction failed".to_string()))?;
    let days = (today - epoch).num_days() as i32;
    Ok(Arc::new(Date32Array::from(vec![days; rows])) as ArrayRef)
}

fn random_kernel(_args: &[ArrayRef], rows: usize) -> Result<ArrayRef> {
    use rand::Rng;
    let mut rng = rand::thread_rng();
    let out: Float64Array = (0..rows).map(|_| Some(rng.gen::<f64>())).collect();
    Ok(Arc::new(out))
}

fn version_kernel(_args: &[ArrayRef], rows: usize) -> Result<ArrayRef> {
    let version = env!("CARGO_PKG_VERSION");
    Ok(Arc::new(StringArray::from(vec![version; rows])) as ArrayRef)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn resolution_is_case_insensitive_and_arity_checked() {
        let registry = FunctionRegistry::standard();
        assert!(registry.resolve("upper", 1).is_ok());
        assert!(registry.resolve("UPPER", 2).is_err());
        assert!(registry.resolve("no_such_function", 0).is_err());
    }

    #[test]
    fn volatility_marks_impure_functions() {
        let registry = FunctionRegistry::standard();
        assert!(registry.is_volatile("NOW"));
        assert!(registry.is_volatile("random"));
        assert!(!registry.is_volatile("UPPER"));
    }

    #[test]
    fn aggregates_resolve_to_kinds() {
        assert_eq!(
            FunctionRegistry::resolve_aggregate("count", false),
            Some(AggregateKind::Count)
        );
        assert_eq!(
            FunctionRegistry::resolve_aggregate("count", true),
            Some(AggregateKind::CountDistinct)
        );
        assert_eq!(
            FunctionRegistry::resolve_aggregate("hash_list", false),
            Some(AggregateKind::HashOne)
        );
        assert_eq!(FunctionRegistry::resolve_aggregate("median", false), None);
    }

    #[test]
    fn string_kernels_preserve_nulls() {
        let input: ArrayRef = Arc::new(StringArray::from(vec![Some("Mars"), None]));
        let registry = FunctionRegistry::standard();
        let entry = registry.resolve("UPPER", 1).unwrap();
        let out = (entry.kernel)(&[input], 2).unwrap();
        let out = out.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(out.value(0), "MARS");
        assert!(out.is_null(1));
    }

    #[test]
    fn regexp_replace_routes_through_regex() {
        let inputs: ArrayRef = Arc::new(StringArray::from(vec!["a1b2c3"]));
        let patterns: ArrayRef = Arc::new(StringArray::from(vec!["[0-9]"]));
        let replacements: ArrayRef = Arc::new(StringArray::from(vec!["_"]));
        let out = regexp_replace_kernel(&[inputs, patterns, replacements], 1).unwrap();
        let out = out.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(out.value(0), "a_b_c_");
    }

    #[test]
    fn concat_is_null_propagating() {
        let left: ArrayRef = Arc::new(StringArray::from(vec![Some("Io"), Some("x")]));
        let right: ArrayRef = Arc::new(StringArray::from(vec![Some("!"), None]));
        let out = concat_kernel(&[left, right], 2).unwrap();
        let out = out.as_any().downcast_ref::<StringArray>().unwrap();
        assert_eq!(out.value(0), "Io!");
        assert!(out.is_null(1));
    }

    #[test]
    fn current_date_matches_chrono() {
        let out = current_date_kernel(&[], 1).unwrap();
        let out = out.as_any().downcast_ref::<Date32Array>().unwrap();
        let today = chrono::Utc::now().date_naive();
        let epoch = chrono::NaiveDate::from_ymd_opt(1970, 1, 1).unwrap();
        assert_eq!(out.value(0), (today - epoch).num_days() as i32);
    }
}
