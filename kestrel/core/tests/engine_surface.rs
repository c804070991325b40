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

//! The engine surface: cursor behavior, parameters, EXPLAIN, SHOW, SET,
//! visibility filters, blob-backed datasets, and the failure paths.

use std::collections::HashMap;
use std::io::Write;
use std::time::Duration;

use arrow::datatypes::DataType;
use kestrel::{Engine, EngineConfig, Error, Params};
use kestrel_expr::dnf::CmpOp;
use kestrel_expr::value::Value;

fn engine() -> Engine {
    Engine::new(EngineConfig::for_tests())
}

#[test]
fn fetch_granularities_agree() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    cursor
        .execute("SELECT id FROM planets ORDER BY id", Params::None)
        .unwrap();
    assert_eq!(cursor.rowcount(), 9);
    assert_eq!(cursor.fetchone().unwrap(), Some(vec![Value::Int64(1)]));
    let next_two = cursor.fetchmany(2).unwrap();
    assert_eq!(
        next_two,
        vec![vec![Value::Int64(2)], vec![Value::Int64(3)]]
    );
    let rest = cursor.fetchall().unwrap();
    assert_eq!(rest.len(), 6);
    assert_eq!(cursor.fetchone().unwrap(), None);
}

#[test]
fn description_and_arrow_use_display_names() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    cursor
        .execute(
            "SELECT id AS planet, name FROM planets LIMIT 1",
            Params::None,
        )
        .unwrap();
    assert_eq!(
        cursor.description(),
        vec![
            ("planet".to_string(), DataType::Int64),
            ("name".to_string(), DataType::Utf8),
        ]
    );
    let batch = cursor.arrow().unwrap();
    assert_eq!(batch.schema().field(0).name(), "planet");
    assert_eq!(batch.num_rows(), 1);
}

#[test]
fn positional_parameters_substitute_in_order() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    cursor
        .execute(
            "SELECT name FROM planets WHERE id > ? AND id < ?",
            Params::Positional(vec![Value::Int64(1), Value::Int64(4)]),
        )
        .unwrap();
    let rows = cursor.fetchall().unwrap();
    assert_eq!(rows.len(), 2);
}

#[test]
fn named_parameters_substitute_by_name() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    let mut params = HashMap::new();
    params.insert("pid".to_string(), Value::Int64(3));
    cursor
        .execute(
            "SELECT name FROM planets WHERE id = $pid",
            Params::Named(params),
        )
        .unwrap();
    assert_eq!(
        cursor.fetchall().unwrap(),
        vec![vec![Value::Utf8("Earth".into())]]
    );
}

#[test]
fn parameter_count_mismatches_fail() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();

    // too few
    let error = cursor
        .execute("SELECT 1 FROM planets WHERE id = ?", Params::Positional(vec![]))
        .unwrap_err();
    assert!(matches!(error, Error::Parameter(_)));

    // too many
    let error = cursor
        .execute(
            "SELECT 1 FROM planets WHERE id = ?",
            Params::Positional(vec![Value::Int64(1), Value::Int64(2)]),
        )
        .unwrap_err();
    assert!(matches!(error, Error::Parameter(_)));

    // missing name
    let error = cursor
        .execute(
            "SELECT 1 FROM planets WHERE id = $missing",
            Params::Named(HashMap::new()),
        )
        .unwrap_err();
    assert!(matches!(error, Error::Parameter(_)));
}

#[test]
fn explain_returns_the_rendered_plan() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    cursor
        .execute("EXPLAIN SELECT id FROM planets WHERE id > 4", Params::None)
        .unwrap();
    let rows = cursor.fetchall().unwrap();
    assert!(!rows.is_empty());
    let text: Vec<String> = rows
        .iter()
        .filter_map(|r| r[0].as_str().map(str::to_string))
        .collect();
    let plan = text.join("\n");
    assert!(plan.contains("SCAN (planets)"), "plan was:\n{plan}");
    assert!(plan.contains("FILTER (id > 4)"), "plan was:\n{plan}");
}

#[test]
fn show_columns_lists_the_schema() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    cursor
        .execute("SHOW COLUMNS FROM planets", Params::None)
        .unwrap();
    let rows = cursor.fetchall().unwrap();
    assert_eq!(rows.len(), 12);
    assert_eq!(rows[0][0].as_str(), Some("id"));
    assert_eq!(rows[0][2].as_str(), Some("NO"));
}

#[test]
fn set_updates_variables_and_warns_on_unknown_names() {
    let engine = engine();
    let connection = engine.connect();
    let mut cursor = connection.cursor();

    cursor
        .execute("SET timezone = 'UTC'", Params::None)
        .unwrap();
    assert!(cursor.messages().is_empty());
    assert_eq!(
        connection.variables().get("timezone"),
        Some(&Value::Utf8("UTC".into()))
    );

    cursor.execute("SET warp_speed = 9", Params::None).unwrap();
    assert_eq!(cursor.messages().len(), 1);
    assert!(cursor.messages()[0].contains("warp_speed"));
}

#[test]
fn visibility_filters_apply_before_optimization() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    cursor.set_visibility_filter(
        "planets",
        vec![vec![("id".to_string(), CmpOp::LtEq, Value::Int64(3))]],
    );
    cursor
        .execute("SELECT COUNT(*) FROM planets", Params::None)
        .unwrap();
    assert_eq!(
        cursor.fetchall().unwrap(),
        vec![vec![Value::Int64(3)]]
    );
    assert!(cursor.executed_plan().contains("id <= 3"));
}

#[test]
fn csv_blobs_register_and_query() {
    let mut file = tempfile::Builder::new()
        .suffix(".csv")
        .tempfile()
        .unwrap();
    writeln!(file, "id,label").unwrap();
    writeln!(file, "1,alpha").unwrap();
    writeln!(file, "2,beta").unwrap();
    file.flush().unwrap();

    let engine = engine();
    engine
        .register_blob_dataset("labels", file.path().to_str().unwrap())
        .unwrap();
    let mut cursor = engine.connect().cursor();
    cursor
        .execute("SELECT label FROM labels WHERE id = 2", Params::None)
        .unwrap();
    assert_eq!(
        cursor.fetchall().unwrap(),
        vec![vec![Value::Utf8("beta".into())]]
    );
    // the blob now sits in the buffer pool
    assert!(engine.buffer_pool().size_bytes() > 0);
}

#[test]
fn missing_blobs_fail_registration() {
    let engine = engine();
    let error = engine
        .register_blob_dataset("ghosts", "/no/such/file.csv")
        .unwrap_err();
    assert!(matches!(error, Error::BlobNotFound(_)));
}

#[test]
fn orc_is_recognized_but_unsupported() {
    let engine = engine();
    let error = engine
        .register_blob_dataset("cold", "/data/archive.orc")
        .unwrap_err();
    assert!(matches!(error, Error::UnsupportedSyntax(_)));
}

#[test]
fn unknown_columns_suggest_alternatives() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    let error = cursor
        .execute("SELECT nmae FROM planets", Params::None)
        .unwrap_err();
    assert_eq!(
        error.to_string(),
        "Column 'nmae' not found, did you mean 'name'?"
    );
}

#[test]
fn ambiguous_columns_require_qualification() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    let error = cursor
        .execute(
            "SELECT id FROM planets p INNER JOIN satellites s ON p.id = s.planetId",
            Params::None,
        )
        .unwrap_err();
    assert!(matches!(error, Error::AmbiguousIdentifier { .. }));
}

#[test]
fn unknown_datasets_fail_at_bind_time() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    let error = cursor
        .execute("SELECT * FROM comets", Params::None)
        .unwrap_err();
    assert!(matches!(error, Error::DatasetNotFound(_)));
}

#[test]
fn unsupported_statements_are_rejected() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    let error = cursor
        .execute("DELETE FROM planets WHERE id = 9", Params::None)
        .unwrap_err();
    assert!(matches!(error, Error::UnsupportedSyntax(_)));
}

#[test]
fn query_timeout_cancels_execution() {
    let config = EngineConfig {
        query_timeout: Some(Duration::ZERO),
        ..EngineConfig::for_tests()
    };
    let engine = Engine::new(config);
    let mut cursor = engine.connect().cursor();
    let error = cursor
        .execute("SELECT COUNT(*) FROM satellites", Params::None)
        .unwrap_err();
    assert!(matches!(error, Error::Cancelled(_)));
}

#[test]
fn blocking_operators_fail_over_the_memory_threshold() {
    let config = EngineConfig {
        blocking_operator_memory_limit: 1,
        ..EngineConfig::for_tests()
    };
    let engine = Engine::new(config);
    let mut cursor = engine.connect().cursor();
    let error = cursor
        .execute("SELECT name FROM satellites ORDER BY radius", Params::None)
        .unwrap_err();
    assert!(matches!(error, Error::ResourcesExhausted(_)));
}

#[test]
fn unnest_explodes_literal_arrays() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    cursor
        .execute(
            "SELECT name, n FROM planets CROSS JOIN UNNEST((1, 2)) AS t(n) WHERE id = 1",
            Params::None,
        )
        .unwrap();
    let rows = cursor.fetchall().unwrap();
    assert_eq!(rows.len(), 2);
    assert_eq!(rows[0][0].as_str(), Some("Mercury"));
    assert_eq!(rows[1][1], Value::Int64(2));
}

#[test]
fn distinct_unnest_folds_into_the_operator() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    cursor
        .execute(
            "SELECT DISTINCT n FROM planets CROSS JOIN UNNEST((1, 2, 2)) AS t(n)",
            Params::None,
        )
        .unwrap();
    let mut values: Vec<i64> = cursor
        .fetchall()
        .unwrap()
        .iter()
        .filter_map(|r| r[0].as_i64())
        .collect();
    values.sort_unstable();
    assert_eq!(values, vec![1, 2]);
    assert!(cursor.executed_plan().contains("DISTINCT"));
}

#[test]
fn group_by_all_groups_on_every_plain_column() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    cursor
        .execute(
            "SELECT planetId, COUNT(*) FROM satellites GROUP BY ALL",
            Params::None,
        )
        .unwrap();
    assert_eq!(cursor.rowcount(), 7);
}
