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

//! The best way to test a SQL engine is to throw queries at it.
//!
//! End-to-end statements against the built-in sample data, with the plan
//! text and optimizer counters checked where the rewrites matter.

use kestrel::{Engine, EngineConfig, Params};
use kestrel_expr::value::Value;

fn engine() -> Engine {
    Engine::new(EngineConfig::for_tests())
}

fn all_rows(sql: &str) -> Vec<Vec<Value>> {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    cursor.execute(sql, Params::None).unwrap();
    cursor.fetchall().unwrap()
}

fn single_cell(sql: &str) -> Value {
    let rows = all_rows(sql);
    assert_eq!(rows.len(), 1, "expected one row from {sql}");
    rows[0][0].clone()
}

#[test]
fn count_planets_is_nine() {
    assert_eq!(
        single_cell("SELECT COUNT(*) FROM planets"),
        Value::Int64(9)
    );
}

#[test]
fn planets_without_satellites_are_mercury_and_venus() {
    let rows = all_rows(
        "SELECT name FROM planets \
         WHERE id NOT IN (SELECT DISTINCT planetId FROM satellites)",
    );
    let names: Vec<&str> = rows.iter().filter_map(|r| r[0].as_str()).collect();
    assert_eq!(names, vec!["Mercury", "Venus"]);
}

#[test]
fn inner_join_yields_177_rows_and_a_correlated_filter() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    cursor
        .execute(
            "SELECT p.name, s.name FROM planets p \
             INNER JOIN satellites s ON p.id = s.planetId",
            Params::None,
        )
        .unwrap();
    assert_eq!(cursor.rowcount(), 177);
    assert!(
        cursor
            .executed_plan()
            .contains("FILTER (planetId >= 1 AND planetId <= 9)"),
        "missing synthesized probe filter in:\n{}",
        cursor.executed_plan()
    );
    assert!(cursor.stats().get("optimization_inner_join_correlated_filter") >= 1);
}

#[test]
fn hash_join_path_agrees_with_nested_loop() {
    // forcing the threshold to zero sends the same join through the hash
    // table build
    let config = EngineConfig {
        nested_loop_join_threshold: 0,
        ..EngineConfig::for_tests()
    };
    let engine = Engine::new(config);
    let mut cursor = engine.connect().cursor();
    cursor
        .execute(
            "SELECT p.name FROM planets p INNER JOIN satellites s ON p.id = s.planetId",
            Params::None,
        )
        .unwrap();
    assert_eq!(cursor.rowcount(), 177);
    assert!(cursor.executed_plan().contains("INNER JOIN"));
}

#[test]
fn predicate_compaction_merges_ranges() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    cursor
        .execute(
            "SELECT p.id FROM planets p WHERE p.id > 1 AND p.id > 4",
            Params::None,
        )
        .unwrap();
    assert_eq!(cursor.rowcount(), 5);
    let plan = cursor.executed_plan().to_string();
    assert!(plan.contains("id > 4"), "plan was:\n{plan}");
    assert!(!plan.contains("id > 1"), "plan was:\n{plan}");
    assert!(cursor.stats().get("optimization_predicate_compaction") >= 1);
}

#[test]
fn equality_dominates_compatible_ranges() {
    let engine = engine();
    let mut cursor = engine.connect().cursor();
    cursor
        .execute(
            "SELECT COUNT(*) FROM planets WHERE id = 3 AND id > 0 AND id < 9",
            Params::None,
        )
        .unwrap();
    assert_eq!(cursor.fetchall().unwrap(), vec![vec![Value::Int64(1)]]);
    let plan = cursor.executed_plan().to_string();
    assert!(plan.contains("id = 3"), "plan was:\n{plan}");
    assert!(!plan.contains("id > 0"), "plan was:\n{plan}");
    assert!(!plan.contains("id < 9"), "plan was:\n{plan}");
}

#[test]
fn contradictory_predicates_return_nothing() {
    assert_eq!(
        single_cell("SELECT COUNT(*) FROM planets WHERE id > 5 AND id = 0"),
        Value::Int64(0)
    );
}

#[test]
fn non_equi_join_emits_exactly_six_pairs() {
    let rows = all_rows(
        "SELECT l.value, r.threshold \
         FROM (VALUES (10), (20), (30), (40)) AS l(value) \
         JOIN (VALUES (15), (25), (35), (45)) AS r(threshold) \
         ON value > threshold",
    );
    let pairs: Vec<(i64, i64)> = rows
        .iter()
        .map(|r| (r[0].as_i64().unwrap(), r[1].as_i64().unwrap()))
        .collect();
    assert_eq!(
        pairs,
        vec![(20, 15), (30, 15), (30, 25), (40, 15), (40, 25), (40, 35)]
    );
}

#[test]
fn where_is_not_true_keeps_false_and_null() {
    let rows = all_rows(
        "SELECT v FROM (VALUES (true), (false), (NULL)) AS tristate(v) WHERE v IS NOT TRUE",
    );
    assert_eq!(
        rows,
        vec![vec![Value::Boolean(false)], vec![Value::Null]]
    );
}

#[test]
fn where_null_or_true_returns_the_row() {
    let rows = all_rows("SELECT v FROM (VALUES (1)) AS t(v) WHERE NULL OR TRUE");
    assert_eq!(rows.len(), 1);

    let rows = all_rows("SELECT v FROM (VALUES (1)) AS t(v) WHERE NULL AND TRUE");
    assert!(rows.is_empty());
}

#[test]
fn tristate_boolean_battery() {
    let cases: Vec<(&str, usize)> = vec![
        ("WHERE v", 1),
        ("WHERE NOT v", 1),
        ("WHERE v IS TRUE", 1),
        ("WHERE v IS NOT TRUE", 2),
        ("WHERE v IS FALSE", 1),
        ("WHERE v IS NOT FALSE", 2),
        ("WHERE v IS NULL", 1),
        ("WHERE v IS NOT NULL", 2),
        ("WHERE v = v", 2),
        ("WHERE v <> v", 0),
        ("WHERE v OR NOT v", 2),
        ("WHERE v AND NOT v", 0),
    ];
    for (filter, expected) in cases {
        let sql = format!(
            "SELECT v FROM (VALUES (true), (false), (NULL)) AS tristate(v) {filter}"
        );
        assert_eq!(all_rows(&sql).len(), expected, "query: {sql}");
    }
}

#[test]
fn count_column_excludes_nulls() {
    let sql = "SELECT COUNT(v), COUNT(*) FROM (VALUES (1), (NULL), (3)) AS t(v)";
    let rows = all_rows(sql);
    assert_eq!(rows, vec![vec![Value::Int64(2), Value::Int64(3)]]);
}

#[test]
fn in_list_with_null_follows_three_valued_logic() {
    // v IN (1, NULL): only the hit comes back
    let rows = all_rows(
        "SELECT v FROM (VALUES (1), (5), (NULL)) AS t(v) WHERE v IN (1, NULL)",
    );
    assert_eq!(rows, vec![vec![Value::Int64(1)]]);

    // v NOT IN (1, 2): true only for non-null misses
    let rows = all_rows(
        "SELECT v FROM (VALUES (1), (5), (NULL)) AS t(v) WHERE v NOT IN (1, 2)",
    );
    assert_eq!(rows, vec![vec![Value::Int64(5)]]);
}

#[test]
fn group_by_with_aggregates() {
    let rows = all_rows(
        "SELECT planetId, COUNT(*) FROM satellites GROUP BY planetId ORDER BY planetId",
    );
    let counts: Vec<(i64, i64)> = rows
        .iter()
        .map(|r| (r[0].as_i64().unwrap(), r[1].as_i64().unwrap()))
        .collect();
    assert_eq!(
        counts,
        vec![(3, 1), (4, 2), (5, 67), (6, 61), (7, 27), (8, 14), (9, 5)]
    );
}

#[test]
fn aggregates_over_empty_input_produce_one_row() {
    let rows = all_rows("SELECT COUNT(*), SUM(id), MIN(id) FROM planets WHERE id > 100");
    assert_eq!(
        rows,
        vec![vec![Value::Int64(0), Value::Null, Value::Null]]
    );
}

#[test]
fn count_distinct_uses_the_flat_set() {
    assert_eq!(
        single_cell("SELECT COUNT(DISTINCT planetId) FROM satellites"),
        Value::Int64(7)
    );
}

#[test]
fn order_by_respects_direction_and_limit() {
    let rows = all_rows("SELECT name FROM planets ORDER BY id DESC LIMIT 2");
    let names: Vec<&str> = rows.iter().filter_map(|r| r[0].as_str()).collect();
    assert_eq!(names, vec!["Pluto", "Neptune"]);
}

#[test]
fn order_by_can_reference_dropped_columns() {
    let rows = all_rows("SELECT name FROM planets ORDER BY mass DESC LIMIT 1");
    assert_eq!(rows[0][0].as_str(), Some("Jupiter"));
}

#[test]
fn limit_and_offset_skip_then_take() {
    let rows = all_rows("SELECT id FROM planets ORDER BY id LIMIT 3 OFFSET 2");
    let ids: Vec<i64> = rows.iter().filter_map(|r| r[0].as_i64()).collect();
    assert_eq!(ids, vec![3, 4, 5]);
}

#[test]
fn union_all_concatenates_union_deduplicates() {
    let rows = all_rows(
        "SELECT v FROM (VALUES (1), (2)) AS a(v) UNION ALL SELECT v FROM (VALUES (2)) AS b(v)",
    );
    assert_eq!(rows.len(), 3);

    let rows = all_rows(
        "SELECT v FROM (VALUES (1), (2)) AS a(v) UNION SELECT v FROM (VALUES (2)) AS b(v)",
    );
    assert_eq!(rows.len(), 2);
}

#[test]
fn distinct_deduplicates_rows() {
    let rows = all_rows("SELECT DISTINCT planetId FROM satellites");
    assert_eq!(rows.len(), 7);
}

#[test]
fn scalar_functions_and_case_evaluate() {
    let rows = all_rows(
        "SELECT UPPER(name), \
                CASE WHEN numberOfMoons = 0 THEN 'barren' ELSE 'mooned' END \
         FROM planets WHERE id <= 3 ORDER BY id",
    );
    assert_eq!(rows[0][0].as_str(), Some("MERCURY"));
    assert_eq!(rows[0][1].as_str(), Some("barren"));
    assert_eq!(rows[2][1].as_str(), Some("mooned"));
}

#[test]
fn like_filters_strings() {
    let rows = all_rows("SELECT name FROM planets WHERE name LIKE 'M%'");
    let names: Vec<&str> = rows.iter().filter_map(|r| r[0].as_str()).collect();
    assert_eq!(names, vec!["Mercury", "Mars"]);
}

#[test]
fn coalesce_fills_missing_surface_pressure() {
    let rows = all_rows(
        "SELECT name, COALESCE(surfacePressure, -1.0) FROM planets WHERE id IN (5, 9) ORDER BY id",
    );
    assert_eq!(rows[0][1], Value::Float64(-1.0));
    assert_eq!(rows[1][1], Value::Float64(0.00001));
}

#[test]
fn arithmetic_projections_compute() {
    let rows = all_rows("SELECT id * 2 + 1 FROM planets WHERE id = 4");
    assert_eq!(rows, vec![vec![Value::Int64(9)]]);
}

#[test]
fn left_join_null_extends() {
    let rows = all_rows(
        "SELECT p.name, s.name FROM planets p \
         LEFT JOIN satellites s ON p.id = s.planetId \
         WHERE p.id <= 2",
    );
    assert_eq!(rows.len(), 2);
    assert!(rows.iter().all(|r| r[1] == Value::Null));
}

#[test]
fn derived_tables_alias_their_columns() {
    let rows = all_rows(
        "SELECT big.n FROM (SELECT id AS n FROM planets WHERE id > 7) AS big ORDER BY n",
    );
    let ids: Vec<i64> = rows.iter().filter_map(|r| r[0].as_i64()).collect();
    assert_eq!(ids, vec![8, 9]);
}

#[test]
fn having_filters_aggregate_output() {
    let rows = all_rows(
        "SELECT planetId, COUNT(*) FROM satellites \
         GROUP BY planetId HAVING COUNT(*) > 20 ORDER BY planetId",
    );
    let ids: Vec<i64> = rows.iter().filter_map(|r| r[0].as_i64()).collect();
    assert_eq!(ids, vec![5, 6, 7]);
}

#[test]
fn regexp_replace_runs_through_the_regex_engine() {
    let rows = all_rows("SELECT REGEXP_REPLACE(name, 'a', '_') FROM planets WHERE id = 6");
    assert_eq!(rows, vec![vec![Value::Utf8("S_turn".into())]]);
}

#[test]
fn subquery_counts_compose() {
    let rows = all_rows(
        "SELECT COUNT(*) FROM (SELECT id FROM planets WHERE id > 1 AND id > 4) AS sub",
    );
    assert_eq!(rows, vec![vec![Value::Int64(5)]]);
}
