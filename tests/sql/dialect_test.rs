// tests/sql/dialect_test.rs
use metrica::planner::{plan_query, PlannedQuery};
use metrica::sql::syntax::check_syntax;
use metrica::sql::{render_plan, Dialect};
use serde_json::json;

fn plan(value: serde_json::Value) -> PlannedQuery {
    plan_query(&serde_json::from_value(value).unwrap()).unwrap()
}

fn regional_sales(filters: serde_json::Value) -> PlannedQuery {
    plan(json!({
        "id": "regional_sales",
        "name": "Regional sales",
        "data_model": {"id": "dm", "data_source": "warehouse"},
        "table": {"name": "sales"},
        "measures": [{"name": "revenue", "aggregation": "sum", "expr": "amount"}],
        "dimensions": [{"name": "region", "expr": "region"}],
        "filters": filters,
        "parameters": [
            {"name": "region", "type": "string"},
            {"name": "min_amount", "type": "number"}
        ]
    }))
}

#[test]
fn test_duckdb_snapshot() {
    let planned = regional_sales(json!([
        {"name": "one_region", "field": "region", "operator": "eq", "values": [{"param": "region"}]}
    ]));
    let rendered = render_plan(&planned, Dialect::DuckDb).unwrap();
    insta::assert_snapshot!(rendered.sql, @r#"
    SELECT
      "sales"."region" AS "region",
      SUM("sales"."amount") AS "revenue"
    FROM "sales"
    WHERE "sales"."region" = $1
    GROUP BY "sales"."region"
    ORDER BY "sales"."region" ASC
    "#);
    assert_eq!(rendered.placeholders, vec!["region"]);
}

#[test]
fn test_literal_only_query_parses_in_every_dialect() {
    let planned = regional_sales(json!([
        {"name": "positive", "field": "amount", "operator": "gt", "values": [0]}
    ]));
    for dialect in Dialect::ALL {
        let rendered = render_plan(&planned, dialect).unwrap();
        assert!(rendered.placeholders.is_empty(), "{dialect}");
        check_syntax(&rendered.sql, dialect).unwrap();
    }
}

#[test]
fn test_identifier_quoting_per_dialect() {
    let planned = regional_sales(json!([]));
    let quoted = |dialect: Dialect| render_plan(&planned, dialect).unwrap().sql;

    assert!(quoted(Dialect::Postgres).contains("\"sales\".\"region\""));
    assert!(quoted(Dialect::MySql).contains("`sales`.`region`"));
    assert!(quoted(Dialect::BigQuery).contains("`sales`.`region`"));
    assert!(quoted(Dialect::TSql).contains("[sales].[region]"));
}

#[test]
fn test_placeholder_styles() {
    let planned = regional_sales(json!([
        {"name": "big", "field": "amount", "operator": "gte", "values": [{"param": "min_amount"}]},
        {"name": "one_region", "field": "region", "operator": "eq", "values": [{"param": "region"}]},
        {"name": "big_discount", "field": "discount", "operator": "gte",
         "values": [{"param": "min_amount"}]}
    ]));

    let pg = render_plan(&planned, Dialect::Postgres).unwrap();
    assert!(pg.sql.contains("\"sales\".\"amount\" >= $1"));
    assert!(pg.sql.contains("\"sales\".\"region\" = $2"));
    assert!(pg.sql.contains("\"sales\".\"discount\" >= $1"));
    assert_eq!(pg.placeholders, vec!["min_amount", "region"]);

    let mysql = render_plan(&planned, Dialect::MySql).unwrap();
    assert_eq!(mysql.sql.matches('?').count(), 3);
    assert_eq!(mysql.placeholders, vec!["min_amount", "region", "min_amount"]);

    let tsql = render_plan(&planned, Dialect::TSql).unwrap();
    assert!(tsql.sql.contains("[sales].[amount] >= @min_amount"));
    assert!(tsql.sql.contains("[sales].[region] = @region"));
    assert_eq!(tsql.placeholders, vec!["min_amount", "region"]);

    check_syntax(&pg.sql, Dialect::Postgres).unwrap();
    check_syntax(&mysql.sql, Dialect::MySql).unwrap();
    check_syntax(&tsql.sql, Dialect::TSql).unwrap();
}

#[test]
fn test_string_literals_are_escaped_not_spliced() {
    let planned = regional_sales(json!([
        {"name": "irish", "field": "region", "operator": "eq", "values": ["O'Brien"]}
    ]));
    let rendered = render_plan(&planned, Dialect::Postgres).unwrap();
    assert!(rendered.sql.contains("\"sales\".\"region\" = 'O''Brien'"));
    check_syntax(&rendered.sql, Dialect::Postgres).unwrap();
}

#[test]
fn test_in_list_and_null_checks() {
    let planned = regional_sales(json!([
        {"name": "regions", "field": "region", "operator": "in", "values": ["EU", "US"]},
        {"name": "has_amount", "field": "amount", "operator": "is_not_null"}
    ]));
    let sql = render_plan(&planned, Dialect::Postgres).unwrap().sql;
    assert!(sql.contains("\"sales\".\"region\" IN ('EU', 'US')"));
    assert!(sql.contains("\"sales\".\"amount\" IS NOT NULL"));
    check_syntax(&sql, Dialect::Postgres).unwrap();
}

#[test]
fn test_wrap_function_applies_to_field() {
    let planned = regional_sales(json!([
        {"name": "eu", "field": "region", "operator": "eq", "values": ["eu"],
         "wrap_function": {"name": "lower"}}
    ]));
    let sql = render_plan(&planned, Dialect::Postgres).unwrap().sql;
    assert!(sql.contains("LOWER(\"sales\".\"region\") = 'eu'"));
}

#[test]
fn test_conditional_dimension_renders_case() {
    let planned = plan(json!({
        "id": "sizes",
        "name": "Sizes",
        "data_model": {"id": "dm", "data_source": "warehouse"},
        "table": {"name": "orders"},
        "measures": [{"name": "orders", "aggregation": "count"}],
        "dimensions": [{"name": "size", "conditional": {
            "when": [
                {"field": "amount", "operator": "gte", "values": [1000],
                 "then": {"type": "literal", "value": "large"}},
                {"field": "amount", "operator": "gte", "values": [100],
                 "then": {"type": "literal", "value": "medium"}}
            ],
            "else": {"type": "literal", "value": "small"}
        }}]
    }));
    for dialect in [Dialect::Postgres, Dialect::Snowflake, Dialect::TSql] {
        let sql = render_plan(&planned, dialect).unwrap().sql;
        let large = sql.find("'large'").unwrap();
        let medium = sql.find("'medium'").unwrap();
        assert!(large < medium, "{dialect}: {sql}");
        assert!(sql.contains("CASE WHEN"));
        assert!(sql.contains("'small' END"));
        check_syntax(&sql, dialect).unwrap();
    }
}
