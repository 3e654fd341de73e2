// tests/planner/planner_test.rs
use metrica::error::MetricError;
use metrica::model::metric::{JoinKind, Metric};
use metrica::planner::plan_query;
use metrica::sql::{render_plan, Dialect};
use serde_json::json;

fn join(table: &str, from: &str, left: &str, right: &str) -> serde_json::Value {
    json!({"table": {"name": table}, "from": from, "on": [{"left": left, "right": right}]})
}

/// orders -> customers -> regions and orders -> stores -> regions.
fn diamond() -> serde_json::Value {
    json!({
        "id": "orders",
        "name": "Orders",
        "data_model": {"id": "dm", "data_source": "warehouse"},
        "table": {"name": "orders"},
        "measures": [{"name": "revenue", "aggregation": "sum", "expr": "orders.amount"}],
        "dimensions": [{"name": "region", "expr": "regions.name"}],
        "joins": [
            join("customers", "orders", "customer_id", "id"),
            join("stores", "orders", "store_id", "id"),
            join("regions", "customers", "region_id", "id"),
            join("regions", "stores", "region_id", "id")
        ]
    })
}

fn metric(value: serde_json::Value) -> Metric {
    serde_json::from_value(value).unwrap()
}

#[test]
fn test_ambiguous_route_is_an_error() {
    let err = plan_query(&metric(diamond())).unwrap_err();
    match err {
        MetricError::AmbiguousJoinPath { path, table, paths } => {
            assert_eq!(path.as_str(), "dimensions.region");
            assert_eq!(table, "regions");
            assert_eq!(paths.len(), 2);
            assert!(paths.contains(&vec![
                "orders".to_string(),
                "stores".to_string(),
                "regions".to_string()
            ]));
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_pinned_path_resolves_ambiguity() {
    let mut value = diamond();
    value["pinned_paths"] = json!([{"table": "regions", "via": ["customers"]}]);
    let plan = plan_query(&metric(value)).unwrap();

    let tables: Vec<_> = plan.joins.iter().map(|j| j.table.name.as_str()).collect();
    assert_eq!(tables, vec!["customers", "regions"]);
    assert_eq!(plan.joins[1].on[0].left_table, "customers");
    assert_eq!(plan.joins[1].on[0].left_column, "region_id");

    let sql = render_plan(&plan, Dialect::Postgres).unwrap().sql;
    assert!(sql.contains("LEFT JOIN \"customers\" ON \"orders\".\"customer_id\" = \"customers\".\"id\""));
    assert!(sql.contains("LEFT JOIN \"regions\" ON \"customers\".\"region_id\" = \"regions\".\"id\""));
    assert!(!sql.contains("\"stores\""));
}

#[test]
fn test_pin_through_undeclared_hop_is_rejected() {
    let mut value = diamond();
    value["pinned_paths"] = json!([{"table": "regions", "via": ["warehouses"]}]);
    let err = plan_query(&metric(value)).unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    assert_eq!(err.path().unwrap().as_str(), "pinned_paths[0]");
}

#[test]
fn test_unreachable_table() {
    let value = json!({
        "id": "orders",
        "name": "Orders",
        "data_model": {"id": "dm", "data_source": "warehouse"},
        "table": {"name": "orders"},
        "measures": [{"name": "revenue", "aggregation": "sum", "expr": "orders.amount"}],
        "dimensions": [{"name": "city", "expr": "stores.city"}],
        "joins": [
            join("customers", "orders", "customer_id", "id"),
            join("stores", "warehouses", "warehouse_id", "id")
        ]
    });
    let err = plan_query(&metric(value)).unwrap_err();
    assert_eq!(
        err,
        MetricError::NoJoinPath {
            path: metrica::error::ComponentPath::new("dimensions.city"),
            from: "orders".into(),
            to: "stores".into(),
        }
    );
}

#[test]
fn test_filter_tables_are_joined() {
    let mut value = diamond();
    value["dimensions"] = json!([{"name": "month", "expr": {"type": "function",
        "name": "date_trunc", "unit": "month", "args": ["orders.order_date"]}}]);
    value["filters"] = json!([{"name": "vip", "field": "customers.tier", "operator": "eq",
        "values": ["vip"]}]);
    let plan = plan_query(&metric(value)).unwrap();

    assert_eq!(plan.joins.len(), 1);
    assert_eq!(plan.joins[0].table.name, "customers");
    assert_eq!(plan.joins[0].kind, JoinKind::Left);
    assert_eq!(plan.filters.len(), 1);
    assert_eq!(plan.filters[0].path.as_str(), "filters.vip");
}

#[test]
fn test_formats_become_post_transforms() {
    let value = json!({
        "id": "sales",
        "name": "Sales",
        "data_model": {"id": "dm", "data_source": "warehouse"},
        "table": {"name": "sales"},
        "measures": [
            {"name": "revenue", "aggregation": "sum", "expr": "amount"},
            {"name": "orders", "aggregation": "count"}
        ],
        "derivations": [
            {"name": "aov", "expr": {"type": "arithmetic", "op": "div",
                "left": {"type": "measure", "measure": "revenue"},
                "right": {"type": "measure", "measure": "orders"}},
             "format": {"kind": "currency"}}
        ],
        "dimensions": [{"name": "region", "expr": "region"}]
    });
    let plan = plan_query(&metric(value)).unwrap();

    assert_eq!(plan.output_columns(), vec!["region", "revenue", "orders", "aov"]);
    assert_eq!(plan.group_by, vec![0]);
    assert_eq!(plan.post_transforms.len(), 1);
    assert_eq!(plan.post_transforms[0].column, "aov");

    let sql = render_plan(&plan, Dialect::Postgres).unwrap().sql;
    assert!(sql.contains("SUM(\"sales\".\"amount\") / COUNT(*) AS \"aov\""));
}
