// tests/resolver/combine_test.rs
use metrica::error::{ComponentKind, ComponentPath, MetricError};
use metrica::model::metric::{JoinKind, Metric};
use metrica::model::variant::{MetricVariant, MetricVariantRequest};
use metrica::planner::plan_query;
use metrica::resolver::{InMemoryCatalog, Resolver};
use metrica::sql::{render_plan, Dialect};
use serde_json::json;

fn metric(value: serde_json::Value) -> Metric {
    serde_json::from_value(value).unwrap()
}

fn request(value: serde_json::Value) -> MetricVariantRequest {
    serde_json::from_value(value).unwrap()
}

fn catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    catalog
        .publish(metric(json!({
            "id": "sales",
            "name": "Sales",
            "data_model": {"id": "dm", "data_source": "warehouse"},
            "table": {"name": "sales"},
            "measures": [{"name": "revenue", "aggregation": "sum", "expr": "amount"}],
            "dimensions": [{"name": "region", "expr": "region"}]
        })))
        .unwrap();
    catalog
        .publish(metric(json!({
            "id": "refunds",
            "name": "Refunds",
            "data_model": {"id": "dm", "data_source": "warehouse"},
            "table": {"name": "refunds"},
            "measures": [{"name": "refunded", "aggregation": "sum", "expr": "amount"}],
            "filters": [{"name": "approved", "field": "status", "operator": "eq",
                "values": ["approved"]}],
            "joins": [{"table": {"name": "sales"}, "from": "refunds",
                "on": [{"left": "sale_id", "right": "id"}]}]
        })))
        .unwrap();
    catalog
        .publish(metric(json!({
            "id": "visits",
            "name": "Visits",
            "data_model": {"id": "web", "data_source": "clickstream"},
            "table": {"name": "visits"},
            "measures": [{"name": "visits", "aggregation": "count"}]
        })))
        .unwrap();
    catalog
}

fn stored(catalog: &InMemoryCatalog, id: &str, combine_with: &str) {
    catalog
        .store_variant(MetricVariant {
            id: id.into(),
            request: request(json!({
                "name": id,
                "source": {"metric_id": "sales"},
                "combine": [{"metric_id": combine_with, "alias": "other"}]
            })),
        })
        .unwrap();
}

#[test]
fn test_combine_joins_in_qualified_components() {
    let catalog = catalog();
    let effective = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "net_sales",
            "source": {"metric_id": "sales"},
            "combine": [{"metric_id": "refunds", "alias": "r"}]
        })))
        .unwrap();

    let metric = &effective.metric;
    let measures: Vec<_> = metric.measures.iter().map(|m| m.name.as_str()).collect();
    assert_eq!(measures, vec!["revenue", "r.refunded"]);
    assert_eq!(
        effective.lineage,
        vec!["metric:sales@1", "variant:net_sales", "combine:refunds as r"]
    );

    // The refunds join is re-hung from the sales side.
    assert_eq!(metric.joins.len(), 1);
    assert_eq!(metric.joins[0].table.name, "refunds");
    assert_eq!(metric.joins[0].from, "sales");
    assert_eq!(metric.joins[0].on[0].left, "id");
    assert_eq!(metric.joins[0].on[0].right, "sale_id");
    assert_eq!(metric.joins[0].kind, JoinKind::Right);

    // Filters of the combined metric are not carried over.
    assert!(metric.filters.is_empty());
}

#[test]
fn test_combined_metric_plans_and_renders() {
    let catalog = catalog();
    let effective = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "net_sales",
            "source": {"metric_id": "sales"},
            "combine": [{"metric_id": "refunds", "alias": "r"}]
        })))
        .unwrap();

    let plan = plan_query(&effective.metric).unwrap();
    assert_eq!(plan.output_columns(), vec!["region", "revenue", "r.refunded"]);
    assert_eq!(plan.joins.len(), 1);

    let rendered = render_plan(&plan, Dialect::Postgres).unwrap();
    assert!(rendered.sql.contains("SUM(\"refunds\".\"amount\") AS \"r.refunded\""));
    assert!(rendered
        .sql
        .contains("RIGHT JOIN \"refunds\" ON \"sales\".\"id\" = \"refunds\".\"sale_id\""));
}

#[test]
fn test_combine_rejects_other_data_source() {
    let catalog = catalog();
    let err = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "mixed",
            "source": {"metric_id": "sales"},
            "combine": [{"metric_id": "visits", "alias": "v"}]
        })))
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    assert_eq!(err.path().unwrap().as_str(), "combine[0]");
}

#[test]
fn test_combine_alias_collision() {
    let catalog = catalog();
    let err = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "twice",
            "source": {"metric_id": "sales"},
            "combine": [
                {"metric_id": "refunds", "alias": "r"},
                {"metric_id": "refunds", "alias": "r"}
            ]
        })))
        .unwrap_err();
    assert_eq!(
        err,
        MetricError::DuplicateComponentName {
            path: ComponentPath::new("combine[1]"),
            kind: ComponentKind::Measure,
            name: "r.refunded".into(),
        }
    );
}

#[test]
fn test_unknown_combine_reference() {
    let catalog = catalog();
    let err = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "ghost",
            "source": {"metric_id": "sales"},
            "combine": [{"metric_id": "returns", "alias": "r"}]
        })))
        .unwrap_err();
    assert_eq!(
        err,
        MetricError::UnknownMetric {
            path: ComponentPath::new("combine[0]"),
            metric_id: "returns".into(),
            version: None,
        }
    );
}

#[test]
fn test_variant_cycle_is_detected() {
    let catalog = catalog();
    stored(&catalog, "loop_a", "loop_b");
    stored(&catalog, "loop_b", "loop_a");

    let err = Resolver::new(&catalog).resolve_id("loop_a", None).unwrap_err();
    match err {
        MetricError::VariantCycleError { chain, reason, .. } => {
            assert_eq!(chain, vec!["loop_a", "loop_b", "loop_a"]);
            assert_eq!(reason, "cycle");
        }
        other => panic!("unexpected error: {other:?}"),
    }
}

#[test]
fn test_combine_depth_is_bounded() {
    let catalog = catalog();
    stored(&catalog, "level_1", "level_2");
    stored(&catalog, "level_2", "level_3");
    stored(&catalog, "level_3", "refunds");

    // level_1 -> level_2 -> level_3 nests three variants deep.
    let err = Resolver::new(&catalog)
        .with_max_depth(2)
        .resolve_id("level_1", None)
        .unwrap_err();
    assert_eq!(err.kind(), "VariantCycleError");

    let effective = Resolver::new(&catalog)
        .with_max_depth(3)
        .resolve_id("level_1", None)
        .unwrap();
    assert!(effective
        .metric
        .measures
        .iter()
        .any(|m| m.name == "other.other.other.refunded"));
}
