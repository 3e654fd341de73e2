// tests/resolver/resolver_test.rs
use metrica::binder::TenantContext;
use metrica::compile::{compile_variant, CompileOptions};
use metrica::error::{ComponentKind, ComponentPath, MetricError};
use metrica::model::metric::Metric;
use metrica::model::variant::{MetricVariant, MetricVariantRequest};
use metrica::resolver::{InMemoryCatalog, MetricCatalog, Resolver};
use serde_json::json;

fn sales_v(version: u32) -> Metric {
    serde_json::from_value(json!({
        "id": "sales",
        "version": version,
        "name": "Sales",
        "data_model": {"id": "dm", "data_source": "warehouse"},
        "table": {"name": "sales"},
        "measures": [
            {"name": "revenue", "aggregation": "sum", "expr": "amount"},
            {"name": "orders", "aggregation": "count"},
            {"name": "customers", "aggregation": "count", "expr": "customer_id", "distinct": true}
        ],
        "derivations": [
            {"name": "aov", "expr": {"type": "arithmetic", "op": "div",
                "left": {"type": "measure", "measure": "revenue"},
                "right": {"type": "measure", "measure": "orders"}}}
        ],
        "dimensions": [
            {"name": "region", "expr": "region"},
            {"name": "channel", "expr": "channel"}
        ],
        "filters": [
            {"name": "completed", "field": "status", "operator": "eq", "values": ["completed"]},
            {"name": "since", "field": "sale_date", "operator": "gte",
             "values": [{"param": "start_date"}]}
        ],
        "parameters": [{"name": "start_date", "type": "date"}]
    }))
    .unwrap()
}

fn catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    catalog.publish(sales_v(1)).unwrap();
    catalog
}

fn request(value: serde_json::Value) -> MetricVariantRequest {
    serde_json::from_value(value).unwrap()
}

fn names<'a>(items: impl Iterator<Item = &'a String>) -> Vec<&'a str> {
    items.map(String::as_str).collect()
}

#[test]
fn test_passthrough_variant_matches_source() {
    let catalog = catalog();
    let effective = Resolver::new(&catalog)
        .resolve(&request(json!({"name": "same", "source": {"metric_id": "sales"}})))
        .unwrap();
    let source = sales_v(1);
    assert_eq!(effective.metric.measures, source.measures);
    assert_eq!(effective.metric.dimensions, source.dimensions);
    assert_eq!(effective.metric.filters, source.filters);
    assert_eq!(effective.metric.name, "same");
    assert_eq!(effective.lineage, vec!["metric:sales@1", "variant:same"]);
}

#[test]
fn test_include_keeps_listed_components_in_source_order() {
    let catalog = catalog();
    let effective = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "slim",
            "source": {"metric_id": "sales"},
            "include": {"measures": ["orders", "revenue"], "dimensions": ["region"]}
        })))
        .unwrap();
    let metric = &effective.metric;
    assert_eq!(
        names(metric.measures.iter().map(|m| &m.name)),
        vec!["revenue", "orders"]
    );
    assert!(metric.derivations.is_empty());
    assert_eq!(names(metric.dimensions.iter().map(|d| &d.name)), vec!["region"]);
    // No filter list: every filter stays.
    assert_eq!(metric.filters.len(), 2);
}

#[test]
fn test_exclude_wins_over_include() {
    let catalog = catalog();
    let effective = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "no_region",
            "source": {"metric_id": "sales"},
            "include": {"dimensions": ["region", "channel"]},
            "overrides": {"exclude": {"dimensions": ["region"], "filters": ["completed"]}}
        })))
        .unwrap();
    assert_eq!(
        names(effective.metric.dimensions.iter().map(|d| &d.name)),
        vec!["channel"]
    );
    assert_eq!(
        names(effective.metric.filters.iter().map(|f| &f.name)),
        vec!["since"]
    );
}

#[test]
fn test_exclude_of_component_dropped_by_include_is_accepted() {
    let catalog = catalog();
    let effective = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "only_revenue",
            "source": {"metric_id": "sales"},
            "include": {"measures": ["revenue"]},
            "overrides": {"exclude": {"measures": ["orders"]}}
        })))
        .unwrap();
    assert_eq!(
        names(effective.metric.measures.iter().map(|m| &m.name)),
        vec!["revenue"]
    );
}

#[test]
fn test_replace_swaps_in_place() {
    let catalog = catalog();
    let effective = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "net",
            "source": {"metric_id": "sales"},
            "overrides": {"replace": {"measures": [
                {"name": "revenue", "aggregation": "sum", "expr": "net_amount"}
            ]}}
        })))
        .unwrap();
    let measures = &effective.metric.measures;
    assert_eq!(measures[0].name, "revenue");
    assert_eq!(
        measures[0].expr,
        Some(serde_json::from_value(json!("net_amount")).unwrap())
    );
    assert_eq!(measures.len(), 3);
}

#[test]
fn test_replace_of_excluded_component_fails() {
    let catalog = catalog();
    let err = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "broken",
            "source": {"metric_id": "sales"},
            "overrides": {
                "exclude": {"dimensions": ["channel"]},
                "replace": {"dimensions": [{"name": "channel", "expr": "sales_channel"}]}
            }
        })))
        .unwrap_err();
    assert_eq!(
        err,
        MetricError::ReplaceTargetNotFound {
            path: ComponentPath::new("overrides.replace.dimensions[0]"),
            kind: ComponentKind::Dimension,
            name: "channel".into(),
        }
    );
}

#[test]
fn test_replace_of_derivation_with_measure() {
    let catalog = catalog();
    let effective = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "avg_order",
            "source": {"metric_id": "sales"},
            "overrides": {"replace": {"measures": [
                {"name": "aov", "aggregation": "avg", "expr": "amount"}
            ]}}
        })))
        .unwrap();
    let metric = &effective.metric;
    assert!(metric.derivations.is_empty());
    assert_eq!(
        names(metric.measures.iter().map(|m| &m.name)),
        vec!["revenue", "orders", "customers", "aov"]
    );
    assert_eq!(
        metric.measures[3].aggregation,
        metrica::model::types::AggregationKind::Avg
    );

    // Later derivations may still build on the replaced name.
    let effective = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "avg_order_pct",
            "source": {"metric_id": "sales"},
            "overrides": {"replace": {"measures": [
                {"name": "aov", "aggregation": "avg", "expr": "amount"}
            ]}},
            "derivations": [
                {"name": "aov_per_customer", "expr": {"type": "arithmetic", "op": "div",
                    "left": {"type": "measure", "measure": "aov"},
                    "right": {"type": "measure", "measure": "customers"}}}
            ]
        })))
        .unwrap();
    assert_eq!(
        names(effective.metric.derivations.iter().map(|d| &d.name)),
        vec!["aov_per_customer"]
    );
}

#[test]
fn test_exclude_then_add_keeps_one_definition() {
    let catalog = catalog();
    let effective = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "peak",
            "source": {"metric_id": "sales"},
            "overrides": {
                "exclude": {"measures": ["revenue"]},
                "add": {"measures": [{"name": "revenue", "aggregation": "max", "expr": "amount"}]}
            }
        })))
        .unwrap();
    let revenue: Vec<_> = effective
        .metric
        .measures
        .iter()
        .filter(|m| m.name == "revenue")
        .collect();
    assert_eq!(revenue.len(), 1);
    assert_eq!(
        revenue[0].aggregation,
        metrica::model::types::AggregationKind::Max
    );
}

#[test]
fn test_add_appends_and_rejects_duplicates() {
    let catalog = catalog();
    let effective = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "with_margin",
            "source": {"metric_id": "sales"},
            "overrides": {"add": {"measures": [
                {"name": "margin", "aggregation": "sum", "expr": "margin"}
            ]}}
        })))
        .unwrap();
    assert_eq!(effective.metric.measures.last().unwrap().name, "margin");

    let err = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "dup",
            "source": {"metric_id": "sales"},
            "overrides": {"add": {"dimensions": [{"name": "region", "expr": "country"}]}}
        })))
        .unwrap_err();
    assert_eq!(
        err,
        MetricError::DuplicateComponentName {
            path: ComponentPath::new("overrides.add.dimensions[0]"),
            kind: ComponentKind::Dimension,
            name: "region".into(),
        }
    );
}

#[test]
fn test_variant_derivations_see_added_measures() {
    let catalog = catalog();
    let effective = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "margin_rate",
            "source": {"metric_id": "sales"},
            "overrides": {"add": {"measures": [
                {"name": "margin", "aggregation": "sum", "expr": "margin"}
            ]}},
            "derivations": [
                {"name": "margin_pct", "expr": {"type": "arithmetic", "op": "div",
                    "left": {"type": "measure", "measure": "margin"},
                    "right": {"type": "measure", "measure": "revenue"}},
                 "format": {"kind": "percent"}},
                {"name": "margin_per_order", "expr": {"type": "arithmetic", "op": "div",
                    "left": {"type": "measure", "measure": "margin"},
                    "right": {"type": "measure", "measure": "orders"}}}
            ]
        })))
        .unwrap();
    assert_eq!(
        names(effective.metric.derivations.iter().map(|d| &d.name)),
        vec!["aov", "margin_pct", "margin_per_order"]
    );
}

#[test]
fn test_derivation_referencing_unknown_measure() {
    let catalog = catalog();
    let err = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "bad",
            "source": {"metric_id": "sales"},
            "derivations": [
                {"name": "ratio", "expr": {"type": "arithmetic", "op": "div",
                    "left": {"type": "measure", "measure": "refunds"},
                    "right": {"type": "measure", "measure": "revenue"}}}
            ]
        })))
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    assert_eq!(err.path().unwrap().as_str(), "derivations[0].expr");
}

#[test]
fn test_source_version_pinning() {
    let catalog = catalog();
    let mut v2 = sales_v(2);
    v2.measures.truncate(1);
    v2.derivations.clear();
    catalog.publish(v2).unwrap();

    let latest = Resolver::new(&catalog)
        .resolve(&request(json!({"name": "latest", "source": {"metric_id": "sales"}})))
        .unwrap();
    assert_eq!(latest.metric.version, 2);
    assert_eq!(latest.metric.measures.len(), 1);

    let pinned = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "pinned",
            "source": {"metric_id": "sales", "version": 1}
        })))
        .unwrap();
    assert_eq!(pinned.metric.version, 1);
    assert_eq!(pinned.metric.measures.len(), 3);
    assert_eq!(pinned.lineage[0], "metric:sales@1");
}

#[test]
fn test_published_versions_are_immutable() {
    let catalog = catalog();
    catalog.publish(sales_v(1)).unwrap();

    let mut changed = sales_v(1);
    changed.name = "Renamed".into();
    let err = catalog.publish(changed).unwrap_err();
    assert_eq!(err.path().unwrap().as_str(), "version");
    assert_eq!(catalog.metric("sales", Some(1)).unwrap().name, "Sales");
}

#[test]
fn test_stored_variant_resolves_by_id() {
    let catalog = catalog();
    catalog
        .store_variant(MetricVariant {
            id: "sales_by_region".into(),
            request: request(json!({
                "name": "sales_by_region",
                "source": {"metric_id": "sales"},
                "include": {"dimensions": ["region"]}
            })),
        })
        .unwrap();

    let effective = Resolver::new(&catalog)
        .resolve_id("sales_by_region", None)
        .unwrap();
    assert_eq!(effective.metric.dimensions.len(), 1);
    assert_eq!(
        effective.lineage,
        vec!["metric:sales@1", "variant:sales_by_region"]
    );
}

#[test]
fn test_resolution_is_deterministic() {
    let catalog = catalog();
    let req = request(json!({
        "name": "slim",
        "source": {"metric_id": "sales"},
        "include": {"measures": ["revenue"]}
    }));
    let a = Resolver::new(&catalog).resolve(&req).unwrap();
    let b = Resolver::new(&catalog).resolve(&req).unwrap();
    assert_eq!(a.content_hash, b.content_hash);

    let other = Resolver::new(&catalog)
        .resolve(&request(json!({
            "name": "slim",
            "source": {"metric_id": "sales"},
            "include": {"measures": ["orders"]}
        })))
        .unwrap();
    assert_ne!(a.content_hash, other.content_hash);
}

#[test]
fn test_added_measure_compiles_without_touching_the_catalog() {
    let original: Metric = serde_json::from_value(json!({
        "id": "monthly_revenue",
        "version": 1,
        "name": "Monthly Revenue",
        "data_model": {"id": "dm", "data_source": "warehouse"},
        "table": {"name": "sales"},
        "measures": [{"name": "revenue", "aggregation": "sum", "expr": "amount"}],
        "dimensions": [{"name": "region", "expr": "region"}]
    }))
    .unwrap();
    let catalog = InMemoryCatalog::new();
    catalog.publish(original.clone()).unwrap();

    let variant = request(json!({
        "name": "revenue_in_usd",
        "source": {"metric_id": "monthly_revenue"},
        "overrides": {"add": {"measures": [
            {"name": "revenue_usd", "aggregation": "sum", "expr": "amount_usd"}
        ]}}
    }));

    let effective = Resolver::new(&catalog).resolve(&variant).unwrap();
    assert_eq!(
        names(effective.metric.measures.iter().map(|m| &m.name)),
        vec!["revenue", "revenue_usd"]
    );

    let compiled = compile_variant(
        &catalog,
        &variant,
        &serde_json::Map::new(),
        &TenantContext::new("prod"),
        &CompileOptions::default(),
    )
    .unwrap();
    assert!(compiled.sql.contains("SUM(\"sales\".\"amount\") AS \"revenue\""));
    assert!(compiled.sql.contains("SUM(\"sales\".\"amount_usd\") AS \"revenue_usd\""));
    assert_eq!(compiled.output_columns, vec!["region", "revenue", "revenue_usd"]);

    let stored = catalog.metric("monthly_revenue", None).unwrap();
    assert_eq!(*stored, original);
    assert_eq!(stored.measures.len(), 1);
}
