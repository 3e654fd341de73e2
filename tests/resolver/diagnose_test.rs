// tests/resolver/diagnose_test.rs
use metrica::model::variant::{MetricVariant, MetricVariantRequest};
use metrica::resolver::{diagnose, InMemoryCatalog, Resolver, DEFAULT_MAX_COMBINE_DEPTH};
use serde_json::json;

fn catalog() -> InMemoryCatalog {
    let catalog = InMemoryCatalog::new();
    catalog
        .publish(
            serde_json::from_value(json!({
                "id": "monthly_revenue",
                "name": "Monthly Revenue",
                "data_model": {"id": "dm", "data_source": "warehouse"},
                "table": {"name": "sales"},
                "measures": [
                    {"name": "revenue", "aggregation": "sum", "expr": "amount"},
                    {"name": "orders", "aggregation": "count"}
                ],
                "dimensions": [{"name": "region", "expr": "region"}],
                "filters": [{"name": "completed", "field": "status", "operator": "eq",
                    "values": ["completed"]}]
            }))
            .unwrap(),
        )
        .unwrap();
    catalog
}

fn request(value: serde_json::Value) -> MetricVariantRequest {
    serde_json::from_value(value).unwrap()
}

fn run(catalog: &InMemoryCatalog, req: &MetricVariantRequest) -> metrica::resolver::Diagnosis {
    diagnose(catalog, req, DEFAULT_MAX_COMBINE_DEPTH)
}

#[test]
fn test_valid_request_needs_no_fixes() {
    let catalog = catalog();
    let req = request(json!({"name": "ok", "source": {"metric_id": "monthly_revenue"}}));
    let diagnosis = run(&catalog, &req);
    assert!(diagnosis.error.is_none());
    assert!(diagnosis.fixes.is_empty());
    assert_eq!(diagnosis.corrected, Some(req));
}

#[test]
fn test_misspelled_source_is_repointed() {
    let catalog = catalog();
    let diagnosis = run(
        &catalog,
        &request(json!({"name": "eu", "source": {"metric_id": "Monthly-Revenue", "version": 3}})),
    );

    let error = diagnosis.error.unwrap();
    assert_eq!(error.kind, "UnknownMetric");
    assert_eq!(diagnosis.fixes.len(), 1);
    assert_eq!(diagnosis.fixes[0].path.as_str(), "source.metric_id");

    let corrected = diagnosis.corrected.unwrap();
    assert_eq!(corrected.source.metric_id, "monthly_revenue");
    assert_eq!(corrected.source.version, None);
}

#[test]
fn test_replace_of_missing_component_becomes_add() {
    let catalog = catalog();
    let diagnosis = run(
        &catalog,
        &request(json!({
            "name": "with_margin",
            "source": {"metric_id": "monthly_revenue"},
            "overrides": {"replace": {"measures": [
                {"name": "margin", "aggregation": "sum", "expr": "margin"}
            ]}}
        })),
    );

    assert_eq!(diagnosis.error.unwrap().kind, "ReplaceTargetNotFound");
    let corrected = diagnosis.corrected.unwrap();
    assert!(corrected.overrides.replace.measures.is_empty());
    assert_eq!(corrected.overrides.add.measures[0].name, "margin");
}

#[test]
fn test_add_of_existing_component_becomes_replace() {
    let catalog = catalog();
    let diagnosis = run(
        &catalog,
        &request(json!({
            "name": "net",
            "source": {"metric_id": "monthly_revenue"},
            "overrides": {"add": {"measures": [
                {"name": "revenue", "aggregation": "sum", "expr": "net_amount"}
            ]}}
        })),
    );

    assert_eq!(diagnosis.error.unwrap().kind, "DuplicateComponentName");
    let corrected = diagnosis.corrected.unwrap();
    assert!(corrected.overrides.add.measures.is_empty());
    assert_eq!(corrected.overrides.replace.measures[0].name, "revenue");
}

#[test]
fn test_derivations_are_reordered() {
    let catalog = catalog();
    let diagnosis = run(
        &catalog,
        &request(json!({
            "name": "ratios",
            "source": {"metric_id": "monthly_revenue"},
            "derivations": [
                {"name": "aov_pct", "expr": {"type": "arithmetic", "op": "mul",
                    "left": {"type": "measure", "measure": "aov"},
                    "right": {"type": "literal", "value": 100}}},
                {"name": "aov", "expr": {"type": "arithmetic", "op": "div",
                    "left": {"type": "measure", "measure": "revenue"},
                    "right": {"type": "measure", "measure": "orders"}}}
            ]
        })),
    );

    assert_eq!(diagnosis.error.unwrap().kind, "DerivationOrderError");
    let corrected = diagnosis.corrected.unwrap();
    let order: Vec<_> = corrected.derivations.iter().map(|d| d.name.as_str()).collect();
    assert_eq!(order, vec!["aov", "aov_pct"]);
}

#[test]
fn test_stale_names_are_dropped_across_rounds() {
    let catalog = catalog();
    let diagnosis = run(
        &catalog,
        &request(json!({
            "name": "slim",
            "source": {"metric_id": "monthly_revenue"},
            "include": {"measures": ["revenue", "refunds"]},
            "overrides": {"exclude": {"filters": ["completed", "test_orders"]}}
        })),
    );

    assert_eq!(diagnosis.fixes.len(), 2);
    assert_eq!(diagnosis.fixes[0].path.as_str(), "include.measures[1]");
    assert_eq!(diagnosis.fixes[1].path.as_str(), "overrides.exclude.filters[1]");

    let corrected = diagnosis.corrected.unwrap();
    assert_eq!(
        corrected.include.unwrap().measures.unwrap(),
        vec!["revenue".to_string()]
    );
    assert_eq!(corrected.overrides.exclude.filters, vec!["completed".to_string()]);
}

#[test]
fn test_cyclic_combine_is_dropped() {
    let catalog = catalog();
    for (id, other) in [("loop_a", "loop_b"), ("loop_b", "loop_a")] {
        catalog
            .store_variant(MetricVariant {
                id: id.into(),
                request: request(json!({
                    "name": id,
                    "source": {"metric_id": "monthly_revenue"},
                    "combine": [{"metric_id": other, "alias": "other"}]
                })),
            })
            .unwrap();
    }

    let diagnosis = run(
        &catalog,
        &request(json!({
            "name": "looped",
            "source": {"metric_id": "monthly_revenue"},
            "combine": [{"metric_id": "loop_a", "alias": "a"}]
        })),
    );

    assert_eq!(diagnosis.error.unwrap().kind, "VariantCycleError");
    assert_eq!(diagnosis.fixes[0].path.as_str(), "combine[0]");
    assert!(diagnosis.corrected.unwrap().combine.is_empty());
}

#[test]
fn test_unfixable_request_reports_original_error() {
    let catalog = catalog();
    let req = request(json!({"name": "nothing", "source": {"metric_id": "inventory"}}));
    let diagnosis = run(&catalog, &req);

    assert!(diagnosis.fixes.is_empty());
    assert!(diagnosis.corrected.is_none());
    let error = diagnosis.error.unwrap();
    assert_eq!(error.kind, "UnknownMetric");
    assert_eq!(error.path.unwrap().as_str(), "source");
    assert!(Resolver::new(&catalog).resolve(&req).is_err());
}
