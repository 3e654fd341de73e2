// tests/binder/binder_test.rs
use chrono::NaiveDate;
use metrica::binder::{bind, coerce, TenantContext};
use metrica::error::MetricError;
use metrica::model::metric::Metric;
use metrica::model::types::{ParamType, ParamValue};
use metrica::planner::plan_query;
use serde_json::{json, Map, Value};

fn metric() -> Metric {
    serde_json::from_value(json!({
        "id": "sales",
        "name": "Sales",
        "data_model": {"id": "dm", "data_source": "warehouse"},
        "table": {"name": "sales"},
        "measures": [{"name": "revenue", "aggregation": "sum", "expr": "amount"}],
        "dimensions": [{"name": "region", "expr": "region"}],
        "filters": [
            {"name": "window", "field": "sale_date", "operator": "between",
             "values": [{"param": "start_date"}, {"param": "end_date"}]},
            {"name": "min_amount", "field": "amount", "operator": "gte",
             "values": [{"param": "min_amount"}]},
            {"name": "own_region", "field": "region", "operator": "eq",
             "values": [{"context": "region"}]}
        ],
        "parameters": [
            {"name": "start_date", "type": "date", "required": true},
            {"name": "end_date", "type": "date", "required": true},
            {"name": "min_amount", "type": "number", "default": 0},
            {"name": "audit", "type": "boolean", "required": true}
        ]
    }))
    .unwrap()
}

fn params(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap()
}

fn tenant() -> TenantContext {
    TenantContext::new("prod").with_attribute("region", "EU")
}

fn full_request() -> Map<String, Value> {
    params(json!({
        "start_date": "2024-01-01",
        "end_date": "2024-03-31",
        "audit": false,
        "unused": "ignored"
    }))
}

#[test]
fn test_binds_every_placeholder() {
    let metric = metric();
    let plan = plan_query(&metric).unwrap();
    assert_eq!(
        plan.parameters,
        vec!["start_date", "end_date", "min_amount", "ctx_region"]
    );

    let bound = bind(&metric, &plan.parameters, &full_request(), &tenant()).unwrap();
    assert_eq!(bound.len(), 4);
    assert_eq!(
        bound.get("start_date"),
        Some(&ParamValue::Date(NaiveDate::from_ymd_opt(2024, 1, 1).unwrap()))
    );
    assert_eq!(bound.get("min_amount"), Some(&ParamValue::Number(0.0)));
    assert_eq!(
        bound.get("ctx_region"),
        Some(&ParamValue::String("EU".into()))
    );
    assert!(bound.get("unused").is_none());
}

#[test]
fn test_echo_leaves_out_context_values() {
    let metric = metric();
    let plan = plan_query(&metric).unwrap();
    let bound = bind(&metric, &plan.parameters, &full_request(), &tenant()).unwrap();

    let echoed = bound.echo();
    assert_eq!(echoed["start_date"], json!("2024-01-01"));
    assert!(!echoed.contains_key("ctx_region"));
}

#[test]
fn test_required_parameter_must_be_present_even_if_unused() {
    let metric = metric();
    let plan = plan_query(&metric).unwrap();
    let mut request = full_request();
    request.remove("audit");

    let err = bind(&metric, &plan.parameters, &request, &tenant()).unwrap_err();
    assert_eq!(
        err,
        MetricError::MissingParameter {
            name: "audit".into()
        }
    );
}

#[test]
fn test_null_counts_as_missing() {
    let metric = metric();
    let plan = plan_query(&metric).unwrap();
    let mut request = full_request();
    request.insert("end_date".into(), Value::Null);

    let err = bind(&metric, &plan.parameters, &request, &tenant()).unwrap_err();
    assert_eq!(err.kind(), "MissingParameter");
}

#[test]
fn test_missing_context_attribute() {
    let metric = metric();
    let plan = plan_query(&metric).unwrap();
    let err = bind(
        &metric,
        &plan.parameters,
        &full_request(),
        &TenantContext::new("prod"),
    )
    .unwrap_err();
    assert_eq!(
        err,
        MetricError::MissingParameter {
            name: "ctx_region".into()
        }
    );
}

#[test]
fn test_type_mismatch_is_reported() {
    let metric = metric();
    let plan = plan_query(&metric).unwrap();
    let mut request = full_request();
    request.insert("start_date".into(), json!("last tuesday"));

    let err = bind(&metric, &plan.parameters, &request, &tenant()).unwrap_err();
    assert_eq!(
        err,
        MetricError::ParameterTypeError {
            name: "start_date".into(),
            expected: ParamType::Date,
            value: "\"last tuesday\"".into(),
        }
    );
}

#[test]
fn test_coercions() {
    assert_eq!(
        coerce("n", ParamType::Number, &json!("12.5")).unwrap(),
        ParamValue::Number(12.5)
    );
    assert_eq!(
        coerce("i", ParamType::Integer, &json!(3.0)).unwrap(),
        ParamValue::Integer(3)
    );
    assert_eq!(
        coerce("b", ParamType::Boolean, &json!("true")).unwrap(),
        ParamValue::Bool(true)
    );
    assert_eq!(
        coerce("s", ParamType::String, &json!(42)).unwrap(),
        ParamValue::String("42".into())
    );
    assert!(matches!(
        coerce("t", ParamType::Timestamp, &json!("2024-05-01T10:30:00Z")).unwrap(),
        ParamValue::Timestamp(_)
    ));
    assert!(coerce("i", ParamType::Integer, &json!(2.5)).is_err());
    assert!(coerce("n", ParamType::Number, &json!("NaN")).is_err());
    assert!(coerce("b", ParamType::Boolean, &json!(1)).is_err());
}

#[test]
fn test_ordered_follows_slots() {
    let metric = metric();
    let plan = plan_query(&metric).unwrap();
    let bound = bind(&metric, &plan.parameters, &full_request(), &tenant()).unwrap();

    let slots = vec![
        "min_amount".to_string(),
        "start_date".to_string(),
        "min_amount".to_string(),
    ];
    let ordered = bound.ordered(&slots).unwrap();
    assert_eq!(ordered.len(), 3);
    assert_eq!(ordered[0], ParamValue::Number(0.0));
    assert_eq!(ordered[2], ParamValue::Number(0.0));

    let err = bound.ordered(&["nope".to_string()]).unwrap_err();
    assert_eq!(err.kind(), "MissingParameter");
}

#[test]
fn test_consumer_hash_depends_on_attributes() {
    let a = TenantContext::new("prod").with_attribute("region", "EU");
    let b = TenantContext::new("prod").with_attribute("region", "US");
    assert_ne!(a.consumer_hash().unwrap(), b.consumer_hash().unwrap());
    assert_eq!(
        a.consumer_hash().unwrap(),
        TenantContext::new("staging")
            .with_attribute("region", "EU")
            .consumer_hash()
            .unwrap()
    );
}
