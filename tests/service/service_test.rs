// tests/service/service_test.rs
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use async_trait::async_trait;
use metrica::binder::TenantContext;
use metrica::config::Settings;
use metrica::execution::{Connector, ConnectorError, ConnectorRegistry, ConnectorRequest, RowSet};
use metrica::model::types::ParamValue;
use metrica::model::variant::MetricVariantRequest;
use metrica::resolver::InMemoryCatalog;
use metrica::{Dialect, MetricError, MetricService, QueryRequest};
use serde_json::json;

/// Replays scripted responses in order, repeating the last one, and
/// remembers every request it saw.
struct Scripted {
    responses: Mutex<Vec<Result<RowSet, ConnectorError>>>,
    seen: Mutex<Vec<ConnectorRequest>>,
    calls: AtomicUsize,
}

impl Scripted {
    fn new(responses: Vec<Result<RowSet, ConnectorError>>) -> Arc<Self> {
        Arc::new(Self {
            responses: Mutex::new(responses),
            seen: Mutex::new(Vec::new()),
            calls: AtomicUsize::new(0),
        })
    }

    fn rows() -> Arc<Self> {
        Self::new(vec![Ok(RowSet {
            columns: vec!["region".into(), "revenue".into()],
            rows: vec![vec![json!("EU"), json!(1234.5)]],
        })])
    }

    fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

#[async_trait]
impl Connector for Scripted {
    async fn fetch(&self, request: &ConnectorRequest) -> Result<RowSet, ConnectorError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        self.seen.lock().unwrap().push(request.clone());
        let mut responses = self.responses.lock().unwrap();
        if responses.len() > 1 {
            responses.remove(0)
        } else {
            responses[0].clone()
        }
    }
}

fn catalog() -> Arc<InMemoryCatalog> {
    let catalog = InMemoryCatalog::new();
    catalog
        .publish(
            serde_json::from_value(json!({
                "id": "sales",
                "name": "Sales",
                "data_model": {"id": "dm", "data_source": "warehouse"},
                "table": {"name": "sales"},
                "measures": [{"name": "revenue", "aggregation": "sum", "expr": "amount",
                    "format": {"kind": "currency"}}],
                "dimensions": [{"name": "region", "expr": "region"}],
                "filters": [
                    {"name": "big", "field": "amount", "operator": "gte",
                     "values": [{"param": "min_amount"}]},
                    {"name": "own_region", "field": "region", "operator": "eq",
                     "values": [{"context": "region"}]}
                ],
                "parameters": [{"name": "min_amount", "type": "number", "required": true}]
            }))
            .unwrap(),
        )
        .unwrap();
    catalog
        .publish(
            serde_json::from_value(json!({
                "id": "clicks",
                "name": "Clicks",
                "data_model": {"id": "cs", "data_source": "clickstream"},
                "table": {"name": "events"},
                "measures": [{"name": "clicks", "aggregation": "count"}]
            }))
            .unwrap(),
        )
        .unwrap();
    Arc::new(catalog)
}

fn service_with(settings: Settings, connector: Arc<Scripted>) -> MetricService {
    let connectors = ConnectorRegistry::new().with("warehouse", connector);
    MetricService::new(catalog(), settings, connectors).unwrap()
}

fn service(connector: Arc<Scripted>) -> MetricService {
    service_with(Settings::default(), connector)
}

fn tenant(region: &str) -> TenantContext {
    TenantContext::new("prod").with_attribute("region", region)
}

fn sales(region: &str) -> QueryRequest {
    QueryRequest::metric("sales", tenant(region)).with_parameter("min_amount", 100)
}

#[tokio::test]
async fn test_second_execution_is_served_from_cache() {
    let connector = Scripted::rows();
    let service = service(Arc::clone(&connector));

    let first = service.execute(&sales("EU")).await;
    assert!(first.success, "{:?}", first.errors);
    assert_eq!(first.data.len(), 1);
    assert_eq!(first.data[0]["region"], json!("EU"));
    assert_eq!(first.data[0]["revenue"], json!("$1,234.50"));
    let metadata = first.metadata.unwrap();
    assert!(!metadata.cache_hit);
    assert_eq!(metadata.row_count, 1);
    assert_eq!(metadata.dialect, Dialect::Postgres);
    assert_eq!(metadata.parameters["min_amount"], json!(100.0));
    assert!(!metadata.parameters.contains_key("ctx_region"));

    let second = service.execute(&sales("EU")).await;
    assert!(second.metadata.unwrap().cache_hit);
    assert_eq!(connector.calls(), 1);
}

#[tokio::test]
async fn test_connector_receives_bind_values_in_slot_order() {
    let connector = Scripted::rows();
    let service = service(Arc::clone(&connector));
    service.try_execute(&sales("EU")).await.unwrap();

    let seen = connector.seen.lock().unwrap();
    assert!(seen[0].sql.contains("\"sales\".\"amount\" >= $1"));
    assert!(seen[0].sql.contains("\"sales\".\"region\" = $2"));
    assert_eq!(
        seen[0].positional,
        vec![ParamValue::Number(100.0), ParamValue::String("EU".into())]
    );
}

#[tokio::test]
async fn test_tenants_never_share_cache_entries() {
    let connector = Scripted::rows();
    let service = service(Arc::clone(&connector));

    service.try_execute(&sales("EU")).await.unwrap();
    service.try_execute(&sales("US")).await.unwrap();
    assert_eq!(connector.calls(), 2);

    let staging = QueryRequest::metric(
        "sales",
        TenantContext::new("staging").with_attribute("region", "EU"),
    )
    .with_parameter("min_amount", 100);
    let result = service.try_execute(&staging).await.unwrap();
    assert!(!result.metadata.unwrap().cache_hit);
    assert_eq!(connector.calls(), 3);
}

#[tokio::test]
async fn test_different_parameters_are_different_entries() {
    let connector = Scripted::rows();
    let service = service(Arc::clone(&connector));

    service.try_execute(&sales("EU")).await.unwrap();
    let other = QueryRequest::metric("sales", tenant("EU")).with_parameter("min_amount", 500);
    service.try_execute(&other).await.unwrap();
    assert_eq!(connector.calls(), 2);
}

#[tokio::test]
async fn test_failures_are_returned_as_envelopes() {
    let connector = Scripted::rows();
    let service = service(Arc::clone(&connector));

    let result = service
        .execute(&QueryRequest::metric("sales", tenant("EU")))
        .await;
    assert!(!result.success);
    assert!(result.metadata.is_none());
    assert_eq!(result.error_kinds(), vec!["MissingParameter"]);

    let result = service
        .execute(&QueryRequest::metric("inventory", tenant("EU")))
        .await;
    assert_eq!(result.error_kinds(), vec!["UnknownMetric"]);
    assert_eq!(connector.calls(), 0);
}

#[tokio::test]
async fn test_unregistered_data_source_is_an_execution_error() {
    let service = service(Scripted::rows());
    let err = service
        .try_execute(&QueryRequest::metric("clicks", TenantContext::new("prod")))
        .await
        .unwrap_err();
    assert_eq!(
        err,
        MetricError::ExecutionError {
            data_source: "clickstream".into(),
            message: "no connector registered for this data source".into(),
            transient: false,
        }
    );
}

#[tokio::test]
async fn test_connector_failures_are_not_cached() {
    let connector = Scripted::new(vec![
        Err(ConnectorError::Fatal("permission denied".into())),
        Ok(RowSet {
            columns: vec!["region".into(), "revenue".into()],
            rows: vec![],
        }),
    ]);
    let service = service(Arc::clone(&connector));

    let failed = service.execute(&sales("EU")).await;
    assert_eq!(failed.error_kinds(), vec!["ExecutionError"]);

    let recovered = service.execute(&sales("EU")).await;
    assert!(recovered.success);
    assert!(!recovered.metadata.unwrap().cache_hit);
    assert_eq!(connector.calls(), 2);
}

#[tokio::test]
async fn test_disabled_cache_always_executes() {
    let connector = Scripted::rows();
    let settings = Settings::from_toml("[cache]\nenabled = false\n").unwrap();
    let service = service_with(settings, Arc::clone(&connector));

    for _ in 0..2 {
        let result = service.execute(&sales("EU")).await;
        assert!(!result.metadata.unwrap().cache_hit);
    }
    assert_eq!(connector.calls(), 2);
}

#[test]
fn test_preview_renders_without_executing() {
    let connector = Scripted::rows();
    let service = service(Arc::clone(&connector));

    let preview = service.preview(&sales("EU").with_dialect(Dialect::MySql));
    assert!(preview.success);
    assert!(preview.data.is_empty());
    let metadata = preview.metadata.unwrap();
    assert_eq!(metadata.dialect, Dialect::MySql);
    assert!(metadata.query.contains("`sales`.`amount` >= ?"));
    assert_eq!(metadata.parameters["min_amount"], json!(100.0));
    assert_eq!(connector.calls(), 0);
}

#[test]
fn test_data_source_dialect_comes_from_settings() {
    let settings = Settings::from_toml(
        r#"
[data_sources.warehouse]
dialect = "tsql"
"#,
    )
    .unwrap();
    let service = service_with(settings, Scripted::rows());

    let compiled = service.compile(&sales("EU")).unwrap();
    assert_eq!(compiled.dialect, Dialect::TSql);
    assert!(compiled.sql.contains("[sales].[region] = @ctx_region"));
}

#[test]
fn test_variant_requests_compile_through_the_service() {
    let service = service(Scripted::rows());
    let variant: MetricVariantRequest = serde_json::from_value(json!({
        "name": "all_regions",
        "source": {"metric_id": "sales"},
        "overrides": {"exclude": {"filters": ["own_region"]}}
    }))
    .unwrap();

    let compiled = service
        .compile(&QueryRequest::variant(variant, TenantContext::new("prod")).with_parameter("min_amount", 1))
        .unwrap();
    assert!(!compiled.sql.contains("ctx_region"));
    assert_eq!(compiled.parameters.len(), 1);
}

#[test]
fn test_parameters_of_excluded_filters_are_still_type_checked() {
    let service = service(Scripted::rows());
    let variant: MetricVariantRequest = serde_json::from_value(json!({
        "name": "any_amount",
        "source": {"metric_id": "sales"},
        "overrides": {"exclude": {"filters": ["big"]}}
    }))
    .unwrap();

    let request = QueryRequest::variant(variant, tenant("EU")).with_parameter("min_amount", "lots");
    let err = service.compile(&request).unwrap_err();
    assert_eq!(
        err,
        MetricError::ParameterTypeError {
            name: "min_amount".into(),
            expected: metrica::model::types::ParamType::Number,
            value: "\"lots\"".into(),
        }
    );

    let compiled = service
        .compile(&request.with_parameter("min_amount", 10))
        .unwrap();
    assert!(!compiled.sql.contains(">="));
}

#[test]
fn test_diagnose_through_the_service() {
    let service = service(Scripted::rows());
    let request: MetricVariantRequest =
        serde_json::from_value(json!({"name": "typo", "source": {"metric_id": "Sales"}})).unwrap();

    let diagnosis = service.diagnose(&request);
    assert_eq!(diagnosis.fixes.len(), 1);
    assert_eq!(diagnosis.corrected.unwrap().source.metric_id, "sales");
}

#[test]
fn test_invalid_settings_are_rejected() {
    let mut settings = Settings::default();
    settings.cache.ttl = "soon".into();
    let result = MetricService::new(catalog(), settings, ConnectorRegistry::new());
    assert!(result.is_err());
}
