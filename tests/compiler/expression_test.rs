// tests/compiler/expression_test.rs
use metrica::compiler::{
    compile_conditional, compile_expression, compile_metric, CompileContext, IrBinaryOp, IrExpr,
};
use metrica::error::{ComponentPath, MetricError};
use metrica::model::expression::{Conditional, Expression};
use metrica::model::metric::Metric;
use metrica::model::types::ScalarValue;
use serde_json::json;

fn orders_with_customers() -> Metric {
    serde_json::from_value(json!({
        "id": "orders",
        "name": "Orders",
        "data_model": {"id": "dm", "data_source": "warehouse"},
        "table": {"name": "orders"},
        "measures": [
            {"name": "revenue", "aggregation": "sum", "expr": "orders.amount"},
            {"name": "order_count", "aggregation": "count"}
        ],
        "derivations": [
            {"name": "avg_order_value", "expr": {"type": "arithmetic", "op": "div",
                "left": {"type": "measure", "measure": "revenue"},
                "right": {"type": "measure", "measure": "order_count"}}}
        ],
        "dimensions": [
            {"name": "segment", "expr": "customers.segment"}
        ],
        "joins": [
            {"table": {"name": "customers"}, "from": "orders",
             "on": [{"left": "customer_id", "right": "id"}]}
        ]
    }))
    .unwrap()
}

#[test]
fn test_single_table_binds_unqualified_columns() {
    let ctx = CompileContext::new(vec!["sales"]);
    let expr: Expression = serde_json::from_value(json!("amount")).unwrap();
    let ir = compile_expression(&expr, &ctx, &ComponentPath::root()).unwrap();
    assert_eq!(ir, IrExpr::column("sales", "amount"));
}

#[test]
fn test_unqualified_column_is_ambiguous_across_tables() {
    let ctx = CompileContext::new(vec!["orders", "customers"]);
    let expr: Expression = serde_json::from_value(json!("segment")).unwrap();
    let err = compile_expression(&expr, &ctx, &ComponentPath::new("dimensions.segment.expr"))
        .unwrap_err();
    assert_eq!(
        err,
        MetricError::AmbiguousTableReference {
            path: ComponentPath::new("dimensions.segment.expr"),
            column: "segment".into(),
            tables: vec!["orders".into(), "customers".into()],
        }
    );
}

#[test]
fn test_default_table_resolves_ambiguity() {
    let ctx = CompileContext::new(vec!["orders", "customers"]).with_default_table(Some("customers"));
    let expr: Expression = serde_json::from_value(json!("segment")).unwrap();
    let ir = compile_expression(&expr, &ctx, &ComponentPath::root()).unwrap();
    assert_eq!(ir, IrExpr::column("customers", "segment"));
}

#[test]
fn test_unknown_table_is_rejected() {
    let ctx = CompileContext::new(vec!["orders"]);
    let expr: Expression = serde_json::from_value(json!("stores.city")).unwrap();
    let err = compile_expression(&expr, &ctx, &ComponentPath::new("dimensions.city.expr"))
        .unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    assert_eq!(err.path().unwrap().as_str(), "dimensions.city.expr");
}

#[test]
fn test_functions_outside_allow_list_do_not_parse() {
    let parsed: Result<Expression, _> = serde_json::from_value(json!({
        "type": "function", "name": "pg_sleep", "args": ["amount"]
    }));
    assert!(parsed.is_err());
}

#[test]
fn test_conditional_keeps_clause_order() {
    let cond: Conditional = serde_json::from_value(json!({
        "when": [
            {"field": "amount", "operator": "gte", "values": [1000],
             "then": {"type": "literal", "value": "large"}},
            {"field": "amount", "operator": "gte", "values": [100],
             "then": {"type": "literal", "value": "medium"}}
        ],
        "else": {"type": "literal", "value": "small"}
    }))
    .unwrap();
    let ctx = CompileContext::new(vec!["orders"]);
    let ir = compile_conditional(&cond, &ctx, &ComponentPath::new("dimensions.size.conditional"))
        .unwrap();

    let IrExpr::Case {
        branches,
        otherwise,
    } = ir
    else {
        panic!("expected a CASE expression");
    };
    let labels: Vec<_> = branches
        .iter()
        .map(|(_, then)| match then {
            IrExpr::Literal {
                value: ScalarValue::String(s),
            } => s.as_str(),
            other => panic!("unexpected branch: {other:?}"),
        })
        .collect();
    assert_eq!(labels, vec!["large", "medium"]);
    assert_eq!(
        *otherwise,
        IrExpr::Literal {
            value: ScalarValue::String("small".into())
        }
    );
}

#[test]
fn test_metric_components_compile_with_bindings() {
    let compiled = compile_metric(&orders_with_customers()).unwrap();

    assert_eq!(compiled.dimensions.len(), 1);
    assert_eq!(
        compiled.dimensions[0].expr,
        IrExpr::column("customers", "segment")
    );
    assert_eq!(compiled.dimensions[0].path.as_str(), "dimensions.segment");

    assert_eq!(compiled.measures.len(), 2);
    assert!(compiled.measures.iter().all(|m| m.expr.is_aggregate()));

    let derivation = &compiled.derivations[0];
    assert_eq!(derivation.output, "avg_order_value");
    assert!(matches!(
        derivation.expr,
        IrExpr::Binary {
            op: IrBinaryOp::Div,
            ..
        }
    ));
    assert!(derivation.expr.is_aggregate());
}

#[test]
fn test_derivation_without_measures_is_rejected() {
    let mut value = serde_json::to_value(orders_with_customers()).unwrap();
    value["derivations"] = json!([{"name": "constant", "expr": {"type": "literal", "value": 1}}]);
    let metric: Metric = serde_json::from_value(value).unwrap();
    let err = compile_metric(&metric).unwrap_err();
    assert_eq!(err.kind(), "ValidationError");
    assert_eq!(
        err.path().unwrap().as_str(),
        "derivations.constant.expr"
    );
}
