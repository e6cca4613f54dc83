//! End-to-end resolution over a CSDL schema

use odata_linq_ast::{
    CustomFunction, ExprRef, Expression, FunctionParameter, QueryBuilder, call_function, constant,
    function_parameter, lambda, root,
};
use odata_linq_model::EntityModelSchema;
use odata_linq_semantic::QueryResolver;
use odata_linq_types::{PrimitiveType, QueryType};
use pretty_assertions::assert_eq;
use proptest::prelude::*;
use std::sync::Arc;

const CSDL: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="1.0" xmlns:edmx="http://schemas.microsoft.com/ado/2007/06/edmx">
  <edmx:DataServices>
    <Schema Namespace="Shop" xmlns="http://schemas.microsoft.com/ado/2009/11/edm">
      <EntityType Name="Customer">
        <Key><PropertyRef Name="Id"/></Key>
        <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Name" Type="Edm.String"/>
        <Property Name="Age" Type="Edm.Int32"/>
        <Property Name="Limit" Type="Edm.Decimal"/>
        <NavigationProperty Name="Orders" Type="Collection(Shop.Order)"/>
      </EntityType>
      <EntityType Name="Order">
        <Key><PropertyRef Name="OrderId"/></Key>
        <Property Name="OrderId" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Amount" Type="Edm.Decimal"/>
      </EntityType>
      <EntityContainer Name="ShopContainer" m:IsDefaultEntityContainer="true"
          xmlns:m="http://schemas.microsoft.com/ado/2007/08/dataservices/metadata">
        <EntitySet Name="Customers" EntityType="Shop.Customer"/>
        <EntitySet Name="Orders" EntityType="Shop.Order"/>
      </EntityContainer>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

fn schema() -> EntityModelSchema {
    EntityModelSchema::from_csdl(CSDL).unwrap()
}

fn is_adult() -> Arc<CustomFunction> {
    Arc::new(
        CustomFunction::new(
            "Shop",
            "IsAdult",
            vec![FunctionParameter::new("age", QueryType::int32())],
            QueryType::boolean(),
        )
        .with_body(function_parameter("age").greater_or_equal(&constant(18))),
    )
}

/// orders.Any(o => o.Amount > 5)
fn has_large_order() -> Arc<CustomFunction> {
    Arc::new(
        CustomFunction::new(
            "Shop",
            "HasLargeOrder",
            vec![FunctionParameter::new("orders", QueryType::collection(QueryType::Any))],
            QueryType::boolean(),
        )
        .with_body(
            function_parameter("orders")
                .any_where(lambda("o", |o| o.prop("Amount").greater_than(&constant(5)))),
        ),
    )
}

/// orders.Any(c => c.Amount > limit)
fn any_above() -> Arc<CustomFunction> {
    Arc::new(
        CustomFunction::new(
            "Shop",
            "AnyAbove",
            vec![
                FunctionParameter::new("orders", QueryType::collection(QueryType::Any)),
                FunctionParameter::new("limit", QueryType::Primitive(PrimitiveType::Decimal)),
            ],
            QueryType::boolean(),
        )
        .with_body(
            function_parameter("orders")
                .any_where(lambda("c", |c| c.prop("Amount").greater_than(&function_parameter("limit")))),
        ),
    )
}

fn lambda_names(expr: &ExprRef) -> Vec<String> {
    let mut names = Vec::new();
    odata_linq_ast::walk(expr, &mut |node: &ExprRef| {
        if let Expression::Lambda(l) = &node.expr {
            names.extend(l.parameters.iter().cloned());
        }
    });
    names
}

#[test]
fn test_pipeline_inlines_and_types() {
    let schema = schema();
    let query = root("Customers")
        .filter(lambda("c", |c| call_function(is_adult(), vec![c.prop("Age")])))
        .select(lambda("c", |c| c.prop("Name")));
    let resolved = QueryResolver::new(&schema).resolve(&query).unwrap();

    assert_eq!(
        resolved.expression_type().map(ToString::to_string).as_deref(),
        Some("Collection(Edm.String)")
    );
    let mut calls = 0;
    odata_linq_ast::walk(&resolved, &mut |node: &ExprRef| {
        if matches!(node.expr, Expression::FunctionCall(_)) {
            calls += 1;
        }
    });
    assert_eq!(calls, 0);
    assert_eq!(lambda_names(&resolved), vec!["c", "c1"]);
}

#[test]
fn test_inlined_lambdas_are_renamed() {
    let schema = schema();
    // The body brings its own `o`, colliding with the caller's lambda
    let query = root("Customers")
        .filter(lambda("o", |o| call_function(has_large_order(), vec![o.prop("Orders")])));

    let resolved = QueryResolver::new(&schema).resolve(&query).unwrap();
    assert_eq!(lambda_names(&resolved), vec!["o", "o1"]);
}

#[test]
fn test_arguments_are_not_captured_by_body_lambdas() {
    let schema = schema();
    // The body's `c` must not capture the caller's `c` passed in `c.Limit`
    let query = root("Customers")
        .filter(lambda("c", |c| call_function(any_above(), vec![c.prop("Orders"), c.prop("Limit")])));

    let resolved = QueryResolver::new(&schema).resolve(&query).unwrap();
    assert_eq!(lambda_names(&resolved), vec!["c", "c1"]);

    let mut members = Vec::new();
    odata_linq_ast::walk(&resolved, &mut |node: &ExprRef| {
        if let Expression::Property(property) = &node.expr {
            if let Expression::Parameter(parameter) = &property.instance.expr {
                members.push(format!("{}.{}", parameter.name, property.name));
            }
        }
    });
    members.sort();
    assert_eq!(members, vec!["c.Limit", "c.Orders", "c1.Amount"]);
}

#[test]
fn test_depth_limit_applies() {
    let schema = schema();
    let query = root("Customers")
        .filter(lambda("c", |c| c.prop("Age").add(&constant(1)).add(&constant(2)).greater_than(&constant(3))));
    let err = QueryResolver::new(&schema)
        .with_max_depth(4)
        .resolve(&query)
        .unwrap_err();
    assert_eq!(err.code(), odata_linq_diagnostics::ODL0108);
}

proptest! {
    #[test]
    fn test_paging_keeps_source_type(skip in 0i32..100, take in 1i32..100) {
        let schema = schema();
        let query = root("Customers").skip(skip).take(take);
        let resolved = QueryResolver::new(&schema).resolve(&query).unwrap();
        prop_assert_eq!(
            resolved.expression_type().map(ToString::to_string),
            Some("Collection(Shop.Customer)".to_string())
        );
    }
}
