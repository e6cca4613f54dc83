//! URI generation over resolved queries

use odata_linq_ast::{
    ExprRef, FunctionParameter, QueryBuilder, ServiceOperation, constant, lambda, record, root,
    service_operation,
};
use odata_linq_model::{EntityModelSchema, ServiceOperationDecl};
use odata_linq_semantic::QueryResolver;
use odata_linq_types::{
    ComplexType, EntityType, Multiplicity, NavigationProperty, PrimitiveType, QueryType,
    StructuralProperty, TypeReference,
};
use odata_linq_uri::{
    DefaultLiteralConverter, ExpressionToStringConverter, ODataUriSegment, QueryBasedODataUri,
    UriBuilderSettings, UriQueryVisitor,
};
use pretty_assertions::assert_eq;
use rstest::rstest;
use std::sync::Arc;

fn schema() -> EntityModelSchema {
    EntityModelSchema::builder()
        .complex_type(
            ComplexType::new("NS", "Address")
                .with_property(StructuralProperty::primitive("City", PrimitiveType::String)),
        )
        .entity_type(
            EntityType::new("NS", "Customer")
                .with_key(["Id"])
                .with_property(StructuralProperty::primitive("Id", PrimitiveType::Int32))
                .with_property(StructuralProperty::primitive("Name", PrimitiveType::String))
                .with_property(StructuralProperty::new(
                    "Address",
                    TypeReference::Complex("NS.Address".into()),
                ))
                .with_navigation(NavigationProperty::new("Orders", "NS.Order", Multiplicity::Many))
                .with_navigation(NavigationProperty::new(
                    "BestFriend",
                    "NS.Customer",
                    Multiplicity::ZeroOrOne,
                )),
        )
        .entity_type(
            EntityType::new("NS", "VipCustomer")
                .derived_from("NS.Customer")
                .with_property(StructuralProperty::primitive("Level", PrimitiveType::Int32)),
        )
        .entity_type(
            EntityType::new("NS", "Order")
                .with_key(["OrderId", "Region"])
                .with_property(StructuralProperty::primitive("OrderId", PrimitiveType::Int32))
                .with_property(StructuralProperty::primitive("Region", PrimitiveType::String))
                .with_property(StructuralProperty::primitive("Amount", PrimitiveType::Decimal)),
        )
        .entity_set("Customers", "NS.Customer")
        .entity_set("Orders", "NS.Order")
        .service_operation(ServiceOperationDecl {
            name: "TopCustomers".into(),
            return_type: Some("Collection(NS.Customer)".into()),
            entity_set: Some("Customers".into()),
            parameters: vec![("count".into(), "Edm.Int32".into())],
        })
        .build()
        .unwrap()
}

fn uri(query: &ExprRef) -> QueryBasedODataUri {
    let schema = schema();
    let resolved = QueryResolver::new(&schema).resolve(query).unwrap();
    UriQueryVisitor::new(ExpressionToStringConverter::new(&DefaultLiteralConverter))
        .compute_uri(&resolved)
        .unwrap()
}

fn customers() -> ExprRef {
    root("Customers")
}

#[rstest]
#[case::end_to_end(
    customers()
        .filter(lambda("c", |c| c.prop("Id").greater_than(&constant(5))))
        .order_by(lambda("c", |c| c.prop("Name")))
        .skip(2)
        .take(3),
    "Customers?$filter=Id gt 5&$top=3&$skip=2&$orderby=Name"
)]
#[case::option_order(
    customers()
        .filter(lambda("c", |c| c.prop("Id").greater_than(&constant(1))))
        .order_by(lambda("c", |c| c.prop("Name")))
        .then_by_descending(lambda("c", |c| c.prop("Id")))
        .skip(5)
        .take(10)
        .select(lambda("c", |c| record([("Name", c.prop("Name")), ("Orders", c.prop("Orders"))]))),
    "Customers?$filter=Id gt 1&$select=Name,Orders&$expand=Orders&$top=10&$skip=5&$orderby=Name,Id desc"
)]
#[case::filters_and(
    customers()
        .filter(lambda("c", |c| c.prop("Id").greater_than(&constant(1))))
        .filter(lambda("x", |x| x.prop("Name").equal(&constant("Bob")))),
    "Customers?$filter=Id gt 1 and Name eq 'Bob'"
)]
#[case::later_order_by_replaces(
    customers()
        .order_by(lambda("c", |c| c.prop("Id")))
        .order_by_descending(lambda("c", |c| c.prop("Name"))),
    "Customers?$orderby=Name desc"
)]
#[case::key_navigation(
    customers().key([("Id", constant(7))]).prop("Orders"),
    "Customers(7)/Orders"
)]
#[case::composite_key(
    root("Orders").key([("OrderId", constant(1)), ("Region", constant("North West"))]),
    "Orders(OrderId=1,Region='North%20West')"
)]
#[case::single_navigation(
    customers().key([("Id", constant(7))]).prop("BestFriend").prop("Orders"),
    "Customers(7)/BestFriend/Orders"
)]
#[case::complex_property(
    customers().key([("Id", constant(7))]).prop("Address").prop("City"),
    "Customers(7)/Address/City"
)]
#[case::property_value(
    customers().key([("Id", constant(7))]).prop("Name").value(),
    "Customers(7)/Name/$value"
)]
#[case::links(
    customers().key([("Id", constant(7))]).prop("Orders").links(),
    "Customers(7)/$links/Orders"
)]
#[case::count(customers().count(), "Customers/$count")]
#[case::filtered_count(
    customers().filter(lambda("c", |c| c.prop("Id").greater_than(&constant(1)))).long_count(),
    "Customers/$count?$filter=Id gt 1"
)]
#[case::type_cast(
    customers().of_type("NS.VipCustomer").filter(lambda("v", |v| v.prop("Level").greater_than(&constant(2)))),
    "Customers/NS.VipCustomer?$filter=Level gt 2"
)]
#[case::navigation_select(
    customers().select(lambda("c", |c| c.prop("BestFriend"))),
    "Customers?$select=BestFriend&$expand=BestFriend"
)]
#[case::nested_select(
    customers().select(lambda("c", |c| c.prop("Address").prop("City"))),
    "Customers?$select=Address/City"
)]
#[case::select_through_navigation(
    customers().select(lambda("c", |c| c.prop("BestFriend").prop("Name"))),
    "Customers?$select=BestFriend/Name&$expand=BestFriend"
)]
#[case::select_through_nested_navigations(
    customers().select(lambda("c", |c| c.prop("BestFriend").prop("BestFriend").prop("Name"))),
    "Customers?$select=BestFriend/BestFriend/Name&$expand=BestFriend,BestFriend/BestFriend"
)]
#[case::expand(
    customers().expand("Orders").expand("BestFriend, Orders"),
    "Customers?$expand=Orders,BestFriend"
)]
#[case::inline_count(customers().inline_count().take(1), "Customers?$inlinecount=allpages&$top=1")]
#[case::first(
    customers().first_or_default(),
    "Customers?$top=1"
)]
#[case::any(
    customers().filter(lambda("c", |c| {
        c.prop("Orders").any_where(lambda("o", |o| o.prop("Amount").greater_than(&constant(5))))
    })),
    "Customers?$filter=Orders/any(o:o/Amount gt 5)"
)]
#[case::disjunction_grouped(
    customers()
        .filter(lambda("c", |c| c.prop("Id").equal(&constant(1)).or(&c.prop("Id").equal(&constant(2)))))
        .filter(lambda("c", |c| c.prop("Name").not_equal(&constant("x")))),
    "Customers?$filter=(Id eq 1 or Id eq 2) and Name ne 'x'"
)]
fn test_uri(#[case] query: ExprRef, #[case] expected: &str) {
    assert_eq!(uri(&query).to_string(), expected);
}

#[test]
fn test_nested_lambda_names_are_unique() {
    // Both lambdas are named `c`; parameter naming renames the inner one
    let query = customers().filter(lambda("c", |c| {
        c.prop("Orders").any_where(lambda("c", |o| o.prop("Amount").greater_than(&constant(5))))
    }));
    assert_eq!(
        uri(&query).to_string(),
        "Customers?$filter=Orders/any(c1:c1/Amount gt 5)"
    );
}

#[test]
fn test_service_operation() {
    let schema = schema();
    let operation = schema.service_operation("TopCustomers").unwrap().clone();
    let query = service_operation(operation, vec![constant(3)])
        .filter(lambda("c", |c| c.prop("Id").greater_than(&constant(1))));
    let resolved = QueryResolver::new(&schema).resolve(&query).unwrap();
    let uri = UriQueryVisitor::new(ExpressionToStringConverter::new(&DefaultLiteralConverter))
        .compute_uri(&resolved)
        .unwrap();
    assert_eq!(uri.to_string(), "TopCustomers?$filter=Id gt 1&count=3");
    assert!(matches!(
        &uri.segments[0],
        ODataUriSegment::ServiceOperation { arguments, .. } if arguments.len() == 1
    ));
}

#[test]
fn test_void_service_operation() {
    let schema = schema();
    let reset = Arc::new(
        ServiceOperation::new("Reset", None)
            .with_parameter(FunctionParameter::new("hard", QueryType::boolean())),
    );
    let query = service_operation(reset, vec![constant(true)]);
    let resolved = QueryResolver::new(&schema).resolve(&query).unwrap();
    let uri = UriQueryVisitor::new(ExpressionToStringConverter::new(&DefaultLiteralConverter))
        .compute_uri(&resolved)
        .unwrap();
    assert_eq!(uri.to_string(), "Reset?hard=true");
}

#[test]
fn test_custom_inline_count_keyword() {
    let settings = UriBuilderSettings {
        inline_count_keyword: "none".into(),
        ..Default::default()
    };
    let uri = uri(&customers().inline_count());
    assert_eq!(uri.render(&settings), "Customers?$inlinecount=none");
}

#[test]
fn test_select_requires_member_access() {
    let schema = schema();
    let query = customers().select(lambda("c", |c| c.prop("Id").add(&constant(1))));
    let resolved = QueryResolver::new(&schema).resolve(&query).unwrap();
    let err = UriQueryVisitor::new(ExpressionToStringConverter::new(&DefaultLiteralConverter))
        .compute_uri(&resolved)
        .unwrap_err();
    assert!(err.is_not_supported());
    assert_eq!(err.code(), odata_linq_diagnostics::ODL0004);
}

#[test]
fn test_visitor_is_reusable() {
    let schema = schema();
    let visitor = UriQueryVisitor::new(ExpressionToStringConverter::new(&DefaultLiteralConverter));
    let first = QueryResolver::new(&schema)
        .resolve(&customers().take(1))
        .unwrap();
    let second = QueryResolver::new(&schema)
        .resolve(&customers().skip(4))
        .unwrap();
    assert_eq!(visitor.compute_uri(&first).unwrap().to_string(), "Customers?$top=1");
    assert_eq!(visitor.compute_uri(&second).unwrap().to_string(), "Customers?$skip=4");
}
