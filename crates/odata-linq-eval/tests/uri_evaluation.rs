//! Evaluating generated URIs the way a service answers them

use odata_linq_ast::{
    ExprRef, FunctionParameter, QueryBuilder, ServiceOperation, constant, function_parameter,
    lambda, root,
};
use odata_linq_diagnostics::{ODL0105, ODL0107};
use odata_linq_eval::{EvaluationSettings, ODataUriEvaluator};
use odata_linq_model::{EntityModelSchema, QueryDataSet};
use odata_linq_semantic::QueryResolver;
use odata_linq_types::{
    EntityType, Multiplicity, NavigationProperty, PrimitiveType, QueryStructuralValue, QueryType,
    QueryValue, ScalarValue, StructuralProperty,
};
use odata_linq_uri::{
    DefaultLiteralConverter, ExpressionToStringConverter, FilterClause, KeyValue, ODataUriSegment,
    QueryBasedODataUri, UriQueryVisitor,
};
use pretty_assertions::assert_eq;
use rstest::{fixture, rstest};
use std::sync::Arc;

// Rows are deliberately out of key order
const DATA: &str = r#"{
  "Customers": [
    {"@odata.type": "NS.VipCustomer", "Id": 3, "Name": "Cid", "Age": 45, "Level": 3, "Orders": [], "BestFriend": 2},
    {"Id": 1, "Name": "Ann", "Age": 30, "Orders": [10, 11], "BestFriend": 2},
    {"Id": 2, "Name": "Bob", "Age": 17, "Orders": [12], "BestFriend": null}
  ],
  "Orders": [
    {"OrderId": 12, "Amount": 20},
    {"OrderId": 10, "Amount": 10.5},
    {"OrderId": 11, "Amount": 4}
  ]
}"#;

struct Service {
    schema: EntityModelSchema,
    data: QueryDataSet,
}

impl Service {
    fn uri(&self, query: &ExprRef) -> QueryBasedODataUri {
        let resolved = QueryResolver::new(&self.schema).resolve(query).unwrap();
        UriQueryVisitor::new(ExpressionToStringConverter::new(&DefaultLiteralConverter))
            .compute_uri(&resolved)
            .unwrap()
    }

    fn evaluator(&self) -> ODataUriEvaluator<'_> {
        ODataUriEvaluator::new(&self.schema, &self.data)
    }

    fn get(&self, query: &ExprRef) -> QueryValue {
        self.evaluator().evaluate(&self.uri(query), true, true).unwrap()
    }
}

#[fixture]
fn service() -> Service {
    let schema = EntityModelSchema::builder()
        .entity_type(
            EntityType::new("NS", "Customer")
                .with_key(["Id"])
                .with_property(StructuralProperty::primitive("Id", PrimitiveType::Int32))
                .with_property(StructuralProperty::primitive("Name", PrimitiveType::String))
                .with_property(StructuralProperty::primitive("Age", PrimitiveType::Int32))
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
                .with_key(["OrderId"])
                .with_property(StructuralProperty::primitive("OrderId", PrimitiveType::Int32))
                .with_property(StructuralProperty::primitive("Amount", PrimitiveType::Decimal)),
        )
        .paged_entity_set("Customers", "NS.Customer", 2)
        .entity_set("Orders", "NS.Order")
        .build()
        .unwrap();
    let data = QueryDataSet::from_json(&schema, DATA).unwrap();
    Service { schema, data }
}

fn customers() -> ExprRef {
    root("Customers")
}

fn entities(value: &QueryValue) -> Vec<QueryStructuralValue> {
    value
        .as_collection()
        .unwrap()
        .elements()
        .iter()
        .map(|v| v.as_structural().unwrap().clone())
        .collect()
}

fn ids(value: &QueryValue, key: &str) -> Vec<i64> {
    entities(value)
        .iter()
        .map(|e| e.member(key).and_then(|v| v.as_scalar().and_then(ScalarValue::as_i64)).unwrap())
        .collect()
}

fn name_of(entity: &QueryStructuralValue) -> Option<String> {
    entity.member("Name").and_then(|v| v.as_scalar().and_then(|s| s.as_str().map(String::from)))
}

// === Paging ===

#[rstest]
fn test_paged_set_is_ordered_by_key_and_truncated(service: Service) {
    assert_eq!(ids(&service.get(&customers()), "Id"), vec![1, 2]);
}

#[rstest]
fn test_paging_can_be_disabled(service: Service) {
    let uri = service.uri(&customers());
    let value = service.evaluator().evaluate(&uri, true, false).unwrap();
    assert_eq!(ids(&value, "Id"), vec![3, 1, 2]);
}

#[rstest]
fn test_ordering_precedes_key_order(service: Service) {
    let query = customers()
        .filter(lambda("c", |c| c.prop("Age").greater_than(&constant(18))))
        .order_by_descending(lambda("c", |c| c.prop("Name")));
    assert_eq!(ids(&service.get(&query), "Id"), vec![3, 1]);
}

#[rstest]
#[case::skip_top(root("Orders").skip(1).take(1), vec![11])]
#[case::top_orders_by_key(root("Orders").take(2), vec![10, 11])]
#[case::unpaged_keeps_data_order(root("Orders"), vec![12, 10, 11])]
fn test_unpaged_set(service: Service, #[case] query: ExprRef, #[case] expected: Vec<i64>) {
    assert_eq!(ids(&service.get(&query), "OrderId"), expected);
}

#[rstest]
fn test_default_page_size_from_settings(service: Service) {
    let settings = EvaluationSettings {
        default_page_size: Some(1),
        ..Default::default()
    };
    let uri = service.uri(&root("Orders"));
    let value = service.evaluator().with_settings(settings).evaluate_with_settings(&uri).unwrap();
    assert_eq!(ids(&value, "OrderId"), vec![10]);
}

// === Path segments ===

#[rstest]
fn test_key_collapses_to_entity(service: Service) {
    let value = service.get(&customers().key([("Id", constant(1))]));
    let ann = value.as_structural().unwrap();
    assert_eq!(name_of(ann).as_deref(), Some("Ann"));
}

#[rstest]
fn test_missing_key_is_null(service: Service) {
    let value = service.get(&customers().key([("Id", constant(99))]));
    assert!(value.is_null());
    assert!(value.evaluation_error().is_none());
    assert!(value.value_type().is_entity());
}

#[rstest]
fn test_key_then_collection_navigation(service: Service) {
    let value = service.get(&customers().key([("Id", constant(1))]).prop("Orders"));
    assert_eq!(ids(&value, "OrderId"), vec![10, 11]);
}

#[rstest]
fn test_key_then_single_navigation(service: Service) {
    let value = service.get(&customers().key([("Id", constant(1))]).prop("BestFriend"));
    assert_eq!(name_of(value.as_structural().unwrap()).as_deref(), Some("Bob"));
}

#[rstest]
fn test_key_then_property(service: Service) {
    let value = service.get(&customers().key([("Id", constant(3))]).prop("Name"));
    assert_eq!(value.as_scalar(), Some(&ScalarValue::from("Cid")));
}

#[rstest]
fn test_type_segment(service: Service) {
    let value = service.get(&customers().of_type("NS.VipCustomer"));
    assert_eq!(ids(&value, "Id"), vec![3]);
}

#[rstest]
fn test_count_ignores_paging(service: Service) {
    let value = service.get(&customers().count());
    assert_eq!(value.as_scalar().and_then(ScalarValue::as_i64), Some(3));
    let adults = customers()
        .filter(lambda("c", |c| c.prop("Age").greater_than(&constant(18))))
        .count();
    assert_eq!(service.get(&adults).as_scalar().and_then(ScalarValue::as_i64), Some(2));
}

#[rstest]
fn test_raw_filter_is_ignored(service: Service) {
    let mut uri = service.uri(&root("Orders"));
    uri.filters.push(FilterClause {
        expression: "OrderId eq 10".into(),
        lambda: None,
    });
    let value = service.evaluator().evaluate(&uri, true, true).unwrap();
    assert_eq!(ids(&value, "OrderId").len(), 3);
}

#[rstest]
fn test_service_operation_segment(service: Service) {
    let customer_type = service.schema.entity_set_type("Customers").unwrap();
    let older_than = Arc::new(
        ServiceOperation::new("OlderThan", Some(customer_type))
            .with_parameter(FunctionParameter::new("age", QueryType::int32()))
            .with_entity_set("Customers")
            .with_body(customers().filter(lambda("c", |c| c.prop("Age").greater_than(&function_parameter("age"))))),
    );
    let uri = QueryBasedODataUri {
        segments: vec![ODataUriSegment::ServiceOperation {
            operation: older_than,
            arguments: vec![("age".into(), ScalarValue::Int32(20))],
        }],
        ..Default::default()
    };
    let value = service.evaluator().evaluate(&uri, true, true).unwrap();
    assert_eq!(ids(&value, "Id"), vec![1, 3]);
}

#[rstest]
fn test_invalid_segment_sequences(service: Service) {
    let key_first = QueryBasedODataUri {
        segments: vec![ODataUriSegment::Key(vec![KeyValue {
            name: "Id".into(),
            value: ScalarValue::Int32(1),
            literal: "1".into(),
        }])],
        ..Default::default()
    };
    let err = service.evaluator().evaluate(&key_first, true, true).unwrap_err();
    assert_eq!(err.code(), ODL0107);

    let empty = QueryBasedODataUri::default();
    let err = service.evaluator().evaluate(&empty, true, true).unwrap_err();
    assert_eq!(err.code(), ODL0107);

    let unknown_navigation = QueryBasedODataUri {
        segments: vec![
            ODataUriSegment::EntitySet("Orders".into()),
            ODataUriSegment::Navigation("Customer".into()),
        ],
        ..Default::default()
    };
    let err = service.evaluator().evaluate(&unknown_navigation, true, true).unwrap_err();
    assert_eq!(err.code(), ODL0105);
}

// === $select and $expand ===

#[rstest]
fn test_select_hides_other_members(service: Service) {
    let value = service.get(&customers().select(lambda("c", |c| c.prop("Name"))));
    let first = &entities(&value)[0];
    assert_eq!(first.all_member_names(), vec!["Name"]);
    assert!(first.is_hidden("Age"));
    assert!(first.member("Age").unwrap().is_null());
}

#[rstest]
fn test_navigation_is_hidden_unless_expanded(service: Service) {
    let value = service.get(&customers());
    let ann = &entities(&value)[0];
    assert!(ann.is_hidden("Orders"));
    assert!(ann.member("Orders").unwrap().is_null());

    let unmasked = service.evaluator().evaluate(&service.uri(&customers()), false, true).unwrap();
    let ann = &entities(&unmasked)[0];
    assert!(matches!(ann.member("Orders"), Some(QueryValue::Link(_))));
}

#[rstest]
fn test_expand_resolves_navigation(service: Service) {
    let value = service.get(&customers().expand("Orders"));
    let ann = &entities(&value)[0];
    assert_eq!(ids(&ann.member("Orders").unwrap(), "OrderId"), vec![10, 11]);
    assert!(ann.is_hidden("BestFriend"));
}

#[rstest]
fn test_expanded_entities_keep_identity(service: Service) {
    let uri = service.uri(&customers().select(lambda("c", |c| c.prop("BestFriend"))));
    let value = service.evaluator().evaluate(&uri, true, false).unwrap();
    let friends: Vec<QueryStructuralValue> = entities(&value)
        .iter()
        .filter_map(|c| c.member("BestFriend").and_then(|f| f.as_structural().cloned()))
        .filter(|f| !f.is_null())
        .collect();
    // Cid and Ann both point at Bob
    assert_eq!(friends.len(), 2);
    assert!(friends[0].ptr_eq(&friends[1]));
    assert_eq!(name_of(&friends[0]).as_deref(), Some("Bob"));
}

#[rstest]
fn test_select_through_navigation_expands_it(service: Service) {
    let value = service.get(&customers().select(lambda("c", |c| c.prop("BestFriend").prop("Name"))));
    let ann = &entities(&value)[0];
    assert_eq!(ann.all_member_names(), vec!["BestFriend"]);

    let friend = ann.member("BestFriend").unwrap();
    let friend = friend.as_structural().unwrap();
    assert_eq!(name_of(friend).as_deref(), Some("Bob"));
    assert_eq!(friend.all_member_names(), vec!["Name"]);
    assert!(friend.is_hidden("Age"));
}
