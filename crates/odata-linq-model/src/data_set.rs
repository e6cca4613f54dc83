//! In-memory data set backing the evaluator
//!
//! Rows are stored per entity set as shared structural values. Navigation
//! members hold [`QueryLinkValue`]s (target set plus related keys) and are
//! resolved on access, so every path to an entity yields the same handle.

use crate::EntityModelSchema;
use chrono::{DateTime, NaiveDateTime};
use indexmap::IndexMap;
use log::debug;
use odata_linq_diagnostics::{ODL0103, ODL0300, ODL0301, ODL0406, QueryError, Result};
use odata_linq_types::{
    EntityKey, EntityType, NavigationProperty, PrimitiveType, QueryCollectionValue,
    QueryLinkValue, QueryStructuralValue, QueryType, QueryValue, ScalarValue, TypeReference,
};
use rust_decimal::Decimal;
use serde_json::Value as JsonValue;
use std::str::FromStr;
use std::sync::Arc;

/// Rows per entity set
#[derive(Debug, Clone, Default)]
pub struct QueryDataSet {
    sets: IndexMap<String, Vec<QueryStructuralValue>>,
}

impl QueryDataSet {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a row to an entity set
    pub fn add(&mut self, entity_set: impl Into<String>, entity: QueryStructuralValue) {
        self.sets.entry(entity_set.into()).or_default().push(entity);
    }

    /// Rows of an entity set (empty when none were added)
    pub fn rows(&self, entity_set: &str) -> &[QueryStructuralValue] {
        self.sets.get(entity_set).map(Vec::as_slice).unwrap_or(&[])
    }

    /// An entity set as a typed collection value
    pub fn entity_set_value(
        &self,
        schema: &EntityModelSchema,
        entity_set: &str,
    ) -> Result<QueryCollectionValue> {
        let value_type = schema.entity_set_type(entity_set)?;
        let elements = self
            .rows(entity_set)
            .iter()
            .cloned()
            .map(QueryValue::Structural)
            .collect();
        Ok(QueryCollectionValue::from_type(value_type, elements))
    }

    /// Find a row by key
    pub fn find_by_key(&self, entity_set: &str, key: &EntityKey) -> Option<&QueryStructuralValue> {
        self.rows(entity_set).iter().find(|row| {
            row.key_values()
                .is_some_and(|row_key| keys_match(&row_key, key))
        })
    }

    /// Resolve a navigation link to the related entity (or typed null) or
    /// to the collection of related entities
    pub fn resolve_link(&self, link: &QueryLinkValue) -> QueryValue {
        if link.is_many() {
            let elements = link
                .keys
                .iter()
                .filter_map(|key| self.find_by_key(&link.entity_set, key))
                .cloned()
                .map(QueryValue::Structural)
                .collect();
            return QueryValue::Collection(QueryCollectionValue::from_type(
                link.value_type.clone(),
                elements,
            ));
        }
        link.keys
            .first()
            .and_then(|key| self.find_by_key(&link.entity_set, key))
            .cloned()
            .map(QueryValue::Structural)
            .unwrap_or_else(|| QueryValue::null_of(&link.value_type))
    }

    /// Load rows from a JSON document shaped as
    /// `{ "EntitySet": [ { "Prop": value, "Nav": key | [keys] }, ... ] }`.
    ///
    /// Navigation values are the related keys: a scalar for single-property
    /// keys, an object for composite keys. A row may name a derived type
    /// through `@odata.type`.
    pub fn from_json(schema: &EntityModelSchema, json: &str) -> Result<Self> {
        let document: JsonValue = serde_json::from_str(json).map_err(|e| {
            QueryError::system(ODL0406, format!("Invalid data set document: {e}"))
        })?;
        let sets = document
            .as_object()
            .ok_or_else(|| invalid_format("the document root must be an object"))?;

        let mut data = Self::new();
        for (set_name, rows) in sets {
            let set = schema.entity_set(set_name).ok_or_else(|| {
                QueryError::metadata(ODL0300, format!("Entity set '{set_name}' not found"))
            })?;
            let rows = rows
                .as_array()
                .ok_or_else(|| invalid_format(&format!("'{set_name}' must be an array of rows")))?;
            for row in rows {
                let row = row
                    .as_object()
                    .ok_or_else(|| invalid_format(&format!("rows of '{set_name}' must be objects")))?;
                let type_name = row
                    .get("@odata.type")
                    .and_then(JsonValue::as_str)
                    .unwrap_or(set.entity_type.as_str());
                let entity = schema.entity_type(type_name).ok_or_else(|| {
                    QueryError::metadata_for_type(
                        ODL0301,
                        format!("Entity type '{type_name}' not found"),
                        type_name,
                    )
                })?;
                if !entity.is_or_derives_from(&set.entity_type) {
                    return Err(QueryError::contract(
                        ODL0103,
                        format!("Type '{type_name}' cannot be stored in entity set '{set_name}'"),
                    ));
                }
                let value = entity_from_json(schema, entity, row)?;
                data.add(set_name.clone(), value);
            }
        }

        debug!(
            "Loaded data set with {} rows across {} entity sets",
            data.sets.values().map(Vec::len).sum::<usize>(),
            data.sets.len()
        );
        Ok(data)
    }
}

fn invalid_format(message: &str) -> QueryError {
    QueryError::system(ODL0406, format!("Invalid data set document: {message}"))
}

fn keys_match(a: &EntityKey, b: &EntityKey) -> bool {
    a.len() == b.len()
        && a.iter().zip(b.iter()).all(|((name_a, value_a), (name_b, value_b))| {
            name_a == name_b
                && match (value_a.as_i64(), value_b.as_i64()) {
                    (Some(x), Some(y)) => x == y,
                    _ => value_a == value_b,
                }
        })
}

/// Convert a scalar to the declared primitive type of a property.
///
/// Integral values widen or narrow when they fit, numbers convert between
/// floating and decimal forms and strings parse into temporal and guid
/// values.
pub fn coerce_scalar(value: ScalarValue, target: PrimitiveType) -> Result<ScalarValue> {
    if value.is_null() || value.primitive_type() == Some(target) {
        return Ok(value);
    }
    let mismatch = || {
        QueryError::contract(
            ODL0103,
            format!("Cannot convert '{value}' to {}", target.edm_name()),
        )
    };
    let converted = match target {
        PrimitiveType::Byte => value.as_i64().and_then(|v| u8::try_from(v).ok()).map(ScalarValue::Byte),
        PrimitiveType::Int16 => value.as_i64().and_then(|v| i16::try_from(v).ok()).map(ScalarValue::Int16),
        PrimitiveType::Int32 => value.as_i64().and_then(|v| i32::try_from(v).ok()).map(ScalarValue::Int32),
        PrimitiveType::Int64 => value.as_i64().map(ScalarValue::Int64),
        PrimitiveType::Single => value.as_f64().map(|v| ScalarValue::Single(v as f32)),
        PrimitiveType::Double => value.as_f64().map(ScalarValue::Double),
        PrimitiveType::Decimal => value.as_decimal().map(ScalarValue::Decimal),
        PrimitiveType::DateTime => value.as_str().and_then(parse_datetime).map(ScalarValue::DateTime),
        PrimitiveType::DateTimeOffset => value
            .as_str()
            .and_then(|s| DateTime::parse_from_rfc3339(s).ok())
            .map(ScalarValue::DateTimeOffset),
        PrimitiveType::Guid => value.as_str().map(|s| ScalarValue::Guid(s.to_lowercase())),
        PrimitiveType::Binary => value.as_str().and_then(parse_hex).map(ScalarValue::Binary),
        PrimitiveType::Boolean | PrimitiveType::String => None,
    };
    converted.ok_or_else(mismatch)
}

fn parse_datetime(s: &str) -> Option<NaiveDateTime> {
    NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S%.f")
        .or_else(|_| NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M"))
        .ok()
}

fn parse_hex(s: &str) -> Option<Vec<u8>> {
    if s.len() % 2 != 0 {
        return None;
    }
    (0..s.len())
        .step_by(2)
        .map(|i| s.get(i..i + 2).and_then(|b| u8::from_str_radix(b, 16).ok()))
        .collect()
}

fn scalar_from_json(json: &JsonValue, target: PrimitiveType) -> Result<ScalarValue> {
    let raw = match json {
        JsonValue::Null => ScalarValue::Null,
        JsonValue::Bool(b) => ScalarValue::Boolean(*b),
        JsonValue::Number(n) if target == PrimitiveType::Decimal => Decimal::from_str(&n.to_string())
            .map(ScalarValue::Decimal)
            .map_err(|e| invalid_format(&e.to_string()))?,
        JsonValue::Number(n) => match n.as_i64() {
            Some(i) => ScalarValue::Int64(i),
            None => ScalarValue::Double(n.as_f64().unwrap_or_default()),
        },
        JsonValue::String(s) if target == PrimitiveType::Decimal => Decimal::from_str(s)
            .map(ScalarValue::Decimal)
            .map_err(|e| invalid_format(&e.to_string()))?,
        JsonValue::String(s) => ScalarValue::String(s.clone()),
        other => return Err(invalid_format(&format!("expected a primitive value, found {other}"))),
    };
    coerce_scalar(raw, target)
}

fn property_from_json(
    schema: &EntityModelSchema,
    reference: &TypeReference,
    json: Option<&JsonValue>,
) -> Result<QueryValue> {
    let value_type = schema.resolve_type_reference(reference)?;
    let json = match json {
        None | Some(JsonValue::Null) => return Ok(QueryValue::null_of(&value_type)),
        Some(json) => json,
    };
    match reference {
        TypeReference::Primitive(p) => Ok(QueryValue::typed_scalar(
            value_type.clone(),
            scalar_from_json(json, *p)?,
        )),
        TypeReference::Complex(_) => {
            let complex = value_type
                .as_complex()
                .ok_or_else(|| invalid_format("complex property of non-complex type"))?;
            let object = json
                .as_object()
                .ok_or_else(|| invalid_format(&format!("'{}' value must be an object", complex.full_name())))?;
            let mut members = IndexMap::new();
            for property in &complex.properties {
                let value =
                    property_from_json(schema, &property.type_reference, object.get(&property.name))?;
                members.insert(property.name.clone(), value);
            }
            Ok(QueryValue::Structural(QueryStructuralValue::new(
                value_type.clone(),
                members,
            )))
        }
        TypeReference::Collection(inner) => {
            let items = json
                .as_array()
                .ok_or_else(|| invalid_format("collection property value must be an array"))?;
            let elements = items
                .iter()
                .map(|item| property_from_json(schema, inner, Some(item)))
                .collect::<Result<Vec<_>>>()?;
            Ok(QueryValue::Collection(QueryCollectionValue::from_type(
                value_type, elements,
            )))
        }
    }
}

fn key_from_json(target: &EntityType, json: &JsonValue) -> Result<EntityKey> {
    let key_type = |name: &str| -> Result<PrimitiveType> {
        match target.property(name).map(|p| &p.type_reference) {
            Some(TypeReference::Primitive(p)) => Ok(*p),
            _ => Err(invalid_format(&format!(
                "'{name}' is not a key property of '{}'",
                target.full_name()
            ))),
        }
    };
    match json {
        JsonValue::Object(object) => target
            .key
            .iter()
            .map(|name| -> Result<(String, ScalarValue)> {
                let value = object.get(name).unwrap_or(&JsonValue::Null);
                Ok((name.clone(), scalar_from_json(value, key_type(name)?)?))
            })
            .collect(),
        scalar => match target.key.as_slice() {
            [name] => {
                let mut key = EntityKey::new();
                key.push((name.clone(), scalar_from_json(scalar, key_type(name)?)?));
                Ok(key)
            }
            _ => Err(invalid_format(&format!(
                "composite key of '{}' must be given as an object",
                target.full_name()
            ))),
        },
    }
}

fn link_target(
    schema: &EntityModelSchema,
    navigation: &NavigationProperty,
) -> Result<(QueryType, Arc<EntityType>, String)> {
    let value_type = schema.navigation_type(navigation)?;
    let target = schema
        .entity_type(&navigation.target_type)
        .cloned()
        .ok_or_else(|| {
            QueryError::metadata_for_type(
                ODL0301,
                format!("Navigation target '{}' not found", navigation.target_type),
                navigation.target_type.clone(),
            )
        })?;
    let entity_set = schema
        .entity_set_for_type(&navigation.target_type)
        .map(|s| s.name.clone())
        .ok_or_else(|| {
            QueryError::metadata(
                ODL0300,
                format!("No entity set contains '{}'", navigation.target_type),
            )
        })?;
    Ok((value_type, target, entity_set))
}

fn link_from_json(
    schema: &EntityModelSchema,
    navigation: &NavigationProperty,
    json: Option<&JsonValue>,
) -> Result<QueryLinkValue> {
    let (value_type, target, entity_set) = link_target(schema, navigation)?;
    let keys = match json {
        None | Some(JsonValue::Null) => Vec::new(),
        Some(JsonValue::Array(items)) if navigation.multiplicity.is_many() => items
            .iter()
            .map(|item| key_from_json(&target, item))
            .collect::<Result<Vec<_>>>()?,
        Some(_) if navigation.multiplicity.is_many() => {
            return Err(invalid_format(&format!(
                "collection navigation '{}' must be an array of keys",
                navigation.name
            )));
        }
        Some(item) => vec![key_from_json(&target, item)?],
    };
    Ok(QueryLinkValue {
        value_type,
        entity_set,
        keys,
    })
}

fn entity_from_json(
    schema: &EntityModelSchema,
    entity: &Arc<EntityType>,
    row: &serde_json::Map<String, JsonValue>,
) -> Result<QueryStructuralValue> {
    let mut members = IndexMap::new();
    for property in &entity.properties {
        let value = property_from_json(schema, &property.type_reference, row.get(&property.name))?;
        members.insert(property.name.clone(), value);
    }
    for navigation in &entity.navigation_properties {
        let link = link_from_json(schema, navigation, row.get(&navigation.name))?;
        members.insert(navigation.name.clone(), QueryValue::Link(link));
    }
    Ok(QueryStructuralValue::new(
        QueryType::entity(entity.clone()),
        members,
    ))
}

/// Programmatic construction of entity and complex values.
///
/// Declared members that are not set become typed nulls (or empty links
/// for navigations) when the value is built.
///
/// ```
/// # use odata_linq_model::*;
/// # use odata_linq_types::*;
/// let schema = EntityModelSchema::builder()
///     .entity_type(
///         EntityType::new("NS", "Customer")
///             .with_key(["Id"])
///             .with_property(StructuralProperty::primitive("Id", PrimitiveType::Int32))
///             .with_property(StructuralProperty::primitive("Name", PrimitiveType::String)),
///     )
///     .entity_set("Customers", "NS.Customer")
///     .build()
///     .unwrap();
///
/// let alice = StructuralValueBuilder::new(&schema, "NS.Customer")
///     .property("Id", 1)
///     .property("Name", "Alice")
///     .build()
///     .unwrap();
/// assert_eq!(alice.all_member_names(), vec!["Id", "Name"]);
/// ```
pub struct StructuralValueBuilder<'a> {
    schema: &'a EntityModelSchema,
    value_type: Result<QueryType>,
    members: IndexMap<String, QueryValue>,
    error: Option<QueryError>,
}

impl<'a> StructuralValueBuilder<'a> {
    /// Start a value of the entity or complex type `type_name`
    pub fn new(schema: &'a EntityModelSchema, type_name: &str) -> Self {
        let value_type = schema.resolve_type_name(type_name).and_then(|t| {
            if t.is_structural() {
                Ok(t)
            } else {
                Err(QueryError::contract(
                    ODL0103,
                    format!("'{type_name}' is not an entity or complex type"),
                ))
            }
        });
        Self {
            schema,
            value_type,
            members: IndexMap::new(),
            error: None,
        }
    }

    /// Set a primitive property, converting to its declared type
    pub fn property(mut self, name: &str, value: impl Into<ScalarValue>) -> Self {
        let result = self.member_type(name).and_then(|member_type| {
            let primitive = member_type.as_primitive().ok_or_else(|| {
                QueryError::contract(ODL0103, format!("'{name}' is not a primitive property"))
            })?;
            let scalar = coerce_scalar(value.into(), primitive)?;
            Ok(QueryValue::typed_scalar(member_type, scalar))
        });
        self.set(name, result);
        self
    }

    /// Set a complex or collection-valued property
    pub fn value(mut self, name: &str, value: impl Into<QueryValue>) -> Self {
        self.set(name, Ok(value.into()));
        self
    }

    /// Link a navigation property to related entities with single-property
    /// keys
    pub fn link<I, V>(mut self, name: &str, keys: I) -> Self
    where
        I: IntoIterator<Item = V>,
        V: Into<ScalarValue>,
    {
        let keys: Vec<JsonValue> = keys
            .into_iter()
            .map(|k| scalar_to_json(&k.into()))
            .collect();
        let result = self.navigation(name).and_then(|navigation| {
            let json = if navigation.multiplicity.is_many() {
                JsonValue::Array(keys)
            } else {
                keys.into_iter().next().unwrap_or(JsonValue::Null)
            };
            link_from_json(self.schema, &navigation, Some(&json)).map(QueryValue::Link)
        });
        self.set(name, result);
        self
    }

    /// Finish the value
    pub fn build(self) -> Result<QueryStructuralValue> {
        if let Some(err) = self.error {
            return Err(err);
        }
        let value_type = self.value_type?;
        let mut members = self.members;
        let (properties, navigations) = match &value_type {
            QueryType::Entity(e) => (&e.properties, e.navigation_properties.as_slice()),
            QueryType::Complex(c) => (&c.properties, &[][..]),
            other => {
                return Err(QueryError::contract(
                    ODL0103,
                    format!("'{other}' is not an entity or complex type"),
                ));
            }
        };

        let mut ordered = IndexMap::new();
        for property in properties {
            let value = match members.swap_remove(&property.name) {
                Some(value) => value,
                None => QueryValue::null_of(&self.schema.resolve_type_reference(&property.type_reference)?),
            };
            ordered.insert(property.name.clone(), value);
        }
        for navigation in navigations {
            let value = match members.swap_remove(&navigation.name) {
                Some(value) => value,
                None => QueryValue::Link(link_from_json(self.schema, navigation, None)?),
            };
            ordered.insert(navigation.name.clone(), value);
        }
        Ok(QueryStructuralValue::new(value_type, ordered))
    }

    fn member_type(&self, name: &str) -> Result<QueryType> {
        match &self.value_type {
            Ok(owner) => self.schema.member_type(owner, name),
            Err(err) => Err(err.clone()),
        }
    }

    fn navigation(&self, name: &str) -> Result<NavigationProperty> {
        let owner = self.value_type.as_ref().map_err(Clone::clone)?;
        self.schema
            .navigation(owner, name)
            .cloned()
            .ok_or_else(|| {
                QueryError::contract(ODL0103, format!("'{name}' is not a navigation property"))
            })
    }

    fn set(&mut self, name: &str, result: Result<QueryValue>) {
        match result {
            Ok(value) => {
                self.members.insert(name.to_string(), value);
            }
            Err(err) => {
                self.error.get_or_insert(err);
            }
        }
    }
}

fn scalar_to_json(value: &ScalarValue) -> JsonValue {
    match value {
        ScalarValue::Null => JsonValue::Null,
        ScalarValue::Boolean(b) => JsonValue::Bool(*b),
        other => match other.as_i64() {
            Some(i) => JsonValue::from(i),
            None => JsonValue::String(other.to_string()),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_linq_types::{ComplexType, Multiplicity, StructuralProperty};
    use pretty_assertions::assert_eq;

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
                    .with_property(StructuralProperty::new("Address", TypeReference::Complex("NS.Address".into())))
                    .with_navigation(NavigationProperty::new("Orders", "NS.Order", Multiplicity::Many)),
            )
            .entity_type(
                EntityType::new("NS", "Order")
                    .with_key(["OrderId"])
                    .with_property(StructuralProperty::primitive("OrderId", PrimitiveType::Int32))
                    .with_property(StructuralProperty::primitive("Amount", PrimitiveType::Decimal))
                    .with_navigation(NavigationProperty::new("Customer", "NS.Customer", Multiplicity::ZeroOrOne)),
            )
            .entity_set("Customers", "NS.Customer")
            .entity_set("Orders", "NS.Order")
            .build()
            .unwrap()
    }

    const DATA: &str = r#"{
        "Customers": [
            {"Id": 1, "Name": "Alice", "Address": {"City": "Oslo"}, "Orders": [10, 11]},
            {"Id": 2, "Name": "Bob"}
        ],
        "Orders": [
            {"OrderId": 10, "Amount": "12.50", "Customer": 1},
            {"OrderId": 11, "Amount": 3, "Customer": 1}
        ]
    }"#;

    #[test]
    fn test_links_resolve_to_shared_rows() {
        let schema = schema();
        let data = QueryDataSet::from_json(&schema, DATA).unwrap();

        let alice = &data.rows("Customers")[0];
        let orders = alice.member("Orders").unwrap();
        let orders = data.resolve_link(orders.as_link().unwrap());
        let orders = orders.as_collection().unwrap();
        assert_eq!(orders.len(), 2);

        let first_order = orders.elements()[0].as_structural().unwrap();
        assert!(first_order.ptr_eq(&data.rows("Orders")[0]));

        let back = data.resolve_link(first_order.member("Customer").unwrap().as_link().unwrap());
        assert!(back.as_structural().unwrap().ptr_eq(alice));
    }

    #[test]
    fn test_missing_members_are_typed_nulls() {
        let schema = schema();
        let data = QueryDataSet::from_json(&schema, DATA).unwrap();
        let bob = &data.rows("Customers")[1];
        assert!(bob.member("Address").unwrap().is_null());
        let orders = data.resolve_link(bob.member("Orders").unwrap().as_link().unwrap());
        assert!(orders.as_collection().unwrap().is_empty());
        assert_eq!(
            data.rows("Orders")[0].member("Amount").unwrap().as_scalar(),
            Some(&ScalarValue::Decimal(Decimal::new(1250, 2)))
        );
    }

    #[test]
    fn test_find_by_key_widens_integers() {
        let schema = schema();
        let data = QueryDataSet::from_json(&schema, DATA).unwrap();
        let mut key = EntityKey::new();
        key.push(("Id".to_string(), ScalarValue::Int64(2)));
        assert!(data.find_by_key("Customers", &key).is_some());
    }

    #[test]
    fn test_unknown_entity_set() {
        let err = QueryDataSet::from_json(&schema(), r#"{"Nope": []}"#).unwrap_err();
        assert_eq!(err.code(), ODL0300);
    }

    #[test]
    fn test_builder() {
        let schema = schema();
        let order = StructuralValueBuilder::new(&schema, "NS.Order")
            .property("OrderId", 10)
            .property("Amount", 5)
            .link("Customer", [1])
            .build()
            .unwrap();
        assert_eq!(
            order.member("Amount").unwrap().as_scalar(),
            Some(&ScalarValue::Decimal(Decimal::from(5)))
        );
        let link = order.member("Customer").unwrap();
        assert_eq!(link.as_link().unwrap().entity_set, "Customers");

        let err = StructuralValueBuilder::new(&schema, "NS.Order")
            .property("Nope", 1)
            .build()
            .unwrap_err();
        assert_eq!(err.code(), odata_linq_diagnostics::ODL0302);
    }

    #[test]
    fn test_coerce_scalar() {
        assert_eq!(coerce_scalar(ScalarValue::Int64(7), PrimitiveType::Int32).unwrap(), ScalarValue::Int32(7));
        assert!(coerce_scalar(ScalarValue::Int64(300), PrimitiveType::Byte).is_err());
        assert_eq!(
            coerce_scalar("0A0B".into(), PrimitiveType::Binary).unwrap(),
            ScalarValue::Binary(vec![10, 11])
        );
    }
}
