//! Query values - the result graph of in-memory evaluation
//!
//! Every value carries its [`QueryType`] and an optional [`EvaluationError`].
//! Nulls are typed: a null entity is a [`QueryStructuralValue`] without data,
//! a null collection is a [`QueryCollectionValue`] without elements.
//!
//! Structural values are handles over shared [`StructuralData`]; cloning a
//! handle keeps identity, so two references to the same source entity
//! compare equal under [`QueryStructuralValue::ptr_eq`].

use crate::{PrimitiveType, QueryType};
use chrono::{DateTime, FixedOffset, NaiveDateTime};
use indexmap::IndexMap;
use odata_linq_diagnostics::{ErrorCode, QueryError};
use rust_decimal::Decimal;
use rust_decimal::prelude::ToPrimitive;
use smallvec::SmallVec;
use std::fmt;
use std::sync::Arc;
use thiserror::Error;

/// Key values of an entity, in key declaration order
pub type EntityKey = SmallVec<[(String, ScalarValue); 2]>;

/// Primitive runtime value
#[derive(Debug, Clone, PartialEq)]
pub enum ScalarValue {
    Null,
    Boolean(bool),
    Byte(u8),
    Int16(i16),
    Int32(i32),
    Int64(i64),
    Single(f32),
    Double(f64),
    Decimal(Decimal),
    String(String),
    DateTime(NaiveDateTime),
    DateTimeOffset(DateTime<FixedOffset>),
    /// Guid in its canonical hyphenated form
    Guid(String),
    Binary(Vec<u8>),
}

impl ScalarValue {
    /// Check if this value is null
    pub fn is_null(&self) -> bool {
        matches!(self, Self::Null)
    }

    /// The primitive type of a non-null value
    pub fn primitive_type(&self) -> Option<PrimitiveType> {
        Some(match self {
            Self::Null => return None,
            Self::Boolean(_) => PrimitiveType::Boolean,
            Self::Byte(_) => PrimitiveType::Byte,
            Self::Int16(_) => PrimitiveType::Int16,
            Self::Int32(_) => PrimitiveType::Int32,
            Self::Int64(_) => PrimitiveType::Int64,
            Self::Single(_) => PrimitiveType::Single,
            Self::Double(_) => PrimitiveType::Double,
            Self::Decimal(_) => PrimitiveType::Decimal,
            Self::String(_) => PrimitiveType::String,
            Self::DateTime(_) => PrimitiveType::DateTime,
            Self::DateTimeOffset(_) => PrimitiveType::DateTimeOffset,
            Self::Guid(_) => PrimitiveType::Guid,
            Self::Binary(_) => PrimitiveType::Binary,
        })
    }

    /// Try to get as Boolean
    pub fn as_bool(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Try to get an integral value widened to i64
    pub fn as_i64(&self) -> Option<i64> {
        match self {
            Self::Byte(v) => Some(i64::from(*v)),
            Self::Int16(v) => Some(i64::from(*v)),
            Self::Int32(v) => Some(i64::from(*v)),
            Self::Int64(v) => Some(*v),
            _ => None,
        }
    }

    /// Try to get any numeric value as f64
    pub fn as_f64(&self) -> Option<f64> {
        match self {
            Self::Single(v) => Some(f64::from(*v)),
            Self::Double(v) => Some(*v),
            Self::Decimal(d) => d.to_f64(),
            other => other.as_i64().map(|v| v as f64),
        }
    }

    /// Try to get any numeric value as Decimal
    pub fn as_decimal(&self) -> Option<Decimal> {
        match self {
            Self::Decimal(d) => Some(*d),
            Self::Single(v) => Decimal::try_from(f64::from(*v)).ok(),
            Self::Double(v) => Decimal::try_from(*v).ok(),
            other => other.as_i64().map(Decimal::from),
        }
    }

    /// Try to get as String
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }
}

macro_rules! scalar_from {
    ($($ty:ty => $variant:ident),* $(,)?) => {
        $(
            impl From<$ty> for ScalarValue {
                fn from(value: $ty) -> Self {
                    Self::$variant(value)
                }
            }
        )*
    };
}

scalar_from! {
    bool => Boolean,
    u8 => Byte,
    i16 => Int16,
    i32 => Int32,
    i64 => Int64,
    f32 => Single,
    f64 => Double,
    Decimal => Decimal,
    String => String,
    NaiveDateTime => DateTime,
    DateTime<FixedOffset> => DateTimeOffset,
}

impl From<&str> for ScalarValue {
    fn from(value: &str) -> Self {
        Self::String(value.to_string())
    }
}

impl fmt::Display for ScalarValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Null => write!(f, "null"),
            Self::Boolean(b) => write!(f, "{}", b),
            Self::Byte(v) => write!(f, "{}", v),
            Self::Int16(v) => write!(f, "{}", v),
            Self::Int32(v) => write!(f, "{}", v),
            Self::Int64(v) => write!(f, "{}", v),
            Self::Single(v) => write!(f, "{}", v),
            Self::Double(v) => write!(f, "{}", v),
            Self::Decimal(d) => write!(f, "{}", d),
            Self::String(s) => write!(f, "{}", s),
            Self::DateTime(dt) => write!(f, "{}", dt.format("%Y-%m-%dT%H:%M:%S%.f")),
            Self::DateTimeOffset(dt) => write!(f, "{}", dt.to_rfc3339()),
            Self::Guid(g) => write!(f, "{}", g),
            Self::Binary(bytes) => {
                for b in bytes {
                    write!(f, "{:02X}", b)?;
                }
                Ok(())
            }
        }
    }
}

/// An evaluation error carried as data on a value
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{code}: {message}")]
pub struct EvaluationError {
    pub code: ErrorCode,
    pub message: String,
}

impl EvaluationError {
    /// Create an evaluation error
    pub fn new(code: ErrorCode, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }

    /// Escalate into a [`QueryError::Evaluation`]
    pub fn into_query_error(self) -> QueryError {
        QueryError::evaluation(self.code, self.message)
    }
}

/// Scalar value with its type
#[derive(Debug, Clone, PartialEq)]
pub struct QueryScalarValue {
    pub value_type: QueryType,
    pub value: ScalarValue,
    pub error: Option<EvaluationError>,
}

/// Members of a non-null structural value
#[derive(Debug, Clone, PartialEq, Default)]
pub struct StructuralData {
    members: IndexMap<String, QueryValue>,
    hidden: IndexMap<String, QueryValue>,
}

/// Entity or complex value
#[derive(Debug, Clone, PartialEq)]
pub struct QueryStructuralValue {
    value_type: QueryType,
    data: Option<Arc<StructuralData>>,
    error: Option<EvaluationError>,
}

impl QueryStructuralValue {
    /// Create a structural value with all members present
    pub fn new(value_type: QueryType, members: IndexMap<String, QueryValue>) -> Self {
        Self::masked(value_type, members, IndexMap::new())
    }

    /// Create a structural value where `hidden` members resolve to the given
    /// typed nulls but are not reported as present
    pub fn masked(
        value_type: QueryType,
        members: IndexMap<String, QueryValue>,
        hidden: IndexMap<String, QueryValue>,
    ) -> Self {
        Self {
            value_type,
            data: Some(Arc::new(StructuralData { members, hidden })),
            error: None,
        }
    }

    /// Create a typed null
    pub fn null(value_type: QueryType) -> Self {
        Self {
            value_type,
            data: None,
            error: None,
        }
    }

    pub fn value_type(&self) -> &QueryType {
        &self.value_type
    }

    pub fn is_null(&self) -> bool {
        self.data.is_none()
    }

    pub fn evaluation_error(&self) -> Option<&EvaluationError> {
        self.error.as_ref()
    }

    /// Get a member value; hidden members yield their typed null
    pub fn member(&self, name: &str) -> Option<QueryValue> {
        self.member_ref(name).cloned()
    }

    /// Borrow a member value; hidden members yield their typed null
    pub fn member_ref(&self, name: &str) -> Option<&QueryValue> {
        let data = self.data.as_ref()?;
        data.members.get(name).or_else(|| data.hidden.get(name))
    }

    /// Check if a member is present but masked out
    pub fn is_hidden(&self, name: &str) -> bool {
        self.data
            .as_ref()
            .is_some_and(|d| d.hidden.contains_key(name))
    }

    /// Names of the members present on this value, in declaration order
    pub fn all_member_names(&self) -> Vec<&str> {
        self.data
            .as_ref()
            .map(|d| d.members.keys().map(String::as_str).collect())
            .unwrap_or_default()
    }

    /// Iterate over present members
    pub fn members(&self) -> impl Iterator<Item = (&str, &QueryValue)> {
        self.data
            .iter()
            .flat_map(|d| d.members.iter().map(|(k, v)| (k.as_str(), v)))
    }

    /// Check whether two handles refer to the same underlying data
    pub fn ptr_eq(&self, other: &Self) -> bool {
        match (&self.data, &other.data) {
            (Some(a), Some(b)) => Arc::ptr_eq(a, b),
            _ => false,
        }
    }

    /// Stable identity of the underlying data, for identity maps
    pub fn identity(&self) -> Option<usize> {
        self.data.as_ref().map(|d| Arc::as_ptr(d) as usize)
    }

    /// Key values of an entity, in key declaration order
    pub fn key_values(&self) -> Option<EntityKey> {
        let entity = self.value_type.as_entity()?;
        entity
            .key
            .iter()
            .map(|name| {
                let value = self.member_ref(name)?.as_scalar()?.clone();
                Some((name.clone(), value))
            })
            .collect()
    }
}

/// Collection value
#[derive(Debug, Clone, PartialEq)]
pub struct QueryCollectionValue {
    value_type: QueryType,
    elements: Option<Vec<QueryValue>>,
    error: Option<EvaluationError>,
}

impl QueryCollectionValue {
    /// Create a collection of `element_type`
    pub fn new(element_type: QueryType, elements: Vec<QueryValue>) -> Self {
        Self::from_type(QueryType::collection(element_type), elements)
    }

    /// Create a collection from its collection type
    pub fn from_type(value_type: QueryType, elements: Vec<QueryValue>) -> Self {
        Self {
            value_type,
            elements: Some(elements),
            error: None,
        }
    }

    /// Create a typed null collection
    pub fn null(value_type: QueryType) -> Self {
        Self {
            value_type,
            elements: None,
            error: None,
        }
    }

    pub fn value_type(&self) -> &QueryType {
        &self.value_type
    }

    /// Element type (`Any` when the type is not a collection)
    pub fn element_type(&self) -> QueryType {
        self.value_type
            .element_type()
            .cloned()
            .unwrap_or(QueryType::Any)
    }

    pub fn is_null(&self) -> bool {
        self.elements.is_none()
    }

    pub fn evaluation_error(&self) -> Option<&EvaluationError> {
        self.error.as_ref()
    }

    /// Elements (empty for a null collection)
    pub fn elements(&self) -> &[QueryValue] {
        self.elements.as_deref().unwrap_or(&[])
    }

    pub fn into_elements(self) -> Vec<QueryValue> {
        self.elements.unwrap_or_default()
    }

    pub fn len(&self) -> usize {
        self.elements().len()
    }

    pub fn is_empty(&self) -> bool {
        self.elements().is_empty()
    }
}

/// Anonymous record value (projections, grouping results)
#[derive(Debug, Clone, PartialEq)]
pub struct QueryRecordValue {
    value_type: QueryType,
    members: Option<Vec<QueryValue>>,
    error: Option<EvaluationError>,
}

impl QueryRecordValue {
    /// Create a record; members follow the record type's member order
    pub fn new(value_type: QueryType, members: Vec<QueryValue>) -> Self {
        Self {
            value_type,
            members: Some(members),
            error: None,
        }
    }

    /// Create a typed null record
    pub fn null(value_type: QueryType) -> Self {
        Self {
            value_type,
            members: None,
            error: None,
        }
    }

    pub fn value_type(&self) -> &QueryType {
        &self.value_type
    }

    pub fn is_null(&self) -> bool {
        self.members.is_none()
    }

    /// Get a member by name
    pub fn member(&self, name: &str) -> Option<&QueryValue> {
        let index = self.value_type.as_record()?.member_index(name)?;
        self.members.as_ref()?.get(index)
    }

    /// Member values in declaration order
    pub fn members(&self) -> &[QueryValue] {
        self.members.as_deref().unwrap_or(&[])
    }
}

/// Unresolved navigation stored on source rows: the target entity set and
/// the keys of the related entities
#[derive(Debug, Clone, PartialEq)]
pub struct QueryLinkValue {
    /// `Entity` for single-valued, `Collection(Entity)` for collection navigations
    pub value_type: QueryType,
    pub entity_set: String,
    pub keys: Vec<EntityKey>,
}

impl QueryLinkValue {
    /// Check whether the link targets a collection
    pub fn is_many(&self) -> bool {
        self.value_type.is_collection()
    }
}

/// A value in the evaluation result graph
#[derive(Debug, Clone, PartialEq)]
pub enum QueryValue {
    Scalar(QueryScalarValue),
    Structural(QueryStructuralValue),
    Collection(QueryCollectionValue),
    Record(QueryRecordValue),
    Link(QueryLinkValue),
}

impl QueryValue {
    // === Constructors ===

    /// Create a scalar typed from its runtime value (`Any` for null)
    pub fn scalar(value: ScalarValue) -> Self {
        let value_type = value
            .primitive_type()
            .map(QueryType::Primitive)
            .unwrap_or(QueryType::Any);
        Self::typed_scalar(value_type, value)
    }

    /// Create a scalar with an explicit type
    pub fn typed_scalar(value_type: QueryType, value: ScalarValue) -> Self {
        Self::Scalar(QueryScalarValue {
            value_type,
            value,
            error: None,
        })
    }

    pub fn boolean(value: bool) -> Self {
        Self::scalar(ScalarValue::Boolean(value))
    }

    pub fn int32(value: i32) -> Self {
        Self::scalar(ScalarValue::Int32(value))
    }

    pub fn int64(value: i64) -> Self {
        Self::scalar(ScalarValue::Int64(value))
    }

    pub fn double(value: f64) -> Self {
        Self::scalar(ScalarValue::Double(value))
    }

    pub fn decimal(value: Decimal) -> Self {
        Self::scalar(ScalarValue::Decimal(value))
    }

    pub fn string(value: impl Into<String>) -> Self {
        Self::scalar(ScalarValue::String(value.into()))
    }

    /// Create a typed null matching the shape of `value_type`
    pub fn null_of(value_type: &QueryType) -> Self {
        match value_type {
            QueryType::Entity(_) | QueryType::Complex(_) => {
                Self::Structural(QueryStructuralValue::null(value_type.clone()))
            }
            QueryType::Collection(_) => {
                Self::Collection(QueryCollectionValue::null(value_type.clone()))
            }
            QueryType::Record(_) => Self::Record(QueryRecordValue::null(value_type.clone())),
            _ => Self::typed_scalar(value_type.clone(), ScalarValue::Null),
        }
    }

    /// Create a typed null carrying an evaluation error
    pub fn error_of(value_type: &QueryType, error: EvaluationError) -> Self {
        Self::null_of(value_type).with_error(error)
    }

    /// Attach an evaluation error
    pub fn with_error(mut self, error: EvaluationError) -> Self {
        match &mut self {
            Self::Scalar(v) => v.error = Some(error),
            Self::Structural(v) => v.error = Some(error),
            Self::Collection(v) => v.error = Some(error),
            Self::Record(v) => v.error = Some(error),
            Self::Link(_) => {}
        }
        self
    }

    // === Accessors ===

    pub fn value_type(&self) -> &QueryType {
        match self {
            Self::Scalar(v) => &v.value_type,
            Self::Structural(v) => &v.value_type,
            Self::Collection(v) => &v.value_type,
            Self::Record(v) => &v.value_type,
            Self::Link(v) => &v.value_type,
        }
    }

    pub fn evaluation_error(&self) -> Option<&EvaluationError> {
        match self {
            Self::Scalar(v) => v.error.as_ref(),
            Self::Structural(v) => v.error.as_ref(),
            Self::Collection(v) => v.error.as_ref(),
            Self::Record(v) => v.error.as_ref(),
            Self::Link(_) => None,
        }
    }

    pub fn is_null(&self) -> bool {
        match self {
            Self::Scalar(v) => v.value.is_null(),
            Self::Structural(v) => v.is_null(),
            Self::Collection(v) => v.is_null(),
            Self::Record(v) => v.is_null(),
            Self::Link(v) => !v.is_many() && v.keys.is_empty(),
        }
    }

    /// The primitive payload of a scalar
    pub fn as_scalar(&self) -> Option<&ScalarValue> {
        match self {
            Self::Scalar(v) => Some(&v.value),
            _ => None,
        }
    }

    pub fn as_bool(&self) -> Option<bool> {
        self.as_scalar().and_then(ScalarValue::as_bool)
    }

    pub fn as_structural(&self) -> Option<&QueryStructuralValue> {
        match self {
            Self::Structural(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_collection(&self) -> Option<&QueryCollectionValue> {
        match self {
            Self::Collection(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_record(&self) -> Option<&QueryRecordValue> {
        match self {
            Self::Record(v) => Some(v),
            _ => None,
        }
    }

    pub fn as_link(&self) -> Option<&QueryLinkValue> {
        match self {
            Self::Link(v) => Some(v),
            _ => None,
        }
    }
}

impl From<QueryStructuralValue> for QueryValue {
    fn from(value: QueryStructuralValue) -> Self {
        Self::Structural(value)
    }
}

impl From<QueryCollectionValue> for QueryValue {
    fn from(value: QueryCollectionValue) -> Self {
        Self::Collection(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityType;
    use odata_linq_diagnostics::ODL0203;
    use pretty_assertions::assert_eq;

    fn customer_type() -> QueryType {
        QueryType::entity(Arc::new(EntityType::new("NS", "Customer").with_key(["Id"])))
    }

    fn customer(id: i32) -> QueryStructuralValue {
        let mut members = IndexMap::new();
        members.insert("Id".to_string(), QueryValue::int32(id));
        members.insert("Name".to_string(), QueryValue::string("Alice"));
        QueryStructuralValue::new(customer_type(), members)
    }

    #[test]
    fn test_typed_nulls() {
        let ty = customer_type();
        let null = QueryValue::null_of(&ty);
        assert!(null.is_null());
        assert_eq!(null.value_type(), &ty);
        assert!(null.as_structural().is_some());

        let collection = QueryValue::null_of(&QueryType::collection(ty));
        assert!(collection.as_collection().is_some_and(QueryCollectionValue::is_null));
    }

    #[test]
    fn test_error_carried_as_value() {
        let value = QueryValue::error_of(
            &QueryType::int32(),
            EvaluationError::new(ODL0203, "Sequence contains no elements"),
        );
        assert!(value.is_null());
        assert_eq!(value.evaluation_error().map(|e| e.code), Some(ODL0203));
    }

    #[test]
    fn test_identity_survives_clone() {
        let a = customer(1);
        let b = a.clone();
        let c = customer(1);
        assert!(a.ptr_eq(&b));
        assert!(!a.ptr_eq(&c));
        assert_eq!(a, c);
        assert_eq!(a.identity(), b.identity());
    }

    #[test]
    fn test_hidden_members() {
        let mut members = IndexMap::new();
        members.insert("Id".to_string(), QueryValue::int32(1));
        let mut hidden = IndexMap::new();
        hidden.insert("Name".to_string(), QueryValue::null_of(&QueryType::string()));
        let value = QueryStructuralValue::masked(customer_type(), members, hidden);

        assert_eq!(value.all_member_names(), vec!["Id"]);
        assert!(value.is_hidden("Name"));
        assert!(value.member("Name").is_some_and(|v| v.is_null()));
        assert!(value.member("Missing").is_none());
    }

    #[test]
    fn test_key_values() {
        let key = customer(7).key_values();
        assert_eq!(
            key.map(|k| k.into_vec()),
            Some(vec![("Id".to_string(), ScalarValue::Int32(7))])
        );
    }

    #[test]
    fn test_numeric_accessors() {
        assert_eq!(ScalarValue::Int16(3).as_i64(), Some(3));
        assert_eq!(ScalarValue::Double(1.5).as_decimal(), Decimal::try_from(1.5).ok());
        assert_eq!(ScalarValue::String("x".into()).as_f64(), None);
    }
}
