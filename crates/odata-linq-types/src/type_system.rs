//! Query Type System
//!
//! This module defines the types attached to resolved query expressions:
//! - `PrimitiveType` for EDM scalar types
//! - `QueryType` covering primitives, entities, complex types, collections,
//!   anonymous records and void
//! - Type display and comparison utilities

use crate::{ComplexType, EntityType};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::sync::Arc;

/// EDM primitive types
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum PrimitiveType {
    Boolean,
    Byte,
    Int16,
    Int32,
    Int64,
    Single,
    Double,
    Decimal,
    String,
    DateTime,
    DateTimeOffset,
    Guid,
    Binary,
}

impl PrimitiveType {
    /// All primitive types, in declaration order
    pub const ALL: [PrimitiveType; 13] = [
        Self::Boolean,
        Self::Byte,
        Self::Int16,
        Self::Int32,
        Self::Int64,
        Self::Single,
        Self::Double,
        Self::Decimal,
        Self::String,
        Self::DateTime,
        Self::DateTimeOffset,
        Self::Guid,
        Self::Binary,
    ];

    /// The qualified EDM name (e.g. `Edm.Int32`)
    pub fn edm_name(&self) -> &'static str {
        match self {
            Self::Boolean => "Edm.Boolean",
            Self::Byte => "Edm.Byte",
            Self::Int16 => "Edm.Int16",
            Self::Int32 => "Edm.Int32",
            Self::Int64 => "Edm.Int64",
            Self::Single => "Edm.Single",
            Self::Double => "Edm.Double",
            Self::Decimal => "Edm.Decimal",
            Self::String => "Edm.String",
            Self::DateTime => "Edm.DateTime",
            Self::DateTimeOffset => "Edm.DateTimeOffset",
            Self::Guid => "Edm.Guid",
            Self::Binary => "Edm.Binary",
        }
    }

    /// Look up a primitive type by EDM name, with or without the `Edm.` prefix
    pub fn from_edm_name(name: &str) -> Option<Self> {
        let short = name.strip_prefix("Edm.").unwrap_or(name);
        Self::ALL
            .iter()
            .copied()
            .find(|p| &p.edm_name()[4..] == short)
    }

    /// Check if this is a numeric type
    pub fn is_numeric(&self) -> bool {
        matches!(
            self,
            Self::Byte
                | Self::Int16
                | Self::Int32
                | Self::Int64
                | Self::Single
                | Self::Double
                | Self::Decimal
        )
    }

    /// Check if this is an integral type
    pub fn is_integral(&self) -> bool {
        matches!(self, Self::Byte | Self::Int16 | Self::Int32 | Self::Int64)
    }

    /// Check if this is a binary floating point type
    pub fn is_floating(&self) -> bool {
        matches!(self, Self::Single | Self::Double)
    }

    /// Check if this is a temporal type
    pub fn is_temporal(&self) -> bool {
        matches!(self, Self::DateTime | Self::DateTimeOffset)
    }
}

impl fmt::Display for PrimitiveType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.edm_name())
    }
}

/// A member of an anonymous record type
#[derive(Debug, Clone, PartialEq)]
pub struct RecordMember {
    /// Member name
    pub name: String,
    /// Member type
    pub member_type: QueryType,
}

/// Anonymous record type produced by projections and grouping
#[derive(Debug, Clone, PartialEq, Default)]
pub struct RecordType {
    /// Members in declaration order
    pub members: Vec<RecordMember>,
}

impl RecordType {
    /// Create a record type from `(name, type)` pairs
    pub fn new(members: impl IntoIterator<Item = (String, QueryType)>) -> Self {
        Self {
            members: members
                .into_iter()
                .map(|(name, member_type)| RecordMember { name, member_type })
                .collect(),
        }
    }

    /// Get a member type by name
    pub fn member(&self, name: &str) -> Option<&QueryType> {
        self.members
            .iter()
            .find(|m| m.name == name)
            .map(|m| &m.member_type)
    }

    /// Get the position of a member
    pub fn member_index(&self, name: &str) -> Option<usize> {
        self.members.iter().position(|m| m.name == name)
    }
}

/// The type attached to a resolved query expression
#[derive(Debug, Clone)]
pub enum QueryType {
    // === Special Types ===
    /// Untyped; only used by null literals before resolution
    Any,
    /// No value (void service operations)
    Void,

    // === Scalar Types ===
    /// EDM primitive
    Primitive(PrimitiveType),

    // === Structural Types ===
    /// Entity type
    Entity(Arc<EntityType>),
    /// Complex type
    Complex(Arc<ComplexType>),
    /// Anonymous record
    Record(Arc<RecordType>),

    // === Collection Types ===
    /// Collection of elements
    Collection(Box<QueryType>),
}

impl QueryType {
    // === Constructors ===

    /// Create a primitive type
    pub fn primitive(primitive: PrimitiveType) -> Self {
        Self::Primitive(primitive)
    }

    /// Create a collection type
    pub fn collection(element_type: QueryType) -> Self {
        Self::Collection(Box::new(element_type))
    }

    /// Create an entity type
    pub fn entity(entity_type: Arc<EntityType>) -> Self {
        Self::Entity(entity_type)
    }

    /// Create a complex type
    pub fn complex(complex_type: Arc<ComplexType>) -> Self {
        Self::Complex(complex_type)
    }

    /// Create a record type
    pub fn record(record_type: RecordType) -> Self {
        Self::Record(Arc::new(record_type))
    }

    /// Boolean shorthand
    pub fn boolean() -> Self {
        Self::Primitive(PrimitiveType::Boolean)
    }

    /// Int32 shorthand
    pub fn int32() -> Self {
        Self::Primitive(PrimitiveType::Int32)
    }

    /// Int64 shorthand
    pub fn int64() -> Self {
        Self::Primitive(PrimitiveType::Int64)
    }

    /// String shorthand
    pub fn string() -> Self {
        Self::Primitive(PrimitiveType::String)
    }

    // === Type Properties ===

    /// Check if this is the Any type
    pub fn is_any(&self) -> bool {
        matches!(self, Self::Any)
    }

    /// Check if this is void
    pub fn is_void(&self) -> bool {
        matches!(self, Self::Void)
    }

    /// Check if this is a collection type
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Collection(_))
    }

    /// Check if this is an entity type
    pub fn is_entity(&self) -> bool {
        matches!(self, Self::Entity(_))
    }

    /// Check if this is a complex type
    pub fn is_complex(&self) -> bool {
        matches!(self, Self::Complex(_))
    }

    /// Check if this is an entity or complex type
    pub fn is_structural(&self) -> bool {
        matches!(self, Self::Entity(_) | Self::Complex(_))
    }

    /// Check if this is a collection of entities
    pub fn is_entity_collection(&self) -> bool {
        self.element_type().is_some_and(QueryType::is_entity)
    }

    /// Check if this is a collection of entity or complex values
    pub fn is_structural_collection(&self) -> bool {
        self.element_type().is_some_and(QueryType::is_structural)
    }

    /// Check if this is a numeric primitive
    pub fn is_numeric(&self) -> bool {
        self.as_primitive().is_some_and(|p| p.is_numeric())
    }

    /// Get the element type of a collection
    pub fn element_type(&self) -> Option<&QueryType> {
        match self {
            Self::Collection(element) => Some(element),
            _ => None,
        }
    }

    /// Get the primitive type, if any
    pub fn as_primitive(&self) -> Option<PrimitiveType> {
        match self {
            Self::Primitive(p) => Some(*p),
            _ => None,
        }
    }

    /// Get the entity type definition, if any
    pub fn as_entity(&self) -> Option<&Arc<EntityType>> {
        match self {
            Self::Entity(e) => Some(e),
            _ => None,
        }
    }

    /// Get the complex type definition, if any
    pub fn as_complex(&self) -> Option<&Arc<ComplexType>> {
        match self {
            Self::Complex(c) => Some(c),
            _ => None,
        }
    }

    /// Get the record type definition, if any
    pub fn as_record(&self) -> Option<&Arc<RecordType>> {
        match self {
            Self::Record(r) => Some(r),
            _ => None,
        }
    }

    /// Qualified name of a named (entity or complex) type
    pub fn full_name(&self) -> Option<String> {
        match self {
            Self::Entity(e) => Some(e.full_name()),
            Self::Complex(c) => Some(c.full_name()),
            Self::Primitive(p) => Some(p.edm_name().to_string()),
            _ => None,
        }
    }
}

impl PartialEq for QueryType {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Any, Self::Any) | (Self::Void, Self::Void) => true,
            (Self::Primitive(a), Self::Primitive(b)) => a == b,
            (Self::Entity(a), Self::Entity(b)) => Arc::ptr_eq(a, b) || a.full_name() == b.full_name(),
            (Self::Complex(a), Self::Complex(b)) => Arc::ptr_eq(a, b) || a.full_name() == b.full_name(),
            (Self::Record(a), Self::Record(b)) => a == b,
            (Self::Collection(a), Self::Collection(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for QueryType {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Any => write!(f, "Any"),
            Self::Void => write!(f, "Void"),
            Self::Primitive(p) => write!(f, "{}", p),
            Self::Entity(e) => write!(f, "{}", e.full_name()),
            Self::Complex(c) => write!(f, "{}", c.full_name()),
            Self::Record(r) => {
                write!(f, "Record{{")?;
                for (i, member) in r.members.iter().enumerate() {
                    if i > 0 {
                        write!(f, ", ")?;
                    }
                    write!(f, "{}: {}", member.name, member.member_type)?;
                }
                write!(f, "}}")
            }
            Self::Collection(element) => write!(f, "Collection({})", element),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use pretty_assertions::assert_eq;
    use rstest::rstest;

    #[rstest]
    #[case("Edm.Int32", Some(PrimitiveType::Int32))]
    #[case("Int64", Some(PrimitiveType::Int64))]
    #[case("Edm.DateTimeOffset", Some(PrimitiveType::DateTimeOffset))]
    #[case("Edm.Time", None)]
    #[case("NS.Customer", None)]
    fn test_primitive_from_edm_name(#[case] name: &str, #[case] expected: Option<PrimitiveType>) {
        assert_eq!(PrimitiveType::from_edm_name(name), expected);
    }

    #[test]
    fn test_display() {
        let customer = Arc::new(EntityType::new("NS", "Customer"));
        assert_eq!(
            QueryType::collection(QueryType::entity(customer)).to_string(),
            "Collection(NS.Customer)"
        );
        let record = QueryType::record(RecordType::new([
            ("Id".to_string(), QueryType::int32()),
            ("Name".to_string(), QueryType::string()),
        ]));
        assert_eq!(record.to_string(), "Record{Id: Edm.Int32, Name: Edm.String}");
    }

    #[test]
    fn test_entity_equality_by_name() {
        let a = QueryType::entity(Arc::new(EntityType::new("NS", "Customer")));
        let b = QueryType::entity(Arc::new(EntityType::new("NS", "Customer")));
        let c = QueryType::entity(Arc::new(EntityType::new("NS", "Order")));
        assert_eq!(a, b);
        assert_ne!(a, c);
        assert!(QueryType::collection(a).is_entity_collection());
    }
}
