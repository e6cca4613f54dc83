//! Entity and complex type definitions
//!
//! Property and navigation types are stored by name so that definitions can
//! reference each other regardless of declaration order; the schema resolves
//! them to [`QueryType`](crate::QueryType)s.

use crate::PrimitiveType;
use serde::{Deserialize, Serialize};

/// Reference to a property type by name
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TypeReference {
    /// EDM primitive
    Primitive(PrimitiveType),
    /// Complex type by qualified name
    Complex(String),
    /// `Collection(T)`
    Collection(Box<TypeReference>),
}

impl TypeReference {
    /// Parse a CSDL type name such as `Edm.String`, `NS.Address` or
    /// `Collection(Edm.Int32)`
    pub fn parse(type_name: &str) -> Self {
        let trimmed = type_name.trim();
        if let Some(inner) = trimmed
            .strip_prefix("Collection(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return Self::Collection(Box::new(Self::parse(inner)));
        }
        match PrimitiveType::from_edm_name(trimmed) {
            Some(p) if trimmed.starts_with("Edm.") => Self::Primitive(p),
            _ => Self::Complex(trimmed.to_string()),
        }
    }

    /// Check if this is a collection reference
    pub fn is_collection(&self) -> bool {
        matches!(self, Self::Collection(_))
    }
}

/// A primitive, complex or collection-valued property
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct StructuralProperty {
    /// Property name
    pub name: String,
    /// Property type
    pub type_reference: TypeReference,
    /// Whether the property accepts null
    pub nullable: bool,
}

impl StructuralProperty {
    /// Create a nullable property
    pub fn new(name: impl Into<String>, type_reference: TypeReference) -> Self {
        Self {
            name: name.into(),
            type_reference,
            nullable: true,
        }
    }

    /// Create a primitive property
    pub fn primitive(name: impl Into<String>, primitive: PrimitiveType) -> Self {
        Self::new(name, TypeReference::Primitive(primitive))
    }

    /// Mark the property as non-nullable
    pub fn required(mut self) -> Self {
        self.nullable = false;
        self
    }
}

/// Navigation multiplicity
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum Multiplicity {
    /// `0..1`
    ZeroOrOne,
    /// `1`
    One,
    /// `*`
    Many,
}

impl Multiplicity {
    /// Parse a CSDL multiplicity attribute
    pub fn parse(value: &str) -> Option<Self> {
        match value.trim() {
            "0..1" => Some(Self::ZeroOrOne),
            "1" => Some(Self::One),
            "*" => Some(Self::Many),
            _ => None,
        }
    }

    /// Check if the navigation yields a collection
    pub fn is_many(&self) -> bool {
        matches!(self, Self::Many)
    }
}

/// A navigation property to another entity type
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct NavigationProperty {
    /// Property name
    pub name: String,
    /// Qualified name of the target entity type
    pub target_type: String,
    /// Target multiplicity
    pub multiplicity: Multiplicity,
}

impl NavigationProperty {
    /// Create a navigation property
    pub fn new(
        name: impl Into<String>,
        target_type: impl Into<String>,
        multiplicity: Multiplicity,
    ) -> Self {
        Self {
            name: name.into(),
            target_type: target_type.into(),
            multiplicity,
        }
    }
}

/// Entity type definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EntityType {
    /// Schema namespace
    pub namespace: String,
    /// Type name
    pub name: String,
    /// Qualified name of the direct base type
    pub base_type: Option<String>,
    /// Qualified names of all base types, nearest first
    #[serde(default)]
    pub ancestors: Vec<String>,
    /// Abstract types have no instances of their own
    pub is_abstract: bool,
    /// Key property names in declaration order
    pub key: Vec<String>,
    /// Structural properties, inherited ones first
    pub properties: Vec<StructuralProperty>,
    /// Navigation properties, inherited ones first
    pub navigation_properties: Vec<NavigationProperty>,
}

impl EntityType {
    /// Create an empty entity type
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            base_type: None,
            ancestors: Vec::new(),
            is_abstract: false,
            key: Vec::new(),
            properties: Vec::new(),
            navigation_properties: Vec::new(),
        }
    }

    /// Add key property names
    pub fn with_key<I, S>(mut self, key: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.key.extend(key.into_iter().map(Into::into));
        self
    }

    /// Add a structural property
    pub fn with_property(mut self, property: StructuralProperty) -> Self {
        self.properties.push(property);
        self
    }

    /// Add a navigation property
    pub fn with_navigation(mut self, navigation: NavigationProperty) -> Self {
        self.navigation_properties.push(navigation);
        self
    }

    /// Set the base type
    pub fn derived_from(mut self, base_type: impl Into<String>) -> Self {
        self.base_type = Some(base_type.into());
        self
    }

    /// Mark the type abstract
    pub fn abstract_type(mut self) -> Self {
        self.is_abstract = true;
        self
    }

    /// Qualified name (`Namespace.Name`)
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Find a structural property
    pub fn property(&self, name: &str) -> Option<&StructuralProperty> {
        self.properties.iter().find(|p| p.name == name)
    }

    /// Find a navigation property
    pub fn navigation(&self, name: &str) -> Option<&NavigationProperty> {
        self.navigation_properties.iter().find(|p| p.name == name)
    }

    /// Check whether a member (structural or navigation) is declared
    pub fn has_member(&self, name: &str) -> bool {
        self.property(name).is_some() || self.navigation(name).is_some()
    }

    /// Key property names sorted alphabetically
    pub fn sorted_key_names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self.key.iter().map(String::as_str).collect();
        names.sort_unstable();
        names
    }

    /// Check if this type is `type_name` or derives from it
    pub fn is_or_derives_from(&self, type_name: &str) -> bool {
        self.full_name() == type_name || self.ancestors.iter().any(|a| a == type_name)
    }
}

/// Complex type definition
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ComplexType {
    /// Schema namespace
    pub namespace: String,
    /// Type name
    pub name: String,
    /// Properties in declaration order
    pub properties: Vec<StructuralProperty>,
}

impl ComplexType {
    /// Create an empty complex type
    pub fn new(namespace: impl Into<String>, name: impl Into<String>) -> Self {
        Self {
            namespace: namespace.into(),
            name: name.into(),
            properties: Vec::new(),
        }
    }

    /// Add a property
    pub fn with_property(mut self, property: StructuralProperty) -> Self {
        self.properties.push(property);
        self
    }

    /// Qualified name (`Namespace.Name`)
    pub fn full_name(&self) -> String {
        if self.namespace.is_empty() {
            self.name.clone()
        } else {
            format!("{}.{}", self.namespace, self.name)
        }
    }

    /// Find a property
    pub fn property(&self, name: &str) -> Option<&StructuralProperty> {
        self.properties.iter().find(|p| p.name == name)
    }
}
