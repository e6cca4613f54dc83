//! Entity model schema
//!
//! The schema is the type library consulted by type resolution, URI
//! building and evaluation. It is assembled through [`SchemaBuilder`],
//! which validates references between definitions and flattens entity
//! inheritance so that every [`EntityType`] carries its inherited key,
//! properties and navigations.

use indexmap::IndexMap;
use log::debug;
use odata_linq_ast::{CustomFunction, FunctionParameter, ServiceOperation};
use odata_linq_diagnostics::{
    ODL0105, ODL0300, ODL0301, ODL0302, ODL0303, ODL0304, ODL0306, QueryError, Result,
};
use odata_linq_types::{
    ComplexType, EntityType, NavigationProperty, PrimitiveType, QueryType, StructuralProperty,
    TypeReference,
};
use std::collections::HashSet;
use std::path::Path;
use std::sync::Arc;

/// An entity set exposed by the service
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct EntitySet {
    pub name: String,
    /// Qualified name of the element entity type
    pub entity_type: String,
    /// Server-side page size, when the service pages this set
    pub page_size: Option<u32>,
}

/// The service metadata: types, entity sets, service operations and
/// custom functions
#[derive(Debug, Clone, Default)]
pub struct EntityModelSchema {
    entity_types: IndexMap<String, Arc<EntityType>>,
    complex_types: IndexMap<String, Arc<ComplexType>>,
    entity_sets: IndexMap<String, EntitySet>,
    service_operations: IndexMap<String, Arc<ServiceOperation>>,
    functions: IndexMap<String, Arc<CustomFunction>>,
}

impl EntityModelSchema {
    /// Start building a schema
    pub fn builder() -> SchemaBuilder {
        SchemaBuilder::default()
    }

    /// Load a schema from a CSDL (EDMX) document
    pub fn from_csdl(xml: &str) -> Result<Self> {
        crate::csdl::parse_csdl(xml)?.build()
    }

    /// Load a schema from a CSDL file
    pub fn from_file(path: impl AsRef<Path>) -> Result<Self> {
        crate::csdl::parse_csdl_file(path.as_ref())?.build()
    }

    // === Lookups ===

    pub fn entity_type(&self, full_name: &str) -> Option<&Arc<EntityType>> {
        self.entity_types.get(full_name)
    }

    pub fn complex_type(&self, full_name: &str) -> Option<&Arc<ComplexType>> {
        self.complex_types.get(full_name)
    }

    pub fn entity_set(&self, name: &str) -> Option<&EntitySet> {
        self.entity_sets.get(name)
    }

    pub fn entity_sets(&self) -> impl Iterator<Item = &EntitySet> {
        self.entity_sets.values()
    }

    pub fn entity_types(&self) -> impl Iterator<Item = &Arc<EntityType>> {
        self.entity_types.values()
    }

    pub fn service_operation(&self, name: &str) -> Option<&Arc<ServiceOperation>> {
        self.service_operations.get(name)
    }

    /// Find a custom function by qualified name
    pub fn function(&self, full_name: &str) -> Option<&Arc<CustomFunction>> {
        self.functions.get(full_name)
    }

    /// Page size configured for an entity set
    pub fn page_size(&self, entity_set: &str) -> Option<u32> {
        self.entity_sets.get(entity_set).and_then(|s| s.page_size)
    }

    /// The entity type of an entity set
    pub fn entity_set_element_type(&self, entity_set: &str) -> Result<&Arc<EntityType>> {
        let set = self.entity_sets.get(entity_set).ok_or_else(|| {
            QueryError::metadata(
                ODL0300,
                format!("Entity set '{entity_set}' not found"),
            )
        })?;
        self.entity_types.get(&set.entity_type).ok_or_else(|| {
            QueryError::metadata_for_type(
                ODL0301,
                format!("Entity type '{}' not found", set.entity_type),
                set.entity_type.clone(),
            )
        })
    }

    /// `Collection(Entity)` type of an entity set
    pub fn entity_set_type(&self, entity_set: &str) -> Result<QueryType> {
        let entity = self.entity_set_element_type(entity_set)?;
        Ok(QueryType::collection(QueryType::entity(entity.clone())))
    }

    /// The first entity set whose element type is `type_name` or one of
    /// its base types
    pub fn entity_set_for_type(&self, type_name: &str) -> Option<&EntitySet> {
        let entity = self.entity_types.get(type_name)?;
        self.entity_sets
            .values()
            .find(|set| entity.is_or_derives_from(&set.entity_type))
    }

    // === Type resolution ===

    /// Resolve a qualified type name: `Edm.*`, entity, complex or
    /// `Collection(...)`
    pub fn resolve_type_name(&self, type_name: &str) -> Result<QueryType> {
        let trimmed = type_name.trim();
        if let Some(inner) = trimmed
            .strip_prefix("Collection(")
            .and_then(|rest| rest.strip_suffix(')'))
        {
            return Ok(QueryType::collection(self.resolve_type_name(inner)?));
        }
        if let Some(primitive) = trimmed
            .strip_prefix("Edm.")
            .and_then(PrimitiveType::from_edm_name)
        {
            return Ok(QueryType::Primitive(primitive));
        }
        if let Some(entity) = self.entity_types.get(trimmed) {
            return Ok(QueryType::entity(entity.clone()));
        }
        if let Some(complex) = self.complex_types.get(trimmed) {
            return Ok(QueryType::complex(complex.clone()));
        }
        Err(QueryError::metadata_for_type(
            ODL0301,
            format!("Type '{trimmed}' not found"),
            trimmed,
        ))
    }

    /// Resolve a property type reference
    pub fn resolve_type_reference(&self, reference: &TypeReference) -> Result<QueryType> {
        match reference {
            TypeReference::Primitive(p) => Ok(QueryType::Primitive(*p)),
            TypeReference::Complex(name) => self.resolve_type_name(name),
            TypeReference::Collection(inner) => {
                Ok(QueryType::collection(self.resolve_type_reference(inner)?))
            }
        }
    }

    /// Type of a navigation property: the target entity, or a collection
    /// of it for `Many` multiplicity
    pub fn navigation_type(&self, navigation: &NavigationProperty) -> Result<QueryType> {
        let target = self.entity_types.get(&navigation.target_type).ok_or_else(|| {
            QueryError::metadata_for_type(
                ODL0301,
                format!("Navigation target '{}' not found", navigation.target_type),
                navigation.target_type.clone(),
            )
        })?;
        let entity = QueryType::entity(target.clone());
        Ok(if navigation.multiplicity.is_many() {
            QueryType::collection(entity)
        } else {
            entity
        })
    }

    /// The navigation property `name` on a structural owner type
    pub fn navigation<'a>(&self, owner: &'a QueryType, name: &str) -> Option<&'a NavigationProperty> {
        owner.as_entity().and_then(|e| e.navigation(name))
    }

    /// Type of member `name` on an entity, complex or record type
    pub fn member_type(&self, owner: &QueryType, name: &str) -> Result<QueryType> {
        match owner {
            QueryType::Entity(entity) => {
                if let Some(property) = entity.property(name) {
                    return self.resolve_type_reference(&property.type_reference);
                }
                if let Some(navigation) = entity.navigation(name) {
                    return self.navigation_type(navigation);
                }
                Err(member_not_found(name, &entity.full_name()))
            }
            QueryType::Complex(complex) => complex
                .property(name)
                .ok_or_else(|| member_not_found(name, &complex.full_name()))
                .and_then(|p| self.resolve_type_reference(&p.type_reference)),
            QueryType::Record(record) => record
                .member(name)
                .cloned()
                .ok_or_else(|| member_not_found(name, &owner.to_string())),
            other => Err(QueryError::contract(
                ODL0105,
                format!("Cannot access member '{name}' on non-structural type '{other}'"),
            )),
        }
    }

    // === Post-build registration ===

    /// Register a service operation; bodies usually reference schema types,
    /// so operations are added once the types exist
    pub fn add_service_operation(&mut self, operation: ServiceOperation) -> Result<()> {
        if let Some(set) = &operation.entity_set {
            if !self.entity_sets.contains_key(set) {
                return Err(QueryError::metadata(
                    ODL0300,
                    format!("Entity set '{set}' of service operation '{}' not found", operation.name),
                ));
            }
        }
        if self.service_operations.contains_key(&operation.name) {
            return Err(duplicate("service operation", &operation.name));
        }
        self.service_operations
            .insert(operation.name.clone(), Arc::new(operation));
        Ok(())
    }

    /// Register a custom function
    pub fn add_function(&mut self, function: CustomFunction) -> Result<()> {
        let full_name = function.full_name();
        if self.functions.contains_key(&full_name) {
            return Err(duplicate("function", &full_name));
        }
        self.functions.insert(full_name, Arc::new(function));
        Ok(())
    }

    /// Look up a service operation, failing when it is missing
    pub fn require_service_operation(&self, name: &str) -> Result<&Arc<ServiceOperation>> {
        self.service_operation(name).ok_or_else(|| {
            QueryError::metadata(ODL0303, format!("Service operation '{name}' not found"))
        })
    }

    /// Look up a custom function, failing when it is missing
    pub fn require_function(&self, full_name: &str) -> Result<&Arc<CustomFunction>> {
        self.function(full_name).ok_or_else(|| {
            QueryError::metadata(ODL0304, format!("Function '{full_name}' not found"))
        })
    }
}

fn member_not_found(name: &str, type_name: &str) -> QueryError {
    QueryError::metadata_for_type(
        ODL0302,
        format!("Property '{name}' not found on type '{type_name}'"),
        type_name,
    )
}

fn duplicate(kind: &str, name: &str) -> QueryError {
    QueryError::metadata(ODL0306, format!("Duplicate {kind} '{name}'"))
}

/// A service operation declared by type names, resolved at build time
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceOperationDecl {
    pub name: String,
    pub return_type: Option<String>,
    pub entity_set: Option<String>,
    /// (name, type name) pairs
    pub parameters: Vec<(String, String)>,
}

/// Builder for [`EntityModelSchema`]
#[derive(Debug, Clone, Default)]
pub struct SchemaBuilder {
    entity_types: Vec<EntityType>,
    complex_types: Vec<ComplexType>,
    entity_sets: Vec<EntitySet>,
    operations: Vec<ServiceOperationDecl>,
}

impl SchemaBuilder {
    pub fn entity_type(mut self, entity_type: EntityType) -> Self {
        self.entity_types.push(entity_type);
        self
    }

    pub fn complex_type(mut self, complex_type: ComplexType) -> Self {
        self.complex_types.push(complex_type);
        self
    }

    /// Add an unpaged entity set
    pub fn entity_set(self, name: impl Into<String>, entity_type: impl Into<String>) -> Self {
        self.add_entity_set(name.into(), entity_type.into(), None)
    }

    /// Add an entity set the server pages with `page_size`
    pub fn paged_entity_set(
        self,
        name: impl Into<String>,
        entity_type: impl Into<String>,
        page_size: u32,
    ) -> Self {
        self.add_entity_set(name.into(), entity_type.into(), Some(page_size))
    }

    fn add_entity_set(mut self, name: String, entity_type: String, page_size: Option<u32>) -> Self {
        self.entity_sets.push(EntitySet {
            name,
            entity_type,
            page_size,
        });
        self
    }

    /// Declare a service operation by type names
    pub fn service_operation(mut self, declaration: ServiceOperationDecl) -> Self {
        self.operations.push(declaration);
        self
    }

    pub(crate) fn push_entity_type(&mut self, entity_type: EntityType) {
        self.entity_types.push(entity_type);
    }

    pub(crate) fn push_complex_type(&mut self, complex_type: ComplexType) {
        self.complex_types.push(complex_type);
    }

    pub(crate) fn push_entity_set(&mut self, entity_set: EntitySet) {
        self.entity_sets.push(entity_set);
    }

    pub(crate) fn push_service_operation(&mut self, declaration: ServiceOperationDecl) {
        self.operations.push(declaration);
    }

    /// Validate the definitions and build the schema
    pub fn build(self) -> Result<EntityModelSchema> {
        let mut schema = EntityModelSchema::default();

        for complex in self.complex_types {
            let name = complex.full_name();
            if schema.complex_types.contains_key(&name) {
                return Err(duplicate("complex type", &name));
            }
            schema.complex_types.insert(name, Arc::new(complex));
        }

        let mut declared: IndexMap<String, EntityType> = IndexMap::new();
        for entity in self.entity_types {
            let name = entity.full_name();
            if declared.contains_key(&name) || schema.complex_types.contains_key(&name) {
                return Err(duplicate("type", &name));
            }
            declared.insert(name, entity);
        }

        let names: Vec<String> = declared.keys().cloned().collect();
        let mut flattened: IndexMap<String, EntityType> = IndexMap::new();
        for name in &names {
            flatten(name, &declared, &mut flattened, &mut HashSet::new())?;
        }
        // Preserve declaration order
        for name in names {
            if let Some(entity) = flattened.swap_remove(&name) {
                schema.entity_types.insert(name, Arc::new(entity));
            }
        }

        for entity in schema.entity_types.values() {
            validate_entity(&schema, entity)?;
        }
        for complex in schema.complex_types.values() {
            for property in &complex.properties {
                schema.resolve_type_reference(&property.type_reference)?;
            }
        }

        for set in self.entity_sets {
            if !schema.entity_types.contains_key(&set.entity_type) {
                return Err(QueryError::metadata_for_type(
                    ODL0301,
                    format!(
                        "Entity type '{}' of entity set '{}' not found",
                        set.entity_type, set.name
                    ),
                    set.entity_type.clone(),
                ));
            }
            if schema.entity_sets.contains_key(&set.name) {
                return Err(duplicate("entity set", &set.name));
            }
            schema.entity_sets.insert(set.name.clone(), set);
        }

        for declaration in self.operations {
            let operation = resolve_operation(&schema, declaration)?;
            schema.add_service_operation(operation)?;
        }

        debug!(
            "Built schema with {} entity types, {} complex types, {} entity sets",
            schema.entity_types.len(),
            schema.complex_types.len(),
            schema.entity_sets.len()
        );
        Ok(schema)
    }
}

/// Copy inherited members into `name`, base types first
fn flatten(
    name: &str,
    declared: &IndexMap<String, EntityType>,
    flattened: &mut IndexMap<String, EntityType>,
    visiting: &mut HashSet<String>,
) -> Result<()> {
    if flattened.contains_key(name) {
        return Ok(());
    }
    let entity = declared.get(name).ok_or_else(|| {
        QueryError::metadata_for_type(ODL0301, format!("Base type '{name}' not found"), name)
    })?;
    if !visiting.insert(name.to_string()) {
        return Err(QueryError::metadata_for_type(
            ODL0306,
            format!("Type '{name}' derives from itself"),
            name,
        ));
    }

    let mut result = entity.clone();
    if let Some(base_name) = &entity.base_type {
        flatten(base_name, declared, flattened, visiting)?;
        if let Some(base) = flattened.get(base_name) {
            if result.key.is_empty() {
                result.key = base.key.clone();
            }
            let mut properties = base.properties.clone();
            properties.extend(entity.properties.iter().cloned());
            result.properties = properties;
            let mut navigations = base.navigation_properties.clone();
            navigations.extend(entity.navigation_properties.iter().cloned());
            result.navigation_properties = navigations;
            result.ancestors = std::iter::once(base_name.clone())
                .chain(base.ancestors.iter().cloned())
                .collect();
        }
    }

    visiting.remove(name);
    flattened.insert(name.to_string(), result);
    Ok(())
}

fn validate_entity(schema: &EntityModelSchema, entity: &EntityType) -> Result<()> {
    let full_name = entity.full_name();
    let mut seen = HashSet::new();
    for member in entity
        .properties
        .iter()
        .map(|p| &p.name)
        .chain(entity.navigation_properties.iter().map(|n| &n.name))
    {
        if !seen.insert(member.as_str()) {
            return Err(duplicate("member", &format!("{full_name}.{member}")));
        }
    }
    for key in &entity.key {
        let property: Option<&StructuralProperty> = entity.property(key);
        match property {
            Some(p) if matches!(p.type_reference, TypeReference::Primitive(_)) => {}
            _ => {
                return Err(QueryError::metadata_for_type(
                    ODL0302,
                    format!("Key property '{key}' is not a primitive property of '{full_name}'"),
                    full_name,
                ));
            }
        }
    }
    for property in &entity.properties {
        schema.resolve_type_reference(&property.type_reference)?;
    }
    for navigation in &entity.navigation_properties {
        schema.navigation_type(navigation)?;
    }
    Ok(())
}

fn resolve_operation(
    schema: &EntityModelSchema,
    declaration: ServiceOperationDecl,
) -> Result<ServiceOperation> {
    let return_type = declaration
        .return_type
        .as_deref()
        .map(|t| schema.resolve_type_name(t))
        .transpose()?;
    let mut operation = ServiceOperation::new(declaration.name, return_type);
    for (name, type_name) in declaration.parameters {
        let parameter_type = schema.resolve_type_name(&type_name)?;
        operation = operation.with_parameter(FunctionParameter::new(name, parameter_type));
    }
    if let Some(set) = declaration.entity_set {
        operation = operation.with_entity_set(set);
    }
    Ok(operation)
}

#[cfg(test)]
mod tests {
    use super::*;
    use odata_linq_types::Multiplicity;
    use pretty_assertions::assert_eq;

    fn schema() -> EntityModelSchema {
        EntityModelSchema::builder()
            .complex_type(
                ComplexType::new("NS", "Address")
                    .with_property(StructuralProperty::primitive("City", PrimitiveType::String)),
            )
            .entity_type(
                EntityType::new("NS", "Person")
                    .with_key(["Id"])
                    .with_property(StructuralProperty::primitive("Id", PrimitiveType::Int32).required())
                    .with_property(StructuralProperty::new(
                        "Address",
                        TypeReference::Complex("NS.Address".into()),
                    ))
                    .abstract_type(),
            )
            .entity_type(
                EntityType::new("NS", "Employee")
                    .derived_from("NS.Person")
                    .with_property(StructuralProperty::primitive("Salary", PrimitiveType::Decimal))
                    .with_navigation(NavigationProperty::new("Manager", "NS.Employee", Multiplicity::ZeroOrOne))
                    .with_navigation(NavigationProperty::new("Reports", "NS.Employee", Multiplicity::Many)),
            )
            .paged_entity_set("People", "NS.Person", 10)
            .build()
            .unwrap()
    }

    #[test]
    fn test_inheritance_is_flattened() {
        let schema = schema();
        let employee = schema.entity_type("NS.Employee").unwrap();
        assert_eq!(employee.key, vec!["Id"]);
        assert_eq!(
            employee.properties.iter().map(|p| p.name.as_str()).collect::<Vec<_>>(),
            vec!["Id", "Address", "Salary"]
        );
        assert_eq!(employee.ancestors, vec!["NS.Person"]);
    }

    #[test]
    fn test_entity_set_for_derived_type() {
        let schema = schema();
        assert_eq!(schema.entity_set_for_type("NS.Employee").map(|s| s.name.as_str()), Some("People"));
        assert_eq!(schema.page_size("People"), Some(10));
    }

    #[test]
    fn test_member_types() {
        let schema = schema();
        let employee = schema.resolve_type_name("NS.Employee").unwrap();
        assert_eq!(
            schema.member_type(&employee, "Reports").unwrap().to_string(),
            "Collection(NS.Employee)"
        );
        assert_eq!(schema.member_type(&employee, "Manager").unwrap().to_string(), "NS.Employee");
        assert_eq!(schema.member_type(&employee, "Address").unwrap().to_string(), "NS.Address");

        let err = schema.member_type(&employee, "Missing").unwrap_err();
        assert_eq!(err.code(), ODL0302);
        let err = schema.member_type(&QueryType::int32(), "X").unwrap_err();
        assert_eq!(err.code(), ODL0105);
    }

    #[test]
    fn test_resolve_type_names() {
        let schema = schema();
        assert_eq!(
            schema.resolve_type_name("Collection(Edm.Int32)").unwrap(),
            QueryType::collection(QueryType::int32())
        );
        assert_eq!(schema.resolve_type_name("NS.Nope").unwrap_err().code(), ODL0301);
    }

    #[test]
    fn test_unknown_entity_set_type_fails() {
        let err = EntityModelSchema::builder()
            .entity_set("Things", "NS.Thing")
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ODL0301);
    }

    #[test]
    fn test_inheritance_cycle_fails() {
        let err = EntityModelSchema::builder()
            .entity_type(EntityType::new("NS", "A").derived_from("NS.B"))
            .entity_type(EntityType::new("NS", "B").derived_from("NS.A"))
            .build()
            .unwrap_err();
        assert_eq!(err.code(), ODL0306);
    }

    #[test]
    fn test_service_operations() {
        let schema = EntityModelSchema::builder()
            .entity_type(
                EntityType::new("NS", "Customer")
                    .with_key(["Id"])
                    .with_property(StructuralProperty::primitive("Id", PrimitiveType::Int32)),
            )
            .entity_set("Customers", "NS.Customer")
            .service_operation(ServiceOperationDecl {
                name: "TopCustomers".into(),
                return_type: Some("Collection(NS.Customer)".into()),
                entity_set: Some("Customers".into()),
                parameters: vec![("count".into(), "Edm.Int32".into())],
            })
            .build()
            .unwrap();
        let op = schema.require_service_operation("TopCustomers").unwrap();
        assert_eq!(op.parameters.len(), 1);
        assert!(!op.is_void());
        assert_eq!(schema.require_service_operation("Nope").unwrap_err().code(), ODL0303);
    }
}
