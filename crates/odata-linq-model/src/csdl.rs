//! CSDL (EDMX) metadata loader
//!
//! Reads the conceptual schema of a service document into a
//! [`SchemaBuilder`]. Element names are matched by local name, so both
//! prefixed (`edmx:Edmx`) and default-namespace documents load. Navigation
//! properties are accepted in the `Type="Collection(NS.T)"` form as well as
//! the `Relationship`/`ToRole` form resolved through `Association` ends.

use crate::{EntitySet, SchemaBuilder, ServiceOperationDecl};
use log::{debug, trace};
use odata_linq_diagnostics::{ODL0305, ODL0401, QueryError};
use odata_linq_types::{
    ComplexType, EntityType, Multiplicity, NavigationProperty, StructuralProperty, TypeReference,
};
use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::collections::HashMap;
use std::path::Path;
use thiserror::Error;

/// Errors raised while reading a CSDL document
#[derive(Debug, Error)]
pub enum CsdlError {
    #[error("XML parsing error: {0}")]
    XmlError(#[from] quick_xml::Error),

    #[error("XML attribute error: {0}")]
    AttrError(#[from] quick_xml::events::attributes::AttrError),

    #[error("Invalid metadata document: {0}")]
    InvalidStructure(String),

    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),
}

impl From<CsdlError> for QueryError {
    fn from(err: CsdlError) -> Self {
        match err {
            CsdlError::IoError(e) => QueryError::system(ODL0401, e.to_string()),
            other => QueryError::metadata(ODL0305, other.to_string()),
        }
    }
}

/// Navigation declared through an association, resolved after all
/// associations are read
struct PendingNavigation {
    owner: String,
    name: String,
    relationship: String,
    to_role: String,
}

struct AssociationEnd {
    role: String,
    type_name: String,
    multiplicity: Multiplicity,
}

#[derive(Default)]
struct CsdlReader {
    builder: SchemaBuilder,
    namespace: String,
    entity: Option<EntityType>,
    complex: Option<ComplexType>,
    in_key: bool,
    association: Option<String>,
    associations: HashMap<String, Vec<AssociationEnd>>,
    pending: Vec<PendingNavigation>,
    function_import: Option<ServiceOperationDecl>,
    entity_types: Vec<EntityType>,
}

/// Parse a CSDL document into a schema builder
pub fn parse_csdl(xml: &str) -> Result<SchemaBuilder, CsdlError> {
    let mut reader = Reader::from_str(xml);
    reader.config_mut().trim_text(true);

    let mut state = CsdlReader::default();
    let mut buf = Vec::new();

    loop {
        match reader.read_event_into(&mut buf) {
            Ok(Event::Start(e)) => state.open(&e)?,
            Ok(Event::Empty(e)) => {
                state.open(&e)?;
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                state.close(&name)?;
            }
            Ok(Event::End(e)) => {
                let name = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
                state.close(&name)?;
            }
            Ok(Event::Eof) => break,
            Err(e) => return Err(CsdlError::XmlError(e)),
            _ => {}
        }
        buf.clear();
    }

    state.finish()
}

/// Parse a CSDL file into a schema builder
pub fn parse_csdl_file(path: &Path) -> Result<SchemaBuilder, CsdlError> {
    let content = std::fs::read_to_string(path)?;
    debug!("Loading CSDL metadata from {}", path.display());
    parse_csdl(&content)
}

fn attributes(e: &BytesStart<'_>) -> Result<HashMap<String, String>, CsdlError> {
    let mut map = HashMap::new();
    for attr in e.attributes() {
        let attr = attr?;
        let key = String::from_utf8_lossy(attr.key.local_name().as_ref()).to_string();
        let value = String::from_utf8_lossy(&attr.value).to_string();
        map.insert(key, value);
    }
    Ok(map)
}

fn required<'a>(
    attrs: &'a HashMap<String, String>,
    name: &str,
    element: &str,
) -> Result<&'a str, CsdlError> {
    attrs.get(name).map(String::as_str).ok_or_else(|| {
        CsdlError::InvalidStructure(format!("<{element}> is missing the '{name}' attribute"))
    })
}

impl CsdlReader {
    fn qualify(&self, name: &str) -> String {
        if self.namespace.is_empty() {
            name.to_string()
        } else {
            format!("{}.{}", self.namespace, name)
        }
    }

    fn open(&mut self, e: &BytesStart<'_>) -> Result<(), CsdlError> {
        let element = String::from_utf8_lossy(e.local_name().as_ref()).to_string();
        match element.as_str() {
            "Schema" => {
                let attrs = attributes(e)?;
                self.namespace = attrs.get("Namespace").cloned().unwrap_or_default();
            }
            "EntityType" => {
                let attrs = attributes(e)?;
                let mut entity = EntityType::new(
                    self.namespace.clone(),
                    required(&attrs, "Name", "EntityType")?,
                );
                if let Some(base) = attrs.get("BaseType") {
                    entity = entity.derived_from(base.clone());
                }
                if attrs.get("Abstract").is_some_and(|v| v == "true") {
                    entity = entity.abstract_type();
                }
                self.entity = Some(entity);
            }
            "ComplexType" => {
                let attrs = attributes(e)?;
                self.complex = Some(ComplexType::new(
                    self.namespace.clone(),
                    required(&attrs, "Name", "ComplexType")?,
                ));
            }
            "Key" => self.in_key = true,
            "PropertyRef" if self.in_key => {
                let attrs = attributes(e)?;
                let name = required(&attrs, "Name", "PropertyRef")?.to_string();
                if let Some(entity) = self.entity.as_mut() {
                    entity.key.push(name);
                }
            }
            "Property" => self.read_property(e)?,
            "NavigationProperty" => self.read_navigation(e)?,
            "Association" => {
                let attrs = attributes(e)?;
                let name = self.qualify(required(&attrs, "Name", "Association")?);
                self.associations.entry(name.clone()).or_default();
                self.association = Some(name);
            }
            "End" => {
                // AssociationSet ends carry no Multiplicity and are skipped
                if let Some(association) = &self.association {
                    let attrs = attributes(e)?;
                    if let (Some(role), Some(type_name), Some(multiplicity)) = (
                        attrs.get("Role"),
                        attrs.get("Type"),
                        attrs.get("Multiplicity"),
                    ) {
                        let multiplicity = Multiplicity::parse(multiplicity).ok_or_else(|| {
                            CsdlError::InvalidStructure(format!(
                                "Invalid multiplicity '{multiplicity}' in association '{association}'"
                            ))
                        })?;
                        self.associations
                            .entry(association.clone())
                            .or_default()
                            .push(AssociationEnd {
                                role: role.clone(),
                                type_name: type_name.clone(),
                                multiplicity,
                            });
                    }
                }
            }
            "EntitySet" => {
                let attrs = attributes(e)?;
                let name = required(&attrs, "Name", "EntitySet")?.to_string();
                let entity_type = required(&attrs, "EntityType", "EntitySet")?.to_string();
                self.builder.push_entity_set(EntitySet {
                    name,
                    entity_type,
                    page_size: None,
                });
            }
            "FunctionImport" => {
                let attrs = attributes(e)?;
                self.function_import = Some(ServiceOperationDecl {
                    name: required(&attrs, "Name", "FunctionImport")?.to_string(),
                    return_type: attrs.get("ReturnType").cloned(),
                    entity_set: attrs.get("EntitySet").cloned(),
                    parameters: Vec::new(),
                });
            }
            "Parameter" => {
                if let Some(import) = self.function_import.as_mut() {
                    let attrs = attributes(e)?;
                    import.parameters.push((
                        required(&attrs, "Name", "Parameter")?.to_string(),
                        required(&attrs, "Type", "Parameter")?.to_string(),
                    ));
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn close(&mut self, element: &str) -> Result<(), CsdlError> {
        match element {
            "EntityType" => {
                if let Some(entity) = self.entity.take() {
                    trace!("Read entity type {}", entity.full_name());
                    self.entity_types.push(entity);
                }
            }
            "ComplexType" => {
                if let Some(complex) = self.complex.take() {
                    trace!("Read complex type {}", complex.full_name());
                    self.builder.push_complex_type(complex);
                }
            }
            "Key" => self.in_key = false,
            "Association" => self.association = None,
            "FunctionImport" => {
                if let Some(import) = self.function_import.take() {
                    self.builder.push_service_operation(import);
                }
            }
            _ => {}
        }
        Ok(())
    }

    fn read_property(&mut self, e: &BytesStart<'_>) -> Result<(), CsdlError> {
        let attrs = attributes(e)?;
        let name = required(&attrs, "Name", "Property")?;
        let type_name = required(&attrs, "Type", "Property")?;
        let mut property = StructuralProperty::new(name, TypeReference::parse(type_name));
        if attrs.get("Nullable").is_some_and(|v| v == "false") {
            property = property.required();
        }
        if let Some(entity) = self.entity.as_mut() {
            entity.properties.push(property);
        } else if let Some(complex) = self.complex.as_mut() {
            complex.properties.push(property);
        }
        Ok(())
    }

    fn read_navigation(&mut self, e: &BytesStart<'_>) -> Result<(), CsdlError> {
        let attrs = attributes(e)?;
        let name = required(&attrs, "Name", "NavigationProperty")?.to_string();
        let Some(entity) = self.entity.as_mut() else {
            return Ok(());
        };

        if let Some(type_name) = attrs.get("Type") {
            let navigation = match TypeReference::parse(type_name) {
                TypeReference::Collection(inner) => match *inner {
                    TypeReference::Complex(target) => {
                        NavigationProperty::new(name, target, Multiplicity::Many)
                    }
                    _ => {
                        return Err(CsdlError::InvalidStructure(format!(
                            "Navigation property '{name}' must target an entity type"
                        )));
                    }
                },
                TypeReference::Complex(target) => {
                    let multiplicity = if attrs.get("Nullable").is_some_and(|v| v == "false") {
                        Multiplicity::One
                    } else {
                        Multiplicity::ZeroOrOne
                    };
                    NavigationProperty::new(name, target, multiplicity)
                }
                TypeReference::Primitive(_) => {
                    return Err(CsdlError::InvalidStructure(format!(
                        "Navigation property '{name}' must target an entity type"
                    )));
                }
            };
            entity.navigation_properties.push(navigation);
            return Ok(());
        }

        let relationship = required(&attrs, "Relationship", "NavigationProperty")?.to_string();
        let to_role = required(&attrs, "ToRole", "NavigationProperty")?.to_string();
        self.pending.push(PendingNavigation {
            owner: entity.full_name(),
            name,
            relationship,
            to_role,
        });
        Ok(())
    }

    fn finish(mut self) -> Result<SchemaBuilder, CsdlError> {
        for pending in std::mem::take(&mut self.pending) {
            let end = self
                .associations
                .get(&pending.relationship)
                .and_then(|ends| ends.iter().find(|end| end.role == pending.to_role))
                .ok_or_else(|| {
                    CsdlError::InvalidStructure(format!(
                        "Association end '{}' of '{}' not found for navigation '{}'",
                        pending.to_role, pending.relationship, pending.name
                    ))
                })?;
            let navigation =
                NavigationProperty::new(pending.name, end.type_name.clone(), end.multiplicity);
            if let Some(entity) = self
                .entity_types
                .iter_mut()
                .find(|e| e.full_name() == pending.owner)
            {
                entity.navigation_properties.push(navigation);
            }
        }

        for entity in self.entity_types {
            self.builder.push_entity_type(entity);
        }
        Ok(self.builder)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::EntityModelSchema;
    use pretty_assertions::assert_eq;

    const V3_METADATA: &str = r#"<?xml version="1.0" encoding="utf-8"?>
<edmx:Edmx Version="1.0" xmlns:edmx="http://schemas.microsoft.com/ado/2007/06/edmx">
  <edmx:DataServices>
    <Schema Namespace="NS" xmlns="http://schemas.microsoft.com/ado/2009/11/edm">
      <EntityType Name="Customer">
        <Key><PropertyRef Name="Id"/></Key>
        <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Name" Type="Edm.String"/>
        <NavigationProperty Name="Orders" Relationship="NS.Customer_Orders" FromRole="Customer" ToRole="Orders"/>
      </EntityType>
      <EntityType Name="Order">
        <Key><PropertyRef Name="OrderId"/></Key>
        <Property Name="OrderId" Type="Edm.Int32" Nullable="false"/>
        <Property Name="Amount" Type="Edm.Decimal"/>
        <NavigationProperty Name="Customer" Relationship="NS.Customer_Orders" FromRole="Orders" ToRole="Customer"/>
      </EntityType>
      <Association Name="Customer_Orders">
        <End Role="Customer" Type="NS.Customer" Multiplicity="0..1"/>
        <End Role="Orders" Type="NS.Order" Multiplicity="*"/>
      </Association>
      <EntityContainer Name="Container">
        <EntitySet Name="Customers" EntityType="NS.Customer"/>
        <EntitySet Name="Orders" EntityType="NS.Order"/>
        <AssociationSet Name="Customer_Orders" Association="NS.Customer_Orders">
          <End Role="Customer" EntitySet="Customers"/>
          <End Role="Orders" EntitySet="Orders"/>
        </AssociationSet>
        <FunctionImport Name="CustomersByName" ReturnType="Collection(NS.Customer)" EntitySet="Customers">
          <Parameter Name="name" Type="Edm.String"/>
        </FunctionImport>
        <FunctionImport Name="Reset"/>
      </EntityContainer>
    </Schema>
  </edmx:DataServices>
</edmx:Edmx>"#;

    #[test]
    fn test_association_navigations() {
        let schema = EntityModelSchema::from_csdl(V3_METADATA).unwrap();
        let customer = schema.entity_type("NS.Customer").unwrap();
        let orders = customer.navigation("Orders").unwrap();
        assert_eq!(orders.target_type, "NS.Order");
        assert_eq!(orders.multiplicity, Multiplicity::Many);

        let order = schema.entity_type("NS.Order").unwrap();
        assert_eq!(order.navigation("Customer").unwrap().multiplicity, Multiplicity::ZeroOrOne);
        assert!(!customer.property("Id").unwrap().nullable);
    }

    #[test]
    fn test_function_imports() {
        let schema = EntityModelSchema::from_csdl(V3_METADATA).unwrap();
        let by_name = schema.service_operation("CustomersByName").unwrap();
        assert_eq!(by_name.entity_set.as_deref(), Some("Customers"));
        assert_eq!(by_name.parameters[0].name, "name");
        assert!(schema.service_operation("Reset").unwrap().is_void());
    }

    #[test]
    fn test_typed_navigations_and_inheritance() {
        let xml = r#"<Schema Namespace="NS">
            <ComplexType Name="Address"><Property Name="City" Type="Edm.String"/></ComplexType>
            <EntityType Name="Person" Abstract="true">
              <Key><PropertyRef Name="Id"/></Key>
              <Property Name="Id" Type="Edm.Int32" Nullable="false"/>
              <Property Name="Home" Type="NS.Address"/>
            </EntityType>
            <EntityType Name="Employee" BaseType="NS.Person">
              <NavigationProperty Name="Reports" Type="Collection(NS.Employee)"/>
              <NavigationProperty Name="Manager" Type="NS.Employee"/>
            </EntityType>
            <EntityContainer Name="C"><EntitySet Name="People" EntityType="NS.Person"/></EntityContainer>
        </Schema>"#;
        let schema = EntityModelSchema::from_csdl(xml).unwrap();
        let employee = schema.entity_type("NS.Employee").unwrap();
        assert_eq!(employee.key, vec!["Id"]);
        assert!(schema.entity_type("NS.Person").unwrap().is_abstract);
        assert!(employee.navigation("Reports").unwrap().multiplicity.is_many());
        assert_eq!(employee.navigation("Manager").unwrap().multiplicity, Multiplicity::ZeroOrOne);
    }

    #[test]
    fn test_missing_association_end() {
        let xml = r#"<Schema Namespace="NS">
            <EntityType Name="A">
              <NavigationProperty Name="B" Relationship="NS.Missing" FromRole="A" ToRole="B"/>
            </EntityType>
        </Schema>"#;
        let err = EntityModelSchema::from_csdl(xml).unwrap_err();
        assert_eq!(err.code(), ODL0305);
    }

    #[test]
    fn test_load_from_file() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("metadata.xml");
        std::fs::write(&path, V3_METADATA).unwrap();
        let schema = EntityModelSchema::from_file(&path).unwrap();
        assert_eq!(schema.entity_sets().count(), 2);

        let err = EntityModelSchema::from_file(dir.path().join("missing.xml")).unwrap_err();
        assert_eq!(err.code(), ODL0401);
    }
}
