//! The capability table: every root field and every entity field the
//! resolvers answer, built once from the catalog.
//!
//! Resolution looks fields up here by (type, field name) instead of
//! dispatching on type names, so one generic resolver serves every type.

use std::collections::HashMap;
use std::sync::Arc;

use orgdir_core::{AttributeDef, Catalog, CatalogError, RelationshipDef};

/// Root field name of the subscription control surface.
pub const CONTROL_FIELD: &str = "_Subscription";

#[derive(Debug, Clone)]
pub enum RootCapability {
    /// `<Type>(id?)`
    One { entity: String },
    /// `<collection>`
    All { entity: String },
    /// `_Subscription`
    Control,
}

#[derive(Debug, Clone)]
pub enum FieldCapability {
    Id,
    TypeName,
    Attribute(AttributeDef),
    Relationship(RelationshipDef),
    Create,
    Clone,
    Update,
    Delete,
}

#[derive(Debug)]
pub struct Capabilities {
    catalog: Arc<Catalog>,
    root: HashMap<String, RootCapability>,
    fields: HashMap<String, HashMap<String, FieldCapability>>,
}

impl Capabilities {
    pub fn build(catalog: Arc<Catalog>) -> Self {
        let mut root = HashMap::new();
        let mut fields = HashMap::new();

        root.insert(CONTROL_FIELD.to_string(), RootCapability::Control);

        for def in catalog.types() {
            root.insert(
                def.name.clone(),
                RootCapability::One {
                    entity: def.name.clone(),
                },
            );
            root.insert(
                def.collection.clone(),
                RootCapability::All {
                    entity: def.name.clone(),
                },
            );

            let mut table = HashMap::from([
                ("id".to_string(), FieldCapability::Id),
                ("__typename".to_string(), FieldCapability::TypeName),
                ("create".to_string(), FieldCapability::Create),
                ("clone".to_string(), FieldCapability::Clone),
                ("update".to_string(), FieldCapability::Update),
                ("delete".to_string(), FieldCapability::Delete),
            ]);
            for attr in &def.attributes {
                table.insert(attr.name.clone(), FieldCapability::Attribute(attr.clone()));
            }
            for rel in &def.relationships {
                table.insert(rel.name.clone(), FieldCapability::Relationship(rel.clone()));
            }
            fields.insert(def.name.clone(), table);
        }

        tracing::debug!(
            root_fields = root.len(),
            entity_types = fields.len(),
            "Capability table built"
        );
        Self {
            catalog,
            root,
            fields,
        }
    }

    pub fn catalog(&self) -> &Arc<Catalog> {
        &self.catalog
    }

    pub fn root(&self, name: &str) -> Result<&RootCapability, CatalogError> {
        self.root
            .get(name)
            .ok_or_else(|| CatalogError::UnknownType(name.to_string()))
    }

    pub fn field(&self, entity: &str, name: &str) -> Result<&FieldCapability, CatalogError> {
        self.fields
            .get(entity)
            .ok_or_else(|| CatalogError::UnknownType(entity.to_string()))?
            .get(name)
            .ok_or_else(|| CatalogError::UnknownField {
                entity: entity.to_string(),
                field: name.to_string(),
            })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orgdir_core::catalog;

    fn capabilities() -> Capabilities {
        Capabilities::build(Arc::new(catalog::directory().unwrap()))
    }

    #[test]
    fn root_fields_cover_every_type() {
        let caps = capabilities();
        assert!(matches!(caps.root("OrgUnit"), Ok(RootCapability::One { entity }) if entity == "OrgUnit"));
        assert!(matches!(caps.root("Persons"), Ok(RootCapability::All { entity }) if entity == "Person"));
        assert!(matches!(caps.root("_Subscription"), Ok(RootCapability::Control)));
        assert!(caps.root("Teams").is_err());
    }

    #[test]
    fn entity_fields() {
        let caps = capabilities();
        assert!(matches!(caps.field("Person", "id"), Ok(FieldCapability::Id)));
        assert!(matches!(caps.field("Person", "name"), Ok(FieldCapability::Attribute(_))));
        assert!(matches!(
            caps.field("OrgUnit", "members"),
            Ok(FieldCapability::Relationship(rel)) if rel.target == "Person"
        ));
        assert!(matches!(caps.field("OrgUnit", "clone"), Ok(FieldCapability::Clone)));
        assert!(matches!(
            caps.field("Person", "members"),
            Err(CatalogError::UnknownField { .. })
        ));
    }
}
