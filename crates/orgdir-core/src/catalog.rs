//! The schema catalog: a static description of entity types, their
//! attributes, and their relationships.
//!
//! The catalog is built once at startup through [`CatalogBuilder`] and is
//! read-only afterwards. Every other component consults it instead of
//! special-casing individual entity types.

use std::collections::{HashMap, HashSet};

use serde::{Deserialize, Serialize};

use crate::error::CatalogError;

/// Field names the resolvers claim on every entity type.
pub const RESERVED_FIELDS: &[&str] = &["id", "__typename", "create", "clone", "update", "delete"];

// ── Definitions ───────────────────────────────────────────────────

/// Scalar kind of an attribute.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum ScalarKind {
    String,
    Int,
    Float,
    Boolean,
    Json,
}

impl ScalarKind {
    /// Whether `value` is acceptable for this kind. Null is accepted by
    /// every kind; required-ness is checked separately.
    pub fn accepts(&self, value: &serde_json::Value) -> bool {
        use serde_json::Value;
        match (self, value) {
            (_, Value::Null) => true,
            (Self::String, Value::String(_)) => true,
            (Self::Int, Value::Number(n)) => n.is_i64() || n.is_u64(),
            (Self::Float, Value::Number(_)) => true,
            (Self::Boolean, Value::Bool(_)) => true,
            (Self::Json, _) => true,
            _ => false,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct AttributeDef {
    pub name: String,
    pub kind: ScalarKind,
    pub required: bool,
}

/// Number of counterparts a relationship has.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum Cardinality {
    One,
    Many,
}

/// Which record stores the foreign key of a relationship.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq)]
#[serde(rename_all = "lowercase")]
pub enum OwningSide {
    /// The declaring entity stores the foreign key (belongs-to).
    Source,
    /// The target entity stores the foreign key (has-one / has-many).
    Target,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct RelationshipDef {
    pub name: String,
    pub target: String,
    pub cardinality: Cardinality,
    pub owner: OwningSide,
    /// Foreign key name on the owning record. Two relationships sharing a
    /// foreign key are two traversal directions of the same reference.
    pub foreign_key: String,
}

#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct EntityTypeDef {
    pub name: String,
    /// Root field name for the whole collection (e.g. `OrgUnits`).
    pub collection: String,
    pub attributes: Vec<AttributeDef>,
    pub relationships: Vec<RelationshipDef>,
}

impl EntityTypeDef {
    pub fn attribute(&self, name: &str) -> Option<&AttributeDef> {
        self.attributes.iter().find(|a| a.name == name)
    }

    pub fn relationship(&self, name: &str) -> Option<&RelationshipDef> {
        self.relationships.iter().find(|r| r.name == name)
    }

    /// Relationships whose foreign key lives on this type's own records.
    pub fn owned_relationships(&self) -> impl Iterator<Item = &RelationshipDef> {
        self.relationships
            .iter()
            .filter(|r| r.owner == OwningSide::Source)
    }
}

// ── Catalog ───────────────────────────────────────────────────────

/// Immutable schema lookup.
#[derive(Debug, Clone)]
pub struct Catalog {
    types: Vec<EntityTypeDef>,
    by_name: HashMap<String, usize>,
}

impl Catalog {
    pub fn builder() -> CatalogBuilder {
        CatalogBuilder::default()
    }

    /// Describe an entity type: its attributes and relationships.
    pub fn describe(&self, entity: &str) -> Result<&EntityTypeDef, CatalogError> {
        self.by_name
            .get(entity)
            .map(|idx| &self.types[*idx])
            .ok_or_else(|| CatalogError::UnknownType(entity.to_string()))
    }

    /// Look up one relationship of an entity type.
    pub fn relationship(
        &self,
        entity: &str,
        name: &str,
    ) -> Result<&RelationshipDef, CatalogError> {
        self.describe(entity)?
            .relationship(name)
            .ok_or_else(|| CatalogError::UnknownRelationship {
                entity: entity.to_string(),
                relationship: name.to_string(),
            })
    }

    /// All declared entity types, in declaration order.
    pub fn types(&self) -> &[EntityTypeDef] {
        &self.types
    }

    /// Foreign keys stored on records of `entity`, including those written by
    /// other types' target-owned relationships.
    pub fn foreign_keys_on(&self, entity: &str) -> HashSet<&str> {
        let mut keys = HashSet::new();
        for def in &self.types {
            for rel in &def.relationships {
                let holder = match rel.owner {
                    OwningSide::Source => def.name.as_str(),
                    OwningSide::Target => rel.target.as_str(),
                };
                if holder == entity {
                    keys.insert(rel.foreign_key.as_str());
                }
            }
        }
        keys
    }
}

// ── Builder ───────────────────────────────────────────────────────

/// Builder for constructing an immutable [`Catalog`].
#[derive(Debug, Default)]
pub struct CatalogBuilder {
    types: Vec<EntityTypeDef>,
}

impl CatalogBuilder {
    /// Start declaring an entity type.
    pub fn entity(&mut self, name: impl Into<String>) -> EntityBuilder<'_> {
        let name = name.into();
        EntityBuilder {
            collection: format!("{name}s"),
            builder: self,
            def_name: name,
            attributes: Vec::new(),
            relationships: Vec::new(),
        }
    }

    /// Validate and freeze the catalog.
    pub fn build(self) -> Result<Catalog, CatalogError> {
        let mut by_name = HashMap::new();
        for (idx, def) in self.types.iter().enumerate() {
            if by_name.insert(def.name.clone(), idx).is_some() {
                return Err(CatalogError::DuplicateType(def.name.clone()));
            }
        }

        for def in &self.types {
            let mut seen = HashSet::new();
            let names = def
                .attributes
                .iter()
                .map(|a| a.name.as_str())
                .chain(def.relationships.iter().map(|r| r.name.as_str()));
            for field in names {
                if RESERVED_FIELDS.contains(&field) {
                    return Err(CatalogError::ReservedField {
                        entity: def.name.clone(),
                        field: field.to_string(),
                    });
                }
                if !seen.insert(field) {
                    return Err(CatalogError::DuplicateField {
                        entity: def.name.clone(),
                        field: field.to_string(),
                    });
                }
            }

            for rel in &def.relationships {
                if !by_name.contains_key(&rel.target) {
                    return Err(CatalogError::UnknownType(rel.target.clone()));
                }
                if rel.cardinality == Cardinality::Many && rel.owner == OwningSide::Source {
                    return Err(CatalogError::ManyOwnedBySource {
                        entity: def.name.clone(),
                        relationship: rel.name.clone(),
                    });
                }
            }
        }

        Ok(Catalog {
            types: self.types,
            by_name,
        })
    }
}

/// Declares one entity type; finish with [`EntityBuilder::done`].
pub struct EntityBuilder<'a> {
    builder: &'a mut CatalogBuilder,
    def_name: String,
    collection: String,
    attributes: Vec<AttributeDef>,
    relationships: Vec<RelationshipDef>,
}

impl<'a> EntityBuilder<'a> {
    /// Override the collection root field name (default: name + "s").
    pub fn collection(mut self, name: impl Into<String>) -> Self {
        self.collection = name.into();
        self
    }

    pub fn attribute(mut self, name: impl Into<String>, kind: ScalarKind, required: bool) -> Self {
        self.attributes.push(AttributeDef {
            name: name.into(),
            kind,
            required,
        });
        self
    }

    /// Belongs-to: this type stores `foreign_key` pointing at one `target`.
    pub fn belongs_to(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relationship(name, target, Cardinality::One, OwningSide::Source, foreign_key)
    }

    /// Has-one: one `target` stores `foreign_key` pointing back at this type.
    pub fn has_one(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relationship(name, target, Cardinality::One, OwningSide::Target, foreign_key)
    }

    /// Has-many: any number of `target`s store `foreign_key` pointing back.
    pub fn has_many(
        self,
        name: impl Into<String>,
        target: impl Into<String>,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relationship(name, target, Cardinality::Many, OwningSide::Target, foreign_key)
    }

    pub fn relationship(
        mut self,
        name: impl Into<String>,
        target: impl Into<String>,
        cardinality: Cardinality,
        owner: OwningSide,
        foreign_key: impl Into<String>,
    ) -> Self {
        self.relationships.push(RelationshipDef {
            name: name.into(),
            target: target.into(),
            cardinality,
            owner,
            foreign_key: foreign_key.into(),
        });
        self
    }

    pub fn done(self) {
        self.builder.types.push(EntityTypeDef {
            name: self.def_name,
            collection: self.collection,
            attributes: self.attributes,
            relationships: self.relationships,
        });
    }
}

// ── Sample Directory ──────────────────────────────────────────────

/// The organizational directory: `OrgUnit`s and the `Person`s in them.
pub fn directory() -> Result<Catalog, CatalogError> {
    let mut builder = Catalog::builder();
    builder
        .entity("OrgUnit")
        .attribute("name", ScalarKind::String, true)
        .has_one("director", "Person", "directorId")
        .has_many("members", "Person", "orgUnitId")
        .belongs_to("parentUnit", "OrgUnit", "parentUnitId")
        .done();
    builder
        .entity("Person")
        .attribute("name", ScalarKind::String, true)
        .belongs_to("belongsTo", "OrgUnit", "orgUnitId")
        .belongs_to("supervisor", "Person", "personId")
        .done();
    builder.build()
}
