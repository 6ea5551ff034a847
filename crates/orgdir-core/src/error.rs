use thiserror::Error;

/// Top-level error type for the organizational directory.
#[derive(Error, Debug)]
pub enum DirectoryError {
    #[error("Configuration error: {0}")]
    Config(#[from] config::ConfigError),

    #[error("Catalog error: {0}")]
    Catalog(#[from] CatalogError),
}

/// Errors raised by the schema catalog, either while it is being built or
/// when it is asked about something it does not declare.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CatalogError {
    #[error("Unknown entity type: {0}")]
    UnknownType(String),

    #[error("Unknown relationship {relationship} on {entity}")]
    UnknownRelationship { entity: String, relationship: String },

    #[error("Unknown field {field} on {entity}")]
    UnknownField { entity: String, field: String },

    #[error("Duplicate entity type: {0}")]
    DuplicateType(String),

    #[error("Duplicate field {field} on {entity}")]
    DuplicateField { entity: String, field: String },

    #[error("Field name {field} on {entity} is reserved")]
    ReservedField { entity: String, field: String },

    #[error("Relationship {entity}.{relationship} has cardinality many and must be owned by its target")]
    ManyOwnedBySource { entity: String, relationship: String },
}
