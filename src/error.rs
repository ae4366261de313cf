//! Error types for temporal versioning

use thiserror::Error;

/// Result type alias for versioning operations
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for temporal versioning
#[derive(Error, Debug)]
pub enum Error {
    /// A revise/inactivate/revision was attempted on a revision that is not HEAD
    #[error("Cannot {operation} closed version of {entity}")]
    ClosedRevision { entity: String, operation: String },

    /// History resolution attempted on a non-instantiable entity type
    #[error("{entity} is abstract and cannot have a history model")]
    AbstractEntity { entity: String },

    /// Namespace lookup for a name with no corresponding live entity
    #[error("Unresolved history name {name}: {reason}")]
    UnresolvedHistoryName { name: String, reason: String },

    /// Overlapping ranges or duplicate keys detected at commit
    #[error("Constraint violation on {table} ({constraint}): {detail}")]
    ConstraintViolation {
        table: String,
        constraint: String,
        detail: String,
    },

    /// A concurrent transaction modified the same row first
    #[error("Write conflict on {table}: {detail}")]
    WriteConflict { table: String, detail: String },

    /// No row matches the given key
    #[error("No row in {table} with key {key}")]
    RowNotFound { table: String, key: String },

    /// Table not present in the catalog
    #[error("Unknown table: {0}")]
    UnknownTable(String),

    /// Entity type not registered
    #[error("Unknown entity: {0}")]
    UnknownEntity(String),

    /// Time dimension not declared on the entity
    #[error("Unknown time dimension {dimension} for {entity}")]
    UnknownDimension { entity: String, dimension: String },

    /// Association not declared on the entity
    #[error("Unknown association {association} on {entity}")]
    UnknownAssociation { entity: String, association: String },

    /// Invalid table or column definition, or an invalid range value
    #[error("Schema error: {0}")]
    Schema(String),

    /// Migration command that cannot be inverted
    #[error("Irreversible migration: {0}")]
    IrreversibleMigration(String),

    /// Operation on a transaction that already committed or rolled back
    #[error("Transaction {0} is closed")]
    TransactionClosed(String),

    /// Configuration errors
    #[error("Configuration error: {0}")]
    Configuration(String),

    /// Serialization/deserialization errors
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// IO errors
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl Error {
    pub(crate) fn closed_revision(entity: &str, operation: &str) -> Self {
        Error::ClosedRevision {
            entity: entity.to_string(),
            operation: operation.to_string(),
        }
    }

    pub(crate) fn unresolved(name: &str, reason: impl Into<String>) -> Self {
        Error::UnresolvedHistoryName {
            name: name.to_string(),
            reason: reason.into(),
        }
    }

    /// Whether this error is a storage-level serialization failure
    /// (overlapping ranges or a lost write race).
    pub fn is_conflict(&self) -> bool {
        matches!(
            self,
            Error::ConstraintViolation { .. } | Error::WriteConflict { .. }
        )
    }
}

impl From<serde_json::Error> for Error {
    fn from(e: serde_json::Error) -> Self {
        Error::Serialization(e.to_string())
    }
}
