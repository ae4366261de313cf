//! Temporal-Versioning: bitemporal versioning for relational entities
//!
//! Tracks two independent time dimensions for each entity.
//!
//! # Core Concepts
//!
//! - **Application time**: when a fact is true in the modeled world, kept as
//!   a validity range and a version counter on the entity's own table
//! - **System time**: when a row was stored, kept in a history table that
//!   versioning hooks maintain on every insert, update and delete
//! - **Revisions**: HEAD revisions have an open validity range; revising
//!   closes HEAD and opens a successor with the next version
//! - **As-of queries**: history counterparts filtered to the rows valid at
//!   given instants, propagated across associations
//!
//! # Example
//!
//! ```no_run
//! use temporal_versioning::prelude::*;
//!
//! # async fn example() -> temporal_versioning::error::Result<()> {
//! let mut registry = EntityRegistry::new();
//! registry.register(
//!     EntitySchema::new("Author", "authors")
//!         .application_versioned()
//!         .system_versioned(),
//! )?;
//! let db = TemporalDB::in_memory(registry, VersioningConfig::default())?;
//!
//! let mut migration = Migration::new("create_authors", db.config().clone());
//! migration.enable_extension("btree_gist");
//! migration.create_table("authors", TableOptions::bitemporal(), |t| {
//!     t.string("name");
//! })?;
//! db.migrate(&migration).await?;
//!
//! // Version 1, valid from now
//! let mut author = db
//!     .originate_at("Author", Timestamp::now(), Row::new().with("name", "Bob"))
//!     .await?;
//! // Version 2 replaces it from tomorrow
//! let tomorrow = Timestamp::now().add_secs(86_400);
//! db.revise_at(&mut author, tomorrow, &Row::new().with("name", "Bobby")).await?;
//!
//! let scope = TimeScope::new();
//! let then = db.as_of("Author", [("validity", tomorrow)])?;
//! let authors = db.load(&then, &scope).await?;
//! # Ok(())
//! # }
//! ```

pub mod cli;
pub mod config;
pub mod core;
pub mod error;
pub mod history;
pub mod query;
pub mod schema;
pub mod storage;
pub mod versioning;

/// Main database type
pub mod db;

/// Prelude module for common imports
pub mod prelude {
    pub use crate::config::VersioningConfig;
    pub use crate::core::*;
    pub use crate::db::TemporalDB;
    pub use crate::error::{Error, Result};
    pub use crate::history::{HistoryResolver, Namespace};
    pub use crate::query::{Predicate, Relation, ScopeGuard, TimeScope};
    pub use crate::schema::{Migration, TableOptions};
    pub use crate::storage::*;
}
