//! Live entity schema descriptions and the entity registry.
//!
//! An [`EntitySchema`] is the versioning engine's view of a host ORM model:
//! its table, key, time dimensions, inheritance and declared associations.
//! The [`EntityRegistry`] is the name table those descriptions live in.
//! Key and application columns left undeclared on a schema come from the
//! registry's [`VersioningConfig`], the same names `create_table` uses.

use crate::config::VersioningConfig;
use crate::error::{Error, Result};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;

/// Application-time versioning parameters of an entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ApplicationVersioned {
    /// Range column holding the validity period
    pub dimension: String,
    /// Monotonic revision counter column
    pub version_column: String,
}

/// System-time versioning parameters of an entity
#[derive(Debug, Clone, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct SystemVersioned {
    /// Explicit history table; defaults to `<table>_history`
    pub history_table: Option<String>,
}

/// Shape of a declared association
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum AssociationKind {
    /// Target rows carry `foreign_key` pointing at the owner
    HasMany,
    /// Owner row carries `foreign_key` pointing at the target
    BelongsTo,
    /// Follow `through` from the owner, then `source` from each intermediate row
    HasManyThrough { through: String, source: String },
}

/// A declared association on a live entity
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct AssociationDef {
    pub name: String,
    pub kind: AssociationKind,
    /// Target entity name; `None` for polymorphic `belongs_to`
    pub target: Option<String>,
    pub foreign_key: String,
    /// Polymorphic interface name (`as:` on has_many, the association name on belongs_to)
    pub polymorphic: Option<String>,
    /// Propagate the owner's time tags on traversal of a live entity
    pub temporal: bool,
}

impl AssociationDef {
    pub fn has_many(name: &str, target: &str, foreign_key: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AssociationKind::HasMany,
            target: Some(target.to_string()),
            foreign_key: foreign_key.to_string(),
            polymorphic: None,
            temporal: false,
        }
    }

    /// `has_many name, as: interface`
    pub fn has_many_as(name: &str, target: &str, interface: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AssociationKind::HasMany,
            target: Some(target.to_string()),
            foreign_key: format!("{interface}_id"),
            polymorphic: Some(interface.to_string()),
            temporal: false,
        }
    }

    pub fn belongs_to(name: &str, target: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AssociationKind::BelongsTo,
            target: Some(target.to_string()),
            foreign_key: format!("{name}_id"),
            polymorphic: None,
            temporal: false,
        }
    }

    /// `belongs_to name, polymorphic: true`; the target type is read from `<name>_type`
    pub fn belongs_to_polymorphic(name: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AssociationKind::BelongsTo,
            target: None,
            foreign_key: format!("{name}_id"),
            polymorphic: Some(name.to_string()),
            temporal: false,
        }
    }

    pub fn has_many_through(name: &str, through: &str, source: &str) -> Self {
        Self {
            name: name.to_string(),
            kind: AssociationKind::HasManyThrough {
                through: through.to_string(),
                source: source.to_string(),
            },
            target: None,
            foreign_key: String::new(),
            polymorphic: None,
            temporal: false,
        }
    }

    pub fn with_foreign_key(mut self, foreign_key: &str) -> Self {
        self.foreign_key = foreign_key.to_string();
        self
    }

    pub fn temporal(mut self) -> Self {
        self.temporal = true;
        self
    }

    /// Column holding the polymorphic type name
    pub fn type_column(&self) -> Option<String> {
        self.polymorphic.as_ref().map(|p| format!("{p}_type"))
    }
}

/// Description of a live entity type
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntitySchema {
    /// Fully qualified name, `::`-separated (e.g. `MyApp::SystemB::User`)
    pub name: String,
    pub table: String,
    /// Declared primary key, including the version column when application versioned
    pub primary_key: Vec<String>,
    pub application: Option<ApplicationVersioned>,
    pub system: Option<SystemVersioned>,
    pub is_abstract: bool,
    /// Parent entity for single-table inheritance
    pub parent: Option<String>,
    /// Discriminator column for single-table inheritance
    pub inheritance_column: Option<String>,
    pub associations: Vec<AssociationDef>,
    /// Primary key named explicitly rather than taken from the configuration
    #[serde(default)]
    key_declared: bool,
    /// Application columns named explicitly rather than taken from the configuration
    #[serde(default)]
    columns_declared: bool,
}

impl EntitySchema {
    pub fn new(name: &str, table: &str) -> Self {
        let defaults = VersioningConfig::default();
        Self {
            name: name.to_string(),
            table: table.to_string(),
            primary_key: vec![defaults.default_primary_key],
            application: None,
            system: None,
            is_abstract: false,
            parent: None,
            inheritance_column: None,
            associations: Vec::new(),
            key_declared: false,
            columns_declared: false,
        }
    }

    /// An abstract base type; it has no table and no history counterpart
    pub fn abstract_entity(name: &str) -> Self {
        let mut schema = Self::new(name, "");
        schema.is_abstract = true;
        schema
    }

    /// A single-table-inheritance subtype sharing the parent's table,
    /// key, versioning and associations
    pub fn subtype(name: &str, parent: &EntitySchema) -> Self {
        let mut schema = parent.clone();
        schema.name = name.to_string();
        schema.parent = Some(parent.name.clone());
        schema.is_abstract = false;
        schema
    }

    pub fn with_primary_key<S: AsRef<str>>(mut self, columns: &[S]) -> Self {
        let version = self.application.as_ref().map(|a| a.version_column.clone());
        self.primary_key = columns.iter().map(|c| c.as_ref().to_string()).collect();
        self.key_declared = true;
        if let Some(version) = version {
            if !self.primary_key.contains(&version) {
                self.primary_key.push(version);
            }
        }
        self
    }

    /// Application versioning on the configured dimension and version
    /// column (`validity` and `version` unless configured otherwise)
    pub fn application_versioned(self) -> Self {
        let defaults = VersioningConfig::default();
        let mut schema =
            self.application_versioned_on(&defaults.application_dimension, &defaults.version_column);
        schema.columns_declared = false;
        schema
    }

    /// Application versioning on explicitly named columns
    pub fn application_versioned_on(mut self, dimension: &str, version_column: &str) -> Self {
        if !self.primary_key.iter().any(|c| c == version_column) {
            self.primary_key.push(version_column.to_string());
        }
        self.application = Some(ApplicationVersioned {
            dimension: dimension.to_string(),
            version_column: version_column.to_string(),
        });
        self.columns_declared = true;
        self
    }

    /// Fill undeclared key and application columns from `config`
    fn conform(&mut self, config: &VersioningConfig) {
        if !self.columns_declared {
            if let Some(app) = self.application.as_mut() {
                let previous =
                    std::mem::replace(&mut app.version_column, config.version_column.clone());
                app.dimension = config.application_dimension.clone();
                if let Some(column) = self.primary_key.iter_mut().find(|c| **c == previous) {
                    *column = app.version_column.clone();
                }
            }
        }
        if !self.key_declared && !self.is_abstract {
            self.primary_key = vec![config.default_primary_key.clone()];
            self.primary_key
                .extend(self.application.as_ref().map(|a| a.version_column.clone()));
        }
    }

    pub fn system_versioned(mut self) -> Self {
        self.system = Some(SystemVersioned::default());
        self
    }

    /// Override the history table name; implies system versioning
    pub fn with_history_table(mut self, table: &str) -> Self {
        self.system = Some(SystemVersioned {
            history_table: Some(table.to_string()),
        });
        self
    }

    pub fn with_inheritance_column(mut self, column: &str) -> Self {
        self.inheritance_column = Some(column.to_string());
        self
    }

    pub fn with_association(mut self, association: AssociationDef) -> Self {
        self.associations.push(association);
        self
    }

    pub fn is_system_versioned(&self) -> bool {
        self.system.is_some()
    }

    /// History table name, honoring the override
    pub fn history_table(&self, suffix: &str) -> Option<String> {
        self.system.as_ref().map(|s| {
            s.history_table
                .clone()
                .unwrap_or_else(|| format!("{}{}", self.table, suffix))
        })
    }

    /// Stable key identifying a record across revisions (primary key minus version)
    pub fn identity_key(&self) -> Vec<String> {
        let version = self.application.as_ref().map(|a| a.version_column.as_str());
        self.primary_key
            .iter()
            .filter(|c| Some(c.as_str()) != version)
            .cloned()
            .collect()
    }

    /// Application time dimensions, outermost first
    pub fn time_dimensions(&self) -> Vec<String> {
        self.application
            .iter()
            .map(|a| a.dimension.clone())
            .collect()
    }

    pub fn association(&self, name: &str) -> Option<&AssociationDef> {
        self.associations.iter().find(|a| a.name == name)
    }

    /// Last path segment of the qualified name
    pub fn short_name(&self) -> &str {
        self.name.rsplit("::").next().unwrap_or(&self.name)
    }
}

/// Result of looking a name up in the registry
#[derive(Debug, Clone)]
pub enum Lookup {
    Entity(Arc<EntitySchema>),
    /// A registered name that is not an entity (a module, a value)
    Constant(String),
    Missing,
}

/// Name table of live entity types
#[derive(Debug, Default)]
pub struct EntityRegistry {
    entities: HashMap<String, Arc<EntitySchema>>,
    constants: HashMap<String, String>,
    config: VersioningConfig,
}

impl EntityRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry whose schemas take undeclared columns from `config`
    pub fn with_config(config: VersioningConfig) -> Self {
        Self {
            config,
            ..Self::default()
        }
    }

    pub fn config(&self) -> &VersioningConfig {
        &self.config
    }

    /// Switch to `config`, conforming every registered schema
    pub fn configure(&mut self, config: &VersioningConfig) {
        if self.config == *config {
            return;
        }
        self.config = config.clone();
        for schema in self.entities.values_mut() {
            let mut conformed = (**schema).clone();
            conformed.conform(config);
            *schema = Arc::new(conformed);
        }
    }

    /// Register an entity; a subtype's parent must already be registered
    pub fn register(&mut self, mut schema: EntitySchema) -> Result<Arc<EntitySchema>> {
        if let Some(parent) = &schema.parent {
            if !self.entities.contains_key(parent) {
                return Err(Error::UnknownEntity(parent.clone()));
            }
        }
        if !schema.is_abstract && schema.table.is_empty() {
            return Err(Error::Schema(format!("{} has no table", schema.name)));
        }
        schema.conform(&self.config);
        let schema = Arc::new(schema);
        self.entities.insert(schema.name.clone(), schema.clone());
        Ok(schema)
    }

    /// Register a non-entity name, described by `description`
    pub fn register_constant(&mut self, name: &str, description: &str) {
        self.constants
            .insert(name.to_string(), description.to_string());
    }

    pub fn get(&self, name: &str) -> Result<Arc<EntitySchema>> {
        self.entities
            .get(name)
            .cloned()
            .ok_or_else(|| Error::UnknownEntity(name.to_string()))
    }

    pub fn lookup(&self, name: &str) -> Lookup {
        if let Some(schema) = self.entities.get(name) {
            Lookup::Entity(schema.clone())
        } else if let Some(description) = self.constants.get(name) {
            Lookup::Constant(description.clone())
        } else {
            Lookup::Missing
        }
    }

    /// All transitive subtypes of `name`
    pub fn descendants(&self, name: &str) -> Vec<Arc<EntitySchema>> {
        let mut found = Vec::new();
        let mut frontier = vec![name.to_string()];
        while let Some(current) = frontier.pop() {
            let mut children: Vec<_> = self
                .entities
                .values()
                .filter(|e| e.parent.as_deref() == Some(current.as_str()))
                .cloned()
                .collect();
            children.sort_by(|a, b| a.name.cmp(&b.name));
            for child in children {
                frontier.push(child.name.clone());
                found.push(child);
            }
        }
        found
    }

    /// Root of the inheritance chain (the name stored in polymorphic type columns)
    pub fn base_name(&self, name: &str) -> String {
        let mut current = name.to_string();
        while let Some(parent) = self
            .entities
            .get(&current)
            .and_then(|e| e.parent.clone())
        {
            match self.entities.get(&parent) {
                Some(p) if !p.is_abstract => current = parent,
                _ => break,
            }
        }
        current
    }

    /// Discriminator column in effect for `schema`, inherited from its ancestors
    pub fn inheritance_column(&self, schema: &EntitySchema) -> Option<String> {
        if schema.inheritance_column.is_some() {
            return schema.inheritance_column.clone();
        }
        let mut parent = schema.parent.clone();
        while let Some(name) = parent {
            let entity = self.entities.get(&name)?;
            if entity.inheritance_column.is_some() {
                return entity.inheritance_column.clone();
            }
            parent = entity.parent.clone();
        }
        None
    }
}
