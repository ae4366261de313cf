//! Queryable views over entity schemas.
//!
//! A live entity and its history counterpart are both [`EntityView`]s
//! derived from the same [`EntitySchema`]; the history view swaps in the
//! history table, extends the key and time dimensions with the system
//! period, and marks every association temporal.

use crate::config::VersioningConfig;
use crate::core::entity::{AssociationDef, EntityRegistry, EntitySchema};
use crate::core::value::{Row, Value};
use crate::query::predicate::Predicate;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ViewKind {
    Live,
    History,
}

/// Single-table-inheritance filter: `<column> IN (<type names>)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TypeCondition {
    pub column: String,
    pub types: Vec<String>,
}

impl TypeCondition {
    pub fn predicate(&self) -> Predicate {
        Predicate::is_in(
            &self.column,
            self.types.iter().map(|t| Value::from(t.as_str())).collect(),
        )
    }

    /// Needed only by subtypes; a base type sees every row of its table
    fn for_schema(registry: &EntityRegistry, schema: &EntitySchema) -> Option<Self> {
        let column = registry.inheritance_column(schema)?;
        let parent = registry.get(schema.parent.as_deref()?).ok()?;
        if parent.is_abstract {
            return None;
        }
        let types = std::iter::once(schema.name.clone())
            .chain(registry.descendants(&schema.name).iter().map(|d| d.name.clone()))
            .collect();
        Some(Self { column, types })
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EntityView {
    pub name: String,
    pub source: Arc<EntitySchema>,
    pub kind: ViewKind,
    pub table: String,
    pub primary_key: Vec<String>,
    /// Every dimension the view answers as-of queries on
    pub time_dimensions: Vec<String>,
    /// Present when the view carries the system period column
    pub system_dimension: Option<String>,
    pub type_condition: Option<TypeCondition>,
    pub associations: Vec<AssociationDef>,
}

impl EntityView {
    pub fn live(registry: &EntityRegistry, schema: Arc<EntitySchema>) -> Self {
        Self {
            name: schema.name.clone(),
            kind: ViewKind::Live,
            table: schema.table.clone(),
            primary_key: schema.primary_key.clone(),
            time_dimensions: schema.time_dimensions(),
            system_dimension: None,
            type_condition: TypeCondition::for_schema(registry, &schema),
            associations: schema.associations.clone(),
            source: schema,
        }
    }

    /// Counterpart named `name`. Entities without system versioning get a
    /// virtual counterpart reading the live table.
    pub fn history(
        name: &str,
        registry: &EntityRegistry,
        config: &VersioningConfig,
        schema: Arc<EntitySchema>,
        associations: Option<Vec<AssociationDef>>,
    ) -> Self {
        let mut view = Self::live(registry, schema.clone());
        view.name = name.to_string();
        view.kind = ViewKind::History;
        if let Some(table) = schema.history_table(&config.history_suffix) {
            let dimension = config.system_dimension.clone();
            view.table = table;
            view.primary_key.push(dimension.clone());
            view.time_dimensions.push(dimension.clone());
            view.system_dimension = Some(dimension);
        }
        view.associations = associations
            .unwrap_or_else(|| schema.associations.clone())
            .into_iter()
            .map(AssociationDef::temporal)
            .collect();
        view
    }

    pub fn is_history(&self) -> bool {
        self.kind == ViewKind::History
    }

    pub fn identity_key(&self) -> Vec<String> {
        self.source.identity_key()
    }

    /// Application time dimension, when application versioned
    pub fn application_dimension(&self) -> Option<&str> {
        self.source.application.as_ref().map(|a| a.dimension.as_str())
    }

    pub fn has_dimension(&self, dimension: &str) -> bool {
        self.time_dimensions.iter().any(|d| d == dimension)
    }

    pub fn association(&self, name: &str) -> Option<&AssociationDef> {
        self.associations.iter().find(|a| a.name == name)
    }

    /// Set the discriminator on a new subtype row unless already given
    pub fn stamp_type(&self, row: &mut Row) {
        if let Some(condition) = &self.type_condition {
            if !row.contains(&condition.column) {
                row.set(condition.column.clone(), self.source.name.as_str());
            }
        }
    }
}
