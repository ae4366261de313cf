//! Loaded or built entity instances

use crate::core::temporal::{TemporalRange, Timestamp};
use crate::core::value::{Row, Value};
use crate::core::view::EntityView;
use std::collections::BTreeMap;
use std::sync::Arc;

/// A row bound to the view it was read through.
///
/// `time_tags` are the as-of instants the row was loaded under; association
/// traversal from this record reuses them.
#[derive(Debug, Clone, PartialEq)]
pub struct Record {
    view: Arc<EntityView>,
    row: Row,
    time_tags: BTreeMap<String, Timestamp>,
    persisted: bool,
}

impl Record {
    /// An unsaved record. Subtype records get their discriminator set.
    pub fn new(view: Arc<EntityView>, mut row: Row) -> Self {
        view.stamp_type(&mut row);
        Self {
            view,
            row,
            time_tags: BTreeMap::new(),
            persisted: false,
        }
    }

    pub(crate) fn loaded(view: Arc<EntityView>, row: Row, time_tags: BTreeMap<String, Timestamp>) -> Self {
        Self {
            view,
            row,
            time_tags,
            persisted: true,
        }
    }

    pub fn view(&self) -> &Arc<EntityView> {
        &self.view
    }

    pub fn entity(&self) -> &str {
        &self.view.name
    }

    pub fn row(&self) -> &Row {
        &self.row
    }

    pub fn get(&self, column: &str) -> &Value {
        self.row.get(column)
    }

    pub fn set(&mut self, column: impl Into<String>, value: impl Into<Value>) {
        self.row.set(column, value);
    }

    pub fn assign(&mut self, attributes: &Row) {
        self.row.merge(attributes);
    }

    pub fn time_tags(&self) -> &BTreeMap<String, Timestamp> {
        &self.time_tags
    }

    pub fn set_time_tags(&mut self, tags: BTreeMap<String, Timestamp>) {
        self.time_tags = tags;
    }

    pub fn is_persisted(&self) -> bool {
        self.persisted
    }

    pub(crate) fn mark_persisted(&mut self, row: Row) {
        self.row = row;
        self.persisted = true;
    }

    /// Primary key columns and values
    pub fn key(&self) -> Row {
        self.view
            .primary_key
            .iter()
            .map(|c| (c.clone(), self.row.get(c).clone()))
            .collect()
    }

    /// Identity columns and values, stable across revisions
    pub fn identity(&self) -> Row {
        self.view
            .identity_key()
            .into_iter()
            .map(|c| {
                let v = self.row.get(&c).clone();
                (c, v)
            })
            .collect()
    }

    pub fn range(&self, dimension: &str) -> Option<&TemporalRange> {
        self.row.get(dimension).as_range()
    }

    /// Application revision number
    pub fn version(&self) -> Option<i64> {
        let column = &self.view.source.application.as_ref()?.version_column;
        self.row.get(column).as_int()
    }

    /// Whether this is the open-ended revision of its identity
    pub fn is_head(&self) -> bool {
        self.view
            .application_dimension()
            .and_then(|d| self.range(d))
            .map(TemporalRange::is_open)
            .unwrap_or(false)
    }
}
