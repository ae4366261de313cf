//! As-of relations over entity views.
//!
//! A [`Relation`] turns explicit or ambient as-of instants into range
//! predicates. Without an instant for the application dimension a live view
//! sees only HEAD revisions; history views apply no filter for a dimension
//! that is not bound.

use crate::core::record::Record;
use crate::core::temporal::Timestamp;
use crate::core::value::Value;
use crate::core::view::{EntityView, ViewKind};
use crate::error::{Error, Result};
use crate::history::resolver::HistoryResolver;
use crate::query::predicate::Predicate;
use crate::query::scope::TimeScope;
use crate::schema::sql::quote_table;
use crate::storage::database::Transaction;
use std::collections::BTreeMap;
use std::sync::Arc;
use tracing::debug;

#[derive(Debug, Clone, PartialEq)]
pub struct Relation {
    view: Arc<EntityView>,
    as_of: BTreeMap<String, Timestamp>,
    filters: Vec<Predicate>,
}

impl Relation {
    pub fn new(view: Arc<EntityView>) -> Self {
        Self {
            view,
            as_of: BTreeMap::new(),
            filters: Vec::new(),
        }
    }

    pub fn view(&self) -> &Arc<EntityView> {
        &self.view
    }

    /// Bind `dimension` to `instant`
    pub fn as_of(mut self, dimension: &str, instant: Timestamp) -> Result<Self> {
        if !self.view.has_dimension(dimension) {
            return Err(Error::UnknownDimension {
                entity: self.view.name.clone(),
                dimension: dimension.to_string(),
            });
        }
        self.as_of.insert(dimension.to_string(), instant);
        Ok(self)
    }

    /// Bind several dimensions at once
    pub fn as_of_all<'a, I>(self, bindings: I) -> Result<Self>
    where
        I: IntoIterator<Item = (&'a str, Timestamp)>,
    {
        bindings
            .into_iter()
            .try_fold(self, |relation, (d, t)| relation.as_of(d, t))
    }

    /// Bind every dimension of the view to the same instant
    pub fn at_time(mut self, instant: Timestamp) -> Self {
        for dimension in &self.view.time_dimensions {
            self.as_of.insert(dimension.clone(), instant);
        }
        self
    }

    /// Fill unbound dimensions from the ambient scope. Bindings for
    /// dimensions the view does not have are ignored.
    pub fn with_scope(mut self, scope: &TimeScope) -> Self {
        for dimension in &self.view.time_dimensions {
            if self.as_of.contains_key(dimension) {
                continue;
            }
            if let Some(instant) = scope.lookup(dimension) {
                self.as_of.insert(dimension.clone(), instant);
            }
        }
        self
    }

    /// Bind the subset of `tags` that applies to this view, keeping
    /// existing bindings
    pub(crate) fn with_time_tags(mut self, tags: &BTreeMap<String, Timestamp>) -> Self {
        for (dimension, instant) in tags {
            if self.view.has_dimension(dimension) {
                self.as_of.entry(dimension.clone()).or_insert(*instant);
            }
        }
        self
    }

    pub fn filter(mut self, predicate: Predicate) -> Self {
        self.filters.push(predicate);
        self
    }

    pub fn where_eq(self, column: &str, value: impl Into<Value>) -> Self {
        self.filter(Predicate::eq(column, value))
    }

    pub fn bindings(&self) -> &BTreeMap<String, Timestamp> {
        &self.as_of
    }

    /// Full filter for this relation
    pub fn predicate(&self) -> Predicate {
        let mut predicate = self
            .view
            .type_condition
            .as_ref()
            .map(|c| c.predicate())
            .unwrap_or(Predicate::True);

        for dimension in &self.view.time_dimensions {
            predicate = match self.as_of.get(dimension) {
                Some(instant) => predicate.and(Predicate::as_of(dimension, *instant)),
                None if self.view.kind == ViewKind::Live
                    && self.view.application_dimension() == Some(dimension.as_str()) =>
                {
                    predicate.and(Predicate::open_ended(dimension))
                }
                None => predicate,
            };
        }

        self.filters
            .iter()
            .cloned()
            .fold(predicate, Predicate::and)
    }

    pub fn to_sql(&self) -> String {
        format!(
            "SELECT * FROM {} WHERE {}",
            quote_table(&self.view.table),
            self.predicate().to_sql()
        )
    }

    /// Matching records, each tagged with this relation's bindings and
    /// instantiated as its inheritance subtype
    pub async fn load<T: Transaction>(&self, tx: &T, resolver: &HistoryResolver) -> Result<Vec<Record>> {
        let predicate = self.predicate();
        debug!(view = %self.view.name, filter = %predicate.to_sql(), "Loading relation");
        let rows = tx.select(&self.view.table, &predicate).await?;
        rows.into_iter()
            .map(|row| {
                let view = resolver.instantiate(&self.view, &row)?;
                Ok(Record::loaded(view, row, self.as_of.clone()))
            })
            .collect()
    }

    pub async fn first<T: Transaction>(&self, tx: &T, resolver: &HistoryResolver) -> Result<Option<Record>> {
        Ok(self.load(tx, resolver).await?.into_iter().next())
    }
}
