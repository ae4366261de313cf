//! Main database implementation

use crate::config::VersioningConfig;
use crate::core::entity::EntityRegistry;
use crate::core::record::Record;
use crate::core::temporal::Timestamp;
use crate::core::value::Row;
use crate::error::Result;
use crate::history::resolver::HistoryResolver;
use crate::query::association;
use crate::query::relation::Relation;
use crate::query::scope::TimeScope;
use crate::schema::migration::Migration;
use crate::storage::clock::Clock;
use crate::storage::database::{Database, Transaction};
use crate::storage::memory::MemoryDatabase;
use crate::versioning::application;
use std::sync::Arc;
use tracing::{info, warn};

/// Versioned entity store over a host database.
///
/// Each mutating call runs in its own transaction; compound operations such
/// as `revise` commit or roll back as a whole. Callers needing several
/// operations in one transaction use [`TemporalDB::begin`] with the
/// functions in [`crate::versioning::application`].
pub struct TemporalDB<D: Database = MemoryDatabase> {
    database: D,
    resolver: Arc<HistoryResolver>,
}

impl TemporalDB<MemoryDatabase> {
    /// Create a store over a fresh in-memory database
    pub fn in_memory(registry: EntityRegistry, config: VersioningConfig) -> Result<Self> {
        Self::new(MemoryDatabase::new(), HistoryResolver::new(registry, config))
    }

    /// In-memory store whose transaction times come from `clock`
    pub fn in_memory_with_clock(
        registry: EntityRegistry,
        config: VersioningConfig,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        Self::new(
            MemoryDatabase::with_clock(clock),
            HistoryResolver::new(registry, config),
        )
    }
}

impl<D: Database> TemporalDB<D> {
    pub fn new(database: D, resolver: HistoryResolver) -> Result<Self> {
        resolver.config().validate()?;
        Ok(Self {
            database,
            resolver: Arc::new(resolver),
        })
    }

    pub fn database(&self) -> &D {
        &self.database
    }

    pub fn resolver(&self) -> &HistoryResolver {
        &self.resolver
    }

    pub fn config(&self) -> &VersioningConfig {
        self.resolver.config()
    }

    pub async fn begin(&self) -> Result<D::Tx> {
        self.database.begin().await
    }

    /// Apply a migration's commands
    pub async fn migrate(&self, migration: &Migration) -> Result<()> {
        self.database.apply_all(&migration.up()).await?;
        info!(migration = %migration.name(), "Migrated up");
        Ok(())
    }

    /// Undo a migration's commands
    pub async fn rollback(&self, migration: &Migration) -> Result<()> {
        self.database.apply_all(&migration.down()?).await?;
        info!(migration = %migration.name(), "Migrated down");
        Ok(())
    }

    /// Relation over the live rows of `entity`
    pub fn live(&self, entity: &str) -> Result<Relation> {
        Ok(Relation::new(self.resolver.live_view(entity)?))
    }

    /// Relation over the history counterpart of `entity`
    pub fn history(&self, entity: &str) -> Result<Relation> {
        Ok(Relation::new(self.resolver.history_view(entity)?))
    }

    /// Relation over a counterpart named in full, e.g. `History::MyApp::User`
    pub fn history_model(&self, name: &str) -> Result<Relation> {
        Ok(Relation::new(self.resolver.resolve(name)?))
    }

    /// History of `entity` as of the given instants
    pub fn as_of<'a, I>(&self, entity: &str, bindings: I) -> Result<Relation>
    where
        I: IntoIterator<Item = (&'a str, Timestamp)>,
    {
        self.history(entity)?.as_of_all(bindings)
    }

    /// History of `entity` with every dimension at `instant`
    pub fn at_time(&self, entity: &str, instant: Timestamp) -> Result<Relation> {
        Ok(self.history(entity)?.at_time(instant))
    }

    /// Load `relation` with unbound dimensions taken from `scope`
    pub async fn load(&self, relation: &Relation, scope: &TimeScope) -> Result<Vec<Record>> {
        let relation = relation.clone().with_scope(scope);
        let tx = self.database.begin().await?;
        relation.load(&tx, &self.resolver).await
    }

    pub async fn first(&self, relation: &Relation, scope: &TimeScope) -> Result<Option<Record>> {
        Ok(self.load(relation, scope).await?.into_iter().next())
    }

    /// Records related to `owner` through `association`
    pub async fn association(&self, owner: &Record, name: &str, scope: &TimeScope) -> Result<Vec<Record>> {
        let tx = self.database.begin().await?;
        association::traverse(&tx, &self.resolver, owner, name, scope).await
    }

    /// Commit on success, roll back on failure
    async fn finish<R>(&self, mut tx: D::Tx, result: Result<R>) -> Result<R> {
        match result {
            Ok(value) => {
                tx.commit().await?;
                Ok(value)
            }
            Err(e) => {
                if let Err(rollback) = tx.rollback().await {
                    warn!(error = %rollback, "Rollback after failed operation also failed");
                }
                Err(e)
            }
        }
    }

    /// Insert a new row for `entity`
    pub async fn create(&self, entity: &str, attributes: Row) -> Result<Record> {
        let mut record = Record::new(self.resolver.live_view(entity)?, attributes);
        let mut tx = self.begin().await?;
        let result = application::save(&mut tx, &mut record).await;
        self.finish(tx, result).await?;
        Ok(record)
    }

    /// Write `changes` to a persisted record
    pub async fn update(&self, record: &mut Record, changes: &Row) -> Result<()> {
        let prior = record.clone();
        record.assign(changes);
        let mut tx = self.begin().await?;
        let result = application::save(&mut tx, record).await;
        let result = self.finish(tx, result).await;
        if result.is_err() {
            *record = prior;
        }
        result
    }

    /// Delete a persisted record, returning its last stored state
    pub async fn destroy(&self, record: &Record) -> Result<Row> {
        let mut tx = self.begin().await?;
        let result = tx.delete(&record.view().table, &record.key()).await;
        self.finish(tx, result).await
    }

    pub async fn originate(&self, scope: &TimeScope, entity: &str, attributes: Row) -> Result<Record> {
        let view = self.resolver.live_view(entity)?;
        let time = application::scope_time(&view, scope);
        self.originate_at(entity, time, attributes).await
    }

    pub async fn originate_at(&self, entity: &str, time: Timestamp, attributes: Row) -> Result<Record> {
        let view = self.resolver.live_view(entity)?;
        let mut tx = self.begin().await?;
        let result = application::originate_at(&mut tx, &view, time, attributes).await;
        self.finish(tx, result).await
    }

    pub async fn revise(&self, scope: &TimeScope, record: &mut Record, attributes: &Row) -> Result<Record> {
        let time = application::scope_time(record.view(), scope);
        self.revise_at(record, time, attributes).await
    }

    /// Close `record` at `time` and persist its successor, atomically
    pub async fn revise_at(&self, record: &mut Record, time: Timestamp, attributes: &Row) -> Result<Record> {
        let prior = record.clone();
        let mut tx = self.begin().await?;
        let result = application::revise_at(&mut tx, record, time, attributes).await;
        let result = self.finish(tx, result).await;
        if result.is_err() {
            *record = prior;
        }
        result
    }

    pub async fn inactivate(&self, scope: &TimeScope, record: &mut Record) -> Result<()> {
        let time = application::scope_time(record.view(), scope);
        self.inactivate_at(record, time).await
    }

    pub async fn inactivate_at(&self, record: &mut Record, time: Timestamp) -> Result<()> {
        let prior = record.clone();
        let mut tx = self.begin().await?;
        let result = application::inactivate_at(&mut tx, record, time).await;
        let result = self.finish(tx, result).await;
        if result.is_err() {
            *record = prior;
        }
        result
    }
}
