//! Application-time revisions.
//!
//! A revision is HEAD while its validity range is open and CLOSED once the
//! range has an end. Only HEAD revisions can be revised or inactivated.
//! Revising closes the current revision at the given time and opens a
//! successor with the same identity and the next version number.
//!
//! The `_at` forms take an explicit time. The bare forms use the scope's
//! binding for the entity's application dimension, falling back to now.
//! Build-only forms (`original`, `revision`) change records in memory; the
//! persisting forms write through the given transaction and restore the
//! record if a write fails.

use crate::core::entity::ApplicationVersioned;
use crate::core::record::Record;
use crate::core::temporal::{TemporalRange, Timestamp};
use crate::core::value::Row;
use crate::core::view::{EntityView, ViewKind};
use crate::error::{Error, Result};
use crate::query::scope::TimeScope;
use crate::storage::database::Transaction;
use std::sync::Arc;
use tracing::{debug, info, warn};

fn application(view: &EntityView) -> Result<&ApplicationVersioned> {
    match (&view.kind, &view.source.application) {
        (ViewKind::Live, Some(app)) => Ok(app),
        (ViewKind::History, _) => Err(Error::Schema(format!(
            "{} is a history view; revisions are written through the live entity",
            view.name
        ))),
        (_, None) => Err(Error::Schema(format!(
            "{} is not application versioned",
            view.name
        ))),
    }
}

/// Ambient time for `view`'s application dimension
pub fn scope_time(view: &EntityView, scope: &TimeScope) -> Timestamp {
    view.application_dimension()
        .and_then(|d| scope.lookup(d))
        .unwrap_or_else(Timestamp::now)
}

fn ensure_head(record: &Record, operation: &str) -> Result<()> {
    if record.is_head() {
        Ok(())
    } else {
        Err(Error::closed_revision(record.entity(), operation))
    }
}

/// Insert a new record or write back a persisted one
pub async fn save<T: Transaction>(tx: &mut T, record: &mut Record) -> Result<()> {
    let table = record.view().table.clone();
    let row = if record.is_persisted() {
        tx.update(&table, &record.key(), record.row()).await?
    } else {
        tx.insert(&table, record.row().clone()).await?
    };
    record.mark_persisted(row);
    Ok(())
}

/// Build version 1 of a new identity, valid from `time`
pub fn original_at(view: &Arc<EntityView>, time: Timestamp, attributes: Row) -> Result<Record> {
    let app = application(view)?;
    let mut row = attributes;
    row.set(app.dimension.clone(), TemporalRange::from(time));
    row.set(app.version_column.clone(), 1i64);
    Ok(Record::new(view.clone(), row))
}

pub fn original(view: &Arc<EntityView>, scope: &TimeScope, attributes: Row) -> Result<Record> {
    original_at(view, scope_time(view, scope), attributes)
}

/// Build and insert version 1 of a new identity
pub async fn originate_at<T: Transaction>(
    tx: &mut T,
    view: &Arc<EntityView>,
    time: Timestamp,
    attributes: Row,
) -> Result<Record> {
    let mut record = original_at(view, time, attributes)?;
    save(tx, &mut record).await?;
    info!(entity = %view.name, identity = ?record.identity(), %time, "Originated revision");
    Ok(record)
}

pub async fn originate<T: Transaction>(
    tx: &mut T,
    scope: &TimeScope,
    view: &Arc<EntityView>,
    attributes: Row,
) -> Result<Record> {
    originate_at(tx, view, scope_time(view, scope), attributes).await
}

/// Close `record` at `time` in memory and build its successor
pub fn revision_at(record: &mut Record, time: Timestamp, attributes: &Row) -> Result<Record> {
    ensure_head(record, "revise")?;
    let view = record.view().clone();
    let app = application(&view)?;
    let closed = match record.range(&app.dimension) {
        Some(range) => range.close_at(time)?,
        None => return Err(Error::closed_revision(record.entity(), "revise")),
    };

    let mut successor = record.row().clone();
    successor.merge(attributes);
    for column in view.identity_key() {
        successor.set(column.clone(), record.get(&column).clone());
    }
    successor.set(app.version_column.clone(), record.version().unwrap_or(0) + 1);
    successor.set(app.dimension.clone(), TemporalRange::from(time));

    let mut next = Record::new(view.clone(), successor);
    next.set_time_tags(record.time_tags().clone());
    record.set(app.dimension.clone(), closed);
    debug!(entity = %view.name, version = ?next.version(), %time, "Built revision");
    Ok(next)
}

pub fn revision(record: &mut Record, scope: &TimeScope, attributes: &Row) -> Result<Record> {
    let time = scope_time(record.view(), scope);
    revision_at(record, time, attributes)
}

async fn write_revision<T: Transaction>(
    tx: &mut T,
    record: &mut Record,
    time: Timestamp,
    attributes: &Row,
) -> Result<Record> {
    let mut next = revision_at(record, time, attributes)?;
    save(tx, record).await?;
    save(tx, &mut next).await?;
    Ok(next)
}

/// Close `record` at `time` and insert its successor in `tx`
pub async fn revise_at<T: Transaction>(
    tx: &mut T,
    record: &mut Record,
    time: Timestamp,
    attributes: &Row,
) -> Result<Record> {
    let prior = record.clone();
    match write_revision(tx, record, time, attributes).await {
        Ok(next) => {
            info!(
                entity = %next.entity(),
                identity = ?next.identity(),
                version = ?next.version(),
                %time,
                "Revised"
            );
            Ok(next)
        }
        Err(e) => {
            warn!(entity = %prior.entity(), error = %e, "Revision failed; record restored");
            *record = prior;
            Err(e)
        }
    }
}

pub async fn revise<T: Transaction>(
    tx: &mut T,
    scope: &TimeScope,
    record: &mut Record,
    attributes: &Row,
) -> Result<Record> {
    let time = scope_time(record.view(), scope);
    revise_at(tx, record, time, attributes).await
}

/// Close `record` at `time` without a successor
pub async fn inactivate_at<T: Transaction>(tx: &mut T, record: &mut Record, time: Timestamp) -> Result<()> {
    ensure_head(record, "inactivate")?;
    let view = record.view().clone();
    let app = application(&view)?;
    let closed = match record.range(&app.dimension) {
        Some(range) => range.close_at(time)?,
        None => return Err(Error::closed_revision(record.entity(), "inactivate")),
    };

    let prior = record.clone();
    record.set(app.dimension.clone(), closed);
    if let Err(e) = save(tx, record).await {
        warn!(entity = %prior.entity(), error = %e, "Inactivation failed; record restored");
        *record = prior;
        return Err(e);
    }
    info!(entity = %view.name, identity = ?record.identity(), %time, "Inactivated");
    Ok(())
}

pub async fn inactivate<T: Transaction>(tx: &mut T, scope: &TimeScope, record: &mut Record) -> Result<()> {
    let time = scope_time(record.view(), scope);
    inactivate_at(tx, record, time).await
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::VersioningConfig;
    use crate::core::entity::{EntityRegistry, EntitySchema};
    use crate::core::value::Value;
    use crate::schema::migration::{create_table, SchemaCommand, TableOptions};
    use crate::storage::database::Database;
    use crate::storage::memory::MemoryDatabase;

    fn ts(secs: i64) -> Timestamp {
        Timestamp::from_secs(secs)
    }

    async fn setup() -> (MemoryDatabase, Arc<EntityView>) {
        let db = MemoryDatabase::new();
        db.apply(&SchemaCommand::EnableExtension("btree_gist".into()))
            .await
            .unwrap();
        let commands = create_table(
            &VersioningConfig::default(),
            "authors",
            &TableOptions::application_versioned(),
            |t| {
                t.string("name");
            },
        )
        .unwrap();
        db.apply_all(&commands).await.unwrap();

        let mut registry = EntityRegistry::new();
        let author = registry
            .register(EntitySchema::new("Author", "authors").application_versioned())
            .unwrap();
        (db, Arc::new(EntityView::live(&registry, author)))
    }

    #[tokio::test]
    async fn test_revise_closes_and_opens() {
        let (db, view) = setup().await;
        let mut tx = db.begin().await.unwrap();
        let mut v1 = originate_at(&mut tx, &view, ts(0), Row::new().with("name", "Bob"))
            .await
            .unwrap();
        let v2 = revise_at(&mut tx, &mut v1, ts(1), &Row::new().with("name", "Sam"))
            .await
            .unwrap();
        tx.commit().await.unwrap();

        assert_eq!(v1.range("validity"), Some(&TemporalRange::between(ts(0), ts(1)).unwrap()));
        assert_eq!(v2.range("validity"), Some(&TemporalRange::from(ts(1))));
        assert_eq!(v2.version(), Some(2));
        assert_eq!(v2.get("id"), v1.get("id"));
        assert_eq!(v2.get("name"), &Value::from("Sam"));
        assert!(!v1.is_head());
        assert!(v2.is_head());
        assert_eq!(db.rows("authors").await.unwrap().len(), 2);
    }

    #[tokio::test]
    async fn test_closed_revision_is_rejected() {
        let (db, view) = setup().await;
        let mut tx = db.begin().await.unwrap();
        let mut v1 = originate_at(&mut tx, &view, ts(0), Row::new()).await.unwrap();
        inactivate_at(&mut tx, &mut v1, ts(5)).await.unwrap();

        for time in [ts(1), ts(5), ts(100)] {
            let err = revise_at(&mut tx, &mut v1, time, &Row::new()).await.unwrap_err();
            assert!(matches!(err, Error::ClosedRevision { .. }));
            assert!(matches!(
                revision_at(&mut v1, time, &Row::new()),
                Err(Error::ClosedRevision { .. })
            ));
            assert!(matches!(
                inactivate_at(&mut tx, &mut v1, time).await,
                Err(Error::ClosedRevision { .. })
            ));
        }
        assert_eq!(
            Error::closed_revision("Author", "revise").to_string(),
            "Cannot revise closed version of Author"
        );
    }

    #[tokio::test]
    async fn test_build_only_revision_leaves_storage_untouched() {
        let (db, view) = setup().await;
        let mut tx = db.begin().await.unwrap();
        let mut v1 = originate_at(&mut tx, &view, ts(0), Row::new()).await.unwrap();
        tx.commit().await.unwrap();

        let v2 = revision_at(&mut v1, ts(3), &Row::new().with("name", "x")).unwrap();
        assert!(!v2.is_persisted());
        assert_eq!(v1.range("validity").and_then(|r| r.end()), Some(ts(3)));
        let stored = db.rows("authors").await.unwrap();
        assert_eq!(stored.len(), 1);
        assert!(stored[0].get("validity").as_range().unwrap().is_open());
    }

    #[tokio::test]
    async fn test_failed_revise_restores_record() {
        let (db, view) = setup().await;
        let mut tx = db.begin().await.unwrap();
        let mut v1 = originate_at(&mut tx, &view, ts(10), Row::new()).await.unwrap();

        // A revision time before the revision's start cannot close it
        let err = revise_at(&mut tx, &mut v1, ts(5), &Row::new()).await.unwrap_err();
        assert!(matches!(err, Error::Schema(_)));
        assert!(v1.is_head());
        assert_eq!(v1.range("validity"), Some(&TemporalRange::from(ts(10))));
    }

    #[tokio::test]
    async fn test_scope_time_drives_bare_forms() {
        let (db, view) = setup().await;
        let mut scope = TimeScope::new();
        let guard = scope.push([("validity", ts(42))]);
        let mut tx = db.begin().await.unwrap();
        let record = originate(&mut tx, &guard, &view, Row::new()).await.unwrap();
        assert_eq!(record.range("validity"), Some(&TemporalRange::from(ts(42))));

        let built = original(&view, &TimeScope::new(), Row::new()).unwrap();
        assert!(built.range("validity").unwrap().start() > ts(42));
    }
}
