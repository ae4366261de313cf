//! Row-level execution of a [`VersioningHookDefinition`].
//!
//! These mirror the generated PL/pgSQL bodies. A history row opened by the
//! current transaction is rewritten in place, so a row touched repeatedly
//! within a transaction keeps a single open history row holding its final
//! values; rows opened by earlier transactions are closed at the
//! transaction time instead.

use crate::core::temporal::{TemporalRange, Timestamp};
use crate::core::value::{Row, Value};
use crate::error::Result;
use crate::query::predicate::Predicate;
use crate::schema::hooks::VersioningHookDefinition;
use crate::storage::memory::Workspace;
use tracing::trace;

fn snapshot(hook: &VersioningHookDefinition, row: &Row) -> Row {
    hook.columns
        .iter()
        .map(|c| (c.clone(), row.get(c).clone()))
        .collect()
}

fn source_key(hook: &VersioningHookDefinition, row: &Row) -> Row {
    hook.primary_key
        .iter()
        .map(|c| (c.clone(), row.get(c).clone()))
        .collect()
}

/// Open history row for the source key of `old`, if any
fn open_row(ws: &Workspace, hook: &VersioningHookDefinition, old: &Row) -> Result<Option<Row>> {
    let filter = Predicate::key(&source_key(hook, old)).and(Predicate::open_ended(&hook.system_dimension));
    Ok(ws.select(&hook.history_table, &filter)?.into_iter().next())
}

/// Close `row` at `now`
fn close(ws: &mut Workspace, hook: &VersioningHookDefinition, row: &Row, now: Timestamp) -> Result<()> {
    let mut closed = row.clone();
    if let Some(period) = row.get(&hook.system_dimension).as_range() {
        closed.set(hook.system_dimension.clone(), period.close_at(now)?);
    }
    ws.update_row(&hook.history_table, row, closed.clone())?;
    ws.record_closed(&hook.history_table, closed);
    Ok(())
}

/// Reopen the row this transaction closed for the same source key when it
/// already holds `after`: the transaction's changes cancel out.
fn reopen_if_reverted(
    ws: &mut Workspace,
    hook: &VersioningHookDefinition,
    open: &Row,
    after: &Row,
) -> Result<bool> {
    let key = source_key(hook, open);
    let reverted = ws.take_closed(&hook.history_table, |closed| {
        source_key(hook, closed) == key && snapshot(hook, closed) == *after
    });
    let Some(closed) = reverted else {
        return Ok(false);
    };

    let mut reopened = closed.clone();
    if let Some(period) = closed.get(&hook.system_dimension).as_range() {
        reopened.set(hook.system_dimension.clone(), TemporalRange::from(period.start()));
    }
    trace!(table = %hook.history_table, "Changes reverted; reopening previous history row");
    ws.delete_row(&hook.history_table, open)?;
    ws.update_row(&hook.history_table, &closed, reopened)?;
    Ok(true)
}

pub(crate) fn after_insert(
    ws: &mut Workspace,
    hook: &VersioningHookDefinition,
    new: &Row,
    now: Timestamp,
) -> Result<()> {
    let history = snapshot(hook, new).with(hook.system_dimension.clone(), TemporalRange::from(now));
    trace!(table = %hook.history_table, "Opening history row");
    ws.insert_row(&hook.history_table, history)
}

pub(crate) fn after_update(
    ws: &mut Workspace,
    hook: &VersioningHookDefinition,
    old: &Row,
    new: &Row,
    now: Timestamp,
) -> Result<()> {
    let before = snapshot(hook, old);
    let after = snapshot(hook, new);
    if before == after {
        trace!(table = %hook.source_table, "No mirrored column changed; history untouched");
        return Ok(());
    }

    match open_row(ws, hook, old)? {
        Some(open) if ws.inserted_here(&hook.history_table, &open)? => {
            if reopen_if_reverted(ws, hook, &open, &after)? {
                return Ok(());
            }
            let replaced = after.with(hook.system_dimension.clone(), Value::Range(TemporalRange::from(now)));
            trace!(table = %hook.history_table, "Rewriting history row opened in this transaction");
            ws.update_row(&hook.history_table, &open, replaced)
        }
        Some(open) => {
            close(ws, hook, &open, now)?;
            after_insert(ws, hook, new, now)
        }
        None => after_insert(ws, hook, new, now),
    }
}

pub(crate) fn after_delete(
    ws: &mut Workspace,
    hook: &VersioningHookDefinition,
    old: &Row,
    now: Timestamp,
) -> Result<()> {
    match open_row(ws, hook, old)? {
        Some(open) if ws.inserted_here(&hook.history_table, &open)? => {
            trace!(table = %hook.history_table, "Discarding history row opened in this transaction");
            ws.delete_row(&hook.history_table, &open)
        }
        Some(open) => close(ws, hook, &open, now),
        None => Ok(()),
    }
}
