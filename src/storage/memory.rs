//! In-memory relational backend.
//!
//! Transactions work on a private snapshot of the catalog and log their row
//! operations. Commit replays the log onto the latest committed state under
//! a lock, rejects rows another transaction changed first, then checks
//! primary keys, NOT NULL columns and exclusion constraints before
//! publishing. Installed versioning hooks run inside the transaction, right
//! after the row operation that fires them.

use crate::core::temporal::Timestamp;
use crate::core::value::{Row, Value};
use crate::error::{Error, Result};
use crate::query::predicate::Predicate;
use crate::schema::hooks::VersioningHookDefinition;
use crate::schema::migration::SchemaCommand;
use crate::schema::table::TableDefinition;
use crate::storage::clock::{Clock, SystemClock};
use crate::storage::database::{Database, Transaction};
use crate::storage::triggers;
use async_trait::async_trait;
use dashmap::DashMap;
use std::collections::{BTreeMap, BTreeSet, HashSet};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::Mutex;
use tracing::{debug, info, warn};
use uuid::Uuid;

#[derive(Debug, Clone)]
pub(crate) struct Table {
    pub(crate) definition: TableDefinition,
    pub(crate) rows: Vec<Row>,
}

impl Table {
    fn key_of(&self, row: &Row) -> Vec<Value> {
        row.project(&self.definition.primary_key)
    }

    fn position(&self, key: &[Value]) -> Option<usize> {
        self.rows.iter().position(|r| self.key_of(r) == key)
    }

    fn validate(&self) -> Result<()> {
        let name = &self.definition.name;
        for column in self.definition.columns.iter().filter(|c| !c.nullable) {
            if self.rows.iter().any(|r| r.get(&column.name).is_null()) {
                return Err(Error::ConstraintViolation {
                    table: name.clone(),
                    constraint: format!("{}_not_null", column.name),
                    detail: format!("null value in column {}", column.name),
                });
            }
        }

        if !self.definition.primary_key.is_empty() {
            let mut seen = HashSet::new();
            for row in &self.rows {
                let key = self.key_of(row);
                if !seen.insert(key.clone()) {
                    return Err(Error::ConstraintViolation {
                        table: name.clone(),
                        constraint: format!("{name}_pkey"),
                        detail: format!("duplicate key {}", display_key(&key)),
                    });
                }
            }
        }

        for constraint in &self.definition.exclusion_constraints {
            constraint.check(name, &self.rows)?;
        }
        Ok(())
    }
}

fn display_key(key: &[Value]) -> String {
    format!(
        "({})",
        key.iter().map(ToString::to_string).collect::<Vec<_>>().join(", ")
    )
}

/// Tables, hooks, extensions and schemas
#[derive(Debug, Clone, Default)]
pub(crate) struct Catalog {
    tables: BTreeMap<String, Table>,
    hooks: BTreeMap<String, VersioningHookDefinition>,
    extensions: BTreeSet<String>,
    schemas: BTreeSet<String>,
}

impl Catalog {
    pub(crate) fn table(&self, name: &str) -> Result<&Table> {
        self.tables
            .get(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    fn table_mut(&mut self, name: &str) -> Result<&mut Table> {
        self.tables
            .get_mut(name)
            .ok_or_else(|| Error::UnknownTable(name.to_string()))
    }

    pub(crate) fn hook(&self, source_table: &str) -> Option<&VersioningHookDefinition> {
        self.hooks.get(source_table)
    }

    fn apply(&mut self, command: &SchemaCommand) -> Result<()> {
        match command {
            SchemaCommand::EnableExtension(name) => {
                self.extensions.insert(name.clone());
            }
            SchemaCommand::DisableExtension(name) => {
                if name == "btree_gist" {
                    if let Some(table) = self
                        .tables
                        .values()
                        .find(|t| !t.definition.exclusion_constraints.is_empty())
                    {
                        return Err(Error::Schema(format!(
                            "cannot drop extension {name}: exclusion constraint on {} depends on it",
                            table.definition.name
                        )));
                    }
                }
                self.extensions.remove(name);
            }
            SchemaCommand::CreateSchema(name) => {
                if !self.schemas.insert(name.clone()) {
                    return Err(Error::Schema(format!("schema {name} already exists")));
                }
            }
            SchemaCommand::DropSchema(name) => {
                let prefix = format!("{name}.");
                if self.tables.keys().any(|t| t.starts_with(&prefix)) {
                    return Err(Error::Schema(format!("schema {name} is not empty")));
                }
                self.schemas.remove(name);
            }
            SchemaCommand::CreateTable(definition) => {
                definition.validate()?;
                if let Some((schema, _)) = definition.name.rsplit_once('.') {
                    if !self.schemas.contains(schema) {
                        return Err(Error::Schema(format!("schema {schema} does not exist")));
                    }
                }
                if !definition.exclusion_constraints.is_empty()
                    && !self.extensions.contains("btree_gist")
                {
                    return Err(Error::Schema(format!(
                        "{} needs the btree_gist extension for its exclusion constraint",
                        definition.name
                    )));
                }
                if self.tables.contains_key(&definition.name) {
                    return Err(Error::Schema(format!(
                        "relation {} already exists",
                        definition.name
                    )));
                }
                self.tables.insert(
                    definition.name.clone(),
                    Table {
                        definition: definition.clone(),
                        rows: Vec::new(),
                    },
                );
            }
            SchemaCommand::DropTable { name, .. } => {
                if let Some(hook) = self
                    .hooks
                    .values()
                    .find(|h| &h.source_table == name || &h.history_table == name)
                {
                    return Err(Error::Schema(format!(
                        "cannot drop {name}: versioning hook on {} depends on it",
                        hook.source_table
                    )));
                }
                self.tables
                    .remove(name)
                    .ok_or_else(|| Error::UnknownTable(name.clone()))?;
            }
            SchemaCommand::CreateVersioningHook(hook) => {
                let source = self.table(&hook.source_table)?;
                let history = self.table(&hook.history_table)?;
                for column in &hook.columns {
                    if source.definition.column(column).is_none()
                        || history.definition.column(column).is_none()
                    {
                        return Err(Error::Schema(format!(
                            "hook column {column} missing from {} or {}",
                            hook.source_table, hook.history_table
                        )));
                    }
                }
                if self
                    .hooks
                    .insert(hook.source_table.clone(), hook.clone())
                    .is_some()
                {
                    debug!(table = %hook.source_table, "Replacing existing versioning hook");
                }
            }
            SchemaCommand::DropVersioningHook(hook) => {
                self.hooks.remove(&hook.source_table);
            }
        }
        Ok(())
    }
}

#[derive(Debug, Clone)]
enum Op {
    Insert { table: String, row: Row },
    Update { table: String, old: Row, new: Row },
    Delete { table: String, old: Row },
}

/// A catalog plus the operations applied to it
#[derive(Debug)]
pub(crate) struct Workspace {
    catalog: Catalog,
    ops: Vec<Op>,
    touched: BTreeSet<String>,
    /// Keys of rows this transaction inserted, per table
    inserted: HashSet<(String, Vec<Value>)>,
    /// History rows this transaction closed, as they read after closing
    closed: Vec<(String, Row)>,
}

impl Workspace {
    fn new(catalog: Catalog) -> Self {
        Self {
            catalog,
            ops: Vec::new(),
            touched: BTreeSet::new(),
            inserted: HashSet::new(),
            closed: Vec::new(),
        }
    }

    pub(crate) fn catalog(&self) -> &Catalog {
        &self.catalog
    }

    pub(crate) fn insert_row(&mut self, table: &str, row: Row) -> Result<()> {
        let t = self.catalog.table_mut(table)?;
        let key = t.key_of(&row);
        t.rows.push(row.clone());
        self.inserted.insert((table.to_string(), key));
        self.touched.insert(table.to_string());
        self.ops.push(Op::Insert {
            table: table.to_string(),
            row,
        });
        Ok(())
    }

    /// Replace `old` with `new`; `old` must still be the current row image
    pub(crate) fn update_row(&mut self, table: &str, old: &Row, new: Row) -> Result<()> {
        let t = self.catalog.table_mut(table)?;
        let key = t.key_of(old);
        let index = current_position(t, &key, old)?;
        t.rows[index] = new.clone();
        self.touched.insert(table.to_string());
        self.ops.push(Op::Update {
            table: table.to_string(),
            old: old.clone(),
            new,
        });
        Ok(())
    }

    /// Remove `old`; it must still be the current row image
    pub(crate) fn delete_row(&mut self, table: &str, old: &Row) -> Result<()> {
        let t = self.catalog.table_mut(table)?;
        let key = t.key_of(old);
        let index = current_position(t, &key, old)?;
        t.rows.remove(index);
        self.touched.insert(table.to_string());
        self.ops.push(Op::Delete {
            table: table.to_string(),
            old: old.clone(),
        });
        Ok(())
    }

    /// Whether `row` was inserted by this transaction rather than read from
    /// its snapshot
    pub(crate) fn inserted_here(&self, table: &str, row: &Row) -> Result<bool> {
        let key = self.catalog.table(table)?.key_of(row);
        Ok(self.inserted.contains(&(table.to_string(), key)))
    }

    pub(crate) fn record_closed(&mut self, table: &str, row: Row) {
        self.closed.push((table.to_string(), row));
    }

    /// Take back the first row this transaction closed in `table` that
    /// satisfies `wanted`
    pub(crate) fn take_closed(&mut self, table: &str, wanted: impl Fn(&Row) -> bool) -> Option<Row> {
        let index = self
            .closed
            .iter()
            .position(|(t, row)| t == table && wanted(row))?;
        Some(self.closed.remove(index).1)
    }

    pub(crate) fn select(&self, table: &str, filter: &Predicate) -> Result<Vec<Row>> {
        Ok(self
            .catalog
            .table(table)?
            .rows
            .iter()
            .filter(|r| filter.matches(r))
            .cloned()
            .collect())
    }

    fn find_by_key(&self, table: &str, key: &Row) -> Result<Row> {
        let t = self.catalog.table(table)?;
        let wanted: Vec<Value> = t
            .definition
            .primary_key
            .iter()
            .map(|c| key.get(c).clone())
            .collect();
        t.position(&wanted)
            .map(|i| t.rows[i].clone())
            .ok_or_else(|| Error::RowNotFound {
                table: table.to_string(),
                key: display_key(&wanted),
            })
    }

    fn replay(&mut self, op: &Op) -> Result<()> {
        match op {
            Op::Insert { table, row } => self.insert_row(table, row.clone()),
            Op::Update { table, old, new } => self.update_row(table, old, new.clone()),
            Op::Delete { table, old } => self.delete_row(table, old),
        }
    }

    fn validate(&self) -> Result<()> {
        for table in &self.touched {
            self.catalog.table(table)?.validate()?;
        }
        Ok(())
    }
}

fn current_position(table: &Table, key: &[Value], expected: &Row) -> Result<usize> {
    let name = &table.definition.name;
    match table.position(key) {
        Some(i) if &table.rows[i] == expected => Ok(i),
        Some(_) => Err(Error::WriteConflict {
            table: name.clone(),
            detail: format!("row {} was concurrently updated", display_key(key)),
        }),
        None => Err(Error::WriteConflict {
            table: name.clone(),
            detail: format!("row {} was concurrently deleted", display_key(key)),
        }),
    }
}

struct Shared {
    catalog: Mutex<Catalog>,
    /// Sequences are non-transactional, as in PostgreSQL
    sequences: DashMap<String, i64>,
    clock: Arc<dyn Clock>,
    /// Latest transaction time handed out, in nanoseconds
    last_time: AtomicI64,
}

/// In-memory database
#[derive(Clone)]
pub struct MemoryDatabase {
    shared: Arc<Shared>,
}

impl MemoryDatabase {
    pub fn new() -> Self {
        Self::with_clock(Arc::new(SystemClock))
    }

    /// Database whose transaction times come from `clock`
    pub fn with_clock(clock: Arc<dyn Clock>) -> Self {
        Self {
            shared: Arc::new(Shared {
                catalog: Mutex::new(Catalog::default()),
                sequences: DashMap::new(),
                clock,
                last_time: AtomicI64::new(i64::MIN),
            }),
        }
    }

    pub async fn table_exists(&self, name: &str) -> bool {
        self.shared.catalog.lock().await.tables.contains_key(name)
    }

    pub async fn definition(&self, name: &str) -> Result<TableDefinition> {
        Ok(self
            .shared
            .catalog
            .lock()
            .await
            .table(name)?
            .definition
            .clone())
    }

    pub async fn hook(&self, source_table: &str) -> Option<VersioningHookDefinition> {
        self.shared.catalog.lock().await.hook(source_table).cloned()
    }

    /// Committed rows of `table`
    pub async fn rows(&self, name: &str) -> Result<Vec<Row>> {
        Ok(self.shared.catalog.lock().await.table(name)?.rows.clone())
    }

    /// Clock reading for a new transaction, moved past the previous
    /// transaction's time when the clock has not advanced. Distinct
    /// transactions never share a transaction time.
    fn transaction_time(&self) -> Timestamp {
        let now = self.shared.clock.now().as_nanos();
        let next = |last: i64| now.max(last.saturating_add(1));
        let (Ok(last) | Err(last)) = self
            .shared
            .last_time
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |last| Some(next(last)));
        Timestamp::from_nanos(next(last))
    }

    fn next_value(&self, table: &str, column: &str) -> i64 {
        let mut entry = self
            .shared
            .sequences
            .entry(format!("{table}.{column}"))
            .or_insert(0);
        *entry += 1;
        *entry
    }
}

impl Default for MemoryDatabase {
    fn default() -> Self {
        Self::new()
    }
}

#[async_trait]
impl Database for MemoryDatabase {
    type Tx = MemoryTransaction;

    async fn apply(&self, command: &SchemaCommand) -> Result<()> {
        self.shared.catalog.lock().await.apply(command)?;
        debug!(?command, "Applied schema command");
        Ok(())
    }

    async fn begin(&self) -> Result<MemoryTransaction> {
        let snapshot = self.shared.catalog.lock().await.clone();
        let tx = MemoryTransaction {
            id: Uuid::new_v4(),
            commit_time: self.transaction_time(),
            workspace: Workspace::new(snapshot),
            database: self.clone(),
            state: TxState::Active,
        };
        debug!(tx = %tx.id, commit_time = %tx.commit_time, "Began transaction");
        Ok(tx)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum TxState {
    Active,
    /// A statement failed; only rollback is possible
    Aborted,
    Committed,
    RolledBack,
}

/// Snapshot transaction over a [`MemoryDatabase`]
pub struct MemoryTransaction {
    id: Uuid,
    commit_time: Timestamp,
    workspace: Workspace,
    database: MemoryDatabase,
    state: TxState,
}

impl MemoryTransaction {
    fn ensure_active(&self) -> Result<()> {
        match self.state {
            TxState::Active => Ok(()),
            TxState::Aborted => Err(Error::TransactionClosed(format!(
                "{} (aborted by an earlier error)",
                self.id
            ))),
            _ => Err(Error::TransactionClosed(self.id.to_string())),
        }
    }

    /// Run a statement; any failure aborts the whole transaction
    fn statement<T>(&mut self, f: impl FnOnce(&mut Self) -> Result<T>) -> Result<T> {
        self.ensure_active()?;
        let result = f(self);
        if let Err(e) = &result {
            warn!(tx = %self.id, error = %e, "Statement failed; transaction aborted");
            self.state = TxState::Aborted;
        }
        result
    }

    /// Fill defaults and generated keys; reject unknown columns
    fn complete_row(&self, table: &str, mut row: Row) -> Result<Row> {
        let definition = &self.workspace.catalog().table(table)?.definition;
        if let Some(unknown) = row.columns().find(|c| definition.column(c).is_none()) {
            return Err(Error::Schema(format!(
                "column {unknown} of relation {table} does not exist"
            )));
        }
        for column in &definition.columns {
            if !row.get(&column.name).is_null() {
                continue;
            }
            if column.is_serial() {
                row.set(column.name.clone(), self.database.next_value(table, &column.name));
            } else if let Some(default) = &column.default {
                if !row.contains(&column.name) {
                    row.set(column.name.clone(), default.clone());
                }
            } else {
                row.set(column.name.clone(), Value::Null);
            }
        }
        Ok(row)
    }
}

#[async_trait]
impl Transaction for MemoryTransaction {
    fn id(&self) -> Uuid {
        self.id
    }

    fn commit_time(&self) -> Timestamp {
        self.commit_time
    }

    async fn insert(&mut self, table: &str, row: Row) -> Result<Row> {
        self.statement(|tx| {
            let row = tx.complete_row(table, row)?;
            tx.workspace.insert_row(table, row.clone())?;
            if let Some(hook) = tx.workspace.catalog().hook(table).cloned() {
                triggers::after_insert(&mut tx.workspace, &hook, &row, tx.commit_time)?;
            }
            Ok(row)
        })
    }

    async fn update(&mut self, table: &str, key: &Row, changes: &Row) -> Result<Row> {
        self.statement(|tx| {
            let old = tx.workspace.find_by_key(table, key)?;
            let mut new = old.clone();
            new.merge(changes);
            let new = tx.complete_row(table, new)?;
            tx.workspace.update_row(table, &old, new.clone())?;
            if let Some(hook) = tx.workspace.catalog().hook(table).cloned() {
                triggers::after_update(&mut tx.workspace, &hook, &old, &new, tx.commit_time)?;
            }
            Ok(new)
        })
    }

    async fn delete(&mut self, table: &str, key: &Row) -> Result<Row> {
        self.statement(|tx| {
            let old = tx.workspace.find_by_key(table, key)?;
            tx.workspace.delete_row(table, &old)?;
            if let Some(hook) = tx.workspace.catalog().hook(table).cloned() {
                triggers::after_delete(&mut tx.workspace, &hook, &old, tx.commit_time)?;
            }
            Ok(old)
        })
    }

    async fn select(&self, table: &str, filter: &Predicate) -> Result<Vec<Row>> {
        self.ensure_active()?;
        self.workspace.select(table, filter)
    }

    async fn commit(&mut self) -> Result<()> {
        if let Err(e) = self.ensure_active() {
            self.state = TxState::RolledBack;
            return Err(e);
        }

        let mut committed = self.database.shared.catalog.lock().await;
        let mut merged = Workspace::new(committed.clone());
        let outcome = self
            .workspace
            .ops
            .iter()
            .try_for_each(|op| merged.replay(op))
            .and_then(|_| merged.validate());

        match outcome {
            Ok(()) => {
                *committed = merged.catalog;
                self.state = TxState::Committed;
                info!(
                    tx = %self.id,
                    ops = self.workspace.ops.len(),
                    commit_time = %self.commit_time,
                    "Committed transaction"
                );
                Ok(())
            }
            Err(e) => {
                self.state = TxState::RolledBack;
                warn!(tx = %self.id, error = %e, "Commit failed; transaction rolled back");
                Err(e)
            }
        }
    }

    async fn rollback(&mut self) -> Result<()> {
        match self.state {
            TxState::Active | TxState::Aborted => {
                self.state = TxState::RolledBack;
                debug!(tx = %self.id, "Rolled back transaction");
                Ok(())
            }
            _ => Err(Error::TransactionClosed(self.id.to_string())),
        }
    }
}

impl Drop for MemoryTransaction {
    fn drop(&mut self) {
        if matches!(self.state, TxState::Active | TxState::Aborted) && !self.workspace.ops.is_empty() {
            debug!(tx = %self.id, "Dropped open transaction; changes discarded");
        }
    }
}
