//! Host database seam: schema application and transactional row access.
//!
//! The versioning engine issues every mutation and query through these
//! traits. Atomicity, isolation and constraint enforcement belong to the
//! implementation; the engine never locks or retries on its own.

use crate::core::temporal::Timestamp;
use crate::core::value::Row;
use crate::error::Result;
use crate::query::predicate::Predicate;
use crate::schema::migration::SchemaCommand;
use async_trait::async_trait;
use uuid::Uuid;

/// A relational database able to apply schema commands and open transactions
#[async_trait]
pub trait Database: Send + Sync {
    type Tx: Transaction;

    /// Apply a single schema command
    async fn apply(&self, command: &SchemaCommand) -> Result<()>;

    /// Apply commands in order, stopping at the first failure
    async fn apply_all(&self, commands: &[SchemaCommand]) -> Result<()> {
        for command in commands {
            self.apply(command).await?;
        }
        Ok(())
    }

    /// Open a transaction. Its commit time is fixed here and shared by
    /// every mutation it performs.
    async fn begin(&self) -> Result<Self::Tx>;
}

/// A unit of work. Dropping an uncommitted transaction rolls it back.
#[async_trait]
pub trait Transaction: Send + Sync {
    fn id(&self) -> Uuid;

    /// Transaction time used for every system period this transaction writes
    fn commit_time(&self) -> Timestamp;

    /// Insert a row, returning it with defaults and generated keys filled in
    async fn insert(&mut self, table: &str, row: Row) -> Result<Row>;

    /// Apply `changes` to the row identified by `key`, returning the new row
    async fn update(&mut self, table: &str, key: &Row, changes: &Row) -> Result<Row>;

    /// Delete the row identified by `key`, returning its last state
    async fn delete(&mut self, table: &str, key: &Row) -> Result<Row>;

    /// Rows of `table` matching `filter`, in insertion order
    async fn select(&self, table: &str, filter: &Predicate) -> Result<Vec<Row>>;

    async fn commit(&mut self) -> Result<()>;

    async fn rollback(&mut self) -> Result<()>;
}
