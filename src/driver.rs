//! The driver seam.
//!
//! Everything wire-level lives behind these traits: how to reach the server,
//! how statements are prepared and executed, how transactions begin and end,
//! and how result rows arrive. The engine only orchestrates.

use async_trait::async_trait;

use crate::error::Result;
use crate::types::{RawValue, TypeOid};

/// A single result row as the driver produced it.
pub type RawRow = Vec<RawValue>;

/// Factory for physical connections. The driver owns its own connection
/// configuration (address, credentials, TLS, ...); the pool only asks it
/// to connect.
#[async_trait]
pub trait Driver: Send + Sync + 'static {
    /// Establish a new physical connection.
    ///
    /// Failures surface as `Error::Connection` from `Pool::acquire` and do
    /// not poison the stripe that requested the connection.
    async fn connect(&self) -> Result<Box<dyn DriverConnection>>;
}

/// One physical connection.
///
/// Used by at most one in-flight transaction attempt at a time; the pool
/// enforces this, so implementations need no internal locking.
#[async_trait]
pub trait DriverConnection: Send {
    /// Register a server-side prepared statement under `handle`.
    async fn prepare(&mut self, handle: &str, text: &str, param_types: &[TypeOid]) -> Result<()>;

    /// Execute a previously prepared statement.
    async fn execute(&mut self, handle: &str, params: &[RawValue]) -> Result<ExecOutcome>;

    /// Open a transaction. `write_access` false asks for a read-only
    /// transaction; the driver is expected to reject mutating statements
    /// run under it.
    async fn begin(&mut self, write_access: bool) -> Result<()>;

    /// End the current transaction: commit when `commit` is true, roll
    /// back otherwise.
    async fn finish(&mut self, commit: bool) -> Result<()>;

    /// Tear down the physical connection.
    async fn close(&mut self) -> Result<()>;
}

/// What an execution produced.
pub enum ExecOutcome {
    /// A row set, fetched lazily in batches.
    Rows(Box<dyn RowBatchSource>),
    /// A command tag row count (INSERT, UPDATE, DELETE, DDL).
    Affected(u64),
}

/// A lazily fetched sequence of row batches.
///
/// Consuming it drives further network fetches on the owning connection.
#[async_trait]
pub trait RowBatchSource: Send {
    /// The next batch of rows, or `None` once the row set is exhausted.
    async fn next_batch(&mut self) -> Result<Option<Vec<RawRow>>>;
}
