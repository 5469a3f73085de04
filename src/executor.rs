//! Transaction executor.
//!
//! Acquires a connection, runs a unit of work against it, and puts the
//! connection back on every exit path. The shape of the unit of work
//! decides the execution path statically: a single statement runs directly
//! with no transaction wrapper, a closure of several statements always runs
//! between begin and finish. Conflict-class failures restart the wrapped
//! path from scratch; the retry is unbounded and silent because conflicts
//! are expected to be transient under the driver's isolation model.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use futures::future::BoxFuture;
use tracing::debug;

use crate::codec::RowCodec;
use crate::driver::{ExecOutcome, RawRow};
use crate::error::Result;
use crate::pool::{Connection, Pool, PooledConnection};
use crate::statement::Statement;
use crate::stream::RowStream;

// ============================================================================
// Access Mode
// ============================================================================

/// Requested transaction mode, passed through to the driver's begin.
///
/// The engine does not police statements against the mode: a mutating
/// statement run under `ReadOnly` is rejected by the driver, and that
/// rejection surfaces unchanged.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    ReadOnly,
    ReadWrite,
}

impl AccessMode {
    pub fn write_access(self) -> bool {
        matches!(self, AccessMode::ReadWrite)
    }
}

// ============================================================================
// Unit of Work
// ============================================================================

/// A multi-statement unit of work. Must be re-runnable: the executor calls
/// it again from scratch after a conflict rollback.
pub type WorkFn<T> = Box<
    dyn for<'c, 't> Fn(&'t mut Transaction<'c>) -> BoxFuture<'t, Result<T>> + Send + Sync,
>;

/// What a single directly-executed statement produced.
#[derive(Debug, PartialEq)]
pub enum StatementOutput {
    /// Row count reported by the driver for a command.
    Affected(u64),
    /// All rows of a row-returning statement, collected eagerly; there is
    /// no open transaction to scope a lazy stream to on the direct path.
    Rows(Vec<RawRow>),
}

impl StatementOutput {
    pub fn rows_affected(&self) -> u64 {
        match self {
            StatementOutput::Affected(count) => *count,
            StatementOutput::Rows(rows) => rows.len() as u64,
        }
    }
}

/// A unit of work, shaped so the executor can tell statically whether it
/// needs a transaction wrapper.
pub enum Plan<T> {
    /// One statement: runs on the direct path, no begin/finish issued.
    Statement(Statement, fn(StatementOutput) -> T),
    /// Several statements: always wrapped in begin/finish with conflict
    /// retry.
    Transaction(WorkFn<T>),
}

impl Plan<StatementOutput> {
    pub fn statement(statement: Statement) -> Self {
        Plan::Statement(statement, std::convert::identity)
    }
}

impl<T> Plan<T> {
    pub fn transaction<F>(work: F) -> Self
    where
        F: for<'c, 't> Fn(&'t mut Transaction<'c>) -> BoxFuture<'t, Result<T>>
            + Send
            + Sync
            + 'static,
    {
        Plan::Transaction(Box::new(work))
    }
}

// ============================================================================
// Executor
// ============================================================================

/// Runs units of work against pooled connections.
#[derive(Clone)]
pub struct Executor {
    pool: Pool,
}

impl Executor {
    pub fn new(pool: Pool) -> Self {
        Self { pool }
    }

    /// Run a unit of work. The connection is released back to the pool on
    /// every exit path, including propagated errors and cancellation.
    pub async fn run<T: Send>(&self, access: AccessMode, plan: Plan<T>) -> Result<T> {
        let mut pooled = self.pool.acquire().await?;
        match plan {
            Plan::Statement(statement, into) => direct(&mut pooled, &statement).await.map(into),
            Plan::Transaction(work) => wrapped(&mut pooled, access, work.as_ref()).await,
        }
    }

    /// Run one statement on the direct path.
    pub async fn execute(
        &self,
        access: AccessMode,
        statement: Statement,
    ) -> Result<StatementOutput> {
        self.run(access, Plan::statement(statement)).await
    }

    /// Run a multi-statement unit of work inside a transaction.
    pub async fn transact<T, F>(&self, access: AccessMode, work: F) -> Result<T>
    where
        T: Send,
        F: for<'c, 't> Fn(&'t mut Transaction<'c>) -> BoxFuture<'t, Result<T>>
            + Send
            + Sync
            + 'static,
    {
        self.run(access, Plan::transaction(work)).await
    }

    pub fn pool(&self) -> &Pool {
        &self.pool
    }
}

// ============================================================================
// Transaction
// ============================================================================

/// Capability to run statements inside one transaction attempt.
///
/// Bound to the connection for the duration of the attempt; a retry gets a
/// fresh one (with a fresh liveness flag) on the same connection.
pub struct Transaction<'c> {
    conn: &'c mut Connection,
    live: Arc<AtomicBool>,
    access: AccessMode,
}

impl Transaction<'_> {
    pub fn access(&self) -> AccessMode {
        self.access
    }

    /// Execute a statement and return its row count. A row-returning
    /// statement is drained and reported by its row count; use `query` for
    /// the rows themselves.
    pub async fn execute(&mut self, statement: &Statement) -> Result<u64> {
        match run_statement(self.conn, statement).await? {
            ExecOutcome::Affected(count) => Ok(count),
            ExecOutcome::Rows(mut source) => {
                let mut count = 0u64;
                while let Some(batch) = source.next_batch().await? {
                    count += batch.len() as u64;
                }
                Ok(count)
            }
        }
    }

    /// Execute a row-returning statement and stream its rows through the
    /// codec. The stream is valid only while this transaction attempt is
    /// open. A statement without a row set yields an empty stream.
    pub async fn query<C: RowCodec>(
        &mut self,
        statement: &Statement,
        codec: C,
    ) -> Result<RowStream<C>> {
        match run_statement(self.conn, statement).await? {
            ExecOutcome::Rows(source) => Ok(RowStream::new(source, codec, Arc::clone(&self.live))),
            ExecOutcome::Affected(_) => Ok(RowStream::empty(codec, Arc::clone(&self.live))),
        }
    }

    /// Execute a row-returning statement and collect all decoded rows.
    pub async fn fetch_all<C: RowCodec>(
        &mut self,
        statement: &Statement,
        codec: C,
    ) -> Result<Vec<C::Row>> {
        let mut stream = self.query(statement, codec).await?;
        let mut rows = Vec::new();
        while let Some(row) = stream.next().await? {
            rows.push(row);
        }
        Ok(rows)
    }
}

// ============================================================================
// Execution paths
// ============================================================================

/// Resolve a statement against the connection's cache and execute it.
///
/// On a miss the candidate handle is prepared and executed; the handle is
/// persisted only when both succeed and the statement is cacheable, keeping
/// the cache honest about what the server has confirmed.
pub(crate) async fn run_statement(
    conn: &mut Connection,
    statement: &Statement,
) -> Result<ExecOutcome> {
    let signature = statement.signature();
    let Connection { driver, cache, .. } = conn;

    let text = statement.text.clone();
    let param_types = statement.param_types.clone();
    let miss_params = statement.params.clone();
    let hit_params = statement.params.clone();
    let persist = statement.cacheable;

    cache
        .resolve(
            signature,
            driver.as_mut(),
            move |drv, handle| {
                Box::pin(async move {
                    drv.prepare(&handle, &text, &param_types).await?;
                    let outcome = drv.execute(&handle, &miss_params).await?;
                    Ok((persist, outcome))
                })
            },
            move |drv, handle| Box::pin(async move { drv.execute(&handle, &hit_params).await }),
        )
        .await
}

/// Direct path: one statement, no begin/finish.
async fn direct(pooled: &mut PooledConnection, statement: &Statement) -> Result<StatementOutput> {
    let conn = pooled.connection()?;
    match run_statement(conn, statement).await? {
        ExecOutcome::Affected(count) => Ok(StatementOutput::Affected(count)),
        ExecOutcome::Rows(mut source) => {
            let mut rows = Vec::new();
            while let Some(batch) = source.next_batch().await? {
                rows.extend(batch);
            }
            Ok(StatementOutput::Rows(rows))
        }
    }
}

/// Wrapped path: begin, run the work, finish; restart from scratch on a
/// conflict. Every non-conflict error rolls back before propagating.
async fn wrapped<T>(
    pooled: &mut PooledConnection,
    access: AccessMode,
    work: &(dyn for<'c, 't> Fn(&'t mut Transaction<'c>) -> BoxFuture<'t, Result<T>> + Send + Sync),
) -> Result<T> {
    loop {
        let conn = pooled.connection()?;
        conn.driver.begin(access.write_access()).await?;
        conn.open_transaction = true;

        let live = Arc::new(AtomicBool::new(true));
        let outcome = {
            let mut tx = Transaction {
                conn: &mut *conn,
                live: Arc::clone(&live),
                access,
            };
            work(&mut tx).await
        };
        // The attempt stops accepting reads the moment the work returns;
        // any stream that escaped it is now dead.
        live.store(false, Ordering::SeqCst);

        match outcome {
            Ok(value) => match conn.driver.finish(true).await {
                Ok(()) => {
                    conn.open_transaction = false;
                    return Ok(value);
                }
                // A retry needs a clean connection: if the rollback itself
                // fails, that failure propagates instead of looping.
                Err(error) if error.is_conflict() => rollback(conn).await?,
                Err(error) => {
                    rollback_quietly(conn).await;
                    return Err(error);
                }
            },
            Err(error) if error.is_conflict() => rollback(conn).await?,
            Err(error) => {
                rollback_quietly(conn).await;
                return Err(error);
            }
        }
    }
}

/// Roll back the open transaction attempt.
async fn rollback(conn: &mut Connection) -> Result<()> {
    conn.driver.finish(false).await?;
    conn.open_transaction = false;
    Ok(())
}

/// Roll back without masking the error that got us here. A rollback failure
/// is a secondary event: logged, and the connection stays marked dirty so
/// the pool's release path deals with it.
async fn rollback_quietly(conn: &mut Connection) {
    if let Err(error) = rollback(conn).await {
        debug!(%error, "rollback after failed transaction attempt also failed");
    }
}
