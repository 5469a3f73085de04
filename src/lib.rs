//! txkit: client-side execution engine for relational databases.
//!
//! The engine coordinates four things: a striped pool of physical
//! connections, a per-connection prepared-statement cache with monotonic
//! handle assignment, a transaction executor that retries serialization
//! conflicts, and transaction-scoped lazy result streams. Everything
//! wire-level sits behind the [`Driver`] trait; value interpretation sits
//! behind [`RowCodec`].

mod codec;
mod driver;
mod error;
mod executor;
mod pool;
mod statement;
mod stream;
mod types;

#[cfg(test)]
mod mock;

pub use codec::{RawRows, RowCodec};
pub use driver::{Driver, DriverConnection, ExecOutcome, RawRow, RowBatchSource};
pub use error::{Error, Result};
pub use executor::{AccessMode, Executor, Plan, StatementOutput, Transaction, WorkFn};
pub use pool::{Connection, Pool, PoolConfig, PooledConnection, MIN_IDLE_TIMEOUT};
pub use statement::{ParamTypes, Statement, StatementCache, StatementSignature};
pub use stream::RowStream;
pub use types::{RawValue, TypeOid};
