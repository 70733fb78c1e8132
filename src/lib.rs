//! Transaction execution template
//!
//! Runs a caller-supplied unit of work on one pooled connection inside an explicit
//! transaction: commit on success, rollback on any failure, connection released on every path,
//! and driver failures reported as a single [`DataAccessError`].
//!
//! Statements issued on a connection left in auto-commit mode each commit on their own, so a
//! failure halfway through a multi-statement operation leaves it partially applied.
//! [`TransactionRunner::run`] exists to make such operations atomic.

pub mod config;
pub mod connection;
pub mod error;
pub mod postgres;
pub mod runner;

pub use config::{PoolConfig, DEFAULT_ACQUIRE_TIMEOUT, DEFAULT_POOL_SIZE};
pub use connection::{ConnectionLease, ConnectionSource, ManagedConnection};
pub use error::{
    BoxError, ConfigError, DataAccessError, FailureStage, TransactionError, TransactionResult,
};
pub use postgres::{PgConnectionSource, PgManagedConnection};
pub use runner::{TransactionRunner, TransactionState, UnitOfWorkFuture};
