use std::{fmt, future::Future, pin::Pin, sync::Arc};

use tracing::{debug, instrument, warn};
use uuid::Uuid;

use crate::{
    connection::{ConnectionLease, ConnectionSource, ManagedConnection},
    error::{BoxError, DataAccessError, FailureStage, TransactionError, TransactionResult},
};

/// Future returned by a unit of work, borrowing the connection for `'c`.
pub type UnitOfWorkFuture<'c, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'c>>;

/// Lifecycle of a single [`TransactionRunner::run`] call.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TransactionState {
    Idle,
    Acquired,
    InTransaction,
    Committed,
    RolledBack,
    Released,
}

impl fmt::Display for TransactionState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        fmt::Debug::fmt(self, f)
    }
}

/// Runs units of work inside an explicit transaction on a connection of its own.
///
/// Each call acquires one connection, disables auto-commit, hands the connection to the unit of
/// work, and then commits on success or rolls back on failure. Failures come back as a
/// [`DataAccessError`] carrying the original cause; the connection is released in every case.
///
/// ```rust,no_run
/// use pg_transaction_template::{PgConnectionSource, PoolConfig, TransactionRunner};
///
/// # async fn example() -> Result<(), Box<dyn std::error::Error>> {
/// let source = PgConnectionSource::connect(&PoolConfig::from_env()?).await?;
/// let runner = TransactionRunner::new(source);
///
/// runner
///     .run(|conn| {
///         Box::pin(async move {
///             sqlx::query("UPDATE account SET balance = balance - $1 WHERE id = $2")
///                 .bind(70_i64)
///                 .bind(1_i64)
///                 .execute(&mut **conn)
///                 .await?;
///             sqlx::query("UPDATE account SET balance = balance + $1 WHERE id = $2")
///                 .bind(70_i64)
///                 .bind(2_i64)
///                 .execute(&mut **conn)
///                 .await?;
///             Ok::<_, sqlx::Error>(())
///         })
///     })
///     .await?;
/// # Ok(())
/// # }
/// ```
pub struct TransactionRunner<S> {
    source: Arc<S>,
}

impl<S> Clone for TransactionRunner<S> {
    fn clone(&self) -> Self {
        Self {
            source: Arc::clone(&self.source),
        }
    }
}

impl<S: ConnectionSource> TransactionRunner<S> {
    pub fn new(source: S) -> Self {
        Self::from_shared(Arc::new(source))
    }

    pub fn from_shared(source: Arc<S>) -> Self {
        Self { source }
    }

    pub fn source(&self) -> &S {
        &self.source
    }

    /// Execute `work` as one transaction.
    ///
    /// Returns the value produced by `work` once its effects are committed. Any error means
    /// none of the statements issued by `work` took effect.
    #[instrument(skip_all, fields(run_id = %Uuid::new_v4()), err)]
    pub async fn run<F, T, E>(&self, work: F) -> TransactionResult<T>
    where
        F: for<'c> FnOnce(&'c mut S::Connection) -> UnitOfWorkFuture<'c, T, E> + Send,
        T: Send,
        E: Into<BoxError>,
    {
        debug!(state = %TransactionState::Idle);
        let mut lease = self.lease().await?;
        debug!(state = %TransactionState::Acquired);

        lease
            .set_manual_commit(true)
            .await
            .map_err(|err| DataAccessError::new(FailureStage::Begin, err))?;
        debug!(state = %TransactionState::InTransaction);

        let outcome = match work(&mut *lease).await {
            Ok(value) => lease
                .commit()
                .await
                .map(|()| value)
                .map_err(|err| DataAccessError::new(FailureStage::Commit, err)),
            Err(err) => Err(DataAccessError::new(FailureStage::Statement, err)),
        };

        let (result, ended): (TransactionResult<T>, bool) = match outcome {
            Ok(value) => {
                debug!(state = %TransactionState::Committed);
                (Ok(value), true)
            }
            Err(err) => match lease.rollback().await {
                Ok(()) => {
                    debug!(state = %TransactionState::RolledBack, stage = %err.stage());
                    (Err(err.into()), true)
                }
                Err(rollback_err) => {
                    warn!(error = %rollback_err, cause = %err, "rollback failed");
                    let err = err.with_rollback_failure(Box::new(rollback_err));
                    (Err(err.into()), false)
                }
            },
        };

        // A transaction that could not be ended stays in manual mode so the source closes the
        // connection instead of reusing it.
        if ended {
            if let Err(err) = lease.set_manual_commit(false).await {
                warn!(error = %err, "failed to restore auto-commit");
            }
        }
        drop(lease);
        debug!(state = %TransactionState::Released);

        result
    }

    /// Borrow a connection left in auto-commit mode.
    ///
    /// Every statement issued on it commits on its own: a failure between two related
    /// statements leaves the first one applied. Use [`run`](Self::run) whenever several
    /// statements must succeed or fail together.
    #[instrument(skip_all, err)]
    pub async fn auto_commit(&self) -> TransactionResult<ConnectionLease<'_, S>> {
        self.lease().await
    }

    async fn lease(&self) -> TransactionResult<ConnectionLease<'_, S>> {
        ConnectionLease::acquire(self.source.as_ref())
            .await
            .map_err(|err| TransactionError::ConnectionAcquisition(Box::new(err)))
    }
}
