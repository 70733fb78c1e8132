use std::fmt;

/// Boxed driver-level failure carried as the cause of a [`DataAccessError`].
pub type BoxError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Step of a managed transaction at which the original failure happened.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureStage {
    /// Switching the connection to manual commit mode failed.
    Begin,
    /// A statement issued by the unit of work failed.
    Statement,
    /// The unit of work succeeded but the commit itself failed.
    Commit,
}

impl fmt::Display for FailureStage {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FailureStage::Begin => f.write_str("transaction begin"),
            FailureStage::Statement => f.write_str("statement execution"),
            FailureStage::Commit => f.write_str("transaction commit"),
        }
    }
}

/// Uniform error for a transaction that did not take effect.
///
/// Always carries the underlying failure as its cause. When the rollback that followed the
/// failure also failed, that error is kept as well but never replaces the cause.
#[derive(Debug, thiserror::Error)]
#[error("{stage} failed, {outcome}: {source}", outcome = outcome(.stage, .rollback_failure))]
pub struct DataAccessError {
    stage: FailureStage,
    #[source]
    source: BoxError,
    rollback_failure: Option<BoxError>,
}

fn outcome(stage: &FailureStage, rollback_failure: &Option<BoxError>) -> &'static str {
    match (stage, rollback_failure) {
        (FailureStage::Begin, _) => "transaction not started",
        (_, Some(_)) => "rollback also failed",
        (_, None) => "transaction rolled back",
    }
}

impl DataAccessError {
    pub(crate) fn new(stage: FailureStage, source: impl Into<BoxError>) -> Self {
        Self {
            stage,
            source: source.into(),
            rollback_failure: None,
        }
    }

    pub(crate) fn with_rollback_failure(mut self, err: BoxError) -> Self {
        self.rollback_failure = Some(err);
        self
    }

    pub fn stage(&self) -> FailureStage {
        self.stage
    }

    /// The failure that aborted the transaction.
    pub fn cause(&self) -> &(dyn std::error::Error + Send + Sync + 'static) {
        self.source.as_ref()
    }

    /// Downcasts the cause to a concrete driver error type.
    pub fn downcast_ref<E: std::error::Error + 'static>(&self) -> Option<&E> {
        self.source.downcast_ref::<E>()
    }

    /// Error raised by the rollback after the original failure, if any.
    pub fn rollback_failure(&self) -> Option<&(dyn std::error::Error + Send + Sync + 'static)> {
        self.rollback_failure.as_deref()
    }

    pub fn into_cause(self) -> BoxError {
        self.source
    }
}

/// Error returned by [`TransactionRunner`](crate::TransactionRunner) operations.
#[derive(Debug, thiserror::Error)]
pub enum TransactionError {
    /// No connection could be obtained; the unit of work was never invoked.
    #[error("Connection acquisition failed: {0}")]
    ConnectionAcquisition(#[source] BoxError),

    #[error(transparent)]
    DataAccess(#[from] DataAccessError),
}

impl TransactionError {
    /// Returns the data access error when the transaction was started but did not take effect.
    pub fn as_data_access(&self) -> Option<&DataAccessError> {
        match self {
            TransactionError::DataAccess(err) => Some(err),
            TransactionError::ConnectionAcquisition(_) => None,
        }
    }
}

/// Result type for transaction template operations
pub type TransactionResult<T> = Result<T, TransactionError>;

/// Errors raised while loading [`PoolConfig`](crate::PoolConfig).
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("Missing required setting {0}")]
    Missing(&'static str),

    #[error("Invalid value {value:?} for {key}")]
    Invalid { key: &'static str, value: String },
}
