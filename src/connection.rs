use async_trait::async_trait;
use std::ops::{Deref, DerefMut};

/// A database session handed out by a [`ConnectionSource`].
///
/// Statements are executed through the driver's own API on the concrete connection type;
/// this trait only covers the commit-mode contract the transaction template relies on.
#[async_trait]
pub trait ManagedConnection: Send {
    type Error: std::error::Error + Send + Sync + 'static;

    /// Switch between manual commit (`true`) and the driver default of auto-commit (`false`).
    async fn set_manual_commit(&mut self, manual: bool) -> Result<(), Self::Error>;

    /// Whether the session currently holds an open manual-commit transaction.
    fn is_manual_commit(&self) -> bool;

    async fn commit(&mut self) -> Result<(), Self::Error>;

    async fn rollback(&mut self) -> Result<(), Self::Error>;
}

/// Supplies connections on demand and takes them back on release.
#[async_trait]
pub trait ConnectionSource: Send + Sync {
    type Connection: ManagedConnection;
    type Error: std::error::Error + Send + Sync + 'static;

    async fn acquire(&self) -> Result<Self::Connection, Self::Error>;

    /// Take a connection back.
    ///
    /// A connection still in manual commit mode must be closed rather than reused.
    fn release(&self, connection: Self::Connection);
}

/// Scoped ownership of one connection.
///
/// The connection goes back to its source exactly once, when the lease is dropped, whatever
/// path the caller took to get there.
pub struct ConnectionLease<'a, S: ConnectionSource + ?Sized> {
    source: &'a S,
    connection: Option<S::Connection>,
}

impl<'a, S: ConnectionSource + ?Sized> ConnectionLease<'a, S> {
    /// Acquire a connection from `source` for the lifetime of the returned lease.
    pub async fn acquire(source: &'a S) -> Result<Self, S::Error> {
        let connection = source.acquire().await?;
        Ok(Self {
            source,
            connection: Some(connection),
        })
    }
}

impl<S: ConnectionSource + ?Sized> Deref for ConnectionLease<'_, S> {
    type Target = S::Connection;

    fn deref(&self) -> &Self::Target {
        // Only emptied in `drop`.
        self.connection.as_ref().unwrap_or_else(|| unreachable!())
    }
}

impl<S: ConnectionSource + ?Sized> DerefMut for ConnectionLease<'_, S> {
    fn deref_mut(&mut self) -> &mut Self::Target {
        self.connection.as_mut().unwrap_or_else(|| unreachable!())
    }
}

impl<S: ConnectionSource + ?Sized> Drop for ConnectionLease<'_, S> {
    fn drop(&mut self) {
        if let Some(connection) = self.connection.take() {
            if connection.is_manual_commit() {
                tracing::warn!("releasing connection with an unfinished transaction");
            }
            self.source.release(connection);
            tracing::debug!("connection released");
        }
    }
}
