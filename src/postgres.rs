use std::ops::{Deref, DerefMut};

use async_trait::async_trait;
use sqlx::{
    pool::PoolConnection, postgres::PgPoolOptions, Connection as _, Executor as _, PgConnection,
    PgPool, Postgres,
};
use tracing::{instrument, warn};

use crate::{
    config::PoolConfig,
    connection::{ConnectionSource, ManagedConnection},
};

/// [`ConnectionSource`] backed by a sqlx PostgreSQL pool.
#[derive(Debug, Clone)]
pub struct PgConnectionSource {
    pool: PgPool,
}

impl PgConnectionSource {
    /// Set up a connection pool from `config`.
    #[instrument(skip_all, err)]
    pub async fn connect(config: &PoolConfig) -> Result<Self, sqlx::Error> {
        PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(config.acquire_timeout)
            .connect(&config.database_url)
            .await
            .map(Self::from_pool)
    }

    pub fn from_pool(pool: PgPool) -> Self {
        Self { pool }
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }
}

#[async_trait]
impl ConnectionSource for PgConnectionSource {
    type Connection = PgManagedConnection;
    type Error = sqlx::Error;

    async fn acquire(&self) -> Result<Self::Connection, Self::Error> {
        let conn = self.pool.acquire().await?;
        Ok(PgManagedConnection {
            conn,
            manual_commit: false,
        })
    }

    fn release(&self, connection: Self::Connection) {
        if !connection.manual_commit {
            // Dropping a pool connection hands it back to the pool.
            return;
        }

        warn!("closing connection left inside a transaction block");
        let raw = connection.conn.detach();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if let Err(err) = raw.close().await {
                        warn!(error = %err, "failed to close connection");
                    }
                });
            }
            // No runtime to close on; dropping the socket ends the session server side.
            Err(_) => drop(raw),
        }
    }
}

/// A pooled PostgreSQL connection with tracked commit mode.
///
/// Dereferences to [`PgConnection`], so sqlx queries run on it directly:
/// `sqlx::query(..).execute(&mut **conn)`.
#[derive(Debug)]
pub struct PgManagedConnection {
    conn: PoolConnection<Postgres>,
    manual_commit: bool,
}

#[async_trait]
impl ManagedConnection for PgManagedConnection {
    type Error = sqlx::Error;

    /// PostgreSQL sessions auto-commit unless a transaction block is open, so manual mode
    /// opens one with `BEGIN`. Ending the block through [`commit`](Self::commit) or
    /// [`rollback`](Self::rollback) returns the session to auto-commit.
    async fn set_manual_commit(&mut self, manual: bool) -> Result<(), Self::Error> {
        match (self.manual_commit, manual) {
            (false, true) => {
                (&mut *self.conn).execute("BEGIN").await?;
                self.manual_commit = true;
            }
            // Leaving manual mode with pending work commits it.
            (true, false) => self.commit().await?,
            _ => {}
        }
        Ok(())
    }

    fn is_manual_commit(&self) -> bool {
        self.manual_commit
    }

    /// Fails when the transaction block is aborted: the server would otherwise answer `COMMIT`
    /// with a silent `ROLLBACK`.
    async fn commit(&mut self) -> Result<(), Self::Error> {
        if self.manual_commit {
            // Errors with SQLSTATE 25P02 inside an aborted block.
            (&mut *self.conn).execute("SELECT 1").await?;
        }
        (&mut *self.conn).execute("COMMIT").await?;
        self.manual_commit = false;
        Ok(())
    }

    async fn rollback(&mut self) -> Result<(), Self::Error> {
        (&mut *self.conn).execute("ROLLBACK").await?;
        self.manual_commit = false;
        Ok(())
    }
}

impl Deref for PgManagedConnection {
    type Target = PgConnection;

    fn deref(&self) -> &Self::Target {
        &self.conn
    }
}

impl DerefMut for PgManagedConnection {
    fn deref_mut(&mut self) -> &mut Self::Target {
        &mut self.conn
    }
}
