//! Collaborator traits at the edge of the orchestrator.
//!
//! [`DbConnection`] is the execution capability, [`ConnectionFactory`] hands out fresh
//! connections by configuration key. Both are object safe so repositories can hold them
//! behind `Arc<dyn ...>` / `Box<dyn ...>`.

use crate::config::ConnectionSettings;
use crate::error::DbResult;
use crate::models::{Command, Fetch, Row};
use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::{Mutex, OwnedMutexGuard};
use tokio_util::sync::CancellationToken;

/// A single database connection that can run resolved commands.
///
/// Implementations enforce the requested [`Fetch`] cardinality, typically through
/// [`Fetch::apply`].
#[async_trait]
pub trait DbConnection: Send {
    fn is_open(&self) -> bool;

    async fn open(&mut self) -> DbResult<()>;

    async fn close(&mut self) -> DbResult<()>;

    fn in_transaction(&self) -> bool;

    async fn begin(&mut self) -> DbResult<()>;

    async fn commit(&mut self) -> DbResult<()>;

    async fn rollback(&mut self) -> DbResult<()>;

    /// Give up the transaction in progress without waiting on the server. The rollback
    /// goes out before the connection is used again.
    ///
    /// Returns whether there was a transaction to abandon.
    fn abandon_transaction(&mut self) -> bool;

    /// Run a command and return the number of affected rows.
    async fn execute(&mut self, command: &Command, cancel: &CancellationToken) -> DbResult<u64>;

    async fn query(
        &mut self,
        command: &Command,
        fetch: Fetch,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<Row>>;

    /// Run a command that yields several result sets.
    async fn query_multiple(
        &mut self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<Vec<Row>>>;
}

/// Creates connections for named configurations.
#[async_trait]
pub trait ConnectionFactory: Send + Sync {
    /// A new, not necessarily open, connection for `key`.
    ///
    /// `None` selects the default configuration.
    async fn get_connection(&self, key: Option<&str>) -> DbResult<Box<dyn DbConnection>>;

    fn configurations(&self) -> Vec<ConnectionSettings>;
}

/// Connection shared between a caller (or unit of work) and its repositories.
pub type SharedConnection = Arc<Mutex<Box<dyn DbConnection>>>;

pub fn share(connection: Box<dyn DbConnection>) -> SharedConnection {
    Arc::new(Mutex::new(connection))
}

/// Where a repository obtains its connection.
#[derive(Clone)]
pub enum ConnectionSource {
    /// Supplied by the caller, never closed by the repository
    Supplied(SharedConnection),
    /// Bound to a unit of work's transaction, never closed by the repository
    UnitOfWork(SharedConnection),
    /// A fresh connection per call, closed when the call ends
    Factory(Arc<dyn ConnectionFactory>),
}

impl ConnectionSource {
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Supplied(_) => "supplied",
            Self::UnitOfWork(_) => "unit_of_work",
            Self::Factory(_) => "factory",
        }
    }

    /// Acquire a connection for one call, opening it if needed.
    pub(crate) async fn acquire(&self, key: Option<&str>) -> DbResult<Lease> {
        let mut lease = match self {
            Self::Supplied(conn) | Self::UnitOfWork(conn) => {
                Lease::Borrowed(Arc::clone(conn).lock_owned().await)
            }
            Self::Factory(factory) => Lease::Owned(factory.get_connection(key).await?),
        };

        if !lease.connection().is_open() {
            lease.connection_mut().open().await?;
        }
        Ok(lease)
    }
}

impl std::fmt::Debug for ConnectionSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.kind())
    }
}

/// A connection held for the duration of one call.
pub(crate) enum Lease {
    Borrowed(OwnedMutexGuard<Box<dyn DbConnection>>),
    Owned(Box<dyn DbConnection>),
}

impl Lease {
    pub(crate) fn connection(&self) -> &dyn DbConnection {
        match self {
            Self::Borrowed(guard) => &***guard,
            Self::Owned(conn) => &**conn,
        }
    }

    pub(crate) fn connection_mut(&mut self) -> &mut dyn DbConnection {
        match self {
            Self::Borrowed(guard) => &mut ***guard,
            Self::Owned(conn) => &mut **conn,
        }
    }

    /// Close the connection if this call acquired it. Close failures are logged, not
    /// returned, so they never mask the call's own result.
    pub(crate) async fn release(self) {
        if let Self::Owned(mut conn) = self {
            if let Err(e) = conn.close().await {
                tracing::warn!(error = %e, "Failed to close connection");
            }
        }
    }
}
