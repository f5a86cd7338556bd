//! Unit of work: one transaction shared by several repositories.
//!
//! Repositories handed out by a [`UnitOfWork`] run every call on its transaction-bound
//! connection and never close it. The unit of work closes the connection on
//! commit/rollback when it created the connection itself.

use crate::error::DbResult;
use crate::options::{OptionsRegistry, RepositoryOptions};
use crate::repository::Repository;
use crate::repository::connection::{ConnectionFactory, DbConnection, SharedConnection, share};
use std::sync::Arc;
use tracing::{debug, info, warn};
use uuid::Uuid;

pub struct UnitOfWork {
    id: Uuid,
    connection: SharedConnection,
    owns_connection: bool,
    completed: bool,
}

impl UnitOfWork {
    /// Open a connection from `factory` and begin a transaction on it.
    pub async fn begin(factory: &dyn ConnectionFactory, key: Option<&str>) -> DbResult<Self> {
        let mut connection = factory.get_connection(key).await?;
        if let Err(e) = start(&mut *connection).await {
            close_quietly(&mut *connection).await;
            return Err(e);
        }

        let id = Uuid::new_v4();
        info!(unit_of_work = %id, connection_key = ?key, "Unit of work started");
        Ok(Self {
            id,
            connection: share(connection),
            owns_connection: true,
            completed: false,
        })
    }

    /// Begin using the connection key registered for the unit-of-work type `U`.
    pub async fn begin_for<U: 'static>(
        factory: &dyn ConnectionFactory,
        registry: &OptionsRegistry,
    ) -> DbResult<Self> {
        let options = registry.resolve::<U>()?;
        Self::begin(factory, options.connection_key.as_deref()).await
    }

    /// Begin a transaction on a caller-owned connection. The connection stays open
    /// after commit/rollback.
    pub async fn from_connection(connection: SharedConnection) -> DbResult<Self> {
        {
            let mut guard = connection.lock().await;
            start(&mut **guard).await?;
        }

        let id = Uuid::new_v4();
        info!(unit_of_work = %id, "Unit of work started on supplied connection");
        Ok(Self {
            id,
            connection,
            owns_connection: false,
            completed: false,
        })
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn connection(&self) -> SharedConnection {
        Arc::clone(&self.connection)
    }

    /// A repository bound to this unit of work's transaction.
    pub fn repository(&self, options: Arc<RepositoryOptions>) -> Repository {
        Repository::new(options).with_unit_of_work(self.connection())
    }

    /// A repository for `R`, configured from the registry and bound to this transaction.
    pub fn repository_for<R: 'static>(&self, registry: &OptionsRegistry) -> DbResult<Repository> {
        Ok(Repository::for_type::<R>(registry)?.with_unit_of_work(self.connection()))
    }

    pub async fn commit(mut self) -> DbResult<()> {
        self.completed = true;
        let mut guard = self.connection.lock().await;
        let result = guard.commit().await;
        if self.owns_connection {
            close_quietly(&mut **guard).await;
        }

        match &result {
            Ok(()) => info!(unit_of_work = %self.id, "Unit of work committed"),
            Err(e) => warn!(unit_of_work = %self.id, error = %e, "Unit of work commit failed"),
        }
        result
    }

    pub async fn rollback(mut self) -> DbResult<()> {
        self.completed = true;
        let mut guard = self.connection.lock().await;
        let result = guard.rollback().await;
        if self.owns_connection {
            close_quietly(&mut **guard).await;
        }

        info!(unit_of_work = %self.id, "Unit of work rolled back");
        result
    }
}

impl Drop for UnitOfWork {
    fn drop(&mut self) {
        if self.completed {
            return;
        }

        let id = self.id;
        match Arc::clone(&self.connection).try_lock_owned() {
            Ok(mut guard) => {
                guard.abandon_transaction();
                warn!(
                    unit_of_work = %id,
                    "Unit of work dropped without commit or rollback, transaction rolled back"
                );
            }
            // A call still holds the connection; roll back once it is released
            Err(_) => match tokio::runtime::Handle::try_current() {
                Ok(handle) => {
                    let connection = Arc::clone(&self.connection);
                    handle.spawn(async move {
                        connection.lock().await.abandon_transaction();
                        warn!(
                            unit_of_work = %id,
                            "Unit of work dropped without commit or rollback, transaction rolled back"
                        );
                    });
                }
                Err(_) => warn!(
                    unit_of_work = %id,
                    "Unit of work dropped outside a runtime while its connection was busy, transaction left open"
                ),
            },
        }
    }
}

impl std::fmt::Debug for UnitOfWork {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("UnitOfWork")
            .field("id", &self.id)
            .field("owns_connection", &self.owns_connection)
            .field("completed", &self.completed)
            .finish()
    }
}

async fn start(connection: &mut dyn DbConnection) -> DbResult<()> {
    if !connection.is_open() {
        connection.open().await?;
    }
    connection.begin().await
}

async fn close_quietly(connection: &mut dyn DbConnection) {
    if let Err(e) = connection.close().await {
        warn!(error = %e, "Failed to close unit of work connection");
    } else {
        debug!("Unit of work connection closed");
    }
}
