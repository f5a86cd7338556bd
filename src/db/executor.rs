//! Command execution on sqlx pools.
//!
//! [`SqlxConnection`] implements [`DbConnection`] over a shared [`DbPool`]:
//! - Outside a transaction, commands run on the pool
//! - `begin` checks a connection out of the pool into a `Transaction`, which every
//!   command uses until commit or rollback
//! - Row limits are enforced via streaming, only the rows needed for the requested
//!   cardinality are fetched
//! - Every command is bounded by the configured command timeout and the caller's
//!   cancellation token
//!
//! # Architecture
//!
//! The database-specific work lives in the `mysql`, `postgres` and `sqlite` submodules.
//! Each provides the same three operations, generic over the sqlx executor so they run
//! unchanged on a pool or inside a transaction.

use crate::db::macros::dispatch_executor;
use crate::db::params::{Prepared, prepare};
use crate::db::pool::{DbPool, connection_suggestion};
use crate::db::types::RowToJson;
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::models::{Command, Fetch, Row};
use crate::repository::DbConnection;
use async_trait::async_trait;
use futures_util::{StreamExt, TryStreamExt};
use sqlx::{Either, MySql, Postgres, Sqlite, Transaction};
use std::future::Future;
use std::time::Duration;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Database-specific transaction holding its pooled connection.
pub enum DbTransaction {
    MySql(Transaction<'static, MySql>),
    Postgres(Transaction<'static, Postgres>),
    SQLite(Transaction<'static, Sqlite>),
}

impl DbTransaction {
    async fn begin(pool: &DbPool) -> Result<Self, sqlx::Error> {
        Ok(impl_db_dispatch!(pool, {
            MySql(p) => DbTransaction::MySql(p.begin().await?),
            Postgres(p) => DbTransaction::Postgres(p.begin().await?),
            SQLite(p) => DbTransaction::SQLite(p.begin().await?),
        }))
    }

    async fn commit(self) -> Result<(), sqlx::Error> {
        match self {
            DbTransaction::MySql(tx) => tx.commit().await,
            DbTransaction::Postgres(tx) => tx.commit().await,
            DbTransaction::SQLite(tx) => tx.commit().await,
        }
    }

    async fn rollback(self) -> Result<(), sqlx::Error> {
        match self {
            DbTransaction::MySql(tx) => tx.rollback().await,
            DbTransaction::Postgres(tx) => tx.rollback().await,
            DbTransaction::SQLite(tx) => tx.rollback().await,
        }
    }
}

impl std::fmt::Debug for DbTransaction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            DbTransaction::MySql(_) => "MySql",
            DbTransaction::Postgres(_) => "Postgres",
            DbTransaction::SQLite(_) => "SQLite",
        };
        f.debug_tuple("DbTransaction").field(&name).finish()
    }
}

/// A logical connection for one configuration key.
///
/// Dropping a connection with a transaction in progress rolls it back.
#[derive(Debug)]
pub struct SqlxConnection {
    key: String,
    pool: DbPool,
    command_timeout: Duration,
    open: bool,
    transaction: Option<DbTransaction>,
}

impl SqlxConnection {
    pub fn new(key: impl Into<String>, pool: DbPool, command_timeout: Duration) -> Self {
        Self {
            key: key.into(),
            pool,
            command_timeout,
            open: false,
            transaction: None,
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    pub fn pool(&self) -> &DbPool {
        &self.pool
    }

    fn ensure_open(&self) -> DbResult<()> {
        if self.open {
            Ok(())
        } else {
            Err(DbError::invalid_input(format!(
                "Connection '{}' is not open",
                self.key
            )))
        }
    }

    fn prepare<'a>(&self, command: &'a Command) -> DbResult<Prepared<'a>> {
        self.ensure_open()?;
        let prepared = prepare(command, self.pool.db_type())?;
        debug!(
            connection_key = %self.key,
            sql = %prepared.sql,
            params = prepared.values.len(),
            in_transaction = self.transaction.is_some(),
            timeout_secs = self.command_timeout.as_secs(),
            "Executing command"
        );
        Ok(prepared)
    }
}

#[async_trait]
impl DbConnection for SqlxConnection {
    fn is_open(&self) -> bool {
        self.open
    }

    async fn open(&mut self) -> DbResult<()> {
        if self.open {
            return Ok(());
        }

        // Check out and return one connection so failures surface here
        let db_type = self.pool.db_type();
        let checked = impl_db_dispatch!(&self.pool, {
            MySql(p) => p.acquire().await.map(drop),
            Postgres(p) => p.acquire().await.map(drop),
            SQLite(p) => p.acquire().await.map(drop),
        });
        checked.map_err(|e| {
            DbError::connection(
                format!("Failed to open '{}': {}", self.key, e),
                connection_suggestion(db_type, &e),
            )
        })?;

        self.open = true;
        debug!(connection_key = %self.key, "Connection opened");
        Ok(())
    }

    async fn close(&mut self) -> DbResult<()> {
        if let Some(tx) = self.transaction.take() {
            warn!(connection_key = %self.key, "Closing connection with an open transaction, rolling back");
            if let Err(e) = tx.rollback().await {
                warn!(connection_key = %self.key, error = %e, "Rollback on close failed");
            }
        }
        if self.open {
            self.open = false;
            debug!(connection_key = %self.key, "Connection closed");
        }
        Ok(())
    }

    fn in_transaction(&self) -> bool {
        self.transaction.is_some()
    }

    async fn begin(&mut self) -> DbResult<()> {
        self.ensure_open()?;
        if self.transaction.is_some() {
            return Err(DbError::invalid_input(format!(
                "Connection '{}' already has a transaction in progress",
                self.key
            )));
        }
        self.transaction = Some(DbTransaction::begin(&self.pool).await?);
        debug!(connection_key = %self.key, "Transaction started");
        Ok(())
    }

    async fn commit(&mut self) -> DbResult<()> {
        let tx = self.transaction.take().ok_or_else(|| no_transaction(&self.key))?;
        tx.commit().await?;
        debug!(connection_key = %self.key, "Transaction committed");
        Ok(())
    }

    async fn rollback(&mut self) -> DbResult<()> {
        let tx = self.transaction.take().ok_or_else(|| no_transaction(&self.key))?;
        tx.rollback().await?;
        debug!(connection_key = %self.key, "Transaction rolled back");
        Ok(())
    }

    fn abandon_transaction(&mut self) -> bool {
        // Dropping a sqlx transaction queues its rollback on the pooled connection
        let abandoned = self.transaction.take().is_some();
        if abandoned {
            debug!(connection_key = %self.key, "Transaction abandoned");
        }
        abandoned
    }

    async fn execute(&mut self, command: &Command, cancel: &CancellationToken) -> DbResult<u64> {
        let prepared = self.prepare(command)?;
        let timeout = self.command_timeout;
        dispatch_executor!(
            &self.pool,
            self.transaction.as_mut(),
            execute(&prepared) via guarded("execute", timeout, cancel)
        )
    }

    async fn query(
        &mut self,
        command: &Command,
        fetch: Fetch,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<Row>> {
        let prepared = self.prepare(command)?;
        let timeout = self.command_timeout;
        let rows = dispatch_executor!(
            &self.pool,
            self.transaction.as_mut(),
            fetch_rows(&prepared, fetch.row_limit()) via guarded("query", timeout, cancel)
        )?;
        fetch.apply(rows)
    }

    async fn query_multiple(
        &mut self,
        command: &Command,
        cancel: &CancellationToken,
    ) -> DbResult<Vec<Vec<Row>>> {
        let prepared = self.prepare(command)?;
        let timeout = self.command_timeout;
        dispatch_executor!(
            &self.pool,
            self.transaction.as_mut(),
            fetch_sets(&prepared) via guarded("query multiple", timeout, cancel)
        )
    }
}

fn no_transaction(key: &str) -> DbError {
    DbError::invalid_input(format!("Connection '{}' has no transaction in progress", key))
}

/// Run `fut` bounded by `timeout` and `cancel`.
async fn guarded<T, F>(
    operation: &str,
    timeout: Duration,
    cancel: &CancellationToken,
    fut: F,
) -> DbResult<T>
where
    F: Future<Output = Result<T, sqlx::Error>>,
{
    if cancel.is_cancelled() {
        return Err(DbError::cancelled(operation));
    }

    tokio::select! {
        biased;
        _ = cancel.cancelled() => Err(DbError::cancelled(operation)),
        result = tokio::time::timeout(timeout, fut) => match result {
            Ok(result) => result.map_err(DbError::from),
            Err(_) => Err(timeout_error(operation, timeout)),
        },
    }
}

fn timeout_error(operation: &str, timeout: Duration) -> DbError {
    warn!(
        operation = operation,
        timeout_secs = timeout.as_secs(),
        "Command timed out"
    );
    DbError::timeout(operation, timeout.as_secs() as u32)
}

/// Split a `fetch_many` stream into result sets, one per statement result.
///
/// MySQL procedure calls end with a status result, which shows up as a trailing empty set.
async fn split_sets<D, R, S>(mut stream: S) -> Result<Vec<Vec<Row>>, sqlx::Error>
where
    R: RowToJson,
    S: futures_util::Stream<Item = Result<Either<D, R>, sqlx::Error>> + Unpin,
{
    let mut sets = Vec::new();
    let mut current = Vec::new();
    while let Some(item) = stream.try_next().await? {
        match item {
            Either::Left(_) => sets.push(std::mem::take(&mut current)),
            Either::Right(row) => current.push(row.to_row()),
        }
    }
    if !current.is_empty() {
        sets.push(current);
    }
    Ok(sets)
}

pub(crate) mod mysql {
    use super::*;
    use crate::db::params::bind_mysql;
    use sqlx::mysql::MySqlArguments;
    use sqlx::query::Query;

    fn bound<'q>(prepared: &'q Prepared<'_>) -> Query<'q, MySql, MySqlArguments> {
        prepared
            .values
            .iter()
            .fold(sqlx::query(&prepared.sql), |query, binding| bind_mysql(query, *binding))
    }

    pub async fn execute<'c, E>(executor: E, prepared: &Prepared<'_>) -> Result<u64, sqlx::Error>
    where
        E: sqlx::Executor<'c, Database = MySql>,
    {
        let result = if prepared.values.is_empty() {
            executor.execute(prepared.sql.as_str()).await?
        } else {
            executor.execute(bound(prepared)).await?
        };
        Ok(result.rows_affected())
    }

    pub async fn fetch_rows<'c, E>(
        executor: E,
        prepared: &Prepared<'_>,
        limit: usize,
    ) -> Result<Vec<Row>, sqlx::Error>
    where
        E: sqlx::Executor<'c, Database = MySql>,
    {
        let stream = if prepared.values.is_empty() {
            executor.fetch(prepared.sql.as_str())
        } else {
            executor.fetch(bound(prepared))
        };
        let rows: Vec<_> = stream.take(limit).collect().await;
        rows.into_iter().map(|r| r.map(|row| row.to_row())).collect()
    }

    pub async fn fetch_sets<'c, E>(
        executor: E,
        prepared: &Prepared<'_>,
    ) -> Result<Vec<Vec<Row>>, sqlx::Error>
    where
        E: sqlx::Executor<'c, Database = MySql>,
    {
        let stream = if prepared.values.is_empty() {
            executor.fetch_many(prepared.sql.as_str())
        } else {
            executor.fetch_many(bound(prepared))
        };
        split_sets(stream).await
    }
}

pub(crate) mod postgres {
    use super::*;
    use crate::db::params::bind_postgres;
    use sqlx::postgres::PgArguments;
    use sqlx::query::Query;

    fn bound<'q>(prepared: &'q Prepared<'_>) -> Query<'q, Postgres, PgArguments> {
        prepared
            .values
            .iter()
            .fold(sqlx::query(&prepared.sql), |query, binding| bind_postgres(query, *binding))
    }

    pub async fn execute<'c, E>(executor: E, prepared: &Prepared<'_>) -> Result<u64, sqlx::Error>
    where
        E: sqlx::Executor<'c, Database = Postgres>,
    {
        let result = if prepared.values.is_empty() {
            executor.execute(prepared.sql.as_str()).await?
        } else {
            executor.execute(bound(prepared)).await?
        };
        Ok(result.rows_affected())
    }

    pub async fn fetch_rows<'c, E>(
        executor: E,
        prepared: &Prepared<'_>,
        limit: usize,
    ) -> Result<Vec<Row>, sqlx::Error>
    where
        E: sqlx::Executor<'c, Database = Postgres>,
    {
        let stream = if prepared.values.is_empty() {
            executor.fetch(prepared.sql.as_str())
        } else {
            executor.fetch(bound(prepared))
        };
        let rows: Vec<_> = stream.take(limit).collect().await;
        rows.into_iter().map(|r| r.map(|row| row.to_row())).collect()
    }

    pub async fn fetch_sets<'c, E>(
        executor: E,
        prepared: &Prepared<'_>,
    ) -> Result<Vec<Vec<Row>>, sqlx::Error>
    where
        E: sqlx::Executor<'c, Database = Postgres>,
    {
        let stream = if prepared.values.is_empty() {
            executor.fetch_many(prepared.sql.as_str())
        } else {
            executor.fetch_many(bound(prepared))
        };
        split_sets(stream).await
    }
}

pub(crate) mod sqlite {
    use super::*;
    use crate::db::params::bind_sqlite;
    use sqlx::query::Query;
    use sqlx::sqlite::SqliteArguments;

    fn bound<'q>(prepared: &'q Prepared<'_>) -> Query<'q, Sqlite, SqliteArguments<'q>> {
        prepared
            .values
            .iter()
            .fold(sqlx::query(&prepared.sql), |query, binding| bind_sqlite(query, *binding))
    }

    pub async fn execute<'c, E>(executor: E, prepared: &Prepared<'_>) -> Result<u64, sqlx::Error>
    where
        E: sqlx::Executor<'c, Database = Sqlite>,
    {
        let result = if prepared.values.is_empty() {
            executor.execute(prepared.sql.as_str()).await?
        } else {
            executor.execute(bound(prepared)).await?
        };
        Ok(result.rows_affected())
    }

    pub async fn fetch_rows<'c, E>(
        executor: E,
        prepared: &Prepared<'_>,
        limit: usize,
    ) -> Result<Vec<Row>, sqlx::Error>
    where
        E: sqlx::Executor<'c, Database = Sqlite>,
    {
        let stream = if prepared.values.is_empty() {
            executor.fetch(prepared.sql.as_str())
        } else {
            executor.fetch(bound(prepared))
        };
        let rows: Vec<_> = stream.take(limit).collect().await;
        rows.into_iter().map(|r| r.map(|row| row.to_row())).collect()
    }

    pub async fn fetch_sets<'c, E>(
        executor: E,
        prepared: &Prepared<'_>,
    ) -> Result<Vec<Vec<Row>>, sqlx::Error>
    where
        E: sqlx::Executor<'c, Database = Sqlite>,
    {
        let stream = if prepared.values.is_empty() {
            executor.fetch_many(prepared.sql.as_str())
        } else {
            executor.fetch_many(bound(prepared))
        };
        split_sets(stream).await
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_guarded_cancelled_before_start() {
        let cancel = CancellationToken::new();
        cancel.cancel();
        let result: DbResult<u64> =
            guarded("execute", Duration::from_secs(1), &cancel, async { Ok(1) }).await;
        assert!(matches!(result, Err(DbError::Cancelled { .. })));
    }

    #[tokio::test]
    async fn test_guarded_timeout() {
        let cancel = CancellationToken::new();
        let result: DbResult<u64> = guarded("query", Duration::from_millis(10), &cancel, async {
            tokio::time::sleep(Duration::from_secs(5)).await;
            Ok(1)
        })
        .await;
        assert!(matches!(
            result,
            Err(DbError::Timeout { elapsed_secs: 0, .. })
        ));
    }

    #[tokio::test]
    async fn test_guarded_passes_result() {
        let cancel = CancellationToken::new();
        let result = guarded("execute", Duration::from_secs(1), &cancel, async { Ok(7u64) }).await;
        assert_eq!(result.unwrap(), 7);

        let result: DbResult<u64> = guarded("execute", Duration::from_secs(1), &cancel, async {
            Err(sqlx::Error::RowNotFound)
        })
        .await;
        assert!(matches!(result, Err(DbError::NoRows)));
    }
}
