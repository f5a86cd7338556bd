//! Database dispatch macros for reducing code duplication.
//!
//! The pool and transaction types are per-database enums; these macros generate the
//! repetitive match arms while keeping each call site readable.

/// Generate match arms over `DbPool` variants.
///
/// # Example
///
/// ```ignore
/// impl_db_dispatch!(pool, {
///     MySql(p) => do_mysql(p),
///     Postgres(p) => do_postgres(p),
///     SQLite(p) => do_sqlite(p),
/// });
/// ```
#[macro_export]
macro_rules! impl_db_dispatch {
    ($pool:expr, { $($variant:ident($p:ident) => $body:expr),+ $(,)? }) => {
        match $pool {
            $(
                $crate::db::pool::DbPool::$variant($p) => $body,
            )+
        }
    };
}

/// Run the same per-database operation against the current executor of a connection.
///
/// Inside a transaction the operation runs on the transaction's connection, otherwise on
/// the pool. `$op` names a function present in each of the `mysql`, `postgres` and
/// `sqlite` executor modules taking the executor as its first argument; its future is
/// passed as the last argument to `$wrap` and the result awaited.
///
/// ```ignore
/// dispatch_executor!(&self.pool, self.transaction.as_mut(),
///     execute(&prepared) via guarded("execute", timeout, cancel))
/// ```
macro_rules! dispatch_executor {
    ($pool:expr, $tx:expr, $op:ident($($arg:expr),* $(,)?) via $wrap:ident($($warg:expr),* $(,)?)) => {
        match ($pool, $tx) {
            (_, Some($crate::db::executor::DbTransaction::MySql(tx))) => {
                $wrap($($warg,)* $crate::db::executor::mysql::$op(&mut **tx, $($arg),*)).await
            }
            (_, Some($crate::db::executor::DbTransaction::Postgres(tx))) => {
                $wrap($($warg,)* $crate::db::executor::postgres::$op(&mut **tx, $($arg),*)).await
            }
            (_, Some($crate::db::executor::DbTransaction::SQLite(tx))) => {
                $wrap($($warg,)* $crate::db::executor::sqlite::$op(&mut **tx, $($arg),*)).await
            }
            ($crate::db::pool::DbPool::MySql(pool), None) => {
                $wrap($($warg,)* $crate::db::executor::mysql::$op(pool, $($arg),*)).await
            }
            ($crate::db::pool::DbPool::Postgres(pool), None) => {
                $wrap($($warg,)* $crate::db::executor::postgres::$op(pool, $($arg),*)).await
            }
            ($crate::db::pool::DbPool::SQLite(pool), None) => {
                $wrap($($warg,)* $crate::db::executor::sqlite::$op(pool, $($arg),*)).await
            }
        }
    };
}

pub use impl_db_dispatch;
pub(crate) use dispatch_executor;
