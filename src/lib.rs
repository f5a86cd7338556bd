//! routinekit
//!
//! A repository and unit-of-work layer for relational databases. Application code calls
//! routines by simple name; routinekit applies naming conventions, marshals fields into
//! driver parameters, runs the call on sqlx pools (PostgreSQL, MySQL, SQLite) and decodes
//! rows with serde.

pub mod config;
pub mod convention;
pub mod db;
pub mod error;
pub mod marshal;
pub mod models;
pub mod options;
pub mod repository;

pub use config::Config;
pub use db::SqlxConnectionFactory;
pub use error::{DbError, DbResult};
pub use options::{OptionsRegistry, RepositoryOptions};
pub use repository::{MultipleResults, Repository, RoutineCall, Statement, UnitOfWork};
