//! sqlx-backed connection layer.
//!
//! This module provides the database implementation of the repository's collaborator
//! traits:
//! - Connection pool management per configuration key
//! - Command execution with timeouts, cancellation and streaming row limits
//! - Placeholder rewriting and parameter binding
//! - Row decoding into JSON rows
//! - Database dispatch macros for reducing code duplication

pub mod executor;
#[macro_use]
pub mod macros;
pub mod params;
pub mod pool;
pub mod types;

pub use executor::{DbTransaction, SqlxConnection};
pub use params::{PlaceholderStyle, Prepared, prepare};
pub use pool::{DbPool, SqlxConnectionFactory};
