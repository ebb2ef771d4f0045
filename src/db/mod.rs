//! Database abstraction layer.
//!
//! This module provides database access functionality:
//! - Provider capability trait and per-backend connection opening
//! - Connection wrapper running bound statements
//! - Named parameter binding
//! - Type mappings from provider rows to dynamic values
//! - Identity placeholder substitution
//! - Database dispatch macros for reducing code duplication

pub mod connection;
pub mod identity;
#[macro_use]
pub mod macros;
pub mod params;
pub mod provider;
pub mod types;

pub use connection::DbConnection;
pub use identity::{IDENTITY_PLACEHOLDER, IdentitySql, split_identity};
pub use params::{BoundSql, Params, bind_named, prepare};
pub use provider::{MySqlProvider, PostgresProvider, Provider, SqliteProvider, provider_for};
pub use types::RowToValues;
