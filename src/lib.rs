//! Provider-agnostic data-access core.
//!
//! This library runs SQL against PostgreSQL, MySQL and SQLite through one
//! façade: named `@parameters`, bounded retry of transient failures, typed
//! row mapping, identity retrieval and explicit transaction scopes.

pub mod blocking;
pub mod config;
pub mod db;
pub mod driver;
pub mod error;
pub mod factory;
pub mod mapping;
pub mod models;
pub mod retry;
pub mod sql_builder;
pub mod transaction;

pub use blocking::{BlockingDriver, BlockingTransactionScope};
pub use config::Config;
pub use db::{IDENTITY_PLACEHOLDER, Params};
pub use driver::Driver;
pub use error::{DbError, DbResult};
pub use factory::{DriverFactory, DriverRegistration, ServiceContext};
pub use mapping::{Field, Record, RowMap, map_row, map_rows};
pub use models::{CommandOutcome, DatabaseType, FromValue, IsolationLevel, TransactionState, Value};
pub use retry::{FailureKind, RetryPolicy, is_transient};
pub use transaction::TransactionScope;
