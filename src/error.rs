//! Error types for the data-access core.
//!
//! Every failure a caller can observe is a [`DbError`]. Provider errors coming
//! out of `sqlx` are normalized at the boundary where a connection or
//! transaction is owned, so callers never have to match on driver-specific
//! error types. The original `sqlx::Error` stays reachable through
//! [`std::error::Error::source`].

use crate::models::DatabaseType;
use crate::retry::FailureKind;
use sqlx::error::DatabaseError;
use std::borrow::Cow;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum DbError {
    #[error("Configuration error: {message}")]
    Configuration { message: String },

    #[error("Database '{name}' is not registered: {hint}")]
    DriverNotFound { name: String, hint: String },

    #[error("Missing value for parameter '@{name}'")]
    Parameter { name: String },

    #[error("Database error: {message}")]
    Execution {
        /// Provider error kind name, used for transient classification.
        kind: String,
        /// e.g., "23505" for a PostgreSQL unique violation
        code: Option<String>,
        message: String,
        suggestion: String,
        #[source]
        source: sqlx::Error,
    },

    #[error("Mapping error: {message} (column: {column})")]
    Mapping { message: String, column: String },

    #[error("Transaction error: {message} (transaction: {transaction_id})")]
    Transaction {
        message: String,
        transaction_id: String,
    },

    #[error("Internal error: {message}")]
    Internal { message: String },
}

impl DbError {
    /// Create a configuration error.
    pub fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    /// Create an error for an unregistered logical database name.
    pub fn driver_not_found(name: impl Into<String>, hint: impl Into<String>) -> Self {
        Self::DriverNotFound {
            name: name.into(),
            hint: hint.into(),
        }
    }

    /// Create a missing parameter error.
    pub fn parameter(name: impl Into<String>) -> Self {
        Self::Parameter { name: name.into() }
    }

    /// Create a mapping error for a column.
    pub fn mapping(message: impl Into<String>, column: impl Into<String>) -> Self {
        Self::Mapping {
            message: message.into(),
            column: column.into(),
        }
    }

    /// Create a transaction error.
    pub fn transaction(message: impl Into<String>, transaction_id: impl Into<String>) -> Self {
        Self::Transaction {
            message: message.into(),
            transaction_id: transaction_id.into(),
        }
    }

    /// Create an internal error.
    pub fn internal(message: impl Into<String>) -> Self {
        Self::Internal {
            message: message.into(),
        }
    }

    /// Provider error code, when the database reported one.
    pub fn code(&self) -> Option<&str> {
        match self {
            Self::Execution { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Get the suggestion for this error, if available.
    pub fn suggestion(&self) -> Option<&str> {
        match self {
            Self::Execution { suggestion, .. } => Some(suggestion),
            Self::DriverNotFound { hint, .. } => Some(hint),
            Self::Parameter { .. } => Some("Add the parameter to the parameter source"),
            _ => None,
        }
    }

    /// True for errors caused by caller configuration rather than execution.
    pub fn is_configuration(&self) -> bool {
        matches!(
            self,
            Self::Configuration { .. } | Self::DriverNotFound { .. } | Self::Parameter { .. }
        )
    }
}

impl FailureKind for DbError {
    fn kind_name(&self) -> Cow<'_, str> {
        match self {
            Self::Execution { kind, .. } => Cow::Borrowed(kind),
            Self::Configuration { .. } => Cow::Borrowed("Configuration"),
            Self::DriverNotFound { .. } => Cow::Borrowed("DriverNotFound"),
            Self::Parameter { .. } => Cow::Borrowed("Parameter"),
            Self::Mapping { .. } => Cow::Borrowed("Mapping"),
            Self::Transaction { .. } => Cow::Borrowed("Transaction"),
            Self::Internal { .. } => Cow::Borrowed("Internal"),
        }
    }

    fn is_timeout(&self) -> bool {
        match self {
            Self::Execution { source, .. } => source.is_timeout(),
            _ => false,
        }
    }
}

/// Convert sqlx errors to DbError.
impl From<sqlx::Error> for DbError {
    fn from(err: sqlx::Error) -> Self {
        let kind = err.kind_name().into_owned();
        let (code, message) = match &err {
            sqlx::Error::Database(db_err) => (
                db_err.code().map(|c| c.to_string()),
                db_err.message().to_string(),
            ),
            other => (None, other.to_string()),
        };
        let suggestion = suggestion_for(&err).to_string();

        DbError::Execution {
            kind,
            code,
            message,
            suggestion,
            source: err,
        }
    }
}

impl From<serde_json::Error> for DbError {
    fn from(err: serde_json::Error) -> Self {
        DbError::internal(format!("JSON serialization failed: {}", err))
    }
}

fn suggestion_for(err: &sqlx::Error) -> &'static str {
    match err {
        sqlx::Error::Configuration(_) => "Check the connection string format and credentials",
        sqlx::Error::Database(_) => "Check the SQL syntax, referenced objects and constraints",
        sqlx::Error::RowNotFound => "Verify the query conditions match existing data",
        sqlx::Error::PoolTimedOut => "The database is overloaded or unreachable; retry later",
        sqlx::Error::PoolClosed => "Reconnect to the database",
        sqlx::Error::Io(_) => "Check network connectivity and database server status",
        sqlx::Error::Tls(_) => "Verify TLS configuration and certificates",
        sqlx::Error::Protocol(_) => "Check database server compatibility",
        sqlx::Error::TypeNotFound { .. } | sqlx::Error::ColumnNotFound(_) => {
            "Check that the referenced columns and types exist"
        }
        sqlx::Error::ColumnDecode { .. } | sqlx::Error::Decode(_) => {
            "Check that the column types match the requested Rust types"
        }
        _ => "Check the database driver configuration",
    }
}

/// Kind names for `sqlx` errors.
///
/// Database errors are named after the provider's own condition name for
/// their code (the closest thing a wire protocol has to an exception class),
/// falling back to the generic `sqlx` error kind.
impl FailureKind for sqlx::Error {
    fn kind_name(&self) -> Cow<'_, str> {
        match self {
            sqlx::Error::Configuration(_) => Cow::Borrowed("Configuration"),
            sqlx::Error::Database(db_err) => database_kind_name(db_err.as_ref()),
            sqlx::Error::Io(io_err) => match io_err.kind() {
                std::io::ErrorKind::TimedOut => Cow::Borrowed("IoTimeout"),
                _ => Cow::Borrowed("ConnectionIo"),
            },
            sqlx::Error::Tls(_) => Cow::Borrowed("ConnectionTls"),
            sqlx::Error::Protocol(_) => Cow::Borrowed("Protocol"),
            sqlx::Error::RowNotFound => Cow::Borrowed("RowNotFound"),
            sqlx::Error::TypeNotFound { .. } => Cow::Borrowed("TypeNotFound"),
            sqlx::Error::ColumnIndexOutOfBounds { .. } => Cow::Borrowed("ColumnIndexOutOfBounds"),
            sqlx::Error::ColumnNotFound(_) => Cow::Borrowed("ColumnNotFound"),
            sqlx::Error::ColumnDecode { .. } => Cow::Borrowed("ColumnDecode"),
            sqlx::Error::Encode(_) => Cow::Borrowed("Encode"),
            sqlx::Error::Decode(_) => Cow::Borrowed("Decode"),
            sqlx::Error::AnyDriverError(_) => Cow::Borrowed("AnyDriver"),
            sqlx::Error::PoolTimedOut => Cow::Borrowed("PoolTimedOut"),
            sqlx::Error::PoolClosed => Cow::Borrowed("ConnectionPoolClosed"),
            sqlx::Error::WorkerCrashed => Cow::Borrowed("WorkerCrashed"),
            sqlx::Error::Migrate(_) => Cow::Borrowed("Migrate"),
            _ => Cow::Borrowed("Unknown"),
        }
    }

    fn is_timeout(&self) -> bool {
        match self {
            sqlx::Error::PoolTimedOut => true,
            sqlx::Error::Io(io_err) => io_err.kind() == std::io::ErrorKind::TimedOut,
            _ => false,
        }
    }
}

fn database_kind_name(db_err: &(dyn DatabaseError + 'static)) -> Cow<'static, str> {
    let condition = if let Some(pg) = db_err.try_downcast_ref::<sqlx::postgres::PgDatabaseError>()
    {
        DatabaseType::PostgreSQL.condition_name(pg.code())
    } else if let Some(my) = db_err.try_downcast_ref::<sqlx::mysql::MySqlDatabaseError>() {
        DatabaseType::MySQL.condition_name(&my.number().to_string())
    } else if db_err
        .try_downcast_ref::<sqlx::sqlite::SqliteError>()
        .is_some()
    {
        db_err
            .code()
            .and_then(|code| DatabaseType::SQLite.condition_name(&code))
    } else {
        None
    };

    match condition {
        Some(name) => Cow::Borrowed(name),
        None => Cow::Owned(format!("Database{:?}", db_err.kind())),
    }
}

/// Result type alias for database operations.
pub type DbResult<T> = Result<T, DbError>;
