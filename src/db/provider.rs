//! Provider capability: opening connections and naming the identity query.

use crate::db::connection::DbConnection;
use crate::error::{DbError, DbResult};
use crate::models::{DatabaseType, mask_connection_string};
use futures_util::future::BoxFuture;
use sqlx::mysql::MySqlConnectOptions;
use sqlx::postgres::PgConnectOptions;
use sqlx::sqlite::SqliteConnectOptions;
use sqlx::{ConnectOptions, MySqlConnection, PgConnection, SqliteConnection};
use std::str::FromStr;
use std::sync::Arc;
use tracing::debug;

/// What the core needs from a database provider.
pub trait Provider: Send + Sync + std::fmt::Debug {
    fn db_type(&self) -> DatabaseType;

    /// Open a new connection.
    fn connect<'a>(&'a self, connection_string: &'a str) -> BoxFuture<'a, DbResult<DbConnection>>;

    /// Statement returning the key generated by the last insert on the session.
    fn identity_sql(&self) -> &'static str {
        self.db_type().identity_sql()
    }
}

/// PostgreSQL provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct PostgresProvider;

/// MySQL / MariaDB provider.
#[derive(Debug, Clone, Copy, Default)]
pub struct MySqlProvider;

/// SQLite provider. Database files are created on first open.
#[derive(Debug, Clone, Copy, Default)]
pub struct SqliteProvider;

fn log_connect(db_type: DatabaseType, connection_string: &str) {
    debug!(
        db_type = %db_type,
        connection = %mask_connection_string(connection_string),
        "Opening connection"
    );
}

impl Provider for PostgresProvider {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::PostgreSQL
    }

    fn connect<'a>(&'a self, connection_string: &'a str) -> BoxFuture<'a, DbResult<DbConnection>> {
        Box::pin(async move {
            let options = PgConnectOptions::from_str(connection_string).map_err(|e| {
                DbError::configuration(format!("Invalid PostgreSQL connection string: {}", e))
            })?;
            log_connect(self.db_type(), connection_string);
            let conn: PgConnection = options.connect().await?;
            Ok(DbConnection::Postgres(conn))
        })
    }
}

impl Provider for MySqlProvider {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::MySQL
    }

    fn connect<'a>(&'a self, connection_string: &'a str) -> BoxFuture<'a, DbResult<DbConnection>> {
        Box::pin(async move {
            let options = MySqlConnectOptions::from_str(connection_string)
                .map_err(|e| {
                    DbError::configuration(format!("Invalid MySQL connection string: {}", e))
                })?
                .charset("utf8mb4");
            log_connect(self.db_type(), connection_string);
            let conn: MySqlConnection = options.connect().await?;
            Ok(DbConnection::MySql(conn))
        })
    }
}

impl Provider for SqliteProvider {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn connect<'a>(&'a self, connection_string: &'a str) -> BoxFuture<'a, DbResult<DbConnection>> {
        Box::pin(async move {
            let options = SqliteConnectOptions::from_str(connection_string)
                .map_err(|e| {
                    DbError::configuration(format!("Invalid SQLite connection string: {}", e))
                })?
                .create_if_missing(true);
            log_connect(self.db_type(), connection_string);
            let conn: SqliteConnection = options.connect().await?;
            Ok(DbConnection::SQLite(conn))
        })
    }
}

/// Pick the provider for a connection string by its scheme.
pub fn provider_for(connection_string: &str) -> DbResult<Arc<dyn Provider>> {
    match DatabaseType::from_connection_string(connection_string) {
        Some(DatabaseType::PostgreSQL) => Ok(Arc::new(PostgresProvider)),
        Some(DatabaseType::MySQL) => Ok(Arc::new(MySqlProvider)),
        Some(DatabaseType::SQLite) => Ok(Arc::new(SqliteProvider)),
        None => Err(DbError::configuration(format!(
            "Unsupported database type for connection string '{}'; expected a postgres://, mysql:// or sqlite: URL",
            mask_connection_string(connection_string)
        ))),
    }
}
