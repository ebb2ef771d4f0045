//! A single live database connection.
//!
//! Each backend keeps its own connection type (avoids `AnyConnection`
//! limitations); [`DbConnection`] wraps them and runs bound statements.
//! Rows are materialized into [`RowMap`]s before a call returns.

use crate::db::identity::split_identity;
use crate::db::params::{
    BoundSql, Params, bind_named, mysql_query, postgres_query, prepare, sqlite_query,
};
use crate::db::types::RowToValues;
use crate::error::{DbError, DbResult};
use crate::impl_db_dispatch;
use crate::mapping::RowMap;
use crate::models::{DatabaseType, FromValue, IsolationLevel, Value};
use sqlx::{Connection, Executor, MySqlConnection, PgConnection, SqliteConnection};
use tracing::debug;

/// Database-specific connection.
#[derive(Debug)]
pub enum DbConnection {
    MySql(MySqlConnection),
    Postgres(PgConnection),
    SQLite(SqliteConnection),
}

impl DbConnection {
    /// Get the database type for this connection.
    pub fn db_type(&self) -> DatabaseType {
        match self {
            DbConnection::MySql(_) => DatabaseType::MySQL,
            DbConnection::Postgres(_) => DatabaseType::PostgreSQL,
            DbConnection::SQLite(_) => DatabaseType::SQLite,
        }
    }

    /// Execute a statement, returning the affected row count.
    pub async fn execute(&mut self, bound: &BoundSql<'_>) -> DbResult<u64> {
        debug!(sql = bound.sql(), binds = bound.values().len(), "Executing statement");
        let affected = impl_db_dispatch!(self, {
            MySql(conn) => if bound.is_prepared() {
                mysql_query(bound).execute(&mut *conn).await?.rows_affected()
            } else {
                Executor::execute(&mut *conn, bound.sql()).await?.rows_affected()
            },
            Postgres(conn) => if bound.is_prepared() {
                postgres_query(bound).execute(&mut *conn).await?.rows_affected()
            } else {
                Executor::execute(&mut *conn, bound.sql()).await?.rows_affected()
            },
            SQLite(conn) => if bound.is_prepared() {
                sqlite_query(bound).execute(&mut *conn).await?.rows_affected()
            } else {
                Executor::execute(&mut *conn, bound.sql()).await?.rows_affected()
            },
        });
        Ok(affected)
    }

    /// Run a query and collect every row.
    pub async fn fetch_all(&mut self, bound: &BoundSql<'_>) -> DbResult<Vec<RowMap>> {
        debug!(sql = bound.sql(), binds = bound.values().len(), "Running query");
        let rows = impl_db_dispatch!(self, {
            MySql(conn) => {
                let rows = if bound.is_prepared() {
                    mysql_query(bound).fetch_all(&mut *conn).await?
                } else {
                    Executor::fetch_all(&mut *conn, bound.sql()).await?
                };
                rows.iter().map(RowToValues::to_row_map).collect()
            },
            Postgres(conn) => {
                let rows = if bound.is_prepared() {
                    postgres_query(bound).fetch_all(&mut *conn).await?
                } else {
                    Executor::fetch_all(&mut *conn, bound.sql()).await?
                };
                rows.iter().map(RowToValues::to_row_map).collect()
            },
            SQLite(conn) => {
                let rows = if bound.is_prepared() {
                    sqlite_query(bound).fetch_all(&mut *conn).await?
                } else {
                    Executor::fetch_all(&mut *conn, bound.sql()).await?
                };
                rows.iter().map(RowToValues::to_row_map).collect()
            },
        });
        Ok(rows)
    }

    /// Run a query and return its first row. Remaining rows are discarded.
    pub async fn fetch_first(&mut self, bound: &BoundSql<'_>) -> DbResult<Option<RowMap>> {
        debug!(sql = bound.sql(), binds = bound.values().len(), "Running single-row query");
        let row = impl_db_dispatch!(self, {
            MySql(conn) => {
                let row = if bound.is_prepared() {
                    mysql_query(bound).fetch_optional(&mut *conn).await?
                } else {
                    Executor::fetch_optional(&mut *conn, bound.sql()).await?
                };
                row.as_ref().map(RowToValues::to_row_map)
            },
            Postgres(conn) => {
                let row = if bound.is_prepared() {
                    postgres_query(bound).fetch_optional(&mut *conn).await?
                } else {
                    Executor::fetch_optional(&mut *conn, bound.sql()).await?
                };
                row.as_ref().map(RowToValues::to_row_map)
            },
            SQLite(conn) => {
                let row = if bound.is_prepared() {
                    sqlite_query(bound).fetch_optional(&mut *conn).await?
                } else {
                    Executor::fetch_optional(&mut *conn, bound.sql()).await?
                };
                row.as_ref().map(RowToValues::to_row_map)
            },
        });
        Ok(row)
    }

    /// First column of the first row.
    pub async fn fetch_scalar(&mut self, bound: &BoundSql<'_>) -> DbResult<Option<Value>> {
        Ok(self
            .fetch_first(bound)
            .await?
            .and_then(|row| row.first_value().cloned()))
    }

    /// Bind named parameters and execute.
    pub async fn execute_sql(&mut self, sql: &str, params: Option<&Params>) -> DbResult<u64> {
        let bound = prepare(sql, params, self.db_type())?;
        self.execute(&bound).await
    }

    /// Bind named parameters and collect every row.
    pub async fn query_sql(
        &mut self,
        sql: &str,
        params: Option<&Params>,
    ) -> DbResult<Vec<RowMap>> {
        let bound = prepare(sql, params, self.db_type())?;
        self.fetch_all(&bound).await
    }

    /// Bind named parameters and return the first row.
    pub async fn query_first_sql(
        &mut self,
        sql: &str,
        params: Option<&Params>,
    ) -> DbResult<Option<RowMap>> {
        let bound = prepare(sql, params, self.db_type())?;
        self.fetch_first(&bound).await
    }

    /// Run an insert carrying the identity placeholder and read back the
    /// generated key as an integer.
    pub async fn insert_returning_id(
        &mut self,
        sql: &str,
        params: Option<&Params>,
        identity_sql: &str,
    ) -> DbResult<i64> {
        if sql.trim().is_empty() {
            return Err(DbError::configuration("SQL text must not be empty"));
        }
        let db_type = self.db_type();
        let split = split_identity(sql, identity_sql);

        if let Some(statement) = split.statement {
            let bound = bind_named(statement, params, db_type)?;
            self.execute(&bound).await?;
        }

        let bound = bind_named(&split.scalar_query, params, db_type)?;
        let value = self
            .fetch_scalar(&bound)
            .await?
            .ok_or_else(|| DbError::mapping("identity query returned no rows", "identity"))?;
        i64::from_value(value).map_err(|e| DbError::mapping(e.to_string(), "identity"))
    }

    /// [`insert_returning_id`](Self::insert_returning_id) in a transaction of
    /// its own. A failed identity read rolls the insert back, so running the
    /// call again cannot leave a duplicate row behind.
    pub async fn insert_returning_id_atomic(
        &mut self,
        sql: &str,
        params: Option<&Params>,
        identity_sql: &str,
    ) -> DbResult<i64> {
        for statement in self.db_type().begin_statements(IsolationLevel::default()) {
            self.run_control(statement).await?;
        }
        match self.insert_returning_id(sql, params, identity_sql).await {
            Ok(id) => {
                self.run_control("COMMIT").await?;
                Ok(id)
            }
            Err(e) => {
                if let Err(rollback_err) = self.run_control("ROLLBACK").await {
                    debug!(error = %rollback_err, "Rollback after failed insert failed");
                }
                Err(e)
            }
        }
    }

    /// Run a control statement such as `BEGIN` or `COMMIT`.
    pub(crate) async fn run_control(&mut self, sql: &str) -> DbResult<()> {
        debug!(sql, "Running control statement");
        impl_db_dispatch!(self, {
            MySql(conn) => { Executor::execute(&mut *conn, sql).await?; },
            Postgres(conn) => { Executor::execute(&mut *conn, sql).await?; },
            SQLite(conn) => { Executor::execute(&mut *conn, sql).await?; },
        });
        Ok(())
    }

    /// Close the connection gracefully. Failures are logged and ignored; the
    /// socket is dropped either way.
    pub async fn close(self) {
        let db_type = self.db_type();
        let result = match self {
            DbConnection::MySql(conn) => conn.close().await,
            DbConnection::Postgres(conn) => conn.close().await,
            DbConnection::SQLite(conn) => conn.close().await,
        };
        if let Err(e) = result {
            debug!(db_type = %db_type, error = %e, "Connection close failed");
        }
    }
}
