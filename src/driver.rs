//! The execution façade.
//!
//! A [`Driver`] owns a connection string, a [`RetryPolicy`] and the provider
//! for its backend. Every non-transactional call opens its own connection,
//! binds, executes, maps and closes; the whole unit runs under the retry
//! policy. Transactions are handed out as [`TransactionScope`]s and are never
//! retried.

use crate::db::{DbConnection, Params, Provider, provider_for};
use crate::error::{DbError, DbResult};
use crate::mapping::{Record, RowMap, map_row, map_rows};
use crate::models::{CommandOutcome, DatabaseType, IsolationLevel, mask_connection_string};
use crate::retry::RetryPolicy;
use crate::transaction::TransactionScope;
use std::sync::Arc;
use tracing::{debug, warn};

/// Open a connection, run `$body` with it, then close it.
///
/// Nothing between open and close may return early, so the connection is
/// released on every path.
macro_rules! with_connection {
    ($driver:expr, |$conn:ident| $body:expr) => {{
        let mut $conn = $driver.connect().await?;
        let result = $body;
        $conn.close().await;
        result
    }};
}

pub(crate) fn ensure_sql(sql: &str) -> DbResult<()> {
    if sql.trim().is_empty() {
        return Err(DbError::configuration("SQL text must not be empty"));
    }
    Ok(())
}

#[derive(Clone)]
pub struct Driver {
    connection_string: Arc<str>,
    retry_policy: RetryPolicy,
    provider: Arc<dyn Provider>,
}

impl std::fmt::Debug for Driver {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Driver")
            .field("target", &mask_connection_string(&self.connection_string))
            .field("retry_policy", &self.retry_policy)
            .field("provider", &self.provider)
            .finish()
    }
}

impl Driver {
    /// Create a driver, choosing the provider from the connection string's
    /// scheme. `None` means no retries.
    pub fn new(
        connection_string: impl Into<String>,
        retry_policy: Option<RetryPolicy>,
    ) -> DbResult<Self> {
        let connection_string = connection_string.into();
        if connection_string.trim().is_empty() {
            return Err(DbError::configuration("Connection string must not be empty"));
        }
        let provider = provider_for(&connection_string)?;
        Self::with_provider(connection_string, provider, retry_policy)
    }

    /// Create a driver with an explicit provider.
    pub fn with_provider(
        connection_string: impl Into<String>,
        provider: Arc<dyn Provider>,
        retry_policy: Option<RetryPolicy>,
    ) -> DbResult<Self> {
        let connection_string: String = connection_string.into();
        if connection_string.trim().is_empty() {
            return Err(DbError::configuration("Connection string must not be empty"));
        }
        Ok(Self {
            connection_string: Arc::from(connection_string),
            retry_policy: retry_policy.unwrap_or_else(RetryPolicy::none),
            provider,
        })
    }

    pub fn connection_string(&self) -> &str {
        &self.connection_string
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.retry_policy
    }

    pub fn db_type(&self) -> DatabaseType {
        self.provider.db_type()
    }

    async fn connect(&self) -> DbResult<DbConnection> {
        self.provider.connect(&self.connection_string).await
    }

    // Single attempts. The public operations wrap these in the retry policy;
    // the blocking driver wraps them in the blocking one.

    pub(crate) async fn execute_once(&self, sql: &str, params: Option<&Params>) -> DbResult<u64> {
        with_connection!(self, |conn| conn.execute_sql(sql, params).await)
    }

    pub(crate) async fn query_once(
        &self,
        sql: &str,
        params: Option<&Params>,
    ) -> DbResult<Vec<RowMap>> {
        with_connection!(self, |conn| conn.query_sql(sql, params).await)
    }

    pub(crate) async fn query_first_once(
        &self,
        sql: &str,
        params: Option<&Params>,
    ) -> DbResult<Option<RowMap>> {
        with_connection!(self, |conn| conn.query_first_sql(sql, params).await)
    }

    pub(crate) async fn insert_and_get_id_once(
        &self,
        sql: &str,
        params: Option<&Params>,
    ) -> DbResult<i64> {
        let identity_sql = self.provider.identity_sql();
        with_connection!(self, |conn| conn
            .insert_returning_id_atomic(sql, params, identity_sql)
            .await)
    }

    /// Execute a statement and report the result as a [`CommandOutcome`]
    /// instead of an error.
    ///
    /// Database errors carry the provider's code; every other failure is
    /// tagged with [`CommandOutcome::GENERAL_ERROR_CODE`].
    pub async fn execute_raw(&self, sql: &str, params: Option<&Params>) -> CommandOutcome {
        match self.execute(sql, params).await {
            Ok(affected) => CommandOutcome::succeeded(affected),
            Err(e) => {
                warn!(
                    db_type = %self.db_type(),
                    code = e.code().unwrap_or(CommandOutcome::GENERAL_ERROR_CODE),
                    error = %e,
                    "Command failed"
                );
                CommandOutcome::from_error(&e)
            }
        }
    }

    /// Execute a statement, returning the affected row count.
    pub async fn execute(&self, sql: &str, params: Option<&Params>) -> DbResult<u64> {
        ensure_sql(sql)?;
        self.retry_policy
            .execute_async(move || self.execute_once(sql, params))
            .await
    }

    /// Run a query and return every row as a [`RowMap`].
    pub async fn query(&self, sql: &str, params: Option<&Params>) -> DbResult<Vec<RowMap>> {
        ensure_sql(sql)?;
        let rows = self
            .retry_policy
            .execute_async(move || self.query_once(sql, params))
            .await?;
        debug!(rows = rows.len(), "Query completed");
        Ok(rows)
    }

    /// Run a query and map every row into `T`.
    pub async fn query_as<T: Record>(&self, sql: &str, params: Option<&Params>) -> DbResult<Vec<T>> {
        map_rows(self.query(sql, params).await?)
    }

    /// Map the first row into `T`. Extra rows are ignored.
    pub async fn query_single<T: Record>(
        &self,
        sql: &str,
        params: Option<&Params>,
    ) -> DbResult<Option<T>> {
        ensure_sql(sql)?;
        let row = self
            .retry_policy
            .execute_async(move || self.query_first_once(sql, params))
            .await?;
        row.map(map_row).transpose()
    }

    /// Run an insert carrying the identity placeholder and return the
    /// generated key. See [`crate::db::identity`].
    pub async fn insert_and_get_id(&self, sql: &str, params: Option<&Params>) -> DbResult<i64> {
        ensure_sql(sql)?;
        self.retry_policy
            .execute_async(move || self.insert_and_get_id_once(sql, params))
            .await
    }

    /// Open a connection and begin a transaction on it.
    pub async fn begin_transaction(&self, isolation: IsolationLevel) -> DbResult<TransactionScope> {
        let conn = self.connect().await?;
        TransactionScope::begin(conn, isolation, self.provider.identity_sql()).await
    }

    /// Begin a transaction at the default (read committed) isolation level.
    pub async fn begin_default_transaction(&self) -> DbResult<TransactionScope> {
        self.begin_transaction(IsolationLevel::default()).await
    }
}
