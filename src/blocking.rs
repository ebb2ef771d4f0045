//! Blocking wrappers around [`Driver`] and [`TransactionScope`].
//!
//! Each [`BlockingDriver`] owns a current-thread tokio runtime and drives the
//! async implementation to completion on the calling thread. Retries sleep
//! the calling thread. These types must not be used from inside an async
//! context: `block_on` panics when called on a runtime worker.

use crate::db::Params;
use crate::driver::{Driver, ensure_sql};
use crate::error::{DbError, DbResult};
use crate::mapping::{Record, RowMap, map_row, map_rows};
use crate::models::{CommandOutcome, DatabaseType, IsolationLevel, TransactionState};
use crate::retry::RetryPolicy;
use crate::transaction::TransactionScope;
use std::sync::Arc;
use tokio::runtime::{Builder, Runtime};
use tracing::warn;

fn build_runtime() -> DbResult<Runtime> {
    Builder::new_current_thread()
        .enable_all()
        .build()
        .map_err(|e| DbError::internal(format!("Failed to start runtime: {}", e)))
}

/// Synchronous execution façade.
#[derive(Debug, Clone)]
pub struct BlockingDriver {
    inner: Driver,
    runtime: Arc<Runtime>,
}

impl BlockingDriver {
    pub fn new(
        connection_string: impl Into<String>,
        retry_policy: Option<RetryPolicy>,
    ) -> DbResult<Self> {
        Self::from_driver(Driver::new(connection_string, retry_policy)?)
    }

    /// Wrap an existing async driver.
    pub fn from_driver(inner: Driver) -> DbResult<Self> {
        Ok(Self {
            inner,
            runtime: Arc::new(build_runtime()?),
        })
    }

    pub fn driver(&self) -> &Driver {
        &self.inner
    }

    pub fn connection_string(&self) -> &str {
        self.inner.connection_string()
    }

    pub fn retry_policy(&self) -> RetryPolicy {
        self.inner.retry_policy()
    }

    pub fn db_type(&self) -> DatabaseType {
        self.inner.db_type()
    }

    pub fn execute_raw(&self, sql: &str, params: Option<&Params>) -> CommandOutcome {
        match self.execute(sql, params) {
            Ok(affected) => CommandOutcome::succeeded(affected),
            Err(e) => {
                warn!(db_type = %self.db_type(), error = %e, "Command failed");
                CommandOutcome::from_error(&e)
            }
        }
    }

    pub fn execute(&self, sql: &str, params: Option<&Params>) -> DbResult<u64> {
        ensure_sql(sql)?;
        self.retry_policy()
            .execute(|| self.runtime.block_on(self.inner.execute_once(sql, params)))
    }

    pub fn query(&self, sql: &str, params: Option<&Params>) -> DbResult<Vec<RowMap>> {
        ensure_sql(sql)?;
        self.retry_policy()
            .execute(|| self.runtime.block_on(self.inner.query_once(sql, params)))
    }

    pub fn query_as<T: Record>(&self, sql: &str, params: Option<&Params>) -> DbResult<Vec<T>> {
        map_rows(self.query(sql, params)?)
    }

    /// Map the first row into `T`. Extra rows are ignored.
    pub fn query_single<T: Record>(
        &self,
        sql: &str,
        params: Option<&Params>,
    ) -> DbResult<Option<T>> {
        ensure_sql(sql)?;
        self.retry_policy()
            .execute(|| self.runtime.block_on(self.inner.query_first_once(sql, params)))?
            .map(map_row)
            .transpose()
    }

    pub fn insert_and_get_id(&self, sql: &str, params: Option<&Params>) -> DbResult<i64> {
        ensure_sql(sql)?;
        self.retry_policy().execute(|| {
            self.runtime
                .block_on(self.inner.insert_and_get_id_once(sql, params))
        })
    }

    pub fn begin_transaction(&self, isolation: IsolationLevel) -> DbResult<BlockingTransactionScope> {
        let inner = self
            .runtime
            .block_on(self.inner.begin_transaction(isolation))?;
        Ok(BlockingTransactionScope {
            inner,
            runtime: Arc::clone(&self.runtime),
        })
    }

    pub fn begin_default_transaction(&self) -> DbResult<BlockingTransactionScope> {
        self.begin_transaction(IsolationLevel::default())
    }
}

/// Synchronous transaction scope. Dropping an active scope rolls it back on
/// the calling thread.
#[derive(Debug)]
pub struct BlockingTransactionScope {
    inner: TransactionScope,
    runtime: Arc<Runtime>,
}

impl BlockingTransactionScope {
    pub fn id(&self) -> &str {
        self.inner.id()
    }

    pub fn state(&self) -> TransactionState {
        self.inner.state()
    }

    pub fn is_completed(&self) -> bool {
        self.inner.is_completed()
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.inner.isolation_level()
    }

    pub fn execute(&mut self, sql: &str, params: Option<&Params>) -> DbResult<u64> {
        self.runtime.block_on(self.inner.execute(sql, params))
    }

    pub fn query(&mut self, sql: &str, params: Option<&Params>) -> DbResult<Vec<RowMap>> {
        self.runtime.block_on(self.inner.query(sql, params))
    }

    pub fn query_as<T: Record>(&mut self, sql: &str, params: Option<&Params>) -> DbResult<Vec<T>> {
        self.runtime.block_on(self.inner.query_as(sql, params))
    }

    pub fn query_single<T: Record>(
        &mut self,
        sql: &str,
        params: Option<&Params>,
    ) -> DbResult<Option<T>> {
        self.runtime.block_on(self.inner.query_single(sql, params))
    }

    pub fn insert_and_get_id(&mut self, sql: &str, params: Option<&Params>) -> DbResult<i64> {
        self.runtime.block_on(self.inner.insert_and_get_id(sql, params))
    }

    pub fn commit(&mut self) -> DbResult<()> {
        self.runtime.block_on(self.inner.commit())
    }

    pub fn rollback(&mut self) -> DbResult<()> {
        self.runtime.block_on(self.inner.rollback())
    }

    /// Roll back if still active and close the connection.
    pub fn close(mut self) {
        self.runtime.block_on(self.inner.release());
    }
}

impl Drop for BlockingTransactionScope {
    fn drop(&mut self) {
        if tokio::runtime::Handle::try_current().is_ok() {
            warn!(
                transaction_id = %self.inner.id(),
                "Blocking transaction dropped inside an async context; rollback is left to the server"
            );
            return;
        }
        self.runtime.block_on(self.inner.release());
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_blocking_query_in_memory() {
        let driver = BlockingDriver::new("sqlite::memory:", None).unwrap();
        let rows = driver.query("SELECT 2 AS two", None).unwrap();
        assert_eq!(rows[0].try_get::<i64>("two").unwrap(), 2);
    }

    #[test]
    fn test_blocking_empty_sql_rejected() {
        let driver = BlockingDriver::new("sqlite::memory:", None).unwrap();
        assert!(driver.execute("", None).unwrap_err().is_configuration());
        assert!(!driver.execute_raw("   ", None).success());
    }

    #[test]
    fn test_blocking_scope_commit_is_idempotent() {
        let driver = BlockingDriver::new("sqlite::memory:", None).unwrap();
        let mut tx = driver.begin_default_transaction().unwrap();
        assert_eq!(tx.state(), TransactionState::Active);
        tx.execute("CREATE TABLE t (id INTEGER)", None).unwrap();
        tx.commit().unwrap();
        tx.commit().unwrap();
        tx.rollback().unwrap();
        assert_eq!(tx.state(), TransactionState::Committed);
        assert!(tx.execute("INSERT INTO t VALUES (1)", None).is_err());
        tx.close();
    }
}
