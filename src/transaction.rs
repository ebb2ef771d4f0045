//! Transaction scopes.
//!
//! A [`TransactionScope`] holds one connection with one open transaction.
//! Every operation runs on that connection, in issue order, without retry.
//! Unless [`commit`](TransactionScope::commit) succeeds, releasing the scope
//! rolls the transaction back.

use crate::db::{DbConnection, Params};
use crate::driver::ensure_sql;
use crate::error::{DbError, DbResult};
use crate::mapping::{Record, RowMap, map_row, map_rows};
use crate::models::{DatabaseType, IsolationLevel, TransactionState};
use tracing::{debug, info, warn};

fn generate_transaction_id() -> String {
    format!("tx_{}", uuid::Uuid::new_v4().simple())
}

/// One connection and one live transaction.
///
/// Prefer [`close`](Self::close) over dropping the scope: dropping an active
/// scope rolls back on a spawned task, and without a tokio runtime it only
/// drops the connection (the server then discards the transaction).
#[derive(Debug)]
pub struct TransactionScope {
    id: String,
    connection: Option<DbConnection>,
    db_type: DatabaseType,
    isolation: IsolationLevel,
    identity_sql: &'static str,
    state: TransactionState,
}

impl TransactionScope {
    /// Start a transaction on `connection`. The connection is closed if the
    /// transaction cannot be started.
    pub(crate) async fn begin(
        mut connection: DbConnection,
        isolation: IsolationLevel,
        identity_sql: &'static str,
    ) -> DbResult<Self> {
        let db_type = connection.db_type();
        for statement in db_type.begin_statements(isolation) {
            if let Err(e) = connection.run_control(statement).await {
                connection.close().await;
                return Err(e);
            }
        }

        let id = generate_transaction_id();
        info!(
            transaction_id = %id,
            db_type = %db_type,
            isolation = %isolation,
            "Transaction started"
        );

        Ok(Self {
            id,
            connection: Some(connection),
            db_type,
            isolation,
            identity_sql,
            state: TransactionState::Active,
        })
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn state(&self) -> TransactionState {
        self.state
    }

    /// True once the scope committed or rolled back.
    pub fn is_completed(&self) -> bool {
        self.state.is_completed()
    }

    pub fn isolation_level(&self) -> IsolationLevel {
        self.isolation
    }

    pub fn db_type(&self) -> DatabaseType {
        self.db_type
    }

    fn active_connection(&mut self) -> DbResult<&mut DbConnection> {
        if self.state.is_completed() {
            return Err(DbError::transaction(
                format!("Transaction is already {}", state_name(self.state)),
                self.id.clone(),
            ));
        }
        self.connection
            .as_mut()
            .ok_or_else(|| DbError::transaction("Transaction connection was released", self.id.clone()))
    }

    pub async fn execute(&mut self, sql: &str, params: Option<&Params>) -> DbResult<u64> {
        ensure_sql(sql)?;
        self.active_connection()?.execute_sql(sql, params).await
    }

    pub async fn query(&mut self, sql: &str, params: Option<&Params>) -> DbResult<Vec<RowMap>> {
        ensure_sql(sql)?;
        self.active_connection()?.query_sql(sql, params).await
    }

    pub async fn query_as<T: Record>(
        &mut self,
        sql: &str,
        params: Option<&Params>,
    ) -> DbResult<Vec<T>> {
        map_rows(self.query(sql, params).await?)
    }

    /// Map the first row into `T`. Extra rows are ignored.
    pub async fn query_single<T: Record>(
        &mut self,
        sql: &str,
        params: Option<&Params>,
    ) -> DbResult<Option<T>> {
        ensure_sql(sql)?;
        self.active_connection()?
            .query_first_sql(sql, params)
            .await?
            .map(map_row)
            .transpose()
    }

    /// Insert with the identity placeholder and return the generated key.
    pub async fn insert_and_get_id(&mut self, sql: &str, params: Option<&Params>) -> DbResult<i64> {
        ensure_sql(sql)?;
        let identity_sql = self.identity_sql;
        self.active_connection()?
            .insert_returning_id(sql, params, identity_sql)
            .await
    }

    /// Commit. A no-op once the scope has completed.
    ///
    /// If `COMMIT` fails the scope stays active, so releasing it still
    /// attempts a rollback.
    pub async fn commit(&mut self) -> DbResult<()> {
        self.finish("COMMIT", TransactionState::Committed).await
    }

    /// Roll back. A no-op once the scope has completed.
    pub async fn rollback(&mut self) -> DbResult<()> {
        self.finish("ROLLBACK", TransactionState::RolledBack).await
    }

    async fn finish(&mut self, statement: &str, target: TransactionState) -> DbResult<()> {
        if self.state.is_completed() {
            debug!(
                transaction_id = %self.id,
                state = state_name(self.state),
                "Transaction already completed, ignoring {}",
                statement
            );
            return Ok(());
        }
        let conn = self.connection.as_mut().ok_or_else(|| {
            DbError::transaction("Transaction connection was released", self.id.clone())
        })?;
        conn.run_control(statement).await?;
        self.state = target;
        info!(
            transaction_id = %self.id,
            state = state_name(target),
            "Transaction completed"
        );
        Ok(())
    }

    /// Release the scope: roll back if still active, then close the
    /// connection. Rollback failures are logged and swallowed.
    pub async fn close(mut self) {
        self.release().await;
    }

    pub(crate) async fn release(&mut self) {
        let Some(mut conn) = self.connection.take() else {
            return;
        };
        if self.state.is_active() {
            match conn.run_control("ROLLBACK").await {
                Ok(()) => {
                    self.state = TransactionState::RolledBack;
                    info!(transaction_id = %self.id, "Transaction rolled back on release");
                }
                Err(e) => {
                    warn!(
                        transaction_id = %self.id,
                        error = %e,
                        "Rollback on release failed"
                    );
                }
            }
        }
        conn.close().await;
    }
}

fn state_name(state: TransactionState) -> &'static str {
    match state {
        TransactionState::Active => "active",
        TransactionState::Committed => "committed",
        TransactionState::RolledBack => "rolled back",
    }
}

impl Drop for TransactionScope {
    fn drop(&mut self) {
        let Some(mut conn) = self.connection.take() else {
            return;
        };
        let active = self.state.is_active();
        let transaction_id = std::mem::take(&mut self.id);

        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(async move {
                    if active {
                        // best effort, errors ignored
                        let _ = conn.run_control("ROLLBACK").await;
                    }
                    conn.close().await;
                    warn!(
                        transaction_id = %transaction_id,
                        rolled_back = active,
                        "Transaction released via Drop - consider using explicit close()"
                    );
                });
            }
            Err(_) => {
                warn!(
                    transaction_id = %transaction_id,
                    "Transaction dropped outside a runtime; closing the connection without rollback"
                );
                drop(conn);
            }
        }
    }
}
