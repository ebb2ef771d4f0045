//! Integration tests for the async driver against file-backed SQLite.

use db_driver_core::db::{DbConnection, Provider, SqliteProvider};
use db_driver_core::models::Value;
use db_driver_core::{
    CommandOutcome, DatabaseType, DbError, DbResult, Driver, DriverFactory, DriverRegistration,
    Params, RetryPolicy, ServiceContext, impl_record, sql_builder,
};
use futures_util::future::BoxFuture;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use std::time::{Duration, Instant};
use tempfile::TempDir;

#[derive(Debug, Default, Clone, PartialEq)]
struct User {
    id: i64,
    username: String,
    email: Option<String>,
}

impl_record!(User {
    id: i64,
    username: String,
    email: Option<String>,
});

/// Create a SQLite database with a `users` table.
async fn setup_db() -> (TempDir, Driver) {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("test.db").display());
    let driver = Driver::new(url, None).unwrap();
    driver
        .execute(
            "CREATE TABLE users (
                id INTEGER PRIMARY KEY AUTOINCREMENT,
                username TEXT UNIQUE,
                email TEXT
            )",
            None,
        )
        .await
        .unwrap();
    (dir, driver)
}

#[tokio::test]
async fn test_insert_and_get_id_then_query_single() {
    let (_dir, driver) = setup_db().await;

    let params = Params::new()
        .with("username", "alice")
        .with("email", "a@x.io");
    let id = driver
        .insert_and_get_id(
            "INSERT INTO users (username, email) VALUES (@username, @email); {IDENTITY}",
            Some(&params),
        )
        .await
        .unwrap();
    assert_eq!(id, 1);

    let user: User = driver
        .query_single(
            "SELECT id, username, email FROM users WHERE id = @id",
            Some(&Params::new().with("id", id)),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(
        user,
        User {
            id: 1,
            username: "alice".into(),
            email: Some("a@x.io".into()),
        }
    );

    let second = driver
        .insert_and_get_id(
            "INSERT INTO users (username) VALUES (@username); {IDENTITY}",
            Some(&Params::new().with("username", "bob")),
        )
        .await
        .unwrap();
    assert_eq!(second, 2);
}

#[tokio::test]
async fn test_null_column_keeps_field_default() {
    let (_dir, driver) = setup_db().await;
    driver
        .execute(
            "INSERT INTO users (username, email) VALUES (@username, @email)",
            Some(&Params::new().with("username", Value::Null).with("email", Value::Null)),
        )
        .await
        .unwrap();

    let user: User = driver
        .query_single("SELECT id, username, email FROM users", None)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(user.username, "");
    assert_eq!(user.email, None);
}

#[tokio::test]
async fn test_query_single_ignores_extra_rows_and_missing_rows() {
    let (_dir, driver) = setup_db().await;
    for name in ["a", "b", "c"] {
        driver
            .execute(
                "INSERT INTO users (username) VALUES (@name)",
                Some(&Params::new().with("name", name)),
            )
            .await
            .unwrap();
    }

    let first: Option<User> = driver
        .query_single("SELECT * FROM users ORDER BY id", None)
        .await
        .unwrap();
    assert_eq!(first.unwrap().username, "a");

    let none: Option<User> = driver
        .query_single("SELECT * FROM users WHERE id = @id", Some(&Params::new().with("id", 99)))
        .await
        .unwrap();
    assert!(none.is_none());

    let all: Vec<User> = driver
        .query_as("SELECT * FROM users ORDER BY id", None)
        .await
        .unwrap();
    assert_eq!(all.len(), 3);
    assert_eq!(all[2].username, "c");
}

#[tokio::test]
async fn test_execute_raw_reports_success_and_unique_violation() {
    let (_dir, driver) = setup_db().await;
    let params = Params::new().with("username", "dup");

    let ok = driver
        .execute_raw("INSERT INTO users (username) VALUES (@username)", Some(&params))
        .await;
    assert!(ok.success());
    assert_eq!(ok.affected_records(), 1);
    assert!(ok.error_code().is_none());

    let failed = driver
        .execute_raw("INSERT INTO users (username) VALUES (@username)", Some(&params))
        .await;
    assert!(!failed.success());
    assert_eq!(failed.affected_records(), 0);
    let code = failed.error_code().unwrap();
    assert!(!code.is_empty());
    assert_ne!(code, CommandOutcome::GENERAL_ERROR_CODE);
    assert!(!failed.error_message().unwrap().is_empty());
}

#[tokio::test]
async fn test_missing_parameter_is_general_error() {
    let (_dir, driver) = setup_db().await;
    let err = driver
        .execute("INSERT INTO users (username) VALUES (@username)", Some(&Params::new()))
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Parameter { .. }));
    assert!(err.to_string().contains("@username"));

    let outcome = driver
        .execute_raw("INSERT INTO users (username) VALUES (@username)", None)
        .await;
    assert_eq!(outcome.error_code(), Some(CommandOutcome::GENERAL_ERROR_CODE));
}

#[tokio::test]
async fn test_non_transient_error_is_not_retried() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("t.db").display());
    let driver = Driver::new(url, Some(RetryPolicy::new(3, Duration::from_millis(300)))).unwrap();

    let start = Instant::now();
    let err = driver
        .query("SELECT * FROM no_such_table", None)
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Execution { .. }));
    // a retry would have slept at least once
    assert!(start.elapsed() < Duration::from_millis(300));
}

#[tokio::test]
async fn test_params_from_map_and_values_round_trip() {
    let (_dir, driver) = setup_db().await;
    let mut map = std::collections::HashMap::new();
    map.insert("username".to_string(), Value::from("map"));
    map.insert("email".to_string(), Value::from(Some("m@x.io")));
    let params = Params::from(map);

    let affected = driver
        .execute(
            "INSERT INTO users (username, email) VALUES (@USERNAME, @email)",
            Some(&params),
        )
        .await
        .unwrap();
    assert_eq!(affected, 1);

    let rows = driver
        .query(
            "SELECT username, email, 1.5 AS ratio FROM users WHERE username = @username",
            Some(&params),
        )
        .await
        .unwrap();
    assert_eq!(rows.len(), 1);
    assert_eq!(rows[0].get("Email"), Some(&Value::Text("m@x.io".into())));
    assert_eq!(rows[0].try_get::<f64>("ratio").unwrap(), 1.5);
}

#[tokio::test]
async fn test_sql_builder_statements_execute() {
    let (_dir, driver) = setup_db().await;
    let mut user = User {
        id: 0,
        username: "built".into(),
        email: None,
    };

    let (sql, params) = sql_builder::insert_with_identity("users", &user, "id").unwrap();
    user.id = driver.insert_and_get_id(&sql, Some(&params)).await.unwrap();

    user.email = Some("b@x.io".into());
    let (sql, params) = sql_builder::update("users", &user, &["id"]).unwrap();
    assert_eq!(driver.execute(&sql, Some(&params)).await.unwrap(), 1);

    let stored: User = driver
        .query_single(
            "SELECT * FROM users WHERE id = @id",
            Some(&Params::new().with("id", user.id)),
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(stored, user);

    let (sql, params) = sql_builder::delete("users", &user, &["id"]).unwrap();
    assert_eq!(driver.execute(&sql, Some(&params)).await.unwrap(), 1);
}

#[tokio::test]
async fn test_factory_builds_independent_drivers() {
    let dir = TempDir::new().unwrap();
    let url = format!("sqlite:{}", dir.path().join("f.db").display());
    let factory = DriverFactory::new(
        vec![DriverRegistration::from_connection_string("Main", url).unwrap()],
        ServiceContext::new().with_retry_policy(RetryPolicy::new(1, Duration::from_millis(5))),
    );

    let a = factory.get("main").unwrap();
    let b = factory.get("MAIN").unwrap();
    a.execute("CREATE TABLE t (x INTEGER)", None).await.unwrap();
    a.execute("INSERT INTO t VALUES (1)", None).await.unwrap();
    let rows = b.query("SELECT x FROM t", None).await.unwrap();
    assert_eq!(rows[0].try_get::<i64>("x").unwrap(), 1);

    let err = factory.get("Unknown").unwrap_err();
    assert!(err.to_string().contains("Unknown"));
}

/// SQLite provider whose first `failures` connection attempts are reset.
#[derive(Debug)]
struct FlakyProvider {
    inner: SqliteProvider,
    failures: AtomicU32,
    connects: AtomicU32,
}

impl FlakyProvider {
    fn new(failures: u32) -> Arc<Self> {
        Arc::new(Self {
            inner: SqliteProvider,
            failures: AtomicU32::new(failures),
            connects: AtomicU32::new(0),
        })
    }

    fn connects(&self) -> u32 {
        self.connects.load(Ordering::SeqCst)
    }
}

impl Provider for FlakyProvider {
    fn db_type(&self) -> DatabaseType {
        DatabaseType::SQLite
    }

    fn connect<'a>(&'a self, connection_string: &'a str) -> BoxFuture<'a, DbResult<DbConnection>> {
        self.connects.fetch_add(1, Ordering::SeqCst);
        let fail = self
            .failures
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if fail {
            let err = DbError::from(sqlx::Error::Io(std::io::Error::new(
                std::io::ErrorKind::ConnectionReset,
                "connection reset by peer",
            )));
            return Box::pin(async move { Err::<DbConnection, DbError>(err) });
        }
        self.inner.connect(connection_string)
    }
}

#[tokio::test]
async fn test_transient_connect_failures_are_retried() {
    let provider = FlakyProvider::new(2);
    let driver = Driver::with_provider(
        "sqlite::memory:",
        provider.clone(),
        Some(RetryPolicy::new(3, Duration::from_millis(5))),
    )
    .unwrap();

    let rows = driver.query("SELECT 1 AS one", None).await.unwrap();
    assert_eq!(rows[0].try_get::<i64>("one").unwrap(), 1);
    assert_eq!(provider.connects(), 3);
}

#[tokio::test]
async fn test_retries_stop_at_policy_limit() {
    let provider = FlakyProvider::new(5);
    let driver = Driver::with_provider(
        "sqlite::memory:",
        provider.clone(),
        Some(RetryPolicy::new(1, Duration::from_millis(5))),
    )
    .unwrap();

    let err = driver.execute("SELECT 1", None).await.unwrap_err();
    assert!(matches!(err, DbError::Execution { .. }));
    assert_eq!(provider.connects(), 2);
}

#[tokio::test]
async fn test_begin_transaction_is_not_retried() {
    let provider = FlakyProvider::new(2);
    let driver = Driver::with_provider(
        "sqlite::memory:",
        provider.clone(),
        Some(RetryPolicy::new(3, Duration::from_millis(5))),
    )
    .unwrap();

    let err = driver.begin_default_transaction().await.unwrap_err();
    assert!(matches!(err, DbError::Execution { .. }));
    assert_eq!(provider.connects(), 1);
}

#[tokio::test]
async fn test_failed_identity_read_rolls_back_insert() {
    let (_dir, driver) = setup_db().await;

    let err = driver
        .insert_and_get_id(
            "INSERT INTO users (username) VALUES (@username); {IDENTITY} FROM no_such_table",
            Some(&Params::new().with("username", "ghost")),
        )
        .await
        .unwrap_err();
    assert!(matches!(err, DbError::Execution { .. }));

    let rows = driver
        .query("SELECT COUNT(*) AS n FROM users", None)
        .await
        .unwrap();
    assert_eq!(rows[0].try_get::<i64>("n").unwrap(), 0);

    // the table is usable afterwards
    let id = driver
        .insert_and_get_id(
            "INSERT INTO users (username) VALUES (@username); {IDENTITY}",
            Some(&Params::new().with("username", "ghost")),
        )
        .await
        .unwrap();
    assert!(id >= 1);
}
