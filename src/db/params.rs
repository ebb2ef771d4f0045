//! Named parameter binding.
//!
//! SQL text uses `@name` markers. Before execution the markers are rewritten
//! to the provider's positional syntax and the matching values are collected
//! in bind order:
//!
//! - PostgreSQL: `$1`, `$2`, ... (a repeated name reuses its index)
//! - MySQL / SQLite: `?` (one bound value per occurrence)
//!
//! Markers are found with the [sqlparser](https://docs.rs/sqlparser/)
//! tokenizer for the provider's dialect, so string literals (including
//! PostgreSQL dollar-quoted and `E'...'` strings), quoted identifiers and
//! comments (including MySQL `#` comments) are left alone, as are `@@`
//! system variables.

use crate::error::{DbError, DbResult};
use crate::mapping::Record;
use crate::models::{DatabaseType, Value};
use sqlparser::dialect::{Dialect, MySqlDialect, PostgreSqlDialect, SQLiteDialect};
use sqlparser::tokenizer::{Location, Token, TokenWithSpan, Tokenizer};
use sqlx::mysql::MySqlArguments;
use sqlx::postgres::PgArguments;
use sqlx::query::Query;
use sqlx::sqlite::SqliteArguments;
use sqlx::types::Json;
use sqlx::{MySql, Postgres, Sqlite};
use std::borrow::Cow;
use std::collections::{BTreeMap, HashMap};

/// Ordered set of named parameter values.
///
/// Names are stored as supplied, without the leading `@`. A marker resolves
/// to the exact name first; otherwise to the single name equal to it ignoring
/// ASCII case.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Params {
    entries: Vec<(String, Value)>,
}

fn normalize_name(name: &str) -> &str {
    name.trim().trim_start_matches('@')
}

impl Params {
    pub fn new() -> Self {
        Self::default()
    }

    /// Builder-style insert.
    pub fn with(mut self, name: impl AsRef<str>, value: impl Into<Value>) -> Self {
        self.insert(name, value);
        self
    }

    /// Insert a value, replacing one stored under exactly the same name.
    pub fn insert(&mut self, name: impl AsRef<str>, value: impl Into<Value>) {
        let name = normalize_name(name.as_ref());
        let value = value.into();
        match self.entries.iter().position(|(existing, _)| existing == name) {
            Some(idx) => self.entries[idx].1 = value,
            None => self.entries.push((name.to_string(), value)),
        }
    }

    /// Value for `name`, or `None` when it is missing or ambiguous.
    pub fn get(&self, name: &str) -> Option<&Value> {
        self.resolve(name).ok().map(|(_, value)| value)
    }

    /// Resolve a marker name to its entry index and value.
    pub(crate) fn resolve(&self, name: &str) -> DbResult<(usize, &Value)> {
        let name = normalize_name(name);
        if let Some(idx) = self.entries.iter().position(|(existing, _)| existing == name) {
            return Ok((idx, &self.entries[idx].1));
        }

        let mut folded = self
            .entries
            .iter()
            .enumerate()
            .filter(|(_, (existing, _))| existing.eq_ignore_ascii_case(name));
        match (folded.next(), folded.next()) {
            (Some((idx, (_, value))), None) => Ok((idx, value)),
            (None, _) => Err(DbError::parameter(name)),
            (Some(_), Some(_)) => Err(DbError::configuration(format!(
                "Parameter '@{}' matches several supplied names that differ only in case",
                name
            ))),
        }
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.entries.iter().map(|(name, value)| (name.as_str(), value))
    }

    /// Project every field of a record into parameters.
    pub fn from_record<T: Record>(record: &T) -> Self {
        T::FIELDS
            .iter()
            .map(|field| (field.name, (field.get)(record)))
            .collect()
    }
}

impl<K: AsRef<str>, V: Into<Value>> FromIterator<(K, V)> for Params {
    fn from_iter<I: IntoIterator<Item = (K, V)>>(iter: I) -> Self {
        let mut params = Params::new();
        for (name, value) in iter {
            params.insert(name, value);
        }
        params
    }
}

impl From<HashMap<String, Value>> for Params {
    fn from(map: HashMap<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

impl From<BTreeMap<String, Value>> for Params {
    fn from(map: BTreeMap<String, Value>) -> Self {
        map.into_iter().collect()
    }
}

/// SQL text rewritten for a provider, with values in bind order.
#[derive(Debug, Clone, PartialEq)]
pub struct BoundSql<'a> {
    sql: Cow<'a, str>,
    values: Vec<Value>,
    prepared: bool,
}

impl<'a> BoundSql<'a> {
    /// SQL without markers, executed as-is.
    pub fn unprepared(sql: &'a str) -> Self {
        Self {
            sql: Cow::Borrowed(sql),
            values: Vec::new(),
            prepared: false,
        }
    }

    pub fn sql(&self) -> &str {
        &self.sql
    }

    pub fn values(&self) -> &[Value] {
        &self.values
    }

    /// Whether the statement carries bind markers and must run as a prepared
    /// statement. Unprepared text may hold several statements.
    pub fn is_prepared(&self) -> bool {
        self.prepared
    }
}

/// Get the SQL dialect for the given database type.
fn get_dialect(db_type: DatabaseType) -> Box<dyn Dialect> {
    match db_type {
        DatabaseType::PostgreSQL => Box::new(PostgreSqlDialect {}),
        DatabaseType::MySQL => Box::new(MySqlDialect {}),
        DatabaseType::SQLite => Box::new(SQLiteDialect {}),
    }
}

/// Converts tokenizer locations (1-based line and character column) into
/// byte offsets.
struct LineIndex<'a> {
    sql: &'a str,
    starts: Vec<usize>,
}

impl<'a> LineIndex<'a> {
    fn new(sql: &'a str) -> Self {
        let starts = std::iter::once(0)
            .chain(sql.match_indices('\n').map(|(idx, _)| idx + 1))
            .collect();
        Self { sql, starts }
    }

    fn offset(&self, location: Location) -> usize {
        let line = usize::try_from(location.line).unwrap_or(usize::MAX).saturating_sub(1);
        let Some(&start) = self.starts.get(line) else {
            return self.sql.len();
        };
        let end = self.starts.get(line + 1).copied().unwrap_or(self.sql.len());
        let column = usize::try_from(location.column).unwrap_or(usize::MAX).saturating_sub(1);
        self.sql[start..end]
            .char_indices()
            .nth(column)
            .map_or(end, |(idx, _)| start + idx)
    }
}

/// A `@name` marker: the name and the byte range of the whole marker.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Marker<'a> {
    name: &'a str,
    start: usize,
    end: usize,
}

/// Locate the `@name` markers in `sql`.
///
/// Depending on the dialect a marker tokenizes either as `@` followed by a
/// bare word or as one word starting with `@`.
fn find_markers(sql: &str, db_type: DatabaseType) -> DbResult<Vec<Marker<'_>>> {
    let dialect = get_dialect(db_type);
    let tokens = Tokenizer::new(dialect.as_ref(), sql)
        .tokenize_with_location()
        .map_err(|e| DbError::configuration(format!("Failed to tokenize SQL: {}", e)))?;
    let index = LineIndex::new(sql);

    let marker = |first: &TokenWithSpan, last: &TokenWithSpan| {
        let start = index.offset(first.span.start);
        let end = index.offset(last.span.end);
        sql.get(start..end)
            .and_then(|text| text.strip_prefix('@'))
            .filter(|name| !name.is_empty() && !name.starts_with('@'))
            .map(|name| Marker { name, start, end })
    };

    let mut markers = Vec::new();
    let mut i = 0;
    while i < tokens.len() {
        let token = &tokens[i];
        match &token.token {
            Token::AtSign => match tokens.get(i + 1).map(|next| &next.token) {
                // `@@name` system variable
                Some(Token::AtSign) => {
                    i += 2;
                    if matches!(tokens.get(i).map(|t| &t.token), Some(Token::Word(_))) {
                        i += 1;
                    }
                    continue;
                }
                Some(Token::Word(word)) if word.quote_style.is_none() => {
                    markers.extend(marker(token, &tokens[i + 1]));
                    i += 2;
                    continue;
                }
                _ => {}
            },
            Token::Word(word) if word.quote_style.is_none() && word.value.starts_with('@') => {
                markers.extend(marker(token, token));
            }
            Token::Placeholder(text) if text.starts_with('@') => {
                markers.extend(marker(token, token));
            }
            _ => {}
        }
        i += 1;
    }
    Ok(markers)
}

/// Rewrite `@name` markers for `db_type` and collect their values.
///
/// SQL without markers comes back unprepared with zero binds. A marker whose
/// name is missing from `params` is a [`DbError::Parameter`]. PostgreSQL
/// receives NULL values as an inline `NULL` literal so the server infers the
/// type from context.
pub fn bind_named<'a>(
    sql: &'a str,
    params: Option<&Params>,
    db_type: DatabaseType,
) -> DbResult<BoundSql<'a>> {
    if !sql.contains('@') {
        return Ok(BoundSql::unprepared(sql));
    }
    let markers = find_markers(sql, db_type)?;
    if markers.is_empty() {
        return Ok(BoundSql::unprepared(sql));
    }

    let mut out = String::with_capacity(sql.len());
    let mut values = Vec::new();
    // entry index of each PostgreSQL slot
    let mut pg_slots: Vec<usize> = Vec::new();
    let mut copied_to = 0;

    for marker in markers {
        let (entry, value) = params
            .ok_or_else(|| DbError::parameter(marker.name))?
            .resolve(marker.name)?;

        out.push_str(&sql[copied_to..marker.start]);
        match db_type {
            DatabaseType::PostgreSQL if value.is_null() => out.push_str("NULL"),
            DatabaseType::PostgreSQL => {
                let slot = match pg_slots.iter().position(|&seen| seen == entry) {
                    Some(idx) => idx,
                    None => {
                        pg_slots.push(entry);
                        values.push(value.clone());
                        pg_slots.len() - 1
                    }
                };
                out.push('$');
                out.push_str(&(slot + 1).to_string());
            }
            DatabaseType::MySQL | DatabaseType::SQLite => {
                out.push('?');
                values.push(value.clone());
            }
        }
        copied_to = marker.end;
    }

    out.push_str(&sql[copied_to..]);
    Ok(BoundSql {
        sql: Cow::Owned(out),
        values,
        prepared: true,
    })
}

/// Validate SQL text and bind its parameters.
pub fn prepare<'a>(
    sql: &'a str,
    params: Option<&Params>,
    db_type: DatabaseType,
) -> DbResult<BoundSql<'a>> {
    if sql.trim().is_empty() {
        return Err(DbError::configuration("SQL text must not be empty"));
    }
    bind_named(sql, params, db_type)
}

/// Build a MySQL query with every value bound.
pub(crate) fn mysql_query<'q>(bound: &'q BoundSql<'_>) -> Query<'q, MySql, MySqlArguments> {
    bound
        .values
        .iter()
        .fold(sqlx::query(bound.sql()), bind_mysql_value)
}

/// Build a PostgreSQL query with every value bound.
pub(crate) fn postgres_query<'q>(bound: &'q BoundSql<'_>) -> Query<'q, Postgres, PgArguments> {
    bound
        .values
        .iter()
        .fold(sqlx::query(bound.sql()), bind_postgres_value)
}

/// Build a SQLite query with every value bound.
pub(crate) fn sqlite_query<'q>(
    bound: &'q BoundSql<'_>,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    bound
        .values
        .iter()
        .fold(sqlx::query(bound.sql()), bind_sqlite_value)
}

fn bind_mysql_value<'q>(
    query: Query<'q, MySql, MySqlArguments>,
    value: &'q Value,
) -> Query<'q, MySql, MySqlArguments> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Timestamp(v) => query.bind(*v),
        Value::Json(v) => query.bind(Json(v)),
    }
}

fn bind_postgres_value<'q>(
    query: Query<'q, Postgres, PgArguments>,
    value: &'q Value,
) -> Query<'q, Postgres, PgArguments> {
    match value {
        // normally inlined by bind_named
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Timestamp(v) => query.bind(*v),
        Value::Json(v) => query.bind(Json(v)),
    }
}

fn bind_sqlite_value<'q>(
    query: Query<'q, Sqlite, SqliteArguments<'q>>,
    value: &'q Value,
) -> Query<'q, Sqlite, SqliteArguments<'q>> {
    match value {
        Value::Null => query.bind(None::<String>),
        Value::Bool(v) => query.bind(*v),
        Value::Int(v) => query.bind(*v),
        Value::Float(v) => query.bind(*v),
        Value::Text(v) => query.bind(v.as_str()),
        Value::Bytes(v) => query.bind(v.as_slice()),
        Value::Timestamp(v) => query.bind(*v),
        // SQLite has no native JSON type, store as text
        Value::Json(v) => query.bind(v.to_string()),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params() -> Params {
        Params::new()
            .with("id", 7)
            .with("@name", "alice")
            .with("missing_value", None::<i64>)
    }

    #[test]
    fn test_no_markers_is_unprepared() {
        let bound = bind_named("CREATE TABLE t (id INT); SELECT 1", None, DatabaseType::SQLite)
            .unwrap();
        assert!(!bound.is_prepared());
        assert!(bound.values().is_empty());
        assert!(matches!(bound.sql, Cow::Borrowed(_)));
    }

    #[test]
    fn test_positional_markers() {
        let p = params();
        let sql = "SELECT * FROM users WHERE id = @id AND name = @Name OR id = @id";

        let mysql = bind_named(sql, Some(&p), DatabaseType::MySQL).unwrap();
        assert_eq!(
            mysql.sql(),
            "SELECT * FROM users WHERE id = ? AND name = ? OR id = ?"
        );
        assert_eq!(mysql.values().len(), 3);

        let pg = bind_named(sql, Some(&p), DatabaseType::PostgreSQL).unwrap();
        assert_eq!(
            pg.sql(),
            "SELECT * FROM users WHERE id = $1 AND name = $2 OR id = $1"
        );
        assert_eq!(
            pg.values(),
            &[Value::Int(7), Value::Text("alice".to_string())]
        );
        assert!(pg.is_prepared());
    }

    #[test]
    fn test_postgres_null_is_inlined() {
        let p = params();
        let pg = bind_named(
            "UPDATE t SET v = @missing_value WHERE id = @id",
            Some(&p),
            DatabaseType::PostgreSQL,
        )
        .unwrap();
        assert_eq!(pg.sql(), "UPDATE t SET v = NULL WHERE id = $1");
        assert_eq!(pg.values(), &[Value::Int(7)]);

        let sqlite = bind_named(
            "UPDATE t SET v = @missing_value",
            Some(&p),
            DatabaseType::SQLite,
        )
        .unwrap();
        assert_eq!(sqlite.values(), &[Value::Null]);
    }

    #[test]
    fn test_markers_in_literals_and_comments_are_ignored() {
        let p = params();
        let sql = "SELECT '@id', \"@id\", `@id` -- @id\n, /* @id */ @id, @@version";
        let bound = bind_named(sql, Some(&p), DatabaseType::MySQL).unwrap();
        assert_eq!(
            bound.sql(),
            "SELECT '@id', \"@id\", `@id` -- @id\n, /* @id */ ?, @@version"
        );
        assert_eq!(bound.values().len(), 1);
    }

    #[test]
    fn test_escaped_quotes() {
        let p = params();
        let bound = bind_named("SELECT 'it''s @id', @id", Some(&p), DatabaseType::SQLite).unwrap();
        assert_eq!(bound.sql(), "SELECT 'it''s @id', ?");

        let bound =
            bind_named(r"SELECT 'it\'s @id', @id", Some(&p), DatabaseType::MySQL).unwrap();
        assert_eq!(bound.sql(), r"SELECT 'it\'s @id', ?");
    }

    #[test]
    fn test_missing_parameter() {
        let err = bind_named("SELECT @nope", Some(&params()), DatabaseType::SQLite).unwrap_err();
        assert!(matches!(err, DbError::Parameter { ref name } if name == "nope"));

        let err = bind_named("SELECT @id", None, DatabaseType::SQLite).unwrap_err();
        assert!(err.is_configuration());
    }

    #[test]
    fn test_empty_sql_rejected() {
        assert!(prepare("   ", None, DatabaseType::SQLite).is_err());
    }

    #[test]
    fn test_params_from_maps() {
        let mut map = HashMap::new();
        map.insert("@Id".to_string(), Value::Int(1));
        let p = Params::from(map);
        assert_eq!(p.get("id"), Some(&Value::Int(1)));
        assert_eq!(p.get("@ID"), Some(&Value::Int(1)));
        assert_eq!(p.get("Id"), Some(&Value::Int(1)));
    }

    #[test]
    fn test_names_differing_in_case_are_kept_apart() {
        let mut map = HashMap::new();
        map.insert("a".to_string(), Value::Int(1));
        map.insert("A".to_string(), Value::Int(2));
        let p = Params::from(map);
        assert_eq!(p.len(), 2);
        assert_eq!(p.get("a"), Some(&Value::Int(1)));
        assert_eq!(p.get("A"), Some(&Value::Int(2)));

        let bound = bind_named("SELECT @A, @a", Some(&p), DatabaseType::SQLite).unwrap();
        assert_eq!(bound.values(), &[Value::Int(2), Value::Int(1)]);

        let err = bind_named("SELECT @a2 FROM t", Some(&p), DatabaseType::SQLite).unwrap_err();
        assert!(matches!(err, DbError::Parameter { .. }));
    }

    #[test]
    fn test_ambiguous_case_insensitive_match_is_rejected() {
        let p = Params::new().with("Total", 1).with("TOTAL", 2);
        assert_eq!(p.get("total"), None);
        let err = bind_named("SELECT @total", Some(&p), DatabaseType::MySQL).unwrap_err();
        assert!(err.is_configuration());
        assert!(err.to_string().contains("differ only in case"));

        let exact = bind_named("SELECT @TOTAL", Some(&p), DatabaseType::MySQL).unwrap();
        assert_eq!(exact.values(), &[Value::Int(2)]);
    }

    #[test]
    fn test_postgres_dollar_quoted_and_escape_strings() {
        let p = params();
        let bound = bind_named(
            "SELECT $$ user@host $$ AS s, @id",
            Some(&p),
            DatabaseType::PostgreSQL,
        )
        .unwrap();
        assert_eq!(bound.sql(), "SELECT $$ user@host $$ AS s, $1");

        let bound = bind_named(r"SELECT E'it\'s @x', @id", Some(&p), DatabaseType::PostgreSQL)
            .unwrap();
        assert_eq!(bound.sql(), r"SELECT E'it\'s @x', $1");
        assert_eq!(bound.values(), &[Value::Int(7)]);
    }

    #[test]
    fn test_mysql_hash_comment() {
        let p = params();
        let bound = bind_named(
            "SELECT @id # mail me @admin\n, @name",
            Some(&p),
            DatabaseType::MySQL,
        )
        .unwrap();
        assert_eq!(bound.sql(), "SELECT ? # mail me @admin\n, ?");
        assert_eq!(bound.values().len(), 2);
    }

    #[test]
    fn test_markers_across_lines_and_multibyte_text() {
        let p = params();
        let sql = "SELECT 'héllo',\n  @name\nFROM t WHERE id = @id";
        let bound = bind_named(sql, Some(&p), DatabaseType::SQLite).unwrap();
        assert_eq!(bound.sql(), "SELECT 'héllo',\n  ?\nFROM t WHERE id = ?");
        assert_eq!(
            bound.values(),
            &[Value::Text("alice".to_string()), Value::Int(7)]
        );
    }
}
