//! CRUD statement builder.
//!
//! Builds `INSERT`, `UPDATE` and `DELETE` text with `@name` markers from a
//! [`Record`]'s field table and projects the record into matching [`Params`].
//! Identifiers are emitted unquoted.

use crate::db::{IDENTITY_PLACEHOLDER, Params};
use crate::error::{DbError, DbResult};
use crate::mapping::{Field, Record};

fn checked_table(table: &str) -> DbResult<&str> {
    let table = table.trim();
    if table.is_empty() {
        return Err(DbError::configuration("Table name must not be empty"));
    }
    Ok(table)
}

fn checked_fields<T: Record>() -> DbResult<&'static [Field<T>]> {
    if T::FIELDS.is_empty() {
        return Err(DbError::configuration(format!(
            "Record type {} exposes no fields",
            std::any::type_name::<T>()
        )));
    }
    Ok(T::FIELDS)
}

fn checked_keys<T: Record>(keys: &[&str]) -> DbResult<Vec<&'static str>> {
    if keys.is_empty() {
        return Err(DbError::configuration("At least one key column is required"));
    }
    keys.iter()
        .map(|key| {
            T::field(key).map(|field| field.name).ok_or_else(|| {
                DbError::configuration(format!(
                    "Key column '{}' is not a field of {}",
                    key,
                    std::any::type_name::<T>()
                ))
            })
        })
        .collect()
}

fn assignments<'a>(columns: impl Iterator<Item = &'a str>, separator: &str) -> String {
    columns
        .map(|c| format!("{c} = @{c}"))
        .collect::<Vec<_>>()
        .join(separator)
}

fn is_key(keys: &[&str], name: &str) -> bool {
    keys.iter().any(|k| k.eq_ignore_ascii_case(name))
}

/// `INSERT INTO table (cols) VALUES (@cols)` over every field.
pub fn insert<T: Record>(table: &str, record: &T) -> DbResult<(String, Params)> {
    let table = checked_table(table)?;
    let fields = checked_fields::<T>()?;
    let columns: Vec<&str> = fields.iter().map(|f| f.name).collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({})",
        table,
        columns.join(", "),
        columns
            .iter()
            .map(|c| format!("@{c}"))
            .collect::<Vec<_>>()
            .join(", ")
    );
    Ok((sql, Params::from_record(record)))
}

/// Insert every field except `identity_column` and append the identity
/// placeholder, for use with `insert_and_get_id`.
pub fn insert_with_identity<T: Record>(
    table: &str,
    record: &T,
    identity_column: &str,
) -> DbResult<(String, Params)> {
    let table = checked_table(table)?;
    let fields = checked_fields::<T>()?;
    let columns: Vec<&str> = fields
        .iter()
        .map(|f| f.name)
        .filter(|name| !name.eq_ignore_ascii_case(identity_column))
        .collect();
    if columns.is_empty() {
        return Err(DbError::configuration(format!(
            "Record type {} has no fields besides '{}'",
            std::any::type_name::<T>(),
            identity_column
        )));
    }
    let params: Params = fields
        .iter()
        .filter(|f| !f.name.eq_ignore_ascii_case(identity_column))
        .map(|f| (f.name, (f.get)(record)))
        .collect();
    let sql = format!(
        "INSERT INTO {} ({}) VALUES ({}); {}",
        table,
        columns.join(", "),
        columns
            .iter()
            .map(|c| format!("@{c}"))
            .collect::<Vec<_>>()
            .join(", "),
        IDENTITY_PLACEHOLDER
    );
    Ok((sql, params))
}

/// `UPDATE table SET non-keys WHERE keys`.
pub fn update<T: Record>(table: &str, record: &T, keys: &[&str]) -> DbResult<(String, Params)> {
    let table = checked_table(table)?;
    let fields = checked_fields::<T>()?;
    let keys = checked_keys::<T>(keys)?;
    let set_columns: Vec<&str> = fields
        .iter()
        .map(|f| f.name)
        .filter(|name| !is_key(&keys, name))
        .collect();
    if set_columns.is_empty() {
        return Err(DbError::configuration("UPDATE needs at least one non-key field"));
    }
    let sql = format!(
        "UPDATE {} SET {} WHERE {}",
        table,
        assignments(set_columns.into_iter(), ", "),
        assignments(keys.iter().copied(), " AND ")
    );
    Ok((sql, Params::from_record(record)))
}

/// `DELETE FROM table WHERE keys`.
pub fn delete<T: Record>(table: &str, record: &T, keys: &[&str]) -> DbResult<(String, Params)> {
    let table = checked_table(table)?;
    let fields = checked_fields::<T>()?;
    let keys = checked_keys::<T>(keys)?;
    let params: Params = fields
        .iter()
        .filter(|f| is_key(&keys, f.name))
        .map(|f| (f.name, (f.get)(record)))
        .collect();
    let sql = format!(
        "DELETE FROM {} WHERE {}",
        table,
        assignments(keys.iter().copied(), " AND ")
    );
    Ok((sql, params))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::Value;

    #[derive(Debug, Default, Clone)]
    struct Account {
        id: i64,
        owner: String,
        balance: f64,
    }

    crate::impl_record!(Account {
        id: i64,
        owner: String,
        balance: f64,
    });

    #[derive(Debug, Default)]
    struct Empty;

    impl Record for Empty {
        const FIELDS: &'static [Field<Self>] = &[];
    }

    fn account() -> Account {
        Account {
            id: 7,
            owner: "ada".into(),
            balance: 12.5,
        }
    }

    #[test]
    fn test_insert() {
        let (sql, params) = insert("accounts", &account()).unwrap();
        assert_eq!(
            sql,
            "INSERT INTO accounts (id, owner, balance) VALUES (@id, @owner, @balance)"
        );
        assert_eq!(params.len(), 3);
        assert_eq!(params.get("owner"), Some(&Value::Text("ada".into())));
    }

    #[test]
    fn test_insert_with_identity_skips_identity_column() {
        let (sql, params) = insert_with_identity("accounts", &account(), "ID").unwrap();
        assert_eq!(
            sql,
            "INSERT INTO accounts (owner, balance) VALUES (@owner, @balance); {IDENTITY}"
        );
        assert!(params.get("id").is_none());
    }

    #[test]
    fn test_update_and_delete() {
        let (sql, params) = update("accounts", &account(), &["id"]).unwrap();
        assert_eq!(
            sql,
            "UPDATE accounts SET owner = @owner, balance = @balance WHERE id = @id"
        );
        assert_eq!(params.len(), 3);

        let (sql, params) = delete("accounts", &account(), &["Id"]).unwrap();
        assert_eq!(sql, "DELETE FROM accounts WHERE id = @id");
        assert_eq!(params.get("id"), Some(&Value::Int(7)));
        assert_eq!(params.len(), 1);
    }

    #[test]
    fn test_rejections() {
        assert!(insert(" ", &account()).unwrap_err().is_configuration());
        assert!(insert("t", &Empty).unwrap_err().is_configuration());
        assert!(update("t", &account(), &[]).unwrap_err().is_configuration());
        assert!(delete("t", &account(), &["missing"]).unwrap_err().is_configuration());
        assert!(
            update("t", &account(), &["id", "owner", "balance"])
                .unwrap_err()
                .is_configuration()
        );
    }
}
