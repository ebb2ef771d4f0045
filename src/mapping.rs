//! Result mapping: dynamic row maps and statically-typed records.
//!
//! Rows come off the wire as [`RowMap`]s (see [`crate::db::types`]). Typed
//! mapping then walks the columns and assigns each one to the field of the
//! same name through the record's field-descriptor table, which
//! [`impl_record!`](crate::impl_record) generates.

use crate::error::{DbError, DbResult};
use crate::models::{FromValue, Value, ValueError};
use serde::ser::{Serialize, SerializeMap, Serializer};

/// A single result row: column-ordered, case-insensitive lookup.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct RowMap {
    columns: Vec<(String, Value)>,
}

impl RowMap {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_capacity(capacity: usize) -> Self {
        Self {
            columns: Vec::with_capacity(capacity),
        }
    }

    fn position(&self, column: &str) -> Option<usize> {
        self.columns
            .iter()
            .position(|(name, _)| name.eq_ignore_ascii_case(column))
    }

    /// Insert a column value. A column that already exists (ignoring case)
    /// keeps its position and takes the new value.
    pub fn insert(&mut self, column: impl Into<String>, value: Value) {
        let column = column.into();
        match self.position(&column) {
            Some(idx) => self.columns[idx].1 = value,
            None => self.columns.push((column, value)),
        }
    }

    pub fn get(&self, column: &str) -> Option<&Value> {
        self.position(column).map(|idx| &self.columns[idx].1)
    }

    pub fn contains(&self, column: &str) -> bool {
        self.position(column).is_some()
    }

    /// Read a column coerced to `T`.
    pub fn try_get<T: FromValue>(&self, column: &str) -> DbResult<T> {
        let value = self
            .get(column)
            .ok_or_else(|| DbError::mapping("column not found in row", column))?;
        T::from_value(value.clone()).map_err(|e| DbError::mapping(e.to_string(), column))
    }

    /// Column names in result order.
    pub fn columns(&self) -> impl Iterator<Item = &str> {
        self.columns.iter().map(|(name, _)| name.as_str())
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &Value)> {
        self.columns.iter().map(|(name, value)| (name.as_str(), value))
    }

    pub fn len(&self) -> usize {
        self.columns.len()
    }

    pub fn is_empty(&self) -> bool {
        self.columns.is_empty()
    }

    /// Value of the first column, if any.
    pub fn first_value(&self) -> Option<&Value> {
        self.columns.first().map(|(_, value)| value)
    }
}

impl IntoIterator for RowMap {
    type Item = (String, Value);
    type IntoIter = std::vec::IntoIter<(String, Value)>;

    fn into_iter(self) -> Self::IntoIter {
        self.columns.into_iter()
    }
}

impl<K: Into<String>> FromIterator<(K, Value)> for RowMap {
    fn from_iter<I: IntoIterator<Item = (K, Value)>>(iter: I) -> Self {
        let mut row = RowMap::new();
        for (column, value) in iter {
            row.insert(column, value);
        }
        row
    }
}

impl Serialize for RowMap {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.columns.len()))?;
        for (name, value) in &self.columns {
            map.serialize_entry(name, value)?;
        }
        map.end()
    }
}

/// Descriptor for one field of a [`Record`].
pub struct Field<T> {
    /// Column name the field maps to (matched case-insensitively).
    pub name: &'static str,
    /// Whether the field accepts NULL.
    pub nullable: bool,
    pub get: fn(&T) -> Value,
    pub set: fn(&mut T, Value) -> Result<(), ValueError>,
}

impl<T> std::fmt::Debug for Field<T> {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Field")
            .field("name", &self.name)
            .field("nullable", &self.nullable)
            .finish()
    }
}

/// A plain record type with a static field-descriptor table.
///
/// Implement it with [`impl_record!`](crate::impl_record).
pub trait Record: Default + Send + 'static {
    const FIELDS: &'static [Field<Self>];

    fn field(name: &str) -> Option<&'static Field<Self>> {
        Self::FIELDS
            .iter()
            .find(|field| field.name.eq_ignore_ascii_case(name))
    }
}

/// Map one row into a record.
///
/// Matching columns are assigned through the field setter. A NULL column
/// leaves a non-nullable field at its default; unmatched columns and fields
/// are ignored.
pub fn map_row<T: Record>(row: RowMap) -> DbResult<T> {
    let mut record = T::default();
    for (column, value) in row {
        let Some(field) = T::field(&column) else {
            continue;
        };
        if value.is_null() && !field.nullable {
            continue;
        }
        (field.set)(&mut record, value).map_err(|e| DbError::mapping(e.to_string(), column))?;
    }
    Ok(record)
}

/// Map every row, preserving order.
pub fn map_rows<T: Record>(rows: Vec<RowMap>) -> DbResult<Vec<T>> {
    rows.into_iter().map(map_row).collect()
}

/// Implement [`Record`] for a struct by listing its mapped fields.
///
/// ```ignore
/// #[derive(Debug, Default, Clone, PartialEq)]
/// struct User {
///     id: i64,
///     username: String,
///     email: Option<String>,
/// }
///
/// impl_record!(User {
///     id: i64,
///     username as "user_name": String,
///     email: Option<String>,
/// });
/// ```
#[macro_export]
macro_rules! impl_record {
    ($ty:ty { $($field:ident $(as $column:literal)? : $fty:ty),+ $(,)? }) => {
        impl $crate::mapping::Record for $ty {
            const FIELDS: &'static [$crate::mapping::Field<Self>] = &[
                $(
                    $crate::mapping::Field {
                        name: $crate::impl_record!(@column $field $(, $column)?),
                        nullable: <$fty as $crate::models::FromValue>::NULLABLE,
                        get: |record: &$ty| $crate::models::Value::from(record.$field.clone()),
                        set: |record: &mut $ty, value: $crate::models::Value| {
                            record.$field = <$fty as $crate::models::FromValue>::from_value(value)?;
                            Ok(())
                        },
                    },
                )+
            ];
        }
    };
    (@column $field:ident) => {
        stringify!($field)
    };
    (@column $field:ident, $column:literal) => {
        $column
    };
}
