//! Identity placeholder substitution for insert-and-return-key statements.
//!
//! Callers write the placeholder after the statement terminator:
//!
//! ```text
//! INSERT INTO users (name) VALUES (@name); {IDENTITY}
//! ```
//!
//! Text before the first placeholder runs as a command. The provider's
//! identity query, followed by whatever trails the placeholder, then runs as a
//! scalar query on the same connection. Substitution is textual: a later
//! occurrence of the placeholder is passed through verbatim, and SQL without
//! one (e.g. `INSERT ... RETURNING id`) runs whole as the scalar query.

/// Token replaced with the provider's identity query.
pub const IDENTITY_PLACEHOLDER: &str = "{IDENTITY}";

/// Insert SQL split around the identity placeholder.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySql<'a> {
    /// Statement to execute first, if the text had one before the placeholder.
    pub statement: Option<&'a str>,
    /// Query whose first column of the first row is the generated key.
    pub scalar_query: String,
}

/// Split `sql` around the first placeholder, substituting `identity_sql`.
pub fn split_identity<'a>(sql: &'a str, identity_sql: &str) -> IdentitySql<'a> {
    let Some(pos) = sql.find(IDENTITY_PLACEHOLDER) else {
        return IdentitySql {
            statement: None,
            scalar_query: sql.to_string(),
        };
    };

    let statement = sql[..pos].trim_end().trim_end_matches(';').trim_end();
    let trailing = &sql[pos + IDENTITY_PLACEHOLDER.len()..];

    IdentitySql {
        statement: (!statement.trim().is_empty()).then_some(statement),
        scalar_query: format!("{}{}", identity_sql, trailing),
    }
}
