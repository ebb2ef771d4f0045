//! Fail-soft command result.

use crate::error::DbError;
use serde::Serialize;

/// Result of an outcome-style execution.
///
/// A successful outcome never carries an error; a failed one always carries
/// both a code and a message and reports zero affected records.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct CommandOutcome {
    success: bool,
    affected_records: u64,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_code: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error_message: Option<String>,
}

impl CommandOutcome {
    /// Code used when the failure did not come with a provider error code.
    pub const GENERAL_ERROR_CODE: &'static str = "General Error";

    pub fn succeeded(affected_records: u64) -> Self {
        Self {
            success: true,
            affected_records,
            error_code: None,
            error_message: None,
        }
    }

    pub fn failed(code: impl Into<String>, message: impl Into<String>) -> Self {
        let code = code.into();
        let message = message.into();
        Self {
            success: false,
            affected_records: 0,
            error_code: Some(if code.trim().is_empty() {
                Self::GENERAL_ERROR_CODE.to_string()
            } else {
                code
            }),
            error_message: Some(if message.trim().is_empty() {
                "Unknown error".to_string()
            } else {
                message
            }),
        }
    }

    /// Build a failed outcome from an error.
    ///
    /// Database errors keep the provider's code; everything else is tagged
    /// with [`Self::GENERAL_ERROR_CODE`].
    pub fn from_error(err: &DbError) -> Self {
        match err {
            DbError::Execution { code, message, .. } => Self::failed(
                code.as_deref().unwrap_or(Self::GENERAL_ERROR_CODE),
                message.as_str(),
            ),
            other => Self::failed(Self::GENERAL_ERROR_CODE, other.to_string()),
        }
    }

    pub fn success(&self) -> bool {
        self.success
    }

    pub fn affected_records(&self) -> u64 {
        self.affected_records
    }

    pub fn error_code(&self) -> Option<&str> {
        self.error_code.as_deref()
    }

    pub fn error_message(&self) -> Option<&str> {
        self.error_message.as_deref()
    }
}
