//! Named driver registry.
//!
//! Each logical database is registered once with a construction function.
//! [`DriverFactory::get`] resolves a name case-insensitively and builds a
//! fresh [`Driver`] on every call; no instances are cached.

use crate::driver::Driver;
use crate::error::{DbError, DbResult};
use crate::retry::RetryPolicy;
use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;
use tracing::debug;

/// Shared inputs available to every driver construction function.
#[derive(Debug, Clone, Default)]
pub struct ServiceContext {
    retry_policy: Option<RetryPolicy>,
    settings: HashMap<String, String>,
}

impl ServiceContext {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_retry_policy(mut self, retry_policy: RetryPolicy) -> Self {
        self.retry_policy = Some(retry_policy);
        self
    }

    /// Add a named setting, typically a connection string.
    pub fn with_setting(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.settings.insert(key.into(), value.into());
        self
    }

    pub fn retry_policy(&self) -> Option<RetryPolicy> {
        self.retry_policy
    }

    pub fn setting(&self, key: &str) -> Option<&str> {
        self.settings.get(key).map(String::as_str)
    }
}

type Construct = dyn Fn(&ServiceContext) -> DbResult<Driver> + Send + Sync;

/// One logical database and how to build its driver.
#[derive(Clone)]
pub struct DriverRegistration {
    name: String,
    construct: Arc<Construct>,
}

impl fmt::Debug for DriverRegistration {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("DriverRegistration")
            .field("name", &self.name)
            .finish_non_exhaustive()
    }
}

impl DriverRegistration {
    pub fn new<F>(name: impl Into<String>, construct: F) -> DbResult<Self>
    where
        F: Fn(&ServiceContext) -> DbResult<Driver> + Send + Sync + 'static,
    {
        let name = name.into();
        if name.trim().is_empty() {
            return Err(DbError::configuration("Driver registration name must not be empty"));
        }
        Ok(Self {
            name,
            construct: Arc::new(construct),
        })
    }

    /// Register a fixed connection string, using the context's retry policy.
    pub fn from_connection_string(
        name: impl Into<String>,
        connection_string: impl Into<String>,
    ) -> DbResult<Self> {
        let connection_string: String = connection_string.into();
        Self::new(name, move |ctx| {
            Driver::new(connection_string.clone(), ctx.retry_policy())
        })
    }

    /// Register a driver whose connection string is read from a context
    /// setting at construction time.
    pub fn from_setting(name: impl Into<String>, key: impl Into<String>) -> DbResult<Self> {
        let key: String = key.into();
        Self::new(name, move |ctx| {
            let connection_string = ctx.setting(&key).ok_or_else(|| {
                DbError::configuration(format!("Setting '{}' is not defined", key))
            })?;
            Driver::new(connection_string, ctx.retry_policy())
        })
    }

    pub fn name(&self) -> &str {
        &self.name
    }
}

/// Registry resolving logical database names to new drivers.
#[derive(Debug, Clone)]
pub struct DriverFactory {
    registrations: HashMap<String, DriverRegistration>,
    context: ServiceContext,
}

impl DriverFactory {
    /// Build the registry. Names are compared case-insensitively and a later
    /// registration replaces an earlier one with the same name.
    pub fn new(
        registrations: impl IntoIterator<Item = DriverRegistration>,
        context: ServiceContext,
    ) -> Self {
        let mut map = HashMap::new();
        for registration in registrations {
            let key = registration.name.trim().to_lowercase();
            let name = registration.name.clone();
            if map.insert(key, registration).is_some() {
                debug!(name = %name, "Duplicate driver registration replaced the earlier one");
            }
        }
        Self {
            registrations: map,
            context,
        }
    }

    /// Construct a new driver for `name`.
    pub fn get(&self, name: &str) -> DbResult<Driver> {
        let registration = self
            .registrations
            .get(&name.trim().to_lowercase())
            .ok_or_else(|| DbError::driver_not_found(name, self.not_found_hint()))?;
        debug!(name = %registration.name, "Constructing driver");
        (registration.construct)(&self.context)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.registrations
            .contains_key(&name.trim().to_lowercase())
    }

    /// Registered names, sorted.
    pub fn names(&self) -> Vec<&str> {
        let mut names: Vec<&str> = self
            .registrations
            .values()
            .map(|r| r.name.as_str())
            .collect();
        names.sort_unstable();
        names
    }

    pub fn len(&self) -> usize {
        self.registrations.len()
    }

    pub fn is_empty(&self) -> bool {
        self.registrations.is_empty()
    }

    fn not_found_hint(&self) -> String {
        if self.registrations.is_empty() {
            "No databases are registered".to_string()
        } else {
            format!("Registered databases: {}", self.names().join(", "))
        }
    }
}
