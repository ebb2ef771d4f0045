//! Data models shared across the data-access core.

pub mod connection;
pub mod outcome;
pub mod value;

pub use connection::{DatabaseType, IsolationLevel, TransactionState, mask_connection_string};
pub use outcome::CommandOutcome;
pub use value::{FromValue, Value, ValueError};
