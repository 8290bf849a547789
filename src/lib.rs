pub mod command;
pub mod mapping;
pub mod parameters;
pub mod result;
pub mod row;
pub mod str_utils;

#[cfg(feature = "postgresql")]
pub mod conduit_postgresql;
#[cfg(feature = "sqlite")]
pub mod conduit_sqlite;

mod deferred;

// Re-export types for convenience
pub use command::{Command, CommandKind};
pub use mapping::{MultiRow, SetTuple};
pub use result::{ConduitError, Result};
pub use row::{Row, from_row};

#[cfg(feature = "postgresql")]
pub use conduit_postgresql::{PostgresBatchReader, PostgresConduit, PostgresTxn};
#[cfg(feature = "sqlite")]
pub use conduit_sqlite::{SqliteBatchReader, SqliteConduit, SqliteTxn};

// Re-export third-party types used in the public API to provide fallback for dependency conflicts
pub use serde_json::Value as JsonValue;
