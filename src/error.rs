use rusqlite::Error as RusqliteError;
use std::io;
use thiserror::Error;

use crate::hypervisor::HypervisorType;

#[derive(Error, Debug)]
pub enum UpgradeError {
    #[error("I/O error: {0}")]
    IoError(#[from] io::Error),

    #[error("Database error: {0}")]
    DatabaseError(#[from] RusqliteError),

    #[error("Unable to find {0}")]
    ScriptNotFound(String),

    #[error("{context}: {source}")]
    SqlExecution {
        context: String,
        #[source]
        source: RusqliteError,
    },

    #[error("4.5.0 {hypervisor} SystemVm template not found. Cannot upgrade system Vms")]
    MissingRequiredTemplate { hypervisor: HypervisorType },

    #[error("Unable to drop key '{key}' from table '{table}': {reason}")]
    KeyDrop {
        table: String,
        key: String,
        reason: String,
    },

    #[error("Error: {0}")]
    Error(String),
}

impl UpgradeError {
    /// Returns a closure that wraps a rusqlite error with the name of the
    /// logical step that was running when it failed.
    pub fn sql(context: impl Into<String>) -> impl FnOnce(RusqliteError) -> UpgradeError {
        let context = context.into();
        move |source| UpgradeError::SqlExecution { context, source }
    }
}
