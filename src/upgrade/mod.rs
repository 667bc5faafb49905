mod v442_to_v450;

use std::fmt;
use std::panic::Location;
use std::path::PathBuf;

use log::{Level, Log, Record};
use rusqlite::Connection;

use crate::db::ScriptLocator;
use crate::error::UpgradeError;

pub use v442_to_v450::Upgrade442to450;

/// One step of the database upgrade path, run by the orchestrator in three
/// phases:
/// - prepare scripts: SQL files executed before any Rust code
/// - data migration: Rust code for changes that need lookups and decisions
/// - cleanup scripts: SQL files executed after the data migration
///
/// The orchestrator owns the connection and the transaction around all three
/// phases. A step never commits or rolls back on its own.
pub trait DbUpgrade {
    /// The `[from, to]` release pair this step upgrades between.
    fn upgradable_version_range(&self) -> [&'static str; 2];

    fn upgraded_version(&self) -> &'static str;

    fn supports_rolling_upgrade(&self) -> bool;

    fn prepare_scripts(&self, locator: &dyn ScriptLocator) -> Result<Vec<PathBuf>, UpgradeError>;

    fn perform_data_migration(&self, conn: &Connection, logger: &dyn Log) -> Result<(), UpgradeError>;

    fn cleanup_scripts(&self, locator: &dyn ScriptLocator) -> Result<Vec<PathBuf>, UpgradeError>;
}

/// Resolves a script that a step cannot run without.
pub(crate) fn required_script(
    locator: &dyn ScriptLocator,
    relative_path: &str,
) -> Result<PathBuf, UpgradeError> {
    locator
        .find_script(relative_path)
        .ok_or_else(|| UpgradeError::ScriptNotFound(relative_path.to_owned()))
}

/// Routes a step's log output to the logger it was handed instead of the
/// process-wide one. Records carry the step's module and the calling line.
#[derive(Clone, Copy)]
pub(crate) struct StepLogger<'a> {
    logger: &'a dyn Log,
    target: &'static str,
}

impl<'a> StepLogger<'a> {
    pub fn new(logger: &'a dyn Log, target: &'static str) -> Self {
        Self { logger, target }
    }

    #[track_caller]
    pub fn log(&self, level: Level, args: fmt::Arguments<'_>) {
        let caller = Location::caller();
        let record = Record::builder()
            .level(level)
            .target(self.target)
            .module_path_static(Some(self.target))
            .file_static(Some(caller.file()))
            .line(Some(caller.line()))
            .args(args)
            .build();

        if self.logger.enabled(record.metadata()) {
            self.logger.log(&record);
        }
    }

    #[track_caller]
    pub fn debug(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Debug, args);
    }

    #[track_caller]
    pub fn warn(&self, args: fmt::Arguments<'_>) {
        self.log(Level::Warn, args);
    }
}
