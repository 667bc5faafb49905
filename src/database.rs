use std::fs;
use std::path::{Path, PathBuf};

use log::{info, Level};
use logging_timer::timer;
use rusqlite::{Connection, OpenFlags};

use crate::db::ScriptLocator;
use crate::error::UpgradeError;
use crate::upgrade::DbUpgrade;

pub struct Database {
    conn: Connection,
    path: PathBuf,
}

impl Database {
    /// Opens an existing database. An upgrade never creates one.
    pub fn open(path: &Path) -> Result<Self, UpgradeError> {
        if !path.is_file() {
            return Err(UpgradeError::Error(format!(
                "Database file '{}' does not exist",
                path.display()
            )));
        }

        let conn = Connection::open_with_flags(
            path,
            OpenFlags::SQLITE_OPEN_READ_WRITE | OpenFlags::SQLITE_OPEN_NO_MUTEX,
        )?;
        info!("Database opened at: {}", path.display());

        Ok(Self {
            conn,
            path: path.to_path_buf(),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    #[cfg(test)]
    pub fn conn(&self) -> &Connection {
        &self.conn
    }

    /// Runs every phase of `upgrade` in a single transaction: prepare scripts,
    /// data migration, cleanup scripts. Scripts are resolved before anything
    /// runs. On error the transaction is dropped, which rolls it back.
    pub fn apply_upgrade(
        &mut self,
        upgrade: &dyn DbUpgrade,
        locator: &dyn ScriptLocator,
    ) -> Result<(), UpgradeError> {
        let [from, to] = upgrade.upgradable_version_range();
        let _tmr = timer!(Level::Debug; "Database::apply_upgrade", "{} -> {}", from, to);

        let prepare_scripts = upgrade.prepare_scripts(locator)?;
        let cleanup_scripts = upgrade.cleanup_scripts(locator)?;

        info!("Upgrading database from {} to {}", from, to);

        let tx = self.conn.transaction()?;

        run_scripts(&tx, &prepare_scripts)?;
        upgrade.perform_data_migration(&tx, log::logger())?;
        run_scripts(&tx, &cleanup_scripts)?;

        tx.commit()?;

        info!("Database upgraded to {}", upgrade.upgraded_version());
        Ok(())
    }
}

fn run_scripts(conn: &Connection, scripts: &[PathBuf]) -> Result<(), UpgradeError> {
    for script in scripts {
        info!("Running script {}", script.display());
        let sql = fs::read_to_string(script)?;
        conn.execute_batch(&sql).map_err(UpgradeError::sql(format!(
            "Error while running script {}",
            script.display()
        )))?;
    }

    Ok(())
}
