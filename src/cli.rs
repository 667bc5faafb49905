use std::path::PathBuf;

use clap::{Parser, Subcommand};
use log::info;

use crate::config::Config;
use crate::database::Database;
use crate::db::SearchPathLocator;
use crate::error::UpgradeError;
use crate::upgrade::{DbUpgrade, Upgrade442to450};

#[derive(Parser)]
#[command(
    name = "cloud-db-upgrade",
    version,
    about = "Upgrades a cloud management database from 4.4.2 to 4.5.0"
)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Subcommand)]
pub enum Command {
    /// Apply the 4.4.2 to 4.5.0 upgrade to a database
    Upgrade {
        /// Database file (default: database.path from the config file)
        #[arg(long = "db", short = 'd')]
        db: Option<PathBuf>,

        /// Directory to search for db/*.sql scripts, ahead of the configured ones (repeatable)
        #[arg(long = "scripts-dir", short = 's')]
        scripts_dir: Vec<PathBuf>,
    },

    /// Show the upgrade's version range and where its scripts resolve
    Info {
        /// Directory to search for db/*.sql scripts, ahead of the configured ones (repeatable)
        #[arg(long = "scripts-dir", short = 's')]
        scripts_dir: Vec<PathBuf>,
    },
}

impl Cli {
    pub fn handle_command_line() -> Result<(), UpgradeError> {
        let args = Cli::parse();
        args.run(&Config::global())
    }

    fn run(self, config: &Config) -> Result<(), UpgradeError> {
        match self.command {
            Command::Upgrade { db, scripts_dir } => {
                let db_path = db.unwrap_or_else(|| config.database.path.clone());
                let locator = Self::locator(config, scripts_dir);
                Self::upgrade(db_path, &locator)
            }
            Command::Info { scripts_dir } => {
                let locator = Self::locator(config, scripts_dir);
                Self::info(&locator)
            }
        }
    }

    /// Command-line directories are searched before configured ones.
    fn locator(config: &Config, scripts_dir: Vec<PathBuf>) -> SearchPathLocator {
        SearchPathLocator::new(
            scripts_dir
                .into_iter()
                .chain(config.scripts.search_paths.iter().cloned()),
        )
    }

    fn upgrade(db_path: PathBuf, locator: &SearchPathLocator) -> Result<(), UpgradeError> {
        let mut db = Database::open(&db_path)?;
        db.apply_upgrade(&Upgrade442to450, locator)?;

        info!("Upgrade of {} complete", db.path().display());
        println!(
            "Upgraded {} to {}",
            db.path().display(),
            Upgrade442to450.upgraded_version()
        );
        Ok(())
    }

    fn info(locator: &SearchPathLocator) -> Result<(), UpgradeError> {
        let upgrade = Upgrade442to450;
        let [from, to] = upgrade.upgradable_version_range();

        println!("Upgrade:          {} -> {}", from, to);
        println!("Upgraded version: {}", upgrade.upgraded_version());
        println!(
            "Rolling upgrade:  {}",
            if upgrade.supports_rolling_upgrade() {
                "supported"
            } else {
                "not supported"
            }
        );
        println!("Prepare scripts:  {}", describe_scripts(upgrade.prepare_scripts(locator))?);
        println!("Cleanup scripts:  {}", describe_scripts(upgrade.cleanup_scripts(locator))?);

        let search_paths: Vec<String> = locator
            .search_paths()
            .iter()
            .map(|p| p.display().to_string())
            .collect();
        println!("Search paths:     {}", search_paths.join(", "));

        Ok(())
    }
}

fn describe_scripts(scripts: Result<Vec<PathBuf>, UpgradeError>) -> Result<String, UpgradeError> {
    match scripts {
        Ok(paths) => Ok(paths
            .iter()
            .map(|p| p.display().to_string())
            .collect::<Vec<_>>()
            .join(", ")),
        Err(UpgradeError::ScriptNotFound(path)) => Ok(format!("{path} (not found)")),
        Err(e) => Err(e),
    }
}
