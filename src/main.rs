mod cli;
mod config;
mod database;
mod db;
mod error;
mod hypervisor;
mod upgrade;

#[cfg(test)]
mod test_support;

use std::process::ExitCode;

use cli::Cli;
use config::{Config, CONFIG};
use directories::ProjectDirs;
use flexi_logger::{
    detailed_format, Cleanup, Criterion, Duplicate, FileSpec, FlexiLoggerError, Logger,
    LoggerHandle, Naming,
};
use log::{error, info};

fn main() -> ExitCode {
    let Some(project_dirs) = ProjectDirs::from("", "", "cloud-db-upgrade") else {
        eprintln!("Could not determine the application data directory");
        return ExitCode::FAILURE;
    };

    let config = Config::load_config(&project_dirs);

    // Keep the handle alive for the whole run so buffered output is flushed on exit
    let logger = match setup_logging(&project_dirs, &config) {
        Ok(handle) => Some(handle),
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            None
        }
    };

    info!(
        "cloud-db-upgrade {} starting, data directory {}",
        env!("CARGO_PKG_VERSION"),
        project_dirs.data_local_dir().display()
    );

    if CONFIG.set(config).is_err() {
        eprintln!("Configuration was already initialized");
    }

    let result = Cli::handle_command_line();
    if let Err(e) = &result {
        error!("{}", e);
        eprintln!("Upgrade failed: {}", e);
    }

    if let Some(handle) = logger {
        handle.flush();
    }

    match result {
        Ok(()) => ExitCode::SUCCESS,
        Err(_) => ExitCode::FAILURE,
    }
}

fn setup_logging(
    project_dirs: &ProjectDirs,
    config: &Config,
) -> Result<LoggerHandle, FlexiLoggerError> {
    let log_dir = project_dirs.data_local_dir().join("logs");

    Logger::try_with_str(config.logging.log_spec())?
        .log_to_file(FileSpec::default().directory(log_dir))
        .duplicate_to_stderr(Duplicate::Warn)
        .format_for_files(detailed_format)
        .rotate(
            Criterion::Size(10 * 1024 * 1024),
            Naming::Timestamps,
            Cleanup::KeepLogFiles(7),
        )
        .start()
}
