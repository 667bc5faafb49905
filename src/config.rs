use std::fs;
use std::path::{Path, PathBuf};

use directories::ProjectDirs;
use figment::{
    providers::{Env, Format, Serialized, Toml},
    Figment,
};
use once_cell::sync::OnceCell;
use serde::{Deserialize, Serialize};

pub static CONFIG: OnceCell<Config> = OnceCell::new();

const ENV_PREFIX: &str = "CLOUD_DB_UPGRADE_";

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct LoggingConfig {
    pub level: String,
    pub rusqlite: String,
}

impl LoggingConfig {
    const LOG_LEVELS: [&str; 5] = ["error", "warn", "info", "debug", "trace"];
    const DEFAULT_LEVEL: &str = "info";
    const RUSQLITE_LEVEL: &str = "warn";

    /// flexi_logger spec: everything else stays at warn.
    pub fn log_spec(&self) -> String {
        format!(
            "warn,cloud_db_upgrade={},rusqlite={}",
            self.level, self.rusqlite
        )
    }

    fn ensure_valid(&mut self) {
        Self::ensure_level(&mut self.level, "level", Self::DEFAULT_LEVEL);
        Self::ensure_level(&mut self.rusqlite, "rusqlite", Self::RUSQLITE_LEVEL);
    }

    fn ensure_level(level: &mut String, name: &str, default: &str) {
        let original = level.clone();
        *level = level.trim().to_ascii_lowercase();
        if !Self::LOG_LEVELS.contains(&level.as_str()) {
            eprintln!(
                "Config error: {} log level of '{}' is invalid - using default of '{}'",
                name, original, default
            );
            *level = default.to_owned();
        }
    }
}

impl Default for LoggingConfig {
    fn default() -> Self {
        LoggingConfig {
            level: Self::DEFAULT_LEVEL.to_owned(),
            rusqlite: Self::RUSQLITE_LEVEL.to_owned(),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct DatabaseConfig {
    pub path: PathBuf,
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        DatabaseConfig {
            path: PathBuf::from("cloud.db"),
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct ScriptsConfig {
    /// Directories searched, in order, for `db/*.sql` upgrade scripts.
    pub search_paths: Vec<PathBuf>,
}

impl Default for ScriptsConfig {
    fn default() -> Self {
        ScriptsConfig {
            search_paths: vec![PathBuf::from(".")],
        }
    }
}

#[derive(Serialize, Deserialize, Debug, Clone, Default, PartialEq)]
pub struct Config {
    pub logging: LoggingConfig,
    pub database: DatabaseConfig,
    pub scripts: ScriptsConfig,
}

impl Config {
    /// Loads the configuration from a TOML file located in the app's data
    /// directory, with `CLOUD_DB_UPGRADE_*` environment variables layered on
    /// top. If the file is missing or fails to parse, defaults are used.
    /// Additionally, writes the default config to disk if no file exists.
    pub fn load_config(project_dirs: &ProjectDirs) -> Self {
        let config_path = project_dirs.data_local_dir().join("config.toml");

        if !config_path.exists() {
            Self::write_default(&config_path);
        }

        Self::extract(Self::figment(&config_path), &config_path)
    }

    /// The loaded configuration, or defaults if none was loaded.
    pub fn global() -> Config {
        CONFIG.get().cloned().unwrap_or_default()
    }

    fn figment(config_path: &Path) -> Figment {
        Figment::from(Serialized::defaults(Config::default()))
            .merge(Toml::file(config_path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    fn extract(figment: Figment, config_path: &Path) -> Self {
        let mut config = figment.extract().unwrap_or_else(|err| {
            eprintln!(
                "Could not load config file {}: {}. Using default configuration.",
                config_path.display(),
                err
            );
            Config::default()
        });

        config.ensure_valid();

        config
    }

    fn write_default(config_path: &Path) {
        if let Some(parent) = config_path.parent() {
            if let Err(e) = fs::create_dir_all(parent) {
                eprintln!(
                    "Failed to create configuration directory {}: {}",
                    parent.display(),
                    e
                );
            }
        }

        match toml::to_string_pretty(&Config::default()) {
            Ok(toml_string) => {
                if let Err(e) = fs::write(config_path, toml_string) {
                    eprintln!(
                        "Failed to write default config to {}: {}",
                        config_path.display(),
                        e
                    );
                }
            }
            Err(_) => eprintln!("Failed to serialize default config."),
        }
    }

    fn ensure_valid(&mut self) {
        self.logging.ensure_valid();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use figment::Jail;
    use pretty_assertions::assert_eq;

    #[test]
    fn test_defaults_when_no_file() {
        Jail::expect_with(|jail| {
            let path = jail.directory().join("config.toml");
            let config = Config::extract(Config::figment(&path), &path);
            assert_eq!(config, Config::default());
            assert_eq!(config.database.path, PathBuf::from("cloud.db"));
            assert_eq!(config.scripts.search_paths, vec![PathBuf::from(".")]);
            Ok(())
        });
    }

    #[test]
    fn test_file_and_env_layering() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [logging]
                level = " DEBUG "

                [database]
                path = "/var/lib/cloud/cloud.db"

                [scripts]
                search_paths = ["/usr/share/cloud/setup", "."]
                "#,
            )?;
            jail.set_env("CLOUD_DB_UPGRADE_DATABASE__PATH", "/tmp/override.db");

            let path = jail.directory().join("config.toml");
            let config = Config::extract(Config::figment(&path), &path);

            assert_eq!(config.logging.level, "debug");
            assert_eq!(config.logging.rusqlite, "warn");
            assert_eq!(config.database.path, PathBuf::from("/tmp/override.db"));
            assert_eq!(
                config.scripts.search_paths,
                vec![PathBuf::from("/usr/share/cloud/setup"), PathBuf::from(".")]
            );
            Ok(())
        });
    }

    #[test]
    fn test_invalid_log_level_falls_back_to_default() {
        Jail::expect_with(|jail| {
            jail.create_file(
                "config.toml",
                r#"
                [logging]
                level = "loud"
                rusqlite = "Trace"
                "#,
            )?;

            let path = jail.directory().join("config.toml");
            let config = Config::extract(Config::figment(&path), &path);
            assert_eq!(config.logging.level, "info");
            assert_eq!(config.logging.rusqlite, "trace");
            Ok(())
        });
    }

    #[test]
    fn test_log_spec() {
        let logging = LoggingConfig {
            level: "debug".to_owned(),
            rusqlite: "error".to_owned(),
        };
        assert_eq!(logging.log_spec(), "warn,cloud_db_upgrade=debug,rusqlite=error");
    }

    #[test]
    fn test_default_config_serializes_to_toml() {
        let toml_string = toml::to_string_pretty(&Config::default()).unwrap();
        assert!(toml_string.contains("[logging]"));
        assert!(toml_string.contains("[database]"));
        assert!(toml_string.contains("search_paths"));
    }
}
