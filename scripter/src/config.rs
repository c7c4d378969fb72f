// Application configuration
// Defaults, then an optional TOML file, then SCRIPTER_* environment variables, then CLI flags.

use config::{Config, Environment, File as ConfigFile};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::database::journal::{JournalTable, DEFAULT_JOURNAL_SCHEMA, DEFAULT_JOURNAL_TABLE};
use crate::error::ConfigError;
use crate::scripts::discovery::{FileSystemScriptProvider, ScriptSortBy, DEFAULT_PATTERN};
use crate::utils::logging::mask_connection_string;
use crate::utils::validation::validate_connection_string;

/// File looked up in the working directory when `--config` is not given.
pub const DEFAULT_CONFIG_NAME: &str = "scripter";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    #[serde(default)]
    pub connection_string: String,
    #[serde(default)]
    pub scripts_folder: Option<PathBuf>,
    pub journal_schema: String,
    pub journal_table: String,
    pub pattern: String,
    pub recursive: bool,
    pub sort_by: ScriptSortBy,
    #[serde(default)]
    pub log_dir: Option<PathBuf>,
}

/// Values given on the command line; `None` leaves the lower layers alone.
#[derive(Debug, Clone, Default)]
pub struct ConfigOverrides {
    pub connection_string: Option<String>,
    pub scripts_folder: Option<PathBuf>,
}

impl AppConfig {
    /// Load every layer. An explicit `file` must exist; the default one is optional.
    pub fn load(file: Option<&Path>, overrides: &ConfigOverrides) -> Result<AppConfig, ConfigError> {
        let file_source = match file {
            Some(path) => ConfigFile::from(path).required(true),
            None => ConfigFile::with_name(DEFAULT_CONFIG_NAME).required(false),
        };

        let builder = Config::builder()
            .set_default("journal_schema", DEFAULT_JOURNAL_SCHEMA)?
            .set_default("journal_table", DEFAULT_JOURNAL_TABLE)?
            .set_default("pattern", DEFAULT_PATTERN)?
            .set_default("recursive", true)?
            .set_default("sort_by", "created")?
            .add_source(file_source)
            .add_source(Environment::with_prefix("SCRIPTER").try_parsing(true))
            .set_override_option("connection_string", overrides.connection_string.clone())?
            .set_override_option(
                "scripts_folder",
                overrides
                    .scripts_folder
                    .as_ref()
                    .map(|p| p.to_string_lossy().to_string()),
            )?
            .build()?;

        Ok(builder.try_deserialize::<AppConfig>()?)
    }

    pub fn connection_string(&self) -> Result<&str, ConfigError> {
        validate_connection_string(&self.connection_string)?;
        Ok(self.connection_string.trim())
    }

    /// Canonical scripts root; must exist.
    pub fn scripts_root(&self) -> Result<PathBuf, ConfigError> {
        let folder = self
            .scripts_folder
            .as_ref()
            .filter(|p| !p.as_os_str().is_empty())
            .ok_or(ConfigError::MissingFolder)?;
        dunce::canonicalize(folder).map_err(|_| ConfigError::FolderNotFound(folder.clone()))
    }

    pub fn journal_table(&self) -> Result<JournalTable, ConfigError> {
        JournalTable::new(&self.journal_schema, &self.journal_table)
    }

    pub fn provider(&self) -> Result<FileSystemScriptProvider, ConfigError> {
        glob::Pattern::new(&self.pattern).map_err(|e| ConfigError::InvalidPattern {
            pattern: self.pattern.clone(),
            reason: e.to_string(),
        })?;
        Ok(FileSystemScriptProvider::new(self.scripts_root()?)
            .with_pattern(self.pattern.clone())
            .recursive(self.recursive)
            .sort_by(self.sort_by))
    }

    /// Everything a load or run needs.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.connection_string()?;
        self.journal_table()?;
        self.provider()?;
        Ok(())
    }

    /// Copy safe to print or log.
    pub fn masked(&self) -> AppConfig {
        AppConfig {
            connection_string: mask_connection_string(&self.connection_string),
            ..self.clone()
        }
    }
}
