// Typed errors for the failure categories callers need to tell apart.
// Database plumbing uses anyhow with context; these wrap what the CLI reports specially.

use std::path::PathBuf;
use thiserror::Error;

/// Detected before any core operation starts.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Connection string cannot be empty")]
    EmptyConnectionString,

    #[error("Scripts folder is not configured")]
    MissingFolder,

    #[error("Folder not found: {0}")]
    FolderNotFound(PathBuf),

    #[error("Invalid file pattern '{pattern}': {reason}")]
    InvalidPattern { pattern: String, reason: String },

    #[error("Invalid journal identifier '{0}'")]
    InvalidIdentifier(String),

    #[error("Failed to load configuration: {0}")]
    Load(#[from] config::ConfigError),
}

/// Discovery never skips a file it cannot read.
#[derive(Debug, Error)]
pub enum DiscoveryError {
    #[error("Failed to read script file {path}: {source}")]
    ReadFile {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read file metadata {path}: {source}")]
    Metadata {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to enumerate scripts under {root}: {source}")]
    Walk {
        root: PathBuf,
        #[source]
        source: walkdir::Error,
    },
}
