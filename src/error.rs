//! Error types for pkgcache
//!
//! All modules use `PkgCacheResult<T>` as their return type.

use std::path::PathBuf;
use std::time::Duration;
use thiserror::Error;

/// Result type alias for pkgcache operations
pub type PkgCacheResult<T> = Result<T, PkgCacheError>;

/// All errors that can occur in pkgcache
#[derive(Error, Debug)]
pub enum PkgCacheError {
    // Configuration errors
    #[error("Invalid configuration at {path}: {reason}")]
    ConfigInvalid { path: PathBuf, reason: String },

    #[error("Failed to create config directory {path}: {source}")]
    ConfigDirCreate {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // Package identity errors
    #[error("Invalid package: {0}")]
    InvalidPackage(String),

    #[error("Invalid {format} version '{version}': {reason}")]
    InvalidVersion {
        version: String,
        format: String,
        reason: String,
    },

    // Journal errors
    #[error("Package journal at {path} is corrupt: {reason}")]
    JournalCorrupt { path: PathBuf, reason: String },

    #[error("Package journal at {path} has schema version {found}, newest supported is {supported}")]
    JournalVersionUnsupported {
        path: PathBuf,
        found: u32,
        supported: u32,
    },

    // Lock errors
    #[error("Timed out after {waited:?} waiting for lock '{name}'")]
    LockTimeout { name: String, waited: Duration },

    // Disk errors
    #[error("Unable to determine disk space for {path}: {source}")]
    DiskSpace {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    // IO errors
    #[error("IO error: {context}")]
    Io {
        context: String,
        #[source]
        source: std::io::Error,
    },

    // Serialization errors
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    // General errors
    #[error("Internal error: {0}")]
    Internal(String),

    #[error("{0}")]
    User(String),
}

impl PkgCacheError {
    /// Create an IO error with context
    pub fn io(context: impl Into<String>, source: std::io::Error) -> Self {
        Self::Io {
            context: context.into(),
            source,
        }
    }

    /// Create an invalid version error
    pub fn invalid_version(
        version: impl Into<String>,
        format: impl std::fmt::Display,
        reason: impl Into<String>,
    ) -> Self {
        Self::InvalidVersion {
            version: version.into(),
            format: format.to_string(),
            reason: reason.into(),
        }
    }

    /// Check if error is retryable
    pub fn is_retryable(&self) -> bool {
        matches!(self, Self::LockTimeout { .. })
    }

    /// Get actionable hint for the error
    pub fn hint(&self) -> Option<&'static str> {
        match self {
            Self::LockTimeout { .. } => {
                Some("Another deployment is holding the package cache lock. Retry once it finishes.")
            }
            Self::JournalVersionUnsupported { .. } => {
                Some("The journal was written by a newer pkgcache. Upgrade this agent.")
            }
            Self::JournalCorrupt { .. } => {
                Some("The journal will be rebuilt on the next registration; a copy is kept as .corrupt")
            }
            _ => None,
        }
    }
}
