//! Custom error types for the archive agent.

use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AgentError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Failed to parse config file {path}: {source}")]
    ConfigParse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },

    #[error("Invalid path pattern {pattern:?}: {source}")]
    Pattern {
        pattern: String,
        #[source]
        source: glob::PatternError,
    },

    #[error("Destination {path} is not usable: {source}")]
    Destination {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Archive {path} could not be written: {source}")]
    Archive {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Failed to read {path} for archiving: {source}")]
    FileRead {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Metadata store {path} is unreadable: {source}")]
    MetadataIo {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("Metadata store {path} is corrupt, refusing to continue without a reliable baseline: {source}")]
    MetadataCorrupt {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },

    #[error("Unsupported metadata store version {found} in {path}")]
    MetadataVersion { path: PathBuf, found: u32 },

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl AgentError {
    /// True for faults caused by the environment (destination, permissions)
    /// rather than by the agent's own state.
    pub fn is_environmental(&self) -> bool {
        matches!(
            self,
            AgentError::Destination { .. } | AgentError::Archive { .. } | AgentError::Io(_)
        )
    }
}

pub type Result<T> = std::result::Result<T, AgentError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_messages_carry_path() {
        let err = AgentError::Destination {
            path: PathBuf::from("/backups"),
            source: std::io::Error::new(std::io::ErrorKind::PermissionDenied, "denied"),
        };
        let msg = err.to_string();
        assert!(msg.contains("/backups"));
        assert!(msg.contains("denied"));
        assert!(err.is_environmental());
    }

    #[test]
    fn test_corrupt_metadata_is_not_environmental() {
        let source = serde_json::from_str::<u32>("not json").unwrap_err();
        let err = AgentError::MetadataCorrupt {
            path: PathBuf::from("/backups/metadata.json"),
            source,
        };
        assert!(!err.is_environmental());
        assert!(err.to_string().contains("refusing to continue"));
    }
}
