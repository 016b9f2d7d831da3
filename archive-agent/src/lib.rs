//! Archive Agent Library
//!
//! Scheduled full/incremental backups into compressed tar archives, with a
//! persisted modification-time baseline deciding what changed.

pub mod config;
pub mod daemon;
pub mod executor;
pub mod fs;
pub mod scheduler;
pub mod store;
pub mod utils;

// Re-export commonly used types
pub use config::Config;
pub use executor::{ArchiveLabel, BackupExecutor, BackupJob, BackupKind, BackupResult};
pub use store::{Baseline, MetadataStore};
pub use utils::errors::AgentError;
pub type Result<T> = std::result::Result<T, AgentError>;
