//! Configuration management for the archive agent.
//!
//! Loads configuration from TOML file with environment variable overrides.

use crate::fs::walker::is_glob;
use crate::utils::errors::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Environment variable overriding `backup.destination`
pub const ENV_DESTINATION: &str = "ARCHIVE_AGENT_DESTINATION";
/// Environment variable overriding `backup.sources` (colon separated)
pub const ENV_SOURCES: &str = "ARCHIVE_AGENT_SOURCES";
/// Environment variable overriding `log.level`
pub const ENV_LOG_LEVEL: &str = "ARCHIVE_AGENT_LOG_LEVEL";

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub agent: AgentConfig,
    pub backup: BackupConfig,
    #[serde(default)]
    pub schedule: ScheduleConfig,
    #[serde(default)]
    pub archive: ArchiveConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AgentConfig {
    /// Identifier used in log output
    #[serde(default = "default_agent_id")]
    pub id: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BackupConfig {
    /// Path specifications: directories, files or glob patterns
    pub sources: Vec<String>,

    /// Directory receiving archives and the metadata store
    pub destination: PathBuf,

    /// Root that in-archive names are made relative to.
    /// When unset, a single literal directory source is its own root and
    /// anything else is named relative to `/`.
    #[serde(default)]
    pub root: Option<PathBuf>,

    /// Follow symbolic links while resolving sources
    #[serde(default)]
    pub follow_links: bool,

    /// File name fragments excluded while walking directories
    #[serde(default)]
    pub exclude_patterns: Vec<String>,

    /// What to do when a resolved file cannot be read
    #[serde(default)]
    pub on_file_error: FileErrorPolicy,

    /// Log level used for entries skipped by the inclusion predicate
    #[serde(default)]
    pub report_skipped: SkipReportLevel,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum FileErrorPolicy {
    /// Skip the file, report it and keep going.
    /// Applies to files that cannot be opened; a read failure after the
    /// entry has been started always aborts the run.
    #[default]
    Skip,
    /// Abort the whole run
    Abort,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SkipReportLevel {
    #[default]
    Warn,
    Debug,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScheduleConfig {
    /// Day of month that triggers a full backup (1-31)
    #[serde(default = "default_full_day")]
    pub full_day: u32,

    /// Days divisible by this produce an `inc` archive, others `daily`
    #[serde(default = "default_inc_interval")]
    pub inc_interval: u32,

    /// Seconds between runs (default: 1 day)
    #[serde(default = "default_interval_secs")]
    pub interval_secs: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Compression {
    #[default]
    Gzip,
    Zstd,
}

impl Compression {
    /// Archive file extension for this compression
    pub fn extension(&self) -> &'static str {
        match self {
            Compression::Gzip => "tar.gz",
            Compression::Zstd => "tar.zst",
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ArchiveConfig {
    /// Compression algorithm (gzip, zstd)
    #[serde(default)]
    pub compression: Compression,

    /// Compression level (0-9 for gzip, 1-22 for zstd)
    #[serde(default = "default_compression_level")]
    pub compression_level: i32,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Log output (stdout, stderr)
    #[serde(default = "default_log_output")]
    pub output: String,

    /// Colored output
    #[serde(default = "default_ansi")]
    pub ansi: bool,
}

// Default values
fn default_agent_id() -> String {
    hostname::get()
        .ok()
        .and_then(|h| h.into_string().ok())
        .unwrap_or_else(|| "archive-agent-01".to_string())
}

fn default_full_day() -> u32 {
    1
}

fn default_inc_interval() -> u32 {
    3
}

fn default_interval_secs() -> u64 {
    24 * 3600
}

fn default_compression_level() -> i32 {
    6
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_log_output() -> String {
    "stdout".to_string()
}

fn default_ansi() -> bool {
    true
}

impl Default for AgentConfig {
    fn default() -> Self {
        Self {
            id: default_agent_id(),
        }
    }
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            full_day: default_full_day(),
            inc_interval: default_inc_interval(),
            interval_secs: default_interval_secs(),
        }
    }
}

impl Default for ArchiveConfig {
    fn default() -> Self {
        Self {
            compression: Compression::default(),
            compression_level: default_compression_level(),
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            output: default_log_output(),
            ansi: default_ansi(),
        }
    }
}

impl Default for Config {
    fn default() -> Self {
        Config {
            agent: AgentConfig::default(),
            backup: BackupConfig {
                sources: vec!["/home/user/data".to_string()],
                destination: PathBuf::from("/var/backups/archive-agent"),
                root: None,
                follow_links: false,
                exclude_patterns: Vec::new(),
                on_file_error: FileErrorPolicy::default(),
                report_skipped: SkipReportLevel::default(),
            },
            schedule: ScheduleConfig::default(),
            archive: ArchiveConfig::default(),
            log: LogConfig::default(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            AgentError::Config(format!("cannot read {}: {}", path.display(), e))
        })?;
        toml::from_str(&content).map_err(|source| AgentError::ConfigParse {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Apply `ARCHIVE_AGENT_*` environment overrides
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|key| std::env::var(key).ok());
    }

    fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(dest) = lookup(ENV_DESTINATION).filter(|v| !v.is_empty()) {
            self.backup.destination = PathBuf::from(dest);
        }

        if let Some(sources) = lookup(ENV_SOURCES).filter(|v| !v.is_empty()) {
            self.backup.sources = sources
                .split(':')
                .filter(|s| !s.is_empty())
                .map(str::to_string)
                .collect();
        }

        if let Some(level) = lookup(ENV_LOG_LEVEL).filter(|v| !v.is_empty()) {
            self.log.level = level;
        }
    }

    /// Check ranges and pattern syntax before the agent starts
    pub fn validate(&self) -> Result<()> {
        if self.backup.sources.is_empty() {
            return Err(AgentError::Config("backup.sources must not be empty".into()));
        }

        for spec in &self.backup.sources {
            if spec.trim().is_empty() {
                return Err(AgentError::Config("backup.sources contains an empty entry".into()));
            }
            if is_glob(spec) {
                glob::Pattern::new(spec).map_err(|source| AgentError::Pattern {
                    pattern: spec.clone(),
                    source,
                })?;
            }
        }

        if self.backup.destination.as_os_str().is_empty() {
            return Err(AgentError::Config("backup.destination must be set".into()));
        }

        if !(1..=31).contains(&self.schedule.full_day) {
            return Err(AgentError::Config(format!(
                "schedule.full_day must be between 1 and 31, got {}",
                self.schedule.full_day
            )));
        }

        if self.schedule.inc_interval == 0 {
            return Err(AgentError::Config("schedule.inc_interval must be positive".into()));
        }

        if self.schedule.interval_secs == 0 {
            return Err(AgentError::Config("schedule.interval_secs must be positive".into()));
        }

        let level = self.archive.compression_level;
        let valid_level = match self.archive.compression {
            Compression::Gzip => (0..=9).contains(&level),
            Compression::Zstd => (1..=22).contains(&level),
        };
        if !valid_level {
            return Err(AgentError::Config(format!(
                "archive.compression_level {} is out of range for {:?}",
                level, self.archive.compression
            )));
        }

        Ok(())
    }
}
