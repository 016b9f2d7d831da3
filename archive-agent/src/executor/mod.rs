//! Backup engine - runs one full or incremental backup.
//!
//! A run resolves the configured sources, decides per file whether it belongs
//! in the archive, streams qualifying files into a new compressed tar and
//! advances the baseline for exactly the files it archived:
//!
//! - **Full**: every resolved file is archived and its baseline reset.
//! - **Incremental**: a file is archived only if it was never captured or its
//!   mtime is strictly newer than the stored one.
//!
//! Baseline updates are staged on a copy and only handed back to the caller
//! once the archive has been finalized and moved into place.

pub mod archive;

use crate::config::{Compression, Config, FileErrorPolicy, SkipReportLevel};
use crate::fs::walker::{resolve_specs, Resolution, SkipReason, SkippedEntry, WalkOptions};
use crate::fs::ModTime;
use crate::store::Baseline;
use crate::utils::errors::{AgentError, Result};
use crate::utils::format::{format_bytes, format_duration};
use archive::{ArchiveRoot, ArchiveWriter};
use chrono::NaiveDateTime;
use std::fmt;
use std::fs::File;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};

/// Inclusion semantics of a run
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum BackupKind {
    Full,
    Incremental,
}

impl BackupKind {
    /// Label used when a kind is requested directly rather than scheduled
    pub fn default_label(self) -> ArchiveLabel {
        match self {
            BackupKind::Full => ArchiveLabel::Full,
            BackupKind::Incremental => ArchiveLabel::Inc,
        }
    }
}

impl fmt::Display for BackupKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            BackupKind::Full => write!(f, "full"),
            BackupKind::Incremental => write!(f, "incremental"),
        }
    }
}

impl FromStr for BackupKind {
    type Err = String;

    fn from_str(s: &str) -> std::result::Result<Self, Self::Err> {
        match s.to_ascii_lowercase().as_str() {
            "full" => Ok(BackupKind::Full),
            "incremental" | "inc" | "daily" => Ok(BackupKind::Incremental),
            other => Err(format!("unknown backup kind '{}' (expected full or incremental)", other)),
        }
    }
}

/// Archive filename prefix. `Inc` and `Daily` share incremental semantics.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ArchiveLabel {
    Full,
    Inc,
    Daily,
}

impl ArchiveLabel {
    pub fn kind(self) -> BackupKind {
        match self {
            ArchiveLabel::Full => BackupKind::Full,
            ArchiveLabel::Inc | ArchiveLabel::Daily => BackupKind::Incremental,
        }
    }

    pub fn prefix(self) -> &'static str {
        match self {
            ArchiveLabel::Full => "full",
            ArchiveLabel::Inc => "inc",
            ArchiveLabel::Daily => "daily",
        }
    }

    /// Capitalized form for the completion message
    pub fn title(self) -> &'static str {
        match self {
            ArchiveLabel::Full => "Full",
            ArchiveLabel::Inc => "Inc",
            ArchiveLabel::Daily => "Daily",
        }
    }
}

/// One backup invocation
#[derive(Debug, Clone)]
pub struct BackupJob {
    pub run_id: String,
    pub label: ArchiveLabel,
    pub sources: Vec<String>,
    pub destination: PathBuf,
    /// Local time used for the archive name
    pub started_at: NaiveDateTime,
}

impl BackupJob {
    pub fn kind(&self) -> BackupKind {
        self.label.kind()
    }
}

/// Outcome of a successful run
#[derive(Debug)]
pub struct BackupResult {
    pub archive_path: PathBuf,
    pub kind: BackupKind,
    pub label: ArchiveLabel,
    /// Files resolved from the sources (duplicates included)
    pub files_scanned: usize,
    pub files_archived: usize,
    pub files_unchanged: usize,
    pub bytes_archived: u64,
    /// Entries rejected by the inclusion predicate or unreadable at archive time
    pub skipped: Vec<SkippedEntry>,
    pub duration: Duration,
}

/// Engine settings that do not change between runs
#[derive(Debug, Clone)]
pub struct ExecutorSettings {
    pub root: Option<PathBuf>,
    pub walk: WalkOptions,
    pub compression: Compression,
    pub compression_level: i32,
    pub on_file_error: FileErrorPolicy,
    pub report_skipped: SkipReportLevel,
}

impl ExecutorSettings {
    pub fn from_config(config: &Config) -> Self {
        Self {
            root: config.backup.root.clone(),
            walk: WalkOptions {
                follow_links: config.backup.follow_links,
                exclude_patterns: config.backup.exclude_patterns.clone(),
            },
            compression: config.archive.compression,
            compression_level: config.archive.compression_level,
            on_file_error: config.backup.on_file_error,
            report_skipped: config.backup.report_skipped,
        }
    }
}

impl Default for ExecutorSettings {
    fn default() -> Self {
        Self::from_config(&Config::default())
    }
}

/// Main backup executor
pub struct BackupExecutor {
    settings: ExecutorSettings,
}

impl BackupExecutor {
    pub fn new(settings: ExecutorSettings) -> Self {
        Self { settings }
    }

    /// Archive name for a job: `{label}_{YYYYMMDD_HHMMSS}.{ext}`
    pub fn archive_name(&self, job: &BackupJob) -> String {
        format!(
            "{}_{}.{}",
            job.label.prefix(),
            job.started_at.format("%Y%m%d_%H%M%S"),
            self.settings.compression.extension()
        )
    }

    /// Execute a backup job.
    ///
    /// `baseline` is only modified when the archive was written completely;
    /// on error it is left exactly as it was passed in.
    pub fn execute(&self, job: &BackupJob, baseline: &mut Baseline) -> Result<BackupResult> {
        let start_time = Instant::now();

        info!(
            run_id = %job.run_id,
            "Starting {} backup ({} source spec(s)) into {}",
            job.kind(),
            job.sources.len(),
            job.destination.display()
        );

        let resolution = resolve_specs(&job.sources, &self.settings.walk)?;
        for entry in &resolution.skipped {
            self.report_skip(entry);
        }

        self.archive_resolved(job, resolution, baseline, start_time)
    }

    /// Archive the files of an already resolved job
    fn archive_resolved(
        &self,
        job: &BackupJob,
        resolution: Resolution,
        baseline: &mut Baseline,
        start_time: Instant,
    ) -> Result<BackupResult> {
        let kind = job.kind();
        let mut skipped = resolution.skipped;

        let root = ArchiveRoot::for_sources(self.settings.root.as_deref(), &job.sources);
        debug!("Archive entries are named relative to {:?}", root);

        let archive_path = self.unused_archive_path(job);
        let mut writer = ArchiveWriter::create(
            &archive_path,
            self.settings.compression,
            self.settings.compression_level,
        )?;

        let mut staged = baseline.clone();
        let mut files_unchanged = 0usize;
        let mut bytes_archived = 0u64;

        for path in &resolution.files {
            let (mut file, metadata) = match open_regular(path) {
                Ok(opened) => opened,
                Err(reason) => match self.settings.on_file_error {
                    FileErrorPolicy::Abort => {
                        return Err(AgentError::FileRead {
                            path: path.clone(),
                            source: std::io::Error::other(reason.to_string()),
                        });
                    }
                    FileErrorPolicy::Skip => {
                        let entry = SkippedEntry {
                            path: path.clone(),
                            reason,
                        };
                        self.report_skip(&entry);
                        skipped.push(entry);
                        continue;
                    }
                },
            };

            let mtime = match ModTime::from_metadata(&metadata) {
                Ok(mtime) => mtime,
                Err(source) => {
                    return Err(AgentError::FileRead {
                        path: path.clone(),
                        source,
                    })
                }
            };

            if kind == BackupKind::Incremental && !staged.is_changed(path, mtime) {
                files_unchanged += 1;
                continue;
            }

            let name = root.entry_name(path);
            writer.append_file(&name, path, &mut file, &metadata)?;
            staged.record(path, mtime);
            bytes_archived += metadata.len();
            debug!("Archived {} as {}", path.display(), name.display());
        }

        let files_archived = writer.entries();
        let archive_path = writer.finish()?;

        // Archive is durable: the staged baseline may now become visible
        *baseline = staged;

        let duration = start_time.elapsed();
        info!(
            run_id = %job.run_id,
            "Backup completed: {} archived ({}), {} unchanged, {} skipped, {} resolved, {}",
            files_archived,
            format_bytes(bytes_archived),
            files_unchanged,
            skipped.len(),
            resolution.files.len(),
            format_duration(duration)
        );

        Ok(BackupResult {
            archive_path,
            kind,
            label: job.label,
            files_scanned: resolution.files.len(),
            files_archived,
            files_unchanged,
            bytes_archived,
            skipped,
            duration,
        })
    }

    /// Final archive path, suffixed when a run in the same second already
    /// produced an archive with that name
    fn unused_archive_path(&self, job: &BackupJob) -> PathBuf {
        let name = self.archive_name(job);
        let candidate = job.destination.join(&name);
        if !candidate.exists() {
            return candidate;
        }

        let ext = self.settings.compression.extension();
        let stem = name.trim_end_matches(ext).trim_end_matches('.');
        (1..)
            .map(|n| job.destination.join(format!("{}_{}.{}", stem, n, ext)))
            .find(|p| !p.exists())
            .unwrap_or(candidate)
    }

    fn report_skip(&self, entry: &SkippedEntry) {
        match self.settings.report_skipped {
            SkipReportLevel::Warn => warn!("Skipping {}: {}", entry.path.display(), entry.reason),
            SkipReportLevel::Debug => debug!("Skipping {}: {}", entry.path.display(), entry.reason),
        }
    }
}

/// Open a resolved file and confirm it is still a regular file
fn open_regular(path: &Path) -> std::result::Result<(File, std::fs::Metadata), SkipReason> {
    let file = File::open(path).map_err(|e| SkipReason::Unreadable(e.to_string()))?;
    let metadata = file.metadata().map_err(|e| SkipReason::Unreadable(e.to_string()))?;
    if !metadata.is_file() {
        return Err(SkipReason::Special);
    }
    Ok((file, metadata))
}
