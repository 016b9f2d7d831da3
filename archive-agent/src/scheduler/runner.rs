//! One complete backup run: baseline load, archive, baseline save.

use crate::config::Config;
use crate::executor::{ArchiveLabel, BackupExecutor, BackupJob, BackupResult, ExecutorSettings};
use crate::store::MetadataStore;
use crate::utils::errors::{AgentError, Result};
use chrono::NaiveDateTime;
use std::path::PathBuf;
use tracing::{error, info, info_span};

/// Runs the engine against the configured sources and destination
pub struct BackupRunner {
    agent_id: String,
    sources: Vec<String>,
    destination: PathBuf,
    executor: BackupExecutor,
    store: MetadataStore,
}

impl BackupRunner {
    pub fn new(config: &Config) -> Self {
        Self {
            agent_id: config.agent.id.clone(),
            sources: config.backup.sources.clone(),
            destination: config.backup.destination.clone(),
            executor: BackupExecutor::new(ExecutorSettings::from_config(config)),
            store: MetadataStore::in_dir(&config.backup.destination),
        }
    }

    pub fn store(&self) -> &MetadataStore {
        &self.store
    }

    /// Run a single backup.
    ///
    /// The baseline is persisted only after the archive is complete; any
    /// error leaves the previously saved baseline in place.
    pub fn run_once(&self, label: ArchiveLabel, started_at: NaiveDateTime) -> Result<BackupResult> {
        let run_id = uuid::Uuid::new_v4().to_string();
        let span = info_span!(
            "backup_run",
            agent = %self.agent_id,
            run_id = %run_id,
            kind = %label.kind(),
        );
        let _guard = span.enter();

        std::fs::create_dir_all(&self.destination).map_err(|source| AgentError::Destination {
            path: self.destination.clone(),
            source,
        })?;

        let mut baseline = self.store.load()?;

        let job = BackupJob {
            run_id,
            label,
            sources: self.sources.clone(),
            destination: self.destination.clone(),
            started_at,
        };
        let result = self.executor.execute(&job, &mut baseline)?;

        if let Err(e) = self.store.save(&baseline) {
            // The archive stays; files in it still look changed next run
            error!(
                "Archive {} written but baseline could not be saved: {}",
                result.archive_path.display(),
                e
            );
            return Err(e);
        }

        info!("{} backup created: {}", label.title(), result.archive_path.display());
        Ok(result)
    }
}
