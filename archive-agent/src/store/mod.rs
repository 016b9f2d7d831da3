//! Persisted change-tracking baseline.
//!
//! The store maps absolute file paths to the modification time captured by
//! the last archive that contained them. It is loaded once per run, staged in
//! memory and written back wholesale; on-disk updates go through a temporary
//! file and an atomic rename so a crash never leaves a half-written store.

use crate::fs::ModTime;
use crate::utils::errors::{AgentError, Result};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Write;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// File name of the store inside the destination directory
pub const METADATA_FILE: &str = "metadata.json";

/// On-disk format version
pub const STORE_VERSION: u32 = 1;

/// In-memory baseline: path → last captured modification time.
///
/// Keys are unique; recording an existing path overwrites its value.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct Baseline {
    files: BTreeMap<String, ModTime>,
}

impl Baseline {
    pub fn new() -> Self {
        Self::default()
    }

    fn key(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    pub fn get(&self, path: &Path) -> Option<ModTime> {
        self.files.get(&Self::key(path)).copied()
    }

    /// Record `mtime` for `path`, returning the previous value
    pub fn record(&mut self, path: &Path, mtime: ModTime) -> Option<ModTime> {
        self.files.insert(Self::key(path), mtime)
    }

    /// True when `path` was never captured or its stored time is strictly
    /// older than `mtime`. Equal times count as unchanged.
    pub fn is_changed(&self, path: &Path, mtime: ModTime) -> bool {
        match self.get(path) {
            None => true,
            Some(stored) => stored < mtime,
        }
    }

    pub fn len(&self) -> usize {
        self.files.len()
    }

    pub fn is_empty(&self) -> bool {
        self.files.is_empty()
    }
}

#[derive(Deserialize)]
struct StoreFile {
    version: u32,
    files: BTreeMap<String, ModTime>,
}

#[derive(Serialize)]
struct StoreFileRef<'a> {
    version: u32,
    files: &'a BTreeMap<String, ModTime>,
}

/// Location of the persisted baseline
#[derive(Debug, Clone)]
pub struct MetadataStore {
    path: PathBuf,
}

impl MetadataStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Store at the well-known location inside `dir`
    pub fn in_dir(dir: &Path) -> Self {
        Self::new(dir.join(METADATA_FILE))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Load the baseline. A missing store is the bootstrap state and yields
    /// an empty baseline; an unreadable or corrupt one is an error.
    pub fn load(&self) -> Result<Baseline> {
        let bytes = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                info!("No metadata store at {}, starting from an empty baseline", self.path.display());
                return Ok(Baseline::new());
            }
            Err(source) => {
                return Err(AgentError::MetadataIo {
                    path: self.path.clone(),
                    source,
                })
            }
        };

        let stored: StoreFile =
            serde_json::from_slice(&bytes).map_err(|source| AgentError::MetadataCorrupt {
                path: self.path.clone(),
                source,
            })?;

        if stored.version != STORE_VERSION {
            return Err(AgentError::MetadataVersion {
                path: self.path.clone(),
                found: stored.version,
            });
        }

        debug!("Loaded baseline with {} entries from {}", stored.files.len(), self.path.display());
        Ok(Baseline { files: stored.files })
    }

    /// Replace the persisted baseline with `baseline`
    pub fn save(&self, baseline: &Baseline) -> Result<()> {
        let mut json = serde_json::to_vec_pretty(&StoreFileRef {
            version: STORE_VERSION,
            files: &baseline.files,
        })?;
        json.push(b'\n');

        let tmp_path = self.temp_path();
        if let Err(source) = write_synced(&tmp_path, &json) {
            let _ = fs::remove_file(&tmp_path);
            return Err(AgentError::MetadataIo {
                path: tmp_path,
                source,
            });
        }

        // Rename is atomic on POSIX filesystems
        if let Err(source) = fs::rename(&tmp_path, &self.path) {
            let _ = fs::remove_file(&tmp_path);
            return Err(AgentError::MetadataIo {
                path: self.path.clone(),
                source,
            });
        }

        if let Some(parent) = self.path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        debug!("Saved baseline with {} entries to {}", baseline.len(), self.path.display());
        Ok(())
    }

    fn temp_path(&self) -> PathBuf {
        let name = self
            .path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| METADATA_FILE.to_string());
        self.path.with_file_name(format!(".{}.tmp", name))
    }
}

fn write_synced(path: &Path, bytes: &[u8]) -> std::io::Result<()> {
    let mut file = File::create(path)?;
    file.write_all(bytes)?;
    file.sync_all()
}
