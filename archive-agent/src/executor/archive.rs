//! Compressed tar archive output.
//!
//! Archives are streamed into a hidden `.{name}.partial` file next to the
//! final path and only renamed into place once the tar trailer and the
//! compressed stream are finalized and synced. Dropping an unfinished
//! writer removes the partial file.

use crate::config::Compression;
use crate::fs::walker::{is_glob, lexical_normalize};
use crate::utils::errors::{AgentError, Result};
use flate2::write::GzEncoder;
use std::fs::{self, File};
use std::io::{self, Read, Write};
use std::path::{Component, Path, PathBuf};
use tar::{Builder, Header};

/// Root that in-archive entry names are relative to
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ArchiveRoot {
    /// Names are the absolute path without its leading `/`
    Filesystem,
    /// Names are relative to this directory
    Dir(PathBuf),
}

impl ArchiveRoot {
    /// Pick the root for a set of sources.
    ///
    /// An explicit root always wins. Otherwise a single literal directory is
    /// its own root, and anything else (several specs, globs, single files)
    /// falls back to the filesystem root since specs may span unrelated
    /// subtrees.
    pub fn for_sources(explicit: Option<&Path>, sources: &[String]) -> Self {
        if let Some(root) = explicit {
            return ArchiveRoot::Dir(lexical_normalize(root));
        }

        match sources {
            [single] if !is_glob(single) && Path::new(single).is_absolute() && Path::new(single).is_dir() => {
                ArchiveRoot::Dir(lexical_normalize(Path::new(single)))
            }
            _ => ArchiveRoot::Filesystem,
        }
    }

    /// Entry name for `path`: relative, `..`-free and never empty.
    ///
    /// Paths outside a `Dir` root are named as in `Filesystem` mode.
    pub fn entry_name(&self, path: &Path) -> PathBuf {
        let normalized = lexical_normalize(path);
        if let ArchiveRoot::Dir(root) = self {
            if let Ok(rel) = normalized.strip_prefix(root) {
                if !rel.as_os_str().is_empty() {
                    return rel.to_path_buf();
                }
            }
        }
        normalized
            .components()
            .filter(|c| matches!(c, Component::Normal(_)))
            .collect()
    }
}

enum Encoder {
    Gzip(GzEncoder<File>),
    Zstd(zstd::stream::write::Encoder<'static, File>),
}

impl Encoder {
    fn new(file: File, compression: Compression, level: i32) -> io::Result<Self> {
        Ok(match compression {
            Compression::Gzip => {
                let level = flate2::Compression::new(level.clamp(0, 9) as u32);
                Encoder::Gzip(GzEncoder::new(file, level))
            }
            Compression::Zstd => Encoder::Zstd(zstd::stream::write::Encoder::new(file, level)?),
        })
    }

    fn finish(self) -> io::Result<File> {
        match self {
            Encoder::Gzip(e) => e.finish(),
            Encoder::Zstd(e) => e.finish(),
        }
    }
}

impl Write for Encoder {
    fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
        match self {
            Encoder::Gzip(e) => e.write(buf),
            Encoder::Zstd(e) => e.write(buf),
        }
    }

    fn flush(&mut self) -> io::Result<()> {
        match self {
            Encoder::Gzip(e) => e.flush(),
            Encoder::Zstd(e) => e.flush(),
        }
    }
}

/// Streaming writer for one archive
pub struct ArchiveWriter {
    builder: Option<Builder<Encoder>>,
    partial_path: PathBuf,
    final_path: PathBuf,
    entries: usize,
}

impl ArchiveWriter {
    /// Open a new archive that will land at `final_path`
    pub fn create(final_path: &Path, compression: Compression, level: i32) -> Result<Self> {
        let partial_path = partial_path_for(final_path);
        let archive_err = |source| AgentError::Archive {
            path: final_path.to_path_buf(),
            source,
        };

        let file = File::create(&partial_path).map_err(archive_err)?;
        let encoder = match Encoder::new(file, compression, level) {
            Ok(encoder) => encoder,
            Err(source) => {
                let _ = fs::remove_file(&partial_path);
                return Err(archive_err(source));
            }
        };

        Ok(Self {
            builder: Some(Builder::new(encoder)),
            partial_path,
            final_path: final_path.to_path_buf(),
            entries: 0,
        })
    }

    /// Append the regular file at `source` under `name`.
    ///
    /// Exactly `metadata.len()` bytes are written: a file that grew since it
    /// was stat'ed is truncated, one that shrank is zero padded, so the tar
    /// stream stays well formed. A read failure midway cannot be rolled back
    /// out of the stream and is returned as [`AgentError::FileRead`].
    pub fn append_file(
        &mut self,
        name: &Path,
        source: &Path,
        file: &mut File,
        metadata: &fs::Metadata,
    ) -> Result<()> {
        let builder = self.builder.as_mut().ok_or_else(|| AgentError::Archive {
            path: self.final_path.clone(),
            source: io::Error::other("archive already finished"),
        })?;

        let size = metadata.len();
        let mut header = Header::new_gnu();
        header.set_metadata(metadata);
        header.set_size(size);

        let mut data = TrackedRead {
            inner: file.take(size).chain(io::repeat(0)).take(size),
            failed: false,
        };
        if let Err(e) = builder.append_data(&mut header, name, &mut data) {
            return Err(if data.failed {
                AgentError::FileRead {
                    path: source.to_path_buf(),
                    source: e,
                }
            } else {
                AgentError::Archive {
                    path: self.final_path.clone(),
                    source: e,
                }
            });
        }

        self.entries += 1;
        Ok(())
    }

    /// Number of entries appended so far
    pub fn entries(&self) -> usize {
        self.entries
    }

    /// Write the tar trailer, finish compression, sync and move the archive
    /// into place. Returns the final path.
    pub fn finish(mut self) -> Result<PathBuf> {
        let archive_err = |source| AgentError::Archive {
            path: self.final_path.clone(),
            source,
        };

        let builder = self
            .builder
            .take()
            .ok_or_else(|| archive_err(io::Error::other("archive already finished")))?;

        let file = builder
            .into_inner()
            .and_then(Encoder::finish)
            .map_err(archive_err)?;
        file.sync_all().map_err(archive_err)?;
        drop(file);

        fs::rename(&self.partial_path, &self.final_path).map_err(archive_err)?;

        if let Some(parent) = self.final_path.parent() {
            if let Ok(dir) = File::open(parent) {
                let _ = dir.sync_all();
            }
        }

        Ok(self.final_path.clone())
    }
}

impl Drop for ArchiveWriter {
    fn drop(&mut self) {
        if let Some(builder) = self.builder.take() {
            drop(builder);
            let _ = fs::remove_file(&self.partial_path);
        }
    }
}

/// Remembers whether an error came from the source file rather than the
/// archive side of the copy
struct TrackedRead<R> {
    inner: R,
    failed: bool,
}

impl<R: Read> Read for TrackedRead<R> {
    fn read(&mut self, buf: &mut [u8]) -> io::Result<usize> {
        self.inner.read(buf).inspect_err(|_| self.failed = true)
    }
}

fn partial_path_for(final_path: &Path) -> PathBuf {
    let name = final_path
        .file_name()
        .map(|n| n.to_string_lossy().into_owned())
        .unwrap_or_default();
    final_path.with_file_name(format!(".{}.partial", name))
}
