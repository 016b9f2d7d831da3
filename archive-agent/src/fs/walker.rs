//! Source resolution: path specifications to concrete regular files.
//!
//! A path specification is a literal directory, a literal file, or a glob
//! pattern. Directories are walked recursively; files are taken directly.
//! Everything else is rejected by [`classify`] and reported as a
//! [`SkippedEntry`] instead of silently disappearing.

use crate::utils::errors::{AgentError, Result};
use std::fmt;
use std::fs;
use std::path::{Component, Path, PathBuf};
use walkdir::{DirEntry, WalkDir};

/// Options for resolving sources
#[derive(Debug, Clone, Default)]
pub struct WalkOptions {
    /// Follow symbolic links (off: symlinks are skipped)
    pub follow_links: bool,

    /// Entry names containing any of these fragments are pruned while walking
    pub exclude_patterns: Vec<String>,
}

/// Why an entry was left out of the file list
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SkipReason {
    /// A symbolic link while `follow_links` is off
    Symlink,
    /// A followed symbolic link whose target does not exist
    BrokenLink,
    /// A followed symbolic link pointing at one of its own ancestors
    SymlinkLoop,
    /// Sockets, FIFOs, device nodes
    Special,
    /// Permission denied or another read failure
    Unreadable(String),
}

impl fmt::Display for SkipReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            SkipReason::Symlink => write!(f, "symbolic link"),
            SkipReason::BrokenLink => write!(f, "broken symbolic link"),
            SkipReason::SymlinkLoop => write!(f, "symbolic link loop"),
            SkipReason::Special => write!(f, "not a regular file"),
            SkipReason::Unreadable(e) => write!(f, "unreadable: {}", e),
        }
    }
}

/// An entry rejected by the inclusion predicate
#[derive(Debug, Clone)]
pub struct SkippedEntry {
    pub path: PathBuf,
    pub reason: SkipReason,
}

/// Result of the inclusion predicate for a single filesystem entry
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Inclusion {
    /// Regular file: archived (subject to the change policy)
    File,
    /// Directory: walked recursively
    Directory,
    /// Left out, with the reason
    Skip(SkipReason),
}

/// Files resolved from a list of path specifications.
///
/// `files` keeps spec order and may contain the same path more than once
/// when specifications overlap.
#[derive(Debug, Default)]
pub struct Resolution {
    pub files: Vec<PathBuf>,
    pub skipped: Vec<SkippedEntry>,
}

impl Resolution {
    fn skip(&mut self, path: PathBuf, reason: SkipReason) {
        self.skipped.push(SkippedEntry { path, reason });
    }
}

/// The inclusion predicate.
///
/// Only regular files and directories are accepted. Symlinks are accepted
/// through their target only when `follow_links` is set.
pub fn classify(path: &Path, follow_links: bool) -> Inclusion {
    let meta = match fs::symlink_metadata(path) {
        Ok(m) => m,
        Err(e) => return Inclusion::Skip(SkipReason::Unreadable(e.to_string())),
    };

    let meta = if meta.file_type().is_symlink() {
        if !follow_links {
            return Inclusion::Skip(SkipReason::Symlink);
        }
        match fs::metadata(path) {
            Ok(target) => target,
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                return Inclusion::Skip(SkipReason::BrokenLink)
            }
            Err(e) => return Inclusion::Skip(SkipReason::Unreadable(e.to_string())),
        }
    } else {
        meta
    };

    if meta.is_file() {
        Inclusion::File
    } else if meta.is_dir() {
        Inclusion::Directory
    } else {
        Inclusion::Skip(SkipReason::Special)
    }
}

/// Resolve every specification in order
///
/// # Example
/// ```no_run
/// use archive_agent::fs::walker::{resolve_specs, WalkOptions};
///
/// let specs = vec!["/data".to_string(), "/etc/*.conf".to_string()];
/// let resolved = resolve_specs(&specs, &WalkOptions::default()).unwrap();
/// println!("Found {} files", resolved.files.len());
/// ```
pub fn resolve_specs(specs: &[String], options: &WalkOptions) -> Result<Resolution> {
    let mut resolution = Resolution::default();
    for spec in specs {
        resolve_spec(spec, options, &mut resolution)?;
    }
    Ok(resolution)
}

/// Resolve a single specification into `resolution`.
///
/// A spec matching nothing contributes nothing; only a malformed glob
/// pattern is an error.
pub fn resolve_spec(spec: &str, options: &WalkOptions, resolution: &mut Resolution) -> Result<()> {
    for path in expand(spec, resolution)? {
        match classify(&path, options.follow_links) {
            Inclusion::File => resolution.files.push(path),
            Inclusion::Directory => walk_directory(&path, options, resolution),
            Inclusion::Skip(reason) => resolution.skip(path, reason),
        }
    }
    Ok(())
}

/// True when the spec contains glob metacharacters
pub fn is_pattern(spec: &str) -> bool {
    spec.contains(['*', '?', '['])
}

/// True when the spec is expanded as a glob: it contains metacharacters and
/// does not name an existing path (such as a directory called `[old`)
pub fn is_glob(spec: &str) -> bool {
    is_pattern(spec) && fs::symlink_metadata(spec).is_err()
}

/// Expand a spec into absolute candidate paths
fn expand(spec: &str, resolution: &mut Resolution) -> Result<Vec<PathBuf>> {
    if spec.trim().is_empty() {
        return Ok(Vec::new());
    }

    let absolute = absolutize(Path::new(spec))?;

    if !is_glob(spec) {
        // symlink_metadata so that dangling links still reach the predicate
        return Ok(match fs::symlink_metadata(&absolute) {
            Ok(_) => vec![absolute],
            Err(_) => Vec::new(),
        });
    }

    let pattern = absolute.to_string_lossy().into_owned();
    let matches = glob::glob(&pattern).map_err(|source| AgentError::Pattern {
        pattern: spec.to_string(),
        source,
    })?;

    let mut paths = Vec::new();
    for entry in matches {
        match entry {
            Ok(path) => paths.push(path),
            Err(e) => {
                let reason = SkipReason::Unreadable(e.error().to_string());
                resolution.skip(e.path().to_path_buf(), reason);
            }
        }
    }
    Ok(paths)
}

/// Absolute, lexically normalized form of `path`.
///
/// Baseline keys come from these paths, so `/data`, `/data/` and
/// `/data/./sub/..` must all land on the same key.
fn absolutize(path: &Path) -> Result<PathBuf> {
    if path.is_absolute() {
        Ok(lexical_normalize(path))
    } else {
        Ok(lexical_normalize(&std::env::current_dir()?.join(path)))
    }
}

/// Resolve `.` and `..` without touching the filesystem
pub fn lexical_normalize(path: &Path) -> PathBuf {
    let mut out = PathBuf::new();
    for component in path.components() {
        match component {
            Component::ParentDir => {
                out.pop();
            }
            Component::CurDir => {}
            other => out.push(other.as_os_str()),
        }
    }
    out
}

/// Walk a directory tree collecting regular files, sorted by name
fn walk_directory(root: &Path, options: &WalkOptions, resolution: &mut Resolution) {
    let walker = WalkDir::new(root)
        .follow_links(options.follow_links)
        .sort_by_file_name()
        .into_iter()
        .filter_entry(|e| e.depth() == 0 || !should_exclude(e, &options.exclude_patterns));

    for entry in walker {
        let entry = match entry {
            Ok(entry) => entry,
            Err(e) => {
                let path = e.path().map(Path::to_path_buf).unwrap_or_else(|| root.to_path_buf());
                let reason = if e.loop_ancestor().is_some() {
                    SkipReason::SymlinkLoop
                } else {
                    match e.io_error() {
                        Some(io) if io.kind() == std::io::ErrorKind::NotFound && options.follow_links => {
                            SkipReason::BrokenLink
                        }
                        _ => SkipReason::Unreadable(e.to_string()),
                    }
                };
                resolution.skip(path, reason);
                continue;
            }
        };

        let file_type = entry.file_type();
        if file_type.is_dir() {
            continue;
        }

        if file_type.is_file() {
            resolution.files.push(entry.into_path());
        } else if file_type.is_symlink() {
            resolution.skip(entry.into_path(), SkipReason::Symlink);
        } else {
            resolution.skip(entry.into_path(), SkipReason::Special);
        }
    }
}

/// Check if a directory entry should be excluded based on patterns
fn should_exclude(entry: &DirEntry, patterns: &[String]) -> bool {
    let file_name = entry.file_name().to_string_lossy();
    patterns.iter().any(|pattern| file_name.contains(pattern.as_str()))
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn spec(path: &Path) -> String {
        path.to_string_lossy().into_owned()
    }

    fn names(files: &[PathBuf], root: &Path) -> Vec<String> {
        files
            .iter()
            .map(|p| p.strip_prefix(root).unwrap().to_string_lossy().into_owned())
            .collect()
    }

    #[test]
    fn test_walk_empty_directory() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let resolved = resolve_specs(&[spec(temp_dir.path())], &WalkOptions::default())?;
        assert!(resolved.files.is_empty());
        assert!(resolved.skipped.is_empty());
        Ok(())
    }

    #[test]
    fn test_walk_with_subdirectories() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join("subdir"))?;
        fs::write(temp_dir.path().join("file1.txt"), b"content1")?;
        fs::write(temp_dir.path().join("subdir/file2.txt"), b"content2")?;

        let resolved = resolve_specs(&[spec(temp_dir.path())], &WalkOptions::default())?;
        assert_eq!(names(&resolved.files, temp_dir.path()), vec!["file1.txt", "subdir/file2.txt"]);
        Ok(())
    }

    #[test]
    fn test_literal_file_and_missing_path() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("notes.txt");
        fs::write(&file, b"x")?;

        let specs = vec![spec(&file), spec(&temp_dir.path().join("does-not-exist"))];
        let resolved = resolve_specs(&specs, &WalkOptions::default())?;
        assert_eq!(resolved.files, vec![file]);
        assert!(resolved.skipped.is_empty());
        Ok(())
    }

    #[test]
    fn test_glob_mixes_files_and_directories() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let etc = temp_dir.path().join("etc");
        fs::create_dir_all(etc.join("conf.d"))?;
        fs::write(etc.join("hosts"), b"127.0.0.1")?;
        fs::write(etc.join("conf.d/app.conf"), b"a=1")?;

        let resolved = resolve_specs(&[spec(&etc.join("*"))], &WalkOptions::default())?;
        assert_eq!(names(&resolved.files, &etc), vec!["conf.d/app.conf", "hosts"]);
        Ok(())
    }

    #[test]
    fn test_glob_matching_nothing_is_not_an_error() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let resolved = resolve_specs(&[spec(&temp_dir.path().join("*.log"))], &WalkOptions::default())?;
        assert!(resolved.files.is_empty());
        Ok(())
    }

    #[test]
    fn test_overlapping_specs_keep_duplicates() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let file = temp_dir.path().join("a.txt");
        fs::write(&file, b"a")?;

        let specs = vec![spec(temp_dir.path()), spec(&file)];
        let resolved = resolve_specs(&specs, &WalkOptions::default())?;
        assert_eq!(resolved.files, vec![file.clone(), file]);
        Ok(())
    }

    #[test]
    fn test_invalid_pattern_is_an_error() {
        let err = resolve_specs(&["/tmp/[".to_string()], &WalkOptions::default()).unwrap_err();
        assert!(matches!(err, AgentError::Pattern { .. }));
    }

    #[test]
    fn test_exclude_patterns_prune_directories() -> Result<()> {
        let temp_dir = TempDir::new()?;
        fs::create_dir(temp_dir.path().join(".git"))?;
        fs::write(temp_dir.path().join(".git/config"), b"exclude")?;
        fs::write(temp_dir.path().join("file.txt"), b"keep")?;

        let options = WalkOptions {
            exclude_patterns: vec![".git".to_string()],
            ..WalkOptions::default()
        };
        let resolved = resolve_specs(&[spec(temp_dir.path())], &options)?;
        assert_eq!(names(&resolved.files, temp_dir.path()), vec!["file.txt"]);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_symlinks_skipped_unless_followed() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let target = temp_dir.path().join("target.txt");
        fs::write(&target, b"data")?;
        let link = temp_dir.path().join("link.txt");
        std::os::unix::fs::symlink(&target, &link)?;

        let resolved = resolve_specs(&[spec(temp_dir.path())], &WalkOptions::default())?;
        assert_eq!(resolved.files, vec![target.clone()]);
        assert_eq!(resolved.skipped.len(), 1);
        assert_eq!(resolved.skipped[0].path, link);
        assert_eq!(resolved.skipped[0].reason, SkipReason::Symlink);

        let options = WalkOptions {
            follow_links: true,
            ..WalkOptions::default()
        };
        let resolved = resolve_specs(&[spec(temp_dir.path())], &options)?;
        assert_eq!(resolved.files, vec![link, target]);
        Ok(())
    }

    #[test]
    #[cfg(unix)]
    fn test_classify_broken_link() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let link = temp_dir.path().join("dangling");
        std::os::unix::fs::symlink(temp_dir.path().join("missing"), &link)?;

        assert_eq!(classify(&link, false), Inclusion::Skip(SkipReason::Symlink));
        assert_eq!(classify(&link, true), Inclusion::Skip(SkipReason::BrokenLink));

        // A dangling literal spec still reaches the predicate and is reported
        let resolved = resolve_specs(&[spec(&link)], &WalkOptions::default())?;
        assert!(resolved.files.is_empty());
        assert_eq!(resolved.skipped.len(), 1);
        Ok(())
    }

    #[test]
    fn test_is_pattern() {
        assert!(is_pattern("/etc/*"));
        assert!(is_pattern("/var/log/app?.log"));
        assert!(is_pattern("/srv/[ab]"));
        assert!(!is_pattern("/home/user/data"));
    }

    #[test]
    fn test_unnormalized_specs_resolve_to_same_paths() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let data = temp_dir.path().join("data");
        fs::create_dir_all(data.join("sub"))?;
        let file = data.join("a.txt");
        fs::write(&file, b"a")?;

        let specs = vec![
            spec(&data),
            format!("{}/./", data.display()),
            format!("{}//sub/../a.txt", data.display()),
            format!("{}/sub/../*.txt", data.display()),
        ];
        let resolved = resolve_specs(&specs, &WalkOptions::default())?;
        assert_eq!(resolved.files, vec![file.clone(), file.clone(), file.clone(), file]);
        Ok(())
    }

    #[test]
    fn test_lexical_normalize() {
        assert_eq!(lexical_normalize(Path::new("/data/./a/../b//c/")), PathBuf::from("/data/b/c"));
        assert_eq!(lexical_normalize(Path::new("/../etc")), PathBuf::from("/etc"));
    }

    #[test]
    fn test_empty_spec_matches_nothing() -> Result<()> {
        let resolved = resolve_specs(&["".to_string(), "   ".to_string()], &WalkOptions::default())?;
        assert!(resolved.files.is_empty());
        assert!(resolved.skipped.is_empty());
        Ok(())
    }

    #[test]
    fn test_literal_path_with_metacharacters() -> Result<()> {
        let temp_dir = TempDir::new()?;
        let old = temp_dir.path().join("[old");
        fs::create_dir(&old)?;
        fs::write(old.join("keep.txt"), b"k")?;

        let literal = spec(&old);
        assert!(is_pattern(&literal));
        assert!(!is_glob(&literal));

        let resolved = resolve_specs(&[literal], &WalkOptions::default())?;
        assert_eq!(resolved.files, vec![old.join("keep.txt")]);
        Ok(())
    }
}
