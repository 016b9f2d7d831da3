//! End-to-end backup scenarios: full baseline, incremental follow-ups,
//! glob sources and archive contents read back from disk.

use archive_agent::config::Config;
use archive_agent::fs::ModTime;
use archive_agent::scheduler::BackupRunner;
use archive_agent::ArchiveLabel;
use chrono::{NaiveDate, NaiveDateTime};
use flate2::read::GzDecoder;
use std::collections::BTreeMap;
use std::fs::{self, File};
use std::io::Read;
use std::path::{Path, PathBuf};
use std::time::{Duration, UNIX_EPOCH};
use tempfile::TempDir;

const T0: u64 = 1_700_000_000;
const T1: u64 = 1_700_086_400;

fn set_mtime(path: &Path, secs: u64) {
    File::options()
        .write(true)
        .open(path)
        .unwrap()
        .set_modified(UNIX_EPOCH + Duration::from_secs(secs))
        .unwrap();
}

fn at(day: u32, second: u32) -> NaiveDateTime {
    NaiveDate::from_ymd_opt(2024, 3, day)
        .and_then(|d| d.and_hms_opt(0, 0, second))
        .unwrap()
}

fn config(sources: Vec<String>, destination: PathBuf) -> Config {
    let mut config = Config::default();
    config.backup.sources = sources;
    config.backup.destination = destination;
    config
}

fn entries(archive: &Path) -> BTreeMap<String, Vec<u8>> {
    let mut archive = tar::Archive::new(GzDecoder::new(File::open(archive).unwrap()));
    let mut out = BTreeMap::new();
    for entry in archive.entries().unwrap() {
        let mut entry = entry.unwrap();
        assert!(entry.header().entry_type().is_file());
        let name = entry.path().unwrap().to_string_lossy().into_owned();
        let mut data = Vec::new();
        entry.read_to_end(&mut data).unwrap();
        out.insert(name, data);
    }
    out
}

#[test]
fn full_then_incremental_then_idempotent() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let dest = tmp.path().join("backups");
    fs::create_dir_all(&data).unwrap();
    let a = data.join("a.txt");
    fs::write(&a, b"version one").unwrap();
    set_mtime(&a, T0);

    let runner = BackupRunner::new(&config(vec![data.to_string_lossy().into_owned()], dest.clone()));

    // Full: a.txt archived, baseline T0
    let full = runner.run_once(ArchiveLabel::Full, at(1, 0)).unwrap();
    assert_eq!(full.archive_path, dest.join("full_20240301_000000.tar.gz"));
    assert_eq!(entries(&full.archive_path).keys().collect::<Vec<_>>(), vec!["a.txt"]);
    let baseline = runner.store().load().unwrap();
    assert_eq!(baseline.len(), 1);
    assert_eq!(baseline.get(&a), Some(ModTime::new(T0 as i64, 0)));

    // Touch to T1: incremental picks it up and advances the baseline
    fs::write(&a, b"version two").unwrap();
    set_mtime(&a, T1);
    let inc = runner.run_once(ArchiveLabel::Inc, at(3, 0)).unwrap();
    let contents = entries(&inc.archive_path);
    assert_eq!(contents.get("a.txt").map(Vec::as_slice), Some(&b"version two"[..]));
    assert_eq!(
        runner.store().load().unwrap().get(&a),
        Some(ModTime::new(T1 as i64, 0))
    );

    // No changes: empty archive, store byte-for-byte unchanged
    let before = fs::read(runner.store().path()).unwrap();
    let again = runner.run_once(ArchiveLabel::Daily, at(4, 0)).unwrap();
    assert!(again.archive_path.ends_with("daily_20240304_000000.tar.gz"));
    assert!(entries(&again.archive_path).is_empty());
    assert_eq!(again.files_archived, 0);
    assert_eq!(again.files_unchanged, 1);
    assert_eq!(fs::read(runner.store().path()).unwrap(), before);
}

#[test]
fn full_resets_baseline_even_when_unchanged() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let dest = tmp.path().join("backups");
    fs::create_dir_all(data.join("nested")).unwrap();
    fs::write(data.join("a.txt"), b"a").unwrap();
    fs::write(data.join("nested/b.txt"), b"b").unwrap();
    set_mtime(&data.join("a.txt"), T0);
    set_mtime(&data.join("nested/b.txt"), T0);

    let runner = BackupRunner::new(&config(vec![data.to_string_lossy().into_owned()], dest));
    runner.run_once(ArchiveLabel::Full, at(1, 0)).unwrap();
    let second = runner.run_once(ArchiveLabel::Full, at(1, 1)).unwrap();

    assert_eq!(
        entries(&second.archive_path).keys().collect::<Vec<_>>(),
        vec!["a.txt", "nested/b.txt"]
    );
    assert_eq!(second.files_unchanged, 0);
}

#[test]
fn glob_and_overlapping_specs_are_named_from_filesystem_root() {
    let tmp = TempDir::new().unwrap();
    let etc = tmp.path().join("etc");
    let dest = tmp.path().join("backups");
    fs::create_dir_all(etc.join("app.d")).unwrap();
    fs::write(etc.join("hosts"), b"127.0.0.1 localhost").unwrap();
    fs::write(etc.join("app.d/app.conf"), b"threads=4").unwrap();

    let glob = format!("{}/*", etc.display());
    let overlap = etc.join("hosts").to_string_lossy().into_owned();
    let runner = BackupRunner::new(&config(vec![glob, overlap], dest));

    let result = runner.run_once(ArchiveLabel::Full, at(1, 0)).unwrap();
    assert_eq!(result.files_scanned, 3);

    let etc_rel: PathBuf = etc.components().skip(1).collect();
    let contents = entries(&result.archive_path);
    let hosts = etc_rel.join("hosts").to_string_lossy().into_owned();
    let conf = etc_rel.join("app.d/app.conf").to_string_lossy().into_owned();
    assert_eq!(contents.get(&hosts).map(Vec::as_slice), Some(&b"127.0.0.1 localhost"[..]));
    assert_eq!(contents.get(&conf).map(Vec::as_slice), Some(&b"threads=4"[..]));

    // One baseline record per path despite the overlap
    let baseline = runner.store().load().unwrap();
    assert_eq!(baseline.len(), 2);

    // Incremental right after: nothing new, duplicates included
    let inc = runner.run_once(ArchiveLabel::Inc, at(3, 0)).unwrap();
    assert!(entries(&inc.archive_path).is_empty());
    assert_eq!(inc.files_unchanged, 3);
}

#[test]
fn new_file_after_full_is_picked_up() {
    let tmp = TempDir::new().unwrap();
    let data = tmp.path().join("data");
    let dest = tmp.path().join("backups");
    fs::create_dir_all(&data).unwrap();
    fs::write(data.join("old.txt"), b"old").unwrap();
    set_mtime(&data.join("old.txt"), T0);

    let runner = BackupRunner::new(&config(vec![data.to_string_lossy().into_owned()], dest));
    runner.run_once(ArchiveLabel::Full, at(1, 0)).unwrap();

    // Older mtime than anything in the baseline, but never captured
    fs::write(data.join("new.txt"), b"new").unwrap();
    set_mtime(&data.join("new.txt"), T0 - 1_000);

    let inc = runner.run_once(ArchiveLabel::Inc, at(3, 0)).unwrap();
    assert_eq!(entries(&inc.archive_path).keys().collect::<Vec<_>>(), vec!["new.txt"]);
    assert_eq!(runner.store().load().unwrap().len(), 2);
}

#[test]
fn missing_source_produces_empty_archive() {
    let tmp = TempDir::new().unwrap();
    let dest = tmp.path().join("backups");
    let missing = tmp.path().join("nowhere").to_string_lossy().into_owned();

    let runner = BackupRunner::new(&config(vec![missing], dest));
    let result = runner.run_once(ArchiveLabel::Daily, at(2, 0)).unwrap();

    assert!(entries(&result.archive_path).is_empty());
    assert!(runner.store().load().unwrap().is_empty());
}
