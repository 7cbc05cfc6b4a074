// tests/integration_test.rs

//! Integration tests for Archmirror
//!
//! These tests drive whole branch syncs against an in-memory mirror.

use archmirror::repository::fetch::Progress;
use archmirror::repository::{BranchStatus, Fetcher, SyncEngine};
use archmirror::report::SilentReporter;
use archmirror::{Architecture, CancellationToken, Error, Result, SyncConfig};
use flate2::Compression;
use flate2::write::GzEncoder;
use md5::{Digest, Md5};
use std::collections::HashMap;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;

const MIRROR: &str = "https://mirror.example/archlinux";
const EMPTY_MD5: &str = "d41d8cd98f00b204e9800998ecf8427e";

/// Serves files from memory and records every requested URL
#[derive(Default)]
struct ScriptedFetcher {
    files: HashMap<String, Vec<u8>>,
    requests: Vec<String>,
}

impl ScriptedFetcher {
    fn serve(&mut self, arch: Architecture, branch: &str, name: &str, body: &[u8]) {
        self.files.insert(arch.file_url(MIRROR, branch, name), body.to_vec());
    }

    fn requests_for(&self, name: &str) -> usize {
        self.requests.iter().filter(|url| url.ends_with(&format!("/{}", name))).count()
    }
}

impl Fetcher for ScriptedFetcher {
    fn fetch(
        &mut self,
        url: &str,
        dest: &Path,
        progress: &mut Progress<'_>,
        _cancel: &CancellationToken,
    ) -> Result<u64> {
        self.requests.push(url.to_string());
        let body = self
            .files
            .get(url)
            .ok_or_else(|| Error::DownloadError(format!("HTTP 404 Not Found from {}", url)))?;
        fs::write(dest, body)?;
        progress(body.len() as u64, Some(body.len() as u64));
        Ok(body.len() as u64)
    }
}

fn md5_hex(content: &[u8]) -> String {
    format!("{:x}", Md5::digest(content))
}

/// A package entry: (file name, compressed size, md5)
type Entry<'a> = (&'a str, u64, String);

fn desc(filename: &str, size: u64, md5: &str) -> String {
    format!(
        "%FILENAME%\n{}\n\n%NAME%\n{}\n\n%CSIZE%\n{}\n\n%MD5SUM%\n{}\n\n%ARCH%\nx86_64\n",
        filename,
        filename.split('-').next().unwrap_or(filename),
        size,
        md5
    )
}

fn build_db(descs: &[(String, String)]) -> Vec<u8> {
    let mut builder = tar::Builder::new(GzEncoder::new(Vec::new(), Compression::default()));
    for (entry_name, content) in descs {
        let mut header = tar::Header::new_gnu();
        header.set_size(content.len() as u64);
        header.set_mode(0o644);
        header.set_entry_type(tar::EntryType::Regular);
        header.set_cksum();
        builder
            .append_data(&mut header, entry_name, content.as_bytes())
            .unwrap();
    }
    builder.into_inner().unwrap().finish().unwrap()
}

fn db_for(entries: &[Entry<'_>]) -> Vec<u8> {
    let descs: Vec<(String, String)> = entries
        .iter()
        .map(|(name, size, md5)| (format!("{}/desc", name), desc(name, *size, md5)))
        .collect();
    build_db(&descs)
}

fn serve_branch(fetcher: &mut ScriptedFetcher, arch: Architecture, branch: &str, db: &[u8]) {
    fetcher.serve(arch, branch, &format!("{}.db.tar.gz", branch), db);
    fetcher.serve(arch, branch, &format!("{}.files.tar.gz", branch), b"files archive");
}

fn config(dir: &Path, arch: Architecture, branches: &[&str]) -> SyncConfig {
    SyncConfig::new(dir.to_path_buf(), MIRROR.to_string(), vec![arch])
        .with_branches(branches.iter().map(|b| b.to_string()).collect())
}

fn list_dir(dir: &Path) -> Vec<String> {
    let mut names: Vec<String> = fs::read_dir(dir)
        .unwrap()
        .map(|e| e.unwrap().file_name().to_string_lossy().into_owned())
        .collect();
    names.sort();
    names
}

#[test]
fn test_branch_converges_and_cleans_up() {
    let dir = tempfile::tempdir().unwrap();
    let arch = Architecture::X86_64;
    let work_dir = dir.path().join("x86_64/core");
    fs::create_dir_all(&work_dir).unwrap();

    // A is present and valid (empty content), B is missing, C is a stray file,
    // and the db alias dangles.
    fs::write(work_dir.join("a-1.0-1-x86_64.pkg.tar.zst"), b"").unwrap();
    fs::write(work_dir.join("c-stray.pkg.tar.zst"), b"stray").unwrap();
    symlink("core.db.tar.gz.old", work_dir.join("core.db")).unwrap();

    let b_content = b"package b".to_vec();
    let db = db_for(&[
        ("a-1.0-1-x86_64.pkg.tar.zst", 0, EMPTY_MD5.to_string()),
        ("b-2.0-1-x86_64.pkg.tar.zst", b_content.len() as u64, md5_hex(&b_content)),
    ]);

    let mut fetcher = ScriptedFetcher::default();
    serve_branch(&mut fetcher, arch, "core", &db);
    fetcher.serve(arch, "core", "b-2.0-1-x86_64.pkg.tar.zst", &b_content);

    let config = config(dir.path(), arch, &["core"]);
    let report = SyncEngine::new(&config, &mut fetcher, &SilentReporter)
        .sync_branch(arch, "core")
        .unwrap();

    match &report.status {
        BranchStatus::Converged { removed, fixed_links } => {
            assert_eq!(removed, &vec!["c-stray.pkg.tar.zst".to_string()]);
            assert_eq!(fixed_links, &vec!["core.db".to_string(), "core.files".to_string()]);
        }
        other => panic!("expected convergence, got {:?}", other),
    }

    assert_eq!(
        fs::read(work_dir.join("b-2.0-1-x86_64.pkg.tar.zst")).unwrap(),
        b_content
    );
    assert_eq!(fetcher.requests_for("a-1.0-1-x86_64.pkg.tar.zst"), 0);
    assert_eq!(fetcher.requests_for("b-2.0-1-x86_64.pkg.tar.zst"), 1);
    assert_eq!(
        fetcher.requests[0],
        "https://mirror.example/archlinux/core/os/x86_64/core.db.tar.gz"
    );

    assert_eq!(
        list_dir(&work_dir),
        vec![
            "a-1.0-1-x86_64.pkg.tar.zst",
            "b-2.0-1-x86_64.pkg.tar.zst",
            "core.db",
            "core.db.tar.gz",
            "core.files",
            "core.files.tar.gz",
        ]
    );
    assert_eq!(
        fs::read_link(work_dir.join("core.db")).unwrap(),
        Path::new("core.db.tar.gz")
    );
}

#[test]
fn test_broken_package_is_refetched() {
    let dir = tempfile::tempdir().unwrap();
    let arch = Architecture::X86_64;
    let work_dir = dir.path().join("x86_64/extra");
    fs::create_dir_all(&work_dir).unwrap();
    fs::write(work_dir.join("vim-9.1-1-x86_64.pkg.tar.zst"), b"truncated").unwrap();

    let content = b"the real vim".to_vec();
    let db = db_for(&[("vim-9.1-1-x86_64.pkg.tar.zst", 12, md5_hex(&content))]);

    let mut fetcher = ScriptedFetcher::default();
    serve_branch(&mut fetcher, arch, "extra", &db);
    fetcher.serve(arch, "extra", "vim-9.1-1-x86_64.pkg.tar.zst", &content);

    let config = config(dir.path(), arch, &["extra"]);
    let report = SyncEngine::new(&config, &mut fetcher, &SilentReporter)
        .sync_branch(arch, "extra")
        .unwrap();

    assert!(report.is_converged());
    assert_eq!(fs::read(work_dir.join("vim-9.1-1-x86_64.pkg.tar.zst")).unwrap(), content);
}

#[test]
fn test_persistently_broken_package_exhausts_attempts() {
    let dir = tempfile::tempdir().unwrap();
    let arch = Architecture::X86_64;
    let work_dir = dir.path().join("x86_64/core");
    fs::create_dir_all(&work_dir).unwrap();
    fs::write(work_dir.join("stray"), b"x").unwrap();

    let good = b"good".to_vec();
    let db = db_for(&[
        ("good-1-1-any.pkg.tar.zst", 4, md5_hex(&good)),
        ("bad-1-1-any.pkg.tar.zst", 4, md5_hex(b"what the manifest expects")),
    ]);

    let mut fetcher = ScriptedFetcher::default();
    serve_branch(&mut fetcher, arch, "core", &db);
    fetcher.serve(arch, "core", "good-1-1-any.pkg.tar.zst", &good);
    fetcher.serve(arch, "core", "bad-1-1-any.pkg.tar.zst", b"corrupted upstream");

    let config = config(dir.path(), arch, &["core"]);
    let report = SyncEngine::new(&config, &mut fetcher, &SilentReporter)
        .sync_branch(arch, "core")
        .unwrap();

    assert_eq!(
        report.status,
        BranchStatus::Exhausted {
            outstanding: vec!["bad-1-1-any.pkg.tar.zst".to_string()]
        }
    );
    assert_eq!(fetcher.requests_for("bad-1-1-any.pkg.tar.zst"), 2);
    assert_eq!(fetcher.requests_for("good-1-1-any.pkg.tar.zst"), 1);

    // No cleanup or symlink repair for a branch that did not converge
    assert!(work_dir.join("stray").exists());
    assert!(fs::symlink_metadata(work_dir.join("core.db")).is_err());
}

#[test]
fn test_largest_packages_are_fetched_first() {
    let dir = tempfile::tempdir().unwrap();
    let arch = Architecture::X86_64;

    let small = b"s".to_vec();
    let large = b"lllllllll".to_vec();
    let medium = b"mmmm".to_vec();
    let db = db_for(&[
        ("small-1-1-any.pkg.tar.zst", 1, md5_hex(&small)),
        ("large-1-1-any.pkg.tar.zst", 9, md5_hex(&large)),
        ("medium-1-1-any.pkg.tar.zst", 4, md5_hex(&medium)),
    ]);

    let mut fetcher = ScriptedFetcher::default();
    serve_branch(&mut fetcher, arch, "core", &db);
    fetcher.serve(arch, "core", "small-1-1-any.pkg.tar.zst", &small);
    fetcher.serve(arch, "core", "large-1-1-any.pkg.tar.zst", &large);
    fetcher.serve(arch, "core", "medium-1-1-any.pkg.tar.zst", &medium);

    let config = config(dir.path(), arch, &["core"]);
    let report = SyncEngine::new(&config, &mut fetcher, &SilentReporter)
        .sync_branch(arch, "core")
        .unwrap();
    assert!(report.is_converged());

    let package_requests: Vec<&str> = fetcher.requests[2..]
        .iter()
        .map(|url| url.rsplit('/').next().unwrap())
        .collect();
    assert_eq!(
        package_requests,
        vec![
            "large-1-1-any.pkg.tar.zst",
            "medium-1-1-any.pkg.tar.zst",
            "small-1-1-any.pkg.tar.zst",
        ]
    );
}

#[test]
fn test_corrupt_manifest_fails_branch_but_run_continues() {
    let dir = tempfile::tempdir().unwrap();
    let arch = Architecture::X86_64;

    let corrupt_db = build_db(&[(
        "broken-1-1/desc".to_string(),
        "%FILENAME%\nbroken-1-1-any.pkg.tar.zst\n\n%CSIZE%\n10\n".to_string(),
    )]);
    let content = b"ok".to_vec();
    let good_db = db_for(&[("ok-1-1-any.pkg.tar.zst", 2, md5_hex(&content))]);

    let mut fetcher = ScriptedFetcher::default();
    serve_branch(&mut fetcher, arch, "core", &corrupt_db);
    serve_branch(&mut fetcher, arch, "extra", &good_db);
    fetcher.serve(arch, "extra", "ok-1-1-any.pkg.tar.zst", &content);

    let config = config(dir.path(), arch, &["core", "extra"]);
    let report = SyncEngine::new(&config, &mut fetcher, &SilentReporter).run().unwrap();

    assert!(!report.succeeded());
    assert_eq!(report.branches.len(), 2);
    match &report.branches[0].status {
        BranchStatus::Failed { reason } => {
            assert!(reason.contains("broken-1-1/desc"), "reason: {}", reason);
            assert!(reason.contains("MD5SUM"), "reason: {}", reason);
        }
        other => panic!("expected failure, got {:?}", other),
    }
    assert!(report.branches[1].is_converged());
    assert_eq!(fetcher.requests_for("broken-1-1-any.pkg.tar.zst"), 0);

    let failed: Vec<&str> = report.failed_branches().map(|b| b.branch.as_str()).collect();
    assert_eq!(failed, vec!["core"]);
    assert!(report.stamps.is_empty());
    assert!(!dir.path().join("last_update.x86_64").exists());
}

#[test]
fn test_successful_run_writes_last_update_and_is_idempotent() {
    let dir = tempfile::tempdir().unwrap();
    let arch = Architecture::Aarch64;

    let content = b"alarm package".to_vec();
    let db = db_for(&[("uboot-1-1-aarch64.pkg.tar.xz", 13, md5_hex(&content))]);

    let mut fetcher = ScriptedFetcher::default();
    serve_branch(&mut fetcher, arch, "alarm", &db);
    fetcher.serve(arch, "alarm", "uboot-1-1-aarch64.pkg.tar.xz", &content);

    let config = config(dir.path(), arch, &["alarm"]);
    let report = SyncEngine::new(&config, &mut fetcher, &SilentReporter).run().unwrap();

    assert!(report.succeeded());
    assert_eq!(report.stamps, vec![dir.path().join("last_update.aarch64")]);
    let stamp = fs::read_to_string(dir.path().join("last_update.aarch64")).unwrap();
    assert!(stamp.ends_with('\n'));
    assert!(fetcher
        .requests
        .contains(&"https://mirror.example/archlinux/aarch64/alarm/alarm.db.tar.gz".to_string()));

    let work_dir = dir.path().join("aarch64/alarm");
    let before = list_dir(&work_dir);

    // Second run: only the service archives are fetched again, nothing else changes
    fetcher.requests.clear();
    let report = SyncEngine::new(&config, &mut fetcher, &SilentReporter).run().unwrap();

    assert!(report.succeeded());
    assert_eq!(
        report.branches[0].status,
        BranchStatus::Converged {
            removed: Vec::new(),
            fixed_links: Vec::new()
        }
    );
    assert_eq!(fetcher.requests.len(), 2);
    assert_eq!(list_dir(&work_dir), before);
}

#[test]
fn test_missing_files_archive_does_not_block_convergence() {
    let dir = tempfile::tempdir().unwrap();
    let arch = Architecture::X86_64;
    let db = db_for(&[]);

    let mut fetcher = ScriptedFetcher::default();
    fetcher.serve(arch, "multilib", "multilib.db.tar.gz", &db);

    let config = config(dir.path(), arch, &["multilib"]);
    let mut engine = SyncEngine::new(&config, &mut fetcher, &SilentReporter);
    let first = engine.sync_branch(arch, "multilib").unwrap();
    let second = engine.sync_branch(arch, "multilib").unwrap();

    assert!(first.is_converged());
    assert!(dir.path().join("x86_64/multilib/multilib.db.tar.gz").is_file());
    assert_eq!(
        second.status,
        BranchStatus::Converged {
            removed: Vec::new(),
            fixed_links: Vec::new()
        }
    );
}

#[test]
fn test_nested_package_filename_fails_branch() {
    let dir = tempfile::tempdir().unwrap();
    let arch = Architecture::X86_64;
    let content = b"pkg".to_vec();
    let db = build_db(&[(
        "a-1-1/desc".to_string(),
        desc("sub/a-1-1-any.pkg.tar.zst", 3, &md5_hex(&content)),
    )]);

    let mut fetcher = ScriptedFetcher::default();
    serve_branch(&mut fetcher, arch, "core", &db);
    fetcher.serve(arch, "core", "sub/a-1-1-any.pkg.tar.zst", &content);

    let config = config(dir.path(), arch, &["core"]);
    let report = SyncEngine::new(&config, &mut fetcher, &SilentReporter)
        .sync_branch(arch, "core")
        .unwrap();

    match report.status {
        BranchStatus::Failed { reason } => assert!(reason.contains("FILENAME"), "reason: {}", reason),
        other => panic!("expected failure, got {:?}", other),
    }
    assert_eq!(fetcher.requests_for("a-1-1-any.pkg.tar.zst"), 0);
}
