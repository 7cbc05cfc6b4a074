// src/repository/mod.rs

//! Repository mirroring
//!
//! This module provides functionality for:
//! - Reading package records from a branch's repository database
//! - Verifying local package files against their checksums
//! - Downloading missing and broken files
//! - Driving a branch to convergence with a bounded number of fetch rounds
//! - Removing redundant files and repairing the database symlinks

pub mod cleanup;
pub mod fetch;
pub mod manifest;
pub mod symlinks;
pub mod sync;
pub mod verify;

pub use cleanup::remove_redundant_files;
pub use fetch::{CommandFetcher, DownloadSummary, Fetcher, HttpFetcher, download_files};
pub use manifest::ManifestReader;
pub use symlinks::fix_symlinks;
pub use sync::{BranchReport, BranchStatus, RunReport, SyncEngine};
pub use verify::{VerifyReport, check_packages, content_digest};

use std::path::PathBuf;

/// Checksum algorithm type
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ChecksumType {
    /// MD5 (what `%MD5SUM%` carries; integrity only, not security)
    #[default]
    Md5,

    /// SHA-256 (`%SHA256SUM%`)
    Sha256,
}

impl ChecksumType {
    /// Field marker holding this checksum in a package description
    pub fn desc_field(self) -> &'static str {
        match self {
            ChecksumType::Md5 => "MD5SUM",
            ChecksumType::Sha256 => "SHA256SUM",
        }
    }
}

/// One package the branch's manifest says should exist locally
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PackageRecord {
    /// Absolute path the package file should occupy
    pub path: PathBuf,

    /// Compressed size from `%CSIZE%`; used for ordering, never for verification
    pub size: u64,

    /// Lowercase hex digest of the file content
    pub checksum: String,

    pub checksum_type: ChecksumType,
}

impl PackageRecord {
    /// File name of the package inside the work directory
    pub fn file_name(&self) -> String {
        self.path
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
            .unwrap_or_default()
    }
}

/// Name of the repository database archive for `branch`
pub fn db_archive_name(branch: &str) -> String {
    format!("{}.db.tar.gz", branch)
}

/// Name of the file list archive for `branch`
pub fn files_archive_name(branch: &str) -> String {
    format!("{}.files.tar.gz", branch)
}

/// Files kept in a branch directory regardless of the package set:
/// both archives and their alias symlinks.
pub fn service_files(branch: &str) -> [String; 4] {
    [
        format!("{}.db", branch),
        db_archive_name(branch),
        format!("{}.files", branch),
        files_archive_name(branch),
    ]
}
