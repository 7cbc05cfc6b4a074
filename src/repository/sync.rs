// src/repository/sync.rs

//! Branch synchronization
//!
//! Each (architecture, branch) pair is driven through
//! `verify -> fetch -> verify -> ...` until every package in the manifest is
//! present with the right checksum, or the fetch budget is spent. Only a
//! converged branch gets its redundant files removed and its symlinks fixed.
//! A branch that fails does not stop the others; the run as a whole fails.

use super::cleanup::remove_redundant_files;
use super::fetch::{DownloadSummary, Fetcher, download_files};
use super::manifest::ManifestReader;
use super::symlinks::fix_symlinks;
use super::verify::check_packages;
use super::{ChecksumType, PackageRecord, db_archive_name, files_archive_name};
use crate::cancel::CancellationToken;
use crate::config::{Architecture, SyncConfig};
use crate::error::Result;
use crate::report::Reporter;
use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info, warn};

/// Fetch rounds allowed per branch before it is given up on
pub const ATTEMPTS: usize = 2;

/// Terminal state of one branch
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum BranchStatus {
    /// Every package verified; cleanup ran
    Converged {
        removed: Vec<String>,
        fixed_links: Vec<String>,
    },

    /// Packages still missing or broken after [`ATTEMPTS`] fetch rounds
    Exhausted { outstanding: Vec<String> },

    /// The branch could not be synced at all (bad or missing database)
    Failed { reason: String },
}

/// Outcome of one (architecture, branch) pair
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BranchReport {
    pub arch: Architecture,
    pub branch: String,
    pub status: BranchStatus,
}

impl BranchReport {
    pub fn is_converged(&self) -> bool {
        matches!(self.status, BranchStatus::Converged { .. })
    }
}

/// Outcome of a whole run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RunReport {
    pub branches: Vec<BranchReport>,

    /// `last_update` stamps written (only when every branch converged)
    pub stamps: Vec<PathBuf>,
}

impl RunReport {
    pub fn succeeded(&self) -> bool {
        self.branches.iter().all(BranchReport::is_converged)
    }

    pub fn failed_branches(&self) -> impl Iterator<Item = &BranchReport> {
        self.branches.iter().filter(|report| !report.is_converged())
    }
}

/// Drives the sync of every selected branch
pub struct SyncEngine<'a> {
    config: &'a SyncConfig,
    fetcher: &'a mut dyn Fetcher,
    reporter: &'a dyn Reporter,
    cancel: CancellationToken,
    checksum_type: ChecksumType,
    current: Option<(Architecture, String)>,
}

impl<'a> SyncEngine<'a> {
    pub fn new(config: &'a SyncConfig, fetcher: &'a mut dyn Fetcher, reporter: &'a dyn Reporter) -> Self {
        Self {
            config,
            fetcher,
            reporter,
            cancel: CancellationToken::new(),
            checksum_type: ChecksumType::default(),
            current: None,
        }
    }

    pub fn with_cancellation(mut self, cancel: CancellationToken) -> Self {
        self.cancel = cancel;
        self
    }

    pub fn with_checksum_type(mut self, checksum_type: ChecksumType) -> Self {
        self.checksum_type = checksum_type;
        self
    }

    /// The branch being synced, if a run is (or was interrupted) in progress
    pub fn current_branch(&self) -> Option<(Architecture, &str)> {
        self.current.as_ref().map(|(arch, branch)| (*arch, branch.as_str()))
    }

    /// Sync every selected branch of every selected architecture.
    ///
    /// Branch failures are collected in the report; filesystem errors and
    /// cancellation abort the run.
    pub fn run(&mut self) -> Result<RunReport> {
        let config = self.config;
        config.validate()?;

        let arch_names: Vec<&str> = config.arches.iter().map(|arch| arch.name()).collect();
        self.reporter.status(&format!(
            ">>> Using mirror '{}' and arches: {}.",
            config.mirror_url,
            arch_names.join(", ")
        ));

        let mut report = RunReport::default();
        for &arch in &config.arches {
            self.reporter.status(&format!(">>> Arch: '{}'.", arch));
            for branch in config.branches_for(arch)? {
                report.branches.push(self.sync_branch(arch, branch)?);
            }
        }
        self.current = None;

        if !report.succeeded() {
            self.reporter.status("ERROR: Some branches have been failed to sync.");
            return Ok(report);
        }

        for &arch in &config.arches {
            report.stamps.push(self.write_last_update(arch)?);
        }
        Ok(report)
    }

    /// Sync one branch, turning repository-level failures into a report
    pub fn sync_branch(&mut self, arch: Architecture, branch: &str) -> Result<BranchReport> {
        self.current = Some((arch, branch.to_string()));

        let status = match self.try_sync_branch(arch, branch) {
            Ok(status) => status,
            Err(e) if e.is_branch_fatal() => {
                warn!("Branch {}/{} failed: {}", arch, branch, e);
                BranchStatus::Failed { reason: e.to_string() }
            }
            Err(e) => return Err(e),
        };

        match &status {
            BranchStatus::Converged { .. } => {
                self.reporter
                    .status(&format!(">>> Branch '{}' has been synced successfully.", branch));
            }
            BranchStatus::Exhausted { outstanding } => {
                self.reporter.status(&format!(
                    ">>> Branch '{}' failed: {} packages still outstanding after {} attempts.",
                    branch,
                    outstanding.len(),
                    ATTEMPTS
                ));
            }
            BranchStatus::Failed { reason } => {
                self.reporter.status(&format!(">>> Branch '{}' failed: {}", branch, reason));
            }
        }

        Ok(BranchReport {
            arch,
            branch: branch.to_string(),
            status,
        })
    }

    fn try_sync_branch(&mut self, arch: Architecture, branch: &str) -> Result<BranchStatus> {
        let work_dir = self.config.work_dir(arch, branch);
        fs::create_dir_all(&work_dir)?;
        self.reporter.status(&format!(">>> Syncing branch '{}'.", branch));

        let db_archive = db_archive_name(branch);
        let service_archives = [db_archive.clone(), files_archive_name(branch)];
        let summary = self.download(&work_dir, arch, branch, &service_archives)?;
        if summary.failed.contains(&db_archive) {
            return Ok(BranchStatus::Failed {
                reason: format!("{} could not be downloaded", db_archive),
            });
        }
        for name in &summary.failed {
            warn!("{}/{}: continuing without {}", arch, branch, name);
        }

        let packages = self.load_packages(&work_dir, branch)?;

        let mut report = check_packages(&packages, self.reporter, &self.cancel)?;
        let mut attempt = 0;
        while !report.is_converged() {
            if attempt == ATTEMPTS {
                return Ok(BranchStatus::Exhausted {
                    outstanding: report.outstanding.iter().map(PackageRecord::file_name).collect(),
                });
            }

            self.reporter.status(">>> Downloading packages...");
            let names: Vec<String> = report.outstanding.iter().map(PackageRecord::file_name).collect();
            let summary = self.download(&work_dir, arch, branch, &names)?;
            attempt += 1;
            debug!(
                "Fetch round {} for {}/{}: {} fetched, {} failed",
                attempt,
                arch,
                branch,
                summary.fetched.len(),
                summary.failed.len()
            );

            report = check_packages(&report.outstanding, self.reporter, &self.cancel)?;
        }
        info!("Branch {}/{} converged after {} fetch rounds", arch, branch, attempt);

        let package_names: HashSet<String> = packages.iter().map(PackageRecord::file_name).collect();
        let removed = remove_redundant_files(&work_dir, branch, &package_names, self.reporter)?;
        let fixed_links = fix_symlinks(&work_dir, branch, self.reporter)?;

        Ok(BranchStatus::Converged { removed, fixed_links })
    }

    /// Read the branch database, largest packages first
    fn load_packages(&self, work_dir: &Path, branch: &str) -> Result<Vec<PackageRecord>> {
        self.reporter.status(">>> Loading packages descriptions from database...");

        let mut reader = ManifestReader::open(work_dir, branch)?.with_checksum_type(self.checksum_type);
        let mut packages = reader.packages()?.collect::<Result<Vec<_>>>()?;
        packages.sort_by(|a, b| b.size.cmp(&a.size));

        info!("Parsed {} packages from {}", packages.len(), db_archive_name(branch));
        Ok(packages)
    }

    fn download(
        &mut self,
        work_dir: &Path,
        arch: Architecture,
        branch: &str,
        names: &[String],
    ) -> Result<DownloadSummary> {
        download_files(
            &mut *self.fetcher,
            work_dir,
            &self.config.mirror_url,
            arch,
            branch,
            names,
            self.reporter,
            &self.cancel,
        )
    }

    fn write_last_update(&self, arch: Architecture) -> Result<PathBuf> {
        let path = self.config.last_update_path(arch);
        let stamp = chrono::Local::now().format("%a %b %e %H:%M:%S %Y");
        fs::write(&path, format!("{}\n", stamp))?;
        info!("Wrote {}", path.display());
        Ok(path)
    }
}
