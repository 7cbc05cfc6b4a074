// src/repository/cleanup.rs

//! Removal of files that no longer belong to a branch

use super::service_files;
use crate::error::Result;
use crate::report::Reporter;
use std::collections::{BTreeSet, HashSet};
use std::ffi::OsString;
use std::fs;
use std::path::Path;
use tracing::info;

/// Delete every entry of `work_dir` that is neither a service file of `branch`
/// nor named in `package_names`.
///
/// Entries are reported and removed in lexicographic order. Returns the names
/// that were removed.
pub fn remove_redundant_files(
    work_dir: &Path,
    branch: &str,
    package_names: &HashSet<String>,
    reporter: &dyn Reporter,
) -> Result<Vec<String>> {
    let keep: HashSet<OsString> = service_files(branch)
        .into_iter()
        .chain(package_names.iter().cloned())
        .map(OsString::from)
        .collect();

    let mut redundant = BTreeSet::new();
    for entry in fs::read_dir(work_dir)? {
        let name = entry?.file_name();
        if !keep.contains(&name) {
            redundant.insert(name);
        }
    }

    if redundant.is_empty() {
        return Ok(Vec::new());
    }

    reporter.status(">>> Removing redundant files...");
    let mut removed = Vec::with_capacity(redundant.len());
    for name in redundant {
        let display = name.to_string_lossy().into_owned();
        reporter.status(&display);

        let path = work_dir.join(&name);
        if fs::symlink_metadata(&path)?.is_dir() {
            fs::remove_dir_all(&path)?;
        } else {
            fs::remove_file(&path)?;
        }
        removed.push(display);
    }

    info!("Removed {} redundant files from {}", removed.len(), work_dir.display());
    Ok(removed)
}
