// src/repository/symlinks.rs

//! Repair of the `{branch}.db` and `{branch}.files` alias symlinks

use super::{db_archive_name, files_archive_name};
use crate::error::Result;
use crate::report::Reporter;
use std::fs;
use std::os::unix::fs::symlink;
use std::path::Path;
use tracing::debug;

/// Whether `link` is a symlink whose stored target is exactly `target`.
///
/// The target need not exist: a branch may legitimately lack its files archive.
fn points_to(link: &Path, target: &str) -> bool {
    fs::read_link(link).is_ok_and(|dest| dest == Path::new(target))
}

fn is_symlink(path: &Path) -> bool {
    fs::symlink_metadata(path).is_ok_and(|meta| meta.file_type().is_symlink())
}

/// Make `{branch}.db` and `{branch}.files` relative symlinks to their
/// `.tar.gz` archives.
///
/// Links with any other target are replaced, as is any regular file or
/// directory occupying an alias name. Returns the aliases that were
/// (re)created; a second call on the same directory returns nothing.
pub fn fix_symlinks(work_dir: &Path, branch: &str, reporter: &dyn Reporter) -> Result<Vec<String>> {
    let aliases = [
        (format!("{}.db", branch), db_archive_name(branch)),
        (format!("{}.files", branch), files_archive_name(branch)),
    ];

    let mut fixed = Vec::new();
    for (alias, target) in aliases {
        let link_path = work_dir.join(&alias);

        if is_symlink(&link_path) && !points_to(&link_path, &target) {
            debug!("Removing stale symlink {}", link_path.display());
            fs::remove_file(&link_path)?;
        }

        if !is_symlink(&link_path) {
            match fs::symlink_metadata(&link_path) {
                Ok(meta) if meta.is_dir() => fs::remove_dir_all(&link_path)?,
                Ok(_) => fs::remove_file(&link_path)?,
                Err(_) => {}
            }
            reporter.status(&format!(">>> Fixing symlink '{}'...", alias));
            symlink(&target, &link_path)?;
            fixed.push(alias);
        }
    }
    Ok(fixed)
}
