// src/repository/verify.rs

//! Package verification
//!
//! Compares the records of a manifest against the files on disk. A record is
//! satisfied when its file exists and the digest of its content equals the
//! recorded checksum; everything else is outstanding.

use super::{ChecksumType, PackageRecord};
use crate::cancel::CancellationToken;
use crate::error::Result;
use crate::report::Reporter;
use md5::Md5;
use sha2::{Digest, Sha256};
use std::fs::File;
use std::io::Read;
use std::path::Path;
use tracing::debug;

/// Read size while hashing; bounds memory regardless of package size
pub const BUF_SIZE: usize = 32 * 1024 * 1024;

/// Outcome of one verification pass
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct VerifyReport {
    /// Records not satisfied locally, in input order
    pub outstanding: Vec<PackageRecord>,

    /// Records whose file does not exist
    pub missing: usize,

    /// Records whose file exists with the wrong content
    pub broken: usize,
}

impl VerifyReport {
    pub fn is_converged(&self) -> bool {
        self.outstanding.is_empty()
    }
}

/// Lowercase hex digest of the file at `path`, read `buf.len()` bytes at a time
pub fn content_digest(
    path: &Path,
    checksum_type: ChecksumType,
    buf: &mut [u8],
    cancel: &CancellationToken,
) -> Result<String> {
    let file = File::open(path)?;
    match checksum_type {
        ChecksumType::Md5 => digest_reader::<Md5, _>(file, buf, cancel),
        ChecksumType::Sha256 => digest_reader::<Sha256, _>(file, buf, cancel),
    }
}

fn digest_reader<D: Digest, R: Read>(
    mut reader: R,
    buf: &mut [u8],
    cancel: &CancellationToken,
) -> Result<String> {
    let mut hasher = D::new();
    loop {
        cancel.check()?;
        let read = reader.read(buf)?;
        if read == 0 {
            break;
        }
        hasher.update(&buf[..read]);
    }
    Ok(hasher.finalize().iter().map(|byte| format!("{:02x}", byte)).collect())
}

/// Return the records that still need fetching, with missing/broken counts
pub fn check_packages(
    packages: &[PackageRecord],
    reporter: &dyn Reporter,
    cancel: &CancellationToken,
) -> Result<VerifyReport> {
    let total = packages.len();
    let mut report = VerifyReport::default();
    let mut buf = Vec::new();

    for (index, package) in packages.iter().enumerate() {
        cancel.check()?;
        reporter.progress(&format!(">>> Checking packages... {}/{}", index + 1, total));

        if !package.path.is_file() {
            debug!("Missing package file {}", package.path.display());
            report.missing += 1;
            report.outstanding.push(package.clone());
            continue;
        }

        if buf.is_empty() {
            buf.resize(BUF_SIZE, 0);
        }
        let actual = content_digest(&package.path, package.checksum_type, &mut buf, cancel)?;
        if actual != package.checksum {
            debug!(
                "Checksum mismatch for {}: expected {}, got {}",
                package.path.display(),
                package.checksum,
                actual
            );
            report.broken += 1;
            report.outstanding.push(package.clone());
        }
    }

    if report.is_converged() {
        reporter.status(">>> Checking packages: OK.");
    } else {
        reporter.status(&format!(
            ">>> Checking packages: {} need update, {} broken.",
            report.missing, report.broken
        ));
    }
    Ok(report)
}
