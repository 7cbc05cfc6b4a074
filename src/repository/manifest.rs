// src/repository/manifest.rs

//! Arch Linux repository database reader
//!
//! A branch's `{branch}.db.tar.gz` holds one directory per package with a
//! `desc` file in a line-oriented format: a `%FIELD%` marker line followed by
//! the value line(s). Only the fields needed to place and verify a package
//! file are read; everything else is skipped.

use super::{ChecksumType, PackageRecord, db_archive_name};
use crate::error::{Error, Result};
use flate2::read::GzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader, Read};
use std::path::{Component, Path, PathBuf};
use tar::{Archive, Entries, EntryType};
use tracing::debug;
use xz2::read::XzDecoder;

const GZIP_MAGIC: &[u8] = &[0x1F, 0x8B];
const XZ_MAGIC: &[u8] = &[0xFD, 0x37, 0x7A, 0x58, 0x5A, 0x00];
const ZSTD_MAGIC: &[u8] = &[0x28, 0xB5, 0x2F, 0xFD];

/// Name of the per-package metadata file inside the database
const DESC_FILE: &str = "desc";

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Compression {
    Gzip,
    Xz,
    Zstd,
    None,
}

impl Compression {
    fn detect(head: &[u8]) -> Self {
        if head.starts_with(GZIP_MAGIC) {
            Compression::Gzip
        } else if head.starts_with(XZ_MAGIC) {
            Compression::Xz
        } else if head.starts_with(ZSTD_MAGIC) {
            Compression::Zstd
        } else {
            Compression::None
        }
    }
}

/// Reader over one branch's repository database
pub struct ManifestReader {
    archive_name: String,
    work_dir: PathBuf,
    checksum_type: ChecksumType,
    archive: Archive<Box<dyn Read>>,
}

impl ManifestReader {
    /// Open `{branch}.db.tar.gz` inside `work_dir`
    pub fn open(work_dir: &Path, branch: &str) -> Result<Self> {
        let archive_name = db_archive_name(branch);
        let path = work_dir.join(&archive_name);
        debug!("Opening repository database {}", path.display());

        let file = File::open(&path)?;
        let reader = Self::decompress(BufReader::new(file))?;

        Ok(Self {
            archive_name,
            work_dir: work_dir.to_path_buf(),
            checksum_type: ChecksumType::default(),
            archive: Archive::new(reader),
        })
    }

    /// Select which checksum field records are read from
    pub fn with_checksum_type(mut self, checksum_type: ChecksumType) -> Self {
        self.checksum_type = checksum_type;
        self
    }

    /// Wrap the archive in the decoder matching its magic bytes.
    ///
    /// The `.tar.gz` suffix is conventional; repositories also publish xz and
    /// zstd compressed databases under the same name.
    fn decompress(mut reader: BufReader<File>) -> Result<Box<dyn Read>> {
        let compression = Compression::detect(reader.fill_buf()?);
        debug!("Repository database compression: {:?}", compression);

        let decoded: Box<dyn Read> = match compression {
            Compression::Gzip => Box::new(GzDecoder::new(reader)),
            Compression::Xz => Box::new(XzDecoder::new(reader)),
            Compression::Zstd => Box::new(zstd::Decoder::new(reader).map_err(|e| {
                Error::ParseError(format!("Failed to create zstd decoder: {}", e))
            })?),
            Compression::None => Box::new(reader),
        };
        Ok(decoded)
    }

    /// Package records in archive order.
    ///
    /// The underlying archive is a stream, so this can be consumed once.
    pub fn packages(&mut self) -> Result<Packages<'_>> {
        let entries = self.archive.entries().map_err(|e| {
            Error::ParseError(format!("Failed to read {}: {}", self.archive_name, e))
        })?;

        Ok(Packages {
            entries,
            archive_name: &self.archive_name,
            work_dir: &self.work_dir,
            checksum_type: self.checksum_type,
            finished: false,
        })
    }
}

/// Lazy sequence of [`PackageRecord`]s, one per `desc` entry
pub struct Packages<'a> {
    entries: Entries<'a, Box<dyn Read>>,
    archive_name: &'a str,
    work_dir: &'a Path,
    checksum_type: ChecksumType,
    finished: bool,
}

impl Packages<'_> {
    fn next_record(&mut self) -> Option<Result<PackageRecord>> {
        for entry in self.entries.by_ref() {
            let entry = match entry {
                Ok(entry) => entry,
                Err(e) => {
                    return Some(Err(Error::ParseError(format!(
                        "Failed to read tarball entry in {}: {}",
                        self.archive_name, e
                    ))));
                }
            };

            if entry.header().entry_type() != EntryType::Regular {
                continue;
            }

            let entry_name = match entry.path() {
                Ok(path) if path.file_name().is_some_and(|name| name == DESC_FILE) => {
                    path.to_string_lossy().into_owned()
                }
                Ok(_) => continue,
                Err(e) => {
                    return Some(Err(Error::ParseError(format!(
                        "Invalid path in {}: {}",
                        self.archive_name, e
                    ))));
                }
            };

            let fields = match DescFields::parse(BufReader::new(entry), self.checksum_type) {
                Ok(fields) => fields,
                Err(e) => {
                    return Some(Err(Error::ParseError(format!(
                        "Failed to read {} in {}: {}",
                        entry_name, self.archive_name, e
                    ))));
                }
            };

            return Some(fields.into_record(
                self.work_dir,
                self.archive_name,
                &entry_name,
                self.checksum_type,
            ));
        }
        None
    }
}

impl Iterator for Packages<'_> {
    type Item = Result<PackageRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.finished {
            return None;
        }
        let item = self.next_record();
        if !matches!(item, Some(Ok(_))) {
            self.finished = true;
        }
        item
    }
}

/// A package file must land directly in the branch directory
fn is_plain_file_name(name: &str) -> bool {
    let mut components = Path::new(name).components();
    !name.contains('/')
        && matches!(
            (components.next(), components.next()),
            (Some(Component::Normal(_)), None)
        )
}

/// The `desc` fields a mirror cares about
#[derive(Debug, Default, PartialEq, Eq)]
struct DescFields {
    filename: Option<String>,
    csize: Option<String>,
    checksum: Option<String>,
}

impl DescFields {
    /// Scan a `desc` file, capturing the line after each marker of interest
    fn parse<R: BufRead>(reader: R, checksum_type: ChecksumType) -> std::io::Result<Self> {
        let filename_marker = "%FILENAME%";
        let csize_marker = "%CSIZE%";
        let checksum_marker = format!("%{}%", checksum_type.desc_field());

        let mut fields = DescFields::default();
        let mut prev_line = String::new();

        for line in reader.split(b'\n') {
            let line = line?;
            let current = String::from_utf8_lossy(&line).trim().to_string();

            if prev_line == filename_marker {
                fields.filename = Some(current.clone());
            } else if prev_line == csize_marker {
                fields.csize = Some(current.clone());
            } else if prev_line == checksum_marker {
                fields.checksum = Some(current.clone());
            }
            prev_line = current;
        }

        Ok(fields)
    }

    fn into_record(
        self,
        work_dir: &Path,
        archive_name: &str,
        entry_name: &str,
        checksum_type: ChecksumType,
    ) -> Result<PackageRecord> {
        let corrupt = |field: &'static str| Error::CorruptManifest {
            archive: archive_name.to_string(),
            entry: entry_name.to_string(),
            field,
        };

        let filename = self
            .filename
            .filter(|name| is_plain_file_name(name))
            .ok_or_else(|| corrupt("FILENAME"))?;

        let size: u64 = self
            .csize
            .and_then(|size| size.parse().ok())
            .ok_or_else(|| corrupt("CSIZE"))?;

        let checksum = self
            .checksum
            .filter(|sum| !sum.is_empty())
            .ok_or_else(|| corrupt(checksum_type.desc_field()))?
            .to_lowercase();

        Ok(PackageRecord {
            path: work_dir.join(filename),
            size,
            checksum,
            checksum_type,
        })
    }
}
