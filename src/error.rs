// src/error.rs

use thiserror::Error;

/// Core error types for Archmirror
#[derive(Error, Debug)]
pub enum Error {
    /// I/O errors (permission denied, disk full, path conflicts)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// A package description inside the repository database lacks a required field
    #[error("Invalid package description {entry:?} in {archive}: missing or invalid %{field}%")]
    CorruptManifest {
        archive: String,
        entry: String,
        field: &'static str,
    },

    /// Repository database could not be decompressed or read
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Download failed after all internal attempts
    #[error("Download error: {0}")]
    DownloadError(String),

    /// Mirror list or command-line selection is invalid
    #[error("Configuration error: {0}")]
    ConfigError(String),

    /// Initialization of a runtime facility failed
    #[error("Initialization error: {0}")]
    InitError(String),

    /// The operation was interrupted by a termination signal
    #[error("Interrupted")]
    Cancelled,
}

impl Error {
    /// Whether this error ends only the current branch rather than the whole run.
    ///
    /// A broken repository database says nothing about the other branches, so
    /// the run carries on with them. Everything else (filesystem trouble,
    /// interruption) aborts the run.
    pub fn is_branch_fatal(&self) -> bool {
        matches!(self, Error::CorruptManifest { .. } | Error::ParseError(_))
    }
}

/// Result type alias using Archmirror's Error type
pub type Result<T> = std::result::Result<T, Error>;
