// src/lib.rs

//! Archmirror
//!
//! Keeps a local mirror of an Arch-style package repository consistent with
//! the repository databases published upstream.
//!
//! # Architecture
//!
//! - Manifest-driven: every run re-reads `{branch}.db.tar.gz`; there is no local package database
//! - Verify before fetch: only missing or checksum-broken files are downloaded
//! - Bounded convergence: a branch gets a fixed number of fetch rounds, then fails
//! - Cleanup after convergence: redundant files go, alias symlinks are repaired
//! - Swappable transfer: HTTP client or external downloader behind one `Fetcher` trait

pub mod cancel;
pub mod config;
mod error;
pub mod report;
pub mod repository;

pub use cancel::CancellationToken;
pub use config::{Architecture, MirrorList, SyncConfig, Verbosity};
pub use error::{Error, Result};
