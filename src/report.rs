// src/report.rs

//! Operator-facing output
//!
//! Diagnostics go through `tracing`; the lines an operator watches while a
//! mirror syncs go through a [`Reporter`] handed to each component.

use crate::config::Verbosity;
use std::cell::Cell;
use std::io::{self, Write};

/// Sink for human-readable sync progress
pub trait Reporter {
    /// A status line that is always shown (branch headers, outcomes, deletions)
    fn status(&self, message: &str);

    /// A transient line that is only shown in verbose mode and is overwritten
    /// by the next one
    fn progress(&self, message: &str);

    /// Byte progress for one file in a download batch
    fn download_progress(&self, name: &str, index: usize, count: usize, done: u64, total: Option<u64>);

    /// End of one file in a download batch
    fn download_finished(&self, name: &str, index: usize, count: usize);

    fn is_verbose(&self) -> bool;
}

/// Reporter writing to stdout
pub struct ConsoleReporter {
    verbose: bool,
    last_percent: Cell<Option<u64>>,
    progress_width: Cell<usize>,
}

impl ConsoleReporter {
    pub fn new(verbosity: Verbosity) -> Self {
        Self {
            verbose: verbosity.is_verbose(),
            last_percent: Cell::new(None),
            progress_width: Cell::new(0),
        }
    }

    fn overwrite(&self, line: &str) {
        let width = self.progress_width.replace(line.len());
        let pad = width.saturating_sub(line.len());
        let mut out = io::stdout().lock();
        let _ = write!(out, "\r{}{}", line, " ".repeat(pad));
        let _ = out.flush();
    }

    fn clear(&self) {
        let width = self.progress_width.replace(0);
        if width > 0 {
            print!("\r{}\r", " ".repeat(width));
        }
    }
}

impl Reporter for ConsoleReporter {
    fn status(&self, message: &str) {
        self.clear();
        println!("{}", message);
    }

    fn progress(&self, message: &str) {
        if self.verbose {
            self.overwrite(message);
        }
    }

    fn download_progress(&self, name: &str, index: usize, count: usize, done: u64, total: Option<u64>) {
        if !self.verbose {
            return;
        }
        let line = match total {
            Some(total) if total > 0 => {
                let percent = done * 100 / total;
                if self.last_percent.replace(Some(percent)) == Some(percent) {
                    return;
                }
                format!(
                    "[{}/{}] {}: {} / {} ({}%)",
                    index,
                    count,
                    name,
                    format_size(done),
                    format_size(total),
                    percent
                )
            }
            _ => format!("[{}/{}] {}: {}", index, count, name, format_size(done)),
        };
        self.overwrite(&line);
    }

    fn download_finished(&self, name: &str, index: usize, count: usize) {
        self.last_percent.set(None);
        if self.verbose {
            self.overwrite(&format!("[{}/{}] {}: done.", index, count, name));
            self.progress_width.set(0);
            println!();
        }
    }

    fn is_verbose(&self) -> bool {
        self.verbose
    }
}

/// Reporter that discards everything
#[derive(Debug, Default, Clone, Copy)]
pub struct SilentReporter;

impl Reporter for SilentReporter {
    fn status(&self, _message: &str) {}
    fn progress(&self, _message: &str) {}
    fn download_progress(&self, _name: &str, _index: usize, _count: usize, _done: u64, _total: Option<u64>) {}
    fn download_finished(&self, _name: &str, _index: usize, _count: usize) {}
    fn is_verbose(&self) -> bool {
        false
    }
}

/// Format a byte count using binary units
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KiB", "MiB", "GiB"];
    let mut value = bytes as f64;
    let mut unit = 0;
    while value >= 1024.0 && unit < UNITS.len() - 1 {
        value /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{} {}", bytes, UNITS[0])
    } else {
        format!("{:.2} {}", value, UNITS[unit])
    }
}
