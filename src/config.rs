// src/config.rs

//! Mirror configuration
//!
//! - The fixed architecture table (URL shape and branch list per arch)
//! - The INI mirror list (`[setup] default = ...`, `[mirrors] key = url`)
//! - Output verbosity
//! - The resolved [`SyncConfig`] a run works from

use crate::error::{Error, Result};
use ini::Ini;
use std::fmt;
use std::io::IsTerminal;
use std::path::{Path, PathBuf};
use std::str::FromStr;
use tracing::debug;

/// Name of the mirror list inside the user's config directory
pub const CONFIG_FILE_NAME: &str = "archmirror.conf";

/// Target CPU architecture of a mirrored tree
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Default)]
pub enum Architecture {
    Aarch64,
    #[default]
    X86_64,
}

impl Architecture {
    /// Every architecture in the table, in sync order
    pub const ALL: [Architecture; 2] = [Architecture::Aarch64, Architecture::X86_64];

    pub fn name(self) -> &'static str {
        match self {
            Architecture::Aarch64 => "aarch64",
            Architecture::X86_64 => "x86_64",
        }
    }

    /// Branches published for this architecture
    pub fn branches(self) -> &'static [&'static str] {
        match self {
            Architecture::Aarch64 => &["core", "extra", "community", "alarm"],
            Architecture::X86_64 => &["core", "extra", "community", "multilib"],
        }
    }

    /// Remote URL of `name` in `branch` on `mirror`
    pub fn file_url(self, mirror: &str, branch: &str, name: &str) -> String {
        let mirror = mirror.trim_end_matches('/');
        match self {
            Architecture::Aarch64 => format!("{}/{}/{}/{}", mirror, self.name(), branch, name),
            Architecture::X86_64 => format!("{}/{}/os/{}/{}", mirror, branch, self.name(), name),
        }
    }
}

impl fmt::Display for Architecture {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

impl FromStr for Architecture {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Architecture::ALL
            .into_iter()
            .find(|arch| arch.name() == s)
            .ok_or_else(|| Error::ConfigError(format!("Unknown architecture '{}'", s)))
    }
}

/// How chatty the console output is
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum Verbosity {
    /// Verbose when stdout is a terminal
    #[default]
    Auto,
    Quiet,
    Verbose,
}

impl Verbosity {
    pub fn is_verbose(self) -> bool {
        match self {
            Verbosity::Auto => std::io::stdout().is_terminal(),
            Verbosity::Quiet => false,
            Verbosity::Verbose => true,
        }
    }
}

impl FromStr for Verbosity {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        match s {
            "auto" => Ok(Verbosity::Auto),
            "no" => Ok(Verbosity::Quiet),
            "yes" => Ok(Verbosity::Verbose),
            other => Err(Error::ConfigError(format!(
                "Unknown verbosity '{}' (expected auto, no or yes)",
                other
            ))),
        }
    }
}

/// Named mirrors loaded from the INI mirror list
#[derive(Debug, Clone)]
pub struct MirrorList {
    default: String,
    mirrors: Vec<(String, String)>,
}

fn normalize(value: &str) -> String {
    value.trim().to_lowercase()
}

impl MirrorList {
    /// Default location of the mirror list
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join(CONFIG_FILE_NAME))
    }

    /// Load a mirror list from disk
    pub fn load(path: &Path) -> Result<Self> {
        debug!("Loading mirror list from {}", path.display());
        let content = std::fs::read_to_string(path).map_err(|e| {
            Error::ConfigError(format!("Failed to read mirror list {}: {}", path.display(), e))
        })?;
        Self::parse(&content)
    }

    /// Parse mirror list content
    pub fn parse(content: &str) -> Result<Self> {
        let ini = Ini::load_from_str(content)
            .map_err(|e| Error::ConfigError(format!("Invalid mirror list: {}", e)))?;

        let default = ini
            .section(Some("setup"))
            .and_then(|setup| setup.get("default"))
            .map(normalize)
            .ok_or_else(|| Error::ConfigError("Missing 'default' in [setup]".to_string()))?;

        let mirrors: Vec<(String, String)> = ini
            .section(Some("mirrors"))
            .ok_or_else(|| Error::ConfigError("Missing [mirrors] section".to_string()))?
            .iter()
            .map(|(key, url)| (normalize(key), normalize(url)))
            .collect();

        Ok(Self { default, mirrors })
    }

    /// The base URL of a selection that is already a URL rather than a key
    pub fn literal_url(selection: &str) -> Option<String> {
        selection
            .contains("://")
            .then(|| selection.trim().trim_end_matches('/').to_string())
    }

    /// Resolve a mirror key (or the default one) to its base URL.
    ///
    /// A selection that already looks like a URL is returned as is.
    pub fn get(&self, selection: Option<&str>) -> Result<String> {
        if let Some(url) = selection.and_then(Self::literal_url) {
            return Ok(url);
        }
        let key = selection.map(normalize).unwrap_or_else(|| self.default.clone());
        self.mirrors
            .iter()
            .find(|(name, _)| *name == key)
            .map(|(_, url)| url.trim_end_matches('/').to_string())
            .ok_or_else(|| Error::ConfigError(format!("Unknown mirror '{}'", key)))
    }

    pub fn default_key(&self) -> &str {
        &self.default
    }

    /// All configured `(key, url)` pairs in file order
    pub fn entries(&self) -> &[(String, String)] {
        &self.mirrors
    }
}

/// Everything a sync run needs to know
#[derive(Debug, Clone)]
pub struct SyncConfig {
    /// Root of the local mirror tree
    pub destination: PathBuf,
    /// Base URL of the remote mirror
    pub mirror_url: String,
    /// Architectures to sync, in order
    pub arches: Vec<Architecture>,
    /// Restrict the sync to these branches (all of the arch's branches when `None`)
    pub branches: Option<Vec<String>>,
}

impl SyncConfig {
    pub fn new(destination: PathBuf, mirror_url: String, arches: Vec<Architecture>) -> Self {
        Self {
            destination,
            mirror_url,
            arches,
            branches: None,
        }
    }

    pub fn with_branches(mut self, branches: Vec<String>) -> Self {
        self.branches = Some(branches);
        self
    }

    /// Branches to sync for `arch`, honouring the branch filter
    pub fn branches_for(&self, arch: Architecture) -> Result<Vec<&'static str>> {
        let known = arch.branches();
        match &self.branches {
            None => Ok(known.to_vec()),
            Some(selected) => {
                if let Some(unknown) = selected.iter().find(|b| !known.contains(&b.as_str())) {
                    return Err(Error::ConfigError(format!(
                        "Branch '{}' does not exist for {} (available: {})",
                        unknown,
                        arch,
                        known.join(", ")
                    )));
                }
                Ok(known
                    .iter()
                    .copied()
                    .filter(|b| selected.iter().any(|s| s == b))
                    .collect())
            }
        }
    }

    /// Check the whole selection up front so a typo fails before any download
    pub fn validate(&self) -> Result<()> {
        if self.arches.is_empty() {
            return Err(Error::ConfigError("No architecture selected".to_string()));
        }
        if self.mirror_url.is_empty() {
            return Err(Error::ConfigError("Mirror URL is empty".to_string()));
        }
        for arch in &self.arches {
            self.branches_for(*arch)?;
        }
        Ok(())
    }

    /// Local directory holding one (arch, branch) pair
    pub fn work_dir(&self, arch: Architecture, branch: &str) -> PathBuf {
        self.destination.join(arch.name()).join(branch)
    }

    /// Completion stamp written after a fully successful run for `arch`
    pub fn last_update_path(&self, arch: Architecture) -> PathBuf {
        self.destination.join(format!("last_update.{}", arch))
    }
}
