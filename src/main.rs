// src/main.rs

use anyhow::{Context, Result};
use archmirror::repository::{ChecksumType, CommandFetcher, Fetcher, HttpFetcher, SyncEngine};
use archmirror::report::ConsoleReporter;
use archmirror::{Architecture, CancellationToken, Error, MirrorList, SyncConfig, Verbosity};
use clap::{CommandFactory, Parser};
use clap_complete::Shell;
use std::io;
use std::path::PathBuf;
use std::process::ExitCode;
use tracing::info;

#[derive(Parser)]
#[command(name = "archmirror")]
#[command(author, version, about = "Mirror an Arch Linux package repository to local storage", long_about = None)]
struct Cli {
    /// Mirror list file (default: ~/.config/archmirror.conf)
    #[arg(short, long, value_name = "PATH")]
    config: Option<PathBuf>,

    /// Destination directory (default: current directory)
    #[arg(short, long, value_name = "DIR")]
    destination_dir: Option<PathBuf>,

    /// Mirror key from the mirror list, or a literal mirror URL
    #[arg(short, long)]
    mirror: Option<String>,

    /// List all configured mirrors and exit
    #[arg(short, long)]
    list: bool,

    /// Architectures to sync
    #[arg(short = 'A', long = "arch", num_args = 1.., default_value = "x86_64",
          value_parser = ["aarch64", "x86_64", "all"])]
    arches: Vec<String>,

    /// Only sync these branches (default: every branch of the architecture)
    #[arg(short, long = "branch", num_args = 1..)]
    branches: Vec<String>,

    /// Output verbosity; auto is verbose on a terminal
    #[arg(short, long, default_value = "auto", value_parser = ["auto", "no", "yes"])]
    verbose: String,

    /// Checksum field packages are verified against
    #[arg(long, default_value = "md5", value_parser = ["md5", "sha256"])]
    checksum: String,

    /// Download with an external command instead of the built-in client,
    /// e.g. "wget -q -O {dest} {url}"
    #[arg(long, value_name = "COMMAND")]
    download_command: Option<String>,

    /// Print a shell completion script and exit
    #[arg(long, value_name = "SHELL", value_enum)]
    completions: Option<Shell>,
}

fn load_mirror_list(cli: &Cli) -> Result<MirrorList> {
    let path = match &cli.config {
        Some(path) => path.clone(),
        None => MirrorList::default_path().context("Cannot determine the user config directory")?,
    };
    Ok(MirrorList::load(&path)?)
}

fn resolve_mirror(cli: &Cli) -> Result<String> {
    if let Some(url) = cli.mirror.as_deref().and_then(MirrorList::literal_url) {
        return Ok(url);
    }
    Ok(load_mirror_list(cli)?.get(cli.mirror.as_deref())?)
}

fn selected_arches(cli: &Cli) -> Result<Vec<Architecture>> {
    if cli.arches.iter().any(|arch| arch == "all") {
        return Ok(Architecture::ALL.to_vec());
    }
    let mut arches = Vec::new();
    for name in &cli.arches {
        let arch: Architecture = name.parse()?;
        if !arches.contains(&arch) {
            arches.push(arch);
        }
    }
    Ok(arches)
}

fn build_fetcher(cli: &Cli) -> Result<Box<dyn Fetcher>> {
    Ok(match &cli.download_command {
        Some(command) if command == "curl" => Box::new(CommandFetcher::curl()),
        Some(command) => Box::new(CommandFetcher::from_command_line(command)?),
        None => Box::new(HttpFetcher::new()?),
    })
}

fn install_signal_handler(cancel: &CancellationToken) -> Result<()> {
    let cancel = cancel.clone();
    ctrlc::set_handler(move || {
        if cancel.is_cancelled() {
            // Second signal: the operator does not want to wait for unwinding
            std::process::exit(1);
        }
        eprintln!();
        eprintln!("Interrupted, stopping...");
        cancel.cancel();
    })
    .map_err(|e| Error::InitError(format!("Failed to set signal handler: {}", e)))?;
    Ok(())
}

/// Returns whether every branch converged
fn run(cli: Cli) -> Result<bool> {
    if let Some(shell) = cli.completions {
        clap_complete::generate(shell, &mut Cli::command(), "archmirror", &mut io::stdout());
        return Ok(true);
    }

    if cli.list {
        let mirrors = load_mirror_list(&cli)?;
        for (key, url) in mirrors.entries() {
            let marker = if key == mirrors.default_key() { "*" } else { " " };
            println!("{}{}: {}", marker, key, url);
        }
        return Ok(true);
    }

    let destination = match &cli.destination_dir {
        Some(dir) => dir.clone(),
        None => std::env::current_dir().context("Cannot determine the current directory")?,
    };
    let mut config = SyncConfig::new(destination, resolve_mirror(&cli)?, selected_arches(&cli)?);
    if !cli.branches.is_empty() {
        config = config.with_branches(cli.branches.clone());
    }
    config.validate()?;

    let checksum_type = match cli.checksum.as_str() {
        "sha256" => ChecksumType::Sha256,
        _ => ChecksumType::Md5,
    };
    let verbosity: Verbosity = cli.verbose.parse()?;
    let reporter = ConsoleReporter::new(verbosity);

    let cancel = CancellationToken::new();
    install_signal_handler(&cancel)?;

    let mut fetcher = build_fetcher(&cli)?;
    info!("Syncing {} into {}", config.mirror_url, config.destination.display());

    let mut engine = SyncEngine::new(&config, fetcher.as_mut(), &reporter)
        .with_cancellation(cancel)
        .with_checksum_type(checksum_type);

    match engine.run() {
        Ok(report) => {
            for failed in report.failed_branches() {
                eprintln!("Failed: {} ({})", failed.branch, failed.arch);
            }
            Ok(report.succeeded())
        }
        Err(Error::Cancelled) => {
            if let Some((arch, branch)) = engine.current_branch() {
                eprintln!("Interrupted while syncing branch '{}' ({}).", branch, arch);
            }
            Err(Error::Cancelled.into())
        }
        Err(e) => Err(e.into()),
    }
}

fn main() -> ExitCode {
    // Initialize tracing subscriber for logging
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("warn")),
        )
        .with_writer(io::stderr)
        .init();

    let cli = Cli::parse();

    match run(cli) {
        Ok(true) => ExitCode::SUCCESS,
        Ok(false) => ExitCode::FAILURE,
        Err(e) => {
            eprintln!("ERROR: {:#}", e);
            ExitCode::FAILURE
        }
    }
}
