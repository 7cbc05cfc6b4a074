// build.rs

use clap::{Arg, ArgAction, Command};
use clap_mangen::Man;
use std::env;
use std::fs;
use std::path::PathBuf;

fn build_cli() -> Command {
    Command::new("archmirror")
        .version(env!("CARGO_PKG_VERSION"))
        .author("Archmirror Contributors")
        .about("Mirror an Arch Linux package repository to local storage")
        .arg(
            Arg::new("config")
                .short('c')
                .long("config")
                .value_name("PATH")
                .help("Mirror list file (default: ~/.config/archmirror.conf)"),
        )
        .arg(
            Arg::new("destination_dir")
                .short('d')
                .long("destination-dir")
                .value_name("DIR")
                .help("Destination directory (default: current directory)"),
        )
        .arg(
            Arg::new("mirror")
                .short('m')
                .long("mirror")
                .help("Mirror key from the mirror list, or a literal mirror URL"),
        )
        .arg(
            Arg::new("list")
                .short('l')
                .long("list")
                .action(ArgAction::SetTrue)
                .help("List all configured mirrors and exit"),
        )
        .arg(
            Arg::new("arches")
                .short('A')
                .long("arch")
                .num_args(1..)
                .default_value("x86_64")
                .value_parser(["aarch64", "x86_64", "all"])
                .help("Architectures to sync"),
        )
        .arg(
            Arg::new("branches")
                .short('b')
                .long("branch")
                .num_args(1..)
                .help("Only sync these branches (default: every branch of the architecture)"),
        )
        .arg(
            Arg::new("verbose")
                .short('v')
                .long("verbose")
                .default_value("auto")
                .value_parser(["auto", "no", "yes"])
                .help("Output verbosity; auto is verbose on a terminal"),
        )
        .arg(
            Arg::new("checksum")
                .long("checksum")
                .default_value("md5")
                .value_parser(["md5", "sha256"])
                .help("Checksum field packages are verified against"),
        )
        .arg(
            Arg::new("download_command")
                .long("download-command")
                .value_name("COMMAND")
                .help("Download with an external command, e.g. \"wget -q -O {dest} {url}\""),
        )
        .arg(
            Arg::new("completions")
                .long("completions")
                .value_name("SHELL")
                .value_parser(["bash", "elvish", "fish", "powershell", "zsh"])
                .help("Print a shell completion script and exit"),
        )
}

fn main() {
    println!("cargo:rerun-if-changed=build.rs");

    // Create man directory
    let out_dir = PathBuf::from(env::var("CARGO_MANIFEST_DIR").unwrap());
    let man_dir = out_dir.join("man");
    fs::create_dir_all(&man_dir).expect("Failed to create man directory");

    let cmd = build_cli();
    let man = Man::new(cmd);
    let mut buffer = Vec::new();
    man.render(&mut buffer)
        .expect("Failed to render man page");

    let man_path = man_dir.join("archmirror.1");
    fs::write(&man_path, buffer).expect("Failed to write man page");
}
