//! RepCRec CLI
//!
//! Runs a single script against a fresh simulator, or every script in
//! a directory when `--all` is given.

use std::fs;
use std::path::PathBuf;
use std::process;

use clap::Parser;
use log::error;

use repcrec::sim::{SimConfig, StdoutSink};
use repcrec::{run_script, SimResult};

#[derive(Parser)]
#[command(name = "repcrec")]
#[command(about = "Deterministic simulator of a replicated concurrency control and recovery database")]
#[command(version)]
struct Cli {
    /// Path to a single input script.
    script: Option<PathBuf>,

    /// Run every file in this directory (sorted by filename) as an
    /// independent simulation.
    #[arg(long)]
    all: Option<PathBuf>,

    /// Path to a key=value configuration file. Defaults to
    /// `./repcrec.conf` if present, else built-in defaults.
    #[arg(long)]
    config: Option<PathBuf>,

    /// Raise the log level to debug.
    #[arg(short, long)]
    verbose: bool,
}

fn main() {
    let cli = Cli::parse();

    let level = if cli.verbose { "debug" } else { "info" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    let config_path = cli.config.unwrap_or_else(|| PathBuf::from("repcrec.conf"));
    let config = match SimConfig::load_or_default(&config_path) {
        Ok(config) => config,
        Err(e) => {
            error!("failed to load configuration: {e}");
            process::exit(1);
        }
    };

    let result = match (&cli.script, &cli.all) {
        (_, Some(dir)) => run_directory(dir, config),
        (Some(path), None) => run_file(path, config),
        (None, None) => {
            error!("no input script given (pass a path or --all <dir>)");
            process::exit(1);
        }
    };

    if let Err(e) = result {
        error!("run failed: {e}");
        process::exit(1);
    }
}

fn run_file(path: &PathBuf, config: SimConfig) -> SimResult<()> {
    let text = fs::read_to_string(path)?;
    run_script(&text, config, StdoutSink)?;
    Ok(())
}

fn run_directory(dir: &PathBuf, config: SimConfig) -> SimResult<()> {
    let mut entries: Vec<PathBuf> = fs::read_dir(dir)?.filter_map(|e| e.ok()).map(|e| e.path()).collect();
    entries.sort();
    for path in entries {
        if !path.is_file() {
            continue;
        }
        println!("== {} ==", path.display());
        run_file(&path, config)?;
    }
    Ok(())
}
