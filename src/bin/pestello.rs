//! Pestello - label saved smartctl reports by hand.
//!
//! Walks the given files and directories, shows the interesting SMART
//! attributes of each disk and asks whether it is OK, OLD or FAIL. Labeled
//! disks are written to a CSV file for later analysis.

use std::fs::File;
use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::process::ExitCode;

use anyhow::Context;
use clap::Parser;
use tracing_subscriber::EnvFilter;

use pesto::classify::{write_csv, Classifier};

/// Classify SMART data manually
#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Where to write the labeled CSV
    #[arg(short, long, default_value = "labeled.csv")]
    output: PathBuf,

    /// Saved smartctl reports, or directories containing them
    #[arg(required = true)]
    paths: Vec<PathBuf>,
}

fn main() -> anyhow::Result<ExitCode> {
    let args = Args::parse();

    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("warn")))
        .with_writer(io::stderr)
        .init();

    let stdin = io::stdin();
    let mut classifier = Classifier::new(stdin.lock(), io::stdout());
    let summary = classifier.run(&args.paths)?;

    let file = File::create(&args.output)
        .with_context(|| format!("Cannot create {}", args.output.display()))?;
    let mut out = BufWriter::new(file);
    write_csv(&mut out, classifier.labeled())
        .with_context(|| format!("Cannot write {}", args.output.display()))?;

    if summary.invalid_paths.is_empty() {
        Ok(ExitCode::SUCCESS)
    } else {
        Ok(ExitCode::FAILURE)
    }
}
