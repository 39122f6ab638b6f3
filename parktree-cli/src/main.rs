//! Cluster the sequences of a FASTA file with a concurrent K-tree.
//!
//! Cluster assignments go to stdout, either as `index,cluster` CSV lines or
//! as FASTA records headed by their cluster id. Progress is logged to stderr.

mod fasta;
mod output;

use std::io::{self, BufWriter};
use std::path::PathBuf;
use std::time::Instant;

use anyhow::{Context, Result};
use clap::Parser;
use parktree::config::{DEFAULT_CAPACITY, DEFAULT_DENSITY, DEFAULT_ORDER};
use parktree::Config;
use tracing::info;
use tracing_subscriber::{layer::SubscriberExt, util::SubscriberInitExt, EnvFilter};

#[derive(Parser, Debug)]
#[command(name = "parktree")]
#[command(about = "Cluster FASTA sequences with a concurrent K-tree")]
#[command(version)]
struct Args {
    /// FASTA file to cluster
    input: PathBuf,

    /// Signature density, between 0 and 1
    #[arg(short = 'd', long, default_value_t = DEFAULT_DENSITY)]
    density: f32,

    /// Maximum children per tree node
    #[arg(short = 'o', long, default_value_t = DEFAULT_ORDER)]
    order: usize,

    /// Node slots to preallocate
    #[arg(short = 'c', long, default_value_t = DEFAULT_CAPACITY)]
    capacity: usize,

    /// Worker threads (0 = one per core)
    #[arg(short = 't', long, default_value_t = 0)]
    threads: usize,

    /// Base seed for split randomization
    #[arg(long, default_value_t = 0)]
    seed: u64,

    /// Write FASTA records headed by cluster id instead of CSV
    #[arg(long)]
    fasta_output: bool,

    /// Log at debug level
    #[arg(short, long)]
    verbose: bool,
}

impl Args {
    fn config(&self) -> Config {
        Config::default()
            .with_order(self.order)
            .with_capacity(self.capacity)
            .with_density(self.density)
            .with_threads(self.threads)
            .with_seed(self.seed)
    }
}

fn main() -> Result<()> {
    let args = Args::parse();

    let filter = if args.verbose {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("debug"))
    } else {
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"))
    };
    tracing_subscriber::registry()
        .with(filter)
        .with(
            tracing_subscriber::fmt::layer()
                .with_target(false)
                .with_writer(io::stderr),
        )
        .init();

    let config = args.config();
    config.validate()?;

    let start = Instant::now();
    let records = fasta::load(&args.input)?;
    info!(sequences = records.len(), "loaded fasta");

    let sigs = fasta::encode_records(&records);
    info!("encoded signatures");

    let clustering = parktree::cluster(&sigs, &config).context("clustering failed")?;
    info!(
        clusters = clustering.cluster_count,
        elapsed = ?start.elapsed(),
        "clustered sequences"
    );

    let stdout = BufWriter::new(io::stdout().lock());
    let written = if args.fasta_output {
        output::write_fasta(stdout, &clustering.assignments, &records)
    } else {
        output::write_csv(stdout, &clustering.assignments)
    };
    written.context("failed to write output")?;

    Ok(())
}
