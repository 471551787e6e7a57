use std::path::PathBuf;

use anyhow::Result;
use clap::Parser;
use coalsim::*;
use rand::Rng;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(about = "Simulate a chromosome with empirical mutation and recombination maps")]
struct Args {
    /// Demes YAML file
    graph: PathBuf,
    /// Random seed (random if omitted)
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = 10_000_000)]
    sequence_length: u64,
    /// Per-base rate, or a genetic map file (HapMap/PLINK, `pos rate cM`, `pos cM`)
    #[arg(long, default_value = "1e-8")]
    recombination: RateParameter,
    /// Per-base rate, or a bedgraph-like mutation-rate track
    #[arg(long, default_value = "1e-8")]
    mutation: RateParameter,
    /// Average the mutation track over windows of this many rows
    #[arg(long)]
    window_size: Option<usize>,
    /// Comma-separated demes to sample one diploid from (all extant demes if omitted)
    #[arg(long, value_delimiter = ',')]
    demes: Option<Vec<String>>,
    #[arg(long, default_value = "0")]
    contig: String,
    #[arg(long, default_value = "chromosome.vcf")]
    output: PathBuf,
    #[arg(long)]
    progress: bool,
}

fn init_logging() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    tracing_subscriber::registry()
        .with(fmt::layer().with_target(false).with_writer(std::io::stderr))
        .with(filter)
        .init();
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let params = Parameters {
        random_seed: Some(
            args.seed
                .unwrap_or_else(|| rand::rng().random_range(1..u64::MAX)),
        ),
        sequence_length: args.sequence_length,
        recombination: args.recombination,
        mutation: args.mutation,
        sampled_demes: args.demes,
        contig_id: args.contig,
        window_size: args.window_size,
        show_progress: args.progress,
    };
    info!("{:?}", params);

    let summary = simulate_chromosome(args.graph.as_path(), &params, &args.output)?;
    eprintln!("num_sites: {}", summary.num_sites);
    Ok(())
}
