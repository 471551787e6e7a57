use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use coalsim::*;
use rand::Rng;
use tracing::info;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(about = "Coalescent simulation under a demes model with constant rates")]
struct Args {
    /// Demes YAML file
    graph: PathBuf,
    /// Random seed (random if omitted)
    #[arg(long)]
    seed: Option<u64>,
    #[arg(long, default_value_t = 10_000_000)]
    sequence_length: u64,
    #[arg(long, default_value_t = 1e-8)]
    recombination_rate: f64,
    #[arg(long, default_value_t = 1e-8)]
    mutation_rate: f64,
    /// Comma-separated demes to sample one diploid from (all extant demes if omitted)
    #[arg(long, value_delimiter = ',')]
    demes: Option<Vec<String>>,
    #[arg(long, default_value = "0")]
    contig: String,
    #[arg(long, default_value = "simulated.vcf")]
    output: PathBuf,
    /// Also write the tree sequence here
    #[arg(long)]
    trees: Option<PathBuf>,
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

// ── Main ─────────────────────────────────────────────────────────────────────

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let params = Parameters {
        random_seed: Some(
            args.seed
                .unwrap_or_else(|| rand::rng().random_range(1..u64::MAX)),
        ),
        sequence_length: args.sequence_length,
        recombination: RateParameter::Scalar(args.recombination_rate),
        mutation: RateParameter::Scalar(args.mutation_rate),
        sampled_demes: args.demes,
        contig_id: args.contig,
        window_size: None,
        show_progress: args.progress,
    };
    info!("{:?}", params);

    let SimulationOutcome::Genealogy(genealogy) = simulate(args.graph.as_path(), &params, None)?
    else {
        bail!("expected an in-memory genealogy");
    };

    write_vcf(&genealogy, &params.contig_id, &args.output)?;
    info!(
        "{} bp simulated on contig {} ({} sites) and saved at {}",
        genealogy.sequence_length(),
        params.contig_id,
        genealogy.num_sites(),
        args.output.display()
    );

    if let Some(path) = &args.trees {
        genealogy.dump(path)?;
        info!("tree sequence saved at {}", path.display());
    }

    // ── Summary statistics ────────────────────────────────────────────────────
    eprintln!("num_trees: {}", genealogy.num_trees());
    eprintln!("num_sites: {}", genealogy.num_sites());
    eprintln!("num_mutations: {}", genealogy.num_mutations());
    Ok(())
}
