use std::path::PathBuf;

use anyhow::{Result, bail};
use clap::Parser;
use coalsim::*;
use tracing_subscriber::{EnvFilter, fmt, layer::SubscriberExt, util::SubscriberInitExt};

// ── CLI ───────────────────────────────────────────────────────────────────────

#[derive(Parser)]
#[command(about = "Coalescence-rate trajectory of lineages sampled from one deme")]
struct Args {
    /// Demes YAML file
    graph: PathBuf,
    /// Deme the lineages are sampled from
    #[arg(long)]
    deme: String,
    /// Comma-separated time points in generations
    #[arg(long, value_delimiter = ',', conflicts_with = "end")]
    times: Option<Vec<f64>>,
    /// Evenly spaced grid from 0 to this time
    #[arg(long)]
    end: Option<f64>,
    #[arg(long, default_value_t = 100)]
    steps: usize,
    #[arg(long, default_value_t = 2)]
    lineages: usize,
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

    let times = match (args.times, args.end) {
        (Some(times), _) => times,
        (None, Some(end)) if args.steps > 0 => (0..=args.steps)
            .map(|i| end * i as f64 / args.steps as f64)
            .collect(),
        _ => bail!("give either --times or --end with --steps > 0"),
    };

    let model = DemographicModel::load(&args.graph)?;
    let trajectory = coalescence_rate_trajectory(&model, &args.deme, &times, args.lineages)?;

    println!("time\trate\tsurvival");
    for ((t, r), s) in trajectory
        .times
        .iter()
        .zip(&trajectory.rates)
        .zip(&trajectory.survival)
    {
        println!("{t}\t{r:e}\t{s}");
    }
    Ok(())
}
