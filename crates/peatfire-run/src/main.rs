/// Single-pass dryness assessment: folds the current displacement input into
/// the persisted dryness state, classifies the mean dryness and exits.
use std::path::PathBuf;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use peatfire_core::{LivePipeline, PeatfireConfig};

#[derive(Parser, Debug)]
#[command(name = "peatfire-run", about = "Run one dryness assessment and print the fire-risk level")]
struct Args {
    /// Pipeline config (JSON). Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Override the data root from the config.
    #[arg(long)]
    data_root: Option<PathBuf>,

    /// Generate a fresh displacement epoch before assessing.
    #[arg(long)]
    generate: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = PeatfireConfig::load(args.config.as_deref()).context("loading pipeline config")?;
    if let Some(root) = args.data_root {
        config.paths.data_root = root;
    }

    let mut pipeline = LivePipeline::new(&config).context("building live pipeline")?;
    let assessment = pipeline
        .run_once(Utc::now().naive_utc(), args.generate)
        .context("dryness assessment failed")?;

    println!("Mean dryness index: {:.3}", assessment.mean_dryness);
    println!("Risk threshold:     {:.3}", assessment.threshold);
    println!("Fire risk:          {}", assessment.risk);
    println!("{}", assessment.risk.advisory());
    Ok(())
}
