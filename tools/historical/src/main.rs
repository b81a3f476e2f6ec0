/// Historical backfill: synthesises a calendar of dryness grids and fire masks,
/// builds the training table from the stored pairs and trains once.
use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::Parser;
use peatfire_core::classifier::ThresholdTrainer;
use peatfire_core::pipeline::build_training_table;
use peatfire_core::samples::{HistoricalTable, SampleExtractor};
use peatfire_core::synth::seeded_rng;
use peatfire_core::{Backfill, PeatfireConfig};

// ── CLI ──────────────────────────────────────────────────────────────────────

#[derive(Parser, Debug)]
#[command(name = "historical", about = "Backfill synthetic history and train the initial risk threshold")]
struct Args {
    /// Pipeline config (JSON). Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Number of epochs to synthesise; overrides the config.
    #[arg(long)]
    epochs: Option<u64>,

    /// Skip synthesis and only rebuild the table from grids already on disk.
    #[arg(long)]
    table_only: bool,

    /// Skip training after the table is built.
    #[arg(long)]
    no_train: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let mut config = PeatfireConfig::load(args.config.as_deref()).context("loading pipeline config")?;
    if let Some(n) = args.epochs {
        config.historical.epochs = n;
    }
    let paths = &config.paths;
    let dry_dir = paths.resolve(&paths.dryness_maps);
    let fire_dir = paths.resolve(&paths.fire_masks);

    // ── 1. Synthesis ────────────────────────────────────────────────────────
    if !args.table_only {
        let report = Backfill::new(&config)
            .context("building backfill")?
            .run(&dry_dir, &fire_dir)
            .with_context(|| format!("writing history into {}", dry_dir.display()))?;
        eprintln!(
            "Synthesised {} epochs: final mean dryness {:.3}, mean burn fraction {:.2}%",
            report.epochs,
            report.final_mean_dryness,
            report.mean_burn_fraction * 100.0
        );
    }

    // ── 2. Training table ───────────────────────────────────────────────────
    let table = HistoricalTable::new(paths.resolve(&paths.training_table));
    let extractor = SampleExtractor::new(&config.sampling);
    let mut rng = seeded_rng(config.historical.seed);
    let rows = build_training_table(&dry_dir, &fire_dir, &table, &extractor, &mut rng)
        .context("building training table from stored grids")?;
    eprintln!("Appended {rows} rows to {}", table.path().display());

    // ── 3. Training ─────────────────────────────────────────────────────────
    if args.no_train {
        return Ok(());
    }
    let trainer = ThresholdTrainer::new(config.trainer.clone()).context("building trainer")?;
    match trainer
        .retrain(&table, &paths.resolve(&paths.model), &paths.resolve(&paths.threshold))
        .context("training risk threshold")?
    {
        Some(m) => eprintln!(
            "Held-out accuracy {:.3} on {} rows -> risk threshold {:.3}",
            m.accuracy, m.test_rows, m.threshold
        ),
        None => eprintln!("Table too small to train; threshold unchanged"),
    }
    Ok(())
}
