/// Background training loop: each cycle simulates an epoch of fire on the
/// training states, appends samples to the historical table and refreshes
/// the classifier and risk threshold.
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use peatfire_core::{PeatfireConfig, TrainingCycle};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "trainer", about = "Periodically extend the training table and retrain the risk threshold")]
struct Args {
    /// Pipeline config (JSON). Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between cycles; overrides the config schedule.
    #[arg(long)]
    interval: Option<u64>,

    /// Run a single cycle and exit.
    #[arg(long)]
    once: bool,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = PeatfireConfig::load(args.config.as_deref()).context("loading pipeline config")?;
    let interval = Duration::from_secs(args.interval.unwrap_or(config.schedule.trainer_interval_secs));
    let mut cycle = TrainingCycle::new(&config).context("building training cycle")?;

    if args.once {
        let report = cycle.run_cycle(Utc::now().naive_utc()).context("training cycle failed")?;
        print_report(&report);
        return Ok(());
    }

    info!(interval_secs = interval.as_secs(), "trainer started");
    loop {
        match cycle.run_cycle(Utc::now().naive_utc()) {
            Ok(report) => print_report(&report),
            Err(e) => error!(error = %e, "training cycle aborted"),
        }
        thread::sleep(interval);
    }
}

fn print_report(report: &peatfire_core::CycleReport) {
    eprintln!(
        "epoch {:>5}  dryness {:.3}  burning {:.1}%  +{} samples",
        report.epoch,
        report.mean_dryness,
        report.burn_fraction * 100.0,
        report.samples_appended
    );
    match &report.model {
        Some(m) => eprintln!("  accuracy {:.3} -> risk threshold {:.3}", m.accuracy, m.threshold),
        None => eprintln!("  not enough rows yet, threshold unchanged"),
    }
}
