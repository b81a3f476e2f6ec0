/// Live polling loop: generate one displacement epoch, update the dryness
/// state, classify, sleep. Runs until interrupted or `--max-epochs` is reached.
use std::path::PathBuf;
use std::thread;
use std::time::Duration;

use anyhow::{Context, Result};
use chrono::Utc;
use clap::Parser;
use peatfire_core::{LivePipeline, PeatfireConfig};
use tracing::{error, info};

#[derive(Parser, Debug)]
#[command(name = "stream", about = "Continuously generate displacement epochs and assess fire risk")]
struct Args {
    /// Pipeline config (JSON). Built-in defaults when omitted.
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Seconds between epochs; overrides the config schedule.
    #[arg(long)]
    interval: Option<u64>,

    /// Stop after this many epochs.
    #[arg(long)]
    max_epochs: Option<u64>,
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let config = PeatfireConfig::load(args.config.as_deref()).context("loading pipeline config")?;
    let interval = Duration::from_secs(args.interval.unwrap_or(config.schedule.stream_interval_secs));
    let mut pipeline = LivePipeline::new(&config).context("building live pipeline")?;

    info!(interval_secs = interval.as_secs(), data_root = ?config.paths.data_root, "stream started");
    let mut done = 0u64;
    loop {
        // A failed epoch is logged and skipped; the next one starts from the last persisted state.
        match pipeline.step(Utc::now().naive_utc()) {
            Ok((frame, a)) => {
                eprintln!(
                    "epoch {:>5}  {:?}/{:?}  dryness {:.3}  {}  {}",
                    frame.epoch,
                    frame.phase,
                    frame.shock,
                    a.mean_dryness,
                    a.risk,
                    a.risk.advisory()
                );
            }
            Err(e) => error!(error = %e, "epoch aborted"),
        }
        done += 1;
        if args.max_epochs.is_some_and(|max| done >= max) {
            break;
        }
        thread::sleep(interval);
    }
    info!(epochs = done, "stream stopped");
    Ok(())
}
