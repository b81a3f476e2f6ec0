//! Pipeline configuration: one JSON document, every section optional.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{Duration, NaiveDate, NaiveDateTime, NaiveTime};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::classifier::TrainerParams;
use crate::displacement::{DisplacementParams, PhaseSchedule};
use crate::dryness::AccumulatorParams;
use crate::error::{PeatError, Result};
use crate::fire::FireParams;
use crate::grid::GridSpec;
use crate::risk::RiskParams;
use crate::samples::SamplingParams;

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to parse pipeline config: {0}")]
    Parse(#[from] serde_json::Error),
    #[error("failed to read pipeline config from {path:?}: {source}")]
    ReadFailed {
        path: PathBuf,
        #[source]
        source: io::Error,
    },
    #[error("pipeline config rejected: {0}")]
    Invalid(#[from] PeatError),
}

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PeatfireConfig {
    pub grid: GridSpec,
    pub displacement: DisplacementParams,
    pub historical: HistoricalParams,
    pub accumulator: AccumulatorParams,
    pub fire: FireParams,
    pub sampling: SamplingParams,
    pub trainer: TrainerParams,
    pub risk: RiskParams,
    pub paths: PathsConfig,
    pub schedule: ScheduleConfig,
}

impl PeatfireConfig {
    pub fn from_json_str(json: &str) -> std::result::Result<Self, serde_json::Error> {
        serde_json::from_str(json)
    }

    pub fn from_file(path: &Path) -> std::result::Result<Self, ConfigError> {
        let contents = fs::read_to_string(path)
            .map_err(|source| ConfigError::ReadFailed { path: path.to_path_buf(), source })?;
        let config = Self::from_json_str(&contents)?;
        Ok(config)
    }

    /// Read and validate `path`, or validate the built-in defaults when no path is given.
    pub fn load(path: Option<&Path>) -> std::result::Result<Self, ConfigError> {
        let config = match path {
            Some(p) => Self::from_file(p)?,
            None => Self::default(),
        };
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        if self.grid.width == 0 || self.grid.height == 0 {
            return Err(PeatError::InvalidParameter(format!(
                "grid must be non-empty, got {}x{}",
                self.grid.width, self.grid.height
            )));
        }
        if !(self.grid.pixel_size > 0.0) {
            return Err(PeatError::InvalidParameter(format!("pixel_size must be positive, got {}", self.grid.pixel_size)));
        }
        self.displacement.validate()?;
        self.historical.displacement.validate()?;
        self.historical.fire.validate()?;
        self.accumulator.validate()?;
        self.fire.validate()?;
        self.trainer.validate()?;
        self.risk.validate()?;
        if self.sampling.samples_per_epoch == 0 {
            return Err(PeatError::InvalidParameter("samples_per_epoch must be positive".into()));
        }
        if self.historical.days_per_epoch == 0 {
            return Err(PeatError::InvalidParameter("historical days_per_epoch must be positive".into()));
        }
        self.historical.check_calendar()
    }
}

/// Backfill calendar and the calibration used to synthesise it.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HistoricalParams {
    pub epochs: u64,
    pub start: NaiveDate,
    pub days_per_epoch: u32,
    pub displacement: DisplacementParams,
    pub fire: FireParams,
    /// Seeds fire draws and sampling; `None` is non-reproducible.
    pub seed: Option<u64>,
}

impl Default for HistoricalParams {
    fn default() -> Self {
        Self {
            epochs: 120,
            start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            days_per_epoch: 10,
            displacement: DisplacementParams::historical(),
            fire: FireParams::historical(),
            seed: None,
        }
    }
}

impl HistoricalParams {
    /// Midnight timestamp of backfill epoch `epoch`.
    pub fn timestamp_of(&self, epoch: u64) -> NaiveDateTime {
        let date = self.start + Duration::days(epoch as i64 * self.days_per_epoch as i64);
        date.and_time(NaiveTime::default())
    }

    /// A monsoon schedule must share the calendar the backfill files are named by.
    fn check_calendar(&self) -> Result<()> {
        let PhaseSchedule::Monsoon(m) = &self.displacement.schedule else {
            return Ok(());
        };
        if m.start != self.start || m.days_per_epoch != self.days_per_epoch {
            return Err(PeatError::InvalidParameter(format!(
                "historical calendar ({} every {} days) disagrees with its monsoon schedule ({} every {} days)",
                self.start, self.days_per_epoch, m.start, m.days_per_epoch
            )));
        }
        Ok(())
    }
}

/// Artifact locations, relative to `data_root`.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PathsConfig {
    pub data_root: PathBuf,
    pub displacement_input: PathBuf,
    pub dryness_state: PathBuf,
    pub live_state: PathBuf,
    pub dryness_index: PathBuf,
    pub dryness_log: PathBuf,
    pub training_table: PathBuf,
    pub training_dryness_state: PathBuf,
    pub training_displacement_state: PathBuf,
    pub dryness_maps: PathBuf,
    pub fire_masks: PathBuf,
    pub model: PathBuf,
    pub threshold: PathBuf,
}

impl Default for PathsConfig {
    fn default() -> Self {
        Self {
            data_root: PathBuf::from("data"),
            displacement_input: PathBuf::from("inputs/displacement.json"),
            dryness_state: PathBuf::from("products/dryness_state.bin"),
            live_state: PathBuf::from("temp/live_state.bin"),
            dryness_index: PathBuf::from("products/dryness_index.json"),
            dryness_log: PathBuf::from("products/dryness_log.csv"),
            training_table: PathBuf::from("historical/training_data.csv"),
            training_dryness_state: PathBuf::from("historical/dryness_state.bin"),
            training_displacement_state: PathBuf::from("historical/displacement_state.bin"),
            dryness_maps: PathBuf::from("historical/dryness_maps"),
            fire_masks: PathBuf::from("historical/fire_masks"),
            model: PathBuf::from("models/fire_risk_model.bin"),
            threshold: PathBuf::from("models/fire_threshold.json"),
        }
    }
}

impl PathsConfig {
    /// Same layout under another root.
    pub fn rooted_at(root: impl Into<PathBuf>) -> Self {
        Self { data_root: root.into(), ..Self::default() }
    }

    pub fn resolve(&self, relative: &Path) -> PathBuf {
        self.data_root.join(relative)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub stream_interval_secs: u64,
    pub trainer_interval_secs: u64,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self { stream_interval_secs: 5, trainer_interval_secs: 60 }
    }
}
