//! Pipeline orchestrators: the live assessment loop, the training cycle and
//! the historical backfill.
//!
//! Live and training paths share the accumulator update rule but keep their
//! own persisted states, so neither can disturb the other's memory.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{NaiveDate, NaiveDateTime, NaiveTime};
use rand::rngs::StdRng;
use rand::Rng;
use tracing::{debug, info, warn};

use crate::classifier::{ThresholdTrainer, TrainedModel};
use crate::config::{HistoricalParams, PathsConfig, PeatfireConfig};
use crate::displacement::{DisplacementFrame, DisplacementGenerator, DisplacementState, Phase, Shock};
use crate::dryness::{DrynessAccumulator, DrynessState, DrynessUpdate};
use crate::error::{PeatError, Result};
use crate::fire::FireSimulator;
use crate::grid::{FireMask, Grid, GridSpec};
use crate::risk::{RiskLevel, RiskParams};
use crate::samples::{HistoricalTable, SampleExtractor};
use crate::store::{self, DrynessLogEntry};
use crate::synth::{derive_seed, seeded_rng};

// ── Live assessment ──────────────────────────────────────────────────────────

/// Outcome of one live assessment.
#[derive(Debug, Clone)]
pub struct Assessment {
    pub timestamp: NaiveDateTime,
    pub mean_dryness: f32,
    pub threshold: f32,
    pub risk: RiskLevel,
}

pub struct LivePipeline {
    spec: GridSpec,
    paths: PathsConfig,
    generator: DisplacementGenerator,
    accumulator: DrynessAccumulator,
    risk: RiskParams,
}

impl LivePipeline {
    pub fn new(config: &PeatfireConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            spec: config.grid.clone(),
            paths: config.paths.clone(),
            generator: DisplacementGenerator::new(config.displacement.clone(), config.grid.clone())?,
            accumulator: DrynessAccumulator::new(config.accumulator.clone())?,
            risk: config.risk.clone(),
        })
    }

    fn path(&self, relative: &Path) -> PathBuf {
        self.paths.resolve(relative)
    }

    /// Generate the next displacement epoch, persist the generator state and
    /// publish the line-of-sight grid as the current input.
    pub fn ingest_epoch(&mut self) -> Result<DisplacementFrame> {
        let state_path = self.path(&self.paths.live_state);
        let prior = store::load_displacement_state(&state_path, &self.spec)?;
        let frame = self.generator.generate_next(&prior)?;
        store::write_grid(&self.path(&self.paths.displacement_input), &frame.line_of_sight)?;
        store::save_blob(&state_path, &frame.state)?;
        info!(
            epoch = frame.epoch,
            phase = ?frame.phase,
            shock = ?frame.shock,
            mean_cm = frame.vertical_mean * 100.0,
            "displacement epoch generated"
        );
        Ok(frame)
    }

    /// Fold the current displacement input into the dryness state and classify it.
    ///
    /// Fails with `MissingInput` when no displacement grid has been published
    /// and with `ShapeMismatch` when it does not cover the configured grid; in
    /// both cases no state is written.
    pub fn assess(&self, timestamp: NaiveDateTime) -> Result<Assessment> {
        let los: Grid = store::read_grid(&self.path(&self.paths.displacement_input))?;
        self.spec.check(&los)?;

        let state_path = self.path(&self.paths.dryness_state);
        let prior = store::load_dryness_state(&state_path, &self.spec)?;
        let update = self.accumulator.update(&prior, &los)?;
        store::save_blob(&state_path, &update.state)?;
        store::write_grid(&self.path(&self.paths.dryness_index), &update.dryness_index)?;

        let mean_dryness = update.mean_dryness();
        let threshold = self.risk.threshold_or_default(&self.path(&self.paths.threshold));
        let risk = self.risk.classify(mean_dryness, threshold);
        store::append_dryness_log(
            &self.path(&self.paths.dryness_log),
            DrynessLogEntry { timestamp, dryness: mean_dryness },
        )?;

        debug!(
            min = update.dryness_index.min_value(),
            max = update.dryness_index.max_value(),
            "dryness index stats"
        );
        info!(%timestamp, mean_dryness, threshold, %risk, "dryness assessed");
        Ok(Assessment { timestamp, mean_dryness, threshold, risk })
    }

    /// One stream step: ingest a new epoch, then assess it.
    pub fn step(&mut self, timestamp: NaiveDateTime) -> Result<(DisplacementFrame, Assessment)> {
        let frame = self.ingest_epoch()?;
        let assessment = self.assess(timestamp)?;
        Ok((frame, assessment))
    }

    /// Single-pass run: assess the published input, generating one first when
    /// `generate` is set or when none exists yet.
    pub fn run_once(&mut self, timestamp: NaiveDateTime, generate: bool) -> Result<Assessment> {
        if generate {
            self.ingest_epoch()?;
            return self.assess(timestamp);
        }
        match self.assess(timestamp) {
            Err(PeatError::MissingInput { path }) => {
                info!(path = ?path, "no displacement input yet, generating one");
                self.ingest_epoch()?;
                self.assess(timestamp)
            }
            other => other,
        }
    }
}

// ── Training cycle ───────────────────────────────────────────────────────────

/// Summary of one training cycle.
#[derive(Debug, Clone)]
pub struct CycleReport {
    pub epoch: u64,
    pub phase: Phase,
    pub shock: Shock,
    pub mean_dryness: f32,
    pub burn_fraction: f32,
    pub samples_appended: usize,
    /// `None` while the table is below the training minimum.
    pub model: Option<TrainedModel>,
}

pub struct TrainingCycle {
    spec: GridSpec,
    paths: PathsConfig,
    generator: DisplacementGenerator,
    accumulator: DrynessAccumulator,
    fire: FireSimulator,
    extractor: SampleExtractor,
    trainer: ThresholdTrainer,
    seed: Option<u64>,
}

impl TrainingCycle {
    pub fn new(config: &PeatfireConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            spec: config.grid.clone(),
            paths: config.paths.clone(),
            generator: DisplacementGenerator::new(config.displacement.clone(), config.grid.clone())?,
            accumulator: DrynessAccumulator::new(config.accumulator.clone())?,
            fire: FireSimulator::new(config.fire.clone())?,
            extractor: SampleExtractor::new(&config.sampling),
            trainer: ThresholdTrainer::new(config.trainer.clone())?,
            seed: config.displacement.seed.map(|s| s ^ 0x7f4a_7c15),
        })
    }

    pub fn table(&self) -> HistoricalTable {
        HistoricalTable::new(self.paths.resolve(&self.paths.training_table))
    }

    /// Fire draws and sample positions for `epoch`; reproducible per epoch
    /// when the displacement model is seeded.
    fn epoch_rng(&self, epoch: u64) -> StdRng {
        seeded_rng(self.seed.map(|s| derive_seed(s, epoch)))
    }

    /// Generate an epoch on the training states, simulate fire, extend the
    /// table and retrain.
    ///
    /// Both states are persisted before the table grows, so a failed cycle
    /// never leaves rows behind for an epoch that will be generated again.
    pub fn run_cycle(&mut self, timestamp: NaiveDateTime) -> Result<CycleReport> {
        let disp_path = self.paths.resolve(&self.paths.training_displacement_state);
        let dry_path = self.paths.resolve(&self.paths.training_dryness_state);

        let prior = store::load_displacement_state(&disp_path, &self.spec)?;
        let frame = self.generator.generate_next(&prior)?;
        let dryness = store::load_dryness_state(&dry_path, &self.spec)?;
        let update = self.accumulator.update(&dryness, &frame.line_of_sight)?;

        let mut rng = self.epoch_rng(frame.epoch);
        let mask = self.fire.simulate(&update.dryness_index, Some(rng.gen()));
        let samples = self.extractor.extract(&update.dryness_index, &mask, timestamp, &mut rng)?;

        store::save_blob(&disp_path, &frame.state)?;
        store::save_blob(&dry_path, &update.state)?;
        let table = self.table();
        let samples_appended = table.append(&samples)?;

        let model = self.trainer.retrain(
            &table,
            &self.paths.resolve(&self.paths.model),
            &self.paths.resolve(&self.paths.threshold),
        )?;

        let report = CycleReport {
            epoch: frame.epoch,
            phase: frame.phase,
            shock: frame.shock,
            mean_dryness: update.mean_dryness(),
            burn_fraction: mask.active_fraction(),
            samples_appended,
            model,
        };
        info!(
            epoch = report.epoch,
            mean_dryness = report.mean_dryness,
            burn_fraction = report.burn_fraction,
            samples = report.samples_appended,
            retrained = report.model.is_some(),
            "training cycle complete"
        );
        Ok(report)
    }
}

// ── Historical backfill ──────────────────────────────────────────────────────

const DRY_PREFIX: &str = "dry_";
const FIRE_PREFIX: &str = "fire_";
const GRID_EXT: &str = "json";

fn dated_name(prefix: &str, date: NaiveDate) -> String {
    format!("{prefix}{}.{GRID_EXT}", date.format("%Y%m%d"))
}

#[derive(Debug, Clone)]
pub struct BackfillReport {
    pub epochs: u64,
    pub final_mean_dryness: f32,
    pub mean_burn_fraction: f32,
}

/// Synthesise a calendar of dryness grids and fire masks into two directories.
pub struct Backfill {
    params: HistoricalParams,
    spec: GridSpec,
    accumulator: DrynessAccumulator,
    fire: FireSimulator,
}

impl Backfill {
    pub fn new(config: &PeatfireConfig) -> Result<Self> {
        config.validate()?;
        Ok(Self {
            params: config.historical.clone(),
            spec: config.grid.clone(),
            accumulator: DrynessAccumulator::new(config.accumulator.clone())?,
            fire: FireSimulator::new(config.historical.fire.clone())?,
        })
    }

    /// Writes `dry_YYYYMMDD.json` into `dry_dir` and `fire_YYYYMMDD.json` into
    /// `fire_dir` for every epoch, starting from cold states.
    pub fn run(&self, dry_dir: &Path, fire_dir: &Path) -> Result<BackfillReport> {
        let generator = DisplacementGenerator::new(self.params.displacement.clone(), self.spec.clone())?;
        let mut rng = seeded_rng(self.params.seed);
        let mut displacement = DisplacementState::initial(&self.spec);
        let mut dryness = DrynessState::initial(&self.spec);
        let mut burn_total = 0.0f64;
        let mut last: Option<DrynessUpdate> = None;

        for epoch in 0..self.params.epochs {
            let frame = generator.generate(epoch, &displacement)?;
            let update = self.accumulator.update(&dryness, &frame.line_of_sight)?;
            let mask: FireMask = self.fire.simulate(&update.dryness_index, Some(rng.gen()));

            let date = self.params.timestamp_of(epoch).date();
            store::write_grid(&dry_dir.join(dated_name(DRY_PREFIX, date)), &update.dryness_index)?;
            store::write_grid(&fire_dir.join(dated_name(FIRE_PREFIX, date)), &mask)?;

            burn_total += mask.active_fraction() as f64;
            debug!(
                epoch,
                %date,
                phase = ?frame.phase,
                shock = ?frame.shock,
                mean_dryness = update.mean_dryness(),
                burn_fraction = mask.active_fraction(),
                "historical epoch written"
            );
            displacement = frame.state;
            dryness = update.state.clone();
            last = Some(update);
        }

        let report = BackfillReport {
            epochs: self.params.epochs,
            final_mean_dryness: last.map_or(0.0, |u| u.mean_dryness()),
            mean_burn_fraction: if self.params.epochs == 0 {
                0.0
            } else {
                (burn_total / self.params.epochs as f64) as f32
            },
        };
        info!(
            epochs = report.epochs,
            final_mean_dryness = report.final_mean_dryness,
            mean_burn_fraction = report.mean_burn_fraction,
            "historical backfill complete"
        );
        Ok(report)
    }
}

/// Sorted `(file, date)` pairs of `prefix*.json` files in `dir`.
fn dated_files(dir: &Path, prefix: &str) -> Result<Vec<(PathBuf, NaiveDate)>> {
    let entries = fs::read_dir(dir).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PeatError::MissingInput { path: dir.to_path_buf() },
        _ => PeatError::io(dir, e),
    })?;

    let mut files = Vec::new();
    for entry in entries {
        let path = entry.map_err(|e| PeatError::io(dir, e))?.path();
        if path.extension().and_then(|e| e.to_str()) != Some(GRID_EXT) {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else { continue };
        let Some(digits) = stem.strip_prefix(prefix) else { continue };
        let date = NaiveDate::parse_from_str(digits, "%Y%m%d")
            .map_err(|e| PeatError::corrupt(&path, format!("no YYYYMMDD date in file name: {e}")))?;
        files.push((path, date));
    }
    files.sort();
    Ok(files)
}

/// Build training rows from stored dryness grids and fire masks.
///
/// Files pair up in sorted order and each row takes its timestamp from the
/// dryness file name. Unequal file counts are `CorruptArtifact`; a pair whose
/// shapes differ is skipped. Returns the number of rows appended.
pub fn build_training_table<R: Rng + ?Sized>(
    dry_dir: &Path,
    fire_dir: &Path,
    table: &HistoricalTable,
    extractor: &SampleExtractor,
    rng: &mut R,
) -> Result<usize> {
    let dry_files = dated_files(dry_dir, DRY_PREFIX)?;
    let fire_files = dated_files(fire_dir, FIRE_PREFIX)?;
    if dry_files.len() != fire_files.len() {
        return Err(PeatError::corrupt(
            fire_dir,
            format!("{} dryness grids but {} fire masks", dry_files.len(), fire_files.len()),
        ));
    }

    let mut rows = Vec::new();
    for ((dry_path, date), (fire_path, _)) in dry_files.iter().zip(fire_files.iter()) {
        let dryness: Grid = store::read_grid(dry_path)?;
        let mask: FireMask = store::read_grid(fire_path)?;
        if let Err(e) = dryness.ensure_same_shape(&mask) {
            warn!(dry = ?dry_path, fire = ?fire_path, error = %e, "skipping grid pair");
            continue;
        }
        let timestamp = date.and_time(NaiveTime::default());
        rows.extend(extractor.extract_capped(&dryness, &mask, timestamp, rng)?);
    }

    let appended = table.append(&rows)?;
    info!(pairs = dry_files.len(), rows = appended, path = ?table.path(), "training table built from stored grids");
    Ok(appended)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GeoRef;
    use crate::samples::SamplingParams;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2024, 5, day).unwrap().and_hms_opt(6, 0, 0).unwrap()
    }

    fn small_config(root: &Path) -> PeatfireConfig {
        let mut c = PeatfireConfig::default();
        c.grid = GridSpec { width: 24, height: 20, ..GridSpec::default() };
        c.paths = PathsConfig::rooted_at(root);
        c.displacement.seed = Some(11);
        c.sampling = SamplingParams { samples_per_epoch: 60 };
        c.trainer.forest.n_estimators = 10;
        c.historical.epochs = 6;
        c.historical.seed = Some(5);
        c.historical.displacement.seed = Some(6);
        c
    }

    #[test]
    fn assess_without_input_is_missing_and_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let c = small_config(dir.path());
        let live = LivePipeline::new(&c).unwrap();
        assert!(matches!(live.assess(ts(1)), Err(PeatError::MissingInput { .. })));
        assert!(!c.paths.resolve(&c.paths.dryness_state).exists());
    }

    #[test]
    fn run_once_cold_start_generates_and_classifies() {
        let dir = tempfile::tempdir().unwrap();
        let c = small_config(dir.path());
        let mut live = LivePipeline::new(&c).unwrap();
        let a = live.run_once(ts(1), false).unwrap();
        assert!((0.0..=1.0).contains(&a.mean_dryness));
        assert_eq!(a.threshold, 0.65);
        assert_eq!(a.risk, c.risk.classify(a.mean_dryness, 0.65));
        assert!(c.paths.resolve(&c.paths.dryness_index).exists());
        let log = fs::read_to_string(c.paths.resolve(&c.paths.dryness_log)).unwrap();
        assert_eq!(log.lines().count(), 2);
    }

    #[test]
    fn stream_epochs_continue_after_restart() {
        let dir = tempfile::tempdir().unwrap();
        let c = small_config(dir.path());
        {
            let mut live = LivePipeline::new(&c).unwrap();
            assert_eq!(live.step(ts(1)).unwrap().0.epoch, 0);
            assert_eq!(live.step(ts(2)).unwrap().0.epoch, 1);
        }
        let mut restarted = LivePipeline::new(&c).unwrap();
        assert_eq!(restarted.step(ts(3)).unwrap().0.epoch, 2);
    }

    #[test]
    fn mismatched_input_aborts_epoch() {
        let dir = tempfile::tempdir().unwrap();
        let c = small_config(dir.path());
        let live = LivePipeline::new(&c).unwrap();
        store::write_grid(&c.paths.resolve(&c.paths.displacement_input), &Grid::zeros(5, 5, GeoRef::default()))
            .unwrap();
        assert!(matches!(live.assess(ts(1)), Err(PeatError::ShapeMismatch { .. })));
        assert!(!c.paths.resolve(&c.paths.dryness_log).exists());
    }

    #[test]
    fn sustained_subsidence_raises_risk() {
        let dir = tempfile::tempdir().unwrap();
        let c = small_config(dir.path());
        let live = LivePipeline::new(&c).unwrap();
        let input = c.paths.resolve(&c.paths.displacement_input);
        let mut last = None;
        for day in 1..=8 {
            store::write_grid(&input, &Grid::new(24, 20, GeoRef::default(), -0.02)).unwrap();
            last = Some(live.assess(ts(day)).unwrap());
        }
        let a = last.unwrap();
        assert_eq!(a.mean_dryness, 1.0);
        assert_eq!(a.risk, RiskLevel::High);
    }

    #[test]
    fn training_cycle_grows_table_and_eventually_trains() {
        let dir = tempfile::tempdir().unwrap();
        let c = small_config(dir.path());
        let mut cycle = TrainingCycle::new(&c).unwrap();

        let first = cycle.run_cycle(ts(1)).unwrap();
        assert_eq!(first.samples_appended, 60);
        assert!(first.model.is_none());
        assert!(!c.paths.resolve(&c.paths.threshold).exists());

        let mut trained = None;
        for day in 2..=4 {
            trained = cycle.run_cycle(ts(day)).unwrap().model;
        }
        assert_eq!(cycle.table().len().unwrap(), 240);
        let model = trained.unwrap();
        assert_eq!(store::load_threshold(&c.paths.resolve(&c.paths.threshold)).unwrap(), model.threshold);
    }

    #[test]
    fn training_draws_are_fixed_per_epoch_not_per_process() {
        let dir = tempfile::tempdir().unwrap();
        let c = small_config(dir.path());
        let a = TrainingCycle::new(&c).unwrap();
        let b = TrainingCycle::new(&c).unwrap();
        assert_ne!(a.epoch_rng(0).gen::<u64>(), a.epoch_rng(1).gen::<u64>());
        assert_eq!(a.epoch_rng(1).gen::<u64>(), b.epoch_rng(1).gen::<u64>());
    }

    #[test]
    fn failed_state_write_leaves_table_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let c = small_config(dir.path());
        let table_path = c.paths.resolve(&c.paths.training_table);
        // A directory where the staged state file would go makes the save fail.
        let blocker = dir.path().join("historical/displacement_state.bin.tmp");
        fs::create_dir_all(&blocker).unwrap();

        let mut cycle = TrainingCycle::new(&c).unwrap();
        assert!(matches!(cycle.run_cycle(ts(1)), Err(PeatError::Io { .. })));
        assert!(!table_path.exists());

        fs::remove_dir(&blocker).unwrap();
        let report = cycle.run_cycle(ts(2)).unwrap();
        assert_eq!(report.epoch, 0);
        assert_eq!(cycle.table().len().unwrap(), 60);
    }

    #[test]
    fn backfill_then_table_from_stored_grids() {
        let dir = tempfile::tempdir().unwrap();
        let c = small_config(dir.path());
        let dry_dir = c.paths.resolve(&c.paths.dryness_maps);
        let fire_dir = c.paths.resolve(&c.paths.fire_masks);

        let report = Backfill::new(&c).unwrap().run(&dry_dir, &fire_dir).unwrap();
        assert_eq!(report.epochs, 6);
        assert!(dry_dir.join("dry_20200101.json").exists());
        assert!(fire_dir.join("fire_20200121.json").exists());

        let table = HistoricalTable::new(c.paths.resolve(&c.paths.training_table));
        let extractor = SampleExtractor::new(&SamplingParams { samples_per_epoch: 1000 });
        let rows = build_training_table(&dry_dir, &fire_dir, &table, &extractor, &mut seeded_rng(Some(1))).unwrap();
        // 480 pixels per grid, all finite, capped below the requested 1000.
        assert_eq!(rows, 6 * 480);
        let all = table.read_all().unwrap();
        assert_eq!(all[0].timestamp.date(), NaiveDate::from_ymd_opt(2020, 1, 1).unwrap());
        assert_eq!(all.last().unwrap().timestamp.date(), NaiveDate::from_ymd_opt(2020, 2, 20).unwrap());
    }

    #[test]
    fn stored_pairs_with_other_shapes_are_skipped() {
        let dir = tempfile::tempdir().unwrap();
        let (dry_dir, fire_dir) = (dir.path().join("dry"), dir.path().join("fire"));
        let d = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
        let e = NaiveDate::from_ymd_opt(2021, 3, 11).unwrap();
        store::write_grid(&dry_dir.join(dated_name(DRY_PREFIX, d)), &Grid::new(4, 4, GeoRef::default(), 0.5)).unwrap();
        store::write_grid(&fire_dir.join(dated_name(FIRE_PREFIX, d)), &Grid::new(4, 4, GeoRef::default(), 1u8)).unwrap();
        store::write_grid(&dry_dir.join(dated_name(DRY_PREFIX, e)), &Grid::new(4, 4, GeoRef::default(), 0.5)).unwrap();
        store::write_grid(&fire_dir.join(dated_name(FIRE_PREFIX, e)), &Grid::new(2, 8, GeoRef::default(), 0u8)).unwrap();

        let table = HistoricalTable::new(dir.path().join("t.csv"));
        let extractor = SampleExtractor::new(&SamplingParams::default());
        let rows = build_training_table(&dry_dir, &fire_dir, &table, &extractor, &mut seeded_rng(Some(2))).unwrap();
        assert_eq!(rows, 16);
        assert!(table.read_all().unwrap().iter().all(|s| s.fire_occurred == 1));
    }

    #[test]
    fn unequal_file_counts_are_rejected() {
        let dir = tempfile::tempdir().unwrap();
        let (dry_dir, fire_dir) = (dir.path().join("dry"), dir.path().join("fire"));
        let d = NaiveDate::from_ymd_opt(2021, 3, 1).unwrap();
        store::write_grid(&dry_dir.join(dated_name(DRY_PREFIX, d)), &Grid::new(4, 4, GeoRef::default(), 0.5)).unwrap();
        fs::create_dir_all(&fire_dir).unwrap();
        let table = HistoricalTable::new(dir.path().join("t.csv"));
        let extractor = SampleExtractor::new(&SamplingParams::default());
        let err = build_training_table(&dry_dir, &fire_dir, &table, &extractor, &mut seeded_rng(Some(3))).unwrap_err();
        assert!(matches!(err, PeatError::CorruptArtifact { .. }));
    }
}
