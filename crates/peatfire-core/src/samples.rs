//! Training-sample extraction and the append-only historical table.
//!
//! The table is a CSV file `timestamp,dryness,fire_occurred` whose header is
//! written exactly once. Appends go through write-then-rename, so a reader
//! (the threshold trainer) sees either the old or the new table, never a
//! partially written one. Rows are never rewritten or reordered.

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use rand::seq::index;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::error::{PeatError, Result};
use crate::grid::{FireMask, Grid};
use crate::store::write_atomic;

/// One (dryness, fire) observation.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct TrainingSample {
    pub timestamp: NaiveDateTime,
    /// Dryness index in `[0, 1]`.
    pub dryness: f32,
    /// 1 if the pixel burned, 0 otherwise.
    pub fire_occurred: u8,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct SamplingParams {
    pub samples_per_epoch: usize,
}

impl Default for SamplingParams {
    fn default() -> Self {
        Self { samples_per_epoch: 500 }
    }
}

#[derive(Debug, Clone)]
pub struct SampleExtractor {
    samples_per_epoch: usize,
}

impl SampleExtractor {
    pub fn new(params: &SamplingParams) -> Self {
        Self { samples_per_epoch: params.samples_per_epoch }
    }

    /// Draw exactly `samples_per_epoch` pixels sharing `timestamp`.
    ///
    /// Pixels are drawn without replacement; when fewer valid (finite) pixels
    /// exist than requested, the draw falls back to sampling with replacement.
    /// A grid without any valid pixel yields no samples.
    pub fn extract<R: Rng + ?Sized>(
        &self,
        dryness: &Grid,
        fire: &FireMask,
        timestamp: NaiveDateTime,
        rng: &mut R,
    ) -> Result<Vec<TrainingSample>> {
        self.draw(dryness, fire, timestamp, rng, true)
    }

    /// Like [`extract`](Self::extract) but never repeats a pixel: returns
    /// `min(samples_per_epoch, valid pixels)` samples.
    pub fn extract_capped<R: Rng + ?Sized>(
        &self,
        dryness: &Grid,
        fire: &FireMask,
        timestamp: NaiveDateTime,
        rng: &mut R,
    ) -> Result<Vec<TrainingSample>> {
        self.draw(dryness, fire, timestamp, rng, false)
    }

    fn draw<R: Rng + ?Sized>(
        &self,
        dryness: &Grid,
        fire: &FireMask,
        timestamp: NaiveDateTime,
        rng: &mut R,
        fill_with_replacement: bool,
    ) -> Result<Vec<TrainingSample>> {
        dryness.ensure_same_shape(fire)?;

        let valid: Vec<usize> = dryness
            .data
            .iter()
            .enumerate()
            .filter(|(_, v)| v.is_finite())
            .map(|(i, _)| i)
            .collect();
        if valid.is_empty() {
            warn!(%timestamp, "no valid dryness pixels to sample");
            return Ok(Vec::new());
        }

        let n = self.samples_per_epoch;
        let picks: Vec<usize> = if valid.len() >= n {
            index::sample(rng, valid.len(), n).into_iter().map(|i| valid[i]).collect()
        } else if fill_with_replacement {
            debug!(valid = valid.len(), requested = n, "sampling with replacement");
            (0..n).map(|_| valid[rng.gen_range(0..valid.len())]).collect()
        } else {
            index::sample(rng, valid.len(), valid.len()).into_iter().map(|i| valid[i]).collect()
        };

        Ok(picks
            .into_iter()
            .map(|i| TrainingSample {
                timestamp,
                dryness: dryness.data[i].clamp(0.0, 1.0),
                fire_occurred: u8::from(fire.data[i] != 0),
            })
            .collect())
    }
}

/// Append-only CSV table of training samples.
#[derive(Debug, Clone)]
pub struct HistoricalTable {
    path: PathBuf,
}

impl HistoricalTable {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `samples` after the existing rows and atomically replace the file.
    /// Returns the number of rows appended.
    pub fn append(&self, samples: &[TrainingSample]) -> Result<usize> {
        if samples.is_empty() {
            return Ok(0);
        }
        let mut buf = match fs::read(&self.path) {
            Ok(bytes) => bytes,
            Err(e) if e.kind() == io::ErrorKind::NotFound => Vec::new(),
            Err(e) => return Err(PeatError::io(&self.path, e)),
        };
        let needs_header = buf.is_empty();
        if !buf.is_empty() && !buf.ends_with(b"\n") {
            buf.push(b'\n');
        }

        {
            let mut writer = csv::WriterBuilder::new().has_headers(needs_header).from_writer(&mut buf);
            for s in samples {
                writer.serialize(s).map_err(|e| PeatError::corrupt(&self.path, e))?;
            }
            writer.flush().map_err(|e| PeatError::io(&self.path, e))?;
        }

        write_atomic(&self.path, &buf)?;
        debug!(path = ?self.path, rows = samples.len(), "historical table appended");
        Ok(samples.len())
    }

    /// All rows in insertion order. A table that does not exist yet is empty.
    pub fn read_all(&self) -> Result<Vec<TrainingSample>> {
        let file = match fs::File::open(&self.path) {
            Ok(f) => f,
            Err(e) if e.kind() == io::ErrorKind::NotFound => return Ok(Vec::new()),
            Err(e) => return Err(PeatError::io(&self.path, e)),
        };
        csv::Reader::from_reader(file)
            .deserialize()
            .collect::<std::result::Result<Vec<TrainingSample>, _>>()
            .map_err(|e| PeatError::corrupt(&self.path, e))
    }

    pub fn len(&self) -> Result<usize> {
        Ok(self.read_all()?.len())
    }

    pub fn is_empty(&self) -> Result<bool> {
        Ok(self.len()? == 0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::grid::GeoRef;
    use crate::synth::seeded_rng;
    use chrono::NaiveDate;

    fn ts(day: u32) -> NaiveDateTime {
        NaiveDate::from_ymd_opt(2020, 1, day).unwrap().and_hms_opt(0, 0, 0).unwrap()
    }

    fn grids(w: usize, h: usize) -> (Grid, FireMask) {
        let dry = Grid::from_vec(w, h, GeoRef::default(), (0..w * h).map(|i| i as f32 / (w * h) as f32).collect())
            .unwrap();
        let fire = dry.map(|d| u8::from(d > 0.5));
        (dry, fire)
    }

    #[test]
    fn draws_requested_count_without_repeats() {
        let (dry, fire) = grids(40, 40);
        let ex = SampleExtractor::new(&SamplingParams { samples_per_epoch: 500 });
        let out = ex.extract(&dry, &fire, ts(1), &mut seeded_rng(Some(1))).unwrap();
        assert_eq!(out.len(), 500);
        let mut seen: Vec<u32> = out.iter().map(|s| s.dryness.to_bits()).collect();
        seen.sort_unstable();
        seen.dedup();
        assert_eq!(seen.len(), 500, "pixels must not repeat when the grid is large enough");
        for s in &out {
            assert_eq!(s.timestamp, ts(1));
            assert_eq!(s.fire_occurred, u8::from(s.dryness > 0.5));
        }
    }

    #[test]
    fn small_grid_falls_back_to_replacement() {
        let (dry, fire) = grids(5, 4);
        let ex = SampleExtractor::new(&SamplingParams { samples_per_epoch: 450 });
        let out = ex.extract(&dry, &fire, ts(2), &mut seeded_rng(Some(2))).unwrap();
        assert_eq!(out.len(), 450);
        let capped = ex.extract_capped(&dry, &fire, ts(2), &mut seeded_rng(Some(2))).unwrap();
        assert_eq!(capped.len(), 20);
    }

    #[test]
    fn nan_pixels_are_never_sampled() {
        let (mut dry, fire) = grids(10, 10);
        for i in 0..50 {
            dry.data[i] = f32::NAN;
        }
        let ex = SampleExtractor::new(&SamplingParams { samples_per_epoch: 50 });
        let out = ex.extract(&dry, &fire, ts(3), &mut seeded_rng(Some(3))).unwrap();
        assert!(out.iter().all(|s| s.dryness.is_finite()));
    }

    #[test]
    fn mismatched_mask_is_rejected() {
        let (dry, _) = grids(10, 10);
        let (_, fire) = grids(5, 20);
        let ex = SampleExtractor::new(&SamplingParams::default());
        let err = ex.extract(&dry, &fire, ts(4), &mut seeded_rng(Some(4))).unwrap_err();
        assert!(matches!(err, PeatError::ShapeMismatch { .. }));
    }

    #[test]
    fn table_grows_by_appended_rows_with_single_header() {
        let dir = tempfile::tempdir().unwrap();
        let table = HistoricalTable::new(dir.path().join("historical").join("training_data.csv"));
        assert_eq!(table.len().unwrap(), 0);

        let (dry, fire) = grids(30, 30);
        let ex = SampleExtractor::new(&SamplingParams { samples_per_epoch: 400 });
        let first = ex.extract(&dry, &fire, ts(1), &mut seeded_rng(Some(1))).unwrap();
        let second = ex.extract(&dry, &fire, ts(2), &mut seeded_rng(Some(2))).unwrap();

        assert_eq!(table.append(&first).unwrap(), 400);
        assert_eq!(table.len().unwrap(), 400);
        assert_eq!(table.append(&second).unwrap(), 400);

        let rows = table.read_all().unwrap();
        assert_eq!(rows.len(), 800);
        assert_eq!(&rows[..400], &first[..]);
        assert_eq!(&rows[400..], &second[..]);

        let text = fs::read_to_string(table.path()).unwrap();
        assert_eq!(text.matches("timestamp,dryness,fire_occurred").count(), 1);
        assert!(text.starts_with("timestamp,dryness,fire_occurred\n"));
    }

    #[test]
    fn corrupt_table_is_reported() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("t.csv");
        fs::write(&path, "timestamp,dryness,fire_occurred\nnot-a-date,abc,2\n").unwrap();
        let err = HistoricalTable::new(path).read_all().unwrap_err();
        assert!(matches!(err, PeatError::CorruptArtifact { .. }));
    }
}
