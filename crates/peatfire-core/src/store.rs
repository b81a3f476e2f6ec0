//! Persistence glue: state blobs, grids, classifier artifacts and the dryness log.
//!
//! Every overwrite goes through a sibling `*.tmp` file followed by a rename,
//! so a crash mid-write leaves the previous artifact intact.

use std::fs::{self, File, OpenOptions};
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::NaiveDateTime;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::classifier::forest::RandomForest;
use crate::displacement::DisplacementState;
use crate::dryness::DrynessState;
use crate::error::{PeatError, Result};
use crate::grid::{Grid, GridSpec};
use crate::risk::THRESHOLD_BOUNDS;

fn tmp_path(path: &Path) -> PathBuf {
    let mut name = path.file_name().map(|n| n.to_os_string()).unwrap_or_default();
    name.push(".tmp");
    path.with_file_name(name)
}

fn ensure_parent(path: &Path) -> Result<()> {
    match path.parent() {
        Some(dir) if !dir.as_os_str().is_empty() => {
            fs::create_dir_all(dir).map_err(|e| PeatError::io(dir, e))
        }
        _ => Ok(()),
    }
}

/// Write `bytes` next to `path` and return the staged file, leaving `path` untouched.
fn stage(path: &Path, bytes: &[u8]) -> Result<PathBuf> {
    ensure_parent(path)?;
    let tmp = tmp_path(path);
    let mut file = File::create(&tmp).map_err(|e| PeatError::io(&tmp, e))?;
    file.write_all(bytes).map_err(|e| PeatError::io(&tmp, e))?;
    file.sync_all().map_err(|e| PeatError::io(&tmp, e))?;
    Ok(tmp)
}

fn commit(staged: &Path, path: &Path) -> Result<()> {
    fs::rename(staged, path).map_err(|e| PeatError::io(path, e))
}

/// Replace `path` with `bytes` via write-then-rename.
pub fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let staged = stage(path, bytes)?;
    commit(&staged, path)
}

/// Read a file, mapping "not found" to `MissingInput`.
fn read_existing(path: &Path) -> Result<Vec<u8>> {
    fs::read(path).map_err(|e| match e.kind() {
        io::ErrorKind::NotFound => PeatError::MissingInput { path: path.to_path_buf() },
        _ => PeatError::io(path, e),
    })
}

// ── State blobs ──────────────────────────────────────────────────────────────

pub fn save_blob<T: Serialize>(path: &Path, value: &T) -> Result<()> {
    let bytes = bincode::serialize(value).map_err(|e| PeatError::corrupt(path, e))?;
    write_atomic(path, &bytes)
}

/// `Ok(None)` when no blob has been persisted yet.
pub fn load_blob<T: DeserializeOwned>(path: &Path) -> Result<Option<T>> {
    match read_existing(path) {
        Ok(bytes) => bincode::deserialize(&bytes).map(Some).map_err(|e| PeatError::corrupt(path, e)),
        Err(PeatError::MissingInput { .. }) => Ok(None),
        Err(e) => Err(e),
    }
}

/// Restore the dryness state, or start from zero deficit on a cold start.
pub fn load_dryness_state(path: &Path, spec: &GridSpec) -> Result<DrynessState> {
    match load_blob::<DrynessState>(path)? {
        Some(state) => {
            spec.check(&state.cumulative_deficit)?;
            Ok(state)
        }
        None => {
            info!(path = ?path, "no dryness state persisted, starting from zero deficit");
            Ok(DrynessState::initial(spec))
        }
    }
}

/// Restore the displacement state, or start from zero displacement at epoch 0.
pub fn load_displacement_state(path: &Path, spec: &GridSpec) -> Result<DisplacementState> {
    match load_blob::<DisplacementState>(path)? {
        Some(state) => {
            spec.check(&state.previous_vertical)?;
            Ok(state)
        }
        None => {
            info!(path = ?path, "no displacement state persisted, starting at epoch 0");
            Ok(DisplacementState::initial(spec))
        }
    }
}

// ── Grids ────────────────────────────────────────────────────────────────────

pub fn write_grid<T: Serialize>(path: &Path, grid: &Grid<T>) -> Result<()> {
    let json = serde_json::to_vec(grid).map_err(|e| PeatError::corrupt(path, e))?;
    write_atomic(path, &json)
}

pub fn read_grid<T: DeserializeOwned + Copy>(path: &Path) -> Result<Grid<T>> {
    let bytes = read_existing(path)?;
    let grid: Grid<T> = serde_json::from_slice(&bytes).map_err(|e| PeatError::corrupt(path, e))?;
    if grid.data.len() != grid.width * grid.height {
        return Err(PeatError::corrupt(
            path,
            format!("{} values for a {}x{} grid", grid.data.len(), grid.width, grid.height),
        ));
    }
    Ok(grid)
}

// ── Classifier artifacts ─────────────────────────────────────────────────────

/// JSON sidecar carrying the calibrated risk threshold.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ThresholdFile {
    pub risk_threshold: f32,
}

/// Persist the fitted ensemble and its threshold.
///
/// Both files are staged before either is renamed into place.
pub fn save_model(model_path: &Path, threshold_path: &Path, forest: &RandomForest, threshold: f32) -> Result<()> {
    let model_bytes = bincode::serialize(forest).map_err(|e| PeatError::corrupt(model_path, e))?;
    let sidecar = serde_json::to_vec(&ThresholdFile { risk_threshold: threshold })
        .map_err(|e| PeatError::corrupt(threshold_path, e))?;

    let staged_model = stage(model_path, &model_bytes)?;
    let staged_threshold = stage(threshold_path, &sidecar)?;
    commit(&staged_model, model_path)?;
    commit(&staged_threshold, threshold_path)
}

pub fn load_model(path: &Path) -> Result<RandomForest> {
    let bytes = read_existing(path)?;
    bincode::deserialize(&bytes).map_err(|e| PeatError::corrupt(path, e))
}

/// Read the threshold sidecar.
///
/// `MissingInput` when the file is absent; `CorruptArtifact` when it does not
/// parse, lacks `risk_threshold`, or holds a value outside the calibrated range.
pub fn load_threshold(path: &Path) -> Result<f32> {
    let bytes = read_existing(path)?;
    let file: ThresholdFile = serde_json::from_slice(&bytes).map_err(|e| PeatError::corrupt(path, e))?;
    let t = file.risk_threshold;
    let (lo, hi) = THRESHOLD_BOUNDS;
    if !t.is_finite() || t < lo || t > hi {
        return Err(PeatError::corrupt(path, format!("risk_threshold {t} outside [{lo}, {hi}]")));
    }
    Ok(t)
}

// ── Dryness log ──────────────────────────────────────────────────────────────

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DrynessLogEntry {
    pub timestamp: NaiveDateTime,
    pub dryness: f32,
}

/// True when `path` is absent or empty. Any other metadata failure is an error.
fn needs_header(path: &Path) -> Result<bool> {
    match fs::metadata(path) {
        Ok(m) => Ok(m.len() == 0),
        Err(e) if e.kind() == io::ErrorKind::NotFound => Ok(true),
        Err(e) => Err(PeatError::io(path, e)),
    }
}

/// Append one mean-dryness reading to the log, writing the header on first use.
pub fn append_dryness_log(path: &Path, entry: DrynessLogEntry) -> Result<()> {
    ensure_parent(path)?;
    let fresh = needs_header(path)?;
    let file = OpenOptions::new()
        .create(true)
        .append(true)
        .open(path)
        .map_err(|e| PeatError::io(path, e))?;
    let mut writer = csv::WriterBuilder::new().has_headers(fresh).from_writer(file);
    writer.serialize(entry).map_err(|e| PeatError::corrupt(path, e))?;
    writer.flush().map_err(|e| PeatError::io(path, e))
}
