//! Threshold trainer: fits the dryness → fire ensemble and derives the risk threshold.
//!
//! The held-out accuracy of the ensemble, clipped to [`THRESHOLD_BOUNDS`],
//! becomes the risk threshold. Tables below `min_rows` are rejected with
//! `InsufficientTrainingData` and leave every persisted artifact untouched.

pub mod forest;
pub mod tree;

use std::path::Path;

use rand::seq::SliceRandom;
use rand::SeedableRng;
use rand::rngs::StdRng;
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{PeatError, Result};
use crate::risk::THRESHOLD_BOUNDS;
use crate::samples::{HistoricalTable, TrainingSample};
use crate::store;

use self::forest::{ForestParams, RandomForest};

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TrainerParams {
    pub min_rows: usize,
    /// Fraction of rows held out for scoring.
    pub test_fraction: f64,
    pub split_seed: u64,
    pub forest: ForestParams,
}

impl Default for TrainerParams {
    fn default() -> Self {
        Self { min_rows: 200, test_fraction: 0.2, split_seed: 42, forest: ForestParams::default() }
    }
}

impl TrainerParams {
    pub fn validate(&self) -> Result<()> {
        if self.min_rows < 2 {
            return Err(PeatError::InvalidParameter(format!("min_rows must be at least 2, got {}", self.min_rows)));
        }
        if !(self.test_fraction > 0.0 && self.test_fraction < 1.0) {
            return Err(PeatError::InvalidParameter(format!(
                "test_fraction must lie in (0, 1), got {}",
                self.test_fraction
            )));
        }
        if self.forest.n_estimators == 0 || self.forest.max_depth == 0 {
            return Err(PeatError::InvalidParameter("forest needs at least one tree of depth >= 1".into()));
        }
        Ok(())
    }
}

/// Held-out accuracy clipped into the calibrated threshold range.
pub fn threshold_from_accuracy(accuracy: f64) -> f32 {
    let (lo, hi) = THRESHOLD_BOUNDS;
    (accuracy as f32).clamp(lo, hi)
}

#[derive(Debug, Clone)]
pub struct TrainedModel {
    pub forest: RandomForest,
    pub accuracy: f64,
    pub threshold: f32,
    pub train_rows: usize,
    pub test_rows: usize,
}

#[derive(Debug, Clone)]
pub struct ThresholdTrainer {
    params: TrainerParams,
}

impl ThresholdTrainer {
    pub fn new(params: TrainerParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Fit on `rows` and score on a seeded hold-out split.
    pub fn train(&self, rows: &[TrainingSample]) -> Result<TrainedModel> {
        let rows: Vec<&TrainingSample> = rows.iter().filter(|s| s.dryness.is_finite()).collect();
        if rows.len() < self.params.min_rows {
            return Err(PeatError::InsufficientTrainingData { rows: rows.len(), required: self.params.min_rows });
        }

        let mut order: Vec<usize> = (0..rows.len()).collect();
        order.shuffle(&mut StdRng::seed_from_u64(self.params.split_seed));
        let n_test = ((rows.len() as f64 * self.params.test_fraction).ceil() as usize).clamp(1, rows.len() - 1);
        let (test_idx, train_idx) = order.split_at(n_test);

        let column = |idx: &[usize]| -> (Vec<f32>, Vec<u8>) {
            idx.iter().map(|&i| (rows[i].dryness, u8::from(rows[i].fire_occurred != 0))).unzip()
        };
        let (x_train, y_train) = column(train_idx);
        let (x_test, y_test) = column(test_idx);

        let forest = RandomForest::fit(&x_train, &y_train, &self.params.forest);
        let accuracy = forest.accuracy(&x_test, &y_test);
        let threshold = threshold_from_accuracy(accuracy);
        info!(
            train_rows = x_train.len(),
            test_rows = x_test.len(),
            accuracy,
            threshold,
            "threshold trainer fitted"
        );
        Ok(TrainedModel { forest, accuracy, threshold, train_rows: x_train.len(), test_rows: x_test.len() })
    }

    /// Retrain from the historical table and persist model plus threshold.
    ///
    /// Returns `Ok(None)` when the table is still too small; nothing is written then.
    pub fn retrain(&self, table: &HistoricalTable, model_path: &Path, threshold_path: &Path) -> Result<Option<TrainedModel>> {
        let rows = table.read_all()?;
        match self.train(&rows) {
            Ok(model) => {
                store::save_model(model_path, threshold_path, &model.forest, model.threshold)?;
                info!(path = ?threshold_path, threshold = model.threshold, "risk threshold updated");
                Ok(Some(model))
            }
            Err(PeatError::InsufficientTrainingData { rows, required }) => {
                info!(rows, required, "not enough training rows yet, keeping previous threshold");
                Ok(None)
            }
            Err(e) => Err(e),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::NaiveDate;
    use std::fs;

    fn rows(n: usize) -> Vec<TrainingSample> {
        let t = NaiveDate::from_ymd_opt(2021, 6, 1).unwrap().and_hms_opt(0, 0, 0).unwrap();
        (0..n)
            .map(|i| {
                let dryness = i as f32 / n as f32;
                TrainingSample { timestamp: t, dryness, fire_occurred: u8::from(dryness > 0.7) }
            })
            .collect()
    }

    fn quick() -> ThresholdTrainer {
        let forest = ForestParams { n_estimators: 15, ..ForestParams::default() };
        ThresholdTrainer::new(TrainerParams { forest, ..TrainerParams::default() }).unwrap()
    }

    #[test]
    fn accuracy_is_clipped_into_range() {
        assert_eq!(threshold_from_accuracy(0.97), 0.85);
        assert_eq!(threshold_from_accuracy(0.31), 0.5);
        assert!((threshold_from_accuracy(0.72) - 0.72).abs() < 1e-6);
    }

    #[test]
    fn small_table_is_rejected() {
        let err = quick().train(&rows(150)).unwrap_err();
        assert!(matches!(err, PeatError::InsufficientTrainingData { rows: 150, required: 200 }));
    }

    #[test]
    fn split_follows_test_fraction() {
        let model = quick().train(&rows(250)).unwrap();
        assert_eq!(model.test_rows, 50);
        assert_eq!(model.train_rows, 200);
        assert!((0.5..=0.85).contains(&model.threshold));
    }

    #[test]
    fn clean_signal_hits_upper_bound() {
        let model = quick().train(&rows(1000)).unwrap();
        assert!(model.accuracy > 0.9);
        assert_eq!(model.threshold, 0.85);
    }

    #[test]
    fn retrain_is_noop_below_minimum() {
        let dir = tempfile::tempdir().unwrap();
        let table = HistoricalTable::new(dir.path().join("training_data.csv"));
        table.append(&rows(150)).unwrap();
        let model_path = dir.path().join("fire_risk_model.bin");
        let threshold_path = dir.path().join("fire_threshold.json");
        fs::write(&threshold_path, "{\"risk_threshold\": 0.6}").unwrap();

        assert!(quick().retrain(&table, &model_path, &threshold_path).unwrap().is_none());
        assert!(!model_path.exists());
        assert_eq!(store::load_threshold(&threshold_path).unwrap(), 0.6);
    }

    #[test]
    fn retrain_persists_model_and_threshold() {
        let dir = tempfile::tempdir().unwrap();
        let table = HistoricalTable::new(dir.path().join("training_data.csv"));
        table.append(&rows(400)).unwrap();
        let model_path = dir.path().join("models").join("fire_risk_model.bin");
        let threshold_path = dir.path().join("models").join("fire_threshold.json");

        let model = quick().retrain(&table, &model_path, &threshold_path).unwrap().unwrap();
        assert_eq!(store::load_threshold(&threshold_path).unwrap(), model.threshold);
        assert_eq!(store::load_model(&model_path).unwrap(), model.forest);
    }

    #[test]
    fn invalid_params_rejected() {
        let p = TrainerParams { test_fraction: 1.0, ..TrainerParams::default() };
        assert!(ThresholdTrainer::new(p).is_err());
    }
}
