//! Bagged ensemble of depth-bounded trees with balanced class weights.
//!
//! Each tree sees a bootstrap resample of the rows; its seed is derived from
//! the forest seed and the tree index, so a fixed seed reproduces the forest
//! whether trees are fitted sequentially or with the `threading` feature.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};

use super::tree::{DecisionTree, TreeParams};
use crate::synth::derive_seed;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ForestParams {
    pub n_estimators: usize,
    pub max_depth: usize,
    pub min_samples_split: usize,
    /// Weight each class by `n / (2 · n_class)`.
    pub class_balanced: bool,
    pub seed: u64,
}

impl Default for ForestParams {
    fn default() -> Self {
        Self { n_estimators: 100, max_depth: 4, min_samples_split: 2, class_balanced: true, seed: 0 }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RandomForest {
    trees: Vec<DecisionTree>,
}

/// Per-class weights `(w_no_fire, w_fire)`.
fn class_weights(y: &[u8], balanced: bool) -> (f64, f64) {
    if !balanced {
        return (1.0, 1.0);
    }
    let n = y.len() as f64;
    let fires = y.iter().filter(|&&v| v != 0).count() as f64;
    let quiet = n - fires;
    let w = |count: f64| if count > 0.0 { n / (2.0 * count) } else { 0.0 };
    (w(quiet), w(fires))
}

fn fit_one(x: &[f32], y: &[u8], class_w: (f64, f64), params: &ForestParams, index: usize) -> DecisionTree {
    let n = x.len();
    let mut rng = StdRng::seed_from_u64(derive_seed(params.seed, index as u64));
    let mut counts = vec![0u32; n];
    for _ in 0..n {
        counts[rng.gen_range(0..n)] += 1;
    }
    let weights: Vec<f64> = counts
        .iter()
        .zip(y)
        .map(|(&c, &label)| c as f64 * if label == 0 { class_w.0 } else { class_w.1 })
        .collect();
    let tree_params = TreeParams { max_depth: params.max_depth, min_samples_split: params.min_samples_split };
    DecisionTree::fit(x, y, &weights, tree_params)
}

impl RandomForest {
    /// Fit on dryness values `x` and fire labels `y` (0/1). `x` must be non-empty.
    pub fn fit(x: &[f32], y: &[u8], params: &ForestParams) -> Self {
        debug_assert_eq!(x.len(), y.len());
        let class_w = class_weights(y, params.class_balanced);
        let n_trees = params.n_estimators.max(1);

        #[cfg(feature = "threading")]
        let trees = {
            use rayon::prelude::*;
            (0..n_trees).into_par_iter().map(|i| fit_one(x, y, class_w, params, i)).collect()
        };
        #[cfg(not(feature = "threading"))]
        let trees = (0..n_trees).map(|i| fit_one(x, y, class_w, params, i)).collect();

        Self { trees }
    }

    pub fn n_trees(&self) -> usize {
        self.trees.len()
    }

    /// Mean of the per-tree fire probabilities.
    pub fn predict_proba(&self, x: f32) -> f32 {
        if self.trees.is_empty() {
            return 0.0;
        }
        let sum: f32 = self.trees.iter().map(|t| t.predict_proba(x)).sum();
        sum / self.trees.len() as f32
    }

    pub fn predict(&self, x: f32) -> u8 {
        u8::from(self.predict_proba(x) > 0.5)
    }

    /// Fraction of rows whose predicted label matches `y`.
    pub fn accuracy(&self, x: &[f32], y: &[u8]) -> f64 {
        if x.is_empty() {
            return 0.0;
        }
        let hits = x.iter().zip(y).filter(|&(&xi, &yi)| self.predict(xi) == u8::from(yi != 0)).count();
        hits as f64 / x.len() as f64
    }
}
