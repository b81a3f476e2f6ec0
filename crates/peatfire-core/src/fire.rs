//! Probabilistic fire events driven by the dryness index.
//!
//! Two stages: a per-pixel Bernoulli draw against
//! `p = sigmoid(bias + scale · dryness)`, then a Gaussian blur of the binary
//! draw re-thresholded at `cluster_threshold`. The blur merges neighbouring
//! ignitions into contiguous patches and erases isolated single-pixel draws.

use rand::Rng;
use serde::{Deserialize, Serialize};

use crate::error::{PeatError, Result};
use crate::grid::{FireMask, Grid};
use crate::synth::blur::gaussian_blur;
use crate::synth::seeded_rng;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FireParams {
    pub bias: f64,
    pub scale: f64,
    /// Blur radius (pixels) used to cluster raw ignitions.
    pub cluster_sigma: f64,
    /// Smoothed-ignition level above which a pixel is burning.
    pub cluster_threshold: f64,
}

impl Default for FireParams {
    fn default() -> Self {
        Self { bias: -1.0, scale: 3.0, cluster_sigma: 2.5, cluster_threshold: 0.35 }
    }
}

impl FireParams {
    /// Calibration used for historical backfills.
    pub fn historical() -> Self {
        Self { bias: -1.1, scale: 3.4, cluster_sigma: 2.0, ..Self::default() }
    }

    pub fn validate(&self) -> Result<()> {
        if self.scale <= 0.0 {
            return Err(PeatError::InvalidParameter(format!("fire scale must be positive, got {}", self.scale)));
        }
        if !(self.cluster_threshold > 0.0 && self.cluster_threshold < 1.0) {
            return Err(PeatError::InvalidParameter(format!(
                "cluster_threshold must lie in (0, 1), got {}",
                self.cluster_threshold
            )));
        }
        Ok(())
    }
}

#[inline]
fn logistic(x: f64) -> f64 {
    1.0 / (1.0 + (-x).exp())
}

#[derive(Debug, Clone)]
pub struct FireSimulator {
    params: FireParams,
}

impl FireSimulator {
    pub fn new(params: FireParams) -> Result<Self> {
        params.validate()?;
        Ok(Self { params })
    }

    /// Per-pixel ignition probability. Non-finite dryness maps to zero.
    pub fn ignition_probability(&self, dryness_index: &Grid) -> Grid {
        let FireParams { bias, scale, .. } = self.params;
        dryness_index.map(|d| {
            if d.is_finite() {
                logistic(bias + scale * d as f64) as f32
            } else {
                0.0
            }
        })
    }

    /// Draw ignitions from `probability` and cluster them into burn patches.
    ///
    /// `seed = None` is non-reproducible.
    pub fn cluster(&self, probability: &Grid, seed: Option<u64>) -> FireMask {
        let mut rng = seeded_rng(seed);
        let raw: Vec<f64> = probability
            .data
            .iter()
            .map(|&p| if rng.gen::<f64>() < p as f64 { 1.0 } else { 0.0 })
            .collect();
        let smooth = gaussian_blur(&raw, probability.width, probability.height, self.params.cluster_sigma);
        let threshold = self.params.cluster_threshold;
        Grid {
            data: smooth.into_iter().map(|v| u8::from(v > threshold)).collect(),
            width: probability.width,
            height: probability.height,
            georef: probability.georef.clone(),
        }
    }

    /// Full simulation: dryness index → ignition probability → clustered mask.
    pub fn simulate(&self, dryness_index: &Grid, seed: Option<u64>) -> FireMask {
        let probability = self.ignition_probability(dryness_index);
        self.cluster(&probability, seed)
    }
}
