//! Dryness → LOW / MEDIUM / HIGH risk bands.
//!
//! `dryness >= t + medium_band` is HIGH, `dryness >= t` is MEDIUM, anything
//! else LOW. The threshold comes from the trainer's sidecar file; a missing or
//! unusable sidecar falls back to [`DEFAULT_THRESHOLD`].

use std::fmt;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::warn;

use crate::error::{PeatError, Result};
use crate::store;

/// Inclusive range every persisted threshold must lie in.
pub const THRESHOLD_BOUNDS: (f32, f32) = (0.5, 0.85);

pub const DEFAULT_THRESHOLD: f32 = 0.65;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "UPPERCASE")]
pub enum RiskLevel {
    Low,
    Medium,
    High,
}

impl RiskLevel {
    pub fn as_str(self) -> &'static str {
        match self {
            RiskLevel::Low => "LOW",
            RiskLevel::Medium => "MEDIUM",
            RiskLevel::High => "HIGH",
        }
    }

    /// Operator-facing message for this level.
    pub fn advisory(self) -> &'static str {
        match self {
            RiskLevel::High => "ALERT: high fire risk, peat is critically dry",
            RiskLevel::Medium => "CAUTION: elevated fire risk, monitor conditions",
            RiskLevel::Low => "SAFE: fire risk is low",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RiskParams {
    pub default_threshold: f32,
    /// Distance above the threshold where MEDIUM becomes HIGH.
    pub medium_band: f32,
}

impl Default for RiskParams {
    fn default() -> Self {
        Self { default_threshold: DEFAULT_THRESHOLD, medium_band: 0.10 }
    }
}

impl RiskParams {
    pub fn validate(&self) -> Result<()> {
        let (lo, hi) = THRESHOLD_BOUNDS;
        if !(lo..=hi).contains(&self.default_threshold) {
            return Err(PeatError::InvalidParameter(format!(
                "default_threshold {} outside [{lo}, {hi}]",
                self.default_threshold
            )));
        }
        if !(self.medium_band > 0.0) {
            return Err(PeatError::InvalidParameter(format!("medium_band must be positive, got {}", self.medium_band)));
        }
        Ok(())
    }

    /// Pure banding of one dryness value.
    pub fn classify(&self, dryness: f32, threshold: f32) -> RiskLevel {
        if dryness >= threshold + self.medium_band {
            RiskLevel::High
        } else if dryness >= threshold {
            RiskLevel::Medium
        } else {
            RiskLevel::Low
        }
    }

    /// Threshold from the sidecar at `path`, or the default when it is absent or unusable.
    pub fn threshold_or_default(&self, path: &Path) -> f32 {
        match store::load_threshold(path) {
            Ok(t) => t,
            Err(PeatError::MissingInput { .. }) => {
                warn!(path = ?path, default = self.default_threshold, "no risk threshold yet, using default");
                self.default_threshold
            }
            Err(e) => {
                warn!(error = %e, default = self.default_threshold, "risk threshold unusable, using default");
                self.default_threshold
            }
        }
    }
}

/// Classification with the default band width.
pub fn classify(dryness: f32, threshold: f32) -> RiskLevel {
    RiskParams::default().classify(dryness, threshold)
}
