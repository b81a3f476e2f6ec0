//! Hydrological memory: cumulative moisture deficit driven by line-of-sight displacement.
//!
//! Per epoch and pixel:
//!   delta_cm  = los · 100
//!   drying    = max(−delta_cm, 0)                    subsidence dries the peat
//!   rewetting = max(delta_cm, 0) · recovery_factor   uplift recovers, more slowly
//!   deficit   = clamp(deficit + w_d·drying/ref − w_r·rewetting/ref, 0, max_deficit)
//!   dryness   = clamp(deficit / max_deficit, 0, 1)
//!
//! The state is an explicit value: callers pass the previous state in and get
//! the next one back. Rewetting must stay strictly weaker than drying;
//! parameters that would make the update symmetric are rejected.

use serde::{Deserialize, Serialize};

use crate::error::{PeatError, Result};
use crate::grid::{Grid, GridSpec};

/// Weighting of the drying and rewetting terms.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum AccumulationRule {
    /// `deficit + drying − rewetting`.
    #[default]
    Direct,
    /// `deficit + drying_weight·drying/reference_cm − rewetting_weight·rewetting/reference_cm`.
    Weighted { drying_weight: f64, rewetting_weight: f64, reference_cm: f64 },
}

impl AccumulationRule {
    /// Preset of the live dryness calculator: 0.7 and 0.3 per 5 cm of motion.
    pub fn weighted() -> Self {
        AccumulationRule::Weighted { drying_weight: 0.7, rewetting_weight: 0.3, reference_cm: 5.0 }
    }

    /// Per-centimetre coefficients `(drying, rewetting)`.
    fn coefficients(&self) -> (f64, f64) {
        match *self {
            AccumulationRule::Direct => (1.0, 1.0),
            AccumulationRule::Weighted { drying_weight, rewetting_weight, reference_cm } => {
                (drying_weight / reference_cm, rewetting_weight / reference_cm)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AccumulatorParams {
    /// Saturation ceiling of the deficit (cm of subsidence-equivalent).
    pub max_deficit_cm: f64,
    /// Fraction of uplift that counts as rewetting, in [0, 1).
    pub recovery_factor: f64,
    pub rule: AccumulationRule,
}

impl Default for AccumulatorParams {
    fn default() -> Self {
        Self { max_deficit_cm: 10.0, recovery_factor: 0.3, rule: AccumulationRule::Direct }
    }
}

impl AccumulatorParams {
    pub fn validate(&self) -> Result<()> {
        if !(self.max_deficit_cm.is_finite() && self.max_deficit_cm > 0.0) {
            return Err(PeatError::InvalidParameter(format!(
                "max_deficit_cm must be positive, got {}",
                self.max_deficit_cm
            )));
        }
        if !(0.0..1.0).contains(&self.recovery_factor) {
            return Err(PeatError::InvalidParameter(format!(
                "recovery_factor must lie in [0, 1), got {}",
                self.recovery_factor
            )));
        }
        if let AccumulationRule::Weighted { drying_weight, rewetting_weight, reference_cm } = self.rule {
            if !(reference_cm > 0.0 && drying_weight > 0.0 && rewetting_weight >= 0.0) {
                return Err(PeatError::InvalidParameter(
                    "weighted rule needs positive reference_cm and drying_weight, non-negative rewetting_weight".into(),
                ));
            }
        }
        let (dry, rewet) = self.rule.coefficients();
        if rewet * self.recovery_factor >= dry {
            return Err(PeatError::InvalidParameter(
                "rewetting must be strictly weaker than drying".into(),
            ));
        }
        Ok(())
    }
}

/// Cumulative moisture deficit, cm, every cell in `[0, max_deficit_cm]`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DrynessState {
    pub cumulative_deficit: Grid,
}

impl DrynessState {
    /// Cold-start state: no deficit anywhere.
    pub fn initial(spec: &GridSpec) -> Self {
        Self { cumulative_deficit: spec.zeros() }
    }

    /// Normalised dryness index in `[0, 1]`.
    pub fn dryness_index(&self, max_deficit_cm: f64) -> Grid {
        self.cumulative_deficit
            .map(|d| (d as f64 / max_deficit_cm).clamp(0.0, 1.0) as f32)
    }
}

/// Output of one accumulation step.
#[derive(Debug, Clone)]
pub struct DrynessUpdate {
    pub state: DrynessState,
    pub dryness_index: Grid,
}

impl DrynessUpdate {
    pub fn mean_dryness(&self) -> f32 {
        self.dryness_index.mean()
    }
}

#[derive(Debug, Clone)]
pub struct DrynessAccumulator {
    params: AccumulatorParams,
    drying_coef: f64,
    rewetting_coef: f64,
}

impl DrynessAccumulator {
    pub fn new(params: AccumulatorParams) -> Result<Self> {
        params.validate()?;
        let (drying_coef, rewetting_coef) = params.rule.coefficients();
        Ok(Self { params, drying_coef, rewetting_coef })
    }

    /// Advance `state` by one epoch of line-of-sight displacement (metres).
    ///
    /// Fails with `ShapeMismatch` if `los` and the state cover different domains.
    /// Non-finite displacement leaves that pixel's deficit unchanged.
    pub fn update(&self, state: &DrynessState, los: &Grid) -> Result<DrynessUpdate> {
        state.cumulative_deficit.ensure_same_shape(los)?;
        let max = self.params.max_deficit_cm;

        let data = state
            .cumulative_deficit
            .data
            .iter()
            .zip(los.data.iter())
            .map(|(&deficit, &d)| {
                let deficit = deficit as f64;
                if !d.is_finite() {
                    return deficit.clamp(0.0, max) as f32;
                }
                let delta_cm = d as f64 * 100.0;
                let drying = (-delta_cm).max(0.0);
                let rewetting = delta_cm.max(0.0) * self.params.recovery_factor;
                (deficit + self.drying_coef * drying - self.rewetting_coef * rewetting).clamp(0.0, max) as f32
            })
            .collect();

        let mut cumulative_deficit = state.cumulative_deficit.clone();
        cumulative_deficit.data = data;
        let next = DrynessState { cumulative_deficit };
        let dryness_index = next.dryness_index(max);
        Ok(DrynessUpdate { state: next, dryness_index })
    }
}
