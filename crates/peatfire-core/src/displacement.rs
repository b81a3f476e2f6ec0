//! Synthetic ground-displacement generator.
//!
//! Each epoch:
//!   vertical = φ · prior_vertical + innovation + ramp + seasonal + trend + phase_bias + shock
//!   line_of_sight = vertical · cos(incidence)
//!
//! Values are metres and are never clamped here: only the integrated dryness
//! deficit is bounded. The previous vertical grid and the next epoch index
//! are the generator's persisted state. With a seed, every epoch's random
//! draws come from `(seed, epoch)`, so a fresh process resuming at epoch `n`
//! produces the same frame as a long-running one.

use chrono::{Datelike, Duration, NaiveDate};
use rand::rngs::StdRng;
use rand::Rng;
use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::error::{PeatError, Result};
use crate::grid::{Grid, GridSpec};
use crate::synth::{derive_seed, gaussian_field, planar_ramp, seasonal_component, seeded_rng};

/// Hydrological phase an epoch falls in.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Phase {
    Dry,
    Wet,
    Transition,
}

/// Whole-grid extreme event applied to an epoch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum Shock {
    Calm,
    Drought,
    Storm,
    /// Drought and storm in the same epoch (only possible when shocks are not phase-gated).
    Compound,
}

/// Climatological calendar: month-based wet/dry bias plus a multi-year ENSO oscillation.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct MonsoonSchedule {
    pub start: NaiveDate,
    pub days_per_epoch: u32,
    /// Months (1–12) of the recharge season.
    pub wet_months: Vec<u32>,
    /// Months (1–12) of peak drying.
    pub dry_months: Vec<u32>,
    pub wet_bias: f64,
    pub dry_bias: f64,
    pub enso_amplitude: f64,
    pub enso_period_epochs: f64,
}

impl Default for MonsoonSchedule {
    fn default() -> Self {
        Self {
            start: NaiveDate::from_ymd_opt(2020, 1, 1).unwrap_or_default(),
            days_per_epoch: 10,
            wet_months: vec![11, 12, 1, 2],
            dry_months: vec![6, 7, 8, 9],
            wet_bias: 0.015,
            dry_bias: -0.025,
            enso_amplitude: 0.02,
            enso_period_epochs: 90.0,
        }
    }
}

impl MonsoonSchedule {
    /// Calendar date of `epoch`.
    pub fn date_of(&self, epoch: u64) -> NaiveDate {
        self.start + Duration::days(epoch as i64 * self.days_per_epoch as i64)
    }
}

/// How the per-epoch drying/wetting bias is scheduled.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum PhaseSchedule {
    /// Fixed cycle: `dry_steps` drying epochs followed by `wet_steps` rewetting epochs.
    Cycle { dry_steps: u32, wet_steps: u32, dry_bias: f64, wet_bias: f64 },
    Monsoon(MonsoonSchedule),
}

impl Default for PhaseSchedule {
    fn default() -> Self {
        PhaseSchedule::Cycle { dry_steps: 10, wet_steps: 5, dry_bias: -0.012, wet_bias: 0.008 }
    }
}

impl PhaseSchedule {
    /// Phase and bias (metres of vertical displacement) for `epoch`.
    pub fn phase_at(&self, epoch: u64) -> (Phase, f64) {
        match self {
            PhaseSchedule::Cycle { dry_steps, wet_steps, dry_bias, wet_bias } => {
                let cycle = (*dry_steps + *wet_steps) as u64;
                if cycle == 0 {
                    return (Phase::Transition, 0.0);
                }
                if epoch % cycle < *dry_steps as u64 {
                    (Phase::Dry, *dry_bias)
                } else {
                    (Phase::Wet, *wet_bias)
                }
            }
            PhaseSchedule::Monsoon(m) => {
                let month = m.date_of(epoch).month();
                let (phase, seasonal) = if m.wet_months.contains(&month) {
                    (Phase::Wet, m.wet_bias)
                } else if m.dry_months.contains(&month) {
                    (Phase::Dry, m.dry_bias)
                } else {
                    (Phase::Transition, 0.0)
                };
                let enso = if m.enso_period_epochs > 0.0 {
                    m.enso_amplitude
                        * (std::f64::consts::TAU * epoch as f64 / m.enso_period_epochs).sin()
                } else {
                    0.0
                };
                (phase, seasonal + enso)
            }
        }
    }
}

/// Low-probability whole-grid extremes.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ShockParams {
    pub drought_probability: f64,
    /// Added to every pixel on a drought (negative = subsidence).
    pub drought_magnitude: f64,
    pub storm_probability: f64,
    /// Added to every pixel on a storm (positive = uplift).
    pub storm_magnitude: f64,
    /// When set, droughts only strike in `Dry` epochs and storms only in `Wet` epochs.
    pub phase_gated: bool,
}

impl Default for ShockParams {
    fn default() -> Self {
        Self {
            drought_probability: 0.12,
            drought_magnitude: -0.03,
            storm_probability: 0.08,
            storm_magnitude: 0.03,
            phase_gated: true,
        }
    }
}

impl ShockParams {
    fn roll(&self, phase: Phase, rng: &mut StdRng) -> (Shock, f64) {
        if self.phase_gated {
            if phase == Phase::Dry && rng.gen::<f64>() < self.drought_probability {
                (Shock::Drought, self.drought_magnitude)
            } else if phase == Phase::Wet && rng.gen::<f64>() < self.storm_probability {
                (Shock::Storm, self.storm_magnitude)
            } else {
                (Shock::Calm, 0.0)
            }
        } else {
            let drought = rng.gen::<f64>() < self.drought_probability;
            let storm = rng.gen::<f64>() < self.storm_probability;
            match (drought, storm) {
                (true, true) => (Shock::Compound, self.drought_magnitude + self.storm_magnitude),
                (true, false) => (Shock::Drought, self.drought_magnitude),
                (false, true) => (Shock::Storm, self.storm_magnitude),
                (false, false) => (Shock::Calm, 0.0),
            }
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DisplacementParams {
    /// AR(1) decay φ, strictly inside (0, 1).
    pub ar_phi: f64,
    /// Standard deviation of the spatially correlated innovation (metres).
    pub innovation_std: f64,
    /// Correlation length of the innovation (pixels).
    pub innovation_sigma_px: f64,
    pub ramp_ax: f64,
    pub ramp_ay: f64,
    /// Linear trend, metres per epoch.
    pub trend_per_epoch: f64,
    pub seasonal_amplitude: f64,
    /// Seasonal period in epochs; 0 disables the seasonal term.
    pub seasonal_period: u64,
    pub incidence_deg: f64,
    pub schedule: PhaseSchedule,
    pub shocks: ShockParams,
    /// `None` draws from OS entropy (non-reproducible).
    pub seed: Option<u64>,
}

impl Default for DisplacementParams {
    fn default() -> Self {
        Self {
            ar_phi: 0.93,
            innovation_std: 0.0005,
            innovation_sigma_px: 10.0,
            ramp_ax: 2e-5,
            ramp_ay: -1.5e-5,
            trend_per_epoch: 5e-5,
            seasonal_amplitude: 0.0,
            seasonal_period: 24,
            incidence_deg: 37.0,
            schedule: PhaseSchedule::default(),
            shocks: ShockParams::default(),
            seed: None,
        }
    }
}

impl DisplacementParams {
    /// Calendar-driven preset used for historical backfills.
    pub fn historical() -> Self {
        Self {
            ar_phi: 0.92,
            innovation_std: 0.0025,
            innovation_sigma_px: 10.0,
            ramp_ax: 1.2e-5,
            ramp_ay: -9e-6,
            trend_per_epoch: 1.5e-4,
            seasonal_amplitude: 0.004,
            seasonal_period: 36,
            incidence_deg: 37.0,
            schedule: PhaseSchedule::Monsoon(MonsoonSchedule::default()),
            shocks: ShockParams {
                drought_probability: 0.05,
                drought_magnitude: -0.06,
                storm_probability: 0.03,
                storm_magnitude: 0.08,
                phase_gated: false,
            },
            seed: None,
        }
    }

    pub fn validate(&self) -> Result<()> {
        if !(self.ar_phi > 0.0 && self.ar_phi < 1.0) {
            return Err(PeatError::InvalidParameter(format!(
                "ar_phi must lie in (0, 1), got {}",
                self.ar_phi
            )));
        }
        if !(0.0..90.0).contains(&self.incidence_deg) {
            return Err(PeatError::InvalidParameter(format!(
                "incidence_deg must lie in [0, 90), got {}",
                self.incidence_deg
            )));
        }
        if self.innovation_std < 0.0 || self.innovation_sigma_px < 0.0 {
            return Err(PeatError::InvalidParameter("innovation std and sigma must be non-negative".into()));
        }
        if let PhaseSchedule::Monsoon(m) = &self.schedule {
            if m.days_per_epoch == 0 {
                return Err(PeatError::InvalidParameter("monsoon days_per_epoch must be positive".into()));
            }
        }
        let probs = [self.shocks.drought_probability, self.shocks.storm_probability];
        if probs.iter().any(|p| !(0.0..=1.0).contains(p)) {
            return Err(PeatError::InvalidParameter("shock probabilities must lie in [0, 1]".into()));
        }
        Ok(())
    }
}

/// Persisted autoregressive memory of the generator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DisplacementState {
    pub previous_vertical: Grid,
    /// Epoch index the next `generate_next` call will produce.
    pub next_epoch: u64,
}

impl DisplacementState {
    /// Cold-start state: zero displacement, epoch 0.
    pub fn initial(spec: &GridSpec) -> Self {
        Self { previous_vertical: spec.zeros(), next_epoch: 0 }
    }
}

/// One generated epoch.
#[derive(Debug, Clone)]
pub struct DisplacementFrame {
    pub epoch: u64,
    /// Line-of-sight displacement in metres.
    pub line_of_sight: Grid,
    pub state: DisplacementState,
    pub phase: Phase,
    pub shock: Shock,
    pub vertical_mean: f32,
    pub vertical_min: f32,
    pub vertical_max: f32,
}

pub struct DisplacementGenerator {
    params: DisplacementParams,
    spec: GridSpec,
    ramp: Vec<f32>,
    los_factor: f64,
}

impl DisplacementGenerator {
    pub fn new(params: DisplacementParams, spec: GridSpec) -> Result<Self> {
        params.validate()?;
        let ramp = planar_ramp(spec.width, spec.height, params.ramp_ax, params.ramp_ay);
        let los_factor = params.incidence_deg.to_radians().cos();
        Ok(Self { params, spec, ramp, los_factor })
    }

    fn epoch_rng(&self, epoch: u64) -> StdRng {
        seeded_rng(self.params.seed.map(|s| derive_seed(s, epoch)))
    }

    /// Produce the epoch recorded in `prior.next_epoch`.
    pub fn generate_next(&self, prior: &DisplacementState) -> Result<DisplacementFrame> {
        self.generate(prior.next_epoch, prior)
    }

    /// Produce epoch `epoch` from the prior vertical grid.
    ///
    /// Fails only with `ShapeMismatch` when `prior` does not cover the configured domain.
    pub fn generate(&self, epoch: u64, prior: &DisplacementState) -> Result<DisplacementFrame> {
        self.spec.check(&prior.previous_vertical)?;
        let p = &self.params;
        let mut rng = self.epoch_rng(epoch);

        let (phase, phase_bias) = p.schedule.phase_at(epoch);
        let (shock, shock_offset) = p.shocks.roll(phase, &mut rng);
        let trend = p.trend_per_epoch * epoch as f64;
        let seasonal = seasonal_component(epoch, p.seasonal_amplitude, p.seasonal_period);
        let innovation = gaussian_field(
            self.spec.width,
            self.spec.height,
            p.innovation_sigma_px,
            p.innovation_std,
            Some(rng.gen()),
        );

        let uniform = trend + seasonal + phase_bias + shock_offset;
        let vertical_data: Vec<f32> = prior
            .previous_vertical
            .data
            .iter()
            .zip(innovation.iter().zip(self.ramp.iter()))
            .map(|(&prev, (&innov, &ramp))| {
                (p.ar_phi * prev as f64 + innov as f64 + ramp as f64 + uniform) as f32
            })
            .collect();
        let vertical = Grid::from_vec(self.spec.width, self.spec.height, self.spec.georef(), vertical_data)?;
        let los_factor = self.los_factor;
        let line_of_sight = vertical.map(|v| (v as f64 * los_factor) as f32);

        let (vertical_mean, vertical_min, vertical_max) =
            (vertical.mean(), vertical.min_value(), vertical.max_value());
        debug!(
            epoch,
            ?phase,
            ?shock,
            vertical_mean,
            vertical_min,
            vertical_max,
            "displacement.generated"
        );

        Ok(DisplacementFrame {
            epoch,
            line_of_sight,
            state: DisplacementState { previous_vertical: vertical, next_epoch: epoch + 1 },
            phase,
            shock,
            vertical_mean,
            vertical_min,
            vertical_max,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_abs_diff_eq;

    fn small_spec() -> GridSpec {
        GridSpec { width: 24, height: 16, ..GridSpec::default() }
    }

    fn quiet_params() -> DisplacementParams {
        DisplacementParams {
            innovation_std: 0.0,
            ramp_ax: 0.0,
            ramp_ay: 0.0,
            trend_per_epoch: 0.0,
            shocks: ShockParams { drought_probability: 0.0, storm_probability: 0.0, ..ShockParams::default() },
            seed: Some(1),
            ..DisplacementParams::default()
        }
    }

    #[test]
    fn cycle_schedule_alternates_dry_then_wet() {
        let s = PhaseSchedule::default();
        assert_eq!(s.phase_at(0), (Phase::Dry, -0.012));
        assert_eq!(s.phase_at(9).0, Phase::Dry);
        assert_eq!(s.phase_at(10), (Phase::Wet, 0.008));
        assert_eq!(s.phase_at(14).0, Phase::Wet);
        assert_eq!(s.phase_at(15).0, Phase::Dry);
    }

    #[test]
    fn monsoon_schedule_follows_calendar() {
        let m = MonsoonSchedule { enso_amplitude: 0.0, ..MonsoonSchedule::default() };
        let s = PhaseSchedule::Monsoon(m.clone());
        // Epoch 0 = 2020-01-01 (wet); epoch 18 = 2020-06-29 (dry); epoch 10 = 2020-04-10 (transition).
        assert_eq!(s.phase_at(0), (Phase::Wet, 0.015));
        assert_eq!(m.date_of(18), NaiveDate::from_ymd_opt(2020, 6, 29).unwrap());
        assert_eq!(s.phase_at(18), (Phase::Dry, -0.025));
        assert_eq!(s.phase_at(10), (Phase::Transition, 0.0));
    }

    #[test]
    fn enso_term_adds_to_bias() {
        let s = PhaseSchedule::Monsoon(MonsoonSchedule::default());
        // Epoch 10 is a transition month, so the bias is the ENSO term alone.
        let (_, bias) = s.phase_at(10);
        assert_abs_diff_eq!(bias, 0.02 * (std::f64::consts::TAU * 10.0 / 90.0).sin(), epsilon = 1e-12);
    }

    #[test]
    fn ar1_decays_prior_and_projects_to_los() {
        let spec = small_spec();
        let gen = DisplacementGenerator::new(quiet_params(), spec.clone()).unwrap();
        let mut prior = DisplacementState::initial(&spec);
        prior.previous_vertical = Grid::new(spec.width, spec.height, spec.georef(), 0.01);
        // Epoch 10 of the default cycle is wet: bias +0.008.
        let frame = gen.generate(10, &prior).unwrap();
        let expected_vertical = 0.93 * 0.01 + 0.008;
        let cos = 37.0f64.to_radians().cos();
        for &v in &frame.state.previous_vertical.data {
            assert_abs_diff_eq!(v as f64, expected_vertical, epsilon = 1e-6);
        }
        for &v in &frame.line_of_sight.data {
            assert_abs_diff_eq!(v as f64, expected_vertical * cos, epsilon = 1e-6);
        }
        assert_eq!(frame.state.next_epoch, 11);
        assert_eq!(frame.phase, Phase::Wet);
        assert_eq!(frame.shock, Shock::Calm);
    }

    #[test]
    fn certain_drought_in_dry_phase() {
        let spec = small_spec();
        let mut params = quiet_params();
        params.shocks.drought_probability = 1.0;
        let gen = DisplacementGenerator::new(params, spec.clone()).unwrap();
        let frame = gen.generate(0, &DisplacementState::initial(&spec)).unwrap();
        assert_eq!(frame.shock, Shock::Drought);
        assert_abs_diff_eq!(frame.vertical_mean as f64, -0.012 - 0.03, epsilon = 1e-6);
    }

    #[test]
    fn gated_storm_never_strikes_in_dry_phase() {
        let spec = small_spec();
        let mut params = quiet_params();
        params.shocks.storm_probability = 1.0;
        let gen = DisplacementGenerator::new(params, spec.clone()).unwrap();
        let frame = gen.generate(3, &DisplacementState::initial(&spec)).unwrap();
        assert_eq!(frame.shock, Shock::Calm);
    }

    #[test]
    fn ungated_shocks_can_compound() {
        let shocks = ShockParams {
            drought_probability: 1.0,
            storm_probability: 1.0,
            phase_gated: false,
            ..ShockParams::default()
        };
        let mut rng = seeded_rng(Some(5));
        let (shock, offset) = shocks.roll(Phase::Transition, &mut rng);
        assert_eq!(shock, Shock::Compound);
        assert_abs_diff_eq!(offset, 0.0, epsilon = 1e-12);
    }

    #[test]
    fn seeded_generators_are_reproducible() {
        let spec = small_spec();
        let params = DisplacementParams { seed: Some(42), ..DisplacementParams::default() };
        let a = DisplacementGenerator::new(params.clone(), spec.clone()).unwrap();
        let b = DisplacementGenerator::new(params, spec.clone()).unwrap();
        let s0 = DisplacementState::initial(&spec);
        let fa = a.generate_next(&s0).unwrap();
        let fb = b.generate_next(&s0).unwrap();
        assert_eq!(fa.line_of_sight, fb.line_of_sight);
        assert_eq!(fa.shock, fb.shock);
    }

    #[test]
    fn fresh_generators_draw_new_noise_each_epoch() {
        let spec = small_spec();
        let params = DisplacementParams { innovation_std: 0.001, ..quiet_params() };
        // Epochs 0..6 are all dry with no shocks, so only the innovation varies.
        let grids: Vec<Grid> = (0..6)
            .map(|epoch| {
                let gen = DisplacementGenerator::new(params.clone(), spec.clone()).unwrap();
                gen.generate(epoch, &DisplacementState::initial(&spec)).unwrap().line_of_sight
            })
            .collect();
        for i in 0..grids.len() {
            for j in i + 1..grids.len() {
                assert_ne!(grids[i], grids[j], "epochs {i} and {j} share their noise");
            }
        }
    }

    #[test]
    fn resumed_process_matches_continuous_run() {
        let spec = small_spec();
        let params = DisplacementParams { seed: Some(9), ..DisplacementParams::default() };
        let long_lived = DisplacementGenerator::new(params.clone(), spec.clone()).unwrap();
        let f0 = long_lived.generate_next(&DisplacementState::initial(&spec)).unwrap();
        let f1 = long_lived.generate_next(&f0.state).unwrap();

        let restarted = DisplacementGenerator::new(params, spec).unwrap();
        let r1 = restarted.generate_next(&f0.state).unwrap();
        assert_eq!(r1.epoch, 1);
        assert_eq!(r1.line_of_sight, f1.line_of_sight);
        assert_eq!(r1.shock, f1.shock);
    }

    #[test]
    fn shocks_vary_across_restarts() {
        let spec = small_spec();
        let mut params = quiet_params();
        params.seed = Some(42);
        params.shocks.drought_probability = 0.5;
        let mut state = DisplacementState::initial(&spec);
        let (mut dry, mut droughts) = (0, 0);
        for _ in 0..40 {
            let gen = DisplacementGenerator::new(params.clone(), spec.clone()).unwrap();
            let frame = gen.generate_next(&state).unwrap();
            if frame.phase == Phase::Dry {
                dry += 1;
                droughts += usize::from(frame.shock == Shock::Drought);
            }
            state = frame.state;
        }
        assert_eq!(dry, 30);
        assert!(droughts > 0 && droughts < dry, "{droughts} droughts in {dry} dry epochs");
    }

    #[test]
    fn prior_of_wrong_shape_is_rejected() {
        let spec = small_spec();
        let gen = DisplacementGenerator::new(quiet_params(), spec).unwrap();
        let wrong = DisplacementState::initial(&GridSpec { width: 8, height: 8, ..GridSpec::default() });
        assert!(matches!(gen.generate_next(&wrong), Err(PeatError::ShapeMismatch { .. })));
    }

    #[test]
    fn invalid_phi_is_rejected() {
        let params = DisplacementParams { ar_phi: 1.0, ..DisplacementParams::default() };
        assert!(DisplacementGenerator::new(params, small_spec()).is_err());
    }
}
