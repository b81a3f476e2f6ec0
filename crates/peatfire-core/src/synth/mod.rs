//! Field synthesis primitives for the displacement model.
//!
//! Stateless. Every random field takes an explicit `seed: Option<u64>`:
//! `Some(s)` is fully reproducible, `None` draws from OS entropy and is
//! deliberately non-reproducible (live streaming uses this).

pub mod blur;

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use rand_distr::StandardNormal;

use blur::gaussian_blur;

/// Seeded RNG when `seed` is given, entropy-seeded otherwise.
pub fn seeded_rng(seed: Option<u64>) -> StdRng {
    match seed {
        Some(s) => StdRng::seed_from_u64(s),
        None => StdRng::from_entropy(),
    }
}

/// Mix a base seed with a stream index (epoch, tree, ...) into an
/// independent seed, so each stream is reproducible without replaying earlier ones.
pub fn derive_seed(seed: u64, stream: u64) -> u64 {
    seed ^ stream.wrapping_add(1).wrapping_mul(0x9E37_79B9_7F4A_7C15)
}

/// Spatially smooth noise: unit-normal samples blurred with `sigma_px`, then
/// rescaled to standard deviation `std` (metres).
pub fn gaussian_field(width: usize, height: usize, sigma_px: f64, std: f64, seed: Option<u64>) -> Vec<f32> {
    let n = width * height;
    if n == 0 {
        return Vec::new();
    }
    let mut rng = seeded_rng(seed);
    let raw: Vec<f64> = (0..n).map(|_| rng.sample::<f64, _>(StandardNormal)).collect();
    let z = gaussian_blur(&raw, width, height, sigma_px);

    let mean = z.iter().sum::<f64>() / n as f64;
    let var = z.iter().map(|v| (v - mean).powi(2)).sum::<f64>() / n as f64;
    let scale = std / (var.sqrt() + 1e-8);
    z.into_iter().map(|v| (v * scale) as f32).collect()
}

/// Planar tilt `ax·x + ay·y`, with `x` the column and `y` the row index.
pub fn planar_ramp(width: usize, height: usize, ax: f64, ay: f64) -> Vec<f32> {
    let mut out = Vec::with_capacity(width * height);
    for r in 0..height {
        for c in 0..width {
            out.push((ax * c as f64 + ay * r as f64) as f32);
        }
    }
    out
}

/// Seasonal oscillation `amplitude · sin(2π · (epoch mod period) / period)`.
///
/// A zero `period` disables the term.
pub fn seasonal_component(epoch: u64, amplitude: f64, period: u64) -> f64 {
    if period == 0 {
        return 0.0;
    }
    let phase = (epoch % period) as f64 / period as f64;
    amplitude * (std::f64::consts::TAU * phase).sin()
}
