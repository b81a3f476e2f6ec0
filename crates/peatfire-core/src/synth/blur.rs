//! Separable Gaussian filter with reflected borders.
//!
//! Border handling mirrors about the outer pixel edge (`d c b a | a b c d | d c b a`),
//! so a constant field stays constant after filtering. The kernel is truncated
//! at `4σ`.

const TRUNCATE: f64 = 4.0;

/// Normalised 1D Gaussian kernel for `sigma` (> 0), centre at `kernel.len() / 2`.
fn kernel(sigma: f64) -> Vec<f64> {
    let radius = (TRUNCATE * sigma + 0.5) as isize;
    let two_s2 = 2.0 * sigma * sigma;
    let mut k: Vec<f64> = (-radius..=radius)
        .map(|x| (-((x * x) as f64) / two_s2).exp())
        .collect();
    let sum: f64 = k.iter().sum();
    for w in &mut k {
        *w /= sum;
    }
    k
}

/// Map an out-of-range index back into `0..n` by edge reflection.
#[inline]
fn reflect(i: isize, n: usize) -> usize {
    let n = n as isize;
    let period = 2 * n;
    let mut m = i.rem_euclid(period);
    if m >= n {
        m = period - m - 1;
    }
    m as usize
}

/// Gaussian-blur a row-major `width × height` field.
///
/// Returns a copy of the input when `sigma <= 0` or the field is empty.
pub fn gaussian_blur(data: &[f64], width: usize, height: usize, sigma: f64) -> Vec<f64> {
    if sigma <= 0.0 || width == 0 || height == 0 {
        return data.to_vec();
    }
    let k = kernel(sigma);
    let radius = (k.len() / 2) as isize;

    // Pass 1: along rows.
    let mut tmp = vec![0.0f64; width * height];
    for r in 0..height {
        let row = &data[r * width..(r + 1) * width];
        for c in 0..width {
            let mut acc = 0.0;
            for (j, &w) in k.iter().enumerate() {
                let src = reflect(c as isize + j as isize - radius, width);
                acc += w * row[src];
            }
            tmp[r * width + c] = acc;
        }
    }

    // Pass 2: along columns.
    let mut out = vec![0.0f64; width * height];
    for r in 0..height {
        for c in 0..width {
            let mut acc = 0.0;
            for (j, &w) in k.iter().enumerate() {
                let src = reflect(r as isize + j as isize - radius, height);
                acc += w * tmp[src * width + c];
            }
            out[r * width + c] = acc;
        }
    }
    out
}
