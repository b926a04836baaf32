//! Digital Butterworth low-pass and zero-phase forward–backward filtering.
//!
//! Design follows the usual analog-prototype → prewarp → bilinear route, so
//! coefficients match the textbook `butter(N, Wn)` tables. `filtfilt` uses
//! odd extension at both ends and steady-state initial conditions.

use num_complex::Complex;

use crate::error::ForecastError;

/// Transfer-function coefficients with `a[0] == 1`.
#[derive(Debug, Clone, PartialEq)]
pub struct FilterCoefficients {
    pub b: Vec<f64>,
    pub a: Vec<f64>,
}

/// Expand `Π (z − r)` into real coefficients, highest power first.
fn poly_from_roots(roots: &[Complex<f64>]) -> Vec<f64> {
    let mut coeffs = vec![Complex::new(1.0, 0.0)];
    for r in roots {
        let mut next = vec![Complex::new(0.0, 0.0); coeffs.len() + 1];
        for (i, c) in coeffs.iter().enumerate() {
            next[i] += *c;
            next[i + 1] -= *c * *r;
        }
        coeffs = next;
    }
    coeffs.into_iter().map(|c| c.re).collect()
}

fn binomial(n: usize, k: usize) -> f64 {
    (0..k).fold(1.0, |acc, i| acc * (n - i) as f64 / (i + 1) as f64)
}

/// Butterworth low-pass of `order` with normalized cutoff `wn ∈ (0, 1)`
/// (1 = Nyquist).
pub fn butter_lowpass(order: usize, wn: f64) -> Result<FilterCoefficients, ForecastError> {
    if order == 0 {
        return Err(ForecastError::InvalidInput("filter order must be >= 1".to_string()));
    }
    if !(wn > 0.0 && wn < 1.0) {
        return Err(ForecastError::InvalidInput(format!(
            "normalized cutoff {} outside (0, 1)",
            wn
        )));
    }

    // Bilinear transform with fs = 2 so that Nyquist maps to wn = 1
    let fs2 = 4.0;
    let warped = fs2 * (std::f64::consts::PI * wn / 2.0).tan();
    let n = order as f64;

    let poles: Vec<Complex<f64>> = (0..order)
        .map(|j| {
            let m = -(n - 1.0) + 2.0 * j as f64;
            let theta = std::f64::consts::PI * m / (2.0 * n);
            -Complex::from_polar(warped, theta)
        })
        .collect();

    let z_poles: Vec<Complex<f64>> = poles.iter().map(|&p| (fs2 + p) / (fs2 - p)).collect();
    let denom: Complex<f64> = poles.iter().map(|&p| fs2 - p).product();
    let gain = warped.powi(order as i32) / denom.re;

    let b = (0..=order).map(|k| gain * binomial(order, k)).collect();
    let a = poly_from_roots(&z_poles);
    Ok(FilterCoefficients { b, a })
}

/// Direct-form II transposed IIR filter; `zi` is the initial delay state
/// and must hold `a.len() − 1` values.
pub fn lfilter(
    coeffs: &FilterCoefficients,
    x: &[f64],
    zi: &[f64],
) -> Result<Vec<f64>, ForecastError> {
    let (b, a) = (&coeffs.b, &coeffs.a);
    let n = a.len().saturating_sub(1);
    if a.is_empty() || b.len() != a.len() || zi.len() != n {
        return Err(ForecastError::InvalidInput(format!(
            "filter state has {} values, coefficients need {} (b: {}, a: {})",
            zi.len(),
            n,
            b.len(),
            a.len()
        )));
    }
    let mut z = zi.to_vec();
    let mut y = Vec::with_capacity(x.len());
    for &xv in x {
        let yv = b[0] * xv + z.first().copied().unwrap_or(0.0);
        for i in 0..n.saturating_sub(1) {
            z[i] = b[i + 1] * xv + z[i + 1] - a[i + 1] * yv;
        }
        if n > 0 {
            z[n - 1] = b[n] * xv - a[n] * yv;
        }
        y.push(yv);
    }
    Ok(y)
}

/// Solve a small dense system by Gaussian elimination with partial pivoting.
fn solve(mut m: Vec<Vec<f64>>, mut rhs: Vec<f64>) -> Vec<f64> {
    let n = rhs.len();
    for c in 0..n {
        let pivot = (c..n)
            .max_by(|&i, &j| m[i][c].abs().total_cmp(&m[j][c].abs()))
            .unwrap_or(c);
        m.swap(c, pivot);
        rhs.swap(c, pivot);
        for r in (c + 1)..n {
            let f = m[r][c] / m[c][c];
            for k in c..n {
                m[r][k] -= f * m[c][k];
            }
            rhs[r] -= f * rhs[c];
        }
    }
    let mut x = vec![0.0; n];
    for r in (0..n).rev() {
        let s: f64 = rhs[r] - ((r + 1)..n).map(|k| m[r][k] * x[k]).sum::<f64>();
        x[r] = s / m[r][r];
    }
    x
}

/// Steady-state delay values for a unit step input.
pub fn lfilter_zi(coeffs: &FilterCoefficients) -> Vec<f64> {
    let (b, a) = (&coeffs.b, &coeffs.a);
    let n = a.len().saturating_sub(1);
    if n == 0 || b.len() != a.len() {
        return vec![0.0; n];
    }
    // (I - companion(a)^T) zi = b[1..] - a[1..] * b[0]
    let mut m = vec![vec![0.0; n]; n];
    for i in 0..n {
        m[i][i] = 1.0;
        m[i][0] += a[i + 1];
        if i + 1 < n {
            m[i][i + 1] -= 1.0;
        }
    }
    let rhs = (0..n).map(|i| b[i + 1] - a[i + 1] * b[0]).collect();
    solve(m, rhs)
}

/// Forward–backward filtering: zero phase, squared magnitude response.
///
/// The pad length is `3·max(len(a), len(b))`, clipped to `len − 1` for
/// short inputs.
pub fn filtfilt(coeffs: &FilterCoefficients, x: &[f64]) -> Result<Vec<f64>, ForecastError> {
    if x.len() < 2 {
        return Ok(x.to_vec());
    }
    let pad = (3 * coeffs.a.len().max(coeffs.b.len())).min(x.len() - 1);
    let (first, last) = (x[0], x[x.len() - 1]);

    let mut ext = Vec::with_capacity(x.len() + 2 * pad);
    ext.extend((1..=pad).rev().map(|i| 2.0 * first - x[i]));
    ext.extend_from_slice(x);
    ext.extend((0..pad).map(|i| 2.0 * last - x[x.len() - 2 - i]));

    let zi = lfilter_zi(coeffs);
    let scaled = |k: f64| zi.iter().map(|z| z * k).collect::<Vec<_>>();

    let forward = lfilter(coeffs, &ext, &scaled(ext[0]))?;
    let mut reversed: Vec<f64> = forward.into_iter().rev().collect();
    let y0 = reversed[0];
    reversed = lfilter(coeffs, &reversed, &scaled(y0))?;
    reversed.reverse();
    Ok(reversed[pad..pad + x.len()].to_vec())
}

/// Zero-phase low-pass stage; cutoffs at or above Nyquist pass the signal
/// through unchanged.
#[derive(Debug, Clone, PartialEq)]
pub struct LowPass {
    coeffs: Option<FilterCoefficients>,
}

impl LowPass {
    /// `cutoff_ratio` is relative to a unit sample rate (Nyquist = 0.5).
    pub fn design(order: usize, cutoff_ratio: f64) -> Result<Self, ForecastError> {
        if !(cutoff_ratio > 0.0) {
            return Err(ForecastError::InvalidInput(format!(
                "cutoff ratio must be > 0, got {}",
                cutoff_ratio
            )));
        }
        let wn = cutoff_ratio / 0.5;
        if wn >= 1.0 {
            return Ok(Self { coeffs: None });
        }
        Ok(Self {
            coeffs: Some(butter_lowpass(order, wn)?),
        })
    }

    pub fn is_passthrough(&self) -> bool {
        self.coeffs.is_none()
    }

    pub fn coefficients(&self) -> Option<&FilterCoefficients> {
        self.coeffs.as_ref()
    }

    pub fn apply(&self, x: &[f64]) -> Result<Vec<f64>, ForecastError> {
        match &self.coeffs {
            Some(c) => filtfilt(c, x),
            None => Ok(x.to_vec()),
        }
    }
}
