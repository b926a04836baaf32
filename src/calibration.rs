//! Resonance calibration: fit `amplification(x) = a·e^(b·x)` to historical
//! `(proxy, outcome)` pairs with Levenberg–Marquardt.
//!
//! Too little data or a failed fit is an expected outcome, returned as
//! [`Calibration::Neutral`] with the reason attached.

use serde::{Deserialize, Serialize};

use crate::config::CalibrationParams;
use crate::error::Diagnostic;
use crate::logging::{log_degraded, log_stage, Domain};

/// One labeled historical event.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct HistoricalEvent {
    pub proxy: f64,
    pub outcome: f64,
    #[serde(default)]
    pub event_count: u32,
    pub domain: String,
    #[serde(default)]
    pub distance: f64,
    #[serde(default)]
    pub aux_power: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct CalibrationModel {
    pub a: f64,
    pub b: f64,
}

impl CalibrationModel {
    pub const NEUTRAL: CalibrationModel = CalibrationModel { a: 1.0, b: 0.0 };

    pub fn amplification(&self, x: f64) -> f64 {
        self.a * (self.b * x).exp()
    }
}

impl Default for CalibrationModel {
    fn default() -> Self {
        Self::NEUTRAL
    }
}

/// Outcome of a calibration attempt.
#[derive(Debug, Clone, PartialEq)]
pub enum Calibration {
    Fitted {
        model: CalibrationModel,
        iterations: usize,
        sse: f64,
    },
    Neutral {
        reason: Diagnostic,
    },
}

impl Calibration {
    pub fn model(&self) -> CalibrationModel {
        match self {
            Calibration::Fitted { model, .. } => *model,
            Calibration::Neutral { .. } => CalibrationModel::NEUTRAL,
        }
    }

    pub fn diagnostic(&self) -> Option<&Diagnostic> {
        match self {
            Calibration::Fitted { .. } => None,
            Calibration::Neutral { reason } => Some(reason),
        }
    }

    pub fn is_fitted(&self) -> bool {
        matches!(self, Calibration::Fitted { .. })
    }

    /// Fall back to neutral when the fitted curve at `x`, applied to a
    /// signal of peak `magnitude`, leaves the finite range.
    pub fn bounded_at(self, x: f64, magnitude: f64) -> Calibration {
        let model = match &self {
            Calibration::Fitted { model, .. } => *model,
            Calibration::Neutral { .. } => return self,
        };
        let amp = model.amplification(x);
        if amp.is_finite() && (amp * magnitude).is_finite() {
            return self;
        }
        let reason = Diagnostic::CalibrationFit {
            detail: format!(
                "amplification {:e} at x={:.4} is out of range (a={:.4e}, b={:.4e})",
                amp, x, model.a, model.b
            ),
        };
        log_degraded(Domain::Calibration, &reason);
        Calibration::Neutral { reason }
    }
}

/// Filter by `domain` (exact tag match) and fit; fewer than two events is
/// `DataInsufficient`.
pub fn calibrate(
    events: &[HistoricalEvent],
    domain: Option<&str>,
    params: &CalibrationParams,
) -> Calibration {
    let (xs, ys): (Vec<f64>, Vec<f64>) = events
        .iter()
        .filter(|e| domain.map_or(true, |d| e.domain == d))
        .map(|e| (e.proxy, e.outcome))
        .unzip();

    if xs.len() < 2 {
        let reason = Diagnostic::DataInsufficient {
            domain: domain.map(str::to_string),
            available: xs.len(),
        };
        log_degraded(Domain::Calibration, &reason);
        return Calibration::Neutral { reason };
    }

    match fit_exponential(&xs, &ys, params) {
        Ok(fit) => {
            log_stage(
                Domain::Calibration,
                "fitted",
                &[
                    ("events", xs.len() as f64),
                    ("a", fit.model.a),
                    ("b", fit.model.b),
                    ("iterations", fit.iterations as f64),
                    ("sse", fit.sse),
                ],
            );
            Calibration::Fitted {
                model: fit.model,
                iterations: fit.iterations,
                sse: fit.sse,
            }
        }
        Err(detail) => {
            let reason = Diagnostic::CalibrationFit { detail };
            log_degraded(Domain::Calibration, &reason);
            Calibration::Neutral { reason }
        }
    }
}

struct Fit {
    model: CalibrationModel,
    iterations: usize,
    sse: f64,
}

fn sse_of(xs: &[f64], ys: &[f64], a: f64, b: f64) -> f64 {
    xs.iter()
        .zip(ys)
        .map(|(x, y)| (y - a * (b * x).exp()).powi(2))
        .sum()
}

/// Start from a log-linear regression when every outcome has the same sign.
fn initial_guess(xs: &[f64], ys: &[f64]) -> (f64, f64) {
    let sign = if ys.iter().all(|y| *y > 0.0) {
        1.0
    } else if ys.iter().all(|y| *y < 0.0) {
        -1.0
    } else {
        return (1.0, 0.0);
    };
    let n = xs.len() as f64;
    let mx = xs.iter().sum::<f64>() / n;
    let ly: Vec<f64> = ys.iter().map(|y| (sign * y).ln()).collect();
    let my = ly.iter().sum::<f64>() / n;
    let sxx: f64 = xs.iter().map(|x| (x - mx).powi(2)).sum();
    if sxx <= f64::EPSILON {
        return (sign * my.exp(), 0.0);
    }
    let sxy: f64 = xs.iter().zip(&ly).map(|(x, y)| (x - mx) * (y - my)).sum();
    let b = sxy / sxx;
    (sign * (my - b * mx).exp(), b)
}

fn fit_exponential(xs: &[f64], ys: &[f64], params: &CalibrationParams) -> Result<Fit, String> {
    if xs.iter().chain(ys).any(|v| !v.is_finite()) {
        return Err("non-finite event data".to_string());
    }

    let (mut a, mut b) = initial_guess(xs, ys);
    let mut lambda = 1e-3;
    let mut sse = sse_of(xs, ys, a, b);
    let tol = params.tolerance;

    for iter in 1..=params.max_iterations {
        if sse == 0.0 {
            return Ok(Fit {
                model: CalibrationModel { a, b },
                iterations: iter - 1,
                sse,
            });
        }

        // Normal equations J^T J and J^T r for r = y - a e^{bx}
        let (mut g11, mut g12, mut g22, mut h1, mut h2) = (0.0, 0.0, 0.0, 0.0, 0.0);
        for (x, y) in xs.iter().zip(ys) {
            let e = (b * x).exp();
            let r = y - a * e;
            let ja = e;
            let jb = a * x * e;
            g11 += ja * ja;
            g12 += ja * jb;
            g22 += jb * jb;
            h1 += ja * r;
            h2 += jb * r;
        }

        let det0 = g11 * g22 - g12 * g12;
        if !(det0 > 1e-12 * g11 * g22) || !det0.is_finite() {
            return Err(format!(
                "ill-conditioned normal equations (det={:.3e}) at a={:.4}, b={:.4}",
                det0, a, b
            ));
        }

        loop {
            let d11 = g11 * (1.0 + lambda);
            let d22 = g22 * (1.0 + lambda);
            let det = d11 * d22 - g12 * g12;
            let da = (h1 * d22 - g12 * h2) / det;
            let db = (d11 * h2 - g12 * h1) / det;
            let (a_new, b_new) = (a + da, b + db);
            let sse_new = sse_of(xs, ys, a_new, b_new);

            if sse_new.is_finite() && sse_new < sse {
                let small_step = da.abs() <= tol * (a.abs() + tol) && db.abs() <= tol * (b.abs() + tol);
                let small_gain = sse - sse_new <= tol * sse;
                a = a_new;
                b = b_new;
                sse = sse_new;
                lambda = (lambda * 0.1).max(1e-12);
                if small_step || small_gain {
                    return Ok(Fit {
                        model: CalibrationModel { a, b },
                        iterations: iter,
                        sse,
                    });
                }
                break;
            }

            lambda *= 10.0;
            if lambda > params.max_lambda {
                // No damped step improves the residual: stationary point
                return Ok(Fit {
                    model: CalibrationModel { a, b },
                    iterations: iter,
                    sse,
                });
            }
        }
    }

    Err(format!(
        "no convergence after {} iterations (a={:.4}, b={:.4}, sse={:.3e})",
        params.max_iterations, a, b, sse
    ))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn event(proxy: f64, outcome: f64, domain: &str) -> HistoricalEvent {
        HistoricalEvent {
            proxy,
            outcome,
            event_count: 1,
            domain: domain.to_string(),
            distance: 0.0,
            aux_power: 0.0,
        }
    }

    fn params() -> CalibrationParams {
        CalibrationParams::default()
    }

    #[test]
    fn test_empty_and_single_are_neutral_with_data_insufficient() {
        for events in [vec![], vec![event(0.5, 1.2, "seismic")]] {
            let c = calibrate(&events, Some("seismic"), &params());
            assert_eq!(c.model(), CalibrationModel { a: 1.0, b: 0.0 });
            assert!(matches!(
                c.diagnostic(),
                Some(Diagnostic::DataInsufficient { .. })
            ));
        }
    }

    #[test]
    fn test_domain_filter_applies_before_count() {
        let events = vec![
            event(0.2, 1.0, "solar"),
            event(0.4, 1.5, "solar"),
            event(0.6, 2.0, "seismic"),
        ];
        let c = calibrate(&events, Some("seismic"), &params());
        match c.diagnostic() {
            Some(Diagnostic::DataInsufficient { available, domain }) => {
                assert_eq!(*available, 1);
                assert_eq!(domain.as_deref(), Some("seismic"));
            }
            other => panic!("unexpected {:?}", other),
        }
        assert!(calibrate(&events, None, &params()).is_fitted());
    }

    #[test]
    fn test_recovers_exact_exponential() {
        let events: Vec<_> = (1..=9)
            .map(|i| {
                let x = i as f64 / 10.0;
                event(x, 2.0 * (0.5 * x).exp(), "seismic")
            })
            .collect();
        let c = calibrate(&events, Some("seismic"), &params());
        let m = c.model();
        assert!(c.is_fitted());
        assert!((m.a - 2.0).abs() < 1e-6, "a = {}", m.a);
        assert!((m.b - 0.5).abs() < 1e-6, "b = {}", m.b);
    }

    #[test]
    fn test_noisy_fit_reduces_error_from_initial_guess() {
        let noise = [0.03, -0.02, 0.01, -0.04, 0.02, 0.0, -0.01, 0.03];
        let events: Vec<_> = noise
            .iter()
            .enumerate()
            .map(|(i, n)| {
                let x = 0.1 + i as f64 * 0.1;
                event(x, 1.5 * (1.2 * x).exp() + n, "seismic")
            })
            .collect();
        let c = calibrate(&events, None, &params());
        let m = c.model();
        assert!(c.is_fitted());
        assert!((m.a - 1.5).abs() < 0.1);
        assert!((m.b - 1.2).abs() < 0.1);
    }

    #[test]
    fn test_handles_negative_outcomes() {
        let events: Vec<_> = (0..6)
            .map(|i| {
                let x = i as f64 * 0.2;
                event(x, -0.5 * (0.8 * x).exp(), "seismic")
            })
            .collect();
        let c = calibrate(&events, None, &params());
        let m = c.model();
        assert!(c.is_fitted());
        assert!((m.a + 0.5).abs() < 1e-5);
        assert!((m.b - 0.8).abs() < 1e-5);
    }

    #[test]
    fn test_identical_proxies_fail_fit() {
        let events = vec![event(0.5, 1.0, "x"), event(0.5, 2.0, "x"), event(0.5, 1.5, "x")];
        let c = calibrate(&events, None, &params());
        assert_eq!(c.model(), CalibrationModel::NEUTRAL);
        assert!(matches!(c.diagnostic(), Some(Diagnostic::CalibrationFit { .. })));
    }

    #[test]
    fn test_damping_ceiling_keeps_current_estimate() {
        let events: Vec<HistoricalEvent> = [0.1, 0.4, 0.7, 0.9]
            .iter()
            .map(|&x| event(x, 3.0, "seismic"))
            .collect();
        let tight = CalibrationParams {
            max_lambda: 1e-3,
            ..params()
        };
        let c = calibrate(&events, None, &tight);
        assert!(c.is_fitted(), "{:?}", c);
        let m = c.model();
        assert!((m.a - 3.0).abs() < 1e-9 && m.b.abs() < 1e-9, "{:?}", m);
    }

    #[test]
    fn test_iteration_cap_reports_non_convergence() {
        let events: Vec<_> = (0..8)
            .map(|i| {
                let x = i as f64 / 7.0;
                event(x, 3.0 * (2.0 * x).exp() - 4.0, "x")
            })
            .collect();
        let capped = CalibrationParams {
            max_iterations: 1,
            ..params()
        };
        let c = calibrate(&events, None, &capped);
        match c.diagnostic() {
            Some(Diagnostic::CalibrationFit { detail }) => assert!(detail.contains("no convergence")),
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_non_finite_outcome_fails_fit() {
        let events = vec![event(0.1, 1.0, "x"), event(0.5, f64::NAN, "x")];
        let c = calibrate(&events, None, &params());
        assert!(matches!(c.diagnostic(), Some(Diagnostic::CalibrationFit { .. })));
    }

    #[test]
    fn test_overflowing_fit_is_bounded_to_neutral() {
        let steep = Calibration::Fitted {
            model: CalibrationModel { a: 1.0, b: 1000.0 },
            iterations: 3,
            sse: 0.0,
        };
        assert_eq!(steep.clone().bounded_at(0.1, 1.0), steep);
        let c = steep.clone().bounded_at(0.9, 1.0);
        assert_eq!(c.model(), CalibrationModel::NEUTRAL);
        assert_eq!(c.diagnostic().map(|d| d.kind()), Some("calibration_fit"));
        // finite gain that overflows once applied to the signal
        assert!(!steep.bounded_at(0.7, 1e10).is_fitted());
        let neutral = calibrate(&[], None, &params());
        assert_eq!(neutral.clone().bounded_at(0.9, 1.0), neutral);
    }

    #[test]
    fn test_amplification_of_neutral_model_is_one() {
        assert_eq!(CalibrationModel::NEUTRAL.amplification(0.725), 1.0);
        let m = CalibrationModel { a: 2.0, b: 1.0 };
        assert!((m.amplification(1.0) - 2.0 * std::f64::consts::E).abs() < 1e-12);
    }
}
