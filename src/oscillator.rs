//! Forced Duffing-type oscillator driven by the folded proxy.
//!
//! ```text
//! ẋ = v
//! v̇ = −γv − αx − βx³ − c·v² + τ·sin(ωt)·p
//! ```
//!
//! Integrated with classic fixed-step RK4; each output interval is split
//! into `substeps` steps.

use crate::config::OscillatorParams;
use crate::error::ForecastError;
use crate::logging::{log_stage, Domain};
use crate::proxy::FoldedProxy;
use crate::series::{TimeGrid, TimeSeries};

/// Phase-space state `(x, v)`.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct OscillatorState {
    pub x: f64,
    pub v: f64,
}

impl OscillatorState {
    pub fn new(x: f64, v: f64) -> Self {
        Self { x, v }
    }

    fn offset(self, k: Derivative, h: f64) -> Self {
        Self {
            x: self.x + h * k.dx,
            v: self.v + h * k.dv,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct Derivative {
    dx: f64,
    dv: f64,
}

#[derive(Debug, Clone)]
pub struct Oscillator {
    params: OscillatorParams,
    forcing: f64,
}

impl Oscillator {
    pub fn new(params: OscillatorParams, folded_proxy: FoldedProxy) -> Self {
        Self {
            params,
            forcing: folded_proxy.value(),
        }
    }

    fn derivative(&self, t: f64, s: OscillatorState) -> Derivative {
        let p = &self.params;
        Derivative {
            dx: s.v,
            dv: -p.gamma * s.v - p.alpha * s.x - p.beta * s.x.powi(3) - p.drag * s.v * s.v
                + p.tau * (p.omega * t).sin() * self.forcing,
        }
    }

    fn rk4_step(&self, t: f64, s: OscillatorState, h: f64) -> OscillatorState {
        let k1 = self.derivative(t, s);
        let k2 = self.derivative(t + 0.5 * h, s.offset(k1, 0.5 * h));
        let k3 = self.derivative(t + 0.5 * h, s.offset(k2, 0.5 * h));
        let k4 = self.derivative(t + h, s.offset(k3, h));
        OscillatorState {
            x: s.x + h * (k1.dx + 2.0 * k2.dx + 2.0 * k3.dx + k4.dx) / 6.0,
            v: s.v + h * (k1.dv + 2.0 * k2.dv + 2.0 * k3.dv + k4.dv) / 6.0,
        }
    }

    /// Integrate from `initial` and return the displacement at every grid point.
    pub fn integrate_from(
        &self,
        initial: OscillatorState,
        grid: &TimeGrid,
    ) -> Result<TimeSeries, ForecastError> {
        let days = grid.days();
        let substeps = self.params.substeps.max(1);
        let mut values = Vec::with_capacity(days.len());
        let mut state = initial;

        for (i, &t) in days.iter().enumerate() {
            if i > 0 {
                let t0 = days[i - 1];
                let h = (t - t0) / substeps as f64;
                for k in 0..substeps {
                    state = self.rk4_step(t0 + k as f64 * h, state, h);
                }
            }
            if !state.x.is_finite() || !state.v.is_finite() {
                return Err(ForecastError::NumericalInstability {
                    stage: "oscillator",
                    index: i,
                    t,
                });
            }
            values.push(state.x);
        }

        Ok(TimeSeries::new(grid.clone(), values))
    }
}

/// Displacement over `sample_count` uniform samples on `[0, horizon_days]`,
/// starting at rest.
pub fn simulate(
    folded_proxy: FoldedProxy,
    horizon_days: f64,
    sample_count: usize,
    params: &OscillatorParams,
) -> Result<TimeSeries, ForecastError> {
    if !(horizon_days > 0.0 && horizon_days.is_finite()) {
        return Err(ForecastError::InvalidInput(format!(
            "horizon_days must be finite and > 0, got {}",
            horizon_days
        )));
    }
    if sample_count < 2 {
        return Err(ForecastError::InvalidInput(format!(
            "sample_count must be >= 2, got {}",
            sample_count
        )));
    }

    let grid = TimeGrid::uniform(horizon_days, sample_count);
    let series = Oscillator::new(params.clone(), folded_proxy)
        .integrate_from(OscillatorState::default(), &grid)?;

    let peak = series.values().iter().fold(0.0f64, |m, v| m.max(v.abs()));
    log_stage(
        Domain::Oscillator,
        "simulated",
        &[
            ("folded_proxy", folded_proxy.value()),
            ("samples", sample_count as f64),
            ("max_abs_x", peak),
        ],
    );
    Ok(series)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn proxy(v: f64) -> FoldedProxy {
        FoldedProxy::new(v).unwrap()
    }

    #[test]
    fn test_zero_proxy_stays_at_rest() {
        let s = simulate(proxy(0.0), 10.0, 100, &OscillatorParams::default()).unwrap();
        assert!(s.values().iter().all(|&x| x == 0.0));
    }

    #[test]
    fn test_unforced_displacement_decays_monotonically() {
        let params = OscillatorParams::default();
        let grid = TimeGrid::uniform(10.0, 100);
        let s = Oscillator::new(params, proxy(0.0))
            .integrate_from(OscillatorState::new(1.0, 0.0), &grid)
            .unwrap();
        for w in s.values().windows(2) {
            assert!(w[1].abs() <= w[0].abs() + 1e-12, "{} -> {}", w[0], w[1]);
        }
        assert!(s.values()[99].abs() < 1.0);
    }

    #[test]
    fn test_forced_output_is_finite_and_positive_early() {
        let s = simulate(proxy(1.0), 10.0, 100, &OscillatorParams::default()).unwrap();
        assert!(s.first_non_finite().is_none());
        // sin(ωt) > 0 on the horizon, so the forcing pushes x upward
        assert!(s.values()[10] > 0.0);
    }

    #[test]
    fn test_substeps_converge() {
        let coarse = OscillatorParams {
            substeps: 1,
            ..OscillatorParams::default()
        };
        let fine = OscillatorParams {
            substeps: 32,
            ..OscillatorParams::default()
        };
        let a = simulate(proxy(0.6), 10.0, 50, &coarse).unwrap();
        let b = simulate(proxy(0.6), 10.0, 50, &fine).unwrap();
        for (x, y) in a.values().iter().zip(b.values()) {
            assert!((x - y).abs() < 1e-5);
        }
    }

    #[test]
    fn test_blow_up_is_numerical_instability() {
        let params = OscillatorParams {
            gamma: -50.0,
            beta: 0.0,
            drag: 0.0,
            ..OscillatorParams::default()
        };
        let err = Oscillator::new(params, proxy(0.5))
            .integrate_from(OscillatorState::new(1.0, 1.0), &TimeGrid::uniform(50.0, 100))
            .unwrap_err();
        assert!(matches!(err, ForecastError::NumericalInstability { .. }));
    }

    #[test]
    fn test_rejects_bad_horizon_and_samples() {
        let p = OscillatorParams::default();
        assert!(matches!(
            simulate(proxy(0.5), 0.0, 100, &p),
            Err(ForecastError::InvalidInput(_))
        ));
        assert!(matches!(
            simulate(proxy(0.5), 10.0, 1, &p),
            Err(ForecastError::InvalidInput(_))
        ));
    }
}
