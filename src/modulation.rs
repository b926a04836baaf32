//! Ephemeris-driven modulation series: tidal acceleration and aspect alignment.
//!
//! A failed position lookup only removes that body's contribution at that
//! sample. Failures are folded into one diagnostic per body so a bad body
//! does not flood the result with one notice per sample.

use std::collections::BTreeMap;

use crate::config::EphemerisParams;
use crate::ephemeris::{
    CelestialBody, Ephemeris, EphemerisError, JulianDate, AU_M, EARTH_RADIUS_M,
    GRAVITATIONAL_CONSTANT,
};
use crate::error::Diagnostic;
use crate::logging::{log_degraded, log_stage, Domain};
use crate::series::{TimeGrid, TimeSeries};

/// A modulation series plus whatever degraded while producing it.
#[derive(Debug, Clone, PartialEq)]
pub struct Modulation {
    pub series: TimeSeries,
    pub diagnostics: Vec<Diagnostic>,
}

impl Modulation {
    pub fn neutral(grid: &TimeGrid) -> Self {
        Self {
            series: TimeSeries::constant(grid.clone(), 1.0),
            diagnostics: Vec::new(),
        }
    }
}

/// Aspect matching rule for the alignment factor.
#[derive(Debug, Clone, PartialEq)]
pub struct AspectRule {
    pub angles_deg: Vec<f64>,
    pub tolerance_deg: f64,
    pub boost: f64,
}

impl AspectRule {
    pub fn from_params(p: &EphemerisParams) -> Self {
        Self {
            angles_deg: p.aspect_angles_deg.clone(),
            tolerance_deg: p.aspect_tolerance_deg,
            boost: p.aspect_boost,
        }
    }

    /// Additive boost for one separation; simultaneous aspects stack.
    pub fn boost_for(&self, separation_deg: f64) -> f64 {
        self.angles_deg
            .iter()
            .filter(|a| (separation_deg - **a).abs() < self.tolerance_deg)
            .count() as f64
            * self.boost
    }
}

/// Source of the two ephemeris modulation series.
pub trait ModulationSource: Send + Sync {
    fn tidal(&self, grid: &TimeGrid, start: JulianDate) -> Modulation;
    fn alignment(&self, grid: &TimeGrid, start: JulianDate) -> Modulation;
}

/// Neutral modulation (both series identically 1.0).
#[derive(Debug, Clone, Copy, Default)]
pub struct UniformModulation;

impl ModulationSource for UniformModulation {
    fn tidal(&self, grid: &TimeGrid, _start: JulianDate) -> Modulation {
        Modulation::neutral(grid)
    }

    fn alignment(&self, grid: &TimeGrid, _start: JulianDate) -> Modulation {
        Modulation::neutral(grid)
    }
}

/// Modulation computed from an [`Ephemeris`] and the configured bodies.
#[derive(Debug, Clone)]
pub struct EphemerisModulator<E> {
    ephemeris: E,
    params: EphemerisParams,
}

impl<E: Ephemeris> EphemerisModulator<E> {
    pub fn new(ephemeris: E, params: EphemerisParams) -> Self {
        Self { ephemeris, params }
    }
}

impl<E: Ephemeris> ModulationSource for EphemerisModulator<E> {
    fn tidal(&self, grid: &TimeGrid, start: JulianDate) -> Modulation {
        let mut failures = FailureLog::default();
        let bodies: Vec<CelestialBody> = self
            .params
            .tidal_bodies
            .iter()
            .filter_map(|name| {
                let body = CelestialBody::named(name);
                if body.is_none() {
                    failures.record(name, "no catalogued mass".to_string(), grid.len());
                }
                body
            })
            .collect();
        let mut m = tidal_factor(&self.ephemeris, grid, start, &bodies, self.params.tidal_scale);
        let mut diagnostics = failures.into_diagnostics(grid.len());
        diagnostics.append(&mut m.diagnostics);
        m.diagnostics = diagnostics;
        m
    }

    fn alignment(&self, grid: &TimeGrid, start: JulianDate) -> Modulation {
        alignment_factor(
            &self.ephemeris,
            grid,
            start,
            &self.params.alignment_base,
            &self.params.alignment_bodies,
            &AspectRule::from_params(&self.params),
        )
    }
}

#[derive(Default)]
struct FailureLog {
    by_body: BTreeMap<String, (usize, String)>,
}

impl FailureLog {
    fn record(&mut self, body: &str, detail: String, samples: usize) {
        let entry = self
            .by_body
            .entry(body.to_string())
            .or_insert_with(|| (0, detail));
        entry.0 += samples;
    }

    fn record_err(&mut self, body: &str, err: &EphemerisError) {
        self.record(body, err.to_string(), 1);
    }

    fn into_diagnostics(self, total: usize) -> Vec<Diagnostic> {
        self.by_body
            .into_iter()
            .map(|(body, (count, detail))| {
                let detail = format!("{}; {} of {} samples", detail, count.min(total), total);
                let diag = Diagnostic::external(format!("ephemeris:{}", body), detail);
                log_degraded(Domain::Ephemeris, &diag);
                diag
            })
            .collect()
    }
}

/// Tidal acceleration `Σ 2·G·M·R⊕ / d³` over `bodies`, divided by `scale`.
///
/// A sample whose sum is not strictly positive falls back to 1.0.
pub fn tidal_factor<E: Ephemeris + ?Sized>(
    ephemeris: &E,
    grid: &TimeGrid,
    start: JulianDate,
    bodies: &[CelestialBody],
    scale: f64,
) -> Modulation {
    let mut failures = FailureLog::default();
    let mut fallback_samples = 0usize;

    let values: Vec<f64> = grid
        .days()
        .iter()
        .map(|&day| {
            let jd = start.plus_days(day);
            let earth = match ephemeris.position("earth", jd) {
                Ok(p) => p,
                Err(err) => {
                    failures.record_err("earth", &err);
                    fallback_samples += 1;
                    return 1.0;
                }
            };
            let mut total = 0.0;
            for body in bodies {
                match ephemeris.position(&body.name, jd) {
                    Ok(pos) => {
                        let d = (pos - earth).norm() * AU_M;
                        let accel =
                            2.0 * GRAVITATIONAL_CONSTANT * body.mass_kg * EARTH_RADIUS_M / d.powi(3);
                        if accel.is_finite() {
                            total += accel;
                        } else {
                            failures.record(&body.name, "degenerate distance".to_string(), 1);
                        }
                    }
                    Err(err) => failures.record_err(&body.name, &err),
                }
            }
            let normalized = total / scale;
            if total > 0.0 && normalized.is_finite() {
                normalized
            } else {
                fallback_samples += 1;
                1.0
            }
        })
        .collect();

    let series = TimeSeries::new(grid.clone(), values);
    let (lo, hi) = min_max(series.values());
    log_stage(
        Domain::Ephemeris,
        "tidal",
        &[
            ("bodies", bodies.len() as f64),
            ("min", lo),
            ("max", hi),
            ("fallback_samples", fallback_samples as f64),
        ],
    );
    Modulation {
        series,
        diagnostics: failures.into_diagnostics(grid.len()),
    }
}

/// `1.0 + boost` for every aspect matched between `base` and each of `others`.
pub fn alignment_factor<E: Ephemeris + ?Sized>(
    ephemeris: &E,
    grid: &TimeGrid,
    start: JulianDate,
    base: &str,
    others: &[String],
    rule: &AspectRule,
) -> Modulation {
    let mut failures = FailureLog::default();
    let mut aligned_samples = 0usize;

    let values: Vec<f64> = grid
        .days()
        .iter()
        .map(|&day| {
            let jd = start.plus_days(day);
            let origin = ephemeris
                .position("earth", jd)
                .map_err(|e| failures.record_err("earth", &e))
                .ok();
            let base_pos = ephemeris
                .position(base, jd)
                .map_err(|e| failures.record_err(base, &e))
                .ok();
            let (earth, base_pos) = match (origin, base_pos) {
                (Some(e), Some(b)) => (e, b),
                _ => return 1.0,
            };
            let base_dir = base_pos - earth;

            let mut boost = 1.0;
            for other in others {
                match ephemeris.position(other, jd) {
                    Ok(pos) => boost += rule.boost_for(base_dir.angle_deg(pos - earth)),
                    Err(err) => failures.record_err(other, &err),
                }
            }
            if boost > 1.0 {
                aligned_samples += 1;
            }
            boost
        })
        .collect();

    let series = TimeSeries::new(grid.clone(), values);
    let (_, hi) = min_max(series.values());
    log_stage(
        Domain::Ephemeris,
        "alignment",
        &[
            ("bodies", others.len() as f64),
            ("aligned_samples", aligned_samples as f64),
            ("max", hi),
        ],
    );
    Modulation {
        series,
        diagnostics: failures.into_diagnostics(grid.len()),
    }
}

fn min_max(values: &[f64]) -> (f64, f64) {
    values
        .iter()
        .fold((f64::INFINITY, f64::NEG_INFINITY), |(lo, hi), &v| (lo.min(v), hi.max(v)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::ephemeris::{KeplerianEphemeris, Vec3};

    /// Fixed geometry: Earth at the origin, bodies on the unit circle.
    struct FixedSky {
        placements: Vec<(&'static str, Vec3)>,
    }

    impl Ephemeris for FixedSky {
        fn position(&self, body: &str, _jd: JulianDate) -> Result<Vec3, EphemerisError> {
            if body == "earth" {
                return Ok(Vec3::default());
            }
            self.placements
                .iter()
                .find(|(n, _)| *n == body)
                .map(|(_, p)| *p)
                .ok_or_else(|| EphemerisError::UnknownBody(body.to_string()))
        }
    }

    fn at_deg(deg: f64, r: f64) -> Vec3 {
        let rad = deg.to_radians();
        Vec3::new(r * rad.cos(), r * rad.sin(), 0.0)
    }

    fn start() -> JulianDate {
        JulianDate::parse_iso("2024-03-01").unwrap()
    }

    fn rule() -> AspectRule {
        AspectRule::from_params(&EphemerisParams::default())
    }

    #[test]
    fn test_aspect_boosts_stack_without_clamp() {
        let sky = FixedSky {
            placements: vec![
                ("moon", at_deg(0.0, 0.00257)),
                ("mars", at_deg(60.5, 1.5)),
                ("jupiter", at_deg(-89.6, 5.0)),
                ("saturn", at_deg(0.3, 9.5)),
                ("uranus", at_deg(45.0, 19.0)),
            ],
        };
        let grid = TimeGrid::uniform(1.0, 4);
        let others: Vec<String> = ["mars", "jupiter", "saturn", "uranus"]
            .iter()
            .map(|s| s.to_string())
            .collect();
        let m = alignment_factor(&sky, &grid, start(), "moon", &others, &rule());
        assert!(m.diagnostics.is_empty());
        for v in m.series.values() {
            assert!((v - 1.6).abs() < 1e-12, "{}", v);
        }
    }

    #[test]
    fn test_aspect_tolerance_is_strict() {
        let r = rule();
        assert_eq!(r.boost_for(61.0), 0.0);
        assert!((r.boost_for(60.99) - 0.2).abs() < 1e-12);
        assert!((r.boost_for(119.5) - 0.2).abs() < 1e-12);
        assert_eq!(r.boost_for(45.0), 0.0);
    }

    #[test]
    fn test_failed_body_only_drops_its_contribution() {
        let sky = FixedSky {
            placements: vec![("moon", at_deg(0.0, 0.00257)), ("mars", at_deg(90.0, 1.0))],
        };
        let grid = TimeGrid::uniform(1.0, 5);
        let others = vec!["mars".to_string(), "pluto".to_string()];
        let m = alignment_factor(&sky, &grid, start(), "moon", &others, &rule());
        assert!(m.series.values().iter().all(|v| (v - 1.2).abs() < 1e-12));
        assert_eq!(m.diagnostics.len(), 1);
        match &m.diagnostics[0] {
            Diagnostic::ExternalFetch { source, detail } => {
                assert_eq!(source, "ephemeris:pluto");
                assert!(detail.contains("5 of 5"));
            }
            other => panic!("unexpected {:?}", other),
        }
    }

    #[test]
    fn test_tidal_of_moon_alone_is_near_one() {
        let eph = KeplerianEphemeris::new();
        let grid = TimeGrid::uniform(30.0, 31);
        let moon = CelestialBody::named("moon").unwrap();
        let m = tidal_factor(&eph, &grid, start(), &[moon], 1e-6);
        assert!(m.diagnostics.is_empty());
        for v in m.series.values() {
            assert!(*v > 0.9 && *v < 1.5, "{}", v);
        }
    }

    #[test]
    fn test_tidal_degenerate_samples_fall_back_to_one() {
        let sky = FixedSky { placements: vec![] };
        let grid = TimeGrid::uniform(2.0, 3);
        let moon = CelestialBody::named("moon").unwrap();
        let m = tidal_factor(&sky, &grid, start(), &[moon], 1e-6);
        assert_eq!(m.series.values(), &[1.0, 1.0, 1.0]);
        assert_eq!(m.diagnostics.len(), 1);
    }

    #[test]
    fn test_modulator_reports_uncatalogued_body() {
        let params = EphemerisParams {
            tidal_bodies: vec!["moon".to_string(), "vulcan".to_string()],
            ..EphemerisParams::default()
        };
        let modulator = EphemerisModulator::new(KeplerianEphemeris::new(), params);
        let grid = TimeGrid::uniform(10.0, 20);
        let m = modulator.tidal(&grid, start());
        assert_eq!(m.diagnostics.len(), 1);
        assert!(m.series.values().iter().all(|v| v.is_finite() && *v > 0.5));
    }

    #[test]
    fn test_uniform_modulation_is_neutral() {
        let grid = TimeGrid::uniform(10.0, 100);
        let m = UniformModulation.alignment(&grid, start());
        assert!(m.series.values().iter().all(|v| *v == 1.0));
        assert!(m.diagnostics.is_empty());
    }
}
