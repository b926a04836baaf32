//! Versioned engine configuration.
//!
//! Every tunable constant of the pipeline lives here with its default. The
//! values are working defaults, not physical constants; `fingerprint()` is
//! recorded on each result so a run can be tied back to its parameters.

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::str::FromStr;

use crate::error::ForecastError;
use crate::logging::params_hash;

pub const CONFIG_VERSION: u32 = 1;

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    pub version: u32,
    pub oscillator: OscillatorParams,
    pub envelope: EnvelopeParams,
    pub anomaly: AnomalyParams,
    pub forecast: ForecastParams,
    pub ephemeris: EphemerisParams,
    pub calibration: CalibrationParams,
    pub indicators: IndicatorParams,
}

/// Duffing-type oscillator coefficients.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OscillatorParams {
    /// Linear damping γ
    pub gamma: f64,
    /// Linear stiffness α
    pub alpha: f64,
    /// Cubic stiffness β
    pub beta: f64,
    /// Forcing amplitude τ
    pub tau: f64,
    /// Forcing angular frequency ω (rad/day)
    pub omega: f64,
    /// Quadratic velocity drag
    pub drag: f64,
    /// RK4 steps per output sample interval
    pub substeps: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EnvelopeParams {
    /// Rate of the e^(-k t) envelope applied to the raw displacement
    pub decay_rate: f64,
    /// Rate of the e^(k t) growth applied to the cumulative forecast
    pub growth_rate: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AnomalyParams {
    /// Low-pass cutoff relative to a unit sample rate
    pub cutoff_ratio: f64,
    pub filter_order: usize,
    /// Max sample distance between the 1st and 3rd filtered peaks
    pub triplet_window: usize,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ForecastParams {
    pub horizon_days: f64,
    pub sample_count: usize,
    pub peak_prominence: f64,
    pub lyapunov_epsilon: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EphemerisParams {
    pub tidal_bodies: Vec<String>,
    /// Divisor (m/s²) bringing the summed tidal acceleration near 1.0
    pub tidal_scale: f64,
    pub alignment_base: String,
    pub alignment_bodies: Vec<String>,
    pub aspect_angles_deg: Vec<f64>,
    pub aspect_tolerance_deg: f64,
    pub aspect_boost: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CalibrationParams {
    pub max_iterations: usize,
    /// Convergence threshold on the parameter step
    pub tolerance: f64,
    /// Damping ceiling; past it the current estimate is taken as a
    /// stationary point
    pub max_lambda: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct IndicatorParams {
    pub fetch_timeout_ms: u64,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            version: CONFIG_VERSION,
            oscillator: OscillatorParams::default(),
            envelope: EnvelopeParams::default(),
            anomaly: AnomalyParams::default(),
            forecast: ForecastParams::default(),
            ephemeris: EphemerisParams::default(),
            calibration: CalibrationParams::default(),
            indicators: IndicatorParams::default(),
        }
    }
}

impl Default for OscillatorParams {
    fn default() -> Self {
        Self {
            gamma: 0.80,
            alpha: 0.019,
            beta: 0.010,
            tau: 0.05,
            omega: 0.025,
            drag: 0.01,
            substeps: 8,
        }
    }
}

impl Default for EnvelopeParams {
    fn default() -> Self {
        Self {
            decay_rate: 0.1,
            growth_rate: 0.01,
        }
    }
}

impl Default for AnomalyParams {
    fn default() -> Self {
        Self {
            cutoff_ratio: 0.1,
            filter_order: 3,
            triplet_window: 20,
        }
    }
}

impl Default for ForecastParams {
    fn default() -> Self {
        Self {
            horizon_days: 10.0,
            sample_count: 100,
            peak_prominence: 0.5,
            lyapunov_epsilon: 1e-10,
        }
    }
}

impl Default for EphemerisParams {
    fn default() -> Self {
        Self {
            tidal_bodies: ["moon", "mars", "saturn", "neptune"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            tidal_scale: 1e-6,
            alignment_base: "moon".to_string(),
            alignment_bodies: ["mars", "jupiter", "saturn", "uranus"]
                .iter()
                .map(|s| s.to_string())
                .collect(),
            aspect_angles_deg: vec![0.0, 60.0, 90.0, 120.0],
            aspect_tolerance_deg: 1.0,
            aspect_boost: 0.2,
        }
    }
}

impl Default for CalibrationParams {
    fn default() -> Self {
        Self {
            max_iterations: 200,
            tolerance: 1e-10,
            max_lambda: 1e10,
        }
    }
}

impl Default for IndicatorParams {
    fn default() -> Self {
        Self {
            fetch_timeout_ms: 10_000,
        }
    }
}

fn env_parse<T: FromStr>(key: &str, default: T) -> T {
    std::env::var(key).ok().and_then(|v| v.parse().ok()).unwrap_or(default)
}

fn env_list(key: &str, default: Vec<String>) -> Vec<String> {
    match std::env::var(key) {
        Ok(v) if !v.trim().is_empty() => v
            .split(',')
            .map(|s| s.trim().to_lowercase())
            .filter(|s| !s.is_empty())
            .collect(),
        _ => default,
    }
}

impl EngineConfig {
    /// Defaults overridden by `SENTINEL_*` environment variables.
    pub fn from_env() -> Self {
        let d = Self::default();
        Self {
            version: CONFIG_VERSION,
            oscillator: OscillatorParams {
                gamma: env_parse("SENTINEL_GAMMA", d.oscillator.gamma),
                alpha: env_parse("SENTINEL_ALPHA", d.oscillator.alpha),
                beta: env_parse("SENTINEL_BETA", d.oscillator.beta),
                tau: env_parse("SENTINEL_TAU", d.oscillator.tau),
                omega: env_parse("SENTINEL_OMEGA", d.oscillator.omega),
                drag: env_parse("SENTINEL_DRAG", d.oscillator.drag),
                substeps: env_parse("SENTINEL_SUBSTEPS", d.oscillator.substeps),
            },
            envelope: EnvelopeParams {
                decay_rate: env_parse("SENTINEL_DECAY_RATE", d.envelope.decay_rate),
                growth_rate: env_parse("SENTINEL_GROWTH_RATE", d.envelope.growth_rate),
            },
            anomaly: AnomalyParams {
                cutoff_ratio: env_parse("SENTINEL_CUTOFF_RATIO", d.anomaly.cutoff_ratio),
                filter_order: env_parse("SENTINEL_FILTER_ORDER", d.anomaly.filter_order),
                triplet_window: env_parse("SENTINEL_TRIPLET_WINDOW", d.anomaly.triplet_window),
            },
            forecast: ForecastParams {
                horizon_days: env_parse("SENTINEL_HORIZON_DAYS", d.forecast.horizon_days),
                sample_count: env_parse("SENTINEL_SAMPLE_COUNT", d.forecast.sample_count),
                peak_prominence: env_parse("SENTINEL_PEAK_PROMINENCE", d.forecast.peak_prominence),
                lyapunov_epsilon: env_parse("SENTINEL_LYAPUNOV_EPS", d.forecast.lyapunov_epsilon),
            },
            ephemeris: EphemerisParams {
                tidal_bodies: env_list("SENTINEL_TIDAL_BODIES", d.ephemeris.tidal_bodies),
                tidal_scale: env_parse("SENTINEL_TIDAL_SCALE", d.ephemeris.tidal_scale),
                alignment_base: std::env::var("SENTINEL_ALIGNMENT_BASE")
                    .unwrap_or(d.ephemeris.alignment_base),
                alignment_bodies: env_list("SENTINEL_ALIGNMENT_BODIES", d.ephemeris.alignment_bodies),
                aspect_angles_deg: d.ephemeris.aspect_angles_deg,
                aspect_tolerance_deg: env_parse(
                    "SENTINEL_ASPECT_TOLERANCE",
                    d.ephemeris.aspect_tolerance_deg,
                ),
                aspect_boost: env_parse("SENTINEL_ASPECT_BOOST", d.ephemeris.aspect_boost),
            },
            calibration: CalibrationParams {
                max_iterations: env_parse("SENTINEL_FIT_MAX_ITER", d.calibration.max_iterations),
                tolerance: env_parse("SENTINEL_FIT_TOLERANCE", d.calibration.tolerance),
                max_lambda: d.calibration.max_lambda,
            },
            indicators: IndicatorParams {
                fetch_timeout_ms: env_parse("SENTINEL_FETCH_TIMEOUT_MS", d.indicators.fetch_timeout_ms),
            },
        }
    }

    /// Load a JSON config; missing fields keep their defaults.
    pub fn from_json_file(path: &Path) -> Result<Self, ForecastError> {
        let text = std::fs::read_to_string(path)
            .map_err(|e| ForecastError::Config(format!("read {}: {}", path.display(), e)))?;
        let cfg: EngineConfig = serde_json::from_str(&text)
            .map_err(|e| ForecastError::Config(format!("parse {}: {}", path.display(), e)))?;
        cfg.validate()?;
        Ok(cfg)
    }

    pub fn validate(&self) -> Result<(), ForecastError> {
        let fail = |msg: String| Err(ForecastError::Config(msg));
        if self.version != CONFIG_VERSION {
            return fail(format!(
                "unsupported config version {} (expected {})",
                self.version, CONFIG_VERSION
            ));
        }
        let osc = &self.oscillator;
        for (name, v) in [
            ("gamma", osc.gamma),
            ("alpha", osc.alpha),
            ("beta", osc.beta),
            ("tau", osc.tau),
            ("omega", osc.omega),
            ("drag", osc.drag),
            ("decay_rate", self.envelope.decay_rate),
            ("growth_rate", self.envelope.growth_rate),
        ] {
            if !v.is_finite() {
                return fail(format!("{} must be finite", name));
            }
        }
        if osc.substeps == 0 {
            return fail("substeps must be >= 1".to_string());
        }
        if !(self.anomaly.cutoff_ratio > 0.0) {
            return fail("cutoff_ratio must be > 0".to_string());
        }
        if self.anomaly.filter_order == 0 || self.anomaly.filter_order > 8 {
            return fail("filter_order must be in 1..=8".to_string());
        }
        if !(self.forecast.horizon_days > 0.0 && self.forecast.horizon_days.is_finite()) {
            return fail("horizon_days must be finite and > 0".to_string());
        }
        if self.forecast.sample_count < 2 {
            return fail("sample_count must be >= 2".to_string());
        }
        if !(self.forecast.peak_prominence >= 0.0) {
            return fail("peak_prominence must be >= 0".to_string());
        }
        if !(self.forecast.lyapunov_epsilon > 0.0) {
            return fail("lyapunov_epsilon must be > 0".to_string());
        }
        if !(self.ephemeris.tidal_scale > 0.0) {
            return fail("tidal_scale must be > 0".to_string());
        }
        if !(self.ephemeris.aspect_tolerance_deg >= 0.0) {
            return fail("aspect_tolerance_deg must be >= 0".to_string());
        }
        if self.calibration.max_iterations == 0 || !(self.calibration.tolerance > 0.0) {
            return fail("calibration needs max_iterations >= 1 and tolerance > 0".to_string());
        }
        Ok(())
    }

    /// SHA-256 of the canonical JSON encoding.
    pub fn fingerprint(&self) -> String {
        params_hash(&serde_json::to_string(self).unwrap_or_default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults_validate() {
        let cfg = EngineConfig::default();
        assert!(cfg.validate().is_ok());
        assert_eq!(cfg.oscillator.gamma, 0.80);
        assert_eq!(cfg.oscillator.alpha, 0.019);
        assert_eq!(cfg.forecast.sample_count, 100);
        assert_eq!(cfg.anomaly.triplet_window, 20);
        assert_eq!(cfg.ephemeris.aspect_angles_deg, vec![0.0, 60.0, 90.0, 120.0]);
    }

    #[test]
    fn test_fingerprint_tracks_parameters() {
        let a = EngineConfig::default();
        let mut b = EngineConfig::default();
        assert_eq!(a.fingerprint(), b.fingerprint());
        b.oscillator.gamma = 0.81;
        assert_ne!(a.fingerprint(), b.fingerprint());
    }

    #[test]
    fn test_validate_rejects_bad_values() {
        let cfg = EngineConfig {
            forecast: ForecastParams {
                sample_count: 1,
                ..ForecastParams::default()
            },
            ..EngineConfig::default()
        };
        assert!(matches!(cfg.validate(), Err(ForecastError::Config(_))));

        let cfg = EngineConfig {
            version: 99,
            ..EngineConfig::default()
        };
        assert!(cfg.validate().is_err());

        let mut cfg = EngineConfig::default();
        cfg.oscillator.tau = f64::NAN;
        assert!(cfg.validate().is_err());
    }

    #[test]
    fn test_partial_json_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(
            file,
            r#"{{"oscillator": {{"gamma": 0.5}}, "anomaly": {{"triplet_window": 12}}}}"#
        )
        .unwrap();
        let cfg = EngineConfig::from_json_file(file.path()).unwrap();
        assert_eq!(cfg.oscillator.gamma, 0.5);
        assert_eq!(cfg.oscillator.alpha, 0.019);
        assert_eq!(cfg.anomaly.triplet_window, 12);
        assert_eq!(cfg.anomaly.filter_order, 3);
        assert_eq!(cfg.version, CONFIG_VERSION);
    }

    #[test]
    fn test_unreadable_json_file_is_config_error() {
        let mut file = tempfile::NamedTempFile::new().unwrap();
        write!(file, "not json").unwrap();
        let err = EngineConfig::from_json_file(file.path()).unwrap_err();
        assert!(matches!(err, ForecastError::Config(_)));
    }
}
