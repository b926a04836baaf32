//! Space-weather indicator factors.
//!
//! Each factor is a scalar in `[1.0, 2.0]` that multiplies the modulated
//! signal. Fetching is external: sources implement [`IndicatorSource`] and
//! [`aggregate`] polls them concurrently. A missing, failed, timed-out or
//! non-finite reading degrades to 1.0 and leaves a diagnostic behind.

use anyhow::Result;
use async_trait::async_trait;
use futures_util::future::join_all;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use std::time::Duration;

use crate::error::Diagnostic;
use crate::logging::{log_degraded, log_stage, Domain};

pub const FACTOR_MIN: f64 = 1.0;
pub const FACTOR_MAX: f64 = 2.0;

// =============================================================================
// Factor names
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
pub enum IndicatorKind {
    #[serde(rename = "xrayFluxTrend")]
    XrayFluxTrend,
    #[serde(rename = "solarWindSpeed")]
    SolarWindSpeed,
    #[serde(rename = "geomagStormLevel")]
    GeomagStormLevel,
    #[serde(rename = "flareClass")]
    FlareClass,
    #[serde(rename = "ionosphericTEC")]
    IonosphericTec,
    #[serde(rename = "resonancePower")]
    ResonancePower,
}

impl IndicatorKind {
    pub const ALL: [IndicatorKind; 6] = [
        IndicatorKind::XrayFluxTrend,
        IndicatorKind::SolarWindSpeed,
        IndicatorKind::GeomagStormLevel,
        IndicatorKind::FlareClass,
        IndicatorKind::IonosphericTec,
        IndicatorKind::ResonancePower,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            IndicatorKind::XrayFluxTrend => "xrayFluxTrend",
            IndicatorKind::SolarWindSpeed => "solarWindSpeed",
            IndicatorKind::GeomagStormLevel => "geomagStormLevel",
            IndicatorKind::FlareClass => "flareClass",
            IndicatorKind::IonosphericTec => "ionosphericTEC",
            IndicatorKind::ResonancePower => "resonancePower",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        let name = name.trim();
        Self::ALL.into_iter().find(|k| k.as_str() == name)
    }

    fn source_tag(&self) -> String {
        format!("indicator:{}", self.as_str())
    }
}

impl fmt::Display for IndicatorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

pub fn clamp_factor(v: f64) -> f64 {
    v.clamp(FACTOR_MIN, FACTOR_MAX)
}

// =============================================================================
// Factor set
// =============================================================================

/// Present factors, each clamped to `[1.0, 2.0]`; absent factors read as 1.0.
#[derive(Debug, Clone, Default, PartialEq, Serialize)]
#[serde(transparent)]
pub struct IndicatorFactors {
    values: BTreeMap<IndicatorKind, f64>,
}

impl IndicatorFactors {
    pub fn neutral() -> Self {
        Self::default()
    }

    /// Non-finite values are ignored, leaving the factor at 1.0.
    pub fn with(mut self, kind: IndicatorKind, value: f64) -> Self {
        self.set(kind, value);
        self
    }

    pub fn set(&mut self, kind: IndicatorKind, value: f64) {
        if value.is_finite() {
            self.values.insert(kind, clamp_factor(value));
        }
    }

    pub fn get(&self, kind: IndicatorKind) -> f64 {
        self.values.get(&kind).copied().unwrap_or(FACTOR_MIN)
    }

    pub fn is_neutral(&self) -> bool {
        self.values.values().all(|v| *v == FACTOR_MIN)
    }

    pub fn iter(&self) -> impl Iterator<Item = (IndicatorKind, f64)> + '_ {
        self.values.iter().map(|(k, v)| (*k, *v))
    }

    /// Product of every factor, multiplied in the fixed name order.
    pub fn product(&self) -> f64 {
        IndicatorKind::ALL.iter().map(|k| self.get(*k)).product()
    }

    /// Build from a free-form name→value map.
    ///
    /// Unknown names and non-finite values are dropped, each with an
    /// `ExternalFetch` diagnostic.
    pub fn from_map(map: &BTreeMap<String, f64>) -> (Self, Vec<Diagnostic>) {
        let mut factors = Self::default();
        let mut diagnostics = Vec::new();
        for (name, value) in map {
            match IndicatorKind::from_name(name) {
                None => diagnostics.push(Diagnostic::external(
                    format!("indicator:{}", name),
                    "unrecognized factor name",
                )),
                Some(kind) if !value.is_finite() => diagnostics.push(Diagnostic::external(
                    kind.source_tag(),
                    format!("non-finite value {}", value),
                )),
                Some(kind) => factors.set(kind, *value),
            }
        }
        for d in &diagnostics {
            log_degraded(Domain::Indicator, d);
        }
        (factors, diagnostics)
    }
}

// =============================================================================
// External sources
// =============================================================================

/// One external fetcher producing a factor value.
#[async_trait]
pub trait IndicatorSource: Send + Sync {
    fn kind(&self) -> IndicatorKind;
    async fn fetch(&self) -> Result<f64>;
}

/// Source returning a fixed value; used for replaying recorded readings.
#[derive(Debug, Clone, Copy)]
pub struct FixedReading {
    pub kind: IndicatorKind,
    pub value: f64,
}

#[async_trait]
impl IndicatorSource for FixedReading {
    fn kind(&self) -> IndicatorKind {
        self.kind
    }

    async fn fetch(&self) -> Result<f64> {
        Ok(self.value)
    }
}

/// Poll every source concurrently, each bounded by `timeout`.
///
/// Later sources for the same factor overwrite earlier ones.
pub async fn aggregate(
    sources: &[Box<dyn IndicatorSource>],
    timeout: Duration,
) -> (IndicatorFactors, Vec<Diagnostic>) {
    let polls = sources.iter().map(|s| async move {
        let outcome = tokio::time::timeout(timeout, s.fetch()).await;
        (s.kind(), outcome)
    });
    let outcomes = join_all(polls).await;

    let mut factors = IndicatorFactors::default();
    let mut diagnostics = Vec::new();
    for (kind, outcome) in outcomes {
        let failure = match outcome {
            Ok(Ok(v)) if v.is_finite() => {
                factors.set(kind, v);
                continue;
            }
            Ok(Ok(v)) => format!("non-finite reading {}", v),
            Ok(Err(e)) => format!("fetch failed: {}", e),
            Err(_) => format!("timed out after {} ms", timeout.as_millis()),
        };
        let diag = Diagnostic::external(kind.source_tag(), failure);
        log_degraded(Domain::Indicator, &diag);
        diagnostics.push(diag);
    }

    log_stage(
        Domain::Indicator,
        "aggregate",
        &[
            ("sources", sources.len() as f64),
            ("failed", diagnostics.len() as f64),
            ("product", factors.product()),
        ],
    );
    (factors, diagnostics)
}

// =============================================================================
// Reading → factor mappings
// =============================================================================

/// Least-squares slope of `y` against `x`; 0 when undefined.
fn linear_slope(points: &[(f64, f64)]) -> f64 {
    let n = points.len() as f64;
    if points.len() < 2 {
        return 0.0;
    }
    let mx = points.iter().map(|p| p.0).sum::<f64>() / n;
    let my = points.iter().map(|p| p.1).sum::<f64>() / n;
    let sxx: f64 = points.iter().map(|p| (p.0 - mx).powi(2)).sum();
    if sxx == 0.0 {
        return 0.0;
    }
    let sxy: f64 = points.iter().map(|p| (p.0 - mx) * (p.1 - my)).sum();
    sxy / sxx
}

/// GOES 0.1–0.8 nm flux trend.
///
/// `samples` are `(minutes, flux W/m²)` in time order; only the last 180
/// are used. A rising log-flux slope above 0.01 decades/min, or any flux
/// above the M-class threshold, raises the factor by `0.5·slope/0.01`.
pub fn xray_flux_trend(samples: &[(f64, f64)]) -> f64 {
    let recent: Vec<(f64, f64)> = samples
        .iter()
        .copied()
        .filter(|(t, f)| t.is_finite() && f.is_finite())
        .collect();
    let recent = &recent[recent.len().saturating_sub(180)..];
    if recent.is_empty() {
        return FACTOR_MIN;
    }
    let log_flux: Vec<(f64, f64)> = recent
        .iter()
        .map(|(t, f)| (*t, (f + 1e-10).log10()))
        .collect();
    let slope = linear_slope(&log_flux);
    let peak = recent.iter().map(|p| p.1).fold(f64::MIN, f64::max);

    let mut boost = 1.0;
    if slope > 0.01 || peak > 1e-5 {
        boost += 0.5 * (slope / 0.01).max(0.0);
    }
    clamp_factor(boost)
}

/// Mean of the last 12 bulk speeds (km/s); linear from 500 (1.0) to 1000 (2.0).
pub fn solar_wind_speed(speeds_km_s: &[f64]) -> f64 {
    let valid: Vec<f64> = speeds_km_s.iter().copied().filter(|v| v.is_finite()).collect();
    let recent = &valid[valid.len().saturating_sub(12)..];
    if recent.is_empty() {
        return FACTOR_MIN;
    }
    let avg = recent.iter().sum::<f64>() / recent.len() as f64;
    if avg > 500.0 {
        clamp_factor(1.0 + (avg - 500.0) / 500.0)
    } else {
        FACTOR_MIN
    }
}

/// NOAA G-scale level for a planetary Kp value (G1 at Kp 5 … G5 at Kp 9).
pub fn g_level(kp: f64) -> u8 {
    if kp.is_finite() && kp >= 5.0 {
        ((kp - 4.0) as u8).min(5)
    } else {
        0
    }
}

/// +0.2 per G-level.
pub fn geomag_storm_level(kp: f64) -> f64 {
    clamp_factor(1.0 + 0.2 * g_level(kp) as f64)
}

/// Flare class of the strongest of the last ten flux readings.
pub fn flare_class(fluxes: &[f64]) -> f64 {
    let recent = &fluxes[fluxes.len().saturating_sub(10)..];
    let peak = recent
        .iter()
        .copied()
        .filter(|v| v.is_finite())
        .fold(f64::NEG_INFINITY, f64::max);
    if peak > 1e-4 {
        2.0
    } else if peak > 1e-5 {
        1.5
    } else if peak > 1e-6 {
        1.2
    } else {
        FACTOR_MIN
    }
}

/// Schumann resonance power relative to a baseline of 20.
pub fn resonance_power(power: f64) -> f64 {
    if power.is_finite() {
        clamp_factor(power / 20.0)
    } else {
        FACTOR_MIN
    }
}
