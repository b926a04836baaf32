//! Error taxonomy for the forecasting pipeline.
//!
//! Fatal conditions abort `synthesize` and surface as [`ForecastError`].
//! Everything else degrades a single factor to its neutral value and is
//! recorded as a [`Diagnostic`] on the returned result.

use serde::ser::SerializeMap;
use serde::{Deserialize, Serialize, Serializer};
use std::fmt;

/// Hard failure of a forecast run. No `ForecastResult` is produced.
#[derive(Debug, Clone, PartialEq)]
pub enum ForecastError {
    /// Oscillator or combined signal produced a non-finite sample.
    NumericalInstability { stage: &'static str, index: usize, t: f64 },
    /// Caller violated an input contract.
    InvalidInput(String),
    /// Engine configuration failed validation.
    Config(String),
    /// A pipeline stage running on a worker task panicked or was cancelled.
    Worker(String),
}

impl fmt::Display for ForecastError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ForecastError::NumericalInstability { stage, index, t } => write!(
                f,
                "numerical instability in {} at sample {} (t={:.4})",
                stage, index, t
            ),
            ForecastError::InvalidInput(msg) => write!(f, "invalid input: {}", msg),
            ForecastError::Config(msg) => write!(f, "invalid config: {}", msg),
            ForecastError::Worker(msg) => write!(f, "pipeline worker failed: {}", msg),
        }
    }
}

impl std::error::Error for ForecastError {}

/// Non-fatal degradation notice accumulated into `ForecastResult::diagnostics`.
///
/// Serializes as `{"kind", "message", ..fields}` where `message` is the
/// [`Display`](fmt::Display) text; `message` is ignored when reading back.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    /// Fewer than two historical events survived the domain filter.
    DataInsufficient {
        domain: Option<String>,
        available: usize,
    },
    /// An indicator factor or ephemeris lookup was unavailable.
    ExternalFetch { source: String, detail: String },
    /// The amplification fit did not converge or was ill-conditioned.
    CalibrationFit { detail: String },
}

impl Diagnostic {
    pub fn kind(&self) -> &'static str {
        match self {
            Diagnostic::DataInsufficient { .. } => "data_insufficient",
            Diagnostic::ExternalFetch { .. } => "external_fetch",
            Diagnostic::CalibrationFit { .. } => "calibration_fit",
        }
    }

    pub fn external(source: impl Into<String>, detail: impl Into<String>) -> Self {
        Diagnostic::ExternalFetch {
            source: source.into(),
            detail: detail.into(),
        }
    }
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::DataInsufficient { domain, available } => write!(
                f,
                "insufficient historical data for domain {}: {} event(s), need 2; using neutral amplification",
                domain.as_deref().unwrap_or("<any>"),
                available
            ),
            Diagnostic::ExternalFetch { source, detail } => {
                write!(f, "{} unavailable ({}); using neutral value", source, detail)
            }
            Diagnostic::CalibrationFit { detail } => {
                write!(f, "resonance fit failed ({}); using neutral amplification", detail)
            }
        }
    }
}

impl Serialize for Diagnostic {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(None)?;
        map.serialize_entry("kind", self.kind())?;
        map.serialize_entry("message", &self.to_string())?;
        match self {
            Diagnostic::DataInsufficient { domain, available } => {
                map.serialize_entry("domain", domain)?;
                map.serialize_entry("available", available)?;
            }
            Diagnostic::ExternalFetch { source, detail } => {
                map.serialize_entry("source", source)?;
                map.serialize_entry("detail", detail)?;
            }
            Diagnostic::CalibrationFit { detail } => {
                map.serialize_entry("detail", detail)?;
            }
        }
        map.end()
    }
}
