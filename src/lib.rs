//! Sentinel resonance forecasting engine.
//!
//! A deterministic pipeline: a forced Duffing-type oscillator driven by the
//! folded proxy, modulated by ephemeris-derived tidal and alignment series,
//! a calibrated resonance amplification and space-weather indicator factors,
//! then low-pass filtered, tested for clustered peaks and integrated into a
//! forecast curve.

pub mod anomaly;
pub mod calibration;
pub mod config;
pub mod ephemeris;
pub mod error;
pub mod filter;
pub mod forecast;
pub mod indicators;
pub mod instability;
pub mod logging;
pub mod modulation;
pub mod oscillator;
pub mod peaks;
pub mod proxy;
pub mod series;

pub use config::EngineConfig;
pub use error::{Diagnostic, ForecastError};
pub use forecast::{ForecastEngine, ForecastInputs, ForecastRequest, ForecastResult};
