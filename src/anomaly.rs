//! Low-pass the modulated signal and flag temporally clustered peaks.

use serde::Serialize;

use crate::config::AnomalyParams;
use crate::error::ForecastError;
use crate::filter::LowPass;
use crate::logging::{log_stage, Domain};
use crate::peaks::local_maxima;
use crate::series::TimeSeries;

#[derive(Debug, Clone, PartialEq)]
pub struct AnomalyReport {
    /// Zero-phase filtered signal on the input grid
    pub filtered: TimeSeries,
    /// Local maxima of `filtered`
    pub peaks: Vec<usize>,
    pub critical_triplet: bool,
}

/// Summary carried on a forecast result.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnomalySummary {
    pub filtered_peaks: Vec<usize>,
    pub critical_triplet: bool,
}

impl From<&AnomalyReport> for AnomalySummary {
    fn from(r: &AnomalyReport) -> Self {
        Self {
            filtered_peaks: r.peaks.clone(),
            critical_triplet: r.critical_triplet,
        }
    }
}

/// True when at least three peaks exist and the first three span no more
/// than `window` samples.
pub fn triplet_from_peaks(peaks: &[usize], window: usize) -> bool {
    match peaks {
        [first, _, third, ..] => third - first <= window,
        _ => false,
    }
}

/// Triplet test on an already filtered series.
pub fn critical_triplet(filtered: &[f64], window: usize) -> bool {
    triplet_from_peaks(&local_maxima(filtered), window)
}

pub fn detect(signal: &TimeSeries, params: &AnomalyParams) -> Result<AnomalyReport, ForecastError> {
    let lowpass = LowPass::design(params.filter_order, params.cutoff_ratio)?;
    let filtered = TimeSeries::new(signal.grid().clone(), lowpass.apply(signal.values())?);
    if let Some(index) = filtered.first_non_finite() {
        return Err(ForecastError::NumericalInstability {
            stage: "anomaly_filter",
            index,
            t: filtered.days()[index],
        });
    }

    let peaks = local_maxima(filtered.values());
    let critical_triplet = triplet_from_peaks(&peaks, params.triplet_window);

    log_stage(
        Domain::Anomaly,
        "detect",
        &[
            ("peaks", peaks.len() as f64),
            ("critical_triplet", if critical_triplet { 1.0 } else { 0.0 }),
            ("passthrough", if lowpass.is_passthrough() { 1.0 } else { 0.0 }),
        ],
    );

    Ok(AnomalyReport {
        filtered,
        peaks,
        critical_triplet,
    })
}
