//! Forecast synthesis: oscillator → modulation → calibration → indicators →
//! anomaly test → cumulative forecast, peaks and sensitivity estimate.
//!
//! Every run is a pure function of its inputs and the engine config. The
//! tidal, alignment and indicator stages are independent of each other and
//! may run on worker tasks ([`ForecastEngine::synthesize_concurrent`]); the
//! result is the same either way.

use serde::{Deserialize, Serialize};
use serde_json::json;
use sha2::{Digest, Sha256};
use std::collections::BTreeMap;
use std::sync::Arc;
use std::time::Duration;

use crate::anomaly::{detect, AnomalySummary};
use crate::calibration::{calibrate, CalibrationModel, HistoricalEvent};
use crate::config::{EngineConfig, ForecastParams};
use crate::ephemeris::{JulianDate, KeplerianEphemeris};
use crate::error::{Diagnostic, ForecastError};
use crate::indicators::{aggregate, IndicatorFactors, IndicatorSource};
use crate::logging::{log_audit, log_stage, params_hash, v_num, Domain, ProfileScope};
use crate::modulation::{EphemerisModulator, Modulation, ModulationSource, UniformModulation};
use crate::oscillator::simulate;
use crate::peaks::find_peaks;
use crate::proxy::{FoldedProxy, ProxyVector};
use crate::series::{TimeGrid, TimeSeries};

// =============================================================================
// Inputs
// =============================================================================

/// Everything one forecast run depends on besides the engine config.
#[derive(Debug, Clone, PartialEq)]
pub struct ForecastInputs {
    pub proxies: ProxyVector,
    /// `None` skips calibration entirely; `Some(vec![])` records
    /// insufficient data.
    pub historical_events: Option<Vec<HistoricalEvent>>,
    pub domain: Option<String>,
    pub start: JulianDate,
    pub horizon_days: f64,
    pub sample_count: usize,
    /// Indicator factor name → value; absent names read as 1.0.
    pub extra_factors: BTreeMap<String, f64>,
    /// Notices from fetching indicator readings before the run.
    pub fetch_diagnostics: Vec<Diagnostic>,
}

impl ForecastInputs {
    /// Default horizon and sample count, no events and neutral factors.
    pub fn new(proxies: ProxyVector, start: JulianDate) -> Self {
        let d = ForecastParams::default();
        Self {
            proxies,
            historical_events: None,
            domain: None,
            start,
            horizon_days: d.horizon_days,
            sample_count: d.sample_count,
            extra_factors: BTreeMap::new(),
            fetch_diagnostics: Vec::new(),
        }
    }

    pub fn with_events(mut self, events: Vec<HistoricalEvent>, domain: Option<&str>) -> Self {
        self.historical_events = Some(events);
        self.domain = domain.map(str::to_string);
        self
    }

    pub fn with_horizon(mut self, horizon_days: f64, sample_count: usize) -> Self {
        self.horizon_days = horizon_days;
        self.sample_count = sample_count;
        self
    }

    pub fn with_factor(mut self, name: &str, value: f64) -> Self {
        self.extra_factors.insert(name.to_string(), value);
        self
    }

    /// Merge factors from [`ForecastEngine::fetch_indicators`]; fetched
    /// values replace same-named entries.
    pub fn with_fetched(mut self, fetched: (IndicatorFactors, Vec<Diagnostic>)) -> Self {
        let (factors, diagnostics) = fetched;
        for (kind, value) in factors.iter() {
            self.extra_factors.insert(kind.as_str().to_string(), value);
        }
        self.fetch_diagnostics.extend(diagnostics);
        self
    }

    /// SHA-256 over the canonical JSON form of the inputs.
    pub fn input_hash(&self) -> String {
        let value = json!({
            "proxies": self.proxies.values(),
            "historical_events": self.historical_events,
            "domain": self.domain,
            "start_jd": self.start.0,
            "horizon_days": self.horizon_days,
            "sample_count": self.sample_count,
            "extra_factors": self.extra_factors,
        });
        params_hash(&value.to_string())
    }
}

/// JSON request accepted by the command-line front end.
#[derive(Debug, Clone, Deserialize)]
pub struct ForecastRequest {
    pub proxies: ProxyVector,
    #[serde(default)]
    pub historical_events: Option<Vec<HistoricalEvent>>,
    #[serde(default)]
    pub domain: Option<String>,
    pub start_date: String,
    #[serde(default)]
    pub horizon_days: Option<f64>,
    #[serde(default)]
    pub sample_count: Option<usize>,
    #[serde(default)]
    pub extra_factors: BTreeMap<String, f64>,
}

impl ForecastRequest {
    /// Resolve the start date and fill unset sizes from `defaults`.
    pub fn into_inputs(self, defaults: &ForecastParams) -> Result<ForecastInputs, ForecastError> {
        Ok(ForecastInputs {
            proxies: self.proxies,
            historical_events: self.historical_events,
            domain: self.domain,
            start: JulianDate::parse_iso(&self.start_date)?,
            horizon_days: self.horizon_days.unwrap_or(defaults.horizon_days),
            sample_count: self.sample_count.unwrap_or(defaults.sample_count),
            extra_factors: self.extra_factors,
            fetch_diagnostics: Vec::new(),
        })
    }
}

// =============================================================================
// Result
// =============================================================================

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct ForecastResult {
    pub time_grid: Vec<f64>,
    pub forecast_values: Vec<f64>,
    pub peak_indices: Vec<usize>,
    pub critical_triplet_alert: bool,
    pub lyapunov_estimate: f64,
    pub diagnostics: Vec<Diagnostic>,
    pub folded_proxy: f64,
    pub calibration: CalibrationModel,
    pub anomaly: AnomalySummary,
    pub filtered_signal: Vec<f64>,
    pub config_fingerprint: String,
}

impl ForecastResult {
    pub fn is_degraded(&self) -> bool {
        !self.diagnostics.is_empty()
    }

    /// Hex SHA-256 over the exact bit patterns of every field.
    pub fn digest(&self) -> String {
        let mut h = Sha256::new();
        let mut floats = |label: &[u8], xs: &[f64]| {
            h.update(label);
            h.update((xs.len() as u64).to_le_bytes());
            for x in xs {
                h.update(x.to_bits().to_le_bytes());
            }
        };
        floats(b"grid", &self.time_grid);
        floats(b"forecast", &self.forecast_values);
        floats(b"filtered", &self.filtered_signal);
        floats(
            b"scalars",
            &[
                self.lyapunov_estimate,
                self.folded_proxy,
                self.calibration.a,
                self.calibration.b,
            ],
        );
        h.update(b"peaks");
        for p in self.peak_indices.iter().chain(&self.anomaly.filtered_peaks) {
            h.update((*p as u64).to_le_bytes());
        }
        h.update([self.critical_triplet_alert as u8]);
        for d in &self.diagnostics {
            h.update(serde_json::to_string(d).unwrap_or_default().as_bytes());
        }
        h.update(self.config_fingerprint.as_bytes());
        hex::encode(h.finalize())
    }
}

// =============================================================================
// Numeric helpers
// =============================================================================

/// `mean(ln(|Δ²f| + ε))`; 0.0 with fewer than three samples.
pub fn lyapunov_estimate(values: &[f64], epsilon: f64) -> f64 {
    if values.len() < 3 {
        return 0.0;
    }
    let logs: Vec<f64> = values
        .windows(3)
        .map(|w| ((w[2] - 2.0 * w[1] + w[0]).abs() + epsilon).ln())
        .collect();
    logs.iter().sum::<f64>() / logs.len() as f64
}

fn cumulative_sum(values: &[f64]) -> Vec<f64> {
    values
        .iter()
        .scan(0.0, |acc, v| {
            *acc += v;
            Some(*acc)
        })
        .collect()
}

fn ensure_finite(series: &TimeSeries, stage: &'static str) -> Result<(), ForecastError> {
    match series.first_non_finite() {
        Some(index) => Err(ForecastError::NumericalInstability {
            stage,
            index,
            t: series.days()[index],
        }),
        None => Ok(()),
    }
}

fn ensure_on_grid(m: &Modulation, grid: &TimeGrid, what: &str) -> Result<(), ForecastError> {
    if m.series.len() != grid.len() {
        return Err(ForecastError::InvalidInput(format!(
            "{} series has {} samples, grid has {}",
            what,
            m.series.len(),
            grid.len()
        )));
    }
    Ok(())
}

// =============================================================================
// Engine
// =============================================================================

/// Independent lookups joined before the signal is assembled.
struct Lookups {
    tidal: Modulation,
    alignment: Modulation,
    factors: IndicatorFactors,
    factor_diagnostics: Vec<Diagnostic>,
}

#[derive(Clone)]
pub struct ForecastEngine {
    config: Arc<EngineConfig>,
    modulation: Arc<dyn ModulationSource>,
}

impl ForecastEngine {
    pub fn new(
        config: EngineConfig,
        modulation: Arc<dyn ModulationSource>,
    ) -> Result<Self, ForecastError> {
        config.validate()?;
        Ok(Self {
            config: Arc::new(config),
            modulation,
        })
    }

    /// Modulation from the built-in analytic ephemeris.
    pub fn with_ephemeris(config: EngineConfig) -> Result<Self, ForecastError> {
        let modulator = EphemerisModulator::new(KeplerianEphemeris::new(), config.ephemeris.clone());
        Self::new(config, Arc::new(modulator))
    }

    /// Tidal and alignment factors fixed at 1.0.
    pub fn uniform(config: EngineConfig) -> Result<Self, ForecastError> {
        Self::new(config, Arc::new(UniformModulation))
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// Poll indicator sources with the configured timeout.
    pub async fn fetch_indicators(
        &self,
        sources: &[Box<dyn IndicatorSource>],
    ) -> (IndicatorFactors, Vec<Diagnostic>) {
        let timeout = Duration::from_millis(self.config.indicators.fetch_timeout_ms);
        aggregate(sources, timeout).await
    }

    pub fn synthesize(&self, inputs: &ForecastInputs) -> Result<ForecastResult, ForecastError> {
        let _profile = ProfileScope::with_context(
            "forecast.synthesize",
            &[("samples", v_num(inputs.sample_count as f64))],
        );
        let (folded, raw) = self.oscillate(inputs)?;
        let grid = raw.grid().clone();

        let tidal = self.modulation.tidal(&grid, inputs.start);
        let alignment = self.modulation.alignment(&grid, inputs.start);
        let (factors, factor_diagnostics) = IndicatorFactors::from_map(&inputs.extra_factors);

        self.assemble(
            inputs,
            folded,
            raw,
            Lookups {
                tidal,
                alignment,
                factors,
                factor_diagnostics,
            },
        )
    }

    /// Same result as [`synthesize`](Self::synthesize), with the tidal,
    /// alignment and indicator stages on blocking worker tasks.
    pub async fn synthesize_concurrent(
        &self,
        inputs: &ForecastInputs,
    ) -> Result<ForecastResult, ForecastError> {
        let _profile = ProfileScope::new("forecast.synthesize_concurrent");
        let (folded, raw) = self.oscillate(inputs)?;
        let grid = raw.grid().clone();
        let start = inputs.start;

        let tidal = tokio::task::spawn_blocking({
            let m = Arc::clone(&self.modulation);
            let g = grid.clone();
            move || m.tidal(&g, start)
        });
        let alignment = tokio::task::spawn_blocking({
            let m = Arc::clone(&self.modulation);
            let g = grid.clone();
            move || m.alignment(&g, start)
        });
        let factors = tokio::task::spawn_blocking({
            let map = inputs.extra_factors.clone();
            move || IndicatorFactors::from_map(&map)
        });

        let (tidal, alignment, factors) = tokio::join!(tidal, alignment, factors);
        let worker = |e: tokio::task::JoinError| ForecastError::Worker(e.to_string());
        let (factors, factor_diagnostics) = factors.map_err(worker)?;

        self.assemble(
            inputs,
            folded,
            raw,
            Lookups {
                tidal: tidal.map_err(worker)?,
                alignment: alignment.map_err(worker)?,
                factors,
                factor_diagnostics,
            },
        )
    }

    /// Steps 1 and 2: fold the proxies and run the oscillator.
    fn oscillate(&self, inputs: &ForecastInputs) -> Result<(FoldedProxy, TimeSeries), ForecastError> {
        let folded = inputs.proxies.fold();
        let raw = simulate(
            folded,
            inputs.horizon_days,
            inputs.sample_count,
            &self.config.oscillator,
        )?;
        Ok((folded, raw))
    }

    fn assemble(
        &self,
        inputs: &ForecastInputs,
        folded: FoldedProxy,
        raw: TimeSeries,
        lookups: Lookups,
    ) -> Result<ForecastResult, ForecastError> {
        let cfg = &self.config;
        let grid = raw.grid().clone();
        let fp = folded.value();
        ensure_on_grid(&lookups.tidal, &grid, "tidal")?;
        ensure_on_grid(&lookups.alignment, &grid, "alignment")?;

        let mut diagnostics = Vec::new();
        diagnostics.extend(lookups.tidal.diagnostics);
        diagnostics.extend(lookups.alignment.diagnostics);

        // Envelope and ephemeris modulation
        let decay = cfg.envelope.decay_rate;
        let mut modulated = raw
            .map(|t, x| x * (-decay * t).exp())
            .mul(&lookups.tidal.series)
            .mul(&lookups.alignment.series);

        // Resonance amplification
        let calibration = match &inputs.historical_events {
            Some(events) => {
                let magnitude = modulated.values().iter().fold(0.0f64, |m, v| m.max(v.abs()));
                let c = calibrate(events, inputs.domain.as_deref(), &cfg.calibration)
                    .bounded_at(fp, magnitude);
                if let Some(d) = c.diagnostic() {
                    diagnostics.push(d.clone());
                }
                let model = c.model();
                modulated = modulated.scale(model.amplification(fp));
                model
            }
            None => CalibrationModel::NEUTRAL,
        };

        // Indicator factors
        diagnostics.extend(inputs.fetch_diagnostics.iter().cloned());
        diagnostics.extend(lookups.factor_diagnostics);
        modulated = modulated.scale(lookups.factors.product());
        ensure_finite(&modulated, "modulation")?;

        let anomaly = detect(&modulated, &cfg.anomaly)?;

        let growth = cfg.envelope.growth_rate;
        let forecast = TimeSeries::new(grid.clone(), cumulative_sum(modulated.values()))
            .map(|t, c| c * fp * (growth * t).exp());
        ensure_finite(&forecast, "forecast")?;

        let peak_indices = find_peaks(forecast.values(), cfg.forecast.peak_prominence);
        let lyapunov = lyapunov_estimate(forecast.values(), cfg.forecast.lyapunov_epsilon);

        log_stage(
            Domain::Forecast,
            "synthesized",
            &[
                ("folded_proxy", fp),
                ("samples", grid.len() as f64),
                ("peaks", peak_indices.len() as f64),
                ("lyapunov", lyapunov),
                ("diagnostics", diagnostics.len() as f64),
            ],
        );

        let result = ForecastResult {
            time_grid: grid.days().to_vec(),
            forecast_values: forecast.into_values(),
            peak_indices,
            critical_triplet_alert: anomaly.critical_triplet,
            lyapunov_estimate: lyapunov,
            diagnostics,
            folded_proxy: fp,
            calibration,
            anomaly: AnomalySummary::from(&anomaly),
            filtered_signal: anomaly.filtered.into_values(),
            config_fingerprint: cfg.fingerprint(),
        };
        log_audit(
            "forecast",
            &result.config_fingerprint,
            &inputs.input_hash(),
            &result.digest(),
        );
        Ok(result)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::indicators::IndicatorKind;

    fn engine() -> ForecastEngine {
        ForecastEngine::uniform(EngineConfig::default()).unwrap()
    }

    fn inputs(proxies: Vec<f64>) -> ForecastInputs {
        ForecastInputs::new(
            ProxyVector::new(proxies).unwrap(),
            JulianDate::parse_iso("2024-03-20").unwrap(),
        )
    }

    fn event(proxy: f64, outcome: f64) -> HistoricalEvent {
        HistoricalEvent {
            proxy,
            outcome,
            event_count: 1,
            domain: "seismic".to_string(),
            distance: 0.0,
            aux_power: 0.0,
        }
    }

    #[test]
    fn test_lyapunov_estimate() {
        assert_eq!(lyapunov_estimate(&[1.0, 2.0], 1e-10), 0.0);
        // second differences all 1 → ln(1 + ε)
        let quad = [0.0, 0.5, 2.0, 4.5, 8.0];
        let est = lyapunov_estimate(&quad, 1e-10);
        assert!(est.abs() < 1e-9);
        // linear series → ln(ε)
        let lin = [0.0, 1.0, 2.0, 3.0];
        assert!((lyapunov_estimate(&lin, 1e-10) - 1e-10f64.ln()).abs() < 1e-6);
    }

    #[test]
    fn test_cumulative_sum() {
        assert_eq!(cumulative_sum(&[1.0, 2.0, 3.0]), vec![1.0, 3.0, 6.0]);
        assert!(cumulative_sum(&[]).is_empty());
    }

    #[test]
    fn test_shapes_and_grid() {
        let r = engine().synthesize(&inputs(vec![0.75, 0.70])).unwrap();
        assert_eq!(r.time_grid.len(), 100);
        assert_eq!(r.forecast_values.len(), 100);
        assert_eq!(r.filtered_signal.len(), 100);
        assert_eq!(r.time_grid[99], 10.0);
        assert!((r.folded_proxy - 0.725).abs() < 1e-15);
        assert!(r.diagnostics.is_empty());
        assert_eq!(r.calibration, CalibrationModel::NEUTRAL);
    }

    #[test]
    fn test_zero_proxy_gives_flat_zero_forecast() {
        let r = engine().synthesize(&inputs(vec![0.0, 0.0])).unwrap();
        assert!(r.forecast_values.iter().all(|v| *v == 0.0));
        assert!(r.peak_indices.is_empty());
        assert!(!r.critical_triplet_alert);
    }

    #[test]
    fn test_indicator_factors_scale_forecast_linearly() {
        let base = engine().synthesize(&inputs(vec![0.5])).unwrap();
        let boosted = engine()
            .synthesize(&inputs(vec![0.5]).with_factor(IndicatorKind::FlareClass.as_str(), 1.5))
            .unwrap();
        for (b, x) in base.forecast_values.iter().zip(&boosted.forecast_values) {
            assert!((x - 1.5 * b).abs() <= 1e-12 * b.abs().max(1.0));
        }
    }

    #[test]
    fn test_empty_events_degrade_with_diagnostic() {
        let r = engine()
            .synthesize(&inputs(vec![0.6]).with_events(vec![], Some("seismic")))
            .unwrap();
        assert_eq!(r.calibration, CalibrationModel::NEUTRAL);
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(r.diagnostics[0].kind(), "data_insufficient");
        assert!(r.is_degraded());
    }

    #[test]
    fn test_diagnostics_follow_pipeline_order() {
        let r = engine()
            .synthesize(
                &inputs(vec![0.6])
                    .with_events(vec![event(0.5, 1.0)], None)
                    .with_factor("unknownFactor", 1.3),
            )
            .unwrap();
        let kinds: Vec<&str> = r.diagnostics.iter().map(|d| d.kind()).collect();
        assert_eq!(kinds, vec!["data_insufficient", "external_fetch"]);
    }

    #[test]
    fn test_fitted_calibration_amplifies() {
        let events: Vec<HistoricalEvent> = [0.1, 0.3, 0.5, 0.7, 0.9]
            .iter()
            .map(|&x| event(x, 2.0 * (0.5 * x).exp()))
            .collect();
        let base = engine().synthesize(&inputs(vec![0.4])).unwrap();
        let r = engine()
            .synthesize(&inputs(vec![0.4]).with_events(events, Some("seismic")))
            .unwrap();
        assert!((r.calibration.a - 2.0).abs() < 1e-6);
        assert!((r.calibration.b - 0.5).abs() < 1e-6);
        let amp = r.calibration.amplification(0.4);
        let i = 50;
        assert!((r.forecast_values[i] - amp * base.forecast_values[i]).abs() < 1e-9);
    }

    #[test]
    fn test_overflowing_calibration_falls_back_to_neutral() {
        let events: Vec<HistoricalEvent> = [0.1, 0.2, 0.3, 0.4, 0.5]
            .iter()
            .map(|&x| event(x, (1000.0 * x).exp()))
            .collect();
        let base = engine().synthesize(&inputs(vec![0.9])).unwrap();
        let r = engine()
            .synthesize(&inputs(vec![0.9]).with_events(events, Some("seismic")))
            .unwrap();
        assert_eq!(r.calibration, CalibrationModel::NEUTRAL);
        assert_eq!(r.diagnostics.len(), 1);
        assert_eq!(r.diagnostics[0].kind(), "calibration_fit");
        assert_eq!(r.forecast_values, base.forecast_values);
    }

    #[test]
    fn test_invalid_horizon_is_fatal() {
        let err = engine()
            .synthesize(&inputs(vec![0.5]).with_horizon(0.0, 100))
            .unwrap_err();
        assert!(matches!(err, ForecastError::InvalidInput(_)));
        let err = engine()
            .synthesize(&inputs(vec![0.5]).with_horizon(10.0, 1))
            .unwrap_err();
        assert!(matches!(err, ForecastError::InvalidInput(_)));
    }

    #[test]
    fn test_digest_is_stable_and_sensitive() {
        let a = engine().synthesize(&inputs(vec![0.3, 0.9])).unwrap();
        let b = engine().synthesize(&inputs(vec![0.3, 0.9])).unwrap();
        let c = engine().synthesize(&inputs(vec![0.3, 0.8])).unwrap();
        assert_eq!(a.digest(), b.digest());
        assert_ne!(a.digest(), c.digest());
        assert_eq!(a.digest().len(), 64);
    }

    #[test]
    fn test_request_fills_defaults() {
        let req: ForecastRequest = serde_json::from_str(
            r#"{"proxies":[0.75,0.7],"start_date":"2024-03-20","extra_factors":{"flareClass":1.2}}"#,
        )
        .unwrap();
        let inputs = req.into_inputs(&ForecastParams::default()).unwrap();
        assert_eq!(inputs.sample_count, 100);
        assert_eq!(inputs.horizon_days, 10.0);
        assert!(inputs.historical_events.is_none());
        assert_eq!(inputs.extra_factors.get("flareClass"), Some(&1.2));

        let bad: Result<ForecastRequest, _> =
            serde_json::from_str(r#"{"proxies":[1.5],"start_date":"2024-03-20"}"#);
        assert!(bad.is_err());
    }

    #[tokio::test]
    async fn test_concurrent_matches_sequential() {
        let eng = engine();
        let inp = inputs(vec![0.75, 0.70]).with_factor("resonancePower", 1.4);
        let seq = eng.synthesize(&inp).unwrap();
        let par = eng.synthesize_concurrent(&inp).await.unwrap();
        assert_eq!(seq, par);
        assert_eq!(seq.digest(), par.digest());
    }
}
