//! Energetic Instability Index and the SunWolf composite.
//!
//! These indices summarize recent seismic activity, solar wind and Kp into
//! scores in `[0, 1]`, from which a forecast [`ProxyVector`] is assembled.

use serde::{Deserialize, Serialize};

use crate::error::ForecastError;
use crate::proxy::ProxyVector;

/// Slow-wind reference speed (km/s) for the solar coupling term.
pub const PSI_REFERENCE_SPEED: f64 = 800.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Quake {
    pub magnitude: f64,
    pub depth_km: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum InstabilityPhase {
    Monitoring,
    Elevated,
    Active,
}

impl InstabilityPhase {
    pub fn from_eii(eii: f64) -> Self {
        if eii >= 0.85 {
            InstabilityPhase::Active
        } else if eii >= 0.6 {
            InstabilityPhase::Elevated
        } else {
            InstabilityPhase::Monitoring
        }
    }
}

/// Solar coupling `ψₛ = clamp(speed / 800, 0, 1)`.
pub fn psi_coupling(solar_wind_speed_km_s: f64) -> f64 {
    if !solar_wind_speed_km_s.is_finite() {
        return 0.0;
    }
    (solar_wind_speed_km_s / PSI_REFERENCE_SPEED).clamp(0.0, 1.0)
}

fn shallow_fraction(quakes: &[Quake], max_depth_km: f64) -> f64 {
    if quakes.is_empty() {
        return 0.0;
    }
    quakes.iter().filter(|q| q.depth_km < max_depth_km).count() as f64 / quakes.len() as f64
}

/// `clamp((0.25·mean_mag + 0.35·shallow₅ + 0.25·ψₛ + 0.15·Kp) / 2, 0, 1)`;
/// 0 for an empty catalogue. Shallow means depth under 5 km.
pub fn energetic_instability_index(quakes: &[Quake], psi_s: f64, kp: f64) -> f64 {
    if quakes.is_empty() {
        return 0.0;
    }
    let mag_mean = quakes.iter().map(|q| q.magnitude).sum::<f64>() / quakes.len() as f64;
    let shallow = shallow_fraction(quakes, 5.0);
    let raw = (mag_mean * 0.25 + shallow * 0.35 + psi_s * 0.25 + kp * 0.15) / 2.0;
    if raw.is_finite() {
        raw.clamp(0.0, 1.0)
    } else {
        0.0
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct SunWolf {
    pub eii: f64,
    pub elevated: bool,
    pub psi_scale: f64,
}

/// Crustal/volcanic composite: mean shallow (< 3 km) fraction of two
/// catalogues, scaled by up to 25% for geomagnetic activity.
pub fn sunwolf(crustal: &[Quake], volcanic: &[Quake], kp: f64) -> SunWolf {
    let kp = if kp.is_finite() { kp.max(0.0) } else { 0.0 };
    let base = 0.5 * (shallow_fraction(crustal, 3.0) + shallow_fraction(volcanic, 3.0));
    let eii = base * (1.0 + (kp / 7.0).min(0.25));
    SunWolf {
        eii,
        elevated: eii > 0.55,
        psi_scale: 1.0 + (kp / 28.0).min(0.25),
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct InstabilityReading {
    pub eii: f64,
    pub phase: InstabilityPhase,
    pub psi_s: f64,
    pub sunwolf: SunWolf,
}

impl InstabilityReading {
    pub fn compute(
        quakes: &[Quake],
        volcanic: &[Quake],
        solar_wind_speed_km_s: f64,
        kp: f64,
    ) -> Self {
        let psi_s = psi_coupling(solar_wind_speed_km_s);
        let kp_term = if kp.is_finite() { kp.max(0.0) } else { 0.0 };
        let eii = energetic_instability_index(quakes, psi_s, kp_term);
        Self {
            eii,
            phase: InstabilityPhase::from_eii(eii),
            psi_s,
            sunwolf: sunwolf(quakes, volcanic, kp_term),
        }
    }

    /// `[eii, ψₛ, min(sunwolf.eii, 1)]` as forecast proxies.
    pub fn proxy_vector(&self) -> Result<ProxyVector, ForecastError> {
        ProxyVector::new(vec![self.eii, self.psi_s, self.sunwolf.eii.clamp(0.0, 1.0)])
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn q(magnitude: f64, depth_km: f64) -> Quake {
        Quake { magnitude, depth_km }
    }

    #[test]
    fn test_psi_coupling_clamps() {
        assert_eq!(psi_coupling(400.0), 0.5);
        assert_eq!(psi_coupling(1200.0), 1.0);
        assert_eq!(psi_coupling(-5.0), 0.0);
        assert_eq!(psi_coupling(f64::NAN), 0.0);
    }

    #[test]
    fn test_eii_weighted_sum() {
        let quakes = [q(2.0, 1.0), q(4.0, 10.0)];
        // (3·0.25 + 0.5·0.35 + 0.5·0.25 + 2·0.15) / 2 = 0.675
        let eii = energetic_instability_index(&quakes, 0.5, 2.0);
        assert!((eii - 0.675).abs() < 1e-12, "{}", eii);
        assert_eq!(InstabilityPhase::from_eii(eii), InstabilityPhase::Elevated);
        assert_eq!(energetic_instability_index(&[], 1.0, 9.0), 0.0);
        assert_eq!(energetic_instability_index(&[q(9.0, 0.0)], 1.0, 9.0), 1.0);
    }

    #[test]
    fn test_phase_thresholds() {
        assert_eq!(InstabilityPhase::from_eii(0.59), InstabilityPhase::Monitoring);
        assert_eq!(InstabilityPhase::from_eii(0.6), InstabilityPhase::Elevated);
        assert_eq!(InstabilityPhase::from_eii(0.85), InstabilityPhase::Active);
    }

    #[test]
    fn test_sunwolf_kp_scaling() {
        let shallow = [q(3.0, 1.0), q(3.0, 2.0)];
        let deep = [q(3.0, 1.0), q(3.0, 30.0)];
        let sw = sunwolf(&shallow, &deep, 0.0);
        assert!((sw.eii - 0.75).abs() < 1e-12);
        assert!(sw.elevated);
        assert_eq!(sw.psi_scale, 1.0);
        // Kp 7 saturates both boosts
        let sw = sunwolf(&shallow, &deep, 7.0);
        assert!((sw.eii - 0.9375).abs() < 1e-12);
        assert!((sw.psi_scale - 1.25).abs() < 1e-12);
    }

    #[test]
    fn test_reading_builds_valid_proxies() {
        let quakes = [q(5.5, 2.0), q(4.0, 2.5), q(6.0, 40.0)];
        let reading = InstabilityReading::compute(&quakes, &quakes, 650.0, 6.0);
        let proxies = reading.proxy_vector().unwrap();
        assert_eq!(proxies.values().len(), 3);
        assert!(proxies.values().iter().all(|v| (0.0..=1.0).contains(v)));
        assert_eq!(proxies.values()[0], reading.eii);
    }
}
