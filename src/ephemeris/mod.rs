//! Celestial reference data and ephemeris lookups.
//!
//! Positions are heliocentric ecliptic (J2000) vectors in astronomical units.
//! Only differences and angles between positions are consumed downstream, so
//! the choice of origin and frame does not leak out of this module.

pub mod kepler;

use chrono::{DateTime, NaiveDate, NaiveDateTime};
use std::fmt;
use std::ops::{Add, Sub};

use crate::error::ForecastError;

pub use kepler::KeplerianEphemeris;

pub const GRAVITATIONAL_CONSTANT: f64 = 6.67430e-11;
pub const EARTH_RADIUS_M: f64 = 6_371e3;
pub const AU_M: f64 = 1.495_978_707e11;
pub const EARTH_MASS_KG: f64 = 5.972e24;
pub const MOON_MASS_KG: f64 = 7.342e22;

// =============================================================================
// Vectors and time
// =============================================================================

#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct Vec3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Vec3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    pub fn scale(self, k: f64) -> Self {
        Self::new(self.x * k, self.y * k, self.z * k)
    }

    pub fn dot(self, o: Vec3) -> f64 {
        self.x * o.x + self.y * o.y + self.z * o.z
    }

    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Angle to `o` in degrees, `[0, 180]`.
    pub fn angle_deg(self, o: Vec3) -> f64 {
        let denom = self.norm() * o.norm();
        if denom == 0.0 {
            return 0.0;
        }
        (self.dot(o) / denom).clamp(-1.0, 1.0).acos().to_degrees()
    }

    pub fn is_finite(self) -> bool {
        self.x.is_finite() && self.y.is_finite() && self.z.is_finite()
    }
}

impl Add for Vec3 {
    type Output = Vec3;
    fn add(self, o: Vec3) -> Vec3 {
        Vec3::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }
}

impl Sub for Vec3 {
    type Output = Vec3;
    fn sub(self, o: Vec3) -> Vec3 {
        Vec3::new(self.x - o.x, self.y - o.y, self.z - o.z)
    }
}

/// Julian date (UT, treated as TT; the difference is far below model accuracy).
#[derive(Debug, Clone, Copy, PartialEq, PartialOrd)]
pub struct JulianDate(pub f64);

impl JulianDate {
    pub const J2000: f64 = 2_451_545.0;

    pub fn from_datetime(dt: NaiveDateTime) -> Self {
        let epoch = NaiveDate::from_ymd_opt(2000, 1, 1)
            .and_then(|d| d.and_hms_opt(12, 0, 0))
            .unwrap_or_default();
        let ms = (dt - epoch).num_milliseconds() as f64;
        JulianDate(Self::J2000 + ms / 86_400_000.0)
    }

    /// Accepts `YYYY-MM-DD`, `YYYY-MM-DDTHH:MM:SS` or an RFC 3339 timestamp.
    pub fn parse_iso(s: &str) -> Result<Self, ForecastError> {
        let s = s.trim();
        if let Ok(dt) = DateTime::parse_from_rfc3339(s) {
            return Ok(Self::from_datetime(dt.naive_utc()));
        }
        if let Ok(dt) = NaiveDateTime::parse_from_str(s, "%Y-%m-%dT%H:%M:%S") {
            return Ok(Self::from_datetime(dt));
        }
        NaiveDate::parse_from_str(s, "%Y-%m-%d")
            .ok()
            .and_then(|d| d.and_hms_opt(0, 0, 0))
            .map(Self::from_datetime)
            .ok_or_else(|| ForecastError::InvalidInput(format!("unparsable start date '{}'", s)))
    }

    pub fn plus_days(self, days: f64) -> Self {
        JulianDate(self.0 + days)
    }

    /// Julian centuries since J2000.0.
    pub fn centuries(self) -> f64 {
        (self.0 - Self::J2000) / 36_525.0
    }
}

// =============================================================================
// Bodies
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub struct CelestialBody {
    pub name: String,
    pub mass_kg: f64,
}

const BODY_MASSES: &[(&str, f64)] = &[
    ("sun", 1.989e30),
    ("mercury", 3.301e23),
    ("venus", 4.867e24),
    ("earth", EARTH_MASS_KG),
    ("moon", MOON_MASS_KG),
    ("mars", 6.417e23),
    ("jupiter", 1.898e27),
    ("saturn", 5.683e26),
    ("uranus", 8.681e25),
    ("neptune", 1.024e26),
];

impl CelestialBody {
    pub fn new(name: impl Into<String>, mass_kg: f64) -> Self {
        Self {
            name: name.into(),
            mass_kg,
        }
    }

    /// Catalog lookup by case-insensitive name.
    pub fn named(name: &str) -> Option<Self> {
        let key = name.trim().to_lowercase();
        BODY_MASSES
            .iter()
            .find(|(n, _)| *n == key)
            .map(|(n, m)| Self::new(*n, *m))
    }
}

// =============================================================================
// Lookups
// =============================================================================

#[derive(Debug, Clone, PartialEq)]
pub enum EphemerisError {
    UnknownBody(String),
    Unavailable { body: String, detail: String },
}

impl fmt::Display for EphemerisError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            EphemerisError::UnknownBody(b) => write!(f, "unknown body '{}'", b),
            EphemerisError::Unavailable { body, detail } => {
                write!(f, "position of '{}' unavailable: {}", body, detail)
            }
        }
    }
}

impl std::error::Error for EphemerisError {}

/// Position-at-time capability; lookups may fail independently per body.
pub trait Ephemeris: Send + Sync {
    fn position(&self, body: &str, jd: JulianDate) -> Result<Vec3, EphemerisError>;
}
