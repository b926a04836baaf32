//! Low-precision analytic ephemeris.
//!
//! Planets use the JPL mean orbital elements valid 1800–2050 (arc-minute
//! accuracy). The Moon uses the truncated Astronomical Almanac series for
//! geocentric longitude, latitude and horizontal parallax (a few tenths of a
//! degree). Earth is recovered from the Earth–Moon barycentre.

use super::{
    Ephemeris, EphemerisError, JulianDate, Vec3, AU_M, EARTH_MASS_KG, MOON_MASS_KG,
};

/// Mean elements at J2000 and their rates per Julian century.
#[derive(Debug, Clone, Copy)]
struct OrbitalElements {
    /// semi-major axis (AU)
    a: [f64; 2],
    /// eccentricity
    e: [f64; 2],
    /// inclination (deg)
    i: [f64; 2],
    /// mean longitude (deg)
    l: [f64; 2],
    /// longitude of perihelion (deg)
    peri: [f64; 2],
    /// longitude of ascending node (deg)
    node: [f64; 2],
}

const MERCURY: OrbitalElements = OrbitalElements {
    a: [0.38709927, 0.00000037],
    e: [0.20563593, 0.00001906],
    i: [7.00497902, -0.00594749],
    l: [252.25032350, 149472.67411175],
    peri: [77.45779628, 0.16047689],
    node: [48.33076593, -0.12534081],
};

const VENUS: OrbitalElements = OrbitalElements {
    a: [0.72333566, 0.00000390],
    e: [0.00677672, -0.00004107],
    i: [3.39467605, -0.00078890],
    l: [181.97909950, 58517.81538729],
    peri: [131.60246718, 0.00268329],
    node: [76.67984255, -0.27769418],
};

const EM_BARYCENTER: OrbitalElements = OrbitalElements {
    a: [1.00000261, 0.00000562],
    e: [0.01671123, -0.00004392],
    i: [-0.00001531, -0.01294668],
    l: [100.46457166, 35999.37244981],
    peri: [102.93768193, 0.32327364],
    node: [0.0, 0.0],
};

const MARS: OrbitalElements = OrbitalElements {
    a: [1.52371034, 0.00001847],
    e: [0.09339410, 0.00007882],
    i: [1.84969142, -0.00813131],
    l: [-4.55343205, 19140.30268499],
    peri: [-23.94362959, 0.44441088],
    node: [49.55953891, -0.29257343],
};

const JUPITER: OrbitalElements = OrbitalElements {
    a: [5.20288700, -0.00011607],
    e: [0.04838624, -0.00013253],
    i: [1.30439695, -0.00183714],
    l: [34.39644051, 3034.74612775],
    peri: [14.72847983, 0.21252668],
    node: [100.47390909, 0.20469106],
};

const SATURN: OrbitalElements = OrbitalElements {
    a: [9.53667594, -0.00125060],
    e: [0.05386179, -0.00050991],
    i: [2.48599187, 0.00193609],
    l: [49.95424423, 1222.49362201],
    peri: [92.59887831, -0.41897216],
    node: [113.66242448, -0.28867794],
};

const URANUS: OrbitalElements = OrbitalElements {
    a: [19.18916464, -0.00196176],
    e: [0.04725744, -0.00004397],
    i: [0.77263783, -0.00242939],
    l: [313.23810451, 428.48202785],
    peri: [170.95427630, 0.40805281],
    node: [74.01692503, 0.04240589],
};

const NEPTUNE: OrbitalElements = OrbitalElements {
    a: [30.06992276, 0.00026291],
    e: [0.00859048, 0.00005105],
    i: [1.77004347, 0.00035372],
    l: [-55.12002969, 218.45945325],
    peri: [44.96476227, -0.32241464],
    node: [131.78422574, -0.00508664],
};

const EARTH_RADIUS_KM: f64 = 6_378.14;
const MOON_MASS_RATIO: f64 = MOON_MASS_KG / (EARTH_MASS_KG + MOON_MASS_KG);

fn wrap_180(deg: f64) -> f64 {
    let r = deg.rem_euclid(360.0);
    if r > 180.0 {
        r - 360.0
    } else {
        r
    }
}

/// Solve `E − e·sin E = M` (radians) by Newton iteration.
fn eccentric_anomaly(m: f64, e: f64) -> f64 {
    let mut ecc = m + e * m.sin();
    for _ in 0..30 {
        let delta = (ecc - e * ecc.sin() - m) / (1.0 - e * ecc.cos());
        ecc -= delta;
        if delta.abs() < 1e-14 {
            break;
        }
    }
    ecc
}

impl OrbitalElements {
    fn heliocentric(&self, t: f64) -> Vec3 {
        let at = |el: [f64; 2]| el[0] + el[1] * t;
        let a = at(self.a);
        let e = at(self.e);
        let incl = at(self.i).to_radians();
        let l = at(self.l);
        let peri = at(self.peri);
        let node = at(self.node);

        let omega = (peri - node).to_radians();
        let node = node.to_radians();
        let m = wrap_180(l - peri).to_radians();
        let ecc = eccentric_anomaly(m, e);

        let xp = a * (ecc.cos() - e);
        let yp = a * (1.0 - e * e).sqrt() * ecc.sin();

        let (so, co) = omega.sin_cos();
        let (sn, cn) = node.sin_cos();
        let (si, ci) = incl.sin_cos();
        Vec3::new(
            (co * cn - so * sn * ci) * xp + (-so * cn - co * sn * ci) * yp,
            (co * sn + so * cn * ci) * xp + (-so * sn + co * cn * ci) * yp,
            (so * si) * xp + (co * si) * yp,
        )
    }
}

fn sin_deg(d: f64) -> f64 {
    d.to_radians().sin()
}

fn cos_deg(d: f64) -> f64 {
    d.to_radians().cos()
}

/// Geocentric ecliptic Moon position in AU.
fn moon_geocentric(t: f64) -> Vec3 {
    let lambda = 218.32 + 481_267.881 * t
        + 6.29 * sin_deg(135.0 + 477_198.87 * t)
        - 1.27 * sin_deg(259.3 - 413_335.36 * t)
        + 0.66 * sin_deg(235.7 + 890_534.22 * t)
        + 0.21 * sin_deg(269.9 + 954_397.74 * t)
        - 0.19 * sin_deg(357.5 + 35_999.05 * t)
        - 0.11 * sin_deg(186.5 + 966_404.03 * t);
    let beta = 5.13 * sin_deg(93.3 + 483_202.02 * t)
        + 0.28 * sin_deg(228.2 + 960_400.89 * t)
        - 0.28 * sin_deg(318.3 + 6_003.15 * t)
        - 0.17 * sin_deg(217.6 - 407_332.21 * t);
    let parallax = 0.9508
        + 0.0518 * cos_deg(135.0 + 477_198.87 * t)
        + 0.0095 * cos_deg(259.3 - 413_335.36 * t)
        + 0.0078 * cos_deg(235.7 + 890_534.22 * t)
        + 0.0028 * cos_deg(269.9 + 954_397.74 * t);

    let r_au = EARTH_RADIUS_KM / sin_deg(parallax) * 1_000.0 / AU_M;
    let (cb, sb) = (cos_deg(beta), sin_deg(beta));
    Vec3::new(
        r_au * cb * cos_deg(lambda),
        r_au * cb * sin_deg(lambda),
        r_au * sb,
    )
}

/// Analytic ephemeris for the Sun, Moon and the eight planets.
#[derive(Debug, Clone, Copy, Default)]
pub struct KeplerianEphemeris;

impl KeplerianEphemeris {
    pub fn new() -> Self {
        Self
    }

    fn earth(t: f64) -> Vec3 {
        EM_BARYCENTER.heliocentric(t) - moon_geocentric(t).scale(MOON_MASS_RATIO)
    }
}

impl Ephemeris for KeplerianEphemeris {
    fn position(&self, body: &str, jd: JulianDate) -> Result<Vec3, EphemerisError> {
        if !jd.0.is_finite() {
            return Err(EphemerisError::Unavailable {
                body: body.to_string(),
                detail: "non-finite epoch".to_string(),
            });
        }
        let t = jd.centuries();
        let pos = match body.trim().to_lowercase().as_str() {
            "sun" => Vec3::default(),
            "mercury" => MERCURY.heliocentric(t),
            "venus" => VENUS.heliocentric(t),
            "earth" => Self::earth(t),
            "moon" => Self::earth(t) + moon_geocentric(t),
            "mars" => MARS.heliocentric(t),
            "jupiter" => JUPITER.heliocentric(t),
            "saturn" => SATURN.heliocentric(t),
            "uranus" => URANUS.heliocentric(t),
            "neptune" => NEPTUNE.heliocentric(t),
            _ => return Err(EphemerisError::UnknownBody(body.to_string())),
        };
        Ok(pos)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn geo_distance_au(body: &str, date: &str) -> f64 {
        let eph = KeplerianEphemeris::new();
        let jd = JulianDate::parse_iso(date).unwrap();
        let earth = eph.position("earth", jd).unwrap();
        (eph.position(body, jd).unwrap() - earth).norm()
    }

    #[test]
    fn test_kepler_solver_circular_and_eccentric() {
        assert!((eccentric_anomaly(1.0, 0.0) - 1.0).abs() < 1e-14);
        let e = 0.2;
        let ecc = eccentric_anomaly(0.7, e);
        assert!((ecc - e * ecc.sin() - 0.7).abs() < 1e-12);
    }

    #[test]
    fn test_earth_sun_distance_is_about_one_au() {
        let d = geo_distance_au("sun", "2024-01-03");
        // perihelion early January ≈ 0.983 AU
        assert!((d - 0.983).abs() < 0.002, "d = {}", d);
        let d = geo_distance_au("sun", "2024-07-05");
        assert!((d - 1.017).abs() < 0.002, "d = {}", d);
    }

    #[test]
    fn test_moon_distance_in_lunar_range() {
        for day in ["2024-01-01", "2024-02-10", "2024-06-15", "2025-09-30"] {
            let km = geo_distance_au("moon", day) * AU_M / 1_000.0;
            assert!(km > 356_000.0 && km < 407_000.0, "{}: {} km", day, km);
        }
    }

    #[test]
    fn test_outer_planet_distances_plausible() {
        let jupiter = geo_distance_au("jupiter", "2024-06-01");
        assert!(jupiter > 3.9 && jupiter < 6.5);
        let neptune = geo_distance_au("neptune", "2024-06-01");
        assert!(neptune > 28.5 && neptune < 31.5);
    }

    #[test]
    fn test_unknown_body_fails_lookup() {
        let eph = KeplerianEphemeris::new();
        let err = eph
            .position("nibiru", JulianDate(JulianDate::J2000))
            .unwrap_err();
        assert_eq!(err, EphemerisError::UnknownBody("nibiru".to_string()));
    }
}
