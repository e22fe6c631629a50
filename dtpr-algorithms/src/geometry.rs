//! Angular helpers and chamber locations of the drift-tube system.

use std::f64::consts::{FRAC_PI_6, PI, TAU};
use std::fmt;

use dtpr_core::{Particle, Result};

/// Conversion factor from the trigger-primitive integer phi code to radians.
pub const TP_PHI_RESOLUTION: f64 = 65536.0 / 0.5;

/// Wrapped absolute azimuthal difference, `|acos(cos(a - b))|`, in `[0, π]`.
#[must_use]
pub fn angular_difference(a: f64, b: f64) -> f64 {
    (a - b).cos().clamp(-1.0, 1.0).acos().abs()
}

/// Signed azimuthal difference `a - b` wrapped into `(-π, π]`.
#[must_use]
pub fn delta_phi(a: f64, b: f64) -> f64 {
    let d = (a - b).rem_euclid(TAU);
    if d > PI {
        d - TAU
    } else {
        d
    }
}

/// `√(Δη² + Δφ²)` with a wrapped Δφ.
#[must_use]
pub fn delta_r(eta1: f64, phi1: f64, eta2: f64, phi2: f64) -> f64 {
    (eta1 - eta2).hypot(delta_phi(phi1, phi2))
}

/// Folds the two extra MB4 sector numbers onto their nominal sectors
/// (13 → 4, 14 → 10).
#[must_use]
pub fn normalize_sector(sector: i64) -> i64 {
    match sector {
        13 => 4,
        14 => 10,
        sc => sc,
    }
}

/// Global phi of a trigger primitive: local code over `resolution` plus the
/// sector offset `π/6 × (sc − 1)`.
#[must_use]
#[allow(clippy::cast_precision_loss)]
pub fn tp_global_phi(phi_code: f64, sector: i64, resolution: f64) -> f64 {
    phi_code / resolution + FRAC_PI_6 * (sector - 1) as f64
}

/// A chamber: wheel, sector and station.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Chamber {
    /// Wheel, -2 to 2.
    pub wh: i64,
    /// Sector, 1 to 14.
    pub sc: i64,
    /// Station, 1 to 4.
    pub st: i64,
}

impl Chamber {
    /// Creates a chamber location.
    #[must_use]
    pub fn new(wh: i64, sc: i64, st: i64) -> Self {
        Self { wh, sc, st }
    }

    /// Reads `wh`, `sc` and `st` from a particle.
    ///
    /// # Errors
    /// Returns a missing-attribute error if any of them is absent.
    pub fn of(particle: &Particle) -> Result<Self> {
        Ok(Self {
            wh: particle.get_i64("wh")?,
            sc: particle.get_i64("sc")?,
            st: particle.get_i64("st")?,
        })
    }
}

impl fmt::Display for Chamber {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "(wh={}, sc={}, st={})", self.wh, self.sc, self.st)
    }
}
