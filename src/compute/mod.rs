//! Compute module - Spectra, statistics and increments on square grids.

mod fft;
mod increments;
mod stats;

pub use fft::*;
pub use increments::*;
pub use stats::*;

/// Vacuum permeability (H/m).
pub const MU_0: f64 = 1.256_637_062_12e-6;

/// Proton mass (kg).
pub const PROTON_MASS: f64 = 1.672_621_925_95e-27;

/// Elementary charge (C).
pub const ELEMENTARY_CHARGE: f64 = 1.602_176_634e-19;

/// Vacuum permittivity (F/m).
pub const VACUUM_PERMITTIVITY: f64 = 8.854_187_812_8e-12;

/// Speed of light (m/s).
pub const SPEED_OF_LIGHT: f64 = 299_792_458.0;

/// Number density used for the proton inertial length (1/m^3).
pub const REFERENCE_DENSITY: f64 = 1e6;

/// Proton inertial length `c / ω_pi` for number density `density`.
pub fn proton_inertial_length(density: f64) -> f64 {
    let plasma_frequency = (density * ELEMENTARY_CHARGE * ELEMENTARY_CHARGE
        / (VACUUM_PERMITTIVITY * PROTON_MASS))
        .sqrt();
    SPEED_OF_LIGHT / plasma_frequency
}
