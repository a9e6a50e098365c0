use ndarray::Array1;
use num_complex::Complex64;
use std::f64::consts::PI;

/// Phase step between neighbouring elements for a source at `angle`.
pub fn omega_from_angle(angle: f64, spacing: f64) -> f64 {
    2.0 * PI * spacing * (-angle).sin()
}

/// Inverse of [`omega_from_angle`]; out-of-range phases clamp to ±π/2.
pub fn angle_from_omega(omega: f64, spacing: f64) -> f64 {
    (-omega / (2.0 * PI * spacing)).clamp(-1.0, 1.0).asin()
}

/// `a_i = exp(j·2π·sin(-φ)·spacing·i)` for a uniform linear array.
pub fn steering_vector(angle: f64, spacing: f64, array_size: usize) -> Array1<Complex64> {
    let omega = omega_from_angle(angle, spacing);
    Array1::from_iter((0..array_size).map(|i| Complex64::from_polar(1.0, omega * i as f64)))
}
