use serde::{Deserialize, Serialize};
use std::f64::consts::PI;

/// Taper family used for the range and Doppler transforms.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WindowType {
    Rectangular,
    #[default]
    Hamming,
    Hann,
    Blackman,
    BlackmanHarris,
    Bartlett,
    Flattop,
    Kaiser { beta: f32 },
}

impl WindowType {
    /// Symmetric window of `taps` points.
    pub fn taps(&self, taps: usize) -> Vec<f32> {
        match taps {
            0 => return Vec::new(),
            1 => return vec![1.0],
            _ => {}
        }
        let m = (taps - 1) as f64;
        (0..taps)
            .map(|n| {
                let x = n as f64 / m;
                let value = match *self {
                    WindowType::Rectangular => 1.0,
                    WindowType::Hamming => 0.54 - 0.46 * (2.0 * PI * x).cos(),
                    WindowType::Hann => 0.5 - 0.5 * (2.0 * PI * x).cos(),
                    WindowType::Blackman => {
                        0.42 - 0.5 * (2.0 * PI * x).cos() + 0.08 * (4.0 * PI * x).cos()
                    }
                    WindowType::BlackmanHarris => cosine_sum(
                        &[0.35875, 0.48829, 0.14128, 0.01168],
                        x,
                    ),
                    WindowType::Bartlett => 1.0 - (2.0 * x - 1.0).abs(),
                    WindowType::Flattop => cosine_sum(
                        &[0.21557895, 0.41663158, 0.277263158, 0.083578947, 0.006947368],
                        x,
                    ),
                    WindowType::Kaiser { beta } => {
                        let beta = beta as f64;
                        let arg = beta * (1.0 - (2.0 * x - 1.0).powi(2)).max(0.0).sqrt();
                        bessel_i0(arg) / bessel_i0(beta)
                    }
                };
                value as f32
            })
            .collect()
    }
}

// a0 - a1 cos(2πx) + a2 cos(4πx) - ...
fn cosine_sum(coefficients: &[f64], x: f64) -> f64 {
    coefficients
        .iter()
        .enumerate()
        .map(|(k, a)| {
            let sign = if k % 2 == 0 { 1.0 } else { -1.0 };
            sign * a * (2.0 * PI * k as f64 * x).cos()
        })
        .sum()
}

/// Zeroth-order modified Bessel function of the first kind.
fn bessel_i0(x: f64) -> f64 {
    let mut sum = 1.0;
    let mut term = 1.0;
    for k in 1..=50 {
        let half = x / (2.0 * k as f64);
        term *= half * half;
        sum += term;
        if term < 1e-15 * sum {
            break;
        }
    }
    sum
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn hamming_is_symmetric_with_expected_edges() {
        let w = WindowType::Hamming.taps(9);
        assert!((w[0] - 0.08).abs() < 1e-6);
        assert!((w[4] - 1.0).abs() < 1e-6);
        for i in 0..9 {
            assert!((w[i] - w[8 - i]).abs() < 1e-6);
        }
    }

    #[test]
    fn rectangular_is_all_ones() {
        assert!(WindowType::Rectangular.taps(5).iter().all(|&v| v == 1.0));
    }

    #[test]
    fn kaiser_with_zero_beta_is_rectangular() {
        let w = WindowType::Kaiser { beta: 0.0 }.taps(6);
        assert!(w.iter().all(|v| (v - 1.0).abs() < 1e-6));
    }

    #[test]
    fn degenerate_lengths() {
        assert!(WindowType::Blackman.taps(0).is_empty());
        assert_eq!(WindowType::Flattop.taps(1), vec![1.0]);
    }

    #[test]
    fn window_type_parses_from_snake_case() {
        let w: WindowType = serde_json::from_str("\"blackman_harris\"").unwrap();
        assert_eq!(w, WindowType::BlackmanHarris);
    }
}
