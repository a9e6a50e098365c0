//! Symbol alphabets for the OFDM carriers.

use crate::math::StatsHelper;
use crate::prelude::{StageError, StageResult};
use num_complex::Complex32;
use serde::{Deserialize, Serialize};
use std::f32::consts::PI;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModulationScheme {
    Bpsk,
    Qpsk,
    Psk,
    Qam,
}

/// Modulation selection as it appears in configuration files.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Modulation {
    pub scheme: ModulationScheme,
    /// Required for PSK and QAM, ignored otherwise.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub order: Option<usize>,
}

impl Default for Modulation {
    fn default() -> Self {
        Self {
            scheme: ModulationScheme::Qpsk,
            order: None,
        }
    }
}

impl Modulation {
    pub fn constellation(&self) -> StageResult<Vec<Complex32>> {
        get_constellation(self.scheme, self.order)
    }
}

/// Builds the normalised symbol set of a modulation scheme.
///
/// PSK needs `order >= 2`; QAM needs an order that is an even power of two
/// (4, 16, 64, ...). Anything else is a [`StageError::Config`].
pub fn get_constellation(scheme: ModulationScheme, order: Option<usize>) -> StageResult<Vec<Complex32>> {
    let mut constellation = match scheme {
        ModulationScheme::Bpsk => {
            return Ok(vec![Complex32::new(1.0, 0.0), Complex32::new(-1.0, 0.0)]);
        }
        ModulationScheme::Qpsk => vec![
            Complex32::new(0.0, 0.0),
            Complex32::new(1.0, 0.0),
            Complex32::new(0.0, 1.0),
            Complex32::new(1.0, 1.0),
        ],
        ModulationScheme::Psk => {
            let order = match order {
                Some(order) if order >= 2 => order,
                other => {
                    return Err(StageError::Config(format!(
                        "invalid PSK constellation order: {:?}",
                        other
                    )))
                }
            };
            // Already zero-mean and unit-energy.
            return Ok((0..order)
                .map(|i| Complex32::from_polar(1.0, 2.0 * PI * i as f32 / order as f32))
                .collect());
        }
        ModulationScheme::Qam => {
            let order = order.unwrap_or(0);
            let edge = qam_edge(order).ok_or_else(|| {
                StageError::Config(format!("invalid QAM order requested: {}", order))
            })?;
            let mut points = Vec::with_capacity(order);
            for x in 0..edge {
                for y in 0..edge {
                    points.push(Complex32::new(x as f32, y as f32));
                }
            }
            points
        }
    };

    center(&mut constellation);
    normalize_energy(&mut constellation);
    Ok(constellation)
}

// sqrt(order) when order is 4^k with k >= 1.
fn qam_edge(order: usize) -> Option<usize> {
    if order < 4 || !order.is_power_of_two() || order.trailing_zeros() % 2 != 0 {
        return None;
    }
    Some(1 << (order.trailing_zeros() / 2))
}

fn center(constellation: &mut [Complex32]) {
    let mean = StatsHelper::mean(constellation);
    for symbol in constellation.iter_mut() {
        *symbol -= mean;
    }
}

fn normalize_energy(constellation: &mut [Complex32]) {
    let energy = StatsHelper::mean_energy(constellation);
    if energy == 0.0 {
        return;
    }
    let factor = energy.sqrt().recip();
    for symbol in constellation.iter_mut() {
        *symbol *= factor;
    }
}
