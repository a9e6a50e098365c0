use crate::prelude::{ensure_multiple, StageError, StageResult};
use ndarray::Array2;
use serde::{Deserialize, Serialize};

/// Range–Doppler magnitude map of one frame.
///
/// Stored as one row per Doppler bin, which is also the order rows leave the
/// receiver in. Range bin 0 is zero delay, Doppler bin 0 is zero Doppler.
#[derive(Debug, Clone, PartialEq)]
pub struct Periodogram {
    rows: Array2<f32>,
}

/// Strongest cell of a periodogram.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct PeriodogramPeak {
    pub range: usize,
    pub doppler: usize,
    pub magnitude: f32,
}

impl Periodogram {
    pub fn new(rows: Array2<f32>) -> Self {
        Self { rows }
    }

    /// Builds a periodogram from streamed rows of `range_bins` values each.
    pub fn from_rows(values: &[f32], range_bins: usize) -> StageResult<Self> {
        ensure_multiple("periodogram", values.len(), range_bins)?;
        let doppler_bins = values.len() / range_bins;
        let rows = Array2::from_shape_vec((doppler_bins, range_bins), values.to_vec())
            .map_err(|err| StageError::Precondition(err.to_string()))?;
        Ok(Self { rows })
    }

    /// `(range_bins, doppler_bins)`.
    pub fn shape(&self) -> (usize, usize) {
        (self.rows.ncols(), self.rows.nrows())
    }

    pub fn get(&self, range: usize, doppler: usize) -> Option<f32> {
        self.rows.get([doppler, range]).copied()
    }

    pub fn peak(&self) -> Option<PeriodogramPeak> {
        self.rows
            .indexed_iter()
            .max_by(|a, b| a.1.total_cmp(b.1))
            .map(|((doppler, range), &magnitude)| PeriodogramPeak {
                range,
                doppler,
                magnitude,
            })
    }

    pub fn to_rows(&self) -> Vec<f32> {
        self.rows.iter().copied().collect()
    }
}
