use crate::prelude::{StageError, StageResult};
use serde::{Deserialize, Serialize};

/// Geometry and estimator settings of a uniform linear array.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ArrayConfig {
    pub array_size: usize,
    /// Snapshots averaged into one covariance matrix.
    pub samples: usize,
    /// Expected number of sources.
    pub targets: usize,
    /// MUSIC grid points over (-π/2, π/2].
    pub output_resolution: usize,
    /// Element spacing in wavelengths.
    pub element_spacing: f64,
    /// Known direction of the calibration pilot, radians.
    pub pilot_angle: f64,
}

impl Default for ArrayConfig {
    fn default() -> Self {
        Self {
            array_size: 8,
            samples: 256,
            targets: 1,
            output_resolution: 180,
            element_spacing: 0.5,
            pilot_angle: 0.0,
        }
    }
}

impl ArrayConfig {
    pub fn validate(&self) -> StageResult<()> {
        if self.array_size < 2 {
            return Err(StageError::Config(format!(
                "array needs at least two elements, got {}",
                self.array_size
            )));
        }
        if self.samples == 0 {
            return Err(StageError::Config("samples must be non-zero".into()));
        }
        if self.targets == 0 || self.targets >= self.array_size {
            return Err(StageError::Config(format!(
                "targets must be in 1..{}, got {}",
                self.array_size, self.targets
            )));
        }
        if self.output_resolution == 0 {
            return Err(StageError::Config("output_resolution must be non-zero".into()));
        }
        if self.element_spacing.is_nan() || self.element_spacing <= 0.0 {
            return Err(StageError::Config(format!(
                "element spacing must be positive, got {}",
                self.element_spacing
            )));
        }
        Ok(())
    }

    /// Complex values per covariance matrix on the stream.
    pub fn matrix_len(&self) -> usize {
        self.array_size * self.array_size
    }
}
