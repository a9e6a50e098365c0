use crate::array::config::ArrayConfig;
use crate::array::steering::steering_vector;
use crate::array::subspace::Subspaces;
use crate::math::MatrixHelper;
use crate::prelude::{ensure_multiple, ProcessingStage, Produced, StageError, StageResult};
use crate::telemetry::{LogManager, MetricsRecorder};
use ndarray::{Array2, ArrayView2};
use num_complex::{Complex32, Complex64};
use std::f64::consts::PI;
use std::sync::Arc;

/// MUSIC pseudo-spectrum over a fixed angle grid.
pub struct MusicEstimator {
    array_size: usize,
    targets: usize,
    resolution: usize,
    /// One steering vector per row, precomputed for every grid angle.
    grid: Array2<Complex64>,
    logger: LogManager,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl MusicEstimator {
    pub fn new(config: &ArrayConfig) -> StageResult<Self> {
        config.validate()?;
        let resolution = config.output_resolution;
        let mut grid = Array2::zeros((resolution, config.array_size));
        for (u, mut row) in grid.rows_mut().into_iter().enumerate() {
            let angle = grid_angle(u, resolution);
            row.assign(&steering_vector(angle, config.element_spacing, config.array_size));
        }
        Ok(Self {
            array_size: config.array_size,
            targets: config.targets,
            resolution,
            grid,
            logger: LogManager::for_stage("music"),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn resolution(&self) -> usize {
        self.resolution
    }

    /// Angle of grid point `u`, radians.
    pub fn bin_angle(&self, u: usize) -> f64 {
        grid_angle(u, self.resolution)
    }

    /// Nearest grid point to `angle`.
    pub fn angle_bin(&self, angle: f64) -> usize {
        let res = self.resolution as f64;
        let u = (angle / PI * res + res / 2.0).round();
        u.clamp(0.0, res - 1.0) as usize
    }

    /// Pseudo-spectrum `1 / |eᴴ·E_n·E_nᴴ·e|`, scaled so the peak is 1.
    pub fn spectrum(&self, covariance: ArrayView2<Complex64>) -> StageResult<Vec<f32>> {
        let subspaces = Subspaces::from_covariance(covariance, self.targets)?;
        let projector = subspaces.noise_projector();

        let mut spectrum: Vec<f64> = self
            .grid
            .rows()
            .into_iter()
            .map(|e| {
                let projected = projector.dot(&e);
                let value: Complex64 = e.iter().zip(projected.iter()).map(|(a, b)| a.conj() * b).sum();
                1.0 / value.norm().max(f64::MIN_POSITIVE)
            })
            .collect();

        let peak = spectrum.iter().cloned().fold(0.0, f64::max);
        if peak > 0.0 && peak.is_finite() {
            for value in spectrum.iter_mut() {
                *value /= peak;
            }
        }
        Ok(spectrum.into_iter().map(|v| v as f32).collect())
    }
}

fn grid_angle(u: usize, resolution: usize) -> f64 {
    (u as f64 - resolution as f64 / 2.0) / resolution as f64 * PI
}

/// Local maxima of `spectrum`, strongest first, at most `count` of them.
pub fn find_peaks(spectrum: &[f32], count: usize) -> Vec<usize> {
    let last = spectrum.len().saturating_sub(1);
    let mut peaks: Vec<usize> = (0..spectrum.len())
        .filter(|&i| {
            let rising = i == 0 || spectrum[i] > spectrum[i - 1];
            let falling = i == last || spectrum[i] >= spectrum[i + 1];
            rising && falling
        })
        .collect();
    peaks.sort_by(|&a, &b| spectrum[b].total_cmp(&spectrum[a]));
    peaks.truncate(count);
    peaks
}

impl ProcessingStage for MusicEstimator {
    type Input = Complex32;
    type Output = f32;

    fn name(&self) -> &'static str {
        self.logger.stage()
    }

    fn required_input(&self, output_items: usize) -> usize {
        (output_items / self.resolution).max(1) * self.array_size * self.array_size
    }

    fn process(&mut self, input: &[Complex32], output: &mut [f32]) -> StageResult<Produced> {
        let matrix_len = self.array_size * self.array_size;
        ensure_multiple("covariance input", input.len(), matrix_len)?;
        ensure_multiple("spectrum output", output.len(), self.resolution)?;

        let count = (input.len() / matrix_len).min(output.len() / self.resolution);
        for (matrix, dst) in input
            .chunks_exact(matrix_len)
            .zip(output.chunks_exact_mut(self.resolution))
            .take(count)
        {
            let covariance = ArrayView2::from_shape((self.array_size, self.array_size), matrix)
                .map_err(|err| StageError::Precondition(err.to_string()))?;
            let spectrum = self.spectrum(MatrixHelper::widen(covariance).view())?;
            dst.copy_from_slice(&spectrum);
            if let Some(metrics) = &self.metrics {
                metrics.record_spectrum();
            }
        }
        if self.logger.tracing() {
            self.logger.trace(&format!("{} spectra", count));
        }
        Ok(Produced::new(count * matrix_len, count * self.resolution))
    }

    fn reset(&mut self) {}
}

#[cfg(test)]
mod tests {
    use super::*;

    fn config(targets: usize) -> ArrayConfig {
        ArrayConfig {
            array_size: 8,
            targets,
            output_resolution: 180,
            ..Default::default()
        }
    }

    // Uncorrelated sources with unit power plus a little white noise.
    fn covariance(angles: &[f64], n: usize) -> Array2<Complex64> {
        let mut r = Array2::from_shape_fn((n, n), |(i, j)| {
            if i == j {
                Complex64::new(1e-3, 0.0)
            } else {
                Complex64::new(0.0, 0.0)
            }
        });
        for &angle in angles {
            let a = steering_vector(angle, 0.5, n);
            for i in 0..n {
                for j in 0..n {
                    r[[i, j]] += a[i] * a[j].conj();
                }
            }
        }
        r
    }

    #[test]
    fn grid_angles_span_the_visible_range() {
        let music = MusicEstimator::new(&config(1)).unwrap();
        assert!((music.bin_angle(90)).abs() < 1e-12);
        assert!((music.bin_angle(0) + PI / 2.0).abs() < 1e-12);
        assert_eq!(music.angle_bin(0.0), 90);
        assert_eq!(music.angle_bin(music.bin_angle(37)), 37);
        assert_eq!(music.angle_bin(3.0), 179);
    }

    #[test]
    fn peaks_sit_on_the_source_bins() {
        let angles = [-0.3, 0.5];
        let music = MusicEstimator::new(&config(2)).unwrap();
        let spectrum = music.spectrum(covariance(&angles, 8).view()).unwrap();
        assert_eq!(spectrum.len(), 180);
        let max = spectrum.iter().cloned().fold(0.0f32, f32::max);
        assert!((max - 1.0).abs() < 1e-6);

        let mut peaks = find_peaks(&spectrum, 2);
        peaks.sort();
        let expected: Vec<usize> = angles.iter().map(|&a| music.angle_bin(a)).collect();
        for (peak, bin) in peaks.iter().zip(&expected) {
            assert!((*peak as i64 - *bin as i64).abs() <= 1, "{} vs {}", peak, bin);
        }
    }

    #[test]
    fn find_peaks_orders_by_height() {
        let spectrum = [0.1, 0.5, 0.2, 0.9, 0.3, 0.4];
        assert_eq!(find_peaks(&spectrum, 3), vec![3, 1, 5]);
        assert_eq!(find_peaks(&spectrum, 1), vec![3]);
        assert!(find_peaks(&[], 2).is_empty());
    }

    #[test]
    fn stream_writes_one_spectrum_per_matrix() {
        let mut music = MusicEstimator::new(&config(1)).unwrap();
        let r = MatrixHelper::narrow(covariance(&[0.2], 8).view());
        let input: Vec<Complex32> = r.iter().copied().collect();
        let mut output = vec![0.0f32; 360];
        let produced = music.process(&input, &mut output).unwrap();
        assert_eq!(produced, Produced::new(64, 180));
        let peak = find_peaks(&output[..180], 1)[0];
        assert!((peak as i64 - music.angle_bin(0.2) as i64).abs() <= 1);

        let mut ragged = vec![0.0f32; 100];
        assert!(music.process(&input, &mut ragged).is_err());
    }

    #[test]
    fn non_finite_covariance_has_no_spectrum() {
        let music = MusicEstimator::new(&config(1)).unwrap();
        let mut r = covariance(&[0.2], 8);
        r[[3, 5]] = Complex64::new(f64::NAN, f64::NAN);
        assert!(matches!(
            music.spectrum(r.view()),
            Err(StageError::Numerical(_))
        ));
    }
}
