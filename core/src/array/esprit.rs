use crate::array::config::ArrayConfig;
use crate::array::steering::angle_from_omega;
use crate::array::subspace::Subspaces;
use crate::math::MatrixHelper;
use crate::prelude::{ensure_multiple, ProcessingStage, Produced, StageError, StageResult};
use crate::telemetry::{LogManager, MetricsRecorder};
use ndarray::{s, ArrayView2};
use num_complex::{Complex32, Complex64};
use std::sync::Arc;

/// Closed-form DOA estimates from the shift invariance of the signal subspace.
pub struct EspritEstimator {
    array_size: usize,
    targets: usize,
    spacing: f64,
    previous: Option<Vec<f32>>,
    logger: LogManager,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl EspritEstimator {
    pub fn new(config: &ArrayConfig) -> StageResult<Self> {
        config.validate()?;
        Ok(Self {
            array_size: config.array_size,
            targets: config.targets,
            spacing: config.element_spacing,
            previous: None,
            logger: LogManager::for_stage("esprit"),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Angles in radians, ascending, one per target.
    pub fn estimate(&self, covariance: ArrayView2<Complex64>) -> StageResult<Vec<f64>> {
        let subspaces = Subspaces::from_covariance(covariance, self.targets)?;
        if subspaces.eigenvalues().first().map_or(true, |v| *v == 0.0) {
            return Err(StageError::Numerical("covariance carries no energy".into()));
        }
        self.estimate_from_subspace(subspaces.signal())
    }

    /// Solves `Φ = (S2ᴴS2)⁻¹·S2ᴴS1` where S1 drops the last element of `U_s`
    /// and S2 the first.
    pub fn estimate_from_subspace(&self, signal: ArrayView2<Complex64>) -> StageResult<Vec<f64>> {
        let n = signal.nrows();
        if n < 2 || signal.ncols() == 0 {
            return Err(StageError::Precondition(format!(
                "signal subspace of shape {:?} is too small",
                signal.dim()
            )));
        }
        let s1 = signal.slice(s![..n - 1, ..]);
        let s2 = signal.slice(s![1.., ..]);
        let s2h = MatrixHelper::adjoint(s2);
        let phi = MatrixHelper::solve(s2h.dot(&s2).view(), s2h.dot(&s1).view())?;

        // Φ maps S2 onto S1, so each eigenvalue is the inverse element rotation.
        let mut angles: Vec<f64> = MatrixHelper::eigenvalues(phi.view())?
            .into_iter()
            .map(|lambda| angle_from_omega(-lambda.arg(), self.spacing))
            .collect();
        angles.sort_by(|a, b| a.total_cmp(b));
        Ok(angles)
    }

    fn record_failure(&self, err: &StageError) {
        self.logger.warn(&format!("estimate failed: {}", err));
        if let Some(metrics) = &self.metrics {
            metrics.record_numerical_failure();
        }
    }
}

impl ProcessingStage for EspritEstimator {
    type Input = Complex32;
    type Output = f32;

    fn name(&self) -> &'static str {
        self.logger.stage()
    }

    fn required_input(&self, output_items: usize) -> usize {
        (output_items / self.targets).max(1) * self.array_size * self.array_size
    }

    /// Writes `targets` angles per matrix. A matrix whose estimate fails
    /// numerically repeats the previous angles, or yields nothing if there
    /// are none yet.
    fn process(&mut self, input: &[Complex32], output: &mut [f32]) -> StageResult<Produced> {
        let matrix_len = self.array_size * self.array_size;
        ensure_multiple("covariance input", input.len(), matrix_len)?;
        ensure_multiple("angle output", output.len(), self.targets)?;

        let mut consumed = 0;
        let mut produced = 0;
        for matrix in input.chunks_exact(matrix_len) {
            if output.len() - produced < self.targets {
                break;
            }
            let covariance = ArrayView2::from_shape((self.array_size, self.array_size), matrix)
                .map_err(|err| StageError::Precondition(err.to_string()))?;
            consumed += matrix_len;

            match self.estimate(MatrixHelper::widen(covariance).view()) {
                Ok(angles) => {
                    self.previous = Some(angles.iter().map(|&a| a as f32).collect());
                    if let Some(metrics) = &self.metrics {
                        metrics.record_doa_estimate();
                    }
                }
                Err(err @ StageError::Numerical(_)) => self.record_failure(&err),
                Err(err) => return Err(err),
            }
            if let Some(previous) = &self.previous {
                output[produced..produced + self.targets].copy_from_slice(previous);
                produced += self.targets;
            }
        }
        Ok(Produced::new(consumed, produced))
    }

    fn reset(&mut self) {
        self.previous = None;
    }
}
