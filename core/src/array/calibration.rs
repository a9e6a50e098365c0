use crate::array::config::ArrayConfig;
use crate::array::steering::steering_vector;
use crate::array::subspace::Subspaces;
use crate::interface::CalibrationMessage;
use crate::math::MatrixHelper;
use crate::prelude::{ensure_multiple, StageError, StageResult};
use crate::telemetry::{LogManager, MetricsRecorder};
use ndarray::{Array1, Array2, ArrayView2};
use num_complex::{Complex32, Complex64};
use std::sync::Arc;
use tokio::sync::mpsc::{error::TrySendError, Receiver, Sender};

/// Array self-calibration against a pilot at a known angle.
///
/// Runs once per trigger on the next covariance matrix that arrives. Each
/// estimate is multiplied into the running vector Γ, which is then published.
pub struct Calibrator {
    array_size: usize,
    targets: usize,
    pilot: Array1<Complex64>,
    gamma: Array1<Complex64>,
    trigger: Receiver<()>,
    publisher: Sender<Vec<u8>>,
    logger: LogManager,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl Calibrator {
    pub fn new(config: &ArrayConfig, trigger: Receiver<()>, publisher: Sender<Vec<u8>>) -> StageResult<Self> {
        config.validate()?;
        Ok(Self {
            array_size: config.array_size,
            targets: config.targets,
            pilot: steering_vector(config.pilot_angle, config.element_spacing, config.array_size),
            gamma: Array1::from_elem(config.array_size, Complex64::new(1.0, 0.0)),
            trigger,
            publisher,
            logger: LogManager::for_stage("calibrator"),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Current composed correction Γ.
    pub fn gains(&self) -> Vec<Complex32> {
        self.gamma
            .iter()
            .map(|g| Complex32::new(g.re as f32, g.im as f32))
            .collect()
    }

    /// Consumes row-major covariance matrices and returns how many items were used.
    ///
    /// A pending trigger is taken only when at least one matrix is present,
    /// and is spent on the first one.
    pub fn process(&mut self, input: &[Complex32]) -> StageResult<usize> {
        let matrix_len = self.array_size * self.array_size;
        ensure_multiple("covariance input", input.len(), matrix_len)?;
        if input.is_empty() {
            return Ok(0);
        }
        if self.trigger.try_recv().is_ok() {
            let covariance = ArrayView2::from_shape((self.array_size, self.array_size), &input[..matrix_len])
                .map_err(|err| StageError::Precondition(err.to_string()))?;
            let covariance = MatrixHelper::widen(covariance);
            if let Err(err) = self.calibrate(covariance.view()) {
                self.logger.warn(&format!("calibration discarded: {}", err));
                if let Some(metrics) = &self.metrics {
                    metrics.record_numerical_failure();
                }
            }
        }
        Ok(input.len())
    }

    /// Runs one calibration on `covariance` and publishes the updated Γ.
    pub fn calibrate(&mut self, covariance: ArrayView2<Complex64>) -> StageResult<Vec<Complex32>> {
        let subspaces = Subspaces::from_covariance(covariance, self.targets)?;
        if subspaces.eigenvalues().first().map_or(true, |v| *v == 0.0) {
            return Err(StageError::Numerical("covariance carries no energy".into()));
        }
        let estimate = self.calibrate_subspace(subspaces.signal())?;
        self.gamma = &self.gamma * &estimate;
        self.publish();
        Ok(self.gains())
    }

    /// Per-element correction estimate from a signal subspace `U_s`.
    ///
    /// Takes the dominant eigenvector of `diag(D)ᴴ·U_s·U_sᴴ·diag(D)` for the
    /// pilot steering vector `D`, then removes the phase of element 0 and
    /// scales it to unit mean magnitude.
    pub fn calibrate_subspace(&self, signal: ArrayView2<Complex64>) -> StageResult<Array1<Complex64>> {
        if signal.nrows() != self.array_size {
            return Err(StageError::Precondition(format!(
                "signal subspace has {} rows, expected {}",
                signal.nrows(),
                self.array_size
            )));
        }
        let projector = signal.dot(&MatrixHelper::adjoint(signal));
        let n = self.array_size;
        let weighted = Array2::from_shape_fn((n, n), |(i, j)| {
            self.pilot[i].conj() * projector[[i, j]] * self.pilot[j]
        });
        let eigen = MatrixHelper::hermitian_eigen(weighted.view())?;
        let principal = eigen.vectors.column(0).to_owned();

        let anchor = principal[0];
        if anchor.norm() < f64::EPSILON {
            return Err(StageError::Numerical(
                "reference element has no energy in the calibration estimate".into(),
            ));
        }
        let derotate = anchor.conj() / anchor.norm();
        let mean_magnitude = principal.iter().map(|v| v.norm()).sum::<f64>() / n as f64;
        let estimate = principal.mapv(|v| v * derotate / mean_magnitude);
        if !estimate.iter().all(|v| v.is_finite()) {
            return Err(StageError::Numerical(
                "calibration estimate is not finite".into(),
            ));
        }
        Ok(estimate)
    }

    fn publish(&mut self) {
        let blob = CalibrationMessage::new(self.gains()).to_bytes();
        match self.publisher.try_send(blob) {
            Ok(()) => {
                self.logger.record("calibration published");
                if let Some(metrics) = &self.metrics {
                    metrics.record_calibration();
                }
            }
            Err(TrySendError::Full(_)) | Err(TrySendError::Closed(_)) => {
                self.logger.warn("calibration result not delivered");
                if let Some(metrics) = &self.metrics {
                    metrics.record_dropped_message();
                }
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::interface::{calibration_channel, calibration_trigger};
    use crate::array::correlation::CorrelationEstimator;

    fn config() -> ArrayConfig {
        ArrayConfig {
            array_size: 6,
            samples: 64,
            targets: 1,
            pilot_angle: 0.3,
            ..Default::default()
        }
    }

    fn pilot_covariance(gains: &[Complex64]) -> Array2<Complex64> {
        let a = steering_vector(0.3, 0.5, gains.len());
        let x: Vec<Complex64> = a.iter().zip(gains).map(|(a, g)| a * g).collect();
        Array2::from_shape_fn((x.len(), x.len()), |(i, j)| x[i] * x[j].conj())
    }

    fn unit_gains() -> Vec<Complex64> {
        vec![Complex64::new(1.0, 0.0); 6]
    }

    #[test]
    fn matched_pilot_with_unit_gains_keeps_all_ones() {
        let (_trigger, receiver) = calibration_trigger();
        let (sender, _results) = calibration_channel(1);
        let mut calibrator = Calibrator::new(&config(), receiver, sender).unwrap();
        let gains = calibrator
            .calibrate(pilot_covariance(&unit_gains()).view())
            .unwrap();
        for g in gains {
            assert!((g - Complex32::new(1.0, 0.0)).norm() < 1e-5);
        }
    }

    #[test]
    fn recovers_element_gains_up_to_reference_phase() {
        let truth = vec![
            Complex64::new(1.0, 0.0),
            Complex64::from_polar(1.2, 0.4),
            Complex64::from_polar(0.8, -1.1),
            Complex64::from_polar(1.1, 2.0),
            Complex64::from_polar(0.9, -0.3),
            Complex64::from_polar(1.05, 0.9),
        ];
        let (_trigger, receiver) = calibration_trigger();
        let (sender, _results) = calibration_channel(1);
        let mut calibrator = Calibrator::new(&config(), receiver, sender).unwrap();
        let gains = calibrator.calibrate(pilot_covariance(&truth).view()).unwrap();

        let mean: f64 = truth.iter().map(|g| g.norm()).sum::<f64>() / truth.len() as f64;
        for (g, t) in gains.iter().zip(&truth) {
            let expected = t / mean;
            assert!((g.re as f64 - expected.re).abs() < 1e-5);
            assert!((g.im as f64 - expected.im).abs() < 1e-5);
        }
    }

    #[test]
    fn trigger_is_spent_on_exactly_one_matrix() {
        let metrics = Arc::new(MetricsRecorder::new());
        let (trigger, receiver) = calibration_trigger();
        let (sender, mut results) = calibration_channel(4);
        let mut calibrator = Calibrator::new(&config(), receiver, sender)
            .unwrap()
            .with_metrics(metrics.clone());
        let matrix: Vec<Complex32> = MatrixHelper::narrow(pilot_covariance(&unit_gains()).view())
            .iter()
            .copied()
            .collect();
        let mut two = matrix.clone();
        two.extend_from_slice(&matrix);

        assert_eq!(calibrator.process(&two).unwrap(), 72);
        assert!(results.try_recv().is_err());

        trigger.request();
        trigger.request();
        assert_eq!(calibrator.process(&[]).unwrap(), 0);
        calibrator.process(&two).unwrap();
        calibrator.process(&matrix).unwrap();
        let blob = results.try_recv().unwrap();
        assert_eq!(blob.len(), 48);
        assert!(results.try_recv().is_err());
        assert_eq!(metrics.snapshot().calibrations, 1);
    }

    #[test]
    fn failed_calibration_keeps_previous_gains() {
        let metrics = Arc::new(MetricsRecorder::new());
        let (trigger, receiver) = calibration_trigger();
        let (sender, mut results) = calibration_channel(4);
        let mut calibrator = Calibrator::new(&config(), receiver, sender)
            .unwrap()
            .with_metrics(metrics.clone());
        let truth: Vec<Complex64> = (0..6)
            .map(|i| Complex64::from_polar(1.0 + 0.1 * i as f64, -0.2 * i as f64))
            .collect();
        let good: Vec<Complex32> = MatrixHelper::narrow(pilot_covariance(&truth).view())
            .iter()
            .copied()
            .collect();

        trigger.request();
        calibrator.process(&good).unwrap();
        assert!(results.try_recv().is_ok());
        let before = calibrator.gains();

        let mut broken = good.clone();
        broken[7] = Complex32::new(f32::NAN, 0.0);
        trigger.request();
        assert_eq!(calibrator.process(&broken).unwrap(), 36);
        assert_eq!(calibrator.gains(), before);
        assert!(results.try_recv().is_err());

        let zero = vec![Complex32::default(); 36];
        trigger.request();
        calibrator.process(&zero).unwrap();
        assert_eq!(calibrator.gains(), before);
        assert!(results.try_recv().is_err());

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.numerical_failures, 2);
        assert_eq!(snapshot.calibrations, 1);

        // A healthy matrix afterwards still calibrates normally.
        trigger.request();
        calibrator.process(&good).unwrap();
        assert!(results.try_recv().is_ok());
        assert!(calibrator.gains().iter().all(|g| g.is_finite()));
    }

    #[test]
    fn corrected_covariance_calibrates_back_to_identity() {
        let truth: Vec<Complex64> = (0..6)
            .map(|i| Complex64::from_polar(1.0 + 0.05 * i as f64, 0.3 * i as f64))
            .collect();
        let (_trigger, receiver) = calibration_trigger();
        let (sender, mut results) = calibration_channel(2);
        let mut calibrator = Calibrator::new(&config(), receiver, sender).unwrap();
        let mut estimator = CorrelationEstimator::new(&config()).unwrap();

        let first = calibrator.calibrate(pilot_covariance(&truth).view()).unwrap();
        let blob = results.try_recv().unwrap();
        let message = CalibrationMessage::from_bytes(&blob, 6).unwrap();
        assert_eq!(message.gains, first);
        estimator.set_calibration(&message.gains).unwrap();

        // Snapshots of the distorted pilot, corrected by the estimator.
        let a = steering_vector(0.3, 0.5, 6);
        let snapshots = Array2::from_shape_fn((6, 1), |(i, _)| {
            let v = a[i] * truth[i];
            Complex32::new(v.re as f32, v.im as f32)
        });
        let corrected = estimator.estimate(snapshots.view()).unwrap();
        let second = calibrator
            .calibrate(MatrixHelper::widen(corrected.view()).view())
            .unwrap();
        for (a, b) in second.iter().zip(&first) {
            assert!((a - b).norm() < 1e-4);
        }
    }
}
