use crate::array::config::ArrayConfig;
use crate::interface::CalibrationMessage;
use crate::prelude::{ensure_multiple, ProcessingStage, Produced, StageError, StageResult};
use crate::telemetry::{LogManager, MetricsRecorder};
use ndarray::{Array2, ArrayView2};
use num_complex::{Complex32, Complex64};
use std::sync::Arc;
use tokio::sync::mpsc::Receiver;

/// Spatial covariance `R = X·Xᴴ / samples` of blocks of array snapshots.
///
/// Once a calibration vector Γ is known every matrix is multiplied
/// elementwise by `cal[i,j] = (0.5/Γi)·conj(0.5/Γj)`.
pub struct CorrelationEstimator {
    array_size: usize,
    samples: usize,
    calibration: Option<Array2<Complex64>>,
    updates: Option<Receiver<Vec<u8>>>,
    logger: LogManager,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl CorrelationEstimator {
    pub fn new(config: &ArrayConfig) -> StageResult<Self> {
        config.validate()?;
        Ok(Self {
            array_size: config.array_size,
            samples: config.samples,
            calibration: None,
            updates: None,
            logger: LogManager::for_stage("correlation_estimator"),
            metrics: None,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    /// Listens for calibration blobs; polled at the start of every call.
    pub fn subscribe(&mut self, updates: Receiver<Vec<u8>>) {
        self.updates = Some(updates);
    }

    pub fn is_calibrated(&self) -> bool {
        self.calibration.is_some()
    }

    pub fn set_calibration(&mut self, gains: &[Complex32]) -> StageResult<()> {
        if gains.len() != self.array_size {
            return Err(StageError::MalformedMessage(format!(
                "calibration holds {} gains for {} elements",
                gains.len(),
                self.array_size
            )));
        }
        if gains.iter().any(|g| g.norm_sqr() == 0.0 || !g.is_finite()) {
            return Err(StageError::MalformedMessage(
                "calibration contains a zero or non-finite gain".into(),
            ));
        }
        let inverse: Vec<Complex64> = gains
            .iter()
            .map(|g| Complex64::new(0.5, 0.0) / Complex64::new(g.re as f64, g.im as f64))
            .collect();
        self.calibration = Some(Array2::from_shape_fn(
            (self.array_size, self.array_size),
            |(i, j)| inverse[i] * inverse[j].conj(),
        ));
        self.logger.record("calibration applied");
        Ok(())
    }

    pub fn clear_calibration(&mut self) {
        self.calibration = None;
    }

    /// Covariance of `snapshots`, one column per snapshot.
    pub fn estimate(&self, snapshots: ArrayView2<Complex32>) -> StageResult<Array2<Complex32>> {
        let (rows, count) = snapshots.dim();
        if rows != self.array_size || count == 0 {
            return Err(StageError::Precondition(format!(
                "snapshot matrix is {}x{}, expected {} rows and at least one column",
                rows, count, self.array_size
            )));
        }

        let n = self.array_size;
        let mut r = Array2::<Complex64>::zeros((n, n));
        for x in snapshots.columns() {
            for i in 0..n {
                let xi = Complex64::new(x[i].re as f64, x[i].im as f64);
                for j in i..n {
                    r[[i, j]] += xi * Complex64::new(x[j].re as f64, -x[j].im as f64);
                }
            }
        }

        let scale = 1.0 / count as f64;
        for i in 0..n {
            r[[i, i]] = Complex64::new(r[[i, i]].re * scale, 0.0);
            for j in i + 1..n {
                let value = r[[i, j]] * scale;
                r[[i, j]] = value;
                r[[j, i]] = value.conj();
            }
        }
        if let Some(cal) = &self.calibration {
            r.zip_mut_with(cal, |value, c| *value *= *c);
        }
        Ok(r.mapv(|z| Complex32::new(z.re as f32, z.im as f32)))
    }

    fn poll_updates(&mut self) {
        let mut blobs = Vec::new();
        if let Some(updates) = self.updates.as_mut() {
            while let Ok(blob) = updates.try_recv() {
                blobs.push(blob);
            }
        }
        for blob in blobs {
            let applied = CalibrationMessage::from_bytes(&blob, self.array_size)
                .and_then(|message| self.set_calibration(&message.gains));
            if let Err(err) = applied {
                self.logger.warn(&format!("dropping calibration message: {}", err));
                if let Some(metrics) = &self.metrics {
                    metrics.record_dropped_message();
                }
            }
        }
    }
}

impl ProcessingStage for CorrelationEstimator {
    type Input = Complex32;
    type Output = Complex32;

    fn name(&self) -> &'static str {
        self.logger.stage()
    }

    fn required_input(&self, output_items: usize) -> usize {
        let matrices = (output_items / (self.array_size * self.array_size)).max(1);
        matrices * self.samples * self.array_size
    }

    /// Input is a stream of snapshots, `array_size` values each; output is a
    /// stream of row-major covariance matrices.
    fn process(&mut self, input: &[Complex32], output: &mut [Complex32]) -> StageResult<Produced> {
        let n = self.array_size;
        ensure_multiple("snapshot input", input.len(), n)?;
        ensure_multiple("covariance output", output.len(), n * n)?;
        self.poll_updates();

        let block = self.samples * n;
        let matrices = (input.len() / block).min(output.len() / (n * n));
        for (m, (chunk, dst)) in input
            .chunks_exact(block)
            .zip(output.chunks_exact_mut(n * n))
            .take(matrices)
            .enumerate()
        {
            // Stream order is snapshot-major; transpose to one column per snapshot.
            let snapshots = ArrayView2::from_shape((self.samples, n), chunk)
                .map_err(|err| StageError::Precondition(err.to_string()))?;
            let r = self.estimate(snapshots.t())?;
            for (d, v) in dst.iter_mut().zip(r.iter()) {
                *d = *v;
            }
            if let Some(metrics) = &self.metrics {
                metrics.record_covariance();
            }
            if self.logger.tracing() {
                self.logger.trace(&format!("covariance {} ready", m));
            }
        }
        Ok(Produced::new(matrices * block, matrices * n * n))
    }

    fn reset(&mut self) {}
}
