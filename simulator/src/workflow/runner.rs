use crate::generator::scene::Scene;
use crate::workflow::config::WorkflowConfig;
use anyhow::Context;
use log::info;
use ofdmradar::array::{
    find_peaks, ArrayConfig, Calibrator, CorrelationEstimator, EspritEstimator, MusicEstimator,
};
use ofdmradar::interface::{calibration_channel, calibration_trigger};
use ofdmradar::processing::{ChannelEstimator, Periodogram, PeriodogramPeak};
use ofdmradar::telemetry::{MetricsRecorder, MetricsSnapshot};
use ofdmradar::waveform::{FrameTag, FrameTransmitter, ParamSet};
use ofdmradar::{Complex32, ProcessingStage};
use serde::Serialize;
use std::sync::Arc;

/// Which processing chains a run exercises.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, clap::ValueEnum)]
#[serde(rename_all = "kebab-case")]
pub enum Chain {
    RangeDoppler,
    Doa,
    All,
}

#[derive(Debug, Serialize)]
pub struct RangeDopplerReport {
    pub frame_tags: Vec<FrameTag>,
    pub peaks: Vec<PeriodogramPeak>,
}

#[derive(Debug, Serialize)]
pub struct DoaReport {
    /// Strongest MUSIC peaks of the last spectrum, radians.
    pub music_angles: Vec<f64>,
    pub esprit_angles: Vec<f32>,
    /// Composed calibration Γ as `[re, im]` pairs.
    pub calibration: Vec<[f32; 2]>,
    pub element_gains: Vec<[f32; 2]>,
}

#[derive(Debug, Serialize)]
pub struct WorkflowReport {
    pub chain: Chain,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub range_doppler: Option<RangeDopplerReport>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub doa: Option<DoaReport>,
    pub metrics: MetricsSnapshot,
}

#[derive(Clone)]
pub struct Runner {
    config: WorkflowConfig,
}

impl Runner {
    pub fn new(config: WorkflowConfig) -> Self {
        Self { config }
    }

    pub fn execute(&self, chain: Chain) -> anyhow::Result<WorkflowReport> {
        let metrics = Arc::new(MetricsRecorder::new());
        let mut scene = Scene::new(self.config.scenario.clone()).context("building scenario")?;

        let range_doppler = match chain {
            Chain::RangeDoppler | Chain::All => Some(
                self.run_range_doppler(&mut scene, metrics.clone())
                    .context("running range-doppler chain")?,
            ),
            Chain::Doa => None,
        };
        let doa = match chain {
            Chain::Doa | Chain::All => Some(
                self.run_doa(&mut scene, metrics.clone())
                    .context("running DOA chain")?,
            ),
            Chain::RangeDoppler => None,
        };

        Ok(WorkflowReport {
            chain,
            range_doppler,
            doa,
            metrics: metrics.snapshot(),
        })
    }

    fn run_range_doppler(
        &self,
        scene: &mut Scene,
        metrics: Arc<MetricsRecorder>,
    ) -> anyhow::Result<RangeDopplerReport> {
        let params = Arc::new(
            ParamSet::new(&self.config.waveform).context("building waveform parameters")?,
        );
        let mut transmitter =
            FrameTransmitter::new(params.clone()).context("preparing transmit frame")?;
        let mut receiver = ChannelEstimator::new(params.clone(), &self.config.receiver)
            .context("building channel estimator")?
            .with_metrics(metrics);

        // One frame period per loop: the transmitted frame, its echo and the
        // idle tail up to the receiver buffer size.
        let mut stream = Vec::new();
        let mut frame_tags = Vec::new();
        let mut frame = vec![Complex32::new(0.0, 0.0); params.frame_length()];
        for _ in 0..self.config.run.frames {
            let mut filled = 0;
            while filled < frame.len() {
                let (count, tag) = transmitter.transmit(&mut frame[filled..]);
                frame_tags.extend(tag);
                filled += count;
            }
            stream.extend(scene.radar_echo(&frame, params.symbol_length()));
            stream.extend(scene.idle(receiver.buffer_size() - params.frame_length()));
        }

        let rows = feed(
            &mut receiver,
            &stream,
            self.config.run.chunk_size,
            2 * params.peri_carriers(),
        )?;
        let mut peaks = Vec::new();
        for rows in rows.chunks_exact(params.peri_length()) {
            let periodogram = Periodogram::from_rows(rows, params.peri_carriers())
                .context("assembling periodogram")?;
            if let Some(peak) = periodogram.peak() {
                info!(
                    "periodogram peak at range {} doppler {} magnitude {:.4}",
                    peak.range, peak.doppler, peak.magnitude
                );
                peaks.push(peak);
            }
        }
        Ok(RangeDopplerReport { frame_tags, peaks })
    }

    fn run_doa(&self, scene: &mut Scene, metrics: Arc<MetricsRecorder>) -> anyhow::Result<DoaReport> {
        let array = &self.config.array;
        let gains = scene.element_gains(array.array_size);

        let mut correlation = CorrelationEstimator::new(array)
            .context("building correlation estimator")?
            .with_metrics(metrics.clone());
        let (results_tx, results_rx) = calibration_channel(4);
        correlation.subscribe(results_rx);
        let (trigger, trigger_rx) = calibration_trigger();
        // The pilot is the only source during calibration.
        let pilot_config = ArrayConfig {
            targets: 1,
            ..array.clone()
        };
        let mut calibrator = Calibrator::new(&pilot_config, trigger_rx, results_tx)
            .context("building calibrator")?
            .with_metrics(metrics.clone());
        let mut music = MusicEstimator::new(array)
            .context("building MUSIC estimator")?
            .with_metrics(metrics.clone());
        let mut esprit = EspritEstimator::new(array)
            .context("building ESPRIT estimator")?
            .with_metrics(metrics);

        let matrix_len = array.matrix_len();
        // Snapshot streams must be cut on snapshot boundaries.
        let snapshot_chunk = whole_units(self.config.run.chunk_size, array.array_size);
        if self.config.run.calibrate {
            let pilot =
                scene.pilot_snapshots(array.pilot_angle, &gains, array.element_spacing, array.samples);
            let covariance = feed(&mut correlation, &pilot, snapshot_chunk, matrix_len)?;
            trigger.request();
            calibrator
                .process(&covariance[..matrix_len.min(covariance.len())])
                .context("calibrating array")?;
        }

        let snapshots = scene.array_snapshots(
            &gains,
            array.element_spacing,
            array.samples * self.config.run.blocks,
        );
        let covariances = feed(&mut correlation, &snapshots, snapshot_chunk, 2 * matrix_len)?;
        let resolution = music.resolution();
        let spectra = feed(&mut music, &covariances, matrix_len, 2 * resolution)?;
        let angles = feed(&mut esprit, &covariances, matrix_len, 2 * array.targets)?;

        let music_angles: Vec<f64> = spectra
            .chunks_exact(resolution)
            .last()
            .map(|spectrum| {
                find_peaks(spectrum, array.targets)
                    .into_iter()
                    .map(|u| music.bin_angle(u))
                    .collect()
            })
            .unwrap_or_default();
        let esprit_angles = angles
            .chunks_exact(array.targets)
            .last()
            .map(|chunk| chunk.to_vec())
            .unwrap_or_default();
        info!("MUSIC {:?} ESPRIT {:?}", music_angles, esprit_angles);

        Ok(DoaReport {
            music_angles,
            esprit_angles,
            calibration: calibrator.gains().iter().map(|g| [g.re, g.im]).collect(),
            element_gains: gains.iter().map(|g| [g.re, g.im]).collect(),
        })
    }
}

fn whole_units(count: usize, unit: usize) -> usize {
    (count / unit).max(1) * unit
}

/// Drives a stage over `input` in chunks the way a streaming host would,
/// re-offering unconsumed items and collecting everything produced.
///
/// `output_len` must be a whole number of the stage's output units.
pub fn feed<S: ProcessingStage>(
    stage: &mut S,
    input: &[S::Input],
    chunk_size: usize,
    output_len: usize,
) -> anyhow::Result<Vec<S::Output>>
where
    S::Output: Default,
{
    let chunk_size = chunk_size.max(1);
    let mut pending: Vec<S::Input> = Vec::new();
    let mut fed = 0;
    let mut output = vec![S::Output::default(); output_len];
    let mut collected = Vec::new();
    loop {
        let next = (fed + chunk_size).min(input.len());
        pending.extend_from_slice(&input[fed..next]);
        fed = next;
        let produced = stage
            .process(&pending, &mut output)
            .with_context(|| format!("{} stage", stage.name()))?;
        pending.drain(..produced.consumed);
        collected.extend_from_slice(&output[..produced.produced]);
        if fed == input.len() && produced.is_idle() {
            break;
        }
    }
    Ok(collected)
}
