//! OFDM receive chain producing one range–Doppler periodogram per frame.
//!
//! Each received symbol is stripped of its cyclic prefix, transformed and
//! divided by the transmitted symbol. The resulting channel estimate is
//! windowed, zero-padded and inverse transformed into a range profile. Once a
//! frame is complete every range bin is transformed along the symbol axis.

use crate::math::{FftHelper, StatsHelper};
use crate::prelude::{ensure_multiple, ProcessingStage, Produced, StageError, StageResult};
use crate::processing::periodogram::Periodogram;
use crate::telemetry::{LogManager, MetricsRecorder};
use crate::waveform::{reference_symbols, ParamSet};
use ndarray::Array2;
use num_complex::Complex32;
use rustfft::num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

const MAX_REQUEST: usize = 4096;

/// Where the FFT window of each received symbol starts.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PrefixAlignment {
    /// Skip the whole cyclic prefix.
    #[default]
    Full,
    /// Start half way into the prefix. Range bins shift by half a prefix.
    Centered,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ReceiverConfig {
    /// Input samples that make up one frame period on the stream. Defaults
    /// to the frame length; anything past the frame is discarded.
    pub buffer_size: Option<usize>,
    pub alignment: PrefixAlignment,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RxState {
    CollectingSymbols,
    DopplerTransform,
    Emitting,
    Draining,
}

/// Position inside the current frame.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct FrameProgress {
    pub symbol: usize,
    /// Range bin the Doppler transform reached.
    pub carrier: usize,
    /// Next periodogram row to emit.
    pub row: usize,
    /// Input samples consumed for this frame.
    pub consumed: usize,
}

pub struct ChannelEstimator {
    params: Arc<ParamSet>,
    buffer_size: usize,
    skip: usize,
    reference: Array2<Complex32>,
    window_carriers: Vec<f32>,
    window_symbols: Vec<f32>,
    carrier_fft: FftHelper,
    range_fft: FftHelper,
    doppler_fft: FftHelper,
    spectrum: Vec<Complex32>,
    column: Vec<Complex32>,
    profiles: Array2<Complex32>,
    periodogram: Array2<f32>,
    state: RxState,
    progress: FrameProgress,
    logger: LogManager,
    metrics: Option<Arc<MetricsRecorder>>,
}

impl ChannelEstimator {
    pub fn new(params: Arc<ParamSet>, config: &ReceiverConfig) -> StageResult<Self> {
        let buffer_size = config.buffer_size.unwrap_or(params.frame_length());
        if buffer_size < params.frame_length() {
            return Err(StageError::Config(format!(
                "buffer size {} is shorter than a frame of {} samples",
                buffer_size,
                params.frame_length()
            )));
        }
        let skip = match config.alignment {
            PrefixAlignment::Full => params.cyclic_prefix_length(),
            PrefixAlignment::Centered => params.cyclic_prefix_length() / 2,
        };

        let carriers = params.carriers();
        let symbols = params.symbols();
        let (window_carriers, window_symbols) = build_windows(&params);

        Ok(Self {
            reference: reference_symbols(&params),
            window_carriers,
            window_symbols,
            carrier_fft: FftHelper::new(carriers),
            range_fft: FftHelper::new(params.peri_carriers()),
            doppler_fft: FftHelper::new(params.peri_symbols()),
            spectrum: vec![Complex32::zero(); carriers],
            column: vec![Complex32::zero(); params.peri_symbols()],
            profiles: Array2::zeros((symbols, params.peri_carriers())),
            periodogram: Array2::zeros((params.peri_symbols(), params.peri_carriers())),
            state: RxState::CollectingSymbols,
            progress: FrameProgress::default(),
            logger: LogManager::for_stage("channel_estimator"),
            metrics: None,
            buffer_size,
            skip,
            params,
        })
    }

    pub fn with_metrics(mut self, metrics: Arc<MetricsRecorder>) -> Self {
        self.metrics = Some(metrics);
        self
    }

    pub fn params(&self) -> &Arc<ParamSet> {
        &self.params
    }

    pub fn state(&self) -> RxState {
        self.state
    }

    pub fn progress(&self) -> FrameProgress {
        self.progress
    }

    pub fn buffer_size(&self) -> usize {
        self.buffer_size
    }

    /// Carrier window in FFT order with the shared normalisation applied.
    pub fn window_carriers(&self) -> &[f32] {
        &self.window_carriers
    }

    pub fn window_symbols(&self) -> &[f32] {
        &self.window_symbols
    }

    /// Runs the receiver as far as `input` and `output` allow.
    ///
    /// Only whole symbols are consumed while collecting; the caller presents
    /// unconsumed samples again on the next call. `output` must hold a whole
    /// number of periodogram rows. Returns after each completed frame.
    pub fn advance(&mut self, input: &[Complex32], output: &mut [f32]) -> StageResult<Produced> {
        let row_len = self.params.peri_carriers();
        ensure_multiple("output", output.len(), row_len)?;

        let symbol_length = self.params.symbol_length();
        let mut consumed = 0;
        let mut produced = 0;

        loop {
            match self.state {
                RxState::CollectingSymbols => {
                    while self.progress.symbol < self.params.symbols()
                        && input.len() - consumed >= symbol_length
                    {
                        let symbol = &input[consumed..consumed + symbol_length];
                        self.collect_symbol(self.progress.symbol, symbol);
                        consumed += symbol_length;
                        self.progress.consumed += symbol_length;
                        self.progress.symbol += 1;
                    }
                    if self.progress.symbol < self.params.symbols() {
                        break;
                    }
                    self.state = RxState::DopplerTransform;
                }
                RxState::DopplerTransform => {
                    self.doppler_transform();
                    self.state = RxState::Emitting;
                }
                RxState::Emitting => {
                    let rows = ((output.len() - produced) / row_len)
                        .min(self.params.peri_symbols() - self.progress.row);
                    for _ in 0..rows {
                        let row = self.periodogram.row(self.progress.row);
                        for (dst, src) in output[produced..produced + row_len].iter_mut().zip(row) {
                            *dst = *src;
                        }
                        produced += row_len;
                        self.progress.row += 1;
                    }
                    if self.progress.row < self.params.peri_symbols() {
                        break;
                    }
                    self.state = RxState::Draining;
                }
                RxState::Draining => {
                    let take = (input.len() - consumed).min(self.buffer_size - self.progress.consumed);
                    consumed += take;
                    self.progress.consumed += take;
                    if self.progress.consumed < self.buffer_size {
                        break;
                    }
                    self.finish_frame();
                    break;
                }
            }
        }

        if self.logger.tracing() {
            self.logger.trace(&format!(
                "consumed {} produced {} in {:?}",
                consumed, produced, self.state
            ));
        }
        Ok(Produced::new(consumed, produced))
    }

    /// Computes the periodogram of one complete, aligned frame.
    ///
    /// Any partially collected frame is discarded first.
    pub fn process_frame(&mut self, frame: &[Complex32]) -> StageResult<Periodogram> {
        if frame.len() != self.params.frame_length() {
            return Err(StageError::Precondition(format!(
                "frame holds {} samples, expected {}",
                frame.len(),
                self.params.frame_length()
            )));
        }
        self.reset_frame();
        for (s, symbol) in frame.chunks_exact(self.params.symbol_length()).enumerate() {
            self.collect_symbol(s, symbol);
        }
        self.doppler_transform();
        let periodogram = Periodogram::new(self.periodogram.clone());
        self.finish_frame();
        Ok(periodogram)
    }

    fn collect_symbol(&mut self, s: usize, symbol: &[Complex32]) {
        let carriers = self.params.carriers();
        let peri_carriers = self.params.peri_carriers();

        self.spectrum
            .copy_from_slice(&symbol[self.skip..self.skip + carriers]);
        self.carrier_fft.forward(&mut self.spectrum);
        let scale = self.carrier_fft.unitary_scale();

        let mut profile = self.profiles.row_mut(s);
        profile.fill(Complex32::zero());
        for (i, &active) in self.params.carrier_mask().iter().enumerate() {
            let reference = self.reference[[s, i]];
            if !active || reference == Complex32::zero() {
                continue;
            }
            let estimate = self.spectrum[i] * scale / reference;
            profile[pad_spectrum(i, carriers, peri_carriers)] = estimate * self.window_carriers[i];
        }

        // The padded spectrum is transformed in place inside the profile row.
        if let Some(row) = profile.as_slice_mut() {
            self.range_fft.inverse(row);
        }
    }

    fn doppler_transform(&mut self) {
        let symbols = self.params.symbols();
        let norm = (self.params.carriers() * symbols) as f32;
        while self.progress.carrier < self.params.peri_carriers() {
            let r = self.progress.carrier;
            self.column.fill(Complex32::zero());
            for s in 0..symbols {
                self.column[s] = self.profiles[[s, r]] * self.window_symbols[s];
            }
            self.doppler_fft.forward(&mut self.column);
            for (d, value) in self.column.iter().enumerate() {
                self.periodogram[[d, r]] = value.norm() / norm;
            }
            self.progress.carrier += 1;
        }
    }

    fn finish_frame(&mut self) {
        self.logger.record(&format!(
            "periodogram complete after {} samples",
            self.progress.consumed.max(self.params.frame_length())
        ));
        if let Some(metrics) = &self.metrics {
            metrics.record_frame();
        }
        self.reset_frame();
    }

    fn reset_frame(&mut self) {
        self.state = RxState::CollectingSymbols;
        self.progress = FrameProgress::default();
    }
}

impl ProcessingStage for ChannelEstimator {
    type Input = Complex32;
    type Output = f32;

    fn name(&self) -> &'static str {
        self.logger.stage()
    }

    fn required_input(&self, _output_items: usize) -> usize {
        MAX_REQUEST.min(self.buffer_size - self.progress.consumed)
    }

    fn process(&mut self, input: &[Complex32], output: &mut [f32]) -> StageResult<Produced> {
        self.advance(input, output)
    }

    fn reset(&mut self) {
        self.reset_frame();
    }
}

/// Padded-spectrum bin of carrier `i`.
///
/// The lower half of the carriers keeps its index, the upper half moves to
/// the end of the padded buffer, e.g. carriers 8 into 16 bins:
/// `0 1 2 3 4 5 6 7` land on `0 1 2 3 12 13 14 15`.
pub fn pad_spectrum(i: usize, carriers: usize, peri_carriers: usize) -> usize {
    if i < carriers / 2 {
        i
    } else {
        peri_carriers - carriers + i
    }
}

// Carrier window centred on DC in FFT order, symbol window in time order,
// both scaled by 1 / sqrt(sqrt(mean((w_c * w_s)^2))) = 1 / sqrt(rms(w_c) * rms(w_s)).
fn build_windows(params: &ParamSet) -> (Vec<f32>, Vec<f32>) {
    let carriers = params.carriers();
    let w_c = params.window(carriers);
    let w_s = params.window(params.symbols());

    let rms = StatsHelper::rms(&w_c) * StatsHelper::rms(&w_s);
    let norm = if rms > 0.0 { 1.0 / rms.sqrt() } else { 1.0 };

    let window_carriers = (0..carriers)
        .map(|i| w_c[(i + carriers / 2) % carriers] * norm)
        .collect();
    let window_symbols = w_s.iter().map(|w| w * norm).collect();
    (window_carriers, window_symbols)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::math::WindowType;
    use crate::waveform::{WaveformConfig, WaveformGenerator};
    use std::f32::consts::PI;

    fn config(window: WindowType) -> WaveformConfig {
        WaveformConfig {
            carriers: 16,
            symbols: 8,
            peri_carriers: 32,
            peri_symbols: 16,
            cyclic_prefix_length: 4,
            dc_guard: 1,
            nyquist_guard: 2,
            window,
            seed: 42,
            ..Default::default()
        }
    }

    fn setup(window: WindowType, receiver: ReceiverConfig) -> (ChannelEstimator, Vec<Complex32>) {
        let params = Arc::new(ParamSet::new(&config(window)).unwrap());
        let mut frame = vec![Complex32::zero(); params.frame_length()];
        WaveformGenerator::new(params.clone())
            .generate_frame(&mut frame)
            .unwrap();
        (ChannelEstimator::new(params, &receiver).unwrap(), frame)
    }

    // Plays the host: keeps unconsumed input and offers it again.
    fn stream(estimator: &mut ChannelEstimator, input: &[Complex32], chunk: usize) -> Vec<f32> {
        let mut pending: Vec<Complex32> = Vec::new();
        let mut fed = 0;
        let mut output = vec![0.0f32; 2 * estimator.params().peri_carriers()];
        let mut rows = Vec::new();
        loop {
            let next = (fed + chunk).min(input.len());
            pending.extend_from_slice(&input[fed..next]);
            fed = next;
            let produced = estimator.advance(&pending, &mut output).unwrap();
            pending.drain(..produced.consumed);
            rows.extend_from_slice(&output[..produced.produced]);
            if fed == input.len() && produced.is_idle() {
                break;
            }
        }
        rows
    }

    #[test]
    fn pad_spectrum_splits_halves() {
        let bins: Vec<usize> = (0..8).map(|i| pad_spectrum(i, 8, 16)).collect();
        assert_eq!(bins, vec![0, 1, 2, 3, 12, 13, 14, 15]);
        assert_eq!(pad_spectrum(3, 8, 8), 3);
        assert_eq!(pad_spectrum(5, 8, 8), 5);
    }

    // Unitary transforms put the peak at the fraction of carriers in use.
    #[test]
    fn identity_channel_peaks_at_origin() {
        let (mut estimator, frame) = setup(WindowType::Rectangular, ReceiverConfig::default());
        let peri = estimator.process_frame(&frame).unwrap();
        let peak = peri.peak().unwrap();
        assert_eq!((peak.range, peak.doppler), (0, 0));
        assert!((peak.magnitude - 9.0 / 16.0).abs() < 1e-4);
        assert_eq!(peri.shape(), (32, 16));
    }

    #[test]
    fn identity_channel_peak_approaches_one_without_guards() {
        let params = Arc::new(
            ParamSet::new(&WaveformConfig {
                carriers: 64,
                peri_carriers: 64,
                cyclic_prefix_length: 8,
                dc_guard: 0,
                nyquist_guard: 0,
                ..config(WindowType::Rectangular)
            })
            .unwrap(),
        );
        assert_eq!(params.active_carriers(), 63);
        let mut frame = vec![Complex32::zero(); params.frame_length()];
        WaveformGenerator::new(params.clone())
            .generate_frame(&mut frame)
            .unwrap();
        let mut estimator = ChannelEstimator::new(params, &ReceiverConfig::default()).unwrap();
        let peak = estimator.process_frame(&frame).unwrap().peak().unwrap();
        assert_eq!((peak.range, peak.doppler), (0, 0));
        assert!((peak.magnitude - 63.0 / 64.0).abs() < 1e-4);
        assert!((peak.magnitude - 1.0).abs() < 0.02);
    }

    #[test]
    fn tapered_identity_channel_still_peaks_at_origin() {
        for window in [WindowType::Hamming, WindowType::Blackman, WindowType::Hann] {
            let (mut estimator, frame) = setup(window, ReceiverConfig::default());
            let peri = estimator.process_frame(&frame).unwrap();
            let peak = peri.peak().unwrap();
            assert_eq!((peak.range, peak.doppler), (0, 0));
            let rows = peri.to_rows();
            let mean = rows.iter().sum::<f32>() / rows.len() as f32;
            assert!(peak.magnitude > 5.0 * mean);
        }
    }

    #[test]
    fn delayed_moving_target_lands_in_its_cell() {
        let (mut estimator, frame) = setup(WindowType::Hamming, ReceiverConfig::default());
        let symbol_length = estimator.params().symbol_length();
        let len = frame.len();
        let echo: Vec<Complex32> = (0..len)
            .map(|n| {
                let symbol = (n / symbol_length) as f32;
                let rotation = Complex32::from_polar(1.0, 2.0 * PI * 3.0 / 16.0 * symbol);
                frame[(n + len - 2) % len] * rotation
            })
            .collect();
        let peak = estimator.process_frame(&echo).unwrap().peak().unwrap();
        // Two samples of delay at twofold range oversampling.
        assert_eq!((peak.range, peak.doppler), (4, 3));
    }

    #[test]
    fn repeated_frames_give_identical_periodograms() {
        let (mut estimator, frame) = setup(WindowType::Hamming, ReceiverConfig::default());
        let first = estimator.process_frame(&frame).unwrap();
        let second = estimator.process_frame(&frame).unwrap();
        assert_eq!(first, second);
    }

    #[test]
    fn streaming_in_small_chunks_matches_whole_frame() {
        let (mut estimator, frame) = setup(WindowType::Hamming, ReceiverConfig::default());
        let expected = estimator.process_frame(&frame).unwrap().to_rows();
        let rows = stream(&mut estimator, &frame, 7);
        assert_eq!(rows.len(), expected.len());
        for (a, b) in rows.iter().zip(&expected) {
            assert!((a - b).abs() < 1e-6);
        }
        assert_eq!(estimator.state(), RxState::CollectingSymbols);
    }

    #[test]
    fn oversized_buffer_drains_the_tail_of_each_period() {
        let receiver = ReceiverConfig {
            buffer_size: Some(200),
            ..Default::default()
        };
        let (mut estimator, frame) = setup(WindowType::Hamming, receiver);
        let expected = estimator.process_frame(&frame).unwrap().to_rows();

        let mut input = Vec::new();
        for _ in 0..2 {
            input.extend_from_slice(&frame);
            input.extend(std::iter::repeat(Complex32::new(9.0, -9.0)).take(40));
        }
        let rows = stream(&mut estimator, &input, 64);
        assert_eq!(rows.len(), 2 * expected.len());
        assert_eq!(&rows[..expected.len()], &expected[..]);
        assert_eq!(&rows[expected.len()..], &expected[..]);
    }

    #[test]
    fn required_input_counts_down_within_a_period() {
        let receiver = ReceiverConfig {
            buffer_size: Some(5000),
            ..Default::default()
        };
        let (mut estimator, frame) = setup(WindowType::Rectangular, receiver);
        assert_eq!(estimator.required_input(1), 4096);
        let mut output = vec![0.0f32; 32];
        estimator.advance(&frame[..100], &mut output).unwrap();
        assert_eq!(estimator.progress().consumed, 100);
        assert_eq!(estimator.required_input(1), 4096);
        estimator.reset();
        assert_eq!(estimator.progress(), FrameProgress::default());
    }

    #[test]
    fn output_must_hold_whole_rows() {
        let (mut estimator, frame) = setup(WindowType::Hamming, ReceiverConfig::default());
        let mut output = vec![0.0f32; 33];
        assert!(matches!(
            estimator.advance(&frame, &mut output),
            Err(StageError::Precondition(_))
        ));
    }

    #[test]
    fn short_buffer_size_is_rejected() {
        let params = Arc::new(ParamSet::new(&config(WindowType::Hamming)).unwrap());
        let receiver = ReceiverConfig {
            buffer_size: Some(10),
            ..Default::default()
        };
        assert!(matches!(
            ChannelEstimator::new(params, &receiver),
            Err(StageError::Config(_))
        ));
    }

    #[test]
    fn windows_share_one_normalisation() {
        let (estimator, _) = setup(WindowType::Hamming, ReceiverConfig::default());
        let wc = estimator.window_carriers();
        let ws = estimator.window_symbols();
        let mut total = 0.0f64;
        for c in wc {
            for s in ws {
                total += ((c * s) as f64).powi(2);
            }
        }
        let mean = total / (wc.len() * ws.len()) as f64;
        assert!((mean - 1.0).abs() < 1e-4);
        // DC sits at the window centre.
        assert!(wc[0] > wc[8]);
    }
}
