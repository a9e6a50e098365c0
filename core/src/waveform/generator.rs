use crate::math::FftHelper;
use crate::prelude::{StageError, StageResult};
use crate::waveform::params::ParamSet;
use ndarray::Array2;
use num_complex::Complex32;
use rand::{rngs::StdRng, Rng, SeedableRng};
use rustfft::num_traits::Zero;
use std::sync::Arc;

/// Seeded source of transmit symbols and cyclic-prefixed OFDM frames.
///
/// Two generators built from the same [`ParamSet`] and driven through the
/// same sequence of calls produce identical output. [`WaveformGenerator::reseed`]
/// rewinds to the first frame.
pub struct WaveformGenerator {
    params: Arc<ParamSet>,
    rng: StdRng,
    fft: FftHelper,
    spectrum: Vec<Complex32>,
}

impl WaveformGenerator {
    pub fn new(params: Arc<ParamSet>) -> Self {
        let rng = StdRng::seed_from_u64(params.seed());
        let fft = FftHelper::new(params.carriers());
        let spectrum = vec![Complex32::zero(); params.carriers()];
        Self {
            params,
            rng,
            fft,
            spectrum,
        }
    }

    pub fn params(&self) -> &Arc<ParamSet> {
        &self.params
    }

    pub fn reseed(&mut self) {
        self.rng = StdRng::seed_from_u64(self.params.seed());
    }

    /// Fills one symbol worth of carriers; guard carriers are zero.
    pub fn generate_tx_symbols(&mut self, out: &mut [Complex32]) -> StageResult<()> {
        check_len("carrier buffer", out.len(), self.params.carriers())?;
        draw_symbols(&mut self.rng, &self.params, out);
        Ok(())
    }

    /// One time-domain symbol: cyclic prefix followed by the full IFFT output.
    pub fn generate_symbol(&mut self, out: &mut [Complex32]) -> StageResult<()> {
        check_len("symbol buffer", out.len(), self.params.symbol_length())?;
        let carriers = self.params.carriers();
        let cp = self.params.cyclic_prefix_length();

        draw_symbols(&mut self.rng, &self.params, &mut self.spectrum);
        self.fft.inverse(&mut self.spectrum);
        let scale = self.fft.unitary_scale();

        for (dst, src) in out[cp..].iter_mut().zip(&self.spectrum) {
            *dst = src * scale;
        }
        let (prefix, body) = out.split_at_mut(cp);
        prefix.copy_from_slice(&body[carriers - cp..]);
        Ok(())
    }

    pub fn generate_frame(&mut self, out: &mut [Complex32]) -> StageResult<()> {
        check_len("frame buffer", out.len(), self.params.frame_length())?;
        for symbol in out.chunks_exact_mut(self.params.symbol_length()) {
            self.generate_symbol(symbol)?;
        }
        Ok(())
    }

    /// Carrier symbols of the first frame after seeding, one row per OFDM symbol.
    ///
    /// Uses a private RNG, so the generator's own sequence is unaffected.
    pub fn reference_symbols(&self) -> Array2<Complex32> {
        reference_symbols(&self.params)
    }
}

/// Transmit symbols a receiver expects for `params`, `symbols × carriers`.
pub fn reference_symbols(params: &ParamSet) -> Array2<Complex32> {
    let mut rng = StdRng::seed_from_u64(params.seed());
    let mut reference = Array2::zeros((params.symbols(), params.carriers()));
    let mut row = vec![Complex32::zero(); params.carriers()];
    for mut dst in reference.rows_mut() {
        draw_symbols(&mut rng, params, &mut row);
        for (d, s) in dst.iter_mut().zip(&row) {
            *d = *s;
        }
    }
    reference
}

fn draw_symbols(rng: &mut StdRng, params: &ParamSet, out: &mut [Complex32]) {
    let constellation = params.constellation();
    for (value, &active) in out.iter_mut().zip(params.carrier_mask()) {
        *value = if active {
            constellation[rng.gen_range(0..constellation.len())]
        } else {
            Complex32::zero()
        };
    }
}

fn check_len(what: &str, len: usize, expected: usize) -> StageResult<()> {
    if len != expected {
        return Err(StageError::Precondition(format!(
            "{} holds {} samples, expected {}",
            what, len, expected
        )));
    }
    Ok(())
}
