use crate::math::WindowType;
use crate::prelude::{StageError, StageResult};
use crate::waveform::constellation::Modulation;
use num_complex::Complex32;
use serde::{Deserialize, Serialize};

/// Serializable description of one OFDM waveform configuration.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WaveformConfig {
    /// Size of the OFDM FFT; not every carrier is in use.
    pub carriers: usize,
    pub symbols: usize,
    /// Range FFT size of the periodogram (>= carriers).
    pub peri_carriers: usize,
    /// Doppler FFT size of the periodogram (>= symbols).
    pub peri_symbols: usize,
    pub cyclic_prefix_length: usize,
    /// Carriers left empty on each side of DC, on top of DC itself.
    pub dc_guard: usize,
    /// Carriers left empty on each side of Nyquist.
    pub nyquist_guard: usize,
    pub window: WindowType,
    pub modulation: Modulation,
    pub seed: u64,
}

impl Default for WaveformConfig {
    fn default() -> Self {
        Self {
            carriers: 128,
            symbols: 32,
            peri_carriers: 512,
            peri_symbols: 128,
            cyclic_prefix_length: 32,
            dc_guard: 1,
            nyquist_guard: 8,
            window: WindowType::Hamming,
            modulation: Modulation::default(),
            seed: 0,
        }
    }
}

/// Immutable parameter bundle shared by every stage of one waveform.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamSet {
    carriers: usize,
    symbols: usize,
    peri_carriers: usize,
    peri_symbols: usize,
    cyclic_prefix_length: usize,
    dc_guard: usize,
    nyquist_guard: usize,
    window_type: WindowType,
    constellation: Vec<Complex32>,
    seed: u64,
    carrier_mask: Vec<bool>,
    symbol_length: usize,
    frame_length: usize,
}

impl ParamSet {
    pub fn new(config: &WaveformConfig) -> StageResult<Self> {
        let constellation = config.modulation.constellation()?;
        Self::with_constellation(config, constellation)
    }

    /// Same as [`ParamSet::new`] but with an explicit symbol alphabet.
    pub fn with_constellation(config: &WaveformConfig, constellation: Vec<Complex32>) -> StageResult<Self> {
        if config.carriers == 0 || config.symbols == 0 {
            return Err(StageError::Config(
                "carriers and symbols must both be non-zero".into(),
            ));
        }
        if config.peri_carriers < config.carriers {
            return Err(StageError::Config(format!(
                "peri_carriers {} is smaller than carriers {}",
                config.peri_carriers, config.carriers
            )));
        }
        if config.peri_symbols < config.symbols {
            return Err(StageError::Config(format!(
                "peri_symbols {} is smaller than symbols {}",
                config.peri_symbols, config.symbols
            )));
        }
        if config.cyclic_prefix_length > config.carriers {
            return Err(StageError::Config(format!(
                "cyclic prefix {} exceeds carriers {}",
                config.cyclic_prefix_length, config.carriers
            )));
        }
        if constellation.is_empty() {
            return Err(StageError::Config("constellation is empty".into()));
        }

        let carrier_mask = build_carrier_mask(config.carriers, config.dc_guard, config.nyquist_guard);
        if !carrier_mask.iter().any(|&active| active) {
            return Err(StageError::Config(
                "guard bands leave no active carriers".into(),
            ));
        }

        let symbol_length = config.carriers + config.cyclic_prefix_length;
        Ok(Self {
            carriers: config.carriers,
            symbols: config.symbols,
            peri_carriers: config.peri_carriers,
            peri_symbols: config.peri_symbols,
            cyclic_prefix_length: config.cyclic_prefix_length,
            dc_guard: config.dc_guard,
            nyquist_guard: config.nyquist_guard,
            window_type: config.window,
            constellation,
            seed: config.seed,
            carrier_mask,
            symbol_length,
            frame_length: symbol_length * config.symbols,
        })
    }

    pub fn carriers(&self) -> usize {
        self.carriers
    }

    pub fn symbols(&self) -> usize {
        self.symbols
    }

    pub fn peri_carriers(&self) -> usize {
        self.peri_carriers
    }

    pub fn peri_symbols(&self) -> usize {
        self.peri_symbols
    }

    /// Total number of periodogram cells.
    pub fn peri_length(&self) -> usize {
        self.peri_carriers * self.peri_symbols
    }

    pub fn cyclic_prefix_length(&self) -> usize {
        self.cyclic_prefix_length
    }

    pub fn dc_guard(&self) -> usize {
        self.dc_guard
    }

    pub fn nyquist_guard(&self) -> usize {
        self.nyquist_guard
    }

    pub fn window_type(&self) -> WindowType {
        self.window_type
    }

    pub fn constellation(&self) -> &[Complex32] {
        &self.constellation
    }

    pub fn seed(&self) -> u64 {
        self.seed
    }

    pub fn carrier_mask(&self) -> &[bool] {
        &self.carrier_mask
    }

    pub fn active_carriers(&self) -> usize {
        self.carrier_mask.iter().filter(|&&active| active).count()
    }

    pub fn symbol_length(&self) -> usize {
        self.symbol_length
    }

    pub fn frame_length(&self) -> usize {
        self.frame_length
    }

    /// Window of the configured type with `taps` points.
    pub fn window(&self, taps: usize) -> Vec<f32> {
        self.window_type.taps(taps)
    }
}

// Carrier indices are in FFT order: DC at 0, Nyquist at carriers / 2.
fn build_carrier_mask(carriers: usize, dc_guard: usize, nyquist_guard: usize) -> Vec<bool> {
    let half = carriers / 2;
    (0..carriers)
        .map(|i| {
            let near_dc = i <= dc_guard || i + dc_guard >= carriers;
            let near_nyquist = i + nyquist_guard >= half && i < half + nyquist_guard;
            !near_dc && !near_nyquist
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn small_config() -> WaveformConfig {
        WaveformConfig {
            carriers: 16,
            symbols: 8,
            peri_carriers: 32,
            peri_symbols: 16,
            cyclic_prefix_length: 4,
            dc_guard: 1,
            nyquist_guard: 2,
            ..Default::default()
        }
    }

    #[test]
    fn derived_lengths_follow_configuration() {
        let params = ParamSet::new(&small_config()).unwrap();
        assert_eq!(params.symbol_length(), 20);
        assert_eq!(params.frame_length(), 160);
        assert_eq!(params.peri_length(), 512);
        assert_eq!(params.constellation().len(), 4);
    }

    #[test]
    fn carrier_mask_excludes_dc_and_nyquist_guards() {
        let params = ParamSet::new(&small_config()).unwrap();
        let active: Vec<usize> = params
            .carrier_mask()
            .iter()
            .enumerate()
            .filter(|(_, &on)| on)
            .map(|(i, _)| i)
            .collect();
        assert_eq!(active, vec![2, 3, 4, 5, 10, 11, 12, 13, 14]);
        assert_eq!(params.active_carriers(), 9);
    }

    #[test]
    fn zero_guards_still_drop_dc() {
        let config = WaveformConfig {
            dc_guard: 0,
            nyquist_guard: 0,
            ..small_config()
        };
        let params = ParamSet::new(&config).unwrap();
        assert!(!params.carrier_mask()[0]);
        assert_eq!(params.active_carriers(), 15);
    }

    #[test]
    fn undersized_periodogram_is_rejected() {
        let config = WaveformConfig {
            peri_symbols: 4,
            ..small_config()
        };
        assert!(matches!(ParamSet::new(&config), Err(StageError::Config(_))));
    }

    #[test]
    fn guards_covering_every_carrier_are_rejected() {
        let config = WaveformConfig {
            dc_guard: 4,
            nyquist_guard: 4,
            ..small_config()
        };
        assert!(matches!(ParamSet::new(&config), Err(StageError::Config(_))));
    }

    #[test]
    fn config_deserializes_with_defaults() {
        let config: WaveformConfig =
            serde_json::from_str(r#"{"carriers":64,"window":"rectangular"}"#).unwrap();
        assert_eq!(config.carriers, 64);
        assert_eq!(config.symbols, 32);
        assert_eq!(config.window, WindowType::Rectangular);
    }
}
