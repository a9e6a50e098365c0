use anyhow::Context;
use ofdmradar::array::ArrayConfig;
use ofdmradar::processing::ReceiverConfig;
use ofdmradar::waveform::WaveformConfig;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

/// Point reflector seen by the radar chain.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct EchoConfig {
    /// Round-trip delay in samples; must stay within the cyclic prefix.
    pub delay: usize,
    /// Doppler shift in cycles per OFDM symbol.
    #[serde(default)]
    pub doppler: f64,
    #[serde(default = "unit_amplitude")]
    pub amplitude: f32,
}

/// Far-field emitter seen by the array.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct SourceConfig {
    /// Radians from broadside.
    pub angle: f64,
    #[serde(default = "unit_amplitude")]
    pub power: f32,
}

fn unit_amplitude() -> f32 {
    1.0
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScenarioConfig {
    pub echoes: Vec<EchoConfig>,
    /// Standard deviation of the complex receiver noise.
    pub noise: f32,
    pub sources: Vec<SourceConfig>,
    pub array_noise: f32,
    /// Spread of the per-element amplitude error; phase error spans the same
    /// fraction of ±π. Element 0 is always the unit reference.
    pub gain_error: f32,
    pub pilot_power: f32,
    pub seed: u64,
}

impl Default for ScenarioConfig {
    fn default() -> Self {
        Self {
            echoes: vec![EchoConfig {
                delay: 4,
                doppler: 0.125,
                amplitude: 1.0,
            }],
            noise: 0.01,
            sources: vec![SourceConfig {
                angle: 0.35,
                power: 1.0,
            }],
            array_noise: 0.01,
            gain_error: 0.0,
            pilot_power: 1.0,
            seed: 7,
        }
    }
}

#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct RunOptions {
    pub frames: usize,
    /// Samples handed to each stage per call.
    pub chunk_size: usize,
    pub calibrate: bool,
    /// Covariance matrices estimated after calibration.
    pub blocks: usize,
}

impl Default for RunOptions {
    fn default() -> Self {
        Self {
            frames: 2,
            chunk_size: 1024,
            calibrate: true,
            blocks: 4,
        }
    }
}

#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct WorkflowConfig {
    pub waveform: WaveformConfig,
    pub receiver: ReceiverConfig,
    pub array: ArrayConfig,
    pub scenario: ScenarioConfig,
    pub run: RunOptions,
}

impl WorkflowConfig {
    pub fn load<P: AsRef<Path>>(path: P) -> anyhow::Result<Self> {
        let path_ref = path.as_ref();
        let contents = fs::read_to_string(path_ref)
            .with_context(|| format!("reading workflow config {}", path_ref.display()))?;
        let config: WorkflowConfig = serde_yaml::from_str(&contents)
            .with_context(|| format!("parsing workflow config {}", path_ref.display()))?;
        Ok(config)
    }

    /// Applies command-line overrides on top of the loaded file.
    pub fn with_overrides(mut self, seed: Option<u64>, chunk_size: Option<usize>) -> Self {
        if let Some(seed) = seed {
            self.waveform.seed = seed;
            self.scenario.seed = seed;
        }
        if let Some(chunk_size) = chunk_size {
            self.run.chunk_size = chunk_size;
        }
        self
    }
}
