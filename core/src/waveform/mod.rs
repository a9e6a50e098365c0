pub mod constellation;
pub mod generator;
pub mod params;
pub mod transmitter;

pub use constellation::{get_constellation, Modulation, ModulationScheme};
pub use generator::{reference_symbols, WaveformGenerator};
pub use params::{ParamSet, WaveformConfig};
pub use transmitter::{FrameTag, FrameTransmitter};
