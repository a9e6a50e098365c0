//! OFDM radar signal processing and sensor-array direction finding.
//!
//! The waveform side generates seeded OFDM frames and turns received frames
//! into range–Doppler periodograms. The array side estimates spatial
//! covariance, self-calibrates element gains against a pilot and finds
//! directions of arrival with MUSIC or ESPRIT. Every streaming stage
//! implements [`ProcessingStage`].

pub mod array;
pub mod interface;
pub mod math;
pub mod prelude;
pub mod processing;
pub mod telemetry;
pub mod waveform;

pub use num_complex::{Complex32, Complex64};
pub use prelude::{ProcessingStage, Produced, StageError, StageResult};
