//! Sensor-array processing: covariance estimation, self-calibration and
//! subspace direction finding.

pub mod calibration;
pub mod config;
pub mod correlation;
pub mod esprit;
pub mod music;
pub mod steering;
pub mod subspace;

pub use calibration::Calibrator;
pub use config::ArrayConfig;
pub use correlation::CorrelationEstimator;
pub use esprit::EspritEstimator;
pub use music::{find_peaks, MusicEstimator};
pub use steering::{angle_from_omega, omega_from_angle, steering_vector};
pub use subspace::Subspaces;
