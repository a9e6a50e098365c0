pub mod calibration;

pub use calibration::{calibration_channel, calibration_trigger, CalibrationMessage, CalibrationTrigger};
