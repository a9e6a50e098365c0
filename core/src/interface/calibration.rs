use crate::prelude::{StageError, StageResult};
use num_complex::Complex32;
use tokio::sync::mpsc::{self, error::TrySendError, Receiver, Sender};

/// Bytes per complex32 element on the wire: little-endian real then imaginary.
const ELEMENT_BYTES: usize = 8;

/// Per-element gain/phase correction Γ published by the calibrator.
#[derive(Debug, Clone, PartialEq)]
pub struct CalibrationMessage {
    pub gains: Vec<Complex32>,
}

impl CalibrationMessage {
    pub fn new(gains: Vec<Complex32>) -> Self {
        Self { gains }
    }

    pub fn to_bytes(&self) -> Vec<u8> {
        let mut bytes = Vec::with_capacity(self.gains.len() * ELEMENT_BYTES);
        for gain in &self.gains {
            bytes.extend_from_slice(&gain.re.to_le_bytes());
            bytes.extend_from_slice(&gain.im.to_le_bytes());
        }
        bytes
    }

    /// Decodes a blob that must hold exactly `array_size` elements.
    pub fn from_bytes(bytes: &[u8], array_size: usize) -> StageResult<Self> {
        if bytes.len() != array_size * ELEMENT_BYTES {
            return Err(StageError::MalformedMessage(format!(
                "calibration blob has {} bytes, expected {}",
                bytes.len(),
                array_size * ELEMENT_BYTES
            )));
        }
        let gains = bytes
            .chunks_exact(ELEMENT_BYTES)
            .map(|chunk| {
                let re = f32::from_le_bytes([chunk[0], chunk[1], chunk[2], chunk[3]]);
                let im = f32::from_le_bytes([chunk[4], chunk[5], chunk[6], chunk[7]]);
                Complex32::new(re, im)
            })
            .collect();
        Ok(Self { gains })
    }
}

/// Handle used to ask the calibrator for one update.
///
/// Requests made before the calibrator polls collapse into one.
#[derive(Debug, Clone)]
pub struct CalibrationTrigger {
    sender: Sender<()>,
}

impl CalibrationTrigger {
    /// Returns false once the calibrator is gone.
    pub fn request(&self) -> bool {
        match self.sender.try_send(()) {
            Ok(()) | Err(TrySendError::Full(())) => true,
            Err(TrySendError::Closed(())) => false,
        }
    }
}

/// Single-slot trigger channel: the handle for the requester and the
/// receiving end for [`crate::array::Calibrator`].
pub fn calibration_trigger() -> (CalibrationTrigger, Receiver<()>) {
    let (sender, receiver) = mpsc::channel(1);
    (CalibrationTrigger { sender }, receiver)
}

/// Channel carrying encoded [`CalibrationMessage`] blobs.
pub fn calibration_channel(capacity: usize) -> (Sender<Vec<u8>>, Receiver<Vec<u8>>) {
    mpsc::channel(capacity.max(1))
}
