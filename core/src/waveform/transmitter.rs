use crate::prelude::StageResult;
use crate::telemetry::LogManager;
use crate::waveform::generator::WaveformGenerator;
use crate::waveform::params::ParamSet;
use num_complex::Complex32;
use rustfft::num_traits::Zero;
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Marks the first sample of a frame on the output stream.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct FrameTag {
    /// Absolute output sample index.
    pub offset: u64,
    pub length: usize,
}

/// Streams one pre-generated frame over and over.
pub struct FrameTransmitter {
    frame: Vec<Complex32>,
    position: usize,
    written: u64,
    logger: LogManager,
}

impl FrameTransmitter {
    pub fn new(params: Arc<ParamSet>) -> StageResult<Self> {
        let mut frame = vec![Complex32::zero(); params.frame_length()];
        WaveformGenerator::new(params).generate_frame(&mut frame)?;
        let logger = LogManager::for_stage("frame_transmitter");
        logger.trace(&format!("prepared frame of {} samples", frame.len()));
        Ok(Self {
            frame,
            position: 0,
            written: 0,
            logger,
        })
    }

    pub fn frame(&self) -> &[Complex32] {
        &self.frame
    }

    /// Writes samples up to the end of the current frame at most.
    ///
    /// Returns the number written and a tag when a new frame started in this call.
    pub fn transmit(&mut self, output: &mut [Complex32]) -> (usize, Option<FrameTag>) {
        let count = output.len().min(self.frame.len() - self.position);
        if count == 0 {
            return (0, None);
        }
        let tag = (self.position == 0).then(|| FrameTag {
            offset: self.written,
            length: self.frame.len(),
        });
        output[..count].copy_from_slice(&self.frame[self.position..self.position + count]);
        self.position = (self.position + count) % self.frame.len();
        self.written += count as u64;
        if let Some(tag) = tag {
            if self.logger.tracing() {
                self.logger.trace(&format!("frame start at sample {}", tag.offset));
            }
        }
        (count, tag)
    }
}
