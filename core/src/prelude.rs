use serde::{Deserialize, Serialize};

/// Common error type for stage construction and execution.
#[derive(thiserror::Error, Debug, Clone, PartialEq)]
pub enum StageError {
    /// Invalid parameters. Retrying with the same arguments fails again.
    #[error("configuration error: {0}")]
    Config(String),
    #[error("numerical error: {0}")]
    Numerical(String),
    #[error("malformed message: {0}")]
    MalformedMessage(String),
    /// The caller broke the buffer contract of a stage.
    #[error("precondition violated: {0}")]
    Precondition(String),
}

pub type StageResult<T> = Result<T, StageError>;

/// Item counts reported by one processing call.
///
/// Both counts are in stream items (single samples), not logical units.
/// A call that lacks input returns zeros rather than an error.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Produced {
    pub consumed: usize,
    pub produced: usize,
}

impl Produced {
    pub fn new(consumed: usize, produced: usize) -> Self {
        Self { consumed, produced }
    }

    pub fn is_idle(&self) -> bool {
        self.consumed == 0 && self.produced == 0
    }
}

/// Capability interface shared by all streaming stages.
///
/// The host calls [`ProcessingStage::process`] repeatedly with whatever input
/// and output space it has; the stage reports what it used and keeps any
/// partial progress internally.
pub trait ProcessingStage {
    type Input: Copy;
    type Output: Copy;

    fn name(&self) -> &'static str;

    /// Input items the stage wants before it can emit `output_items` items.
    fn required_input(&self, output_items: usize) -> usize;

    fn process(
        &mut self,
        input: &[Self::Input],
        output: &mut [Self::Output],
    ) -> StageResult<Produced>;

    /// Drops partial progress so the next call starts on a fresh unit.
    fn reset(&mut self);
}

/// Checks that `len` is a whole number of `unit`-sized items.
pub(crate) fn ensure_multiple(what: &str, len: usize, unit: usize) -> StageResult<()> {
    if unit == 0 || len % unit != 0 {
        return Err(StageError::Precondition(format!(
            "{} length {} is not a multiple of {}",
            what, len, unit
        )));
    }
    Ok(())
}
