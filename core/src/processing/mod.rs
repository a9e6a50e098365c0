pub mod periodogram;
pub mod range_doppler;

pub use periodogram::{Periodogram, PeriodogramPeak};
pub use range_doppler::{
    pad_spectrum, ChannelEstimator, FrameProgress, PrefixAlignment, ReceiverConfig, RxState,
};
