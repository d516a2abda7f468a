//! MEP-Core: Foundation types for EMG acquisition and MEP analysis
//!
//! Data model, error type and the UDP frame codec. No I/O happens here.

pub mod channel_series;
pub mod emg_types;
pub mod epoch;
pub mod error;
pub mod frame;

pub use channel_series::ChannelSeries;
pub use emg_types::*;
pub use epoch::{Epoch, EpochKey, DEFAULT_DEDUP_DECIMALS};
pub use error::{DecodeError, MepError, MepResult};
pub use frame::{decode_frame, encode_join, Frame, FrameType};
