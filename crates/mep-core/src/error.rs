//! Error handling for the MEP acquisition workspace
//!
//! One error type covers setup, decoding, configuration and the numeric
//! edge cases of the processing routines.

use std::io;
use std::net::SocketAddr;
use thiserror::Error;

/// Result type alias for MEP operations
pub type MepResult<T> = Result<T, MepError>;

/// Failure to interpret one datagram as a protocol frame.
///
/// Always recoverable: the datagram is dropped and the receive loop keeps
/// going.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
pub enum DecodeError {
    /// Zero-length datagram where a frame was expected
    #[error("empty datagram")]
    Empty,

    /// Datagram shorter than its header declares
    #[error("truncated frame: expected {expected} bytes, got {actual}")]
    Truncated {
        /// Length required by the header fields
        expected: usize,
        /// Length actually received
        actual: usize,
    },

    /// First byte is not a known frame type
    #[error("unknown frame type {0}")]
    Unknown(u8),

    /// Sample indices of the frame run past `u64::MAX`
    #[error("sample index overflow: {num_bundles} bundles from {first_sample_index}")]
    IndexOverflow {
        first_sample_index: u64,
        num_bundles: u16,
    },
}

/// Error type for all MEP workspace operations
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum MepError {
    /// Socket could not be created or bound. Fatal, never retried.
    #[error("failed to set up UDP socket on {addr}: {source}")]
    Setup {
        /// Address the socket was bound to
        addr: SocketAddr,
        #[source]
        source: io::Error,
    },

    /// I/O failure outside of setup
    #[error("I/O error: {0}")]
    Io(#[from] io::Error),

    /// Frame decoding failure
    #[error("decode error: {0}")]
    Decode(#[from] DecodeError),

    /// Configuration rejected by validation
    #[error("invalid configuration: {reason}")]
    InvalidConfig {
        /// Description of the configuration error
        reason: String,
    },

    /// Baseline window maps to zero samples after clamping
    #[error("baseline window is empty (indices {start_idx}..{end_idx})")]
    EmptyBaselineWindow {
        /// Clamped start index
        start_idx: usize,
        /// Clamped end index
        end_idx: usize,
    },

    /// Signal has no samples left to measure
    #[error("signal is empty after cropping")]
    EmptySignal,

    /// Channel index outside the configured channel count
    #[error("channel {channel} out of range ({channels} channels)")]
    ChannelOutOfRange {
        /// Requested channel
        channel: usize,
        /// Available channels
        channels: usize,
    },
}

/// Convenience macro for creating configuration errors
#[macro_export]
macro_rules! config_error {
    ($($arg:tt)*) => {
        $crate::error::MepError::InvalidConfig {
            reason: format!($($arg)*),
        }
    };
}
