//! MEP-Acquisition: streaming client for the amplifier's UDP protocol
//!
//! [`DeviceSession`] owns the socket and a background receive thread that
//! fills a [`SampleBuffer`]; a foreground consumer drains it on an interval.

pub mod buffer;
pub mod config;
pub mod session;

pub use buffer::SampleBuffer;
pub use config::SessionConfig;
pub use session::{DeviceSession, SessionStats};
