//! MEP-Simulation: simulated amplifier for development and tests
//!
//! Speaks the device side of the UDP protocol and produces EMG with
//! trigger-locked evoked responses.

pub mod amplifier;
pub mod frames;
pub mod mep_patterns;

pub use amplifier::*;
pub use mep_patterns::MepPattern;
