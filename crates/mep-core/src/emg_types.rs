//! EMG acquisition types shared by the device session and the consumer

use serde::{Deserialize, Serialize};

/// Measurement parameters announced by a MeasurementStart frame
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct MeasurementStartInfo {
    /// Sampling rate in Hz
    pub sampling_rate_hz: u32,
    /// Number of channels carried in every sample bundle
    pub num_channels: u16,
}

impl MeasurementStartInfo {
    /// Create new measurement info
    pub fn new(sampling_rate_hz: u32, num_channels: u16) -> Self {
        Self {
            sampling_rate_hz,
            num_channels,
        }
    }

    /// Samples can only be decoded once both fields are non-zero
    pub fn is_configured(&self) -> bool {
        self.sampling_rate_hz > 0 && self.num_channels > 0
    }
}

/// One time instant's worth of per-channel samples, in microvolts
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SampleBundle {
    /// Device sample index of this instant
    pub sample_index: u64,
    /// Channel values, channel order as transmitted
    pub values: Vec<f64>,
}

impl SampleBundle {
    /// Create new sample bundle
    pub fn new(sample_index: u64, values: Vec<f64>) -> Self {
        Self {
            sample_index,
            values,
        }
    }

    /// Number of channels in this bundle
    pub fn channel_count(&self) -> usize {
        self.values.len()
    }
}

/// Trigger source reported by the amplifier
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum TriggerKind {
    Disabled,
    Stimulus,
    Video,
    Mute,
    Parallel,
    Other(u8), // For extensibility
}

impl TriggerKind {
    /// Map the wire byte to a trigger kind
    pub fn from_byte(byte: u8) -> Self {
        match byte {
            0 => TriggerKind::Disabled,
            1 => TriggerKind::Stimulus,
            2 => TriggerKind::Video,
            3 => TriggerKind::Mute,
            4 => TriggerKind::Parallel,
            other => TriggerKind::Other(other),
        }
    }

    /// Wire byte for this trigger kind
    pub fn to_byte(self) -> u8 {
        match self {
            TriggerKind::Disabled => 0,
            TriggerKind::Stimulus => 1,
            TriggerKind::Video => 2,
            TriggerKind::Mute => 3,
            TriggerKind::Parallel => 4,
            TriggerKind::Other(byte) => byte,
        }
    }
}

/// Instant at which an external trigger pulse occurred
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TriggerEvent {
    /// Sample index of the trigger
    pub time_index: u64,
    /// Where the trigger came from
    pub kind: TriggerKind,
}

impl TriggerEvent {
    /// Create new trigger event
    pub fn new(time_index: u64, kind: TriggerKind) -> Self {
        Self { time_index, kind }
    }

    /// Externally supplied stimulus trigger at `time_index`
    pub fn at(time_index: u64) -> Self {
        Self::new(time_index, TriggerKind::Stimulus)
    }

    /// Whether this trigger should cut an epoch
    pub fn is_active(&self) -> bool {
        self.kind != TriggerKind::Disabled
    }
}

/// Connection state of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum ConnectionState {
    #[default]
    Disconnected,
    Connecting,
    Connected,
}

/// Measurement state of a device session
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub enum MeasurementState {
    #[default]
    Idle,
    Measuring,
}

impl std::fmt::Display for TriggerKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TriggerKind::Disabled => write!(f, "Disabled"),
            TriggerKind::Stimulus => write!(f, "Stimulus"),
            TriggerKind::Video => write!(f, "Video"),
            TriggerKind::Mute => write!(f, "Mute"),
            TriggerKind::Parallel => write!(f, "Parallel"),
            TriggerKind::Other(id) => write!(f, "Other({})", id),
        }
    }
}

impl std::fmt::Display for MeasurementState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            MeasurementState::Idle => write!(f, "idle"),
            MeasurementState::Measuring => write!(f, "measuring"),
        }
    }
}

impl std::fmt::Display for ConnectionState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ConnectionState::Disconnected => write!(f, "disconnected"),
            ConnectionState::Connecting => write!(f, "connecting"),
            ConnectionState::Connected => write!(f, "connected"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_measurement_info_configured() {
        assert!(MeasurementStartInfo::new(1000, 2).is_configured());
        assert!(!MeasurementStartInfo::new(0, 2).is_configured());
        assert!(!MeasurementStartInfo::new(1000, 0).is_configured());
    }

    #[test]
    fn test_trigger_kind_bytes() {
        for byte in 0..=8u8 {
            assert_eq!(TriggerKind::from_byte(byte).to_byte(), byte);
        }
        assert_eq!(TriggerKind::from_byte(1), TriggerKind::Stimulus);
        assert!(!TriggerEvent::new(10, TriggerKind::Disabled).is_active());
        assert!(TriggerEvent::at(10).is_active());
    }
}
