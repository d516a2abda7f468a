//! Frame codec for the amplifier's UDP streaming protocol
//!
//! Every datagram is one frame. The first byte is the frame type; all
//! multi-byte fields are big-endian. Decoding borrows from the datagram so
//! the receive loop can reuse its buffer.
//!
//! Layouts (byte offsets):
//!
//! * MeasurementStart: sampling rate `u32` @4, channel count `u16` @16
//! * Samples: sequence `u32` @4, bundle count `u16` @10, first sample
//!   index `u64` @12, 24-bit samples from @28, channel-major per bundle
//! * Trigger: sequence `u32` @4, trigger count `u16` @8, 20-byte entries
//!   from @12 (microtime `u64`, sample index `u64`, kind `u8`, code `u8`)
//! * JOIN: `[128, 0, 0, 0]`

use crate::emg_types::{MeasurementStartInfo, SampleBundle, TriggerEvent, TriggerKind};
use crate::error::DecodeError;

/// Microvolts per raw sample unit (DC-mode scale 100 / 1000)
pub const SAMPLE_SCALE_UV: f64 = 0.1;

/// Bytes per encoded channel sample
pub const SAMPLE_WIDTH: usize = 3;

/// Offset of the first sample in a Samples frame
pub const SAMPLES_PAYLOAD_OFFSET: usize = 28;

/// Minimum length of a MeasurementStart frame
pub const MEASUREMENT_START_LEN: usize = 18;

/// Offset of the first entry in a Trigger frame
pub const TRIGGER_PAYLOAD_OFFSET: usize = 12;

/// Bytes per trigger entry
pub const TRIGGER_ENTRY_LEN: usize = 20;

/// Length of the JOIN packet
pub const JOIN_PACKET_LEN: usize = 4;

/// Frame type discriminant, the first byte of every datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(u8)]
pub enum FrameType {
    MeasurementStart = 1,
    Samples = 2,
    Trigger = 3,
    MeasurementEnd = 4,
    Join = 128,
}

impl FrameType {
    /// Map a type byte to a frame type
    pub fn from_byte(byte: u8) -> Option<Self> {
        match byte {
            1 => Some(FrameType::MeasurementStart),
            2 => Some(FrameType::Samples),
            3 => Some(FrameType::Trigger),
            4 => Some(FrameType::MeasurementEnd),
            128 => Some(FrameType::Join),
            _ => None,
        }
    }
}

/// Decoded Samples frame header with its undecoded payload
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SamplesFrame<'a> {
    pub sequence_no: u32,
    pub num_bundles: u16,
    pub first_sample_index: u64,
    /// Bytes from offset 28 to the end of the datagram
    pub payload: &'a [u8],
}

impl<'a> SamplesFrame<'a> {
    /// Datagram length required for `num_channels`
    pub fn expected_len(&self, num_channels: u16) -> usize {
        SAMPLES_PAYLOAD_OFFSET + self.num_bundles as usize * num_channels as usize * SAMPLE_WIDTH
    }

    /// Decode the payload into bundles of `num_channels` values each.
    ///
    /// Bundle `i` gets sample index `first_sample_index + i`. Extra trailing
    /// bytes are ignored. Indices past `u64::MAX` reject the whole frame.
    pub fn bundles(&self, num_channels: u16) -> Result<Vec<SampleBundle>, DecodeError> {
        let channels = num_channels as usize;
        let needed = self.num_bundles as usize * channels * SAMPLE_WIDTH;
        if self.payload.len() < needed {
            return Err(DecodeError::Truncated {
                expected: self.expected_len(num_channels),
                actual: SAMPLES_PAYLOAD_OFFSET + self.payload.len(),
            });
        }

        let last_offset = u64::from(self.num_bundles.saturating_sub(1));
        if self.first_sample_index.checked_add(last_offset).is_none() {
            return Err(DecodeError::IndexOverflow {
                first_sample_index: self.first_sample_index,
                num_bundles: self.num_bundles,
            });
        }

        let mut bundles = Vec::with_capacity(self.num_bundles as usize);
        if channels == 0 {
            return Ok(bundles);
        }
        for (b, raw) in self.payload[..needed]
            .chunks_exact(channels * SAMPLE_WIDTH)
            .enumerate()
        {
            let values = raw
                .chunks_exact(SAMPLE_WIDTH)
                .map(|s| sample_to_microvolts([s[0], s[1], s[2]]))
                .collect();
            bundles.push(SampleBundle::new(self.first_sample_index + b as u64, values));
        }
        Ok(bundles)
    }
}

/// Decoded Trigger frame
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct TriggerFrame {
    pub sequence_no: u32,
    pub triggers: Vec<TriggerRecord>,
}

/// One trigger entry of a Trigger frame
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct TriggerRecord {
    /// Device clock in microseconds
    pub microtime: u64,
    pub sample_index: u64,
    pub kind: TriggerKind,
    pub code: u8,
}

impl TriggerRecord {
    /// Trigger event for the epoch extractor
    pub fn event(&self) -> TriggerEvent {
        TriggerEvent::new(self.sample_index, self.kind)
    }
}

/// One decoded datagram
#[derive(Debug, Clone, PartialEq)]
pub enum Frame<'a> {
    MeasurementStart(MeasurementStartInfo),
    Samples(SamplesFrame<'a>),
    Trigger(TriggerFrame),
    MeasurementEnd,
    Join,
}

impl Frame<'_> {
    pub fn frame_type(&self) -> FrameType {
        match self {
            Frame::MeasurementStart(_) => FrameType::MeasurementStart,
            Frame::Samples(_) => FrameType::Samples,
            Frame::Trigger(_) => FrameType::Trigger,
            Frame::MeasurementEnd => FrameType::MeasurementEnd,
            Frame::Join => FrameType::Join,
        }
    }
}

/// Decode one datagram.
///
/// Samples payloads are left undecoded because their layout depends on the
/// channel count announced by an earlier MeasurementStart frame.
pub fn decode_frame(bytes: &[u8]) -> Result<Frame<'_>, DecodeError> {
    let type_byte = *bytes.first().ok_or(DecodeError::Empty)?;
    let frame_type = FrameType::from_byte(type_byte).ok_or(DecodeError::Unknown(type_byte))?;

    match frame_type {
        FrameType::MeasurementStart => {
            require_len(bytes, MEASUREMENT_START_LEN)?;
            Ok(Frame::MeasurementStart(MeasurementStartInfo {
                sampling_rate_hz: read_u32(bytes, 4),
                num_channels: read_u16(bytes, 16),
            }))
        }
        FrameType::Samples => {
            require_len(bytes, SAMPLES_PAYLOAD_OFFSET)?;
            Ok(Frame::Samples(SamplesFrame {
                sequence_no: read_u32(bytes, 4),
                num_bundles: read_u16(bytes, 10),
                first_sample_index: read_u64(bytes, 12),
                payload: &bytes[SAMPLES_PAYLOAD_OFFSET..],
            }))
        }
        FrameType::Trigger => decode_trigger(bytes).map(Frame::Trigger),
        FrameType::MeasurementEnd => Ok(Frame::MeasurementEnd),
        FrameType::Join => Ok(Frame::Join),
    }
}

fn decode_trigger(bytes: &[u8]) -> Result<TriggerFrame, DecodeError> {
    require_len(bytes, TRIGGER_PAYLOAD_OFFSET)?;
    let count = read_u16(bytes, 8) as usize;
    require_len(bytes, TRIGGER_PAYLOAD_OFFSET + count * TRIGGER_ENTRY_LEN)?;

    let triggers = (0..count)
        .map(|i| {
            let at = TRIGGER_PAYLOAD_OFFSET + i * TRIGGER_ENTRY_LEN;
            TriggerRecord {
                microtime: read_u64(bytes, at),
                sample_index: read_u64(bytes, at + 8),
                kind: TriggerKind::from_byte(bytes[at + 16]),
                code: bytes[at + 17],
            }
        })
        .collect();

    Ok(TriggerFrame {
        sequence_no: read_u32(bytes, 4),
        triggers,
    })
}

/// The JOIN packet that unlocks streaming on the device
pub fn encode_join() -> [u8; JOIN_PACKET_LEN] {
    [FrameType::Join as u8, 0, 0, 0]
}

/// Sign-extend a big-endian 24-bit sample.
///
/// The triplet is placed in the top three bytes of a 32-bit word and
/// arithmetic-shifted right by 8.
pub fn int24_to_i32(bytes: [u8; 3]) -> i32 {
    let combined = (bytes[0] as u32) << 24 | (bytes[1] as u32) << 16 | (bytes[2] as u32) << 8;
    (combined as i32) >> 8
}

/// Raw 24-bit sample to microvolts
pub fn sample_to_microvolts(bytes: [u8; 3]) -> f64 {
    int24_to_i32(bytes) as f64 * SAMPLE_SCALE_UV
}

fn require_len(bytes: &[u8], expected: usize) -> Result<(), DecodeError> {
    if bytes.len() < expected {
        Err(DecodeError::Truncated {
            expected,
            actual: bytes.len(),
        })
    } else {
        Ok(())
    }
}

// Callers check lengths before reading.
fn read_u16(bytes: &[u8], at: usize) -> u16 {
    u16::from_be_bytes([bytes[at], bytes[at + 1]])
}

fn read_u32(bytes: &[u8], at: usize) -> u32 {
    u32::from_be_bytes([bytes[at], bytes[at + 1], bytes[at + 2], bytes[at + 3]])
}

fn read_u64(bytes: &[u8], at: usize) -> u64 {
    let mut word = [0u8; 8];
    word.copy_from_slice(&bytes[at..at + 8]);
    u64::from_be_bytes(word)
}
