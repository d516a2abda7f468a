//! Device-side frame encoding, the inverse of `mep_core::frame`

use mep_core::frame::{
    FrameType, TriggerRecord, SAMPLES_PAYLOAD_OFFSET, SAMPLE_SCALE_UV, TRIGGER_ENTRY_LEN,
    TRIGGER_PAYLOAD_OFFSET,
};
use mep_core::MeasurementStartInfo;

/// Smallest and largest raw 24-bit sample
pub const RAW_MIN: i32 = -(1 << 23);
pub const RAW_MAX: i32 = (1 << 23) - 1;

/// Length the simulator uses for MeasurementStart frames; the device sends
/// more header fields than the client reads.
const MEASUREMENT_START_FRAME_LEN: usize = 32;

/// Encode a MeasurementStart frame
pub fn measurement_start(info: MeasurementStartInfo) -> Vec<u8> {
    let mut frame = vec![0u8; MEASUREMENT_START_FRAME_LEN];
    frame[0] = FrameType::MeasurementStart as u8;
    frame[4..8].copy_from_slice(&info.sampling_rate_hz.to_be_bytes());
    frame[16..18].copy_from_slice(&info.num_channels.to_be_bytes());
    frame
}

/// Encode a Samples frame from raw per-bundle channel values
pub fn samples(sequence_no: u32, first_sample_index: u64, bundles: &[Vec<i32>]) -> Vec<u8> {
    let channels = bundles.first().map_or(0, Vec::len);
    let mut frame = Vec::with_capacity(SAMPLES_PAYLOAD_OFFSET + bundles.len() * channels * 3);
    frame.resize(SAMPLES_PAYLOAD_OFFSET, 0);
    frame[0] = FrameType::Samples as u8;
    frame[4..8].copy_from_slice(&sequence_no.to_be_bytes());
    frame[10..12].copy_from_slice(&(bundles.len() as u16).to_be_bytes());
    frame[12..20].copy_from_slice(&first_sample_index.to_be_bytes());
    for bundle in bundles {
        for &raw in bundle {
            frame.extend_from_slice(&i32_to_int24(raw));
        }
    }
    frame
}

/// Encode a Trigger frame
pub fn trigger(sequence_no: u32, triggers: &[TriggerRecord]) -> Vec<u8> {
    let mut frame = vec![0u8; TRIGGER_PAYLOAD_OFFSET + triggers.len() * TRIGGER_ENTRY_LEN];
    frame[0] = FrameType::Trigger as u8;
    frame[4..8].copy_from_slice(&sequence_no.to_be_bytes());
    frame[8..10].copy_from_slice(&(triggers.len() as u16).to_be_bytes());
    for (i, record) in triggers.iter().enumerate() {
        let at = TRIGGER_PAYLOAD_OFFSET + i * TRIGGER_ENTRY_LEN;
        frame[at..at + 8].copy_from_slice(&record.microtime.to_be_bytes());
        frame[at + 8..at + 16].copy_from_slice(&record.sample_index.to_be_bytes());
        frame[at + 16] = record.kind.to_byte();
        frame[at + 17] = record.code;
    }
    frame
}

/// Encode a MeasurementEnd frame
pub fn measurement_end() -> Vec<u8> {
    vec![FrameType::MeasurementEnd as u8, 0, 0, 0]
}

/// Low three bytes of a sample, saturated to the 24-bit range
pub fn i32_to_int24(raw: i32) -> [u8; 3] {
    let bytes = raw.clamp(RAW_MIN, RAW_MAX).to_be_bytes();
    [bytes[1], bytes[2], bytes[3]]
}

/// Microvolts to the nearest raw device unit
pub fn microvolts_to_raw(microvolts: f64) -> i32 {
    (microvolts / SAMPLE_SCALE_UV)
        .round()
        .clamp(RAW_MIN as f64, RAW_MAX as f64) as i32
}

#[cfg(test)]
mod tests {
    use super::*;
    use mep_core::frame::int24_to_i32;
    use mep_core::{decode_frame, Frame, TriggerKind};

    #[test]
    fn test_int24_extremes() {
        for raw in [0, 1, -1, RAW_MIN, RAW_MAX, 123_456, -654_321] {
            assert_eq!(int24_to_i32(i32_to_int24(raw)), raw);
        }
        assert_eq!(i32_to_int24(RAW_MAX + 10), [0x7F, 0xFF, 0xFF]);
        assert_eq!(i32_to_int24(i32::MIN), [0x80, 0x00, 0x00]);
    }

    #[test]
    fn test_microvolts_to_raw() {
        assert_eq!(microvolts_to_raw(12.34), 123);
        assert_eq!(microvolts_to_raw(-0.26), -3);
        assert_eq!(microvolts_to_raw(1e9), RAW_MAX);
    }

    #[test]
    fn test_frames_decode() {
        let start = measurement_start(MeasurementStartInfo::new(3000, 4));
        assert_eq!(
            decode_frame(&start).unwrap(),
            Frame::MeasurementStart(MeasurementStartInfo::new(3000, 4))
        );

        let raw = vec![vec![10, -10, 0], vec![20, -20, 5]];
        let bytes = samples(9, 500, &raw);
        let Frame::Samples(frame) = decode_frame(&bytes).unwrap() else {
            panic!("expected a samples frame");
        };
        let bundles = frame.bundles(3).unwrap();
        assert_eq!(bundles[1].sample_index, 501);
        assert!((bundles[1].values[1] + 2.0).abs() < 1e-9);

        let record = TriggerRecord {
            microtime: 77,
            sample_index: 510,
            kind: TriggerKind::Stimulus,
            code: 2,
        };
        let Frame::Trigger(decoded) = decode_frame(&trigger(1, &[record])).unwrap() else {
            panic!("expected a trigger frame");
        };
        assert_eq!(decoded.triggers, vec![record]);

        assert_eq!(decode_frame(&measurement_end()).unwrap(), Frame::MeasurementEnd);
    }
}
