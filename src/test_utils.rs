//! Capture stream builders shared by unit tests and benchmarks
//!
//! These helpers produce I2C spy streams in both capture formats so tests
//! can describe bus traffic instead of hand-writing byte arrays.


use crate::i2c::RawState;

/// FRAME mode header. `length == 0` is the INIT marker.
pub fn frame_header(timestamp: u32, length: u16, nack: bool) -> Vec<u8> {
    let mut header = Vec::with_capacity(7);
    header.extend_from_slice(&timestamp.to_le_bytes());
    header.extend_from_slice(&length.to_le_bytes());
    header.push(u8::from(nack));
    header
}

/// A single RAW mode record.
pub fn raw_record(state: RawState, data: u8, timestamp: u32) -> Vec<u8> {
    let mut record = Vec::with_capacity(6);
    record.push(state as u8);
    record.push(data);
    record.extend_from_slice(&timestamp.to_le_bytes());
    record
}

/// Concatenated RAW records.
pub fn raw_stream(records: &[(RawState, u8, u32)]) -> Vec<u8> {
    records.iter().flat_map(|&(state, data, timestamp)| raw_record(state, data, timestamp)).collect()
}

/// Synthetic traffic: `runs` runs of `frames_per_run` transactions of
/// `frame_len` bytes, as a `(FRAME stream, RAW stream)` pair.
pub fn synthetic_capture(runs: usize, frames_per_run: usize, frame_len: usize) -> (Vec<u8>, Vec<u8>) {
    let mut frame_stream = Vec::new();
    let mut raw = Vec::new();

    for run in 0..runs {
        let base = (run as u32) * 0x0010_0000;
        frame_stream.extend(frame_header(base, 0, false));
        raw.extend(raw_record(RawState::Init, 0, base));

        for index in 0..frames_per_run {
            let ts = base + 1 + (index as u32) * 4;
            let bytes: Vec<u8> = (0..frame_len).map(|b| (b + index) as u8).collect();
            let nack = index % 5 == 4;

            frame_stream.extend(frame_header(ts, frame_len as u16, nack));
            frame_stream.extend(&bytes);

            raw.extend(raw_record(RawState::Start, 0, ts));
            for (position, byte) in bytes.iter().enumerate() {
                raw.extend(raw_record(RawState::Data, *byte, 0));
                let state = if nack && position + 1 == bytes.len() { RawState::Nack } else { RawState::Ack };
                raw.extend(raw_record(state, 0, ts + 1));
            }
            raw.extend(raw_record(RawState::Stop, 0, ts + 2));
        }
    }

    (frame_stream, raw)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::{I2cSpyMode, new_parser};

    #[test]
    fn synthetic_captures_parse_identically() {
        let (frame_stream, raw) = synthetic_capture(3, 10, 4);
        let mut frame_parser = new_parser(I2cSpyMode::Frame, 100_000_000);
        let mut raw_parser = new_parser(I2cSpyMode::Raw, 100_000_000);

        assert_eq!(frame_parser.parse(&frame_stream).unwrap(), 30);
        assert_eq!(raw_parser.parse(&raw).unwrap(), 30);
        assert_eq!(frame_parser.frame_runs(), raw_parser.frame_runs());
    }
}
