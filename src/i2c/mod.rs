//! I2C spy capture parsers
//!
//! The I2C spy module streams captured bus traffic in one of two formats,
//! chosen on the FPGA side:
//!
//! - **FRAME**: a 7-byte header `{timestamp: u32 LE, length: u16 LE, nack: u8}`
//!   followed by `length` data bytes. A header with `length == 0` is the INIT
//!   marker.
//! - **RAW**: 6-byte records `{state: u8, data: u8, timestamp: u32 LE}`
//!   describing every bus event, assembled by a small state machine.
//!
//! Both parsers produce the same structure: a list of [`I2cRun`]s, each a
//! list of [`I2cFrame`]s. They accept input in arbitrary chunks; a header or
//! record split across two buffers is completed by the next call.
//!
//! Any fatal condition (timestamp decrease, empty frame, bad state) returns
//! [`KosmosError::I2cStream`] and poisons the parser. The runs collected so
//! far stay readable; a new parser is needed to resume.
//!
//! ```rust
//! use kosmos::i2c::{FrameModeParser, I2cSpyParser};
//!
//! let mut parser = FrameModeParser::new(100_000_000);
//! let stream = [
//!     0x00, 0x10, 0x00, 0x00, 0x02, 0x00, 0x00, 0x0A, 0x55, // frame
//!     0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00,             // INIT
//! ];
//! assert_eq!(parser.parse(&stream).unwrap(), 1);
//! assert_eq!(parser.frame_runs().len(), 2);
//! assert_eq!(parser.frame_runs()[0].frames[0].bytes, vec![0x0A, 0x55]);
//! ```

mod frame_parser;
mod raw_parser;

pub use frame_parser::{FRAME_HEADER_SIZE, FrameModeParser};
pub use raw_parser::{RAW_RECORD_SIZE, RawModeParser, RawState};

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::{KosmosError, Result};

/// Timestamps count units of 4096 FPGA clock ticks.
pub const TIMESTAMP_SHIFT: u32 = 12;

/// Convert a capture timestamp to seconds.
pub fn ticks_to_seconds(timestamp: u32, clock_hz: u32) -> f64 {
    ((timestamp as u64) << TIMESTAMP_SHIFT) as f64 / clock_hz as f64
}

/// Bytes of a single I2C transaction
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct I2cFrame {
    pub bytes: Vec<u8>,
    /// Seconds, from the START condition
    pub time: f64,
    pub nack: bool,
}

/// A contiguous capture burst, opened by an INIT marker
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct I2cRun {
    /// Seconds, from the INIT marker or the first frame of an implicit run
    pub start_time: f64,
    pub frames: Vec<I2cFrame>,
}

/// Stream format produced by the I2C spy module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum I2cSpyMode {
    #[default]
    Frame,
    Raw,
}

/// Common contract of the FRAME and RAW parsers.
pub trait I2cSpyParser: Send {
    /// Consume `buffer` and return the number of frames completed by this call.
    fn parse(&mut self, buffer: &[u8]) -> Result<usize>;

    /// Runs collected so far, including the run being filled.
    fn frame_runs(&self) -> &[I2cRun];

    fn mode(&self) -> I2cSpyMode;

    /// Whether a fatal error left the parser unusable.
    fn is_poisoned(&self) -> bool;
}

/// Build the parser for `mode`.
pub fn new_parser(mode: I2cSpyMode, clock_hz: u32) -> Box<dyn I2cSpyParser> {
    match mode {
        I2cSpyMode::Frame => Box::new(FrameModeParser::new(clock_hz)),
        I2cSpyMode::Raw => Box::new(RawModeParser::new(clock_hz)),
    }
}

/// Run list bookkeeping shared by both parsers
#[derive(Debug)]
pub(crate) struct RunCollector {
    runs: Vec<I2cRun>,
    clock_hz: u32,
    last_timestamp: Option<u32>,
    poisoned: bool,
}

impl RunCollector {
    pub(crate) fn new(clock_hz: u32) -> Self {
        Self { runs: Vec::new(), clock_hz: clock_hz.max(1), last_timestamp: None, poisoned: false }
    }

    pub(crate) fn seconds(&self, timestamp: u32) -> f64 {
        ticks_to_seconds(timestamp, self.clock_hz)
    }

    /// Start a new run at an INIT marker; the timestamp reference restarts.
    pub(crate) fn open_run(&mut self, timestamp: u32) {
        self.last_timestamp = Some(timestamp);
        let start_time = self.seconds(timestamp);
        debug!("I2C run #{} opened at {:.6}s", self.runs.len(), start_time);
        self.runs.push(I2cRun { start_time, frames: Vec::new() });
    }

    /// Fail when `timestamp` goes backwards within the current run.
    pub(crate) fn check_timestamp(&mut self, timestamp: u32, context: &str) -> Result<()> {
        if let Some(last) = self.last_timestamp
            && timestamp < last
        {
            return Err(KosmosError::i2c_stream(
                context,
                format!("timestamp decreased from {:#010x} to {:#010x}", last, timestamp),
            ));
        }
        self.last_timestamp = Some(timestamp);
        Ok(())
    }

    /// Append a completed frame, opening an implicit run if no INIT was seen.
    pub(crate) fn push_frame(&mut self, frame: I2cFrame) {
        if self.runs.is_empty() {
            debug!("I2C frame before any INIT marker, opening an implicit run");
            self.runs.push(I2cRun { start_time: frame.time, frames: Vec::new() });
        }
        if let Some(run) = self.runs.last_mut() {
            run.frames.push(frame);
        }
    }

    pub(crate) fn runs(&self) -> &[I2cRun] {
        &self.runs
    }

    pub(crate) fn ensure_usable(&self, context: &str) -> Result<()> {
        if self.poisoned {
            return Err(KosmosError::i2c_stream(context, "parser was poisoned by an earlier fatal error"));
        }
        Ok(())
    }

    /// Record a parse result, poisoning the collector on failure.
    pub(crate) fn settle<T>(&mut self, result: Result<T>) -> Result<T> {
        if result.is_err() {
            self.poisoned = true;
        }
        result
    }

    pub(crate) fn is_poisoned(&self) -> bool {
        self.poisoned
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_utils::{frame_header, raw_record};

    #[test]
    fn tick_conversion_uses_4096_tick_units() {
        assert_eq!(ticks_to_seconds(0x1000, 100_000_000), (0x1000u64 << 12) as f64 / 100e6);
        assert_eq!(ticks_to_seconds(0, 1), 0.0);
    }

    /// One transaction at `ts` per entry: `(ts, bytes, nack)`, after an INIT at `init_ts`.
    fn paired_captures(init_ts: u32, transactions: &[(u32, Vec<u8>, bool)]) -> (Vec<u8>, Vec<u8>) {
        let mut frame_stream = frame_header(init_ts, 0, false);
        let mut raw_stream = raw_record(RawState::Init, 0, init_ts);

        for (ts, bytes, nack) in transactions {
            frame_stream.extend(frame_header(*ts, bytes.len() as u16, *nack));
            frame_stream.extend(bytes);

            raw_stream.extend(raw_record(RawState::Start, 0, *ts));
            for (index, byte) in bytes.iter().enumerate() {
                raw_stream.extend(raw_record(RawState::Data, *byte, 0));
                let last = index == bytes.len() - 1;
                let state = if *nack && last { RawState::Nack } else { RawState::Ack };
                raw_stream.extend(raw_record(state, 0, *ts + 1));
            }
            raw_stream.extend(raw_record(RawState::Stop, 0, *ts + 2));
        }
        (frame_stream, raw_stream)
    }

    #[test]
    fn frame_and_raw_parsers_agree() {
        let transactions = vec![
            (0x100, vec![0xA0, 0x01, 0x02], false),
            (0x180, vec![0xA1, 0xFF], true),
            (0x200, vec![0x3C], false),
        ];
        let (frame_stream, raw_stream) = paired_captures(0x10, &transactions);
        let (frame_stream_2, raw_stream_2) = paired_captures(0x20, &transactions[..1]);

        let mut frame_parser = new_parser(I2cSpyMode::Frame, 48_000_000);
        let mut raw_parser = new_parser(I2cSpyMode::Raw, 48_000_000);

        assert_eq!(frame_parser.parse(&frame_stream).unwrap(), 3);
        assert_eq!(frame_parser.parse(&frame_stream_2).unwrap(), 1);
        assert_eq!(raw_parser.parse(&raw_stream).unwrap(), 3);
        assert_eq!(raw_parser.parse(&raw_stream_2).unwrap(), 1);

        assert_eq!(frame_parser.frame_runs(), raw_parser.frame_runs());
        assert_eq!(frame_parser.frame_runs().len(), 2);
        assert!(frame_parser.frame_runs()[0].frames[1].nack);
    }

    #[test]
    fn parsers_report_their_mode() {
        assert_eq!(new_parser(I2cSpyMode::Raw, 1).mode(), I2cSpyMode::Raw);
        assert_eq!(new_parser(I2cSpyMode::Frame, 1).mode(), I2cSpyMode::Frame);
    }
}
