//! RAW mode: one record per bus event
//!
//! ```text
//! WAIT_FOR_START --START--> WAIT_FOR_DATA_STOP_RESTART --DATA--> WAIT_FOR_ACK_NACK
//!       ^                        |   ^   |                             |
//!       +---------STOP-----------+   |   +--START (restart)            |
//!                                    +-----------ACK / NACK------------+
//! ```
//!
//! INIT opens a new run from any state. Timestamps are only meaningful on
//! non-DATA records.

use serde::{Deserialize, Serialize};
use tracing::{trace, warn};

use super::{I2cFrame, I2cRun, I2cSpyMode, I2cSpyParser, RunCollector};
use crate::{KosmosError, Result};

/// `{state: u8, data: u8, timestamp: u32 LE}`
pub const RAW_RECORD_SIZE: usize = 6;

/// Bus event carried by a RAW record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum RawState {
    /// Only valid while the spy is in reset
    Idle = 0,
    Init = 1,
    Start = 2,
    Stop = 3,
    Data = 4,
    Ack = 5,
    Nack = 6,
}

impl RawState {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(RawState::Idle),
            1 => Some(RawState::Init),
            2 => Some(RawState::Start),
            3 => Some(RawState::Stop),
            4 => Some(RawState::Data),
            5 => Some(RawState::Ack),
            6 => Some(RawState::Nack),
            _ => None,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Step {
    WaitForStart,
    WaitForDataStopRestart,
    WaitForAckNack,
}

/// Parser for the RAW capture format
#[derive(Debug)]
pub struct RawModeParser {
    collector: RunCollector,
    step: Step,
    /// After construction or INIT, until the first START
    in_reset: bool,
    frame: Option<I2cFrame>,
    partial: Vec<u8>,
}

impl RawModeParser {
    pub fn new(clock_hz: u32) -> Self {
        Self {
            collector: RunCollector::new(clock_hz),
            step: Step::WaitForStart,
            in_reset: true,
            frame: None,
            partial: Vec::with_capacity(RAW_RECORD_SIZE),
        }
    }

    fn parse_inner(&mut self, buffer: &[u8]) -> Result<usize> {
        let mut completed = 0;
        let mut rest = buffer;

        if !self.partial.is_empty() {
            let take = (RAW_RECORD_SIZE - self.partial.len()).min(rest.len());
            self.partial.extend_from_slice(&rest[..take]);
            rest = &rest[take..];
            if self.partial.len() < RAW_RECORD_SIZE {
                return Ok(0);
            }
            let record = std::mem::take(&mut self.partial);
            completed += self.handle_record(&record)?;
        }

        let mut records = rest.chunks_exact(RAW_RECORD_SIZE);
        for record in records.by_ref() {
            completed += self.handle_record(record)?;
        }
        self.partial.extend_from_slice(records.remainder());

        Ok(completed)
    }

    /// Returns 1 when the record completed a frame.
    fn handle_record(&mut self, record: &[u8]) -> Result<usize> {
        let code = record[0];
        let data = record[1];
        let timestamp = u32::from_le_bytes([record[2], record[3], record[4], record[5]]);

        let state = RawState::from_u8(code)
            .ok_or_else(|| KosmosError::i2c_stream("RAW record", format!("unknown state code {:#04x}", code)))?;
        trace!("I2C raw record: {:?} data={:#04x} ts={:#010x} step={:?}", state, data, timestamp, self.step);

        match state {
            RawState::Idle if self.in_reset => return Ok(0),
            RawState::Idle => {
                return Err(KosmosError::i2c_stream("RAW record", "IDLE state outside of reset"));
            }
            RawState::Init => {
                if let Some(frame) = self.frame.take() {
                    warn!("INIT dropped a partial I2C frame of {} bytes", frame.bytes.len());
                }
                self.collector.open_run(timestamp);
                self.step = Step::WaitForStart;
                self.in_reset = true;
                return Ok(0);
            }
            RawState::Data => {}
            _ => self.collector.check_timestamp(timestamp, "RAW record")?,
        }

        match (self.step, state) {
            (Step::WaitForStart, RawState::Start) => {
                self.in_reset = false;
                self.begin_frame(timestamp);
                Ok(0)
            }
            (Step::WaitForStart, _) => Ok(0),

            (Step::WaitForDataStopRestart, RawState::Data) => {
                if let Some(frame) = self.frame.as_mut() {
                    frame.bytes.push(data);
                }
                self.step = Step::WaitForAckNack;
                Ok(0)
            }
            (Step::WaitForDataStopRestart, RawState::Stop) => {
                self.close_frame("STOP")?;
                self.step = Step::WaitForStart;
                Ok(1)
            }
            (Step::WaitForDataStopRestart, RawState::Start) => {
                self.close_frame("repeated START")?;
                self.begin_frame(timestamp);
                Ok(1)
            }
            (Step::WaitForDataStopRestart, other) => Err(KosmosError::i2c_stream(
                "RAW WAIT_FOR_DATA_STOP_RESTART",
                format!("unexpected {:?} record", other),
            )),

            (Step::WaitForAckNack, RawState::Ack) => {
                self.step = Step::WaitForDataStopRestart;
                Ok(0)
            }
            (Step::WaitForAckNack, RawState::Nack) => {
                if let Some(frame) = self.frame.as_mut() {
                    frame.nack = true;
                }
                self.step = Step::WaitForDataStopRestart;
                Ok(0)
            }
            (Step::WaitForAckNack, other) => Err(KosmosError::i2c_stream(
                "RAW WAIT_FOR_ACK_NACK",
                format!("unexpected {:?} record", other),
            )),
        }
    }

    fn begin_frame(&mut self, timestamp: u32) {
        self.frame = Some(I2cFrame { bytes: Vec::new(), time: self.collector.seconds(timestamp), nack: false });
        self.step = Step::WaitForDataStopRestart;
    }

    fn close_frame(&mut self, at: &str) -> Result<()> {
        match self.frame.take() {
            Some(frame) if !frame.bytes.is_empty() => {
                trace!("I2C frame complete: {} bytes, nack={}", frame.bytes.len(), frame.nack);
                self.collector.push_frame(frame);
                Ok(())
            }
            _ => Err(KosmosError::i2c_stream("RAW frame assembly", format!("empty frame at {}", at))),
        }
    }
}

impl I2cSpyParser for RawModeParser {
    fn parse(&mut self, buffer: &[u8]) -> Result<usize> {
        self.collector.ensure_usable("RAW parser")?;
        let result = self.parse_inner(buffer);
        if let Err(e) = &result {
            warn!("RAW parser failed: {}", e);
        }
        self.collector.settle(result)
    }

    fn frame_runs(&self) -> &[I2cRun] {
        self.collector.runs()
    }

    fn mode(&self) -> I2cSpyMode {
        I2cSpyMode::Raw
    }

    fn is_poisoned(&self) -> bool {
        self.collector.is_poisoned()
    }
}
