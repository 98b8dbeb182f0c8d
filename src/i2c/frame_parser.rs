//! FRAME mode: length-prefixed transactions

use tracing::{trace, warn};

use super::{I2cFrame, I2cRun, I2cSpyMode, I2cSpyParser, RunCollector};
use crate::{KosmosError, Result};

/// `{timestamp: u32 LE, length: u16 LE, nack: u8}`
pub const FRAME_HEADER_SIZE: usize = 7;

/// Parser for the FRAME capture format
#[derive(Debug)]
pub struct FrameModeParser {
    collector: RunCollector,
    header: [u8; FRAME_HEADER_SIZE],
    header_index: usize,
    /// Frame being filled and the number of data bytes it still expects
    pending: Option<(I2cFrame, usize)>,
}

impl FrameModeParser {
    pub fn new(clock_hz: u32) -> Self {
        Self {
            collector: RunCollector::new(clock_hz),
            header: [0u8; FRAME_HEADER_SIZE],
            header_index: 0,
            pending: None,
        }
    }

    /// Position inside the current header and data block.
    pub fn position(&self) -> (usize, usize) {
        let data_index = self.pending.as_ref().map(|(frame, _)| frame.bytes.len()).unwrap_or(0);
        (self.header_index, data_index)
    }

    fn parse_inner(&mut self, buffer: &[u8]) -> Result<usize> {
        let mut completed = 0;
        let mut offset = 0;

        while offset < buffer.len() {
            if let Some((frame, remaining)) = self.pending.as_mut() {
                let take = (*remaining).min(buffer.len() - offset);
                frame.bytes.extend_from_slice(&buffer[offset..offset + take]);
                *remaining -= take;
                offset += take;

                if *remaining == 0
                    && let Some((frame, _)) = self.pending.take()
                {
                    trace!("I2C frame complete: {} bytes, nack={}", frame.bytes.len(), frame.nack);
                    self.collector.push_frame(frame);
                    completed += 1;
                }
                continue;
            }

            self.header[self.header_index] = buffer[offset];
            self.header_index += 1;
            offset += 1;

            if self.header_index == FRAME_HEADER_SIZE {
                self.header_index = 0;
                self.handle_header()?;
            }
        }

        Ok(completed)
    }

    fn handle_header(&mut self) -> Result<()> {
        let h = &self.header;
        let timestamp = u32::from_le_bytes([h[0], h[1], h[2], h[3]]);
        let length = u16::from_le_bytes([h[4], h[5]]) as usize;
        let nack = h[6];

        trace!("I2C header: ts={:#010x} len={} nack={}", timestamp, length, nack);

        if nack > 1 {
            return Err(KosmosError::i2c_stream(
                "FRAME header",
                format!("nack must be 0 or 1, got {:#04x}", nack),
            ));
        }

        if length == 0 {
            if nack != 0 {
                return Err(KosmosError::i2c_stream("FRAME INIT marker", "INIT marker must have nack == 0"));
            }
            self.collector.open_run(timestamp);
            return Ok(());
        }

        self.collector.check_timestamp(timestamp, "FRAME header")?;
        let frame = I2cFrame { bytes: Vec::with_capacity(length), time: self.collector.seconds(timestamp), nack: nack == 1 };
        self.pending = Some((frame, length));
        Ok(())
    }
}

impl I2cSpyParser for FrameModeParser {
    fn parse(&mut self, buffer: &[u8]) -> Result<usize> {
        self.collector.ensure_usable("FRAME parser")?;
        let result = self.parse_inner(buffer);
        if let Err(e) = &result {
            warn!("FRAME parser failed: {}", e);
        }
        self.collector.settle(result)
    }

    fn frame_runs(&self) -> &[I2cRun] {
        self.collector.runs()
    }

    fn mode(&self) -> I2cSpyMode {
        I2cSpyMode::Frame
    }

    fn is_poisoned(&self) -> bool {
        self.collector.is_poisoned()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::i2c::ticks_to_seconds;
    use crate::test_utils::frame_header;
    use proptest::prelude::*;

    const CLOCK_HZ: u32 = 100_000_000;

    fn scenario_stream() -> Vec<u8> {
        let mut stream = frame_header(0x0000_1000, 2, false);
        stream.extend([0x0A, 0x55]);
        stream.extend(frame_header(0x0000_2000, 0, false));
        stream
    }

    #[test]
    fn frame_then_init_marker() {
        let mut parser = FrameModeParser::new(CLOCK_HZ);
        assert_eq!(parser.parse(&scenario_stream()).unwrap(), 1);

        let runs = parser.frame_runs();
        assert_eq!(runs.len(), 2);
        assert_eq!(runs[0].frames.len(), 1);
        assert_eq!(runs[0].frames[0].bytes, vec![0x0A, 0x55]);
        assert!(!runs[0].frames[0].nack);
        assert_eq!(runs[0].frames[0].time, ticks_to_seconds(0x1000, CLOCK_HZ));
        assert!(runs[1].frames.is_empty());
        assert_eq!(runs[1].start_time, ticks_to_seconds(0x2000, CLOCK_HZ));
    }

    proptest! {
        #[test]
        fn chunking_does_not_change_the_result(split in 0usize..18) {
            let stream = scenario_stream();
            let split = split.min(stream.len());

            let mut whole = FrameModeParser::new(CLOCK_HZ);
            whole.parse(&stream).unwrap();

            let mut chunked = FrameModeParser::new(CLOCK_HZ);
            let first = chunked.parse(&stream[..split]).unwrap();
            let second = chunked.parse(&stream[split..]).unwrap();

            prop_assert_eq!(first + second, 1);
            prop_assert_eq!(whole.frame_runs(), chunked.frame_runs());
        }
    }

    #[test]
    fn partial_header_is_kept_between_calls() {
        let mut parser = FrameModeParser::new(CLOCK_HZ);
        let stream = scenario_stream();
        parser.parse(&stream[..3]).unwrap();
        assert_eq!(parser.position(), (3, 0));
        parser.parse(&stream[3..8]).unwrap();
        assert_eq!(parser.position(), (0, 1));
    }

    #[test]
    fn timestamp_decrease_is_fatal_and_poisons() {
        let mut stream = frame_header(0x2000, 1, false);
        stream.push(0x01);
        stream.extend(frame_header(0x1000, 1, false));
        stream.push(0x02);

        let mut parser = FrameModeParser::new(CLOCK_HZ);
        let result = parser.parse(&stream);
        assert!(matches!(result, Err(KosmosError::I2cStream { .. })));
        assert!(parser.is_poisoned());
        assert_eq!(parser.frame_runs()[0].frames.len(), 1);
        assert!(parser.parse(&frame_header(0x3000, 0, false)).is_err());
    }

    #[test]
    fn init_resets_the_timestamp_reference() {
        let mut stream = frame_header(0x2000, 1, false);
        stream.push(0x01);
        stream.extend(frame_header(0x0010, 0, false));
        stream.extend(frame_header(0x0020, 1, true));
        stream.push(0x02);

        let mut parser = FrameModeParser::new(CLOCK_HZ);
        assert_eq!(parser.parse(&stream).unwrap(), 2);
        assert!(parser.frame_runs()[1].frames[0].nack);
    }

    #[test]
    fn init_with_nack_is_fatal() {
        let mut parser = FrameModeParser::new(CLOCK_HZ);
        assert!(parser.parse(&frame_header(0x10, 0, true)).is_err());
    }

    #[test]
    fn invalid_nack_value_is_fatal() {
        let mut header = frame_header(0x10, 1, false);
        header[6] = 2;
        let mut parser = FrameModeParser::new(CLOCK_HZ);
        assert!(parser.parse(&header).is_err());
    }
}
