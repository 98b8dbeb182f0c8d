//! Live I2C spy captures
//!
//! A [`SpyCapture`] owns a background task that pulls buffers from a
//! [`CaptureSource`], feeds them to the spy parser and publishes a
//! [`CaptureSnapshot`] after every parsed buffer. Dropping the capture
//! cancels the task.
//!
//! ```rust,no_run
//! use futures::StreamExt;
//! use kosmos::capture::SpyCapture;
//! use kosmos::emulator::SimulatedFpga;
//! use kosmos::{Kosmos, KosmosConfig};
//!
//! # #[tokio::main]
//! # async fn main() -> kosmos::Result<()> {
//! let config = KosmosConfig::default();
//! let kosmos = Kosmos::open_simulated(SimulatedFpga::new(), config.clone())?;
//! let spy = kosmos.i2c_spy()?;
//! spy.start_capture()?;
//!
//! let capture = SpyCapture::from_module(spy, &config);
//! let mut updates = capture.updates();
//! while let Some(snapshot) = updates.next().await {
//!     println!("{} frames in {} runs", snapshot.frame_count, snapshot.runs.len());
//! }
//! # Ok(())
//! # }
//! ```

mod driver;
mod source;

pub use driver::{DriverChannels, SpyDriver};
pub use source::{CaptureSource, ModuleCaptureSource, RecordedCaptureSource};

use futures::Stream;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tokio::sync::watch;
use tokio_stream::wrappers::WatchStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use crate::config::KosmosConfig;
use crate::i2c::{I2cRun, I2cSpyParser};
use crate::modules::I2cSpyModule;

/// State of a capture after the latest parsed buffer
#[derive(Debug, Clone, PartialEq, Default, Serialize, Deserialize)]
pub struct CaptureSnapshot {
    pub runs: Vec<I2cRun>,
    /// Frames completed so far
    pub frame_count: usize,
    /// Capture bytes consumed so far
    pub bytes: usize,
    /// Fatal parser or source error that stopped the capture
    pub error: Option<String>,
    /// No further snapshots will follow
    pub finished: bool,
}

/// Handle on a running capture task
pub struct SpyCapture {
    snapshots: watch::Receiver<Arc<CaptureSnapshot>>,
    cancel: CancellationToken,
}

impl SpyCapture {
    /// Start pumping `source` into `parser`. Must be called from within a tokio runtime.
    pub fn start<S: CaptureSource>(source: S, parser: Box<dyn I2cSpyParser>) -> Self {
        let channels = SpyDriver::spawn(source, parser);
        Self { snapshots: channels.snapshots, cancel: channels.cancel }
    }

    /// Poll the I2C spy module with the configured interval and batch size.
    pub fn from_module(spy: I2cSpyModule, config: &KosmosConfig) -> Self {
        let parser = spy.parser();
        let source = ModuleCaptureSource::new(spy, config.capture_poll_interval(), config.capture_chunk_reads);
        Self::start(source, parser)
    }

    /// Snapshot updates as a stream
    pub fn updates(&self) -> impl Stream<Item = Arc<CaptureSnapshot>> + 'static {
        WatchStream::new(self.snapshots.clone())
    }

    /// Latest snapshot
    pub fn current(&self) -> Arc<CaptureSnapshot> {
        self.snapshots.borrow().clone()
    }

    /// Wait until the capture finishes, returning the final snapshot.
    pub async fn finished(&self) -> Arc<CaptureSnapshot> {
        let mut snapshots = self.snapshots.clone();
        loop {
            let snapshot = snapshots.borrow_and_update().clone();
            if snapshot.finished {
                return snapshot;
            }
            if snapshots.changed().await.is_err() {
                return snapshots.borrow().clone();
            }
        }
    }

    /// Stop the capture task.
    pub fn stop(&self) {
        self.cancel.cancel();
    }
}

impl Drop for SpyCapture {
    fn drop(&mut self) {
        debug!("Dropping spy capture");
        self.cancel.cancel();
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::device_tree::DeviceTree;
    use crate::emulator::SimulatedFpga;
    use crate::i2c::{FrameModeParser, I2cSpyMode, RawModeParser, RawState};
    use crate::link::LinkAdapter;
    use crate::protocol::HwCfg;
    use crate::sequencer::Sequencer;
    use crate::test_utils::{frame_header, raw_stream, synthetic_capture};
    use crate::transport::Transport;
    use futures::StreamExt;
    use std::time::Duration;

    #[tokio::test]
    async fn recorded_capture_is_parsed_across_buffers() {
        let _ = tracing_subscriber::fmt::try_init();
        let (frame_stream, _) = synthetic_capture(2, 5, 3);
        let source = RecordedCaptureSource::from_capture(&frame_stream, 5);

        let capture = SpyCapture::start(source, Box::new(FrameModeParser::new(100_000_000)));
        let snapshot = capture.finished().await;

        assert!(snapshot.error.is_none());
        assert_eq!(snapshot.frame_count, 10);
        assert_eq!(snapshot.bytes, frame_stream.len());
        assert_eq!(snapshot.runs.len(), 2);
    }

    #[tokio::test]
    async fn parser_errors_stop_the_pump() {
        let stream = raw_stream(&[
            (RawState::Init, 0, 0x10),
            (RawState::Start, 0, 0x20),
            (RawState::Stop, 0, 0x21),
        ]);
        let source = RecordedCaptureSource::new(vec![stream, vec![0u8; 6]]);

        let capture = SpyCapture::start(source, Box::new(RawModeParser::new(100_000_000)));
        let snapshot = capture.finished().await;

        assert!(snapshot.finished);
        assert!(snapshot.error.as_deref().is_some_and(|e| e.contains("empty frame")));
        assert_eq!(snapshot.runs.len(), 1);
    }

    #[tokio::test]
    async fn updates_stream_ends_after_the_final_snapshot() {
        let mut stream = frame_header(0x10, 1, false);
        stream.push(0x42);
        let capture = SpyCapture::start(RecordedCaptureSource::new(vec![stream]), Box::new(FrameModeParser::new(1_000)));

        let last = capture.finished().await;
        assert_eq!(last.frame_count, 1);
        let current = capture.updates().next().await.unwrap();
        assert_eq!(current.frame_count, 1);
    }

    #[tokio::test]
    async fn module_source_polls_the_spy() -> anyhow::Result<()> {
        let fpga = SimulatedFpga::new();
        let sequencer = Arc::new(Sequencer::new(Transport::new(LinkAdapter::new(fpga.clone()))));
        let config = KosmosConfig { capture_poll_interval_ms: 1, capture_chunk_reads: 2, ..KosmosConfig::default() };
        let tree = DeviceTree::from_hwcfg(HwCfg::new(0x3FF), &config);
        let spy = I2cSpyModule::new(sequencer, &tree, &config)?;
        assert_eq!(spy.mode(), I2cSpyMode::Frame);
        spy.start_capture()?;

        let (frame_stream, _) = synthetic_capture(1, 8, 4);
        fpga.load_spy_capture(&frame_stream);

        let capture = SpyCapture::from_module(spy, &config);
        let mut updates = capture.updates();
        let result = tokio::time::timeout(Duration::from_secs(5), async {
            while let Some(snapshot) = updates.next().await {
                if snapshot.frame_count == 8 {
                    return Some(snapshot);
                }
            }
            None
        })
        .await?;

        let snapshot = result.ok_or_else(|| anyhow::anyhow!("capture ended early"))?;
        assert_eq!(snapshot.runs[0].frames.len(), 8);
        capture.stop();
        Ok(())
    }
}
