//! Capture sources feeding the spy driver

use std::collections::VecDeque;
use tokio::time::{Duration, Interval, MissedTickBehavior, interval};
use tracing::{debug, trace};

use crate::modules::I2cSpyModule;
use crate::{KosmosError, Result};

/// Trait for I2C spy capture buffer sources
///
/// Sources handle their own pacing: a module source waits for its poll
/// interval, a recorded source yields immediately.
#[async_trait::async_trait]
pub trait CaptureSource: Send + 'static {
    /// Get the next slice of the capture stream
    ///
    /// Returns:
    /// - `Ok(Some(bytes))` - New capture bytes, possibly none this time
    /// - `Ok(None)` - Capture ended (normal termination)
    /// - `Err(e)` - Error occurred
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>>;
}

/// Polls the I2C spy module buffer over the data channel
pub struct ModuleCaptureSource {
    spy: I2cSpyModule,
    interval: Interval,
    chunk_reads: usize,
}

impl ModuleCaptureSource {
    pub fn new(spy: I2cSpyModule, poll_interval: Duration, chunk_reads: usize) -> Self {
        let mut interval = interval(poll_interval);
        interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
        debug!("Polling I2C spy every {:?}, {} reads per poll", poll_interval, chunk_reads);
        Self { spy, interval, chunk_reads: chunk_reads.max(1) }
    }
}

#[async_trait::async_trait]
impl CaptureSource for ModuleCaptureSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        self.interval.tick().await;

        // Link transfers block; keep them off the async workers
        let spy = self.spy.clone();
        let count = self.chunk_reads;
        let (bytes, _drained) = tokio::task::spawn_blocking(move || spy.read_chunks(count))
            .await
            .map_err(|e| KosmosError::link_failed_with_source("Capture poll task failed", Box::new(e)))??;

        trace!("Polled {} capture bytes", bytes.len());
        Ok(Some(bytes))
    }
}

/// Replays capture buffers recorded earlier, then ends
pub struct RecordedCaptureSource {
    chunks: VecDeque<Vec<u8>>,
}

impl RecordedCaptureSource {
    pub fn new(chunks: impl IntoIterator<Item = Vec<u8>>) -> Self {
        Self { chunks: chunks.into_iter().collect() }
    }

    /// Split one capture into `chunk_size` byte buffers.
    pub fn from_capture(capture: &[u8], chunk_size: usize) -> Self {
        Self::new(capture.chunks(chunk_size.max(1)).map(<[u8]>::to_vec))
    }
}

#[async_trait::async_trait]
impl CaptureSource for RecordedCaptureSource {
    async fn next_chunk(&mut self) -> Result<Option<Vec<u8>>> {
        Ok(self.chunks.pop_front())
    }
}
