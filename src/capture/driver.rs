//! Driver spawns and manages the capture pump task

use std::sync::Arc;
use tokio::sync::watch;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, trace, warn};

use super::CaptureSnapshot;
use super::source::CaptureSource;
use crate::i2c::I2cSpyParser;

/// Result of spawning the driver task
pub struct DriverChannels {
    /// Receiver for parsed capture snapshots
    pub snapshots: watch::Receiver<Arc<CaptureSnapshot>>,
    /// Cancellation token for graceful shutdown
    pub cancel: CancellationToken,
}

/// Spawns the task that pumps a capture source into a parser
pub struct SpyDriver;

impl SpyDriver {
    /// Spawn the pump task. Must be called from within a tokio runtime.
    pub fn spawn<S>(source: S, parser: Box<dyn I2cSpyParser>) -> DriverChannels
    where
        S: CaptureSource,
    {
        let (snapshot_tx, snapshot_rx) = watch::channel(Arc::new(CaptureSnapshot::default()));
        let cancel = CancellationToken::new();
        let cancel_pump = cancel.clone();

        tokio::spawn(async move {
            Self::pump_task(source, parser, snapshot_tx, cancel_pump).await;
        });

        DriverChannels { snapshots: snapshot_rx, cancel }
    }

    async fn pump_task<S>(
        mut source: S,
        mut parser: Box<dyn I2cSpyParser>,
        snapshot_tx: watch::Sender<Arc<CaptureSnapshot>>,
        cancel: CancellationToken,
    ) where
        S: CaptureSource,
    {
        info!("Capture pump started ({:?} mode)", parser.mode());
        let mut snapshot = CaptureSnapshot::default();
        let mut error_count = 0u32;
        const MAX_ERRORS: u32 = 10;

        loop {
            let result = tokio::select! {
                _ = cancel.cancelled() => {
                    info!("Capture pump cancelled");
                    break;
                }
                result = source.next_chunk() => result,
            };

            match result {
                Ok(Some(bytes)) => {
                    error_count = 0;
                    if bytes.is_empty() {
                        continue;
                    }

                    snapshot.bytes += bytes.len();
                    match parser.parse(&bytes) {
                        Ok(completed) => {
                            trace!("Parsed {} bytes, {} frames completed", bytes.len(), completed);
                            snapshot.frame_count += completed;
                            snapshot.runs = parser.frame_runs().to_vec();
                        }
                        Err(e) => {
                            error!("Capture parser failed, stopping pump: {}", e);
                            snapshot.runs = parser.frame_runs().to_vec();
                            snapshot.error = Some(e.to_string());
                            snapshot.finished = true;
                            let _ = snapshot_tx.send(Arc::new(snapshot.clone()));
                            break;
                        }
                    }

                    if snapshot_tx.send(Arc::new(snapshot.clone())).is_err() {
                        debug!("Snapshot receiver dropped, shutting down");
                        break;
                    }
                }
                Ok(None) => {
                    info!("Capture source ended after {} bytes", snapshot.bytes);
                    snapshot.finished = true;
                    let _ = snapshot_tx.send(Arc::new(snapshot.clone()));
                    break;
                }
                Err(e) => {
                    error_count += 1;
                    warn!("Capture source error ({}/{}): {}", error_count, MAX_ERRORS, e);

                    if error_count >= MAX_ERRORS {
                        error!("Too many capture source errors, shutting down");
                        snapshot.error = Some(e.to_string());
                        snapshot.finished = true;
                        let _ = snapshot_tx.send(Arc::new(snapshot.clone()));
                        break;
                    }

                    // Exponential backoff: 50ms, 100ms, 200ms, ...
                    let backoff = std::time::Duration::from_millis(50 * (1 << error_count.min(5)));
                    tokio::time::sleep(backoff).await;
                }
            }
        }

        info!("Capture pump ended ({} frames)", snapshot.frame_count);
    }
}
