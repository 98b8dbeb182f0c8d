//! Online/offline front-end to the transport
//!
//! Online, every request list goes straight to the [`Transport`]. Offline,
//! requests are appended to a recorded sequence and answered with
//! placeholder replies; [`Sequencer::play_sequence`] then sends the whole
//! recording as one batch.
//!
//! Every public call holds a reentrant lock, so a module method may call
//! other module methods, or compose a recording across several modules
//! inside [`Sequencer::with_lock`], without another thread interleaving.
//!
//! ```rust
//! use kosmos::emulator::SimulatedFpga;
//! use kosmos::protocol::{Frame, msg_cmd, msg_id};
//! use kosmos::{LinkAdapter, Sequencer, Transport};
//!
//! # fn main() -> kosmos::Result<()> {
//! let fpga = SimulatedFpga::new();
//! let sequencer = Sequencer::new(Transport::new(LinkAdapter::new(fpga.clone())));
//!
//! sequencer.set_offline_mode(true);
//! sequencer.send_control(vec![Frame::new(msg_id::PES, msg_cmd::RESET)])?;
//! sequencer.send_control(vec![Frame::new(msg_id::PES, msg_cmd::START)])?;
//! assert_eq!(fpga.transfer_count(), 0);
//!
//! let pairs = sequencer.play_sequence()?;
//! assert_eq!(pairs.len(), 2);
//! assert_eq!(fpga.transfer_count(), 1);
//! # Ok(())
//! # }
//! ```

use parking_lot::ReentrantMutex;
use std::cell::RefCell;
use tracing::{debug, info, warn};

use crate::link::Channel;
use crate::protocol::{FpgaRevision, Frame, HwCfg, REPLY_FLAG};
use crate::transport::{FramePair, MAX_BATCH_FRAMES, Transport, validate_request};
use crate::{KosmosError, Result};

#[derive(Debug, Default)]
struct State {
    offline: bool,
    recorded: Vec<Frame>,
}

/// Gate between modules and the transport, with an offline recording mode
pub struct Sequencer {
    transport: Transport,
    state: ReentrantMutex<RefCell<State>>,
}

impl Sequencer {
    pub fn new(transport: Transport) -> Self {
        Self { transport, state: ReentrantMutex::new(RefCell::new(State::default())) }
    }

    /// Frames per datagram for online request lists.
    pub fn max_batch_frames(&self) -> usize {
        self.transport.max_batch_frames()
    }

    /// Run `f` while holding the sequencer lock.
    pub fn with_lock<R>(&self, f: impl FnOnce(&Sequencer) -> R) -> R {
        let _guard = self.state.lock();
        f(self)
    }

    pub fn send_control(&self, frames: Vec<Frame>) -> Result<Vec<FramePair>> {
        self.send(frames, Channel::Control)
    }

    pub fn send_data(&self, frames: Vec<Frame>) -> Result<Vec<FramePair>> {
        self.send(frames, Channel::Data)
    }

    /// Forward `frames` online, or record them offline.
    ///
    /// Offline replies are placeholders echoing `id` and `cmd | REPLY_FLAG`
    /// with a zeroed payload; callers must not depend on their values. A
    /// recording is played as one datagram, so it may not grow past
    /// [`MAX_BATCH_FRAMES`] frames.
    pub fn send(&self, frames: Vec<Frame>, channel: Channel) -> Result<Vec<FramePair>> {
        let guard = self.state.lock();

        if !guard.borrow().offline {
            return self.transport.send_message_list(frames, channel);
        }

        for frame in &frames {
            validate_request(frame)?;
        }

        let mut state = guard.borrow_mut();
        if state.recorded.len() + frames.len() > MAX_BATCH_FRAMES {
            return Err(KosmosError::invalid_state(format!(
                "recording {} more frames would exceed the {} frame datagram limit ({} pending)",
                frames.len(),
                MAX_BATCH_FRAMES,
                state.recorded.len()
            )));
        }
        if channel == Channel::Data {
            debug!("Recording {} data channel frames; they will be played on the control channel", frames.len());
        }
        state.recorded.extend(frames.iter().cloned());
        debug!("Recorded {} frames ({} pending)", frames.len(), state.recorded.len());

        Ok(frames
            .into_iter()
            .map(|tx| {
                let rx = Frame::new(tx.id, tx.cmd | REPLY_FLAG);
                (tx, rx)
            })
            .collect())
    }

    /// Enter or leave offline mode.
    ///
    /// Leaving offline mode without [`Sequencer::play_sequence`] discards
    /// the pending recording.
    pub fn set_offline_mode(&self, offline: bool) {
        let guard = self.state.lock();
        let mut state = guard.borrow_mut();
        if state.offline == offline {
            return;
        }

        if !offline && !state.recorded.is_empty() {
            warn!("Discarding {} recorded frames that were never played", state.recorded.len());
            state.recorded.clear();
        }
        state.offline = offline;
        info!("Sequencer offline mode: {}", offline);
    }

    pub fn offline_mode(&self) -> bool {
        self.state.lock().borrow().offline
    }

    /// Number of frames waiting for [`Sequencer::play_sequence`].
    pub fn recorded_len(&self) -> usize {
        self.state.lock().borrow().recorded.len()
    }

    /// Leave offline mode and send the recording as one datagram.
    ///
    /// The datagram is never split, whatever the transport's
    /// `max_batch_frames`. The lock is held for the whole flush, so no
    /// other caller can interleave with the recorded frames.
    pub fn play_sequence(&self) -> Result<Vec<FramePair>> {
        let guard = self.state.lock();
        let recorded = {
            let mut state = guard.borrow_mut();
            if !state.offline {
                return Err(KosmosError::invalid_state("play_sequence() called outside offline mode"));
            }
            state.offline = false;
            std::mem::take(&mut state.recorded)
        };

        info!("Playing recorded sequence: {} frames", recorded.len());
        if recorded.is_empty() {
            return Ok(Vec::new());
        }
        self.transport.send_batch(recorded, Channel::Control)
    }

    /// Cached hardware configuration; only a cached value is available offline.
    pub fn hwcfg(&self) -> Result<HwCfg> {
        let guard = self.state.lock();
        if guard.borrow().offline {
            return self
                .transport
                .cached_hwcfg()
                .ok_or_else(|| KosmosError::invalid_state("HWCFG is not cached and cannot be read offline"));
        }
        self.transport.hwcfg()
    }

    /// Cached FPGA revision; only a cached value is available offline.
    pub fn fpga_revision(&self) -> Result<FpgaRevision> {
        let guard = self.state.lock();
        if guard.borrow().offline {
            return self
                .transport
                .cached_fpga_revision()
                .ok_or_else(|| KosmosError::invalid_state("FPGA revision is not cached and cannot be read offline"));
        }
        self.transport.fpga_revision()
    }
}
