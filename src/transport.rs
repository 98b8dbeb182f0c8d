//! Request/reply transport
//!
//! The transport is the single authoritative validator of exchanges with the
//! FPGA. It stamps sequence ids on a request list, hands the list to the
//! [`Link`] and checks every `(tx, rx)` pair with [`check_message_replies`].
//!
//! ## Validation order
//!
//! For each pair in batch order, stopping at the first violation:
//!
//! 1. `rx.seq_id == tx.seq_id`, else [`KosmosError::OutOfSequence`]
//! 2. a status reply is accepted when `SUCCESS`; `BUFFER_OVERRUN` and
//!    `BUFFER_UNDERRUN` map to their own errors, any other code to
//!    [`KosmosError::MessageReply`]
//! 3. `rx.id == tx.id`, else [`KosmosError::SendPayload`]
//! 4. `rx.cmd == tx.cmd | REPLY_FLAG`, else [`KosmosError::SendPayload`]

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::error::ExchangeFailure;
use crate::link::{Channel, Link};
use crate::protocol::{
    Frame, FpgaRevision, HwCfg, Payload, REPLY_FLAG, ReturnCode, is_valid_id_cmd, msg_cmd, msg_id,
    return_code_name, tx_frames_str, txrx_frames_error_str,
};
use crate::{KosmosError, Result};

/// Largest number of frames sent in one datagram; keeps sequence ids unique.
pub const MAX_BATCH_FRAMES: usize = 256;

/// A request frame paired with its reply
pub type FramePair = (Frame, Frame);

/// Single-writer gateway between callers and the link
pub struct Transport {
    link: Box<dyn Link>,
    /// Next sequence id; held for the whole exchange so datagrams never interleave
    next_seq: Mutex<u8>,
    max_batch_frames: usize,
    hwcfg: Mutex<Option<HwCfg>>,
    fpga_revision: Mutex<Option<FpgaRevision>>,
}

impl Transport {
    pub fn new<L: Link + 'static>(link: L) -> Self {
        Self {
            link: Box::new(link),
            next_seq: Mutex::new(0),
            max_batch_frames: MAX_BATCH_FRAMES,
            hwcfg: Mutex::new(None),
            fpga_revision: Mutex::new(None),
        }
    }

    /// Limit the number of frames per datagram, clamped to `1..=256`.
    pub fn with_max_batch_frames(mut self, max_batch_frames: usize) -> Self {
        self.max_batch_frames = max_batch_frames.clamp(1, MAX_BATCH_FRAMES);
        self
    }

    pub fn max_batch_frames(&self) -> usize {
        self.max_batch_frames
    }

    /// Sequence id the next request will carry.
    pub fn next_sequence_id(&self) -> u8 {
        *self.next_seq.lock()
    }

    /// Send a request list on the control channel and validate every reply.
    pub fn send_control_message_list(&self, frames: Vec<Frame>) -> Result<Vec<FramePair>> {
        self.send_message_list(frames, Channel::Control)
    }

    /// Send a single request and return the decoded reply payload.
    pub fn send_control_message(&self, id: u8, cmd: u8) -> Result<Payload> {
        let rx = self.send_control_request(Frame::new(id, cmd))?;
        Ok(rx.payload())
    }

    /// Send a single prepared request and return the reply frame.
    pub fn send_control_request(&self, frame: Frame) -> Result<Frame> {
        let mut pairs = self.send_control_message_list(vec![frame])?;
        pairs.pop().map(|(_, rx)| rx).ok_or(KosmosError::LinkCount { sent: 1, received: 0 })
    }

    /// Send `frames` on `channel`, splitting into datagrams of at most
    /// `max_batch_frames` frames.
    pub fn send_message_list(&self, frames: Vec<Frame>, channel: Channel) -> Result<Vec<FramePair>> {
        self.exchange(frames, channel, self.max_batch_frames)
    }

    /// Send `frames` on `channel` as a single datagram, ignoring `max_batch_frames`.
    ///
    /// Fails with [`KosmosError::InvalidRequest`] above [`MAX_BATCH_FRAMES`] frames.
    pub(crate) fn send_batch(&self, frames: Vec<Frame>, channel: Channel) -> Result<Vec<FramePair>> {
        if frames.len() > MAX_BATCH_FRAMES {
            return Err(KosmosError::invalid_request(format!(
                "{} frames do not fit in one datagram (limit {})",
                frames.len(),
                MAX_BATCH_FRAMES
            )));
        }
        self.exchange(frames, channel, MAX_BATCH_FRAMES)
    }

    fn exchange(&self, mut frames: Vec<Frame>, channel: Channel, chunk_size: usize) -> Result<Vec<FramePair>> {
        for frame in &frames {
            validate_request(frame)?;
        }
        if frames.is_empty() {
            return Ok(Vec::new());
        }

        let mut next_seq = self.next_seq.lock();
        for frame in frames.iter_mut() {
            frame.seq_id = *next_seq;
            *next_seq = next_seq.wrapping_add(1);
        }

        let mut pairs: Vec<FramePair> = Vec::with_capacity(frames.len());
        for chunk in frames.chunks(chunk_size) {
            debug!(
                "Sending batch: {} frames, first seq_id={:#04x}, channel={:?}",
                chunk.len(),
                chunk[0].seq_id,
                channel
            );
            trace!("TX batch:\n{}", tx_frames_str(chunk));

            let replies = self.link.send_datagram(chunk, channel)?;
            if replies.len() != chunk.len() {
                return Err(KosmosError::LinkCount { sent: chunk.len(), received: replies.len() });
            }

            let checked_from = pairs.len();
            pairs.extend(chunk.iter().cloned().zip(replies));
            check_pairs(&pairs, checked_from)?;
        }

        Ok(pairs)
    }

    /// Hardware configuration, fetched on first access and cached.
    pub fn hwcfg(&self) -> Result<HwCfg> {
        let mut cache = self.hwcfg.lock();
        if let Some(hwcfg) = *cache {
            return Ok(hwcfg);
        }
        let hwcfg = self.send_control_request(Frame::new(msg_id::FPGA, msg_cmd::HWCFG))?.extract::<HwCfg>()?;
        debug!("Cached HWCFG: {:#010x}", hwcfg.modules);
        *cache = Some(hwcfg);
        Ok(hwcfg)
    }

    /// FPGA revision, fetched on first access and cached.
    pub fn fpga_revision(&self) -> Result<FpgaRevision> {
        let mut cache = self.fpga_revision.lock();
        if let Some(revision) = *cache {
            return Ok(revision);
        }
        let revision = self
            .send_control_request(Frame::new(msg_id::FPGA, msg_cmd::HW_REV_READ))?
            .extract::<FpgaRevision>()?;
        debug!("Cached FPGA revision: {}", revision);
        *cache = Some(revision);
        Ok(revision)
    }

    pub fn cached_hwcfg(&self) -> Option<HwCfg> {
        *self.hwcfg.lock()
    }

    pub fn cached_fpga_revision(&self) -> Option<FpgaRevision> {
        *self.fpga_revision.lock()
    }
}

/// Reject requests that can never be valid on the wire.
pub(crate) fn validate_request(frame: &Frame) -> Result<()> {
    if frame.is_reply() {
        return Err(KosmosError::invalid_request(format!(
            "request {} carries the reply flag (cmd={:#04x})",
            frame.context(),
            frame.cmd
        )));
    }
    if !is_valid_id_cmd(frame.id, frame.cmd) {
        return Err(KosmosError::invalid_request(format!(
            "undefined message id={:#04x} cmd={:#04x}",
            frame.id, frame.cmd
        )));
    }
    Ok(())
}

/// Validate every `(tx, rx)` pair in batch order, stopping at the first violation.
pub fn check_message_replies(pairs: &[FramePair]) -> Result<()> {
    check_pairs(pairs, 0)
}

fn check_pairs(pairs: &[FramePair], from: usize) -> Result<()> {
    for (index, (tx, rx)) in pairs.iter().enumerate().skip(from) {
        let failure = |reason: String| {
            Box::new(ExchangeFailure {
                index,
                context: tx.context(),
                reason,
                pairs: pairs.to_vec(),
                dump: txrx_frames_error_str(pairs, Some(index)),
            })
        };

        if rx.seq_id != tx.seq_id {
            return Err(KosmosError::OutOfSequence(failure(format!(
                "expected seq_id {:#04x}, got {:#04x}",
                tx.seq_id, rx.seq_id
            ))));
        }

        if let Some(status) = rx.status_reply() {
            let code_name = return_code_name(status.return_code).unwrap_or("UNKNOWN");
            let reason = format!("return code {:#04x} ({})", status.return_code, code_name);
            match status.code() {
                Some(ReturnCode::Success) => continue,
                Some(ReturnCode::BufferOverrun) => return Err(KosmosError::OverrunPayload(failure(reason))),
                Some(ReturnCode::BufferUnderrun) => return Err(KosmosError::UnderrunPayload(failure(reason))),
                _ => return Err(KosmosError::MessageReply(failure(reason))),
            }
        }

        if rx.id != tx.id {
            return Err(KosmosError::SendPayload(failure(format!(
                "expected id {:#04x}, got {:#04x}",
                tx.id, rx.id
            ))));
        }

        if rx.cmd != tx.cmd | REPLY_FLAG {
            return Err(KosmosError::SendPayload(failure(format!(
                "expected cmd {:#04x}, got {:#04x}",
                tx.cmd | REPLY_FLAG,
                rx.cmd
            ))));
        }
    }
    Ok(())
}
