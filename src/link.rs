//! Link adapter over the byte-oriented USB connection to the FPGA
//!
//! The adapter knows nothing about request/reply semantics. It encodes a list
//! of frames into one bulk transfer, decodes the reply block and checks that
//! the FPGA answered once per request.

use parking_lot::Mutex;
use tracing::{debug, trace};

use crate::protocol::{FRAME_SIZE, Frame};
use crate::{KosmosError, Result};

/// USB endpoint pair used for a datagram
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Channel {
    /// Configuration and status traffic
    Control,
    /// Bulk capture and stimulus traffic
    Data,
}

/// Raw byte transport underneath the link adapter.
///
/// One call is one bulk OUT transfer followed by the matching bulk IN
/// transfer. Timeouts are whatever the implementation applies and surface as
/// I/O errors.
pub trait ByteLink: Send {
    fn transfer(&mut self, channel: Channel, tx: &[u8]) -> std::io::Result<Vec<u8>>;
}

/// Frame-level link used by the transport.
pub trait Link: Send + Sync {
    /// Send `frames` as one datagram and return the replies in arrival order.
    fn send_datagram(&self, frames: &[Frame], channel: Channel) -> Result<Vec<Frame>>;
}

/// Frame codec on top of a [`ByteLink`], serializing concurrent callers.
pub struct LinkAdapter<B> {
    inner: Mutex<B>,
}

impl<B: ByteLink> LinkAdapter<B> {
    pub fn new(byte_link: B) -> Self {
        Self { inner: Mutex::new(byte_link) }
    }

    pub fn into_inner(self) -> B {
        self.inner.into_inner()
    }
}

impl<B: ByteLink> Link for LinkAdapter<B> {
    fn send_datagram(&self, frames: &[Frame], channel: Channel) -> Result<Vec<Frame>> {
        let mut tx = Vec::with_capacity(frames.len() * FRAME_SIZE);
        for frame in frames {
            tx.extend_from_slice(&frame.encode());
        }

        debug!("Sending datagram: {} frames ({} bytes) on {:?}", frames.len(), tx.len(), channel);

        let rx = {
            let mut link = self.inner.lock();
            link.transfer(channel, &tx)
                .map_err(|e| KosmosError::link_failed_with_source("Bulk transfer failed", Box::new(e)))?
        };

        if rx.len() % FRAME_SIZE != 0 {
            return Err(KosmosError::Codec {
                context: "Datagram decoding".to_string(),
                details: format!("{} bytes is not a multiple of the {} byte frame size", rx.len(), FRAME_SIZE),
            });
        }

        let replies = rx.chunks_exact(FRAME_SIZE).map(Frame::decode).collect::<Result<Vec<_>>>()?;
        for reply in &replies {
            trace!("RX {:?}", reply);
        }

        if replies.len() != frames.len() {
            return Err(KosmosError::LinkCount { sent: frames.len(), received: replies.len() });
        }

        Ok(replies)
    }
}

impl<L: Link + ?Sized> Link for std::sync::Arc<L> {
    fn send_datagram(&self, frames: &[Frame], channel: Channel) -> Result<Vec<Frame>> {
        (**self).send_datagram(frames, channel)
    }
}

impl<L: Link + ?Sized> Link for Box<L> {
    fn send_datagram(&self, frames: &[Frame], channel: Channel) -> Result<Vec<Frame>> {
        (**self).send_datagram(frames, channel)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::{HwCfg, msg_cmd, msg_id};

    /// Byte link answering with a canned reply block.
    struct Canned {
        reply: std::io::Result<Vec<u8>>,
        sent: Vec<u8>,
    }

    impl ByteLink for Canned {
        fn transfer(&mut self, _channel: Channel, tx: &[u8]) -> std::io::Result<Vec<u8>> {
            self.sent = tx.to_vec();
            match &self.reply {
                Ok(bytes) => Ok(bytes.clone()),
                Err(e) => Err(std::io::Error::new(e.kind(), e.to_string())),
            }
        }
    }

    fn request() -> Frame {
        Frame::new(msg_id::FPGA, msg_cmd::HWCFG)
    }

    #[test]
    fn decodes_one_reply_per_request() {
        let reply = Frame::reply_to(&request(), &HwCfg::new(7));
        let adapter = LinkAdapter::new(Canned { reply: Ok(reply.encode().to_vec()), sent: Vec::new() });

        let replies = adapter.send_datagram(&[request()], Channel::Control).unwrap();
        assert_eq!(replies, vec![reply]);
        assert_eq!(adapter.into_inner().sent, request().encode().to_vec());
    }

    #[test]
    fn reply_count_mismatch_is_reported() {
        let reply = Frame::reply_to(&request(), &HwCfg::new(7));
        let adapter = LinkAdapter::new(Canned { reply: Ok(reply.encode().to_vec()), sent: Vec::new() });

        match adapter.send_datagram(&[request(), request()], Channel::Control) {
            Err(KosmosError::LinkCount { sent, received }) => {
                assert_eq!(sent, 2);
                assert_eq!(received, 1);
            }
            other => panic!("Expected LinkCount error, got {:?}", other),
        }
    }

    #[test]
    fn truncated_reply_block_is_a_codec_error() {
        let adapter = LinkAdapter::new(Canned { reply: Ok(vec![0u8; FRAME_SIZE + 3]), sent: Vec::new() });
        let result = adapter.send_datagram(&[request()], Channel::Data);
        assert!(matches!(result, Err(KosmosError::Codec { .. })));
    }

    #[test]
    fn io_failures_surface_as_link_errors() {
        let adapter = LinkAdapter::new(Canned {
            reply: Err(std::io::Error::new(std::io::ErrorKind::TimedOut, "timeout")),
            sent: Vec::new(),
        });
        let result = adapter.send_datagram(&[request()], Channel::Control);
        assert!(matches!(result, Err(KosmosError::Link { .. })));
    }
}
