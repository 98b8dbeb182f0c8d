//! Fixed-size message frame and its wire codec
//!
//! ## Wire layout
//!
//! ```text
//! offset 0     id       u8
//! offset 1     cmd      u8   (bit 7 = REPLY_FLAG on replies)
//! offset 2     seq_id   u8
//! offset 3..32 payload  [u8; 29], variant selected by (id, cmd)
//! ```
//!
//! Unused payload bytes are zero on TX and ignored on RX.

use super::ids::{self, REPLY_FLAG, msg_cmd, msg_id};
use super::payload::{
    PAYLOAD_SIZE, Payload, PayloadBytes, PayloadVariant, StatusReply, payload_variant_for,
};
use crate::{KosmosError, Result};

const PAYLOAD_OFFSET: usize = 3;

/// Size of an encoded frame in bytes
pub const FRAME_SIZE: usize = PAYLOAD_OFFSET + PAYLOAD_SIZE;

/// One request or reply unit on the wire
#[derive(Clone, PartialEq, Eq)]
pub struct Frame {
    pub id: u8,
    pub cmd: u8,
    pub seq_id: u8,
    pub payload: PayloadBytes,
}

impl Frame {
    /// Request frame with a zeroed payload. The sequence id is stamped by the transport.
    pub fn new(id: u8, cmd: u8) -> Self {
        Self { id, cmd, seq_id: 0, payload: [0u8; PAYLOAD_SIZE] }
    }

    /// Request frame carrying a typed payload.
    pub fn with_payload<T: PayloadVariant>(id: u8, cmd: u8, payload: &T) -> Self {
        let mut frame = Self::new(id, cmd);
        payload.write(&mut frame.payload);
        frame
    }

    /// Request frame carrying raw payload bytes; extra bytes are dropped.
    pub fn with_raw_payload(id: u8, cmd: u8, bytes: &[u8]) -> Self {
        let mut frame = Self::new(id, cmd);
        let len = bytes.len().min(PAYLOAD_SIZE);
        frame.payload[..len].copy_from_slice(&bytes[..len]);
        frame
    }

    /// Reply frame answering `request` with the given payload.
    pub fn reply_to<T: PayloadVariant>(request: &Frame, payload: &T) -> Self {
        let mut frame = Self::new(request.id, request.cmd | REPLY_FLAG);
        frame.seq_id = request.seq_id;
        payload.write(&mut frame.payload);
        frame
    }

    /// Status reply frame answering `request`.
    pub fn status_reply_to(request: &Frame, reply: StatusReply) -> Self {
        let mut frame = Self::new(msg_id::STATUS, msg_cmd::STATUS_REPLY | REPLY_FLAG);
        frame.seq_id = request.seq_id;
        reply.write(&mut frame.payload);
        frame
    }

    pub fn is_reply(&self) -> bool {
        self.cmd & REPLY_FLAG != 0
    }

    /// Whether this is a generic status reply (`STATUS` / `REPLY | REPLY_FLAG`).
    pub fn is_status_reply(&self) -> bool {
        self.id == msg_id::STATUS && self.cmd == msg_cmd::STATUS_REPLY | REPLY_FLAG
    }

    /// The status payload, for status reply frames only.
    pub fn status_reply(&self) -> Option<StatusReply> {
        self.is_status_reply().then(|| StatusReply::read(&self.payload))
    }

    /// Decode the payload according to the frame's `(id, cmd)`.
    pub fn payload(&self) -> Payload {
        Payload::decode(payload_variant_for(self.id, self.cmd), &self.payload)
    }

    /// Extract a specific payload variant, failing when `(id, cmd)` selects another one.
    pub fn extract<T: PayloadVariant>(&self) -> Result<T> {
        let actual = payload_variant_for(self.id, self.cmd);
        if actual != T::KIND {
            return Err(KosmosError::ExtractPayload {
                id: self.id,
                cmd: self.cmd,
                requested: T::KIND,
                actual,
            });
        }
        Ok(T::read(&self.payload))
    }

    /// Serialize to the fixed-size wire block.
    pub fn encode(&self) -> [u8; FRAME_SIZE] {
        let mut block = [0u8; FRAME_SIZE];
        block[0] = self.id;
        block[1] = self.cmd;
        block[2] = self.seq_id;
        block[PAYLOAD_OFFSET..].copy_from_slice(&self.payload);
        block
    }

    /// Deserialize a wire block. Only the size is checked.
    pub fn decode(bytes: &[u8]) -> Result<Self> {
        if bytes.len() != FRAME_SIZE {
            return Err(KosmosError::Codec {
                context: "Frame decoding".to_string(),
                details: format!("expected {} bytes, got {}", FRAME_SIZE, bytes.len()),
            });
        }

        let mut payload = [0u8; PAYLOAD_SIZE];
        payload.copy_from_slice(&bytes[PAYLOAD_OFFSET..]);
        Ok(Self { id: bytes[0], cmd: bytes[1], seq_id: bytes[2], payload })
    }

    /// `ID/CMD` names, falling back to hex for unknown values.
    pub fn context(&self) -> String {
        let id_name = ids::id_name(self.id).map(str::to_string).unwrap_or(format!("{:#04x}", self.id));
        let cmd_name = ids::cmd_name(self.id, self.cmd)
            .map(str::to_string)
            .unwrap_or(format!("{:#04x}", self.cmd & !REPLY_FLAG));
        format!("{}/{}", id_name, cmd_name)
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(
            f,
            "Frame {{ id: {:#04x}, cmd: {:#04x}, seq_id: {:#04x}, payload: {} }}",
            self.id,
            self.cmd,
            self.seq_id,
            hex(&self.payload)
        )
    }
}

/// Space separated uppercase hex.
pub fn hex(bytes: &[u8]) -> String {
    bytes.iter().map(|b| format!("{:02X}", b)).collect::<Vec<_>>().join(" ")
}
