//! Payload union variants
//!
//! Every frame carries a fixed [`PAYLOAD_SIZE`] byte payload whose meaning is
//! selected by the frame's `(id, cmd)`. Each variant is a plain struct that
//! reads itself from, and writes itself to, the raw payload block. Multi-byte
//! fields are little-endian.

use super::ids::{REPLY_FLAG, ReturnCode, msg_cmd as cmd, msg_id as id};
use serde::{Deserialize, Serialize};

/// Payload size in bytes
pub const PAYLOAD_SIZE: usize = 29;

/// Raw payload block
pub type PayloadBytes = [u8; PAYLOAD_SIZE];

const GIT_VERSION_HASH_SIZE: usize = 20;

/// Number of capture bytes a single spy READ reply can carry
pub const SPY_CHUNK_CAPACITY: usize = PAYLOAD_SIZE - 1;

/// Type tag selecting the payload interpretation
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum PayloadKind {
    Raw,
    StatusReply,
    GitVersion,
    GitInfo,
    HwCfg,
    FpgaRevision,
    ModuleStatus,
    SpyChunk,
}

/// Choose the payload interpretation for a frame. The reply flag is ignored.
pub fn payload_variant_for(msg_id: u8, msg_cmd: u8) -> PayloadKind {
    let msg_cmd = msg_cmd & !REPLY_FLAG;
    match msg_id {
        id::STATUS => PayloadKind::StatusReply,
        id::PROTOCOL | id::KOSMOS => match msg_cmd {
            cmd::VERSION => PayloadKind::GitVersion,
            cmd::GIT_DESCRIBE_1..=cmd::GIT_HASH_2 => PayloadKind::GitInfo,
            _ => PayloadKind::Raw,
        },
        id::FPGA => match msg_cmd {
            cmd::HWCFG => PayloadKind::HwCfg,
            cmd::HW_REV_READ => PayloadKind::FpgaRevision,
            _ => PayloadKind::Raw,
        },
        id::TEST => PayloadKind::Raw,
        id::I2C_SPY | id::LED_SPY if msg_cmd == cmd::READ => PayloadKind::SpyChunk,
        _ if msg_cmd == cmd::RESET || msg_cmd == cmd::STATUS => PayloadKind::ModuleStatus,
        _ => PayloadKind::Raw,
    }
}

/// A typed view over the raw payload block.
pub trait PayloadVariant: Sized {
    /// Tag checked against [`payload_variant_for`] on extraction
    const KIND: PayloadKind;

    fn read(bytes: &PayloadBytes) -> Self;

    fn write(&self, bytes: &mut PayloadBytes);
}

/// Generic status reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct StatusReply {
    pub return_code: u8,
}

impl StatusReply {
    pub fn new(code: ReturnCode) -> Self {
        Self { return_code: code as u8 }
    }

    /// Well-known return code, `None` for unclassified values.
    pub fn code(&self) -> Option<ReturnCode> {
        ReturnCode::from_u8(self.return_code)
    }

    pub fn is_success(&self) -> bool {
        self.return_code == ReturnCode::Success as u8
    }
}

impl PayloadVariant for StatusReply {
    const KIND: PayloadKind = PayloadKind::StatusReply;

    fn read(bytes: &PayloadBytes) -> Self {
        Self { return_code: bytes[0] }
    }

    fn write(&self, bytes: &mut PayloadBytes) {
        bytes[0] = self.return_code;
    }
}

/// Reply to the `VERSION` command
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitVersion {
    /// Short commit hash, ASCII, NUL padded
    pub hash: [u8; GIT_VERSION_HASH_SIZE],
    /// Build timestamp, seconds since the Unix epoch
    pub timestamp: u32,
    pub is_dirty: bool,
    pub is_debug: bool,
}

impl GitVersion {
    pub fn hash_str(&self) -> String {
        trim_nul(&self.hash)
    }
}

impl PayloadVariant for GitVersion {
    const KIND: PayloadKind = PayloadKind::GitVersion;

    fn read(bytes: &PayloadBytes) -> Self {
        let mut hash = [0u8; GIT_VERSION_HASH_SIZE];
        hash.copy_from_slice(&bytes[..GIT_VERSION_HASH_SIZE]);
        Self {
            hash,
            timestamp: read_u32_le(bytes, 20),
            is_dirty: bytes[24] != 0,
            is_debug: bytes[25] != 0,
        }
    }

    fn write(&self, bytes: &mut PayloadBytes) {
        bytes[..GIT_VERSION_HASH_SIZE].copy_from_slice(&self.hash);
        bytes[20..24].copy_from_slice(&self.timestamp.to_le_bytes());
        bytes[24] = u8::from(self.is_dirty);
        bytes[25] = u8::from(self.is_debug);
    }
}

/// One half of a Git string (describe, branch or hash)
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct GitInfo {
    pub value: PayloadBytes,
}

impl GitInfo {
    pub fn from_str_lossy(text: &str) -> Self {
        let mut value = [0u8; PAYLOAD_SIZE];
        let len = text.len().min(PAYLOAD_SIZE);
        value[..len].copy_from_slice(&text.as_bytes()[..len]);
        Self { value }
    }
}

impl PayloadVariant for GitInfo {
    const KIND: PayloadKind = PayloadKind::GitInfo;

    fn read(bytes: &PayloadBytes) -> Self {
        Self { value: *bytes }
    }

    fn write(&self, bytes: &mut PayloadBytes) {
        bytes.copy_from_slice(&self.value);
    }
}

/// Hardware configuration: one bit per FPGA module
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct HwCfg {
    pub modules: u32,
}

impl HwCfg {
    pub fn new(modules: u32) -> Self {
        Self { modules }
    }

    pub fn is_set(&self, bit: u32) -> bool {
        bit < 32 && (self.modules & (1 << bit)) != 0
    }
}

impl PayloadVariant for HwCfg {
    const KIND: PayloadKind = PayloadKind::HwCfg;

    fn read(bytes: &PayloadBytes) -> Self {
        Self { modules: read_u32_le(bytes, 0) }
    }

    fn write(&self, bytes: &mut PayloadBytes) {
        bytes[0..4].copy_from_slice(&self.modules.to_le_bytes());
    }
}

/// FPGA hardware revision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct FpgaRevision {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl std::fmt::Display for FpgaRevision {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}.{}.{}", self.major, self.minor, self.patch)
    }
}

impl PayloadVariant for FpgaRevision {
    const KIND: PayloadKind = PayloadKind::FpgaRevision;

    fn read(bytes: &PayloadBytes) -> Self {
        Self { major: bytes[0], minor: bytes[1], patch: bytes[2] }
    }

    fn write(&self, bytes: &mut PayloadBytes) {
        bytes[0] = self.major;
        bytes[1] = self.minor;
        bytes[2] = self.patch;
    }
}

/// Reply to a module `RESET` or `STATUS` command
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct ModuleStatus {
    pub state: u8,
    pub fifo_count: u16,
    pub buffer_count: u16,
    pub overrun: bool,
}

impl PayloadVariant for ModuleStatus {
    const KIND: PayloadKind = PayloadKind::ModuleStatus;

    fn read(bytes: &PayloadBytes) -> Self {
        Self {
            state: bytes[0],
            fifo_count: read_u16_le(bytes, 1),
            buffer_count: read_u16_le(bytes, 3),
            overrun: bytes[5] != 0,
        }
    }

    fn write(&self, bytes: &mut PayloadBytes) {
        bytes[0] = self.state;
        bytes[1..3].copy_from_slice(&self.fifo_count.to_le_bytes());
        bytes[3..5].copy_from_slice(&self.buffer_count.to_le_bytes());
        bytes[5] = u8::from(self.overrun);
    }
}

/// Reply to a spy `READ` command: a slice of the capture buffer
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "SpyChunkFields")]
pub struct SpyChunk {
    count: u8,
    data: Vec<u8>,
}

#[derive(Deserialize)]
struct SpyChunkFields {
    count: u8,
    data: Vec<u8>,
}

impl TryFrom<SpyChunkFields> for SpyChunk {
    type Error = String;

    fn try_from(fields: SpyChunkFields) -> Result<Self, Self::Error> {
        if fields.data.len() > SPY_CHUNK_CAPACITY {
            return Err(format!(
                "spy chunk holds {} bytes, at most {} fit in a frame",
                fields.data.len(),
                SPY_CHUNK_CAPACITY
            ));
        }
        if fields.count as usize != fields.data.len() {
            return Err(format!("spy chunk count {} does not match {} data bytes", fields.count, fields.data.len()));
        }
        Ok(Self::new(&fields.data))
    }
}

impl SpyChunk {
    /// Build a chunk; bytes beyond [`SPY_CHUNK_CAPACITY`] are dropped.
    pub fn new(data: &[u8]) -> Self {
        let len = data.len().min(SPY_CHUNK_CAPACITY);
        Self { count: len as u8, data: data[..len].to_vec() }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.data
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

impl PayloadVariant for SpyChunk {
    const KIND: PayloadKind = PayloadKind::SpyChunk;

    fn read(bytes: &PayloadBytes) -> Self {
        let count = bytes[0].min(SPY_CHUNK_CAPACITY as u8);
        Self { count, data: bytes[1..1 + count as usize].to_vec() }
    }

    fn write(&self, bytes: &mut PayloadBytes) {
        bytes[0] = self.count;
        bytes[1..1 + self.data.len()].copy_from_slice(&self.data);
    }
}

/// Decoded payload, discriminated by the frame's `(id, cmd)`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub enum Payload {
    Raw(PayloadBytes),
    StatusReply(StatusReply),
    GitVersion(GitVersion),
    GitInfo(GitInfo),
    HwCfg(HwCfg),
    FpgaRevision(FpgaRevision),
    ModuleStatus(ModuleStatus),
    SpyChunk(SpyChunk),
}

impl Payload {
    pub fn decode(kind: PayloadKind, bytes: &PayloadBytes) -> Self {
        match kind {
            PayloadKind::Raw => Payload::Raw(*bytes),
            PayloadKind::StatusReply => Payload::StatusReply(StatusReply::read(bytes)),
            PayloadKind::GitVersion => Payload::GitVersion(GitVersion::read(bytes)),
            PayloadKind::GitInfo => Payload::GitInfo(GitInfo::read(bytes)),
            PayloadKind::HwCfg => Payload::HwCfg(HwCfg::read(bytes)),
            PayloadKind::FpgaRevision => Payload::FpgaRevision(FpgaRevision::read(bytes)),
            PayloadKind::ModuleStatus => Payload::ModuleStatus(ModuleStatus::read(bytes)),
            PayloadKind::SpyChunk => Payload::SpyChunk(SpyChunk::read(bytes)),
        }
    }

    pub fn kind(&self) -> PayloadKind {
        match self {
            Payload::Raw(_) => PayloadKind::Raw,
            Payload::StatusReply(_) => PayloadKind::StatusReply,
            Payload::GitVersion(_) => PayloadKind::GitVersion,
            Payload::GitInfo(_) => PayloadKind::GitInfo,
            Payload::HwCfg(_) => PayloadKind::HwCfg,
            Payload::FpgaRevision(_) => PayloadKind::FpgaRevision,
            Payload::ModuleStatus(_) => PayloadKind::ModuleStatus,
            Payload::SpyChunk(_) => PayloadKind::SpyChunk,
        }
    }
}

/// Concatenate payload strings and drop the trailing NUL padding.
pub fn trim_nul(bytes: &[u8]) -> String {
    let end = bytes.iter().rposition(|&b| b != 0).map(|pos| pos + 1).unwrap_or(0);
    String::from_utf8_lossy(&bytes[..end]).into_owned()
}

fn read_u16_le(bytes: &[u8], offset: usize) -> u16 {
    u16::from_le_bytes([bytes[offset], bytes[offset + 1]])
}

fn read_u32_le(bytes: &[u8], offset: usize) -> u32 {
    u32::from_le_bytes([bytes[offset], bytes[offset + 1], bytes[offset + 2], bytes[offset + 3]])
}
