//! Host-side FPGA simulator
//!
//! [`SimulatedFpga`] implements [`ByteLink`] and answers requests the way the
//! Kosmos firmware does, so the full stack can run without a rig. It records
//! every datagram it receives and supports one-shot fault injection to
//! exercise the transport's validation rules.
//!
//! The simulator is cheap to clone; clones share state, so a test can keep a
//! handle for inspection after moving one into a [`crate::LinkAdapter`].
//!
//! ```rust
//! use kosmos::emulator::{Fault, SimulatedFpga};
//! use kosmos::protocol::ReturnCode;
//!
//! let fpga = SimulatedFpga::new().with_hwcfg(0b11);
//! fpga.inject(Fault::Status { index: 1, code: ReturnCode::BufferOverrun as u8 });
//! assert_eq!(fpga.transfer_count(), 0);
//! ```

use parking_lot::Mutex;
use std::collections::{HashMap, VecDeque};
use std::sync::Arc;
use tracing::trace;

use crate::link::{ByteLink, Channel};
use crate::protocol::{
    FRAME_SIZE, FpgaRevision, Frame, GitInfo, GitVersion, HwCfg, ModuleStatus, PAYLOAD_SIZE,
    REPLY_FLAG, ReturnCode, SPY_CHUNK_CAPACITY, SpyChunk, StatusReply, is_valid_id, is_valid_id_cmd,
    msg_cmd, msg_id,
};

/// One-shot fault applied to the next datagram
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Fault {
    /// Replace the reply at `index` with a status reply carrying `code`
    Status { index: usize, code: u8 },
    /// Rotate reply sequence ids by one position
    RotateSequence,
    /// Drop the last reply
    DropReply,
    /// Truncate the reply block by one byte
    TruncateReply,
}

/// Git identity reported by the `PROTOCOL` or `KOSMOS` module
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub describe: String,
    pub branch: String,
    pub hash: String,
    pub timestamp: u32,
    pub debug: bool,
}

impl GitIdentity {
    pub fn new(describe: &str, branch: &str, hash: &str) -> Self {
        Self {
            describe: describe.to_string(),
            branch: branch.to_string(),
            hash: hash.to_string(),
            timestamp: 0,
            debug: false,
        }
    }

    fn git_version(&self) -> GitVersion {
        let mut hash = [0u8; 20];
        let short = &self.hash.as_bytes()[..self.hash.len().min(7)];
        hash[..short.len()].copy_from_slice(short);
        GitVersion {
            hash,
            timestamp: self.timestamp,
            is_dirty: self.describe.ends_with("-dirty"),
            is_debug: self.debug,
        }
    }
}

impl Default for GitIdentity {
    fn default() -> Self {
        Self::new("v1.0.0", "main", "abcdef0123456789abcdef0123456789abcdef01")
    }
}

#[derive(Debug, Default)]
struct ModuleState {
    running: bool,
}

#[derive(Debug)]
struct State {
    hwcfg: HwCfg,
    revision: FpgaRevision,
    identities: HashMap<u8, GitIdentity>,
    modules: HashMap<u8, ModuleState>,
    spy_buffer: VecDeque<u8>,
    faults: VecDeque<Fault>,
    datagrams: Vec<(Channel, Vec<Frame>)>,
}

/// Simulated Kosmos FPGA speaking the frame protocol over a byte link
#[derive(Debug, Clone)]
pub struct SimulatedFpga {
    state: Arc<Mutex<State>>,
}

impl Default for SimulatedFpga {
    fn default() -> Self {
        Self::new()
    }
}

impl SimulatedFpga {
    /// Simulator advertising every known module, revision 1.0.0.
    pub fn new() -> Self {
        let mut identities = HashMap::new();
        identities.insert(msg_id::PROTOCOL, GitIdentity::default());
        identities.insert(msg_id::KOSMOS, GitIdentity::default());

        let state = State {
            hwcfg: HwCfg::new(0x3FF),
            revision: FpgaRevision { major: 1, minor: 0, patch: 0 },
            identities,
            modules: HashMap::new(),
            spy_buffer: VecDeque::new(),
            faults: VecDeque::new(),
            datagrams: Vec::new(),
        };
        Self { state: Arc::new(Mutex::new(state)) }
    }

    pub fn with_hwcfg(self, modules: u32) -> Self {
        self.state.lock().hwcfg = HwCfg::new(modules);
        self
    }

    pub fn with_revision(self, revision: FpgaRevision) -> Self {
        self.state.lock().revision = revision;
        self
    }

    /// Git identity answered for `target` (`msg_id::PROTOCOL` or `msg_id::KOSMOS`).
    pub fn with_git_identity(self, target: u8, identity: GitIdentity) -> Self {
        self.state.lock().identities.insert(target, identity);
        self
    }

    /// Append bytes to the I2C spy capture buffer.
    pub fn load_spy_capture(&self, bytes: &[u8]) {
        self.state.lock().spy_buffer.extend(bytes.iter().copied());
    }

    /// Queue a fault; each datagram consumes at most one.
    pub fn inject(&self, fault: Fault) {
        self.state.lock().faults.push_back(fault);
    }

    /// Every datagram received so far, with its channel.
    pub fn datagrams(&self) -> Vec<(Channel, Vec<Frame>)> {
        self.state.lock().datagrams.clone()
    }

    pub fn transfer_count(&self) -> usize {
        self.state.lock().datagrams.len()
    }

    pub fn clear_datagrams(&self) {
        self.state.lock().datagrams.clear();
    }

    /// Whether the module behind `id` has been started and not stopped.
    pub fn is_running(&self, id: u8) -> bool {
        self.state.lock().modules.get(&id).is_some_and(|m| m.running)
    }
}

impl State {
    fn answer(&mut self, request: &Frame) -> Frame {
        let status = |code: ReturnCode| Frame::status_reply_to(request, StatusReply::new(code));

        if !is_valid_id(request.id) {
            return status(ReturnCode::UnknownMsgId);
        }
        if request.cmd & REPLY_FLAG != 0 || !is_valid_id_cmd(request.id, request.cmd) {
            return status(ReturnCode::UnknownMsgCmd);
        }

        match (request.id, request.cmd) {
            (msg_id::FPGA, msg_cmd::HWCFG) => Frame::reply_to(request, &self.hwcfg),
            (msg_id::FPGA, msg_cmd::HW_REV_READ) => Frame::reply_to(request, &self.revision),
            (msg_id::FPGA, msg_cmd::FPGA_RESET) => {
                self.modules.clear();
                self.spy_buffer.clear();
                status(ReturnCode::Success)
            }
            (msg_id::TEST, msg_cmd::LOOPBACK) => {
                let mut reply = request.clone();
                reply.cmd |= REPLY_FLAG;
                reply
            }
            (msg_id::PROTOCOL | msg_id::KOSMOS, command) => self.answer_version(request, command),
            (msg_id::STATUS, _) => status(ReturnCode::Success),
            (module, msg_cmd::RESET) => {
                self.modules.insert(module, ModuleState::default());
                if module == msg_id::I2C_SPY {
                    self.spy_buffer.clear();
                }
                Frame::reply_to(request, &ModuleStatus::default())
            }
            (module, msg_cmd::STATUS) => {
                let running = self.modules.get(&module).is_some_and(|m| m.running);
                let buffered = if module == msg_id::I2C_SPY { self.spy_buffer.len() } else { 0 };
                Frame::reply_to(request, &ModuleStatus {
                    state: u8::from(running),
                    fifo_count: 0,
                    buffer_count: buffered.min(u16::MAX as usize) as u16,
                    overrun: false,
                })
            }
            (module, msg_cmd::START) => {
                self.modules.entry(module).or_default().running = true;
                status(ReturnCode::Success)
            }
            (module, msg_cmd::STOP) => {
                self.modules.entry(module).or_default().running = false;
                status(ReturnCode::Success)
            }
            (msg_id::I2C_SPY, msg_cmd::READ) => {
                let len = self.spy_buffer.len().min(SPY_CHUNK_CAPACITY);
                let bytes: Vec<u8> = self.spy_buffer.drain(..len).collect();
                Frame::reply_to(request, &SpyChunk::new(&bytes))
            }
            (msg_id::LED_SPY, msg_cmd::READ) => Frame::reply_to(request, &SpyChunk::new(&[])),
            (_, msg_cmd::READ) => {
                let mut reply = Frame::new(request.id, request.cmd | REPLY_FLAG);
                reply.seq_id = request.seq_id;
                reply
            }
            _ => status(ReturnCode::Success),
        }
    }

    fn answer_version(&self, request: &Frame, command: u8) -> Frame {
        let identity = self.identities.get(&request.id).cloned().unwrap_or_default();
        let half = |text: &str, second: bool| {
            let bytes = text.as_bytes();
            let start = if second { PAYLOAD_SIZE.min(bytes.len()) } else { 0 };
            let end = (start + PAYLOAD_SIZE).min(bytes.len());
            GitInfo::from_str_lossy(&String::from_utf8_lossy(&bytes[start..end]))
        };

        match command {
            msg_cmd::VERSION => Frame::reply_to(request, &identity.git_version()),
            msg_cmd::GIT_DESCRIBE_1 => Frame::reply_to(request, &half(&identity.describe, false)),
            msg_cmd::GIT_DESCRIBE_2 => Frame::reply_to(request, &half(&identity.describe, true)),
            msg_cmd::GIT_BRANCH_1 => Frame::reply_to(request, &half(&identity.branch, false)),
            msg_cmd::GIT_BRANCH_2 => Frame::reply_to(request, &half(&identity.branch, true)),
            msg_cmd::GIT_HASH_1 => Frame::reply_to(request, &half(&identity.hash, false)),
            msg_cmd::GIT_HASH_2 => Frame::reply_to(request, &half(&identity.hash, true)),
            _ => Frame::status_reply_to(request, StatusReply::new(ReturnCode::UnknownMsgCmd)),
        }
    }
}

impl ByteLink for SimulatedFpga {
    fn transfer(&mut self, channel: Channel, tx: &[u8]) -> std::io::Result<Vec<u8>> {
        if tx.len() % FRAME_SIZE != 0 {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidData,
                format!("{} bytes is not a whole number of frames", tx.len()),
            ));
        }

        let requests = tx
            .chunks_exact(FRAME_SIZE)
            .map(Frame::decode)
            .collect::<Result<Vec<_>, _>>()
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        let mut state = self.state.lock();
        state.datagrams.push((channel, requests.clone()));

        let mut replies: Vec<Frame> = requests.iter().map(|request| state.answer(request)).collect();
        let fault = state.faults.pop_front();
        trace!("Simulated FPGA answering {} requests, fault={:?}", requests.len(), fault);

        let mut truncate = false;
        match fault {
            Some(Fault::Status { index, code }) => {
                if let Some(request) = requests.get(index) {
                    replies[index] = Frame::status_reply_to(request, StatusReply { return_code: code });
                }
            }
            Some(Fault::RotateSequence) => {
                let seq_ids: Vec<u8> = replies.iter().map(|r| r.seq_id).collect();
                let count = replies.len();
                for (index, reply) in replies.iter_mut().enumerate() {
                    reply.seq_id = if count > 1 { seq_ids[(index + 1) % count] } else { reply.seq_id.wrapping_add(1) };
                }
            }
            Some(Fault::DropReply) => {
                replies.pop();
            }
            Some(Fault::TruncateReply) => truncate = true,
            None => {}
        }

        let mut rx = Vec::with_capacity(replies.len() * FRAME_SIZE);
        for reply in &replies {
            rx.extend_from_slice(&reply.encode());
        }
        if truncate {
            rx.pop();
        }
        Ok(rx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::protocol::payload_variant_for;

    fn exchange(fpga: &mut SimulatedFpga, requests: &[Frame]) -> Vec<Frame> {
        let tx: Vec<u8> = requests.iter().flat_map(|f| f.encode()).collect();
        let rx = fpga.transfer(Channel::Control, &tx).unwrap();
        rx.chunks_exact(FRAME_SIZE).map(|block| Frame::decode(block).unwrap()).collect()
    }

    #[test]
    fn answers_hwcfg_and_revision() {
        let mut fpga = SimulatedFpga::new().with_hwcfg(0x41).with_revision(FpgaRevision { major: 3, minor: 2, patch: 1 });
        let mut hwcfg = Frame::new(msg_id::FPGA, msg_cmd::HWCFG);
        hwcfg.seq_id = 9;
        let rev = Frame::new(msg_id::FPGA, msg_cmd::HW_REV_READ);

        let replies = exchange(&mut fpga, &[hwcfg, rev]);
        assert_eq!(replies[0].seq_id, 9);
        assert_eq!(replies[0].extract::<HwCfg>().unwrap(), HwCfg::new(0x41));
        assert_eq!(replies[1].extract::<FpgaRevision>().unwrap().to_string(), "3.2.1");
        assert_eq!(fpga.transfer_count(), 1);
    }

    #[test]
    fn unknown_requests_get_status_replies() {
        let mut fpga = SimulatedFpga::new();
        let replies = exchange(&mut fpga, &[Frame::new(0x30, 0), Frame::new(msg_id::FPGA, 0x7E)]);
        assert_eq!(replies[0].status_reply().unwrap().code(), Some(ReturnCode::UnknownMsgId));
        assert_eq!(replies[1].status_reply().unwrap().code(), Some(ReturnCode::UnknownMsgCmd));
    }

    #[test]
    fn spy_reads_drain_the_capture_buffer() {
        let mut fpga = SimulatedFpga::new();
        fpga.load_spy_capture(&(0u8..40).collect::<Vec<_>>());

        let read = Frame::new(msg_id::I2C_SPY, msg_cmd::READ);
        let replies = exchange(&mut fpga, &[read.clone(), read.clone(), read]);
        let chunks: Vec<SpyChunk> = replies.iter().map(|r| r.extract::<SpyChunk>().unwrap()).collect();

        assert_eq!(chunks[0].bytes().len(), SPY_CHUNK_CAPACITY);
        assert_eq!(chunks[1].bytes(), &(28u8..40).collect::<Vec<_>>()[..]);
        assert!(chunks[2].is_empty());
    }

    #[test]
    fn faults_are_one_shot() {
        let mut fpga = SimulatedFpga::new();
        fpga.inject(Fault::Status { index: 0, code: ReturnCode::BufferUnderrun as u8 });

        let request = Frame::new(msg_id::PES, msg_cmd::WRITE);
        let first = exchange(&mut fpga, std::slice::from_ref(&request));
        assert_eq!(first[0].status_reply().unwrap().code(), Some(ReturnCode::BufferUnderrun));

        let second = exchange(&mut fpga, &[request]);
        assert!(second[0].status_reply().unwrap().is_success());
    }

    #[test]
    fn loopback_echoes_payload() {
        let mut fpga = SimulatedFpga::new();
        let request = Frame::with_raw_payload(msg_id::TEST, msg_cmd::LOOPBACK, &[1, 2, 3]);
        let reply = &exchange(&mut fpga, std::slice::from_ref(&request))[0];
        assert_eq!(reply.cmd, msg_cmd::LOOPBACK | REPLY_FLAG);
        assert_eq!(reply.payload, request.payload);
        assert_eq!(payload_variant_for(reply.id, reply.cmd), crate::protocol::PayloadKind::Raw);
    }
}
