//! Kosmos message protocol: identifiers, frame codec and payload variants.
//!
//! The codec is stateless and performs no I/O. A [`Frame`] is encoded to a
//! fixed [`FRAME_SIZE`] block; the payload interpretation is chosen from the
//! frame's `(id, cmd)` by [`payload_variant_for`].
//!
//! ```rust
//! use kosmos::protocol::{Frame, HwCfg, msg_cmd, msg_id};
//!
//! let request = Frame::new(msg_id::FPGA, msg_cmd::HWCFG);
//! let reply = Frame::reply_to(&request, &HwCfg::new(0b101));
//!
//! let decoded = Frame::decode(&reply.encode()).unwrap();
//! assert_eq!(decoded.extract::<HwCfg>().unwrap().modules, 0b101);
//! ```

mod dump;
mod frame;
mod ids;
mod payload;

pub use dump::{tx_frames_str, txrx_frames_error_str};
pub use frame::{FRAME_SIZE, Frame, hex};
pub use ids::{
    REPLY_FLAG, ReturnCode, cmd_name, id_name, is_valid_id, is_valid_id_cmd, msg_cmd, msg_id,
    return_code_name,
};
pub use payload::{
    FpgaRevision, GitInfo, GitVersion, HwCfg, ModuleStatus, PAYLOAD_SIZE, Payload, PayloadBytes,
    PayloadKind, PayloadVariant, SPY_CHUNK_CAPACITY, SpyChunk, StatusReply, payload_variant_for,
    trim_nul,
};
