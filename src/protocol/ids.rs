//! Message identifiers, commands and return codes
//!
//! The `(id, cmd)` validity table is fixed at compile time for a given FPGA
//! firmware. Identifiers in `DYN_BASE..=DYN_END` are allocated at run time by
//! the firmware and accept the generic module command set.

use serde::{Deserialize, Serialize};

/// Bit 7 of `cmd`, set on every reply and never on a request.
pub const REPLY_FLAG: u8 = 0x80;

/// Message identifiers (`frame.id`)
pub mod msg_id {
    pub const STATUS: u8 = 0x00;
    pub const PROTOCOL: u8 = 0x01;
    pub const KOSMOS: u8 = 0x02;
    pub const FPGA: u8 = 0x03;
    pub const TEST: u8 = 0x04;
    pub const SEQUENCER: u8 = 0x05;
    pub const PES: u8 = 0x06;
    pub const KBD_MATRIX: u8 = 0x07;
    pub const BAS: u8 = 0x08;
    pub const ALS: u8 = 0x09;
    pub const LED_SPY: u8 = 0x0A;
    pub const I2C_SPY: u8 = 0x0B;
    pub const PWR_BAT: u8 = 0x0C;
    pub const PWR_USB: u8 = 0x0D;
    pub const OPT_EMU: u8 = 0x0E;

    /// First dynamically allocated identifier
    pub const DYN_BASE: u8 = 0x40;
    /// Last dynamically allocated identifier
    pub const DYN_END: u8 = 0x7F;
}

/// Message commands (`frame.cmd`, reply flag cleared)
pub mod msg_cmd {
    /// `STATUS` module: generic status reply
    pub const STATUS_REPLY: u8 = 0x00;

    /// `PROTOCOL` and `KOSMOS` modules share this command set
    pub const VERSION: u8 = 0x00;
    pub const GIT_DESCRIBE_1: u8 = 0x01;
    pub const GIT_DESCRIBE_2: u8 = 0x02;
    pub const GIT_BRANCH_1: u8 = 0x03;
    pub const GIT_BRANCH_2: u8 = 0x04;
    pub const GIT_HASH_1: u8 = 0x05;
    pub const GIT_HASH_2: u8 = 0x06;

    /// `FPGA` module
    pub const FPGA_RESET: u8 = 0x00;
    pub const HWCFG: u8 = 0x01;
    pub const HW_REV_READ: u8 = 0x02;

    /// `TEST` module
    pub const LOOPBACK: u8 = 0x00;

    /// Generic module command set
    pub const RESET: u8 = 0x00;
    pub const STATUS: u8 = 0x01;
    pub const START: u8 = 0x02;
    pub const STOP: u8 = 0x03;
    pub const READ: u8 = 0x04;
    pub const WRITE: u8 = 0x05;
}

use msg_cmd as cmd;
use msg_id as id;

const VERSION_CMDS: &[(u8, &str)] = &[
    (cmd::VERSION, "VERSION"),
    (cmd::GIT_DESCRIBE_1, "GIT_DESCRIBE_1"),
    (cmd::GIT_DESCRIBE_2, "GIT_DESCRIBE_2"),
    (cmd::GIT_BRANCH_1, "GIT_BRANCH_1"),
    (cmd::GIT_BRANCH_2, "GIT_BRANCH_2"),
    (cmd::GIT_HASH_1, "GIT_HASH_1"),
    (cmd::GIT_HASH_2, "GIT_HASH_2"),
];

const FPGA_CMDS: &[(u8, &str)] =
    &[(cmd::FPGA_RESET, "RESET"), (cmd::HWCFG, "HWCFG"), (cmd::HW_REV_READ, "HW_REV_READ")];

const STATUS_CMDS: &[(u8, &str)] = &[(cmd::STATUS_REPLY, "REPLY")];

const TEST_CMDS: &[(u8, &str)] = &[(cmd::LOOPBACK, "LOOPBACK")];

const CONTROL_CMDS: &[(u8, &str)] = &[(cmd::RESET, "RESET"), (cmd::STATUS, "STATUS")];

const PRODUCER_CMDS: &[(u8, &str)] = &[
    (cmd::RESET, "RESET"),
    (cmd::STATUS, "STATUS"),
    (cmd::START, "START"),
    (cmd::STOP, "STOP"),
    (cmd::READ, "READ"),
];

const CONSUMER_CMDS: &[(u8, &str)] = &[
    (cmd::RESET, "RESET"),
    (cmd::STATUS, "STATUS"),
    (cmd::START, "START"),
    (cmd::STOP, "STOP"),
    (cmd::WRITE, "WRITE"),
];

const GENERIC_CMDS: &[(u8, &str)] = &[
    (cmd::RESET, "RESET"),
    (cmd::STATUS, "STATUS"),
    (cmd::START, "START"),
    (cmd::STOP, "STOP"),
    (cmd::READ, "READ"),
    (cmd::WRITE, "WRITE"),
];

/// Static table: `(id, name, accepted commands)`
const ID_TABLE: &[(u8, &str, &[(u8, &str)])] = &[
    (id::STATUS, "STATUS", STATUS_CMDS),
    (id::PROTOCOL, "PROTOCOL", VERSION_CMDS),
    (id::KOSMOS, "KOSMOS", VERSION_CMDS),
    (id::FPGA, "FPGA", FPGA_CMDS),
    (id::TEST, "TEST", TEST_CMDS),
    (id::SEQUENCER, "SEQUENCER", CONTROL_CMDS),
    (id::PES, "PES", CONSUMER_CMDS),
    (id::KBD_MATRIX, "KBD_MATRIX", CONSUMER_CMDS),
    (id::BAS, "BAS", CONSUMER_CMDS),
    (id::ALS, "ALS", CONSUMER_CMDS),
    (id::LED_SPY, "LED_SPY", PRODUCER_CMDS),
    (id::I2C_SPY, "I2C_SPY", PRODUCER_CMDS),
    (id::PWR_BAT, "PWR_BAT", CONSUMER_CMDS),
    (id::PWR_USB, "PWR_USB", CONSUMER_CMDS),
    (id::OPT_EMU, "OPT_EMU", CONSUMER_CMDS),
];

fn is_dynamic(msg_id: u8) -> bool {
    (id::DYN_BASE..=id::DYN_END).contains(&msg_id)
}

fn commands_for(msg_id: u8) -> Option<&'static [(u8, &'static str)]> {
    if is_dynamic(msg_id) {
        return Some(GENERIC_CMDS);
    }
    ID_TABLE.iter().find(|(value, _, _)| *value == msg_id).map(|(_, _, cmds)| *cmds)
}

/// Whether `msg_id` is a defined message identifier.
pub fn is_valid_id(msg_id: u8) -> bool {
    commands_for(msg_id).is_some()
}

/// Whether the `(id, cmd)` pair is defined. The reply flag is ignored.
pub fn is_valid_id_cmd(msg_id: u8, msg_cmd: u8) -> bool {
    commands_for(msg_id)
        .map(|cmds| cmds.iter().any(|(value, _)| *value == msg_cmd & !REPLY_FLAG))
        .unwrap_or(false)
}

/// Name of a message identifier, if known.
pub fn id_name(msg_id: u8) -> Option<&'static str> {
    if is_dynamic(msg_id) {
        return Some("DYNAMIC");
    }
    ID_TABLE.iter().find(|(value, _, _)| *value == msg_id).map(|(_, name, _)| *name)
}

/// Name of a command for the given identifier, if known. The reply flag is ignored.
pub fn cmd_name(msg_id: u8, msg_cmd: u8) -> Option<&'static str> {
    commands_for(msg_id)?
        .iter()
        .find(|(value, _)| *value == msg_cmd & !REPLY_FLAG)
        .map(|(_, name)| *name)
}

/// Return codes carried by a status reply
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[repr(u8)]
pub enum ReturnCode {
    Success = 0x00,
    UnknownMsgId = 0x01,
    UnknownMsgCmd = 0x02,
    NotImplemented = 0x03,
    BufferOverrun = 0x04,
    BufferUnderrun = 0x05,
    InvalidPayload = 0x06,
}

impl ReturnCode {
    pub fn from_u8(value: u8) -> Option<Self> {
        match value {
            0x00 => Some(ReturnCode::Success),
            0x01 => Some(ReturnCode::UnknownMsgId),
            0x02 => Some(ReturnCode::UnknownMsgCmd),
            0x03 => Some(ReturnCode::NotImplemented),
            0x04 => Some(ReturnCode::BufferOverrun),
            0x05 => Some(ReturnCode::BufferUnderrun),
            0x06 => Some(ReturnCode::InvalidPayload),
            _ => None,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            ReturnCode::Success => "SUCCESS",
            ReturnCode::UnknownMsgId => "UNKNOWN_MSG_ID",
            ReturnCode::UnknownMsgCmd => "UNKNOWN_MSG_CMD",
            ReturnCode::NotImplemented => "NOT_IMPLEMENTED",
            ReturnCode::BufferOverrun => "BUFFER_OVERRUN",
            ReturnCode::BufferUnderrun => "BUFFER_UNDERRUN",
            ReturnCode::InvalidPayload => "INVALID_PAYLOAD",
        }
    }
}

/// Name of a raw return code, if it is a well-known one.
pub fn return_code_name(value: u8) -> Option<&'static str> {
    ReturnCode::from_u8(value).map(ReturnCode::name)
}
