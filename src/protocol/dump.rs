//! Human-readable TX/RX frame dumps attached to every exchange error

use super::frame::{Frame, hex};
use super::ids;
use std::fmt::Write;

fn describe(frame: &Frame) -> String {
    let id_name = ids::id_name(frame.id).unwrap_or("?");
    let cmd_name = ids::cmd_name(frame.id, frame.cmd).unwrap_or("?");
    let reply = if frame.is_reply() { "|REPLY_FLAG" } else { "" };

    let mut line = format!(
        "id={:#04x} ({}) cmd={:#04x} ({}{}) seq={:#04x}",
        frame.id,
        id_name,
        frame.cmd,
        cmd_name,
        reply,
        frame.seq_id
    );

    if let Some(status) = frame.status_reply() {
        let code_name = ids::return_code_name(status.return_code).unwrap_or("UNKNOWN");
        let _ = write!(line, " return_code={:#04x} ({})", status.return_code, code_name);
    }

    let _ = write!(line, " payload=[{}]", hex(&frame.payload));
    line
}

/// Render one TX line and one RX line per pair, marking the failing index.
///
/// ```text
/// >> [1] TX: id=0x05 (SEQUENCER) cmd=0x01 (STATUS) seq=0x0b payload=[...]
/// >> [1] RX: id=0x00 (STATUS) cmd=0x80 (REPLY|REPLY_FLAG) seq=0x0b return_code=0x04 (BUFFER_OVERRUN) payload=[...]
/// ```
pub fn txrx_frames_error_str(pairs: &[(Frame, Frame)], failing_index: Option<usize>) -> String {
    let mut out = String::new();
    for (index, (tx, rx)) in pairs.iter().enumerate() {
        let marker = if Some(index) == failing_index { ">>" } else { "  " };
        let _ = writeln!(out, "{} [{}] TX: {}", marker, index, describe(tx));
        let _ = writeln!(out, "{} [{}] RX: {}", marker, index, describe(rx));
    }
    out
}

/// Same as [`txrx_frames_error_str`] for request lists that have no replies yet.
pub fn tx_frames_str(frames: &[Frame]) -> String {
    let mut out = String::new();
    for (index, tx) in frames.iter().enumerate() {
        let _ = writeln!(out, "   [{}] TX: {}", index, describe(tx));
    }
    out
}
