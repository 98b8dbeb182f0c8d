//! Error types for the Kosmos transport.
//!
//! Every failure of the protocol layer is a [`KosmosError`]. None of them is
//! recovered inside the crate: they propagate to the test runner, which owns
//! the decision to retry.
//!
//! ## Error Categories
//!
//! - **Codec / link errors**: bad frame size, reply count mismatch, I/O failures
//! - **Exchange errors**: out-of-sequence replies, ID/CMD mismatches and
//!   non-success status replies. These carry an [`ExchangeFailure`] with the
//!   full TX/RX dump of the batch.
//! - **Payload errors**: a payload variant requested from the wrong frame
//! - **I2C stream errors**: fatal spy parser conditions
//! - **Usage errors**: invalid requests, sequencer misuse, absent modules, configuration
//!
//! ## Recovery
//!
//! ```rust
//! use kosmos::KosmosError;
//!
//! let error = KosmosError::link_failed("USB endpoint stalled");
//! if error.is_retryable() {
//!     for suggestion in error.recovery_suggestions() {
//!         println!("  - {}", suggestion);
//!     }
//! }
//! ```

use crate::protocol::{Frame, PayloadKind};
use thiserror::Error;

/// Result type alias for Kosmos operations.
pub type Result<T, E = KosmosError> = std::result::Result<T, E>;

/// A failed request/reply exchange, with the batch it belongs to.
#[derive(Debug, Clone)]
pub struct ExchangeFailure {
    /// Position of the offending pair in the batch
    pub index: usize,
    /// `ID/CMD` names of the offending request
    pub context: String,
    /// What went wrong
    pub reason: String,
    /// Every `(tx, rx)` pair of the batch
    pub pairs: Vec<(Frame, Frame)>,
    /// Rendered TX/RX dump of the batch
    pub dump: String,
}

impl std::fmt::Display for ExchangeFailure {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} for request #{} {}\n{}", self.reason, self.index, self.context, self.dump)
    }
}

/// Main error type for Kosmos operations.
#[derive(Error, Debug)]
#[non_exhaustive]
pub enum KosmosError {
    #[error("Frame codec error in {context}: {details}")]
    Codec { context: String, details: String },

    #[error("Link returned {received} replies for {sent} requests")]
    LinkCount { sent: usize, received: usize },

    #[error("Out of sequence reply: {0}")]
    OutOfSequence(Box<ExchangeFailure>),

    #[error("Reply does not match request: {0}")]
    SendPayload(Box<ExchangeFailure>),

    #[error("Status reply error: {0}")]
    MessageReply(Box<ExchangeFailure>),

    #[error("Buffer overrun: {0}")]
    OverrunPayload(Box<ExchangeFailure>),

    #[error("Buffer underrun: {0}")]
    UnderrunPayload(Box<ExchangeFailure>),

    #[error(
        "Cannot extract {requested:?} payload from frame id={id:#04x} cmd={cmd:#04x} carrying {actual:?}"
    )]
    ExtractPayload { id: u8, cmd: u8, requested: PayloadKind, actual: PayloadKind },

    #[error("I2C spy stream error in {context}: {details}")]
    I2cStream { context: String, details: String },

    #[error("Link failure: {reason}")]
    Link {
        reason: String,
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    #[error("Invalid request: {reason}")]
    InvalidRequest { reason: String },

    #[error("Invalid sequencer state: {reason}")]
    InvalidState { reason: String },

    #[error("Malformed version string '{value}': {reason}")]
    VersionFormat { value: String, reason: String },

    #[error("Module {module} is not present on this rig")]
    ModuleNotPresent { module: String },

    #[error("Configuration error: {reason}")]
    Config {
        reason: String,
        #[source]
        source: Option<serde_yaml_ng::Error>,
    },
}

impl KosmosError {
    /// Returns whether the caller may reasonably retry the operation.
    ///
    /// Buffer conditions may clear with a smaller batch; link I/O failures,
    /// timeouts included, may be transient. Everything else is a protocol bug or a rig desync.
    pub fn is_retryable(&self) -> bool {
        match self {
            KosmosError::OverrunPayload(_) => true,
            KosmosError::UnderrunPayload(_) => true,
            KosmosError::Link { .. } => true,
            KosmosError::Codec { .. } => false,
            KosmosError::LinkCount { .. } => false,
            KosmosError::OutOfSequence(_) => false,
            KosmosError::SendPayload(_) => false,
            KosmosError::MessageReply(_) => false,
            KosmosError::ExtractPayload { .. } => false,
            KosmosError::I2cStream { .. } => false,
            KosmosError::InvalidRequest { .. } => false,
            KosmosError::InvalidState { .. } => false,
            KosmosError::VersionFormat { .. } => false,
            KosmosError::ModuleNotPresent { .. } => false,
            KosmosError::Config { .. } => false,
        }
    }

    /// Returns suggested recovery actions for the test operator.
    pub fn recovery_suggestions(&self) -> Vec<&'static str> {
        match self {
            KosmosError::Codec { .. } | KosmosError::LinkCount { .. } => vec![
                "Check the USB cable and the FPGA power supply",
                "Verify host and FPGA firmware share the same frame layout",
                "Reset the FPGA and reopen the session",
            ],
            KosmosError::OutOfSequence(_) | KosmosError::SendPayload(_) => vec![
                "Reset the FPGA: the link is desynchronized",
                "Reopen the session to restart sequence numbering",
            ],
            KosmosError::MessageReply(_) => vec![
                "Check the command is implemented by this FPGA firmware",
                "Compare host and FPGA protocol versions",
            ],
            KosmosError::OverrunPayload(_) | KosmosError::UnderrunPayload(_) => vec![
                "Retry with a smaller batch",
                "Read or flush the module buffer before writing more data",
            ],
            KosmosError::ExtractPayload { .. } => vec![
                "Request the payload variant matching the reply ID/CMD",
            ],
            KosmosError::I2cStream { .. } => vec![
                "Discard the parser and start a fresh capture",
                "Inspect the partial runs collected before the failure",
            ],
            KosmosError::Link { .. } => vec![
                "Check the USB connection to the FPGA",
                "Verify the FPGA is powered and configured",
                "Retry the operation",
            ],
            KosmosError::InvalidRequest { .. } | KosmosError::InvalidState { .. } => vec![
                "Fix the calling code: the request was rejected before reaching the link",
            ],
            KosmosError::VersionFormat { .. } => vec![
                "Rebuild the FPGA image from a tagged commit",
                "Check the FPGA Git identity strings",
            ],
            KosmosError::ModuleNotPresent { .. } => vec![
                "Skip tests requiring this module on this rig",
                "Check the rig configuration and disabled module list",
            ],
            KosmosError::Config { .. } => vec![
                "Check the YAML configuration syntax",
                "Check configuration values are within range",
            ],
        }
    }

    /// Pairs attached to an exchange error, for forensics.
    pub fn pairs(&self) -> Option<&[(Frame, Frame)]> {
        self.exchange().map(|failure| failure.pairs.as_slice())
    }

    /// The exchange failure record, for exchange errors only.
    pub fn exchange(&self) -> Option<&ExchangeFailure> {
        match self {
            KosmosError::OutOfSequence(failure)
            | KosmosError::SendPayload(failure)
            | KosmosError::MessageReply(failure)
            | KosmosError::OverrunPayload(failure)
            | KosmosError::UnderrunPayload(failure) => Some(failure),
            _ => None,
        }
    }

    /// Helper constructor for link failures.
    pub fn link_failed(reason: impl Into<String>) -> Self {
        KosmosError::Link { reason: reason.into(), source: None }
    }

    /// Helper constructor for link failures with source.
    pub fn link_failed_with_source(
        reason: impl Into<String>,
        source: Box<dyn std::error::Error + Send + Sync>,
    ) -> Self {
        KosmosError::Link { reason: reason.into(), source: Some(source) }
    }

    /// Helper constructor for I2C spy stream errors.
    pub fn i2c_stream(context: impl Into<String>, details: impl Into<String>) -> Self {
        KosmosError::I2cStream { context: context.into(), details: details.into() }
    }

    /// Helper constructor for rejected requests.
    pub fn invalid_request(reason: impl Into<String>) -> Self {
        KosmosError::InvalidRequest { reason: reason.into() }
    }

    /// Helper constructor for sequencer misuse.
    pub fn invalid_state(reason: impl Into<String>) -> Self {
        KosmosError::InvalidState { reason: reason.into() }
    }

    /// Helper constructor for malformed Git identities.
    pub fn version_format(value: impl Into<String>, reason: impl Into<String>) -> Self {
        KosmosError::VersionFormat { value: value.into(), reason: reason.into() }
    }

    /// Helper constructor for configuration errors.
    pub fn config(reason: impl Into<String>) -> Self {
        KosmosError::Config { reason: reason.into(), source: None }
    }
}

impl From<std::io::Error> for KosmosError {
    fn from(err: std::io::Error) -> Self {
        KosmosError::Link { reason: err.to_string(), source: Some(Box::new(err)) }
    }
}

impl From<serde_yaml_ng::Error> for KosmosError {
    fn from(err: serde_yaml_ng::Error) -> Self {
        KosmosError::Config { reason: err.to_string(), source: Some(err) }
    }
}
