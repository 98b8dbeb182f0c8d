//! Handles on gateware modules
//!
//! A [`Module`] addresses one present module through the shared
//! [`Sequencer`], so its calls are recorded in offline mode like any other
//! request.

mod i2c_spy;

pub use i2c_spy::I2cSpyModule;

use std::sync::Arc;
use tracing::debug;

use crate::device_tree::{DeviceName, DeviceTree};
use crate::protocol::{Frame, ModuleStatus, PAYLOAD_SIZE, msg_cmd};
use crate::sequencer::Sequencer;
use crate::Result;

/// Generic command set shared by every module
#[derive(Clone)]
pub struct Module {
    sequencer: Arc<Sequencer>,
    device: DeviceName,
}

impl Module {
    /// Handle on `device`, failing when the rig does not have it.
    pub fn new(sequencer: Arc<Sequencer>, tree: &DeviceTree, device: DeviceName) -> Result<Self> {
        tree.require(device)?;
        Ok(Self { sequencer, device })
    }

    pub fn device(&self) -> DeviceName {
        self.device
    }

    pub fn sequencer(&self) -> &Arc<Sequencer> {
        &self.sequencer
    }

    pub fn reset(&self) -> Result<ModuleStatus> {
        self.status_command(msg_cmd::RESET)
    }

    pub fn status(&self) -> Result<ModuleStatus> {
        self.status_command(msg_cmd::STATUS)
    }

    pub fn start(&self) -> Result<()> {
        self.command(msg_cmd::START)
    }

    pub fn stop(&self) -> Result<()> {
        self.command(msg_cmd::STOP)
    }

    /// Stream `data` to a consumer module, one frame per payload block.
    pub fn write(&self, data: &[u8]) -> Result<()> {
        let id = self.device.msg_id();
        let frames: Vec<Frame> =
            data.chunks(PAYLOAD_SIZE).map(|chunk| Frame::with_raw_payload(id, msg_cmd::WRITE, chunk)).collect();
        debug!("{}: writing {} bytes in {} frames", self.device, data.len(), frames.len());
        self.sequencer.send_data(frames)?;
        Ok(())
    }

    fn command(&self, cmd: u8) -> Result<()> {
        self.sequencer.send_control(vec![Frame::new(self.device.msg_id(), cmd)])?;
        Ok(())
    }

    /// A bare SUCCESS status reply carries no counters; it reads as the default status.
    fn status_command(&self, cmd: u8) -> Result<ModuleStatus> {
        let pairs = self.sequencer.send_control(vec![Frame::new(self.device.msg_id(), cmd)])?;
        match pairs.first() {
            Some((_, rx)) if rx.is_status_reply() => Ok(ModuleStatus::default()),
            Some((_, rx)) => rx.extract::<ModuleStatus>(),
            None => Ok(ModuleStatus::default()),
        }
    }
}

impl std::fmt::Debug for Module {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Module").field("device", &self.device).finish()
    }
}
