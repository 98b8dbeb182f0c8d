//! Host-side transport and message protocol for the Kosmos FPGA test fixture.
//!
//! Kosmos is an FPGA-based rig that stimulates and observes USB/BLE devices
//! under test. This crate drives it over its USB link: it frames typed
//! request/reply messages, validates every exchange, records command batches
//! for atomic playback, and parses the I2C spy capture streams.
//!
//! # Layers
//!
//! - **Protocol** ([`protocol`]): fixed-size frames, `(id, cmd)` tables, payload variants
//! - **Link** ([`LinkAdapter`]): frame codec over a byte-oriented bulk link
//! - **Transport** ([`Transport`]): sequence stamping and reply validation
//! - **Sequencer** ([`Sequencer`]): online/offline gate with atomic playback
//! - **Modules** ([`modules`]): handles on gateware modules, I2C spy capture
//! - **I2C parsers** ([`i2c`]): FRAME and RAW capture formats
//!
//! # Quick Start
//!
//! ```rust
//! use kosmos::emulator::SimulatedFpga;
//! use kosmos::{DeviceName, Kosmos, KosmosConfig};
//!
//! # fn main() -> kosmos::Result<()> {
//! let kosmos = Kosmos::open_simulated(SimulatedFpga::new(), KosmosConfig::default())?;
//! println!("FPGA revision {}", kosmos.fpga_revision());
//!
//! let pes = kosmos.module(DeviceName::Pes)?;
//! pes.reset()?;
//! pes.start()?;
//! # Ok(())
//! # }
//! ```

// Core types and error handling
mod error;
pub mod protocol;
#[cfg(any(test, feature = "benchmark"))]
pub mod test_utils;

// Request/reply stack
pub mod link;
pub mod sequencer;
pub mod transport;
pub mod version;

// Rig description and modules
pub mod config;
pub mod device_tree;
pub mod modules;

// I2C spy captures
pub mod capture;
pub mod i2c;

// Hardware-free operation
pub mod emulator;

// Core exports
pub use error::*;

// Main API exports
pub use config::KosmosConfig;
pub use device_tree::{DeviceName, DeviceTree};
pub use link::{ByteLink, Channel, Link, LinkAdapter};
pub use modules::{I2cSpyModule, Module};
pub use sequencer::Sequencer;
pub use transport::{FramePair, Transport, check_message_replies};
pub use version::{GitDescribe, SemVer, VersionInfo, VersionTarget, read_version_info};

use std::sync::Arc;
use tracing::info;

use crate::emulator::SimulatedFpga;
use crate::protocol::{FpgaRevision, HwCfg};

/// An open session with a Kosmos rig.
///
/// Opening a session builds the link adapter, transport and sequencer, reads
/// the hardware configuration and FPGA revision, and builds the device tree.
///
/// # Examples
///
/// ## Real hardware
/// ```rust,no_run
/// use kosmos::{ByteLink, Channel, Kosmos, KosmosConfig};
///
/// struct UsbBulk;
///
/// impl ByteLink for UsbBulk {
///     fn transfer(&mut self, _channel: Channel, tx: &[u8]) -> std::io::Result<Vec<u8>> {
///         // Write `tx` to the OUT endpoint, read the reply block from the IN endpoint
///         Ok(tx.to_vec())
///     }
/// }
///
/// # fn main() -> kosmos::Result<()> {
/// let config = KosmosConfig::load("kosmos.yaml")?;
/// let kosmos = Kosmos::open_byte_link(UsbBulk, config)?;
/// # Ok(())
/// # }
/// ```
pub struct Kosmos {
    sequencer: Arc<Sequencer>,
    config: KosmosConfig,
    device_tree: DeviceTree,
    fpga_revision: FpgaRevision,
}

impl Kosmos {
    /// Open a session over a frame-level link.
    ///
    /// # Errors
    ///
    /// Returns an error if:
    /// - The configuration is invalid
    /// - The HWCFG or revision exchange fails
    pub fn open<L: Link + 'static>(link: L, config: KosmosConfig) -> Result<Self> {
        config.validate()?;

        let transport = Transport::new(link).with_max_batch_frames(config.max_batch_frames);
        let sequencer = Arc::new(Sequencer::new(transport));

        let hwcfg = sequencer.hwcfg()?;
        let fpga_revision = sequencer.fpga_revision()?;
        let device_tree = DeviceTree::from_hwcfg(hwcfg, &config);

        info!("Kosmos session opened: FPGA revision {}, {} modules", fpga_revision, device_tree.modules().len());

        Ok(Self { sequencer, config, device_tree, fpga_revision })
    }

    /// Open a session over a raw byte link.
    pub fn open_byte_link<B: ByteLink + 'static>(byte_link: B, config: KosmosConfig) -> Result<Self> {
        Self::open(LinkAdapter::new(byte_link), config)
    }

    /// Open a session against the FPGA simulator.
    pub fn open_simulated(fpga: SimulatedFpga, config: KosmosConfig) -> Result<Self> {
        Self::open_byte_link(fpga, config)
    }

    pub fn sequencer(&self) -> &Arc<Sequencer> {
        &self.sequencer
    }

    pub fn config(&self) -> &KosmosConfig {
        &self.config
    }

    pub fn device_tree(&self) -> &DeviceTree {
        &self.device_tree
    }

    pub fn hwcfg(&self) -> HwCfg {
        self.device_tree.hwcfg()
    }

    pub fn fpga_revision(&self) -> FpgaRevision {
        self.fpga_revision
    }

    /// Handle on a present module.
    pub fn module(&self, device: DeviceName) -> Result<Module> {
        Module::new(Arc::clone(&self.sequencer), &self.device_tree, device)
    }

    /// Handle on the I2C spy, bound to the configured capture format.
    pub fn i2c_spy(&self) -> Result<I2cSpyModule> {
        I2cSpyModule::new(Arc::clone(&self.sequencer), &self.device_tree, &self.config)
    }

    /// Git identity of the gateware or the protocol definition.
    pub fn version_info(&self, target: VersionTarget) -> Result<VersionInfo> {
        read_version_info(&self.sequencer, target)
    }
}
