//! Module registry built from the FPGA hardware configuration
//!
//! Each bit of the HWCFG bitmap advertises one gateware module. Higher layers
//! ask the tree whether a module is present and skip hardware-dependent
//! tests when [`DeviceTree::require`] fails.

use serde::{Deserialize, Serialize};
use tracing::info;

use crate::config::KosmosConfig;
use crate::protocol::{HwCfg, msg_id};
use crate::{KosmosError, Result};

/// Gateware modules that can be present on a rig
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeviceName {
    Sequencer,
    Pes,
    KbdMatrix,
    Bas,
    Als,
    LedSpy,
    I2cSpy,
    PwrBat,
    PwrUsb,
    OptEmu,
}

impl DeviceName {
    pub const ALL: [DeviceName; 10] = [
        DeviceName::Sequencer,
        DeviceName::Pes,
        DeviceName::KbdMatrix,
        DeviceName::Bas,
        DeviceName::Als,
        DeviceName::LedSpy,
        DeviceName::I2cSpy,
        DeviceName::PwrBat,
        DeviceName::PwrUsb,
        DeviceName::OptEmu,
    ];

    /// Bit advertising the module in the HWCFG bitmap.
    pub fn hwcfg_bit(self) -> u32 {
        self as u32
    }

    /// Message identifier addressing the module.
    pub fn msg_id(self) -> u8 {
        match self {
            DeviceName::Sequencer => msg_id::SEQUENCER,
            DeviceName::Pes => msg_id::PES,
            DeviceName::KbdMatrix => msg_id::KBD_MATRIX,
            DeviceName::Bas => msg_id::BAS,
            DeviceName::Als => msg_id::ALS,
            DeviceName::LedSpy => msg_id::LED_SPY,
            DeviceName::I2cSpy => msg_id::I2C_SPY,
            DeviceName::PwrBat => msg_id::PWR_BAT,
            DeviceName::PwrUsb => msg_id::PWR_USB,
            DeviceName::OptEmu => msg_id::OPT_EMU,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            DeviceName::Sequencer => "SEQUENCER",
            DeviceName::Pes => "PES",
            DeviceName::KbdMatrix => "KBD_MATRIX",
            DeviceName::Bas => "BAS",
            DeviceName::Als => "ALS",
            DeviceName::LedSpy => "LED_SPY",
            DeviceName::I2cSpy => "I2C_SPY",
            DeviceName::PwrBat => "PWR_BAT",
            DeviceName::PwrUsb => "PWR_USB",
            DeviceName::OptEmu => "OPT_EMU",
        }
    }
}

impl std::fmt::Display for DeviceName {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.name())
    }
}

/// Modules present on this rig
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceTree {
    hwcfg: HwCfg,
    modules: Vec<DeviceName>,
}

impl DeviceTree {
    /// Modules advertised by `hwcfg`, minus the configured disabled modules.
    pub fn from_hwcfg(hwcfg: HwCfg, config: &KosmosConfig) -> Self {
        let modules: Vec<DeviceName> = DeviceName::ALL
            .into_iter()
            .filter(|device| hwcfg.is_set(device.hwcfg_bit()))
            .filter(|device| !config.disabled_modules.contains(device))
            .collect();

        let names: Vec<&str> = modules.iter().map(|device| device.name()).collect();
        info!("Device tree from HWCFG {:#010x}: [{}]", hwcfg.modules, names.join(", "));

        Self { hwcfg, modules }
    }

    pub fn hwcfg(&self) -> HwCfg {
        self.hwcfg
    }

    pub fn modules(&self) -> &[DeviceName] {
        &self.modules
    }

    pub fn is_present(&self, device: DeviceName) -> bool {
        self.modules.contains(&device)
    }

    /// Fail with [`KosmosError::ModuleNotPresent`] when `device` is absent.
    pub fn require(&self, device: DeviceName) -> Result<()> {
        if self.is_present(device) {
            Ok(())
        } else {
            Err(KosmosError::ModuleNotPresent { module: device.name().to_string() })
        }
    }
}
