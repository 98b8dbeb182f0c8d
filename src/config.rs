//! Session configuration
//!
//! Configuration is plain YAML; every field has a default, so an empty
//! document is a valid configuration.
//!
//! ```rust
//! use kosmos::KosmosConfig;
//! use kosmos::i2c::I2cSpyMode;
//!
//! let config = KosmosConfig::from_yaml_str(
//!     "fpga_clock_hz: 48000000\ni2c_spy_mode: raw\ndisabled_modules: [OPT_EMU]\n",
//! )
//! .unwrap();
//! assert_eq!(config.i2c_spy_mode, I2cSpyMode::Raw);
//! assert_eq!(config.max_batch_frames, 256);
//! ```

use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use tracing::debug;

use crate::device_tree::DeviceName;
use crate::i2c::I2cSpyMode;
use crate::transport::MAX_BATCH_FRAMES;
use crate::{KosmosError, Result};

/// Default FPGA clock, 100 MHz
pub const DEFAULT_FPGA_CLOCK_HZ: u32 = 100_000_000;

/// Host-side settings for a Kosmos session
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(default, deny_unknown_fields)]
pub struct KosmosConfig {
    /// FPGA clock used to convert capture timestamps
    pub fpga_clock_hz: u32,
    /// Capture format produced by the I2C spy gateware
    pub i2c_spy_mode: I2cSpyMode,
    /// Largest datagram, in frames
    pub max_batch_frames: usize,
    /// Capture driver poll period
    pub capture_poll_interval_ms: u64,
    /// Spy READ requests per poll
    pub capture_chunk_reads: usize,
    /// Modules treated as absent even when HWCFG advertises them
    pub disabled_modules: Vec<DeviceName>,
}

impl Default for KosmosConfig {
    fn default() -> Self {
        Self {
            fpga_clock_hz: DEFAULT_FPGA_CLOCK_HZ,
            i2c_spy_mode: I2cSpyMode::Frame,
            max_batch_frames: MAX_BATCH_FRAMES,
            capture_poll_interval_ms: 10,
            capture_chunk_reads: 16,
            disabled_modules: Vec::new(),
        }
    }
}

impl KosmosConfig {
    /// Parse and validate a YAML document.
    pub fn from_yaml_str(yaml: &str) -> Result<Self> {
        let config: Self = if yaml.trim().is_empty() { Self::default() } else { serde_yaml_ng::from_str(yaml)? };
        config.validate()?;
        debug!("Loaded configuration: {:?}", config);
        Ok(config)
    }

    /// Load a YAML file.
    pub fn load<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let yaml = std::fs::read_to_string(path).map_err(|e| KosmosError::Config {
            reason: format!("cannot read {}: {}", path.display(), e),
            source: None,
        })?;
        Self::from_yaml_str(&yaml)
    }

    pub fn to_yaml_string(&self) -> Result<String> {
        Ok(serde_yaml_ng::to_string(self)?)
    }

    pub fn validate(&self) -> Result<()> {
        if self.fpga_clock_hz == 0 {
            return Err(KosmosError::config("fpga_clock_hz must be greater than zero"));
        }
        if !(1..=MAX_BATCH_FRAMES).contains(&self.max_batch_frames) {
            return Err(KosmosError::config(format!(
                "max_batch_frames must be in 1..={}, got {}",
                MAX_BATCH_FRAMES, self.max_batch_frames
            )));
        }
        if self.capture_poll_interval_ms == 0 {
            return Err(KosmosError::config("capture_poll_interval_ms must be greater than zero"));
        }
        if self.capture_chunk_reads == 0 {
            return Err(KosmosError::config("capture_chunk_reads must be greater than zero"));
        }
        Ok(())
    }

    pub fn capture_poll_interval(&self) -> Duration {
        Duration::from_millis(self.capture_poll_interval_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_document_is_default() {
        assert_eq!(KosmosConfig::from_yaml_str("").unwrap(), KosmosConfig::default());
        assert_eq!(KosmosConfig::from_yaml_str("{}").unwrap(), KosmosConfig::default());
    }

    #[test]
    fn out_of_range_values_are_rejected() {
        for yaml in ["max_batch_frames: 0", "max_batch_frames: 257", "fpga_clock_hz: 0", "capture_chunk_reads: 0"] {
            let result = KosmosConfig::from_yaml_str(yaml);
            assert!(matches!(result, Err(KosmosError::Config { .. })), "accepted {}", yaml);
        }
    }

    #[test]
    fn yaml_errors_keep_their_source() {
        let error = KosmosConfig::from_yaml_str("unknown_field: 3").unwrap_err();
        match error {
            KosmosError::Config { source, .. } => assert!(source.is_some()),
            other => panic!("Expected Config error, got {:?}", other),
        }
    }

    #[test]
    fn yaml_roundtrip() -> anyhow::Result<()> {
        let config = KosmosConfig {
            i2c_spy_mode: I2cSpyMode::Raw,
            disabled_modules: vec![DeviceName::I2cSpy, DeviceName::KbdMatrix],
            ..KosmosConfig::default()
        };
        let yaml = config.to_yaml_string()?;
        assert!(yaml.contains("I2C_SPY"));
        assert!(yaml.contains("raw"));
        assert_eq!(KosmosConfig::from_yaml_str(&yaml)?, config);
        Ok(())
    }

    #[test]
    fn load_reports_missing_files() {
        let result = KosmosConfig::load("/nonexistent/kosmos.yaml");
        assert!(matches!(result, Err(KosmosError::Config { .. })));
    }
}
