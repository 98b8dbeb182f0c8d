//! I2C spy: captures bus traffic into an on-FPGA buffer

use std::sync::Arc;
use tracing::{debug, info};

use super::Module;
use crate::config::KosmosConfig;
use crate::device_tree::{DeviceName, DeviceTree};
use crate::i2c::{I2cSpyMode, I2cSpyParser, new_parser};
use crate::protocol::{Frame, SPY_CHUNK_CAPACITY, SpyChunk, msg_cmd, msg_id};
use crate::sequencer::Sequencer;
use crate::{KosmosError, Result};

/// I2C spy module handle bound to the configured capture format
#[derive(Debug, Clone)]
pub struct I2cSpyModule {
    module: Module,
    mode: I2cSpyMode,
    clock_hz: u32,
    chunk_reads: usize,
}

impl I2cSpyModule {
    pub fn new(sequencer: Arc<Sequencer>, tree: &DeviceTree, config: &KosmosConfig) -> Result<Self> {
        let module = Module::new(sequencer, tree, DeviceName::I2cSpy)?;
        Ok(Self {
            module,
            mode: config.i2c_spy_mode,
            clock_hz: config.fpga_clock_hz,
            chunk_reads: config.capture_chunk_reads.max(1),
        })
    }

    pub fn module(&self) -> &Module {
        &self.module
    }

    pub fn mode(&self) -> I2cSpyMode {
        self.mode
    }

    /// Reset the spy buffer and start capturing, in one batch.
    pub fn start_capture(&self) -> Result<()> {
        let frames = vec![Frame::new(msg_id::I2C_SPY, msg_cmd::RESET), Frame::new(msg_id::I2C_SPY, msg_cmd::START)];
        self.module.sequencer().send_control(frames)?;
        info!("I2C spy capture started ({:?} mode)", self.mode);
        Ok(())
    }

    pub fn stop_capture(&self) -> Result<()> {
        self.module.stop()?;
        info!("I2C spy capture stopped");
        Ok(())
    }

    /// Issue `count` READ requests in one data channel batch.
    ///
    /// Returns the bytes they carried and whether the FPGA ran out of
    /// captured data before the last request.
    pub fn read_chunks(&self, count: usize) -> Result<(Vec<u8>, bool)> {
        let sequencer = self.module.sequencer();
        if sequencer.offline_mode() {
            return Err(KosmosError::invalid_state("the I2C spy buffer cannot be read in offline mode"));
        }

        let frames = vec![Frame::new(msg_id::I2C_SPY, msg_cmd::READ); count.max(1)];
        let pairs = sequencer.send_data(frames)?;

        let mut bytes = Vec::new();
        let mut drained = false;
        for (_, rx) in &pairs {
            let chunk = rx.extract::<SpyChunk>()?;
            bytes.extend_from_slice(chunk.bytes());
            if chunk.bytes().len() < SPY_CHUNK_CAPACITY {
                drained = true;
            }
        }
        Ok((bytes, drained))
    }

    /// Read the capture buffer until the FPGA reports it empty.
    pub fn download(&self) -> Result<Vec<u8>> {
        let mut capture = Vec::new();
        loop {
            let (bytes, drained) = self.read_chunks(self.chunk_reads)?;
            capture.extend(bytes);
            if drained {
                break;
            }
        }
        debug!("Downloaded {} capture bytes", capture.len());
        Ok(capture)
    }

    /// A fresh parser for this spy's capture format.
    pub fn parser(&self) -> Box<dyn I2cSpyParser> {
        new_parser(self.mode, self.clock_hz)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::emulator::SimulatedFpga;
    use crate::link::{Channel, LinkAdapter};
    use crate::protocol::HwCfg;
    use crate::test_utils::synthetic_capture;
    use crate::transport::Transport;

    fn spy(config: &KosmosConfig) -> (SimulatedFpga, I2cSpyModule) {
        let fpga = SimulatedFpga::new();
        let sequencer = Arc::new(Sequencer::new(Transport::new(LinkAdapter::new(fpga.clone()))));
        let tree = DeviceTree::from_hwcfg(HwCfg::new(0x3FF), config);
        (fpga, I2cSpyModule::new(sequencer, &tree, config).unwrap())
    }

    #[test]
    fn download_drains_the_buffer_on_the_data_channel() {
        let config = KosmosConfig { capture_chunk_reads: 4, ..KosmosConfig::default() };
        let (fpga, spy) = spy(&config);
        spy.start_capture().unwrap();
        assert!(fpga.is_running(msg_id::I2C_SPY));

        let (frame_stream, _) = synthetic_capture(2, 20, 6);
        fpga.load_spy_capture(&frame_stream);

        let capture = spy.download().unwrap();
        assert_eq!(capture, frame_stream);

        let data_batches = fpga.datagrams().into_iter().filter(|(channel, _)| *channel == Channel::Data).count();
        assert!(data_batches > 1);

        let mut parser = spy.parser();
        assert_eq!(parser.parse(&capture).unwrap(), 40);
    }

    #[test]
    fn raw_mode_binds_the_raw_parser() {
        let config = KosmosConfig { i2c_spy_mode: I2cSpyMode::Raw, ..KosmosConfig::default() };
        let (_fpga, spy) = spy(&config);
        assert_eq!(spy.parser().mode(), I2cSpyMode::Raw);
    }

    #[test]
    fn disabled_spy_cannot_be_opened() {
        let config = KosmosConfig { disabled_modules: vec![DeviceName::I2cSpy], ..KosmosConfig::default() };
        let fpga = SimulatedFpga::new();
        let sequencer = Arc::new(Sequencer::new(Transport::new(LinkAdapter::new(fpga))));
        let tree = DeviceTree::from_hwcfg(HwCfg::new(0x3FF), &config);
        assert!(matches!(
            I2cSpyModule::new(sequencer, &tree, &config),
            Err(KosmosError::ModuleNotPresent { .. })
        ));
    }
}
