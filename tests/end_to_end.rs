//! End-to-end exchanges against the FPGA simulator

use anyhow::{Context, Result};
use kosmos::emulator::{Fault, SimulatedFpga};
use kosmos::i2c::{FrameModeParser, I2cSpyParser, RawModeParser, RawState, ticks_to_seconds};
use kosmos::protocol::{Frame, HwCfg, REPLY_FLAG, ReturnCode, msg_cmd, msg_id};
use kosmos::{
    DeviceName, Kosmos, KosmosConfig, KosmosError, LinkAdapter, Sequencer, Transport, VersionTarget,
};
use std::sync::Arc;

const CLOCK_HZ: u32 = 100_000_000;

fn init_tracing() {
    let _ = tracing_subscriber::fmt::try_init();
}

fn stack() -> (SimulatedFpga, Sequencer) {
    let fpga = SimulatedFpga::new();
    let sequencer = Sequencer::new(Transport::new(LinkAdapter::new(fpga.clone())));
    (fpga, sequencer)
}

#[test]
fn hwcfg_read_is_cached() -> Result<()> {
    init_tracing();
    let fpga = SimulatedFpga::new().with_hwcfg(0x0041);
    let transport = Transport::new(LinkAdapter::new(fpga.clone()));

    let pairs = transport.send_control_message_list(vec![Frame::new(msg_id::FPGA, msg_cmd::HWCFG)])?;
    let (tx, rx) = &pairs[0];
    assert_eq!(rx.cmd, msg_cmd::HWCFG | REPLY_FLAG);
    assert_eq!(rx.seq_id, tx.seq_id);
    assert_eq!(rx.extract::<HwCfg>()?, HwCfg::new(0x0041));

    let before = fpga.transfer_count();
    let first = transport.hwcfg()?;
    let second = transport.hwcfg()?;
    assert_eq!(first, second);
    assert_eq!(fpga.transfer_count(), before + 1, "second read must come from the cache");
    Ok(())
}

#[test]
fn overrun_on_middle_frame_names_index_and_keeps_batch() {
    init_tracing();
    let (fpga, sequencer) = stack();
    fpga.inject(Fault::Status { index: 1, code: ReturnCode::BufferOverrun as u8 });

    let frames = vec![
        Frame::new(msg_id::FPGA, msg_cmd::HWCFG),
        Frame::with_raw_payload(msg_id::PES, msg_cmd::WRITE, &[1, 2, 3]),
        Frame::new(msg_id::TEST, msg_cmd::LOOPBACK),
    ];
    let error = sequencer.send_control(frames).unwrap_err();

    let message = error.to_string();
    assert!(matches!(error, KosmosError::OverrunPayload(_)));
    assert!(message.contains("#1"));
    assert!(message.contains("BUFFER_OVERRUN"));
    assert_eq!(message.matches("TX:").count(), 3);
    assert!(error.is_retryable());

    let pairs = error.pairs().expect("exchange errors carry their batch");
    assert_eq!(pairs.len(), 3);
    assert_eq!(pairs[0].0.id, msg_id::FPGA);
    assert_eq!(pairs[2].0.id, msg_id::TEST);
    assert_eq!(error.exchange().map(|f| f.index), Some(1));
}

#[test]
fn rotated_sequence_ids_fail_on_first_pair() {
    init_tracing();
    let (fpga, sequencer) = stack();
    fpga.inject(Fault::RotateSequence);

    let frames = vec![Frame::new(msg_id::TEST, msg_cmd::LOOPBACK); 3];
    let error = sequencer.send_control(frames).unwrap_err();

    match &error {
        KosmosError::OutOfSequence(failure) => assert_eq!(failure.index, 0),
        other => panic!("Expected OutOfSequence, got {:?}", other),
    }
    assert!(!error.is_retryable());
}

#[test]
fn truncated_reply_is_a_codec_error() {
    let (fpga, sequencer) = stack();
    fpga.inject(Fault::TruncateReply);
    let result = sequencer.send_control(vec![Frame::new(msg_id::TEST, msg_cmd::LOOPBACK)]);
    assert!(matches!(result, Err(KosmosError::Codec { .. })));
}

#[test]
fn device_reply_decodes_without_trailer() -> Result<()> {
    let mut block = [0u8; kosmos::protocol::FRAME_SIZE];
    block[..4].copy_from_slice(&[msg_id::FPGA, msg_cmd::HWCFG | REPLY_FLAG, 0x00, 0x41]);
    let frame = Frame::decode(&block)?;
    assert_eq!(frame.extract::<HwCfg>()?, HwCfg::new(0x41));
    Ok(())
}

#[test]
fn offline_recording_is_played_in_one_datagram() -> Result<()> {
    init_tracing();
    let fpga = SimulatedFpga::new();
    let kosmos = Kosmos::open_simulated(fpga.clone(), KosmosConfig::default())?;
    fpga.clear_datagrams();

    let pes = kosmos.module(DeviceName::Pes)?;
    let bas = kosmos.module(DeviceName::Bas)?;
    let spy = kosmos.module(DeviceName::LedSpy)?;
    let sequencer = kosmos.sequencer();

    sequencer.set_offline_mode(true);
    pes.reset()?;
    pes.write(&[0xAA; 4])?;
    bas.start()?;
    spy.status()?;
    bas.stop()?;
    assert_eq!(fpga.transfer_count(), 0, "nothing may leave the transport while recording");
    assert_eq!(sequencer.recorded_len(), 5);

    let pairs = sequencer.play_sequence()?;
    assert_eq!(pairs.len(), 5);
    assert!(!sequencer.offline_mode());

    let datagrams = fpga.datagrams();
    assert_eq!(datagrams.len(), 1);
    let sent: Vec<(u8, u8)> = datagrams[0].1.iter().map(|f| (f.id, f.cmd)).collect();
    assert_eq!(sent, vec![
        (msg_id::PES, msg_cmd::RESET),
        (msg_id::PES, msg_cmd::WRITE),
        (msg_id::BAS, msg_cmd::START),
        (msg_id::LED_SPY, msg_cmd::STATUS),
        (msg_id::BAS, msg_cmd::STOP),
    ]);
    kosmos::check_message_replies(&pairs).context("played replies must validate")?;
    Ok(())
}

#[test]
fn offline_session_keeps_requests_off_the_link() -> Result<()> {
    let fpga = SimulatedFpga::new();
    let kosmos = Kosmos::open_simulated(fpga.clone(), KosmosConfig { max_batch_frames: 1, ..KosmosConfig::default() })?;
    let before = fpga.transfer_count();

    let sequencer = kosmos.sequencer();
    sequencer.set_offline_mode(true);
    kosmos.module(DeviceName::Pes)?.write(&[0x55; 64])?;
    sequencer.send_data(vec![Frame::new(msg_id::BAS, msg_cmd::START)])?;
    assert_eq!(kosmos.hwcfg(), sequencer.hwcfg()?);
    assert_eq!(fpga.transfer_count(), before, "offline requests must wait for play_sequence");

    let pairs = sequencer.play_sequence()?;
    assert_eq!(pairs.len(), 4);
    assert_eq!(fpga.transfer_count(), before + 1);
    Ok(())
}

#[test]
fn offline_recording_composes_across_threads() -> Result<()> {
    let (fpga, sequencer) = stack();
    let sequencer = Arc::new(sequencer);

    let handles: Vec<_> = (0..4)
        .map(|_| {
            let sequencer = Arc::clone(&sequencer);
            std::thread::spawn(move || {
                sequencer.with_lock(|seq| -> kosmos::Result<usize> {
                    seq.set_offline_mode(true);
                    seq.send_control(vec![Frame::new(msg_id::PES, msg_cmd::RESET)])?;
                    seq.send_control(vec![Frame::new(msg_id::PES, msg_cmd::START)])?;
                    Ok(seq.play_sequence()?.len())
                })
            })
        })
        .collect();

    for handle in handles {
        let played = handle.join().map_err(|_| anyhow::anyhow!("recorder thread panicked"))??;
        assert_eq!(played, 2);
    }

    let datagrams = fpga.datagrams();
    assert_eq!(datagrams.len(), 4);
    for (_, frames) in datagrams {
        assert_eq!(frames.len(), 2);
        assert_eq!(frames[1].seq_id, frames[0].seq_id.wrapping_add(1));
    }
    Ok(())
}

#[test]
fn sequence_ids_wrap_across_batches() -> Result<()> {
    let (fpga, sequencer) = stack();
    for _ in 0..3 {
        let frames = vec![Frame::new(msg_id::TEST, msg_cmd::LOOPBACK); 100];
        sequencer.send_control(frames)?;
    }

    let seq_ids: Vec<u8> = fpga.datagrams().iter().flat_map(|(_, frames)| frames.iter().map(|f| f.seq_id)).collect();
    assert_eq!(seq_ids.len(), 300);
    for window in seq_ids.windows(2) {
        assert_eq!(window[1], window[0].wrapping_add(1));
    }
    assert_eq!(seq_ids[256], 0);
    Ok(())
}

#[test]
fn frame_mode_capture_scenario() -> Result<()> {
    let mut stream = vec![0x00, 0x10, 0x00, 0x00, 0x02, 0x00, 0x00];
    stream.extend([0x0A, 0x55]);
    stream.extend([0x00, 0x20, 0x00, 0x00, 0x00, 0x00, 0x00]);

    let mut parser = FrameModeParser::new(CLOCK_HZ);
    assert_eq!(parser.parse(&stream)?, 1);

    let runs = parser.frame_runs();
    assert_eq!(runs.len(), 2);
    let frame = &runs[0].frames[0];
    assert_eq!(frame.bytes, vec![0x0A, 0x55]);
    assert_eq!(frame.time, ticks_to_seconds(0x1000, CLOCK_HZ));
    assert!(!frame.nack);
    assert!(runs[1].frames.is_empty());
    Ok(())
}

#[test]
fn raw_mode_capture_scenario() -> Result<()> {
    let records = [
        (RawState::Init, 0x00, 0x100u32),
        (RawState::Start, 0x00, 0x101),
        (RawState::Data, 0xAB, 0),
        (RawState::Ack, 0x00, 0x102),
        (RawState::Data, 0xCD, 0),
        (RawState::Nack, 0x00, 0x103),
        (RawState::Stop, 0x00, 0x104),
    ];
    let stream: Vec<u8> = records
        .iter()
        .flat_map(|&(state, data, ts)| {
            let mut record = vec![state as u8, data];
            record.extend_from_slice(&ts.to_le_bytes());
            record
        })
        .collect();

    let mut parser = RawModeParser::new(CLOCK_HZ);
    assert_eq!(parser.parse(&stream)?, 1);

    let runs = parser.frame_runs();
    assert_eq!(runs.len(), 1);
    assert_eq!(runs[0].frames.len(), 1);
    assert_eq!(runs[0].frames[0].bytes, vec![0xAB, 0xCD]);
    assert!(runs[0].frames[0].nack);
    Ok(())
}

#[test]
fn session_reports_rig_identity() -> Result<()> {
    init_tracing();
    let config = KosmosConfig::from_yaml_str("disabled_modules: [OPT_EMU]\nmax_batch_frames: 64\n")?;
    let fpga = SimulatedFpga::new().with_hwcfg((1 << 6) | (1 << 9));
    let kosmos = Kosmos::open_simulated(fpga, config)?;

    assert_eq!(kosmos.device_tree().modules(), &[DeviceName::I2cSpy]);
    assert_eq!(kosmos.sequencer().max_batch_frames(), 64);
    assert!(matches!(kosmos.module(DeviceName::OptEmu), Err(KosmosError::ModuleNotPresent { .. })));

    let version = kosmos.version_info(VersionTarget::Protocol)?;
    assert_eq!(version.describe.tag.as_deref(), Some("v1.0.0"));
    assert_eq!(version.describe.version.map(|v| (v.major, v.minor, v.patch)), Some((1, 0, 0)));
    assert!(!version.dirty);
    Ok(())
}
