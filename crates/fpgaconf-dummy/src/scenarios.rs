//! End-to-end tests: host crate against firmware crate over the loopback

use std::time::Duration;

use fpgaconf_core::bitstream::{BitOrder, BitOrderMode, Bitstream};
use fpgaconf_core::protocol::{Command, FlashError, Request};
use fpgaconf_firmware::flash::{FlashProgrammer, FlashState};
use fpgaconf_firmware::fpga::ConfigMode;
use fpgaconf_host::info::{config_status, system_reset};
use fpgaconf_host::upload::read_bitstream;
use fpgaconf_host::{
    upload_bitstream, Error, FlashClient, LsiClient, NoProgress, Transport, TransportError,
    UploadOptions,
};

use super::*;

fn marked_bitstream() -> Bitstream {
    let mut data = vec![0x5a; 2040];
    data[100..104].copy_from_slice(&[0xaa, 0x99, 0x55, 0x66]);
    Bitstream::from_bytes(&data, BitOrderMode::Auto).unwrap()
}

fn accept_any(fast: bool) -> Loopback<DummyFlash, DummyLsi, DummyFpga> {
    let device = dummy_device(
        fast,
        DummyFlash::new_default(),
        DummyLsi::new(),
        DummyFpga::accept_any(),
    )
    .unwrap();
    Loopback::new(device)
}

fn fpga(lb: &Loopback<DummyFlash, DummyLsi, DummyFpga>) -> &DummyFpga {
    lb.device().peripherals().fpga_config().port()
}

#[test]
fn test_upload_without_marker() {
    let mut lb = accept_any(false);
    let bitstream = Bitstream::from_bytes(&[0x5a; 2040], BitOrderMode::Auto).unwrap();
    assert_eq!(bitstream.transfer_len(), 2552);

    let report =
        upload_bitstream(&mut lb, &bitstream, UploadOptions::default(), &mut NoProgress).unwrap();
    assert_eq!(report.attempts, 1);
    assert_eq!(report.bit_order, BitOrder::Normal);
    assert_eq!(report.warnings.len(), 1);
    assert!(report.status.configured);
    assert_eq!(report.status.bytes, 2552);

    // Lead padding, file data, then the trailing clocks
    let data = fpga(&lb).data();
    assert_eq!(data.len(), 2552 + 16);
    assert!(data[..512].iter().all(|&b| b == 0));
    assert!(data[512..2552].iter().all(|&b| b == 0x5a));

    let status = config_status(&mut lb).unwrap();
    assert!(status.configured);
    assert_eq!(status.checksum, (0x5au32 * 2040) as u8);
}

#[test]
fn test_upload_reversed_over_fast_path() {
    let mut lb = loopback(true).unwrap();
    let report = upload_bitstream(
        &mut lb,
        &marked_bitstream(),
        UploadOptions::default(),
        &mut NoProgress,
    )
    .unwrap();
    assert!(report.fast);
    assert_eq!(report.bit_order, BitOrder::Reversed);
    assert!(report.warnings.is_empty());
    assert_eq!(fpga(&lb).sessions(), &[ConfigMode::Fast]);
    assert_eq!(lb.count(Command::ConfigSend.code()), 0);
    assert!(lb.claimed().is_empty());
}

#[test]
fn test_wrong_bit_order_never_configures() {
    let mut lb = loopback(false).unwrap();
    let mut data = vec![0x5a; 2040];
    data[100..104].copy_from_slice(&[0xaa, 0x99, 0x55, 0x66]);
    let bitstream = Bitstream::from_bytes(&data, BitOrderMode::Normal).unwrap();

    let r = upload_bitstream(&mut lb, &bitstream, UploadOptions::default(), &mut NoProgress);
    assert!(matches!(r, Err(Error::ConfigurationFailed { attempts: 5, .. })));
    assert_eq!(lb.count(Command::ConfigReset.code()), 5);
}

#[test]
fn test_invalid_size_rejected_before_transfer() {
    let lb = loopback(false).unwrap();
    for size in [0usize, 1000, 2048, 4096] {
        let r = read_bitstream(&vec![0u8; size][..], BitOrderMode::Auto);
        assert!(matches!(r, Err(Error::Core(_))), "size {}", size);
    }
    assert!(lb.transfers().is_empty());
}

#[test]
fn test_fast_failures_fall_back_to_ep0() {
    let mut port = DummyFpga::new();
    port.fail_next(2);
    let device = dummy_device(true, DummyFlash::new_default(), DummyLsi::new(), port).unwrap();
    let mut lb = Loopback::new(device);
    let report = upload_bitstream(
        &mut lb,
        &marked_bitstream(),
        UploadOptions::default(),
        &mut NoProgress,
    )
    .unwrap();
    assert_eq!(report.attempts, 3);
    assert!(!report.fast);
    assert_eq!(
        fpga(&lb).sessions(),
        &[ConfigMode::Fast, ConfigMode::Fast, ConfigMode::Cpu]
    );
    assert!(lb.claimed().is_empty());
}

#[test]
fn test_transient_fault_retried_per_transfer() {
    let mut lb = loopback(false).unwrap();
    lb.inject(Command::ConfigSend.code(), TransportError::Timeout);
    let report = upload_bitstream(
        &mut lb,
        &marked_bitstream(),
        UploadOptions::default(),
        &mut NoProgress,
    )
    .unwrap();
    assert_eq!(report.attempts, 1);
    // 2552 bytes take two transactions, one of them sent twice
    assert_eq!(lb.count(Command::ConfigSend.code()), 3);
}

#[test]
fn test_bulk_fault_retried() {
    let mut lb = loopback(true).unwrap();
    lb.inject(loopback::BULK, TransportError::Timeout);
    lb.inject(loopback::BULK, TransportError::Timeout);
    let report = upload_bitstream(
        &mut lb,
        &marked_bitstream(),
        UploadOptions::default(),
        &mut NoProgress,
    )
    .unwrap();
    // First attempt lost its only chunk, the second went through
    assert_eq!(report.attempts, 2);
    assert!(report.fast);
}

#[test]
fn test_flash_session_single_page_program() {
    let mut flash = FlashProgrammer::new(DummyFlash::new_default());
    flash.probe().unwrap();
    flash.write_start(3).unwrap();
    flash.write(&[0x11; 200]).unwrap();
    assert_eq!(flash.state(), FlashState::Programming);
    flash.write(&[0x22; 56]).unwrap();
    flash.write_finish();

    assert_eq!(flash.bus().page_programs(), 1);
    assert_eq!(flash.write_addr(), (3 << 16) + 256);
    assert_eq!(flash.state(), FlashState::Idle);
    let data = &flash.bus().data()[3 << 16..];
    assert!(data[..200].iter().all(|&b| b == 0x11));
    assert!(data[200..256].iter().all(|&b| b == 0x22));
    assert_eq!(data[256], 0xff);

    // Finishing again changes nothing
    flash.write_finish();
    assert_eq!(flash.write_addr(), (3 << 16) + 256);
}

#[test]
fn test_flash_round_trip_through_host() {
    let mut lb = loopback(false).unwrap();
    let image: Vec<u8> = (0..3000u32).map(|i| (i * 7) as u8).collect();
    {
        let mut flash = FlashClient::open(&mut lb).unwrap();
        assert_eq!(flash.info().sectors, 32);
        flash.write(2, &image, &mut NoProgress).unwrap();
        let back = flash.read(2, 1, &mut NoProgress).unwrap();
        assert_eq!(&back[..3000], &image[..]);
        assert!(back[3000..].iter().all(|&b| b == 0xff));
    }
    let flash = lb.device().peripherals().flash_programmer();
    assert_eq!(flash.bus().erases(), 1);
    assert_eq!(flash.bus().page_programs(), 256);
}

#[test]
fn test_open_program_blocks_flash_until_finished() {
    let mut lb = loopback(false).unwrap();
    let start = fpgaconf_core::protocol::FlashPhase::Start.index();
    lb.control_out(Command::FlashWrite.code(), 1, start, &[0; 100], Duration::ZERO)
        .unwrap();

    let info = fpgaconf_host::flash::flash_info(&mut lb).unwrap();
    assert_eq!(FlashError::from_code(info.error), Some(FlashError::Busy));
    let r = lb.control_in(Request::FlashRead.code(), 0, 0, 64, Duration::ZERO);
    assert_eq!(r, Err(TransportError::Stall));

    // An empty final transfer closes the abandoned session
    let finish = fpgaconf_core::protocol::FlashPhase::Finish.index();
    lb.control_out(Command::FlashWrite.code(), 1, finish, &[], Duration::ZERO)
        .unwrap();
    let data = lb
        .control_in(Request::FlashRead.code(), 1, 0, 128, Duration::ZERO)
        .unwrap();
    assert_eq!(&data[..100], &[0; 100]);
    assert!(data[100..].iter().all(|&b| b == 0xff));
}

#[test]
fn test_unknown_request_stalls() {
    let mut lb = loopback(false).unwrap();
    let r = lb.control_in(0x99, 0, 0, 8, Duration::ZERO);
    assert_eq!(r, Err(TransportError::Stall));
    let r = lb.control_out(0x99, 0, 0, &[], Duration::ZERO);
    assert_eq!(r, Err(TransportError::Stall));
}

#[test]
fn test_lsi_round_trip_all_addresses() {
    let mut lb = loopback(false).unwrap();
    let mut lsi = LsiClient::new(&mut lb);
    for a in 0..=255u8 {
        let v = (a as u32).wrapping_mul(0x9e37_79b9) ^ 0x5555_aaaa;
        lsi.set1(a, v).unwrap();
        assert_eq!(lsi.get1(a).unwrap(), v);
    }
    // Nothing else was disturbed
    let all = lsi.get_sequential(0, 256).unwrap();
    for (a, v) in all.into_iter().enumerate() {
        assert_eq!(v, (a as u32).wrapping_mul(0x9e37_79b9) ^ 0x5555_aaaa);
    }
}

#[test]
fn test_lsi_bulk_operations() {
    let mut lb = loopback(false).unwrap();
    let mut lsi = LsiClient::new(&mut lb);
    let values: Vec<u32> = (0..300).collect();
    lsi.set_sequential(10, &values).unwrap();
    lsi.set_scattered(&[3, 200], &[0xaaaa, 0xbbbb]).unwrap();

    let words = lsi.get_sequential(0, 300).unwrap();
    assert_eq!(words[3], 0xaaaa);
    assert_eq!(words[200], 0xbbbb);
    // Register 54 got value 44 from the tail of the sequence
    assert_eq!(words[54], 44);
    assert_eq!(words[256 + 54], 44);
}

#[test]
fn test_gpio_reset_and_system_reset() {
    let mut lb = loopback(false).unwrap();
    {
        let mut lsi = LsiClient::new(&mut lb);
        assert_eq!(lsi.gpio(0b0011, 0b0001).unwrap(), 0b0001);
        lsi.reset(false).unwrap();
        lsi.reset(true).unwrap();
    }
    let io = lb.device().peripherals().lsi_master().io();
    assert!(io.in_reset());

    system_reset(&mut lb, false).unwrap();
    assert_eq!(lb.device_mut().take_reset_request(), Some(true));
}

#[test]
fn test_string_descriptor_through_device() {
    let mut lb = loopback(false).unwrap();
    let setup = fpgaconf_firmware::SetupPacket {
        request_type: 0x80,
        request: 0x06,
        value: 0x0302,
        index: 0x0409,
        length: 255,
    };
    let (outcome, answer) = lb.device_mut().handle_setup(&setup, &[]);
    assert!(outcome.acknowledged());
    assert_eq!(answer[0] as usize, 2 + 2 * "dummy device".len());
}
