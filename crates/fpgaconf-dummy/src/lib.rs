//! fpgaconf-dummy - Emulated device for testing
//!
//! This crate provides emulations of the peripherals behind an fpgaconf
//! device (SPI flash, LSI register file, FPGA configuration port) and a
//! loopback transport that lets the host crate talk to the firmware crate
//! without any hardware.

#![warn(missing_docs)]

pub mod flash;
pub mod fpga;
pub mod loopback;
pub mod lsi;

#[cfg(test)]
mod scenarios;

use fpgaconf_core::protocol::FastConfigInfo;
use fpgaconf_firmware::device::Strings;
use fpgaconf_firmware::dispatch::RegistryFull;
use fpgaconf_firmware::{Device, DeviceConfig};

pub use flash::{DummyFlash, DummyFlashConfig};
pub use fpga::DummyFpga;
pub use loopback::Loopback;
pub use lsi::DummyLsi;

/// A firmware device built from dummy peripherals
pub type DummyDevice = Device<DummyFlash, DummyLsi, DummyFpga>;

/// Fast configuration endpoint of the dummy device
pub const FAST_ENDPOINT: FastConfigInfo = FastConfigInfo {
    endpoint: 0x02,
    interface: 1,
};

/// Device configuration used by [`dummy_device`]
pub fn dummy_config(fast: bool) -> DeviceConfig {
    DeviceConfig {
        strings: Strings {
            manufacturer: Some("fpgaconf"),
            product: Some("dummy device"),
            serial: Some("0001"),
            interfaces: [
                Some("configuration"),
                Some("fast configuration"),
                None,
                None,
                None,
                None,
                None,
                None,
            ],
        },
        fast: fast.then_some(FAST_ENDPOINT),
        lsi_endpoints: None,
    }
}

/// Build a device around the given peripherals
pub fn dummy_device(
    fast: bool,
    flash: DummyFlash,
    lsi: DummyLsi,
    fpga: DummyFpga,
) -> Result<DummyDevice, RegistryFull> {
    Device::new(dummy_config(fast), flash, lsi, fpga)
}

/// A loopback transport to a device with default peripherals
pub fn loopback(fast: bool) -> Result<Loopback<DummyFlash, DummyLsi, DummyFpga>, RegistryFull> {
    let device = dummy_device(
        fast,
        DummyFlash::new_default(),
        DummyLsi::new(),
        DummyFpga::new(),
    )?;
    Ok(Loopback::new(device))
}
