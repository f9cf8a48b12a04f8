//! fpgaconf-firmware - Device side of the fpgaconf protocol
//!
//! The device answers control transfers from the host through a
//! [`dispatch::Dispatcher`]. Handlers registered with it program the
//! configuration flash ([`flash`]), access FPGA registers over the bit-banged
//! low speed interface ([`lsi`]) and feed configuration data to the FPGA
//! ([`fpga`]). [`device::Device`] wires them together.
//!
//! Hardware is reached through small traits ([`flash::SpiBus`],
//! [`lsi::SignalDriver`], [`fpga::ConfigPort`]) so the protocol logic runs
//! unchanged against emulated peripherals.
//!
//! Everything runs from the USB setup callback on a single thread; the
//! state machines rely on that and hold no locks.

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(test)]
extern crate std;

pub mod device;
pub mod dispatch;
pub mod flash;
pub mod fpga;
pub mod lsi;

pub use device::{Device, DeviceConfig};
pub use dispatch::{Dispatcher, Outcome, SetupPacket};
