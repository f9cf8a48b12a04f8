//! fpgaconf-host - Host side of the fpgaconf protocol
//!
//! This crate uploads configuration bitstreams to an FPGA-attached device
//! and gives access to its configuration flash and its low speed register
//! interface. All device access goes through the [`Transport`] trait; the
//! `usb` feature provides an implementation on top of nusb.
//!
//! # Example
//!
//! ```no_run
//! use fpgaconf_host::upload::{read_bitstream, upload_bitstream, UploadOptions};
//! use fpgaconf_host::usb::{UsbTransport, DEFAULT_PID, DEFAULT_VID};
//! use fpgaconf_host::NoProgress;
//! use fpgaconf_core::bitstream::BitOrderMode;
//!
//! let mut dev = UsbTransport::open(DEFAULT_VID, DEFAULT_PID)?;
//! let file = std::fs::File::open("design.bit")?;
//! let bitstream = read_bitstream(file, BitOrderMode::Auto)?;
//! upload_bitstream(&mut dev, &bitstream, UploadOptions::default(), &mut NoProgress)?;
//! # Ok::<(), fpgaconf_host::Error>(())
//! ```

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

pub mod error;
pub mod flash;
pub mod info;
pub mod lsi;
pub mod progress;
pub mod transport;
pub mod upload;
#[cfg(feature = "usb")]
pub mod usb;

#[cfg(test)]
mod mock;

pub use error::{Error, Result, TransportError};
pub use flash::FlashClient;
pub use lsi::LsiClient;
pub use progress::{FlashProgress, NoProgress, UploadProgress};
pub use transport::Transport;
pub use upload::{upload_bitstream, UploadOptions, UploadReport, Uploader};
