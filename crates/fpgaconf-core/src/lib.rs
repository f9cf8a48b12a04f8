//! fpgaconf-core - Shared protocol definitions for fpgaconf
//!
//! This crate holds everything both halves of the link agree on: vendor
//! request codes and payload layouts, the bitstream chunking and bit-order
//! rules, the LSI record format and the bounded-retry combinator. It is
//! `no_std` so the device firmware can use the same definitions as the host.
//!
//! # Features
//!
//! - `alloc` - Enable [`bitstream`] and the allocating LSI frame builders (default)
//! - `std` - Enable standard library support (includes `alloc`)
//!
//! # Example
//!
//! ```ignore
//! use fpgaconf_core::bitstream::{BitOrderMode, Bitstream};
//!
//! let bitstream = Bitstream::from_bytes(&data, BitOrderMode::Auto)?;
//! for chunk in bitstream.chunks() {
//!     send(chunk)?;
//! }
//! ```

#![no_std]
#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

#[cfg(feature = "alloc")]
extern crate alloc;

#[cfg(feature = "std")]
extern crate std;

#[cfg(feature = "alloc")]
pub mod bitstream;
pub mod error;
pub mod lsi;
pub mod protocol;
pub mod retry;

pub use error::{Error, Result};
