//! Error types for fpgaconf-core
//!
//! This module provides a no_std compatible error type shared by the host
//! and firmware crates.

use core::fmt;

/// Core error type - no_std compatible, Copy for efficiency
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    // Bitstream errors
    /// Bitstream is shorter than 1024 bytes or a multiple of 64 bytes long
    InvalidBitstreamSize(usize),
    /// Bitstream does not fit into the maximum number of transfer chunks
    BitstreamTooLarge,

    // Payload errors
    /// A device response or request payload was shorter than its layout
    ShortPayload {
        /// Number of bytes the layout requires
        expected: usize,
        /// Number of bytes actually present
        actual: usize,
    },
    /// LSI write payload is not made of whole 5-byte records
    InvalidRecordLength(usize),
    /// Address and value lists passed to a scattered LSI write differ in length
    LengthMismatch {
        /// Number of addresses
        addrs: usize,
        /// Number of values
        values: usize,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::InvalidBitstreamSize(size) => write!(f, "invalid bitstream size: {}", size),
            Self::BitstreamTooLarge => write!(f, "bitstream too large"),
            Self::ShortPayload { expected, actual } => {
                write!(f, "short payload: expected {} bytes, got {}", expected, actual)
            }
            Self::InvalidRecordLength(len) => {
                write!(f, "LSI payload of {} bytes is not a multiple of 5", len)
            }
            Self::LengthMismatch { addrs, values } => {
                write!(f, "{} addresses given for {} values", addrs, values)
            }
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for Error {}

/// Result type alias using the core Error type
pub type Result<T> = core::result::Result<T, Error>;
