//! Error types for the host side

use fpgaconf_core::protocol::FlashError;
use thiserror::Error;

/// Failure of a single control or bulk transfer
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum TransportError {
    /// The transfer did not complete in time
    #[error("transfer timed out")]
    Timeout,

    /// The device stalled the endpoint, usually an unknown or failed request
    #[error("endpoint stalled")]
    Stall,

    /// The device went away
    #[error("device disconnected")]
    Disconnected,

    /// Fewer bytes were transferred than requested
    #[error("short transfer: {actual} of {expected} bytes")]
    Short {
        /// Bytes requested
        expected: usize,
        /// Bytes transferred
        actual: usize,
    },

    /// Anything else reported by the USB stack
    #[error("{0}")]
    Other(String),
}

/// Errors that can occur when talking to a device
#[derive(Error, Debug)]
pub enum Error {
    /// A transfer failed, after its retry
    #[error("USB transfer failed: {0}")]
    Transport(#[from] TransportError),

    /// Bitstream or payload rejected before anything was sent
    #[error(transparent)]
    Core(#[from] fpgaconf_core::Error),

    /// Every upload attempt ended without the FPGA reporting done
    #[error("FPGA configuration failed after {attempts} attempts: {last}")]
    ConfigurationFailed {
        /// Number of attempts made
        attempts: usize,
        /// Failure of the last attempt
        last: String,
        /// Warnings collected along the way
        warnings: Vec<String>,
    },

    /// The configuration status could not be read back
    #[error("unable to read configuration status: {0}")]
    ConfigStatusUnavailable(TransportError),

    /// The FPGA did not report done after the data was delivered
    #[error("FPGA not configured after {bytes} bytes (checksum 0x{checksum:02x})")]
    NotConfigured {
        /// Bytes the device counted
        bytes: u32,
        /// Checksum the device computed
        checksum: u8,
    },

    /// The device reported a flash error
    #[error("flash error: {0}")]
    Flash(FlashError),

    /// The device answered with something unexpected
    #[error("invalid response: {0}")]
    InvalidResponse(String),

    /// A caller-supplied parameter is out of range
    #[error("invalid parameter: {0}")]
    InvalidParameter(String),

    /// Reading or writing a local file failed
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Opening or claiming the USB device failed
    #[error("USB error: {0}")]
    Usb(String),
}

/// Result type for host operations
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(feature = "usb")]
impl From<nusb::Error> for Error {
    fn from(e: nusb::Error) -> Self {
        Error::Usb(e.to_string())
    }
}

#[cfg(feature = "usb")]
impl From<nusb::transfer::TransferError> for TransportError {
    fn from(e: nusb::transfer::TransferError) -> Self {
        use nusb::transfer::TransferError;
        match e {
            TransferError::Cancelled => TransportError::Timeout,
            TransferError::Stall => TransportError::Stall,
            TransferError::Disconnected => TransportError::Disconnected,
            other => TransportError::Other(other.to_string()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_short_transfer_message() {
        let e = TransportError::Short {
            expected: 2048,
            actual: 2000,
        };
        assert_eq!(e.to_string(), "short transfer: 2000 of 2048 bytes");
    }

    #[test]
    fn test_core_error_is_transparent() {
        let e = Error::from(fpgaconf_core::Error::InvalidBitstreamSize(2048));
        assert_eq!(
            e.to_string(),
            fpgaconf_core::Error::InvalidBitstreamSize(2048).to_string()
        );
    }
}
