//! Vendor control-transfer protocol
//!
//! Request codes, request types and the fixed payload layouts exchanged over
//! the control endpoint. Vendor *requests* carry data from the device to the
//! host, vendor *commands* carry data from the host to the device.

use core::fmt;

use crate::error::{Error, Result};

/// `bmRequestType` of a vendor request (device-to-host, vendor, device)
pub const VENDOR_REQUEST_TYPE: u8 = 0xC0;
/// `bmRequestType` of a vendor command (host-to-device, vendor, device)
pub const VENDOR_COMMAND_TYPE: u8 = 0x40;

/// Maximum payload of one configuration-send control transaction
pub const EP0_TRANSACTION_SIZE: usize = 2048;
/// Payload of one flash read or write control transfer
pub const FLASH_TRANSFER_SIZE: usize = 2048;
/// A configuration-send whose length is not a multiple of this ends the stream
pub const END_OF_STREAM_GRANULARITY: usize = 64;

/// Vendor requests (device-to-host data)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Request {
    /// FPGA configuration status, see [`ConfigStatus`]
    ConfigStatus = 0x30,
    /// High-speed configuration endpoint and interface, see [`FastConfigInfo`]
    FastConfigInfo = 0x33,
    /// Flash geometry and error code, see [`FlashInfo`]
    FlashInfo = 0x40,
    /// Read flash contents
    FlashRead = 0x41,
    /// Flash identification and last command, see [`FlashDiagnostics`]
    FlashDiagnostics = 0x43,
    /// Read and modify the GPIO pins
    GpioControl = 0x61,
    /// Read LSI registers
    LsiRead = 0x63,
    /// LSI interface description, see [`LsiInfo`]
    LsiInfo = 0x64,
}

impl Request {
    /// Wire code of this request
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Vendor commands (host-to-device data)
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Command {
    /// Reset the FPGA configuration logic
    ConfigReset = 0x31,
    /// Send configuration data through the control endpoint
    ConfigSend = 0x32,
    /// Prepare high-speed configuration through the bulk endpoint
    FastConfigStart = 0x34,
    /// Finish high-speed configuration
    FastConfigFinish = 0x35,
    /// Erase and program flash, phase selected by the index high byte
    FlashWrite = 0x42,
    /// Pulse or hold the LSI reset line
    LsiReset = 0x60,
    /// Write LSI registers from 5-byte records
    LsiWrite = 0x62,
    /// Reset the whole device
    SystemReset = 0xA1,
}

impl Command {
    /// Wire code of this command
    pub const fn code(self) -> u8 {
        self as u8
    }
}

/// Phase of a multi-transfer flash operation, carried in `index >> 8`
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashPhase {
    /// First transfer of a sector: erase (write) or seek (read)
    Start = 0,
    /// Intermediate transfer
    Continue = 1,
    /// Last transfer of a sector write, closes any open program command
    Finish = 3,
}

impl FlashPhase {
    /// The `wIndex` value encoding this phase
    pub const fn index(self) -> u16 {
        (self as u16) << 8
    }

    /// Extract the raw phase number from a `wIndex` value
    pub const fn raw_from_index(index: u16) -> u8 {
        (index >> 8) as u8
    }

    /// Phase for transfer `n` of `count` within one sector write
    pub fn for_write(n: usize, count: usize) -> Self {
        if n == 0 {
            Self::Start
        } else if n + 1 == count {
            Self::Finish
        } else {
            Self::Continue
        }
    }
}

/// Flash error codes surfaced unchanged to the host
#[repr(u8)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashError {
    /// Status register stayed busy past the poll budget
    Timeout = 2,
    /// Chip select was still asserted from an unfinished operation
    Busy = 4,
    /// No flash detected or unsupported capacity
    NotSupported = 7,
    /// Transport failure or invalid request in the middle of a sequence
    Runtime = 8,
}

impl FlashError {
    /// Wire code
    pub const fn code(self) -> u8 {
        self as u8
    }

    /// Decode a wire code, `None` for 0 (no error) and unknown codes
    pub fn from_code(code: u8) -> Option<Self> {
        match code {
            2 => Some(Self::Timeout),
            4 => Some(Self::Busy),
            7 => Some(Self::NotSupported),
            8 => Some(Self::Runtime),
            _ => None,
        }
    }
}

impl fmt::Display for FlashError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Timeout => write!(f, "flash timeout"),
            Self::Busy => write!(f, "flash busy: previous operation not finished"),
            Self::NotSupported => write!(f, "flash not supported or not present"),
            Self::Runtime => write!(f, "flash runtime error"),
        }
    }
}

#[cfg(feature = "std")]
impl std::error::Error for FlashError {}

fn require(buf: &[u8], expected: usize) -> Result<()> {
    if buf.len() < expected {
        return Err(Error::ShortPayload {
            expected,
            actual: buf.len(),
        });
    }
    Ok(())
}

/// Answer to [`Request::ConfigStatus`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct ConfigStatus {
    /// FPGA reports configuration done
    pub configured: bool,
    /// Wrapping sum of all configuration bytes received
    pub checksum: u8,
    /// Number of configuration bytes received
    pub bytes: u32,
    /// INIT_B diagnostic: 200/100 at start, plus 22/11 at done (high/low)
    pub init_b: u8,
    /// Result of configuration from flash
    pub flash_result: u8,
    /// Bit order used when configuring from flash
    pub bit_order: u8,
}

impl ConfigStatus {
    /// Encoded length
    pub const LEN: usize = 9;

    /// Encode to the wire layout
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let b = self.bytes.to_le_bytes();
        [
            if self.configured { 0 } else { 1 },
            self.checksum,
            b[0],
            b[1],
            b[2],
            b[3],
            self.init_b,
            self.flash_result,
            self.bit_order,
        ]
    }

    /// Decode a status answer.
    ///
    /// Only the first byte is mandatory; older firmware answers with fewer
    /// bytes and the missing fields read as zero.
    pub fn parse(buf: &[u8]) -> Result<Self> {
        require(buf, 1)?;
        let mut full = [0u8; Self::LEN];
        let n = buf.len().min(Self::LEN);
        full[..n].copy_from_slice(&buf[..n]);
        Ok(Self {
            configured: full[0] == 0,
            checksum: full[1],
            bytes: u32::from_le_bytes([full[2], full[3], full[4], full[5]]),
            init_b: full[6],
            flash_result: full[7],
            bit_order: full[8],
        })
    }
}

/// Answer to [`Request::FastConfigInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FastConfigInfo {
    /// Bulk OUT endpoint, 0 if not supported
    pub endpoint: u8,
    /// Interface owning the endpoint
    pub interface: u8,
}

impl FastConfigInfo {
    /// Encode to the wire layout
    pub fn to_bytes(&self) -> [u8; 2] {
        [self.endpoint, self.interface]
    }

    /// Decode; the interface is only trusted when exactly two bytes arrived
    pub fn parse(buf: &[u8]) -> Self {
        Self {
            endpoint: buf.first().copied().unwrap_or(0),
            interface: if buf.len() == 2 { buf[1] } else { 0 },
        }
    }

    /// Endpoint number usable for bulk configuration data
    pub fn endpoint(&self) -> Option<u8> {
        match self.endpoint & 0x7f {
            0 => None,
            ep => Some(ep),
        }
    }
}

/// Answer to [`Request::FlashInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlashInfo {
    /// Flash detected and usable
    pub enabled: bool,
    /// Sector (erase block) size in bytes
    pub sector_size: u32,
    /// Number of sectors
    pub sectors: u32,
    /// Last error code, 0 if none
    pub error: u8,
}

impl FlashInfo {
    /// Encoded length
    pub const LEN: usize = 8;

    /// Encode a sector size: powers of two of 64 KiB and above set the MSB and
    /// carry the exponent.
    pub fn encode_sector_size(size: u32) -> u16 {
        if size > 0x7fff && size.is_power_of_two() {
            0x8000 | size.trailing_zeros() as u16
        } else {
            size as u16
        }
    }

    /// Decode a sector size field
    pub fn decode_sector_size(raw: u16) -> u32 {
        if raw & 0x8000 != 0 {
            1u32 << (raw & 0x1f)
        } else {
            raw as u32
        }
    }

    /// Encode to the wire layout
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let ss = Self::encode_sector_size(self.sector_size).to_le_bytes();
        let n = self.sectors.to_le_bytes();
        [
            self.enabled as u8,
            ss[0],
            ss[1],
            n[0],
            n[1],
            n[2],
            n[3],
            self.error,
        ]
    }

    /// Decode the wire layout
    pub fn parse(buf: &[u8]) -> Result<Self> {
        require(buf, Self::LEN)?;
        Ok(Self {
            enabled: buf[0] != 0,
            sector_size: Self::decode_sector_size(u16::from_le_bytes([buf[1], buf[2]])),
            sectors: u32::from_le_bytes([buf[3], buf[4], buf[5], buf[6]]),
            error: buf[7],
        })
    }

    /// Total capacity in bytes
    pub fn capacity(&self) -> u64 {
        self.sector_size as u64 * self.sectors as u64
    }
}

/// Answer to [`Request::FlashDiagnostics`]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct FlashDiagnostics {
    /// Last error code
    pub error: u8,
    /// JEDEC manufacturer ID
    pub vendor: u8,
    /// Device ID from the legacy ID command
    pub device: u8,
    /// JEDEC memory type
    pub memtype: u8,
    /// Sector erase opcode in use
    pub erase_cmd: u8,
    /// Last opcode sent to the flash
    pub last_cmd: u8,
    /// Last bytes of the command buffer
    pub scratch: [u8; 4],
}

impl FlashDiagnostics {
    /// Encoded length
    pub const LEN: usize = 10;

    /// Encode to the wire layout
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        let s = self.scratch;
        [
            self.error,
            self.vendor,
            self.device,
            self.memtype,
            self.erase_cmd,
            self.last_cmd,
            s[0],
            s[1],
            s[2],
            s[3],
        ]
    }

    /// Decode the wire layout
    pub fn parse(buf: &[u8]) -> Result<Self> {
        require(buf, Self::LEN)?;
        Ok(Self {
            error: buf[0],
            vendor: buf[1],
            device: buf[2],
            memtype: buf[3],
            erase_cmd: buf[4],
            last_cmd: buf[5],
            scratch: [buf[6], buf[7], buf[8], buf[9]],
        })
    }
}

/// Answer to [`Request::LsiInfo`]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LsiInfo {
    /// Interface version, 0 means no LSI
    pub version: u8,
    /// Bulk OUT endpoint, 255 if none
    pub out_ep: u8,
    /// Bulk IN endpoint, 255 if none
    pub in_ep: u8,
    /// Interface sub-version
    pub sub_version: u8,
}

impl Default for LsiInfo {
    fn default() -> Self {
        Self {
            version: 1,
            out_ep: 255,
            in_ep: 255,
            sub_version: 4,
        }
    }
}

impl LsiInfo {
    /// Encoded length
    pub const LEN: usize = 8;

    /// Encode to the wire layout
    pub fn to_bytes(&self) -> [u8; Self::LEN] {
        [
            self.version,
            self.out_ep,
            self.in_ep,
            self.sub_version,
            0,
            0,
            0,
            0,
        ]
    }

    /// Decode; `None` if the device does not report an LSI
    pub fn parse(buf: &[u8]) -> Option<Self> {
        if buf.len() < 3 || buf[0] == 0 {
            return None;
        }
        Some(Self {
            version: buf[0],
            out_ep: buf[1] & 0x7f,
            in_ep: buf[2] | 0x80,
            sub_version: buf.get(3).copied().unwrap_or(0),
        })
    }
}
