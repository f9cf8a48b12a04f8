//! Control endpoint request dispatcher
//!
//! Standard requests the USB stack forwards to the application are answered
//! by fixed logic. Vendor requests and vendor commands are looked up by code
//! in two registration tables owned by a [`Dispatcher`].

use core::fmt;

use fpgaconf_core::protocol::{Command, VENDOR_COMMAND_TYPE, VENDOR_REQUEST_TYPE};

/// Maximum number of handlers per table
pub const MAX_HANDLERS: usize = 50;
/// Size of the EP0 data buffer
pub const EP0_BUFFER_SIZE: usize = 4096;

/// Buffer holding the data stage of a control transfer
pub type Ep0Buffer = heapless::Vec<u8, EP0_BUFFER_SIZE>;

const REQ_CLEAR_FEATURE: u8 = 0x01;
const REQ_SET_FEATURE: u8 = 0x03;
const REQ_GET_DESCRIPTOR: u8 = 0x06;
const DESCRIPTOR_STRING: u8 = 0x03;
const FEATURE_ENDPOINT_HALT: u16 = 0;

const TYPE_MASK: u8 = 0x60;
const TYPE_STANDARD: u8 = 0x00;
const RECIPIENT_MASK: u8 = 0x1f;
const RECIPIENT_INTERFACE: u8 = 0x01;
const RECIPIENT_ENDPOINT: u8 = 0x02;

/// Number of interface string slots, served at string indices 4 to 11
pub const INTERFACE_STRINGS: usize = 8;

/// A decoded setup packet
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct SetupPacket {
    /// bmRequestType
    pub request_type: u8,
    /// bRequest
    pub request: u8,
    /// wValue
    pub value: u16,
    /// wIndex
    pub index: u16,
    /// wLength
    pub length: u16,
}

impl SetupPacket {
    /// Decode the 8 bytes of a setup stage
    pub fn from_bytes(b: &[u8; 8]) -> Self {
        Self {
            request_type: b[0],
            request: b[1],
            value: u16::from_le_bytes([b[2], b[3]]),
            index: u16::from_le_bytes([b[4], b[5]]),
            length: u16::from_le_bytes([b[6], b[7]]),
        }
    }

    /// Encode to the 8 bytes of a setup stage
    pub fn to_bytes(&self) -> [u8; 8] {
        let v = self.value.to_le_bytes();
        let i = self.index.to_le_bytes();
        let l = self.length.to_le_bytes();
        [
            self.request_type,
            self.request,
            v[0],
            v[1],
            i[0],
            i[1],
            l[0],
            l[1],
        ]
    }

    /// A vendor request reading `length` bytes
    pub fn vendor_request(request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type: VENDOR_REQUEST_TYPE,
            request,
            value,
            index,
            length,
        }
    }

    /// A vendor command sending `length` bytes
    pub fn vendor_command(request: u8, value: u16, index: u16, length: u16) -> Self {
        Self {
            request_type: VENDOR_COMMAND_TYPE,
            request,
            value,
            index,
            length,
        }
    }
}

/// Nonzero status returned by a failing handler
///
/// Codes 1 to 254 are driver errors, 255 is anything else.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HandlerFault(pub u8);

impl HandlerFault {
    /// Generic failure
    pub const OTHER: Self = Self(255);
}

impl fmt::Display for HandlerFault {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "handler fault {}", self.0)
    }
}

/// Registration table is full
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RegistryFull {
    /// Code that could not be registered
    pub code: u8,
}

impl fmt::Display for RegistryFull {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "no room to register handler 0x{:02x}", self.code)
    }
}

/// Vendor handler.
///
/// For requests the buffer starts empty and the handler fills in the answer,
/// which is cut to `wLength`. For commands the buffer holds the data stage.
pub type Handler<T> = fn(&mut T, &SetupPacket, &mut Ep0Buffer) -> Result<(), HandlerFault>;

/// Fixed-capacity table of handlers keyed by request code
pub struct Registry<T> {
    entries: heapless::Vec<(u8, Handler<T>), MAX_HANDLERS>,
}

impl<T> Default for Registry<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Registry<T> {
    /// Create an empty table
    pub const fn new() -> Self {
        Self {
            entries: heapless::Vec::new(),
        }
    }

    /// Register `handler` for `code`, replacing an existing entry in place
    pub fn register(&mut self, code: u8, handler: Handler<T>) -> Result<(), RegistryFull> {
        if let Some(entry) = self.entries.iter_mut().find(|(c, _)| *c == code) {
            entry.1 = handler;
            return Ok(());
        }
        self.entries.push((code, handler)).map_err(|_| {
            log::warn!("handler table full, 0x{:02x} not registered", code);
            RegistryFull { code }
        })
    }

    /// Handler registered for `code`
    pub fn lookup(&self, code: u8) -> Option<Handler<T>> {
        self.entries
            .iter()
            .find(|(c, _)| *c == code)
            .map(|&(_, h)| h)
    }

    /// Number of registered codes
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    /// True if nothing is registered
    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Result of dispatching one control transfer
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Outcome {
    /// Recognized and completed
    Accepted,
    /// Recognized standard request that has to be refused
    Refused,
    /// No handler for this request
    NotHandled,
    /// The handler ran and failed
    Failed(HandlerFault),
}

impl Outcome {
    /// Whether the transfer completes; everything else stalls
    pub fn acknowledged(&self) -> bool {
        matches!(self, Self::Accepted)
    }
}

/// Device services needed to answer standard requests
pub trait ControlTarget {
    /// String descriptor contents for index 1 (manufacturer), 2 (product),
    /// 3 (serial number) and 4 to 11 (interfaces 0 to 7)
    fn string_descriptor(&self, index: u8) -> Option<&str>;

    /// Whether the device is configured by the host
    fn usb_connected(&self) -> bool;

    /// Clean up after the host cleared a halted endpoint
    fn clear_endpoint_halt(&mut self, endpoint: u8);

    /// Reset the device; `disable_flash_boot` skips configuration from flash
    fn system_reset(&mut self, disable_flash_boot: bool);
}

/// Encode a string descriptor, `None` yields an empty descriptor
pub fn string_descriptor(s: Option<&str>, buf: &mut Ep0Buffer) {
    buf.clear();
    match s {
        None => {
            let _ = buf.extend_from_slice(&[4, DESCRIPTOR_STRING, 0, 0]);
        }
        Some(s) => {
            let chars = &s.as_bytes()[..s.len().min(126)];
            let _ = buf.push(2 + 2 * chars.len() as u8);
            let _ = buf.push(DESCRIPTOR_STRING);
            for &c in chars {
                let _ = buf.push(c);
                let _ = buf.push(0);
            }
        }
    }
}

/// Request and command tables plus the fixed standard-request logic
pub struct Dispatcher<T> {
    requests: Registry<T>,
    commands: Registry<T>,
}

impl<T> Default for Dispatcher<T> {
    fn default() -> Self {
        Self::new()
    }
}

impl<T> Dispatcher<T> {
    /// Create a dispatcher with empty tables
    pub const fn new() -> Self {
        Self {
            requests: Registry::new(),
            commands: Registry::new(),
        }
    }

    /// Register a vendor request handler (device-to-host data)
    pub fn register_request(&mut self, code: u8, handler: Handler<T>) -> Result<(), RegistryFull> {
        self.requests.register(code, handler)
    }

    /// Register a vendor command handler (host-to-device data)
    pub fn register_command(&mut self, code: u8, handler: Handler<T>) -> Result<(), RegistryFull> {
        self.commands.register(code, handler)
    }

    /// Vendor request table
    pub fn requests(&self) -> &Registry<T> {
        &self.requests
    }

    /// Vendor command table
    pub fn commands(&self) -> &Registry<T> {
        &self.commands
    }
}

impl<T: ControlTarget> Dispatcher<T> {
    /// Dispatch one control transfer.
    ///
    /// `buf` holds the data stage of a command on entry and the answer of a
    /// request on return.
    pub fn dispatch(&self, ctx: &mut T, setup: &SetupPacket, buf: &mut Ep0Buffer) -> Outcome {
        if setup.request_type & TYPE_MASK == TYPE_STANDARD {
            if setup.request == REQ_GET_DESCRIPTOR
                && (setup.value >> 8) as u8 == DESCRIPTOR_STRING
            {
                let idx = setup.value as u8;
                string_descriptor(ctx.string_descriptor(idx), buf);
                buf.truncate(setup.length as usize);
                return Outcome::Accepted;
            }
            return Self::standard(ctx, setup);
        }

        let (table, kind) = match setup.request_type {
            VENDOR_REQUEST_TYPE => {
                buf.clear();
                (&self.requests, "request")
            }
            VENDOR_COMMAND_TYPE => {
                if setup.request == Command::SystemReset.code() {
                    ctx.system_reset(setup.value == 0);
                    return Outcome::Accepted;
                }
                (&self.commands, "command")
            }
            _ => return Outcome::NotHandled,
        };

        let Some(handler) = table.lookup(setup.request) else {
            log::debug!("unknown vendor {} 0x{:02x}", kind, setup.request);
            return Outcome::NotHandled;
        };
        match handler(ctx, setup, buf) {
            Ok(()) => {
                if setup.request_type == VENDOR_REQUEST_TYPE {
                    buf.truncate(setup.length as usize);
                }
                Outcome::Accepted
            }
            Err(fault) => {
                log::warn!(
                    "vendor {} 0x{:02x} failed: {}",
                    kind,
                    setup.request,
                    fault
                );
                Outcome::Failed(fault)
            }
        }
    }

    fn standard(ctx: &mut T, setup: &SetupPacket) -> Outcome {
        let recipient = setup.request_type & RECIPIENT_MASK;
        let feature = setup.request == REQ_SET_FEATURE || setup.request == REQ_CLEAR_FEATURE;

        if recipient == RECIPIENT_INTERFACE && feature && setup.value == 0 {
            return if ctx.usb_connected() {
                Outcome::Accepted
            } else {
                Outcome::Refused
            };
        }

        if recipient == RECIPIENT_ENDPOINT
            && setup.request == REQ_CLEAR_FEATURE
            && setup.value == FEATURE_ENDPOINT_HALT
            && ctx.usb_connected()
        {
            ctx.clear_endpoint_halt(setup.index as u8);
            return Outcome::Accepted;
        }

        Outcome::NotHandled
    }
}
