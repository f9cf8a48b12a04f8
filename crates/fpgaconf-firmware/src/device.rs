//! Device assembly
//!
//! [`Device`] owns the peripherals and a dispatcher with every handler of
//! the protocol registered. The USB stack hands it setup packets and bulk
//! data; everything else happens in the handlers.

use fpgaconf_core::protocol::FastConfigInfo;

use crate::dispatch::{
    ControlTarget, Dispatcher, Ep0Buffer, HandlerFault, Outcome, RegistryFull, SetupPacket,
    EP0_BUFFER_SIZE, INTERFACE_STRINGS,
};
use crate::flash::{self, FlashAccess, FlashProgrammer, SpiBus};
use crate::fpga::{self, ConfigPort, FpgaAccess, FpgaConfig, PortError};
use crate::lsi::{self, Lsi, LsiAccess, SignalDriver};

/// USB string descriptors
#[derive(Debug, Clone, Copy, Default)]
pub struct Strings {
    /// Manufacturer, string index 1
    pub manufacturer: Option<&'static str>,
    /// Product, string index 2
    pub product: Option<&'static str>,
    /// Serial number, string index 3
    pub serial: Option<&'static str>,
    /// Interface names, string indices 4 to 11
    pub interfaces: [Option<&'static str>; INTERFACE_STRINGS],
}

/// Static device configuration
#[derive(Debug, Clone, Copy, Default)]
pub struct DeviceConfig {
    /// String descriptors
    pub strings: Strings,
    /// Fast configuration endpoint, `None` disables the fast path
    pub fast: Option<FastConfigInfo>,
    /// LSI bulk endpoints reported by the info request (out, in)
    pub lsi_endpoints: Option<(u8, u8)>,
}

/// Everything the handlers operate on
pub struct Peripherals<S, G, P> {
    flash: FlashProgrammer<S>,
    lsi: Lsi<G>,
    fpga: FpgaConfig<P>,
    strings: Strings,
    connected: bool,
    reset_request: Option<bool>,
    cleared_halt: Option<u8>,
}

impl<S, G, P> Peripherals<S, G, P> {
    /// Flash programmer
    pub fn flash_programmer(&self) -> &FlashProgrammer<S> {
        &self.flash
    }

    /// LSI master
    pub fn lsi_master(&self) -> &Lsi<G> {
        &self.lsi
    }

    /// Configuration session
    pub fn fpga_config(&self) -> &FpgaConfig<P> {
        &self.fpga
    }

    /// Endpoint of the last cleared halt
    pub fn cleared_halt(&self) -> Option<u8> {
        self.cleared_halt
    }
}

impl<S, G, P> ControlTarget for Peripherals<S, G, P> {
    fn string_descriptor(&self, index: u8) -> Option<&str> {
        match index {
            1 => self.strings.manufacturer,
            2 => self.strings.product,
            3 => self.strings.serial,
            4..=11 => self.strings.interfaces[(index - 4) as usize],
            _ => None,
        }
    }

    fn usb_connected(&self) -> bool {
        self.connected
    }

    fn clear_endpoint_halt(&mut self, endpoint: u8) {
        log::debug!("halt cleared on endpoint 0x{:02x}", endpoint);
        self.cleared_halt = Some(endpoint);
    }

    fn system_reset(&mut self, disable_flash_boot: bool) {
        log::info!(
            "system reset requested{}",
            if disable_flash_boot { ", flash boot disabled" } else { "" }
        );
        self.reset_request = Some(disable_flash_boot);
    }
}

impl<S: SpiBus, G, P> FlashAccess for Peripherals<S, G, P> {
    type Bus = S;
    fn flash(&mut self) -> &mut FlashProgrammer<S> {
        &mut self.flash
    }
}

impl<S, G: SignalDriver, P> LsiAccess for Peripherals<S, G, P> {
    type Io = G;
    fn lsi(&mut self) -> &mut Lsi<G> {
        &mut self.lsi
    }
}

impl<S, G, P: ConfigPort> FpgaAccess for Peripherals<S, G, P> {
    type Port = P;
    fn fpga(&mut self) -> &mut FpgaConfig<P> {
        &mut self.fpga
    }
}

/// The device side of the protocol
pub struct Device<S, G, P> {
    dispatcher: Dispatcher<Peripherals<S, G, P>>,
    peripherals: Peripherals<S, G, P>,
    ep0: Ep0Buffer,
}

impl<S: SpiBus, G: SignalDriver, P: ConfigPort> Device<S, G, P> {
    /// Bring up the peripherals and register all handlers.
    ///
    /// A missing or unsupported flash is not fatal; the flash requests then
    /// report the error to the host.
    pub fn new(config: DeviceConfig, spi: S, io: G, port: P) -> Result<Self, RegistryFull> {
        let mut flash = FlashProgrammer::new(spi);
        let _ = flash.probe();

        let mut lsi = Lsi::new(io);
        lsi.start();
        if let Some((out_ep, in_ep)) = config.lsi_endpoints {
            lsi.set_endpoints(out_ep, in_ep);
        }

        let mut dispatcher = Dispatcher::new();
        flash::register(&mut dispatcher)?;
        lsi::register(&mut dispatcher)?;
        fpga::register(&mut dispatcher, config.fast.is_some())?;
        log::debug!(
            "{} vendor requests, {} vendor commands registered",
            dispatcher.requests().len(),
            dispatcher.commands().len()
        );

        Ok(Self {
            dispatcher,
            peripherals: Peripherals {
                flash,
                lsi,
                fpga: FpgaConfig::new(port, config.fast),
                strings: config.strings,
                connected: false,
                reset_request: None,
                cleared_halt: None,
            },
            ep0: Ep0Buffer::new(),
        })
    }

    /// Handle a control transfer.
    ///
    /// `data` is the data stage of a host-to-device transfer. Returns the
    /// outcome and, for device-to-host transfers, the answer.
    pub fn handle_setup(&mut self, setup: &SetupPacket, data: &[u8]) -> (Outcome, &[u8]) {
        self.ep0.clear();
        if data.len() > EP0_BUFFER_SIZE {
            log::warn!("{} byte data stage does not fit EP0 buffer", data.len());
            return (Outcome::Failed(HandlerFault::OTHER), &[]);
        }
        // Length checked above
        let _ = self.ep0.extend_from_slice(data);

        let outcome = self
            .dispatcher
            .dispatch(&mut self.peripherals, setup, &mut self.ep0);
        let answer = if setup.request_type & 0x80 != 0 && outcome.acknowledged() {
            &self.ep0[..]
        } else {
            &[]
        };
        (outcome, answer)
    }

    /// Data received on the fast configuration endpoint
    pub fn fast_config_data(&mut self, data: &[u8]) -> Result<(), PortError> {
        self.peripherals.fpga.fast_data(data)
    }

    /// USB configuration state as set by the stack
    pub fn set_connected(&mut self, connected: bool) {
        self.peripherals.connected = connected;
    }

    /// Pending system reset; `Some(true)` means flash boot is disabled
    pub fn take_reset_request(&mut self) -> Option<bool> {
        self.peripherals.reset_request.take()
    }

    /// The dispatcher
    pub fn dispatcher(&self) -> &Dispatcher<Peripherals<S, G, P>> {
        &self.dispatcher
    }

    /// The peripherals
    pub fn peripherals(&self) -> &Peripherals<S, G, P> {
        &self.peripherals
    }

    /// The peripherals, mutably
    pub fn peripherals_mut(&mut self) -> &mut Peripherals<S, G, P> {
        &mut self.peripherals
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::flash::BusError;
    use crate::fpga::ConfigMode;
    use crate::lsi::Line;
    use fpgaconf_core::protocol::{Command, ConfigStatus, FlashInfo, Request};

    /// A bus without a flash behind it
    struct NoFlash;

    impl SpiBus for NoFlash {
        fn select(&mut self) {}
        fn deselect(&mut self) {}
        fn transmit(&mut self, _: &[u8]) -> Result<(), BusError> {
            Ok(())
        }
        fn receive(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
            buf.fill(0xff);
            Ok(())
        }
        fn sleep_ms(&mut self, _: u32) {}
    }

    #[derive(Default)]
    struct Pins {
        gpio: [bool; 4],
    }

    impl SignalDriver for Pins {
        fn set(&mut self, line: Line, high: bool) {
            if let Line::Gpio(n) = line {
                self.gpio[n as usize] = high;
            }
        }
        fn get(&self, line: Line) -> bool {
            match line {
                Line::Gpio(n) => self.gpio[n as usize],
                _ => true,
            }
        }
        fn sleep_ms(&mut self, _: u32) {}
    }

    #[derive(Default)]
    struct Port {
        bytes: usize,
    }

    impl ConfigPort for Port {
        fn reset(&mut self) {
            self.bytes = 0;
        }
        fn start(&mut self, _: ConfigMode) -> Result<(), PortError> {
            Ok(())
        }
        fn send(&mut self, data: &[u8]) -> Result<(), PortError> {
            self.bytes += data.len();
            Ok(())
        }
        fn stop(&mut self) {}
        fn init_b(&self) -> bool {
            true
        }
        fn done(&self) -> bool {
            self.bytes > 0
        }
        fn sleep_ms(&mut self, _: u32) {}
    }

    fn device(fast: bool) -> Device<NoFlash, Pins, Port> {
        let config = DeviceConfig {
            strings: Strings {
                manufacturer: Some("ACME"),
                interfaces: [Some("fpga"), None, None, None, None, None, None, None],
                ..Default::default()
            },
            fast: fast.then_some(FastConfigInfo {
                endpoint: 0x04,
                interface: 1,
            }),
            lsi_endpoints: None,
        };
        Device::new(config, NoFlash, Pins::default(), Port::default()).unwrap()
    }

    #[test]
    fn test_missing_flash_reported() {
        let mut dev = device(false);
        let setup = SetupPacket::vendor_request(Request::FlashInfo.code(), 0, 0, 8);
        let (outcome, answer) = dev.handle_setup(&setup, &[]);
        assert_eq!(outcome, Outcome::Accepted);
        let info = FlashInfo::parse(answer).unwrap();
        assert!(!info.enabled);
        assert_eq!(info.error, 7);
    }

    #[test]
    fn test_fast_handlers_only_with_endpoint() {
        let dev = device(false);
        assert!(dev
            .dispatcher()
            .commands()
            .lookup(Command::FastConfigStart.code())
            .is_none());
        let dev = device(true);
        assert!(dev
            .dispatcher()
            .commands()
            .lookup(Command::FastConfigStart.code())
            .is_some());
    }

    #[test]
    fn test_ep0_configuration() {
        let mut dev = device(false);
        let cmd = SetupPacket::vendor_command(Command::ConfigSend.code(), 0, 0, 100);
        let (outcome, answer) = dev.handle_setup(&cmd, &[0x11; 100]);
        assert_eq!(outcome, Outcome::Accepted);
        assert!(answer.is_empty());

        let req = SetupPacket::vendor_request(Request::ConfigStatus.code(), 0, 0, 16);
        let (_, answer) = dev.handle_setup(&req, &[]);
        let status = ConfigStatus::parse(answer).unwrap();
        assert!(status.configured);
        assert_eq!(status.bytes, 100);
        assert_eq!(status.checksum, (0x11u32 * 100) as u8);
    }

    #[test]
    fn test_fast_data_needs_session() {
        let mut dev = device(true);
        assert_eq!(dev.fast_config_data(&[1, 2, 3]), Err(PortError));
        let cmd = SetupPacket::vendor_command(Command::FastConfigStart.code(), 0, 0, 0);
        assert_eq!(dev.handle_setup(&cmd, &[]).0, Outcome::Accepted);
        assert_eq!(dev.fast_config_data(&[1, 2, 3]), Ok(()));
    }

    #[test]
    fn test_oversized_data_stage() {
        let mut dev = device(false);
        let data = std::vec![0u8; EP0_BUFFER_SIZE + 1];
        let cmd = SetupPacket::vendor_command(Command::ConfigSend.code(), 0, 0, 0);
        let (outcome, _) = dev.handle_setup(&cmd, &data);
        assert_eq!(outcome, Outcome::Failed(HandlerFault::OTHER));
    }

    #[test]
    fn test_system_reset_request() {
        let mut dev = device(false);
        assert_eq!(dev.take_reset_request(), None);
        let cmd = SetupPacket::vendor_command(Command::SystemReset.code(), 1, 0, 0);
        assert_eq!(dev.handle_setup(&cmd, &[]).0, Outcome::Accepted);
        assert_eq!(dev.take_reset_request(), Some(false));
        assert_eq!(dev.take_reset_request(), None);
    }

    #[test]
    fn test_interface_string() {
        let mut dev = device(false);
        let setup = SetupPacket {
            request_type: 0x80,
            request: 0x06,
            value: 0x0304,
            index: 0,
            length: 64,
        };
        let (_, answer) = dev.handle_setup(&setup, &[]);
        assert_eq!(answer, &[10, 3, b'f', 0, b'p', 0, b'g', 0, b'a', 0]);
    }
}
