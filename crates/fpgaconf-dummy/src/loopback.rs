//! Host transport wired straight into an emulated device
//!
//! Setup packets go to the firmware dispatcher; a stall is reported for
//! everything the device does not acknowledge. Faults can be injected per
//! request code to exercise the retry logic.

use std::collections::{HashMap, VecDeque};
use std::time::Duration;

use fpgaconf_firmware::flash::SpiBus;
use fpgaconf_firmware::fpga::ConfigPort;
use fpgaconf_firmware::lsi::SignalDriver;
use fpgaconf_firmware::{Device, SetupPacket};
use fpgaconf_host::{Transport, TransportError};

/// Pseudo request code for faults on bulk transfers
pub const BULK: u8 = 0xff;

/// Loopback transport around a firmware device
pub struct Loopback<S, G, P> {
    device: Device<S, G, P>,
    claimed: Vec<u8>,
    faults: HashMap<u8, VecDeque<TransportError>>,
    log: Vec<u8>,
}

impl<S: SpiBus, G: SignalDriver, P: ConfigPort> Loopback<S, G, P> {
    /// Wrap `device`; it is marked connected
    pub fn new(mut device: Device<S, G, P>) -> Self {
        device.set_connected(true);
        Self {
            device,
            claimed: Vec::new(),
            faults: HashMap::new(),
            log: Vec::new(),
        }
    }

    /// Make the next transfer with `code` fail with `error` without
    /// reaching the device; use [`BULK`] for bulk transfers
    pub fn inject(&mut self, code: u8, error: TransportError) {
        self.faults.entry(code).or_default().push_back(error);
    }

    /// Request codes of all transfers, in order
    pub fn transfers(&self) -> &[u8] {
        &self.log
    }

    /// Number of transfers with `code`
    pub fn count(&self, code: u8) -> usize {
        self.log.iter().filter(|&&c| c == code).count()
    }

    /// Interfaces currently claimed
    pub fn claimed(&self) -> &[u8] {
        &self.claimed
    }

    /// The emulated device
    pub fn device(&self) -> &Device<S, G, P> {
        &self.device
    }

    /// The emulated device, mutably
    pub fn device_mut(&mut self) -> &mut Device<S, G, P> {
        &mut self.device
    }

    fn fault(&mut self, code: u8) -> Result<(), TransportError> {
        self.log.push(code);
        match self.faults.get_mut(&code).and_then(VecDeque::pop_front) {
            Some(e) => Err(e),
            None => Ok(()),
        }
    }
}

impl<S: SpiBus, G: SignalDriver, P: ConfigPort> Transport for Loopback<S, G, P> {
    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
        _: Duration,
    ) -> Result<Vec<u8>, TransportError> {
        self.fault(request)?;
        let setup = SetupPacket::vendor_request(request, value, index, length);
        let (outcome, answer) = self.device.handle_setup(&setup, &[]);
        if !outcome.acknowledged() {
            log::debug!("loopback: request 0x{:02x} stalled ({:?})", request, outcome);
            return Err(TransportError::Stall);
        }
        Ok(answer.to_vec())
    }

    fn control_out(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        _: Duration,
    ) -> Result<usize, TransportError> {
        self.fault(request)?;
        let length = u16::try_from(data.len()).map_err(|_| TransportError::Stall)?;
        let setup = SetupPacket::vendor_command(request, value, index, length);
        let (outcome, _) = self.device.handle_setup(&setup, data);
        if !outcome.acknowledged() {
            log::debug!("loopback: command 0x{:02x} stalled ({:?})", request, outcome);
            return Err(TransportError::Stall);
        }
        Ok(data.len())
    }

    fn bulk_out(
        &mut self,
        endpoint: u8,
        data: &[u8],
        _: Duration,
    ) -> Result<usize, TransportError> {
        self.fault(BULK)?;
        let info = self
            .device
            .peripherals()
            .fpga_config()
            .fast_info()
            .filter(|i| i.endpoint() == Some(endpoint & 0x7f))
            .ok_or_else(|| TransportError::Other(format!("no endpoint 0x{:02x}", endpoint)))?;
        if !self.claimed.contains(&info.interface) {
            return Err(TransportError::Other(format!(
                "interface {} not claimed",
                info.interface
            )));
        }
        self.device
            .fast_config_data(data)
            .map_err(|_| TransportError::Stall)?;
        Ok(data.len())
    }

    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError> {
        if !self.claimed.contains(&interface) {
            self.claimed.push(interface);
        }
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) {
        self.claimed.retain(|&i| i != interface);
    }
}
