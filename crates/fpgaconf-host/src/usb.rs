//! USB transport backed by nusb

use std::time::Duration;

use nusb::transfer::{Buffer, Bulk, ControlIn, ControlOut, ControlType, Out, Recipient};
use nusb::{Device, Endpoint, Interface, MaybeFuture};

use crate::error::{Error, Result, TransportError};
use crate::transport::Transport;

/// Default USB vendor ID
pub const DEFAULT_VID: u16 = 0x221a;
/// Default USB product ID
pub const DEFAULT_PID: u16 = 0x0100;

/// Interface used for control transfers
const CONTROL_INTERFACE: u8 = 0;

/// An opened device
pub struct UsbTransport {
    device: Device,
    control: Interface,
    claimed: Vec<(u8, Interface)>,
}

impl UsbTransport {
    /// Open the first device with the given IDs
    pub fn open(vid: u16, pid: u16) -> Result<Self> {
        let info = nusb::list_devices()
            .wait()?
            .find(|d| d.vendor_id() == vid && d.product_id() == pid)
            .ok_or_else(|| Error::Usb(format!("no device {:04x}:{:04x} found", vid, pid)))?;

        log::info!(
            "opening {:04x}:{:04x} on bus {} address {}",
            vid,
            pid,
            info.bus_id(),
            info.device_address()
        );
        let device = info.open().wait()?;
        let control = device.claim_interface(CONTROL_INTERFACE).wait()?;
        Ok(Self {
            device,
            control,
            claimed: Vec::new(),
        })
    }

    /// The underlying device
    pub fn device(&self) -> &Device {
        &self.device
    }

    fn bulk_endpoint(&self, endpoint: u8) -> std::result::Result<Endpoint<Bulk, Out>, TransportError> {
        let address = endpoint & 0x7f;
        self.claimed
            .iter()
            .map(|(_, i)| i)
            .chain(std::iter::once(&self.control))
            .find_map(|i| i.endpoint::<Bulk, Out>(address).ok())
            .ok_or_else(|| {
                TransportError::Other(format!("endpoint 0x{:02x} not available", address))
            })
    }
}

impl Transport for UsbTransport {
    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
        timeout: Duration,
    ) -> std::result::Result<Vec<u8>, TransportError> {
        let data = self
            .control
            .control_in(
                ControlIn {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    length,
                },
                timeout,
            )
            .wait()?;
        log::trace!("VR 0x{:02x}: {} bytes", request, data.len());
        Ok(data)
    }

    fn control_out(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransportError> {
        self.control
            .control_out(
                ControlOut {
                    control_type: ControlType::Vendor,
                    recipient: Recipient::Device,
                    request,
                    value,
                    index,
                    data,
                },
                timeout,
            )
            .wait()?;
        log::trace!("VC 0x{:02x}: {} bytes", request, data.len());
        Ok(data.len())
    }

    fn bulk_out(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> std::result::Result<usize, TransportError> {
        let mut ep = self.bulk_endpoint(endpoint)?;
        let mut buf = Buffer::new(data.len());
        buf.extend_from_slice(data);
        let completion = ep.transfer_blocking(buf, timeout);
        match completion.status {
            Ok(()) => Ok(completion.actual_len),
            // Keep what made it; the caller continues from there
            Err(e) if completion.actual_len > 0 => {
                log::debug!(
                    "bulk transfer stopped after {} bytes: {}",
                    completion.actual_len,
                    e
                );
                Ok(completion.actual_len)
            }
            Err(e) => Err(e.into()),
        }
    }

    fn claim_interface(&mut self, interface: u8) -> std::result::Result<(), TransportError> {
        if interface == CONTROL_INTERFACE || self.claimed.iter().any(|(n, _)| *n == interface) {
            return Ok(());
        }
        let i = self
            .device
            .claim_interface(interface)
            .wait()
            .map_err(|e| TransportError::Other(e.to_string()))?;
        log::debug!("claimed interface {}", interface);
        self.claimed.push((interface, i));
        Ok(())
    }

    fn release_interface(&mut self, interface: u8) {
        self.claimed.retain(|(n, _)| *n != interface);
    }
}

/// Parse a `VID:PID` pair of hex numbers
pub fn parse_vid_pid(s: &str) -> Result<(u16, u16)> {
    let (vid, pid) = s
        .split_once(':')
        .ok_or_else(|| Error::InvalidParameter(format!("expected VID:PID, got {}", s)))?;
    let parse = |v: &str| {
        u16::from_str_radix(v.trim_start_matches("0x"), 16)
            .map_err(|_| Error::InvalidParameter(format!("invalid USB ID: {}", v)))
    };
    Ok((parse(vid)?, parse(pid)?))
}
