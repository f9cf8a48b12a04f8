//! Device status and capability queries

use fpgaconf_core::protocol::{Command, ConfigStatus, FastConfigInfo, LsiInfo, Request};

use crate::error::{Error, Result, TransportError};
use crate::transport::{command, request, Transport, CONTROL_TIMEOUT};

/// Bytes requested for the configuration status
pub const STATUS_LENGTH: u16 = 16;
/// Bytes requested for capability queries
pub const INFO_LENGTH: u16 = 128;

/// Read the configuration status
pub fn config_status<T: Transport + ?Sized>(t: &mut T) -> Result<ConfigStatus> {
    let buf = request(t, Request::ConfigStatus, 0, 0, STATUS_LENGTH, CONTROL_TIMEOUT)
        .map_err(Error::ConfigStatusUnavailable)?;
    ConfigStatus::parse(&buf)
        .map_err(|_| Error::InvalidResponse("empty configuration status".into()))
}

/// Bulk endpoint for fast configuration, `None` if the device has none
pub fn fast_config_info<T: Transport + ?Sized>(t: &mut T) -> Option<FastConfigInfo> {
    match request(t, Request::FastConfigInfo, 0, 0, INFO_LENGTH, CONTROL_TIMEOUT) {
        Ok(buf) => {
            let info = FastConfigInfo::parse(&buf);
            if info.endpoint().is_some() {
                log::debug!(
                    "fast configuration on endpoint {}, interface {}",
                    info.endpoint,
                    info.interface
                );
                Some(info)
            } else {
                None
            }
        }
        Err(e) => {
            log::debug!("no fast configuration: {}", e);
            None
        }
    }
}

/// LSI description, `None` if the device has no LSI
pub fn lsi_info<T: Transport + ?Sized>(t: &mut T) -> Result<Option<LsiInfo>> {
    match request(t, Request::LsiInfo, 0, 0, INFO_LENGTH, CONTROL_TIMEOUT) {
        Ok(buf) => Ok(LsiInfo::parse(&buf)),
        Err(TransportError::Stall) => Ok(None),
        Err(e) => Err(e.into()),
    }
}

/// Reset the device; unless `flash_boot` is set it will not configure the
/// FPGA from flash on the way up
pub fn system_reset<T: Transport + ?Sized>(t: &mut T, flash_boot: bool) -> Result<()> {
    log::info!("resetting device");
    command(t, Command::SystemReset, flash_boot as u16, 0, &[], CONTROL_TIMEOUT)?;
    Ok(())
}
