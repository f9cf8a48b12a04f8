//! Sector-level access to the configuration flash
//!
//! Flash data moves in 2048-byte control transfers. A sector write is a
//! sequence of flash write commands whose phase is carried in the index:
//! the first erases the sector, the last closes the final page program.

use std::time::Duration;

use fpgaconf_core::protocol::{
    Command, FlashDiagnostics, FlashError, FlashInfo, FlashPhase, Request, FLASH_TRANSFER_SIZE,
};

use crate::error::{Error, Result, TransportError};
use crate::progress::FlashProgress;
use crate::transport::{command, request, Transport, CONTROL_TIMEOUT};

/// Timeout of the first transfers of a sector, which wait for the erase
pub const ERASE_TIMEOUT: Duration = Duration::from_millis(12000);
/// Timeout of the remaining write transfers
pub const WRITE_TIMEOUT: Duration = Duration::from_millis(3000);
/// Number of transfers per sector that get [`ERASE_TIMEOUT`]
pub const ERASE_TRANSFERS: usize = 3;

/// Query flash geometry and the last error code
pub fn flash_info<T: Transport + ?Sized>(t: &mut T) -> Result<FlashInfo> {
    let buf = request(
        t,
        Request::FlashInfo,
        0,
        0,
        FlashInfo::LEN as u16,
        CONTROL_TIMEOUT,
    )?;
    Ok(FlashInfo::parse(&buf)?)
}

/// Query flash identification and the last command
pub fn flash_diagnostics<T: Transport + ?Sized>(t: &mut T) -> Result<FlashDiagnostics> {
    let buf = request(
        t,
        Request::FlashDiagnostics,
        0,
        0,
        FlashDiagnostics::LEN as u16,
        CONTROL_TIMEOUT,
    )?;
    Ok(FlashDiagnostics::parse(&buf)?)
}

fn device_error(code: u8) -> FlashError {
    FlashError::from_code(code).unwrap_or(FlashError::Runtime)
}

/// Flash client for one device
pub struct FlashClient<'a, T: ?Sized> {
    transport: &'a mut T,
    info: FlashInfo,
}

impl<'a, T: Transport + ?Sized> FlashClient<'a, T> {
    /// Query the flash and fail if the device has none
    pub fn open(transport: &'a mut T) -> Result<Self> {
        let info = flash_info(&mut *transport)?;
        if !info.enabled {
            return Err(Error::Flash(device_error(info.error)));
        }
        log::info!(
            "flash: {} sectors of {} KiB",
            info.sectors,
            info.sector_size / 1024
        );
        Ok(Self { transport, info })
    }

    /// Geometry as reported when the client was opened
    pub fn info(&self) -> FlashInfo {
        self.info
    }

    /// Identification and last command
    pub fn diagnostics(&mut self) -> Result<FlashDiagnostics> {
        flash_diagnostics(&mut *self.transport)
    }

    fn check_range(&self, first: u32, count: u32) -> Result<()> {
        let end = first as u64 + count as u64;
        if end > self.info.sectors as u64 || end > u16::MAX as u64 + 1 {
            return Err(Error::InvalidParameter(format!(
                "sectors {}..{} out of range, flash has {}",
                first, end, self.info.sectors
            )));
        }
        Ok(())
    }

    /// Turn a failed transfer into the flash error the device recorded, if any
    fn failure(&mut self, e: TransportError) -> Error {
        match flash_info(&mut *self.transport) {
            Ok(info) if info.error != 0 => Error::Flash(device_error(info.error)),
            _ => e.into(),
        }
    }

    /// Read the start of `sector` into `buf`
    pub fn read_sector(&mut self, sector: u32, buf: &mut [u8]) -> Result<()> {
        self.check_range(sector, 1)?;
        if buf.len() > self.info.sector_size as usize {
            return Err(Error::InvalidParameter(format!(
                "{} bytes do not fit a sector",
                buf.len()
            )));
        }
        for (i, piece) in buf.chunks_mut(FLASH_TRANSFER_SIZE).enumerate() {
            let phase = if i == 0 {
                FlashPhase::Start
            } else {
                FlashPhase::Continue
            };
            let data = request(
                &mut *self.transport,
                Request::FlashRead,
                sector as u16,
                phase.index(),
                piece.len() as u16,
                CONTROL_TIMEOUT,
            )
            .map_err(|e| self.failure(e))?;
            if data.len() != piece.len() {
                return Err(TransportError::Short {
                    expected: piece.len(),
                    actual: data.len(),
                }
                .into());
            }
            piece.copy_from_slice(&data);
        }
        Ok(())
    }

    /// Read `count` whole sectors starting at `first`
    pub fn read(
        &mut self,
        first: u32,
        count: u32,
        progress: &mut dyn FlashProgress,
    ) -> Result<Vec<u8>> {
        self.check_range(first, count)?;
        let size = self.info.sector_size as usize;
        let mut out = vec![0u8; size * count as usize];
        progress.start(out.len());
        for (i, buf) in out.chunks_mut(size).enumerate() {
            let sector = first + i as u32;
            progress.sector(sector);
            self.read_sector(sector, buf)?;
            progress.advance(buf.len());
        }
        progress.complete();
        Ok(out)
    }

    /// Erase `sector` and program `data` from its start
    pub fn write_sector(&mut self, sector: u32, data: &[u8]) -> Result<()> {
        self.check_range(sector, 1)?;
        if data.len() > self.info.sector_size as usize {
            return Err(Error::InvalidParameter(format!(
                "{} bytes do not fit a sector",
                data.len()
            )));
        }
        log::debug!("writing {} bytes to sector {}", data.len(), sector);

        let mut pieces: Vec<&[u8]> = data.chunks(FLASH_TRANSFER_SIZE).collect();
        if pieces.is_empty() {
            pieces.push(&[]);
        }
        let count = pieces.len();
        for (i, piece) in pieces.into_iter().enumerate() {
            let phase = FlashPhase::for_write(i, count);
            let timeout = if i < ERASE_TRANSFERS {
                ERASE_TIMEOUT
            } else {
                WRITE_TIMEOUT
            };
            if let Err(e) = command(
                &mut *self.transport,
                Command::FlashWrite,
                sector as u16,
                phase.index(),
                piece,
                timeout,
            ) {
                let err = self.failure(e);
                self.abandon(sector);
                return Err(err);
            }
        }
        // A single transfer was the erase; the session still has to be closed
        if count == 1 {
            command(
                &mut *self.transport,
                Command::FlashWrite,
                sector as u16,
                FlashPhase::Finish.index(),
                &[],
                ERASE_TIMEOUT,
            )
            .map_err(|e| self.failure(e))?;
        }

        let info = flash_info(&mut *self.transport)?;
        if info.error != 0 {
            return Err(Error::Flash(device_error(info.error)));
        }
        Ok(())
    }

    /// Close a session left open by a failed write
    fn abandon(&mut self, sector: u32) {
        let r = command(
            &mut *self.transport,
            Command::FlashWrite,
            sector as u16,
            FlashPhase::Finish.index(),
            &[],
            CONTROL_TIMEOUT,
        );
        if let Err(e) = r {
            log::warn!("unable to close flash write session: {}", e);
        }
    }

    /// Write `data` to consecutive sectors starting at `first`; the last
    /// sector is padded with 0xff
    pub fn write(
        &mut self,
        first: u32,
        data: &[u8],
        progress: &mut dyn FlashProgress,
    ) -> Result<()> {
        let size = self.info.sector_size as usize;
        let count = data.len().div_ceil(size);
        self.check_range(first, count as u32)?;
        progress.start(count * size);
        let mut padded = Vec::with_capacity(size);
        for (i, chunk) in data.chunks(size).enumerate() {
            let sector = first + i as u32;
            progress.sector(sector);
            padded.clear();
            padded.extend_from_slice(chunk);
            padded.resize(size, 0xff);
            self.write_sector(sector, &padded)?;
            progress.advance(size);
        }
        progress.complete();
        Ok(())
    }
}
