//! SPI flash programmer
//!
//! Drives the configuration flash through the device's SPI master. Writes
//! are organized in sessions covering one 64 KiB sector: [`FlashProgrammer::write_start`]
//! erases the sector, any number of [`FlashProgrammer::write`] calls stream
//! data into it page by page and [`FlashProgrammer::write_finish`] closes the
//! last program command.
//!
//! A page program stays open between `write` calls so data arriving in
//! several pieces still lands in a single program command. It is only closed
//! when a page boundary is reached or the session is finished. While it is
//! open the chip select is asserted and any other flash operation fails with
//! [`FlashError::Busy`].

use bitflags::bitflags;
use fpgaconf_core::protocol::{
    Command, FlashDiagnostics, FlashError, FlashInfo, FlashPhase, Request,
};

use crate::dispatch::{Dispatcher, Ep0Buffer, HandlerFault, RegistryFull, SetupPacket};

/// Program page size
pub const PAGE_SIZE: u32 = 256;
/// Erase granularity; smaller erase blocks are too slow to be useful
pub const SECTOR_SIZE: u32 = 65536;
/// Status poll budget in milliseconds
pub const WAIT_READY_MS: u32 = 11000;

/// SPI flash opcodes used by the programmer
pub mod opcodes {
    /// Write enable
    pub const WREN: u8 = 0x06;
    /// Read status register
    pub const RDSR: u8 = 0x05;
    /// Fast read (one dummy byte)
    pub const FAST_READ: u8 = 0x0B;
    /// Page program
    pub const PP: u8 = 0x02;
    /// 64 KiB block erase
    pub const BE_64K: u8 = 0xD8;
    /// JEDEC ID
    pub const RDID: u8 = 0x9F;
    /// Legacy manufacturer/device ID
    pub const REMS: u8 = 0x90;
}

bitflags! {
    /// Status register bits
    #[derive(Debug, Clone, Copy, PartialEq, Eq)]
    pub struct Status: u8 {
        /// Write in progress
        const WIP = 0x01;
        /// Write enable latch
        const WEL = 0x02;
    }
}

/// SPI bus failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct BusError;

/// SPI master with software-controlled chip select
pub trait SpiBus {
    /// Assert chip select
    fn select(&mut self);
    /// Release chip select
    fn deselect(&mut self);
    /// Clock out `data`
    fn transmit(&mut self, data: &[u8]) -> Result<(), BusError>;
    /// Clock in `buf.len()` bytes
    fn receive(&mut self, buf: &mut [u8]) -> Result<(), BusError>;
    /// Sleep for `ms` milliseconds
    fn sleep_ms(&mut self, ms: u32);
}

/// Programmer state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashState {
    /// No write session
    Idle,
    /// Sector erase command issued
    Erasing,
    /// Session open, next write has to start a page program
    ProgramPending,
    /// Page program open, chip select asserted
    Programming,
    /// Polling the status register
    WaitReady,
}

/// Flash programmer state machine
pub struct FlashProgrammer<S> {
    bus: S,
    state: FlashState,
    enabled: bool,
    sectors: u32,
    error: u8,
    vendor: u8,
    device: u8,
    memtype: u8,
    last_cmd: u8,
    scratch: [u8; 4],
    read_addr: u32,
    write_addr: u32,
    session_end: u32,
    programs: u32,
}

impl<S: SpiBus> FlashProgrammer<S> {
    /// Create a programmer; the flash is unusable until [`probe`](Self::probe)
    pub fn new(bus: S) -> Self {
        Self {
            bus,
            state: FlashState::Idle,
            enabled: false,
            sectors: 0,
            error: FlashError::NotSupported.code(),
            vendor: 0,
            device: 0,
            memtype: 0,
            last_cmd: 0,
            scratch: [0; 4],
            read_addr: 0,
            write_addr: 0,
            session_end: 0,
            programs: 0,
        }
    }

    /// Identify the flash and enable it if the capacity is supported
    pub fn probe(&mut self) -> Result<(), FlashError> {
        self.enabled = false;
        self.state = FlashState::Idle;
        let r = self.identify();
        self.bus.deselect();
        match r {
            Ok(()) => {
                log::info!(
                    "found {} Mbit SPI flash (vendor 0x{:02x}, type 0x{:02x})",
                    self.sectors >> 1,
                    self.vendor,
                    self.memtype
                );
                Ok(())
            }
            Err(e) => {
                log::warn!("no usable SPI flash: {}", e);
                self.error = e.code();
                Err(e)
            }
        }
    }

    fn identify(&mut self) -> Result<(), FlashError> {
        // Not every chip implements the legacy ID command
        self.bus.select();
        self.command(&[opcodes::REMS, 0, 0, 0])?;
        let mut id = [0u8; 2];
        self.device = match self.bus.receive(&mut id) {
            Ok(()) => id[1],
            Err(BusError) => 127,
        };
        self.bus.deselect();

        let mut jedec = [0u8; 3];
        self.bus.select();
        self.command(&[opcodes::RDID])?;
        self.bus.receive(&mut jedec).map_err(|_| FlashError::Runtime)?;
        self.bus.deselect();
        self.scratch[..3].copy_from_slice(&jedec);

        let capacity = jedec[2];
        if !(16..=24).contains(&capacity) {
            log::warn!("invalid flash capacity code {}", capacity);
            return Err(FlashError::NotSupported);
        }
        self.vendor = jedec[0];
        self.memtype = jedec[1];
        self.sectors = 1 << (capacity - 16);
        self.error = 0;
        self.enabled = true;
        Ok(())
    }

    fn command(&mut self, cmd: &[u8]) -> Result<(), FlashError> {
        self.last_cmd = cmd[0];
        let n = cmd.len().min(4);
        self.scratch[..n].copy_from_slice(&cmd[..n]);
        self.bus.transmit(cmd).map_err(|_| FlashError::Runtime)
    }

    fn fail(&mut self, e: FlashError) -> FlashError {
        if e == FlashError::Runtime {
            self.bus.deselect();
            self.state = FlashState::Idle;
        }
        self.error = e.code();
        e
    }

    /// Wait until the flash is not busy.
    ///
    /// Fails immediately with [`FlashError::Busy`] while a page program is
    /// open and with [`FlashError::NotSupported`] if no flash was found.
    pub fn wait_ready(&mut self) -> Result<(), FlashError> {
        if self.state == FlashState::Programming {
            self.error = FlashError::Busy.code();
            return Err(FlashError::Busy);
        }
        if !self.enabled {
            self.error = FlashError::NotSupported.code();
            return Err(FlashError::NotSupported);
        }
        let prev = self.state;
        self.state = FlashState::WaitReady;
        let r = self.poll_status();
        self.bus.deselect();
        match r {
            Ok(()) => {
                self.state = prev;
                self.error = 0;
                Ok(())
            }
            Err(e) => {
                self.state = if e == FlashError::Timeout { prev } else { FlashState::Idle };
                self.error = e.code();
                Err(e)
            }
        }
    }

    fn poll_status(&mut self) -> Result<(), FlashError> {
        self.bus.select();
        self.command(&[opcodes::RDSR])?;
        let mut sr = [0u8; 1];
        for _ in 0..WAIT_READY_MS {
            self.bus.receive(&mut sr).map_err(|_| FlashError::Runtime)?;
            if !Status::from_bits_truncate(sr[0]).contains(Status::WIP) {
                return Ok(());
            }
            self.bus.sleep_ms(1);
        }
        log::warn!("flash still busy after {} ms", WAIT_READY_MS);
        Err(FlashError::Timeout)
    }

    /// Read `buf.len()` bytes starting at `addr`
    pub fn read(&mut self, addr: u32, buf: &mut [u8]) -> Result<(), FlashError> {
        self.wait_ready()?;
        self.bus.select();
        let r = self
            .command(&[
                opcodes::FAST_READ,
                (addr >> 16) as u8,
                (addr >> 8) as u8,
                addr as u8,
                0,
            ])
            .and_then(|()| self.bus.receive(buf).map_err(|_| FlashError::Runtime));
        self.bus.deselect();
        r.map_err(|e| self.fail(e))
    }

    /// Erase `sector` and open a write session at its first byte
    pub fn write_start(&mut self, sector: u16) -> Result<(), FlashError> {
        self.wait_ready()?;
        if sector as u32 >= self.sectors {
            log::warn!("sector {} out of range ({} sectors)", sector, self.sectors);
            return Err(self.fail(FlashError::Runtime));
        }
        log::debug!("erasing sector {}", sector);

        self.bus.select();
        let r = self.command(&[opcodes::WREN]);
        self.bus.deselect();
        r.map_err(|e| self.fail(e))?;

        self.state = FlashState::Erasing;
        self.bus.select();
        let r = self.command(&[opcodes::BE_64K, sector as u8, 0, 0]);
        self.bus.deselect();
        r.map_err(|e| self.fail(e))?;

        self.write_addr = (sector as u32) << 16;
        self.session_end = self.write_addr + SECTOR_SIZE;
        self.state = FlashState::ProgramPending;
        Ok(())
    }

    /// Close any open page program and start a new one at the write cursor
    fn page_program(&mut self) -> Result<(), FlashError> {
        self.bus.deselect();
        self.state = FlashState::ProgramPending;
        self.wait_ready()?;

        self.bus.select();
        let r = self.command(&[opcodes::WREN]);
        self.bus.deselect();
        r.map_err(|e| self.fail(e))?;

        let a = self.write_addr;
        self.bus.select();
        self.command(&[opcodes::PP, (a >> 16) as u8, (a >> 8) as u8, a as u8])
            .map_err(|e| self.fail(e))?;
        self.programs += 1;
        self.state = FlashState::Programming;
        Ok(())
    }

    /// Stream `data` into the open session
    pub fn write(&mut self, mut data: &[u8]) -> Result<(), FlashError> {
        if data.is_empty() {
            return Ok(());
        }
        match self.state {
            FlashState::ProgramPending | FlashState::Programming => {}
            _ => {
                log::warn!("flash write without erase");
                return Err(self.fail(FlashError::Runtime));
            }
        }
        if self.write_addr as u64 + data.len() as u64 > self.session_end as u64 {
            log::warn!("flash write past the end of the erased sector");
            return Err(self.fail(FlashError::Runtime));
        }

        while !data.is_empty() {
            if self.state == FlashState::ProgramPending {
                self.page_program()?;
            }
            let room = (PAGE_SIZE - (self.write_addr & (PAGE_SIZE - 1))) as usize;
            let n = room.min(data.len());
            self.bus
                .transmit(&data[..n])
                .map_err(|_| self.fail(FlashError::Runtime))?;
            self.write_addr += n as u32;
            data = &data[n..];

            if self.write_addr & (PAGE_SIZE - 1) == 0 {
                self.bus.deselect();
                self.state = FlashState::ProgramPending;
            }
        }
        Ok(())
    }

    /// Close the session.
    ///
    /// Also the way out of a session the host abandoned: an empty final-phase
    /// write ends up here.
    pub fn write_finish(&mut self) {
        if self.state == FlashState::Programming {
            self.bus.deselect();
        }
        if matches!(
            self.state,
            FlashState::Programming | FlashState::ProgramPending
        ) {
            self.state = FlashState::Idle;
        }
    }

    /// Current state
    pub fn state(&self) -> FlashState {
        self.state
    }

    /// Next byte address a write goes to
    pub fn write_addr(&self) -> u32 {
        self.write_addr
    }

    /// Number of page program commands issued
    pub fn page_programs(&self) -> u32 {
        self.programs
    }

    /// Geometry and error code as reported to the host
    pub fn info(&mut self) -> FlashInfo {
        if self.error == 0 && self.state == FlashState::Programming {
            self.error = FlashError::Busy.code();
        }
        FlashInfo {
            enabled: self.enabled,
            sector_size: if self.enabled { SECTOR_SIZE } else { 0 },
            sectors: self.sectors,
            error: self.error,
        }
    }

    /// Identification and last command
    pub fn diagnostics(&self) -> FlashDiagnostics {
        FlashDiagnostics {
            error: self.error,
            vendor: self.vendor,
            device: self.device,
            memtype: self.memtype,
            erase_cmd: if self.enabled { opcodes::BE_64K } else { 0 },
            last_cmd: self.last_cmd,
            scratch: self.scratch,
        }
    }

    /// The underlying bus
    pub fn bus(&self) -> &S {
        &self.bus
    }

    /// The underlying bus, mutably
    pub fn bus_mut(&mut self) -> &mut S {
        &mut self.bus
    }
}

/// Access to the flash programmer inside a device context
pub trait FlashAccess {
    /// SPI bus of the flash
    type Bus: SpiBus;
    /// The programmer
    fn flash(&mut self) -> &mut FlashProgrammer<Self::Bus>;
}

impl From<FlashError> for HandlerFault {
    fn from(_: FlashError) -> Self {
        HandlerFault::OTHER
    }
}

fn answer(buf: &mut Ep0Buffer, data: &[u8]) -> Result<(), HandlerFault> {
    buf.extend_from_slice(data).map_err(|_| HandlerFault::OTHER)
}

/// Flash info request
pub fn flash_info<T: FlashAccess>(
    ctx: &mut T,
    _: &SetupPacket,
    buf: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    let info = ctx.flash().info();
    answer(buf, &info.to_bytes())
}

/// Flash read request
pub fn flash_read<T: FlashAccess>(
    ctx: &mut T,
    setup: &SetupPacket,
    buf: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    let flash = ctx.flash();
    if FlashPhase::raw_from_index(setup.index) == FlashPhase::Start as u8 {
        flash.read_addr = (setup.value as u32) << 16;
    }
    let len = setup.length as usize;
    buf.resize(len, 0).map_err(|_| HandlerFault::OTHER)?;
    let addr = flash.read_addr;
    flash.read(addr, buf)?;
    flash.read_addr += len as u32;
    Ok(())
}

/// Flash write command
pub fn flash_write<T: FlashAccess>(
    ctx: &mut T,
    setup: &SetupPacket,
    buf: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    let flash = ctx.flash();
    let phase = FlashPhase::raw_from_index(setup.index);
    if phase == FlashPhase::Start as u8 {
        flash.write_start(setup.value)?;
    }
    flash.write(buf)?;
    if phase == FlashPhase::Finish as u8 {
        flash.write_finish();
    }
    Ok(())
}

/// Flash diagnostics request
pub fn flash_diagnostics<T: FlashAccess>(
    ctx: &mut T,
    _: &SetupPacket,
    buf: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    let diag = ctx.flash().diagnostics();
    answer(buf, &diag.to_bytes())
}

/// Register the flash handlers
pub fn register<T: FlashAccess>(d: &mut Dispatcher<T>) -> Result<(), RegistryFull> {
    d.register_request(Request::FlashInfo.code(), flash_info::<T>)?;
    d.register_request(Request::FlashRead.code(), flash_read::<T>)?;
    d.register_command(Command::FlashWrite.code(), flash_write::<T>)?;
    d.register_request(Request::FlashDiagnostics.code(), flash_diagnostics::<T>)
}
