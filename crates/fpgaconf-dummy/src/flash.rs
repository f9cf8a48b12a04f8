//! In-memory SPI flash behind a chip select
//!
//! Unlike a command-level emulator this one sees the raw bus: opcodes,
//! addresses and data arrive as transmitted bytes while the chip is
//! selected, and erase and program commands take effect the way a real chip
//! handles them. Page programs wrap inside their page and only clear bits.

use fpgaconf_firmware::flash::{opcodes, BusError, SpiBus, Status, PAGE_SIZE, SECTOR_SIZE};

/// Configuration for the dummy flash
#[derive(Debug, Clone)]
pub struct DummyFlashConfig {
    /// JEDEC manufacturer ID
    pub manufacturer_id: u8,
    /// JEDEC memory type
    pub memory_type: u8,
    /// JEDEC capacity code, the chip holds `1 << capacity` bytes
    pub capacity: u8,
    /// Device ID answered to the legacy ID command
    pub device_id: u8,
    /// Status polls that report busy after each erase or program
    pub busy_polls: u32,
}

impl Default for DummyFlashConfig {
    fn default() -> Self {
        Self {
            manufacturer_id: 0xEF, // Winbond
            memory_type: 0x40,
            capacity: 0x15, // 16 Mbit
            device_id: 0x14,
            busy_polls: 2,
        }
    }
}

/// Dummy SPI flash
pub struct DummyFlash {
    config: DummyFlashConfig,
    data: Vec<u8>,
    write_enabled: bool,
    busy: u32,
    selected: bool,
    frame: Vec<u8>,
    received: usize,
    armed: bool,
    commands: Vec<u8>,
    page_programs: u32,
    erases: u32,
    slept_ms: u64,
}

impl DummyFlash {
    /// Create an erased flash
    pub fn new(config: DummyFlashConfig) -> Self {
        let size = if (16..=24).contains(&config.capacity) {
            1usize << config.capacity
        } else {
            0
        };
        Self {
            config,
            data: vec![0xFF; size],
            write_enabled: false,
            busy: 0,
            selected: false,
            frame: Vec::new(),
            received: 0,
            armed: false,
            commands: Vec::new(),
            page_programs: 0,
            erases: 0,
            slept_ms: 0,
        }
    }

    /// Create a dummy flash with default configuration (2 MiB)
    pub fn new_default() -> Self {
        Self::new(DummyFlashConfig::default())
    }

    /// Flash contents
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Flash contents, mutably
    pub fn data_mut(&mut self) -> &mut [u8] {
        &mut self.data
    }

    /// Opcodes received, in order
    pub fn commands(&self) -> &[u8] {
        &self.commands
    }

    /// Number of page program commands executed
    pub fn page_programs(&self) -> u32 {
        self.page_programs
    }

    /// Number of sector erases executed
    pub fn erases(&self) -> u32 {
        self.erases
    }

    /// Chip select currently asserted
    pub fn is_selected(&self) -> bool {
        self.selected
    }

    /// Total time the programmer slept
    pub fn slept_ms(&self) -> u64 {
        self.slept_ms
    }

    fn opcode(&self) -> Option<u8> {
        self.frame.first().copied()
    }

    fn address(&self) -> usize {
        match self.frame.get(1..4) {
            Some(a) => (a[0] as usize) << 16 | (a[1] as usize) << 8 | a[2] as usize,
            None => 0,
        }
    }

    fn start_command(&mut self, op: u8) {
        self.commands.push(op);
        if self.busy > 0 && op != opcodes::RDSR {
            log::warn!("dummy flash: opcode 0x{:02x} while busy ignored", op);
            self.armed = false;
            return;
        }
        self.armed = match op {
            opcodes::WREN => {
                self.write_enabled = true;
                false
            }
            opcodes::PP | opcodes::BE_64K => self.write_enabled,
            _ => true,
        };
    }

    fn program(&mut self, byte: u8) {
        if self.data.is_empty() {
            return;
        }
        let start = self.address() % self.data.len();
        let page = start & !(PAGE_SIZE as usize - 1);
        let offset = (start + self.frame.len() - 5) & (PAGE_SIZE as usize - 1);
        self.data[page + offset] &= byte;
    }

    fn finish_command(&mut self) {
        let complete = self.frame.len() >= 4;
        match self.opcode() {
            Some(opcodes::BE_64K) if self.armed && complete && !self.data.is_empty() => {
                let size = SECTOR_SIZE as usize;
                let base = (self.address() % self.data.len()) & !(size - 1);
                self.data[base..base + size].fill(0xFF);
                self.erases += 1;
                self.write_enabled = false;
                self.busy = self.config.busy_polls;
            }
            Some(opcodes::PP) if self.armed && complete => {
                self.page_programs += 1;
                self.write_enabled = false;
                self.busy = self.config.busy_polls;
            }
            _ => {}
        }
    }

    fn status(&mut self) -> u8 {
        let mut s = Status::empty();
        if self.busy > 0 {
            self.busy -= 1;
            s |= Status::WIP;
        }
        if self.write_enabled {
            s |= Status::WEL;
        }
        s.bits()
    }
}

impl SpiBus for DummyFlash {
    fn select(&mut self) {
        if self.selected {
            return;
        }
        self.selected = true;
        self.frame.clear();
        self.received = 0;
        self.armed = false;
    }

    fn deselect(&mut self) {
        if !self.selected {
            return;
        }
        self.finish_command();
        self.selected = false;
        self.frame.clear();
    }

    fn transmit(&mut self, data: &[u8]) -> Result<(), BusError> {
        if !self.selected {
            return Err(BusError);
        }
        for &b in data {
            if self.frame.is_empty() {
                self.start_command(b);
            }
            self.frame.push(b);
            if self.opcode() == Some(opcodes::PP) && self.armed && self.frame.len() > 4 {
                self.program(b);
            }
        }
        Ok(())
    }

    fn receive(&mut self, buf: &mut [u8]) -> Result<(), BusError> {
        if !self.selected {
            return Err(BusError);
        }
        for b in buf.iter_mut() {
            let n = self.received;
            self.received += 1;
            *b = match self.opcode() {
                _ if !self.armed && self.opcode() != Some(opcodes::RDSR) => 0xFF,
                Some(opcodes::RDSR) => self.status(),
                Some(opcodes::RDID) => match n {
                    0 => self.config.manufacturer_id,
                    1 => self.config.memory_type,
                    2 => self.config.capacity,
                    _ => 0xFF,
                },
                Some(opcodes::REMS) => {
                    if n % 2 == 0 {
                        self.config.manufacturer_id
                    } else {
                        self.config.device_id
                    }
                }
                Some(opcodes::FAST_READ) if !self.data.is_empty() => {
                    self.data[(self.address() + n) % self.data.len()]
                }
                _ => 0xFF,
            };
        }
        Ok(())
    }

    fn sleep_ms(&mut self, ms: u32) {
        self.slept_ms += ms as u64;
    }
}
