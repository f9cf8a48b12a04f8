//! Register file on the far side of the low speed interface
//!
//! Decodes the three LSI lines the way the FPGA does. While stop is low
//! every clock edge shifts one data bit into a 40-bit window. The first
//! edge after stop rises is the command edge: with data low the window is
//! committed as a write (value in the low 32 bits, address on top), with
//! data high the top byte is taken as the address of a read and the
//! register is driven onto the data line, one bit per following edge.

use fpgaconf_core::lsi::MAX_REGISTERS;
use fpgaconf_firmware::lsi::{Line, SignalDriver};

const WINDOW_BITS: u32 = 40;

/// Dummy LSI slave with 256 registers
pub struct DummyLsi {
    regs: [u32; MAX_REGISTERS],
    clock: bool,
    data: bool,
    stop: bool,
    reset: bool,
    gpio: [bool; 4],
    gpio_inputs: [bool; 4],
    window: u64,
    bits: u32,
    command_pending: bool,
    output: Option<(u32, u32)>,
    writes: u32,
    reads: u32,
    reset_pulses: u32,
    slept_ms: u64,
}

impl Default for DummyLsi {
    fn default() -> Self {
        Self::new()
    }
}

impl DummyLsi {
    /// Create a register file with all registers zero
    pub fn new() -> Self {
        Self {
            regs: [0; MAX_REGISTERS],
            clock: false,
            data: true,
            stop: false,
            reset: false,
            gpio: [true; 4],
            gpio_inputs: [true; 4],
            window: 0,
            bits: 0,
            command_pending: false,
            output: None,
            writes: 0,
            reads: 0,
            reset_pulses: 0,
            slept_ms: 0,
        }
    }

    /// Register contents
    pub fn registers(&self) -> &[u32; MAX_REGISTERS] {
        &self.regs
    }

    /// Register contents, mutably
    pub fn registers_mut(&mut self) -> &mut [u32; MAX_REGISTERS] {
        &mut self.regs
    }

    /// Number of committed register writes
    pub fn writes(&self) -> u32 {
        self.writes
    }

    /// Number of register reads started
    pub fn reads(&self) -> u32 {
        self.reads
    }

    /// Number of times reset was asserted
    pub fn reset_pulses(&self) -> u32 {
        self.reset_pulses
    }

    /// Reset line asserted
    pub fn in_reset(&self) -> bool {
        self.reset
    }

    /// Level applied to GPIO `n` from outside; low pulls the pin down
    pub fn set_gpio_input(&mut self, n: u8, high: bool) {
        self.gpio_inputs[n as usize & 3] = high;
    }

    fn edge(&mut self) {
        if !self.stop {
            self.window = (self.window >> 1) | ((self.data as u64) << (WINDOW_BITS - 1));
            self.bits += 1;
            return;
        }
        if self.command_pending {
            self.command_pending = false;
            let addr = (self.window >> 32) as u8;
            if self.data {
                if self.bits < 8 {
                    log::warn!("dummy LSI: read with {} address bits", self.bits);
                }
                self.reads += 1;
                self.output = Some((self.regs[addr as usize], 0));
            } else {
                if self.bits < WINDOW_BITS {
                    log::warn!("dummy LSI: write with {} bits", self.bits);
                    return;
                }
                self.regs[addr as usize] = self.window as u32;
                self.writes += 1;
            }
            return;
        }
        if let Some((_, bit)) = self.output.as_mut() {
            if *bit < 32 {
                *bit += 1;
            }
        }
    }
}

impl SignalDriver for DummyLsi {
    fn set(&mut self, line: Line, high: bool) {
        match line {
            Line::Clock => {
                if high != self.clock {
                    self.clock = high;
                    self.edge();
                }
            }
            Line::Data => self.data = high,
            Line::Stop => {
                if high && !self.stop {
                    self.command_pending = true;
                } else if !high && self.stop {
                    self.window = 0;
                    self.bits = 0;
                    self.output = None;
                    self.command_pending = false;
                }
                self.stop = high;
            }
            Line::Reset => {
                if high && !self.reset {
                    self.reset_pulses += 1;
                }
                self.reset = high;
            }
            Line::Gpio(n) => self.gpio[n as usize & 3] = high,
        }
    }

    fn get(&self, line: Line) -> bool {
        match line {
            Line::Data => match self.output {
                Some((word, bit)) if bit < 32 => (word >> bit) & 1 != 0,
                Some(_) => true,
                None => self.data,
            },
            Line::Gpio(n) => self.gpio[n as usize & 3] && self.gpio_inputs[n as usize & 3],
            Line::Clock => self.clock,
            Line::Stop => self.stop,
            Line::Reset => self.reset,
        }
    }

    fn sleep_ms(&mut self, ms: u32) {
        self.slept_ms += ms as u64;
    }
}
