//! Bit-banged low speed interface
//!
//! Three lines connect the controller to the FPGA: clock, data and stop.
//! The FPGA samples on both clock edges, so every toggle of the clock line
//! moves one bit.
//!
//! Write frame, per register: stop low, 40 bits (4 data bytes then the
//! address byte, each LSB first), then data low and stop high for one more
//! toggle which commits the register.
//!
//! Read frame, per register: stop low, 8 address bits, then data released
//! high and stop high for one toggle which makes the FPGA load the register.
//! The FPGA then drives the data line and 32 bits are sampled LSB first, one
//! per toggle, while stop stays high.

use fpgaconf_core::lsi::{RECORD_LEN, WORD_LEN};
use fpgaconf_core::protocol::{Command, LsiInfo, Request};

use crate::dispatch::{Dispatcher, Ep0Buffer, HandlerFault, RegistryFull, SetupPacket};

/// Signal lines driven by the interface
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Line {
    /// LSI clock
    Clock,
    /// LSI data, open drain
    Data,
    /// LSI stop
    Stop,
    /// FPGA application reset
    Reset,
    /// General purpose pins 0 to 3, open drain
    Gpio(u8),
}

/// Raw GPIO access
pub trait SignalDriver {
    /// Drive `line`; for open-drain lines `true` releases the line
    fn set(&mut self, line: Line, high: bool);

    /// Sample `line`
    fn get(&self, line: Line) -> bool;

    /// Delay between clock edges
    fn half_period_delay(&self) {}

    /// Extra time for the FPGA to load a register before it is read
    fn settle(&self) {}

    /// Sleep for `ms` milliseconds
    fn sleep_ms(&mut self, ms: u32);
}

/// LSI master
pub struct Lsi<G> {
    io: G,
    next_clk: bool,
    info: LsiInfo,
}

impl<G: SignalDriver> Lsi<G> {
    /// Create the interface; call [`start`](Self::start) before use
    pub fn new(io: G) -> Self {
        Self {
            io,
            next_clk: true,
            info: LsiInfo::default(),
        }
    }

    /// Put all lines into their idle state; reset is left asserted
    pub fn start(&mut self) {
        self.io.set(Line::Reset, true);
        for n in 0..4 {
            self.io.set(Line::Gpio(n), true);
        }
        self.io.set(Line::Clock, false);
        self.next_clk = true;
        self.io.set(Line::Data, true);
        self.io.set(Line::Stop, false);
    }

    /// One clock edge
    fn clock(&mut self) {
        self.io.set(Line::Clock, self.next_clk);
        self.next_clk = !self.next_clk;
        self.io.half_period_delay();
    }

    fn shift_out(&mut self, mut b: u8) {
        for _ in 0..8 {
            self.io.set(Line::Data, b & 1 != 0);
            self.clock();
            b >>= 1;
        }
    }

    fn shift_in(&mut self) -> u8 {
        let mut b = 0u8;
        for _ in 0..8 {
            b = (b >> 1) | ((self.io.get(Line::Data) as u8) << 7);
            self.clock();
        }
        b
    }

    /// Write 5-byte records; a trailing partial record is ignored
    pub fn write_records(&mut self, payload: &[u8]) {
        let records = payload.chunks_exact(RECORD_LEN);
        if !records.remainder().is_empty() {
            log::warn!(
                "LSI write: ignoring {} trailing bytes",
                records.remainder().len()
            );
        }
        self.clock();
        for record in records {
            self.io.set(Line::Stop, false);
            for &b in record {
                self.shift_out(b);
            }
            self.io.set(Line::Data, false);
            self.io.set(Line::Stop, true);
            self.clock();
        }
        self.io.set(Line::Stop, false);
    }

    /// Read consecutive registers from `addr` into `out`, 4 bytes each
    pub fn read_registers(&mut self, mut addr: u8, out: &mut [u8]) {
        self.clock();
        for word in out.chunks_exact_mut(WORD_LEN) {
            self.io.set(Line::Stop, false);
            self.shift_out(addr);
            addr = addr.wrapping_add(1);

            self.io.set(Line::Data, true);
            self.io.set(Line::Stop, true);
            self.clock();
            self.io.settle();

            for b in word {
                *b = self.shift_in();
            }
        }
        self.io.set(Line::Stop, false);
    }

    /// Assert reset; unless `leave` is set it is released again after 1 ms
    pub fn reset(&mut self, leave: bool) {
        self.io.set(Line::Reset, true);
        if leave {
            return;
        }
        self.io.sleep_ms(1);
        self.io.set(Line::Reset, false);
    }

    /// Drive the GPIO pins selected by `mask` to `value` and return all four
    pub fn gpio(&mut self, mask: u8, value: u8) -> u8 {
        for n in 0..4u8 {
            let bit = 1 << n;
            if mask & bit != 0 {
                self.io.set(Line::Gpio(n), value & bit == 0);
            }
        }
        let pins = (0..4u8).fold(0u8, |acc, n| acc | ((self.io.get(Line::Gpio(n)) as u8) << n));
        !(0xf0 | pins)
    }

    /// Interface description
    pub fn info(&self) -> LsiInfo {
        self.info
    }

    /// Set the endpoints reported in [`info`](Self::info)
    pub fn set_endpoints(&mut self, out_ep: u8, in_ep: u8) {
        self.info.out_ep = out_ep;
        self.info.in_ep = in_ep;
    }

    /// The signal driver
    pub fn io(&self) -> &G {
        &self.io
    }

    /// The signal driver, mutably
    pub fn io_mut(&mut self) -> &mut G {
        &mut self.io
    }
}

/// Access to the LSI inside a device context
pub trait LsiAccess {
    /// GPIO driver of the interface
    type Io: SignalDriver;
    /// The interface
    fn lsi(&mut self) -> &mut Lsi<Self::Io>;
}

/// LSI reset command
pub fn lsi_reset<T: LsiAccess>(
    ctx: &mut T,
    setup: &SetupPacket,
    _: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    ctx.lsi().reset(setup.value != 0);
    Ok(())
}

/// GPIO control request
pub fn gpio_control<T: LsiAccess>(
    ctx: &mut T,
    setup: &SetupPacket,
    buf: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    let pins = ctx.lsi().gpio(setup.index as u8, setup.value as u8);
    buf.push(pins).map_err(|_| HandlerFault::OTHER)
}

/// LSI write command
pub fn lsi_write<T: LsiAccess>(
    ctx: &mut T,
    _: &SetupPacket,
    buf: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    ctx.lsi().write_records(buf);
    Ok(())
}

/// LSI read request
pub fn lsi_read<T: LsiAccess>(
    ctx: &mut T,
    setup: &SetupPacket,
    buf: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    buf.resize(setup.length as usize, 0)
        .map_err(|_| HandlerFault::OTHER)?;
    ctx.lsi().read_registers(setup.index as u8, buf);
    Ok(())
}

/// LSI info request
pub fn lsi_info<T: LsiAccess>(
    ctx: &mut T,
    _: &SetupPacket,
    buf: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    let info = ctx.lsi().info();
    buf.extend_from_slice(&info.to_bytes())
        .map_err(|_| HandlerFault::OTHER)
}

/// Register the LSI handlers
pub fn register<T: LsiAccess>(d: &mut Dispatcher<T>) -> Result<(), RegistryFull> {
    d.register_command(Command::LsiReset.code(), lsi_reset::<T>)?;
    d.register_request(Request::GpioControl.code(), gpio_control::<T>)?;
    d.register_command(Command::LsiWrite.code(), lsi_write::<T>)?;
    d.register_request(Request::LsiRead.code(), lsi_read::<T>)?;
    d.register_request(Request::LsiInfo.code(), lsi_info::<T>)
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    /// Records every line change
    #[derive(Default)]
    struct Recorder {
        events: Vec<(Line, bool)>,
        data_in: bool,
        gpio: [bool; 4],
        slept: u32,
    }

    impl SignalDriver for Recorder {
        fn set(&mut self, line: Line, high: bool) {
            if let Line::Gpio(n) = line {
                self.gpio[n as usize] = high;
            }
            self.events.push((line, high));
        }
        fn get(&self, line: Line) -> bool {
            match line {
                Line::Gpio(n) => self.gpio[n as usize],
                _ => self.data_in,
            }
        }
        fn sleep_ms(&mut self, ms: u32) {
            self.slept += ms;
        }
    }

    fn clock_edges(r: &Recorder) -> usize {
        r.events.iter().filter(|(l, _)| *l == Line::Clock).count()
    }

    #[test]
    fn test_write_frame() {
        let mut lsi = Lsi::new(Recorder::default());
        lsi.start();
        lsi.io_mut().events.clear();
        lsi.write_records(&[0x01, 0, 0, 0x80, 0x05]);

        let ev = &lsi.io().events;
        // 1 lead edge, 40 data edges, 1 stop edge
        assert_eq!(clock_edges(lsi.io()), 42);
        // clock toggles: first edge rises
        assert_eq!(ev[0], (Line::Clock, true));
        assert_eq!(ev[1], (Line::Stop, false));

        let bits: Vec<bool> = ev
            .windows(2)
            .filter(|w| w[1].0 == Line::Clock && w[0].0 == Line::Data)
            .map(|w| w[0].1)
            .collect();
        assert_eq!(bits.len(), 40);
        assert!(bits[0]);
        assert!(bits[1..31].iter().all(|b| !b));
        assert!(bits[31]);
        // address 5, LSB first
        assert_eq!(&bits[32..40], &[true, false, true, false, false, false, false, false]);

        let n = ev.len();
        assert_eq!(ev[n - 3], (Line::Stop, true));
        assert_eq!(ev[n - 1], (Line::Stop, false));
    }

    #[test]
    fn test_write_ignores_partial_record() {
        let mut lsi = Lsi::new(Recorder::default());
        lsi.start();
        lsi.io_mut().events.clear();
        lsi.write_records(&[1, 2, 3, 4, 5, 6, 7]);
        assert_eq!(clock_edges(lsi.io()), 42);
    }

    #[test]
    fn test_read_samples_lsb_first() {
        let mut lsi = Lsi::new(Recorder::default());
        lsi.start();
        lsi.io_mut().data_in = true;
        let mut out = [0u8; 8];
        lsi.read_registers(0xff, &mut out);
        assert_eq!(out, [0xff; 8]);
        // 1 lead edge, per register 8 address + 1 load + 32 data edges
        assert_eq!(clock_edges(lsi.io()), 1 + 2 * 41);
    }

    #[test]
    fn test_reset_pulse() {
        let mut lsi = Lsi::new(Recorder::default());
        lsi.reset(false);
        assert_eq!(lsi.io().slept, 1);
        assert_eq!(lsi.io().events, [(Line::Reset, true), (Line::Reset, false)]);

        let mut lsi = Lsi::new(Recorder::default());
        lsi.reset(true);
        assert_eq!(lsi.io().slept, 0);
        assert_eq!(lsi.io().events, [(Line::Reset, true)]);
    }

    #[test]
    fn test_gpio_inverts_twice() {
        let mut lsi = Lsi::new(Recorder::default());
        lsi.start();
        assert_eq!(lsi.gpio(0, 0), 0);
        assert_eq!(lsi.gpio(0b0101, 0b0101), 0b0101);
        // Unselected pins keep their state
        assert_eq!(lsi.gpio(0b0010, 0b1111), 0b0111);
        assert!(!lsi.io().gpio[0]);
        assert!(lsi.io().gpio[3]);
    }
}
