//! Register access through the low speed interface
//!
//! One call moves at most 256 registers. Longer writes only send their last
//! 256 values; longer reads repeat the first 256 values.

use fpgaconf_core::lsi::{self as records, read_count, Record, WORD_LEN};
use fpgaconf_core::protocol::{Command, Request};

use crate::error::{Error, Result};
use crate::transport::{command, request, Transport, CONTROL_TIMEOUT};

/// Bytes requested by a GPIO control request
const GPIO_LENGTH: u16 = 8;

/// LSI client for one device
pub struct LsiClient<'a, T: ?Sized> {
    transport: &'a mut T,
}

impl<'a, T: Transport + ?Sized> LsiClient<'a, T> {
    /// Create a client
    pub fn new(transport: &'a mut T) -> Self {
        Self { transport }
    }

    fn write(&mut self, payload: &[u8]) -> Result<()> {
        if payload.is_empty() {
            return Ok(());
        }
        command(
            &mut *self.transport,
            Command::LsiWrite,
            0,
            0,
            payload,
            CONTROL_TIMEOUT,
        )?;
        Ok(())
    }

    /// Write one register
    pub fn set1(&mut self, addr: u8, value: u32) -> Result<()> {
        self.write(&Record::new(addr, value).to_bytes())
    }

    /// Write `values` to consecutive registers starting at `addr`
    pub fn set_sequential(&mut self, addr: u8, values: &[u32]) -> Result<()> {
        self.write(&records::sequential_payload(addr, values))
    }

    /// Write `values[i]` to register `addrs[i]`
    pub fn set_scattered(&mut self, addrs: &[u8], values: &[u32]) -> Result<()> {
        let payload = records::scattered_payload(addrs, values)?;
        self.write(&payload)
    }

    /// Read one register
    pub fn get1(&mut self, addr: u8) -> Result<u32> {
        Ok(self.get_sequential(addr, 1)?[0])
    }

    /// Read `count` consecutive registers starting at `addr`
    pub fn get_sequential(&mut self, addr: u8, count: usize) -> Result<Vec<u32>> {
        if count == 0 {
            return Ok(Vec::new());
        }
        let length = (read_count(count) * WORD_LEN) as u16;
        let buf = request(
            &mut *self.transport,
            Request::LsiRead,
            0,
            addr as u16,
            length,
            CONTROL_TIMEOUT,
        )?;
        Ok(records::decode_words(&buf, count)?)
    }

    /// Drive the GPIO pins selected by `mask` to `value`, returns all pins
    pub fn gpio(&mut self, mask: u8, value: u8) -> Result<u8> {
        let buf = request(
            &mut *self.transport,
            Request::GpioControl,
            value as u16,
            mask as u16,
            GPIO_LENGTH,
            CONTROL_TIMEOUT,
        )?;
        buf.first()
            .copied()
            .ok_or_else(|| Error::InvalidResponse("empty GPIO answer".into()))
    }

    /// Pulse the application reset, or leave it asserted if `leave` is set
    pub fn reset(&mut self, leave: bool) -> Result<()> {
        command(
            &mut *self.transport,
            Command::LsiReset,
            leave as u16,
            0,
            &[],
            CONTROL_TIMEOUT,
        )?;
        Ok(())
    }
}
