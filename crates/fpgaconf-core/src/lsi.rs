//! LSI (low speed interface) record format
//!
//! The LSI gives access to 256 32-bit registers implemented in the FPGA.
//! Writes are sent as 5-byte records, four little-endian data bytes followed
//! by the register address. Reads return four little-endian bytes per
//! register starting at the requested address, wrapping from 255 to 0.
//!
//! One transfer never carries more than [`MAX_REGISTERS`] values. Writers
//! given more keep only the last 256; readers asked for more receive the
//! 256 values read repeated.

#[cfg(feature = "alloc")]
use alloc::vec::Vec;

use crate::error::{Error, Result};

/// Number of addressable registers, and the largest count per transfer
pub const MAX_REGISTERS: usize = 256;
/// Length of one write record
pub const RECORD_LEN: usize = 5;
/// Bytes per register value
pub const WORD_LEN: usize = 4;

/// One register write
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Record {
    /// Register address
    pub addr: u8,
    /// Register value
    pub value: u32,
}

impl Record {
    /// Create a record
    pub const fn new(addr: u8, value: u32) -> Self {
        Self { addr, value }
    }

    /// Encode to the wire layout
    pub fn to_bytes(&self) -> [u8; RECORD_LEN] {
        let v = self.value.to_le_bytes();
        [v[0], v[1], v[2], v[3], self.addr]
    }

    /// Decode from the wire layout
    pub fn from_bytes(b: &[u8; RECORD_LEN]) -> Self {
        Self {
            addr: b[4],
            value: u32::from_le_bytes([b[0], b[1], b[2], b[3]]),
        }
    }
}

/// Iterate over the records of an LSI write payload
pub fn records(payload: &[u8]) -> Result<impl Iterator<Item = Record> + '_> {
    if payload.len() % RECORD_LEN != 0 {
        return Err(Error::InvalidRecordLength(payload.len()));
    }
    Ok(payload.chunks_exact(RECORD_LEN).map(|c| {
        let mut b = [0u8; RECORD_LEN];
        b.copy_from_slice(c);
        Record::from_bytes(&b)
    }))
}

/// Index of the first value kept when `len` values are written at once
pub fn tail_start(len: usize) -> usize {
    len.saturating_sub(MAX_REGISTERS)
}

/// Number of registers actually transferred for a read of `count` values
pub fn read_count(count: usize) -> usize {
    count.min(MAX_REGISTERS)
}

/// Build the payload writing `values` to consecutive registers from `addr`
///
/// Only the last 256 values are sent; each keeps the address it would have
/// had in the full sequence.
#[cfg(feature = "alloc")]
pub fn sequential_payload(addr: u8, values: &[u32]) -> Vec<u8> {
    let start = tail_start(values.len());
    let mut out = Vec::with_capacity((values.len() - start) * RECORD_LEN);
    for (i, &value) in values.iter().enumerate().skip(start) {
        let a = addr.wrapping_add(i as u8);
        out.extend_from_slice(&Record::new(a, value).to_bytes());
    }
    out
}

/// Build the payload writing `values[i]` to register `addrs[i]`
#[cfg(feature = "alloc")]
pub fn scattered_payload(addrs: &[u8], values: &[u32]) -> Result<Vec<u8>> {
    if addrs.len() != values.len() {
        return Err(Error::LengthMismatch {
            addrs: addrs.len(),
            values: values.len(),
        });
    }
    let start = tail_start(values.len());
    let mut out = Vec::with_capacity((values.len() - start) * RECORD_LEN);
    for (&a, &value) in addrs.iter().zip(values).skip(start) {
        out.extend_from_slice(&Record::new(a, value).to_bytes());
    }
    Ok(out)
}

/// Decode a read answer into `count` values, repeating past 256
#[cfg(feature = "alloc")]
pub fn decode_words(buf: &[u8], count: usize) -> Result<Vec<u32>> {
    let expected = read_count(count) * WORD_LEN;
    if buf.len() < expected {
        return Err(Error::ShortPayload {
            expected,
            actual: buf.len(),
        });
    }
    Ok((0..count)
        .map(|i| {
            let j = (i & (MAX_REGISTERS - 1)) * WORD_LEN;
            u32::from_le_bytes([buf[j], buf[j + 1], buf[j + 2], buf[j + 3]])
        })
        .collect())
}
