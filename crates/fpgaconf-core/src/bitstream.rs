//! Configuration bitstream chunking and bit-order normalization
//!
//! A bitstream is transferred as a sequence of fixed-size chunks. The first
//! chunk starts with 512 zero bytes which the device discards while its
//! transport warms up, and the final chunk is always shorter than a whole
//! number of 64-byte packets so the device can detect the end of the stream.
//!
//! FPGA vendors ship bitstreams in either bit order. The sync word is looked
//! up in the first chunk: `AA 99 55 66` means the file is bit-reversed and
//! every byte is mirrored before transmission, `55 99 AA 66` means the file
//! is already in transmission order.

use alloc::vec::Vec;

use crate::error::{Error, Result};
use crate::protocol::END_OF_STREAM_GRANULARITY;

/// Size of one transfer chunk
pub const CHUNK_SIZE: usize = 32768;
/// Maximum number of chunks (64 MiB in total)
pub const MAX_CHUNKS: usize = 2048;
/// Zero bytes prepended to the first chunk
pub const LEAD_PADDING: usize = 512;
/// Smallest accepted bitstream
pub const MIN_BITSTREAM_SIZE: usize = 1024;

/// Sync word of a bitstream that has to be bit-reversed
pub const SYNC_REVERSED: [u8; 4] = [0xaa, 0x99, 0x55, 0x66];
/// Sync word of a bitstream in transmission order
pub const SYNC_NORMAL: [u8; 4] = [0x55, 0x99, 0xaa, 0x66];

/// Bit order of a bitstream file
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrder {
    /// Bytes are sent as stored
    #[default]
    Normal,
    /// Every byte is mirrored (MSB and LSB swapped) before sending
    Reversed,
}

/// How the bit order of a bitstream is chosen
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum BitOrderMode {
    /// Look for a sync word in the first chunk
    #[default]
    Auto,
    /// Force [`BitOrder::Normal`]
    Normal,
    /// Force [`BitOrder::Reversed`]
    Reversed,
}

/// Search `buf` for a sync word.
///
/// The first occurrence of either pattern decides.
pub fn detect_bit_order(buf: &[u8]) -> Option<BitOrder> {
    buf.windows(4).find_map(|w| {
        if w == SYNC_REVERSED {
            Some(BitOrder::Reversed)
        } else if w == SYNC_NORMAL {
            Some(BitOrder::Normal)
        } else {
            None
        }
    })
}

/// Mirror the bits of every byte in place
pub fn reverse_bits_in_place(buf: &mut [u8]) {
    for b in buf {
        *b = b.reverse_bits();
    }
}

/// Check the raw size of a bitstream file
pub fn validate_size(data_len: usize) -> Result<()> {
    if data_len < MIN_BITSTREAM_SIZE || data_len % END_OF_STREAM_GRANULARITY == 0 {
        return Err(Error::InvalidBitstreamSize(data_len));
    }
    Ok(())
}

/// Number of bytes transferred for a file of `data_len` bytes
pub fn padded_len(data_len: usize) -> usize {
    let n = data_len + LEAD_PADDING;
    if n % END_OF_STREAM_GRANULARITY == 0 {
        n + 1
    } else {
        n
    }
}

/// Incrementally collects file data into transfer chunks
#[derive(Debug)]
pub struct BitstreamBuilder {
    mode: BitOrderMode,
    chunks: Vec<Vec<u8>>,
    data_len: usize,
}

impl BitstreamBuilder {
    /// Start a bitstream; the lead padding is already in place
    pub fn new(mode: BitOrderMode) -> Self {
        let mut first = Vec::with_capacity(CHUNK_SIZE);
        first.resize(LEAD_PADDING, 0);
        Self {
            mode,
            chunks: alloc::vec![first],
            data_len: 0,
        }
    }

    /// Append file data
    pub fn push(&mut self, mut data: &[u8]) -> Result<()> {
        while !data.is_empty() {
            let room = match self.chunks.last() {
                Some(last) if last.len() < CHUNK_SIZE => CHUNK_SIZE - last.len(),
                _ => {
                    if self.chunks.len() >= MAX_CHUNKS {
                        return Err(Error::BitstreamTooLarge);
                    }
                    self.chunks.push(Vec::with_capacity(CHUNK_SIZE));
                    CHUNK_SIZE
                }
            };
            let n = room.min(data.len());
            if let Some(last) = self.chunks.last_mut() {
                last.extend_from_slice(&data[..n]);
            }
            self.data_len += n;
            data = &data[n..];
        }
        Ok(())
    }

    /// Number of file bytes pushed so far
    pub fn data_len(&self) -> usize {
        self.data_len
    }

    /// Pad, validate and normalize the collected data
    pub fn finish(mut self) -> Result<Bitstream> {
        // A full last chunk would end the stream on a packet boundary
        if self.chunks.last().map_or(false, |c| c.len() == CHUNK_SIZE) {
            if self.chunks.len() >= MAX_CHUNKS {
                return Err(Error::BitstreamTooLarge);
            }
            self.chunks.push(Vec::new());
        }
        if let Some(last) = self.chunks.last_mut() {
            if last.len() % END_OF_STREAM_GRANULARITY == 0 {
                last.push(0);
            }
        }

        validate_size(self.data_len)?;

        let (bit_order, order_detected) = match self.mode {
            BitOrderMode::Normal => (BitOrder::Normal, true),
            BitOrderMode::Reversed => (BitOrder::Reversed, true),
            BitOrderMode::Auto => match detect_bit_order(&self.chunks[0]) {
                Some(order) => (order, true),
                None => {
                    log::warn!("unable to detect bitstream bit order, assuming normal order");
                    (BitOrder::Normal, false)
                }
            },
        };
        log::debug!(
            "bitstream: {} bytes in {} chunks, bit order {:?}",
            self.data_len,
            self.chunks.len(),
            bit_order
        );

        if bit_order == BitOrder::Reversed {
            for chunk in &mut self.chunks {
                reverse_bits_in_place(chunk);
            }
        }

        Ok(Bitstream {
            chunks: self.chunks,
            data_len: self.data_len,
            bit_order,
            order_detected,
        })
    }
}

/// A validated bitstream ready for transfer
#[derive(Debug, Clone)]
pub struct Bitstream {
    chunks: Vec<Vec<u8>>,
    data_len: usize,
    bit_order: BitOrder,
    order_detected: bool,
}

impl Bitstream {
    /// Build a bitstream from an in-memory file image
    pub fn from_bytes(data: &[u8], mode: BitOrderMode) -> Result<Self> {
        let mut builder = BitstreamBuilder::new(mode);
        builder.push(data)?;
        builder.finish()
    }

    /// Transfer chunks in order
    pub fn chunks(&self) -> impl Iterator<Item = &[u8]> + '_ {
        self.chunks.iter().map(Vec::as_slice)
    }

    /// Number of chunks
    pub fn chunk_count(&self) -> usize {
        self.chunks.len()
    }

    /// Size of the file the bitstream was read from
    pub fn data_len(&self) -> usize {
        self.data_len
    }

    /// Total number of bytes sent to the device, padding included
    pub fn transfer_len(&self) -> usize {
        self.chunks.iter().map(Vec::len).sum()
    }

    /// Bit order applied to the data
    pub fn bit_order(&self) -> BitOrder {
        self.bit_order
    }

    /// False if the order was guessed because no sync word was found
    pub fn order_detected(&self) -> bool {
        self.order_detected
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn image(len: usize, sync: Option<[u8; 4]>) -> Vec<u8> {
        let mut data: Vec<u8> = (0..len).map(|i| (i % 251) as u8 | 0x01).collect();
        if let Some(sync) = sync {
            data[32..36].copy_from_slice(&sync);
        }
        data
    }

    #[test]
    fn test_rejects_bad_sizes() {
        for len in [0, 100, 1023, 1024, 2048, 4096, 65536] {
            let r = Bitstream::from_bytes(&image(len, None), BitOrderMode::Auto);
            assert_eq!(r.err(), Some(Error::InvalidBitstreamSize(len)), "len {}", len);
        }
    }

    #[test]
    fn test_padding_without_marker() {
        let bs = Bitstream::from_bytes(&image(2040, None), BitOrderMode::Auto).unwrap();
        assert_eq!(bs.data_len(), 2040);
        assert_eq!(bs.transfer_len(), 2552);
        assert_eq!(bs.transfer_len(), padded_len(2040));
        assert_eq!(bs.bit_order(), BitOrder::Normal);
        assert!(!bs.order_detected());

        let first = bs.chunks().next().unwrap();
        assert!(first[..LEAD_PADDING].iter().all(|&b| b == 0));
        assert_eq!(first[LEAD_PADDING], 0x01);
    }

    #[test]
    fn test_padded_len_never_on_packet_boundary() {
        assert_eq!(padded_len(1536), 2049);

        let data = alloc::vec![0u8; 2 * CHUNK_SIZE + 1];
        for len in 1025..=data.len() {
            if validate_size(len).is_err() {
                continue;
            }
            let p = padded_len(len);
            assert_eq!(p, len + LEAD_PADDING, "len {}", len);
            assert_ne!(p % END_OF_STREAM_GRANULARITY, 0, "len {}", len);

            // Forced order skips the sync word search
            let bs = Bitstream::from_bytes(&data[..len], BitOrderMode::Normal).unwrap();
            assert_eq!(bs.transfer_len(), p, "len {}", len);
            assert_eq!(bs.chunk_count(), p.div_ceil(CHUNK_SIZE), "len {}", len);
            let sizes: Vec<usize> = bs.chunks().map(<[u8]>::len).collect();
            let (last, full) = sizes.split_last().unwrap();
            assert!(full.iter().all(|&n| n == CHUNK_SIZE), "len {}", len);
            assert!(*last > 0 && *last <= CHUNK_SIZE, "len {}", len);
            assert_ne!(last % END_OF_STREAM_GRANULARITY, 0, "len {}", len);
        }
    }

    #[test]
    fn test_reversed_marker_mirrors_every_chunk() {
        let data = image(70001, Some(SYNC_REVERSED));
        let bs = Bitstream::from_bytes(&data, BitOrderMode::Auto).unwrap();
        assert_eq!(bs.bit_order(), BitOrder::Reversed);
        assert!(bs.order_detected());
        assert_eq!(bs.chunk_count(), 3);

        let sent: Vec<u8> = bs.chunks().flatten().copied().collect();
        assert_eq!(sent.len(), 70001 + LEAD_PADDING);
        let payload = &sent[LEAD_PADDING..];
        for (i, (&s, &d)) in payload.iter().zip(&data).enumerate() {
            assert_eq!(s, d.reverse_bits(), "byte {}", i);
        }
        assert_eq!(&payload[32..36], &SYNC_NORMAL);
    }

    #[test]
    fn test_normal_marker_keeps_bytes() {
        let data = image(5000 - 3, Some(SYNC_NORMAL));
        let bs = Bitstream::from_bytes(&data, BitOrderMode::Auto).unwrap();
        assert_eq!(bs.bit_order(), BitOrder::Normal);
        assert!(bs.order_detected());
        let first = bs.chunks().next().unwrap();
        assert_eq!(&first[LEAD_PADDING..], &data[..]);
    }

    #[test]
    fn test_reversal_is_involution() {
        let original: Vec<u8> = (0..=255).collect();
        let mut buf = original.clone();
        reverse_bits_in_place(&mut buf);
        assert_eq!(buf[0x01], 0x80);
        assert_eq!(buf[0xaa], 0x55);
        reverse_bits_in_place(&mut buf);
        assert_eq!(buf, original);
    }

    #[test]
    fn test_forced_order_overrides_marker() {
        let data = image(1999, Some(SYNC_REVERSED));
        let bs = Bitstream::from_bytes(&data, BitOrderMode::Normal).unwrap();
        assert_eq!(bs.bit_order(), BitOrder::Normal);
        let bs = Bitstream::from_bytes(&image(1999, None), BitOrderMode::Reversed).unwrap();
        assert_eq!(bs.bit_order(), BitOrder::Reversed);
        assert!(bs.order_detected());
    }

    #[test]
    fn test_marker_only_searched_in_first_chunk() {
        let mut data = image(CHUNK_SIZE + 4001, None);
        data[CHUNK_SIZE + 100..CHUNK_SIZE + 104].copy_from_slice(&SYNC_REVERSED);
        let bs = Bitstream::from_bytes(&data, BitOrderMode::Auto).unwrap();
        assert_eq!(bs.bit_order(), BitOrder::Normal);
        assert!(!bs.order_detected());
    }

    #[test]
    fn test_incremental_push_matches_single_push() {
        let data = image(CHUNK_SIZE * 2 + 77, None);
        let mut builder = BitstreamBuilder::new(BitOrderMode::Auto);
        for piece in data.chunks(1000) {
            builder.push(piece).unwrap();
        }
        assert_eq!(builder.data_len(), data.len());
        let a = builder.finish().unwrap();
        let b = Bitstream::from_bytes(&data, BitOrderMode::Auto).unwrap();
        assert!(a.chunks().eq(b.chunks()));
        assert!(a.chunks().take(a.chunk_count() - 1).all(|c| c.len() == CHUNK_SIZE));
    }
}
