//! Transfer primitives
//!
//! [`Transport`] is the seam between the protocol logic and the USB stack.
//! Every call performs exactly one transfer; [`request`] and [`command`]
//! add the protocol's retry policy on top.

use std::time::Duration;

use fpgaconf_core::protocol::{Command, Request};
use fpgaconf_core::retry::{retry, TRANSFER_TRIES};

use crate::error::TransportError;

/// Timeout for ordinary control transfers
pub const CONTROL_TIMEOUT: Duration = Duration::from_millis(1500);

/// One USB device, as far as the protocol is concerned
pub trait Transport {
    /// Vendor request: read up to `length` bytes from the device
    fn control_in(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        length: u16,
        timeout: Duration,
    ) -> Result<Vec<u8>, TransportError>;

    /// Vendor command: send `data` to the device, returns the bytes sent
    fn control_out(
        &mut self,
        request: u8,
        value: u16,
        index: u16,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Bulk OUT transfer on `endpoint`, returns the bytes sent
    fn bulk_out(
        &mut self,
        endpoint: u8,
        data: &[u8],
        timeout: Duration,
    ) -> Result<usize, TransportError>;

    /// Claim `interface` so its endpoints can be used
    fn claim_interface(&mut self, interface: u8) -> Result<(), TransportError>;

    /// Give `interface` back
    fn release_interface(&mut self, interface: u8);
}

/// Vendor request, tried twice
pub fn request<T: Transport + ?Sized>(
    t: &mut T,
    request: Request,
    value: u16,
    index: u16,
    length: u16,
    timeout: Duration,
) -> Result<Vec<u8>, TransportError> {
    retry(TRANSFER_TRIES, |_| {
        t.control_in(request.code(), value, index, length, timeout)
    })
    .inspect_err(|e| log::debug!("request {:?} failed: {}", request, e))
}

/// Vendor command, tried twice; a short transfer is an error
pub fn command<T: Transport + ?Sized>(
    t: &mut T,
    command: Command,
    value: u16,
    index: u16,
    data: &[u8],
    timeout: Duration,
) -> Result<(), TransportError> {
    let n = retry(TRANSFER_TRIES, |_| {
        t.control_out(command.code(), value, index, data, timeout)
    })
    .inspect_err(|e| log::debug!("command {:?} failed: {}", command, e))?;
    if n != data.len() {
        return Err(TransportError::Short {
            expected: data.len(),
            actual: n,
        });
    }
    Ok(())
}

/// Send all of `data` to a bulk endpoint, continuing after partial writes
pub fn bulk_write_all<T: Transport + ?Sized>(
    t: &mut T,
    endpoint: u8,
    mut data: &[u8],
    timeout: Duration,
) -> Result<(), TransportError> {
    while !data.is_empty() {
        let n = retry(TRANSFER_TRIES, |_| t.bulk_out(endpoint, data, timeout))?;
        if n == 0 {
            return Err(TransportError::Short {
                expected: data.len(),
                actual: 0,
            });
        }
        data = &data[n.min(data.len())..];
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::mock::{Call, MockTransport};

    #[test]
    fn test_request_retried_once() {
        let mut t = MockTransport::default();
        t.answer(Request::ConfigStatus, Err(TransportError::Timeout));
        t.answer(Request::ConfigStatus, Ok(vec![0; 9]));
        let r = request(&mut t, Request::ConfigStatus, 0, 0, 16, CONTROL_TIMEOUT);
        assert_eq!(r, Ok(vec![0; 9]));
        assert_eq!(t.calls.len(), 2);
    }

    #[test]
    fn test_request_gives_up_after_two_tries() {
        let mut t = MockTransport::default();
        for _ in 0..3 {
            t.answer(Request::FlashInfo, Err(TransportError::Stall));
        }
        let r = request(&mut t, Request::FlashInfo, 0, 0, 8, CONTROL_TIMEOUT);
        assert_eq!(r, Err(TransportError::Stall));
        assert_eq!(t.calls.len(), 2);
    }

    #[test]
    fn test_short_command_not_retried() {
        let mut t = MockTransport::default();
        t.accept(Command::ConfigSend, Ok(100));
        let r = command(&mut t, Command::ConfigSend, 0, 0, &[0; 2048], CONTROL_TIMEOUT);
        assert_eq!(
            r,
            Err(TransportError::Short {
                expected: 2048,
                actual: 100
            })
        );
        assert_eq!(t.calls.len(), 1);
    }

    #[test]
    fn test_bulk_partial_writes() {
        let mut t = MockTransport::default();
        t.bulk.push_back(Ok(1000));
        t.bulk.push_back(Err(TransportError::Timeout));
        let r = bulk_write_all(&mut t, 2, &[0; 3000], CONTROL_TIMEOUT);
        assert_eq!(r, Ok(()));
        let sizes: Vec<usize> = t
            .calls
            .iter()
            .filter_map(|c| match c {
                Call::Bulk { len, .. } => Some(*len),
                _ => None,
            })
            .collect();
        assert_eq!(sizes, [3000, 2000, 2000]);
    }

    #[test]
    fn test_bulk_zero_progress_fails() {
        let mut t = MockTransport::default();
        t.bulk.push_back(Ok(0));
        let r = bulk_write_all(&mut t, 2, &[0; 64], CONTROL_TIMEOUT);
        assert!(matches!(r, Err(TransportError::Short { actual: 0, .. })));
    }
}
