//! Bounded retry combinators
//!
//! Every transport call on the host is tried twice before an error is
//! propagated, and a whole configuration upload is attempted up to five
//! times. Both use the helpers here with different bodies.

/// Tries per individual transport call
pub const TRANSFER_TRIES: usize = 2;
/// Attempts per configuration upload
pub const UPLOAD_ATTEMPTS: usize = 5;

/// Outcome of a failed attempt for [`retry_until_fatal`]
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Attempt<E> {
    /// The failure may go away on the next attempt
    Retry(E),
    /// Stop immediately and report this error
    Abort(E),
}

impl<E> Attempt<E> {
    /// The wrapped error
    pub fn into_inner(self) -> E {
        match self {
            Self::Retry(e) | Self::Abort(e) => e,
        }
    }
}

/// Run `op` up to `tries` times until it succeeds.
///
/// The closure receives the zero-based attempt number. The error of the
/// last attempt is returned. `tries` of 0 is treated as 1.
pub fn retry<T, E>(tries: usize, mut op: impl FnMut(usize) -> Result<T, E>) -> Result<T, E> {
    retry_until_fatal(tries, |attempt| op(attempt).map_err(Attempt::Retry))
}

/// Like [`retry`], but an [`Attempt::Abort`] ends the loop early
pub fn retry_until_fatal<T, E>(
    tries: usize,
    mut op: impl FnMut(usize) -> Result<T, Attempt<E>>,
) -> Result<T, E> {
    let tries = tries.max(1);
    let mut attempt = 0;
    loop {
        match op(attempt) {
            Ok(v) => return Ok(v),
            Err(Attempt::Retry(_)) if attempt + 1 < tries => {
                attempt += 1;
                log::trace!("retrying, attempt {} of {}", attempt + 1, tries);
            }
            Err(e) => return Err(e.into_inner()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_retry_second_try_succeeds() {
        let mut calls = 0;
        let r: Result<u8, &str> = retry(TRANSFER_TRIES, |n| {
            calls += 1;
            if n == 0 {
                Err("stall")
            } else {
                Ok(7)
            }
        });
        assert_eq!(r, Ok(7));
        assert_eq!(calls, 2);
    }

    #[test]
    fn test_retry_returns_last_error() {
        let mut calls = 0;
        let r: Result<(), usize> = retry(UPLOAD_ATTEMPTS, |n| {
            calls += 1;
            Err(n)
        });
        assert_eq!(r, Err(4));
        assert_eq!(calls, 5);
    }

    #[test]
    fn test_retry_zero_tries_runs_once() {
        let mut calls = 0;
        let r: Result<(), ()> = retry(0, |_| {
            calls += 1;
            Err(())
        });
        assert!(r.is_err());
        assert_eq!(calls, 1);
    }

    #[test]
    fn test_abort_stops_early() {
        let mut calls = 0;
        let r: Result<(), &str> = retry_until_fatal(5, |n| {
            calls += 1;
            if n == 1 {
                Err(Attempt::Abort("gone"))
            } else {
                Err(Attempt::Retry("again"))
            }
        });
        assert_eq!(r, Err("gone"));
        assert_eq!(calls, 2);
    }
}
