//! Configuration upload
//!
//! The bitstream goes to the device either through EP0 vendor commands in
//! transactions of at most 2048 bytes, or through the fast configuration
//! bulk endpoint if the device advertises one. The bulk path is only used
//! for the first two attempts. Every attempt resets the configuration logic
//! first and ends by reading back the configuration status.

use std::io::Read;
use std::time::Duration;

use fpgaconf_core::bitstream::{BitOrder, BitOrderMode, Bitstream, BitstreamBuilder, CHUNK_SIZE};
use fpgaconf_core::protocol::{Command, ConfigStatus, FastConfigInfo, EP0_TRANSACTION_SIZE};
use fpgaconf_core::retry::{retry_until_fatal, Attempt, UPLOAD_ATTEMPTS};

use crate::error::{Error, Result};
use crate::info::{config_status, fast_config_info};
use crate::progress::UploadProgress;
use crate::transport::{bulk_write_all, command, Transport, CONTROL_TIMEOUT};

/// Timeout for one bulk transfer of configuration data
pub const BULK_TIMEOUT: Duration = Duration::from_millis(2000);
/// Attempts that may use the fast configuration endpoint
pub const FAST_ATTEMPTS: usize = 2;

/// Upload settings
#[derive(Debug, Clone)]
pub struct UploadOptions {
    /// How the bit order is chosen
    pub bit_order: BitOrderMode,
    /// Use the fast configuration endpoint when the device has one
    pub fast: bool,
    /// Number of attempts before giving up
    pub attempts: usize,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            bit_order: BitOrderMode::Auto,
            fast: true,
            attempts: UPLOAD_ATTEMPTS,
        }
    }
}

/// Outcome of a successful upload
#[derive(Debug, Clone)]
pub struct UploadReport {
    /// Attempts used, including the successful one
    pub attempts: usize,
    /// The successful attempt went through the bulk endpoint
    pub fast: bool,
    /// Status read back after the upload
    pub status: ConfigStatus,
    /// Bit order the data was sent in
    pub bit_order: BitOrder,
    /// Non-fatal problems along the way
    pub warnings: Vec<String>,
}

/// Read a bitstream file and prepare it for upload
pub fn read_bitstream(mut reader: impl Read, mode: BitOrderMode) -> Result<Bitstream> {
    let mut builder = BitstreamBuilder::new(mode);
    let mut buf = vec![0u8; CHUNK_SIZE];
    loop {
        let n = reader.read(&mut buf)?;
        if n == 0 {
            break;
        }
        builder.push(&buf[..n])?;
    }
    Ok(builder.finish()?)
}

/// Uploads bitstreams to one device
pub struct Uploader<'a, T: ?Sized> {
    transport: &'a mut T,
    options: UploadOptions,
    warnings: Vec<String>,
}

impl<'a, T: Transport + ?Sized> Uploader<'a, T> {
    /// Create an uploader
    pub fn new(transport: &'a mut T, options: UploadOptions) -> Self {
        Self {
            transport,
            options,
            warnings: Vec::new(),
        }
    }

    fn warn(&mut self, msg: String) {
        log::warn!("{}", msg);
        self.warnings.push(msg);
    }

    /// Upload `bitstream` and wait for the FPGA to report done.
    ///
    /// A failed transfer or an unconfigured FPGA starts the next attempt; a
    /// configuration status that cannot be read ends the upload at once. A
    /// claimed interface is always released before returning.
    pub fn upload(
        &mut self,
        bitstream: &Bitstream,
        progress: &mut dyn UploadProgress,
    ) -> Result<UploadReport> {
        self.warnings.clear();
        if !bitstream.order_detected() {
            self.warnings
                .push("unable to detect bitstream bit order, assuming normal order".into());
        }

        let fast_info = if self.options.fast {
            fast_config_info(&mut *self.transport)
        } else {
            None
        };
        let mut claimed = None;
        let mut used = 0;
        let mut fatal = false;

        let r = retry_until_fatal(self.options.attempts, |attempt| {
            used = attempt + 1;
            let fast = match fast_info {
                Some(info) if attempt < FAST_ATTEMPTS => self.claim(info, &mut claimed),
                _ => None,
            };
            self.attempt(bitstream, fast, attempt, progress)
                .map(|status| (status, fast.is_some()))
                .map_err(|e| match e {
                    Attempt::Abort(e) => {
                        fatal = true;
                        Attempt::Abort(e)
                    }
                    Attempt::Retry(e) => {
                        log::info!("configuration attempt {} failed: {}", attempt + 1, e);
                        Attempt::Retry(e)
                    }
                })
        });

        if let Some(interface) = claimed {
            self.transport.release_interface(interface);
        }

        progress.finished(r.is_ok());
        let warnings = std::mem::take(&mut self.warnings);
        match r {
            Ok((status, fast)) => {
                log::info!(
                    "FPGA configured after {} attempt(s), {} bytes",
                    used,
                    status.bytes
                );
                Ok(UploadReport {
                    attempts: used,
                    fast,
                    status,
                    bit_order: bitstream.bit_order(),
                    warnings,
                })
            }
            Err(e) if fatal => Err(e),
            Err(e) => Err(Error::ConfigurationFailed {
                attempts: used,
                last: e.to_string(),
                warnings,
            }),
        }
    }

    /// Claim the interface of the fast endpoint, returns the endpoint on success
    fn claim(&mut self, info: FastConfigInfo, claimed: &mut Option<u8>) -> Option<u8> {
        let ep = info.endpoint()?;
        if claimed.is_none() {
            if let Err(e) = self.transport.claim_interface(info.interface) {
                self.warn(format!(
                    "unable to claim interface {}: {}",
                    info.interface, e
                ));
                return None;
            }
            *claimed = Some(info.interface);
        }
        Some(ep)
    }

    /// Transfer every chunk over the bulk endpoint `fast` or over EP0
    fn send(
        &mut self,
        bitstream: &Bitstream,
        fast: Option<u8>,
        progress: &mut dyn UploadProgress,
    ) -> Result<()> {
        let total = bitstream.transfer_len();
        let mut done = 0;
        for chunk in bitstream.chunks() {
            match fast {
                Some(ep) => {
                    bulk_write_all(&mut *self.transport, ep, chunk, BULK_TIMEOUT)?;
                    done += chunk.len();
                    progress.transferred(done, total);
                }
                None => {
                    for piece in chunk.chunks(EP0_TRANSACTION_SIZE) {
                        command(
                            &mut *self.transport,
                            Command::ConfigSend,
                            0,
                            0,
                            piece,
                            CONTROL_TIMEOUT,
                        )?;
                        done += piece.len();
                        progress.transferred(done, total);
                    }
                }
            }
        }
        Ok(())
    }

    /// Close the fast configuration port; a failure is only a warning
    fn finish_fast(&mut self) {
        if let Err(e) = command(
            &mut *self.transport,
            Command::FastConfigFinish,
            0,
            0,
            &[],
            CONTROL_TIMEOUT,
        ) {
            self.warn(format!("unable to finish fast configuration: {}", e));
        }
    }

    fn attempt(
        &mut self,
        bitstream: &Bitstream,
        fast: Option<u8>,
        attempt: usize,
        progress: &mut dyn UploadProgress,
    ) -> std::result::Result<ConfigStatus, Attempt<Error>> {
        let t = &mut *self.transport;
        if let Err(e) = command(t, Command::ConfigReset, 0, 0, &[], CONTROL_TIMEOUT) {
            self.warn(format!("unable to reset FPGA: {}", e));
        }
        if fast.is_some() {
            if let Err(e) = command(
                &mut *self.transport,
                Command::FastConfigStart,
                0,
                0,
                &[],
                CONTROL_TIMEOUT,
            ) {
                self.warn(format!("unable to start fast configuration: {}", e));
                return Err(Attempt::Retry(e.into()));
            }
        }
        progress.attempt(attempt, fast.is_some());

        let sent = self.send(bitstream, fast, progress);
        if fast.is_some() {
            self.finish_fast();
        }
        sent.map_err(Attempt::Retry)?;

        let status = config_status(&mut *self.transport).map_err(Attempt::Abort)?;
        if status.configured {
            Ok(status)
        } else {
            Err(Attempt::Retry(Error::NotConfigured {
                bytes: status.bytes,
                checksum: status.checksum,
            }))
        }
    }
}

/// Upload `bitstream` with `options`
pub fn upload_bitstream<T: Transport + ?Sized>(
    transport: &mut T,
    bitstream: &Bitstream,
    options: UploadOptions,
    progress: &mut dyn UploadProgress,
) -> Result<UploadReport> {
    Uploader::new(transport, options).upload(bitstream, progress)
}
