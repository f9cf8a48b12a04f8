//! FPGA configuration port
//!
//! Records the configuration data of the running session. When the port is
//! stopped the FPGA reports done if the data carried a sync word in the
//! right bit order, unless it was told to fail.

use fpgaconf_core::bitstream::SYNC_NORMAL;
use fpgaconf_firmware::fpga::{ConfigMode, ConfigPort, PortError};

/// Dummy configuration port
#[derive(Debug, Default)]
pub struct DummyFpga {
    data: Vec<u8>,
    mode: Option<ConfigMode>,
    configured: bool,
    require_sync: bool,
    failures: u32,
    sessions: Vec<ConfigMode>,
    resets: u32,
    slept_ms: u64,
}

impl DummyFpga {
    /// A port that needs a sync word to configure
    pub fn new() -> Self {
        Self {
            require_sync: true,
            ..Default::default()
        }
    }

    /// A port that configures with any data
    pub fn accept_any() -> Self {
        Self::default()
    }

    /// Let the next `n` sessions end unconfigured
    pub fn fail_next(&mut self, n: u32) {
        self.failures = n;
    }

    /// Data received in the current or last session
    pub fn data(&self) -> &[u8] {
        &self.data
    }

    /// Modes of all sessions started so far
    pub fn sessions(&self) -> &[ConfigMode] {
        &self.sessions
    }

    /// Number of PROGRAM_B pulses
    pub fn resets(&self) -> u32 {
        self.resets
    }

    fn has_sync(&self) -> bool {
        self.data.windows(SYNC_NORMAL.len()).any(|w| w == SYNC_NORMAL)
    }
}

impl ConfigPort for DummyFpga {
    fn reset(&mut self) {
        self.resets += 1;
        self.data.clear();
        self.mode = None;
        self.configured = false;
    }

    fn start(&mut self, mode: ConfigMode) -> Result<(), PortError> {
        self.mode = Some(mode);
        self.sessions.push(mode);
        Ok(())
    }

    fn send(&mut self, data: &[u8]) -> Result<(), PortError> {
        if self.mode.is_none() {
            return Err(PortError);
        }
        self.data.extend_from_slice(data);
        Ok(())
    }

    fn stop(&mut self) {
        if self.mode.take().is_none() {
            return;
        }
        if self.failures > 0 {
            self.failures -= 1;
            log::debug!("dummy FPGA: failing session as requested");
            return;
        }
        self.configured = !self.require_sync || self.has_sync();
    }

    fn init_b(&self) -> bool {
        true
    }

    fn done(&self) -> bool {
        self.configured
    }

    fn sleep_ms(&mut self, ms: u32) {
        self.slept_ms += ms as u64;
    }
}
