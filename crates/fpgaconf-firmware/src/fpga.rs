//! FPGA configuration session
//!
//! Configuration data reaches the FPGA either through EP0 (CPU mode, one
//! control transfer per piece) or through a bulk endpoint wired to the
//! configuration port (fast mode). A session starts with the first piece of
//! data after a reset and ends when a short EP0 transfer or the fast finish
//! command arrives.

use fpgaconf_core::protocol::{
    Command, ConfigStatus, FastConfigInfo, Request, END_OF_STREAM_GRANULARITY,
};

use crate::dispatch::{Dispatcher, Ep0Buffer, HandlerFault, RegistryFull, SetupPacket};

/// Longest wait for INIT_B after starting configuration, in ms
pub const INIT_B_TIMEOUT_MS: u32 = 255;
/// Trailing bytes clocked into the FPGA after CPU-mode configuration
pub const EXTRA_CLOCK_BYTES: usize = 16;

/// How configuration data reaches the port
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigMode {
    /// Data written by the CPU from EP0 transfers
    Cpu,
    /// Data streamed from the fast configuration endpoint
    Fast,
}

/// Configuration port failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct PortError;

/// The FPGA's configuration interface
pub trait ConfigPort {
    /// Pulse PROGRAM_B and prepare the port for new data
    fn reset(&mut self);
    /// Connect the port for `mode`
    fn start(&mut self, mode: ConfigMode) -> Result<(), PortError>;
    /// Clock `data` into the FPGA
    fn send(&mut self, data: &[u8]) -> Result<(), PortError>;
    /// Disconnect the port
    fn stop(&mut self);
    /// State of INIT_B
    fn init_b(&self) -> bool;
    /// State of DONE
    fn done(&self) -> bool;
    /// Sleep for `ms` milliseconds
    fn sleep_ms(&mut self, ms: u32);
}

/// Session state
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConfigState {
    /// No configuration in progress
    Idle,
    /// Accepting data
    Receiving(ConfigMode),
}

/// Configuration session bookkeeping
pub struct FpgaConfig<P> {
    port: P,
    state: ConfigState,
    checksum: u8,
    bytes: u32,
    init_b: u8,
    fast: Option<FastConfigInfo>,
}

impl<P: ConfigPort> FpgaConfig<P> {
    /// Create the session handler; `fast` describes the bulk endpoint if any
    pub fn new(port: P, fast: Option<FastConfigInfo>) -> Self {
        Self {
            port,
            state: ConfigState::Idle,
            checksum: 0,
            bytes: 0,
            init_b: 0,
            fast,
        }
    }

    /// Reset the FPGA and drop any running session
    pub fn reset(&mut self) {
        if self.state != ConfigState::Idle {
            self.port.stop();
        }
        self.port.reset();
        self.state = ConfigState::Idle;
    }

    /// Start a session in `mode` unless one is already running in that mode
    pub fn start(&mut self, mode: ConfigMode) -> Result<(), PortError> {
        if self.state == ConfigState::Receiving(mode) {
            return Ok(());
        }
        self.reset();
        self.port.start(mode)?;
        self.state = ConfigState::Receiving(mode);

        let mut waited = 0;
        while !self.port.init_b() && waited < INIT_B_TIMEOUT_MS {
            self.port.sleep_ms(1);
            waited += 1;
        }
        self.init_b = if self.port.init_b() { 200 } else { 100 };
        self.checksum = 0;
        self.bytes = 0;
        log::debug!("configuration started ({:?}, INIT_B after {} ms)", mode, waited);
        Ok(())
    }

    /// Forward data of a running session
    pub fn send(&mut self, data: &[u8]) -> Result<(), PortError> {
        self.checksum = data.iter().fold(self.checksum, |c, &b| c.wrapping_add(b));
        self.bytes = self.bytes.wrapping_add(data.len() as u32);
        self.port.send(data)
    }

    /// End the session
    pub fn done(&mut self) {
        self.init_b = self
            .init_b
            .wrapping_add(if self.port.init_b() { 22 } else { 11 });
        if self.state == ConfigState::Receiving(ConfigMode::Cpu) {
            if self.port.send(&[0u8; EXTRA_CLOCK_BYTES]).is_err() {
                log::warn!("failed to send trailing configuration clocks");
            }
        }
        self.port.stop();
        self.state = ConfigState::Idle;
        if self.port.done() {
            log::info!("FPGA configured, {} bytes", self.bytes);
        } else {
            log::warn!(
                "FPGA not configured after {} bytes (INIT_B diagnostic {})",
                self.bytes,
                self.init_b
            );
        }
    }

    /// Status as reported to the host
    pub fn status(&self) -> ConfigStatus {
        ConfigStatus {
            configured: self.port.done(),
            checksum: self.checksum,
            bytes: self.bytes,
            init_b: self.init_b,
            flash_result: 0,
            bit_order: 0,
        }
    }

    /// Bulk data for the fast configuration endpoint
    pub fn fast_data(&mut self, data: &[u8]) -> Result<(), PortError> {
        if self.state != ConfigState::Receiving(ConfigMode::Fast) {
            log::warn!("dropping {} bytes of fast configuration data", data.len());
            return Err(PortError);
        }
        self.send(data)
    }

    /// Current state
    pub fn state(&self) -> ConfigState {
        self.state
    }

    /// Fast configuration endpoint, if any
    pub fn fast_info(&self) -> Option<FastConfigInfo> {
        self.fast
    }

    /// The configuration port
    pub fn port(&self) -> &P {
        &self.port
    }

    /// The configuration port, mutably
    pub fn port_mut(&mut self) -> &mut P {
        &mut self.port
    }
}

/// Access to the configuration session inside a device context
pub trait FpgaAccess {
    /// Configuration port
    type Port: ConfigPort;
    /// The session
    fn fpga(&mut self) -> &mut FpgaConfig<Self::Port>;
}

impl From<PortError> for HandlerFault {
    fn from(_: PortError) -> Self {
        HandlerFault::OTHER
    }
}

/// Configuration status request
pub fn config_status<T: FpgaAccess>(
    ctx: &mut T,
    _: &SetupPacket,
    buf: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    let status = ctx.fpga().status();
    buf.extend_from_slice(&status.to_bytes())
        .map_err(|_| HandlerFault::OTHER)
}

/// Configuration reset command
pub fn config_reset<T: FpgaAccess>(
    ctx: &mut T,
    _: &SetupPacket,
    _: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    ctx.fpga().reset();
    Ok(())
}

/// Configuration data command; a short transfer ends the session
pub fn config_send<T: FpgaAccess>(
    ctx: &mut T,
    _: &SetupPacket,
    buf: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    let fpga = ctx.fpga();
    fpga.start(ConfigMode::Cpu)?;
    let r = if buf.is_empty() { Ok(()) } else { fpga.send(buf) };
    if buf.is_empty() || buf.len() % END_OF_STREAM_GRANULARITY != 0 {
        fpga.done();
    }
    r.map_err(HandlerFault::from)
}

/// Fast configuration info request
pub fn fast_config_info<T: FpgaAccess>(
    ctx: &mut T,
    _: &SetupPacket,
    buf: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    let info = ctx.fpga().fast_info().ok_or(HandlerFault::OTHER)?;
    buf.extend_from_slice(&info.to_bytes())
        .map_err(|_| HandlerFault::OTHER)
}

/// Fast configuration start command
pub fn fast_config_start<T: FpgaAccess>(
    ctx: &mut T,
    _: &SetupPacket,
    _: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    ctx.fpga().start(ConfigMode::Fast)?;
    Ok(())
}

/// Fast configuration finish command
pub fn fast_config_finish<T: FpgaAccess>(
    ctx: &mut T,
    _: &SetupPacket,
    _: &mut Ep0Buffer,
) -> Result<(), HandlerFault> {
    ctx.fpga().done();
    Ok(())
}

/// Register the configuration handlers; the fast path only if available
pub fn register<T: FpgaAccess>(d: &mut Dispatcher<T>, fast: bool) -> Result<(), RegistryFull> {
    d.register_request(Request::ConfigStatus.code(), config_status::<T>)?;
    d.register_command(Command::ConfigReset.code(), config_reset::<T>)?;
    d.register_command(Command::ConfigSend.code(), config_send::<T>)?;
    if fast {
        d.register_request(Request::FastConfigInfo.code(), fast_config_info::<T>)?;
        d.register_command(Command::FastConfigStart.code(), fast_config_start::<T>)?;
        d.register_command(Command::FastConfigFinish.code(), fast_config_finish::<T>)?;
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::vec::Vec;

    #[derive(Default)]
    struct Port {
        data: Vec<u8>,
        resets: u32,
        starts: Vec<ConfigMode>,
        running: bool,
        init_b_after: u32,
        slept: u32,
        done_after: Option<usize>,
    }

    impl ConfigPort for Port {
        fn reset(&mut self) {
            self.resets += 1;
            self.data.clear();
        }
        fn start(&mut self, mode: ConfigMode) -> Result<(), PortError> {
            self.starts.push(mode);
            self.running = true;
            Ok(())
        }
        fn send(&mut self, data: &[u8]) -> Result<(), PortError> {
            if !self.running {
                return Err(PortError);
            }
            self.data.extend_from_slice(data);
            Ok(())
        }
        fn stop(&mut self) {
            self.running = false;
        }
        fn init_b(&self) -> bool {
            self.slept >= self.init_b_after
        }
        fn done(&self) -> bool {
            self.done_after.map_or(false, |n| self.data.len() >= n)
        }
        fn sleep_ms(&mut self, ms: u32) {
            self.slept += ms;
        }
    }

    #[test]
    fn test_session_counts_and_extra_clocks() {
        let mut fpga = FpgaConfig::new(
            Port {
                init_b_after: 3,
                done_after: Some(66),
                ..Default::default()
            },
            None,
        );
        fpga.start(ConfigMode::Cpu).unwrap();
        assert_eq!(fpga.port().slept, 3);
        fpga.send(&[0x80; 64]).unwrap();
        fpga.start(ConfigMode::Cpu).unwrap();
        fpga.send(&[0x80, 0x81]).unwrap();
        fpga.done();

        assert_eq!(fpga.state(), ConfigState::Idle);
        assert_eq!(fpga.port().starts, [ConfigMode::Cpu]);
        assert_eq!(fpga.port().data.len(), 66 + EXTRA_CLOCK_BYTES);
        let status = fpga.status();
        assert!(status.configured);
        assert_eq!(status.bytes, 66);
        assert_eq!(status.checksum, 0x01);
        assert_eq!(status.init_b, 222);
    }

    #[test]
    fn test_init_b_timeout_diagnostic() {
        let mut fpga = FpgaConfig::new(
            Port {
                init_b_after: 1000,
                ..Default::default()
            },
            None,
        );
        fpga.start(ConfigMode::Fast).unwrap();
        assert_eq!(fpga.port().slept, INIT_B_TIMEOUT_MS);
        fpga.done();
        let status = fpga.status();
        assert!(!status.configured);
        assert_eq!(status.init_b, 111);
        // No trailing clocks in fast mode
        assert!(fpga.port().data.is_empty());
    }

    #[test]
    fn test_mode_change_restarts() {
        let mut fpga = FpgaConfig::new(Port::default(), None);
        fpga.start(ConfigMode::Cpu).unwrap();
        fpga.send(&[1, 2, 3]).unwrap();
        fpga.start(ConfigMode::Fast).unwrap();
        assert_eq!(fpga.status().bytes, 0);
        assert_eq!(fpga.port().starts, [ConfigMode::Cpu, ConfigMode::Fast]);
        assert_eq!(fpga.port().resets, 2);
    }

    #[test]
    fn test_fast_data_requires_fast_session() {
        let mut fpga = FpgaConfig::new(Port::default(), None);
        assert_eq!(fpga.fast_data(&[1]), Err(PortError));
        fpga.start(ConfigMode::Cpu).unwrap();
        assert_eq!(fpga.fast_data(&[1]), Err(PortError));
        fpga.start(ConfigMode::Fast).unwrap();
        fpga.fast_data(&[1, 2]).unwrap();
        assert_eq!(fpga.status().bytes, 2);
    }

    #[test]
    fn test_reset_ends_session() {
        let mut fpga = FpgaConfig::new(Port::default(), None);
        fpga.start(ConfigMode::Cpu).unwrap();
        fpga.reset();
        assert_eq!(fpga.state(), ConfigState::Idle);
        assert!(!fpga.port().running);
    }
}
