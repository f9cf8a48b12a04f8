//! Configuration commands

use indicatif::ProgressBar;
use fpgaconf_core::bitstream::BitOrderMode;
use fpgaconf_host::info::{config_status, system_reset};
use fpgaconf_host::upload::read_bitstream;
use fpgaconf_host::{upload_bitstream, Transport, UploadOptions, UploadProgress};
use std::fs::File;
use std::io::BufReader;
use std::path::Path;

use super::bar_style;

/// Progress reporter for uploads
#[derive(Default)]
pub struct UploadBar {
    bar: Option<ProgressBar>,
}

impl UploadProgress for UploadBar {
    fn attempt(&mut self, attempt: usize, fast: bool) {
        if let Some(pb) = self.bar.take() {
            pb.abandon_with_message("failed");
        }
        let pb = ProgressBar::new(0);
        pb.set_style(bar_style());
        pb.set_message(format!(
            "attempt {}{}",
            attempt + 1,
            if fast { " (fast)" } else { "" }
        ));
        self.bar = Some(pb);
    }

    fn transferred(&mut self, done: usize, total: usize) {
        if let Some(pb) = &self.bar {
            pb.set_length(total as u64);
            pb.set_position(done as u64);
        }
    }

    fn finished(&mut self, configured: bool) {
        if let Some(pb) = self.bar.take() {
            if configured {
                pb.finish_with_message("configured");
            } else {
                pb.abandon_with_message("failed");
            }
        }
    }
}

/// Run the upload command
pub fn run_upload<T: Transport + ?Sized>(
    transport: &mut T,
    input: &Path,
    bit_order: BitOrderMode,
    fast: bool,
    attempts: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let file = File::open(input)?;
    let bitstream = read_bitstream(BufReader::new(file), bit_order)?;
    println!(
        "Read {} bytes from {:?}, sending {} bytes ({:?} bit order)",
        bitstream.data_len(),
        input,
        bitstream.transfer_len(),
        bitstream.bit_order()
    );

    let options = UploadOptions {
        bit_order,
        fast,
        attempts,
    };
    let report = upload_bitstream(transport, &bitstream, options, &mut UploadBar::default())?;

    for w in &report.warnings {
        println!("Warning: {}", w);
    }
    println!(
        "FPGA configured after {} attempt(s){}, checksum 0x{:02x}",
        report.attempts,
        if report.fast { " using the fast endpoint" } else { "" },
        report.status.checksum
    );
    Ok(())
}

/// Run the status command
pub fn run_status<T: Transport + ?Sized>(transport: &mut T) -> Result<(), Box<dyn std::error::Error>> {
    let status = config_status(transport)?;
    println!(
        "Configured: {}",
        if status.configured { "yes" } else { "no" }
    );
    println!("Bytes received: {}", status.bytes);
    println!("Checksum: 0x{:02x}", status.checksum);
    println!("INIT_B diagnostic: {}", status.init_b);
    Ok(())
}

/// Run the system reset command
pub fn run_system_reset<T: Transport + ?Sized>(
    transport: &mut T,
    flash_boot: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    system_reset(transport, flash_boot)?;
    println!(
        "Reset requested{}",
        if flash_boot { "" } else { ", boot from flash disabled" }
    );
    Ok(())
}
