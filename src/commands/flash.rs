//! Flash commands

use indicatif::ProgressBar;
use fpgaconf_host::flash::flash_diagnostics;
use fpgaconf_host::{FlashClient, FlashProgress, Transport};
use std::fs::File;
use std::io::{Read, Write};
use std::path::Path;

use super::bar_style;

/// Progress reporter for sector transfers
pub struct FlashBar {
    phase: &'static str,
    bar: Option<ProgressBar>,
}

impl FlashBar {
    pub fn new(phase: &'static str) -> Self {
        Self { phase, bar: None }
    }
}

impl FlashProgress for FlashBar {
    fn start(&mut self, total_bytes: usize) {
        let pb = ProgressBar::new(total_bytes as u64);
        pb.set_style(bar_style());
        self.bar = Some(pb);
    }

    fn sector(&mut self, sector: u32) {
        if let Some(pb) = &self.bar {
            pb.set_message(format!("{} sector {}", self.phase, sector));
        }
    }

    fn advance(&mut self, bytes: usize) {
        if let Some(pb) = &self.bar {
            pb.inc(bytes as u64);
        }
    }

    fn complete(&mut self) {
        if let Some(pb) = self.bar.take() {
            pb.finish_with_message(format!("{} complete", self.phase));
        }
    }
}

/// Run the flash-info command
pub fn run_info<T: Transport + ?Sized>(transport: &mut T) -> Result<(), Box<dyn std::error::Error>> {
    let diag = flash_diagnostics(transport)?;
    let flash = FlashClient::open(transport)?;
    let info = flash.info();
    println!(
        "Flash: {} sectors of {} bytes ({} KiB)",
        info.sectors,
        info.sector_size,
        info.capacity() / 1024
    );
    println!(
        "ID: vendor 0x{:02x}, device 0x{:02x}, memory type 0x{:02x}",
        diag.vendor, diag.device, diag.memtype
    );
    if info.error != 0 {
        println!("Last error: {}", info.error);
    }
    Ok(())
}

/// Run the flash-read command
pub fn run_read<T: Transport + ?Sized>(
    transport: &mut T,
    sector: u32,
    count: u32,
    output: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut flash = FlashClient::open(transport)?;
    let data = flash.read(sector, count, &mut FlashBar::new("Reading"))?;

    let mut file = File::create(output)?;
    file.write_all(&data)?;
    println!("Wrote {} bytes to {:?}", data.len(), output);
    Ok(())
}

/// Run the flash-write command
pub fn run_write<T: Transport + ?Sized>(
    transport: &mut T,
    sector: u32,
    input: &Path,
) -> Result<(), Box<dyn std::error::Error>> {
    let mut data = Vec::new();
    File::open(input)?.read_to_end(&mut data)?;
    println!("Read {} bytes from {:?}", data.len(), input);
    if data.is_empty() {
        return Err("input file is empty".into());
    }

    let mut flash = FlashClient::open(transport)?;
    flash.write(sector, &data, &mut FlashBar::new("Writing"))?;
    println!(
        "Programmed {} bytes from sector {}",
        data.len(),
        sector
    );
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use fpgaconf_dummy::loopback;

    #[test]
    fn test_write_then_read_files() {
        let dir = std::env::temp_dir();
        let input = dir.join(format!("fpgaconf-flash-in-{}.bin", std::process::id()));
        let output = dir.join(format!("fpgaconf-flash-out-{}.bin", std::process::id()));
        let image: Vec<u8> = (0..70000u32).map(|i| (i % 253) as u8).collect();
        std::fs::write(&input, &image).unwrap();

        let mut lb = loopback(false).unwrap();
        run_info(&mut lb).unwrap();
        run_write(&mut lb, 4, &input).unwrap();
        run_read(&mut lb, 4, 2, &output).unwrap();

        let back = std::fs::read(&output).unwrap();
        assert_eq!(back.len(), 2 * 65536);
        assert_eq!(&back[..image.len()], &image[..]);
        assert!(back[image.len()..].iter().all(|&b| b == 0xff));

        std::fs::remove_file(&input).unwrap();
        std::fs::remove_file(&output).unwrap();
    }
}
