//! fpgaconf - Configure FPGA-attached accelerators over USB
//!
//! The tool talks to the device through the vendor control requests
//! implemented by `fpgaconf-host`:
//! - **upload** streams a bitstream to the FPGA, retrying and falling back
//!   from the fast bulk endpoint to control transfers
//! - **flash-*** reads and programs the configuration flash sector by sector
//! - **lsi-*** and **gpio** access registers and pins of the running design

mod cli;
mod commands;

use clap::Parser;
use cli::{Cli, Commands};
use fpgaconf_host::usb::{parse_vid_pid, UsbTransport};

fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Initialize logger
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or("info")).init();

    let cli = Cli::parse();

    // Set log level based on verbosity
    match cli.verbose {
        0 => {} // default (info)
        1 => log::set_max_level(log::LevelFilter::Debug),
        _ => log::set_max_level(log::LevelFilter::Trace),
    }

    let (vid, pid) = parse_vid_pid(&cli.device)?;
    let mut transport = UsbTransport::open(vid, pid)?;
    let t = &mut transport;

    match cli.command {
        Commands::Upload {
            input,
            bit_order,
            no_fast,
            attempts,
        } => commands::upload::run_upload(t, &input, bit_order.into(), !no_fast, attempts),
        Commands::Status => commands::upload::run_status(t),
        Commands::FlashInfo => commands::flash::run_info(t),
        Commands::FlashRead {
            sector,
            count,
            output,
        } => commands::flash::run_read(t, sector, count, &output),
        Commands::FlashWrite { sector, input } => commands::flash::run_write(t, sector, &input),
        Commands::LsiRead { addr, count } => commands::lsi::run_read(t, addr, count),
        Commands::LsiWrite { addr, values } => commands::lsi::run_write(t, addr, &values),
        Commands::LsiInfo => commands::lsi::run_info(t),
        Commands::Gpio { mask, value } => commands::lsi::run_gpio(t, mask, value),
        Commands::Reset { leave } => commands::lsi::run_reset(t, leave),
        Commands::SystemReset { no_flash_boot } => {
            commands::upload::run_system_reset(t, !no_flash_boot)
        }
    }
}
