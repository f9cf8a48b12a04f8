//! CLI argument parsing

use clap::{Parser, Subcommand, ValueEnum};
use fpgaconf_core::bitstream::BitOrderMode;
use std::path::PathBuf;

/// Parse a string as a hex or decimal u32
pub fn parse_hex_u32(s: &str) -> Result<u32, String> {
    if let Some(hex) = s.strip_prefix("0x").or_else(|| s.strip_prefix("0X")) {
        u32::from_str_radix(hex, 16).map_err(|e| format!("Invalid hex value: {}", e))
    } else {
        s.parse::<u32>().map_err(|e| format!("Invalid number: {}", e))
    }
}

/// Parse a string as a hex or decimal u8
fn parse_hex_u8(s: &str) -> Result<u8, String> {
    let v = parse_hex_u32(s)?;
    u8::try_from(v).map_err(|_| format!("Value out of range: {}", s))
}

#[derive(Parser)]
#[command(name = "fpgaconf")]
#[command(author, version, about = "FPGA accelerator configuration tool", long_about = None)]
pub struct Cli {
    /// Verbosity level (-v, -vv)
    #[arg(short, long, action = clap::ArgAction::Count, global = true)]
    pub verbose: u8,

    /// USB vendor and product ID of the device (hex)
    #[arg(short, long, default_value = "221a:0100", global = true)]
    pub device: String,

    #[command(subcommand)]
    pub command: Commands,
}

/// Bit order choice for `upload`
#[derive(ValueEnum, Debug, Clone, Copy, Default)]
pub enum BitOrderArg {
    /// Detect from the sync word
    #[default]
    Auto,
    /// Send bytes as they are
    Normal,
    /// Reverse the bits of every byte
    Reversed,
}

impl From<BitOrderArg> for BitOrderMode {
    fn from(arg: BitOrderArg) -> Self {
        match arg {
            BitOrderArg::Auto => BitOrderMode::Auto,
            BitOrderArg::Normal => BitOrderMode::Normal,
            BitOrderArg::Reversed => BitOrderMode::Reversed,
        }
    }
}

#[derive(Subcommand)]
pub enum Commands {
    /// Configure the FPGA with a bitstream file
    Upload {
        /// Bitstream file
        input: PathBuf,

        /// Bit order of the file
        #[arg(long, value_enum, default_value_t = BitOrderArg::Auto)]
        bit_order: BitOrderArg,

        /// Only use control transfers, even if the device has a fast endpoint
        #[arg(long)]
        no_fast: bool,

        /// Number of configuration attempts
        #[arg(long, default_value = "5")]
        attempts: usize,
    },

    /// Show the configuration status
    Status,

    /// Show flash geometry and identification
    FlashInfo,

    /// Read flash sectors to a file
    FlashRead {
        /// First sector
        #[arg(short, long, value_parser = parse_hex_u32)]
        sector: u32,

        /// Number of sectors
        #[arg(short, long, default_value = "1", value_parser = parse_hex_u32)]
        count: u32,

        /// Output file path
        #[arg(short, long)]
        output: PathBuf,
    },

    /// Write a file to flash, starting at a sector
    FlashWrite {
        /// First sector
        #[arg(short, long, value_parser = parse_hex_u32)]
        sector: u32,

        /// Input file path
        input: PathBuf,
    },

    /// Read LSI registers
    LsiRead {
        /// First register address
        #[arg(value_parser = parse_hex_u8)]
        addr: u8,

        /// Number of consecutive registers
        #[arg(short, long, default_value = "1")]
        count: usize,
    },

    /// Write consecutive LSI registers
    LsiWrite {
        /// First register address
        #[arg(value_parser = parse_hex_u8)]
        addr: u8,

        /// Register values (hex or decimal)
        #[arg(required = true, value_parser = parse_hex_u32)]
        values: Vec<u32>,
    },

    /// Show the LSI interface description
    LsiInfo,

    /// Drive and read the GPIO pins
    Gpio {
        /// Pins to drive (bit 0 to 3)
        #[arg(long, default_value = "0", value_parser = parse_hex_u8)]
        mask: u8,

        /// Levels for the driven pins
        #[arg(long, default_value = "0", value_parser = parse_hex_u8)]
        value: u8,
    },

    /// Pulse the FPGA application reset
    Reset {
        /// Leave reset asserted
        #[arg(long)]
        leave: bool,
    },

    /// Reset the controller
    SystemReset {
        /// Do not boot the FPGA from flash after the reset
        #[arg(long)]
        no_flash_boot: bool,
    },
}
