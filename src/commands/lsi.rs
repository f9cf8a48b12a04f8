//! Register and pin commands

use fpgaconf_host::info::lsi_info;
use fpgaconf_host::{LsiClient, Transport};

/// Run the lsi-read command
pub fn run_read<T: Transport + ?Sized>(
    transport: &mut T,
    addr: u8,
    count: usize,
) -> Result<(), Box<dyn std::error::Error>> {
    let values = LsiClient::new(transport).get_sequential(addr, count)?;
    for (i, v) in values.iter().enumerate() {
        println!("0x{:02x}: 0x{:08x}", addr.wrapping_add(i as u8), v);
    }
    Ok(())
}

/// Run the lsi-write command
pub fn run_write<T: Transport + ?Sized>(
    transport: &mut T,
    addr: u8,
    values: &[u32],
) -> Result<(), Box<dyn std::error::Error>> {
    LsiClient::new(transport).set_sequential(addr, values)?;
    Ok(())
}

/// Run the lsi-info command
pub fn run_info<T: Transport + ?Sized>(transport: &mut T) -> Result<(), Box<dyn std::error::Error>> {
    match lsi_info(transport)? {
        Some(info) if info.version != 0 => {
            println!("LSI version {}.{}", info.version, info.sub_version);
            if info.out_ep != 255 {
                println!("Bulk endpoints: out 0x{:02x}, in 0x{:02x}", info.out_ep, info.in_ep);
            }
        }
        _ => println!("Device has no LSI"),
    }
    Ok(())
}

/// Run the gpio command
pub fn run_gpio<T: Transport + ?Sized>(
    transport: &mut T,
    mask: u8,
    value: u8,
) -> Result<(), Box<dyn std::error::Error>> {
    let pins = LsiClient::new(transport).gpio(mask, value)?;
    println!("GPIO: {:04b}", pins & 0x0f);
    Ok(())
}

/// Run the reset command
pub fn run_reset<T: Transport + ?Sized>(
    transport: &mut T,
    leave: bool,
) -> Result<(), Box<dyn std::error::Error>> {
    LsiClient::new(transport).reset(leave)?;
    if leave {
        println!("Reset asserted");
    }
    Ok(())
}
