//! CLI command implementations
//!
//! Every command takes any [`Transport`](fpgaconf_host::Transport), so the
//! same code runs against real hardware and against the emulated device.

pub mod flash;
pub mod lsi;
pub mod upload;

use indicatif::ProgressStyle;

/// Create a standard progress bar style
fn create_progress_bar_style() -> Result<ProgressStyle, Box<dyn std::error::Error>> {
    Ok(ProgressStyle::default_bar()
        .template("{spinner:.green} [{elapsed_precise}] [{bar:40.cyan/blue}] {bytes}/{total_bytes} ({bytes_per_sec}, {eta}) {msg}")?
        .progress_chars("#>-"))
}

/// Style for a new bar, the plain default if the template is rejected
fn bar_style() -> ProgressStyle {
    create_progress_bar_style().unwrap_or_else(|_| ProgressStyle::default_bar())
}
