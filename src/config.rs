//! Command line configuration.

use std::path::PathBuf;

use clap::Parser;
use tracing::Level;

/// Reads the maximum internal temperature a tape drive has recorded since the
/// cartridge was loaded.
#[derive(Parser, Clone, Debug)]
#[command(version, after_help = "Example: lto-maxtemp --verbose /dev/sg4")]
pub struct Config {
    /// SCSI generic device node of the drive
    #[arg(value_name = "SCSI_DEVICE")]
    pub device: PathBuf,

    /// Enable verbose output
    #[arg(short, long)]
    pub verbose: bool,
}

impl Config {
    /// Most detailed level of tracing output written to stderr.
    pub fn max_level(&self) -> Level {
        if self.verbose { Level::DEBUG } else { Level::WARN }
    }
}
