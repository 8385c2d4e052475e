//! Everything that can abort a temperature reading.

use std::io;
use std::path::PathBuf;

use crate::sg::SenseBuffer;

#[derive(thiserror::Error, Debug)]
pub enum Error {
    #[error("failed to open device {}: {source}", path.display())]
    DeviceOpen { path: PathBuf, source: io::Error },

    /// The host couldn't execute the command at all.
    #[error("SG_IO ioctl failed: {0}")]
    Transport(#[source] io::Error),

    /// The device ran the command and reported a non-GOOD status.
    #[error("{command} failed with status: {status:#04x}")]
    CommandStatus {
        command: &'static str,
        status: u8,
        sense: SenseBuffer,
    },

    #[error("diagnostic page is too short: got {len} bytes, need at least {required}")]
    PageTooShort { len: usize, required: usize },

    #[error("error parsing byte pair {pair:?} at offset {offset}")]
    InvalidHexPair {
        offset: usize,
        pair: String,
        #[source]
        source: hex::FromHexError,
    },

    #[error("invalid temperature digits {digits:?}")]
    InvalidTemperatureDigits { digits: String },
}
