//! Interactions with the Linux SCSI generic (`sg`) driver.
//!
//! The sg driver lets user space hand a raw CDB to a SCSI device and get the status byte,
//! sense data, and any Data-In bytes back. Everything goes through a single blocking
//! `SG_IO` ioctl on an open `/dev/sgN` node.
//!
//! See the Linux SCSI Generic (sg) HOWTO, section 6 ("The SG_IO ioctl"):
//! <https://tldp.org/HOWTO/SCSI-Generic-HOWTO/sg_io.html>

mod io_hdr;

use std::fmt;
use std::future::Future;
use std::time::Duration;

pub use io_hdr::SgDevice;

use crate::error::Error;
use crate::scsi::command::CommandBlock;
use crate::scsi::command_descriptor::CommandDescriptorBlock;

/// Size of the sense buffer handed to the driver with every command.
pub const SENSE_BUFFER_LEN: usize = 32;

/// `dxfer_direction` values from `<scsi/sg.h>`.
#[repr(i32)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub enum DataDirection {
    /// Data-Out: from host to the device
    ToDevice = -2,
    /// Data-In: from the device to the host
    FromDevice = -3,
}

/// The data phase of a single command. Exactly one direction per command.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum DataPhase {
    /// Bytes sent to the device along with the CDB
    Out(Vec<u8>),
    /// Size of the buffer the device may fill
    In(usize),
}

/// Everything needed to execute one CDB.
///
/// The request owns its buffers so they can be moved onto the thread that blocks in the
/// ioctl, and stay put until the kernel is done with them.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferRequest {
    pub cdb: CommandDescriptorBlock,
    pub data: DataPhase,
    pub timeout: Duration,
}

impl TransferRequest {
    /// A Data-Out request: `payload` is sent to the device after the CDB.
    pub fn to_device(command: &CommandBlock, payload: &[u8]) -> Self {
        debug_assert_eq!(command.direction, DataDirection::ToDevice);
        debug_assert_eq!(command.data_transfer_len as usize, payload.len());
        Self {
            cdb: command.cdb,
            data: DataPhase::Out(payload.to_vec()),
            timeout: command.timeout,
        }
    }

    /// A Data-In request sized by the command's transfer length.
    pub fn from_device(command: &CommandBlock) -> Self {
        debug_assert_eq!(command.direction, DataDirection::FromDevice);
        Self {
            cdb: command.cdb,
            data: DataPhase::In(command.data_transfer_len as usize),
            timeout: command.timeout,
        }
    }

    pub fn direction(&self) -> DataDirection {
        match self.data {
            DataPhase::Out(_) => DataDirection::ToDevice,
            DataPhase::In(_) => DataDirection::FromDevice,
        }
    }

    /// Number of bytes in the data phase, whichever way it goes.
    pub fn data_transfer_len(&self) -> usize {
        match &self.data {
            DataPhase::Out(payload) => payload.len(),
            DataPhase::In(len) => *len,
        }
    }
}

/// Sense data written by the device when a command fails.
///
/// Only ever dumped for a human to read, never decoded.
#[derive(Copy, Clone, PartialEq, Eq)]
pub struct SenseBuffer {
    bytes: [u8; SENSE_BUFFER_LEN],
    /// `sb_len_wr`, how many bytes the driver actually wrote
    len_written: u8,
}

impl SenseBuffer {
    pub fn new(bytes: [u8; SENSE_BUFFER_LEN], len_written: u8) -> Self {
        Self { bytes, len_written }
    }

    pub fn empty() -> Self {
        Self::new([0; SENSE_BUFFER_LEN], 0)
    }

    /// The full buffer, including bytes the device didn't write.
    pub fn as_bytes(&self) -> &[u8; SENSE_BUFFER_LEN] {
        &self.bytes
    }

    pub fn is_empty(&self) -> bool {
        self.len_written == 0
    }
}

impl fmt::Debug for SenseBuffer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "SenseBuffer({})", hex::encode(self.bytes))
    }
}

/// What came back from the driver after a command ran.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct TransferOutcome {
    /// SCSI status byte reported by the device. Zero is GOOD.
    pub status: u8,
    pub masked_status: u8,
    pub host_status: u16,
    pub driver_status: u16,
    /// `dxfer_len` minus the number of bytes actually transferred
    pub residual: i32,
    /// Time the command took, as measured by the driver
    pub duration: Duration,
    pub sense: SenseBuffer,
    /// The Data-In buffer, truncated to the bytes actually transferred.
    /// Empty for Data-Out commands.
    pub data_in: Vec<u8>,
}

/// `driver_status` value set whenever sense data was returned; not a fault on its own.
const DRIVER_SENSE: u16 = 0x08;

impl TransferOutcome {
    pub fn is_good(&self) -> bool {
        self.status == 0
    }

    /// Whether the host adapter or the sg driver failed the command, e.g. `DID_TIME_OUT`
    /// or `DID_NO_CONNECT`. The device status byte means nothing when this is set.
    pub fn is_host_fault(&self) -> bool {
        let driver = self.driver_status & 0x0f;
        self.host_status != 0 || (driver != 0 && driver != DRIVER_SENSE)
    }
}

/// Trims a Data-In buffer to the bytes the device actually returned.
///
/// The residual is clamped, a bogus negative or oversized value leaves the buffer empty or
/// untouched rather than panicking.
pub(crate) fn truncate_to_transferred(mut buf: Vec<u8>, residual: i32) -> Vec<u8> {
    let residual = usize::try_from(residual).unwrap_or(0).min(buf.len());
    buf.truncate(buf.len() - residual);
    buf
}

/// A channel capable of executing SCSI commands against exactly one device.
pub trait Transport {
    /// Execute one command and wait for it to complete.
    ///
    /// Returns `Err` only when the host couldn't run the command at all. A command the
    /// device rejected still returns `Ok`, with a nonzero status in the outcome.
    fn execute(
        &mut self,
        request: TransferRequest,
    ) -> impl Future<Output = Result<TransferOutcome, Error>>;
}

/// Formats a byte slice as `0x1D 0x10 ...` for tracing.
pub struct HexBytes<'a>(pub &'a [u8]);

impl fmt::Display for HexBytes<'_> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for (i, byte) in self.0.iter().enumerate() {
            if i > 0 {
                f.write_str(" ")?;
            }
            write!(f, "0x{byte:02X}")?;
        }
        Ok(())
    }
}
