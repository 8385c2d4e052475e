//! Representations for the SCSI commands issued to the drive.
//!
//! Commands are exposed as a function that returns a [`CommandBlock`], wrapping the more
//! granular [`X6CommandDescriptor`] with what the transport needs to know to run it.
//!
//! The drive reports its maximum internal temperature through a vendor specific
//! diagnostic page (0x93). Reading it takes two commands: `SEND DIAGNOSTIC` with a
//! parameter list selecting the page, then `RECEIVE DIAGNOSTIC RESULTS` to fetch it.

use std::time::Duration;

use super::command_descriptor::*;
use crate::sg::DataDirection;

/// Vendor diagnostic page holding the temperature record.
pub const TEMPERATURE_PAGE: u8 = 0x93;

/// Length of the parameter list sent with `SEND DIAGNOSTIC`.
pub const DIAGNOSTIC_PARAMETERS_LEN: usize = 8;

/// Bytes requested from `RECEIVE DIAGNOSTIC RESULTS`. Enough to capture the whole page.
pub const DIAGNOSTIC_PAGE_LEN: usize = 68;

/// The parameter list sent with `SEND DIAGNOSTIC`.
pub type DiagnosticParameterBlock = [u8; DIAGNOSTIC_PARAMETERS_LEN];

/// A serialized command block ready to be submitted
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
pub struct CommandBlock {
    /// Human readable command name, for logs and errors
    pub name: &'static str,
    pub cdb: CommandDescriptorBlock,
    pub direction: DataDirection,
    pub data_transfer_len: u32,
    pub timeout: Duration,
}

/// Page Format bit of the `SEND DIAGNOSTIC` CDB: a parameter list follows.
const SEND_DIAGNOSTIC_PF: u8 = 0b0001_0000;
/// Page Code Valid bit of the `RECEIVE DIAGNOSTIC RESULTS` CDB.
const RECEIVE_DIAGNOSTIC_PCV: u8 = 0b0000_0001;

/// "The SEND DIAGNOSTIC command requests the device server to perform diagnostic
/// operations on the target, on the logical unit, or on both."
///
/// The PF bit is set and the 8 byte parameter list from [`send_diagnostic_parameters`]
/// follows in the Data-Out buffer. Running the diagnostic can take a while, hence the
/// long timeout.
///
/// SPC-2 7.23
pub fn send_diagnostic() -> CommandBlock {
    CommandBlock {
        name: "SEND DIAGNOSTIC",
        cdb: X6CommandDescriptor {
            operation_code: OpCode::SendDiagnostic,
            flags: SEND_DIAGNOSTIC_PF,
            page_code: 0,
            misc_len: DIAGNOSTIC_PARAMETERS_LEN as u16,
            control: 0,
        }
        .into_block(),
        direction: DataDirection::ToDevice,
        data_transfer_len: DIAGNOSTIC_PARAMETERS_LEN as u32,
        timeout: Duration::from_secs(60),
    }
}

/// Parameter list for [`send_diagnostic`], selecting the temperature page.
///
/// Byte 0 is the page code, bytes 2..4 the page length, and the remaining bytes are
/// vendor specific.
pub fn send_diagnostic_parameters() -> DiagnosticParameterBlock {
    [TEMPERATURE_PAGE, 0x00, 0x00, 0x04, 0x00, 0x00, 0x20, 0x2A]
}

/// "The RECEIVE DIAGNOSTIC RESULTS command requests analysis data be sent to the
/// application client Data-In Buffer after completion of a SEND DIAGNOSTIC command."
///
/// SPC-2 7.17
pub fn receive_diagnostic_results() -> CommandBlock {
    CommandBlock {
        name: "RECEIVE DIAGNOSTIC RESULTS",
        cdb: X6CommandDescriptor {
            operation_code: OpCode::ReceiveDiagnosticResults,
            flags: RECEIVE_DIAGNOSTIC_PCV,
            page_code: TEMPERATURE_PAGE,
            misc_len: DIAGNOSTIC_PAGE_LEN as u16,
            control: 0,
        }
        .into_block(),
        direction: DataDirection::FromDevice,
        data_transfer_len: DIAGNOSTIC_PAGE_LEN as u32,
        timeout: Duration::from_secs(10),
    }
}
