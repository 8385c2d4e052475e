//! Underlying structures that commands are issued in

/// Every CDB this tool issues is a 6 byte CDB.
pub const CDB_LEN: usize = 6;

/// A serialized command descriptor block, exactly as it's handed to the transport.
pub type CommandDescriptorBlock = [u8; CDB_LEN];

/// Operation codes for a Command Descriptor Block, specifying what operation you want
/// to do as described in 7.1 of SPC-2.
///
/// Only the diagnostic commands are needed here.
#[repr(u8)]
#[derive(Copy, Clone, Debug, PartialEq, Eq)]
#[non_exhaustive]
pub enum OpCode {
    /// SPC-2 7.17
    ReceiveDiagnosticResults = 0x1C,
    /// SPC-2 7.23
    SendDiagnostic = 0x1D,
}

/// The 6 byte CDB layout shared by `SEND DIAGNOSTIC` and `RECEIVE DIAGNOSTIC RESULTS`.
///
/// SPC-2 tables 145 and 157. Both commands carry a single flags byte, a page code byte
/// (reserved for `SEND DIAGNOSTIC`), and a big endian 16-bit length.
#[derive(Copy, Clone, Debug)]
pub struct X6CommandDescriptor {
    /// This field specifies what command is being issued by the host
    /// to the drive.
    pub operation_code: OpCode,
    /// For `SEND DIAGNOSTIC`: SELF-TEST CODE, PF, SELFTEST, DEVOFFL and UNITOFFL.
    ///
    /// For `RECEIVE DIAGNOSTIC RESULTS`: bit 0 is PCV ("page code valid").
    pub flags: u8,
    /// The diagnostic page requested by `RECEIVE DIAGNOSTIC RESULTS`.
    /// Reserved (zero) for `SEND DIAGNOSTIC`.
    pub page_code: u8,
    /// Depending on the opcode, this field is either `PARAMETER LIST LENGTH` (number of
    /// bytes sent from the Data-Out buffer) or `ALLOCATION LENGTH` (the maximum number of
    /// bytes a client has allocated for returned data).
    pub misc_len: u16,
    /// "The contents of the `CONTROL` field are defined in SAM-2. The `CONTROL` field
    /// has a consistently defined meaning across all commands."
    ///
    /// As far as I can tell, this value is set to zero by most modern implementations.
    pub control: u8,
}

impl X6CommandDescriptor {
    /// Lays the descriptor out on the wire.
    pub const fn into_block(self) -> CommandDescriptorBlock {
        let [len_hi, len_lo] = self.misc_len.to_be_bytes();
        [
            self.operation_code as u8,
            self.flags,
            self.page_code,
            len_hi,
            len_lo,
            self.control,
        ]
    }
}
