//! The `sg_io_hdr` structure and the `SG_IO` ioctl that consumes it.

use std::ffi::{c_int, c_uchar, c_uint, c_ushort, c_void};
use std::fs::File;
use std::io;
use std::os::fd::AsRawFd;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

use tracing::{debug, trace};

use super::{
    DataDirection, DataPhase, SENSE_BUFFER_LEN, SenseBuffer, TransferOutcome, TransferRequest,
    Transport, truncate_to_transferred,
};
use crate::error::Error;
use crate::scsi::command_descriptor::CommandDescriptorBlock;

/// `SG_IO` request number from `<scsi/sg.h>`.
const SG_IO: c_uint = 0x2285;

/// Identifies the header as a v3 `sg_io_hdr`.
const INTERFACE_ID: c_int = b'S' as c_int;

/// Mirrors `struct sg_io_hdr` from `<scsi/sg.h>`.
///
/// The pointer fields are only ever valid for the duration of a single ioctl; see
/// [`execute_blocking`].
#[repr(C)]
#[derive(Debug)]
#[allow(dead_code)]
pub struct SgIoHdr {
    /// Always `'S'`
    interface_id: c_int,
    /// One of the `SG_DXFER_*` values, see [`DataDirection`]
    dxfer_direction: c_int,
    /// Length of the CDB pointed to by `cmdp`
    cmd_len: c_uchar,
    /// Maximum number of sense bytes the driver may write to `sbp`
    mx_sb_len: c_uchar,
    /// Zero, scatter gather isn't used
    iovec_count: c_ushort,
    /// Length of the buffer pointed to by `dxferp`
    dxfer_len: c_uint,
    dxferp: *mut c_void,
    cmdp: *const c_uchar,
    sbp: *mut c_uchar,
    /// Milliseconds
    timeout: c_uint,
    flags: c_uint,
    pack_id: c_int,
    usr_ptr: *mut c_void,
    // Everything below is written by the driver.
    status: c_uchar,
    masked_status: c_uchar,
    msg_status: c_uchar,
    sb_len_wr: c_uchar,
    host_status: c_ushort,
    driver_status: c_ushort,
    resid: c_int,
    duration: c_uint,
    info: c_uint,
}

nix::ioctl_readwrite_bad!(sg_io, SG_IO, SgIoHdr);

impl SgIoHdr {
    /// Creates a header pointing into the provided buffers.
    ///
    /// The header stores raw pointers, the caller must keep every buffer alive and unmoved
    /// until the ioctl using this header has returned.
    fn new(
        cdb: &CommandDescriptorBlock,
        data: &mut [u8],
        sense: &mut [u8; SENSE_BUFFER_LEN],
        direction: DataDirection,
        timeout: Duration,
    ) -> Self {
        Self {
            interface_id: INTERFACE_ID,
            dxfer_direction: direction as c_int,
            cmd_len: cdb.len() as c_uchar,
            mx_sb_len: sense.len() as c_uchar,
            iovec_count: 0,
            dxfer_len: data.len() as c_uint,
            dxferp: data.as_mut_ptr().cast(),
            cmdp: cdb.as_ptr(),
            sbp: sense.as_mut_ptr(),
            timeout: c_uint::try_from(timeout.as_millis()).unwrap_or(c_uint::MAX),
            flags: 0,
            pack_id: 0,
            usr_ptr: std::ptr::null_mut(),
            status: 0,
            masked_status: 0,
            msg_status: 0,
            sb_len_wr: 0,
            host_status: 0,
            driver_status: 0,
            resid: 0,
            duration: 0,
            info: 0,
        }
    }
}

/// Runs a single `SG_IO` ioctl, blocking the calling thread until the driver returns.
fn execute_blocking(file: &File, request: TransferRequest) -> Result<TransferOutcome, Error> {
    let direction = request.direction();
    let mut data = match request.data {
        DataPhase::Out(payload) => payload,
        DataPhase::In(len) => vec![0; len],
    };
    let mut sense = [0; SENSE_BUFFER_LEN];

    let mut header = SgIoHdr::new(
        &request.cdb,
        &mut data,
        &mut sense,
        direction,
        request.timeout,
    );
    trace!(?header, "issuing SG_IO");
    // SAFETY: `request.cdb`, `data` and `sense` are all owned by this frame and aren't
    // touched again until the ioctl returns, so every pointer in the header stays valid.
    // `data` isn't resized while the header exists.
    unsafe { sg_io(file.as_raw_fd(), &mut header) }
        .map_err(|errno| Error::Transport(io::Error::from(errno)))?;

    trace!(?header, "SG_IO completed");

    let data_in = match direction {
        DataDirection::FromDevice => truncate_to_transferred(data, header.resid),
        DataDirection::ToDevice => Vec::new(),
    };

    Ok(TransferOutcome {
        status: header.status,
        masked_status: header.masked_status,
        host_status: header.host_status,
        driver_status: header.driver_status,
        residual: header.resid,
        duration: Duration::from_millis(header.duration.into()),
        sense: SenseBuffer::new(sense, header.sb_len_wr),
        data_in,
    })
}

/// An open SCSI generic device node, e.g. `/dev/sg4`.
///
/// The node is closed when this is dropped.
pub struct SgDevice {
    path: PathBuf,
    file: Arc<File>,
}

impl SgDevice {
    /// Opens the provided device node for reading and writing, which the sg driver
    /// requires for `SG_IO`.
    #[tracing::instrument]
    pub async fn open(path: &Path) -> Result<Self, Error> {
        debug!("opening device");
        let file = tokio::fs::OpenOptions::new()
            .read(true)
            .write(true)
            .open(path)
            .await
            .map_err(|source| Error::DeviceOpen {
                path: path.to_owned(),
                source,
            })?;
        Ok(Self {
            path: path.to_owned(),
            file: Arc::new(file.into_std().await),
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Transport for SgDevice {
    async fn execute(&mut self, request: TransferRequest) -> Result<TransferOutcome, Error> {
        let file = Arc::clone(&self.file);
        // The ioctl blocks, so it's moved off the runtime together with the buffers it
        // points into. Nothing else runs until it completes.
        tokio::task::spawn_blocking(move || execute_blocking(&file, request))
            .await
            .map_err(|e| Error::Transport(io::Error::other(e)))?
    }
}
