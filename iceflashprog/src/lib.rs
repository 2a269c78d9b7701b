///Turn on the flash chip. Every other flash operation fails with `Error::Unpowered` until this succeeds.
mod powerup;

///Turn off the flash chip. Powering down an already unpowered chip is not an error.
mod powerdown;

///Read the JEDEC manufacturer and device id of the flash chip.
mod jedecid;
pub use jedecid::*;

///Read a single page of flash memory.
mod readflashpage;

///Write a single page of flash memory. Short pages are padded with the erased value before transmission.
mod writeflashpage;

///Erase the sector containing the given address.
mod erasesector;

///Erase the block containing the given address. Not available on legacy firmware.
mod eraseblock;

///Erase the whole flash chip. Not available on legacy firmware.
mod erasechip;

/// Operation table, report framing and status codes
pub mod command;
pub use command::{Generation, Operation, ReportId, Status};

/// Serializes calls over the asynchronous stream of input reports
mod correlator;

/// Device lifecycle and identity resolution
mod device;
pub use device::*;

mod geometry;
pub use geometry::*;

/// In-memory report channel and flash emulator, for testing without hardware.
pub mod mock;

/// Page chunking and the erase, write, verify and read loops.
pub mod utils;

#[cfg(feature = "hidapi")]
mod hidapi_trait;
#[cfg(feature = "hidapi")]
pub use hidapi_trait::HidReportChannel;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("hid transmission failed: {0}")]
    Transmission(String),
    #[error("report channel is closed")]
    Closed,
    #[error("no iceflashprog device found{}", serial_suffix(.serial))]
    NoDeviceFound { serial: Option<String> },
    #[error("more than one iceflashprog device found {serials:?}")]
    MoreThanOneDeviceFound { serials: Vec<String> },

    #[error("protocol: operation {0:?} is not supported by {1:?} firmware")]
    InvalidOperation(Operation, Generation),
    #[error("protocol: invalid request data length for report {report:?}: {len}")]
    InvalidRequestLength { report: ReportId, len: usize },
    #[error("protocol: invalid response data length for report {report:?}: {len}")]
    InvalidResponseLength { report: ReportId, len: usize },
    #[error("protocol: invalid report id for response: expected {expected:?}, got {got}")]
    UnexpectedReportId { expected: ReportId, got: u8 },
    #[error("protocol: unknown status: {0}")]
    UnknownStatus(u8),
    #[error("protocol: got response without any request pending: report {id}: {data:?}")]
    UnsolicitedResponse { id: u8, data: Vec<u8> },
    #[error("protocol: got more data to write to flash than one page: {0}")]
    PageOverflow(usize),
    #[error("protocol: parse error: {0}")]
    Parse(String),
    #[error("no listener is running for this device")]
    NotListening,
    #[error("listener stopped while waiting for a response")]
    ListenerStopped,
    #[error("timed out waiting for a response")]
    Timeout,
    #[error("an earlier call timed out, responses can no longer be matched to requests")]
    Desynchronized,

    #[error("protocol: flash chip is unpowered")]
    Unpowered,
    #[error("protocol: invalid request")]
    InvalidRequest,
    #[error("protocol: invalid command id")]
    InvalidCommandId,
    #[error("protocol: invalid flash page read")]
    InvalidPageRead,
    #[error("protocol: invalid flash page write, failed to verify")]
    InvalidPageWrite,
    #[error("protocol: device is locked")]
    Locked,
    #[error("protocol: failed to power down: {0}")]
    PowerDownFailed(#[source] Box<Error>),

    #[error("mismatch at flash address {address:#08x}")]
    Mismatch { address: u32 },
    #[error("image of {len} bytes does not fit in {capacity} bytes of flash")]
    ImageTooLarge { len: usize, capacity: u32 },
}

fn serial_suffix(serial: &Option<String>) -> String {
    match serial {
        Some(s) => format!(" [{:?}]", s),
        None => String::new(),
    }
}

impl From<scroll::Error> for Error {
    fn from(err: scroll::Error) -> Self {
        Error::Parse(err.to_string())
    }
}

///One identified report, in either direction.
#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub id: u8,
    pub data: Vec<u8>,
}

///trait to implement HID report channels
///
///The listener thread receives while calls send, so implementations must be usable from both at once.
pub trait ReportChannel: Send + Sync {
    fn send_output_report(&self, id: u8, data: &[u8]) -> Result<(), Error>;
    ///Blocks until an input report arrives. Returns `Error::Closed` once the channel has been closed.
    fn receive_input_report(&self) -> Result<Report, Error>;
    fn close(&self) -> Result<(), Error>;
}
