use crate::{Error, Report, ReportChannel};
use hidapi::HidDevice;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::thread;

//milliseconds the listener may hold the device per read attempt
const POLL_INTERVAL: i32 = 2;

//report id byte plus the largest report, with room to spare
const READ_BUFFER_SIZE: usize = 512;

///Report channel over a hidapi device. Reads poll with a short timeout so writes and `close` get
///the device in between.
pub struct HidReportChannel {
    device: Mutex<Option<HidDevice>>,
    closed: AtomicBool,
    writers: AtomicUsize,
}

impl HidReportChannel {
    pub fn new(device: HidDevice) -> Self {
        HidReportChannel {
            device: Mutex::new(Some(device)),
            closed: AtomicBool::new(false),
            writers: AtomicUsize::new(0),
        }
    }

    fn device(&self) -> MutexGuard<'_, Option<HidDevice>> {
        self.device.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl ReportChannel for HidReportChannel {
    fn send_output_report(&self, id: u8, data: &[u8]) -> Result<(), Error> {
        let mut buffer = Vec::with_capacity(data.len() + 1);
        buffer.push(id);
        buffer.extend_from_slice(data);

        self.writers.fetch_add(1, Ordering::SeqCst);
        let result = match self.device().as_ref() {
            Some(d) => d.write(&buffer).map(|_| ()).map_err(|e| e.into()),
            None => Err(Error::Closed),
        };
        self.writers.fetch_sub(1, Ordering::SeqCst);

        result
    }

    fn receive_input_report(&self) -> Result<Report, Error> {
        let mut buf = [0_u8; READ_BUFFER_SIZE];

        loop {
            if self.closed.load(Ordering::SeqCst) {
                return Err(Error::Closed);
            }

            // let a pending write through first
            if self.writers.load(Ordering::SeqCst) > 0 {
                thread::yield_now();
                continue;
            }

            let len = match self.device().as_ref() {
                Some(d) => d.read_timeout(&mut buf, POLL_INTERVAL)?,
                None => return Err(Error::Closed),
            };

            if len > 0 {
                return Ok(Report {
                    id: buf[0],
                    data: buf[1..len].to_vec(),
                });
            }
        }
    }

    fn close(&self) -> Result<(), Error> {
        self.closed.store(true, Ordering::SeqCst);
        // dropping the handle closes it
        self.device().take();
        Ok(())
    }
}

impl From<hidapi::HidError> for Error {
    fn from(err: hidapi::HidError) -> Self {
        Error::Transmission(err.to_string())
    }
}
