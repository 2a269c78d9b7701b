use crate::command::{
    decode_address, Generation, ReportId, Status, DATA_REPORT_SIZE, FLASH_FILL,
    FLASH_PAGE_REQUEST_SIZE,
};
use crate::{Error, FlashGeometry, Report, ReportChannel};
use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

#[derive(Default)]
struct Queue {
    reports: VecDeque<Report>,
    closed: bool,
    outstanding: usize,
    max_outstanding: usize,
    sent: Vec<Report>,
    received: Vec<Report>,
}

///Report channel backed by a closure standing in for the device: every output report is
///answered with whatever input reports the responder returns.
pub struct MockChannel {
    responder: Box<dyn Fn(&Report) -> Vec<Report> + Send + Sync>,
    queue: Mutex<Queue>,
    ready: Condvar,
    fail_sends: AtomicBool,
}

impl MockChannel {
    pub fn new<R>(responder: R) -> Self
    where
        R: Fn(&Report) -> Vec<Report> + Send + Sync + 'static,
    {
        MockChannel {
            responder: Box::new(responder),
            queue: Mutex::new(Queue::default()),
            ready: Condvar::new(),
            fail_sends: AtomicBool::new(false),
        }
    }

    ///Channel answered by an emulated programmer. The emulator handle stays usable for inspecting
    ///or rigging device state.
    pub fn emulated(emulator: FlashEmulator) -> (Self, Arc<Mutex<FlashEmulator>>) {
        let emulator = Arc::new(Mutex::new(emulator));
        let e = emulator.clone();
        let channel = MockChannel::new(move |report: &Report| lock(&e).respond(report));
        (channel, emulator)
    }

    ///Queues an input report nobody asked for.
    pub fn inject(&self, report: Report) {
        lock(&self.queue).reports.push_back(report);
        self.ready.notify_all();
    }

    pub fn fail_sends(&self, fail: bool) {
        self.fail_sends.store(fail, Ordering::SeqCst);
    }

    ///Every output report sent so far.
    pub fn sent(&self) -> Vec<Report> {
        lock(&self.queue).sent.clone()
    }

    ///Every protocol input report handed to the receiver so far.
    pub fn received(&self) -> Vec<Report> {
        lock(&self.queue).received.clone()
    }

    ///Largest number of requests that were sent but not yet answered at the same time.
    pub fn max_outstanding(&self) -> usize {
        lock(&self.queue).max_outstanding
    }
}

impl ReportChannel for MockChannel {
    fn send_output_report(&self, id: u8, data: &[u8]) -> Result<(), Error> {
        if self.fail_sends.load(Ordering::SeqCst) {
            return Err(Error::Transmission("mock send failure".into()));
        }

        let report = Report {
            id,
            data: data.to_vec(),
        };
        let responses = (self.responder)(&report);

        let mut queue = lock(&self.queue);
        if queue.closed {
            return Err(Error::Closed);
        }
        queue.sent.push(report);
        queue.outstanding += 1;
        queue.max_outstanding = queue.max_outstanding.max(queue.outstanding);
        queue.reports.extend(responses);
        drop(queue);

        self.ready.notify_all();
        Ok(())
    }

    fn receive_input_report(&self) -> Result<Report, Error> {
        let mut queue = lock(&self.queue);
        loop {
            if queue.closed {
                return Err(Error::Closed);
            }
            if let Some(report) = queue.reports.pop_front() {
                if ReportId::is_protocol(report.id) {
                    queue.outstanding = queue.outstanding.saturating_sub(1);
                    queue.received.push(report.clone());
                }
                return Ok(report);
            }
            queue = self
                .ready
                .wait(queue)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    fn close(&self) -> Result<(), Error> {
        lock(&self.queue).closed = true;
        self.ready.notify_all();
        Ok(())
    }
}

///Device side of the protocol: power state, flash contents and status codes, answering requests
///the way the programmer firmware does.
pub struct FlashEmulator {
    generation: Generation,
    geometry: FlashGeometry,
    manufacturer: u8,
    device_id: u16,
    powered: bool,
    ///Flash operations fail with `Status::Locked`, as when the chip is busy.
    pub locked: bool,
    ///Page writes fail to verify.
    pub fail_verify: bool,
    pub memory: Vec<u8>,
}

impl FlashEmulator {
    pub fn new(manufacturer: u8, device_id: u16) -> Self {
        let geometry = FlashGeometry::DEFAULT;
        FlashEmulator {
            generation: Generation::Current,
            geometry,
            manufacturer,
            device_id,
            powered: false,
            locked: false,
            fail_verify: false,
            memory: vec![FLASH_FILL; geometry.total_size as usize],
        }
    }

    pub fn legacy(mut self) -> Self {
        self.generation = Generation::Legacy;
        self
    }

    pub fn is_powered(&self) -> bool {
        self.powered
    }

    fn data(&self, status: Status, payload: [u8; 3]) -> Vec<Report> {
        // an unpowered chip overrides whatever the command reported
        let status = if self.powered {
            status
        } else {
            Status::Unpowered
        };

        vec![Report {
            id: ReportId::Data as u8,
            data: vec![status as u8, payload[0], payload[1], payload[2]],
        }]
    }

    fn range(&self, address: u32, size: u32) -> std::ops::Range<usize> {
        let start = (address % self.geometry.total_size) / size * size;
        start as usize..(start + size) as usize
    }

    pub fn respond(&mut self, request: &Report) -> Vec<Report> {
        match request.id {
            1 => self.write(&request.data),
            2 => self.command(&request.data),
            _ => vec![],
        }
    }

    fn write(&mut self, data: &[u8]) -> Vec<Report> {
        if data.len() != FLASH_PAGE_REQUEST_SIZE {
            return self.data(Status::InvalidRequest, [0; 3]);
        }
        if !self.powered || self.locked {
            return self.data(Status::Locked, [0; 3]);
        }

        let address = decode_address([data[0], data[1], data[2]]);
        let range = self.range(address, self.geometry.page_size);
        let page = &data[3..];

        // programming only clears bits
        for (cell, value) in self.memory[range.clone()].iter_mut().zip(page) {
            *cell &= *value;
        }

        let verified = !self.fail_verify && &self.memory[range] == page;
        if verified {
            self.data(Status::Ok, [0; 3])
        } else {
            self.data(Status::InvalidFlashPageWrite, [0; 3])
        }
    }

    fn command(&mut self, data: &[u8]) -> Vec<Report> {
        if data.len() != DATA_REPORT_SIZE {
            return self.data(Status::InvalidRequest, [0; 3]);
        }

        let address = decode_address([data[1], data[2], data[3]]);
        let erase = |emulator: &mut FlashEmulator, size: u32| {
            if emulator.locked || !emulator.powered {
                return emulator.data(Status::Locked, [0; 3]);
            }
            let range = emulator.range(address, size);
            for cell in &mut emulator.memory[range] {
                *cell = FLASH_FILL;
            }
            emulator.data(Status::Ok, [0; 3])
        };

        match data[0] {
            1 => {
                self.powered = true;
                self.data(Status::Ok, [0; 3])
            }
            2 => {
                self.powered = false;
                self.data(Status::Ok, [0; 3])
            }
            3 => {
                if self.locked {
                    return self.data(Status::Locked, [0; 3]);
                }
                let id = self.device_id.to_be_bytes();
                self.data(Status::Ok, [self.manufacturer, id[0], id[1]])
            }
            4 => {
                if self.locked || !self.powered {
                    return self.data(Status::InvalidFlashPageRead, [0; 3]);
                }
                let range = self.range(address, self.geometry.page_size);
                vec![Report {
                    id: ReportId::FlashPage as u8,
                    data: self.memory[range].to_vec(),
                }]
            }
            5 => {
                let size = self.geometry.sector_size;
                erase(self, size)
            }
            6 if self.generation == Generation::Current => {
                let size = self.geometry.block_size;
                erase(self, size)
            }
            7 if self.generation == Generation::Current => {
                let size = self.geometry.total_size;
                erase(self, size)
            }
            _ => self.data(Status::InvalidCommandId, [0; 3]),
        }
    }
}

impl Default for FlashEmulator {
    fn default() -> Self {
        FlashEmulator::new(0xef, 0x4015)
    }
}
