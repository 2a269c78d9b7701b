use crate::command::ReportId;
use crate::{Error, Report, ReportChannel};
use std::sync::mpsc::{sync_channel, RecvTimeoutError, SyncSender};
use std::sync::{Mutex, MutexGuard, PoisonError};
use std::time::Duration;

struct State {
    listening: bool,
    //set once a call gave up waiting, its response may still be on the way
    desynced: bool,
    //rendezvous slot of the call currently waiting, if any
    pending: Option<SyncSender<Report>>,
}

///Turns the stream of input reports into blocking request/response calls.
///
///The protocol carries no correlation id, so at most one call is ever in flight and the next
///protocol report received belongs to it.
pub(crate) struct Correlator<C> {
    channel: C,
    call: Mutex<()>,
    state: Mutex<State>,
}

//state is only ever replaced whole, a panicking holder cannot leave it half updated
fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl<C: ReportChannel> Correlator<C> {
    pub fn new(channel: C) -> Self {
        Correlator {
            channel,
            call: Mutex::new(()),
            state: Mutex::new(State {
                listening: false,
                desynced: false,
                pending: None,
            }),
        }
    }

    pub fn channel(&self) -> &C {
        &self.channel
    }

    pub fn is_listening(&self) -> bool {
        lock(&self.state).listening
    }

    ///Sends one output report and blocks until the listener hands over the next protocol report.
    ///
    ///Once a call has timed out, every later call fails with `Error::Desynchronized`.
    pub fn call(&self, id: u8, data: &[u8], deadline: Option<Duration>) -> Result<Report, Error> {
        let _call = lock(&self.call);

        let (tx, rx) = sync_channel(1);
        {
            let mut state = lock(&self.state);
            if !state.listening {
                return Err(Error::NotListening);
            }
            if state.desynced {
                return Err(Error::Desynchronized);
            }
            state.pending = Some(tx);
        }

        log::debug!("request: report {} {:02x?}", id, data);

        if let Err(e) = self.channel.send_output_report(id, data) {
            lock(&self.state).pending = None;
            return Err(e);
        }

        let result = match deadline {
            Some(deadline) => rx.recv_timeout(deadline).map_err(|e| match e {
                RecvTimeoutError::Timeout => Error::Timeout,
                RecvTimeoutError::Disconnected => Error::ListenerStopped,
            }),
            None => rx.recv().map_err(|_| Error::ListenerStopped),
        };

        {
            let mut state = lock(&self.state);
            state.pending = None;
            if let Err(Error::Timeout) = result {
                state.desynced = true;
            }
        }

        if let Ok(report) = &result {
            log::debug!("response: report {} {:02x?}", report.id, report.data);
        }

        result
    }

    ///Marks the correlator as listening. Must happen before the listen loop is spawned, so calls
    ///issued right after spawning are not rejected.
    pub fn start_listening(&self) {
        lock(&self.state).listening = true;
    }

    ///Delivers input reports to waiting calls until the channel closes. A protocol report with no
    ///call waiting for it means host and device are out of step, and ends the loop with an error.
    pub fn listen(&self) -> Result<(), Error> {
        let result = self.deliver();

        // wake whoever is still waiting, they will see the slot hang up
        let mut state = lock(&self.state);
        state.listening = false;
        state.pending = None;

        match &result {
            Ok(()) => log::debug!("listener stopped"),
            Err(e) => log::debug!("listener stopped: {}", e),
        }

        result
    }

    fn deliver(&self) -> Result<(), Error> {
        loop {
            let report = match self.channel.receive_input_report() {
                Ok(report) => report,
                Err(Error::Closed) => return Ok(()),
                Err(e) => return Err(e),
            };

            if !ReportId::is_protocol(report.id) {
                log::trace!("ignoring input report {}", report.id);
                continue;
            }

            let pending = lock(&self.state).pending.take();
            match pending {
                Some(tx) => {
                    if tx.try_send(report).is_err() {
                        log::warn!("discarding response, caller stopped waiting");
                    }
                }
                None => {
                    return Err(Error::UnsolicitedResponse {
                        id: report.id,
                        data: report.data,
                    })
                }
            }
        }
    }
}
