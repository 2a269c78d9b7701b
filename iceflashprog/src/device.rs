use crate::command::{self, Generation, Operation};
use crate::correlator::Correlator;
use crate::{Error, ReportChannel};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

pub const VENDOR_ID: u16 = 0x16c0;
pub const PRODUCT_ID: u16 = 0x05df;
pub const PRODUCT_NAME: &str = "iceflashprog";

///Per device settings.
#[derive(Debug, Copy, Clone, PartialEq)]
pub struct DeviceConfig {
    ///Firmware protocol generation. Operations it lacks are rejected before anything is sent.
    pub generation: Generation,
    ///How long a call waits for its response. `None` waits forever.
    pub timeout: Option<Duration>,
}

impl Default for DeviceConfig {
    fn default() -> Self {
        DeviceConfig {
            generation: Generation::Current,
            timeout: Some(Duration::from_secs(5)),
        }
    }
}

///An open programmer.
///
///The power state of the flash chip is not tracked here. The device answers any flash operation
///issued before `power_up` with `Error::Unpowered`.
pub struct Device<C: ReportChannel + 'static> {
    correlator: Arc<Correlator<C>>,
    config: DeviceConfig,
    listener: Option<JoinHandle<Result<(), Error>>>,
    listener_stopped: bool,
    closed: bool,
}

impl<C: ReportChannel + 'static> Device<C> {
    ///Wraps an already open channel. Nothing can be called until `listen` is running.
    pub fn new(channel: C, config: DeviceConfig) -> Self {
        Device {
            correlator: Arc::new(Correlator::new(channel)),
            config,
            listener: None,
            listener_stopped: false,
            closed: false,
        }
    }

    pub fn config(&self) -> &DeviceConfig {
        &self.config
    }

    pub fn channel(&self) -> &C {
        self.correlator.channel()
    }

    pub fn is_listening(&self) -> bool {
        self.correlator.is_listening()
    }

    ///Starts delivering input reports to calls on a thread of its own, for as long as the channel
    ///stays open.
    ///
    ///A listener that already stopped is not restarted. The first call after it stopped returns the
    ///error it stopped with, later ones `Error::ListenerStopped`.
    pub fn listen(&mut self) -> Result<(), Error> {
        if self.closed {
            return Err(Error::Closed);
        }
        if self.listener_stopped {
            return Err(Error::ListenerStopped);
        }
        if let Some(listener) = self.listener.take() {
            if self.correlator.is_listening() {
                self.listener = Some(listener);
                return Ok(());
            }
            self.listener_stopped = true;
            return match listener.join() {
                Ok(Err(e)) => Err(e),
                _ => Err(Error::ListenerStopped),
            };
        }

        self.correlator.start_listening();

        let correlator = self.correlator.clone();
        self.listener = Some(thread::spawn(move || {
            let result = correlator.listen();
            if let Err(e) = &result {
                log::error!("listener failed: {}", e);
            }
            result
        }));

        Ok(())
    }

    ///Powers the flash chip down, then closes the channel and waits for the listener. Returns the
    ///first error met on the way, but always gets as far as closing.
    pub fn close(mut self) -> Result<(), Error> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<(), Error> {
        if self.closed {
            return Ok(());
        }
        self.closed = true;

        let powered_down = if self.correlator.is_listening() {
            self.power_down()
        } else {
            log::warn!("no listener running, cannot power down flash chip");
            Ok(())
        };

        let closed = self.correlator.channel().close();

        let listened = match self.listener.take() {
            Some(listener) => listener
                .join()
                .unwrap_or_else(|_| Err(Error::ListenerStopped)),
            None => Ok(()),
        };

        powered_down.and(closed).and(listened)
    }

    ///Encodes `op`, performs the call and decodes the response.
    pub(crate) fn op_call(&self, op: Operation, payload: &[u8]) -> Result<Vec<u8>, Error> {
        let (report, request) = command::encode_request(self.config.generation, op, payload)?;

        log::debug!("{:?}", op);

        let response = self
            .correlator
            .call(report as u8, &request, self.config.timeout)?;

        command::decode_response(op, response.id, &response.data)
    }
}

impl<C: ReportChannel + 'static> Drop for Device<C> {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            log::warn!("failed to close device: {}", e);
        }
    }
}

///Picks the one device to open among the enumerated candidates. Without a serial number there
///must be exactly one candidate.
pub fn select_candidate<T, F>(
    candidates: Vec<T>,
    serial_number: Option<&str>,
    serial_of: F,
) -> Result<T, Error>
where
    F: Fn(&T) -> Option<&str>,
{
    match serial_number {
        Some(serial) => candidates
            .into_iter()
            .find(|c| serial_of(c) == Some(serial))
            .ok_or_else(|| Error::NoDeviceFound {
                serial: Some(serial.into()),
            }),
        None => {
            if candidates.len() > 1 {
                let serials = candidates
                    .iter()
                    .map(|c| serial_of(c).unwrap_or_default().to_string())
                    .collect();
                return Err(Error::MoreThanOneDeviceFound { serials });
            }
            candidates
                .into_iter()
                .next()
                .ok_or(Error::NoDeviceFound { serial: None })
        }
    }
}

#[cfg(feature = "hidapi")]
impl Device<crate::HidReportChannel> {
    ///Finds the programmer among the HID devices plugged in and opens it.
    pub fn open(
        api: &hidapi::HidApi,
        serial_number: Option<&str>,
        config: DeviceConfig,
    ) -> Result<Self, Error> {
        let candidates: Vec<&hidapi::DeviceInfo> = api
            .device_list()
            .filter(|d| {
                d.vendor_id() == VENDOR_ID
                    && d.product_id() == PRODUCT_ID
                    && d.product_string() == Some(PRODUCT_NAME)
            })
            .collect();

        let info = select_candidate(candidates, serial_number, |d| d.serial_number())?;

        log::debug!(
            "opening {:04x}:{:04x} serial {:?}",
            info.vendor_id(),
            info.product_id(),
            info.serial_number()
        );

        let device = info.open_device(api)?;

        Ok(Device::new(crate::HidReportChannel::new(device), config))
    }
}


#[cfg(test)]
mod tests {
    use super::testing::emulated;
    use super::*;
    use crate::mock::{FlashEmulator, MockChannel};
    use crate::Report;

    struct Candidate {
        serial: Option<&'static str>,
        name: &'static str,
    }

    fn candidates() -> Vec<Candidate> {
        vec![
            Candidate {
                serial: Some("A1"),
                name: "first",
            },
            Candidate {
                serial: Some("B2"),
                name: "second",
            },
        ]
    }

    #[test]
    fn select_by_serial() {
        let c = select_candidate(candidates(), Some("B2"), |c| c.serial).unwrap();
        assert_eq!(c.name, "second");

        match select_candidate(candidates(), Some("C3"), |c| c.serial) {
            Err(Error::NoDeviceFound { serial }) => assert_eq!(serial.as_deref(), Some("C3")),
            _ => panic!("expected no device found"),
        }
    }

    #[test]
    fn select_single_without_serial() {
        let mut list = candidates();
        list.truncate(1);

        let c = select_candidate(list, None, |c| c.serial).unwrap();
        assert_eq!(c.name, "first");
    }

    #[test]
    fn select_ambiguous_or_empty() {
        match select_candidate(candidates(), None, |c| c.serial) {
            Err(Error::MoreThanOneDeviceFound { serials }) => {
                assert_eq!(serials, vec!["A1".to_string(), "B2".to_string()])
            }
            _ => panic!("expected more than one device found"),
        }

        assert!(matches!(
            select_candidate(Vec::<Candidate>::new(), None, |c| c.serial),
            Err(Error::NoDeviceFound { serial: None })
        ));
    }

    #[test]
    fn end_to_end() {
        let mut emulator = FlashEmulator::new(0xef, 0x4014);
        for (i, b) in emulator.memory[..0x100].iter_mut().enumerate() {
            *b = i as u8;
        }
        let expected = emulator.memory[..0x100].to_vec();

        let (device, emulator) = emulated(emulator, DeviceConfig::default());

        device.power_up().unwrap();

        let id = device.jedec_id().unwrap();
        assert_eq!(id.manufacturer, 0xef);
        assert_eq!(id.device_id, 0x4014);
        assert_eq!(
            device.channel().received().last().unwrap().data,
            vec![0x00, 0xef, 0x40, 0x14]
        );

        let page = device.read_flash_page(0x00_0000).unwrap();
        assert_eq!(page.len(), 256);
        assert_eq!(page, expected);

        // the device answers power down with "unpowered"
        device.power_down().unwrap();
        assert_eq!(device.channel().received().last().unwrap().data[0], 1);
        assert!(!emulator.lock().unwrap().is_powered());

        device.close().unwrap();
    }

    #[test]
    fn flash_operations_need_power() {
        let (device, _) = emulated(FlashEmulator::default(), DeviceConfig::default());

        assert!(matches!(device.jedec_id(), Err(Error::Unpowered)));
        assert!(matches!(device.read_flash_page(0), Err(Error::Unpowered)));
        assert!(matches!(
            device.write_flash_page(0, &[0; 4]),
            Err(Error::Unpowered)
        ));
        assert!(matches!(device.erase_sector(0), Err(Error::Unpowered)));

        device.power_up().unwrap();
        assert!(device.jedec_id().is_ok());
    }

    #[test]
    fn close_powers_down() {
        let (device, emulator) = emulated(FlashEmulator::default(), DeviceConfig::default());

        device.power_up().unwrap();
        assert!(emulator.lock().unwrap().is_powered());

        device.close().unwrap();
        assert!(!emulator.lock().unwrap().is_powered());
    }

    #[test]
    fn drop_powers_down() {
        let (device, emulator) = emulated(FlashEmulator::default(), DeviceConfig::default());

        device.power_up().unwrap();
        drop(device);

        assert!(!emulator.lock().unwrap().is_powered());
    }

    #[test]
    fn power_down_failure_is_generic() {
        let channel = MockChannel::new(|_: &Report| {
            vec![Report {
                id: 2,
                data: vec![6, 0, 0, 0],
            }]
        });
        let mut device = Device::new(channel, DeviceConfig::default());
        device.listen().unwrap();

        match device.power_down() {
            Err(Error::PowerDownFailed(e)) => assert!(matches!(*e, Error::Locked)),
            other => panic!("expected power down failure, got {:?}", other),
        }

        assert!(matches!(device.close(), Err(Error::PowerDownFailed(_))));
    }

    #[test]
    fn close_without_listener() {
        let channel = MockChannel::new(|report: &Report| vec![report.clone()]);
        let device = Device::new(channel, DeviceConfig::default());

        assert!(matches!(device.power_up(), Err(Error::NotListening)));
        assert!(device.close().is_ok());
    }

    #[test]
    fn unsolicited_response_fails_later_calls() {
        let (device, _) = emulated(FlashEmulator::default(), DeviceConfig::default());
        device.power_up().unwrap();

        device.channel().inject(Report {
            id: 2,
            data: vec![0, 0, 0, 0],
        });
        while device.is_listening() {
            std::thread::yield_now();
        }

        assert!(matches!(device.jedec_id(), Err(Error::NotListening)));
        assert!(matches!(
            device.close(),
            Err(Error::UnsolicitedResponse { id: 2, .. })
        ));
    }

    #[cfg(feature = "hidapi")]
    #[test]
    fn open_over_hidapi() {
        type Open = fn(
            &hidapi::HidApi,
            Option<&str>,
            DeviceConfig,
        ) -> Result<Device<crate::HidReportChannel>, Error>;
        let _: Open = Device::open;
    }

    #[test]
    fn stopped_listener_is_not_reported_as_running() {
        let (mut device, _) = emulated(FlashEmulator::default(), DeviceConfig::default());
        device.listen().unwrap();

        device.channel().inject(Report {
            id: 2,
            data: vec![0, 0, 0, 0],
        });
        while device.is_listening() {
            std::thread::yield_now();
        }

        assert!(matches!(
            device.listen(),
            Err(Error::UnsolicitedResponse { id: 2, .. })
        ));
        assert!(matches!(device.listen(), Err(Error::ListenerStopped)));
        assert!(!device.is_listening());
        assert!(device.close().is_ok());
    }
}
