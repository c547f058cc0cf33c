//! Raw USB HID transport.

use crate::error::DeviceFailure;
use std::collections::VecDeque;
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

/// Report-oriented byte transport to a HID device.
pub trait HidTransport: Send {
    /// Write one output report. `report` holds the report body without a report id.
    fn write(&mut self, report: &[u8]) -> Result<(), DeviceFailure>;

    /// Read one input report. An empty buffer means nothing arrived within `timeout`.
    fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, DeviceFailure>;

    /// Size of one input/output report in bytes.
    fn report_size(&self) -> usize;
}

#[cfg(feature = "hardware")]
pub use hid::HidApiTransport;

#[cfg(feature = "hardware")]
mod hid {
    use super::HidTransport;
    use crate::error::DeviceFailure;
    use hidapi::{HidApi, HidDevice};
    use log::debug;
    use std::time::Duration;

    /// HID transport backed by `hidapi`.
    pub struct HidApiTransport {
        device: HidDevice,
        report_size: usize,
    }

    impl HidApiTransport {
        /// Open the first HID interface 0 matching the USB ids, optionally by serial number.
        pub fn open(
            vendor_id: u16,
            product_id: u16,
            serial_number: Option<&str>,
            report_size: usize,
        ) -> Result<Self, DeviceFailure> {
            let api = HidApi::new().map_err(|e| DeviceFailure::Transport(e.to_string()))?;

            let info = api
                .device_list()
                .filter(|info| info.vendor_id() == vendor_id && info.product_id() == product_id)
                .filter(|info| info.interface_number() <= 0)
                .find(|info| serial_number.map_or(true, |serial| info.serial_number() == Some(serial)))
                .ok_or(DeviceFailure::NotFound {
                    vendor_id,
                    product_id,
                })?;

            debug!("Opening HID device at {:?}", info.path());
            let device = info
                .open_device(&api)
                .map_err(|e| DeviceFailure::Transport(e.to_string()))?;

            Ok(Self { device, report_size })
        }
    }

    impl HidTransport for HidApiTransport {
        fn write(&mut self, report: &[u8]) -> Result<(), DeviceFailure> {
            if report.len() > self.report_size {
                return Err(DeviceFailure::Transport(format!(
                    "report of {} bytes exceeds report size {}",
                    report.len(),
                    self.report_size
                )));
            }

            // Leading zero is the (unused) report id.
            let mut buffer = vec![0u8; self.report_size + 1];
            buffer[1..=report.len()].copy_from_slice(report);
            self.device
                .write(&buffer)
                .map_err(|e| DeviceFailure::Transport(e.to_string()))?;
            Ok(())
        }

        fn read(&mut self, timeout: Duration) -> Result<Vec<u8>, DeviceFailure> {
            let mut buffer = vec![0u8; self.report_size];
            let millis = i32::try_from(timeout.as_millis()).unwrap_or(i32::MAX);
            let read = self
                .device
                .read_timeout(&mut buffer, millis)
                .map_err(|e| DeviceFailure::Transport(e.to_string()))?;
            buffer.truncate(read);
            Ok(buffer)
        }

        fn report_size(&self) -> usize {
            self.report_size
        }
    }
}

#[derive(Debug, Default)]
struct MockState {
    written: Vec<Vec<u8>>,
    replies: VecDeque<Vec<u8>>,
    disconnected: bool,
}

/// Scripted transport for tests and benchmarks.
///
/// Replies are queued up front and returned in order by `read`; every written
/// report is recorded. Clones share state.
#[derive(Debug, Clone, Default)]
pub struct MockHidTransport {
    state: Arc<Mutex<MockState>>,
    report_size: usize,
}

impl MockHidTransport {
    pub fn new(report_size: usize) -> Self {
        Self {
            state: Arc::default(),
            report_size,
        }
    }

    /// Queue an input report, padded to the report size.
    pub fn push_reply(&self, reply: &[u8]) {
        let mut report = reply.to_vec();
        if report.len() < self.report_size {
            report.resize(self.report_size, 0);
        }
        self.lock().replies.push_back(report);
    }

    /// Reports written so far.
    pub fn written(&self) -> Vec<Vec<u8>> {
        self.lock().written.clone()
    }

    pub fn pending_replies(&self) -> usize {
        self.lock().replies.len()
    }

    /// Make every subsequent operation fail as if the device was unplugged.
    pub fn disconnect(&self) {
        self.lock().disconnected = true;
    }

    fn lock(&self) -> std::sync::MutexGuard<'_, MockState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

impl HidTransport for MockHidTransport {
    fn write(&mut self, report: &[u8]) -> Result<(), DeviceFailure> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(DeviceFailure::Transport("device disconnected".to_string()));
        }
        state.written.push(report.to_vec());
        Ok(())
    }

    fn read(&mut self, _timeout: Duration) -> Result<Vec<u8>, DeviceFailure> {
        let mut state = self.lock();
        if state.disconnected {
            return Err(DeviceFailure::Transport("device disconnected".to_string()));
        }
        Ok(state.replies.pop_front().unwrap_or_default())
    }

    fn report_size(&self) -> usize {
        self.report_size
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_mock_transport_replays_in_order() {
        let mut transport = MockHidTransport::new(8);
        transport.push_reply(&[0x80, 0x01]);
        transport.push_reply(&[0x81]);

        transport.write(&[0x80, 0x11]).unwrap();
        assert_eq!(transport.read(Duration::ZERO).unwrap()[..2], [0x80, 0x01]);
        assert_eq!(transport.read(Duration::ZERO).unwrap().len(), 8);
        assert!(transport.read(Duration::ZERO).unwrap().is_empty());
        assert_eq!(transport.written(), vec![vec![0x80, 0x11]]);
    }

    #[test]
    fn test_mock_transport_disconnect() {
        let mut transport = MockHidTransport::new(8);
        transport.disconnect();

        assert!(matches!(
            transport.write(&[0x00]),
            Err(DeviceFailure::Transport(_))
        ));
    }
}
