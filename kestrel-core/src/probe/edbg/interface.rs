//! EDBG transport: command frame fragmentation, response polling and event capture.

use super::{
    AvrCommandFrame, AvrEvent, AvrResponseFrame, ProtocolHandler, AVR_CMD, AVR_EVT, AVR_RSP,
};
use crate::error::DeviceFailure;
use crate::probe::cmsis_dap::{CmsisDapInterface, Command, Response};
use log::{debug, warn};
use std::collections::VecDeque;
use std::thread;
use std::time::Duration;

/// `AVR_CMD`/`AVR_RSP`/`AVR_EVT` header bytes preceding frame data in a report.
const FRAGMENT_HEADER_SIZE: usize = 4;

/// How many `AVR_RSP` polls to make before giving up on a response.
const MAX_RESPONSE_POLLS: usize = 200;

const RESPONSE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Upper bound on unsolicited reports skipped while waiting for one reply.
const MAX_UNSOLICITED_EVENTS: usize = 32;

/// Exchanges AVR frames with an EDBG tool.
///
/// Events that arrive while a reply is pending are queued and handed out by
/// [`EdbgInterface::poll_event`], never mistaken for the reply.
pub struct EdbgInterface {
    cmsis_dap: CmsisDapInterface,
    sequence_id: u16,
    pending_events: VecDeque<AvrEvent>,
}

impl EdbgInterface {
    pub const fn new(cmsis_dap: CmsisDapInterface) -> Self {
        Self {
            cmsis_dap,
            sequence_id: 0,
            pending_events: VecDeque::new(),
        }
    }

    pub fn cmsis_dap(&mut self) -> &mut CmsisDapInterface {
        &mut self.cmsis_dap
    }

    const fn next_sequence_id(&mut self) -> u16 {
        let id = self.sequence_id;
        self.sequence_id = self.sequence_id.wrapping_add(1);
        id
    }

    /// Send one command frame and wait for its response frame.
    pub fn send_frame(
        &mut self,
        handler: ProtocolHandler,
        payload: Vec<u8>,
    ) -> Result<AvrResponseFrame, DeviceFailure> {
        let frame = AvrCommandFrame::new(handler, self.next_sequence_id(), payload);
        let max_fragment = self.cmsis_dap.report_size().saturating_sub(FRAGMENT_HEADER_SIZE);

        for fragment in frame.to_fragments(max_fragment)? {
            let response = self.exchange(&Command::new(AVR_CMD, fragment))?;
            if response.data().first() != Some(&0x01) {
                return Err(DeviceFailure::MalformedResponse(format!(
                    "{} command fragment rejected",
                    handler.name()
                )));
            }
        }

        let bytes = self.read_response_fragments()?;
        let response = AvrResponseFrame::from_bytes(&bytes)?;
        if response.sequence_id != frame.sequence_id {
            return Err(DeviceFailure::SequenceMismatch {
                expected: frame.sequence_id,
                actual: response.sequence_id,
            });
        }

        Ok(response)
    }

    /// Next asynchronous event, either already captured or freshly polled.
    pub fn poll_event(&mut self) -> Result<Option<AvrEvent>, DeviceFailure> {
        if let Some(event) = self.pending_events.pop_front() {
            return Ok(Some(event));
        }

        let response = self.exchange(&Command::new(AVR_EVT, Vec::new()))?;
        let event = AvrEvent::from_response_data(response.data())?;
        Ok((!event.is_empty()).then_some(event))
    }

    pub fn pending_event_count(&self) -> usize {
        self.pending_events.len()
    }

    fn read_response_fragments(&mut self) -> Result<Vec<u8>, DeviceFailure> {
        let mut bytes = Vec::new();

        for _ in 0..MAX_RESPONSE_POLLS {
            let response = self.exchange(&Command::new(AVR_RSP, Vec::new()))?;
            let data = response.data();
            let info = data.first().copied().unwrap_or(0);
            if info == 0 {
                thread::sleep(RESPONSE_POLL_INTERVAL);
                continue;
            }

            if data.len() < 3 {
                return Err(DeviceFailure::MalformedResponse("truncated AVR_RSP fragment".to_string()));
            }
            let size = usize::from(u16::from_be_bytes([data[1], data[2]]));
            let fragment = data.get(3..3 + size).ok_or_else(|| {
                DeviceFailure::MalformedResponse(format!("AVR_RSP fragment shorter than {size} bytes"))
            })?;
            bytes.extend_from_slice(fragment);

            let (number, total) = (info >> 4, info & 0x0F);
            if number >= total {
                return Ok(bytes);
            }
        }

        Err(DeviceFailure::Timeout)
    }

    /// Send a command and return the reply with the same identifier.
    fn exchange(&mut self, command: &Command) -> Result<Response, DeviceFailure> {
        self.cmsis_dap.send_command(command)?;

        for _ in 0..=MAX_UNSOLICITED_EVENTS {
            let response = self.cmsis_dap.get_response()?;
            if response.id() == command.id() {
                return Ok(response);
            }

            if response.id() == AVR_EVT {
                let event = AvrEvent::from_response_data(response.data())?;
                if !event.is_empty() {
                    debug!("Captured AVR event {:?} while awaiting reply", event.kind());
                    self.pending_events.push_back(event);
                }
                continue;
            }

            warn!(
                "Unexpected CMSIS-DAP response 0x{:02x} to command 0x{:02x}",
                response.id(),
                command.id()
            );
            return Err(DeviceFailure::MalformedResponse(format!(
                "unexpected response id 0x{:02x}",
                response.id()
            )));
        }

        Err(DeviceFailure::MalformedResponse(
            "too many unsolicited events".to_string(),
        ))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::edbg::AvrEventKind;
    use crate::probe::transport::MockHidTransport;

    fn interface(transport: &MockHidTransport) -> EdbgInterface {
        EdbgInterface::new(CmsisDapInterface::new(Box::new(transport.clone())))
    }

    fn response_report(sequence_id: u16, handler: u8, payload: &[u8]) -> Vec<u8> {
        let [lo, hi] = sequence_id.to_le_bytes();
        let mut frame = vec![0x0E, lo, hi, handler];
        frame.extend_from_slice(payload);
        let [size_hi, size_lo] = (frame.len() as u16).to_be_bytes();
        let mut report = vec![AVR_RSP, 0x11, size_hi, size_lo];
        report.extend_from_slice(&frame);
        report
    }

    #[test]
    fn test_send_frame_round_trip() {
        let transport = MockHidTransport::new(64);
        transport.push_reply(&[AVR_CMD, 0x01]);
        transport.push_reply(&[AVR_RSP, 0x00]);
        transport.push_reply(&response_report(0, 0x01, &[0x80, 0x00]));

        let mut edbg = interface(&transport);
        let response = edbg.send_frame(ProtocolHandler::Housekeeping, vec![0x10, 0x00]).unwrap();

        assert_eq!(response.response_id(), 0x80);
        assert_eq!(response.payload, vec![0x80, 0x00]);
        assert_eq!(
            transport.written()[0],
            vec![AVR_CMD, 0x11, 0x00, 0x07, 0x0E, 0x00, 0x00, 0x00, 0x01, 0x10, 0x00]
        );
    }

    #[test]
    fn test_sequence_mismatch_detected() {
        let transport = MockHidTransport::new(64);
        transport.push_reply(&[AVR_CMD, 0x01]);
        transport.push_reply(&response_report(7, 0x01, &[0x80]));

        let result = interface(&transport).send_frame(ProtocolHandler::Housekeeping, vec![0x10, 0x00]);
        assert!(matches!(
            result,
            Err(DeviceFailure::SequenceMismatch { expected: 0, actual: 7 })
        ));
    }

    #[test]
    fn test_unsolicited_event_is_queued_not_returned() {
        let transport = MockHidTransport::new(64);
        let break_event = AvrEvent::new(vec![0x40, 0x20, 0x00, 0x00, 0x00, 0x01]);
        let mut event_report = vec![AVR_EVT];
        event_report.extend(break_event.to_response_data(ProtocolHandler::Avr8Generic));

        transport.push_reply(&event_report);
        transport.push_reply(&[AVR_CMD, 0x01]);
        transport.push_reply(&response_report(0, 0x12, &[0x80, 0x00]));

        let mut edbg = interface(&transport);
        let response = edbg.send_frame(ProtocolHandler::Avr8Generic, vec![0x32, 0x00]).unwrap();

        assert_eq!(response.response_id(), 0x80);
        assert_eq!(edbg.pending_event_count(), 1);

        let event = edbg.poll_event().unwrap().unwrap();
        assert_eq!(event.kind(), Some(AvrEventKind::Break));
        assert_eq!(event, break_event);
        assert_eq!(transport.pending_replies(), 0);
    }

    #[test]
    fn test_poll_event_without_event() {
        let transport = MockHidTransport::new(64);
        transport.push_reply(&[AVR_EVT, 0x00, 0x00]);

        assert_eq!(interface(&transport).poll_event().unwrap(), None);
    }
}
