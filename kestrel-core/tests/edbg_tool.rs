//! EDBG tool driven end to end over a scripted HID transport.

use kestrel_core::probe::edbg::{AvrEvent, ProtocolHandler, AVR_CMD, AVR_EVT, AVR_RSP};
use kestrel_core::probe::{HidTransport, MockHidTransport};
use kestrel_core::target::TargetBreakCause;
use kestrel_core::tools::{DebugTool, EdbgTool, EdbgToolKind};
use kestrel_core::TargetState;

/// Plays the tool's side of the conversation, one frame at a time.
struct Probe {
    transport: MockHidTransport,
    sequence_id: u16,
}

impl Probe {
    fn new() -> Self {
        Self {
            transport: MockHidTransport::new(64),
            sequence_id: 0,
        }
    }

    fn ack(&self) {
        self.transport.push_reply(&[AVR_CMD, 0x01]);
    }

    fn response(&mut self, handler: ProtocolHandler, payload: &[u8]) {
        let [lo, hi] = self.sequence_id.to_le_bytes();
        self.sequence_id += 1;

        let mut frame = vec![0x0E, lo, hi, handler as u8];
        frame.extend_from_slice(payload);
        let [size_hi, size_lo] = (frame.len() as u16).to_be_bytes();
        let mut report = vec![AVR_RSP, 0x11, size_hi, size_lo];
        report.extend_from_slice(&frame);
        self.transport.push_reply(&report);
    }

    fn exchange(&mut self, handler: ProtocolHandler, payload: &[u8]) {
        self.ack();
        self.response(handler, payload);
    }

    fn event(&self, event: &AvrEvent) {
        let mut report = vec![AVR_EVT];
        report.extend(event.to_response_data(ProtocolHandler::Avr8Generic));
        self.transport.push_reply(&report);
    }

    fn no_event(&self) {
        self.transport.push_reply(&[AVR_EVT, 0x00, 0x00]);
    }

    fn tool(&self) -> EdbgTool {
        let transport = self.transport.clone();
        EdbgTool::with_opener(EdbgToolKind::XplainedMini, move |_| {
            Ok(Box::new(transport.clone()) as Box<dyn HidTransport>)
        })
    }
}

#[test]
fn test_session_lifecycle_and_identity() {
    let mut probe = Probe::new();
    probe.exchange(ProtocolHandler::Housekeeping, &[0x80, 0x00]);
    probe.exchange(ProtocolHandler::Discovery, &[0x81, 0x00, b'A', b'T', b'M', b'L', b'0', b'1', 0x00]);
    probe.exchange(ProtocolHandler::Housekeeping, &[0x80, 0x00]);

    let mut tool = probe.tool();
    tool.init().expect("session should start");
    assert_eq!(tool.serial_number().expect("serial number query"), "ATML01");
    tool.close().expect("session should end");

    assert_eq!(probe.transport.pending_replies(), 0);
}

#[test]
fn test_break_event_during_pending_command_is_not_lost() {
    let mut probe = Probe::new();
    // 1. Session start and run.
    probe.exchange(ProtocolHandler::Housekeeping, &[0x80, 0x00]);
    probe.exchange(ProtocolHandler::Avr8Generic, &[0x80, 0x00]);

    // 2. A break event overtakes the acknowledgement of the PC read.
    probe.event(&AvrEvent::new(vec![0x40, 0x00, 0x01, 0x00, 0x00, 0x01]));
    probe.exchange(ProtocolHandler::Avr8Generic, &[0x83, 0x00, 0x00, 0x01, 0x00, 0x00]);

    // 3. State poll drains the queued event, then finds nothing new.
    probe.no_event();

    let mut tool = probe.tool();
    tool.init().expect("session should start");
    let avr8 = tool.avr8_interface().expect("AVR8 interface after init");

    avr8.run().expect("run");
    assert_eq!(avr8.program_counter().expect("pc read"), 0x200);
    assert_eq!(avr8.state().expect("state poll"), TargetState::Stopped);
    assert_eq!(avr8.break_cause(), TargetBreakCause::Breakpoint);
    assert_eq!(probe.transport.pending_replies(), 0);
}

#[test]
fn test_unplugged_tool_reports_device_failure() {
    let mut probe = Probe::new();
    probe.exchange(ProtocolHandler::Housekeeping, &[0x80, 0x00]);

    let mut tool = probe.tool();
    tool.init().expect("session should start");
    probe.transport.disconnect();

    let avr8 = tool.avr8_interface().expect("AVR8 interface after init");
    assert!(matches!(
        avr8.stop(),
        Err(kestrel_core::TargetError::Device(_))
    ));
}
