//! EDBG based debug tools (Atmel-ICE, Power Debugger, MPLAB Snap, PICkit 4, ...).

use super::{Avr8DebugInterface, DebugTool};
use crate::error::DeviceFailure;
use crate::probe::cmsis_dap::CmsisDapInterface;
use crate::probe::edbg::{discovery, housekeeping, EdbgAvr8Interface, EdbgInterface};
use crate::probe::transport::HidTransport;
use crate::target::PhysicalInterface;
use log::info;
use std::time::Duration;

/// Microchip (formerly Atmel) USB vendor id.
pub const MICROCHIP_VENDOR_ID: u16 = 0x03EB;

/// Supported EDBG tools.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum EdbgToolKind {
    AtmelIce,
    PowerDebugger,
    MplabSnap,
    MplabPickit4,
    XplainedPro,
    XplainedMini,
    XplainedNano,
    CuriosityNano,
    JtagIce3,
}

impl EdbgToolKind {
    pub const ALL: [Self; 9] = [
        Self::AtmelIce,
        Self::PowerDebugger,
        Self::MplabSnap,
        Self::MplabPickit4,
        Self::XplainedPro,
        Self::XplainedMini,
        Self::XplainedNano,
        Self::CuriosityNano,
        Self::JtagIce3,
    ];

    pub const fn name(self) -> &'static str {
        match self {
            Self::AtmelIce => "atmel-ice",
            Self::PowerDebugger => "power-debugger",
            Self::MplabSnap => "snap",
            Self::MplabPickit4 => "pickit-4",
            Self::XplainedPro => "xplained-pro",
            Self::XplainedMini => "xplained-mini",
            Self::XplainedNano => "xplained-nano",
            Self::CuriosityNano => "curiosity-nano",
            Self::JtagIce3 => "jtagice3",
        }
    }

    pub fn from_name(name: &str) -> Option<Self> {
        Self::ALL
            .into_iter()
            .find(|kind| kind.name().eq_ignore_ascii_case(name))
    }

    pub const fn product_id(self) -> u16 {
        match self {
            Self::AtmelIce => 0x2141,
            Self::PowerDebugger => 0x2144,
            Self::MplabSnap => 0x2180,
            Self::MplabPickit4 => 0x2177,
            Self::XplainedPro => 0x2111,
            Self::XplainedMini | Self::XplainedNano => 0x2145,
            Self::CuriosityNano => 0x2175,
            Self::JtagIce3 => 0x2140,
        }
    }

    /// HID report size.
    pub const fn report_size(self) -> usize {
        match self {
            Self::XplainedMini | Self::XplainedNano | Self::CuriosityNano => 64,
            _ => 512,
        }
    }

    /// Minimum delay between consecutive commands.
    pub const fn min_command_gap(self) -> Duration {
        match self {
            Self::AtmelIce | Self::MplabSnap | Self::MplabPickit4 => Duration::from_millis(35),
            _ => Duration::ZERO,
        }
    }

    /// On-board debuggers are wired to a single interface.
    pub fn supports_interface(self, interface: PhysicalInterface) -> bool {
        match self {
            Self::XplainedMini | Self::XplainedNano => interface == PhysicalInterface::DebugWire,
            Self::CuriosityNano => interface == PhysicalInterface::Updi,
            _ => true,
        }
    }
}

type TransportOpener = Box<dyn FnMut(EdbgToolKind) -> Result<Box<dyn HidTransport>, DeviceFailure> + Send>;

/// An EDBG tool and its AVR8 debug interface.
pub struct EdbgTool {
    kind: EdbgToolKind,
    opener: TransportOpener,
    avr8: Option<EdbgAvr8Interface>,
}

impl EdbgTool {
    /// Tool opened over USB HID when initialised.
    pub fn new(kind: EdbgToolKind) -> Self {
        Self::with_opener(kind, open_hid_transport)
    }

    /// Tool using a caller supplied transport factory.
    pub fn with_opener(
        kind: EdbgToolKind,
        opener: impl FnMut(EdbgToolKind) -> Result<Box<dyn HidTransport>, DeviceFailure> + Send + 'static,
    ) -> Self {
        Self {
            kind,
            opener: Box::new(opener),
            avr8: None,
        }
    }

    pub const fn kind(&self) -> EdbgToolKind {
        self.kind
    }

    fn edbg(&mut self) -> Result<&mut EdbgInterface, DeviceFailure> {
        self.avr8
            .as_mut()
            .map(EdbgAvr8Interface::edbg)
            .ok_or(DeviceFailure::NotInitialised)
    }
}

#[cfg(feature = "hardware")]
fn open_hid_transport(kind: EdbgToolKind) -> Result<Box<dyn HidTransport>, DeviceFailure> {
    let transport = crate::probe::transport::HidApiTransport::open(
        MICROCHIP_VENDOR_ID,
        kind.product_id(),
        None,
        kind.report_size(),
    )?;
    Ok(Box::new(transport))
}

#[cfg(not(feature = "hardware"))]
fn open_hid_transport(_kind: EdbgToolKind) -> Result<Box<dyn HidTransport>, DeviceFailure> {
    Err(DeviceFailure::Transport(
        "built without USB hardware support".to_string(),
    ))
}

impl DebugTool for EdbgTool {
    fn init(&mut self) -> Result<(), DeviceFailure> {
        let transport = (self.opener)(self.kind)?;
        let mut cmsis_dap = CmsisDapInterface::new(transport);
        cmsis_dap.set_min_command_gap(self.kind.min_command_gap());

        let mut edbg = EdbgInterface::new(cmsis_dap);
        housekeeping::start_session(&mut edbg)?;
        self.avr8 = Some(EdbgAvr8Interface::new(edbg));

        info!("{} session started", self.kind.name());
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceFailure> {
        let result = self.edbg().and_then(housekeeping::end_session);
        self.avr8 = None;
        result
    }

    fn name(&self) -> &str {
        self.kind.name()
    }

    fn serial_number(&mut self) -> Result<String, DeviceFailure> {
        discovery::serial_number(self.edbg()?)
    }

    fn supports_interface(&self, interface: PhysicalInterface) -> bool {
        self.kind.supports_interface(interface)
    }

    fn avr8_interface(&mut self) -> Option<&mut dyn Avr8DebugInterface> {
        self.avr8
            .as_mut()
            .map(|avr8| avr8 as &mut dyn Avr8DebugInterface)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::probe::edbg::{AVR_CMD, AVR_RSP};
    use crate::probe::transport::MockHidTransport;

    fn reply(transport: &MockHidTransport, sequence_id: u16, handler: u8, payload: &[u8]) {
        let [lo, hi] = sequence_id.to_le_bytes();
        let mut frame = vec![0x0E, lo, hi, handler];
        frame.extend_from_slice(payload);
        let [size_hi, size_lo] = (frame.len() as u16).to_be_bytes();
        let mut report = vec![AVR_RSP, 0x11, size_hi, size_lo];
        report.extend_from_slice(&frame);
        transport.push_reply(&[AVR_CMD, 0x01]);
        transport.push_reply(&report);
    }

    #[test]
    fn test_tool_table() {
        assert_eq!(EdbgToolKind::from_name("curiosity-nano"), Some(EdbgToolKind::CuriosityNano));
        assert_eq!(EdbgToolKind::CuriosityNano.product_id(), 0x2175);
        assert_eq!(EdbgToolKind::AtmelIce.min_command_gap(), Duration::from_millis(35));
        assert!(!EdbgToolKind::XplainedMini.supports_interface(PhysicalInterface::Jtag));
        assert_eq!(EdbgToolKind::from_name("stlink"), None);
    }

    #[test]
    fn test_init_starts_session_and_reads_serial() {
        let transport = MockHidTransport::new(512);
        reply(&transport, 0, 0x01, &[0x80, 0x00]);
        reply(&transport, 1, 0x00, &[0x81, 0x00, b'J', b'0', b'4', b'2']);
        reply(&transport, 2, 0x01, &[0x80, 0x00]);

        let shared = transport.clone();
        let mut tool = EdbgTool::with_opener(EdbgToolKind::PowerDebugger, move |_| {
            Ok(Box::new(shared.clone()) as Box<dyn HidTransport>)
        });

        tool.init().unwrap();
        assert_eq!(tool.serial_number().unwrap(), "J042");
        assert!(tool.avr8_interface().is_some());
        tool.close().unwrap();
        assert!(tool.avr8_interface().is_none());
        assert_eq!(transport.pending_replies(), 0);
    }

    #[test]
    fn test_serial_before_init_fails() {
        let mut tool = EdbgTool::with_opener(EdbgToolKind::AtmelIce, |_| {
            Err(DeviceFailure::Transport("no device".to_string()))
        });

        assert!(matches!(tool.serial_number(), Err(DeviceFailure::NotInitialised)));
        assert!(tool.init().is_err());
    }
}
