//! Debug tool drivers.
//!
//! A [`DebugTool`] owns the connection to one physical (or simulated) probe and
//! hands out the target debug interface it implements.

pub mod edbg;
pub mod simulator;

use crate::error::{ConfigError, DeviceFailure, TargetError};
use crate::target::{PhysicalInterface, TargetBreakCause, TargetMemoryType, TargetState};

pub use edbg::{EdbgTool, EdbgToolKind};
pub use simulator::{SimulatedTool, SimulatorControl};

/// Name of the in-process simulated tool.
pub const SIMULATOR_TOOL_NAME: &str = "simulator";

/// Debug operations on an AVR8 target, as offered by a debug tool.
///
/// Program counter values are byte addresses.
pub trait Avr8DebugInterface: Send {
    /// Select the physical interface before activation.
    fn configure(&mut self, interface: PhysicalInterface) -> Result<(), TargetError>;

    /// Load part parameters into the tool. Called once the part is known.
    fn set_target_parameters(&mut self, part: &crate::target::Avr8Part) -> Result<(), TargetError>;

    /// Activate the physical interface and attach to the target.
    fn activate(&mut self) -> Result<(), TargetError>;

    fn deactivate(&mut self) -> Result<(), TargetError>;

    fn device_signature(&mut self) -> Result<[u8; 3], TargetError>;

    fn stop(&mut self) -> Result<(), TargetError>;

    fn run(&mut self) -> Result<(), TargetError>;

    fn step(&mut self) -> Result<(), TargetError>;

    fn reset(&mut self) -> Result<(), TargetError>;

    /// Current execution state. Consumes any pending break notifications.
    fn state(&mut self) -> Result<TargetState, TargetError>;

    /// Cause of the most recent stop.
    fn break_cause(&self) -> TargetBreakCause;

    fn program_counter(&mut self) -> Result<u32, TargetError>;

    fn set_program_counter(&mut self, address: u32) -> Result<(), TargetError>;

    /// Read the 32 general purpose registers, r0 first.
    fn read_general_purpose_registers(&mut self) -> Result<Vec<u8>, TargetError>;

    fn write_general_purpose_register(&mut self, index: u8, value: u8) -> Result<(), TargetError>;

    fn read_memory(
        &mut self,
        memory_type: TargetMemoryType,
        address: u32,
        length: u32,
    ) -> Result<Vec<u8>, TargetError>;

    fn write_memory(
        &mut self,
        memory_type: TargetMemoryType,
        address: u32,
        data: &[u8],
    ) -> Result<(), TargetError>;

    fn set_software_breakpoint(&mut self, address: u32) -> Result<(), TargetError>;

    fn clear_software_breakpoint(&mut self, address: u32) -> Result<(), TargetError>;

    fn set_hardware_breakpoint(&mut self, address: u32) -> Result<(), TargetError>;

    fn clear_hardware_breakpoint(&mut self, address: u32) -> Result<(), TargetError>;

    fn clear_all_breakpoints(&mut self) -> Result<(), TargetError>;

    fn enable_programming_mode(&mut self) -> Result<(), TargetError>;

    fn disable_programming_mode(&mut self) -> Result<(), TargetError>;
}

/// A debug tool the controller can acquire.
pub trait DebugTool: Send {
    /// Open the tool and start a session.
    fn init(&mut self) -> Result<(), DeviceFailure>;

    /// End the session and release the tool.
    fn close(&mut self) -> Result<(), DeviceFailure>;

    fn name(&self) -> &str;

    fn serial_number(&mut self) -> Result<String, DeviceFailure>;

    fn supports_interface(&self, interface: PhysicalInterface) -> bool;

    fn avr8_interface(&mut self) -> Option<&mut dyn Avr8DebugInterface>;
}

/// Names accepted by [`create_tool`].
pub fn supported_tool_names() -> Vec<&'static str> {
    let mut names: Vec<_> = EdbgToolKind::ALL.iter().map(|kind| kind.name()).collect();
    names.push(SIMULATOR_TOOL_NAME);
    names
}

/// Construct a tool by its configured name.
pub fn create_tool(name: &str) -> Result<Box<dyn DebugTool>, ConfigError> {
    if name.eq_ignore_ascii_case(SIMULATOR_TOOL_NAME) {
        return Ok(Box::new(SimulatedTool::new(SimulatorControl::default())));
    }

    let kind = EdbgToolKind::from_name(name).ok_or_else(|| ConfigError::UnknownTool(name.to_string()))?;
    Ok(Box::new(EdbgTool::new(kind)))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tool_registry() {
        let names = supported_tool_names();
        assert!(names.contains(&"atmel-ice"));
        assert!(names.contains(&"simulator"));

        let tool = create_tool("simulator").unwrap();
        assert_eq!(tool.name(), "simulator");

        let tool = create_tool("Atmel-ICE").unwrap();
        assert_eq!(tool.name(), "atmel-ice");

        assert!(matches!(create_tool("jlink"), Err(ConfigError::UnknownTool(_))));
    }
}
