//! Blocking facade over the target controller.

use super::{CommandPayload, ControllerHandle, Response, TargetControllerState};
use crate::error::CommandError;
use crate::target::{
    TargetBreakpoint, TargetDescriptor, TargetMemoryAddressRange, TargetMemoryType, TargetPinState,
    TargetRegister, TargetRegisterDescriptor, TargetState,
};
use std::collections::BTreeMap;
use std::time::Duration;
use thiserror::Error;

/// How long a facade call waits for the controller by default.
pub const DEFAULT_RESPONSE_TIMEOUT: Duration = Duration::from_secs(10);

#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConsoleError {
    #[error("timed out waiting for the target controller")]
    Timeout,

    #[error(transparent)]
    Command(#[from] CommandError),

    #[error("unexpected response from the target controller: {0}")]
    UnexpectedResponse(String),

    #[error("short memory read: requested {requested} bytes, received {received}")]
    ShortRead { requested: u32, received: usize },
}

/// Issues commands and blocks for their responses.
///
/// Cheap to clone; each debug server connection typically owns one.
#[derive(Debug, Clone)]
pub struct TargetControllerConsole {
    handle: ControllerHandle,
    timeout: Duration,
}

macro_rules! expect_response {
    ($response:expr, $variant:ident) => {
        match $response {
            Response::$variant(value) => Ok(value),
            other => Err(ConsoleError::UnexpectedResponse(format!("{other:?}"))),
        }
    };
}

impl TargetControllerConsole {
    pub const fn new(handle: ControllerHandle) -> Self {
        Self {
            handle,
            timeout: DEFAULT_RESPONSE_TIMEOUT,
        }
    }

    #[must_use]
    pub const fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub const fn handle(&self) -> &ControllerHandle {
        &self.handle
    }

    fn execute(&self, payload: CommandPayload) -> Result<Response, ConsoleError> {
        let result = self
            .handle
            .execute(payload, self.timeout)
            .ok_or(ConsoleError::Timeout)?;
        Ok(result?)
    }

    fn execute_ok(&self, payload: CommandPayload) -> Result<(), ConsoleError> {
        match self.execute(payload)? {
            Response::Ok => Ok(()),
            other => Err(ConsoleError::UnexpectedResponse(format!("{other:?}"))),
        }
    }

    pub fn target_controller_state(&self) -> Result<TargetControllerState, ConsoleError> {
        expect_response!(self.execute(CommandPayload::GetTargetControllerState)?, TargetControllerState)
    }

    /// Whether the controller is up and holding the hardware.
    pub fn is_target_controller_in_service(&self) -> bool {
        matches!(self.target_controller_state(), Ok(TargetControllerState::Active))
    }

    pub fn suspend(&self) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::Suspend)
    }

    pub fn resume(&self) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::Resume)
    }

    /// Stop the controller loop and release the hardware.
    pub fn shutdown(&self) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::Shutdown)
    }

    pub fn target_descriptor(&self) -> Result<TargetDescriptor, ConsoleError> {
        expect_response!(self.execute(CommandPayload::GetTargetDescriptor)?, TargetDescriptor).map(|d| *d)
    }

    pub fn target_state(&self) -> Result<TargetState, ConsoleError> {
        expect_response!(self.execute(CommandPayload::GetTargetState)?, TargetState)
    }

    pub fn stop_target_execution(&self) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::StopTargetExecution)
    }

    pub fn continue_target_execution(&self, from_address: Option<u32>) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::ResumeTargetExecution { from_address })
    }

    pub fn step_target_execution(&self, from_address: Option<u32>) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::StepTargetExecution { from_address })
    }

    pub fn reset_target(&self) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::ResetTarget)
    }

    pub fn read_registers(
        &self,
        descriptors: Vec<TargetRegisterDescriptor>,
    ) -> Result<Vec<TargetRegister>, ConsoleError> {
        expect_response!(
            self.execute(CommandPayload::ReadTargetRegisters { descriptors })?,
            Registers
        )
    }

    pub fn write_registers(&self, registers: Vec<TargetRegister>) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::WriteTargetRegisters { registers })
    }

    /// Read exactly `size` bytes. Anything shorter is an error, never a partial result.
    pub fn read_memory(
        &self,
        memory_type: TargetMemoryType,
        start_address: u32,
        size: u32,
        excluded_ranges: Vec<TargetMemoryAddressRange>,
    ) -> Result<Vec<u8>, ConsoleError> {
        let buffer: Vec<u8> = expect_response!(
            self.execute(CommandPayload::ReadTargetMemory {
                memory_type,
                start_address,
                size,
                excluded_ranges,
            })?,
            Memory
        )?;

        if buffer.len() != size as usize {
            return Err(ConsoleError::ShortRead {
                requested: size,
                received: buffer.len(),
            });
        }
        Ok(buffer)
    }

    pub fn write_memory(
        &self,
        memory_type: TargetMemoryType,
        start_address: u32,
        buffer: Vec<u8>,
    ) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::WriteTargetMemory {
            memory_type,
            start_address,
            buffer,
        })
    }

    pub fn set_breakpoint(&self, breakpoint: TargetBreakpoint) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::SetBreakpoint { breakpoint })
    }

    pub fn remove_breakpoint(&self, breakpoint: TargetBreakpoint) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::RemoveBreakpoint { breakpoint })
    }

    pub fn program_counter(&self) -> Result<u32, ConsoleError> {
        expect_response!(self.execute(CommandPayload::GetProgramCounter)?, ProgramCounter)
    }

    pub fn set_program_counter(&self, address: u32) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::SetProgramCounter { address })
    }

    pub fn stack_pointer(&self) -> Result<u32, ConsoleError> {
        expect_response!(self.execute(CommandPayload::GetStackPointer)?, StackPointer)
    }

    pub fn pin_states(&self) -> Result<BTreeMap<u16, TargetPinState>, ConsoleError> {
        expect_response!(self.execute(CommandPayload::GetTargetPinStates)?, PinStates)
    }

    pub fn set_pin_state(&self, pin_number: u16, state: TargetPinState) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::SetTargetPinState { pin_number, state })
    }

    pub fn enable_programming_mode(&self) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::EnableProgrammingMode)
    }

    pub fn disable_programming_mode(&self) -> Result<(), ConsoleError> {
        self.execute_ok(CommandPayload::DisableProgrammingMode)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::EnvironmentConfig;
    use crate::controller::{TargetController, ToolFactory};
    use crate::events::EventManager;
    use crate::target::TargetRegisterKind;
    use crate::tools::{DebugTool, SimulatedTool, SimulatorControl};
    use std::sync::Arc;
    use std::thread::JoinHandle;

    fn start(control: &SimulatorControl) -> (TargetControllerConsole, JoinHandle<()>) {
        let control = control.clone();
        let factory: ToolFactory =
            Box::new(move |_| Ok(Box::new(SimulatedTool::new(control.clone())) as Box<dyn DebugTool>));
        let (handle, thread) = TargetController::with_tool_factory(
            EnvironmentConfig::new("simulator", "atmega328p"),
            Arc::new(EventManager::new()),
            factory,
        )
        .with_poll_interval(Duration::from_millis(5))
        .spawn()
        .unwrap();
        (TargetControllerConsole::new(handle), thread)
    }

    fn stop(console: &TargetControllerConsole, thread: JoinHandle<()>) {
        console.shutdown().unwrap();
        thread.join().unwrap();
    }

    #[test]
    fn test_program_memory_write_requires_programming_mode() {
        let control = SimulatorControl::default();
        let (console, thread) = start(&control);
        console.stop_target_execution().unwrap();

        let result = console.write_memory(TargetMemoryType::Flash, 0x1000, vec![0xAA, 0xBB, 0xCC, 0xDD]);
        assert_eq!(
            result,
            Err(ConsoleError::Command(CommandError::ProgrammingModeRequired))
        );
        assert_eq!(control.read(TargetMemoryType::Flash, 0x1000, 4), vec![0xFF; 4]);

        console.enable_programming_mode().unwrap();
        console
            .write_memory(TargetMemoryType::Flash, 0x1000, vec![0xAA, 0xBB, 0xCC, 0xDD])
            .unwrap();
        assert_eq!(
            console.step_target_execution(None),
            Err(ConsoleError::Command(CommandError::ProgrammingModeEnabled))
        );
        console.disable_programming_mode().unwrap();
        assert_eq!(control.read(TargetMemoryType::Flash, 0x1000, 4), vec![0xAA, 0xBB, 0xCC, 0xDD]);

        stop(&console, thread);
    }

    #[test]
    fn test_register_round_trip() {
        let control = SimulatorControl::default();
        let (console, thread) = start(&control);
        console.stop_target_execution().unwrap();

        let descriptor = console.target_descriptor().unwrap();
        let r5 = descriptor
            .registers_of_kind(TargetRegisterKind::GeneralPurpose)
            .into_iter()
            .find(|register| register.id == 5)
            .cloned()
            .unwrap();

        console
            .write_registers(vec![TargetRegister::new(r5.clone(), vec![0x5A])])
            .unwrap();
        let registers = console.read_registers(vec![r5]).unwrap();
        assert_eq!(registers[0].value, vec![0x5A]);

        stop(&console, thread);
    }

    #[test]
    fn test_breakpoint_stops_target() {
        let control = SimulatorControl::default();
        let (console, thread) = start(&control);
        console.stop_target_execution().unwrap();

        console.set_breakpoint(TargetBreakpoint::software(0x200)).unwrap();
        console.continue_target_execution(Some(0x100)).unwrap();

        let deadline = std::time::Instant::now() + DEFAULT_RESPONSE_TIMEOUT;
        while console.target_state().unwrap() != TargetState::Stopped {
            assert!(std::time::Instant::now() < deadline);
            std::thread::sleep(Duration::from_millis(5));
        }
        assert_eq!(console.program_counter().unwrap(), 0x200);

        stop(&console, thread);
    }
}
