//! In-process simulated debug tool.
//!
//! Models an AVR8 part well enough to exercise the controller and the GDB
//! server without hardware: memories, registers, breakpoints and execution
//! state. It does not execute instructions. A resumed target stops at the
//! nearest breakpoint after the current program counter, or keeps running
//! until stopped. Tests drive it through [`SimulatorControl`].

use super::{Avr8DebugInterface, DebugTool, SIMULATOR_TOOL_NAME};
use crate::error::{DeviceFailure, TargetError};
use crate::target::avr8::find_part;
use crate::target::{Avr8Part, PhysicalInterface, TargetBreakCause, TargetMemoryType, TargetState};
use std::collections::BTreeSet;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

#[derive(Debug)]
struct SimulatorState {
    part: &'static Avr8Part,
    signature: [u8; 3],
    serial_number: String,
    flash: Vec<u8>,
    data: Vec<u8>,
    register_file: [u8; 32],
    eeprom: Vec<u8>,
    program_counter: u32,
    state: TargetState,
    break_cause: TargetBreakCause,
    pending_stop: Option<u32>,
    breakpoints: BTreeSet<u32>,
    programming_mode: bool,
    session_open: bool,
    activated: bool,
    failing: bool,
    operations: usize,
}

impl SimulatorState {
    fn new(part: &'static Avr8Part) -> Self {
        Self {
            part,
            signature: part.signature,
            serial_number: "SIM00001".to_string(),
            flash: vec![0xFF; part.flash_size as usize],
            data: vec![0; usize::from(part.ram_start) + usize::from(part.ram_size)],
            register_file: [0; 32],
            eeprom: vec![0xFF; usize::from(part.eeprom_size)],
            program_counter: 0,
            state: TargetState::Unknown,
            break_cause: TargetBreakCause::Unknown,
            pending_stop: None,
            breakpoints: BTreeSet::new(),
            programming_mode: false,
            session_open: false,
            activated: false,
            failing: false,
            operations: 0,
        }
    }

    fn check(&mut self) -> Result<(), TargetError> {
        if self.failing {
            return Err(DeviceFailure::Transport("simulated device failure".to_string()).into());
        }
        self.operations += 1;
        Ok(())
    }

    fn memory(&mut self, memory_type: TargetMemoryType) -> Result<&mut Vec<u8>, TargetError> {
        match memory_type {
            TargetMemoryType::Flash => Ok(&mut self.flash),
            TargetMemoryType::Ram => Ok(&mut self.data),
            TargetMemoryType::Eeprom => Ok(&mut self.eeprom),
            TargetMemoryType::Other => Err(TargetError::operation("unsupported memory type")),
        }
    }

    fn registers(&mut self) -> &mut [u8] {
        if self.part.memory_mapped_registers {
            &mut self.data[..32]
        } else {
            &mut self.register_file
        }
    }
}

/// Shared handle onto the simulated device. Clones share state.
#[derive(Debug, Clone)]
pub struct SimulatorControl {
    state: Arc<Mutex<SimulatorState>>,
}

impl Default for SimulatorControl {
    fn default() -> Self {
        let part = find_part("atmega328p").unwrap_or(&crate::target::avr8::supported_parts()[0]);
        Self::new(part)
    }
}

impl SimulatorControl {
    pub fn new(part: &'static Avr8Part) -> Self {
        Self {
            state: Arc::new(Mutex::new(SimulatorState::new(part))),
        }
    }

    fn lock(&self) -> MutexGuard<'_, SimulatorState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Make every subsequent device operation fail, as if the tool was unplugged.
    pub fn set_failing(&self, failing: bool) {
        self.lock().failing = failing;
    }

    /// Signature reported instead of the part's own.
    pub fn set_signature(&self, signature: [u8; 3]) {
        self.lock().signature = signature;
    }

    pub fn state(&self) -> TargetState {
        self.lock().state
    }

    pub fn program_counter(&self) -> u32 {
        self.lock().program_counter
    }

    pub fn breakpoints(&self) -> Vec<u32> {
        self.lock().breakpoints.iter().copied().collect()
    }

    pub fn programming_mode(&self) -> bool {
        self.lock().programming_mode
    }

    pub fn is_session_open(&self) -> bool {
        self.lock().session_open
    }

    pub fn is_activated(&self) -> bool {
        self.lock().activated
    }

    /// Number of device operations served so far.
    pub fn operation_count(&self) -> usize {
        self.lock().operations
    }

    pub fn read(&self, memory_type: TargetMemoryType, address: u32, length: usize) -> Vec<u8> {
        let mut state = self.lock();
        state
            .memory(memory_type)
            .ok()
            .and_then(|memory| memory.get(address as usize..address as usize + length))
            .map(<[u8]>::to_vec)
            .unwrap_or_default()
    }

    /// Load bytes directly, bypassing programming mode checks.
    pub fn load(&self, memory_type: TargetMemoryType, address: u32, bytes: &[u8]) {
        let mut state = self.lock();
        if let Ok(memory) = state.memory(memory_type) {
            let start = address as usize;
            if let Some(slice) = memory.get_mut(start..start + bytes.len()) {
                slice.copy_from_slice(bytes);
            }
        }
    }

    pub fn set_general_purpose_register(&self, index: usize, value: u8) {
        if let Some(register) = self.lock().registers().get_mut(index) {
            *register = value;
        }
    }

    /// Stop a running target as if it hit a breakpoint at `address`.
    pub fn trigger_break(&self, address: u32) {
        let mut state = self.lock();
        if state.state == TargetState::Running {
            state.pending_stop = Some(address);
        }
    }
}

/// AVR8 debug interface of the simulated tool.
#[derive(Debug)]
pub struct SimulatedAvr8 {
    control: SimulatorControl,
}

fn bounds(memory: &[u8], address: u32, length: usize) -> Result<std::ops::Range<usize>, TargetError> {
    let start = address as usize;
    let end = start + length;
    if end > memory.len() {
        return Err(TargetError::operation(format!(
            "access of {length} bytes at 0x{address:04x} is out of range"
        )));
    }
    Ok(start..end)
}

impl Avr8DebugInterface for SimulatedAvr8 {
    fn configure(&mut self, _interface: PhysicalInterface) -> Result<(), TargetError> {
        self.control.lock().check()
    }

    fn set_target_parameters(&mut self, _part: &Avr8Part) -> Result<(), TargetError> {
        self.control.lock().check()
    }

    fn activate(&mut self) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        state.activated = true;
        state.state = TargetState::Stopped;
        Ok(())
    }

    fn deactivate(&mut self) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        state.activated = false;
        state.programming_mode = false;
        state.state = TargetState::Unknown;
        Ok(())
    }

    fn device_signature(&mut self) -> Result<[u8; 3], TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        Ok(state.signature)
    }

    fn stop(&mut self) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        state.state = TargetState::Stopped;
        state.break_cause = TargetBreakCause::Unknown;
        state.pending_stop = None;
        Ok(())
    }

    fn run(&mut self) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        let next = state
            .breakpoints
            .range(state.program_counter + 1..)
            .next()
            .or_else(|| state.breakpoints.iter().next())
            .copied();
        state.state = TargetState::Running;
        state.pending_stop = next;
        Ok(())
    }

    fn step(&mut self) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        state.state = TargetState::Running;
        state.pending_stop = Some(state.program_counter + 2);
        Ok(())
    }

    fn reset(&mut self) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        state.program_counter = 0;
        state.state = TargetState::Stopped;
        state.break_cause = TargetBreakCause::Unknown;
        state.pending_stop = None;
        Ok(())
    }

    fn state(&mut self) -> Result<TargetState, TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        if let Some(address) = state.pending_stop.take() {
            state.break_cause = if state.breakpoints.contains(&address) {
                TargetBreakCause::Breakpoint
            } else {
                TargetBreakCause::Unknown
            };
            state.program_counter = address;
            state.state = TargetState::Stopped;
        }
        Ok(state.state)
    }

    fn break_cause(&self) -> TargetBreakCause {
        self.control.lock().break_cause
    }

    fn program_counter(&mut self) -> Result<u32, TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        Ok(state.program_counter)
    }

    fn set_program_counter(&mut self, address: u32) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        state.program_counter = address;
        Ok(())
    }

    fn read_general_purpose_registers(&mut self) -> Result<Vec<u8>, TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        Ok(state.registers().to_vec())
    }

    fn write_general_purpose_register(&mut self, index: u8, value: u8) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        let register = state
            .registers()
            .get_mut(usize::from(index))
            .ok_or_else(|| TargetError::operation(format!("invalid register r{index}")))?;
        *register = value;
        Ok(())
    }

    fn read_memory(
        &mut self,
        memory_type: TargetMemoryType,
        address: u32,
        length: u32,
    ) -> Result<Vec<u8>, TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        let memory = state.memory(memory_type)?;
        let range = bounds(memory, address, length as usize)?;
        Ok(memory[range].to_vec())
    }

    fn write_memory(
        &mut self,
        memory_type: TargetMemoryType,
        address: u32,
        data: &[u8],
    ) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        if memory_type == TargetMemoryType::Flash && !state.programming_mode {
            return Err(TargetError::operation("flash is read-only outside programming mode"));
        }
        let memory = state.memory(memory_type)?;
        let range = bounds(memory, address, data.len())?;
        memory[range].copy_from_slice(data);
        Ok(())
    }

    fn set_software_breakpoint(&mut self, address: u32) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        state.breakpoints.insert(address);
        Ok(())
    }

    fn clear_software_breakpoint(&mut self, address: u32) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        state.breakpoints.remove(&address);
        Ok(())
    }

    fn set_hardware_breakpoint(&mut self, address: u32) -> Result<(), TargetError> {
        self.set_software_breakpoint(address)
    }

    fn clear_hardware_breakpoint(&mut self, address: u32) -> Result<(), TargetError> {
        self.clear_software_breakpoint(address)
    }

    fn clear_all_breakpoints(&mut self) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        state.breakpoints.clear();
        Ok(())
    }

    fn enable_programming_mode(&mut self) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        state.programming_mode = true;
        Ok(())
    }

    fn disable_programming_mode(&mut self) -> Result<(), TargetError> {
        let mut state = self.control.lock();
        state.check()?;
        state.programming_mode = false;
        Ok(())
    }
}

/// Debug tool backed by the simulator.
#[derive(Debug)]
pub struct SimulatedTool {
    control: SimulatorControl,
    avr8: Option<SimulatedAvr8>,
}

impl SimulatedTool {
    pub const fn new(control: SimulatorControl) -> Self {
        Self { control, avr8: None }
    }

    pub fn control(&self) -> SimulatorControl {
        self.control.clone()
    }
}

fn device_failure(error: TargetError) -> DeviceFailure {
    match error {
        TargetError::Device(failure) => failure,
        TargetError::Operation(message) => DeviceFailure::Transport(message),
    }
}

impl DebugTool for SimulatedTool {
    fn init(&mut self) -> Result<(), DeviceFailure> {
        let mut state = self.control.lock();
        state.check().map_err(device_failure)?;
        state.session_open = true;
        drop(state);

        self.avr8 = Some(SimulatedAvr8 {
            control: self.control.clone(),
        });
        Ok(())
    }

    fn close(&mut self) -> Result<(), DeviceFailure> {
        self.avr8 = None;
        let mut state = self.control.lock();
        state.session_open = false;
        state.check().map_err(device_failure)
    }

    fn name(&self) -> &str {
        SIMULATOR_TOOL_NAME
    }

    fn serial_number(&mut self) -> Result<String, DeviceFailure> {
        let mut state = self.control.lock();
        state.check().map_err(device_failure)?;
        Ok(state.serial_number.clone())
    }

    fn supports_interface(&self, _interface: PhysicalInterface) -> bool {
        true
    }

    fn avr8_interface(&mut self) -> Option<&mut dyn Avr8DebugInterface> {
        self.avr8
            .as_mut()
            .map(|avr8| avr8 as &mut dyn Avr8DebugInterface)
    }
}
