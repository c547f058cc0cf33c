//! Commands accepted by the target controller.

use crate::target::{
    TargetBreakpoint, TargetMemoryAddressRange, TargetMemoryType, TargetPinState, TargetRegister,
    TargetRegisterDescriptor,
};

/// Tag identifying the kind of a command.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum CommandKind {
    GetTargetControllerState,
    Suspend,
    Resume,
    Shutdown,
    GetTargetDescriptor,
    GetTargetState,
    StopTargetExecution,
    ResumeTargetExecution,
    ResetTarget,
    StepTargetExecution,
    ReadTargetRegisters,
    WriteTargetRegisters,
    ReadTargetMemory,
    WriteTargetMemory,
    SetBreakpoint,
    RemoveBreakpoint,
    SetProgramCounter,
    GetProgramCounter,
    GetStackPointer,
    GetTargetPinStates,
    SetTargetPinState,
    EnableProgrammingMode,
    DisableProgrammingMode,
}

impl CommandKind {
    /// Commands served regardless of controller state.
    pub const LIFECYCLE: [Self; 4] = [
        Self::GetTargetControllerState,
        Self::Suspend,
        Self::Resume,
        Self::Shutdown,
    ];

    /// Commands served only while the hardware is acquired.
    pub const TARGET: [Self; 19] = [
        Self::GetTargetDescriptor,
        Self::GetTargetState,
        Self::StopTargetExecution,
        Self::ResumeTargetExecution,
        Self::ResetTarget,
        Self::StepTargetExecution,
        Self::ReadTargetRegisters,
        Self::WriteTargetRegisters,
        Self::ReadTargetMemory,
        Self::WriteTargetMemory,
        Self::SetBreakpoint,
        Self::RemoveBreakpoint,
        Self::SetProgramCounter,
        Self::GetProgramCounter,
        Self::GetStackPointer,
        Self::GetTargetPinStates,
        Self::SetTargetPinState,
        Self::EnableProgrammingMode,
        Self::DisableProgrammingMode,
    ];

    /// The command is refused unless the target was last seen stopped.
    pub const fn requires_stopped_target(self) -> bool {
        matches!(
            self,
            Self::StepTargetExecution
                | Self::ReadTargetRegisters
                | Self::WriteTargetRegisters
                | Self::ReadTargetMemory
                | Self::WriteTargetMemory
                | Self::SetBreakpoint
                | Self::RemoveBreakpoint
                | Self::SetProgramCounter
                | Self::GetProgramCounter
                | Self::GetStackPointer
                | Self::GetTargetPinStates
                | Self::SetTargetPinState
                | Self::EnableProgrammingMode
        )
    }

    /// The command is refused while programming mode is enabled.
    pub const fn requires_debug_mode(self) -> bool {
        matches!(
            self,
            Self::StopTargetExecution
                | Self::ResumeTargetExecution
                | Self::ResetTarget
                | Self::StepTargetExecution
                | Self::ReadTargetRegisters
                | Self::WriteTargetRegisters
                | Self::SetBreakpoint
                | Self::RemoveBreakpoint
                | Self::SetProgramCounter
                | Self::GetProgramCounter
                | Self::GetStackPointer
                | Self::GetTargetPinStates
                | Self::SetTargetPinState
        )
    }
}

/// Command parameters, one variant per [`CommandKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CommandPayload {
    GetTargetControllerState,
    Suspend,
    Resume,
    Shutdown,
    GetTargetDescriptor,
    GetTargetState,
    StopTargetExecution,
    ResumeTargetExecution {
        from_address: Option<u32>,
    },
    ResetTarget,
    StepTargetExecution {
        from_address: Option<u32>,
    },
    ReadTargetRegisters {
        descriptors: Vec<TargetRegisterDescriptor>,
    },
    WriteTargetRegisters {
        registers: Vec<TargetRegister>,
    },
    ReadTargetMemory {
        memory_type: TargetMemoryType,
        start_address: u32,
        size: u32,
        /// Ranges not to be read; they come back as zero bytes.
        excluded_ranges: Vec<TargetMemoryAddressRange>,
    },
    WriteTargetMemory {
        memory_type: TargetMemoryType,
        start_address: u32,
        buffer: Vec<u8>,
    },
    SetBreakpoint {
        breakpoint: TargetBreakpoint,
    },
    RemoveBreakpoint {
        breakpoint: TargetBreakpoint,
    },
    SetProgramCounter {
        address: u32,
    },
    GetProgramCounter,
    GetStackPointer,
    GetTargetPinStates,
    SetTargetPinState {
        pin_number: u16,
        state: TargetPinState,
    },
    EnableProgrammingMode,
    DisableProgrammingMode,
}

impl CommandPayload {
    pub const fn kind(&self) -> CommandKind {
        match self {
            Self::GetTargetControllerState => CommandKind::GetTargetControllerState,
            Self::Suspend => CommandKind::Suspend,
            Self::Resume => CommandKind::Resume,
            Self::Shutdown => CommandKind::Shutdown,
            Self::GetTargetDescriptor => CommandKind::GetTargetDescriptor,
            Self::GetTargetState => CommandKind::GetTargetState,
            Self::StopTargetExecution => CommandKind::StopTargetExecution,
            Self::ResumeTargetExecution { .. } => CommandKind::ResumeTargetExecution,
            Self::ResetTarget => CommandKind::ResetTarget,
            Self::StepTargetExecution { .. } => CommandKind::StepTargetExecution,
            Self::ReadTargetRegisters { .. } => CommandKind::ReadTargetRegisters,
            Self::WriteTargetRegisters { .. } => CommandKind::WriteTargetRegisters,
            Self::ReadTargetMemory { .. } => CommandKind::ReadTargetMemory,
            Self::WriteTargetMemory { .. } => CommandKind::WriteTargetMemory,
            Self::SetBreakpoint { .. } => CommandKind::SetBreakpoint,
            Self::RemoveBreakpoint { .. } => CommandKind::RemoveBreakpoint,
            Self::SetProgramCounter { .. } => CommandKind::SetProgramCounter,
            Self::GetProgramCounter => CommandKind::GetProgramCounter,
            Self::GetStackPointer => CommandKind::GetStackPointer,
            Self::GetTargetPinStates => CommandKind::GetTargetPinStates,
            Self::SetTargetPinState { .. } => CommandKind::SetTargetPinState,
            Self::EnableProgrammingMode => CommandKind::EnableProgrammingMode,
            Self::DisableProgrammingMode => CommandKind::DisableProgrammingMode,
        }
    }
}

/// A queued request with its correlation id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Command {
    pub id: u64,
    pub payload: CommandPayload,
}

impl Command {
    pub const fn kind(&self) -> CommandKind {
        self.payload.kind()
    }

    pub const fn requires_stopped_target(&self) -> bool {
        self.kind().requires_stopped_target()
    }

    pub const fn requires_debug_mode(&self) -> bool {
        self.kind().requires_debug_mode()
    }
}
