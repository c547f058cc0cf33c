//! Target controller.
//!
//! A single worker thread owns the debug tool and the target. Other threads
//! talk to it through a [`ControllerHandle`] (commands in, responses out) and
//! observe it through the event bus. Each loop iteration polls the target for
//! execution state changes, sleeps on a notifier for at most the poll
//! interval, runs every queued command in submission order and finally
//! dispatches the controller's own event callbacks.
//!
//! A device failure never takes the thread down: the controller releases the
//! hardware and drops to [`TargetControllerState::Suspended`], where only the
//! lifecycle commands are served until a resume succeeds.

pub mod commands;
pub mod console;
mod handle;
mod registers;
pub mod responses;

pub use commands::{Command, CommandKind, CommandPayload};
pub use console::{ConsoleError, TargetControllerConsole};
pub use handle::ControllerHandle;
pub use registers::RegisterIndex;
pub use responses::{CommandResult, Response};

use crate::config::EnvironmentConfig;
use crate::error::{CommandError, ConfigError, TargetControllerError, TargetError};
use crate::events::{EventKind, EventListener, EventManager, EventPayload};
use crate::target::{
    Avr8Target, BreakpointKind, TargetBreakCause, TargetMemoryAddressRange, TargetMemoryType,
    TargetSelector, TargetState,
};
use crate::tools::{self, Avr8DebugInterface, DebugTool};
use handle::Shared;
use log::{debug, error, info, warn};
use std::collections::{HashSet, VecDeque};
use std::sync::{Arc, Mutex, PoisonError};
use std::thread::{self, JoinHandle};
use std::time::Duration;

/// Upper bound on how long the worker sleeps between target polls.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_millis(60);

/// Whether the controller currently holds the hardware.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum TargetControllerState {
    Active,
    Suspended,
}

/// Lifecycle of the controller worker thread.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum ControllerThreadState {
    Starting,
    Ready,
    Stopped,
}

/// Creates debug tools by configured name.
pub type ToolFactory = Box<dyn FnMut(&str) -> Result<Box<dyn DebugTool>, ConfigError> + Send>;

struct Hardware {
    tool: Box<dyn DebugTool>,
    target: Avr8Target,
}

/// Requests raised by event callbacks, acted on after dispatch in publish order.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum LifecycleRequest {
    SessionStarted,
    SessionFinished,
    Shutdown,
}

type LifecycleInbox = Arc<Mutex<VecDeque<(u64, LifecycleRequest)>>>;

pub struct TargetController {
    config: EnvironmentConfig,
    events: Arc<EventManager>,
    listener: Arc<EventListener>,
    shared: Arc<Shared>,
    tool_factory: ToolFactory,
    poll_interval: Duration,
    hardware: Option<Hardware>,
    state: TargetControllerState,
    last_target_state: TargetState,
    handlers: HashSet<CommandKind>,
    register_index: RegisterIndex,
    lifecycle_inbox: LifecycleInbox,
    running: bool,
}

impl TargetController {
    pub fn new(config: EnvironmentConfig, events: Arc<EventManager>) -> Self {
        Self::with_tool_factory(config, events, Box::new(tools::create_tool))
    }

    /// Controller whose debug tool comes from `tool_factory` instead of the built-in registry.
    pub fn with_tool_factory(
        config: EnvironmentConfig,
        events: Arc<EventManager>,
        tool_factory: ToolFactory,
    ) -> Self {
        Self {
            config,
            events,
            listener: Arc::new(EventListener::new("TargetControllerEventListener")),
            shared: Arc::new(Shared::new()),
            tool_factory,
            poll_interval: DEFAULT_POLL_INTERVAL,
            hardware: None,
            state: TargetControllerState::Suspended,
            last_target_state: TargetState::Unknown,
            handlers: HashSet::new(),
            register_index: RegisterIndex::default(),
            lifecycle_inbox: Arc::new(Mutex::new(VecDeque::new())),
            running: true,
        }
    }

    #[must_use]
    pub const fn with_poll_interval(mut self, poll_interval: Duration) -> Self {
        self.poll_interval = poll_interval;
        self
    }

    pub fn handle(&self) -> ControllerHandle {
        ControllerHandle::new(Arc::clone(&self.shared))
    }

    /// Start the worker thread and wait for it to finish start-up.
    ///
    /// Configuration errors and failures to acquire the hardware are returned
    /// here; the thread has already exited in that case.
    pub fn spawn(self) -> Result<(ControllerHandle, JoinHandle<()>), TargetControllerError> {
        let handle = self.handle();
        let (startup_tx, startup_rx) = crossbeam_channel::bounded(1);

        let thread = thread::Builder::new()
            .name("TC".to_string())
            .spawn(move || self.run(&startup_tx))
            .map_err(TargetControllerError::Spawn)?;

        match startup_rx.recv() {
            Ok(Ok(())) => Ok((handle, thread)),
            Ok(Err(error)) => {
                let _ = thread.join();
                Err(error)
            }
            Err(_) => {
                let _ = thread.join();
                Err(TargetControllerError::ThreadExited)
            }
        }
    }

    fn run(mut self, startup_tx: &crossbeam_channel::Sender<Result<(), TargetControllerError>>) {
        info!("Starting target controller");
        self.set_thread_state(ControllerThreadState::Starting);

        if let Err(error) = self.startup() {
            error!("Target controller start-up failed: {error}");
            self.shutdown();
            let _ = startup_tx.send(Err(error));
            return;
        }

        self.set_thread_state(ControllerThreadState::Ready);
        let _ = startup_tx.send(Ok(()));

        while self.running {
            if self.state == TargetControllerState::Active {
                if let Err(error) = self.fire_target_events() {
                    self.handle_device_failure(&error.to_string());
                }
            }

            self.shared.notifier.wait(self.poll_interval);
            self.process_queued_commands();
            self.listener.dispatch_current_events();
            self.process_lifecycle_requests();
        }

        self.shutdown();
    }

    fn startup(&mut self) -> Result<(), TargetControllerError> {
        self.listener.set_interrupt_notifier(self.shared.notifier.clone());
        self.events.register_listener(Arc::clone(&self.listener));

        self.subscribe_lifecycle(EventKind::DebugSessionStarted, LifecycleRequest::SessionStarted);
        self.subscribe_lifecycle(EventKind::ShutdownTargetController, LifecycleRequest::Shutdown);
        self.handlers.extend(CommandKind::LIFECYCLE);

        self.resume()
    }

    fn subscribe_lifecycle(&self, kind: EventKind, request: LifecycleRequest) {
        let inbox = Arc::clone(&self.lifecycle_inbox);
        self.listener.subscribe(kind, move |event| {
            inbox
                .lock()
                .unwrap_or_else(PoisonError::into_inner)
                .push_back((event.id, request));
        });
    }

    fn shutdown(&mut self) {
        info!("Shutting down target controller");
        self.release_hardware();
        self.events.deregister_listener(self.listener.id());

        // Nothing will serve these any more.
        for command in self.shared.take_commands() {
            self.shared.respond(command.id, Err(CommandError::NoHandler));
        }

        self.set_thread_state(ControllerThreadState::Stopped);
    }

    fn set_thread_state(&self, state: ControllerThreadState) {
        self.shared.set_thread_state(state);
        self.events
            .publish(EventPayload::TargetControllerThreadStateChanged { state });
    }

    fn set_state(&mut self, state: TargetControllerState) {
        self.state = state;
        self.events
            .publish(EventPayload::TargetControllerStateChanged { state });
    }

    fn acquire_hardware(&mut self) -> Result<Hardware, TargetControllerError> {
        let selector = TargetSelector::from_name(&self.config.target.name)?;
        let mut tool = (self.tool_factory)(&self.config.tool.name)?;
        let interface = self
            .config
            .target
            .physical_interface
            .unwrap_or_else(|| selector.default_interface());

        if !tool.supports_interface(interface) {
            return Err(ConfigError::UnsupportedPairing {
                tool: tool.name().to_string(),
                target: self.config.target.name.clone(),
            }
            .into());
        }

        tool.init()?;
        let target = match connect_target(tool.as_mut(), &selector, interface) {
            Ok(target) => target,
            Err(error) => {
                if let Err(close_error) = tool.close() {
                    warn!("Failed to close debug tool: {close_error}");
                }
                return Err(error);
            }
        };

        info!("Debug tool: {}", tool.name());
        match tool.serial_number() {
            Ok(serial) => info!("Debug tool serial number: {serial}"),
            Err(error) => warn!("Failed to read debug tool serial number: {error}"),
        }
        info!(
            "Target: {} (signature 0x{}, {:?})",
            target.part().name,
            target.part().signature_hex(),
            interface
        );

        Ok(Hardware { tool, target })
    }

    fn release_hardware(&mut self) {
        let Some(mut hardware) = self.hardware.take() else {
            return;
        };

        if let Some(interface) = hardware.tool.avr8_interface() {
            if let Err(error) = interface.deactivate() {
                warn!("Failed to deactivate target: {error}");
            }
        }
        if let Err(error) = hardware.tool.close() {
            warn!("Failed to close debug tool: {error}");
        }
    }

    /// Acquire the hardware and serve target commands. No-op when active.
    fn resume(&mut self) -> Result<(), TargetControllerError> {
        if self.state == TargetControllerState::Active {
            debug!("Target controller already active");
            return Ok(());
        }

        info!("Resuming target controller");
        let hardware = self.acquire_hardware()?;
        self.register_index = RegisterIndex::new(&hardware.target.descriptor().register_descriptors);
        self.hardware = Some(hardware);

        self.handlers.extend(CommandKind::TARGET);
        self.subscribe_lifecycle(EventKind::DebugSessionFinished, LifecycleRequest::SessionFinished);
        self.last_target_state = TargetState::Running;
        self.set_state(TargetControllerState::Active);
        Ok(())
    }

    /// Release the hardware and serve only lifecycle commands. No-op when suspended.
    fn suspend(&mut self) {
        if self.state == TargetControllerState::Suspended {
            debug!("Target controller already suspended");
            return;
        }

        info!("Suspending target controller");
        self.release_hardware();
        self.handlers.retain(|kind| CommandKind::LIFECYCLE.contains(kind));
        self.listener.unsubscribe(EventKind::DebugSessionFinished);
        self.register_index = RegisterIndex::default();
        self.last_target_state = TargetState::Unknown;
        self.set_state(TargetControllerState::Suspended);
    }

    fn handle_device_failure(&mut self, message: &str) {
        error!("Device failure: {message}");
        self.suspend();
    }

    /// Poll the target and publish any execution state change.
    fn fire_target_events(&mut self) -> Result<(), CommandError> {
        let (state, program_counter, break_cause) = self.with_hardware(|interface, _| {
            let state = interface.state()?;
            if state == TargetState::Stopped {
                Ok((state, interface.program_counter()?, interface.break_cause()))
            } else {
                Ok((state, 0, TargetBreakCause::Unknown))
            }
        })?;

        if state == self.last_target_state {
            return Ok(());
        }
        self.last_target_state = state;

        match state {
            TargetState::Stopped => {
                debug!("Target stopped at 0x{program_counter:x} ({break_cause:?})");
                self.events.publish(EventPayload::TargetExecutionStopped {
                    program_counter,
                    break_cause,
                });
            }
            TargetState::Running => {
                self.events.publish(EventPayload::TargetExecutionResumed);
            }
            TargetState::Unknown => {}
        }
        Ok(())
    }

    fn process_queued_commands(&mut self) {
        for command in self.shared.take_commands() {
            let kind = command.kind();
            debug!("Processing command {} ({kind:?})", command.id);

            let result = self.process_command(command.payload);
            if let Err(CommandError::Device(message)) = &result {
                self.handle_device_failure(message);
            } else if let Err(error) = &result {
                debug!("Command {} ({kind:?}) failed: {error}", command.id);
            }

            self.shared.respond(command.id, result);
        }
    }

    fn process_lifecycle_requests(&mut self) {
        let mut requests: Vec<(u64, LifecycleRequest)> = self
            .lifecycle_inbox
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .drain(..)
            .collect();
        // Dispatch groups by kind; a finished session followed by a new one must not end suspended.
        requests.sort_by_key(|(event_id, _)| *event_id);

        for (_, request) in requests {
            match request {
                LifecycleRequest::SessionStarted => self.on_debug_session_started(),
                LifecycleRequest::SessionFinished => self.on_debug_session_finished(),
                LifecycleRequest::Shutdown => self.running = false,
            }
        }
    }

    fn on_debug_session_started(&mut self) {
        if self.state == TargetControllerState::Suspended {
            debug!("Debug session started, resuming target controller");
            if let Err(error) = self.resume() {
                error!("Failed to resume target controller: {error}");
            }
        }
    }

    fn on_debug_session_finished(&mut self) {
        if self.state != TargetControllerState::Active {
            return;
        }

        let last_state = self.last_target_state;
        let resumed = self.with_hardware(|interface, target| {
            if target.programming_mode_enabled() {
                target.disable_programming_mode(interface)?;
            }
            interface.clear_all_breakpoints()?;
            if last_state != TargetState::Running {
                interface.run()?;
            }
            Ok(())
        });

        match resumed {
            Ok(()) => {
                if last_state != TargetState::Running {
                    self.last_target_state = TargetState::Running;
                    self.events.publish(EventPayload::TargetExecutionResumed);
                }
            }
            Err(error) => {
                self.handle_device_failure(&error.to_string());
                return;
            }
        }

        if self.config.tool.release_post_debug_session {
            self.suspend();
        }
    }

    /// Run `operation` against the acquired hardware.
    fn with_hardware<T>(
        &mut self,
        operation: impl FnOnce(&mut dyn Avr8DebugInterface, &mut Avr8Target) -> Result<T, TargetError>,
    ) -> Result<T, CommandError> {
        let hardware = self.hardware.as_mut().ok_or(CommandError::NoHandler)?;
        let interface = hardware
            .tool
            .avr8_interface()
            .ok_or_else(|| CommandError::Target("debug tool has no AVR8 interface".to_string()))?;
        Ok(operation(interface, &mut hardware.target)?)
    }

    fn programming_mode_enabled(&self) -> bool {
        self.hardware
            .as_ref()
            .is_some_and(|hardware| hardware.target.programming_mode_enabled())
    }

    fn process_command(&mut self, payload: CommandPayload) -> CommandResult {
        let kind = payload.kind();
        if !self.handlers.contains(&kind) {
            return Err(CommandError::NoHandler);
        }
        if kind.requires_stopped_target() && self.last_target_state != TargetState::Stopped {
            return Err(CommandError::TargetNotStopped);
        }
        if kind.requires_debug_mode() && self.programming_mode_enabled() {
            return Err(CommandError::ProgrammingModeEnabled);
        }

        match payload {
            CommandPayload::GetTargetControllerState => Ok(Response::TargetControllerState(self.state)),
            CommandPayload::Suspend => {
                self.suspend();
                Ok(Response::Ok)
            }
            CommandPayload::Resume => {
                self.resume()?;
                Ok(Response::Ok)
            }
            CommandPayload::Shutdown => {
                self.running = false;
                Ok(Response::Ok)
            }
            CommandPayload::GetTargetDescriptor => {
                let descriptor = self.with_hardware(|_, target| Ok(target.descriptor().clone()))?;
                Ok(Response::TargetDescriptor(Box::new(descriptor)))
            }
            CommandPayload::GetTargetState => Ok(Response::TargetState(self.last_target_state)),
            CommandPayload::StopTargetExecution => self.stop_target_execution(),
            CommandPayload::ResumeTargetExecution { from_address } => {
                self.with_hardware(|interface, _| {
                    if let Some(address) = from_address {
                        interface.set_program_counter(address)?;
                    }
                    interface.run()
                })?;
                self.last_target_state = TargetState::Running;
                self.events.publish(EventPayload::TargetExecutionResumed);
                Ok(Response::Ok)
            }
            CommandPayload::ResetTarget => {
                self.with_hardware(|interface, _| interface.reset())?;
                self.last_target_state = TargetState::Stopped;
                self.events.publish(EventPayload::TargetReset);
                Ok(Response::Ok)
            }
            CommandPayload::StepTargetExecution { from_address } => {
                self.with_hardware(|interface, _| {
                    if let Some(address) = from_address {
                        interface.set_program_counter(address)?;
                    }
                    interface.step()
                })?;
                // The next poll sees the target stopped again and reports it.
                self.last_target_state = TargetState::Running;
                self.events.publish(EventPayload::TargetExecutionResumed);
                Ok(Response::Ok)
            }
            CommandPayload::ReadTargetRegisters { descriptors } => {
                let registers =
                    self.with_hardware(|interface, target| target.read_registers(interface, &descriptors))?;
                Ok(Response::Registers(registers))
            }
            CommandPayload::WriteTargetRegisters { registers } => {
                self.with_hardware(|interface, target| target.write_registers(interface, &registers))?;
                self.events
                    .publish(EventPayload::RegistersWrittenToTarget { registers });
                Ok(Response::Ok)
            }
            CommandPayload::ReadTargetMemory {
                memory_type,
                start_address,
                size,
                excluded_ranges,
            } => {
                let buffer = self.with_hardware(|interface, _| {
                    read_memory_excluding(interface, memory_type, start_address, size, &excluded_ranges)
                })?;
                Ok(Response::Memory(buffer))
            }
            CommandPayload::WriteTargetMemory {
                memory_type,
                start_address,
                buffer,
            } => self.write_target_memory(memory_type, start_address, &buffer),
            CommandPayload::SetBreakpoint { breakpoint } => {
                self.with_hardware(|interface, _| match breakpoint.kind {
                    BreakpointKind::Software => interface.set_software_breakpoint(breakpoint.address),
                    BreakpointKind::Hardware => interface.set_hardware_breakpoint(breakpoint.address),
                })?;
                Ok(Response::Ok)
            }
            CommandPayload::RemoveBreakpoint { breakpoint } => {
                self.with_hardware(|interface, _| match breakpoint.kind {
                    BreakpointKind::Software => interface.clear_software_breakpoint(breakpoint.address),
                    BreakpointKind::Hardware => interface.clear_hardware_breakpoint(breakpoint.address),
                })?;
                Ok(Response::Ok)
            }
            CommandPayload::SetProgramCounter { address } => {
                self.with_hardware(|interface, _| interface.set_program_counter(address))?;
                Ok(Response::Ok)
            }
            CommandPayload::GetProgramCounter => {
                let program_counter = self.with_hardware(|interface, _| interface.program_counter())?;
                Ok(Response::ProgramCounter(program_counter))
            }
            CommandPayload::GetStackPointer => {
                let stack_pointer = self.with_hardware(|interface, target| target.stack_pointer(interface))?;
                Ok(Response::StackPointer(stack_pointer))
            }
            CommandPayload::GetTargetPinStates => {
                let states = self.with_hardware(|interface, target| target.pin_states(interface))?;
                Ok(Response::PinStates(states))
            }
            CommandPayload::SetTargetPinState { pin_number, state } => {
                self.with_hardware(|interface, target| target.set_pin_state(interface, pin_number, state))?;
                Ok(Response::Ok)
            }
            CommandPayload::EnableProgrammingMode => {
                if self.programming_mode_enabled() {
                    return Ok(Response::Ok);
                }
                self.with_hardware(|interface, target| target.enable_programming_mode(interface))?;
                self.events.publish(EventPayload::ProgrammingModeEnabled);
                Ok(Response::Ok)
            }
            CommandPayload::DisableProgrammingMode => {
                if !self.programming_mode_enabled() {
                    return Ok(Response::Ok);
                }
                self.with_hardware(|interface, target| target.disable_programming_mode(interface))?;
                self.last_target_state = TargetState::Stopped;
                self.events.publish(EventPayload::ProgrammingModeDisabled);
                Ok(Response::Ok)
            }
        }
    }

    fn stop_target_execution(&mut self) -> CommandResult {
        let last_state = self.last_target_state;
        let program_counter = self.with_hardware(|interface, _| {
            if last_state != TargetState::Stopped {
                interface.stop()?;
            }
            interface.program_counter()
        })?;

        self.last_target_state = TargetState::Stopped;
        self.events.publish(EventPayload::TargetExecutionStopped {
            program_counter,
            break_cause: TargetBreakCause::Unknown,
        });
        Ok(Response::Ok)
    }

    fn write_target_memory(
        &mut self,
        memory_type: TargetMemoryType,
        start_address: u32,
        buffer: &[u8],
    ) -> CommandResult {
        if buffer.is_empty() {
            return Ok(Response::Ok);
        }

        let program_memory_type =
            self.with_hardware(|_, target| Ok(target.descriptor().program_memory_type))?;
        if memory_type == program_memory_type && !self.programming_mode_enabled() {
            return Err(CommandError::ProgrammingModeRequired);
        }

        self.with_hardware(|interface, _| interface.write_memory(memory_type, start_address, buffer))?;
        self.events.publish(EventPayload::MemoryWrittenToTarget {
            memory_type,
            start_address,
            size: buffer.len(),
        });

        if memory_type == program_memory_type
            && self.events.is_kind_listened_for(EventKind::RegistersWrittenToTarget)
        {
            let registers = self
                .register_index
                .registers_in_buffer(memory_type, start_address, buffer);
            if !registers.is_empty() {
                self.events
                    .publish(EventPayload::RegistersWrittenToTarget { registers });
            }
        }

        Ok(Response::Ok)
    }
}

/// Activate the target behind `tool`, resolve the connected part and set it running.
fn connect_target(
    tool: &mut dyn DebugTool,
    selector: &TargetSelector,
    interface: crate::target::PhysicalInterface,
) -> Result<Avr8Target, TargetControllerError> {
    let avr8 = tool
        .avr8_interface()
        .ok_or_else(|| TargetError::operation("debug tool has no AVR8 interface"))?;

    avr8.configure(interface)?;
    if let TargetSelector::Named(part) = selector {
        avr8.set_target_parameters(part)?;
    }
    avr8.activate()?;

    let signature = avr8.device_signature()?;
    let part = selector.resolve(signature)?;
    if matches!(selector, TargetSelector::Generic) {
        debug!("Promoting generic target to {}", part.name);
        avr8.set_target_parameters(part)?;
    }
    if !part.interfaces.contains(&interface) {
        warn!("{} does not list {interface:?} as a supported interface", part.name);
    }

    // The target runs freely until a debug client stops it.
    if avr8.state()? != TargetState::Running {
        avr8.run()?;
    }

    Ok(Avr8Target::new(part, interface))
}

/// Read `size` bytes from `start_address`, skipping `excluded` ranges.
///
/// Excluded bytes are returned as zero.
fn read_memory_excluding(
    interface: &mut dyn Avr8DebugInterface,
    memory_type: TargetMemoryType,
    start_address: u32,
    size: u32,
    excluded: &[TargetMemoryAddressRange],
) -> Result<Vec<u8>, TargetError> {
    if size == 0 {
        return Ok(Vec::new());
    }
    if excluded.is_empty() {
        return interface.read_memory(memory_type, start_address, size);
    }

    let requested = TargetMemoryAddressRange::from_start_and_size(start_address, size);
    let mut exclusions: Vec<_> = excluded
        .iter()
        .filter(|range| range.intersects(&requested))
        .copied()
        .collect();
    exclusions.sort_by_key(|range| range.start);

    let mut buffer = vec![0u8; size as usize];
    let mut cursor = Some(requested.start);

    for exclusion in exclusions {
        let Some(segment_start) = cursor else {
            break;
        };
        if exclusion.start > segment_start {
            read_segment(interface, memory_type, &mut buffer, requested.start, segment_start, exclusion.start - 1)?;
        }
        cursor = exclusion.end.checked_add(1).map(|next| next.max(segment_start));
    }

    if let Some(segment_start) = cursor {
        if segment_start <= requested.end {
            read_segment(interface, memory_type, &mut buffer, requested.start, segment_start, requested.end)?;
        }
    }

    Ok(buffer)
}

fn read_segment(
    interface: &mut dyn Avr8DebugInterface,
    memory_type: TargetMemoryType,
    buffer: &mut [u8],
    buffer_start: u32,
    start: u32,
    end: u32,
) -> Result<(), TargetError> {
    let data = interface.read_memory(memory_type, start, end - start + 1)?;
    let offset = (start - buffer_start) as usize;
    let target = buffer
        .get_mut(offset..offset + data.len())
        .ok_or_else(|| TargetError::operation("memory read returned more data than requested"))?;
    target.copy_from_slice(&data);
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::tools::{SimulatedTool, SimulatorControl};
    use std::time::Duration;

    const TIMEOUT: Duration = Duration::from_secs(5);

    fn simulator_factory(control: SimulatorControl) -> ToolFactory {
        Box::new(move |_name| Ok(Box::new(SimulatedTool::new(control.clone())) as Box<dyn DebugTool>))
    }

    fn spawn_simulated(control: &SimulatorControl) -> (ControllerHandle, JoinHandle<()>, Arc<EventManager>) {
        let events = Arc::new(EventManager::new());
        let config = EnvironmentConfig::new("simulator", "atmega328p");
        let (handle, thread) =
            TargetController::with_tool_factory(config, events.clone(), simulator_factory(control.clone()))
                .with_poll_interval(Duration::from_millis(5))
                .spawn()
                .unwrap();
        (handle, thread, events)
    }

    fn shutdown(handle: &ControllerHandle, thread: JoinHandle<()>) {
        handle.execute(CommandPayload::Shutdown, TIMEOUT);
        thread.join().unwrap();
    }

    #[test]
    fn test_startup_acquires_and_runs_target() {
        let control = SimulatorControl::default();
        let (handle, thread, _events) = spawn_simulated(&control);

        assert_eq!(handle.thread_state(), ControllerThreadState::Ready);
        assert!(control.is_activated());
        assert_eq!(control.state(), TargetState::Running);
        assert_eq!(
            handle.execute(CommandPayload::GetTargetControllerState, TIMEOUT),
            Some(Ok(Response::TargetControllerState(TargetControllerState::Active)))
        );

        shutdown(&handle, thread);
        assert_eq!(handle.thread_state(), ControllerThreadState::Stopped);
        assert!(!control.is_session_open());
    }

    #[test]
    fn test_unknown_target_is_fatal_at_startup() {
        let events = Arc::new(EventManager::new());
        let config = EnvironmentConfig::new("simulator", "atmega9999");
        let result = TargetController::with_tool_factory(
            config,
            events,
            simulator_factory(SimulatorControl::default()),
        )
        .spawn();

        assert!(matches!(
            result,
            Err(TargetControllerError::Config(ConfigError::UnknownTarget(_)))
        ));
    }

    #[test]
    fn test_commands_requiring_stopped_target_are_rejected() {
        let control = SimulatorControl::default();
        let (handle, thread, _events) = spawn_simulated(&control);

        assert_eq!(
            handle.execute(CommandPayload::GetProgramCounter, TIMEOUT),
            Some(Err(CommandError::TargetNotStopped))
        );

        assert_eq!(
            handle.execute(CommandPayload::StopTargetExecution, TIMEOUT),
            Some(Ok(Response::Ok))
        );
        assert!(matches!(
            handle.execute(CommandPayload::GetProgramCounter, TIMEOUT),
            Some(Ok(Response::ProgramCounter(_)))
        ));

        shutdown(&handle, thread);
    }

    #[test]
    fn test_suspended_controller_only_serves_lifecycle_commands() {
        let control = SimulatorControl::default();
        let (handle, thread, _events) = spawn_simulated(&control);

        assert_eq!(handle.execute(CommandPayload::Suspend, TIMEOUT), Some(Ok(Response::Ok)));
        assert!(!control.is_session_open());
        assert_eq!(
            handle.execute(CommandPayload::GetTargetState, TIMEOUT),
            Some(Err(CommandError::NoHandler))
        );

        assert_eq!(handle.execute(CommandPayload::Resume, TIMEOUT), Some(Ok(Response::Ok)));
        assert!(matches!(
            handle.execute(CommandPayload::GetTargetState, TIMEOUT),
            Some(Ok(Response::TargetState(_)))
        ));

        shutdown(&handle, thread);
    }

    #[test]
    fn test_read_memory_with_exclusions() {
        let control = SimulatorControl::default();
        control.load(TargetMemoryType::Ram, 0x100, &[1, 2, 3, 4, 5, 6, 7, 8]);
        let (handle, thread, _events) = spawn_simulated(&control);
        handle.execute(CommandPayload::StopTargetExecution, TIMEOUT);

        let result = handle.execute(
            CommandPayload::ReadTargetMemory {
                memory_type: TargetMemoryType::Ram,
                start_address: 0x100,
                size: 8,
                excluded_ranges: vec![
                    TargetMemoryAddressRange::new(0x106, 0x200),
                    TargetMemoryAddressRange::new(0x102, 0x103),
                ],
            },
            TIMEOUT,
        );
        assert_eq!(result, Some(Ok(Response::Memory(vec![1, 2, 0, 0, 5, 6, 0, 0]))));

        shutdown(&handle, thread);
    }

    #[test]
    fn test_shutdown_event_stops_thread() {
        let control = SimulatorControl::default();
        let (handle, thread, events) = spawn_simulated(&control);

        events.publish(EventPayload::ShutdownTargetController);
        thread.join().unwrap();
        assert_eq!(handle.thread_state(), ControllerThreadState::Stopped);
    }
}
