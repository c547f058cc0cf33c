//! Kestrel Core - AVR8 debugging over EDBG probes.
//!
//! This crate owns everything between a debug server and the USB probe: the
//! event bus, the target controller thread and its blocking facade, the
//! target model, and the CMSIS-DAP/EDBG wire protocol.

pub mod config;
pub mod controller;
pub mod error;
pub mod events;
pub mod probe;
pub mod target;
pub mod tools;

// Re-export commonly used types
pub use config::EnvironmentConfig;
pub use controller::{
    ControllerHandle, ControllerThreadState, TargetController, TargetControllerConsole, TargetControllerState,
};
pub use error::{CommandError, ConfigError, DeviceFailure, TargetControllerError, TargetError};
pub use events::{Event, EventKind, EventListener, EventManager, EventPayload, SharedEvent};
pub use target::{TargetDescriptor, TargetMemoryType, TargetState};
pub use tools::{create_tool, supported_tool_names, DebugTool};
