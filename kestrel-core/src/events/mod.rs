//! Event bus.
//!
//! Typed publish/subscribe between threads. Publishers hand an [`Event`] to the
//! [`EventManager`], which queues a shared reference on every
//! [`EventListener`] subscribed to the event's kind. Listeners either block on
//! [`EventListener::wait_for`] or run callbacks from their owner thread with
//! [`EventListener::dispatch_current_events`].

mod listener;
mod manager;
mod notifier;

pub use listener::{EventCallback, EventListener};
pub use manager::EventManager;
pub use notifier::Notifier;

use crate::controller::{ControllerThreadState, TargetControllerState};
use crate::target::{TargetBreakCause, TargetMemoryType, TargetRegister};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::SystemTime;

static NEXT_EVENT_ID: AtomicU64 = AtomicU64::new(1);

/// Tag identifying the kind of an event.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum EventKind {
    DebugSessionStarted,
    DebugSessionFinished,
    TargetControllerStateChanged,
    TargetControllerThreadStateChanged,
    ShutdownTargetController,
    TargetExecutionStopped,
    TargetExecutionResumed,
    TargetReset,
    RegistersWrittenToTarget,
    MemoryWrittenToTarget,
    ProgrammingModeEnabled,
    ProgrammingModeDisabled,
}

/// Event data, one variant per [`EventKind`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventPayload {
    DebugSessionStarted,
    DebugSessionFinished,
    TargetControllerStateChanged {
        state: TargetControllerState,
    },
    TargetControllerThreadStateChanged {
        state: ControllerThreadState,
    },
    ShutdownTargetController,
    TargetExecutionStopped {
        program_counter: u32,
        break_cause: TargetBreakCause,
    },
    TargetExecutionResumed,
    TargetReset,
    RegistersWrittenToTarget {
        registers: Vec<TargetRegister>,
    },
    MemoryWrittenToTarget {
        memory_type: TargetMemoryType,
        start_address: u32,
        size: usize,
    },
    ProgrammingModeEnabled,
    ProgrammingModeDisabled,
}

impl EventPayload {
    pub const fn kind(&self) -> EventKind {
        match self {
            Self::DebugSessionStarted => EventKind::DebugSessionStarted,
            Self::DebugSessionFinished => EventKind::DebugSessionFinished,
            Self::TargetControllerStateChanged { .. } => EventKind::TargetControllerStateChanged,
            Self::TargetControllerThreadStateChanged { .. } => {
                EventKind::TargetControllerThreadStateChanged
            }
            Self::ShutdownTargetController => EventKind::ShutdownTargetController,
            Self::TargetExecutionStopped { .. } => EventKind::TargetExecutionStopped,
            Self::TargetExecutionResumed => EventKind::TargetExecutionResumed,
            Self::TargetReset => EventKind::TargetReset,
            Self::RegistersWrittenToTarget { .. } => EventKind::RegistersWrittenToTarget,
            Self::MemoryWrittenToTarget { .. } => EventKind::MemoryWrittenToTarget,
            Self::ProgrammingModeEnabled => EventKind::ProgrammingModeEnabled,
            Self::ProgrammingModeDisabled => EventKind::ProgrammingModeDisabled,
        }
    }
}

/// An immutable notification. Shared between listeners as [`SharedEvent`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Event {
    pub id: u64,
    pub correlation_id: Option<u64>,
    pub created: SystemTime,
    pub payload: EventPayload,
}

pub type SharedEvent = Arc<Event>;

impl Event {
    pub fn new(payload: EventPayload) -> Self {
        Self {
            id: NEXT_EVENT_ID.fetch_add(1, Ordering::Relaxed),
            correlation_id: None,
            created: SystemTime::now(),
            payload,
        }
    }

    #[must_use]
    pub fn with_correlation_id(mut self, correlation_id: u64) -> Self {
        self.correlation_id = Some(correlation_id);
        self
    }

    pub const fn kind(&self) -> EventKind {
        self.payload.kind()
    }
}

impl From<EventPayload> for Event {
    fn from(payload: EventPayload) -> Self {
        Self::new(payload)
    }
}
