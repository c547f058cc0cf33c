//! Shared command queue and response mailbox.

use super::commands::{Command, CommandPayload};
use super::responses::CommandResult;
use super::ControllerThreadState;
use crate::events::Notifier;
use std::collections::{HashMap, HashSet, VecDeque};
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::time::{Duration, Instant};

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

/// Responses awaiting collection, and ids whose waiter timed out.
#[derive(Debug, Default)]
struct Mailbox {
    ready: HashMap<u64, CommandResult>,
    abandoned: HashSet<u64>,
}

#[derive(Debug)]
pub(super) struct Shared {
    queue: Mutex<VecDeque<Command>>,
    responses: Mutex<Mailbox>,
    response_ready: Condvar,
    pub(super) notifier: Notifier,
    next_command_id: AtomicU64,
    thread_state: Mutex<ControllerThreadState>,
}

impl Shared {
    pub(super) fn new() -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            responses: Mutex::new(Mailbox::default()),
            response_ready: Condvar::new(),
            notifier: Notifier::new(),
            next_command_id: AtomicU64::new(1),
            thread_state: Mutex::new(ControllerThreadState::Starting),
        }
    }

    /// Take every queued command, leaving the queue empty.
    pub(super) fn take_commands(&self) -> VecDeque<Command> {
        std::mem::take(&mut *lock(&self.queue))
    }

    /// Deliver a response. Dropped if its waiter already gave up.
    pub(super) fn respond(&self, command_id: u64, result: CommandResult) {
        let mut mailbox = lock(&self.responses);
        if mailbox.abandoned.remove(&command_id) {
            return;
        }
        mailbox.ready.insert(command_id, result);
        drop(mailbox);
        self.response_ready.notify_all();
    }

    fn pending_response_count(&self) -> usize {
        let mailbox = lock(&self.responses);
        mailbox.ready.len() + mailbox.abandoned.len()
    }

    pub(super) fn set_thread_state(&self, state: ControllerThreadState) {
        *lock(&self.thread_state) = state;
    }
}

/// Cloneable handle for submitting commands to the controller thread.
#[derive(Debug, Clone)]
pub struct ControllerHandle {
    shared: Arc<Shared>,
}

impl ControllerHandle {
    pub(super) const fn new(shared: Arc<Shared>) -> Self {
        Self { shared }
    }

    /// Queue a command and wake the controller. Returns the command id.
    pub fn submit(&self, payload: CommandPayload) -> u64 {
        let id = self.shared.next_command_id.fetch_add(1, Ordering::Relaxed);
        lock(&self.shared.queue).push_back(Command { id, payload });
        self.shared.notifier.notify();
        id
    }

    /// Block until the response for `command_id` is available.
    ///
    /// Returns `None` on timeout. The command is then abandoned and a response
    /// arriving later is discarded.
    pub fn wait_for_response(&self, command_id: u64, timeout: Duration) -> Option<CommandResult> {
        let deadline = Instant::now() + timeout;
        let mut responses = lock(&self.shared.responses);

        loop {
            if let Some(result) = responses.ready.remove(&command_id) {
                return Some(result);
            }

            let now = Instant::now();
            if now >= deadline {
                responses.abandoned.insert(command_id);
                return None;
            }
            responses = self
                .shared
                .response_ready
                .wait_timeout(responses, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Submit a command and wait for its response.
    pub fn execute(&self, payload: CommandPayload, timeout: Duration) -> Option<CommandResult> {
        let id = self.submit(payload);
        self.wait_for_response(id, timeout)
    }

    pub fn thread_state(&self) -> ControllerThreadState {
        *lock(&self.shared.thread_state)
    }

    pub fn queued_command_count(&self) -> usize {
        lock(&self.shared.queue).len()
    }

    /// Responses held in the mailbox, plus abandoned ids not yet answered.
    pub fn pending_response_count(&self) -> usize {
        self.shared.pending_response_count()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::controller::Response;
    use std::thread;

    #[test]
    fn test_command_ids_are_unique_and_ordered() {
        let handle = ControllerHandle::new(Arc::new(Shared::new()));
        let first = handle.submit(CommandPayload::GetTargetState);
        let second = handle.submit(CommandPayload::GetTargetState);

        assert!(second > first);
        assert_eq!(handle.queued_command_count(), 2);

        let commands: Vec<u64> = handle.shared.take_commands().iter().map(|c| c.id).collect();
        assert_eq!(commands, vec![first, second]);
        assert_eq!(handle.queued_command_count(), 0);
    }

    #[test]
    fn test_response_delivered_across_threads() {
        let shared = Arc::new(Shared::new());
        let handle = ControllerHandle::new(shared.clone());
        let id = handle.submit(CommandPayload::GetProgramCounter);

        let worker = thread::spawn(move || {
            for command in shared.take_commands() {
                shared.respond(command.id, Ok(Response::ProgramCounter(0x100)));
            }
        });

        let result = handle.wait_for_response(id, Duration::from_secs(5));
        worker.join().unwrap();
        assert_eq!(result, Some(Ok(Response::ProgramCounter(0x100))));
    }

    #[test]
    fn test_wait_for_response_times_out() {
        let handle = ControllerHandle::new(Arc::new(Shared::new()));
        let id = handle.submit(CommandPayload::GetTargetState);
        assert_eq!(handle.wait_for_response(id, Duration::from_millis(10)), None);
    }

    #[test]
    fn test_late_responses_to_abandoned_commands_are_dropped() {
        let shared = Arc::new(Shared::new());
        let handle = ControllerHandle::new(shared.clone());

        for _ in 0..100 {
            assert_eq!(handle.execute(CommandPayload::GetProgramCounter, Duration::ZERO), None);
            for command in shared.take_commands() {
                shared.respond(command.id, Ok(Response::ProgramCounter(0x100)));
            }
        }
        assert_eq!(handle.pending_response_count(), 0);

        // A command still being waited on is delivered as usual.
        let id = handle.submit(CommandPayload::GetProgramCounter);
        for command in shared.take_commands() {
            shared.respond(command.id, Ok(Response::ProgramCounter(0x200)));
        }
        assert_eq!(
            handle.wait_for_response(id, Duration::from_secs(5)),
            Some(Ok(Response::ProgramCounter(0x200)))
        );
        assert_eq!(handle.pending_response_count(), 0);
    }
}
