//! The debug server: accepts one client at a time and serves its packets.

use crate::avr::MissingRegister;
use crate::commands::{self, Outcome};
use crate::connection::{Connection, ConnectionError, Incoming};
use crate::packet::ResponsePacket;
use crate::session::DebugSession;
use kestrel_core::config::ServerConfig;
use kestrel_core::controller::ConsoleError;
use kestrel_core::{EventKind, EventListener, EventManager, EventPayload, TargetControllerConsole};
use log::{debug, error, info, warn};
use std::io;
use std::net::{SocketAddr, TcpListener, TcpStream};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::{Duration, Instant};
use thiserror::Error;

/// How long a new session waits for the target controller to come into service.
const CONTROLLER_WAIT_TIMEOUT: Duration = Duration::from_secs(10);
const CONTROLLER_POLL_INTERVAL: Duration = Duration::from_millis(50);

/// While the target runs, time spent on each side of the stop/interrupt poll.
const STOP_POLL_INTERVAL: Duration = Duration::from_millis(40);
const INTERRUPT_POLL_INTERVAL: Duration = Duration::from_millis(10);

#[derive(Debug, Error)]
pub enum SessionError {
    #[error("target controller did not come into service")]
    ControllerUnavailable,

    #[error(transparent)]
    Controller(#[from] ConsoleError),

    #[error(transparent)]
    Target(#[from] MissingRegister),

    #[error(transparent)]
    Connection(#[from] ConnectionError),
}

pub struct GdbServer {
    listener: TcpListener,
    console: TargetControllerConsole,
    events: Arc<EventManager>,
}

impl GdbServer {
    pub fn bind(
        config: &ServerConfig,
        console: TargetControllerConsole,
        events: Arc<EventManager>,
    ) -> io::Result<Self> {
        let listener = TcpListener::bind((config.host.as_str(), config.port))?;
        Ok(Self {
            listener,
            console,
            events,
        })
    }

    pub fn local_addr(&self) -> io::Result<SocketAddr> {
        self.listener.local_addr()
    }

    /// Serve clients, one after another, until accepting fails.
    pub fn serve(&self) -> io::Result<()> {
        loop {
            self.serve_one()?;
        }
    }

    /// Accept a single client and serve it until it goes away.
    pub fn serve_one(&self) -> io::Result<()> {
        let (stream, peer) = self.listener.accept()?;
        info!("Accepted GDB connection from {peer}");
        self.run_session(stream);
        info!("GDB session with {peer} ended");
        Ok(())
    }

    /// Run [`GdbServer::serve`] on a dedicated thread.
    pub fn spawn(self) -> io::Result<JoinHandle<()>> {
        thread::Builder::new()
            .name("DebugServer".to_string())
            .spawn(move || {
                if let Err(e) = self.serve() {
                    error!("Debug server stopped: {e}");
                }
            })
    }

    fn run_session(&self, stream: TcpStream) {
        let listener = Arc::new(EventListener::new("DebugServerEventListener"));
        listener.register_kind(EventKind::TargetExecutionStopped);
        self.events.register_listener(Arc::clone(&listener));
        self.events.publish(EventPayload::DebugSessionStarted);

        let result = Connection::new(stream)
            .map_err(|e| SessionError::Connection(e.into()))
            .and_then(|mut connection| {
                let session = self.start_session(&listener)?;
                self.serve_packets(&mut connection, &listener, &session)
            });

        match result {
            Ok(()) | Err(SessionError::Connection(ConnectionError::Closed)) => {}
            Err(e) => error!("GDB session failed: {e}"),
        }

        self.events.deregister_listener(listener.id());
        self.events.publish(EventPayload::DebugSessionFinished);
    }

    fn start_session(&self, listener: &EventListener) -> Result<DebugSession, SessionError> {
        self.wait_for_controller(listener)?;

        let target = self.console.target_descriptor()?;
        info!("Debugging {} (signature 0x{})", target.name, target.signature);
        self.console.stop_target_execution()?;
        Ok(DebugSession::new(target)?)
    }

    /// The controller resumes asynchronously once it sees the session start.
    fn wait_for_controller(&self, listener: &EventListener) -> Result<(), SessionError> {
        let deadline = Instant::now() + CONTROLLER_WAIT_TIMEOUT;
        while !self.console.is_target_controller_in_service() {
            let remaining = deadline.saturating_duration_since(Instant::now());
            if remaining.is_zero() {
                return Err(SessionError::ControllerUnavailable);
            }
            listener.wait_for(
                &[EventKind::TargetControllerStateChanged],
                Some(remaining.min(CONTROLLER_POLL_INTERVAL)),
                None,
            );
        }
        Ok(())
    }

    fn serve_packets(
        &self,
        connection: &mut Connection,
        listener: &EventListener,
        session: &DebugSession,
    ) -> Result<(), SessionError> {
        loop {
            let data = match connection.read()? {
                Incoming::Packet(data) => data,
                Incoming::Interrupt => {
                    debug!("Ignoring interrupt, target is not running");
                    continue;
                }
            };

            // Stops reported before this packet are of no interest any more.
            listener.clear_events(EventKind::TargetExecutionStopped);

            let outcome = match commands::parse(&data) {
                Ok(Some(command)) => {
                    debug!("Handling {command:?}");
                    command.handle(session, &self.console).unwrap_or_else(|e| {
                        warn!("Command failed: {e}");
                        Outcome::Reply(ResponsePacket::error())
                    })
                }
                Ok(None) => {
                    debug!("Unsupported packet: {}", String::from_utf8_lossy(&data));
                    Outcome::Reply(ResponsePacket::empty())
                }
                Err(e) => {
                    debug!("Malformed packet: {e}");
                    Outcome::Reply(ResponsePacket::error())
                }
            };

            match outcome {
                Outcome::Reply(response) => connection.send(&response)?,
                Outcome::AwaitStop => {
                    let response = self.await_stop(connection, listener)?;
                    connection.send(&response)?;
                }
                Outcome::Detach => {
                    info!("Client detached");
                    connection.send(&ResponsePacket::ok())?;
                    return Ok(());
                }
                Outcome::Kill => {
                    info!("Client killed the session");
                    return Ok(());
                }
            }
        }
    }

    /// Wait for the target to stop, forwarding client interrupts.
    fn await_stop(
        &self,
        connection: &mut Connection,
        listener: &EventListener,
    ) -> Result<ResponsePacket, SessionError> {
        loop {
            if let Some(event) = listener.wait_for(
                &[EventKind::TargetExecutionStopped],
                Some(STOP_POLL_INTERVAL),
                None,
            ) {
                if let EventPayload::TargetExecutionStopped {
                    program_counter,
                    break_cause,
                } = &event.payload
                {
                    debug!("Target stopped at 0x{program_counter:x} ({break_cause:?})");
                }
                return Ok(ResponsePacket::text("S05"));
            }

            if connection.poll_interrupt(INTERRUPT_POLL_INTERVAL)? {
                info!("Interrupting target on client request");
                if let Err(e) = self.console.stop_target_execution() {
                    warn!("Failed to stop target: {e}");
                    return Ok(ResponsePacket::error());
                }
            } else if !self.console.is_target_controller_in_service() {
                warn!("Target controller went out of service while the target was running");
                return Ok(ResponsePacket::error());
            }
        }
    }
}
