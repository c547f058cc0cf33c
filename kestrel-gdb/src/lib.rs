//! Kestrel GDB - a Remote Serial Protocol server for avr-gdb.
//!
//! The server translates packets from the client into calls on the
//! [`kestrel_core::TargetControllerConsole`] and reports target stops back as
//! stop replies. Register numbering and address spaces follow avr-gdb.

pub mod avr;
pub mod commands;
pub mod connection;
pub mod features;
pub mod packet;
pub mod server;
pub mod session;

pub use packet::{PacketError, ResponsePacket};
pub use server::{GdbServer, SessionError};
pub use session::DebugSession;
