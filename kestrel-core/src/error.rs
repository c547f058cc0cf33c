//! Error types shared across the debugger core.
//!
//! Each boundary gets its own error type: configuration problems are fatal at
//! start-up, device failures suspend the controller, and command errors travel
//! back to the caller inside an error response.

use std::path::PathBuf;
use thiserror::Error;

/// Invalid or unsupported environment configuration.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("unknown debug tool \"{0}\"")]
    UnknownTool(String),

    #[error("unknown target \"{0}\"")]
    UnknownTarget(String),

    #[error("debug tool \"{tool}\" does not support target \"{target}\"")]
    UnsupportedPairing { tool: String, target: String },

    #[error("target signature mismatch: configured {expected}, connected device reports {found}")]
    SignatureMismatch { expected: String, found: String },

    #[error("failed to read configuration file {path}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("invalid configuration")]
    Parse(#[from] serde_json::Error),
}

/// Failure to communicate with the debug tool.
#[derive(Debug, Error)]
pub enum DeviceFailure {
    #[error("USB transport error: {0}")]
    Transport(String),

    #[error("debug tool not found (USB {vendor_id:04x}:{product_id:04x})")]
    NotFound { vendor_id: u16, product_id: u16 },

    #[error("timed out waiting for the debug tool to respond")]
    Timeout,

    #[error("malformed response from debug tool: {0}")]
    MalformedResponse(String),

    #[error("{handler} command 0x{command:02x} failed (error code 0x{code:02x})")]
    CommandFailed {
        handler: &'static str,
        command: u8,
        code: u8,
    },

    #[error("response sequence id mismatch (expected {expected}, got {actual})")]
    SequenceMismatch { expected: u16, actual: u16 },

    #[error("debug tool session is not open")]
    NotInitialised,
}

/// Failure while operating on the target.
#[derive(Debug, Error)]
pub enum TargetError {
    #[error(transparent)]
    Device(#[from] DeviceFailure),

    #[error("{0}")]
    Operation(String),
}

impl TargetError {
    /// Shorthand for a rejected target operation.
    pub fn operation(message: impl Into<String>) -> Self {
        Self::Operation(message.into())
    }
}

/// Error carried back to the issuer of a controller command.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum CommandError {
    #[error("no handler registered for this command")]
    NoHandler,

    #[error("illegal target state: command requires target to be stopped")]
    TargetNotStopped,

    #[error("command cannot be serviced whilst the target is in programming mode")]
    ProgrammingModeEnabled,

    #[error("cannot write to program memory: programming mode not enabled")]
    ProgrammingModeRequired,

    #[error("{0}")]
    Target(String),

    #[error("device failure: {0}")]
    Device(String),
}

impl From<TargetError> for CommandError {
    fn from(error: TargetError) -> Self {
        match error {
            TargetError::Device(failure) => Self::Device(failure.to_string()),
            TargetError::Operation(message) => Self::Target(message),
        }
    }
}

/// Failure to bring the target controller up.
#[derive(Debug, Error)]
pub enum TargetControllerError {
    #[error(transparent)]
    Config(#[from] ConfigError),

    #[error(transparent)]
    Target(#[from] TargetError),

    #[error("failed to spawn the target controller thread")]
    Spawn(#[source] std::io::Error),

    #[error("target controller thread exited during start-up")]
    ThreadExited,
}

impl From<DeviceFailure> for TargetControllerError {
    fn from(failure: DeviceFailure) -> Self {
        Self::Target(TargetError::Device(failure))
    }
}

impl From<TargetControllerError> for CommandError {
    fn from(error: TargetControllerError) -> Self {
        match error {
            TargetControllerError::Target(error) => error.into(),
            other => Self::Target(other.to_string()),
        }
    }
}
