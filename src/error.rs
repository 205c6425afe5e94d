//! Error types for worker channel operations.

use std::fmt;
use std::io;

use thiserror::Error;

use crate::config::SettingsError;
use crate::protocol::ActionId;

/// Result type for worker channel operations.
pub type WorkerResult<T> = Result<T, WorkerError>;

/// Why a worker channel was torn down.
///
/// Delivered inside [`WorkerError::ChannelClosed`] to every request that was
/// outstanding at teardown time, so callers can tell "this action failed"
/// from "the worker died".
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TeardownReason {
    /// The worker process exited (or closed its end of the channel).
    /// `status` is the exit code when the process monitor observed it.
    WorkerExited { status: Option<i32> },
    /// An I/O failure on the channel.
    Transport(String),
    /// The worker violated the protocol (unknown action id, malformed
    /// frame, out-of-place handshake).
    Protocol(String),
    /// The channel was closed locally.
    Shutdown,
}

impl fmt::Display for TeardownReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::WorkerExited { status: Some(code) } => {
                write!(f, "worker exited with status {code}")
            }
            Self::WorkerExited { status: None } => write!(f, "worker exited"),
            Self::Transport(msg) => write!(f, "transport failure: {msg}"),
            Self::Protocol(msg) => write!(f, "protocol violation: {msg}"),
            Self::Shutdown => write!(f, "channel shut down"),
        }
    }
}

/// Errors that can occur while executing commands on a worker.
#[derive(Error, Debug)]
pub enum WorkerError {
    /// Failed to spawn the worker process.
    #[error("failed to spawn worker process: {0}")]
    SpawnFailed(#[source] io::Error),

    /// Failed to write a frame to the worker.
    #[error("failed to write to worker: {0}")]
    WriteFailed(#[source] io::Error),

    /// Failed to read a frame from the worker.
    #[error("failed to read from worker: {0}")]
    ReadFailed(#[source] io::Error),

    /// Failed to serialize a request frame.
    #[error("failed to serialize request: {0}")]
    SerializeFailed(#[source] serde_json::Error),

    /// The worker sent a line that does not parse as a frame. Fatal to the
    /// channel: frame boundaries can no longer be trusted.
    #[error("malformed frame from worker: {0}")]
    MalformedFrame(#[source] serde_json::Error),

    /// The caller submitted an action id that is still outstanding.
    #[error("action id {0} is already outstanding")]
    DuplicateActionId(ActionId),

    /// The worker answered an action id with no pending request.
    #[error("no pending request for action id {0}")]
    UnknownActionId(ActionId),

    /// The channel was torn down; delivered to every request outstanding at
    /// that point and to any submission attempted afterwards.
    #[error("worker channel closed: {reason}")]
    ChannelClosed { reason: TeardownReason },

    /// The completion was discarded before a result or a teardown verdict
    /// arrived (the connection owning it was dropped).
    #[error("completion discarded before a result arrived")]
    Cancelled,

    /// The worker did not complete the readiness handshake.
    #[error("worker handshake failed: {0}")]
    HandshakeFailed(String),

    /// Invalid worker configuration.
    #[error("worker configuration error: {0}")]
    Config(#[from] SettingsError),
}

impl WorkerError {
    /// Build the uniform teardown error for a given reason.
    pub(crate) fn channel_closed(reason: &TeardownReason) -> Self {
        Self::ChannelClosed {
            reason: reason.clone(),
        }
    }

    /// Check if this error means the channel is gone (as opposed to a
    /// per-action or caller-contract failure).
    pub fn is_channel_closed(&self) -> bool {
        matches!(self, Self::ChannelClosed { .. })
    }
}
