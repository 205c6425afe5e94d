//! Wire protocol types for the worker channel.
//!
//! The channel carries NDJSON frames: one JSON object per line, one frame
//! per request or result. Requests and results are paired by the action id
//! embedded in each frame; the transport itself assumes no ordering between
//! results for different actions.

use std::fmt;
use std::path::PathBuf;

use serde::{Deserialize, Serialize};

use crate::error::{WorkerError, WorkerResult};

/// Protocol version a worker must announce in its hello frame.
pub const PROTOCOL_VERSION: u32 = 2;

/// Caller-assigned identifier for one unit of work.
///
/// Must be unique among the requests currently outstanding on one channel;
/// may be reused once the previous use has resolved.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ActionId(String);

impl ActionId {
    pub fn new(id: impl Into<String>) -> Self {
        Self(id.into())
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for ActionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ActionId {
    fn from(id: &str) -> Self {
        Self(id.to_string())
    }
}

impl From<String> for ActionId {
    fn from(id: String) -> Self {
        Self(id)
    }
}

/// Opaque command payload forwarded to the worker.
///
/// The executor never interprets the contents; rule-specific layers build
/// the payload and the worker decodes it.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct CommandMessage(serde_json::Value);

impl CommandMessage {
    /// Serialize an arbitrary payload into an opaque command message.
    pub fn new<T: Serialize>(payload: &T) -> WorkerResult<Self> {
        let value = serde_json::to_value(payload).map_err(WorkerError::SerializeFailed)?;
        Ok(Self(value))
    }

    pub fn from_value(value: serde_json::Value) -> Self {
        Self(value)
    }

    pub fn as_value(&self) -> &serde_json::Value {
        &self.0
    }
}

/// Outcome of one executed action, owned by the caller once delivered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ResultEvent {
    /// The action this result answers.
    pub action_id: ActionId,
    /// Exit status reported by the worker for this action.
    pub exit_code: i32,
    /// Worker-reported diagnostics (compiler output, tool stderr).
    #[serde(default)]
    pub diagnostics: String,
    /// Paths of outputs the action produced.
    #[serde(default)]
    pub outputs: Vec<PathBuf>,
}

impl ResultEvent {
    pub fn is_success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Frames written to the worker. One `execute` frame per action.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum RequestFrame {
    /// Run one action.
    Execute {
        action_id: ActionId,
        command: CommandMessage,
    },
    /// Ask the worker to finish in-flight work and exit.
    Shutdown,
}

/// Frames read from the worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ResponseFrame {
    /// Readiness handshake; must be the first frame on the channel and
    /// carry [`PROTOCOL_VERSION`].
    Hello { version: u32 },
    /// Result of one executed action.
    Result(ResultEvent),
}
