//! # Drover
//!
//! Persistent worker-tool execution for build actions.
//!
//! Drover offloads units of work ("actions") to long-lived external worker
//! processes instead of spawning a fresh process per action. One worker
//! accepts many action-execution requests over its lifetime; results come
//! back in any order and are correlated to the originating request by the
//! action id embedded in each frame.
//!
//! ## Architecture
//!
//! ```text
//! ┌─────────────────────────────────────────────────────────────────┐
//! │                   Build Executor (Rust + Tokio)                 │
//! │  ┌───────────────────────────────────────────────────────────┐  │
//! │  │                 WorkerTool / WorkerConnection             │  │
//! │  │  - Spawns the worker as a child process                   │  │
//! │  │  - NDJSON protocol over stdin/stdout                      │  │
//! │  │  - Action ids correlate pipelined requests to results     │  │
//! │  └───────────────────────────────────────────────────────────┘  │
//! │                              │                                  │
//! │               stdin (NDJSON) │ stdout (NDJSON)                  │
//! │                              ▼                                  │
//! └─────────────────────────────────────────────────────────────────┘
//!                                │
//!                                ▼
//! ┌─────────────────────────────────────────────────────────────────┐
//! │             Worker Tool (Long-Running Child Process)            │
//! └─────────────────────────────────────────────────────────────────┘
//! ```
//!
//! Internally, a submission registers a pending completion with the
//! [`ResultCorrelator`], writes one request frame, and
//! returns a handle; a single dedicated reader task demultiplexes result
//! frames back onto the pending completions. If the channel breaks (the
//! worker crashes, the transport fails, the worker violates the protocol),
//! every outstanding completion fails with the teardown reason instead of
//! hanging.
//!
//! ## Example
//!
//! ```ignore
//! use drover::{ActionId, CommandMessage, Settings, WorkerTool, WorkerToolExecutor};
//!
//! let settings = Settings::load()?;
//! let worker = WorkerTool::spawn(&settings, "javac").await?;
//!
//! // Blocking mode: submit one action, wait for its result.
//! let result = worker
//!     .execute_command(ActionId::from("cell//lib:compile"), command)
//!     .await?;
//!
//! // Pipelined mode: submit a batch, collect handles, await later.
//! let handles = worker
//!     .execute_pipelining_command(action_ids, command)
//!     .await?;
//! for handle in handles {
//!     let result = handle.wait().await?;
//! }
//!
//! worker.shutdown().await?;
//! ```

pub mod config;
mod correlator;
mod driver;
pub mod error;
mod executor;
mod lifecycle;
pub mod protocol;
pub mod transport;

pub use config::{Settings, SettingsError, ToolSettings};
pub use correlator::{ResultCorrelator, ResultHandle};
pub use driver::ChannelState;
pub use error::{TeardownReason, WorkerError, WorkerResult};
pub use executor::{WorkerConnection, WorkerToolExecutor};
pub use lifecycle::{WorkerExit, WorkerTool};
pub use protocol::{ActionId, CommandMessage, ResultEvent, PROTOCOL_VERSION};
