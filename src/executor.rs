//! Submission surface for one worker channel.

use std::sync::Arc;

use async_trait::async_trait;
use tokio::sync::{watch, Mutex};
use tokio::task::JoinHandle;
use tracing::debug;

use crate::correlator::{ResultCorrelator, ResultHandle};
use crate::driver::{spawn_read_loop, ChannelCtl, ChannelState};
use crate::error::{TeardownReason, WorkerError, WorkerResult};
use crate::protocol::{ActionId, CommandMessage, RequestFrame, ResultEvent};
use crate::transport::{FrameReader, FrameWriter};

/// Two-mode execution surface of a worker tool.
///
/// `execute_command` suspends the caller until its result arrives;
/// `execute_pipelining_command` returns one handle per submitted action
/// without waiting for any of them. Mixing the two on one channel is
/// supported; both reduce to "register a pending completion, write a
/// request frame, return a handle".
#[async_trait]
pub trait WorkerToolExecutor: Send + Sync {
    /// Submit one action and wait until the worker reports its result.
    async fn execute_command(
        &self,
        action_id: ActionId,
        command: CommandMessage,
    ) -> WorkerResult<ResultEvent>;

    /// Submit a batch of actions and return immediately with one completion
    /// handle per action id, in the same order. Each handle resolves
    /// independently, in whatever order the worker finishes; one action's
    /// failure does not fail the others unless the whole channel is torn
    /// down. An empty batch is a no-op.
    async fn execute_pipelining_command(
        &self,
        action_ids: Vec<ActionId>,
        command: CommandMessage,
    ) -> WorkerResult<Vec<ResultHandle>>;
}

/// One established channel to a worker process.
///
/// Owns the write half behind a mutex (frame writes never interleave) and
/// the dedicated reader task that owns the read half. Submitters call
/// through `&self` from any task.
#[derive(Debug)]
pub struct WorkerConnection {
    writer: Mutex<FrameWriter>,
    correlator: Arc<ResultCorrelator>,
    ctl: Arc<ChannelCtl>,
    reader_task: JoinHandle<()>,
}

impl WorkerConnection {
    /// Take ownership of an established transport and start the read loop.
    pub fn connect(writer: FrameWriter, reader: FrameReader) -> Self {
        let correlator = Arc::new(ResultCorrelator::new());
        let ctl = Arc::new(ChannelCtl::new(correlator.clone()));
        let reader_task = spawn_read_loop(reader, correlator.clone(), ctl.clone());
        Self {
            writer: Mutex::new(writer),
            correlator,
            ctl,
            reader_task,
        }
    }

    /// Observe channel state transitions (Active, Draining, Closed).
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.ctl.subscribe()
    }

    pub fn is_open(&self) -> bool {
        self.ctl.current().is_active()
    }

    /// Number of requests currently awaiting results.
    pub async fn pending_requests(&self) -> usize {
        self.correlator.len().await
    }

    /// Tear the channel down locally, failing everything outstanding.
    pub async fn close(&self) {
        self.ctl.teardown(TeardownReason::Shutdown).await;
    }

    /// Wait until the channel is fully closed and return the reason.
    pub async fn closed(&self) -> TeardownReason {
        let mut rx = self.ctl.subscribe();
        let state = rx
            .wait_for(|state| matches!(state, ChannelState::Closed(_)))
            .await;
        match state {
            Ok(state) => state
                .teardown_reason()
                .cloned()
                .unwrap_or(TeardownReason::Shutdown),
            Err(_) => TeardownReason::Shutdown,
        }
    }

    pub(crate) async fn teardown(&self, reason: TeardownReason) {
        self.ctl.teardown(reason).await;
    }

    /// Best-effort shutdown request to the worker.
    pub(crate) async fn send_shutdown_frame(&self) -> WorkerResult<()> {
        self.send_frames(std::slice::from_ref(&RequestFrame::Shutdown))
            .await
    }

    fn closed_error(&self) -> WorkerError {
        let reason = self
            .ctl
            .current()
            .teardown_reason()
            .cloned()
            .unwrap_or(TeardownReason::Shutdown);
        WorkerError::ChannelClosed { reason }
    }

    /// Register one id, handling the race against a concurrent teardown: an
    /// entry inserted after the teardown sweep would otherwise pend forever.
    async fn register_checked(&self, action_id: &ActionId) -> WorkerResult<ResultHandle> {
        let handle = self.correlator.register(action_id).await?;
        if !self.is_open() {
            self.correlator.abandon(action_id).await;
            return Err(self.closed_error());
        }
        Ok(handle)
    }

    /// Write frames under a single writer-lock acquisition. A failed write
    /// leaves the stream unusable, so it tears the channel down.
    async fn send_frames(&self, frames: &[RequestFrame]) -> WorkerResult<()> {
        let mut writer = self.writer.lock().await;
        for frame in frames {
            if let Err(err) = writer.send(frame).await {
                drop(writer);
                self.ctl
                    .teardown(TeardownReason::Transport(err.to_string()))
                    .await;
                return Err(err);
            }
        }
        Ok(())
    }
}

impl Drop for WorkerConnection {
    fn drop(&mut self) {
        self.reader_task.abort();
    }
}

#[async_trait]
impl WorkerToolExecutor for WorkerConnection {
    async fn execute_command(
        &self,
        action_id: ActionId,
        command: CommandMessage,
    ) -> WorkerResult<ResultEvent> {
        let handle = self.register_checked(&action_id).await?;
        debug!(%action_id, "submitting action");
        let frame = RequestFrame::Execute { action_id, command };
        self.send_frames(std::slice::from_ref(&frame)).await?;
        handle.wait().await
    }

    async fn execute_pipelining_command(
        &self,
        action_ids: Vec<ActionId>,
        command: CommandMessage,
    ) -> WorkerResult<Vec<ResultHandle>> {
        if action_ids.is_empty() {
            return Ok(Vec::new());
        }

        let handles = self.correlator.register_batch(&action_ids).await?;
        if !self.is_open() {
            for action_id in &action_ids {
                self.correlator.abandon(action_id).await;
            }
            return Err(self.closed_error());
        }

        debug!(actions = action_ids.len(), "submitting pipelined batch");
        let frames: Vec<RequestFrame> = action_ids
            .into_iter()
            .map(|action_id| RequestFrame::Execute {
                action_id,
                command: command.clone(),
            })
            .collect();
        self.send_frames(&frames).await?;
        Ok(handles)
    }
}
