//! Correlation of action ids to pending completions.

use std::collections::HashMap;
use std::time::Instant;

use tokio::sync::{oneshot, Mutex};
use tracing::debug;

use crate::error::{TeardownReason, WorkerError, WorkerResult};
use crate::protocol::{ActionId, ResultEvent};

/// Completion handle for one submitted action.
///
/// Resolves exactly once: with the action's [`ResultEvent`], or with
/// [`WorkerError::ChannelClosed`] if the channel is torn down first.
/// Dropping the handle abandons the wait but does not retract the request;
/// the worker keeps executing it and the eventual result is discarded.
#[derive(Debug)]
pub struct ResultHandle {
    action_id: ActionId,
    rx: oneshot::Receiver<WorkerResult<ResultEvent>>,
}

impl ResultHandle {
    pub fn action_id(&self) -> &ActionId {
        &self.action_id
    }

    /// Suspend until the action resolves.
    pub async fn wait(self) -> WorkerResult<ResultEvent> {
        match self.rx.await {
            Ok(result) => result,
            // The pending entry vanished without a verdict: the connection
            // owning the table was dropped while this handle was alive.
            Err(_) => Err(WorkerError::Cancelled),
        }
    }
}

#[derive(Debug)]
struct PendingRequest {
    tx: oneshot::Sender<WorkerResult<ResultEvent>>,
    submitted_at: Instant,
}

/// Table of outstanding requests for one worker channel.
///
/// `register` is called by any submitting task; `resolve` and `fail_all`
/// only by the channel's single reader. Critical sections are O(1) map
/// operations, never I/O.
#[derive(Default, Debug)]
pub struct ResultCorrelator {
    pending: Mutex<HashMap<ActionId, PendingRequest>>,
}

impl ResultCorrelator {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register one action id, returning its completion handle.
    pub async fn register(&self, action_id: &ActionId) -> WorkerResult<ResultHandle> {
        let mut pending = self.pending.lock().await;
        if pending.contains_key(action_id) {
            return Err(WorkerError::DuplicateActionId(action_id.clone()));
        }
        Ok(insert_entry(&mut pending, action_id))
    }

    /// Register a batch of action ids atomically: if any id is already
    /// outstanding, or repeats within the batch, nothing is registered.
    pub async fn register_batch(&self, action_ids: &[ActionId]) -> WorkerResult<Vec<ResultHandle>> {
        let mut pending = self.pending.lock().await;
        let mut handles: Vec<ResultHandle> = Vec::with_capacity(action_ids.len());
        for action_id in action_ids {
            if pending.contains_key(action_id) {
                for handle in &handles {
                    pending.remove(handle.action_id());
                }
                return Err(WorkerError::DuplicateActionId(action_id.clone()));
            }
            handles.push(insert_entry(&mut pending, action_id));
        }
        Ok(handles)
    }

    /// Deliver a result to the pending entry whose action id matches.
    ///
    /// Fails with [`WorkerError::UnknownActionId`] when no entry exists:
    /// the worker echoed an id it was never given, or duplicated a result
    /// for an already-resolved id.
    pub async fn resolve(&self, event: ResultEvent) -> WorkerResult<()> {
        let entry = self.pending.lock().await.remove(&event.action_id);
        match entry {
            Some(request) => {
                debug!(
                    action_id = %event.action_id,
                    exit_code = event.exit_code,
                    elapsed_ms = request.submitted_at.elapsed().as_millis() as u64,
                    "action resolved"
                );
                // The caller may have stopped waiting; the result is then
                // discarded.
                let _ = request.tx.send(Ok(event));
                Ok(())
            }
            None => Err(WorkerError::UnknownActionId(event.action_id)),
        }
    }

    /// Fail every pending entry with a channel-closed error and clear the
    /// table. A second call on the emptied table is a no-op, and the ids
    /// become registrable again.
    pub async fn fail_all(&self, reason: &TeardownReason) -> usize {
        let drained: Vec<(ActionId, PendingRequest)> =
            self.pending.lock().await.drain().collect();
        let failed = drained.len();
        for (action_id, request) in drained {
            debug!(%action_id, %reason, "failing pending request");
            let _ = request.tx.send(Err(WorkerError::channel_closed(reason)));
        }
        failed
    }

    /// Drop a pending entry without fulfilling it. Only for entries whose
    /// handle never reached a caller.
    pub async fn abandon(&self, action_id: &ActionId) {
        self.pending.lock().await.remove(action_id);
    }

    /// Number of currently outstanding requests.
    pub async fn len(&self) -> usize {
        self.pending.lock().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.pending.lock().await.is_empty()
    }
}

fn insert_entry(
    pending: &mut HashMap<ActionId, PendingRequest>,
    action_id: &ActionId,
) -> ResultHandle {
    let (tx, rx) = oneshot::channel();
    pending.insert(
        action_id.clone(),
        PendingRequest {
            tx,
            submitted_at: Instant::now(),
        },
    );
    ResultHandle {
        action_id: action_id.clone(),
        rx,
    }
}
