//! Read-side protocol driver and channel state machine.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, error, info, warn};

use crate::correlator::ResultCorrelator;
use crate::error::{TeardownReason, WorkerError};
use crate::protocol::ResponseFrame;
use crate::transport::FrameReader;

/// Lifecycle of one worker channel.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ChannelState {
    /// Normal operation: submissions accepted, read loop running.
    Active,
    /// Teardown in progress: no new reads, pending requests being failed.
    Draining(TeardownReason),
    /// Terminal.
    Closed(TeardownReason),
}

impl ChannelState {
    pub fn is_active(&self) -> bool {
        matches!(self, Self::Active)
    }

    pub fn teardown_reason(&self) -> Option<&TeardownReason> {
        match self {
            Self::Active => None,
            Self::Draining(reason) | Self::Closed(reason) => Some(reason),
        }
    }
}

/// Shared teardown control for one channel.
///
/// Owned jointly by the connection (write-failure and local-shutdown paths),
/// the read loop, and the process exit watch. Whichever reports a reason
/// first wins; later attempts are no-ops.
#[derive(Debug)]
pub(crate) struct ChannelCtl {
    correlator: Arc<ResultCorrelator>,
    state: watch::Sender<ChannelState>,
}

impl ChannelCtl {
    pub(crate) fn new(correlator: Arc<ResultCorrelator>) -> Self {
        let (state, _) = watch::channel(ChannelState::Active);
        Self { correlator, state }
    }

    pub(crate) fn subscribe(&self) -> watch::Receiver<ChannelState> {
        self.state.subscribe()
    }

    pub(crate) fn current(&self) -> ChannelState {
        self.state.borrow().clone()
    }

    /// Drive the channel through Draining to Closed, failing every pending
    /// request with `reason`. Idempotent: only the first caller transitions.
    pub(crate) async fn teardown(&self, reason: TeardownReason) {
        let entered = self.state.send_if_modified(|state| {
            if state.is_active() {
                *state = ChannelState::Draining(reason.clone());
                true
            } else {
                false
            }
        });
        if !entered {
            return;
        }

        let failed = self.correlator.fail_all(&reason).await;
        if failed > 0 {
            warn!(pending = failed, %reason, "failed outstanding requests on channel teardown");
        } else {
            info!(%reason, "worker channel closed");
        }
        self.state
            .send_modify(|state| *state = ChannelState::Closed(reason));
    }
}

/// Spawn the dedicated reader for one channel.
///
/// The returned task is the only execution context that touches the read
/// half or calls `resolve`/`fail_all`, which serializes result delivery by
/// construction.
pub(crate) fn spawn_read_loop(
    mut reader: FrameReader,
    correlator: Arc<ResultCorrelator>,
    ctl: Arc<ChannelCtl>,
) -> JoinHandle<()> {
    tokio::spawn(async move {
        let mut state_rx = ctl.subscribe();
        let reason = loop {
            // Teardown may have been initiated elsewhere (local shutdown,
            // write failure, process exit); stop reading if so.
            if !state_rx.borrow().is_active() {
                return;
            }
            tokio::select! {
                _ = state_rx.changed() => {
                    return;
                }
                frame = reader.recv() => match frame {
                    Ok(Some(ResponseFrame::Result(event))) => {
                        debug!(action_id = %event.action_id, "result frame received");
                        if let Err(err) = correlator.resolve(event).await {
                            error!(%err, "protocol violation from worker");
                            break TeardownReason::Protocol(err.to_string());
                        }
                    }
                    Ok(Some(ResponseFrame::Hello { version })) => {
                        error!(version, "unexpected hello frame on an established channel");
                        break TeardownReason::Protocol("unexpected hello frame".to_string());
                    }
                    Ok(None) => {
                        info!("worker channel reached end of stream");
                        break TeardownReason::WorkerExited { status: None };
                    }
                    Err(err @ WorkerError::MalformedFrame(_)) => {
                        error!(%err, "malformed frame; frame boundaries are unrecoverable");
                        break TeardownReason::Protocol(err.to_string());
                    }
                    Err(err) => {
                        error!(%err, "transport failure on worker channel");
                        break TeardownReason::Transport(err.to_string());
                    }
                },
            }
        };
        ctl.teardown(reason).await;
    })
}
