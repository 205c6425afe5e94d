//! Worker process lifecycle: spawn, readiness handshake, exit watch,
//! shutdown.

use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use tokio::process::{Child, Command};
use tokio::sync::{oneshot, watch};
use tokio::time::timeout;
use tracing::{info, warn};
use uuid::Uuid;

use crate::config::Settings;
use crate::correlator::ResultHandle;
use crate::driver::ChannelState;
use crate::error::{TeardownReason, WorkerError, WorkerResult};
use crate::executor::{WorkerConnection, WorkerToolExecutor};
use crate::protocol::{ActionId, CommandMessage, ResponseFrame, ResultEvent, PROTOCOL_VERSION};
use crate::transport::{FrameReader, FrameWriter};

/// Observed exit of a worker process.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct WorkerExit {
    /// Exit code, when the process terminated normally.
    pub code: Option<i32>,
}

/// A spawned worker process plus its execution channel.
///
/// Spawning covers process start and the readiness handshake: the worker
/// must write a `hello` frame carrying the supported protocol version
/// before the channel accepts submissions. Once ready, the tool dispatches
/// commands through [`WorkerToolExecutor`]. If the process exits while
/// requests are in flight, every pending completion fails with the exit
/// status as the teardown reason.
#[derive(Debug)]
pub struct WorkerTool {
    worker_id: Uuid,
    tool: String,
    connection: Arc<WorkerConnection>,
    exit_rx: watch::Receiver<Option<WorkerExit>>,
    // Dropping the sender (or sending on it) makes the exit watch kill the
    // child, so an abandoned WorkerTool never leaks a process.
    kill_tx: Option<oneshot::Sender<()>>,
    shutdown_grace: Duration,
}

impl WorkerTool {
    /// Spawn the named tool from `settings` and wait for it to become
    /// ready.
    pub async fn spawn(settings: &Settings, tool: &str) -> WorkerResult<Self> {
        let cfg = settings.tool(tool)?;
        let path = cfg.resolved_path()?;
        let args = cfg.resolved_args()?;
        let envs = cfg.resolved_env()?;
        let startup_timeout = settings.defaults.startup_timeout()?;
        let shutdown_grace = settings.defaults.shutdown_grace()?;

        let worker_id = Uuid::new_v4();
        info!(%worker_id, tool, path = %path.display(), "spawning worker");

        let mut child = Command::new(&path)
            .args(&args)
            .envs(&envs)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::inherit())
            .kill_on_drop(true)
            .spawn()
            .map_err(WorkerError::SpawnFailed)?;

        let stdin = child.stdin.take().expect("stdin not captured");
        let stdout = child.stdout.take().expect("stdout not captured");

        let mut reader = FrameReader::new(stdout);
        handshake(&mut reader, startup_timeout).await?;
        info!(%worker_id, tool, "worker ready");

        let connection = Arc::new(WorkerConnection::connect(FrameWriter::new(stdin), reader));
        let (exit_tx, exit_rx) = watch::channel(None);
        let (kill_tx, kill_rx) = oneshot::channel();
        spawn_exit_watch(child, connection.clone(), exit_tx, kill_rx, worker_id);

        Ok(Self {
            worker_id,
            tool: tool.to_string(),
            connection,
            exit_rx,
            kill_tx: Some(kill_tx),
            shutdown_grace,
        })
    }

    pub fn id(&self) -> Uuid {
        self.worker_id
    }

    pub fn tool(&self) -> &str {
        &self.tool
    }

    /// The underlying channel, for state observation and introspection.
    pub fn channel(&self) -> &WorkerConnection {
        &self.connection
    }

    /// Observe channel state transitions.
    pub fn state(&self) -> watch::Receiver<ChannelState> {
        self.connection.state()
    }

    /// Check if the worker process is still running.
    pub fn is_alive(&self) -> bool {
        self.exit_rx.borrow().is_none()
    }

    /// Last observed exit of the worker process, if it has exited.
    pub fn exit_status(&self) -> Option<WorkerExit> {
        *self.exit_rx.borrow()
    }

    /// Shut the worker down: ask it to exit, give it `shutdown_grace`,
    /// then kill it. Returns the observed exit.
    ///
    /// Anything still pending on the channel fails with the worker's exit
    /// as the teardown reason.
    pub async fn shutdown(mut self) -> WorkerResult<WorkerExit> {
        info!(worker_id = %self.worker_id, tool = %self.tool, "shutting down worker");
        // Best effort: the worker may already be gone.
        let _ = self.connection.send_shutdown_frame().await;

        let mut exit_rx = self.exit_rx.clone();
        let graceful = timeout(
            self.shutdown_grace,
            async { exit_rx.wait_for(|exit| exit.is_some()).await.map(|r| *r) },
        )
        .await;

        let exit = match graceful {
            Ok(observed) => flatten_exit(observed),
            Err(_) => {
                warn!(
                    worker_id = %self.worker_id,
                    grace = ?self.shutdown_grace,
                    "worker did not exit within grace period; killing"
                );
                if let Some(kill_tx) = self.kill_tx.take() {
                    let _ = kill_tx.send(());
                }
                let observed = exit_rx.wait_for(|exit| exit.is_some()).await.map(|r| *r);
                flatten_exit(observed)
            }
        };
        Ok(exit)
    }
}

fn flatten_exit(
    observed: Result<Option<WorkerExit>, watch::error::RecvError>,
) -> WorkerExit {
    match observed {
        Ok(exit) => exit.unwrap_or(WorkerExit { code: None }),
        // The exit watch never drops its sender before publishing; treat a
        // lost watch as an exit without a status.
        Err(_) => WorkerExit { code: None },
    }
}

/// Read the worker's `hello` frame and verify the protocol version.
async fn handshake(reader: &mut FrameReader, startup_timeout: Duration) -> WorkerResult<()> {
    let frame = match timeout(startup_timeout, reader.recv()).await {
        Err(_) => {
            return Err(WorkerError::HandshakeFailed(format!(
                "no hello frame within {startup_timeout:?}"
            )))
        }
        Ok(Err(err)) => {
            return Err(WorkerError::HandshakeFailed(format!(
                "reading hello frame: {err}"
            )))
        }
        Ok(Ok(None)) => {
            return Err(WorkerError::HandshakeFailed(
                "worker closed the channel before hello".to_string(),
            ))
        }
        Ok(Ok(Some(frame))) => frame,
    };

    match frame {
        ResponseFrame::Hello {
            version: PROTOCOL_VERSION,
        } => Ok(()),
        ResponseFrame::Hello { version } => Err(WorkerError::HandshakeFailed(format!(
            "worker speaks protocol version {version}, expected {PROTOCOL_VERSION}"
        ))),
        ResponseFrame::Result(event) => Err(WorkerError::HandshakeFailed(format!(
            "result frame for {} before hello",
            event.action_id
        ))),
    }
}

/// Own the child for its lifetime: report its exit, tear the channel down
/// with the exit status, and kill on request (or when the kill sender is
/// dropped).
fn spawn_exit_watch(
    mut child: Child,
    connection: Arc<WorkerConnection>,
    exit_tx: watch::Sender<Option<WorkerExit>>,
    mut kill_rx: oneshot::Receiver<()>,
    worker_id: Uuid,
) {
    tokio::spawn(async move {
        let status = tokio::select! {
            status = child.wait() => status,
            _ = &mut kill_rx => {
                let _ = child.start_kill();
                child.wait().await
            }
        };

        let code = status.as_ref().ok().and_then(|status| status.code());
        info!(%worker_id, code = ?code, "worker process exited");
        connection
            .teardown(TeardownReason::WorkerExited { status: code })
            .await;
        let _ = exit_tx.send(Some(WorkerExit { code }));
    });
}

#[async_trait]
impl WorkerToolExecutor for WorkerTool {
    async fn execute_command(
        &self,
        action_id: ActionId,
        command: CommandMessage,
    ) -> WorkerResult<ResultEvent> {
        self.connection.execute_command(action_id, command).await
    }

    async fn execute_pipelining_command(
        &self,
        action_ids: Vec<ActionId>,
        command: CommandMessage,
    ) -> WorkerResult<Vec<ResultHandle>> {
        self.connection
            .execute_pipelining_command(action_ids, command)
            .await
    }
}
