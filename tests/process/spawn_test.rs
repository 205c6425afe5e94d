//! Lifecycle tests against real spawned processes.
//!
//! The fake workers are tiny /bin/sh scripts speaking the NDJSON protocol
//! on stdin/stdout, so these tests exercise the spawn/handshake/exit path
//! end to end.

#![cfg(unix)]

use std::time::Duration;

use tokio::time::{sleep, timeout};

use drover::{
    ActionId, CommandMessage, Settings, TeardownReason, ToolSettings, WorkerError, WorkerTool,
    WorkerToolExecutor, PROTOCOL_VERSION,
};

const WAIT: Duration = Duration::from_secs(5);

fn sh_tool(script: &str) -> Settings {
    let mut settings = Settings::default();
    settings.defaults.startup_timeout = "2s".to_string();
    settings.defaults.shutdown_grace = "2s".to_string();
    settings.with_tool("fake", ToolSettings::new("/bin/sh").with_args(["-c", script]))
}

fn hello() -> String {
    format!(r#"printf '{{"type":"hello","version":{PROTOCOL_VERSION}}}\n'"#)
}

fn command() -> CommandMessage {
    CommandMessage::from_value(serde_json::json!({ "argv": ["tool", "build"] }))
}

#[tokio::test]
async fn test_spawn_execute_and_graceful_shutdown() {
    let script = format!(
        r#"{hello}; read line; printf '{{"type":"result","action_id":"a1","exit_code":0}}\n'; read line2; exit 0"#,
        hello = hello()
    );
    let settings = sh_tool(&script);

    let worker = WorkerTool::spawn(&settings, "fake").await.unwrap();
    assert!(worker.is_alive());

    let event = timeout(
        WAIT,
        worker.execute_command(ActionId::from("a1"), command()),
    )
    .await
    .expect("result must arrive")
    .unwrap();
    assert!(event.is_success());

    // The shutdown frame unblocks the script's second read and it exits 0.
    let exit = timeout(WAIT, worker.shutdown()).await.unwrap().unwrap();
    assert_eq!(exit.code, Some(0));
}

#[tokio::test]
async fn test_protocol_version_mismatch_fails_the_handshake() {
    let settings = sh_tool(r#"printf '{"type":"hello","version":999}\n'; sleep 5"#);

    let err = WorkerTool::spawn(&settings, "fake").await.unwrap_err();
    assert!(matches!(err, WorkerError::HandshakeFailed(_)));
}

#[tokio::test]
async fn test_silent_worker_fails_the_handshake_within_the_timeout() {
    let mut settings = sh_tool("sleep 10");
    settings.defaults.startup_timeout = "300ms".to_string();

    let err = WorkerTool::spawn(&settings, "fake").await.unwrap_err();
    assert!(matches!(err, WorkerError::HandshakeFailed(_)));
}

#[tokio::test]
async fn test_missing_binary_fails_to_spawn() {
    let settings =
        Settings::default().with_tool("fake", ToolSettings::new("/definitely/not/a/worker"));

    let err = WorkerTool::spawn(&settings, "fake").await.unwrap_err();
    assert!(matches!(err, WorkerError::SpawnFailed(_)));
}

#[tokio::test]
async fn test_unconfigured_tool_is_a_config_error() {
    let err = WorkerTool::spawn(&Settings::default(), "nothere")
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::Config(_)));
}

#[tokio::test]
async fn test_worker_crash_fails_all_in_flight_actions() {
    // Consumes both requests, then dies with both actions outstanding.
    let script = format!(r#"{hello}; read line; read line2; exit 3"#, hello = hello());
    let settings = sh_tool(&script);

    let worker = WorkerTool::spawn(&settings, "fake").await.unwrap();
    let handles = worker
        .execute_pipelining_command(vec![ActionId::from("a"), ActionId::from("b")], command())
        .await
        .unwrap();

    for handle in handles {
        let err = timeout(WAIT, handle.wait())
            .await
            .expect("a worker crash must fail pending handles, not strand them")
            .unwrap_err();
        assert!(matches!(
            err,
            WorkerError::ChannelClosed {
                reason: TeardownReason::WorkerExited { .. }
            }
        ));
    }

    // The exit watch reports the real status shortly after teardown.
    let mut polls = 0;
    while worker.is_alive() {
        polls += 1;
        assert!(polls < 100, "worker exit was never observed");
        sleep(Duration::from_millis(50)).await;
    }
    assert_eq!(worker.exit_status().and_then(|exit| exit.code), Some(3));

    // No stale correlation state: the failure mode for a resubmitted id is
    // "channel gone", never "duplicate".
    let err = worker
        .execute_command(ActionId::from("a"), command())
        .await
        .unwrap_err();
    assert!(matches!(err, WorkerError::ChannelClosed { .. }));
}

#[tokio::test]
async fn test_unresponsive_worker_is_killed_after_the_grace_period() {
    // Ignores the shutdown request entirely.
    let script = format!(r#"{hello}; exec sleep 30"#, hello = hello());
    let mut settings = sh_tool(&script);
    settings.defaults.shutdown_grace = "300ms".to_string();

    let worker = WorkerTool::spawn(&settings, "fake").await.unwrap();

    let exit = timeout(WAIT, worker.shutdown()).await.unwrap().unwrap();
    // Killed, not exited: no status code.
    assert_eq!(exit.code, None);
}
