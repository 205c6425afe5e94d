//! Pipelined submission: many outstanding actions, results in any order.

mod support;

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tokio::time::timeout;

use drover::{ActionId, CommandMessage, WorkerError, WorkerToolExecutor};
use support::{FakeWorker, WAIT};

fn command() -> CommandMessage {
    CommandMessage::from_value(serde_json::json!({ "argv": ["tool", "build"] }))
}

fn ids(names: &[&str]) -> Vec<ActionId> {
    names.iter().map(|name| ActionId::from(*name)).collect()
}

#[tokio::test]
async fn test_submission_returns_handles_without_waiting_for_results() {
    support::init_tracing();
    let (connection, mut worker) = FakeWorker::connect();

    // The worker answers nothing yet; the call must still complete.
    let handles = timeout(
        WAIT,
        connection.execute_pipelining_command(ids(&["a1", "a2", "a3"]), command()),
    )
    .await
    .expect("pipelined submission must not block on results")
    .unwrap();

    // One handle per action id, order-correspondent.
    assert_eq!(handles.len(), 3);
    assert_eq!(handles[0].action_id().as_str(), "a1");
    assert_eq!(handles[1].action_id().as_str(), "a2");
    assert_eq!(handles[2].action_id().as_str(), "a3");

    // One frame per action id reached the worker.
    let mut seen = Vec::new();
    for _ in 0..3 {
        seen.push(worker.read_action_id().await);
    }
    seen.sort();
    assert_eq!(seen, ["a1", "a2", "a3"]);

    // Results arrive out of submission order; each handle still observes
    // its own result.
    worker.send_result("a3", 0).await;
    worker.send_result("a1", 0).await;
    worker.send_result("a2", 0).await;

    for handle in handles {
        let expected = handle.action_id().clone();
        let event = timeout(WAIT, handle.wait()).await.unwrap().unwrap();
        assert_eq!(event.action_id, expected);
    }
    assert_eq!(connection.pending_requests().await, 0);
}

#[tokio::test]
async fn test_one_actions_failure_does_not_touch_the_others() {
    let (connection, mut worker) = FakeWorker::connect();

    let handles = connection
        .execute_pipelining_command(ids(&["ok", "bad"]), command())
        .await
        .unwrap();
    worker.read_action_id().await;
    worker.read_action_id().await;

    worker.send_result("bad", 1).await;

    let mut handles = handles.into_iter();
    let ok_handle = handles.next().unwrap();
    let bad_handle = handles.next().unwrap();

    let bad = timeout(WAIT, bad_handle.wait()).await.unwrap().unwrap();
    assert!(!bad.is_success());

    // "ok" is still pending and resolves on its own schedule.
    assert_eq!(connection.pending_requests().await, 1);
    worker.send_result("ok", 0).await;
    let ok = timeout(WAIT, ok_handle.wait()).await.unwrap().unwrap();
    assert!(ok.is_success());
}

#[tokio::test]
async fn test_empty_batch_is_a_noop() {
    let (connection, mut worker) = FakeWorker::connect();

    let handles = connection
        .execute_pipelining_command(Vec::new(), command())
        .await
        .unwrap();

    assert!(handles.is_empty());
    worker.expect_no_frame(Duration::from_millis(100)).await;
    assert_eq!(connection.pending_requests().await, 0);
}

#[tokio::test]
async fn test_intra_batch_duplicate_registers_nothing() {
    let (connection, mut worker) = FakeWorker::connect();

    let err = connection
        .execute_pipelining_command(ids(&["d", "d"]), command())
        .await
        .unwrap_err();

    assert!(matches!(err, WorkerError::DuplicateActionId(_)));
    worker.expect_no_frame(Duration::from_millis(100)).await;
    assert_eq!(connection.pending_requests().await, 0);
}

#[tokio::test]
async fn test_concurrent_callers_each_observe_their_own_result() {
    let (connection, mut worker) = FakeWorker::connect();
    let connection = Arc::new(connection);

    // Three independent callers block on three different actions. Distinct
    // exit codes prove content identity, not just id matching.
    let callers: Vec<_> = [("a1", 11), ("a2", 12), ("a3", 13)]
        .into_iter()
        .map(|(id, exit_code)| {
            let connection = connection.clone();
            tokio::spawn(async move {
                let event = timeout(
                    WAIT,
                    connection.execute_command(ActionId::from(id), command()),
                )
                .await
                .expect("caller must not hang")
                .unwrap();
                assert_eq!(event.action_id, ActionId::from(id));
                assert_eq!(event.exit_code, exit_code);
            })
        })
        .collect();

    let mut submitted = Vec::new();
    for _ in 0..3 {
        submitted.push(worker.read_action_id().await);
    }
    submitted.sort();
    assert_eq!(submitted, ["a1", "a2", "a3"]);

    // Answer in a different order than any caller submitted.
    worker.send_result("a3", 13).await;
    worker.send_result("a1", 11).await;
    worker.send_result("a2", 12).await;

    for result in join_all(callers).await {
        result.unwrap();
    }
}
