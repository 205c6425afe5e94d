//! Scripted in-process worker for channel tests.

#![allow(dead_code)]

use std::time::Duration;

use tokio::io::{AsyncBufReadExt, AsyncWriteExt, BufReader, DuplexStream, Lines, ReadHalf, WriteHalf};
use tokio::time::timeout;

use drover::{transport, WorkerConnection};

/// Short enough to keep tests fast, long enough to avoid flakes.
pub const WAIT: Duration = Duration::from_secs(2);

pub fn init_tracing() {
    let _ = tracing_subscriber::fmt()
        .with_env_filter("drover=debug")
        .with_test_writer()
        .try_init();
}

/// Worker end of an in-memory channel, scripted by each test.
pub struct FakeWorker {
    reader: Lines<BufReader<ReadHalf<DuplexStream>>>,
    writer: WriteHalf<DuplexStream>,
}

impl FakeWorker {
    /// Build a connection backed by an in-memory stream and hand the test
    /// the worker end.
    pub fn connect() -> (WorkerConnection, FakeWorker) {
        let (frame_writer, frame_reader, worker_io) = transport::pair(4096);
        let connection = WorkerConnection::connect(frame_writer, frame_reader);
        let (read_half, write_half) = tokio::io::split(worker_io);
        let worker = FakeWorker {
            reader: BufReader::new(read_half).lines(),
            writer: write_half,
        };
        (connection, worker)
    }

    /// Read the next request frame as raw JSON.
    pub async fn read_request(&mut self) -> serde_json::Value {
        let line = timeout(WAIT, self.reader.next_line())
            .await
            .expect("timed out waiting for a request frame")
            .expect("read failure on worker side")
            .expect("host closed the channel");
        serde_json::from_str(&line).expect("request frame is not valid JSON")
    }

    /// Read the next request frame, asserting it is an execute frame, and
    /// return its action id.
    pub async fn read_action_id(&mut self) -> String {
        let frame = self.read_request().await;
        assert_eq!(frame["type"], "execute");
        frame["action_id"]
            .as_str()
            .expect("execute frame without action_id")
            .to_string()
    }

    /// Assert that no frame arrives within `dur`.
    pub async fn expect_no_frame(&mut self, dur: Duration) {
        let res = timeout(dur, self.reader.next_line()).await;
        assert!(res.is_err(), "unexpected frame: {res:?}");
    }

    /// Send a minimal result frame for `action_id`.
    pub async fn send_result(&mut self, action_id: &str, exit_code: i32) {
        let line = serde_json::json!({
            "type": "result",
            "action_id": action_id,
            "exit_code": exit_code,
        })
        .to_string();
        self.send_line(&line).await;
    }

    /// Send one raw line, as-is plus the frame delimiter.
    pub async fn send_line(&mut self, raw: &str) {
        self.writer.write_all(raw.as_bytes()).await.unwrap();
        self.writer.write_all(b"\n").await.unwrap();
    }

    /// Drop the worker end of the stream, as a crashing worker would.
    pub fn disconnect(self) {}
}
