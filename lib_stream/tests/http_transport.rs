//! # HTTP Stream Integration Tests
//!
//! Drives `StreamSession` and `StreamController` over the real `HttpStreamTransport`
//! against the in-process server from `support`.

mod support;

use std::sync::{Arc, Mutex};
use std::time::Duration;

use lib_stream::core::{Dispatcher, StreamEvent};
use lib_stream::ingestors::{
    HttpStreamTransport, ReconnectPolicy, SessionOutcome, SharedMetrics, StreamController,
    StreamError, StreamSession, TransportTimeouts,
};
use lib_stream::storage::{file_path, RotatingFileWriter};
use tokio_util::sync::CancellationToken;

use support::{wait_until, MockServer, Reply, StreamEnd};

fn transport(url: String) -> Arc<HttpStreamTransport> {
    let timeouts = TransportTimeouts {
        connect: Duration::from_secs(2),
        read: Duration::from_secs(2),
    };
    Arc::new(HttpStreamTransport::new(url, "test-bearer", timeouts).unwrap())
}

fn recording_dispatcher() -> (Arc<Dispatcher>, Arc<Mutex<Vec<String>>>) {
    let dispatcher = Arc::new(Dispatcher::new());
    let ids = Arc::new(Mutex::new(Vec::new()));
    let seen = Arc::clone(&ids);
    dispatcher.register("ids", move |event: &StreamEvent| {
        let id = event.payload()["data"]["id"].as_str().unwrap_or("?").to_string();
        seen.lock().unwrap().push(id);
        Ok(())
    });
    (dispatcher, ids)
}

#[tokio::test]
async fn streamed_lines_reach_subscribers() {
    let server = MockServer::start(vec![Reply::stream(
        &[
            "\r\n",
            "{\"data\":{\"id\":\"1\"}}\r\n{\"data\":",
            "{\"id\":\"2\"}}\r\n\r\n",
            "garbage\r\n{\"data\":{\"id\":\"3\"}}\r\n",
        ],
        StreamEnd::Clean,
    )])
    .await;
    let (dispatcher, ids) = recording_dispatcher();
    let metrics = SharedMetrics::default();

    let outcome = StreamSession::new(
        transport(server.url("/2/stream")),
        dispatcher,
        CancellationToken::new(),
    )
    .with_metrics(Arc::clone(&metrics))
    .run()
    .await;

    assert!(matches!(outcome, SessionOutcome::Completed));
    assert_eq!(*ids.lock().unwrap(), vec!["1", "2", "3"]);
    let metrics = metrics.lock().unwrap().clone();
    assert_eq!(metrics.heartbeats, 2);
    assert_eq!(metrics.malformed_lines, 1);

    let requests = server.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].method, "GET");
    assert_eq!(requests[0].path, "/2/stream");
    assert_eq!(requests[0].header("authorization"), Some("Bearer test-bearer"));
}

#[tokio::test]
async fn error_status_is_a_recoverable_failure() {
    let server = MockServer::start(vec![Reply::json(
        429,
        serde_json::json!({"title": "Too Many Requests"}),
    )])
    .await;
    let (dispatcher, ids) = recording_dispatcher();

    let outcome = StreamSession::new(
        transport(server.url("/2/stream")),
        dispatcher,
        CancellationToken::new(),
    )
    .run()
    .await;

    match outcome {
        SessionOutcome::RecoverableFailure(StreamError::Status { status, body }) => {
            assert_eq!(status, 429);
            assert!(body.contains("Too Many Requests"));
        }
        other => panic!("unexpected outcome: {other:?}"),
    }
    assert!(ids.lock().unwrap().is_empty());
}

#[tokio::test]
async fn aborted_body_counts_as_connection_reset() {
    let server = MockServer::start(vec![Reply::stream(
        &["{\"data\":{\"id\":\"1\"}}\r\n"],
        StreamEnd::Abort,
    )])
    .await;
    let (dispatcher, ids) = recording_dispatcher();
    let metrics = SharedMetrics::default();

    let outcome = StreamSession::new(
        transport(server.url("/2/stream")),
        dispatcher,
        CancellationToken::new(),
    )
    .with_metrics(Arc::clone(&metrics))
    .run()
    .await;

    assert!(matches!(outcome, SessionOutcome::Completed));
    assert_eq!(*ids.lock().unwrap(), vec!["1"]);
    assert_eq!(metrics.lock().unwrap().connection_resets, 1);
}

#[tokio::test]
async fn refused_connection_is_a_recoverable_failure() {
    let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    drop(listener);

    let (dispatcher, _) = recording_dispatcher();
    let outcome = StreamSession::new(
        transport(format!("http://{addr}/2/stream")),
        dispatcher,
        CancellationToken::new(),
    )
    .run()
    .await;

    assert!(matches!(outcome, SessionOutcome::RecoverableFailure(_)));
}

#[tokio::test]
async fn stop_interrupts_a_silent_connection() {
    let server = MockServer::start(vec![Reply::stream(
        &["{\"data\":{\"id\":\"1\"}}\r\n"],
        StreamEnd::Hang,
    )])
    .await;
    let (dispatcher, ids) = recording_dispatcher();
    let controller = StreamController::new(transport(server.url("/2/stream")), dispatcher);

    assert!(controller.start().await);
    assert!(wait_until(Duration::from_secs(5), || ids.lock().unwrap().len() == 1).await);

    let stopped = tokio::time::timeout(Duration::from_secs(1), controller.stop()).await;
    assert!(matches!(stopped, Ok(true)));
    assert!(!controller.is_running());
}

#[tokio::test]
async fn controller_reconnects_and_writer_rotates() {
    let event = |id: u32, tag: &str| {
        format!(
            "{{\"data\":{{\"id\":\"{id}\",\"text\":\"a record comfortably over one hundred bytes\"}},\"matching_rules\":[{{\"id\":\"r\",\"tag\":\"{tag}\"}}]}}\r\n"
        )
    };
    let first: Vec<String> = (0..3).map(|i| event(i, "t")).collect();
    let second: Vec<String> = (3..6).map(|i| event(i, "t")).collect();
    let first: Vec<&str> = first.iter().map(String::as_str).collect();
    let second: Vec<&str> = second.iter().map(String::as_str).collect();

    let server = MockServer::start(vec![
        Reply::stream(&first, StreamEnd::Clean),
        Reply::stream(&second, StreamEnd::Abort),
        Reply::stream(&[], StreamEnd::Hang),
    ])
    .await;

    let dir = tempfile::tempdir().unwrap();
    let writer = Arc::new(RotatingFileWriter::new(dir.path(), 100).unwrap());
    let dispatcher = Arc::new(Dispatcher::new());
    dispatcher.register_arc("save_to_file", writer.subscriber());

    let controller = StreamController::new(transport(server.url("/2/stream")), dispatcher)
        .with_policy(ReconnectPolicy {
            base_delay: Duration::from_millis(10),
            max_delay: Duration::from_millis(50),
        });

    assert!(controller.start().await);
    let settled = wait_until(Duration::from_secs(5), || {
        let metrics = controller.metrics();
        metrics.events_dispatched == 6 && metrics.sessions >= 3
    })
    .await;
    assert!(settled);
    assert!(controller.stop().await);

    let metrics = controller.metrics();
    assert!(metrics.sessions >= 3);
    assert!(metrics.reconnections >= 2);
    assert_eq!(metrics.callback_failures, 0);

    // Every record is longer than the threshold: one file per event.
    for index in 0..6 {
        let content = std::fs::read_to_string(file_path(dir.path(), "t", index)).unwrap();
        assert_eq!(content.lines().count(), 1);
    }
    assert!(!file_path(dir.path(), "t", 6).exists());
}
