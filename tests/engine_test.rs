//! Drive loop integration tests against a scripted transport.
//!
//! The mock transport records every byte and counts flushes; it can be told to report
//! the peer as gone after a number of flushes, or to fail every write.

use std::io;
use std::pin::Pin;
use std::sync::{Arc, Mutex};
use std::task::{Context, Poll};
use std::time::Duration;

use futures::stream;
use serde_json::json;
use tokio::io::AsyncWrite;
use tokio::sync::watch;

use message_stream_rs::error::{FormatError, StreamError};
use message_stream_rs::format::FieldSet;
use message_stream_rs::logging::{LogCommentSource, LogLevel, MemoryLogger, StreamLogger};
use message_stream_rs::producer::{Producer, StreamItem, StreamSource, VecSource};
use message_stream_rs::streaming::{
    EventStream, ShutdownCause, StreamState, Termination, Transport,
};

#[derive(Default)]
struct MockState {
    written: Vec<u8>,
    flushes: usize,
    closed_after_flushes: Option<usize>,
    fail_writes: bool,
}

#[derive(Clone, Default)]
struct MockTransport {
    state: Arc<Mutex<MockState>>,
}

impl MockTransport {
    fn closing_after(flushes: usize) -> Self {
        let mock = Self::default();
        mock.state.lock().unwrap().closed_after_flushes = Some(flushes);
        mock
    }

    fn failing() -> Self {
        let mock = Self::default();
        mock.state.lock().unwrap().fail_writes = true;
        mock
    }

    fn written(&self) -> String {
        String::from_utf8(self.state.lock().unwrap().written.clone()).unwrap()
    }
}

impl AsyncWrite for MockTransport {
    fn poll_write(
        self: Pin<&mut Self>,
        _cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        let mut state = self.state.lock().unwrap();
        if state.fail_writes {
            return Poll::Ready(Err(io::Error::from(io::ErrorKind::BrokenPipe)));
        }
        state.written.extend_from_slice(buf);
        Poll::Ready(Ok(buf.len()))
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.state.lock().unwrap().flushes += 1;
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        Poll::Ready(Ok(()))
    }
}

impl Transport for MockTransport {
    fn peer_closed(&self) -> bool {
        let state = self.state.lock().unwrap();
        state
            .closed_after_flushes
            .is_some_and(|limit| state.flushes >= limit)
    }
}

/// Records every log call.
#[derive(Default)]
struct RecordingLogger {
    debug: Mutex<Vec<String>>,
    notice: Mutex<Vec<String>>,
}

impl StreamLogger for RecordingLogger {
    fn debug(&self, message: &str) {
        self.debug.lock().unwrap().push(message.to_string());
    }

    fn notice(&self, message: &str) {
        self.notice.lock().unwrap().push(message.to_string());
    }
}

impl RecordingLogger {
    fn notices(&self) -> Vec<String> {
        self.notice.lock().unwrap().clone()
    }
}

fn stream_with(
    transport: MockTransport,
) -> (EventStream<MockTransport>, Arc<RecordingLogger>) {
    let logger = Arc::new(RecordingLogger::default());
    let stream = EventStream::new(transport).with_logger(logger.clone());
    (stream, logger)
}

#[tokio::test]
async fn test_welcome_only() {
    let transport = MockTransport::default();
    let (mut stream, logger) = stream_with(transport.clone());

    let summary = stream
        .run(|| vec![FieldSet::comment("Welcome!")])
        .await
        .unwrap();

    assert_eq!(summary.termination, Termination::Exhausted);
    assert_eq!(transport.written(), ": Welcome!\n\n\n");
    assert!(logger.notices().is_empty());
    assert!(logger
        .debug
        .lock()
        .unwrap()
        .iter()
        .any(|m| m == "Producer exhausted, closing stream."));
}

#[tokio::test]
async fn test_disconnect_after_second_message() {
    let transport = MockTransport::closing_after(2);
    let (mut stream, logger) = stream_with(transport.clone());

    let summary = stream
        .run(|| {
            vec![
                FieldSet::data("one"),
                FieldSet::data("two"),
                FieldSet::data("three"),
            ]
        })
        .await
        .unwrap();

    assert_eq!(
        summary.termination,
        Termination::Shutdown(ShutdownCause::ConnectionClosed)
    );
    assert_eq!(summary.messages_sent, 2);
    assert_eq!(transport.written(), "data: one\n\n\ndata: two\n\n\n");
    assert_eq!(
        logger.notices(),
        vec!["Shutdown signal received. Cause: connection closed".to_string()]
    );
    assert_eq!(stream.state(), StreamState::Stopped);
}

#[tokio::test]
async fn test_invalid_message_writes_nothing() {
    let transport = MockTransport::default();
    let (mut stream, logger) = stream_with(transport.clone());

    let err = stream
        .run(|| vec![StreamItem::Json(json!("not an object"))])
        .await
        .unwrap_err();

    assert!(matches!(err, StreamError::InvalidMessageType(ref t) if t == "string"));
    assert_eq!(transport.written(), "");
    assert!(logger.notices().is_empty());
}

#[tokio::test]
async fn test_invalid_producer_result() {
    let transport = MockTransport::default();
    let (mut stream, _logger) = stream_with(transport.clone());

    let err = stream.run(|| json!({"data": "x"})).await.unwrap_err();

    assert!(matches!(err, StreamError::InvalidProducerResult(ref t) if t == "object"));
    assert_eq!(stream.state(), StreamState::Idle);
    assert_eq!(transport.written(), "");
}

#[tokio::test]
async fn test_data_list_renders_one_line_per_entry() {
    let transport = MockTransport::default();
    let (mut stream, _logger) = stream_with(transport.clone());

    stream
        .run(|| vec![FieldSet::data(vec!["a", "b"])])
        .await
        .unwrap();

    assert_eq!(transport.written(), "data: a\ndata: b\n\n\n");
}

#[tokio::test]
async fn test_unknown_json_keys_are_ignored() {
    let transport = MockTransport::default();
    let (mut stream, _logger) = stream_with(transport.clone());

    let summary = stream
        .run(|| json!([{"data": "a", "name": "x"}, {"data": "b"}]))
        .await
        .unwrap();

    assert_eq!(summary.termination, Termination::Exhausted);
    assert_eq!(summary.messages_sent, 2);
    assert_eq!(transport.written(), "data: a\n\n\ndata: b\n\n\n");
}

#[tokio::test]
async fn test_object_with_only_unknown_keys_is_empty() {
    let transport = MockTransport::default();
    let (mut stream, _logger) = stream_with(transport.clone());

    let err = stream
        .run(|| json!([{"colour": "red"}]))
        .await
        .unwrap_err();

    assert!(matches!(
        err,
        StreamError::Format(FormatError::EmptyRepresentation)
    ));
    assert_eq!(transport.written(), "");
}

#[tokio::test]
async fn test_write_failure_stops_stream() {
    let transport = MockTransport::failing();
    let (mut stream, logger) = stream_with(transport.clone());

    let summary = stream
        .run(|| vec![FieldSet::data("lost"), FieldSet::data("never pulled")])
        .await
        .unwrap();

    assert_eq!(
        summary.termination,
        Termination::Shutdown(ShutdownCause::OutputError)
    );
    assert_eq!(summary.messages_sent, 0);
    assert_eq!(
        logger.notices(),
        vec!["Shutdown signal received. Cause: output error".to_string()]
    );
}

#[tokio::test(start_paused = true)]
async fn test_heartbeat_while_producer_is_idle() {
    let transport = MockTransport::default();
    let (stream, _logger) = stream_with(transport.clone());
    let mut stream = stream.with_heartbeat(Duration::from_secs(10));

    let late = stream::once(async {
        tokio::time::sleep(Duration::from_secs(25)).await;
        StreamItem::from(FieldSet::data("late"))
    });

    let summary = stream.run(|| StreamSource::new(late)).await.unwrap();

    assert_eq!(summary.heartbeats_sent, 2);
    assert_eq!(summary.messages_sent, 1);
    assert_eq!(
        transport.written(),
        ": keep-alive\n\n\n: keep-alive\n\n\ndata: late\n\n\n"
    );
}

#[tokio::test(start_paused = true)]
async fn test_shutdown_between_messages() {
    let transport = MockTransport::default();
    let (tx, rx) = watch::channel(false);
    let (stream, logger) = stream_with(transport.clone());
    let mut stream = stream.with_shutdown(rx);

    tokio::spawn(async move {
        tokio::time::sleep(Duration::from_secs(7)).await;
        tx.send(true).unwrap();
        // Keep the sender alive until the stream has seen it.
        tokio::time::sleep(Duration::from_secs(60)).await;
    });

    let items = ["1", "2", "3"]
        .into_iter()
        .map(|d| StreamItem::from(FieldSet::data(d)))
        .collect();
    let summary = stream
        .run(|| VecSource::new(items, Some(Duration::from_secs(5))))
        .await
        .unwrap();

    assert_eq!(
        summary.termination,
        Termination::Shutdown(ShutdownCause::ServerShutdown)
    );
    assert_eq!(transport.written(), "data: 1\n\n\ndata: 2\n\n\n");
    assert_eq!(
        logger.notices(),
        vec!["Shutdown signal received. Cause: server shutdown".to_string()]
    );
}

#[tokio::test]
async fn test_log_echo_follows_each_item() {
    let transport = MockTransport::default();
    let memory = Arc::new(MemoryLogger::new(LogLevel::Debug, 10));
    let mut stream = EventStream::new(transport.clone()).with_logger(memory.clone());

    let summary = stream
        .run(|| -> Result<Producer, StreamError> {
            let inner: Producer = Box::new(VecSource::new(
                vec![FieldSet::data("a").into(), FieldSet::data("b").into()],
                None,
            ));
            Ok(Box::new(LogCommentSource::new(inner, memory)))
        })
        .await
        .unwrap();

    let written = transport.written();
    let blocks: Vec<&str> = written.split_terminator("\n\n\n").collect();

    assert_eq!(summary.messages_sent, 4);
    assert_eq!(blocks.len(), 4);
    assert_eq!(blocks[0], "data: a");
    assert!(blocks[1].starts_with(": [debug] "));
    assert!(blocks[1].contains("New output received."));
    assert_eq!(blocks[2], "data: b");
    assert!(blocks[3].starts_with(": [debug] "));
}
