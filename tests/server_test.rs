//! End-to-end tests for the demo HTTP host over loopback TCP, driven by a hyper client.

use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use http_body_util::{BodyExt, Empty};
use hyper::body::Incoming;
use hyper::{Method, Request, Response, StatusCode};
use hyper_util::rt::TokioIo;
use serde_json::{json, Value};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;

use message_stream_rs::config::{Config, DemoProducer};
use message_stream_rs::server::{ConnectionHandler, SseListener};
use message_stream_rs::shutdown::ShutdownCoordinator;

fn fixture() -> Value {
    json!([
        {"id": "1", "data": "first"},
        {"event": "done", "data": ["x", "y"]},
        {"comment": "last"}
    ])
}

/// Start a host on a free port and return its address.
async fn start_server(config: Config, fixture: Value) -> (SocketAddr, ShutdownCoordinator) {
    let shutdown = ShutdownCoordinator::new();
    let listener = SseListener::bind(&config.server, shutdown.clone())
        .await
        .unwrap();
    let addr = listener.local_addr();
    let handler = Arc::new(ConnectionHandler::new(config, fixture, shutdown.clone()).unwrap());

    tokio::spawn(async move {
        while let Some(conn) = listener.accept().await {
            let handler = handler.clone();
            tokio::spawn(async move {
                handler.handle(conn.stream, conn.guard).await;
            });
        }
    });

    (addr, shutdown)
}

fn test_config() -> Config {
    let mut config = Config::default();
    config.server.listen_addr = "127.0.0.1:0".to_string();
    config.demo.wait_secs = 0;
    config
}

async fn send(addr: SocketAddr, method: Method, uri: &str) -> Response<Incoming> {
    let tcp = TcpStream::connect(addr).await.unwrap();
    let (mut sender, conn) = hyper::client::conn::http1::handshake(TokioIo::new(tcp))
        .await
        .unwrap();
    tokio::spawn(conn);

    let request = Request::builder()
        .method(method)
        .uri(uri)
        .header("Host", "localhost")
        .body(Empty::<Bytes>::new())
        .unwrap();
    sender.send_request(request).await.unwrap()
}

async fn get(addr: SocketAddr, uri: &str) -> Response<Incoming> {
    send(addr, Method::GET, uri).await
}

async fn body_text(response: Response<Incoming>) -> String {
    let collected = tokio::time::timeout(Duration::from_secs(5), response.into_body().collect())
        .await
        .expect("stream did not end")
        .unwrap();
    String::from_utf8(collected.to_bytes().to_vec()).unwrap()
}

#[tokio::test]
async fn test_streams_welcome_and_fixture() {
    let (addr, _shutdown) = start_server(test_config(), fixture()).await;

    let response = get(addr, "/").await;
    assert_eq!(response.status(), StatusCode::OK);
    let headers = response.headers();
    assert_eq!(headers["content-type"], "text/event-stream");
    assert_eq!(headers["cache-control"], "no-cache");
    assert_eq!(headers["x-accel-buffering"], "no");

    assert_eq!(
        body_text(response).await,
        ": Welcome!\n\n\nid: 1\ndata: first\n\n\nevent: done\ndata: x\ndata: y\n\n\n: last\n\n\n"
    );
}

#[tokio::test]
async fn test_wait_query_parameter() {
    let mut config = test_config();
    config.demo.wait_secs = 30;
    let (addr, _shutdown) = start_server(config, fixture()).await;

    // Without the override this would take a minute.
    let response = get(addr, "/?wait=0").await;
    assert!(body_text(response).await.ends_with(": last\n\n\n"));

    let response = get(addr, "/?wait=soon").await;
    assert_eq!(response.status(), StatusCode::BAD_REQUEST);
}

#[tokio::test]
async fn test_routing_errors() {
    let mut config = test_config();
    config.server.path = "/events".to_string();
    let (addr, _shutdown) = start_server(config, fixture()).await;

    let response = get(addr, "/").await;
    assert_eq!(response.status(), StatusCode::NOT_FOUND);

    let response = send(addr, Method::POST, "/events").await;
    assert_eq!(response.status(), StatusCode::METHOD_NOT_ALLOWED);
}

#[tokio::test]
async fn test_malformed_request_gets_400() {
    let (addr, _shutdown) = start_server(test_config(), fixture()).await;

    let mut client = TcpStream::connect(addr).await.unwrap();
    client.write_all(b"hello\r\n\r\n").await.unwrap();

    let mut response = Vec::new();
    tokio::time::timeout(Duration::from_secs(5), client.read_to_end(&mut response))
        .await
        .expect("server did not close the connection")
        .unwrap();
    assert!(String::from_utf8_lossy(&response).starts_with("HTTP/1.1 400"));
}

#[tokio::test]
async fn test_log_echo_adds_comments() {
    let mut config = test_config();
    config.stream.log_echo = true;
    let (addr, _shutdown) = start_server(config, fixture()).await;

    let text = body_text(get(addr, "/").await).await;
    assert!(text.contains(": [debug] "));
    assert!(text.contains("id: 1\ndata: first\n\n\n"));
}

#[tokio::test]
async fn test_ticker_producer() {
    let mut config = test_config();
    config.demo.producer = DemoProducer::Ticker;
    config.demo.tick_limit = Some(3);
    let (addr, _shutdown) = start_server(config, fixture()).await;

    let text = body_text(get(addr, "/").await).await;
    let blocks: Vec<&str> = text.split_terminator("\n\n\n").collect();
    assert_eq!(blocks.len(), 3);
    for (n, block) in blocks.iter().enumerate() {
        assert!(block.starts_with(&format!("id: {}\nevent: tick\ndata: ", n)));
    }
}

#[tokio::test]
async fn test_shutdown_stops_open_streams() {
    let (addr, shutdown) = start_server(test_config(), fixture()).await;

    let response = get(addr, "/?wait=2").await;
    let mut body = response.into_body();

    // Welcome and the first entry go out immediately; the second is two seconds away.
    let mut received = Vec::new();
    while !String::from_utf8_lossy(&received).contains("data: first\n\n\n") {
        let frame = tokio::time::timeout(Duration::from_secs(5), body.frame())
            .await
            .unwrap()
            .expect("stream closed early")
            .unwrap();
        if let Ok(chunk) = frame.into_data() {
            received.extend_from_slice(&chunk);
        }
    }

    shutdown.shutdown();

    let rest = tokio::time::timeout(Duration::from_secs(5), body.collect())
        .await
        .unwrap()
        .unwrap();
    received.extend_from_slice(&rest.to_bytes());
    let text = String::from_utf8(received).unwrap();
    assert!(!text.contains("event: done"));

    tokio::time::timeout(Duration::from_secs(5), shutdown.wait_for_drain())
        .await
        .unwrap();
    assert_eq!(shutdown.active_connections(), 0);
}
