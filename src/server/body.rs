//! Response body fed by the engine through a bounded channel.

use std::convert::Infallible;
use std::io;
use std::pin::Pin;
use std::task::{ready, Context, Poll};

use axum::body::Body;
use bytes::Bytes;
use futures::stream;
use tokio::io::AsyncWrite;
use tokio::sync::mpsc;
use tokio_util::sync::PollSender;

use crate::streaming::Transport;

/// Lines buffered between the engine and hyper.
const BODY_BUFFER: usize = 64;

/// Writing end of a streamed response body. Each write becomes one body chunk.
pub struct ChannelTransport {
    sender: PollSender<Bytes>,
}

/// A connected transport and the body it feeds.
pub fn channel() -> (ChannelTransport, Body) {
    let (tx, rx) = mpsc::channel::<Bytes>(BODY_BUFFER);
    let chunks = stream::unfold(rx, |mut rx| async move {
        let chunk = rx.recv().await?;
        Some((Ok::<Bytes, Infallible>(chunk), rx))
    });

    (
        ChannelTransport {
            sender: PollSender::new(tx),
        },
        Body::from_stream(chunks),
    )
}

fn body_dropped() -> io::Error {
    io::Error::new(io::ErrorKind::BrokenPipe, "response body dropped")
}

impl AsyncWrite for ChannelTransport {
    fn poll_write(
        mut self: Pin<&mut Self>,
        cx: &mut Context<'_>,
        buf: &[u8],
    ) -> Poll<io::Result<usize>> {
        if ready!(self.sender.poll_reserve(cx)).is_err() {
            return Poll::Ready(Err(body_dropped()));
        }
        match self.sender.send_item(Bytes::copy_from_slice(buf)) {
            Ok(()) => Poll::Ready(Ok(buf.len())),
            Err(_) => Poll::Ready(Err(body_dropped())),
        }
    }

    fn poll_flush(self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        // Chunks are handed to hyper as soon as they are sent.
        Poll::Ready(Ok(()))
    }

    fn poll_shutdown(mut self: Pin<&mut Self>, _cx: &mut Context<'_>) -> Poll<io::Result<()>> {
        self.sender.close();
        Poll::Ready(Ok(()))
    }
}

impl Transport for ChannelTransport {
    /// hyper drops the body once the client is gone.
    fn peer_closed(&self) -> bool {
        self.sender.is_closed()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use http_body_util::BodyExt;
    use tokio::io::AsyncWriteExt;

    #[tokio::test]
    async fn test_writes_become_body_chunks() {
        let (mut transport, body) = channel();
        transport.write_all(b"data: a\n").await.unwrap();
        transport.write_all(b"\n").await.unwrap();
        transport.shutdown().await.unwrap();
        assert!(transport.peer_closed());

        let collected = body.collect().await.unwrap().to_bytes();
        assert_eq!(&collected[..], b"data: a\n\n");
    }

    #[tokio::test]
    async fn test_dropped_body_is_reported() {
        let (mut transport, body) = channel();
        assert!(!transport.peer_closed());

        drop(body);
        assert!(transport.peer_closed());
        let err = transport.write_all(b"data: lost\n").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::BrokenPipe);
    }
}
