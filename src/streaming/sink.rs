//! Output sink: one writable transport plus a non-blocking peer liveness check.
//!
//! Writes go straight to the transport (no buffering layer) and every write is bounded by
//! an optional timeout so a stuck client cannot wedge the drive loop.

use nix::errno::Errno;
use nix::fcntl::{fcntl, FcntlArg, OFlag};
use nix::sys::socket::{getsockopt, recv, sockopt::SockType, MsgFlags};
use std::io;
use std::os::unix::io::{AsRawFd, OwnedFd, RawFd};
use std::time::Duration;
use tokio::io::{AsyncWrite, AsyncWriteExt, DuplexStream, Stdout};
use tokio::net::{TcpStream, UnixStream};

use crate::error::StreamError;
use crate::metrics;

/// A byte transport the engine can stream into.
pub trait Transport: AsyncWrite + Unpin + Send {
    /// Whether the remote peer has gone away. Must not block.
    fn peer_closed(&self) -> bool {
        false
    }
}

impl Transport for TcpStream {
    fn peer_closed(&self) -> bool {
        socket_peer_closed(self.as_raw_fd())
    }
}

impl Transport for UnixStream {
    fn peer_closed(&self) -> bool {
        socket_peer_closed(self.as_raw_fd())
    }
}

impl Transport for Stdout {}

impl Transport for DuplexStream {}

impl Transport for Vec<u8> {}

/// Peek one byte without blocking: EOF or a hard error means the peer is gone.
fn socket_peer_closed(fd: RawFd) -> bool {
    let mut buf = [0u8; 1];
    match recv(fd, &mut buf, MsgFlags::MSG_PEEK | MsgFlags::MSG_DONTWAIT) {
        Ok(0) => true,
        Ok(_) => false,
        Err(Errno::EAGAIN) | Err(Errno::EINTR) => false,
        Err(_) => true,
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Ownership {
    /// Supplied by the caller, who stays responsible for closing it.
    External,
    /// Opened by the sink itself and shut down by [`OutputSink::close`].
    Internal,
}

/// Exclusive handle on the transport a stream writes to.
pub struct OutputSink<T> {
    transport: T,
    ownership: Ownership,
    write_timeout: Option<Duration>,
    bytes_written: u64,
}

impl<T: Transport> OutputSink<T> {
    /// Bind a caller-supplied transport.
    pub fn new(transport: T) -> Self {
        Self {
            transport,
            ownership: Ownership::External,
            write_timeout: None,
            bytes_written: 0,
        }
    }

    /// Bound every write (and flush) by `timeout`.
    pub fn with_write_timeout(mut self, timeout: Duration) -> Self {
        self.write_timeout = Some(timeout);
        self
    }

    /// Whether the sink opened its transport itself.
    pub fn is_internal(&self) -> bool {
        self.ownership == Ownership::Internal
    }

    pub fn bytes_written(&self) -> u64 {
        self.bytes_written
    }

    pub fn get_ref(&self) -> &T {
        &self.transport
    }

    pub fn peer_closed(&self) -> bool {
        self.transport.peer_closed()
    }

    /// Write all of `data`.
    pub async fn write(&mut self, data: &[u8]) -> io::Result<()> {
        with_timeout(self.write_timeout, self.transport.write_all(data), "Write timeout").await?;

        self.bytes_written += data.len() as u64;
        metrics::record_bytes_sent(data.len() as u64);
        Ok(())
    }

    /// Push anything buffered below us to the transport now.
    pub async fn flush(&mut self) -> io::Result<()> {
        with_timeout(self.write_timeout, self.transport.flush(), "Flush timeout").await
    }

    /// Release the sink. Internal transports are flushed and shut down; external ones
    /// are only flushed and left to their owner.
    pub async fn close(mut self) -> io::Result<()> {
        self.flush().await?;
        if self.is_internal() {
            with_timeout(self.write_timeout, self.transport.shutdown(), "Shutdown timeout").await?;
        }
        Ok(())
    }

    /// Hand the transport back to the caller.
    pub fn into_inner(self) -> T {
        self.transport
    }
}

impl OutputSink<Stdout> {
    /// Default sink: process standard output, owned by the sink.
    pub fn stdout() -> Self {
        Self {
            transport: tokio::io::stdout(),
            ownership: Ownership::Internal,
            write_timeout: None,
            bytes_written: 0,
        }
    }
}

impl OutputSink<TcpStream> {
    /// Adopt a raw descriptor, e.g. a client socket handed over by another process.
    ///
    /// The descriptor must be a stream socket open for writing; anything else fails with
    /// [`StreamError::InvalidSinkResource`]. Must be called inside a tokio runtime.
    pub fn from_fd(fd: OwnedFd) -> Result<Self, StreamError> {
        validate_writable_stream(&fd)?;

        let std_stream = std::net::TcpStream::from(fd);
        std_stream.set_nonblocking(true)?;
        let stream = TcpStream::from_std(std_stream)?;

        Ok(Self::new(stream))
    }
}

fn validate_writable_stream(fd: &OwnedFd) -> Result<(), StreamError> {
    let sock_type = getsockopt(fd, SockType)
        .map_err(|_| StreamError::InvalidSinkResource("a non-socket descriptor".to_string()))?;

    if sock_type != nix::sys::socket::SockType::Stream {
        return Err(StreamError::InvalidSinkResource(format!(
            "a {:?} socket",
            sock_type
        )));
    }

    let flags = fcntl(fd.as_raw_fd(), FcntlArg::F_GETFL)
        .map_err(|e| StreamError::InvalidSinkResource(format!("an unusable descriptor ({})", e)))?;
    if OFlag::from_bits_truncate(flags) & OFlag::O_ACCMODE == OFlag::O_RDONLY {
        return Err(StreamError::InvalidSinkResource(
            "a read-only descriptor".to_string(),
        ));
    }

    Ok(())
}

async fn with_timeout<F>(timeout: Option<Duration>, fut: F, what: &str) -> io::Result<()>
where
    F: std::future::Future<Output = io::Result<()>>,
{
    match timeout {
        Some(limit) => tokio::time::timeout(limit, fut)
            .await
            .map_err(|_| io::Error::new(io::ErrorKind::TimedOut, what.to_string()))?,
        None => fut.await,
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_vec_sink_collects_bytes() {
        let mut sink = OutputSink::new(Vec::new());
        sink.write(b"data: x\n").await.unwrap();
        sink.write(b"\n\n").await.unwrap();
        sink.flush().await.unwrap();

        assert!(!sink.is_internal());
        assert!(!sink.peer_closed());
        assert_eq!(sink.bytes_written(), 10);
        assert_eq!(sink.into_inner(), b"data: x\n\n\n");
    }

    #[tokio::test]
    async fn test_stdout_sink_is_internal() {
        let sink = OutputSink::stdout();
        assert!(sink.is_internal());
    }

    #[tokio::test(start_paused = true)]
    async fn test_write_timeout() {
        // A duplex pipe with a 4 byte buffer and nobody reading stalls the writer.
        let (writer, _reader) = tokio::io::duplex(4);
        let mut sink = OutputSink::new(writer).with_write_timeout(Duration::from_secs(1));

        let err = sink.write(b"more than four bytes").await.unwrap_err();
        assert_eq!(err.kind(), io::ErrorKind::TimedOut);
    }

    #[tokio::test]
    async fn test_tcp_peer_closed() {
        let listener = tokio::net::TcpListener::bind("127.0.0.1:0").await.unwrap();
        let addr = listener.local_addr().unwrap();
        let client = TcpStream::connect(addr).await.unwrap();
        let (server, _) = listener.accept().await.unwrap();

        let sink = OutputSink::new(server);
        assert!(!sink.peer_closed());

        drop(client);
        // The FIN may take a moment to arrive on loopback.
        let mut closed = false;
        for _ in 0..50 {
            if sink.peer_closed() {
                closed = true;
                break;
            }
            tokio::time::sleep(Duration::from_millis(10)).await;
        }
        assert!(closed);
    }
}
