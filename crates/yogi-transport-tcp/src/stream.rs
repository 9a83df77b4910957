//! C4: a raw byte-stream transport over TCP, with timed/cancelable connect
//! and an idempotent shutdown. This is the un-framed layer that C6's
//! handshake runs directly on, before it's wrapped by [`crate::framing`].

use crate::deadline::run_cancelable;
use crate::error::{map_io_error, SocketOp};
use std::io;
use std::sync::atomic::{AtomicBool, Ordering};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpStream;
use yogi_core::{Cancellation, TimeoutNanos, YogiError};
use yogi_transport::TransportSocketAddr;

/// A connected TCP byte stream. `read`/`write` forward directly to the
/// socket; nothing here enforces per-write deadlines itself, those are
/// rearmed by the heartbeat logic in the connection manager (§4.7).
#[derive(Debug)]
pub struct TcpTransport {
    stream: TcpStream,
    local_addr: TransportSocketAddr,
    peer_addr: TransportSocketAddr,
    shutdown: AtomicBool,
}

impl TcpTransport {
    pub(crate) fn from_stream(stream: TcpStream) -> Result<Self, YogiError> {
        stream
            .set_nodelay(true)
            .map_err(|err| map_io_error(SocketOp::SetOption, err))?;
        let local_addr = stream
            .local_addr()
            .map_err(|err| map_io_error(SocketOp::Open, err))?
            .into();
        let peer_addr = stream
            .peer_addr()
            .map_err(|err| map_io_error(SocketOp::Open, err))?
            .into();
        Ok(Self {
            stream,
            local_addr,
            peer_addr,
            shutdown: AtomicBool::new(false),
        })
    }

    /// Connects to `addr`, governed by `timeout` and cancelable via
    /// `cancellation` (§4.4).
    pub async fn connect(
        addr: TransportSocketAddr,
        timeout: TimeoutNanos,
        cancellation: &Cancellation,
    ) -> Result<Self, YogiError> {
        let stream = run_cancelable(timeout, cancellation, async {
            TcpStream::connect(addr.as_std())
                .await
                .map_err(|err| map_io_error(SocketOp::Connect, err))
        })
        .await?;
        Self::from_stream(stream)
    }

    pub fn local_addr(&self) -> TransportSocketAddr {
        self.local_addr
    }

    pub fn peer_addr(&self) -> TransportSocketAddr {
        self.peer_addr
    }

    pub async fn read(&mut self, buf: &mut [u8]) -> Result<usize, YogiError> {
        self.stream
            .read(buf)
            .await
            .map_err(|err| map_io_error(SocketOp::Rw, err))
    }

    pub async fn write_all(&mut self, buf: &[u8]) -> Result<(), YogiError> {
        self.stream
            .write_all(buf)
            .await
            .map_err(|err| map_io_error(SocketOp::Rw, err))
    }

    /// Closes the socket. Idempotent: a second call is a no-op rather than
    /// an error (§4.4).
    pub async fn shutdown(&mut self) -> Result<(), YogiError> {
        if self.shutdown.swap(true, Ordering::AcqRel) {
            return Ok(());
        }
        match self.stream.shutdown().await {
            Ok(()) => Ok(()),
            Err(err) if err.kind() == io::ErrorKind::NotConnected => Ok(()),
            Err(err) => Err(map_io_error(SocketOp::Rw, err)),
        }
    }

    /// Splits into owned read/write halves so each can be driven by its own
    /// task, consuming `self`. Used by [`crate::framing::MessageTransport`]
    /// to run the writer and reader loops independently.
    pub fn into_split(self) -> (tokio::net::tcp::OwnedReadHalf, tokio::net::tcp::OwnedWriteHalf) {
        self.stream.into_split()
    }
}
