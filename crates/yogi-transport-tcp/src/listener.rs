//! C4 acceptor half: binds a listening socket and accepts inbound
//! connections under a deadline.

use crate::deadline::run_cancelable;
use crate::error::{map_io_error, SocketOp};
use crate::stream::TcpTransport;
use tokio::net::TcpListener as TokioTcpListener;
use yogi_core::{Cancellation, TimeoutNanos, YogiError};
use yogi_transport::TransportSocketAddr;

#[derive(Debug)]
pub struct TcpAcceptor {
    inner: TokioTcpListener,
    local_addr: TransportSocketAddr,
}

impl TcpAcceptor {
    pub async fn bind(addr: TransportSocketAddr) -> Result<Self, YogiError> {
        let inner = TokioTcpListener::bind(addr.as_std())
            .await
            .map_err(|err| map_io_error(SocketOp::Bind, err))?;
        let local_addr = inner
            .local_addr()
            .map_err(|err| map_io_error(SocketOp::Bind, err))?
            .into();
        Ok(Self { inner, local_addr })
    }

    pub fn local_addr(&self) -> TransportSocketAddr {
        self.local_addr
    }

    /// Accepts one inbound connection, governed by `timeout` and cancelable
    /// via `cancellation` (§4.4). The acceptor itself keeps listening across
    /// calls; only this one accept is bounded.
    pub async fn accept(
        &self,
        timeout: TimeoutNanos,
        cancellation: &Cancellation,
    ) -> Result<TcpTransport, YogiError> {
        let stream = run_cancelable(timeout, cancellation, async {
            let (stream, _peer) = self
                .inner
                .accept()
                .await
                .map_err(|err| map_io_error(SocketOp::Accept, err))?;
            Ok(stream)
        })
        .await?;
        TcpTransport::from_stream(stream)
    }
}
