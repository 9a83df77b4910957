//! Session-layer message framing and liveness (§4.7 "Session liveness").
//!
//! Wraps a framed [`MessageTransport`] with the one-byte type discriminant
//! the wire format reserves for session-layer messages (heartbeats carry no
//! header or data) and the heartbeat/inactivity task that keeps the session
//! alive without user traffic.

use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use yogi_core::{Cancellation, YogiError};
use yogi_transport_tcp::MessageTransport;

const MSG_TYPE_HEARTBEAT: u8 = 0;
const MSG_TYPE_DATA: u8 = 1;

/// A live, authenticated connection to a peer: the framed transport plus
/// the heartbeat sender, the inactivity watchdog, and the channel inbound
/// data frames are delivered on (heartbeats are consumed internally and
/// never reach it).
pub struct Session {
    transport: Arc<MessageTransport>,
    sent_since_tick: Arc<AtomicBool>,
    inbound: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    liveness_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
}

impl Session {
    /// Starts the reader and heartbeat/watchdog tasks. `on_lost` fires
    /// exactly once, from whichever task first observes the session end
    /// (peer closed, transport error, or inactivity timeout).
    pub fn start(
        transport: MessageTransport,
        timeout: Duration,
        on_lost: impl FnOnce(YogiError) + Send + 'static,
    ) -> Arc<Self> {
        let transport = Arc::new(transport);
        let sent_since_tick = Arc::new(AtomicBool::new(false));
        let last_activity = Arc::new(Mutex::new(Instant::now()));
        let on_lost = Arc::new(Mutex::new(Some(on_lost)));

        let (inbound_tx, inbound_rx) = mpsc::channel::<Vec<u8>>(64);

        let reader_transport = Arc::clone(&transport);
        let reader_activity = Arc::clone(&last_activity);
        let reader_lost = Arc::clone(&on_lost);
        let reader_task = tokio::spawn(async move {
            let cancellation = Cancellation::new();
            let mut buf = vec![0u8; yogi_transport::DEFAULT_MAX_MESSAGE_SIZE as usize];
            loop {
                match reader_transport.receive_async(&mut buf, &cancellation).await {
                    Ok(len) if len == 0 => continue,
                    Ok(len) => {
                        *reader_activity.lock() = Instant::now();
                        match buf[0] {
                            MSG_TYPE_HEARTBEAT => {}
                            _ => {
                                if inbound_tx.send(buf[1..len].to_vec()).await.is_err() {
                                    return;
                                }
                            }
                        }
                    }
                    Err(err) => {
                        fire_lost(&reader_lost, err);
                        return;
                    }
                }
            }
        });

        let heartbeat_transport = Arc::clone(&transport);
        let heartbeat_sent = Arc::clone(&sent_since_tick);
        let heartbeat_activity = Arc::clone(&last_activity);
        let heartbeat_lost = Arc::clone(&on_lost);
        let period = (timeout / 2).max(Duration::from_millis(1));
        let liveness_task = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            interval.set_missed_tick_behavior(MissedTickBehavior::Delay);
            loop {
                interval.tick().await;
                if heartbeat_activity.lock().elapsed() > timeout {
                    fire_lost(&heartbeat_lost, YogiError::Timeout);
                    return;
                }
                if !heartbeat_sent.swap(false, Ordering::AcqRel) {
                    match heartbeat_transport.try_send(&[MSG_TYPE_HEARTBEAT]) {
                        Ok(_) => {}
                        Err(err) => {
                            fire_lost(&heartbeat_lost, err);
                            return;
                        }
                    }
                }
            }
        });

        Arc::new(Self {
            transport,
            sent_since_tick,
            inbound: tokio::sync::Mutex::new(inbound_rx),
            liveness_task,
            reader_task,
        })
    }

    /// Non-blocking send of a data frame (§4.8 `try_send`-style semantics).
    pub fn try_send(&self, payload: &[u8]) -> Result<bool, YogiError> {
        self.sent_since_tick.store(true, Ordering::Release);
        self.transport.try_send(&framed(payload))
    }

    /// Accepts unconditionally, completing once queue space frees.
    pub async fn send_async(&self, payload: &[u8], cancellation: &Cancellation) -> Result<(), YogiError> {
        self.sent_since_tick.store(true, Ordering::Release);
        self.transport.send_async(&framed(payload), cancellation).await
    }

    /// Completes on the next inbound data frame (heartbeats are filtered
    /// out by the reader task before they ever reach this channel).
    pub async fn receive_data(
        &self,
        buf: &mut [u8],
        cancellation: &Cancellation,
    ) -> Result<usize, YogiError> {
        let mut guard = self.inbound.lock().await;
        let frame = yogi_transport_tcp::run_cancelable(
            yogi_core::TimeoutNanos::INFINITE,
            cancellation,
            async { guard.recv().await.ok_or(YogiError::RwSocketFailed("session closed".to_string())) },
        )
        .await?;
        if frame.len() > buf.len() {
            return Err(YogiError::BufferTooSmall);
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    pub fn close(&self) {
        self.transport.close();
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        self.liveness_task.abort();
        self.reader_task.abort();
    }
}

fn framed(payload: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(1 + payload.len());
    out.push(MSG_TYPE_DATA);
    out.extend_from_slice(payload);
    out
}

fn fire_lost(slot: &Mutex<Option<impl FnOnce(YogiError) + Send>>, err: YogiError) {
    if let Some(callback) = slot.lock().take() {
        callback(err);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::AtomicU32;
    use yogi_transport_tcp::{TcpAcceptor, TcpTransport};

    async fn connected_pair() -> (TcpTransport, TcpTransport) {
        let addr: yogi_transport::TransportSocketAddr =
            "127.0.0.1:0".parse::<std::net::SocketAddr>().unwrap().into();
        let acceptor = TcpAcceptor::bind(addr).await.unwrap();
        let addr = acceptor.local_addr();
        let cancellation = Cancellation::new();
        let (accepted, connected) = tokio::join!(
            acceptor.accept(yogi_core::TimeoutNanos::INFINITE, &cancellation),
            TcpTransport::connect(addr, yogi_core::TimeoutNanos::INFINITE, &cancellation),
        );
        (accepted.unwrap(), connected.unwrap())
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn heartbeats_alone_keep_a_session_alive_past_its_timeout() {
        let (server, client) = connected_pair().await;
        let timeout = Duration::from_millis(80);
        let server_mt = MessageTransport::new(server, 8, 8, yogi_transport::DEFAULT_MAX_MESSAGE_SIZE);
        let client_mt = MessageTransport::new(client, 8, 8, yogi_transport::DEFAULT_MAX_MESSAGE_SIZE);

        let lost_count = Arc::new(AtomicU32::new(0));
        let server_lost = Arc::clone(&lost_count);
        let client_lost = Arc::clone(&lost_count);
        let _server_session = Session::start(server_mt, timeout, move |_| {
            server_lost.fetch_add(1, Ordering::SeqCst);
        });
        let _client_session = Session::start(client_mt, timeout, move |_| {
            client_lost.fetch_add(1, Ordering::SeqCst);
        });

        // No user traffic at all for 3x the timeout; heartbeats alone must
        // keep both sides from declaring the session lost.
        tokio::time::sleep(timeout * 3).await;
        assert_eq!(lost_count.load(Ordering::SeqCst), 0);
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn a_silent_peer_is_declared_lost_within_timeout_plus_margin() {
        let (server, client) = connected_pair().await;
        let timeout = Duration::from_millis(60);
        let server_mt = MessageTransport::new(server, 8, 8, yogi_transport::DEFAULT_MAX_MESSAGE_SIZE);

        let (lost_tx, mut lost_rx) = tokio::sync::oneshot::channel();
        let lost_tx = Mutex::new(Some(lost_tx));
        let _server_session = Session::start(server_mt, timeout, move |err| {
            if let Some(tx) = lost_tx.lock().take() {
                let _ = tx.send(err);
            }
        });

        // Drop the client's transport outright instead of keeping its
        // liveness task alive, so the server never receives another
        // heartbeat.
        drop(client);

        let result = tokio::time::timeout(timeout * 4, &mut lost_rx).await;
        assert!(result.is_ok(), "session was not declared lost within the margin");
    }
}
