//! C3: length-prefixed message framing over a [`TcpTransport`], with bounded
//! send/receive queues providing backpressure.
//!
//! The outbound and inbound queues are each driven by a background task so
//! that framing and socket I/O happen off the caller's await point; the
//! bounded `mpsc` channels are the ring buffers from §4.3 (their capacity is
//! expressed in frames rather than raw bytes, a simplification over the
//! byte-accounted ring buffer the spec describes — see DESIGN.md).

use crate::deadline::run_cancelable;
use crate::error::{map_io_error, SocketOp};
use crate::stream::TcpTransport;
use crate::varint;
use parking_lot::Mutex;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use yogi_core::{Cancellation, TimeoutNanos, YogiError};
use yogi_transport::DEFAULT_MAX_MESSAGE_SIZE;

struct Shared {
    closed: AtomicBool,
    terminal_error: Mutex<Option<YogiError>>,
    receiving: AtomicBool,
}

impl Shared {
    fn latch_error(&self, err: YogiError) -> YogiError {
        let mut slot = self.terminal_error.lock();
        if slot.is_none() {
            *slot = Some(clone_error(&err));
        }
        self.closed.store(true, Ordering::Release);
        err
    }

    fn check_closed(&self) -> Result<(), YogiError> {
        if self.closed.load(Ordering::Acquire) {
            let slot = self.terminal_error.lock();
            return Err(slot.as_ref().map(clone_error).unwrap_or(YogiError::Unknown(
                "message transport closed".to_string(),
            )));
        }
        Ok(())
    }
}

fn clone_error(err: &YogiError) -> YogiError {
    // `YogiError` doesn't derive `Clone` (it isn't meant to be duplicated as
    // a live error value across the handle boundary); re-render it as an
    // `Unknown` wrapping the original message for the rare case a second
    // caller needs to observe the same terminal failure.
    YogiError::Unknown(err.to_string())
}

/// A framed, backpressure-aware message transport (§4.3) built on top of a
/// connected [`TcpTransport`] (§4.4).
pub struct MessageTransport {
    to_writer: mpsc::Sender<Vec<u8>>,
    from_reader: tokio::sync::Mutex<mpsc::Receiver<Vec<u8>>>,
    shared: Arc<Shared>,
    writer_task: JoinHandle<()>,
    reader_task: JoinHandle<()>,
    max_message_size: u32,
}

impl MessageTransport {
    /// Wraps `transport` with framing. `tx_queue_size`/`rx_queue_size` bound
    /// the number of whole frames that may be buffered in each direction
    /// before `try_send` starts refusing or reads stall.
    pub fn new(
        transport: TcpTransport,
        tx_queue_size: usize,
        rx_queue_size: usize,
        max_message_size: u32,
    ) -> Self {
        let (mut read_half, mut write_half) = split(transport);
        let shared = Arc::new(Shared {
            closed: AtomicBool::new(false),
            terminal_error: Mutex::new(None),
            receiving: AtomicBool::new(false),
        });

        let (to_writer, mut writer_rx) = mpsc::channel::<Vec<u8>>(tx_queue_size.max(1));
        let writer_shared = Arc::clone(&shared);
        let writer_task = tokio::spawn(async move {
            while let Some(payload) = writer_rx.recv().await {
                let mut framed = Vec::with_capacity(varint::MAX_ENCODED_LEN + payload.len());
                varint::encode(payload.len() as u32, &mut framed);
                framed.extend_from_slice(&payload);
                if let Err(err) = write_half.write_all(&framed).await {
                    writer_shared.latch_error(err);
                    return;
                }
            }
        });

        let (frame_tx, frame_rx) = mpsc::channel::<Vec<u8>>(rx_queue_size.max(1));
        let reader_shared = Arc::clone(&shared);
        let reader_task = tokio::spawn(async move {
            let mut buf = Vec::new();
            loop {
                match read_frame(&mut read_half, &mut buf, max_message_size).await {
                    Ok(Some(frame)) => {
                        if frame_tx.send(frame).await.is_err() {
                            return;
                        }
                    }
                    Ok(None) => {
                        reader_shared.latch_error(YogiError::RwSocketFailed(
                            "peer closed the connection".to_string(),
                        ));
                        return;
                    }
                    Err(err) => {
                        reader_shared.latch_error(err);
                        return;
                    }
                }
            }
        });

        Self {
            to_writer,
            from_reader: tokio::sync::Mutex::new(frame_rx),
            shared,
            writer_task,
            reader_task,
            max_message_size,
        }
    }

    /// Non-blocking send (§4.3): enqueues and returns `true` if the whole
    /// frame fits in the remaining queue capacity right now, otherwise
    /// returns `false` without enqueuing anything.
    pub fn try_send(&self, payload: &[u8]) -> Result<bool, YogiError> {
        self.shared.check_closed()?;
        if payload.len() as u64 > self.max_message_size as u64 {
            return Err(YogiError::MessageTooLarge);
        }
        match self.to_writer.try_send(payload.to_vec()) {
            Ok(()) => Ok(true),
            Err(mpsc::error::TrySendError::Full(_)) => Ok(false),
            Err(mpsc::error::TrySendError::Closed(_)) => Err(self
                .shared
                .check_closed()
                .err()
                .unwrap_or_else(|| self.shared.latch_error(YogiError::RwSocketFailed(
                    "message transport closed".to_string(),
                )))),
        }
    }

    /// Accepts unconditionally, completing once space frees; cancelable via
    /// `cancellation` (§4.3).
    pub async fn send_async(
        &self,
        payload: &[u8],
        cancellation: &Cancellation,
    ) -> Result<(), YogiError> {
        self.shared.check_closed()?;
        if payload.len() as u64 > self.max_message_size as u64 {
            return Err(YogiError::MessageTooLarge);
        }
        let sender = self.to_writer.clone();
        let payload = payload.to_vec();
        run_cancelable(TimeoutNanos::INFINITE, cancellation, async move {
            sender
                .send(payload)
                .await
                .map_err(|_| YogiError::RwSocketFailed("message transport closed".to_string()))
        })
        .await
    }

    /// Completes when a whole message has been reassembled, copying it into
    /// `buf` and returning its size. At most one outstanding call at a time
    /// (§4.3 invariant); a concurrent call fails with `Busy`.
    pub async fn receive_async(
        &self,
        buf: &mut [u8],
        cancellation: &Cancellation,
    ) -> Result<usize, YogiError> {
        if self
            .shared
            .receiving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(YogiError::Busy);
        }
        let result = self.receive_async_inner(buf, cancellation).await;
        self.shared.receiving.store(false, Ordering::Release);
        result
    }

    async fn receive_async_inner(
        &self,
        buf: &mut [u8],
        cancellation: &Cancellation,
    ) -> Result<usize, YogiError> {
        self.shared.check_closed()?;
        let mut guard = self.from_reader.lock().await;
        let shared = &self.shared;
        let frame = run_cancelable(TimeoutNanos::INFINITE, cancellation, async {
            guard.recv().await.ok_or_else(|| {
                shared.check_closed().err().unwrap_or_else(|| {
                    shared.latch_error(YogiError::RwSocketFailed(
                        "message transport closed".to_string(),
                    ))
                })
            })
        })
        .await?;
        if frame.len() > buf.len() {
            self.shared.latch_error(YogiError::BufferTooSmall);
            return Err(YogiError::BufferTooSmall);
        }
        buf[..frame.len()].copy_from_slice(&frame);
        Ok(frame.len())
    }

    /// Shuts the underlying transport down and aborts the background tasks.
    /// Any pending `send_async`/`receive_async` completes with a terminal
    /// error rather than hanging.
    pub fn close(&self) {
        self.shared.latch_error(YogiError::Canceled);
        self.writer_task.abort();
        self.reader_task.abort();
    }
}

impl Drop for MessageTransport {
    fn drop(&mut self) {
        self.writer_task.abort();
        self.reader_task.abort();
    }
}

/// Split into independent read/write halves driven by their own tasks.
/// `TcpTransport` only exposes `&mut self` I/O, so we hand each half a
/// private `tokio::net::tcp::OwnedReadHalf`/`OwnedWriteHalf` instead.
fn split(transport: TcpTransport) -> (ReadHalf, WriteHalf) {
    let (read, write) = transport.into_split();
    (ReadHalf(read), WriteHalf(write))
}

struct ReadHalf(tokio::net::tcp::OwnedReadHalf);
struct WriteHalf(tokio::net::tcp::OwnedWriteHalf);

impl WriteHalf {
    async fn write_all(&mut self, buf: &[u8]) -> Result<(), YogiError> {
        use tokio::io::AsyncWriteExt;
        self.0
            .write_all(buf)
            .await
            .map_err(|err| map_io_error(SocketOp::Rw, err))
    }
}

/// Reads one length-prefixed frame. Returns `Ok(None)` on a clean EOF with
/// no partial frame pending.
async fn read_frame(
    read_half: &mut ReadHalf,
    carry: &mut Vec<u8>,
    max_message_size: u32,
) -> Result<Option<Vec<u8>>, YogiError> {
    use tokio::io::AsyncReadExt;

    loop {
        if let Some((len, consumed)) = varint::decode(carry) {
            if len > max_message_size {
                return Err(YogiError::MessageTooLarge);
            }
            let total = consumed + len as usize;
            if carry.len() >= total {
                let frame = carry[consumed..total].to_vec();
                carry.drain(..total);
                return Ok(Some(frame));
            }
        }

        let mut chunk = [0u8; 4096];
        let read = read_half
            .0
            .read(&mut chunk)
            .await
            .map_err(|err| map_io_error(SocketOp::Rw, err))?;
        if read == 0 {
            return if carry.is_empty() {
                Ok(None)
            } else {
                Err(YogiError::RwSocketFailed(
                    "connection closed mid-frame".to_string(),
                ))
            };
        }
        carry.extend_from_slice(&chunk[..read]);
    }
}
