//! C8: broadcast fan-out and inbound delivery over every currently running
//! session (§4.8).
//!
//! Each peer's outbound queue is independent, so one slow or blacklisted
//! peer never blocks delivery to the rest: `try_broadcast` is best-effort
//! per peer, `broadcast_async` fans out and waits on whichever peers are
//! still behind, cancelable as a whole via its `OperationId` or the
//! caller's [`Cancellation`]. Inbound broadcasts from every session are
//! merged into a single at-most-one-outstanding receive, matching C3's
//! "one receiver at a time" discipline one layer up.

use crate::connection::ConnectionState;
use crate::manager::ConnectionManager;
use crate::session::Session;
use dashmap::DashMap;
use futures::future::join_all;
use std::sync::Arc;
use yogi_core::{BranchUuid, Cancellation, OperationId, YogiError};

/// Non-blocking fan-out: accepts into every session's queue that has room
/// right now, leaving the rest untouched. Returns the UUIDs that did *not*
/// accept the payload (§4.8: "retry or drop is the caller's choice, never
/// the branch's").
pub fn try_broadcast(manager: &ConnectionManager, payload: &[u8]) -> Vec<BranchUuid> {
    let mut not_delivered = Vec::new();
    for (uuid, session) in running_sessions(manager) {
        match session.try_send(payload) {
            Ok(true) => {}
            Ok(false) | Err(_) => not_delivered.push(uuid),
        }
    }
    not_delivered
}

/// Blocking fan-out (§4.8 `send_broadcast(data, block)`). If `block`,
/// waits until every currently running session has accepted the payload;
/// otherwise behaves like [`try_broadcast`] but reports `TxQueueFull` as
/// soon as any session would have blocked.
pub async fn send_broadcast(
    manager: &ConnectionManager,
    payload: &[u8],
    block: bool,
    cancellation: &Cancellation,
) -> Result<(), YogiError> {
    if !block {
        return if try_broadcast(manager, payload).is_empty() {
            Ok(())
        } else {
            Err(YogiError::TxQueueFull)
        };
    }
    let results = broadcast_async(manager, payload, cancellation).await;
    results
        .into_iter()
        .find_map(|(_, result)| result.err())
        .map_or(Ok(()), Err)
}

/// Registry of in-flight `send_broadcast_async` operations, keyed by the
/// `OperationId` handed back to the caller, so `cancel_send_broadcast` can
/// reach a specific one without tearing down every outstanding broadcast.
#[derive(Default)]
pub struct BroadcastOperations {
    cancellations: DashMap<OperationId, Cancellation>,
}

impl BroadcastOperations {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self, op_id: OperationId) {
        if let Some((_, cancellation)) = self.cancellations.remove(&op_id) {
            cancellation.cancel();
        }
    }

    fn register(&self, op_id: OperationId, cancellation: Cancellation) {
        self.cancellations.insert(op_id, cancellation);
    }

    fn forget(&self, op_id: OperationId) {
        self.cancellations.remove(&op_id);
    }
}

/// Fans a payload out to every session currently running and waits for all
/// of them to accept it, skip it, or fail, tracked under `op_id` so the
/// caller may cancel the whole operation via [`BroadcastOperations::cancel`].
///
/// When `retry` is `false`, a session whose queue is already full at issue
/// time is skipped immediately rather than waited on (§4.8).
pub async fn broadcast_async_tracked(
    manager: &ConnectionManager,
    operations: &BroadcastOperations,
    op_id: OperationId,
    payload: &[u8],
    retry: bool,
    parent_cancellation: &Cancellation,
) -> Vec<(BranchUuid, Result<(), YogiError>)> {
    let op_cancellation = Cancellation::new();
    operations.register(op_id, op_cancellation.clone());

    let sessions = running_sessions(manager);
    let sends = sessions.into_iter().map(|(uuid, session)| {
        let op_cancellation = op_cancellation.clone();
        let parent_cancellation = parent_cancellation.clone();
        async move {
            if !retry {
                match session.try_send(payload) {
                    Ok(true) => return (uuid, Ok(())),
                    Ok(false) => return (uuid, Ok(())),
                    Err(err) => return (uuid, Err(err)),
                }
            }
            if parent_cancellation.is_cancelled() || op_cancellation.is_cancelled() {
                return (uuid, Err(YogiError::Canceled));
            }
            let result = session.send_async(payload, &op_cancellation).await;
            (uuid, result)
        }
    });
    let results = join_all(sends).await;
    operations.forget(op_id);
    results
}

/// Fans a payload out to every session currently running and waits for all
/// of them to accept it (or fail), without per-operation cancellation
/// tracking — used by [`send_broadcast`]'s blocking path.
pub async fn broadcast_async(
    manager: &ConnectionManager,
    payload: &[u8],
    cancellation: &Cancellation,
) -> Vec<(BranchUuid, Result<(), YogiError>)> {
    let sends = running_sessions(manager)
        .into_iter()
        .map(|(uuid, session)| async move { (uuid, session.send_async(payload, cancellation).await) });
    join_all(sends).await
}

/// Completes on the next inbound broadcast from any session (§4.8
/// `receive_broadcast`): races every currently running session's receive
/// and returns whichever completes first, together with the sender's
/// UUID. At-most-one-outstanding is the caller's responsibility (`Branch`
/// serializes this through its own single-slot guard).
pub async fn receive_broadcast(
    manager: &ConnectionManager,
    buf: &mut [u8],
    cancellation: &Cancellation,
) -> Result<(BranchUuid, usize), YogiError> {
    loop {
        let sessions = running_sessions(manager);
        if sessions.is_empty() {
            if cancellation.is_cancelled() {
                return Err(YogiError::Canceled);
            }
            tokio::time::sleep(std::time::Duration::from_millis(20)).await;
            continue;
        }

        let receives = sessions.into_iter().map(|(uuid, session)| {
            let cancellation = cancellation.clone();
            async move {
                let mut scratch = vec![0u8; yogi_transport::DEFAULT_MAX_MESSAGE_SIZE as usize];
                let result = session.receive_data(&mut scratch, &cancellation).await;
                (uuid, result, scratch)
            }
        });
        let boxed: Vec<_> = receives.map(Box::pin).collect();
        let ((uuid, result, scratch), _, _rest) = futures::future::select_all(boxed).await;
        match result {
            Ok(len) => {
                if len > buf.len() {
                    return Err(YogiError::BufferTooSmall);
                }
                buf[..len].copy_from_slice(&scratch[..len]);
                return Ok((uuid, len));
            }
            Err(YogiError::RwSocketFailed(_)) => continue,
            Err(err) => return Err(err),
        }
    }
}

/// Clones out an `Arc` handle per live session rather than holding the
/// connection map's shard lock across an await point.
fn running_sessions(manager: &ConnectionManager) -> Vec<(BranchUuid, Arc<Session>)> {
    manager
        .peers_ref()
        .iter()
        .filter(|entry| entry.connection.state == ConnectionState::SessionRunning)
        .filter_map(|entry| entry.connection.session.clone().map(|session| (*entry.key(), session)))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn canceling_an_unregistered_operation_is_a_no_op() {
        let operations = BroadcastOperations::new();
        operations.cancel(OperationId::from_raw(1));
    }

    #[test]
    fn cancel_marks_the_registered_token_and_forgets_it() {
        let operations = BroadcastOperations::new();
        let op_id = OperationId::from_raw(1);
        let cancellation = Cancellation::new();
        operations.register(op_id, cancellation.clone());

        operations.cancel(op_id);
        assert!(cancellation.is_cancelled());

        // Already forgotten: canceling again reaches no token and is safe.
        operations.cancel(op_id);
    }

    #[test]
    fn forgetting_an_operation_leaves_its_cancellation_untouched() {
        let operations = BroadcastOperations::new();
        let op_id = OperationId::from_raw(1);
        let cancellation = Cancellation::new();
        operations.register(op_id, cancellation.clone());

        operations.forget(op_id);
        assert!(!cancellation.is_cancelled());

        // The entry is gone, so a later cancel for the same id is a no-op.
        operations.cancel(op_id);
        assert!(!cancellation.is_cancelled());
    }

    #[test]
    fn distinct_operations_cancel_independently() {
        let operations = BroadcastOperations::new();
        let a = OperationId::from_raw(1);
        let b = OperationId::from_raw(2);
        let cancel_a = Cancellation::new();
        let cancel_b = Cancellation::new();
        operations.register(a, cancel_a.clone());
        operations.register(b, cancel_b.clone());

        operations.cancel(a);
        assert!(cancel_a.is_cancelled());
        assert!(!cancel_b.is_cancelled());
    }
}
