//! C9: the public branch facade — construction, info/connection queries,
//! the event subscription, and broadcast send/receive entry points.

use crate::broadcast;
use crate::events::{BranchEvent, BranchEventKind};
use crate::handshake::{empty_password_hash, hash_password};
use crate::info::{LocalBranchInfo, RemoteBranchInfo};
use crate::manager::ConnectionManager;
use parking_lot::Mutex;
use std::net::{IpAddr, Ipv6Addr, SocketAddr};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, SystemTime};
use tokio::sync::mpsc;
use yogi_core::{BranchUuid, Cancellation, OperationId, YogiError};
use yogi_transport::AdvertisingInterface;

/// The default multicast group and port a branch advertises on and listens
/// for advertisements on unless told otherwise (§4.9): an IPv6 link-local
/// multicast address, since that needs no router configuration on a LAN.
pub const DEFAULT_ADVERTISING_PORT: u16 = 13_531;
pub const DEFAULT_ADVERTISING_GROUP: Ipv6Addr = Ipv6Addr::new(0xff02, 0, 0, 0, 0, 0, 0x1, 0x3e);

/// Construction parameters for a new branch (§3). `None` fields fall back
/// to the documented defaults rather than failing validation.
pub struct BranchConfig {
    pub name: Option<String>,
    pub description: String,
    pub net_name: Option<String>,
    pub path: Option<String>,
    pub tcp_server_endpoint: SocketAddr,
    pub advertising_interfaces: Vec<AdvertisingInterface>,
    pub advertising_interval: Option<Duration>,
    pub ghost_mode: bool,
    pub timeout: Duration,
    pub tx_queue_size: usize,
    pub rx_queue_size: usize,
    pub password: Option<String>,
}

impl Default for BranchConfig {
    fn default() -> Self {
        Self {
            name: None,
            description: String::new(),
            net_name: None,
            path: None,
            tcp_server_endpoint: SocketAddr::new(IpAddr::V6(Ipv6Addr::UNSPECIFIED), 0),
            advertising_interfaces: vec![AdvertisingInterface {
                bind_addr: IpAddr::V6(Ipv6Addr::UNSPECIFIED),
                multicast_group: IpAddr::V6(DEFAULT_ADVERTISING_GROUP),
                port: DEFAULT_ADVERTISING_PORT,
            }],
            advertising_interval: Some(Duration::from_secs(1)),
            ghost_mode: false,
            timeout: Duration::from_secs(3),
            tx_queue_size: 32,
            rx_queue_size: 32,
            password: None,
        }
    }
}

struct EventSubscription {
    kind: BranchEventKind,
    sender: mpsc::Sender<BranchEvent>,
}

/// A running branch: one advertising/discovery/connection-manager instance
/// plus the event subscription currently registered on it (§4.8: only one
/// handler may be registered at a time).
pub struct Branch {
    info: Arc<LocalBranchInfo>,
    manager: ConnectionManager,
    subscription: Arc<Mutex<Option<EventSubscription>>>,
    _event_pump: tokio::task::JoinHandle<()>,
    /// Enforces C3's "at most one outstanding receive" invariant one layer
    /// up, across every session rather than just one.
    receiving: AtomicBool,
}

impl Branch {
    pub async fn new(config: BranchConfig) -> Result<Self, YogiError> {
        let hostname = hostname();
        let pid = std::process::id();
        let name = config
            .name
            .unwrap_or_else(|| format!("{pid}@{hostname}"));
        let net_name = config.net_name.unwrap_or_else(|| hostname.clone());
        let path = config.path.unwrap_or_else(|| format!("/{name}"));
        let password_hash = match config.password {
            Some(password) if !password.is_empty() => hash_password(&password),
            _ => empty_password_hash(),
        };

        let info = Arc::new(LocalBranchInfo {
            uuid: BranchUuid::generate(),
            name,
            description: config.description,
            net_name,
            path,
            hostname,
            pid,
            tcp_server_endpoint: config.tcp_server_endpoint,
            advertising_endpoint: SocketAddr::new(
                IpAddr::V6(DEFAULT_ADVERTISING_GROUP),
                DEFAULT_ADVERTISING_PORT,
            ),
            advertising_interfaces: config.advertising_interfaces,
            start_time: SystemTime::now(),
            timeout: config.timeout,
            advertising_interval: if config.ghost_mode {
                None
            } else {
                config.advertising_interval
            },
            ghost_mode: config.ghost_mode,
            tx_queue_size: config.tx_queue_size,
            rx_queue_size: config.rx_queue_size,
            password_hash,
        });
        info.validate()?;

        let subscription: Arc<Mutex<Option<EventSubscription>>> = Arc::new(Mutex::new(None));
        let (raw_events_tx, mut raw_events_rx) = mpsc::channel::<BranchEvent>(64);
        let manager = ConnectionManager::spawn(Arc::clone(&info), raw_events_tx).await?;

        let pump_subscription = Arc::clone(&subscription);
        let event_pump = tokio::spawn(async move {
            while let Some(event) = raw_events_rx.recv().await {
                let target = pump_subscription.lock().take();
                if let Some(subscription) = target {
                    if subscription.kind.contains(event.kind) {
                        let _ = subscription.sender.send(event).await;
                    } else {
                        // Not a match for the currently registered filter;
                        // put the subscription back for the next event.
                        *pump_subscription.lock() = Some(subscription);
                    }
                }
            }
        });

        Ok(Self {
            info,
            manager,
            subscription,
            _event_pump: event_pump,
            receiving: AtomicBool::new(false),
        })
    }

    pub fn get_info(&self) -> &LocalBranchInfo {
        &self.info
    }

    /// `get_info() -> json` (§4.8).
    pub fn get_info_json(&self) -> serde_json::Value {
        self.info.to_json()
    }

    pub fn get_connected_branches(&self) -> Vec<(BranchUuid, RemoteBranchInfo)> {
        self.manager.connected_branches()
    }

    /// `get_connected_branches() -> list<json>` (§4.8).
    pub fn get_connected_branches_json(&self) -> Vec<serde_json::Value> {
        self.manager
            .connected_branches()
            .into_iter()
            .map(|(_, info)| info.to_json())
            .collect()
    }

    /// Registers interest in events matching `kind`. Replaces and cancels
    /// any previously registered handler (§4.8).
    pub async fn await_event(&self, kind: BranchEventKind) -> Result<BranchEvent, YogiError> {
        let (tx, mut rx) = mpsc::channel(1);
        let previous = self
            .subscription
            .lock()
            .replace(EventSubscription { kind, sender: tx });
        if let Some(previous) = previous {
            let _ = previous.sender.send(BranchEvent::canceled(previous.kind)).await;
        }
        rx.recv()
            .await
            .ok_or(YogiError::Canceled)
    }

    /// Cancels whatever handler is currently registered, if any.
    pub fn cancel_await_event(&self) {
        if let Some(previous) = self.subscription.lock().take() {
            let kind = previous.kind;
            tokio::spawn(async move {
                let _ = previous.sender.send(BranchEvent::canceled(kind)).await;
            });
        }
    }

    pub fn try_send_broadcast(&self, payload: &[u8]) -> Vec<BranchUuid> {
        broadcast::try_broadcast(&self.manager, payload)
    }

    /// `send_broadcast(data, block) -> result` (§4.8): blocks until every
    /// running session accepted the message, or fails with `TxQueueFull`
    /// as soon as one would have blocked when `block` is `false`.
    pub async fn send_broadcast(
        &self,
        payload: &[u8],
        block: bool,
        cancellation: &Cancellation,
    ) -> Result<(), YogiError> {
        broadcast::send_broadcast(&self.manager, payload, block, cancellation).await
    }

    /// Allocates the `OperationId` a subsequent [`Branch::send_broadcast_async`]
    /// call will run under, so a caller that wants to race the send against
    /// [`Branch::cancel_send_broadcast`] can hold the id before the send
    /// even starts (§4.8 "`send_broadcast_async` ... -> op_id").
    pub fn begin_broadcast_async(&self) -> OperationId {
        self.manager.next_operation_id()
    }

    /// `send_broadcast_async(data, retry, handler) -> op_id` (§4.8): runs
    /// the per-session fan-out under `op_id` (from
    /// [`Branch::begin_broadcast_async`]) to completion, reporting each
    /// session's outcome. The "handler" in the C ABI sense is whatever the
    /// caller does with the returned vector once this future resolves.
    pub async fn send_broadcast_async(
        &self,
        op_id: OperationId,
        payload: &[u8],
        retry: bool,
        cancellation: &Cancellation,
    ) -> Vec<(BranchUuid, Result<(), YogiError>)> {
        broadcast::broadcast_async_tracked(&self.manager, self.manager.operations(), op_id, payload, retry, cancellation)
            .await
    }

    /// Cancels an in-flight `send_broadcast_async` operation (§4.8). A no-op
    /// if `op_id` has already completed.
    pub fn cancel_send_broadcast(&self, op_id: OperationId) {
        self.manager.operations().cancel(op_id);
    }

    /// `receive_broadcast(encoding, buf, handler)` (§4.8): completes on the
    /// next inbound broadcast from any peer. Fails with `Busy` if another
    /// receive is already outstanding.
    pub async fn receive_broadcast(
        &self,
        buf: &mut [u8],
        cancellation: &Cancellation,
    ) -> Result<(BranchUuid, usize), YogiError> {
        if self
            .receiving
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            return Err(YogiError::Busy);
        }
        let result = broadcast::receive_broadcast(&self.manager, buf, cancellation).await;
        self.receiving.store(false, Ordering::Release);
        result
    }

    pub fn shutdown(self) {
        self.manager.shutdown();
    }
}

fn hostname() -> String {
    hostname_from_env().unwrap_or_else(|| "localhost".to_string())
}

#[cfg(unix)]
fn hostname_from_env() -> Option<String> {
    std::env::var("HOSTNAME")
        .ok()
        .filter(|value| !value.is_empty())
}

#[cfg(not(unix))]
fn hostname_from_env() -> Option<String> {
    std::env::var("COMPUTERNAME")
        .ok()
        .filter(|value| !value.is_empty())
}
