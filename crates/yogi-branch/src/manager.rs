//! C7: the connection manager — owns the TCP acceptor and the advertising
//! pair, reacts to discovery events and inbound sockets, and runs every
//! handshake attempt to a terminal [`ConnectionState`].

use crate::broadcast::BroadcastOperations;
use crate::connection::{keep_inbound, Connection, ConnectionState};
use crate::events::BranchEvent;
use crate::handshake;
use crate::info::{LocalBranchInfo, RemoteBranchInfo};
use crate::session::Session;
use dashmap::mapref::entry::Entry;
use dashmap::{DashMap, DashSet};
use std::sync::Arc;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::{info, warn};
use yogi_core::{BranchUuid, Cancellation, OperationId, OperationIdAllocator, YogiError};
use yogi_transport::TransportSocketAddr;
use yogi_transport_tcp::TcpAcceptor;
use yogi_transport_udp::{AdvertisingReceiver, AdvertisingSender, DiscoveryEvent};

/// Everything the manager needs to know about a peer beyond its live
/// [`Connection`] state, kept once the handshake has told us who it is.
pub(crate) struct PeerRecord {
    pub(crate) connection: Connection,
    pub(crate) info: Option<RemoteBranchInfo>,
}

/// Owns branch connectivity end to end: discovery, the accept loop, every
/// outbound connect attempt, and the resulting set of live sessions.
pub struct ConnectionManager {
    local_info: Arc<LocalBranchInfo>,
    peers: Arc<DashMap<BranchUuid, PeerRecord>>,
    blacklisted: Arc<DashSet<BranchUuid>>,
    claimed_names: Arc<DashSet<String>>,
    claimed_paths: Arc<DashSet<String>>,
    cancellation: Cancellation,
    tasks: Vec<JoinHandle<()>>,
    _advertising_sender: AdvertisingSender,
    operations: Arc<BroadcastOperations>,
    operation_ids: OperationIdAllocator,
}

impl ConnectionManager {
    pub async fn spawn(
        local_info: Arc<LocalBranchInfo>,
        events: mpsc::Sender<BranchEvent>,
    ) -> Result<Self, YogiError> {
        let acceptor = TcpAcceptor::bind(TransportSocketAddr::new(local_info.tcp_server_endpoint))
            .await?;

        let advertising_sender = AdvertisingSender::spawn(
            local_info.uuid,
            acceptor.local_addr().port(),
            local_info.advertising_interfaces.clone(),
            local_info
                .advertising_interval
                .unwrap_or(std::time::Duration::from_secs(1)),
            local_info.ghost_mode,
        );

        let peers = Arc::new(DashMap::new());
        let blacklisted = Arc::new(DashSet::new());
        let claimed_names = Arc::new(DashSet::new());
        let claimed_paths = Arc::new(DashSet::new());
        let pending_connects = Arc::new(DashSet::new());
        let cancellation = Cancellation::new();
        let mut tasks = Vec::new();

        // Ghost branches still observe and report peers (§3: "ghost mode...
        // still gather info"); only the dial step inside the loop below is
        // suppressed for them.
        let (discovery_tx, discovery_rx) = mpsc::channel(64);
        let _receiver =
            AdvertisingReceiver::spawn(local_info.uuid, local_info.advertising_interfaces.clone(), discovery_tx);
        // AdvertisingReceiver keeps its tasks running as long as it's kept
        // alive; leak it into the manager's background task so it lives
        // exactly as long as the discovery loop that consumes from it.
        tasks.push(tokio::spawn(discovery_loop(
            discovery_rx,
            _receiver,
            Arc::clone(&local_info),
            Arc::clone(&peers),
            Arc::clone(&blacklisted),
            Arc::clone(&claimed_names),
            Arc::clone(&claimed_paths),
            Arc::clone(&pending_connects),
            events.clone(),
            cancellation.clone(),
        )));

        tasks.push(tokio::spawn(accept_loop(
            acceptor,
            Arc::clone(&local_info),
            Arc::clone(&peers),
            Arc::clone(&blacklisted),
            Arc::clone(&claimed_names),
            Arc::clone(&claimed_paths),
            events,
            cancellation.clone(),
        )));

        Ok(Self {
            local_info,
            peers,
            blacklisted,
            claimed_names,
            claimed_paths,
            cancellation,
            tasks,
            _advertising_sender: advertising_sender,
            operations: Arc::new(BroadcastOperations::new()),
            operation_ids: OperationIdAllocator::new(),
        })
    }

    /// Allocates the next `OperationId` for a cancelable broadcast send.
    pub fn next_operation_id(&self) -> OperationId {
        self.operation_ids.next()
    }

    pub fn operations(&self) -> &BroadcastOperations {
        &self.operations
    }

    pub fn connected_branches(&self) -> Vec<(BranchUuid, RemoteBranchInfo)> {
        self.peers
            .iter()
            .filter(|entry| entry.connection.state == ConnectionState::SessionRunning)
            .filter_map(|entry| entry.info.clone().map(|info| (*entry.key(), info)))
            .collect()
    }

    pub fn is_blacklisted(&self, uuid: BranchUuid) -> bool {
        self.blacklisted.contains(&uuid)
    }

    /// Exposes the peer map to [`crate::broadcast`] without making the
    /// internal `PeerRecord` type public.
    pub(crate) fn peers_ref(&self) -> &DashMap<BranchUuid, PeerRecord> {
        &self.peers
    }

    /// Stops the accept loop, the discovery loop and the advertising sender.
    /// Live sessions are dropped, which aborts their framing tasks.
    pub fn shutdown(self) {
        self.cancellation.cancel();
        for task in self.tasks {
            task.abort();
        }
        self._advertising_sender.stop();
    }
}

#[allow(clippy::too_many_arguments)]
async fn discovery_loop(
    mut discovery_rx: mpsc::Receiver<DiscoveryEvent>,
    _receiver: AdvertisingReceiver,
    local_info: Arc<LocalBranchInfo>,
    peers: Arc<DashMap<BranchUuid, PeerRecord>>,
    blacklisted: Arc<DashSet<BranchUuid>>,
    claimed_names: Arc<DashSet<String>>,
    claimed_paths: Arc<DashSet<String>>,
    pending_connects: Arc<DashSet<BranchUuid>>,
    events: mpsc::Sender<BranchEvent>,
    cancellation: Cancellation,
) {
    while let Some(event) = discovery_rx.recv().await {
        if cancellation.is_cancelled() {
            return;
        }
        match event {
            DiscoveryEvent::Discovered { uuid, tcp_endpoint } => {
                if blacklisted.contains(&uuid) {
                    continue;
                }
                // First sighting of this peer: record it and report
                // `BranchDiscovered` exactly once. The synchronous
                // transition to `Discovered` here (not just on a completed
                // handshake) is what keeps a second advertisement arriving
                // mid-handshake from re-entering this arm at all.
                let should_report = match peers.entry(uuid) {
                    Entry::Vacant(entry) => {
                        let mut connection = Connection::new();
                        connection.transition_to(ConnectionState::Discovered);
                        entry.insert(PeerRecord {
                            connection,
                            info: None,
                        });
                        true
                    }
                    Entry::Occupied(mut entry) => {
                        let is_new = entry.get().connection.state == ConnectionState::None;
                        if is_new {
                            entry.get_mut().connection.transition_to(ConnectionState::Discovered);
                        }
                        is_new
                    }
                };
                if !should_report {
                    continue;
                }
                let _ = events
                    .send(BranchEvent::discovered(
                        uuid,
                        &tcp_endpoint.ip().to_string(),
                        tcp_endpoint.port(),
                    ))
                    .await;

                // Ghost branches observe discovery but never dial (§4.7
                // outbound flow).
                if local_info.ghost_mode {
                    continue;
                }
                // Already dialing this peer from an earlier, still
                // in-flight discovery event (§4.7 `pending_connects`).
                if !pending_connects.insert(uuid) {
                    continue;
                }

                let local_info = Arc::clone(&local_info);
                let peers = Arc::clone(&peers);
                let blacklisted = Arc::clone(&blacklisted);
                let claimed_names = Arc::clone(&claimed_names);
                let claimed_paths = Arc::clone(&claimed_paths);
                let pending_connects = Arc::clone(&pending_connects);
                let events = events.clone();
                let cancellation = cancellation.clone();
                tokio::spawn(async move {
                    connect_and_handshake(
                        tcp_endpoint,
                        local_info,
                        peers,
                        blacklisted,
                        claimed_names,
                        claimed_paths,
                        events,
                        cancellation,
                    )
                    .await;
                    pending_connects.remove(&uuid);
                });
            }
            DiscoveryEvent::IncompatibleVersion { uuid } => {
                warn!(%uuid, "discovered peer with incompatible protocol version");
            }
        }
    }
}

#[allow(clippy::too_many_arguments)]
async fn connect_and_handshake(
    tcp_endpoint: std::net::SocketAddr,
    local_info: Arc<LocalBranchInfo>,
    peers: Arc<DashMap<BranchUuid, PeerRecord>>,
    blacklisted: Arc<DashSet<BranchUuid>>,
    claimed_names: Arc<DashSet<String>>,
    claimed_paths: Arc<DashSet<String>>,
    events: mpsc::Sender<BranchEvent>,
    cancellation: Cancellation,
) {
    let timeout = yogi_core::TimeoutNanos::from_raw(local_info.timeout.as_nanos() as i64)
        .unwrap_or(yogi_core::TimeoutNanos::INFINITE);
    let connect_result =
        yogi_transport_tcp::TcpTransport::connect(tcp_endpoint.into(), timeout, &cancellation).await;
    let stream = match connect_result {
        Ok(stream) => stream,
        Err(err) => {
            warn!(%tcp_endpoint, error = %err, "outbound connect failed");
            return;
        }
    };
    finish_handshake(
        stream,
        local_info,
        peers,
        blacklisted,
        claimed_names,
        claimed_paths,
        events,
        cancellation,
        false,
    )
    .await;
}

#[allow(clippy::too_many_arguments)]
async fn accept_loop(
    acceptor: TcpAcceptor,
    local_info: Arc<LocalBranchInfo>,
    peers: Arc<DashMap<BranchUuid, PeerRecord>>,
    blacklisted: Arc<DashSet<BranchUuid>>,
    claimed_names: Arc<DashSet<String>>,
    claimed_paths: Arc<DashSet<String>>,
    events: mpsc::Sender<BranchEvent>,
    cancellation: Cancellation,
) {
    loop {
        if cancellation.is_cancelled() {
            return;
        }
        let accepted = acceptor
            .accept(yogi_core::TimeoutNanos::INFINITE, &cancellation)
            .await;
        let stream = match accepted {
            Ok(stream) => stream,
            Err(YogiError::Canceled) => return,
            Err(err) => {
                warn!(error = %err, "accept failed, continuing");
                continue;
            }
        };
        tokio::spawn(finish_handshake(
            stream,
            Arc::clone(&local_info),
            Arc::clone(&peers),
            Arc::clone(&blacklisted),
            Arc::clone(&claimed_names),
            Arc::clone(&claimed_paths),
            events.clone(),
            cancellation.clone(),
            true,
        ));
    }
}

/// Runs the handshake to completion and folds the result into `peers`,
/// applying the post-handshake uniqueness checks and the tie-break rule
/// (§4.7) before declaring a session running.
#[allow(clippy::too_many_arguments)]
async fn finish_handshake(
    stream: yogi_transport_tcp::TcpTransport,
    local_info: Arc<LocalBranchInfo>,
    peers: Arc<DashMap<BranchUuid, PeerRecord>>,
    blacklisted: Arc<DashSet<BranchUuid>>,
    claimed_names: Arc<DashSet<String>>,
    claimed_paths: Arc<DashSet<String>>,
    events: mpsc::Sender<BranchEvent>,
    cancellation: Cancellation,
    inbound: bool,
) {
    let outcome = handshake::run(&local_info, stream, &cancellation).await;
    let outcome = match outcome {
        Ok(outcome) => outcome,
        Err(handshake::HandshakeError { peer_uuid, source: err }) => {
            if err.is_per_peer_recoverable() {
                warn!(error = %err, "handshake rejected");
                if let Some(uuid) = peer_uuid {
                    blacklisted.insert(uuid);
                }
            }
            let _ = events
                .send(BranchEvent::connect_finished(
                    peer_uuid.unwrap_or(BranchUuid::from_bytes([0; 16])),
                    Err(&err),
                ))
                .await;
            return;
        }
    };

    let uuid = outcome.remote_info.uuid;
    if blacklisted.contains(&uuid) {
        return;
    }

    let _ = events
        .send(BranchEvent::queried(
            uuid,
            outcome.remote_info.to_json().to_string(),
        ))
        .await;

    if !claimed_paths.insert(outcome.remote_info.path.clone()) {
        let err = YogiError::DuplicateBranchPath;
        blacklisted.insert(uuid);
        let _ = events.send(BranchEvent::connect_finished(uuid, Err(&err))).await;
        return;
    }
    if !claimed_names.insert(outcome.remote_info.name.clone()) {
        let err = YogiError::DuplicateBranchName;
        claimed_paths.remove(&outcome.remote_info.path);
        blacklisted.insert(uuid);
        let _ = events.send(BranchEvent::connect_finished(uuid, Err(&err))).await;
        return;
    }

    let session = start_session(
        outcome.transport,
        local_info.timeout,
        uuid,
        outcome.remote_info.name.clone(),
        outcome.remote_info.path.clone(),
        Arc::clone(&peers),
        Arc::clone(&claimed_names),
        Arc::clone(&claimed_paths),
        events.clone(),
    );

    match peers.entry(uuid) {
        Entry::Occupied(mut entry) => {
            let existing = entry.get();
            if existing.connection.state == ConnectionState::SessionRunning {
                // Simultaneous connect race (§4.7): keep the side the rule
                // picks, drop the other transport by letting it go out of
                // scope (its Drop aborts the framing tasks).
                if keep_inbound(local_info.uuid, uuid) != inbound {
                    return;
                }
            }
            let record = entry.get_mut();
            if !record.connection.transition_to(ConnectionState::Handshaking) {
                record.connection.state = ConnectionState::Handshaking;
            }
            record.connection.transition_to(ConnectionState::SessionRunning);
            record.connection.state = ConnectionState::SessionRunning;
            record.connection.session = Some(session);
            record.info = Some(outcome.remote_info);
        }
        Entry::Vacant(entry) => {
            let mut connection = Connection::new();
            connection.transition_to(ConnectionState::Handshaking);
            connection.transition_to(ConnectionState::SessionRunning);
            connection.session = Some(session);
            entry.insert(PeerRecord {
                connection,
                info: Some(outcome.remote_info),
            });
        }
    }

    info!(%uuid, inbound, "session established");
    let _ = events.send(BranchEvent::connect_finished(uuid, Ok(()))).await;
}

/// Wraps a freshly handshaken transport in a [`Session`], wiring its
/// liveness-loss callback to fold the peer back to `Failed`, release its
/// claimed name/path (so a future reconnect or another peer may reuse
/// them), and emit `ConnectionLost` (§4.7).
#[allow(clippy::too_many_arguments)]
fn start_session(
    transport: yogi_transport_tcp::MessageTransport,
    timeout: std::time::Duration,
    uuid: BranchUuid,
    remote_name: String,
    remote_path: String,
    peers: Arc<DashMap<BranchUuid, PeerRecord>>,
    claimed_names: Arc<DashSet<String>>,
    claimed_paths: Arc<DashSet<String>>,
    events: mpsc::Sender<BranchEvent>,
) -> Arc<Session> {
    Session::start(transport, timeout, move |err| {
        if let Some(mut entry) = peers.get_mut(&uuid) {
            entry.connection.transition_to(ConnectionState::Failed);
            entry.connection.state = ConnectionState::Failed;
            entry.connection.session = None;
        }
        claimed_names.remove(&remote_name);
        claimed_paths.remove(&remote_path);
        tokio::spawn(async move {
            let _ = events.send(BranchEvent::connection_lost(uuid, &err)).await;
        });
    })
}
