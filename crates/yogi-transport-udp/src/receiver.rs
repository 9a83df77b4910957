//! C5 receiver half: joins the multicast group on each requested interface
//! and turns well-formed advertisements into [`DiscoveryEvent`]s.

use crate::advertisement::Advertisement;
use std::collections::HashSet;
use std::net::{IpAddr, SocketAddr};
use tokio::net::UdpSocket;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tracing::warn;
use yogi_core::BranchUuid;
use yogi_transport::AdvertisingInterface;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum DiscoveryEvent {
    /// A compatible peer was observed; `tcp_endpoint` is where to dial it.
    Discovered {
        uuid: BranchUuid,
        tcp_endpoint: SocketAddr,
    },
    /// A peer with an incompatible major version was observed. Emitted at
    /// most once per remote UUID (§4.5).
    IncompatibleVersion { uuid: BranchUuid },
}

pub struct AdvertisingReceiver {
    tasks: Vec<JoinHandle<()>>,
}

impl AdvertisingReceiver {
    pub fn spawn(
        own_uuid: BranchUuid,
        interfaces: Vec<AdvertisingInterface>,
        events: mpsc::Sender<DiscoveryEvent>,
    ) -> Self {
        let tasks = interfaces
            .into_iter()
            .map(|iface| tokio::spawn(receive_loop(own_uuid, iface, events.clone())))
            .collect();
        Self { tasks }
    }

    pub fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

async fn receive_loop(
    own_uuid: BranchUuid,
    iface: AdvertisingInterface,
    events: mpsc::Sender<DiscoveryEvent>,
) {
    let socket = match bind_and_join(&iface).await {
        Ok(socket) => socket,
        Err(err) => {
            warn!(interface = %iface.bind_addr, error = %err, "failed to bind advertising receiver socket");
            return;
        }
    };

    let mut already_reported_incompatible: HashSet<BranchUuid> = HashSet::new();
    let mut buf = [0u8; 512];
    let mut consecutive_errors = 0u32;

    loop {
        match socket.recv_from(&mut buf).await {
            Ok((len, from)) => {
                consecutive_errors = 0;
                handle_datagram(
                    own_uuid,
                    &buf[..len],
                    from,
                    &mut already_reported_incompatible,
                    &events,
                )
                .await;
            }
            Err(err) => {
                consecutive_errors += 1;
                warn!(interface = %iface.bind_addr, error = %err, consecutive_errors, "advertising receiver read failed");
                if consecutive_errors >= 2 {
                    warn!(interface = %iface.bind_addr, "advertising receiver permanently disabled after two consecutive errors");
                    return;
                }
            }
        }
    }
}

async fn handle_datagram(
    own_uuid: BranchUuid,
    datagram: &[u8],
    from: SocketAddr,
    already_reported_incompatible: &mut HashSet<BranchUuid>,
    events: &mpsc::Sender<DiscoveryEvent>,
) {
    let advertisement = match Advertisement::decode(datagram) {
        Ok(advertisement) => advertisement,
        Err(yogi_core::YogiError::IncompatibleVersion) => {
            // We can't recover the peer's UUID from a version-incompatible
            // frame layout change in general, but today's wire format keeps
            // the UUID at a fixed offset regardless of version, so decode it
            // best-effort for the one-shot event.
            if datagram.len() >= 22 {
                let mut uuid_bytes = [0u8; 16];
                uuid_bytes.copy_from_slice(&datagram[6..22]);
                let uuid = BranchUuid::from_bytes(uuid_bytes);
                if uuid != own_uuid && already_reported_incompatible.insert(uuid) {
                    let _ = events.send(DiscoveryEvent::IncompatibleVersion { uuid }).await;
                }
            }
            return;
        }
        Err(_) => return, // bad magic / wrong length: dropped silently
    };

    if advertisement.uuid == own_uuid {
        return;
    }

    let tcp_endpoint = SocketAddr::new(from.ip(), advertisement.tcp_port);
    let _ = events
        .send(DiscoveryEvent::Discovered {
            uuid: advertisement.uuid,
            tcp_endpoint,
        })
        .await;
}

async fn bind_and_join(iface: &AdvertisingInterface) -> std::io::Result<UdpSocket> {
    let bind_addr = match iface.multicast_group {
        IpAddr::V4(_) => SocketAddr::new(IpAddr::V4(std::net::Ipv4Addr::UNSPECIFIED), iface.port),
        IpAddr::V6(_) => SocketAddr::new(IpAddr::V6(std::net::Ipv6Addr::UNSPECIFIED), iface.port),
    };
    let socket = UdpSocket::bind(bind_addr).await?;
    match (iface.multicast_group, iface.bind_addr) {
        (IpAddr::V4(group), IpAddr::V4(local)) => socket.join_multicast_v4(group, local)?,
        (IpAddr::V6(group), _) => socket.join_multicast_v6(&group, 0)?,
        _ => {
            return Err(std::io::Error::new(
                std::io::ErrorKind::InvalidInput,
                "multicast group and bind address family mismatch",
            ));
        }
    }
    Ok(socket)
}
