//! C5 sender half: periodically multicasts our [`Advertisement`] out every
//! configured interface. Ghost-mode branches never send (§4.5).

use crate::advertisement::Advertisement;
use std::net::SocketAddr;
use std::time::Duration;
use tokio::net::UdpSocket;
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::warn;
use yogi_core::BranchUuid;
use yogi_transport::{AdvertisingInterface, Version};

pub struct AdvertisingSender {
    tasks: Vec<JoinHandle<()>>,
}

impl AdvertisingSender {
    /// Spawns one sending task per interface. A missed tick (the previous
    /// send took longer than `interval`) is not backfilled: the next send is
    /// simply the next full interval boundary.
    pub fn spawn(
        uuid: BranchUuid,
        tcp_port: u16,
        interfaces: Vec<AdvertisingInterface>,
        interval: Duration,
        ghost_mode: bool,
    ) -> Self {
        if ghost_mode {
            return Self { tasks: Vec::new() };
        }

        let advertisement = Advertisement { uuid, tcp_port };
        let tasks = interfaces
            .into_iter()
            .map(|iface| tokio::spawn(send_loop(advertisement, iface, interval)))
            .collect();
        Self { tasks }
    }

    pub fn stop(self) {
        for task in self.tasks {
            task.abort();
        }
    }
}

async fn send_loop(advertisement: Advertisement, iface: AdvertisingInterface, interval: Duration) {
    let bind_addr = SocketAddr::new(iface.bind_addr, 0);
    let socket = match UdpSocket::bind(bind_addr).await {
        Ok(socket) => socket,
        Err(err) => {
            warn!(interface = %iface.bind_addr, error = %err, "failed to bind advertising sender socket");
            return;
        }
    };
    if iface.multicast_group.is_ipv4() {
        let _ = socket.set_multicast_loop_v4(true);
    } else {
        let _ = socket.set_multicast_loop_v6(true);
    }

    let target = SocketAddr::new(iface.multicast_group, iface.port);
    let frame = advertisement.encode(Version::CURRENT);

    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    loop {
        ticker.tick().await;
        if let Err(err) = socket.send_to(&frame, target).await {
            warn!(interface = %iface.bind_addr, error = %err, "advertisement send failed, will retry next tick");
        }
    }
}
