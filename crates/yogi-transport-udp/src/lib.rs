//! yogi-transport-udp: the C5 discovery loop — a periodic multicast sender
//! and a joined-multicast receiver that turns raw datagrams into
//! [`DiscoveryEvent`]s for the connection manager.

mod advertisement;
mod receiver;
mod sender;

pub use advertisement::{Advertisement, ENCODED_LEN};
pub use receiver::{AdvertisingReceiver, DiscoveryEvent};
pub use sender::AdvertisingSender;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr};
    use std::time::Duration;
    use tokio::sync::mpsc;
    use yogi_core::BranchUuid;
    use yogi_transport::AdvertisingInterface;

    fn loopback_interface(port: u16) -> AdvertisingInterface {
        AdvertisingInterface {
            bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
            multicast_group: IpAddr::V4(Ipv4Addr::new(239, 255, 0, 1)),
            port,
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn sender_and_receiver_discover_each_other() {
        let port = 48_000 + (std::process::id() % 1000) as u16;
        let iface = loopback_interface(port);
        let receiver_uuid = BranchUuid::generate();
        let sender_uuid = BranchUuid::generate();

        let (tx, mut rx) = mpsc::channel(8);
        let _receiver = AdvertisingReceiver::spawn(receiver_uuid, vec![iface], tx);
        let _sender = AdvertisingSender::spawn(
            sender_uuid,
            9999,
            vec![iface],
            Duration::from_millis(20),
            false,
        );

        let event = tokio::time::timeout(Duration::from_secs(2), rx.recv())
            .await
            .expect("event arrives before timeout")
            .expect("channel stays open");
        match event {
            DiscoveryEvent::Discovered { uuid, tcp_endpoint } => {
                assert_eq!(uuid, sender_uuid);
                assert_eq!(tcp_endpoint.port(), 9999);
            }
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ghost_mode_sender_never_sends() {
        let sender = AdvertisingSender::spawn(
            BranchUuid::generate(),
            1234,
            vec![loopback_interface(48_900)],
            Duration::from_millis(10),
            true,
        );
        // No sending tasks were spawned; stop() should complete immediately
        // without waiting on anything.
        sender.stop();
    }
}
