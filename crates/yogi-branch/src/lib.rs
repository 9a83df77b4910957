//! yogi-branch: branch descriptors (C6 data model), the handshake state
//! machine, the connection manager (C7), broadcast fan-out (C8), and the
//! public [`Branch`] facade (C9) tying them together.

pub mod branch;
pub mod broadcast;
pub mod connection;
pub mod events;
pub mod handshake;
pub mod info;
mod manager;
pub mod session;

pub use branch::{Branch, BranchConfig, DEFAULT_ADVERTISING_GROUP, DEFAULT_ADVERTISING_PORT};
pub use connection::{Connection, ConnectionState};
pub use events::{BranchEvent, BranchEventKind};
pub use info::{LocalBranchInfo, RemoteBranchInfo};
pub use manager::ConnectionManager;
pub use yogi_core::OperationId;

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};
    use std::time::Duration;
    use yogi_transport::AdvertisingInterface;

    fn loopback_config(advertising_port: u16) -> BranchConfig {
        BranchConfig {
            tcp_server_endpoint: SocketAddr::new(IpAddr::V4(Ipv4Addr::UNSPECIFIED), 0),
            advertising_interfaces: vec![AdvertisingInterface {
                bind_addr: IpAddr::V4(Ipv4Addr::UNSPECIFIED),
                multicast_group: IpAddr::V4(Ipv4Addr::new(239, 255, 0, 2)),
                port: advertising_port,
            }],
            advertising_interval: Some(Duration::from_millis(20)),
            timeout: Duration::from_secs(2),
            ..BranchConfig::default()
        }
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn two_branches_discover_and_establish_a_session() {
        let port = 49_000 + (std::process::id() % 500) as u16;
        let a = Branch::new(loopback_config(port)).await.expect("branch a");
        let b = Branch::new(loopback_config(port)).await.expect("branch b");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if !a.get_connected_branches().is_empty() && !b.get_connected_branches().is_empty() {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("branches did not establish a session in time");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let a_view = a.get_connected_branches();
        assert_eq!(a_view.len(), 1);
        assert_eq!(a_view[0].1.uuid, b.get_info().uuid);

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn broadcast_reaches_the_only_connected_peer() {
        let port = 49_500 + (std::process::id() % 400) as u16;
        let a = Branch::new(loopback_config(port)).await.expect("branch a");
        let b = Branch::new(loopback_config(port)).await.expect("branch b");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if !a.get_connected_branches().is_empty() && !b.get_connected_branches().is_empty() {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("branches did not establish a session in time");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        let not_delivered = a.try_send_broadcast(b"hello");
        assert!(not_delivered.is_empty());

        let mut buf = [0u8; 64];
        let cancellation = yogi_core::Cancellation::new();
        let (uuid, len) = tokio::time::timeout(
            Duration::from_secs(2),
            b.receive_broadcast(&mut buf, &cancellation),
        )
        .await
        .expect("receive did not complete in time")
        .expect("receive_broadcast failed");
        assert_eq!(&buf[..len], b"hello");
        assert_eq!(uuid, a.get_info().uuid);

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn branch_queried_event_fires_with_the_peers_info_json() {
        let port = 49_200 + (std::process::id() % 300) as u16;
        let a = Branch::new(loopback_config(port)).await.expect("branch a");
        let b = Branch::new(loopback_config(port)).await.expect("branch b");

        let event = tokio::time::timeout(
            Duration::from_secs(5),
            a.await_event(BranchEventKind::BRANCH_QUERIED),
        )
        .await
        .expect("timed out waiting for BranchQueried")
        .expect("await_event failed");

        assert_eq!(event.kind, BranchEventKind::BRANCH_QUERIED);
        assert!(event.result.is_ok());
        let info: serde_json::Value = serde_json::from_str(&event.json_details).expect("valid json");
        assert_eq!(info["uuid"], b.get_info().uuid.to_string());

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn get_info_json_reports_the_configured_name() {
        let mut config = loopback_config(49_950);
        config.name = Some("named-branch".to_string());
        let branch = Branch::new(config).await.expect("branch");
        let json = branch.get_info_json();
        assert_eq!(json["name"], "named-branch");
        branch.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn ghost_mode_branch_never_advertises_or_discovers() {
        let mut config = loopback_config(49_900);
        config.ghost_mode = true;
        let branch = Branch::new(config).await.expect("ghost branch");
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert!(branch.get_connected_branches().is_empty());
        branch.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn mismatched_passwords_blacklist_the_peer_instead_of_connecting() {
        let port = 49_300 + (std::process::id() % 400) as u16;
        let mut config_a = loopback_config(port);
        config_a.password = Some("correct-horse".to_string());
        let mut config_b = loopback_config(port);
        config_b.password = Some("wrong-password".to_string());

        let a = Branch::new(config_a).await.expect("branch a");
        let b = Branch::new(config_b).await.expect("branch b");

        let outcome = tokio::time::timeout(
            Duration::from_secs(5),
            a.await_event(BranchEventKind::CONNECT_FINISHED),
        )
        .await
        .expect("timed out waiting for ConnectFinished")
        .expect("await_event failed");

        assert!(outcome.result.is_err());
        assert!(a.get_connected_branches().is_empty());
        assert!(b.get_connected_branches().is_empty());

        a.shutdown();
        b.shutdown();
    }

    #[tokio::test(flavor = "multi_thread")]
    async fn duplicate_path_rejects_the_losing_branch() {
        let port = 49_700 + (std::process::id() % 300) as u16;
        let mut config_a = loopback_config(port);
        config_a.name = Some("same-name".to_string());
        config_a.path = Some("/shared".to_string());
        let mut config_b = loopback_config(port);
        config_b.name = Some("different-name".to_string());
        config_b.path = Some("/shared".to_string());

        let a = Branch::new(config_a).await.expect("branch a");
        let b = Branch::new(config_b).await.expect("branch b");

        let deadline = tokio::time::Instant::now() + Duration::from_secs(5);
        loop {
            if !a.get_connected_branches().is_empty() || !b.get_connected_branches().is_empty() {
                break;
            }
            if tokio::time::Instant::now() > deadline {
                panic!("neither branch observed a session outcome in time");
            }
            tokio::time::sleep(Duration::from_millis(20)).await;
        }

        // Exactly one side keeps a running session; the duplicate path must
        // never let both sides settle into SessionRunning simultaneously.
        let a_connected = !a.get_connected_branches().is_empty();
        let b_connected = !b.get_connected_branches().is_empty();
        assert_ne!(a_connected, b_connected);

        a.shutdown();
        b.shutdown();
    }
}
