//! Transport-level addressing.

use std::fmt;
use std::net::{IpAddr, SocketAddr};

/// A resolved socket address plus the network interface it should be
/// reached/listened on, used for both the TCP acceptor endpoint and the UDP
/// advertising endpoints (§3 `LocalBranchInfo.advertising_interfaces`).
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash)]
pub struct TransportSocketAddr(SocketAddr);

impl TransportSocketAddr {
    pub fn new(addr: SocketAddr) -> Self {
        Self(addr)
    }

    pub fn ip(&self) -> IpAddr {
        self.0.ip()
    }

    pub fn port(&self) -> u16 {
        self.0.port()
    }

    pub fn as_std(&self) -> SocketAddr {
        self.0
    }
}

impl From<SocketAddr> for TransportSocketAddr {
    fn from(addr: SocketAddr) -> Self {
        Self(addr)
    }
}

impl fmt::Display for TransportSocketAddr {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// One interface a branch advertises or listens for advertisements on.
/// Resolved to a concrete address at startup; the default is an
/// IPv6 link-local multicast address (§4.9), but a branch may be configured
/// with an IPv4 group instead (§9 open question).
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct AdvertisingInterface {
    pub bind_addr: IpAddr,
    pub multicast_group: IpAddr,
    pub port: u16,
}
