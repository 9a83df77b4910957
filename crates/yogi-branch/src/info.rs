//! Branch descriptors (§3) and their wire encoding (§6 "info exchange").
//!
//! `LocalBranchInfo` is owned by the facade (C9) and shared read-only with
//! the connection manager (C7) and handshake (C6). `RemoteBranchInfo` is
//! parsed out of a peer's info message at handshake time.

use std::net::SocketAddr;
use std::time::{Duration, SystemTime, UNIX_EPOCH};
use yogi_core::{BranchUuid, YogiError};
use yogi_transport::{AdvertisingInterface, Version};

/// Descriptor for our own branch, fixed at construction (§3 invariants:
/// `name`/`net_name`/`path` non-empty, `path` starts with `/`,
/// `advertising_interval >= 1ms` unless ghost mode, `timeout >= 1ms`).
#[derive(Clone, Debug)]
pub struct LocalBranchInfo {
    pub uuid: BranchUuid,
    pub name: String,
    pub description: String,
    pub net_name: String,
    pub path: String,
    pub hostname: String,
    pub pid: u32,
    pub tcp_server_endpoint: SocketAddr,
    pub advertising_endpoint: SocketAddr,
    pub advertising_interfaces: Vec<AdvertisingInterface>,
    pub start_time: SystemTime,
    pub timeout: Duration,
    /// `None` encodes "ghost mode": never advertise, never authenticate,
    /// still gather info (§3).
    pub advertising_interval: Option<Duration>,
    pub ghost_mode: bool,
    pub tx_queue_size: usize,
    pub rx_queue_size: usize,
    pub password_hash: [u8; 32],
}

impl LocalBranchInfo {
    pub fn validate(&self) -> Result<(), YogiError> {
        if self.name.is_empty() {
            return Err(YogiError::InvalidParam("branch name must not be empty".into()));
        }
        if self.net_name.is_empty() {
            return Err(YogiError::InvalidParam("net_name must not be empty".into()));
        }
        if self.path.is_empty() || !self.path.starts_with('/') {
            return Err(YogiError::InvalidParam(
                "path must be non-empty and start with '/'".into(),
            ));
        }
        if self.timeout < Duration::from_millis(1) {
            return Err(YogiError::InvalidParam(
                "timeout must be at least 1 millisecond".into(),
            ));
        }
        if !self.ghost_mode {
            if let Some(interval) = self.advertising_interval {
                if interval < Duration::from_millis(1) {
                    return Err(YogiError::InvalidParam(
                        "advertising_interval must be at least 1 millisecond".into(),
                    ));
                }
            }
        }
        Ok(())
    }

    /// Serializes the info header + body per §6: header is
    /// `magic(4) | version_major(1) | version_minor(1) | version_patch(1) |
    /// body_size(4 BE)`; body concatenates length-prefixed fields followed
    /// by fixed-width integers.
    pub fn encode(&self) -> Vec<u8> {
        let mut body = Vec::new();
        body.extend_from_slice(&self.uuid.as_bytes());
        push_lp_string(&mut body, &self.name);
        push_lp_string(&mut body, &self.description);
        push_lp_string(&mut body, &self.net_name);
        push_lp_string(&mut body, &self.path);
        push_lp_string(&mut body, &self.hostname);
        body.extend_from_slice(&self.pid.to_be_bytes());
        body.extend_from_slice(&self.tcp_server_endpoint.port().to_be_bytes());
        body.extend_from_slice(&nanos_since_epoch(self.start_time).to_be_bytes());
        body.extend_from_slice(&(self.timeout.as_nanos() as u64).to_be_bytes());
        let interval_nanos = self
            .advertising_interval
            .map(|d| d.as_nanos() as u64)
            .unwrap_or(u64::MAX);
        body.extend_from_slice(&interval_nanos.to_be_bytes());

        let mut frame = Vec::with_capacity(Self::header_len() + body.len());
        frame.extend_from_slice(&yogi_transport::MAGIC);
        frame.push(Version::CURRENT.major);
        frame.push(Version::CURRENT.minor);
        frame.push(Version::CURRENT.patch);
        frame.extend_from_slice(&(body.len() as u32).to_be_bytes());
        frame.extend_from_slice(&body);
        frame
    }

    /// `magic(4) | major(1) | minor(1) | patch(1) | body_size(4 BE)`.
    pub fn header_len() -> usize {
        11
    }

    /// Reads `body_size` out of an already-validated header.
    pub fn body_size_from_header(header: &[u8]) -> Result<u32, YogiError> {
        if header.len() != Self::header_len() {
            return Err(YogiError::DeserializeMsgFailed("short info header".into()));
        }
        if header[0..4] != yogi_transport::MAGIC {
            return Err(YogiError::InvalidMagicPrefix);
        }
        let peer_version = Version {
            major: header[4],
            minor: header[5],
            patch: header[6],
        };
        if !Version::CURRENT.is_compatible_with(&peer_version) {
            return Err(YogiError::IncompatibleVersion);
        }
        Ok(u32::from_be_bytes([header[7], header[8], header[9], header[10]]))
    }

    /// `get_info() -> json` (§6 "Info JSON schema").
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uuid": self.uuid.to_string(),
            "name": self.name,
            "description": self.description,
            "net_name": self.net_name,
            "path": self.path,
            "hostname": self.hostname,
            "pid": self.pid,
            "advertising_address": self.advertising_endpoint.ip().to_string(),
            "advertising_port": self.advertising_endpoint.port(),
            "advertising_interval": self.advertising_interval.map(duration_seconds),
            "tcp_server_address": self.tcp_server_endpoint.ip().to_string(),
            "tcp_server_port": self.tcp_server_endpoint.port(),
            "start_time": rfc3339_nanos(self.start_time),
            "timeout": duration_seconds(self.timeout),
        })
    }
}

fn duration_seconds(d: Duration) -> f64 {
    d.as_secs_f64()
}

/// ISO 8601 with nanosecond precision (§6: "start_time (ISO 8601 with
/// nanoseconds)").
fn rfc3339_nanos(time: SystemTime) -> String {
    chrono::DateTime::<chrono::Utc>::from(time).to_rfc3339_opts(chrono::SecondsFormat::Nanos, true)
}

fn nanos_since_epoch(time: SystemTime) -> u64 {
    time.duration_since(UNIX_EPOCH).unwrap_or_default().as_nanos() as u64
}

fn push_lp_string(buf: &mut Vec<u8>, value: &str) {
    let bytes = value.as_bytes();
    buf.extend_from_slice(&(bytes.len() as u16).to_be_bytes());
    buf.extend_from_slice(bytes);
}

fn read_lp_string(buf: &[u8], cursor: &mut usize) -> Result<String, YogiError> {
    if buf.len() < *cursor + 2 {
        return Err(YogiError::DeserializeMsgFailed("truncated string length".into()));
    }
    let len = u16::from_be_bytes([buf[*cursor], buf[*cursor + 1]]) as usize;
    *cursor += 2;
    if buf.len() < *cursor + len {
        return Err(YogiError::DeserializeMsgFailed("truncated string body".into()));
    }
    let value = std::str::from_utf8(&buf[*cursor..*cursor + len])
        .map_err(|err| YogiError::DeserializeMsgFailed(err.to_string()))?
        .to_string();
    *cursor += len;
    Ok(value)
}

/// Descriptor parsed from the peer's info message (§3). Created once at
/// handshake time; a re-announcement before session start is rejected with
/// a version mismatch per §3.
#[derive(Clone, Debug, PartialEq)]
pub struct RemoteBranchInfo {
    pub uuid: BranchUuid,
    pub name: String,
    pub description: String,
    pub net_name: String,
    pub path: String,
    pub hostname: String,
    pub pid: u32,
    pub tcp_server_port: u16,
    pub start_time_nanos: u64,
    pub timeout: Duration,
    pub advertising_interval: Option<Duration>,
}

impl RemoteBranchInfo {
    /// Parses the body following a validated header (magic/version already
    /// checked by [`LocalBranchInfo::body_size_from_header`]).
    pub fn decode(body: &[u8]) -> Result<Self, YogiError> {
        let mut cursor = 0usize;
        if body.len() < 16 {
            return Err(YogiError::DeserializeMsgFailed("truncated uuid".into()));
        }
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(&body[0..16]);
        cursor += 16;
        let uuid = BranchUuid::from_bytes(uuid_bytes);

        let name = read_lp_string(body, &mut cursor)?;
        let description = read_lp_string(body, &mut cursor)?;
        let net_name = read_lp_string(body, &mut cursor)?;
        let path = read_lp_string(body, &mut cursor)?;
        let hostname = read_lp_string(body, &mut cursor)?;

        if body.len() < cursor + 4 + 2 + 8 + 8 + 8 {
            return Err(YogiError::DeserializeMsgFailed("truncated info tail".into()));
        }
        let pid = u32::from_be_bytes(body[cursor..cursor + 4].try_into().unwrap());
        cursor += 4;
        let tcp_server_port = u16::from_be_bytes(body[cursor..cursor + 2].try_into().unwrap());
        cursor += 2;
        let start_time_nanos = u64::from_be_bytes(body[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;
        let timeout_nanos = u64::from_be_bytes(body[cursor..cursor + 8].try_into().unwrap());
        cursor += 8;
        let interval_nanos = u64::from_be_bytes(body[cursor..cursor + 8].try_into().unwrap());

        if path.is_empty() || !path.starts_with('/') {
            return Err(YogiError::DeserializeMsgFailed(
                "remote path must start with '/'".into(),
            ));
        }

        Ok(Self {
            uuid,
            name,
            description,
            net_name,
            path,
            hostname,
            pid,
            tcp_server_port,
            start_time_nanos,
            timeout: Duration::from_nanos(timeout_nanos),
            advertising_interval: if interval_nanos == u64::MAX {
                None
            } else {
                Some(Duration::from_nanos(interval_nanos))
            },
        })
    }

    /// `get_connected_branches() -> list<json>` entry shape (§6: "Remote-
    /// branch variant omits `advertising_address`"; it also has no interface
    /// list to report a port for, so `advertising_port` is omitted too).
    pub fn to_json(&self) -> serde_json::Value {
        serde_json::json!({
            "uuid": self.uuid.to_string(),
            "name": self.name,
            "description": self.description,
            "net_name": self.net_name,
            "path": self.path,
            "hostname": self.hostname,
            "pid": self.pid,
            "advertising_interval": self.advertising_interval.map(duration_seconds),
            "tcp_server_port": self.tcp_server_port,
            "start_time": rfc3339_nanos(UNIX_EPOCH + Duration::from_nanos(self.start_time_nanos)),
            "timeout": duration_seconds(self.timeout),
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::net::{IpAddr, Ipv4Addr, SocketAddr};

    fn sample() -> LocalBranchInfo {
        LocalBranchInfo {
            uuid: BranchUuid::generate(),
            name: "branch-a".to_string(),
            description: "a test branch".to_string(),
            net_name: "net".to_string(),
            path: "/a".to_string(),
            hostname: "host".to_string(),
            pid: 1234,
            tcp_server_endpoint: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 9000),
            advertising_endpoint: SocketAddr::new(IpAddr::V4(Ipv4Addr::LOCALHOST), 13_531),
            advertising_interfaces: Vec::new(),
            start_time: SystemTime::now(),
            timeout: Duration::from_secs(3),
            advertising_interval: Some(Duration::from_secs(1)),
            ghost_mode: false,
            tx_queue_size: 32,
            rx_queue_size: 32,
            password_hash: [0u8; 32],
        }
    }

    #[test]
    fn encode_decode_round_trips_every_field_remote_info_carries() {
        let local = sample();
        let frame = local.encode();

        let (header, body) = frame.split_at(LocalBranchInfo::header_len());
        let body_size = LocalBranchInfo::body_size_from_header(header).unwrap() as usize;
        assert_eq!(body_size, body.len());

        let remote = RemoteBranchInfo::decode(body).unwrap();
        assert_eq!(remote.uuid, local.uuid);
        assert_eq!(remote.name, local.name);
        assert_eq!(remote.description, local.description);
        assert_eq!(remote.net_name, local.net_name);
        assert_eq!(remote.path, local.path);
        assert_eq!(remote.hostname, local.hostname);
        assert_eq!(remote.pid, local.pid);
        assert_eq!(remote.tcp_server_port, local.tcp_server_endpoint.port());
        assert_eq!(remote.timeout, local.timeout);
        assert_eq!(remote.advertising_interval, local.advertising_interval);
    }

    #[test]
    fn ghost_mode_interval_round_trips_as_none() {
        let mut local = sample();
        local.advertising_interval = None;
        let frame = local.encode();
        let (header, body) = frame.split_at(LocalBranchInfo::header_len());
        LocalBranchInfo::body_size_from_header(header).unwrap();
        let remote = RemoteBranchInfo::decode(body).unwrap();
        assert_eq!(remote.advertising_interval, None);
    }

    #[test]
    fn body_size_from_header_rejects_bad_magic() {
        let mut frame = sample().encode();
        frame[0] ^= 0xff;
        let header = &frame[..LocalBranchInfo::header_len()];
        assert!(matches!(
            LocalBranchInfo::body_size_from_header(header),
            Err(YogiError::InvalidMagicPrefix)
        ));
    }

    #[test]
    fn validate_rejects_empty_name() {
        let mut info = sample();
        info.name.clear();
        assert!(info.validate().is_err());
    }

    #[test]
    fn validate_rejects_path_without_leading_slash() {
        let mut info = sample();
        info.path = "a".to_string();
        assert!(info.validate().is_err());
    }

    #[test]
    fn validate_accepts_ghost_mode_with_sub_millisecond_interval_absent() {
        let mut info = sample();
        info.ghost_mode = true;
        info.advertising_interval = None;
        assert!(info.validate().is_ok());
    }
}
