//! C6: the post-discovery handshake (§4.6) — info exchange followed by a
//! mutual challenge/response authentication round, ending in a framed
//! [`MessageTransport`] ready for session traffic.
//!
//! Runs directly on a [`TcpTransport`] before it's wrapped in framing: the
//! info header/body and the challenge messages use their own fixed/prefixed
//! layouts, distinct from the varint framing session traffic uses later.

use crate::info::{LocalBranchInfo, RemoteBranchInfo};
use rand::RngCore;
use sha2::{Digest, Sha256};
use yogi_core::{BranchUuid, Cancellation, TimeoutNanos, YogiError};
use yogi_transport_tcp::{run_cancelable, MessageTransport, TcpTransport};

const CHALLENGE_LEN: usize = 32;
const SOLUTION_LEN: usize = 32;

/// `sha256("")`, the password hash a branch constructed with an empty
/// password carries, so that two passwordless branches still authenticate
/// against the same well-defined digest (§4.6 step 3).
pub fn empty_password_hash() -> [u8; 32] {
    Sha256::digest(b"").into()
}

pub fn hash_password(password: &str) -> [u8; 32] {
    Sha256::digest(password.as_bytes()).into()
}

/// `hash(password_hash || peer_challenge)` (§4.6 step 5).
fn solve(challenge: &[u8; CHALLENGE_LEN], password_hash: &[u8; 32]) -> [u8; SOLUTION_LEN] {
    let mut hasher = Sha256::new();
    hasher.update(password_hash);
    hasher.update(challenge);
    hasher.finalize().into()
}

/// Result of a successful handshake: what the peer told us about itself,
/// plus the framed transport ready for session traffic.
pub struct HandshakeOutcome {
    pub remote_info: RemoteBranchInfo,
    pub transport: MessageTransport,
}

/// A failed handshake, carrying the peer's UUID whenever the failure
/// happened after info exchange completed — the connection manager needs
/// it to blacklist the offending peer for `YogiError::is_per_peer_recoverable`
/// causes (§7 propagation policy) rather than just logging and forgetting.
pub struct HandshakeError {
    pub peer_uuid: Option<BranchUuid>,
    pub source: YogiError,
}

impl HandshakeError {
    fn new(peer_uuid: Option<BranchUuid>, source: YogiError) -> Self {
        Self { peer_uuid, source }
    }
}

impl From<YogiError> for HandshakeError {
    fn from(source: YogiError) -> Self {
        Self::new(None, source)
    }
}

/// Runs the handshake over an already-connected `stream`, in either
/// direction — info exchange and the challenge round are symmetric, so the
/// same function serves both the inbound (accepted) and outbound
/// (connected) side (§4.7 calls this identically for both).
pub async fn run(
    local_info: &LocalBranchInfo,
    mut stream: TcpTransport,
    cancellation: &Cancellation,
) -> Result<HandshakeOutcome, HandshakeError> {
    let timeout = TimeoutNanos::from_raw(local_info.timeout.as_nanos() as i64)?;

    deadline_send(&mut stream, &local_info.encode(), timeout, cancellation).await?;
    let remote_info = read_remote_info(&mut stream, timeout, cancellation).await?;
    let peer_uuid = Some(remote_info.uuid);

    if remote_info.uuid == local_info.uuid {
        return Err(HandshakeError::new(peer_uuid, YogiError::LoopbackConnection));
    }
    if remote_info.net_name != local_info.net_name {
        return Err(HandshakeError::new(peer_uuid, YogiError::NetNameMismatch));
    }

    let mut own_challenge = [0u8; CHALLENGE_LEN];
    rand::thread_rng().fill_bytes(&mut own_challenge);
    deadline_send(&mut stream, &own_challenge, timeout, cancellation)
        .await
        .map_err(|err| HandshakeError::new(peer_uuid, err))?;
    let peer_challenge = read_exact_buf::<CHALLENGE_LEN>(&mut stream, timeout, cancellation)
        .await
        .map_err(|err| HandshakeError::new(peer_uuid, err))?;

    let our_solution = solve(&peer_challenge, &local_info.password_hash);
    deadline_send(&mut stream, &our_solution, timeout, cancellation)
        .await
        .map_err(|err| HandshakeError::new(peer_uuid, err))?;
    let peer_solution = read_exact_buf::<SOLUTION_LEN>(&mut stream, timeout, cancellation)
        .await
        .map_err(|err| HandshakeError::new(peer_uuid, err))?;

    let expected = solve(&own_challenge, &local_info.password_hash);
    if peer_solution != expected {
        return Err(HandshakeError::new(peer_uuid, YogiError::PasswordMismatch));
    }

    let transport = MessageTransport::new(
        stream,
        local_info.tx_queue_size,
        local_info.rx_queue_size,
        yogi_transport::DEFAULT_MAX_MESSAGE_SIZE,
    );
    Ok(HandshakeOutcome {
        remote_info,
        transport,
    })
}

async fn read_remote_info(
    stream: &mut TcpTransport,
    timeout: TimeoutNanos,
    cancellation: &Cancellation,
) -> Result<RemoteBranchInfo, YogiError> {
    let header = read_exact(stream, LocalBranchInfo::header_len(), timeout, cancellation).await?;
    let body_size = LocalBranchInfo::body_size_from_header(&header)? as usize;
    let body = read_exact(stream, body_size, timeout, cancellation).await?;
    RemoteBranchInfo::decode(&body)
}

async fn read_exact_buf<const N: usize>(
    stream: &mut TcpTransport,
    timeout: TimeoutNanos,
    cancellation: &Cancellation,
) -> Result<[u8; N], YogiError> {
    let bytes = read_exact(stream, N, timeout, cancellation).await?;
    let mut out = [0u8; N];
    out.copy_from_slice(&bytes);
    Ok(out)
}

async fn read_exact(
    stream: &mut TcpTransport,
    len: usize,
    timeout: TimeoutNanos,
    cancellation: &Cancellation,
) -> Result<Vec<u8>, YogiError> {
    let mut buf = vec![0u8; len];
    let mut filled = 0;
    while filled < len {
        let read = deadline_read(stream, &mut buf[filled..], timeout, cancellation).await?;
        if read == 0 {
            return Err(YogiError::RwSocketFailed(
                "peer closed connection during handshake".to_string(),
            ));
        }
        filled += read;
    }
    Ok(buf)
}

async fn deadline_send(
    stream: &mut TcpTransport,
    payload: &[u8],
    timeout: TimeoutNanos,
    cancellation: &Cancellation,
) -> Result<(), YogiError> {
    run_cancelable(timeout, cancellation, stream.write_all(payload)).await
}

async fn deadline_read(
    stream: &mut TcpTransport,
    buf: &mut [u8],
    timeout: TimeoutNanos,
    cancellation: &Cancellation,
) -> Result<usize, YogiError> {
    run_cancelable(timeout, cancellation, stream.read(buf)).await
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn empty_password_hash_is_a_fixed_constant() {
        assert_eq!(empty_password_hash(), empty_password_hash());
        assert_eq!(hash_password(""), empty_password_hash());
    }

    #[test]
    fn hash_password_differs_per_input() {
        assert_ne!(hash_password("a"), hash_password("b"));
    }

    #[test]
    fn solve_is_deterministic_for_the_same_challenge_and_hash() {
        let hash = hash_password("secret");
        let challenge = [7u8; CHALLENGE_LEN];
        assert_eq!(solve(&challenge, &hash), solve(&challenge, &hash));
    }

    #[test]
    fn solve_differs_when_the_challenge_differs() {
        let hash = hash_password("secret");
        let a = solve(&[1u8; CHALLENGE_LEN], &hash);
        let b = solve(&[2u8; CHALLENGE_LEN], &hash);
        assert_ne!(a, b);
    }

    #[test]
    fn solve_differs_when_the_password_hash_differs() {
        let challenge = [9u8; CHALLENGE_LEN];
        let a = solve(&challenge, &hash_password("x"));
        let b = solve(&challenge, &hash_password("y"));
        assert_ne!(a, b);
    }
}
