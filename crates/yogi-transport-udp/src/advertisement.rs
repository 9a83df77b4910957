//! The fixed-size UDP advertisement frame (§3, §6): 24 bytes, network byte
//! order, `magic(4) | version_major(1) | version_minor(1) | uuid(16) |
//! tcp_port(2)`.

use yogi_core::{BranchUuid, YogiError};
use yogi_transport::{Version, MAGIC};

pub const ENCODED_LEN: usize = 24;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Advertisement {
    pub uuid: BranchUuid,
    pub tcp_port: u16,
}

impl Advertisement {
    pub fn encode(&self, version: Version) -> [u8; ENCODED_LEN] {
        let mut frame = [0u8; ENCODED_LEN];
        frame[0..4].copy_from_slice(&MAGIC);
        frame[4] = version.major;
        frame[5] = version.minor;
        frame[6..22].copy_from_slice(&self.uuid.as_bytes());
        frame[22..24].copy_from_slice(&self.tcp_port.to_be_bytes());
        frame
    }

    /// Decodes a received datagram. Returns `Err(InvalidMagicPrefix)` for a
    /// mismatched magic (dropped silently by the caller per §4.5) and
    /// `Err(IncompatibleVersion)` for a major-version mismatch (reported as
    /// a one-shot event per remote UUID per §4.5). Any length other than
    /// exactly 24 bytes is rejected the same way a magic mismatch is.
    pub fn decode(datagram: &[u8]) -> Result<Self, YogiError> {
        if datagram.len() != ENCODED_LEN {
            return Err(YogiError::InvalidMagicPrefix);
        }
        if datagram[0..4] != MAGIC {
            return Err(YogiError::InvalidMagicPrefix);
        }
        let peer_version = Version {
            major: datagram[4],
            minor: datagram[5],
            patch: 0,
        };
        if !Version::CURRENT.is_compatible_with(&peer_version) {
            return Err(YogiError::IncompatibleVersion);
        }
        let mut uuid_bytes = [0u8; 16];
        uuid_bytes.copy_from_slice(&datagram[6..22]);
        let tcp_port = u16::from_be_bytes([datagram[22], datagram[23]]);
        Ok(Self {
            uuid: BranchUuid::from_bytes(uuid_bytes),
            tcp_port,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn round_trips_through_encode_decode() {
        let advert = Advertisement {
            uuid: BranchUuid::generate(),
            tcp_port: 54321,
        };
        let frame = advert.encode(Version::CURRENT);
        assert_eq!(frame.len(), ENCODED_LEN);
        let decoded = Advertisement::decode(&frame).expect("decode");
        assert_eq!(decoded, advert);
    }

    #[test]
    fn rejects_wrong_length() {
        let advert = Advertisement {
            uuid: BranchUuid::generate(),
            tcp_port: 1,
        };
        let frame = advert.encode(Version::CURRENT);
        assert!(Advertisement::decode(&frame[..ENCODED_LEN - 1]).is_err());
    }

    #[test]
    fn rejects_bad_magic() {
        let advert = Advertisement {
            uuid: BranchUuid::generate(),
            tcp_port: 1,
        };
        let mut frame = advert.encode(Version::CURRENT);
        frame[0] = b'X';
        assert!(matches!(
            Advertisement::decode(&frame),
            Err(YogiError::InvalidMagicPrefix)
        ));
    }

    #[test]
    fn rejects_incompatible_major_version() {
        let advert = Advertisement {
            uuid: BranchUuid::generate(),
            tcp_port: 1,
        };
        let mut frame = advert.encode(Version::CURRENT);
        frame[4] = Version::CURRENT.major.wrapping_add(1);
        assert!(matches!(
            Advertisement::decode(&frame),
            Err(YogiError::IncompatibleVersion)
        ));
    }
}
