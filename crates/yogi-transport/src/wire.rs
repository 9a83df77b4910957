//! Constants and small value types shared by every wire format in the
//! branch subsystem (§6): the 4-byte magic prefix and the three-part
//! protocol version used by both the UDP advertisement and the TCP info
//! exchange.

/// `"YOGI"` in ASCII, the magic prefix gating every advertisement and info
/// message (§3, §6).
pub const MAGIC: [u8; 4] = *b"YOGI";

/// Protocol version this implementation speaks. A peer whose major version
/// differs is incompatible (§4.6 step 2); minor/patch differences are
/// tolerated.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Version {
    pub major: u8,
    pub minor: u8,
    pub patch: u8,
}

impl Version {
    pub const CURRENT: Version = Version {
        major: 1,
        minor: 0,
        patch: 0,
    };

    pub fn is_compatible_with(&self, other: &Version) -> bool {
        self.major == other.major
    }
}

/// Default ceiling on a single framed message's payload size (§6 constants
/// surface, "max message size"). A varint length prefix can in principle
/// describe up to `2^32 - 1` bytes; this is the practical default enforced
/// by [`crate`]'s framing layer before that.
pub const DEFAULT_MAX_MESSAGE_SIZE: u32 = 1 << 20;
