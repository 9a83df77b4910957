//! yogi-transport: addressing and wire constants shared by the TCP
//! (§4.3/§4.4) and UDP (§4.5) transport implementations.
//!
//! Byte-stream transports themselves are expressed with Tokio's
//! `AsyncRead`/`AsyncWrite` bounds directly rather than a bespoke trait;
//! this crate only owns the types both sides of the handshake need to agree
//! on regardless of which concrete socket implementation is underneath.

pub mod addr;
pub mod wire;

pub use addr::{AdvertisingInterface, TransportSocketAddr};
pub use wire::{Version, DEFAULT_MAX_MESSAGE_SIZE, MAGIC};
