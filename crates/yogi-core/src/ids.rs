//! Identifiers shared across the branch subsystem.
//!
//! `BranchUuid` is the canonical comparison key used for deduplication,
//! tie-breaking and event attribution (see §3 of the design). `OperationId`
//! tags cancelable asynchronous operations and is never reused within a
//! branch's lifetime.

use std::fmt;
use std::sync::atomic::{AtomicU64, Ordering};

/// A 128-bit value identifying one branch instance, generated once at
/// construction and never mutated afterwards.
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct BranchUuid(uuid::Uuid);

impl BranchUuid {
    /// Generates a fresh random UUID for a newly constructed branch.
    pub fn generate() -> Self {
        Self(uuid::Uuid::new_v4())
    }

    /// Wraps a UUID parsed off the wire (advertisement or info message).
    pub fn from_bytes(bytes: [u8; 16]) -> Self {
        Self(uuid::Uuid::from_bytes(bytes))
    }

    pub fn as_bytes(&self) -> [u8; 16] {
        *self.0.as_bytes()
    }
}

impl fmt::Display for BranchUuid {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Monotonically increasing per-branch tag identifying a cancelable async
/// operation. Allocation is lock-free; the counter never wraps in practice
/// (2^64 operations).
#[derive(Clone, Copy, Debug, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct OperationId(u64);

impl OperationId {
    /// Reinterprets a raw ABI value (e.g. received back from a C caller
    /// that previously got it from [`OperationId::value`]) as an id.
    pub fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    pub fn value(self) -> u64 {
        self.0
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "op#{}", self.0)
    }
}

/// Allocator for [`OperationId`]s, one per branch.
#[derive(Debug, Default)]
pub struct OperationIdAllocator {
    next: AtomicU64,
}

impl OperationIdAllocator {
    pub fn new() -> Self {
        Self {
            next: AtomicU64::new(1),
        }
    }

    pub fn next(&self) -> OperationId {
        OperationId(self.next.fetch_add(1, Ordering::Relaxed))
    }
}
