//! yogi-core: the handle/object lifecycle and asynchronous execution context
//! shared by every other Yogi crate.
//!
//! This crate deliberately knows nothing about branches, discovery or
//! framing; it only provides the process-wide plumbing (C1 execution
//! context, C2 handle registry, error taxonomy, identifiers, cancellation)
//! that those components are built on top of.

pub mod cancellation;
pub mod error;
pub mod handle;
pub mod ids;
pub mod runtime;

pub use cancellation::{Cancellation, TimeoutNanos};
pub use error::{Result, YogiError, YogiErrorKind};
pub use handle::{Handle, HandleRegistry};
pub use ids::{BranchUuid, OperationId, OperationIdAllocator};
pub use runtime::Context;
