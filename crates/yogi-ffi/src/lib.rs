//! C ABI surface (§6 "Handle ABI" / "Constants surface") over the
//! `yogi-core` execution context and the `yogi-branch` facade.
//!
//! Every entry point takes and returns opaque handles plus a stable
//! negative error code ([`YogiError::abi_code`]); nothing here is meant to
//! be called from Rust — `yogi-branch`'s own API is the Rust-native
//! surface. The seam this crate owns is bridging a C caller, who only ever
//! holds a context handle, onto the `tokio::runtime::Handle` that
//! `yogi-branch`'s `async fn`s assume is already entered when they call
//! bare `tokio::spawn` (see DESIGN.md for the two bridging shapes used
//! below: `block_on` for synchronous-looking calls, `spawn` + `Context::post`
//! for callback-style ones).

mod branch;
mod config;
mod constants;
mod context;

pub use branch::*;
pub use config::RawBranchConfig;
pub use constants::{yogi_constant, ConstantId};
pub use context::*;

use std::sync::OnceLock;
use yogi_core::HandleRegistry;

/// Process-wide handle table (§2/§4.2): one instance bounded by library
/// load/unload, mirroring the "global handle table" design note in §9.
static REGISTRY: OnceLock<HandleRegistry> = OnceLock::new();

fn registry() -> &'static HandleRegistry {
    REGISTRY.get_or_init(HandleRegistry::new)
}

const YOGI_OK: i32 = 0;

/// Writes `text` into `(buf, buf_len)`, NUL-terminated, failing with
/// `BufferTooSmall` if it doesn't fit. Shared by every `_json`/string
/// ABI getter.
unsafe fn write_c_string(text: &str, buf: *mut u8, buf_len: usize) -> i32 {
    if buf.is_null() {
        return yogi_core::YogiError::InvalidParam("buf must not be null".into()).abi_code();
    }
    let bytes = text.as_bytes();
    if bytes.len() + 1 > buf_len {
        return yogi_core::YogiError::BufferTooSmall.abi_code();
    }
    unsafe {
        std::ptr::copy_nonoverlapping(bytes.as_ptr(), buf, bytes.len());
        *buf.add(bytes.len()) = 0;
    }
    YOGI_OK
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::ffi::CString;

    fn ghost_config() -> RawBranchConfig {
        RawBranchConfig {
            name: std::ptr::null(),
            description: std::ptr::null(),
            net_name: std::ptr::null(),
            path: std::ptr::null(),
            password: std::ptr::null(),
            tcp_server_address: std::ptr::null(),
            tcp_server_port: 0,
            advertising_bind_address: std::ptr::null(),
            advertising_group_address: std::ptr::null(),
            advertising_port: 0,
            advertising_interval_nanos: 0,
            ghost_mode: 1,
            timeout_nanos: 0,
            tx_queue_size: 0,
            rx_queue_size: 0,
        }
    }

    #[test]
    fn context_and_ghost_branch_round_trip_through_the_abi() {
        let mut context_handle = 0u64;
        assert_eq!(unsafe { yogi_context_create(&mut context_handle) }, 0);

        let config = ghost_config();
        let mut branch_handle = 0u64;
        assert_eq!(
            unsafe { yogi_branch_create(context_handle, &config, &mut branch_handle) },
            0
        );

        let mut buf = [0u8; 1024];
        assert_eq!(unsafe { yogi_branch_get_info(branch_handle, buf.as_mut_ptr(), buf.len()) }, 0);
        let info = unsafe { CString::from_vec_unchecked(buf.iter().take_while(|b| **b != 0).copied().collect()) };
        let json: serde_json::Value = serde_json::from_str(info.to_str().unwrap()).unwrap();
        assert!(json["uuid"].is_string());

        // destroying the context while the branch still depends on it fails.
        assert_eq!(
            yogi_context_destroy(context_handle),
            yogi_core::YogiError::ObjectStillUsed.abi_code()
        );

        assert_eq!(yogi_branch_destroy(branch_handle), 0);
        assert_eq!(yogi_context_destroy(context_handle), 0);
    }

    #[test]
    fn destroying_an_unknown_handle_fails_with_invalid_handle() {
        assert_eq!(
            yogi_context_destroy(u64::MAX),
            yogi_core::YogiError::InvalidHandle.abi_code()
        );
    }
}
