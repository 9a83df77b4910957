//! `extern "C"` wrapper over [`yogi_branch::Branch`] (C9), bridged onto
//! whichever [`yogi_core::Context`] the branch was created on.
//!
//! Two call shapes, per DESIGN.md's resolution of the context↔branch
//! bridging question:
//! - **Blocking calls** (`yogi_branch_create`, `yogi_branch_send_broadcast`)
//!   run their future with `context.reactor().block_on(..)`, which enters
//!   the reactor for the call's duration so any bare `tokio::spawn` inside
//!   `yogi-branch` resolves against it.
//! - **Callback-style calls** (`yogi_branch_await_event`,
//!   `yogi_branch_send_broadcast_async`, `yogi_branch_receive_broadcast`)
//!   spawn their future on `context.reactor()` and deliver the result by
//!   posting a closure back onto the context (`Context::post`), so the C
//!   callback still runs through C1's single serialization point.

use crate::config::{raw_config_to_branch_config, RawBranchConfig};
use crate::context::context_handle;
use crate::{registry, YOGI_OK};
use std::ffi::{c_char, c_void, CString};
use std::sync::Arc;
use yogi_branch::{Branch, BranchEventKind};
use yogi_core::{Cancellation, Context, Handle, OperationId, YogiError};

struct BranchHandle {
    context: Arc<Context>,
    branch: Branch,
}

fn lookup(handle: u64) -> Result<Arc<BranchHandle>, YogiError> {
    registry().lookup::<BranchHandle>(Handle::from_raw(handle))
}

/// Creates a branch attached to `context_handle`'s reactor (§4.9).
///
/// # Safety
/// `config` must point to a valid [`RawBranchConfig`] whose string fields
/// (if non-null) are valid NUL-terminated UTF-8 for the duration of this
/// call. `branch_handle_out` must point to valid, writable `u64` storage.
#[no_mangle]
pub unsafe extern "C" fn yogi_branch_create(
    context_handle_raw: u64,
    config: *const RawBranchConfig,
    branch_handle_out: *mut u64,
) -> i32 {
    if config.is_null() || branch_handle_out.is_null() {
        return YogiError::InvalidParam("config/branch_handle_out must not be null".into()).abi_code();
    }
    let context = match context_handle(context_handle_raw) {
        Ok(ctx) => ctx,
        Err(err) => return err.abi_code(),
    };
    let branch_config = match unsafe { raw_config_to_branch_config(&*config) } {
        Ok(cfg) => cfg,
        Err(err) => return err.abi_code(),
    };

    let branch = match context.reactor().block_on(Branch::new(branch_config)) {
        Ok(branch) => branch,
        Err(err) => return err.abi_code(),
    };

    let entry = BranchHandle {
        context: Arc::clone(&context),
        branch,
    };
    match registry().register("Branch", entry, &[Handle::from_raw(context_handle_raw)]) {
        Ok(handle) => {
            unsafe {
                *branch_handle_out = handle.as_raw();
            }
            YOGI_OK
        }
        Err(err) => err.abi_code(),
    }
}

#[no_mangle]
pub extern "C" fn yogi_branch_destroy(handle: u64) -> i32 {
    match registry().destroy(Handle::from_raw(handle)) {
        Ok(()) => YOGI_OK,
        Err(err) => err.abi_code(),
    }
}

/// `get_info() -> json` (§4.9/§6).
///
/// # Safety
/// `buf` must point to at least `buf_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn yogi_branch_get_info(handle: u64, buf: *mut u8, buf_len: usize) -> i32 {
    let entry = match lookup(handle) {
        Ok(entry) => entry,
        Err(err) => return err.abi_code(),
    };
    let json = entry.branch.get_info_json().to_string();
    unsafe { crate::write_c_string(&json, buf, buf_len) }
}

/// `get_connected_branches() -> list<json>` (§4.9/§6), rendered as a single
/// JSON array.
///
/// # Safety
/// `buf` must point to at least `buf_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn yogi_branch_get_connected_branches(handle: u64, buf: *mut u8, buf_len: usize) -> i32 {
    let entry = match lookup(handle) {
        Ok(entry) => entry,
        Err(err) => return err.abi_code(),
    };
    let json = serde_json::Value::Array(entry.branch.get_connected_branches_json()).to_string();
    unsafe { crate::write_c_string(&json, buf, buf_len) }
}

/// Invoked from the owning context's task queue (§4.1's serialization
/// contract) with `(result_code, event_kind_bits, uuid_bytes[16],
/// json_details, userarg)`. `result_code` is `0` on success, a negative
/// [`YogiError::abi_code`]-shaped sentinel otherwise.
pub type EventCallback =
    extern "C" fn(i32, u32, *const u8, *const c_char, *mut c_void) -> ();

struct CallbackUserArg(*mut c_void);
unsafe impl Send for CallbackUserArg {}

/// `await_event(mask, handler)` (§4.8/§4.9): registers interest in events
/// matching `event_mask`, replacing (and canceling with `Canceled`) any
/// previously registered handler on this branch.
///
/// # Safety
/// `callback` must be safe to call from the context's worker thread with
/// `userarg` passed through unchanged; its lifetime must outlive every
/// invocation this registration can produce.
#[no_mangle]
pub unsafe extern "C" fn yogi_branch_await_event(
    handle: u64,
    event_mask: u32,
    callback: EventCallback,
    userarg: *mut c_void,
) -> i32 {
    let entry = match lookup(handle) {
        Ok(entry) => entry,
        Err(err) => return err.abi_code(),
    };
    let kind = BranchEventKind::from_bits_truncate(event_mask);
    let userarg = CallbackUserArg(userarg);

    entry.context.reactor().spawn({
        let entry = Arc::clone(&entry);
        async move {
            let outcome = entry.branch.await_event(kind).await;
            entry.context.post(move || {
                let userarg = userarg;
                match outcome {
                    Ok(event) => {
                        let uuid = event.uuid.as_bytes();
                        let json = CString::new(event.json_details).unwrap_or_default();
                        let result_code = match event.result {
                            Ok(()) => 0,
                            Err(kind) => YogiError::Unknown(kind.to_string()).abi_code(),
                        };
                        callback(result_code, event.kind.bits(), uuid.as_ptr(), json.as_ptr(), userarg.0);
                    }
                    Err(err) => {
                        let json = CString::new("{}").unwrap();
                        callback(err.abi_code(), kind.bits(), std::ptr::null(), json.as_ptr(), userarg.0);
                    }
                }
            });
        }
    });
    YOGI_OK
}

#[no_mangle]
pub extern "C" fn yogi_branch_cancel_await_event(handle: u64) -> i32 {
    match lookup(handle) {
        Ok(entry) => {
            entry.branch.cancel_await_event();
            YOGI_OK
        }
        Err(err) => err.abi_code(),
    }
}

/// `send_broadcast(data, block) -> result` (§4.8), run to completion before
/// returning.
///
/// # Safety
/// `data` must point to at least `data_len` readable bytes for the
/// duration of this call.
#[no_mangle]
pub unsafe extern "C" fn yogi_branch_send_broadcast(
    handle: u64,
    data: *const u8,
    data_len: usize,
    block: u8,
) -> i32 {
    let entry = match lookup(handle) {
        Ok(entry) => entry,
        Err(err) => return err.abi_code(),
    };
    let payload = unsafe { std::slice::from_raw_parts(data, data_len) };
    let cancellation = Cancellation::new();
    let result = entry
        .context
        .reactor()
        .block_on(entry.branch.send_broadcast(payload, block != 0, &cancellation));
    match result {
        Ok(()) => YOGI_OK,
        Err(err) => err.abi_code(),
    }
}

/// Invoked once the tracked broadcast finishes or is canceled, with
/// `(result_code, userarg)`.
pub type BroadcastDoneCallback = extern "C" fn(i32, *mut c_void) -> ();

/// `send_broadcast_async(data, retry, handler) -> op_id` (§4.8). Allocates
/// the operation id synchronously (so a racing `yogi_branch_cancel_send_broadcast`
/// call is well-defined) and runs the fan-out on the reactor, delivering
/// the aggregate outcome through the context.
///
/// # Safety
/// `data` must point to at least `data_len` readable bytes for the
/// duration of this call (the payload is copied before returning).
/// `callback` must be safe to call from the context's worker thread.
#[no_mangle]
pub unsafe extern "C" fn yogi_branch_send_broadcast_async(
    handle: u64,
    data: *const u8,
    data_len: usize,
    retry: u8,
    callback: BroadcastDoneCallback,
    userarg: *mut c_void,
    op_id_out: *mut u64,
) -> i32 {
    let entry = match lookup(handle) {
        Ok(entry) => entry,
        Err(err) => return err.abi_code(),
    };
    let payload = unsafe { std::slice::from_raw_parts(data, data_len) }.to_vec();
    let op_id = entry.branch.begin_broadcast_async();
    if !op_id_out.is_null() {
        unsafe {
            *op_id_out = op_id.value();
        }
    }
    let userarg = CallbackUserArg(userarg);

    entry.context.reactor().spawn({
        let entry = Arc::clone(&entry);
        async move {
            let cancellation = Cancellation::new();
            let outcomes = entry
                .branch
                .send_broadcast_async(op_id, &payload, retry != 0, &cancellation)
                .await;
            entry.context.post(move || {
                let userarg = userarg;
                let result_code = outcomes
                    .iter()
                    .find_map(|(_, r)| r.as_ref().err().map(|e| e.abi_code()))
                    .unwrap_or(YOGI_OK);
                callback(result_code, userarg.0);
            });
        }
    });
    YOGI_OK
}

/// Cancels an in-flight `send_broadcast_async` operation (§4.8). A no-op if
/// `op_id` already completed.
#[no_mangle]
pub extern "C" fn yogi_branch_cancel_send_broadcast(handle: u64, op_id: u64) -> i32 {
    match lookup(handle) {
        Ok(entry) => {
            entry.branch.cancel_send_broadcast(OperationId::from_raw(op_id));
            YOGI_OK
        }
        Err(err) => err.abi_code(),
    }
}

/// Invoked once an inbound broadcast arrives (or the receive fails/is
/// canceled), with `(result_code, sender_uuid_bytes[16], size, userarg)`.
pub type BroadcastReceivedCallback = extern "C" fn(i32, *const u8, usize, *mut c_void) -> ();

/// `receive_broadcast(encoding, buf, handler)` (§4.8): at most one
/// outstanding receive per branch; a second call while one is in flight
/// fails immediately with `Busy`.
///
/// # Safety
/// `buf` must point to at least `buf_len` writable bytes that remain valid
/// until `callback` is invoked. `callback` must be safe to call from the
/// context's worker thread.
#[no_mangle]
pub unsafe extern "C" fn yogi_branch_receive_broadcast(
    handle: u64,
    buf: *mut u8,
    buf_len: usize,
    callback: BroadcastReceivedCallback,
    userarg: *mut c_void,
) -> i32 {
    let entry = match lookup(handle) {
        Ok(entry) => entry,
        Err(err) => return err.abi_code(),
    };
    struct RawBuf(*mut u8, usize);
    unsafe impl Send for RawBuf {}
    let raw_buf = RawBuf(buf, buf_len);
    let userarg = CallbackUserArg(userarg);

    entry.context.reactor().spawn({
        let entry = Arc::clone(&entry);
        async move {
            let mut scratch = vec![0u8; raw_buf.1];
            let cancellation = Cancellation::new();
            let outcome = entry.branch.receive_broadcast(&mut scratch, &cancellation).await;
            entry.context.post(move || {
                let userarg = userarg;
                let raw_buf = raw_buf;
                match outcome {
                    Ok((uuid, len)) => {
                        unsafe {
                            std::ptr::copy_nonoverlapping(scratch.as_ptr(), raw_buf.0, len);
                        }
                        let bytes = uuid.as_bytes();
                        callback(YOGI_OK, bytes.as_ptr(), len, userarg.0);
                    }
                    Err(err) => callback(err.abi_code(), std::ptr::null(), 0, userarg.0),
                }
            });
        }
    });
    YOGI_OK
}
