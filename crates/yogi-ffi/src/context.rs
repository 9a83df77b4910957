//! `extern "C"` wrapper over [`yogi_core::Context`] (C1).

use crate::{registry, YOGI_OK};
use yogi_core::{cancellation::TimeoutNanos, Context, Handle, YogiError};

/// Creates a context and writes its handle into `*handle_out`.
///
/// # Safety
/// `handle_out` must point to valid, writable `u64` storage.
#[no_mangle]
pub unsafe extern "C" fn yogi_context_create(handle_out: *mut u64) -> i32 {
    if handle_out.is_null() {
        return YogiError::InvalidParam("handle_out must not be null".into()).abi_code();
    }
    let context = match Context::new() {
        Ok(ctx) => ctx,
        Err(err) => return err.abi_code(),
    };
    match registry().register("Context", context, &[]) {
        Ok(handle) => {
            unsafe {
                *handle_out = handle.as_raw();
            }
            YOGI_OK
        }
        Err(err) => err.abi_code(),
    }
}

fn lookup(handle: u64) -> Result<std::sync::Arc<Context>, YogiError> {
    registry().lookup::<Context>(Handle::from_raw(handle))
}

#[no_mangle]
pub extern "C" fn yogi_context_poll(handle: u64, count_out: *mut i32) -> i32 {
    with_context(handle, |ctx| {
        let count = ctx.poll();
        write_count(count_out, count)
    })
}

#[no_mangle]
pub extern "C" fn yogi_context_poll_one(handle: u64, count_out: *mut i32) -> i32 {
    with_context(handle, |ctx| {
        let count = ctx.poll_one();
        write_count(count_out, count)
    })
}

#[no_mangle]
pub extern "C" fn yogi_context_run(handle: u64, timeout_nanos: i64, count_out: *mut i32) -> i32 {
    with_context(handle, |ctx| {
        let timeout = match TimeoutNanos::from_raw(timeout_nanos) {
            Ok(t) => t,
            Err(err) => return err.abi_code(),
        };
        write_count(count_out, ctx.run(timeout))
    })
}

#[no_mangle]
pub extern "C" fn yogi_context_run_one(handle: u64, timeout_nanos: i64, count_out: *mut i32) -> i32 {
    with_context(handle, |ctx| {
        let timeout = match TimeoutNanos::from_raw(timeout_nanos) {
            Ok(t) => t,
            Err(err) => return err.abi_code(),
        };
        write_count(count_out, ctx.run_one(timeout))
    })
}

#[no_mangle]
pub extern "C" fn yogi_context_run_in_background(handle: u64) -> i32 {
    with_context(handle, |ctx| {
        ctx.run_in_background();
        YOGI_OK
    })
}

#[no_mangle]
pub extern "C" fn yogi_context_stop(handle: u64) -> i32 {
    with_context(handle, |ctx| {
        ctx.stop();
        YOGI_OK
    })
}

#[no_mangle]
pub extern "C" fn yogi_context_wait_for_running(handle: u64, timeout_nanos: i64) -> i32 {
    with_context(handle, |ctx| {
        let timeout = match TimeoutNanos::from_raw(timeout_nanos) {
            Ok(t) => t,
            Err(err) => return err.abi_code(),
        };
        match ctx.wait_for_running(timeout) {
            Ok(()) => YOGI_OK,
            Err(err) => err.abi_code(),
        }
    })
}

#[no_mangle]
pub extern "C" fn yogi_context_wait_for_stopped(handle: u64, timeout_nanos: i64) -> i32 {
    with_context(handle, |ctx| {
        let timeout = match TimeoutNanos::from_raw(timeout_nanos) {
            Ok(t) => t,
            Err(err) => return err.abi_code(),
        };
        match ctx.wait_for_stopped(timeout) {
            Ok(()) => YOGI_OK,
            Err(err) => err.abi_code(),
        }
    })
}

/// Destroys a context handle (§4.2): fails with `ObjectStillUsed` while a
/// branch still depends on it.
#[no_mangle]
pub extern "C" fn yogi_context_destroy(handle: u64) -> i32 {
    match registry().destroy(Handle::from_raw(handle)) {
        Ok(()) => YOGI_OK,
        Err(err) => err.abi_code(),
    }
}

pub(crate) fn context_handle(handle: u64) -> Result<std::sync::Arc<Context>, YogiError> {
    lookup(handle)
}

fn with_context(handle: u64, f: impl FnOnce(&Context) -> i32) -> i32 {
    match lookup(handle) {
        Ok(ctx) => f(ctx.as_ref()),
        Err(err) => err.abi_code(),
    }
}

fn write_count(count_out: *mut i32, count: usize) -> i32 {
    if !count_out.is_null() {
        unsafe {
            *count_out = count as i32;
        }
    }
    YOGI_OK
}
