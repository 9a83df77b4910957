//! Maps `std::io::Error` onto the socket-family variants of [`YogiError`].
//!
//! Each call site names which operation failed so the same underlying
//! `io::Error` kind can still be attributed to e.g. `ConnectSocketFailed`
//! rather than `RwSocketFailed` depending on where it happened.

use std::io;
use yogi_core::YogiError;

pub enum SocketOp {
    Open,
    Bind,
    Listen,
    SetOption,
    Connect,
    Accept,
    Rw,
}

pub fn map_io_error(op: SocketOp, err: io::Error) -> YogiError {
    let detail = err.to_string();
    match op {
        SocketOp::Open => YogiError::OpenSocketFailed(detail),
        SocketOp::Bind => YogiError::BindSocketFailed(detail),
        SocketOp::Listen => YogiError::ListenSocketFailed(detail),
        SocketOp::SetOption => YogiError::SetSocketOptionFailed(detail),
        SocketOp::Connect => YogiError::ConnectSocketFailed(detail),
        SocketOp::Accept => YogiError::AcceptSocketFailed(detail),
        SocketOp::Rw => YogiError::RwSocketFailed(detail),
    }
}
