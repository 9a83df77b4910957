//! Queryable constants surface (§6): version strings, defaults, and format
//! strings, each addressable by a stable integer id rather than requiring a
//! dedicated getter per value.

use crate::write_c_string;
use std::time::Duration;
use yogi_branch::{DEFAULT_ADVERTISING_GROUP, DEFAULT_ADVERTISING_PORT};
use yogi_core::YogiError;
use yogi_transport::{Version, DEFAULT_MAX_MESSAGE_SIZE};

/// Stable ids for [`yogi_constant`]; values are never renumbered once
/// shipped, matching the handle ABI's own stability contract.
#[repr(i32)]
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ConstantId {
    VersionString = 0,
    VersionMajor = 1,
    VersionMinor = 2,
    VersionPatch = 3,
    DefaultAdvertisingAddress = 4,
    DefaultAdvertisingPort = 5,
    DefaultAdvertisingIntervalNanos = 6,
    DefaultConnectionTimeoutNanos = 7,
    MaxMessageSize = 8,
}

impl ConstantId {
    fn from_raw(raw: i32) -> Result<Self, YogiError> {
        Ok(match raw {
            0 => Self::VersionString,
            1 => Self::VersionMajor,
            2 => Self::VersionMinor,
            3 => Self::VersionPatch,
            4 => Self::DefaultAdvertisingAddress,
            5 => Self::DefaultAdvertisingPort,
            6 => Self::DefaultAdvertisingIntervalNanos,
            7 => Self::DefaultConnectionTimeoutNanos,
            8 => Self::MaxMessageSize,
            other => {
                return Err(YogiError::InvalidParam(format!(
                    "unknown constant id {other}"
                )))
            }
        })
    }
}

/// Writes the requested constant's textual representation into `(buf,
/// buf_len)`, NUL-terminated. Integer-valued constants are rendered as
/// decimal text so every constant shares one accessor signature.
///
/// # Safety
/// `buf` must point to at least `buf_len` writable bytes.
#[no_mangle]
pub unsafe extern "C" fn yogi_constant(id: i32, buf: *mut u8, buf_len: usize) -> i32 {
    let id = match ConstantId::from_raw(id) {
        Ok(id) => id,
        Err(err) => return err.abi_code(),
    };
    let text = match id {
        ConstantId::VersionString => format!(
            "{}.{}.{}",
            Version::CURRENT.major,
            Version::CURRENT.minor,
            Version::CURRENT.patch
        ),
        ConstantId::VersionMajor => Version::CURRENT.major.to_string(),
        ConstantId::VersionMinor => Version::CURRENT.minor.to_string(),
        ConstantId::VersionPatch => Version::CURRENT.patch.to_string(),
        ConstantId::DefaultAdvertisingAddress => DEFAULT_ADVERTISING_GROUP.to_string(),
        ConstantId::DefaultAdvertisingPort => DEFAULT_ADVERTISING_PORT.to_string(),
        ConstantId::DefaultAdvertisingIntervalNanos => Duration::from_secs(1).as_nanos().to_string(),
        ConstantId::DefaultConnectionTimeoutNanos => Duration::from_secs(3).as_nanos().to_string(),
        ConstantId::MaxMessageSize => DEFAULT_MAX_MESSAGE_SIZE.to_string(),
    };
    unsafe { write_c_string(&text, buf, buf_len) }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_string_round_trips_through_the_buffer() {
        let mut buf = [0u8; 64];
        let rc = unsafe { yogi_constant(ConstantId::VersionString as i32, buf.as_mut_ptr(), buf.len()) };
        assert_eq!(rc, 0);
        let text = unsafe { std::ffi::CStr::from_ptr(buf.as_ptr() as *const std::os::raw::c_char) }
            .to_str()
            .unwrap();
        assert_eq!(text, "1.0.0");
    }

    #[test]
    fn undersized_buffer_fails_with_buffer_too_small() {
        let mut buf = [0u8; 1];
        let rc = unsafe { yogi_constant(ConstantId::DefaultAdvertisingAddress as i32, buf.as_mut_ptr(), buf.len()) };
        assert_eq!(rc, YogiError::BufferTooSmall.abi_code());
    }

    #[test]
    fn unknown_constant_id_is_rejected() {
        let mut buf = [0u8; 16];
        let rc = unsafe { yogi_constant(999, buf.as_mut_ptr(), buf.len()) };
        assert!(rc < 0);
    }
}
