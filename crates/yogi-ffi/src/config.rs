//! C-compatible branch construction parameters (§4.9), converted into the
//! Rust-native [`yogi_branch::BranchConfig`].
//!
//! String fields are nullable `char*`; a null pointer selects the facade's
//! own default (§4.9 "Argument defaults") rather than an empty string.

use std::ffi::{c_char, CStr};
use std::net::{IpAddr, SocketAddr};
use std::str::FromStr;
use std::time::Duration;
use yogi_branch::BranchConfig;
use yogi_core::YogiError;
use yogi_transport::AdvertisingInterface;

/// Mirrors `BranchConfig` with ABI-safe field types. A default instance
/// (`yogi_branch_config_init`-equivalent callers should start from) matches
/// [`BranchConfig::default`] field for field.
#[repr(C)]
pub struct RawBranchConfig {
    pub name: *const c_char,
    pub description: *const c_char,
    pub net_name: *const c_char,
    pub path: *const c_char,
    pub password: *const c_char,

    pub tcp_server_address: *const c_char,
    pub tcp_server_port: u16,

    pub advertising_bind_address: *const c_char,
    pub advertising_group_address: *const c_char,
    pub advertising_port: u16,
    /// Nanoseconds; `-1` = infinite/ghost-only, `0` = "use default" (§9 open
    /// question), `>0` = explicit interval.
    pub advertising_interval_nanos: i64,

    pub ghost_mode: u8,
    /// Nanoseconds; `0` selects the facade default.
    pub timeout_nanos: u64,
    /// `0` selects the facade default.
    pub tx_queue_size: usize,
    /// `0` selects the facade default.
    pub rx_queue_size: usize,
}

/// # Safety
/// Every non-null `*const c_char` field must point to a valid, NUL-terminated
/// UTF-8 string that outlives this call.
pub unsafe fn raw_config_to_branch_config(raw: &RawBranchConfig) -> Result<BranchConfig, YogiError> {
    let mut config = BranchConfig::default();

    if let Some(name) = unsafe { optional_str(raw.name)? } {
        config.name = Some(name);
    }
    if let Some(description) = unsafe { optional_str(raw.description)? } {
        config.description = description;
    }
    if let Some(net_name) = unsafe { optional_str(raw.net_name)? } {
        config.net_name = Some(net_name);
    }
    if let Some(path) = unsafe { optional_str(raw.path)? } {
        config.path = Some(path);
    }
    if let Some(password) = unsafe { optional_str(raw.password)? } {
        config.password = Some(password);
    }

    let tcp_ip = match unsafe { optional_str(raw.tcp_server_address)? } {
        Some(text) => parse_ip(&text)?,
        None => config.tcp_server_endpoint.ip(),
    };
    config.tcp_server_endpoint = SocketAddr::new(tcp_ip, raw.tcp_server_port);

    let bind_addr = match unsafe { optional_str(raw.advertising_bind_address)? } {
        Some(text) => parse_ip(&text)?,
        None => config.advertising_interfaces[0].bind_addr,
    };
    let multicast_group = match unsafe { optional_str(raw.advertising_group_address)? } {
        Some(text) => parse_ip(&text)?,
        None => config.advertising_interfaces[0].multicast_group,
    };
    let advertising_port = if raw.advertising_port == 0 {
        config.advertising_interfaces[0].port
    } else {
        raw.advertising_port
    };
    config.advertising_interfaces = vec![AdvertisingInterface {
        bind_addr,
        multicast_group,
        port: advertising_port,
    }];

    config.ghost_mode = raw.ghost_mode != 0;
    config.advertising_interval = match raw.advertising_interval_nanos {
        0 => config.advertising_interval,
        -1 => None,
        nanos if nanos > 0 => Some(Duration::from_nanos(nanos as u64)),
        nanos => {
            return Err(YogiError::InvalidParam(format!(
                "advertising_interval_nanos must be -1, 0, or positive, got {nanos}"
            )))
        }
    };
    if raw.timeout_nanos != 0 {
        config.timeout = Duration::from_nanos(raw.timeout_nanos);
    }
    if raw.tx_queue_size != 0 {
        config.tx_queue_size = raw.tx_queue_size;
    }
    if raw.rx_queue_size != 0 {
        config.rx_queue_size = raw.rx_queue_size;
    }

    Ok(config)
}

unsafe fn optional_str(ptr: *const c_char) -> Result<Option<String>, YogiError> {
    if ptr.is_null() {
        return Ok(None);
    }
    let text = unsafe { CStr::from_ptr(ptr) }
        .to_str()
        .map_err(|err| YogiError::InvalidParam(format!("field is not valid UTF-8: {err}")))?;
    Ok(Some(text.to_string()))
}

fn parse_ip(text: &str) -> Result<IpAddr, YogiError> {
    IpAddr::from_str(text).map_err(|err| YogiError::InvalidParam(format!("invalid IP address {text:?}: {err}")))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn all_null_config() -> RawBranchConfig {
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
            ghost_mode: 0,
            timeout_nanos: 0,
            tx_queue_size: 0,
            rx_queue_size: 0,
        }
    }

    #[test]
    fn all_null_and_zero_fields_fall_back_to_branch_config_defaults() {
        let raw = all_null_config();
        let config = unsafe { raw_config_to_branch_config(&raw) }.unwrap();
        let default = BranchConfig::default();
        assert_eq!(config.name, default.name);
        assert_eq!(config.timeout, default.timeout);
        assert_eq!(config.tx_queue_size, default.tx_queue_size);
        assert_eq!(config.advertising_interval, default.advertising_interval);
    }

    #[test]
    fn negative_interval_below_sentinel_is_rejected() {
        let mut raw = all_null_config();
        raw.advertising_interval_nanos = -2;
        assert!(unsafe { raw_config_to_branch_config(&raw) }.is_err());
    }

    #[test]
    fn minus_one_interval_selects_ghost_style_no_advertising() {
        let mut raw = all_null_config();
        raw.advertising_interval_nanos = -1;
        let config = unsafe { raw_config_to_branch_config(&raw) }.unwrap();
        assert_eq!(config.advertising_interval, None);
    }

    #[test]
    fn explicit_name_overrides_the_default() {
        let name = std::ffi::CString::new("custom-name").unwrap();
        let mut raw = all_null_config();
        raw.name = name.as_ptr();
        let config = unsafe { raw_config_to_branch_config(&raw) }.unwrap();
        assert_eq!(config.name.as_deref(), Some("custom-name"));
    }
}
