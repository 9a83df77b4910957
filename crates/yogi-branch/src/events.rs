//! Branch events (§3/§4.8): discovery, info exchange, connect completion,
//! connection loss. One handler is registered at a time; registering a new
//! one cancels whatever was previously waiting with [`YogiError::Canceled`].

use yogi_core::{BranchUuid, YogiError, YogiErrorKind};

bitflags::bitflags! {
    #[derive(Clone, Copy, Debug, PartialEq, Eq)]
    pub struct BranchEventKind: u32 {
        const NONE = 0;
        const BRANCH_DISCOVERED = 1 << 0;
        const BRANCH_QUERIED = 1 << 1;
        const CONNECT_FINISHED = 1 << 2;
        const CONNECTION_LOST = 1 << 3;
        const ALL = Self::BRANCH_DISCOVERED.bits()
            | Self::BRANCH_QUERIED.bits()
            | Self::CONNECT_FINISHED.bits()
            | Self::CONNECTION_LOST.bits();
    }
}

/// One observed transition, delivered to whoever is currently awaiting
/// events for a matching [`BranchEventKind`] bit.
#[derive(Clone, Debug)]
pub struct BranchEvent {
    pub kind: BranchEventKind,
    pub uuid: BranchUuid,
    pub result: Result<(), YogiErrorKind>,
    pub json_details: String,
}

impl BranchEvent {
    pub fn discovered(uuid: BranchUuid, tcp_host: &str, tcp_port: u16) -> Self {
        Self {
            kind: BranchEventKind::BRANCH_DISCOVERED,
            uuid,
            result: Ok(()),
            json_details: format!(r#"{{"tcp_server_address":"{tcp_host}","tcp_server_port":{tcp_port}}}"#),
        }
    }

    pub fn queried(uuid: BranchUuid, info_json: String) -> Self {
        Self {
            kind: BranchEventKind::BRANCH_QUERIED,
            uuid,
            result: Ok(()),
            json_details: info_json,
        }
    }

    pub fn connect_finished(uuid: BranchUuid, outcome: Result<(), &YogiError>) -> Self {
        let (result, json_details) = match outcome {
            Ok(()) => (Ok(()), "{}".to_string()),
            Err(err) => (
                Err(YogiErrorKind::from(err)),
                format!(r#"{{"description":"{err}"}}"#),
            ),
        };
        Self {
            kind: BranchEventKind::CONNECT_FINISHED,
            uuid,
            result,
            json_details,
        }
    }

    pub fn connection_lost(uuid: BranchUuid, cause: &YogiError) -> Self {
        Self {
            kind: BranchEventKind::CONNECTION_LOST,
            uuid,
            result: Err(YogiErrorKind::from(cause)),
            json_details: format!(r#"{{"description":"{cause}"}}"#),
        }
    }

    pub fn canceled(kind: BranchEventKind) -> Self {
        Self {
            kind,
            uuid: BranchUuid::from_bytes([0; 16]),
            result: Err(YogiErrorKind::Canceled),
            json_details: "{}".to_string(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn all_is_the_union_of_every_named_bit() {
        assert!(BranchEventKind::ALL.contains(BranchEventKind::BRANCH_DISCOVERED));
        assert!(BranchEventKind::ALL.contains(BranchEventKind::BRANCH_QUERIED));
        assert!(BranchEventKind::ALL.contains(BranchEventKind::CONNECT_FINISHED));
        assert!(BranchEventKind::ALL.contains(BranchEventKind::CONNECTION_LOST));
    }

    #[test]
    fn canceled_event_carries_the_canceled_error_kind() {
        let event = BranchEvent::canceled(BranchEventKind::CONNECT_FINISHED);
        assert_eq!(event.kind, BranchEventKind::CONNECT_FINISHED);
        assert_eq!(event.result, Err(YogiErrorKind::Canceled));
    }

    #[test]
    fn connect_finished_carries_the_error_kind_on_failure() {
        let uuid = BranchUuid::generate();
        let err = YogiError::PasswordMismatch;
        let event = BranchEvent::connect_finished(uuid, Err(&err));
        assert_eq!(event.uuid, uuid);
        assert_eq!(event.result, Err(YogiErrorKind::from(&err)));
    }
}
