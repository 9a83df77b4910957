//! Stable error taxonomy shared by every Yogi component.
//!
//! The variants mirror the C ABI error enum: callers on the other side of the
//! handle boundary only ever see a negative integer code, so the ordering and
//! naming here is part of the wire contract, not an implementation detail.
//! Grouping follows the parameter/lifecycle/socket/protocol/config split used
//! throughout the branch subsystem design.

use std::fmt;

/// The single error type returned by fallible public operations.
#[derive(Debug, thiserror::Error)]
pub enum YogiError {
    // --- Parameter / handle -------------------------------------------------
    #[error("invalid parameter: {0}")]
    InvalidParam(String),
    #[error("invalid handle")]
    InvalidHandle,
    #[error("handle refers to an object of the wrong type")]
    WrongObjectType,
    #[error("allocation failed")]
    BadAlloc,

    // --- Lifecycle -----------------------------------------------------------
    #[error("object is still referenced by another object")]
    ObjectStillUsed,
    #[error("operation was canceled")]
    Canceled,
    #[error("operation cannot proceed right now")]
    Busy,
    #[error("operation timed out")]
    Timeout,
    #[error("timer expired")]
    TimerExpired,
    #[error("supplied buffer is too small")]
    BufferTooSmall,

    // --- Socket ----------------------------------------------------------------
    #[error("failed to open socket: {0}")]
    OpenSocketFailed(String),
    #[error("failed to bind socket: {0}")]
    BindSocketFailed(String),
    #[error("failed to listen on socket: {0}")]
    ListenSocketFailed(String),
    #[error("failed to set socket option: {0}")]
    SetSocketOptionFailed(String),
    #[error("failed to connect socket: {0}")]
    ConnectSocketFailed(String),
    #[error("failed to accept socket: {0}")]
    AcceptSocketFailed(String),
    #[error("socket read/write failed: {0}")]
    RwSocketFailed(String),
    #[error("failed to join multicast group: {0}")]
    JoinMulticastGroupFailed(String),

    // --- Protocol --------------------------------------------------------------
    #[error("invalid magic prefix")]
    InvalidMagicPrefix,
    #[error("incompatible protocol version")]
    IncompatibleVersion,
    #[error("failed to deserialize message: {0}")]
    DeserializeMsgFailed(String),
    #[error("connection is a loopback to ourselves")]
    LoopbackConnection,
    #[error("password mismatch")]
    PasswordMismatch,
    #[error("net name mismatch")]
    NetNameMismatch,
    #[error("duplicate branch name")]
    DuplicateBranchName,
    #[error("duplicate branch path")]
    DuplicateBranchPath,
    #[error("message exceeds the maximum allowed size")]
    MessageTooLarge,
    #[error("broadcast send queue is full")]
    TxQueueFull,

    // --- Config / parsing (external collaborators; kept for ABI completeness) --
    #[error("parsing command line failed: {0}")]
    ParsingCmdlineFailed(String),
    #[error("parsing JSON failed: {0}")]
    ParsingJsonFailed(String),
    #[error("parsing file failed: {0}")]
    ParsingFileFailed(String),
    #[error("configuration is not valid: {0}")]
    ConfigNotValid(String),
    #[error("help was requested")]
    HelpRequested,

    // --- Time/format -------------------------------------------------------------
    #[error("invalid time format")]
    InvalidTimeFormat,
    #[error("failed to parse time value")]
    ParsingTimeFailed,

    #[error("unknown error: {0}")]
    Unknown(String),
}

pub type Result<T> = std::result::Result<T, YogiError>;

impl YogiError {
    /// Stable negative error code for the C ABI surface (see §6 of the design).
    pub fn abi_code(&self) -> i32 {
        use YogiError::*;
        match self {
            Unknown(_) => -1,
            ObjectStillUsed => -2,
            BadAlloc => -3,
            InvalidParam(_) => -4,
            InvalidHandle => -5,
            WrongObjectType => -6,
            Canceled => -7,
            Busy => -8,
            Timeout => -9,
            TimerExpired => -10,
            BufferTooSmall => -11,
            OpenSocketFailed(_) => -12,
            BindSocketFailed(_) => -13,
            ListenSocketFailed(_) => -14,
            SetSocketOptionFailed(_) => -15,
            ConnectSocketFailed(_) => -16,
            AcceptSocketFailed(_) => -17,
            RwSocketFailed(_) => -18,
            JoinMulticastGroupFailed(_) => -19,
            InvalidMagicPrefix => -20,
            IncompatibleVersion => -21,
            DeserializeMsgFailed(_) => -22,
            LoopbackConnection => -23,
            PasswordMismatch => -24,
            NetNameMismatch => -25,
            DuplicateBranchName => -26,
            DuplicateBranchPath => -27,
            MessageTooLarge => -28,
            TxQueueFull => -29,
            ParsingCmdlineFailed(_) => -30,
            ParsingJsonFailed(_) => -31,
            ParsingFileFailed(_) => -32,
            ConfigNotValid(_) => -33,
            HelpRequested => -34,
            InvalidTimeFormat => -35,
            ParsingTimeFailed => -36,
        }
    }

    /// True for errors that the connection manager treats as a per-peer
    /// blacklisting cause rather than a branch-wide failure (§7 propagation
    /// policy).
    pub fn is_per_peer_recoverable(&self) -> bool {
        matches!(
            self,
            YogiError::IncompatibleVersion
                | YogiError::PasswordMismatch
                | YogiError::NetNameMismatch
                | YogiError::DuplicateBranchName
                | YogiError::DuplicateBranchPath
                | YogiError::LoopbackConnection
                | YogiError::InvalidMagicPrefix
                | YogiError::DeserializeMsgFailed(_)
                | YogiError::Timeout
        )
    }
}

/// Human-readable rendering used by `get_info`/event JSON payloads.
impl fmt::Display for YogiErrorKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{self:?}")
    }
}

/// Coarse classification, independent of the specific variant payload;
/// used when only the *kind* needs to travel across an event boundary
/// (e.g. into the `json_details` of a branch event).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum YogiErrorKind {
    Ok,
    InvalidParam,
    InvalidHandle,
    WrongObjectType,
    BadAlloc,
    ObjectStillUsed,
    Canceled,
    Busy,
    Timeout,
    TimerExpired,
    BufferTooSmall,
    Socket,
    Protocol,
    Config,
    Time,
    Unknown,
}

impl From<&YogiError> for YogiErrorKind {
    fn from(err: &YogiError) -> Self {
        use YogiError::*;
        match err {
            InvalidParam(_) => YogiErrorKind::InvalidParam,
            InvalidHandle => YogiErrorKind::InvalidHandle,
            WrongObjectType => YogiErrorKind::WrongObjectType,
            BadAlloc => YogiErrorKind::BadAlloc,
            ObjectStillUsed => YogiErrorKind::ObjectStillUsed,
            Canceled => YogiErrorKind::Canceled,
            Busy => YogiErrorKind::Busy,
            Timeout => YogiErrorKind::Timeout,
            TimerExpired => YogiErrorKind::TimerExpired,
            BufferTooSmall => YogiErrorKind::BufferTooSmall,
            OpenSocketFailed(_)
            | BindSocketFailed(_)
            | ListenSocketFailed(_)
            | SetSocketOptionFailed(_)
            | ConnectSocketFailed(_)
            | AcceptSocketFailed(_)
            | RwSocketFailed(_)
            | JoinMulticastGroupFailed(_) => YogiErrorKind::Socket,
            InvalidMagicPrefix
            | IncompatibleVersion
            | DeserializeMsgFailed(_)
            | LoopbackConnection
            | PasswordMismatch
            | NetNameMismatch
            | DuplicateBranchName
            | DuplicateBranchPath
            | MessageTooLarge
            | TxQueueFull => YogiErrorKind::Protocol,
            ParsingCmdlineFailed(_) | ParsingJsonFailed(_) | ParsingFileFailed(_)
            | ConfigNotValid(_) | HelpRequested => YogiErrorKind::Config,
            InvalidTimeFormat | ParsingTimeFailed => YogiErrorKind::Time,
            Unknown(_) => YogiErrorKind::Unknown,
        }
    }
}
