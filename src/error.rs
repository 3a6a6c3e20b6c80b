//! BGP error types

use thiserror::Error;

/// BGP error type
#[derive(Error, Debug)]
pub enum BgpError {
    /// Connection error
    #[error("Connection error: {0}")]
    ConnectionError(String),

    /// Protocol error
    #[error("Protocol error: {0}")]
    ProtocolError(String),

    /// Configuration error
    #[error("Configuration error: {0}")]
    ConfigurationError(String),

    /// IO error
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    /// Parse error
    #[error("Parse error: {0}")]
    ParseError(String),

    /// Timeout error
    #[error("Timeout error: {0}")]
    TimeoutError(String),

    /// Invalid state
    #[error("Invalid state: {0}")]
    InvalidState(String),
}

/// Result type for BGP operations
pub type Result<T> = std::result::Result<T, BgpError>;

/// Top-level NOTIFICATION error codes (RFC 4271 Section 4.5 / appendix).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum NotifErrorCode {
    MessageHeaderError = 1,
    OpenMessageError = 2,
    UpdateMessageError = 3,
    HoldTimerExpired = 4,
    FiniteStateMachineError = 5,
    Cease = 6,
}

/// Subcodes for MESSAGE_HEADER_ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum MsgHeaderErrSubcode {
    ConnectionNotSynchronised = 1,
    BadMessageLength = 2,
    BadMessageType = 3,
}

/// Subcodes for OPEN_MESSAGE_ERROR.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum OpenMsgErrSubcode {
    UnsupportedVersionNumber = 1,
    BadPeerAs = 2,
    BadBgpIdentifier = 3,
    UnsupportedOptionalParameter = 4,
    UnacceptableHoldTime = 6,
}

/// Subcodes for UPDATE_MESSAGE_ERROR. Only the subcode this crate can
/// actually detect (malformed length bookkeeping) is represented; full
/// path-attribute validation is out of scope.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(u8)]
pub enum UpdateMsgErrSubcode {
    MalformedAttributeList = 1,
}

/// The (code, subcode, data) triple carried by a NOTIFICATION message,
/// independent of the wire encoding in [`crate::codec`].
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NotificationPayload {
    pub code: u8,
    pub subcode: u8,
    pub data: Vec<u8>,
}

impl NotificationPayload {
    pub fn new(code: NotifErrorCode, subcode: u8) -> Self {
        Self {
            code: code as u8,
            subcode,
            data: Vec::new(),
        }
    }

    pub fn with_data(code: NotifErrorCode, subcode: u8, data: Vec<u8>) -> Self {
        Self {
            code: code as u8,
            subcode,
            data,
        }
    }

    pub fn header_err(subcode: MsgHeaderErrSubcode, data: Vec<u8>) -> Self {
        Self::with_data(NotifErrorCode::MessageHeaderError, subcode as u8, data)
    }

    pub fn open_err(subcode: OpenMsgErrSubcode) -> Self {
        Self::new(NotifErrorCode::OpenMessageError, subcode as u8)
    }

    pub fn update_err(subcode: UpdateMsgErrSubcode) -> Self {
        Self::new(NotifErrorCode::UpdateMessageError, subcode as u8)
    }

    pub fn hold_timer_expired() -> Self {
        Self::new(NotifErrorCode::HoldTimerExpired, 0)
    }

    pub fn fsm_error() -> Self {
        Self::new(NotifErrorCode::FiniteStateMachineError, 0)
    }

    pub fn cease() -> Self {
        Self::new(NotifErrorCode::Cease, 0)
    }
}
