//! Session status and protocol error codes carried in every [`TxInfo`](crate::TxInfo).

use std::fmt;

use serde::{Deserialize, Serialize};

/// Lifecycle status of a pin request, as reported to the client.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum OpStatus {
    #[default]
    NotStarted = 0,
    Syncing = 1,
    Synced = 2,
    Closed = 3,
}

impl OpStatus {
    /// Parse a wire status byte.
    pub const fn from_u8(value: u8) -> Option<Self> {
        match value {
            0 => Some(Self::NotStarted),
            1 => Some(Self::Syncing),
            2 => Some(Self::Synced),
            3 => Some(Self::Closed),
            _ => None,
        }
    }

    /// Short lowercase name.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::NotStarted => "not_started",
            Self::Syncing => "syncing",
            Self::Synced => "synced",
            Self::Closed => "closed",
        }
    }
}

impl fmt::Display for OpStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Protocol error codes.
///
/// Codes are grouped by category: malformed input (1-9), not found (10-19),
/// authorization (20-29), lifecycle (30-39) and internal (40-49).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u16)]
pub enum ErrCode {
    #[default]
    Nil = 0,

    MalformedTid = 1,
    MalformedTx = 2,
    BadRequest = 3,
    InvalidUri = 4,
    InvalidTag = 5,

    CellNotFound = 10,
    RequestNotFound = 11,
    AttrNotFound = 12,

    AuthFailed = 20,
    LoginFailed = 21,
    SessionExpired = 22,
    InsufficientPermissions = 23,

    RequestClosed = 30,
    ShuttingDown = 31,
    NotConnected = 32,

    InternalErr = 40,
    Unimplemented = 41,
}

impl ErrCode {
    /// Parse a wire error code.
    pub const fn from_u16(value: u16) -> Option<Self> {
        match value {
            0 => Some(Self::Nil),
            1 => Some(Self::MalformedTid),
            2 => Some(Self::MalformedTx),
            3 => Some(Self::BadRequest),
            4 => Some(Self::InvalidUri),
            5 => Some(Self::InvalidTag),
            10 => Some(Self::CellNotFound),
            11 => Some(Self::RequestNotFound),
            12 => Some(Self::AttrNotFound),
            20 => Some(Self::AuthFailed),
            21 => Some(Self::LoginFailed),
            22 => Some(Self::SessionExpired),
            23 => Some(Self::InsufficientPermissions),
            30 => Some(Self::RequestClosed),
            31 => Some(Self::ShuttingDown),
            32 => Some(Self::NotConnected),
            40 => Some(Self::InternalErr),
            41 => Some(Self::Unimplemented),
            _ => None,
        }
    }

    /// True for the "no error" code.
    pub const fn is_nil(self) -> bool {
        matches!(self, Self::Nil)
    }

    /// Stable name used in logs and JSON output.
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::MalformedTid => "malformed_tid",
            Self::MalformedTx => "malformed_tx",
            Self::BadRequest => "bad_request",
            Self::InvalidUri => "invalid_uri",
            Self::InvalidTag => "invalid_tag",
            Self::CellNotFound => "cell_not_found",
            Self::RequestNotFound => "request_not_found",
            Self::AttrNotFound => "attr_not_found",
            Self::AuthFailed => "auth_failed",
            Self::LoginFailed => "login_failed",
            Self::SessionExpired => "session_expired",
            Self::InsufficientPermissions => "insufficient_permissions",
            Self::RequestClosed => "request_closed",
            Self::ShuttingDown => "shutting_down",
            Self::NotConnected => "not_connected",
            Self::InternalErr => "internal_err",
            Self::Unimplemented => "unimplemented",
        }
    }
}

impl fmt::Display for ErrCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}
