use std::fmt;
use std::io;

use amp_host::HostError;
use amp_transport::TransportError;
use amp_tx::{ErrCode, TxError};

pub const SUCCESS: i32 = 0;
pub const FAILURE: i32 = 1;
pub const TRANSPORT_ERROR: i32 = 3;
pub const AUTH_FAILED: i32 = 40;
pub const PERMISSION_DENIED: i32 = 50;
pub const DATA_INVALID: i32 = 60;
pub const USAGE: i32 = 64;
pub const TIMEOUT: i32 = 124;
pub const INTERNAL: i32 = 125;

pub type CliResult<T> = Result<T, CliError>;

#[derive(Debug)]
pub struct CliError {
    pub code: i32,
    pub message: String,
}

impl CliError {
    pub fn new(code: i32, message: impl Into<String>) -> Self {
        Self {
            code,
            message: message.into(),
        }
    }
}

impl fmt::Display for CliError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.message)
    }
}

impl std::error::Error for CliError {}

pub fn io_error(context: &str, err: io::Error) -> CliError {
    let code = match err.kind() {
        io::ErrorKind::PermissionDenied => PERMISSION_DENIED,
        io::ErrorKind::TimedOut | io::ErrorKind::WouldBlock => TIMEOUT,
        io::ErrorKind::ConnectionRefused => FAILURE,
        _ => INTERNAL,
    };
    CliError::new(code, format!("{context}: {err}"))
}

pub fn transport_error(context: &str, err: TransportError) -> CliError {
    match err {
        TransportError::Bind { source, .. }
        | TransportError::Connect { source, .. }
        | TransportError::Accept(source)
        | TransportError::Io(source) => io_error(context, source),
        other => CliError::new(TRANSPORT_ERROR, format!("{context}: {other}")),
    }
}

pub fn tx_error(context: &str, err: TxError) -> CliError {
    match err {
        TxError::Io(source) => io_error(context, source),
        TxError::ConnectionClosed => CliError::new(FAILURE, format!("{context}: {err}")),
        TxError::InvalidInput(_) => CliError::new(USAGE, format!("{context}: {err}")),
        other => CliError::new(DATA_INVALID, format!("{context}: {other}")),
    }
}

/// Exit code for a protocol error code reported by the host.
pub fn code_for(code: ErrCode) -> i32 {
    match code {
        ErrCode::AuthFailed | ErrCode::LoginFailed | ErrCode::SessionExpired => AUTH_FAILED,
        ErrCode::InsufficientPermissions => PERMISSION_DENIED,
        ErrCode::MalformedTid
        | ErrCode::MalformedTx
        | ErrCode::BadRequest
        | ErrCode::InvalidUri
        | ErrCode::InvalidTag => DATA_INVALID,
        ErrCode::InternalErr | ErrCode::Unimplemented => INTERNAL,
        _ => FAILURE,
    }
}

pub fn host_error(context: &str, err: HostError) -> CliError {
    match err {
        HostError::Transport(err) => transport_error(context, err),
        HostError::Tx(err) => tx_error(context, err),
        HostError::Timeout(_) => CliError::new(TIMEOUT, format!("{context}: {err}")),
        HostError::Json(_) | HostError::Protocol(_) => {
            CliError::new(DATA_INVALID, format!("{context}: {err}"))
        }
        HostError::Disconnected(_) => CliError::new(FAILURE, format!("{context}: {err}")),
        HostError::Rejected { code, .. } => {
            CliError::new(code_for(code), format!("{context}: {err}"))
        }
    }
}
