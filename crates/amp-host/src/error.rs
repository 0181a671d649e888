use std::time::Duration;

use amp_tx::ErrCode;

/// Errors that can occur in host and client operations.
#[derive(Debug, thiserror::Error)]
pub enum HostError {
    /// Transport-level error.
    #[error("transport error: {0}")]
    Transport(#[from] amp_transport::TransportError),

    /// Transaction framing error.
    #[error("tx error: {0}")]
    Tx(#[from] amp_tx::TxError),

    /// JSON serialization/deserialization error.
    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    /// A blocking step did not complete in time.
    #[error("timed out after {0:?}")]
    Timeout(Duration),

    /// Peer disconnected.
    #[error("peer disconnected: {0}")]
    Disconnected(String),

    /// The peer sent a message that does not fit the current protocol step.
    #[error("protocol violation: {0}")]
    Protocol(String),

    /// The operation was refused with a protocol error code.
    #[error("{code}: {message}")]
    Rejected { code: ErrCode, message: String },
}

impl HostError {
    pub fn rejected(code: ErrCode, message: impl Into<String>) -> Self {
        HostError::Rejected {
            code,
            message: message.into(),
        }
    }

    /// Protocol error code reported to a peer for this failure.
    pub fn code(&self) -> ErrCode {
        match self {
            HostError::Transport(_) | HostError::Disconnected(_) | HostError::Timeout(_) => {
                ErrCode::NotConnected
            }
            HostError::Tx(err) => err.code(),
            HostError::Json(_) | HostError::Protocol(_) => ErrCode::BadRequest,
            HostError::Rejected { code, .. } => *code,
        }
    }
}

pub type Result<T> = std::result::Result<T, HostError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn codes_follow_source() {
        assert_eq!(
            HostError::rejected(ErrCode::CellNotFound, "no such cell").code(),
            ErrCode::CellNotFound
        );
        assert_eq!(
            HostError::from(amp_tx::TxError::MalformedTx("x".into())).code(),
            ErrCode::MalformedTx
        );
        assert_eq!(
            HostError::Timeout(Duration::from_secs(1)).code(),
            ErrCode::NotConnected
        );
    }

    #[test]
    fn rejected_display_names_code() {
        let err = HostError::rejected(ErrCode::AuthFailed, "bad response");
        assert_eq!(err.to_string(), format!("{}: bad response", ErrCode::AuthFailed));
    }
}
