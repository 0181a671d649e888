use crate::status::ErrCode;

/// Errors that can occur while building, encoding or decoding transactions.
#[derive(Debug, thiserror::Error)]
pub enum TxError {
    /// A TID string or byte form is malformed.
    #[error("malformed tid: {0}")]
    MalformedTid(String),

    /// A TagId string form is malformed.
    #[error("malformed tag: {0}")]
    MalformedTag(String),

    /// A constructor was given unusable input.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// The byte stream does not hold a well-formed transaction.
    #[error("malformed tx: {0}")]
    MalformedTx(String),

    /// The op list exceeds the configured capacity.
    #[error("too many ops ({count}, max {max})")]
    TooManyOps { count: usize, max: usize },

    /// The data segment exceeds the configured ceiling.
    #[error("data segment too large ({size} bytes, max {max})")]
    DataTooLarge { size: usize, max: usize },

    /// An I/O error occurred while reading or writing transactions.
    #[error("tx I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The connection was closed before a complete transaction was received.
    #[error("connection closed (incomplete tx)")]
    ConnectionClosed,
}

impl TxError {
    /// Protocol error code reported to a peer for this failure.
    pub fn code(&self) -> ErrCode {
        match self {
            TxError::MalformedTid(_) => ErrCode::MalformedTid,
            TxError::MalformedTag(_) => ErrCode::InvalidTag,
            TxError::InvalidInput(_) => ErrCode::BadRequest,
            TxError::MalformedTx(_) => ErrCode::MalformedTx,
            TxError::TooManyOps { .. } | TxError::DataTooLarge { .. } => ErrCode::BadRequest,
            TxError::Io(_) | TxError::ConnectionClosed => ErrCode::NotConnected,
        }
    }
}

pub type Result<T> = std::result::Result<T, TxError>;
