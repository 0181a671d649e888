/// Errors raised while binding, connecting or moving bytes.
#[derive(Debug, thiserror::Error)]
pub enum TransportError {
    /// Binding the listen address failed.
    #[error("failed to bind to {addr}: {source}")]
    Bind {
        addr: String,
        source: std::io::Error,
    },

    /// No candidate address accepted the connection.
    #[error("failed to connect to {addr}: {source}")]
    Connect {
        addr: String,
        source: std::io::Error,
    },

    #[error("failed to accept connection: {0}")]
    Accept(std::io::Error),

    /// Read, write or socket option failure on an established stream.
    #[error("stream I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// The address did not resolve to any socket address.
    #[error("address {0} did not resolve")]
    Unresolved(String),
}

pub type Result<T> = std::result::Result<T, TransportError>;
