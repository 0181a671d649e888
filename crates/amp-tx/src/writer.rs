use std::io::{self, ErrorKind, Write};
use std::time::{Duration, Instant};

use amp_transport::AmpStream;
use bytes::BytesMut;

use crate::codec::{encode_tx, TxConfig, TxMsg};
use crate::error::{Result, TxError};
use crate::reader::transport_to_tx_error;

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;

/// Writes complete transactions to any `Write` stream.
pub struct TxWriter<T> {
    inner: T,
    buf: BytesMut,
    config: TxConfig,
}

impl<T: Write> TxWriter<T> {
    pub fn new(inner: T) -> Self {
        Self::with_config(inner, TxConfig::default())
    }

    pub fn with_config(inner: T, config: TxConfig) -> Self {
        Self {
            inner,
            buf: BytesMut::with_capacity(INITIAL_BUFFER_CAPACITY),
            config,
        }
    }

    /// Encode and write a complete transaction (blocking), then flush.
    ///
    /// Limit violations are reported before any byte reaches the stream.
    /// With a write timeout configured, a stalled peer fails the write with
    /// `TimedOut` once the timeout has passed.
    pub fn write_tx(&mut self, msg: &TxMsg) -> Result<()> {
        self.buf.clear();
        encode_tx(msg, &self.config, &mut self.buf)?;
        let deadline = self.config.write_timeout.map(|t| Instant::now() + t);

        let mut offset = 0usize;
        while offset < self.buf.len() {
            match self.inner.write(&self.buf[offset..]) {
                Ok(0) => return Err(TxError::ConnectionClosed),
                Ok(n) => offset += n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_stall(&err) => check_deadline(deadline)?,
                Err(err) => return Err(TxError::Io(err)),
            }
        }

        tracing::trace!(
            kind = %msg.info.kind,
            context_id = msg.info.context_id,
            bytes = self.buf.len(),
            "wrote tx"
        );
        self.flush_until(deadline)
    }

    pub fn flush(&mut self) -> Result<()> {
        let deadline = self.config.write_timeout.map(|t| Instant::now() + t);
        self.flush_until(deadline)
    }

    fn flush_until(&mut self, deadline: Option<Instant>) -> Result<()> {
        loop {
            match self.inner.flush() {
                Ok(()) => return Ok(()),
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) if is_stall(&err) => check_deadline(deadline)?,
                Err(err) => return Err(TxError::Io(err)),
            }
        }
    }

    pub fn get_ref(&self) -> &T {
        &self.inner
    }

    pub fn get_mut(&mut self) -> &mut T {
        &mut self.inner
    }

    pub fn into_inner(self) -> T {
        self.inner
    }

    /// Update the data segment ceiling for subsequent encoding.
    pub fn set_max_data_size(&mut self, max_data_size: usize) {
        self.config.max_data_size = max_data_size;
    }

    /// Update the write timeout used for deadlines. The stream's own socket
    /// timeout is set separately.
    pub fn set_write_timeout(&mut self, timeout: Option<Duration>) {
        self.config.write_timeout = timeout;
    }

    pub fn config(&self) -> &TxConfig {
        &self.config
    }
}

fn is_stall(err: &io::Error) -> bool {
    matches!(err.kind(), ErrorKind::WouldBlock | ErrorKind::TimedOut)
}

/// Retry after a stall unless the deadline has passed. Without a deadline the
/// stream is non-blocking by choice and the write is retried.
fn check_deadline(deadline: Option<Instant>) -> Result<()> {
    match deadline {
        Some(deadline) if Instant::now() >= deadline => Err(TxError::Io(io::Error::new(
            ErrorKind::TimedOut,
            "peer stopped reading",
        ))),
        _ => Ok(()),
    }
}

impl TxWriter<AmpStream> {
    /// Create a writer for an `AmpStream` and apply the write timeout from config.
    pub fn with_config_stream(inner: AmpStream, config: TxConfig) -> Result<Self> {
        inner
            .set_write_timeout(config.write_timeout)
            .map_err(transport_to_tx_error)?;
        Ok(Self::with_config(inner, config))
    }
}
