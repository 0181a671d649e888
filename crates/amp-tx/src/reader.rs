use std::io::{ErrorKind, Read};

use amp_transport::{AmpStream, TransportError};
use bytes::BytesMut;

use crate::codec::{decode_tx, TxConfig, TxMsg};
use crate::error::{Result, TxError};

const INITIAL_BUFFER_CAPACITY: usize = 8 * 1024;
const READ_CHUNK_SIZE: usize = 8 * 1024;

/// Reads complete transactions from any `Read` stream.
///
/// Partial reads are buffered internally; callers always get whole messages.
pub struct TxReader<T> {
    inner: T,
    buf: BytesMut,
    config: TxConfig,
}

impl<T: Read> TxReader<T> {
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

    /// Read the next complete transaction (blocking).
    ///
    /// Returns `Err(TxError::ConnectionClosed)` when EOF is reached, whether
    /// between messages or in the middle of one.
    pub fn read_tx(&mut self) -> Result<TxMsg> {
        loop {
            if let Some(msg) = decode_tx(&mut self.buf, &self.config)? {
                tracing::trace!(
                    kind = %msg.info.kind,
                    context_id = msg.info.context_id,
                    ops = msg.ops.len(),
                    "read tx"
                );
                return Ok(msg);
            }

            let mut chunk = [0u8; READ_CHUNK_SIZE];
            let read = match self.inner.read(&mut chunk) {
                Ok(n) => n,
                Err(err) if err.kind() == ErrorKind::Interrupted => continue,
                Err(err) => return Err(TxError::Io(err)),
            };

            if read == 0 {
                return Err(TxError::ConnectionClosed);
            }

            self.buf.extend_from_slice(&chunk[..read]);
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

    /// Update the data segment ceiling for subsequent decoding.
    pub fn set_max_data_size(&mut self, max_data_size: usize) {
        self.config.max_data_size = max_data_size;
    }

    pub fn config(&self) -> &TxConfig {
        &self.config
    }
}

impl TxReader<AmpStream> {
    /// Create a reader for an `AmpStream` and apply the read timeout from config.
    pub fn with_config_stream(inner: AmpStream, config: TxConfig) -> Result<Self> {
        inner
            .set_read_timeout(config.read_timeout)
            .map_err(transport_to_tx_error)?;
        Ok(Self::with_config(inner, config))
    }
}

pub(crate) fn transport_to_tx_error(err: TransportError) -> TxError {
    match err {
        TransportError::Io(io) | TransportError::Accept(io) => TxError::Io(io),
        TransportError::Bind { source, .. } | TransportError::Connect { source, .. } => {
            TxError::Io(source)
        }
        other => TxError::Io(std::io::Error::other(other.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;

    use bytes::BytesMut;

    use super::*;
    use crate::codec::{encode_tx, TxKind, HEADER_SIZE};
    use crate::op::TxOp;
    use crate::status::{ErrCode, OpStatus};
    use crate::tag::TagId;
    use crate::writer::TxWriter;

    fn wire(msgs: &[TxMsg]) -> Vec<u8> {
        let mut buf = BytesMut::new();
        for msg in msgs {
            encode_tx(msg, &TxConfig::default(), &mut buf).unwrap();
        }
        buf.to_vec()
    }

    fn state(context_id: u64, payload: &[u8]) -> TxMsg {
        let mut builder = TxMsg::builder(TxKind::State)
            .context_id(context_id)
            .status(OpStatus::Syncing);
        let value = builder.push_value(payload);
        builder.push_op(TxOp::UpsertAttr {
            target: TagId::from_name("cell"),
            attr: TagId::from_name("body"),
            index: TagId::NIL,
            hash: 0,
            value,
        });
        builder.build()
    }

    #[test]
    fn reads_messages_in_order() {
        let msgs = vec![
            state(1, b"one"),
            TxMsg::status(TxKind::State, 1, OpStatus::Synced, ErrCode::Nil),
            state(2, b"two"),
        ];
        let mut reader = TxReader::new(Cursor::new(wire(&msgs)));
        for expected in &msgs {
            assert_eq!(&reader.read_tx().unwrap(), expected);
        }
        assert!(matches!(reader.read_tx(), Err(TxError::ConnectionClosed)));
    }

    #[test]
    fn reads_data_larger_than_one_chunk() {
        let payload = vec![0xAB; 3 * READ_CHUNK_SIZE + 17];
        let msg = state(5, &payload);
        let mut reader = TxReader::new(Cursor::new(wire(&[msg.clone()])));
        let read = reader.read_tx().unwrap();
        assert_eq!(read, msg);
        assert_eq!(read.data.len(), payload.len());
    }

    #[test]
    fn partial_read_handling() {
        let msg = state(4, b"slow");
        let mut reader = TxReader::new(ByteByByteReader {
            bytes: wire(&[msg.clone()]),
            pos: 0,
        });
        assert_eq!(reader.read_tx().unwrap(), msg);
    }

    #[test]
    fn closed_mid_message() {
        let bytes = wire(&[state(1, b"truncated")]);
        let mut reader = TxReader::new(Cursor::new(bytes[..HEADER_SIZE + 10].to_vec()));
        assert!(matches!(reader.read_tx(), Err(TxError::ConnectionClosed)));
    }

    #[test]
    fn malformed_stream_is_an_error() {
        let mut bytes = wire(&[state(1, b"x")]);
        bytes[0] = b'X';
        let mut reader = TxReader::new(Cursor::new(bytes));
        assert!(matches!(reader.read_tx(), Err(TxError::MalformedTx(_))));
    }

    #[test]
    fn interrupted_read_retries() {
        let msg = state(8, b"ok");
        let mut reader = TxReader::new(InterruptedThenData {
            interrupted: false,
            inner: Cursor::new(wire(&[msg.clone()])),
        });
        assert_eq!(reader.read_tx().unwrap(), msg);
    }

    #[test]
    #[cfg(unix)]
    fn roundtrip_over_stream_pair() {
        let (left, right) = AmpStream::pair().unwrap();
        let config = TxConfig {
            read_timeout: Some(std::time::Duration::from_secs(5)),
            ..TxConfig::default()
        };
        let mut writer = TxWriter::new(left);
        let mut reader = TxReader::with_config_stream(right, config).unwrap();

        let sender = std::thread::spawn(move || {
            for i in 0..32u64 {
                writer.write_tx(&state(i, format!("msg-{i}").as_bytes())).unwrap();
            }
        });

        for i in 0..32u64 {
            let msg = reader.read_tx().unwrap();
            assert_eq!(msg.info.context_id, i);
            let value = msg.ops[0].value().unwrap();
            assert_eq!(msg.value(value).unwrap().as_ref(), format!("msg-{i}").as_bytes());
        }
        sender.join().unwrap();
    }

    struct ByteByByteReader {
        bytes: Vec<u8>,
        pos: usize,
    }

    impl Read for ByteByByteReader {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if self.pos >= self.bytes.len() || buf.is_empty() {
                return Ok(0);
            }
            buf[0] = self.bytes[self.pos];
            self.pos += 1;
            Ok(1)
        }
    }

    struct InterruptedThenData {
        interrupted: bool,
        inner: Cursor<Vec<u8>>,
    }

    impl Read for InterruptedThenData {
        fn read(&mut self, buf: &mut [u8]) -> std::io::Result<usize> {
            if !self.interrupted {
                self.interrupted = true;
                return Err(std::io::Error::from(ErrorKind::Interrupted));
            }
            self.inner.read(buf)
        }
    }
}
