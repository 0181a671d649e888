//! `tokio_util` codec for TxMsg streams.

use bytes::BytesMut;
use tokio_util::codec::{Decoder, Encoder};

use crate::codec::{decode_tx, encode_tx, TxConfig, TxMsg};
use crate::error::TxError;

/// Frames an async byte stream into [`TxMsg`]s, for use with
/// `tokio_util::codec::Framed`.
#[derive(Debug, Clone, Default)]
pub struct TxCodec {
    config: TxConfig,
}

impl TxCodec {
    pub fn new() -> Self {
        Self::default()
    }

    /// Timeouts in `config` are ignored; async callers bound I/O themselves.
    pub fn with_config(config: TxConfig) -> Self {
        Self { config }
    }

    pub fn config(&self) -> &TxConfig {
        &self.config
    }
}

impl Decoder for TxCodec {
    type Item = TxMsg;
    type Error = TxError;

    fn decode(&mut self, src: &mut BytesMut) -> Result<Option<TxMsg>, TxError> {
        decode_tx(src, &self.config)
    }

    fn decode_eof(&mut self, src: &mut BytesMut) -> Result<Option<TxMsg>, TxError> {
        match self.decode(src)? {
            Some(msg) => Ok(Some(msg)),
            None if src.is_empty() => Ok(None),
            None => Err(TxError::ConnectionClosed),
        }
    }
}

impl Encoder<TxMsg> for TxCodec {
    type Error = TxError;

    fn encode(&mut self, msg: TxMsg, dst: &mut BytesMut) -> Result<(), TxError> {
        encode_tx(&msg, &self.config, dst)
    }
}

impl Encoder<&TxMsg> for TxCodec {
    type Error = TxError;

    fn encode(&mut self, msg: &TxMsg, dst: &mut BytesMut) -> Result<(), TxError> {
        encode_tx(msg, &self.config, dst)
    }
}

#[cfg(test)]
mod tests {
    use futures_util::{SinkExt, StreamExt};
    use tokio_util::codec::{FramedRead, FramedWrite};

    use super::*;
    use crate::codec::TxKind;
    use crate::op::TxOp;
    use crate::status::{ErrCode, OpStatus};
    use crate::tag::TagId;

    fn commit(n: u64) -> TxMsg {
        let mut builder = TxMsg::builder(TxKind::Commit).context_id(n);
        let value = builder.push_value(format!("value-{n}").as_bytes());
        builder.push_op(TxOp::MetaAttr {
            target: TagId::from_u64(n),
            attr: TagId::from_name("label"),
            value,
        });
        builder.build()
    }

    #[tokio::test]
    async fn framed_roundtrip_over_duplex() {
        let (client, server) = tokio::io::duplex(64);
        let mut sink = FramedWrite::new(client, TxCodec::new());
        let mut stream = FramedRead::new(server, TxCodec::new());

        let writer = tokio::spawn(async move {
            for n in 0..16 {
                sink.send(commit(n)).await.unwrap();
            }
            sink.send(TxMsg::status(TxKind::State, 0, OpStatus::Closed, ErrCode::ShuttingDown))
                .await
                .unwrap();
        });

        for n in 0..16 {
            assert_eq!(stream.next().await.unwrap().unwrap(), commit(n));
        }
        let last = stream.next().await.unwrap().unwrap();
        assert_eq!(last.info.err_code, ErrCode::ShuttingDown);

        writer.await.unwrap();
        assert!(stream.next().await.is_none());
    }

    #[test]
    fn eof_mid_message_is_an_error() {
        let mut codec = TxCodec::new();
        let mut buf = BytesMut::new();
        codec.encode(&commit(1), &mut buf).unwrap();
        buf.truncate(buf.len() - 1);
        assert!(matches!(
            codec.decode_eof(&mut buf),
            Err(TxError::ConnectionClosed)
        ));
    }

    #[test]
    fn configured_limits_apply() {
        let mut codec = TxCodec::with_config(TxConfig::default().with_max_data_size(2));
        let err = codec.encode(commit(3), &mut BytesMut::new()).unwrap_err();
        assert!(matches!(err, TxError::DataTooLarge { .. }));
    }
}
