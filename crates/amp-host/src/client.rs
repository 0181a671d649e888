use std::collections::VecDeque;
use std::io::ErrorKind;
use std::net::ToSocketAddrs;
use std::time::Duration;

use amp_transport::{AmpStream, TcpTransport};
use amp_tx::{ErrCode, OpStatus, Tid, TxConfig, TxError, TxKind, TxMsg, TxReader, TxWriter};

use crate::auth::{AuthCheckpoint, ChallengeResponder, LoginClaim, LoginConfig};
use crate::control::{encode_payload, ATTR_PIN_REQUEST};
use crate::error::{HostError, Result};
use crate::handshake::login_client;
use crate::pin::PinRequest;

/// Client connection settings.
#[derive(Debug, Clone)]
pub struct ClientConfig {
    pub login: LoginConfig,
    /// Limits and timeouts after login.
    pub tx: TxConfig,
    /// Default: 5 s.
    pub connect_timeout: Option<Duration>,
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            login: LoginConfig::default(),
            tx: TxConfig::default(),
            connect_timeout: Some(Duration::from_secs(5)),
        }
    }
}

/// Logged-in client connection.
///
/// Messages for every open pin arrive on one stream; each carries its pin's
/// context id. Messages read while waiting for a commit acknowledgement are
/// queued and returned by later [`Client::recv`] calls in arrival order.
pub struct Client {
    stream: AmpStream,
    reader: TxReader<AmpStream>,
    writer: TxWriter<AmpStream>,
    checkpoint: AuthCheckpoint,
    read_timeout: Option<Duration>,
    next_id: u64,
    pending: VecDeque<TxMsg>,
}

impl Client {
    /// Connect over TCP and log in.
    pub fn connect(
        addr: impl ToSocketAddrs + std::fmt::Debug,
        claim: &LoginClaim,
        responder: &dyn ChallengeResponder,
        config: &ClientConfig,
    ) -> Result<Self> {
        let stream = TcpTransport::connect_timeout(addr, config.connect_timeout)?;
        Self::from_stream(stream, claim, responder, config)
    }

    /// Log in over an already connected stream.
    pub fn from_stream(
        stream: AmpStream,
        claim: &LoginClaim,
        responder: &dyn ChallengeResponder,
        config: &ClientConfig,
    ) -> Result<Self> {
        let login_tx = TxConfig {
            max_data_size: config.login.max_payload,
            read_timeout: Some(config.login.timeout),
            write_timeout: Some(config.login.timeout),
            ..config.tx.clone()
        };
        let mut reader = TxReader::with_config_stream(stream.try_clone()?, login_tx.clone())?;
        let mut writer = TxWriter::with_config_stream(stream.try_clone()?, login_tx)?;

        let checkpoint = login_client(&mut reader, &mut writer, claim, responder, &config.login)?;
        tracing::info!(user = %checkpoint.user_id, session = %checkpoint.session_id, "logged in");

        reader.set_max_data_size(config.tx.max_data_size);
        writer.set_max_data_size(config.tx.max_data_size);
        writer.set_write_timeout(config.tx.write_timeout);
        stream.set_read_timeout(config.tx.read_timeout)?;
        stream.set_write_timeout(config.tx.write_timeout)?;

        Ok(Self {
            stream,
            reader,
            writer,
            checkpoint,
            read_timeout: config.tx.read_timeout,
            next_id: 1,
            pending: VecDeque::new(),
        })
    }

    /// Checkpoint issued at login; reusable to skip the challenge next time.
    pub fn checkpoint(&self) -> &AuthCheckpoint {
        &self.checkpoint
    }

    /// Send a pin request and return its context id.
    ///
    /// The outcome (state, `Synced`, or `Closed` with a code) arrives via
    /// [`Client::recv`].
    pub fn open_pin(&mut self, request: &PinRequest) -> Result<u64> {
        let id = self.next_context_id();
        let msg = encode_payload(TxKind::PinRequest, id, ATTR_PIN_REQUEST, request)?;
        self.writer.write_tx(&msg)?;
        tracing::debug!(context_id = id, target = %request.target, "pin requested");
        Ok(id)
    }

    /// Ask the host to close a pin. The final `Closed` arrives via `recv`.
    pub fn close_pin(&mut self, context_id: u64) -> Result<()> {
        let msg = TxMsg::status(TxKind::PinClose, context_id, OpStatus::Closed, ErrCode::Nil);
        self.writer.write_tx(&msg)?;
        Ok(())
    }

    /// Commit `msg` and wait for the host to assign its TID.
    pub fn commit(&mut self, mut msg: TxMsg) -> Result<Tid> {
        if msg.info.kind != TxKind::Commit {
            return Err(HostError::rejected(
                ErrCode::BadRequest,
                format!("cannot commit a {} message", msg.info.kind),
            ));
        }
        let id = self.next_context_id();
        msg.info.context_id = id;
        msg.info.tid = None;
        self.writer.write_tx(&msg)?;

        loop {
            let reply = self.read()?;
            if reply.info.kind != TxKind::Commit || reply.info.context_id != id {
                self.pending.push_back(reply);
                continue;
            }
            return match (reply.info.status, reply.info.tid) {
                (OpStatus::Synced, Some(tid)) => Ok(tid),
                _ => Err(HostError::rejected(reply.info.err_code, "commit refused")),
            };
        }
    }

    /// Next delivered message (blocking).
    pub fn recv(&mut self) -> Result<TxMsg> {
        match self.pending.pop_front() {
            Some(msg) => Ok(msg),
            None => self.read(),
        }
    }

    /// Next delivered message, or `None` if nothing arrives within `timeout`.
    pub fn recv_timeout(&mut self, timeout: Duration) -> Result<Option<TxMsg>> {
        if let Some(msg) = self.pending.pop_front() {
            return Ok(Some(msg));
        }

        self.stream.set_read_timeout(Some(timeout))?;
        let result = match self.reader.read_tx() {
            Ok(msg) => Ok(Some(msg)),
            Err(TxError::Io(err))
                if err.kind() == ErrorKind::WouldBlock || err.kind() == ErrorKind::TimedOut =>
            {
                Ok(None)
            }
            Err(err) => Err(map_read_error(err)),
        };
        self.stream.set_read_timeout(self.read_timeout)?;
        result
    }

    /// Close the connection. Open pins are closed by the host.
    pub fn shutdown(&self) -> Result<()> {
        self.stream.shutdown()?;
        Ok(())
    }

    fn read(&mut self) -> Result<TxMsg> {
        self.reader.read_tx().map_err(map_read_error)
    }

    fn next_context_id(&mut self) -> u64 {
        let id = self.next_id;
        self.next_id += 1;
        id
    }
}

impl std::fmt::Debug for Client {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Client")
            .field("transport", &self.stream.transport_name())
            .field("checkpoint", &self.checkpoint)
            .field("pending", &self.pending.len())
            .finish()
    }
}

fn map_read_error(err: TxError) -> HostError {
    match err {
        TxError::ConnectionClosed => HostError::Disconnected("host closed the connection".into()),
        other => HostError::Tx(other),
    }
}
