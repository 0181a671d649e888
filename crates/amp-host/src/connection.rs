//! One authenticated client connection on the host side.

use std::collections::HashMap;
use std::sync::mpsc::{self, RecvTimeoutError};
use std::sync::Arc;
use std::thread;
use std::time::Duration;

use amp_transport::{AmpStream, TransportError};
use amp_tx::{ErrCode, OpStatus, TxConfig, TxError, TxKind, TxMsg, TxReader, TxWriter};

use crate::auth::AuthCheckpoint;
use crate::control::{decode_payload, ATTR_PIN_REQUEST};
use crate::error::Result;
use crate::handshake::login_host;
use crate::host::Host;
use crate::mailbox::{Mailbox, Notify};
use crate::pin::{PinRequest, PinSession};

/// Upper bound on flushing queued messages once a connection ends.
const DRAIN_TIMEOUT: Duration = Duration::from_secs(5);

/// Host side of a single client connection.
pub struct Connection {
    host: Arc<Host>,
    stream: AmpStream,
    peer: String,
}

impl Connection {
    pub fn new(host: Arc<Host>, stream: AmpStream) -> Self {
        let peer = stream
            .peer_addr()
            .map_or_else(|| stream.transport_name().to_string(), |addr| addr.to_string());
        Self { host, stream, peer }
    }

    /// Peer address (or transport name for local streams).
    pub fn peer(&self) -> &str {
        &self.peer
    }

    /// Log the client in, then serve pin and commit requests until the
    /// client disconnects or sends a malformed frame.
    ///
    /// A clean disconnect returns `Ok(())`. Every open session is closed
    /// with `NotConnected` on the way out.
    pub fn serve(self) -> Result<()> {
        let config = self.host.config();

        // Login runs under a tighter pre-auth data budget and the login timeout.
        let login_tx = TxConfig {
            max_data_size: config.login.max_payload,
            read_timeout: Some(config.login.timeout),
            write_timeout: Some(config.login.timeout),
            ..config.tx.clone()
        };
        let mut reader = TxReader::with_config_stream(self.stream.try_clone()?, login_tx.clone())?;
        let mut writer = TxWriter::with_config_stream(self.stream.try_clone()?, login_tx)?;

        let checkpoint = login_host(
            &mut reader,
            &mut writer,
            self.host.verifier(),
            self.host.checkpoints(),
            &config.login,
        )?;
        reader.set_max_data_size(config.tx.max_data_size);
        writer.set_max_data_size(config.tx.max_data_size);
        writer.set_write_timeout(config.tx.write_timeout);
        self.stream.set_read_timeout(config.tx.read_timeout)?;
        self.stream.set_write_timeout(config.tx.write_timeout)?;

        let outbox = Mailbox::new(config.mailbox_capacity);
        let (drained_tx, drained) = mpsc::channel::<()>();
        let delivery = {
            let outbox = outbox.clone();
            let notify = outbox.notify();
            thread::Builder::new()
                .name(format!("amp-deliver-{}", self.peer))
                .spawn(move || {
                    deliver(writer, outbox, notify);
                    let _ = drained_tx.send(());
                })
                .map_err(TransportError::from)?
        };

        let mut session = Session {
            host: &self.host,
            checkpoint: &checkpoint,
            outbox: &outbox,
            pins: HashMap::new(),
        };
        let result = session.run(&mut reader);
        if result.is_err() {
            // A framing error ends the stream at once; queued output is lost.
            let _ = self.stream.shutdown();
        }
        let open = session.teardown();

        outbox.close();
        if let Err(RecvTimeoutError::Timeout) = drained.recv_timeout(DRAIN_TIMEOUT) {
            tracing::warn!(peer = %self.peer, "peer not reading, dropping queued output");
        }
        // Unblocks a delivery thread still stuck in a write.
        let _ = self.stream.shutdown();
        if delivery.join().is_err() {
            tracing::error!(peer = %self.peer, "delivery thread panicked");
        }

        tracing::info!(
            peer = %self.peer,
            user = %checkpoint.user_id,
            closed_pins = open,
            dropped = outbox.dropped(),
            "connection closed"
        );
        result
    }
}

impl std::fmt::Debug for Connection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Connection").field("peer", &self.peer).finish()
    }
}

struct Session<'a> {
    host: &'a Host,
    checkpoint: &'a AuthCheckpoint,
    outbox: &'a Mailbox<TxMsg>,
    pins: HashMap<u64, Arc<PinSession>>,
}

impl Session<'_> {
    fn run(&mut self, reader: &mut TxReader<AmpStream>) -> Result<()> {
        loop {
            let msg = match reader.read_tx() {
                Ok(msg) => msg,
                Err(TxError::ConnectionClosed) => return Ok(()),
                Err(err) => {
                    tracing::warn!(error = %err, "dropping connection");
                    return Err(err.into());
                }
            };
            self.dispatch(msg);
        }
    }

    fn dispatch(&mut self, msg: TxMsg) {
        // Pins can be closed from outside (host shutdown).
        self.pins.retain(|_, pin| !pin.is_closed());
        let (id, kind) = (msg.info.context_id, msg.info.kind);
        match kind {
            TxKind::PinRequest => self.open(id, &msg),
            TxKind::PinClose => match self.pins.remove(&id) {
                Some(pin) => {
                    self.host.close_pin(&pin, ErrCode::Nil);
                }
                None => self.reply(TxKind::State, id, OpStatus::Closed, ErrCode::RequestNotFound),
            },
            TxKind::Commit => match self.host.commit(self.checkpoint, msg) {
                Ok(tid) => {
                    let mut ack =
                        TxMsg::status(TxKind::Commit, id, OpStatus::Synced, ErrCode::Nil);
                    ack.info.tid = Some(tid);
                    self.outbox.deliver(ack);
                }
                Err(err) => {
                    tracing::debug!(context_id = id, error = %err, "commit refused");
                    self.reply(TxKind::Commit, id, OpStatus::Closed, err.code());
                }
            },
            other => {
                tracing::debug!(kind = %other, "unexpected message kind");
                self.reply(other, id, OpStatus::Closed, ErrCode::BadRequest);
            }
        }
    }

    fn open(&mut self, id: u64, msg: &TxMsg) {
        if id == 0 || self.pins.contains_key(&id) {
            self.reply(TxKind::State, id, OpStatus::Closed, ErrCode::BadRequest);
            return;
        }

        let opened = decode_payload::<PinRequest>(msg, ATTR_PIN_REQUEST).and_then(|request| {
            self.host.open_pin(self.outbox, self.checkpoint, id, &request)
        });
        match opened {
            Ok(pin) if pin.is_closed() => {}
            Ok(pin) => {
                self.pins.insert(id, pin);
            }
            Err(err) => {
                tracing::warn!(context_id = id, error = %err, "pin refused");
                self.reply(TxKind::State, id, OpStatus::Closed, err.code());
            }
        }
    }

    fn reply(&self, kind: TxKind, id: u64, status: OpStatus, code: ErrCode) {
        self.outbox.deliver(TxMsg::status(kind, id, status, code));
    }

    fn teardown(&mut self) -> usize {
        self.pins
            .drain()
            .filter(|(_, pin)| self.host.close_pin(pin, ErrCode::NotConnected))
            .count()
    }
}

fn deliver(mut writer: TxWriter<AmpStream>, outbox: Mailbox<TxMsg>, notify: Notify<TxMsg>) {
    loop {
        while let Some(msg) = outbox.retrieve() {
            if let Err(err) = writer.write_tx(&msg) {
                tracing::warn!(error = %err, "delivery failed, closing stream");
                outbox.close();
                let _ = writer.get_ref().shutdown();
                return;
            }
        }
        if outbox.is_closed() && outbox.is_empty() {
            return;
        }
        notify.wait();
    }
}

#[cfg(all(test, unix))]
mod tests {
    use std::io::Write;

    use amp_tx::{TagId, TxOp};

    use super::*;
    use crate::auth::{LoginClaim, LoginConfig, SharedSecret, StaticCredentials};
    use crate::control::encode_payload;
    use crate::directory::MemoryDirectory;
    use crate::handshake::login_client;
    use crate::pin::SyncMode;

    const SECRET: &str = "s3cret";

    fn spawn_host() -> (Arc<Host>, AmpStream, thread::JoinHandle<Result<()>>) {
        let dir = MemoryDirectory::new().with_cell("lobby");
        let host = Arc::new(Host::new(
            Arc::new(dir),
            Arc::new(StaticCredentials::new().with_user("alice", SECRET)),
        ));
        let (server, client) = AmpStream::pair().expect("pair should open");
        let conn = Connection::new(Arc::clone(&host), server);
        let handle = thread::spawn(move || conn.serve());
        (host, client, handle)
    }

    fn login(client: &AmpStream) -> (TxReader<AmpStream>, TxWriter<AmpStream>) {
        let config = TxConfig {
            read_timeout: Some(Duration::from_secs(5)),
            ..TxConfig::default()
        };
        let mut reader =
            TxReader::with_config_stream(client.try_clone().unwrap(), config.clone()).unwrap();
        let mut writer = TxWriter::with_config_stream(client.try_clone().unwrap(), config).unwrap();
        login_client(
            &mut reader,
            &mut writer,
            &LoginClaim::new("alice"),
            &SharedSecret::new(SECRET),
            &LoginConfig::default(),
        )
        .expect("login should succeed");
        (reader, writer)
    }

    fn pin(id: u64, request: &PinRequest) -> TxMsg {
        encode_payload(TxKind::PinRequest, id, ATTR_PIN_REQUEST, request).unwrap()
    }

    #[test]
    fn pin_commit_and_close_over_socket_pair() {
        let (_host, client, handle) = spawn_host();
        let (mut reader, mut writer) = login(&client);

        writer.write_tx(&pin(5, &PinRequest::tag("lobby"))).unwrap();
        let synced = reader.read_tx().unwrap();
        assert_eq!(synced.info.context_id, 5);
        assert_eq!(synced.info.status, OpStatus::Synced);

        let mut builder = TxMsg::builder(TxKind::Commit).context_id(77);
        builder.push_op(TxOp::DeleteCell {
            target: TagId::from_name("lobby"),
        });
        writer.write_tx(&builder.build()).unwrap();

        let mut seen = Vec::new();
        while seen.len() < 3 {
            let msg = reader.read_tx().unwrap();
            seen.push((msg.info.kind, msg.info.context_id, msg.info.status));
        }
        assert!(seen.contains(&(TxKind::Commit, 77, OpStatus::Synced)));
        assert!(seen.contains(&(TxKind::State, 5, OpStatus::Syncing)));
        assert!(seen.contains(&(TxKind::State, 5, OpStatus::Synced)));

        writer
            .write_tx(&TxMsg::status(TxKind::PinClose, 5, OpStatus::Closed, ErrCode::Nil))
            .unwrap();
        let closed = reader.read_tx().unwrap();
        assert_eq!((closed.info.context_id, closed.info.status), (5, OpStatus::Closed));

        client.shutdown().unwrap();
        handle.join().unwrap().expect("clean disconnect");
    }

    #[test]
    fn bad_requests_get_error_codes() {
        let (_host, client, handle) = spawn_host();
        let (mut reader, mut writer) = login(&client);

        writer
            .write_tx(&TxMsg::status(TxKind::PinClose, 42, OpStatus::Closed, ErrCode::Nil))
            .unwrap();
        let reply = reader.read_tx().unwrap();
        assert_eq!(reply.info.err_code, ErrCode::RequestNotFound);

        writer.write_tx(&pin(6, &PinRequest::tag("missing"))).unwrap();
        let reply = reader.read_tx().unwrap();
        assert_eq!((reply.info.context_id, reply.info.err_code), (6, ErrCode::CellNotFound));

        let request = PinRequest::tag("lobby").with_mode(SyncMode::Maintain);
        writer.write_tx(&pin(7, &request)).unwrap();
        reader.read_tx().unwrap();
        writer.write_tx(&pin(7, &request)).unwrap();
        let dup = reader.read_tx().unwrap();
        assert_eq!((dup.info.context_id, dup.info.err_code), (7, ErrCode::BadRequest));

        drop(writer);
        client.shutdown().unwrap();
        handle.join().unwrap().expect("clean disconnect");
    }

    #[test]
    fn pins_closed_by_shutdown_are_forgotten() {
        let (host, client, handle) = spawn_host();
        let (mut reader, mut writer) = login(&client);

        writer.write_tx(&pin(3, &PinRequest::tag("lobby"))).unwrap();
        reader.read_tx().unwrap();
        host.shutdown();
        let closed = reader.read_tx().unwrap();
        assert_eq!((closed.info.context_id, closed.info.err_code), (3, ErrCode::ShuttingDown));

        writer
            .write_tx(&TxMsg::status(TxKind::PinClose, 3, OpStatus::Closed, ErrCode::Nil))
            .unwrap();
        let reply = reader.read_tx().unwrap();
        assert_eq!((reply.info.context_id, reply.info.err_code), (3, ErrCode::RequestNotFound));

        client.shutdown().unwrap();
        handle.join().unwrap().expect("clean disconnect");
    }

    #[test]
    fn malformed_frame_ends_connection_while_peer_not_reading() {
        let (_host, client, handle) = spawn_host();
        let (mut reader, mut writer) = login(&client);

        writer.write_tx(&pin(1, &PinRequest::tag("lobby"))).unwrap();
        reader.read_tx().unwrap();

        // A large state message that stalls the delivery thread, since the
        // client never reads it.
        let mut builder = TxMsg::builder(TxKind::Commit).context_id(2);
        let value = builder.push_value(&vec![1u8; 4 * 1024 * 1024]);
        builder.push_op(TxOp::UpsertAttr {
            target: TagId::from_name("lobby"),
            attr: TagId::from_name("blob"),
            index: TagId::NIL,
            hash: 0,
            value,
        });
        writer.write_tx(&builder.build()).unwrap();
        writer.get_mut().write_all(b"not-an-amp-frame").unwrap();

        let (done_tx, done) = mpsc::channel();
        thread::spawn(move || {
            let _ = done_tx.send(handle.join().unwrap());
        });
        let result = done
            .recv_timeout(Duration::from_secs(10))
            .expect("serve should return");
        assert!(result.is_err());
    }

    #[test]
    fn open_pins_closed_when_client_leaves() {
        let (host, client, handle) = spawn_host();
        let (mut reader, mut writer) = login(&client);

        writer.write_tx(&pin(1, &PinRequest::tag("lobby"))).unwrap();
        reader.read_tx().unwrap();
        assert_eq!(host.registry().len(), 1);

        client.shutdown().unwrap();
        handle.join().unwrap().expect("clean disconnect");
        assert!(host.registry().is_empty());
    }
}
