//! Shared host state: resolves pins, accepts commits and fans them out.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::{Duration, SystemTime};

use amp_tx::{ErrCode, Tid, TxConfig, TxKind, TxMsg, TxOp};

use crate::auth::{
    AuthCheckpoint, CheckpointStore, CredentialVerifier, LoginConfig, MemoryCheckpointStore,
};
use crate::directory::{AllowAll, Authorizer, TargetResolver};
use crate::error::{HostError, Result};
use crate::mailbox::Mailbox;
use crate::pin::{PinRequest, PinSession};
use crate::registry::PinRegistry;

/// Slightly over 1/65536 s, so a bumped TID always lands on the next fraction.
const TID_TICK: Duration = Duration::from_nanos(15_260);

/// Host-wide limits.
#[derive(Debug, Clone)]
pub struct HostConfig {
    /// Outbound mailbox capacity per connection. Default: 1024.
    pub mailbox_capacity: usize,
    pub login: LoginConfig,
    pub tx: TxConfig,
}

impl Default for HostConfig {
    fn default() -> Self {
        Self {
            mailbox_capacity: 1024,
            login: LoginConfig::default(),
            tx: TxConfig::default(),
        }
    }
}

impl HostConfig {
    pub fn with_mailbox_capacity(mut self, capacity: usize) -> Self {
        self.mailbox_capacity = capacity;
        self
    }

    pub fn with_login(mut self, login: LoginConfig) -> Self {
        self.login = login;
        self
    }

    pub fn with_tx(mut self, tx: TxConfig) -> Self {
        self.tx = tx;
        self
    }
}

/// State shared by every connection of one host.
pub struct Host {
    config: HostConfig,
    resolver: Arc<dyn TargetResolver>,
    authorizer: Arc<dyn Authorizer>,
    verifier: Arc<dyn CredentialVerifier>,
    checkpoints: Arc<dyn CheckpointStore>,
    registry: PinRegistry,
    last_tid: Mutex<Option<Tid>>,
    shutting_down: AtomicBool,
}

impl Host {
    /// Host over `resolver` that authenticates with `verifier`, allows every
    /// authenticated user everything and keeps checkpoints in memory.
    pub fn new(resolver: Arc<dyn TargetResolver>, verifier: Arc<dyn CredentialVerifier>) -> Self {
        Self {
            config: HostConfig::default(),
            resolver,
            authorizer: Arc::new(AllowAll),
            verifier,
            checkpoints: Arc::new(MemoryCheckpointStore::new()),
            registry: PinRegistry::new(),
            last_tid: Mutex::new(None),
            shutting_down: AtomicBool::new(false),
        }
    }

    pub fn with_authorizer(mut self, authorizer: Arc<dyn Authorizer>) -> Self {
        self.authorizer = authorizer;
        self
    }

    pub fn with_checkpoint_store(mut self, checkpoints: Arc<dyn CheckpointStore>) -> Self {
        self.checkpoints = checkpoints;
        self
    }

    pub fn with_config(mut self, config: HostConfig) -> Self {
        self.config = config;
        self
    }

    pub fn config(&self) -> &HostConfig {
        &self.config
    }

    pub fn verifier(&self) -> &dyn CredentialVerifier {
        self.verifier.as_ref()
    }

    pub fn checkpoints(&self) -> &dyn CheckpointStore {
        self.checkpoints.as_ref()
    }

    pub fn registry(&self) -> &PinRegistry {
        &self.registry
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Acquire)
    }

    /// Open a pin for an authenticated session.
    ///
    /// On success the session is registered and has already emitted its
    /// backlog. Modes that close on their own come back closed and
    /// unregistered. On failure nothing is emitted; the caller reports the
    /// error code.
    pub fn open_pin(
        &self,
        outbox: &Mailbox<TxMsg>,
        checkpoint: &AuthCheckpoint,
        context_id: u64,
        request: &PinRequest,
    ) -> Result<Arc<PinSession>> {
        if self.is_shutting_down() {
            return Err(HostError::rejected(ErrCode::ShuttingDown, "host is shutting down"));
        }
        let target = &request.target;
        target
            .validate()
            .map_err(|code| HostError::rejected(code, format!("invalid target {target}")))?;
        let cell = self
            .resolver
            .resolve_target(target)
            .map_err(|code| HostError::rejected(code, format!("cannot resolve {target}")))?;
        if !self.authorizer.can_read(checkpoint, &cell) {
            return Err(HostError::rejected(
                ErrCode::InsufficientPermissions,
                format!("{} may not read {target}", checkpoint.user_id),
            ));
        }

        let session = Arc::new(PinSession::new(
            context_id,
            cell,
            request.attr_ids(),
            request.mode,
            outbox.clone(),
        ));
        // Register before loading so nothing committed in between is missed.
        self.registry.register(&session);
        let backlog = self.resolver.load_state(&cell);
        tracing::debug!(
            context_id,
            %target,
            mode = request.mode.as_str(),
            "pin opened"
        );
        session.begin(backlog);

        if session.is_closed() {
            self.registry.unregister(&session);
        }
        Ok(session)
    }

    /// Close a session and drop its registration.
    pub fn close_pin(&self, session: &Arc<PinSession>, code: ErrCode) -> bool {
        self.registry.unregister(session);
        session.close(code)
    }

    /// Assign a TID to `msg`, record it and publish it to matching pins.
    pub fn commit(&self, checkpoint: &AuthCheckpoint, msg: TxMsg) -> Result<Tid> {
        if self.is_shutting_down() {
            return Err(HostError::rejected(ErrCode::ShuttingDown, "host is shutting down"));
        }
        if msg.info.kind != TxKind::Commit {
            return Err(HostError::rejected(
                ErrCode::BadRequest,
                format!("cannot commit a {} message", msg.info.kind),
            ));
        }
        if msg.ops.iter().all(|op| matches!(op, TxOp::NoOp)) {
            return Err(HostError::rejected(ErrCode::BadRequest, "commit has no ops"));
        }
        if let Some(cell) = msg
            .ops
            .iter()
            .filter_map(TxOp::target)
            .find(|cell| !self.authorizer.can_write(checkpoint, cell))
        {
            return Err(HostError::rejected(
                ErrCode::InsufficientPermissions,
                format!("{} may not write {cell}", checkpoint.user_id),
            ));
        }

        let mut msg = msg;
        msg.info.tid = None;
        let content = msg.serialize()?;

        // Assignment, recording and fan-out run under one lock so the log and
        // every pin see commits in TID order.
        let mut last = self.last_tid.lock().unwrap_or_else(|p| p.into_inner());
        let tid = next_tid(*last, &content)?;
        msg.info.tid = Some(tid);
        self.resolver
            .record_commit(&msg)
            .map_err(|code| HostError::rejected(code, "commit not recorded"))?;
        *last = Some(tid);
        let reached = self.registry.publish(&msg);
        drop(last);

        tracing::debug!(
            tid = %tid,
            user = %checkpoint.user_id,
            ops = msg.ops.len(),
            sessions = reached,
            "committed"
        );
        Ok(tid)
    }

    /// Refuse new work and close every open pin with `ShuttingDown`.
    pub fn shutdown(&self) {
        if self.shutting_down.swap(true, Ordering::AcqRel) {
            return;
        }
        let closed = self.registry.close_all(ErrCode::ShuttingDown);
        tracing::info!(closed, "host shutting down");
    }
}

/// TIDs handed out by one host strictly increase, even when the clock stalls
/// or steps back.
fn next_tid(last: Option<Tid>, content: &[u8]) -> Result<Tid> {
    let tid = Tid::from_content(SystemTime::now(), content)?;
    match last {
        Some(prev) if tid <= prev => Ok(Tid::from_content(prev.time() + TID_TICK, content)?),
        _ => Ok(tid),
    }
}

impl std::fmt::Debug for Host {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Host")
            .field("config", &self.config)
            .field("registry", &self.registry)
            .field("shutting_down", &self.is_shutting_down())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use amp_tx::{OpStatus, TagId};

    use super::*;
    use crate::auth::StaticCredentials;
    use crate::directory::MemoryDirectory;
    use crate::pin::SyncMode;

    struct ReadOnly;

    impl Authorizer for ReadOnly {
        fn can_read(&self, _checkpoint: &AuthCheckpoint, _cell: &amp_tx::CellId) -> bool {
            true
        }

        fn can_write(&self, _checkpoint: &AuthCheckpoint, _cell: &amp_tx::CellId) -> bool {
            false
        }
    }

    fn checkpoint() -> AuthCheckpoint {
        AuthCheckpoint {
            token: "tok".into(),
            session_id: "s-1".into(),
            member_id: "m-1".into(),
            home_feed: "feed".into(),
            user_id: "alice".into(),
        }
    }

    fn host() -> Host {
        let dir = MemoryDirectory::new().with_cell("lobby");
        Host::new(Arc::new(dir), Arc::new(StaticCredentials::new()))
    }

    fn title(cell: &str, value: &[u8]) -> TxMsg {
        let mut builder = TxMsg::builder(TxKind::Commit);
        let value = builder.push_value(value);
        builder.push_op(TxOp::UpsertAttr {
            target: TagId::from_name(cell),
            attr: TagId::from_name("title"),
            index: TagId::NIL,
            hash: 0,
            value,
        });
        builder.build()
    }

    fn drain(outbox: &Mailbox<TxMsg>) -> Vec<TxMsg> {
        std::iter::from_fn(|| outbox.retrieve()).collect()
    }

    #[test]
    fn commit_reaches_maintained_pin() {
        let host = host();
        let outbox = Mailbox::new(16);
        let session = host
            .open_pin(&outbox, &checkpoint(), 3, &PinRequest::tag("lobby"))
            .expect("pin should open");
        assert_eq!(session.status(), OpStatus::Synced);
        drain(&outbox);

        let tid = host.commit(&checkpoint(), title("lobby", b"hi")).unwrap();
        let got = drain(&outbox);
        assert_eq!(got.len(), 2);
        assert_eq!(got[0].info.tid, Some(tid));
        assert_eq!(got[0].info.context_id, 3);
        assert_eq!(got[1].info.status, OpStatus::Synced);
    }

    #[test]
    fn backlog_replayed_to_new_pin() {
        let host = host();
        let first = host.commit(&checkpoint(), title("lobby", b"one")).unwrap();
        let second = host.commit(&checkpoint(), title("lobby", b"two")).unwrap();
        assert!(first < second);

        let outbox = Mailbox::new(16);
        let request = PinRequest::tag("lobby").with_mode(SyncMode::CloseOnSync);
        let session = host.open_pin(&outbox, &checkpoint(), 1, &request).unwrap();
        assert!(session.is_closed());
        assert!(host.registry().is_empty());

        let tids: Vec<_> = drain(&outbox).iter().filter_map(|m| m.info.tid).collect();
        assert_eq!(tids, vec![first, second]);
    }

    #[test]
    fn tids_strictly_increase() {
        let host = host();
        let mut prev = None;
        for i in 0..200u32 {
            let tid = host
                .commit(&checkpoint(), title("lobby", &i.to_le_bytes()))
                .unwrap();
            assert!(prev.is_none_or(|p| p < tid));
            prev = Some(tid);
        }
    }

    #[test]
    fn concurrent_commits_arrive_complete_and_ordered() {
        const THREADS: u32 = 8;
        const PER_THREAD: u32 = 200;
        let total = (THREADS * PER_THREAD) as usize;

        let host = Arc::new(host());
        let live = Mailbox::new(4 * total);
        let _pin = host
            .open_pin(&live, &checkpoint(), 1, &PinRequest::tag("lobby"))
            .unwrap();
        drain(&live);

        let writers: Vec<_> = (0..THREADS)
            .map(|t| {
                let host = Arc::clone(&host);
                std::thread::spawn(move || {
                    for i in 0..PER_THREAD {
                        let body = [t.to_le_bytes(), i.to_le_bytes()].concat();
                        host.commit(&checkpoint(), title("lobby", &body)).unwrap();
                    }
                })
            })
            .collect();
        for writer in writers {
            writer.join().unwrap();
        }

        let live_tids: Vec<_> = drain(&live).iter().filter_map(|m| m.info.tid).collect();
        assert_eq!(live_tids.len(), total);
        assert!(live_tids.windows(2).all(|w| w[0] < w[1]));

        let replay = Mailbox::new(2 * total);
        let request = PinRequest::tag("lobby").with_mode(SyncMode::CloseOnSync);
        host.open_pin(&replay, &checkpoint(), 2, &request).unwrap();
        let replay_tids: Vec<_> = drain(&replay).iter().filter_map(|m| m.info.tid).collect();
        assert_eq!(replay_tids, live_tids);
    }

    #[test]
    fn open_failures_carry_codes() {
        let host = host();
        let outbox = Mailbox::new(4);
        let cp = checkpoint();

        let err = host
            .open_pin(&outbox, &cp, 1, &PinRequest::tag("missing"))
            .unwrap_err();
        assert_eq!(err.code(), ErrCode::CellNotFound);

        let err = host.open_pin(&outbox, &cp, 2, &PinRequest::tag("")).unwrap_err();
        assert_eq!(err.code(), ErrCode::InvalidTag);

        let err = host.open_pin(&outbox, &cp, 3, &PinRequest::url("nope")).unwrap_err();
        assert_eq!(err.code(), ErrCode::InvalidUri);
        assert!(outbox.is_empty());
    }

    #[test]
    fn write_permission_enforced() {
        let host = host().with_authorizer(Arc::new(ReadOnly));
        let err = host.commit(&checkpoint(), title("lobby", b"x")).unwrap_err();
        assert_eq!(err.code(), ErrCode::InsufficientPermissions);
    }

    #[test]
    fn commit_rejects_non_commit_and_empty() {
        let host = host();
        let mut msg = title("lobby", b"x");
        msg.info.kind = TxKind::State;
        assert_eq!(
            host.commit(&checkpoint(), msg).unwrap_err().code(),
            ErrCode::BadRequest
        );
        let empty = TxMsg::builder(TxKind::Commit).build();
        assert_eq!(
            host.commit(&checkpoint(), empty).unwrap_err().code(),
            ErrCode::BadRequest
        );
    }

    #[test]
    fn shutdown_closes_pins_and_refuses_work() {
        let host = host();
        let outbox = Mailbox::new(16);
        let session = host
            .open_pin(&outbox, &checkpoint(), 9, &PinRequest::tag("lobby"))
            .unwrap();
        drain(&outbox);

        host.shutdown();
        host.shutdown();
        assert!(session.is_closed());
        let closed = drain(&outbox);
        assert_eq!(closed.len(), 1);
        assert_eq!(closed[0].info.err_code, ErrCode::ShuttingDown);

        let err = host
            .open_pin(&outbox, &checkpoint(), 10, &PinRequest::tag("lobby"))
            .unwrap_err();
        assert_eq!(err.code(), ErrCode::ShuttingDown);
    }
}
