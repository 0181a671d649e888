//! Pin requests and the per-request sync state machine.
//!
//! ```text
//!  NotStarted ──begin──▶ Syncing ──backlog drained──▶ Synced
//!                          ▲                            │
//!                          └──── mutation (Maintain) ───┘
//!  any ──close──▶ Closed   (terminal; CloseOnSync closes after the first Synced)
//! ```
//!
//! Every transition happens under the session's own lock, so a session's
//! outbound messages are totally ordered even with many publishers.

use std::sync::{Mutex, MutexGuard};

use amp_tx::{AttrId, CellId, ErrCode, OpStatus, TagId, Tid, TxKind, TxMsg, TxOp};
use serde::{Deserialize, Serialize};

use crate::mailbox::Mailbox;

const MAX_TARGET_LEN: usize = 2048;

/// What a pin points at.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PinTarget {
    /// A cell name or encoded cell id.
    Tag(String),
    /// An opaque `scheme://...` locator.
    Url(String),
}

impl PinTarget {
    /// Syntactic check only; resolution is up to the directory.
    pub fn validate(&self) -> Result<(), ErrCode> {
        match self {
            PinTarget::Tag(tag) => {
                let ok = !tag.is_empty()
                    && tag.len() <= MAX_TARGET_LEN
                    && !tag.chars().any(|c| c.is_whitespace() || c.is_control());
                if ok {
                    Ok(())
                } else {
                    Err(ErrCode::InvalidTag)
                }
            }
            PinTarget::Url(url) => {
                let ok = url.len() <= MAX_TARGET_LEN
                    && !url.chars().any(|c| c.is_whitespace() || c.is_control())
                    && url.split_once("://").is_some_and(|(scheme, rest)| {
                        !rest.is_empty()
                            && scheme.starts_with(|c: char| c.is_ascii_alphabetic())
                            && scheme
                                .chars()
                                .all(|c| c.is_ascii_alphanumeric() || "+-.".contains(c))
                    });
                if ok {
                    Ok(())
                } else {
                    Err(ErrCode::InvalidUri)
                }
            }
        }
    }
}

impl std::fmt::Display for PinTarget {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            PinTarget::Tag(tag) => write!(f, "tag:{tag}"),
            PinTarget::Url(url) => f.write_str(url),
        }
    }
}

/// How long a pin keeps receiving updates.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SyncMode {
    /// Resolve and close; no state is sent.
    None,
    /// Send current state, then close.
    CloseOnSync,
    /// Send current state, then keep sending updates until closed.
    #[default]
    Maintain,
}

impl SyncMode {
    pub const fn as_str(self) -> &'static str {
        match self {
            SyncMode::None => "none",
            SyncMode::CloseOnSync => "close_on_sync",
            SyncMode::Maintain => "maintain",
        }
    }
}

impl std::str::FromStr for SyncMode {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "none" => Ok(SyncMode::None),
            "close_on_sync" | "close-on-sync" => Ok(SyncMode::CloseOnSync),
            "maintain" => Ok(SyncMode::Maintain),
            other => Err(format!("unknown sync mode '{other}'")),
        }
    }
}

/// A client's request to pin a target.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct PinRequest {
    pub target: PinTarget,
    /// Attribute names to receive; empty means all.
    #[serde(default)]
    pub attrs: Vec<String>,
    #[serde(default)]
    pub mode: SyncMode,
}

impl PinRequest {
    pub fn tag(tag: impl Into<String>) -> Self {
        Self {
            target: PinTarget::Tag(tag.into()),
            attrs: Vec::new(),
            mode: SyncMode::default(),
        }
    }

    pub fn url(url: impl Into<String>) -> Self {
        Self {
            target: PinTarget::Url(url.into()),
            attrs: Vec::new(),
            mode: SyncMode::default(),
        }
    }

    pub fn with_attrs<I, S>(mut self, attrs: I) -> Self
    where
        I: IntoIterator<Item = S>,
        S: Into<String>,
    {
        self.attrs = attrs.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_mode(mut self, mode: SyncMode) -> Self {
        self.mode = mode;
        self
    }

    /// Attribute filter as ids.
    pub fn attr_ids(&self) -> Vec<AttrId> {
        self.attrs
            .iter()
            .map(|name| TagId::from_name(name))
            .collect()
    }
}

struct SessionState {
    status: OpStatus,
    err_code: ErrCode,
    /// Newest TID already emitted; older or equal mutations are skipped.
    high_water: Option<Tid>,
    /// Mutations published before the backlog was loaded.
    early: Vec<TxMsg>,
}

/// One live pin on one connection.
pub struct PinSession {
    context_id: u64,
    cell: CellId,
    attrs: Vec<AttrId>,
    mode: SyncMode,
    outbox: Mailbox<TxMsg>,
    state: Mutex<SessionState>,
}

impl PinSession {
    pub fn new(
        context_id: u64,
        cell: CellId,
        attrs: Vec<AttrId>,
        mode: SyncMode,
        outbox: Mailbox<TxMsg>,
    ) -> Self {
        Self {
            context_id,
            cell,
            attrs,
            mode,
            outbox,
            state: Mutex::new(SessionState {
                status: OpStatus::NotStarted,
                err_code: ErrCode::Nil,
                high_water: None,
                early: Vec::new(),
            }),
        }
    }

    pub fn context_id(&self) -> u64 {
        self.context_id
    }

    pub fn cell(&self) -> &CellId {
        &self.cell
    }

    pub fn mode(&self) -> SyncMode {
        self.mode
    }

    pub fn status(&self) -> OpStatus {
        self.lock().status
    }

    /// Code the session closed with (`Nil` while open or on a clean close).
    pub fn err_code(&self) -> ErrCode {
        self.lock().err_code
    }

    pub fn is_closed(&self) -> bool {
        self.status() == OpStatus::Closed
    }

    /// Start syncing: emit the backlog, then `Synced`.
    ///
    /// Mutations published between registration and this call are emitted
    /// after the backlog. Mode `None` closes straight away.
    pub fn begin(&self, backlog: Vec<TxMsg>) {
        let mut state = self.lock();
        if state.status != OpStatus::NotStarted {
            return;
        }

        if self.mode == SyncMode::None {
            state.early.clear();
            self.close_locked(&mut state, ErrCode::Nil);
            return;
        }

        state.status = OpStatus::Syncing;
        tracing::debug!(
            context_id = self.context_id,
            cell = %self.cell,
            backlog = backlog.len(),
            "pin syncing"
        );
        let early = std::mem::take(&mut state.early);
        for msg in backlog.iter().chain(early.iter()) {
            self.emit_state(&mut state, msg);
        }
        self.synced_locked(&mut state);
    }

    /// Offer a published mutation to this session.
    pub fn publish(&self, msg: &TxMsg) {
        let mut state = self.lock();
        match state.status {
            OpStatus::Closed => {}
            OpStatus::NotStarted => state.early.push(msg.clone()),
            OpStatus::Syncing | OpStatus::Synced => {
                if self.mode != SyncMode::Maintain {
                    return;
                }
                state.status = OpStatus::Syncing;
                if self.emit_state(&mut state, msg) {
                    self.synced_locked(&mut state);
                } else {
                    state.status = OpStatus::Synced;
                }
            }
        }
    }

    /// Close the session and emit the final status. Idempotent; returns
    /// `false` if it was already closed.
    pub fn close(&self, code: ErrCode) -> bool {
        let mut state = self.lock();
        if state.status == OpStatus::Closed {
            return false;
        }
        self.close_locked(&mut state, code);
        true
    }

    /// Ops of `msg` this session should see.
    pub fn filter_ops(&self, msg: &TxMsg) -> Vec<TxOp> {
        msg.ops
            .iter()
            .filter(|op| self.wants(op))
            .cloned()
            .collect()
    }

    fn wants(&self, op: &TxOp) -> bool {
        if let Some(target) = op.target() {
            if *target != self.cell {
                return false;
            }
        }
        match op.attr() {
            None => true,
            Some(attr) => self.attrs.is_empty() || self.attrs.contains(attr),
        }
    }

    /// Returns `true` if a state message was enqueued.
    fn emit_state(&self, state: &mut SessionState, msg: &TxMsg) -> bool {
        if let (Some(tid), Some(high)) = (msg.info.tid, state.high_water) {
            if tid <= high {
                return false;
            }
        }
        let ops = self.filter_ops(msg);
        if ops.is_empty() {
            return false;
        }
        if msg.info.tid.is_some() {
            state.high_water = msg.info.tid;
        }

        let mut out = msg.with_ops(ops);
        out.info.kind = TxKind::State;
        out.info.context_id = self.context_id;
        out.info.status = OpStatus::Syncing;
        out.info.err_code = ErrCode::Nil;
        self.outbox.deliver(out);
        true
    }

    fn synced_locked(&self, state: &mut SessionState) {
        state.status = OpStatus::Synced;
        self.outbox.deliver(self.status_msg(OpStatus::Synced, ErrCode::Nil));
        if self.mode == SyncMode::CloseOnSync {
            self.close_locked(state, ErrCode::Nil);
        }
    }

    fn close_locked(&self, state: &mut SessionState, code: ErrCode) {
        state.status = OpStatus::Closed;
        state.err_code = code;
        state.early.clear();
        if code.is_nil() {
            tracing::debug!(context_id = self.context_id, "pin closed");
        } else {
            tracing::warn!(context_id = self.context_id, %code, "pin closed with error");
        }
        self.outbox.deliver(self.status_msg(OpStatus::Closed, code));
    }

    fn status_msg(&self, status: OpStatus, code: ErrCode) -> TxMsg {
        TxMsg::status(TxKind::State, self.context_id, status, code)
    }

    fn lock(&self) -> MutexGuard<'_, SessionState> {
        self.state.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }
}

impl std::fmt::Debug for PinSession {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinSession")
            .field("context_id", &self.context_id)
            .field("cell", &self.cell)
            .field("mode", &self.mode)
            .field("status", &self.status())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use std::time::{Duration, UNIX_EPOCH};

    use amp_tx::DataRef;

    use super::*;

    fn cell() -> CellId {
        TagId::from_name("chat/room-1")
    }

    fn mutation(secs: u64, attr: &str, value: &[u8]) -> TxMsg {
        let tid = Tid::from_content(UNIX_EPOCH + Duration::from_secs(secs), value).unwrap();
        let mut builder = TxMsg::builder(TxKind::Commit).tid(tid);
        let value = builder.push_value(value);
        builder.push_op(TxOp::UpsertAttr {
            target: cell(),
            attr: TagId::from_name(attr),
            index: TagId::NIL,
            hash: 0,
            value,
        });
        builder.build()
    }

    fn drain(outbox: &Mailbox<TxMsg>) -> Vec<(OpStatus, ErrCode, usize)> {
        let mut out = Vec::new();
        while let Some(msg) = outbox.retrieve() {
            out.push((msg.info.status, msg.info.err_code, msg.ops.len()));
        }
        out
    }

    fn session(mode: SyncMode, attrs: &[&str]) -> (PinSession, Mailbox<TxMsg>) {
        let outbox = Mailbox::new(64);
        let attrs = attrs.iter().map(|a| TagId::from_name(a)).collect();
        (PinSession::new(7, cell(), attrs, mode, outbox.clone()), outbox)
    }

    #[test]
    fn close_on_sync_closes_after_one_synced() {
        let (pin, outbox) = session(SyncMode::CloseOnSync, &[]);
        pin.begin(vec![mutation(1, "title", b"a"), mutation(2, "body", b"b")]);

        assert_eq!(
            drain(&outbox),
            vec![
                (OpStatus::Syncing, ErrCode::Nil, 1),
                (OpStatus::Syncing, ErrCode::Nil, 1),
                (OpStatus::Synced, ErrCode::Nil, 0),
                (OpStatus::Closed, ErrCode::Nil, 0),
            ]
        );
        assert!(pin.is_closed());

        pin.publish(&mutation(3, "title", b"late"));
        assert!(outbox.is_empty());
    }

    #[test]
    fn maintain_reenters_syncing_on_mutation() {
        let (pin, outbox) = session(SyncMode::Maintain, &[]);
        pin.begin(Vec::new());
        assert_eq!(drain(&outbox), vec![(OpStatus::Synced, ErrCode::Nil, 0)]);
        assert_eq!(pin.status(), OpStatus::Synced);

        pin.publish(&mutation(5, "title", b"x"));
        assert_eq!(
            drain(&outbox),
            vec![
                (OpStatus::Syncing, ErrCode::Nil, 1),
                (OpStatus::Synced, ErrCode::Nil, 0)
            ]
        );
        assert_eq!(pin.status(), OpStatus::Synced);
    }

    #[test]
    fn mode_none_only_reports_close() {
        let (pin, outbox) = session(SyncMode::None, &[]);
        pin.begin(vec![mutation(1, "title", b"a")]);
        assert_eq!(drain(&outbox), vec![(OpStatus::Closed, ErrCode::Nil, 0)]);
    }

    #[test]
    fn attribute_filter_applies_per_op() {
        let (pin, outbox) = session(SyncMode::Maintain, &["title"]);
        pin.begin(Vec::new());
        drain(&outbox);

        let mut builder = TxMsg::builder(TxKind::Commit);
        let v = builder.push_value(b"v");
        builder
            .push_op(TxOp::UpsertAttr {
                target: cell(),
                attr: TagId::from_name("title"),
                index: TagId::NIL,
                hash: 0,
                value: v,
            })
            .push_op(TxOp::UpsertAttr {
                target: cell(),
                attr: TagId::from_name("body"),
                index: TagId::NIL,
                hash: 0,
                value: v,
            })
            .push_op(TxOp::DeleteCell { target: cell() })
            .push_op(TxOp::NoOp);
        let msg = builder.build();

        pin.publish(&msg);
        let state = outbox.retrieve().unwrap();
        assert_eq!(state.info.context_id, 7);
        assert_eq!(state.info.kind, TxKind::State);
        assert_eq!(state.ops.len(), 3);
        assert!(state
            .ops
            .iter()
            .all(|op| op.attr().is_none_or(|a| *a == TagId::from_name("title"))));
        assert_eq!(state.value(DataRef { offset: 0, len: 1 }).unwrap().as_ref(), b"v");
    }

    #[test]
    fn fully_filtered_message_not_enqueued() {
        let (pin, outbox) = session(SyncMode::Maintain, &["title"]);
        pin.begin(Vec::new());
        drain(&outbox);

        pin.publish(&mutation(9, "body", b"ignored"));
        assert!(outbox.is_empty());
        assert_eq!(pin.status(), OpStatus::Synced);
    }

    #[test]
    fn other_cells_are_ignored() {
        let (pin, outbox) = session(SyncMode::Maintain, &[]);
        pin.begin(Vec::new());
        drain(&outbox);

        let mut builder = TxMsg::builder(TxKind::Commit);
        builder.push_op(TxOp::DeleteCell {
            target: TagId::from_name("elsewhere"),
        });
        pin.publish(&builder.build());
        assert!(outbox.is_empty());
    }

    #[test]
    fn early_mutations_follow_backlog_without_duplicates() {
        let (pin, outbox) = session(SyncMode::Maintain, &[]);
        let first = mutation(1, "title", b"a");
        let second = mutation(2, "title", b"b");

        // Published after registration but before the backlog load, and
        // also present in the backlog.
        pin.publish(&second);
        pin.begin(vec![first, second]);

        assert_eq!(
            drain(&outbox),
            vec![
                (OpStatus::Syncing, ErrCode::Nil, 1),
                (OpStatus::Syncing, ErrCode::Nil, 1),
                (OpStatus::Synced, ErrCode::Nil, 0),
            ]
        );
    }

    #[test]
    fn close_is_idempotent_and_terminal() {
        let (pin, outbox) = session(SyncMode::Maintain, &[]);
        pin.begin(Vec::new());
        drain(&outbox);

        assert!(pin.close(ErrCode::ShuttingDown));
        assert!(!pin.close(ErrCode::Nil));
        assert_eq!(drain(&outbox), vec![(OpStatus::Closed, ErrCode::ShuttingDown, 0)]);
        assert_eq!(pin.err_code(), ErrCode::ShuttingDown);

        pin.publish(&mutation(3, "title", b"after"));
        pin.begin(Vec::new());
        assert!(outbox.is_empty());
    }

    #[test]
    fn target_validation() {
        assert!(PinTarget::Tag("chat/room-1".into()).validate().is_ok());
        assert_eq!(PinTarget::Tag("".into()).validate(), Err(ErrCode::InvalidTag));
        assert_eq!(
            PinTarget::Tag("has space".into()).validate(),
            Err(ErrCode::InvalidTag)
        );
        assert!(PinTarget::Url("amp://planet/cell".into()).validate().is_ok());
        assert_eq!(
            PinTarget::Url("no-scheme".into()).validate(),
            Err(ErrCode::InvalidUri)
        );
        assert_eq!(
            PinTarget::Url("1x://bad".into()).validate(),
            Err(ErrCode::InvalidUri)
        );
        assert_eq!(PinTarget::Url("amp://".into()).validate(), Err(ErrCode::InvalidUri));
    }

    #[test]
    fn request_json_defaults() {
        let req: PinRequest = serde_json::from_str(r#"{"target":{"tag":"x"}}"#).unwrap();
        assert_eq!(req, PinRequest::tag("x"));
        assert_eq!(req.mode, SyncMode::Maintain);
        assert_eq!("close-on-sync".parse::<SyncMode>(), Ok(SyncMode::CloseOnSync));
    }
}
