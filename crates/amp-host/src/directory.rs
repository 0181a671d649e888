//! Target resolution, authorization and an in-memory cell directory.

use std::collections::HashMap;
use std::sync::RwLock;

use amp_tx::{CellId, ErrCode, TagId, TxMsg};

use crate::auth::AuthCheckpoint;
use crate::pin::PinTarget;

/// Maps pin targets to cells and owns committed state.
pub trait TargetResolver: Send + Sync {
    /// Resolve a validated target to a cell.
    fn resolve_target(&self, target: &PinTarget) -> Result<CellId, ErrCode>;

    /// Committed messages touching `cell`, oldest first.
    fn load_state(&self, _cell: &CellId) -> Vec<TxMsg> {
        Vec::new()
    }

    /// Persist a committed message. The message already carries its TID.
    fn record_commit(&self, _msg: &TxMsg) -> Result<(), ErrCode> {
        Ok(())
    }
}

/// Per-cell access decisions for an authenticated session.
pub trait Authorizer: Send + Sync {
    fn can_read(&self, checkpoint: &AuthCheckpoint, cell: &CellId) -> bool;

    fn can_write(&self, checkpoint: &AuthCheckpoint, cell: &CellId) -> bool {
        self.can_read(checkpoint, cell)
    }
}

/// Grants everything.
#[derive(Debug, Default, Clone, Copy)]
pub struct AllowAll;

impl Authorizer for AllowAll {
    fn can_read(&self, _checkpoint: &AuthCheckpoint, _cell: &CellId) -> bool {
        true
    }
}

#[derive(Default)]
struct Entries {
    tags: HashMap<String, CellId>,
    urls: HashMap<String, CellId>,
    log: HashMap<CellId, Vec<TxMsg>>,
}

/// Directory of named cells with an append-only per-cell commit log.
///
/// Tags resolve by name, or by encoded cell id for cells that already have
/// history. Unknown targets are `CellNotFound`.
#[derive(Default)]
pub struct MemoryDirectory {
    entries: RwLock<Entries>,
}

impl MemoryDirectory {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a named cell and return its id.
    pub fn add_cell(&self, name: &str) -> CellId {
        let cell = TagId::from_name(name);
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.tags.insert(name.to_string(), cell);
        entries.log.entry(cell).or_default();
        cell
    }

    /// Map a URL onto an existing or new cell.
    pub fn add_url(&self, url: &str, cell: CellId) {
        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        entries.urls.insert(url.to_string(), cell);
        entries.log.entry(cell).or_default();
    }

    /// Builder form of [`MemoryDirectory::add_cell`].
    pub fn with_cell(self, name: &str) -> Self {
        self.add_cell(name);
        self
    }

    /// Number of known cells.
    pub fn cell_count(&self) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .log
            .len()
    }

    /// Number of committed messages recorded for `cell`.
    pub fn commit_count(&self, cell: &CellId) -> usize {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .log
            .get(cell)
            .map_or(0, Vec::len)
    }
}

impl TargetResolver for MemoryDirectory {
    fn resolve_target(&self, target: &PinTarget) -> Result<CellId, ErrCode> {
        let entries = self.entries.read().unwrap_or_else(|p| p.into_inner());
        match target {
            PinTarget::Tag(tag) => entries
                .tags
                .get(tag)
                .copied()
                .or_else(|| {
                    TagId::decode(tag)
                        .ok()
                        .filter(|cell| entries.log.contains_key(cell))
                })
                .ok_or(ErrCode::CellNotFound),
            PinTarget::Url(url) => entries.urls.get(url).copied().ok_or(ErrCode::CellNotFound),
        }
    }

    fn load_state(&self, cell: &CellId) -> Vec<TxMsg> {
        self.entries
            .read()
            .unwrap_or_else(|p| p.into_inner())
            .log
            .get(cell)
            .cloned()
            .unwrap_or_default()
    }

    fn record_commit(&self, msg: &TxMsg) -> Result<(), ErrCode> {
        let mut cells: Vec<CellId> = msg.ops.iter().filter_map(|op| op.target()).copied().collect();
        cells.sort();
        cells.dedup();

        let mut entries = self.entries.write().unwrap_or_else(|p| p.into_inner());
        for cell in cells {
            entries.log.entry(cell).or_default().push(msg.clone());
        }
        Ok(())
    }
}

impl std::fmt::Debug for MemoryDirectory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("MemoryDirectory")
            .field("cells", &self.cell_count())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use amp_tx::{TxKind, TxOp};

    use super::*;

    #[test]
    fn resolves_names_ids_and_urls() {
        let dir = MemoryDirectory::new();
        let cell = dir.add_cell("chat/lobby");
        dir.add_url("amp://home/lobby", cell);

        assert_eq!(dir.resolve_target(&PinTarget::Tag("chat/lobby".into())), Ok(cell));
        assert_eq!(dir.resolve_target(&PinTarget::Tag(cell.encode())), Ok(cell));
        assert_eq!(
            dir.resolve_target(&PinTarget::Url("amp://home/lobby".into())),
            Ok(cell)
        );
        assert_eq!(
            dir.resolve_target(&PinTarget::Tag("nope".into())),
            Err(ErrCode::CellNotFound)
        );
        assert_eq!(
            dir.resolve_target(&PinTarget::Url("amp://other".into())),
            Err(ErrCode::CellNotFound)
        );
    }

    #[test]
    fn commits_are_logged_per_touched_cell() {
        let dir = MemoryDirectory::new().with_cell("a").with_cell("b");
        let a = TagId::from_name("a");
        let b = TagId::from_name("b");

        let mut builder = TxMsg::builder(TxKind::Commit);
        builder
            .push_op(TxOp::DeleteCell { target: a })
            .push_op(TxOp::DeleteCell { target: a })
            .push_op(TxOp::DeleteCell { target: b });
        dir.record_commit(&builder.build()).unwrap();

        assert_eq!(dir.commit_count(&a), 1);
        assert_eq!(dir.load_state(&b).len(), 1);
        assert_eq!(dir.cell_count(), 2);
    }

    #[test]
    fn allow_all_grants_writes() {
        let checkpoint = AuthCheckpoint {
            token: "t".into(),
            session_id: "s".into(),
            member_id: "m".into(),
            home_feed: "f".into(),
            user_id: "u".into(),
        };
        assert!(AllowAll.can_write(&checkpoint, &TagId::from_name("x")));
    }
}
