//! Cell → pin session index used to fan out committed mutations.

use std::collections::HashMap;
use std::sync::{Arc, RwLock, Weak};

use amp_tx::{CellId, ErrCode, TxMsg};

use crate::pin::PinSession;

/// Index of live pin sessions by the cell they watch.
///
/// Holds weak references; a session dropped by its connection simply stops
/// receiving and is pruned on the next publish to its cell.
#[derive(Default)]
pub struct PinRegistry {
    by_cell: RwLock<HashMap<CellId, Vec<Weak<PinSession>>>>,
}

impl PinRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn register(&self, session: &Arc<PinSession>) {
        let mut map = self.by_cell.write().unwrap_or_else(|p| p.into_inner());
        map.entry(*session.cell())
            .or_default()
            .push(Arc::downgrade(session));
    }

    pub fn unregister(&self, session: &Arc<PinSession>) {
        let mut map = self.by_cell.write().unwrap_or_else(|p| p.into_inner());
        if let Some(list) = map.get_mut(session.cell()) {
            list.retain(|weak| {
                weak.strong_count() > 0 && !std::ptr::eq(weak.as_ptr(), Arc::as_ptr(session))
            });
            if list.is_empty() {
                map.remove(session.cell());
            }
        }
    }

    /// Offer `msg` to every session watching a cell it touches.
    ///
    /// Sessions are collected under the read lock and called outside it, so
    /// a slow session never blocks registration.
    pub fn publish(&self, msg: &TxMsg) -> usize {
        let mut cells: Vec<&CellId> = msg.ops.iter().filter_map(|op| op.target()).collect();
        cells.sort();
        cells.dedup();

        let mut stale = false;
        let sessions: Vec<Arc<PinSession>> = {
            let map = self.by_cell.read().unwrap_or_else(|p| p.into_inner());
            cells
                .iter()
                .filter_map(|cell| map.get(*cell))
                .flatten()
                .filter_map(|weak| {
                    let session = weak.upgrade();
                    stale |= session.is_none();
                    session
                })
                .collect()
        };

        for session in &sessions {
            session.publish(msg);
        }
        if stale {
            self.prune();
        }
        tracing::trace!(sessions = sessions.len(), "published mutation");
        sessions.len()
    }

    /// Close every registered session with `code` and clear the index.
    pub fn close_all(&self, code: ErrCode) -> usize {
        let drained: Vec<Weak<PinSession>> = {
            let mut map = self.by_cell.write().unwrap_or_else(|p| p.into_inner());
            map.drain().flat_map(|(_, list)| list).collect()
        };
        drained
            .iter()
            .filter_map(Weak::upgrade)
            .filter(|session| session.close(code))
            .count()
    }

    /// Number of live registered sessions.
    pub fn len(&self) -> usize {
        let map = self.by_cell.read().unwrap_or_else(|p| p.into_inner());
        map.values()
            .flatten()
            .filter(|weak| weak.strong_count() > 0)
            .count()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    fn prune(&self) {
        let mut map = self.by_cell.write().unwrap_or_else(|p| p.into_inner());
        map.retain(|_, list| {
            list.retain(|weak| weak.strong_count() > 0);
            !list.is_empty()
        });
    }
}

impl std::fmt::Debug for PinRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PinRegistry")
            .field("sessions", &self.len())
            .finish()
    }
}
