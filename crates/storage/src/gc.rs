//! Deferred actions and the garbage collector.
//!
//! Reclamation is epoch-based: the *epoch* is the begin timestamp of the
//! oldest live transaction (or, when nothing runs, a timestamp newer than
//! everything issued). Anything that became unreachable before the epoch
//! can no longer be observed and is safe to reclaim.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use quarry_primitives::Timestamp;

use crate::transaction::{Outcome, TransactionManager};
use crate::undo::{UndoPayload, UndoRecord};

/// Where a deferred action stands on its way to running.
///
/// Single deferrals enter at `PendingOneEpoch`; double deferrals enter at
/// `Scheduled` and are re-stamped once before becoming runnable, which
/// guarantees a full extra epoch passes, long enough for any catalog
/// lookup that started before the first deferral fired to have finished.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
enum DeferralState {
    Scheduled,
    PendingOneEpoch,
    Ready,
}

struct DeferredAction {
    registered: Timestamp,
    state: DeferralState,
    action: Box<dyn FnOnce() + Send>,
}

/// Queues closures to run once the epoch has advanced past their
/// registration point.
///
/// For two actions registered by the same transaction on the same object,
/// execution order matches registration order: the queue is FIFO and
/// re-stamped double deferrals keep their relative order.
pub struct DeferredActionManager {
    /// The transaction manager's tick counter, shared so registration can
    /// be stamped without a back-reference.
    ticks: Arc<AtomicU64>,
    queue: Mutex<VecDeque<DeferredAction>>,
}

impl DeferredActionManager {
    pub(crate) fn new(ticks: Arc<AtomicU64>) -> Self {
        DeferredActionManager {
            ticks,
            queue: Mutex::new(VecDeque::new()),
        }
    }

    /// Issues a fresh tick as the registration stamp. Consuming a tick
    /// keeps the stamp strictly below the post-registration horizon, so
    /// an action registered while nothing runs is immediately due.
    fn now(&self) -> Timestamp {
        Timestamp::begin(self.ticks.fetch_add(1, Ordering::Relaxed))
    }

    /// Runs `action` once every transaction live at registration time has
    /// finished.
    pub fn defer(&self, action: impl FnOnce() + Send + 'static) {
        self.queue.lock().push_back(DeferredAction {
            registered: self.now(),
            state: DeferralState::PendingOneEpoch,
            action: Box::new(action),
        });
    }

    /// Runs `action` only after a *second* full epoch has passed. Used
    /// for objects that can still be reached through catalog lookups
    /// begun under the first epoch, notably index objects.
    pub fn defer_double(&self, action: impl FnOnce() + Send + 'static) {
        self.queue.lock().push_back(DeferredAction {
            registered: self.now(),
            state: DeferralState::Scheduled,
            action: Box::new(action),
        });
    }

    /// The number of actions not yet run.
    pub fn pending(&self) -> usize {
        self.queue.lock().len()
    }

    /// Pops every action registered before `epoch`, advancing its state;
    /// actions that reach `Ready` run (outside the queue lock, so an
    /// action may re-defer). Returns the number of actions run.
    pub(crate) fn process(&self, epoch: Timestamp) -> usize {
        let mut ready = Vec::new();
        {
            let mut queue = self.queue.lock();
            let mut lap = queue.len();
            while lap > 0 {
                lap -= 1;
                let Some(front) = queue.front() else {
                    break;
                };
                if front.registered >= epoch {
                    break;
                }
                let mut due = queue.pop_front().unwrap();
                match due.state {
                    DeferralState::Scheduled => {
                        due.registered = self.now();
                        due.state = DeferralState::PendingOneEpoch;
                        queue.push_back(due);
                    }
                    DeferralState::PendingOneEpoch | DeferralState::Ready => {
                        due.state = DeferralState::Ready;
                        ready.push(due.action);
                    }
                }
            }
        }
        let ran = ready.len();
        for action in ready {
            action();
        }
        ran
    }
}

/// Reclaims version records, slots and deferred objects at safe epochs.
///
/// `perform_gc` is cheap enough to call at a bounded cadence from a
/// dedicated thread; it only takes brief per-block critical sections.
pub struct GarbageCollector {
    txn_manager: Arc<TransactionManager>,
}

impl GarbageCollector {
    pub fn new(txn_manager: Arc<TransactionManager>) -> Self {
        GarbageCollector { txn_manager }
    }

    /// One collection cycle. Returns the number of finished transactions
    /// reclaimed and the number of deferred actions run.
    pub fn perform_gc(&self) -> (usize, usize) {
        let epoch = self
            .txn_manager
            .oldest_active()
            .unwrap_or_else(|| self.txn_manager.horizon());

        let mut reclaimed = 0;
        let mut still_visible = Vec::new();
        while let Some(finished) = self.txn_manager.pop_completed() {
            match finished.outcome {
                Outcome::Aborted => {
                    // Rollback already unlinked the records; what is left
                    // is the physical reclaim of never-committed inserts
                    // and the record buffer itself.
                    for rec in &finished.undo {
                        if matches!(rec.payload, UndoPayload::Insert) {
                            reclaim_slot(rec);
                        }
                    }
                    reclaimed += 1;
                }
                Outcome::Committed if finished.finish < epoch => {
                    for rec in &finished.undo {
                        unlink(rec);
                    }
                    reclaimed += 1;
                }
                Outcome::Committed => still_visible.push(finished),
            }
        }
        for finished in still_visible {
            self.txn_manager.requeue_completed(finished);
        }

        let actions = self.txn_manager.deferred().process(epoch);
        if reclaimed > 0 || actions > 0 {
            log::debug!("gc cycle at epoch {epoch}: {reclaimed} txns reclaimed, {actions} deferred actions run");
        }
        (reclaimed, actions)
    }
}

/// Clears the presence bit of `rec`'s slot and frees its varlen payloads.
/// The one place presence bits are cleared.
fn reclaim_slot(rec: &Arc<UndoRecord>) {
    let Some(block) = rec.block.upgrade() else {
        return;
    };
    let mut guard = block.inner.write();
    let slot = rec.slot.slot;
    guard.version_heads[slot as usize] = None;
    guard.release_tuple_varlens(&block.layout, slot);
    guard.clear_present(slot);
}

/// Removes `rec` from its slot's version chain. For committed deletes the
/// whole slot became unreachable, so the chain is dropped and the slot
/// physically reclaimed.
fn unlink(rec: &Arc<UndoRecord>) {
    let Some(block) = rec.block.upgrade() else {
        return;
    };
    if matches!(rec.payload, UndoPayload::Delete) {
        // Nothing can have stacked on top of a committed delete: writes
        // against a deleted tuple are rejected.
        drop(block);
        reclaim_slot(rec);
        return;
    }

    let mut guard = block.inner.write();
    let slot = rec.slot.slot as usize;
    let Some(head) = guard.version_heads[slot].clone() else {
        return;
    };
    if Arc::ptr_eq(&head, rec) {
        guard.version_heads[slot] = rec.next();
        return;
    }
    // Walk head-to-tail; the record may already be gone if the chain was
    // dropped wholesale by a delete reclaim.
    let mut prev = head;
    loop {
        let next = prev.next();
        match next {
            None => return,
            Some(n) if Arc::ptr_eq(&n, rec) => {
                *prev.next.lock() = rec.next();
                return;
            }
            Some(n) => prev = n,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn manager() -> Arc<TransactionManager> {
        TransactionManager::new()
    }

    #[test]
    fn epoch_gates_deferred_actions() {
        let mgr = manager();
        let gc = GarbageCollector::new(mgr.clone());
        let ran = Arc::new(AtomicU64::new(0));

        let long_lived = mgr.begin();
        {
            let ran = ran.clone();
            mgr.deferred().defer(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        // The long-lived transaction pins the epoch at its begin; the
        // action was registered after it, so it may not run yet.
        gc.perform_gc();
        assert_eq!(ran.load(Ordering::SeqCst), 0);

        mgr.commit(long_lived).unwrap();
        gc.perform_gc();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
        // Exactly once.
        gc.perform_gc();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn double_deferral_takes_an_extra_cycle() {
        let mgr = manager();
        let gc = GarbageCollector::new(mgr.clone());
        let ran = Arc::new(AtomicU64::new(0));
        {
            let ran = ran.clone();
            mgr.deferred().defer_double(move || {
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        // No live transactions: the first cycle only re-stamps, the
        // second runs.
        gc.perform_gc();
        assert_eq!(ran.load(Ordering::SeqCst), 0);
        gc.perform_gc();
        assert_eq!(ran.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn registration_order_is_execution_order() {
        let mgr = manager();
        let gc = GarbageCollector::new(mgr.clone());
        let order = Arc::new(Mutex::new(Vec::new()));
        for i in 0..4 {
            let order = order.clone();
            mgr.deferred().defer(move || order.lock().push(i));
        }
        gc.perform_gc();
        assert_eq!(*order.lock(), vec![0, 1, 2, 3]);
    }

    mod reclamation {
        use super::*;
        use crate::block::BlockStore;
        use crate::data_table::DataTable;
        use crate::layout::{AttrSize, BlockLayout};
        use crate::projection::{ProjectedRow, ProjectionInit};
        use quarry_primitives::TableOid;

        struct Fixture {
            mgr: Arc<TransactionManager>,
            gc: GarbageCollector,
            table: Arc<DataTable>,
            init: Arc<ProjectionInit>,
        }

        fn fixture() -> Fixture {
            let mgr = manager();
            let store = BlockStore::new(4096, 64);
            let (layout, _) = BlockLayout::compute(4096, &[AttrSize::Fixed(8), AttrSize::Varlen]);
            let layout = Arc::new(layout);
            let table = DataTable::new(store, layout.clone(), TableOid(3)).unwrap();
            let init = ProjectionInit::new(&layout, &layout.all_cols());
            Fixture {
                gc: GarbageCollector::new(mgr.clone()),
                mgr,
                table,
                init,
            }
        }

        fn row(init: &Arc<ProjectionInit>, v: u64) -> ProjectedRow {
            let mut row = init.initialize_row();
            row.set(0, v);
            row.set_varlen(1, format!("payload for {v}, long enough to hit the pool").as_bytes());
            row
        }

        #[test]
        fn committed_updates_are_unlinked_once_the_epoch_passes() {
            let f = fixture();
            let setup = f.mgr.begin();
            let slot = f.table.insert(&setup, &row(&f.init, 1)).unwrap();
            f.mgr.commit(setup).unwrap();

            for v in 2..5 {
                let txn = f.mgr.begin();
                f.table.update(&txn, slot, &row(&f.init, v)).unwrap();
                f.mgr.commit(txn).unwrap();
            }
            let (_, head) = f.table.slot_state(slot).unwrap();
            assert!(head.is_some());

            // No transaction is live, so everything is below the epoch.
            f.gc.perform_gc();
            let (deleted, head) = f.table.slot_state(slot).unwrap();
            assert!(!deleted);
            assert!(head.is_none(), "the whole chain must be unlinked");

            // The newest image survives unlinking.
            let reader = f.mgr.begin();
            let mut out = f.init.initialize_row();
            assert!(f.table.select(&reader, slot, &mut out));
            assert_eq!(out.get::<u64>(0), 4);
            f.mgr.abort(reader);
        }

        #[test]
        fn unlinking_waits_for_old_snapshots() {
            let f = fixture();
            let setup = f.mgr.begin();
            let slot = f.table.insert(&setup, &row(&f.init, 1)).unwrap();
            f.mgr.commit(setup).unwrap();

            let old_snapshot = f.mgr.begin();
            let writer = f.mgr.begin();
            f.table.update(&writer, slot, &row(&f.init, 2)).unwrap();
            f.mgr.commit(writer).unwrap();

            f.gc.perform_gc();
            let (_, head) = f.table.slot_state(slot).unwrap();
            assert!(head.is_some(), "the old snapshot still needs the before-image");

            let mut out = f.init.initialize_row();
            assert!(f.table.select(&old_snapshot, slot, &mut out));
            assert_eq!(out.get::<u64>(0), 1);
            f.mgr.commit(old_snapshot).unwrap();

            f.gc.perform_gc();
            let (_, head) = f.table.slot_state(slot).unwrap();
            assert!(head.is_none());
        }

        #[test]
        fn committed_deletes_reclaim_the_slot() {
            let f = fixture();
            let setup = f.mgr.begin();
            let slot = f.table.insert(&setup, &row(&f.init, 1)).unwrap();
            f.mgr.commit(setup).unwrap();

            let deleter = f.mgr.begin();
            f.table.delete(&deleter, slot).unwrap();
            f.mgr.commit(deleter).unwrap();

            f.gc.perform_gc();
            // The presence bit is gone: the slot no longer exists at all.
            assert!(f.table.slot_state(slot).is_none());
        }

        #[test]
        fn aborted_inserts_reclaim_the_slot() {
            let f = fixture();
            let doomed = f.mgr.begin();
            let slot = f.table.insert(&doomed, &row(&f.init, 1)).unwrap();
            f.mgr.abort(doomed);

            f.gc.perform_gc();
            assert!(f.table.slot_state(slot).is_none());
        }
    }

    #[test]
    fn epoch_never_decreases() {
        let mgr = manager();
        let mut last = Timestamp::INVALID;
        for _ in 0..8 {
            let txn = mgr.begin();
            let epoch = mgr.oldest_active().unwrap();
            assert!(epoch > last);
            last = epoch;
            mgr.commit(txn).unwrap();
        }
    }
}
