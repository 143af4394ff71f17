//! Transaction contexts and the manager that drives them.

use std::collections::BTreeSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::Arc;

use crossbeam_queue::SegQueue;
use parking_lot::Mutex;
use quarry_primitives::Timestamp;

use crate::error::TransactionError;
use crate::gc::DeferredActionManager;
use crate::log::{CommitAck, LogRecord, LogSink};
use crate::undo::UndoRecord;

/// A commit- or abort-time action. Actions receive the deferred-action
/// manager, so cleanup can be postponed to a safe epoch (the catalog's
/// deferred object destruction goes through this), and the transaction's
/// finish timestamp: the commit timestamp on the commit path,
/// [`Timestamp::INVALID`] on the abort path.
pub type TxnAction = Box<dyn FnOnce(&DeferredActionManager, Timestamp) + Send>;

pub(crate) struct WriteSets {
    pub(crate) undo: Vec<Arc<UndoRecord>>,
    pub(crate) redo: Vec<LogRecord>,
    commit_actions: Vec<TxnAction>,
    abort_actions: Vec<TxnAction>,
}

/// One transaction: a begin timestamp, the undo and redo buffers its
/// writes accumulate, and the actions to run at commit or abort.
///
/// A context is single-owner; storage operations borrow it and the
/// manager consumes it at commit/abort. The interior lock exists because
/// storage appends to the buffers through a shared borrow.
pub struct TransactionContext {
    begin: Timestamp,
    must_abort: AtomicBool,
    writes: Mutex<WriteSets>,
}

impl TransactionContext {
    fn new(begin: Timestamp) -> Self {
        TransactionContext {
            begin,
            must_abort: AtomicBool::new(false),
            writes: Mutex::new(WriteSets {
                undo: Vec::new(),
                redo: Vec::new(),
                commit_actions: Vec::new(),
                abort_actions: Vec::new(),
            }),
        }
    }

    /// This transaction's begin timestamp; doubles as its identity.
    #[inline]
    pub fn begin_ts(&self) -> Timestamp {
        self.begin
    }

    /// Forces the next commit attempt to divert to an abort. Set by
    /// write-write conflict detection and by DDL-lock rejection.
    pub fn set_must_abort(&self) {
        self.must_abort.store(true, Ordering::Release);
    }

    /// Whether this transaction is doomed to abort.
    pub fn must_abort(&self) -> bool {
        self.must_abort.load(Ordering::Acquire)
    }

    /// Registers an action to run exactly once if this transaction
    /// commits, in registration order.
    pub fn register_commit_action(&self, action: impl FnOnce(&DeferredActionManager, Timestamp) + Send + 'static) {
        self.writes.lock().commit_actions.push(Box::new(action));
    }

    /// Registers an action to run exactly once if this transaction
    /// aborts, in registration order.
    pub fn register_abort_action(&self, action: impl FnOnce(&DeferredActionManager, Timestamp) + Send + 'static) {
        self.writes.lock().abort_actions.push(Box::new(action));
    }

    /// Stages one write: links the undo record into this transaction's
    /// buffer and appends the redo to the transaction-local log.
    pub(crate) fn record_write(&self, undo: Arc<UndoRecord>, redo: LogRecord) {
        let mut w = self.writes.lock();
        w.undo.push(undo);
        w.redo.push(redo);
    }

    fn into_writes(self) -> WriteSets {
        self.writes.into_inner()
    }
}

impl std::fmt::Debug for TransactionContext {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("TransactionContext")
            .field("begin", &self.begin)
            .field("must_abort", &self.must_abort())
            .finish_non_exhaustive()
    }
}

/// How a finished transaction ended.
#[derive(Clone, Copy, PartialEq, Eq, Debug)]
pub(crate) enum Outcome {
    Committed,
    Aborted,
}

/// A finished transaction, queued for the garbage collector.
pub(crate) struct FinishedTransaction {
    pub(crate) outcome: Outcome,
    /// The commit timestamp for committed transactions; meaningless for
    /// aborted ones (their records were unlinked during rollback).
    pub(crate) finish: Timestamp,
    pub(crate) undo: Vec<Arc<UndoRecord>>,
}

/// The promise half of a commit: resolves once the log sink reports the
/// transaction durable. Read-only transactions (and managers without a
/// sink) resolve immediately.
#[derive(Debug)]
pub struct DurabilityHandle {
    commit: Timestamp,
    rx: Option<crossbeam_channel::Receiver<Timestamp>>,
}

impl DurabilityHandle {
    fn ready(commit: Timestamp) -> Self {
        DurabilityHandle { commit, rx: None }
    }

    fn pending(commit: Timestamp, rx: crossbeam_channel::Receiver<Timestamp>) -> Self {
        DurabilityHandle { commit, rx: Some(rx) }
    }

    /// Whether the commit is already durable.
    pub fn is_durable(&self) -> bool {
        match &self.rx {
            None => true,
            Some(rx) => !rx.is_empty(),
        }
    }

    /// Blocks until the log sink confirms durability and returns the
    /// commit timestamp. A sink that drops the ack counts as confirmed:
    /// there is nothing left that could still be waited on.
    pub fn wait(self) -> Timestamp {
        if let Some(rx) = self.rx {
            let _ = rx.recv();
        }
        self.commit
    }
}

/// The outcome of a successful commit.
#[derive(Debug)]
pub struct CommitReceipt {
    pub commit_ts: Timestamp,
    pub durability: DurabilityHandle,
}

/// Issues timestamps and drives transactions through begin, commit and
/// abort.
///
/// Commit is linearizable with respect to begin: the short critical
/// section below issues the commit timestamp and re-stamps the
/// transaction's version records before any later begin timestamp can be
/// handed out, so a transaction that begins at or after a commit
/// timestamp always observes that commit's writes.
pub struct TransactionManager {
    /// Serializes timestamp issuance with version-record stamping.
    commit_lock: Mutex<()>,
    /// The next tick; shared with the deferred-action manager so deferral
    /// registration can be stamped without a back-reference.
    ticks: Arc<AtomicU64>,
    active: Mutex<BTreeSet<Timestamp>>,
    completed: SegQueue<FinishedTransaction>,
    deferred: DeferredActionManager,
    log: Option<Arc<dyn LogSink>>,
}

impl TransactionManager {
    /// A manager with logging disabled: commits are durable the moment
    /// they happen.
    pub fn new() -> Arc<Self> {
        Self::build(None)
    }

    /// A manager publishing commit-time records to `sink`.
    pub fn with_log_sink(sink: Arc<dyn LogSink>) -> Arc<Self> {
        Self::build(Some(sink))
    }

    fn build(log: Option<Arc<dyn LogSink>>) -> Arc<Self> {
        let ticks = Arc::new(AtomicU64::new(1));
        Arc::new(TransactionManager {
            commit_lock: Mutex::new(()),
            deferred: DeferredActionManager::new(ticks.clone()),
            ticks,
            active: Mutex::new(BTreeSet::new()),
            completed: SegQueue::new(),
            log,
        })
    }

    fn next_tick(&self) -> u64 {
        self.ticks.fetch_add(1, Ordering::Relaxed)
    }

    /// A begin-encoded timestamp newer than every timestamp issued so
    /// far; the epoch fallback when no transaction is live.
    pub(crate) fn horizon(&self) -> Timestamp {
        Timestamp::begin(self.ticks.load(Ordering::Relaxed))
    }

    /// The begin timestamp of the oldest live transaction, if any. This
    /// is the GC epoch while anything is running.
    pub(crate) fn oldest_active(&self) -> Option<Timestamp> {
        self.active.lock().first().copied()
    }

    /// The deferred-action manager fed by this transaction manager.
    pub fn deferred(&self) -> &DeferredActionManager {
        &self.deferred
    }

    /// Starts a transaction with a fresh, strictly monotonic begin
    /// timestamp.
    pub fn begin(&self) -> TransactionContext {
        let _held = self.commit_lock.lock();
        let begin = Timestamp::begin(self.next_tick());
        self.active.lock().insert(begin);
        TransactionContext::new(begin)
    }

    /// Commits `txn`. Diverts to [`Self::abort`] if the must-abort flag
    /// is set. Version records are stamped with the commit timestamp, the
    /// redo buffer is published to the log sink (read-only transactions
    /// publish nothing), commit actions run in registration order, and
    /// the transaction is handed to the garbage collector.
    pub fn commit(&self, txn: TransactionContext) -> Result<CommitReceipt, TransactionError> {
        if txn.must_abort() {
            let begin = txn.begin_ts();
            self.abort(txn);
            return Err(TransactionError::Aborted { begin });
        }

        let begin = txn.begin_ts();
        let mut w = txn.into_writes();

        let (commit_ts, durability) = {
            let _held = self.commit_lock.lock();
            let commit_ts = Timestamp::commit(self.next_tick());
            for rec in &w.undo {
                rec.stamp(commit_ts);
            }
            // Publishing under the same critical section keeps the sink's
            // append order identical to commit-timestamp order.
            let durability = match (&self.log, w.redo.is_empty()) {
                (Some(sink), false) => {
                    let mut records = std::mem::take(&mut w.redo);
                    records.push(LogRecord::Commit { begin, commit: commit_ts });
                    let (tx, rx) = crossbeam_channel::bounded(1);
                    sink.append(records, CommitAck::new(commit_ts, tx));
                    DurabilityHandle::pending(commit_ts, rx)
                }
                _ => DurabilityHandle::ready(commit_ts),
            };
            (commit_ts, durability)
        };
        log::trace!("txn {begin} committed at {commit_ts}");

        for action in w.commit_actions {
            action(&self.deferred, commit_ts);
        }

        self.active.lock().remove(&begin);
        self.completed.push(FinishedTransaction {
            outcome: Outcome::Committed,
            finish: commit_ts,
            undo: w.undo,
        });
        Ok(CommitReceipt { commit_ts, durability })
    }

    /// Aborts `txn`: reverts its in-place writes newest-first, unlinks
    /// its version records, runs its abort actions in registration order,
    /// and hands the leftovers to the garbage collector.
    pub fn abort(&self, txn: TransactionContext) {
        let begin = txn.begin_ts();
        let w = txn.into_writes();
        log::trace!("txn {begin} aborted");

        for rec in w.undo.iter().rev() {
            rec.rollback();
        }
        for action in w.abort_actions {
            action(&self.deferred, Timestamp::INVALID);
        }

        self.active.lock().remove(&begin);
        self.completed.push(FinishedTransaction {
            outcome: Outcome::Aborted,
            finish: Timestamp::INVALID,
            undo: w.undo,
        });
    }

    pub(crate) fn pop_completed(&self) -> Option<FinishedTransaction> {
        self.completed.pop()
    }

    pub(crate) fn requeue_completed(&self, txn: FinishedTransaction) {
        self.completed.push(txn);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::log::MemoryLogSink;

    #[test]
    fn begin_timestamps_are_strictly_monotonic() {
        let mgr = TransactionManager::new();
        let a = mgr.begin();
        let b = mgr.begin();
        assert!(b.begin_ts() > a.begin_ts());
        mgr.abort(a);
        mgr.abort(b);
    }

    #[test]
    fn commit_timestamp_exceeds_every_prior_begin() {
        let mgr = TransactionManager::new();
        let a = mgr.begin();
        let b = mgr.begin();
        let receipt = mgr.commit(b).unwrap();
        assert!(receipt.commit_ts > a.begin_ts());
        assert!(receipt.commit_ts.is_commit());
        mgr.abort(a);
    }

    #[test]
    fn must_abort_diverts_commit() {
        let mgr = TransactionManager::new();
        let txn = mgr.begin();
        let begin = txn.begin_ts();
        txn.set_must_abort();
        match mgr.commit(txn) {
            Err(TransactionError::Aborted { begin: b }) => assert_eq!(b, begin),
            Ok(_) => panic!("commit of a must-abort transaction must divert to abort"),
        }
    }

    #[test]
    fn read_only_commit_publishes_nothing() {
        let sink = Arc::new(MemoryLogSink::new());
        let mgr = TransactionManager::with_log_sink(sink.clone());
        let txn = mgr.begin();
        let receipt = mgr.commit(txn).unwrap();
        assert!(receipt.durability.is_durable());
        assert!(sink.is_empty());
    }

    #[test]
    fn commit_and_abort_actions_run_exactly_once_in_order() {
        use std::sync::atomic::AtomicUsize;
        let mgr = TransactionManager::new();
        let order = Arc::new(Mutex::new(Vec::new()));
        let ran = Arc::new(AtomicUsize::new(0));

        let txn = mgr.begin();
        for i in 0..3 {
            let order = order.clone();
            let ran = ran.clone();
            txn.register_commit_action(move |_, ts| {
                assert!(ts.is_commit());
                order.lock().push(i);
                ran.fetch_add(1, Ordering::SeqCst);
            });
        }
        txn.register_abort_action(|_, _| panic!("abort action must not run on commit"));
        mgr.commit(txn).unwrap();
        assert_eq!(*order.lock(), vec![0, 1, 2]);
        assert_eq!(ran.load(Ordering::SeqCst), 3);
    }
}
