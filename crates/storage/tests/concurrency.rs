//! End-to-end storage scenarios: concurrent writers, bulk scans, and
//! commit-time log publication.

use std::ops::Bound;
use std::sync::Arc;
use std::thread;

use pretty_assertions::assert_eq;
use quarry_primitives::{ColId, TableOid, Timestamp};
use rand::seq::SliceRandom;
use rand::SeedableRng;

use quarry_storage::index::{Index, KeyColumn, KeySchema};
use quarry_storage::{
    AttrSize, BlockLayout, BlockStore, DataTable, GarbageCollector, LogRecord, MemoryLogSink, ProjectionInit,
    TransactionManager,
};

struct Fixture {
    mgr: Arc<TransactionManager>,
    table: Arc<DataTable>,
    init: Arc<ProjectionInit>,
}

fn fixture(mgr: Arc<TransactionManager>) -> Fixture {
    let _ = env_logger::builder().is_test(true).try_init();
    let store = BlockStore::new(1 << 16, 4096);
    let (layout, _) = BlockLayout::compute(1 << 16, &[AttrSize::Fixed(8), AttrSize::Fixed(8)]);
    let layout = Arc::new(layout);
    let table = DataTable::new(store, layout.clone(), TableOid(1001)).unwrap();
    let init = ProjectionInit::new(&layout, &layout.all_cols());
    Fixture { mgr, table, init }
}

fn two_ints(init: &Arc<ProjectionInit>, a: u64, b: u64) -> quarry_storage::ProjectedRow {
    let mut row = init.initialize_row();
    row.set(0, a);
    row.set(1, b);
    row
}

/// Concurrent updates of one slot: at most one transaction commits per
/// round, every loser is diverted to abort, and no update is ever lost.
#[test]
fn no_lost_updates_under_concurrent_writers() {
    let f = fixture(TransactionManager::new());
    let setup = f.mgr.begin();
    let slot = f.table.insert(&setup, &two_ints(&f.init, 0, 0)).unwrap();
    f.mgr.commit(setup).unwrap();

    const ROUNDS: u64 = 20;
    const THREADS: u64 = 4;
    let mut committed_total = 0u64;
    for round in 0..ROUNDS {
        // Begin every transaction up front so the writers genuinely race:
        // their snapshots all predate every commit of the round.
        let txns: Vec<_> = (0..THREADS).map(|_| f.mgr.begin()).collect();
        let winners: Vec<bool> = thread::scope(|scope| {
            let handles: Vec<_> = txns
                .into_iter()
                .enumerate()
                .map(|(t, txn)| {
                    let f = &f;
                    scope.spawn(move || {
                        let value = round * THREADS + t as u64 + 1;
                        let wrote = f.table.update(&txn, slot, &two_ints(&f.init, value, value)).is_ok();
                        if wrote {
                            f.mgr.commit(txn).is_ok()
                        } else {
                            assert!(txn.must_abort());
                            assert!(matches!(
                                f.mgr.commit(txn),
                                Err(quarry_storage::TransactionError::Aborted { .. })
                            ));
                            false
                        }
                    })
                })
                .collect();
            handles.into_iter().map(|h| h.join().unwrap()).collect()
        });
        let wins = winners.iter().filter(|&&w| w).count();
        assert!(wins <= 1, "two writers committed an update to the same slot");
        committed_total += wins as u64;
    }
    assert!(committed_total > 0, "someone should have won at least once");

    // The surviving value must be one that a winning round wrote.
    let check = f.mgr.begin();
    let mut out = f.init.initialize_row();
    assert!(f.table.select(&check, slot, &mut out));
    assert_eq!(out.get::<u64>(0), out.get::<u64>(1));
    f.mgr.abort(check);
}

/// Scan completeness: ten thousand committed rows come back exactly once
/// each, whatever order they were inserted in.
#[test]
fn full_scan_returns_every_committed_row() {
    const N: u64 = 10_000;
    let f = fixture(TransactionManager::new());

    let mut ids: Vec<u64> = (0..N).collect();
    ids.shuffle(&mut rand::rngs::StdRng::seed_from_u64(0xfeed));

    let setup = f.mgr.begin();
    for &id in &ids {
        f.table.insert(&setup, &two_ints(&f.init, id, id * 2)).unwrap();
    }
    f.mgr.commit(setup).unwrap();

    let reader = f.mgr.begin();
    let scan_init = ProjectionInit::new(f.table.layout(), &[ColId(0)]);
    let mut iter = f.table.begin();
    let mut batch = scan_init.initialize_columns(512);
    let mut seen = vec![false; N as usize];
    let mut count = 0u64;
    loop {
        f.table.scan(&reader, &mut iter, &mut batch);
        for i in 0..batch.num_tuples() {
            let id = batch.row(i).get::<u64>(0);
            assert!(!seen[id as usize], "row {id} scanned twice");
            seen[id as usize] = true;
            count += 1;
        }
        if iter.done() {
            break;
        }
    }
    assert_eq!(count, N);
    assert!(seen.into_iter().all(|s| s));
    f.mgr.commit(reader).unwrap();
}

/// Commit publishes redo records in stage order, closed by the commit
/// record; aborted and read-only transactions publish nothing.
#[test]
fn commit_publishes_the_redo_buffer_in_order() {
    let sink = Arc::new(MemoryLogSink::new());
    let f = fixture(TransactionManager::with_log_sink(sink.clone()));

    let txn = f.mgr.begin();
    let begin = txn.begin_ts();
    let slot = f.table.insert(&txn, &two_ints(&f.init, 1, 2)).unwrap();
    f.table.update(&txn, slot, &two_ints(&f.init, 3, 4)).unwrap();
    f.table.delete(&txn, slot).unwrap();
    let receipt = f.mgr.commit(txn).unwrap();
    assert_eq!(receipt.durability.wait(), receipt.commit_ts);

    let records = sink.records();
    assert_eq!(records.len(), 4);
    assert!(matches!(records[0], LogRecord::Redo { slot: s, .. } if s == slot));
    assert!(matches!(records[1], LogRecord::Redo { slot: s, .. } if s == slot));
    assert!(matches!(records[2], LogRecord::Delete { slot: s, .. } if s == slot));
    match records[3] {
        LogRecord::Commit { begin: b, commit } => {
            assert_eq!(b, begin);
            assert_eq!(commit, receipt.commit_ts);
        }
        _ => panic!("a transaction's records must close with a commit record"),
    }

    // Aborts publish nothing further.
    let doomed = f.mgr.begin();
    f.table.insert(&doomed, &two_ints(&f.init, 9, 9)).unwrap();
    f.mgr.abort(doomed);
    assert_eq!(sink.len(), 4);
}

/// A GC thread running at full tilt alongside writers never breaks
/// snapshot reads.
#[test]
fn gc_runs_safely_alongside_readers_and_writers() {
    let f = fixture(TransactionManager::new());
    let setup = f.mgr.begin();
    let slot = f.table.insert(&setup, &two_ints(&f.init, 0, 0)).unwrap();
    f.mgr.commit(setup).unwrap();

    let stop_flag = std::sync::atomic::AtomicBool::new(false);
    thread::scope(|scope| {
        let stop = &stop_flag;
        let f = &f;
        scope.spawn(move || {
            let gc = GarbageCollector::new(f.mgr.clone());
            while !stop.load(std::sync::atomic::Ordering::Relaxed) {
                gc.perform_gc();
            }
        });
        scope.spawn(move || {
            for v in 1..200u64 {
                let txn = f.mgr.begin();
                if f.table.update(&txn, slot, &two_ints(&f.init, v, v)).is_ok() {
                    f.mgr.commit(txn).unwrap();
                } else {
                    let _ = f.mgr.commit(txn);
                }
            }
        });
        scope.spawn(move || {
            for _ in 0..200 {
                let txn = f.mgr.begin();
                let mut out = f.init.initialize_row();
                assert!(f.table.select(&txn, slot, &mut out));
                // Snapshot consistency within the transaction.
                let a = out.get::<u64>(0);
                let mut again = f.init.initialize_row();
                assert!(f.table.select(&txn, slot, &mut again));
                assert_eq!(a, again.get::<u64>(0));
                f.mgr.commit(txn).unwrap();
            }
            stop.store(true, std::sync::atomic::Ordering::Relaxed);
        });
    });
}

/// Uniqueness under concurrency (scenario: two transactions race to
/// claim the same key): exactly one inserts, the other observes the
/// claim.
#[test]
fn conditional_insert_admits_exactly_one_claimant() {
    let store = BlockStore::new(1 << 16, 256);
    let (layout, cols) = BlockLayout::compute(1 << 16, &[AttrSize::Fixed(8)]);
    let layout = Arc::new(layout);
    let mgr = TransactionManager::new();
    let table = DataTable::new(store, layout.clone(), TableOid(8)).unwrap();
    let init = ProjectionInit::new(&layout, &layout.all_cols());
    let schema = KeySchema::new(&layout, &[(cols[0], KeyColumn::Int { size: 8, signed: false })]);
    let index = Index::new_ordered(quarry_primitives::IndexOid(5), table.clone(), schema, true);

    let winners: Vec<bool> = thread::scope(|scope| {
        let handles: Vec<_> = (0..8u64)
            .map(|_| {
                let mgr = &mgr;
                let table = &table;
                let index = &index;
                let init = &init;
                scope.spawn(move || {
                    let txn = mgr.begin();
                    let mut row = init.initialize_row();
                    row.set(0, 77u64);
                    let slot = table.insert(&txn, &row).unwrap();
                    let mut key = index.key_initializer().initialize_row();
                    key.set(0, 77u64);
                    let ok = index.insert_unique(&txn, &key, slot).is_ok();
                    if ok {
                        mgr.commit(txn).unwrap();
                    } else {
                        mgr.abort(txn);
                    }
                    ok
                })
            })
            .collect();
        handles.into_iter().map(|h| h.join().unwrap()).collect()
    });
    assert_eq!(winners.iter().filter(|&&w| w).count(), 1);

    // Exactly one visible tuple holds the key.
    let check = mgr.begin();
    let mut key = index.key_initializer().initialize_row();
    key.set(0, 77u64);
    let mut out = Vec::new();
    index.scan_key(&check, &key, &mut out);
    assert_eq!(out.len(), 1);
    let mut range = Vec::new();
    index
        .scan_ascending(&check, Bound::Unbounded, Bound::Unbounded, None, &mut range)
        .unwrap();
    assert_eq!(range, out);
    mgr.abort(check);
}

#[test]
fn durability_handle_resolves_without_a_sink() {
    let mgr = TransactionManager::new();
    let txn = mgr.begin();
    let receipt = mgr.commit(txn).unwrap();
    assert!(receipt.durability.is_durable());
    let ts: Timestamp = receipt.durability.wait();
    assert!(ts.is_commit());
}
