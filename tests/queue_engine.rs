use std::sync::{
    Arc, Mutex,
    atomic::{AtomicBool, AtomicUsize, Ordering},
};

use serde_json::json;

use offqueue::{
    config::QueueConfig,
    core::queue::{QueueEngine, QueueError},
    op::{NewOperation, OperationRecord, QueueStats},
    persist::{PersistError, PersistResult, QueueStore, memory::MemoryStore},
    types::{OpKind, OpStatus},
};

fn op(kind: OpKind, entity: &str, n: u32) -> NewOperation {
    NewOperation::new(kind, entity, json!({ "n": n })).max_retries(3)
}

struct FlakyStore {
    inner: MemoryStore,
    fail: Arc<AtomicBool>,
}

impl QueueStore for FlakyStore {
    fn load(&mut self) -> PersistResult<Option<Vec<OperationRecord>>> {
        self.inner.load()
    }

    fn save(&mut self, records: &[OperationRecord]) -> PersistResult<()> {
        if self.fail.load(Ordering::SeqCst) {
            return Err(PersistError::Message("disk full".to_string()));
        }
        self.inner.save(records)
    }
}

#[test]
fn add_assigns_unique_pending_records_in_order() {
    let mut engine = QueueEngine::open(MemoryStore::new(), QueueConfig::default());
    let a = engine.add(op(OpKind::Create, "meal_plan", 1)).expect("add a");
    let b = engine.add(op(OpKind::Update, "meal_plan", 2)).expect("add b");
    let c = engine.add(op(OpKind::Delete, "recipe", 3)).expect("add c");

    assert_ne!(a, b);
    assert_ne!(b, c);
    let ids: Vec<_> = engine.get_all().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![a, b, c]);

    let rec = engine.get(b).expect("record");
    assert_eq!(rec.status, OpStatus::Pending);
    assert_eq!(rec.retry_count, 0);
    assert_eq!(rec.kind, OpKind::Update);
    assert_eq!(rec.last_error, None);
    assert_eq!(
        engine.stats(),
        QueueStats { total: 3, pending: 3, executing: 0, completed: 0, failed: 0 }
    );
}

#[test]
fn get_all_returns_detached_snapshot() {
    let mut engine = QueueEngine::open(MemoryStore::new(), QueueConfig::default());
    let id = engine.add(op(OpKind::Create, "recipe", 1)).expect("add");
    let mut all = engine.get_all();
    all[0].status = OpStatus::Completed;
    all.clear();
    assert_eq!(engine.get(id).expect("record").status, OpStatus::Pending);
    assert_eq!(engine.len(), 1);
}

#[test]
fn remove_reports_presence() {
    let mut engine = QueueEngine::open(MemoryStore::new(), QueueConfig::default());
    let a = engine.add(op(OpKind::Create, "recipe", 1)).expect("add");
    let b = engine.add(op(OpKind::Create, "recipe", 2)).expect("add");

    assert!(engine.remove(a).expect("remove"));
    assert!(!engine.remove(a).expect("remove again"));
    assert!(engine.get(a).is_none());
    assert_eq!(engine.get(b).map(|r| r.id), Some(b));
    assert_eq!(engine.len(), 1);
}

#[test]
fn clear_completed_only_touches_completed() {
    let mut engine = QueueEngine::open(MemoryStore::new(), QueueConfig::default());
    let done1 = engine.add(op(OpKind::Create, "a", 1)).expect("add");
    let waiting = engine.add(op(OpKind::Create, "b", 2)).expect("add");
    let done2 = engine.add(op(OpKind::Create, "c", 3)).expect("add");
    let broken = engine
        .add(op(OpKind::Create, "d", 4).max_retries(1))
        .expect("add");

    for id in [done1, done2] {
        engine.mark_executing(id).expect("exec");
        engine.mark_completed(id).expect("complete");
    }
    engine.mark_executing(broken).expect("exec");
    engine.mark_failed_attempt(broken, "nope").expect("fail");

    assert_eq!(engine.clear_completed().expect("clear"), 2);
    let left: Vec<_> = engine.get_all().into_iter().map(|r| r.id).collect();
    assert_eq!(left, vec![waiting, broken]);
    assert_eq!(engine.get_failed().len(), 1);
    assert_eq!(engine.clear_completed().expect("clear again"), 0);

    assert_eq!(engine.clear().expect("clear all"), 2);
    assert!(engine.is_empty());
}

#[test]
fn listener_sees_every_mutation_until_unsubscribed() {
    let mut engine = QueueEngine::open(MemoryStore::new(), QueueConfig::default());
    let seen: Arc<Mutex<Vec<QueueStats>>> = Arc::default();
    let sink = Arc::clone(&seen);
    let sub = engine.add_listener(move |stats| sink.lock().expect("lock").push(*stats));

    let a = engine.add(op(OpKind::Create, "x", 1)).expect("add");
    let b = engine.add(op(OpKind::Create, "y", 2)).expect("add");
    engine.mark_executing(a).expect("exec");
    engine.mark_completed(a).expect("complete");
    engine.clear_completed().expect("clear completed");
    engine.remove(b).expect("remove");
    engine.clear().expect("clear");

    {
        let seen = seen.lock().expect("lock");
        assert_eq!(seen.len(), 7);
        assert_eq!(seen[0].pending, 1);
        assert_eq!(seen[2].executing, 1);
        assert_eq!(seen[3].completed, 1);
        assert_eq!(seen[4].total, 1);
        assert_eq!(seen[6].total, 0);
    }

    sub.unsubscribe();
    assert_eq!(engine.listener_count(), 0);
    engine.add(op(OpKind::Create, "z", 3)).expect("add");
    assert_eq!(seen.lock().expect("lock").len(), 7);
}

#[test]
fn panicking_listener_is_isolated() {
    let mut engine = QueueEngine::open(MemoryStore::new(), QueueConfig::default());
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _bad = engine.add_listener(|_| panic!("listener bug"));
    let _good = engine.add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    let id = engine.add(op(OpKind::Create, "x", 1)).expect("add survives");
    assert!(engine.get(id).is_some());
    assert_eq!(calls.load(Ordering::SeqCst), 1);
}

#[test]
fn requests_without_ceiling_take_configured_default() {
    let cfg = QueueConfig {
        default_max_retries: 7,
        ..QueueConfig::default()
    };
    let mut engine = QueueEngine::open(MemoryStore::new(), cfg);
    let implicit = engine
        .add(NewOperation::new(OpKind::Create, "recipe", json!({})))
        .expect("add");
    let explicit = engine.add(op(OpKind::Create, "recipe", 1)).expect("add");

    assert_eq!(engine.get(implicit).expect("rec").max_retries, 7);
    assert_eq!(engine.get(explicit).expect("rec").max_retries, 3);
}

#[test]
fn failed_save_rolls_back_and_skips_listeners() {
    let fail = Arc::new(AtomicBool::new(false));
    let store = FlakyStore {
        inner: MemoryStore::new(),
        fail: Arc::clone(&fail),
    };
    let backing = store.inner.clone();
    let mut engine = QueueEngine::open(store, QueueConfig::default());
    let kept = engine.add(op(OpKind::Create, "x", 1)).expect("add");

    let calls = Arc::new(AtomicUsize::new(0));
    let counter = Arc::clone(&calls);
    let _sub = engine.add_listener(move |_| {
        counter.fetch_add(1, Ordering::SeqCst);
    });

    fail.store(true, Ordering::SeqCst);
    let err = engine.add(op(OpKind::Create, "y", 2)).unwrap_err();
    assert!(matches!(err, QueueError::Persist(_)));
    assert!(engine.remove(kept).is_err());
    assert!(engine.mark_executing(kept).is_err());
    assert!(engine.clear().is_err());

    assert_eq!(engine.len(), 1);
    assert_eq!(engine.get(kept).expect("kept").status, OpStatus::Pending);
    assert_eq!(calls.load(Ordering::SeqCst), 0);
    assert_eq!(backing.records().expect("decode").len(), 1);

    fail.store(false, Ordering::SeqCst);
    engine.add(op(OpKind::Create, "z", 3)).expect("add after recovery");
    assert_eq!(backing.records().expect("decode").len(), 2);
}

#[test]
fn bounded_queue_evicts_completed_then_failed_never_pending() {
    let cfg = QueueConfig {
        max_records: Some(3),
        ..QueueConfig::default()
    };
    let mut engine = QueueEngine::open(MemoryStore::new(), cfg);
    let done = engine.add(op(OpKind::Create, "a", 1)).expect("add");
    let broken = engine.add(op(OpKind::Create, "b", 2).max_retries(1)).expect("add");
    let waiting = engine.add(op(OpKind::Create, "c", 3)).expect("add");

    engine.mark_executing(done).expect("exec");
    engine.mark_completed(done).expect("complete");
    engine.mark_executing(broken).expect("exec");
    engine.mark_failed_attempt(broken, "x").expect("fail");

    let d = engine.add(op(OpKind::Create, "d", 4)).expect("evicts completed");
    assert!(engine.get(done).is_none());
    let e = engine.add(op(OpKind::Create, "e", 5)).expect("evicts failed");
    assert!(engine.get(broken).is_none());

    let err = engine.add(op(OpKind::Create, "f", 6)).unwrap_err();
    assert!(matches!(err, QueueError::QueueFull { capacity: 3 }));
    let ids: Vec<_> = engine.get_all().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![waiting, d, e]);
}

#[test]
fn requeue_replaces_failed_record_with_fresh_one() {
    let mut engine = QueueEngine::open(MemoryStore::new(), QueueConfig::default());
    let id = engine
        .add(op(OpKind::Update, "meal_record", 9).max_retries(1))
        .expect("add");
    assert_eq!(engine.requeue(id).expect("requeue pending"), None);

    engine.mark_executing(id).expect("exec");
    engine.mark_failed_attempt(id, "Network error").expect("fail");

    let fresh = engine.requeue(id).expect("requeue").expect("new id");
    assert_ne!(fresh, id);
    assert!(engine.get(id).is_none());
    let rec = engine.get(fresh).expect("fresh");
    assert_eq!(rec.status, OpStatus::Pending);
    assert_eq!(rec.retry_count, 0);
    assert_eq!(rec.entity, "meal_record");
    assert_eq!(rec.data, json!({ "n": 9 }));
    assert_eq!(engine.oldest_pending_ts_ms(), Some(rec.ts_ms));
}

#[test]
fn reload_recovers_executing_records_as_pending() {
    let store = MemoryStore::new();
    let (a, b) = {
        let mut engine = QueueEngine::open(store.clone(), QueueConfig::default());
        let a = engine.add(op(OpKind::Create, "x", 1)).expect("add");
        let b = engine.add(op(OpKind::Create, "y", 2)).expect("add");
        engine.mark_executing(a).expect("exec");
        (a, b)
    };

    let engine = QueueEngine::open(store.clone(), QueueConfig::default());
    assert_eq!(engine.get(a).expect("a").status, OpStatus::Pending);
    let ids: Vec<_> = engine.get_pending().into_iter().map(|r| r.id).collect();
    assert_eq!(ids, vec![a, b]);

    let persisted = store.records().expect("decode");
    assert!(persisted.iter().all(|r| r.status == OpStatus::Pending));
}

#[test]
fn malformed_snapshot_starts_empty() {
    let store = MemoryStore::new();
    store.set_raw(b"{not json".to_vec());
    let mut engine = QueueEngine::open(store.clone(), QueueConfig::default());
    assert!(engine.is_empty());

    engine.add(op(OpKind::Create, "x", 1)).expect("add");
    assert_eq!(store.records().expect("decode").len(), 1);
}
