use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};

use hashbrown::HashSet;
use parking_lot::Mutex;

use super::*;

#[derive(Debug, thiserror::Error)]
#[error("odd item {0}")]
struct OddItem(u32);

fn executors() -> Vec<Box<dyn Executor>> {
    vec![
        Box::new(SequentialExecutor::new()),
        Box::new(ThreadedExecutor::new(3).unwrap().with_max_in_flight(2)),
    ]
}

#[test]
fn test_from_sequence_partitions() {
    let bag = Bag::from_sequence((0..10u32).collect(), 4);
    assert_eq!(bag.partition_count(), 3);
    let empty: Bag<u32> = Bag::from_sequence(Vec::new(), 4);
    assert_eq!(empty.partition_count(), 0);
    assert!(empty.compute(&SequentialExecutor::new()).unwrap().is_empty());
}

#[test]
fn test_loader_reads_partitions_on_demand() {
    let loaded = Arc::new(Mutex::new(Vec::new()));
    let log = loaded.clone();
    let bag = Bag::from_loader("read", 3, move |idx| {
        log.lock().push(idx);
        Ok::<_, OddItem>(vec![idx as u32 * 10, idx as u32 * 10 + 1])
    })
    .map("inc", |x, _| Ok::<_, OddItem>(x + 1));
    assert!(loaded.lock().is_empty());

    for executor in executors() {
        loaded.lock().clear();
        let (items, stats) = bag.compute_with_stats(executor.as_ref()).unwrap();
        assert_eq!(items, vec![1, 2, 11, 12, 21, 22]);
        let mut seen = loaded.lock().clone();
        seen.sort_unstable();
        assert_eq!(seen, vec![0, 1, 2]);
        assert_eq!(stats.stages[0].name, "read");
    }
}

#[test]
fn test_loader_failure_names_source_stage() {
    let bag: Bag<u32> = Bag::from_loader("read", 4, |idx| {
        if idx == 2 { Err(OddItem(7)) } else { Ok(vec![idx as u32]) }
    });
    let err = bag.compute(&SequentialExecutor::new()).unwrap_err();
    assert!(matches!(err, GraphError::Stage { ref stage, partition: 2, .. } if stage == "read"));
    assert!(matches!(err.stage_source::<OddItem>(), Some(OddItem(7))));
}

#[test]
#[should_panic(expected = "partition_size must be > 0")]
fn test_zero_partition_size_panics() {
    Bag::from_sequence(vec![1u8], 0);
}

#[test]
fn test_map_is_lazy_until_compute() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let bag = Bag::from_sequence((0..6u32).collect(), 2).map("double", move |x, _| {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok::<_, OddItem>(x * 2)
    });
    assert_eq!(calls.load(Ordering::Relaxed), 0);

    let out = bag.compute(&SequentialExecutor::new()).unwrap();
    assert_eq!(out, vec![0, 2, 4, 6, 8, 10]);
    assert_eq!(calls.load(Ordering::Relaxed), 6);
}

#[test]
fn test_order_preserved_on_all_executors() {
    for executor in executors() {
        let bag = Bag::from_sequence((0..100u32).collect(), 7)
            .map_partitions("square", |items: Vec<u32>, _| {
                Ok::<_, OddItem>(items.into_iter().map(|x| x * x).collect())
            })
            .map("plus_one", |x, _| Ok::<_, OddItem>(x + 1));
        let out = bag.compute(executor.as_ref()).unwrap();
        let expected: Vec<u32> = (0..100u32).map(|x| x * x + 1).collect();
        assert_eq!(out, expected);
    }
}

#[test]
fn test_fan_out_recomputes_shared_prefix() {
    let calls = Arc::new(AtomicUsize::new(0));
    let counter = calls.clone();
    let base = Bag::from_sequence((0..4u32).collect(), 2).map("count", move |x, _| {
        counter.fetch_add(1, Ordering::Relaxed);
        Ok::<_, OddItem>(x)
    });
    let a = base.map("a", |x, _| Ok::<_, OddItem>(x + 10));
    let b = base.map("b", |x, _| Ok::<_, OddItem>(x + 20));

    let exec = SequentialExecutor::new();
    assert_eq!(a.compute(&exec).unwrap(), vec![10, 11, 12, 13]);
    assert_eq!(b.compute(&exec).unwrap(), vec![20, 21, 22, 23]);
    assert_eq!(calls.load(Ordering::Relaxed), 8);
    assert_eq!(base.graph().len(), 4);
}

#[test]
fn test_stage_failure_aborts_run() {
    for executor in executors() {
        let bag = Bag::from_sequence((0..20u32).collect(), 3).map("even_only", |x, _| {
            if x == 13 { Err(OddItem(x)) } else { Ok(x) }
        });
        let err = bag.compute(executor.as_ref()).unwrap_err();
        match &err {
            GraphError::Stage {
                stage, partition, ..
            } => {
                assert_eq!(stage, "even_only");
                assert_eq!(*partition, 4);
            }
            other => panic!("unexpected error {other:?}"),
        }
        assert_eq!(err.stage_source::<OddItem>().map(|e| e.0), Some(13));
    }
}

#[test]
fn test_cancelled_run_returns_no_output() {
    let token = CancelToken::new();
    token.cancel();
    let bag = Bag::from_sequence((0..4u32).collect(), 1);
    let seq = SequentialExecutor::new().with_cancel_token(token.clone());
    assert!(matches!(bag.compute(&seq), Err(GraphError::Cancelled)));
    let threaded = ThreadedExecutor::new(2).unwrap().with_cancel_token(token);
    assert!(matches!(bag.compute(&threaded), Err(GraphError::Cancelled)));
}

#[test]
fn test_stats_cover_every_stage() {
    let bag = Bag::from_sequence((0..5u32).collect(), 2).map("id", |x, _| Ok::<_, OddItem>(x));
    let (items, stats) = bag.compute_with_stats(&SequentialExecutor::new()).unwrap();
    assert_eq!(items.len(), 5);
    assert_eq!(stats.partitions, 3);
    assert_eq!(stats.items, 5);
    let names: Vec<&str> = stats.stages.iter().map(|s| s.name.as_str()).collect();
    assert_eq!(names, vec!["from_sequence", "id"]);
}

#[test]
fn test_worker_ordinals_within_pool() {
    let seen = Arc::new(Mutex::new(HashSet::new()));
    let sink = seen.clone();
    let bag = Bag::from_sequence((0..32u32).collect(), 1).map("ordinal", move |x, ctx| {
        sink.lock().insert(ctx.ordinal());
        assert_eq!(ctx.num_workers(), 4);
        Ok::<_, OddItem>(x)
    });
    bag.compute(&ThreadedExecutor::new(4).unwrap()).unwrap();
    assert!(seen.lock().iter().all(|&o| o < 4));
}

#[test]
fn test_worker_local_builds_once_per_worker() {
    let local: WorkerLocal<String> = WorkerLocal::new();
    let builds = AtomicUsize::new(0);
    let ctx0 = WorkerContext::new(0, 2);
    let ctx1 = WorkerContext::new(1, 2);

    for ctx in [&ctx0, &ctx0, &ctx1, &ctx0, &ctx1] {
        let value = local
            .get_or_try_init(ctx, |c| {
                builds.fetch_add(1, Ordering::Relaxed);
                Ok::<_, OddItem>(format!("model-{}", c.ordinal()))
            })
            .unwrap();
        assert_eq!(*value, format!("model-{}", ctx.ordinal()));
    }
    assert_eq!(builds.load(Ordering::Relaxed), 2);
    assert_eq!(local.constructed(), 2);
}

#[test]
fn test_worker_local_retries_after_failure() {
    let local: WorkerLocal<u32> = WorkerLocal::new();
    let ctx = WorkerContext::new(0, 1);
    assert!(local.get_or_try_init(&ctx, |_| Err(OddItem(1))).is_err());
    assert_eq!(local.constructed(), 0);
    assert_eq!(*local.get_or_try_init(&ctx, |_| Ok::<_, OddItem>(7)).unwrap(), 7);
}

#[test]
fn test_device_assignment() {
    let ctx = WorkerContext::new(2, 4);
    assert_eq!(ctx.device(true), Device::Gpu(2));
    assert_eq!(ctx.device(false), Device::Cpu);
}
