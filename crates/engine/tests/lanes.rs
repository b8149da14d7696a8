#![allow(clippy::unwrap_used, clippy::expect_used)]
use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use {
    lanework_engine::{Dispatch, Engine, LaneId, TaskStatus},
    rstest::rstest,
    tokio::sync::Semaphore,
    tokio_util::sync::CancellationToken,
};

/// `(owner, sequence)`
type Item = (u32, u32);
type Deliveries = Arc<Mutex<Vec<(u32, u32, LaneId)>>>;

async fn wait_until(timeout: Duration, mut condition: impl FnMut() -> bool) -> bool {
    let deadline = Instant::now() + timeout;
    while Instant::now() < deadline {
        if condition() {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(5)).await;
    }
    condition()
}

/// Engine whose callback holds each item until a permit for its owner is
/// released. Owners without a gate run straight through.
struct Harness {
    engine: Engine<u32, Item>,
    gates: HashMap<u32, Arc<Semaphore>>,
    deliveries: Deliveries,
}

impl Harness {
    fn new(maximum_parallel: usize, gated_owners: &[u32]) -> Self {
        let gates: HashMap<u32, Arc<Semaphore>> = gated_owners
            .iter()
            .map(|owner| (*owner, Arc::new(Semaphore::new(0))))
            .collect();
        let deliveries: Deliveries = Arc::default();

        let engine = {
            let gates = gates.clone();
            let deliveries = Arc::clone(&deliveries);
            Engine::builder(
                maximum_parallel,
                |item: &Item| Some(item.0),
                move |envelope, cancel| {
                    let gate = gates.get(envelope.owner()).cloned();
                    let deliveries = Arc::clone(&deliveries);
                    async move {
                        if let Some(gate) = gate {
                            tokio::select! {
                                () = cancel.cancelled() => return Ok(()),
                                permit = gate.acquire() => permit?.forget(),
                            }
                        }
                        let lane_id = envelope.lane_id();
                        let (owner, seq) = envelope.into_value();
                        deliveries.lock().unwrap().push((owner, seq, lane_id));
                        Ok(())
                    }
                },
            )
            .build()
            .unwrap()
        };

        Self {
            engine,
            gates,
            deliveries,
        }
    }

    fn open(&self, owner: u32, permits: usize) {
        self.gates[&owner].add_permits(permits);
    }

    fn delivered(&self) -> Vec<(u32, u32, LaneId)> {
        self.deliveries.lock().unwrap().clone()
    }

    fn sequence_of(&self, owner: u32) -> Vec<u32> {
        self.delivered()
            .into_iter()
            .filter(|(o, ..)| *o == owner)
            .map(|(_, seq, _)| seq)
            .collect()
    }

    async fn settle(&self) {
        assert!(
            wait_until(Duration::from_secs(5), || self.engine.is_idle()).await,
            "engine did not become idle: {:?}",
            self.engine.processes()
        );
    }
}

#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn per_owner_order_is_preserved_across_concurrent_owners() {
    let harness = Harness::new(3, &[]);
    let mut producers = Vec::new();
    for owner in 0..8 {
        let engine = harness.engine.clone();
        producers.push(tokio::spawn(async move {
            for seq in 0..25 {
                engine.enqueue((owner, seq)).unwrap();
                if seq % 7 == 0 {
                    tokio::task::yield_now().await;
                }
            }
        }));
    }
    for producer in producers {
        producer.await.unwrap();
    }
    harness.settle().await;

    for owner in 0..8 {
        assert_eq!(harness.sequence_of(owner), (0..25).collect::<Vec<_>>(), "owner {owner}");
    }
}

#[rstest]
#[case::single_lane(1)]
#[case::three_lanes(3)]
#[case::more_lanes_than_owners(12)]
#[tokio::test(flavor = "multi_thread", worker_threads = 4)]
async fn running_owners_never_exceed_lane_count(#[case] lanes: usize) {
    let active = Arc::new(Mutex::new(HashMap::<u32, usize>::new()));
    let peak = Arc::new(AtomicUsize::new(0));
    let engine = {
        let active = Arc::clone(&active);
        let peak = Arc::clone(&peak);
        Engine::builder(
            lanes,
            |item: &Item| Some(item.0),
            move |envelope, _cancel| {
                let active = Arc::clone(&active);
                let peak = Arc::clone(&peak);
                async move {
                    let owner = *envelope.owner();
                    {
                        let mut active = active.lock().unwrap();
                        *active.entry(owner).or_default() += 1;
                        peak.fetch_max(active.len(), Ordering::SeqCst);
                    }
                    tokio::time::sleep(Duration::from_millis(2)).await;
                    let mut active = active.lock().unwrap();
                    if let Some(count) = active.get_mut(&owner) {
                        *count -= 1;
                        if *count == 0 {
                            active.remove(&owner);
                        }
                    }
                    Ok(())
                }
            },
        )
        .waiting_list_idle_timeout(Duration::from_millis(100))
        .build()
        .unwrap()
    };

    for seq in 0..5 {
        for owner in 0..10 {
            engine.enqueue((owner, seq)).unwrap();
        }
    }
    assert!(wait_until(Duration::from_secs(10), || engine.is_idle()).await);
    let peak = peak.load(Ordering::SeqCst);
    assert!((1..=lanes).contains(&peak), "peak concurrency {peak} on {lanes} lanes");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn idle_holds_until_next_enqueue() {
    let harness = Harness::new(2, &[]);
    for seq in 0..10 {
        harness.engine.enqueue((1, seq)).unwrap();
        harness.engine.enqueue((2, seq)).unwrap();
    }
    harness.settle().await;

    for _ in 0..10 {
        tokio::time::sleep(Duration::from_millis(5)).await;
        assert!(harness.engine.is_idle());
    }
    assert_eq!(harness.engine.bound_lanes(), 0);

    harness.engine.enqueue((3, 0)).unwrap();
    harness.settle().await;
    assert_eq!(harness.sequence_of(3), vec![0]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn timed_out_read_consumes_nothing() {
    let harness = Harness::new(1, &[1]);
    harness.engine.enqueue((1, 1)).unwrap();
    // Processor is parked in the first callback; the lane stays bound.
    assert!(wait_until(Duration::from_secs(2), || harness.engine.try_count_pending(0) == Some(0)).await);

    let cancel = CancellationToken::new();
    let started = Instant::now();
    let read = harness
        .engine
        .read_next(0, Duration::from_millis(30), &cancel)
        .await
        .unwrap();
    assert!(read.is_none());
    assert!(started.elapsed() >= Duration::from_millis(25));

    harness.engine.enqueue((1, 2)).unwrap();
    assert_eq!(harness.engine.try_count_pending(0), Some(1));
    harness.open(1, 2);
    harness.settle().await;
    assert_eq!(harness.sequence_of(1), vec![1, 2]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn pending_read_never_sees_next_owners_item() {
    let harness = Harness::new(1, &[1]);
    harness.engine.enqueue((1, 1)).unwrap();
    assert!(
        wait_until(Duration::from_secs(2), || {
            let lane = &harness.engine.processes()[0];
            lane.task == Some(TaskStatus::Running) && lane.pending == 0
        })
        .await
    );

    let reader = {
        let engine = harness.engine.clone();
        tokio::spawn(async move {
            let cancel = CancellationToken::new();
            engine
                .read_next(0, Duration::from_secs(2), &cancel)
                .await
                .map(|envelope| envelope.map(|e| e.into_value()))
        })
    };
    tokio::time::sleep(Duration::from_millis(20)).await;

    // Owner 1 loses the lane; owner 2 takes it once the processor is done.
    assert!(harness.engine.drop_pending(0));
    harness.open(1, 1);
    assert!(wait_until(Duration::from_secs(2), || harness.engine.is_idle()).await);
    assert_eq!(harness.engine.enqueue((2, 1)).unwrap(), Dispatch::Allocated { lane_id: 0 });

    assert_eq!(reader.await.unwrap().unwrap(), None);
    harness.settle().await;
    assert_eq!(harness.sequence_of(2), vec![1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn overflow_owner_takes_first_freed_lane() {
    let harness = Harness::new(2, &[1, 2]);
    assert_eq!(harness.engine.enqueue((1, 1)).unwrap(), Dispatch::Allocated { lane_id: 0 });
    assert_eq!(harness.engine.enqueue((2, 1)).unwrap(), Dispatch::Allocated { lane_id: 1 });
    assert_eq!(harness.engine.enqueue((3, 1)).unwrap(), Dispatch::Deferred);
    assert_eq!(harness.engine.waiting_count(), 1);

    harness.open(1, 1);
    assert!(wait_until(Duration::from_secs(2), || harness.sequence_of(3) == vec![1]).await);
    // Owner 2 is still busy, so owner 3 can only have run on lane 0.
    assert!(harness.delivered().contains(&(3, 1, 0)));
    assert_eq!(harness.engine.owners_lane(&2), Some(1));

    harness.open(2, 1);
    harness.settle().await;
    assert_eq!(harness.engine.waiting_count(), 0);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn back_to_back_items_share_one_lane() {
    let harness = Harness::new(3, &[1]);
    let dispatches: Vec<Dispatch> = (1..=5)
        .map(|seq| harness.engine.enqueue((1, seq)).unwrap())
        .collect();
    assert_eq!(dispatches[0], Dispatch::Allocated { lane_id: 0 });
    assert!(
        dispatches[1..]
            .iter()
            .all(|d| *d == Dispatch::Appended { lane_id: 0 })
    );
    assert_eq!(harness.engine.bound_lanes(), 1);
    let tasks = harness
        .engine
        .processes()
        .iter()
        .filter(|lane| lane.task.is_some())
        .count();
    assert_eq!(tasks, 1);

    harness.open(1, 5);
    harness.settle().await;
    assert_eq!(harness.sequence_of(1), vec![1, 2, 3, 4, 5]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn dropped_lane_has_no_count() {
    let harness = Harness::new(1, &[1]);
    for seq in 1..=4 {
        harness.engine.enqueue((1, seq)).unwrap();
    }
    assert!(
        wait_until(Duration::from_secs(2), || {
            harness.engine.try_count_pending(0) == Some(3)
        })
        .await
    );

    assert!(harness.engine.drop_pending(0));
    assert_eq!(harness.engine.try_count_pending(0), None);

    harness.open(1, 4);
    harness.settle().await;
    assert_eq!(harness.sequence_of(1), vec![1]);
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn read_on_quiet_owner_times_out_on_schedule() {
    let waited = Arc::new(Mutex::new(None));
    let engine = {
        let waited = Arc::clone(&waited);
        Engine::builder(
            1,
            |item: &Item| Some(item.0),
            move |envelope, cancel| {
                let waited = Arc::clone(&waited);
                async move {
                    let started = Instant::now();
                    let next = envelope
                        .engine()
                        .read_next(envelope.lane_id(), Duration::from_millis(50), &cancel)
                        .await?;
                    *waited.lock().unwrap() = Some((next.is_none(), started.elapsed()));
                    Ok(())
                }
            },
        )
        .build()
        .unwrap()
    };

    engine.enqueue((1, 1)).unwrap();
    assert!(wait_until(Duration::from_secs(2), || engine.is_idle()).await);

    let (timed_out, elapsed) = waited.lock().unwrap().unwrap();
    assert!(timed_out);
    assert!(elapsed >= Duration::from_millis(45), "returned early: {elapsed:?}");
    assert!(elapsed < Duration::from_millis(500), "returned late: {elapsed:?}");
}

#[tokio::test(flavor = "multi_thread", worker_threads = 2)]
async fn shutdown_stops_loops_and_rejects_new_items() {
    let harness = Harness::new(2, &[1]);
    harness.engine.enqueue((1, 1)).unwrap();
    harness.engine.enqueue((1, 2)).unwrap();

    tokio::time::timeout(Duration::from_secs(2), harness.engine.shutdown())
        .await
        .unwrap();
    assert!(harness.engine.is_shut_down());
    assert_eq!(harness.engine.bound_lanes(), 0);
    assert!(harness.engine.enqueue((2, 1)).is_err());
    assert!(harness.delivered().is_empty());
}
