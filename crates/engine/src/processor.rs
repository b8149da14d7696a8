//! Per-lane processing loop.
//!
//! A processor owns one binding (identified by its epoch). After every item
//! it settles under the lane lock: keep going while items are pending,
//! release the binding once the queue is empty, or step aside if the lane
//! was dropped underneath it.

use std::{panic::AssertUnwindSafe, sync::Arc, time::Instant};

use {
    futures::FutureExt,
    tracing::{debug, error, warn},
};

#[cfg(feature = "metrics")]
use lanework_metrics::{counter, gauge, histogram, labels, lane as lane_metrics};

use crate::{
    engine::Engine,
    envelope::Envelope,
    error::{CallbackError, panic_message},
    lane::{Lane, LaneQueue},
    types::{LaneId, OwnerBinding, OwnerKey},
};

enum Settle<O, V> {
    Continue {
        binding: OwnerBinding<O>,
        queue: Arc<LaneQueue<V>>,
    },
    /// Queue drained; the binding has been cleared from the lane.
    Released(Option<OwnerBinding<O>>),
    /// The lane no longer belongs to this processor's binding.
    Detached,
}

fn settle<O: Clone, V: Send>(lane: &Lane<O, V>, epoch: u64) -> Settle<O, V> {
    let mut state = lane.lock();
    if !state.is_bound_to(epoch) {
        state.detach_task(epoch);
        return Settle::Detached;
    }
    if state.pending() == 0 {
        let binding = state.unbind();
        state.detach_task(epoch);
        return Settle::Released(binding);
    }
    match (state.binding.clone(), state.queue.clone()) {
        (Some(binding), Some(queue)) => Settle::Continue { binding, queue },
        _ => {
            state.detach_task(epoch);
            Settle::Detached
        },
    }
}

impl<O: OwnerKey, V: Send + 'static> Engine<O, V> {
    pub(crate) async fn run_lane(self, lane_id: LaneId, epoch: u64) {
        let lane = match self.lane(lane_id) {
            Ok(lane) => lane,
            Err(e) => {
                error!(error = %e, "lane processor started for a missing lane");
                return;
            },
        };
        debug!(lane_id, epoch, "lane processor started");

        let mut released = None;
        loop {
            let (binding, queue) = match settle(lane, epoch) {
                Settle::Continue { binding, queue } => (binding, queue),
                Settle::Released(binding) => {
                    released = binding;
                    break;
                },
                Settle::Detached => {
                    debug!(lane_id, epoch, "lane dropped, processor detaching");
                    break;
                },
            };

            let next = tokio::select! {
                biased;
                () = self.inner.shutdown.cancelled() => {
                    debug!(lane_id, epoch, "engine shut down, lane processor exiting");
                    return;
                },
                next = queue.take_ready() => next,
            };
            // A pull reader won the item; settle again.
            let Some(value) = next else {
                continue;
            };
            if queue.is_closed() {
                debug!(lane_id, epoch, "lane dropped mid-take, item discarded");
                continue;
            }
            self.deliver(binding, value).await;
        }

        if let Some(binding) = released {
            self.inner
                .owners
                .remove_if(&binding.owner, |_, current| current.epoch == binding.epoch);
            debug!(owner = ?binding.owner, lane_id, epoch, "lane released");
            #[cfg(feature = "metrics")]
            {
                counter!(lane_metrics::RELEASES_TOTAL, labels::REASON => "drained").increment(1);
                gauge!(lane_metrics::BOUND).decrement(1.0);
            }
        }
        self.lane_freed();
    }

    /// Wakes the waiting-list drainer and fires the idle callback when the
    /// whole engine has gone quiet.
    pub(crate) fn lane_freed(&self) {
        self.inner.lane_freed.notify_waiters();
        if self.is_shut_down() {
            return;
        }
        if let Some(on_idle) = &self.inner.on_idle
            && self.is_idle()
        {
            debug!("lane engine idle");
            if let Err(payload) = std::panic::catch_unwind(AssertUnwindSafe(|| on_idle(self))) {
                error!(panic = %panic_message(payload.as_ref()), "idle callback panicked");
            }
        }
    }

    async fn deliver(&self, binding: OwnerBinding<O>, value: V) {
        let lane_id = binding.lane_id;
        let cancel = self.inner.shutdown.clone();
        let envelope = Envelope::new(value, self.clone(), binding);
        let callback = Arc::clone(&self.inner.callback);
        let started = Instant::now();

        let outcome = AssertUnwindSafe(async { callback(envelope, cancel.clone()).await })
            .catch_unwind()
            .await;

        #[cfg(feature = "metrics")]
        {
            counter!(lane_metrics::DELIVERED_TOTAL).increment(1);
            histogram!(lane_metrics::CALLBACK_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
        }

        let fault = match outcome {
            Ok(Ok(())) => return,
            Ok(Err(source)) => CallbackError::failed(lane_id, source),
            Err(payload) => CallbackError::panicked(lane_id, panic_message(payload.as_ref())),
        };
        let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

        #[cfg(feature = "metrics")]
        counter!(lane_metrics::CALLBACK_ERRORS_TOTAL, labels::ERROR_TYPE => fault.kind())
            .increment(1);

        if cancel.is_cancelled() {
            debug!(lane_id, elapsed_ms, error = %fault, "callback ended during shutdown");
            return;
        }
        warn!(lane_id, kind = fault.kind(), elapsed_ms, error = %fault, "lane callback failed");

        if let Some(handler) = &self.inner.on_error
            && let Err(payload) =
                std::panic::catch_unwind(AssertUnwindSafe(|| handler(fault, cancel.clone())))
        {
            error!(lane_id, panic = %panic_message(payload.as_ref()), "error handler panicked");
        }
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::test_support::{recording_engine, wait_until},
        std::{
            sync::{
                Mutex,
                atomic::{AtomicUsize, Ordering},
            },
            time::Duration,
        },
    };

    #[tokio::test]
    async fn errors_and_panics_reach_handler_and_lane_continues() {
        let faults = Arc::new(Mutex::new(Vec::new()));
        let seen = Arc::new(Mutex::new(Vec::new()));
        let engine = {
            let faults = Arc::clone(&faults);
            let seen = Arc::clone(&seen);
            Engine::builder(
                1,
                |_: &u32| Some(0_u8),
                move |envelope, _cancel| {
                    let seen = Arc::clone(&seen);
                    async move {
                        let v = *envelope.value();
                        match v {
                            1 => anyhow::bail!("bad item"),
                            2 => panic!("exploded"),
                            _ => seen.lock().unwrap().push(v),
                        }
                        Ok(())
                    }
                },
            )
            .on_error(move |err, _cancel| faults.lock().unwrap().push(err.to_string()))
            .build()
            .unwrap()
        };

        for v in [0, 1, 2, 3] {
            engine.enqueue(v).unwrap();
        }
        assert!(wait_until(Duration::from_secs(2), || engine.is_idle()).await);

        assert_eq!(*seen.lock().unwrap(), vec![0, 3]);
        let faults = faults.lock().unwrap();
        assert_eq!(faults.len(), 2);
        assert_eq!(faults[0], "lane 0 callback failed: bad item");
        assert_eq!(faults[1], "lane 0 callback panicked: exploded");
    }

    #[tokio::test]
    async fn idle_callback_fires_after_drain() {
        let idle = Arc::new(AtomicUsize::new(0));
        let engine = {
            let idle = Arc::clone(&idle);
            Engine::builder(2, |v: &u32| Some(*v), |_env, _cancel| async { Ok(()) })
                .on_idle(move |engine| {
                    assert!(engine.is_idle());
                    idle.fetch_add(1, Ordering::SeqCst);
                })
                .build()
                .unwrap()
        };
        engine.enqueue(1).unwrap();
        engine.enqueue(2).unwrap();
        assert!(wait_until(Duration::from_secs(2), || idle.load(Ordering::SeqCst) > 0).await);
        assert!(engine.is_idle());
        assert_eq!(engine.bound_lanes(), 0);
        assert_eq!(engine.owners_lane(&1), None);
    }

    #[tokio::test]
    async fn released_lane_is_reused_by_next_owner() {
        let (engine, seen) = recording_engine(1);
        engine.enqueue((1, 1)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || engine.is_idle()).await);
        engine.enqueue((2, 1)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || engine.is_idle()).await);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 1), (2, 1)]);
        assert_eq!(engine.waiting_count(), 0);
    }
}
