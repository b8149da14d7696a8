use {
    chrono::Utc,
    dashmap::mapref::entry::Entry,
    tracing::{debug, trace},
};

#[cfg(feature = "metrics")]
use lanework_metrics::{counter, gauge, labels, lane as lane_metrics};

use crate::{
    engine::Engine,
    error::{EngineError, Result},
    lane::{LaneQueue, LaneTask},
    types::{Dispatch, LaneId, OwnerBinding, OwnerKey},
};

impl<O: OwnerKey, V: Send + 'static> Engine<O, V> {
    /// Routes an item to its owner's lane, a newly bound free lane, or the
    /// waiting list.
    ///
    /// Never blocks. Must be called from within a Tokio runtime since it may
    /// spawn a lane processor or the waiting-list drainer.
    pub fn enqueue(&self, value: V) -> Result<Dispatch> {
        if self.is_shut_down() {
            return Err(EngineError::ShutDown);
        }

        let Some(owner) = (self.inner.resolve)(&value) else {
            trace!("no owner for item, ignoring");
            record_enqueue(Dispatch::Ignored);
            return Ok(Dispatch::Ignored);
        };

        self.inner.waiting.reserve();
        let dispatch = match self.place(&owner, value) {
            Ok(dispatch) => dispatch,
            Err(value) => {
                debug!(owner = ?owner, "no free lane, deferring item");
                if !self.defer(owner, value) {
                    return Err(EngineError::ShutDown);
                }
                Dispatch::Deferred
            },
        };
        record_enqueue(dispatch);
        Ok(dispatch)
    }

    /// Appends to the owner's live lane or binds a free one. Hands the value
    /// back when every lane is busy or the engine is shut down. The caller
    /// must hold a waiting-list reservation, released here once the value is
    /// queued.
    ///
    /// The owner's map entry stays locked for the whole decision, so two
    /// concurrent first items for one owner cannot bind two lanes. Lock order
    /// is always owner-map shard, then lane.
    pub(crate) fn place(&self, owner: &O, value: V) -> std::result::Result<Dispatch, V> {
        match self.inner.owners.entry(owner.clone()) {
            Entry::Occupied(mut entry) => {
                let (lane_id, epoch) = (entry.get().lane_id, entry.get().epoch);
                let value = match self.append(lane_id, epoch, value) {
                    Ok(()) => return Ok(Dispatch::Appended { lane_id }),
                    Err(value) => value,
                };
                // Entry outlived its binding: the lane was released or
                // dropped and the cleanup has not caught up yet.
                trace!(owner = ?owner, lane_id, epoch, "stale owner entry");
                match self.try_bind(owner, value) {
                    Ok(binding) => {
                        let lane_id = binding.lane_id;
                        entry.insert(binding);
                        Ok(Dispatch::Allocated { lane_id })
                    },
                    Err(value) => {
                        entry.remove();
                        Err(value)
                    },
                }
            },
            Entry::Vacant(entry) => {
                let binding = self.try_bind(owner, value)?;
                let lane_id = binding.lane_id;
                entry.insert(binding);
                Ok(Dispatch::Allocated { lane_id })
            },
        }
    }

    fn append(&self, lane_id: LaneId, epoch: u64, value: V) -> std::result::Result<(), V> {
        let Ok(lane) = self.lane(lane_id) else {
            return Err(value);
        };
        let mut state = lane.lock();
        if self.is_shut_down() {
            return Err(value);
        }
        let Some(queue) = state.live_queue(epoch) else {
            return Err(value);
        };
        queue.push(value);
        self.inner.waiting.settle_one();
        // A live binding always has a processor unless its task was aborted
        // or panicked outside the callback guard.
        if !state.processor_running() {
            debug!(lane_id, epoch, "lane processor gone, respawning");
            state.task = Some(self.spawn_processor(lane_id, epoch));
        }
        Ok(())
    }

    /// Binds the first free lane to `owner`, seeds its queue with `value`
    /// and starts its processor.
    fn try_bind(&self, owner: &O, value: V) -> std::result::Result<OwnerBinding<O>, V> {
        for lane in self.inner.lanes.iter() {
            let mut state = lane.lock();
            // Shutdown cancels before sweeping lanes, so a lane not yet swept
            // sees the cancellation here.
            if self.is_shut_down() {
                return Err(value);
            }
            if !state.is_free() {
                continue;
            }

            let binding = OwnerBinding {
                owner: owner.clone(),
                lane_id: lane.id,
                epoch: self.next_epoch(),
                assigned_at: Utc::now(),
            };
            let queue = LaneQueue::new();
            queue.push(value);
            self.inner.waiting.settle_one();
            state.binding = Some(binding.clone());
            state.queue = Some(queue);
            state.task = Some(self.spawn_processor(lane.id, binding.epoch));

            debug!(owner = ?owner, lane_id = lane.id, epoch = binding.epoch, "lane bound");
            #[cfg(feature = "metrics")]
            {
                counter!(lane_metrics::BINDINGS_TOTAL).increment(1);
                gauge!(lane_metrics::BOUND).increment(1.0);
            }
            return Ok(binding);
        }
        Err(value)
    }

    fn spawn_processor(&self, lane_id: LaneId, epoch: u64) -> LaneTask {
        LaneTask {
            epoch,
            handle: tokio::spawn(self.clone().run_lane(lane_id, epoch)),
        }
    }
}

#[cfg(feature = "metrics")]
fn record_enqueue(dispatch: Dispatch) {
    let path = match dispatch {
        Dispatch::Ignored => "ignored",
        Dispatch::Appended { .. } => "appended",
        Dispatch::Allocated { .. } => "allocated",
        Dispatch::Deferred => "deferred",
    };
    counter!(lane_metrics::ENQUEUED_TOTAL, labels::PATH => path).increment(1);
}

#[cfg(not(feature = "metrics"))]
fn record_enqueue(_dispatch: Dispatch) {}
