use tracing::debug;

#[cfg(feature = "metrics")]
use lanework_metrics::{counter, gauge, labels, lane as lane_metrics};

use crate::{
    engine::Engine,
    types::{BindingSnapshot, LaneId, LaneSnapshot, OwnerKey},
};

impl<O: OwnerKey, V: Send + 'static> Engine<O, V> {
    /// Abandons the items queued on `lane_id` and unbinds its owner.
    ///
    /// An item already handed to the callback finishes normally; everything
    /// behind it is discarded. Returns `false` when the lane was not bound.
    pub fn drop_pending(&self, lane_id: LaneId) -> bool {
        self.drop_lane(lane_id, None)
    }

    pub(crate) fn drop_lane(&self, lane_id: LaneId, epoch: Option<u64>) -> bool {
        let Ok(lane) = self.lane(lane_id) else {
            return false;
        };
        let (binding, pending, processor_running) = {
            let mut state = lane.lock();
            let Some(current) = state.binding.as_ref() else {
                return false;
            };
            if epoch.is_some_and(|epoch| epoch != current.epoch) {
                return false;
            }
            let pending = state.pending();
            let running = state.processor_running();
            if !running {
                state.task = None;
            }
            (state.unbind(), pending, running)
        };

        if let Some(binding) = &binding {
            self.inner
                .owners
                .remove_if(&binding.owner, |_, current| current.epoch == binding.epoch);
            debug!(
                owner = ?binding.owner,
                lane_id,
                epoch = binding.epoch,
                pending,
                "lane dropped"
            );
            #[cfg(feature = "metrics")]
            {
                counter!(lane_metrics::RELEASES_TOTAL, labels::REASON => "dropped").increment(1);
                gauge!(lane_metrics::BOUND).decrement(1.0);
            }
        }
        // A running processor announces the lane itself once it detaches.
        if !processor_running {
            self.lane_freed();
        }
        true
    }

    /// Queue depth of `lane_id`, or `None` if the lane is unbound.
    #[must_use]
    pub fn try_count_pending(&self, lane_id: LaneId) -> Option<usize> {
        self.count_lane(lane_id, None)
    }

    pub(crate) fn count_lane(&self, lane_id: LaneId, epoch: Option<u64>) -> Option<usize> {
        let lane = self.lane(lane_id).ok()?;
        let state = lane.lock();
        let binding = state.binding.as_ref()?;
        if epoch.is_some_and(|epoch| epoch != binding.epoch) {
            return None;
        }
        Some(state.pending())
    }

    /// Lane currently bound to `owner`.
    #[must_use]
    pub fn owners_lane(&self, owner: &O) -> Option<LaneId> {
        let (lane_id, epoch) = {
            let binding = self.inner.owners.get(owner)?;
            (binding.lane_id, binding.epoch)
        };
        let lane = self.lane(lane_id).ok()?;
        lane.lock().is_bound_to(epoch).then_some(lane_id)
    }

    /// Point-in-time view of every lane.
    #[must_use]
    pub fn processes(&self) -> Vec<LaneSnapshot> {
        self.inner
            .lanes
            .iter()
            .map(|lane| {
                let state = lane.lock();
                LaneSnapshot {
                    lane_id: lane.id,
                    binding: state.binding.as_ref().map(BindingSnapshot::from),
                    task: state.task_status(),
                    pending: state.pending(),
                }
            })
            .collect()
    }

    /// No lane has pending items, no processor is running and nothing is
    /// waiting for a lane.
    #[must_use]
    pub fn is_idle(&self) -> bool {
        self.inner.waiting.depth() == 0
            && self.inner.lanes.iter().all(|lane| {
                let state = lane.lock();
                state.pending() == 0 && !state.processor_running()
            })
    }
}
