use std::{fmt, time::Duration};

use {
    chrono::{DateTime, Utc},
    tokio_util::sync::CancellationToken,
};

use crate::{
    engine::Engine,
    error::Result,
    types::{LaneId, LaneStream, OwnerBinding, OwnerKey},
};

/// A dequeued item plus a handle back to the lane it came from.
///
/// Follow-up operations (`read_next`, `count_pending`, `drop_pending`,
/// `yield_lane`) are scoped to the binding that produced the envelope: once
/// the lane has been released or handed to another owner they report
/// nothing instead of touching someone else's queue.
pub struct Envelope<O, V> {
    value: V,
    engine: Engine<O, V>,
    binding: OwnerBinding<O>,
}

impl<O: OwnerKey, V: Send + 'static> Envelope<O, V> {
    pub(crate) fn new(value: V, engine: Engine<O, V>, binding: OwnerBinding<O>) -> Self {
        Self {
            value,
            engine,
            binding,
        }
    }

    #[must_use]
    pub fn value(&self) -> &V {
        &self.value
    }

    #[must_use]
    pub fn into_value(self) -> V {
        self.value
    }

    #[must_use]
    pub fn lane_id(&self) -> LaneId {
        self.binding.lane_id
    }

    #[must_use]
    pub fn owner(&self) -> &O {
        &self.binding.owner
    }

    #[must_use]
    pub fn epoch(&self) -> u64 {
        self.binding.epoch
    }

    /// When the owner was bound to this lane.
    #[must_use]
    pub fn assigned_at(&self) -> DateTime<Utc> {
        self.binding.assigned_at
    }

    #[must_use]
    pub fn binding(&self) -> &OwnerBinding<O> {
        &self.binding
    }

    #[must_use]
    pub fn engine(&self) -> &Engine<O, V> {
        &self.engine
    }

    /// Waits up to `timeout` for this owner's next item on the same lane.
    ///
    /// This is the "wait for the reply" primitive: called from inside a
    /// callback it competes with the lane processor and takes the next item
    /// before the processor can deliver it.
    pub async fn read_next(
        &self,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Self>> {
        let outcome = self
            .engine
            .read_lane(self.lane_id(), Some(self.epoch()), Some(timeout), cancel)
            .await?;
        Ok(outcome.into_envelope())
    }

    /// [`Self::read_next`] with the engine's configured read timeout.
    pub async fn read_reply(&self, cancel: &CancellationToken) -> Result<Option<Self>> {
        self.read_next(self.engine.read_timeout(), cancel).await
    }

    /// Items queued behind this one, or `None` once the binding is gone.
    #[must_use]
    pub fn count_pending(&self) -> Option<usize> {
        self.engine.count_lane(self.lane_id(), Some(self.epoch()))
    }

    /// Abandons everything still queued for this binding and releases the lane.
    pub fn drop_pending(&self) -> bool {
        self.engine.drop_lane(self.lane_id(), Some(self.epoch()))
    }

    /// Stream of this owner's further items on the lane.
    pub fn yield_lane(&self, cancel: CancellationToken) -> LaneStream<O, V> {
        self.engine
            .lane_stream(self.lane_id(), Some(self.epoch()), cancel)
    }
}

impl<O: fmt::Debug, V: fmt::Debug> fmt::Debug for Envelope<O, V> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Envelope")
            .field("value", &self.value)
            .field("owner", &self.binding.owner)
            .field("lane_id", &self.binding.lane_id)
            .field("epoch", &self.binding.epoch)
            .finish_non_exhaustive()
    }
}
