use std::{
    sync::{
        Arc,
        atomic::{AtomicU64, Ordering},
    },
    time::Duration,
};

use {
    dashmap::DashMap,
    tokio::{sync::Notify, task::JoinHandle},
    tokio_util::sync::CancellationToken,
    tracing::{info, warn},
};

#[cfg(feature = "metrics")]
use lanework_metrics::{gauge, lane as lane_metrics, waiting as waiting_metrics};

use crate::{
    error::{EngineError, Result},
    lane::Lane,
    types::{ErrorHandlerFn, IdleFn, LaneCallbackFn, LaneId, OwnerBinding, OwnerKey, ResolveFn},
    waiting::WaitingList,
};

pub(crate) struct Inner<O, V> {
    pub lanes: Box<[Lane<O, V>]>,
    /// Owner → current binding. Entries may briefly outlive the lane binding
    /// they describe; lookups always confirm against the lane's own state.
    pub owners: DashMap<O, OwnerBinding<O>>,
    pub resolve: ResolveFn<O, V>,
    pub callback: LaneCallbackFn<O, V>,
    pub on_error: Option<ErrorHandlerFn>,
    pub on_idle: Option<IdleFn<O, V>>,
    pub waiting: WaitingList<O, V>,
    /// Signalled whenever a lane becomes free.
    pub lane_freed: Notify,
    pub read_timeout: Duration,
    pub next_epoch: AtomicU64,
    pub shutdown: CancellationToken,
}

/// Owner-partitioned work-queue engine.
///
/// Items for the same owner are processed strictly in order on one lane;
/// different owners run concurrently on up to `maximum_parallel` lanes.
/// Owners that find no free lane wait in an overflow list that is drained
/// as lanes free up.
///
/// `Engine` is a cheap handle; clones share the same lanes. Background tasks
/// are spawned on the ambient Tokio runtime, so `enqueue` must be called from
/// within one.
pub struct Engine<O, V> {
    pub(crate) inner: Arc<Inner<O, V>>,
}

impl<O, V> Clone for Engine<O, V> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

impl<O: OwnerKey, V: Send + 'static> Engine<O, V> {
    pub(crate) fn from_inner(inner: Inner<O, V>) -> Self {
        Self {
            inner: Arc::new(inner),
        }
    }

    #[must_use]
    pub fn maximum_parallel(&self) -> usize {
        self.inner.lanes.len()
    }

    /// Default wait for [`Envelope::read_reply`](crate::Envelope::read_reply).
    #[must_use]
    pub fn read_timeout(&self) -> Duration {
        self.inner.read_timeout
    }

    /// Number of lanes currently bound to an owner.
    #[must_use]
    pub fn bound_lanes(&self) -> usize {
        self.inner
            .lanes
            .iter()
            .filter(|lane| lane.lock().binding.is_some())
            .count()
    }

    /// Items accepted by `enqueue` and not yet queued on a lane. Mostly the
    /// waiting list, plus any enqueue still deciding where its item goes.
    #[must_use]
    pub fn waiting_count(&self) -> usize {
        self.inner.waiting.depth()
    }

    #[must_use]
    pub fn is_shut_down(&self) -> bool {
        self.inner.shutdown.is_cancelled()
    }

    /// Token cancelled on shutdown; also handed to every callback.
    #[must_use]
    pub fn cancellation_token(&self) -> CancellationToken {
        self.inner.shutdown.clone()
    }

    pub(crate) fn lane(&self, lane_id: LaneId) -> Result<&Lane<O, V>> {
        self.inner
            .lanes
            .get(lane_id)
            .ok_or_else(|| EngineError::unknown_lane(lane_id, self.inner.lanes.len()))
    }

    pub(crate) fn next_epoch(&self) -> u64 {
        self.inner.next_epoch.fetch_add(1, Ordering::Relaxed)
    }

    /// Cancels every background loop and waits for them to finish.
    ///
    /// Callbacks in flight observe the cancellation through their token.
    /// Items still queued are abandoned; later `enqueue` calls fail with
    /// [`EngineError::ShutDown`].
    pub async fn shutdown(&self) {
        info!(
            lanes = self.inner.lanes.len(),
            bound = self.bound_lanes(),
            waiting = self.waiting_count(),
            "shutting down lane engine"
        );
        self.inner.shutdown.cancel();

        let mut handles: Vec<JoinHandle<()>> = Vec::new();
        for lane in self.inner.lanes.iter() {
            let mut state = lane.lock();
            state.unbind();
            if let Some(task) = state.task.take() {
                handles.push(task.handle);
            }
        }
        self.inner.owners.clear();
        if let Some(drainer) = self.inner.waiting.take_drainer() {
            handles.push(drainer);
        }
        #[cfg(feature = "metrics")]
        {
            gauge!(lane_metrics::BOUND).set(0.0);
            gauge!(waiting_metrics::DEPTH).set(0.0);
        }

        for handle in handles {
            if let Err(e) = handle.await
                && !e.is_cancelled()
            {
                warn!(error = %e, "lane engine task failed during shutdown");
            }
        }
        info!("lane engine stopped");
    }
}
