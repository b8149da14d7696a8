//! Overflow list for owners that found every lane busy.
//!
//! The backing channel and its drainer task exist only between the first
//! overflow and the drainer's idle timeout. Senders push while holding the
//! slot lock, and the drainer retires under the same lock after one last
//! `try_recv`, so an item can never land in a channel nobody reads.
//!
//! `depth` counts every item accepted by `enqueue` that is not yet queued on
//! a lane. The count is reserved before the first placement attempt and
//! released under the lane lock in the same critical section that pushes the
//! item, so an item is always visible either here or in a lane's pending
//! count.

use std::{
    pin::pin,
    sync::{
        Mutex, MutexGuard,
        atomic::{AtomicU64, AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use {
    tokio::{sync::mpsc, task::JoinHandle},
    tracing::{debug, warn},
};

#[cfg(feature = "metrics")]
use lanework_metrics::{counter, gauge, waiting as waiting_metrics};

use crate::{engine::Engine, types::OwnerKey};

pub(crate) const DEFAULT_IDLE_TIMEOUT: Duration = Duration::from_secs(30);

/// An overflowed item together with the owner it resolved to on enqueue.
pub(crate) struct WaitingItem<O, V> {
    pub owner: O,
    pub value: V,
    pub queued_at: Instant,
}

struct WaitingSlot<O, V> {
    generation: u64,
    tx: mpsc::UnboundedSender<WaitingItem<O, V>>,
    drainer: Option<JoinHandle<()>>,
}

pub(crate) struct WaitingList<O, V> {
    slot: Mutex<Option<WaitingSlot<O, V>>>,
    depth: AtomicUsize,
    generations: AtomicU64,
    idle_timeout: Duration,
}

impl<O, V> WaitingList<O, V> {
    pub(crate) fn new(idle_timeout: Duration) -> Self {
        Self {
            slot: Mutex::new(None),
            depth: AtomicUsize::new(0),
            generations: AtomicU64::new(0),
            idle_timeout,
        }
    }

    fn lock(&self) -> MutexGuard<'_, Option<WaitingSlot<O, V>>> {
        self.slot.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Items accepted and not yet queued on a lane.
    pub(crate) fn depth(&self) -> usize {
        self.depth.load(Ordering::SeqCst)
    }

    pub(crate) fn idle_timeout(&self) -> Duration {
        self.idle_timeout
    }

    /// Whether a drainer is currently alive.
    pub(crate) fn is_draining(&self) -> bool {
        self.lock().is_some()
    }

    /// Tears the list down for shutdown, returning the drainer handle.
    /// Items still queued are abandoned.
    pub(crate) fn take_drainer(&self) -> Option<JoinHandle<()>> {
        let slot = self.lock().take();
        self.depth.store(0, Ordering::SeqCst);
        slot.and_then(|s| s.drainer)
    }

    /// Counts an item about to be placed. Released by exactly one
    /// `settle_one`: the lane push that takes it, or the path that drops it.
    pub(crate) fn reserve(&self) {
        self.depth.fetch_add(1, Ordering::SeqCst);
        #[cfg(feature = "metrics")]
        gauge!(waiting_metrics::DEPTH).set(self.depth() as f64);
    }

    pub(crate) fn settle_one(&self) {
        let _ = self
            .depth
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |d| d.checked_sub(1));
        #[cfg(feature = "metrics")]
        gauge!(waiting_metrics::DEPTH).set(self.depth() as f64);
    }

    /// Called by the drainer after its idle timeout. Returns an item that
    /// raced in before the slot lock was taken, otherwise retires the slot.
    fn retire(
        &self,
        generation: u64,
        rx: &mut mpsc::UnboundedReceiver<WaitingItem<O, V>>,
    ) -> Option<WaitingItem<O, V>> {
        let mut slot = self.lock();
        if let Ok(item) = rx.try_recv() {
            return Some(item);
        }
        if slot.as_ref().is_some_and(|s| s.generation == generation) {
            *slot = None;
        }
        None
    }
}

impl<O: OwnerKey, V: Send + 'static> Engine<O, V> {
    /// Parks a reserved item in the waiting list, starting a drainer if none
    /// runs. Returns `false` and releases the reservation once the engine is
    /// shut down.
    #[must_use]
    pub(crate) fn defer(&self, owner: O, value: V) -> bool {
        let waiting = &self.inner.waiting;
        let mut slot = waiting.lock();
        // Shutdown takes the slot under this lock after cancelling, so a
        // drainer started here is always seen by it.
        if self.is_shut_down() {
            waiting.settle_one();
            return false;
        }

        let mut item = WaitingItem {
            owner,
            value,
            queued_at: Instant::now(),
        };
        if let Some(current) = slot.as_ref() {
            match current.tx.send(item) {
                Ok(()) => return true,
                // Drainer died without retiring; start over.
                Err(mpsc::error::SendError(returned)) => item = returned,
            }
        }

        let generation = waiting.generations.fetch_add(1, Ordering::Relaxed);
        let (tx, rx) = mpsc::unbounded_channel();
        if let Err(mpsc::error::SendError(lost)) = tx.send(item) {
            warn!(owner = ?lost.owner, "waiting list channel closed on creation, item dropped");
            waiting.settle_one();
            return true;
        }
        let drainer = tokio::spawn(self.clone().drain_waiting(rx, generation));
        *slot = Some(WaitingSlot {
            generation,
            tx,
            drainer: Some(drainer),
        });
        debug!(generation, "waiting-list drainer started");
        #[cfg(feature = "metrics")]
        counter!(waiting_metrics::DRAINER_STARTS_TOTAL).increment(1);
        true
    }

    async fn drain_waiting(
        self,
        mut rx: mpsc::UnboundedReceiver<WaitingItem<O, V>>,
        generation: u64,
    ) {
        let idle_timeout = self.inner.waiting.idle_timeout();
        loop {
            let next = tokio::select! {
                biased;
                () = self.inner.shutdown.cancelled() => break,
                next = tokio::time::timeout(idle_timeout, rx.recv()) => next,
            };
            let item = match next {
                Ok(Some(item)) => item,
                Ok(None) => break,
                Err(_) => match self.inner.waiting.retire(generation, &mut rx) {
                    Some(item) => item,
                    None => {
                        debug!(generation, "waiting-list drainer idle, tearing down");
                        #[cfg(feature = "metrics")]
                        counter!(waiting_metrics::DRAINER_TEARDOWNS_TOTAL).increment(1);
                        break;
                    },
                },
            };
            self.forward_waiting(item).await;
        }
    }

    /// Places one waiting item, blocking until a lane frees up if needed.
    async fn forward_waiting(&self, item: WaitingItem<O, V>) {
        let WaitingItem {
            owner,
            mut value,
            queued_at,
        } = item;

        loop {
            // Registered before the attempt so a release between the failed
            // attempt and the wait is not missed.
            let mut freed = pin!(self.inner.lane_freed.notified());
            freed.as_mut().enable();

            match self.place(&owner, value) {
                Ok(dispatch) => {
                    let waited_ms =
                        u64::try_from(queued_at.elapsed().as_millis()).unwrap_or(u64::MAX);
                    debug!(
                        owner = ?owner,
                        lane_id = dispatch.lane_id(),
                        waited_ms,
                        "waiting item placed"
                    );
                    #[cfg(feature = "metrics")]
                    counter!(waiting_metrics::FORWARDED_TOTAL).increment(1);
                    break;
                },
                Err(returned) => value = returned,
            }

            tokio::select! {
                biased;
                () = self.inner.shutdown.cancelled() => {
                    debug!(owner = ?owner, "engine shut down, waiting item dropped");
                    #[cfg(feature = "metrics")]
                    counter!(waiting_metrics::SKIPPED_TOTAL).increment(1);
                    self.inner.waiting.settle_one();
                    break;
                },
                () = &mut freed => {},
            }
        }
    }
}
