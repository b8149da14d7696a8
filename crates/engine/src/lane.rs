//! Lane slots and their FIFO queues.
//!
//! A lane is a fixed slot for the engine's lifetime. Binding, queue and
//! processor handle live together behind one per-lane mutex, so every
//! bind/append/release decision for a lane is a single critical section.
//! The mutex is never held across an `.await`.

use std::sync::{
    Arc, Mutex, MutexGuard,
    atomic::{AtomicUsize, Ordering},
};

use {
    tokio::{
        sync::{Mutex as AsyncMutex, mpsc},
        task::JoinHandle,
    },
    tokio_util::sync::CancellationToken,
    tracing::error,
};

use crate::types::{LaneId, OwnerBinding, TaskStatus};

/// Unbounded FIFO shared by a lane processor and any pull readers.
///
/// The receiver sits behind an async mutex: whoever acquires it first gets
/// the next item, which makes the processor and readers competing consumers.
pub(crate) struct LaneQueue<V> {
    tx: mpsc::UnboundedSender<V>,
    rx: AsyncMutex<mpsc::UnboundedReceiver<V>>,
    pending: AtomicUsize,
    closed: CancellationToken,
}

impl<V: Send> LaneQueue<V> {
    pub(crate) fn new() -> Arc<Self> {
        let (tx, rx) = mpsc::unbounded_channel();
        Arc::new(Self {
            tx,
            rx: AsyncMutex::new(rx),
            pending: AtomicUsize::new(0),
            closed: CancellationToken::new(),
        })
    }

    /// Appends an item. Callers hold the lane lock.
    pub(crate) fn push(&self, value: V) {
        // Count first so a consumer never observes an item before its increment.
        self.pending.fetch_add(1, Ordering::SeqCst);
        if self.tx.send(value).is_err() {
            self.pending.fetch_sub(1, Ordering::SeqCst);
            error!("lane queue receiver is gone, item dropped");
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.pending.load(Ordering::SeqCst)
    }

    /// Marks the queue abandoned and wakes every waiting reader.
    pub(crate) fn close(&self) {
        self.closed.cancel();
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    pub(crate) async fn closed(&self) {
        self.closed.cancelled().await;
    }

    /// Waits for the receiver, then takes an item only if one is ready.
    pub(crate) async fn take_ready(&self) -> Option<V> {
        let mut rx = self.rx.lock().await;
        let value = rx.try_recv().ok()?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(value)
    }

    /// Waits for the next item. Cancel-safe: dropping the future never loses one.
    pub(crate) async fn take(&self) -> Option<V> {
        let mut rx = self.rx.lock().await;
        let value = rx.recv().await?;
        self.pending.fetch_sub(1, Ordering::SeqCst);
        Some(value)
    }
}

/// Handle of the processor task currently attached to a lane.
pub(crate) struct LaneTask {
    pub epoch: u64,
    pub handle: JoinHandle<()>,
}

pub(crate) struct LaneState<O, V> {
    pub binding: Option<OwnerBinding<O>>,
    pub queue: Option<Arc<LaneQueue<V>>>,
    pub task: Option<LaneTask>,
}

impl<O, V: Send> LaneState<O, V> {
    fn empty() -> Self {
        Self {
            binding: None,
            queue: None,
            task: None,
        }
    }

    pub(crate) fn pending(&self) -> usize {
        self.queue.as_ref().map_or(0, |q| q.pending())
    }

    pub(crate) fn processor_running(&self) -> bool {
        self.task.as_ref().is_some_and(|t| !t.handle.is_finished())
    }

    pub(crate) fn task_status(&self) -> Option<TaskStatus> {
        self.task.as_ref().map(|t| {
            if t.handle.is_finished() {
                TaskStatus::Finished
            } else {
                TaskStatus::Running
            }
        })
    }

    /// Free: unbound, nothing pending, no processor running.
    pub(crate) fn is_free(&self) -> bool {
        self.binding.is_none() && self.pending() == 0 && !self.processor_running()
    }

    pub(crate) fn is_bound_to(&self, epoch: u64) -> bool {
        self.binding.as_ref().is_some_and(|b| b.epoch == epoch)
    }

    /// Queue of the binding identified by `epoch`, if it is still current.
    pub(crate) fn live_queue(&self, epoch: u64) -> Option<Arc<LaneQueue<V>>> {
        if self.is_bound_to(epoch) {
            self.queue.clone()
        } else {
            None
        }
    }

    /// Clears binding and queue, closing the queue. Returns the old binding.
    pub(crate) fn unbind(&mut self) -> Option<OwnerBinding<O>> {
        if let Some(queue) = self.queue.take() {
            queue.close();
        }
        self.binding.take()
    }

    /// Forgets the processor handle if it belongs to `epoch`.
    pub(crate) fn detach_task(&mut self, epoch: u64) {
        if self.task.as_ref().is_some_and(|t| t.epoch == epoch) {
            self.task = None;
        }
    }
}

pub(crate) struct Lane<O, V> {
    pub id: LaneId,
    state: Mutex<LaneState<O, V>>,
}

impl<O, V: Send> Lane<O, V> {
    pub(crate) fn new(id: LaneId) -> Self {
        Self {
            id,
            state: Mutex::new(LaneState::empty()),
        }
    }

    pub(crate) fn lock(&self) -> MutexGuard<'_, LaneState<O, V>> {
        self.state.lock().unwrap_or_else(|e| e.into_inner())
    }
}
