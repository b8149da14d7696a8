use std::{fmt::Debug, future::Future, hash::Hash, pin::Pin, sync::Arc};

use {
    chrono::{DateTime, Utc},
    futures::Stream,
    serde::Serialize,
    tokio_util::sync::CancellationToken,
};

use crate::{engine::Engine, envelope::Envelope, error::CallbackError};

/// Index of a lane, `0..maximum_parallel`.
pub type LaneId = usize;

/// Bound for owner identifiers (chat id, user id, conversation key, ...).
pub trait OwnerKey: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

impl<T> OwnerKey for T where T: Eq + Hash + Clone + Debug + Send + Sync + 'static {}

/// Derives the owner of an item. `None` means the item is ignored.
pub type ResolveFn<O, V> = Arc<dyn Fn(&V) -> Option<O> + Send + Sync>;

/// Future returned by a lane callback.
pub type CallbackFuture = Pin<Box<dyn Future<Output = anyhow::Result<()>> + Send>>;

/// Per-item callback invoked by lane processors.
pub type LaneCallbackFn<O, V> =
    Arc<dyn Fn(Envelope<O, V>, CancellationToken) -> CallbackFuture + Send + Sync>;

/// Receives callback faults; processing continues afterwards.
pub type ErrorHandlerFn = Arc<dyn Fn(CallbackError, CancellationToken) + Send + Sync>;

/// Invoked by the last lane processor to finish when the engine becomes idle.
pub type IdleFn<O, V> = Arc<dyn Fn(&Engine<O, V>) + Send + Sync>;

/// Lazy sequence of envelopes read from one lane.
pub type LaneStream<O, V> = Pin<Box<dyn Stream<Item = Envelope<O, V>> + Send>>;

/// Binding of an owner to a lane.
///
/// `epoch` is unique per binding for the lifetime of an engine, so a lane that
/// is released and rebound (even to the same owner) is always distinguishable.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OwnerBinding<O> {
    pub owner: O,
    pub lane_id: LaneId,
    pub epoch: u64,
    pub assigned_at: DateTime<Utc>,
}

/// Where an enqueued item went.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Dispatch {
    /// The resolver returned no owner.
    Ignored,
    /// Appended to the owner's existing lane.
    Appended { lane_id: LaneId },
    /// A free lane was bound to the owner.
    Allocated { lane_id: LaneId },
    /// Every lane was busy; the item went to the waiting list.
    Deferred,
}

impl Dispatch {
    #[must_use]
    pub fn lane_id(&self) -> Option<LaneId> {
        match self {
            Self::Appended { lane_id } | Self::Allocated { lane_id } => Some(*lane_id),
            Self::Ignored | Self::Deferred => None,
        }
    }
}

/// State of a lane's processor task.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    Running,
    Finished,
}

#[derive(Debug, Clone, Serialize)]
pub struct BindingSnapshot {
    pub owner: String,
    pub epoch: u64,
    pub assigned_at: DateTime<Utc>,
}

impl<O: Debug> From<&OwnerBinding<O>> for BindingSnapshot {
    fn from(binding: &OwnerBinding<O>) -> Self {
        Self {
            owner: format!("{:?}", binding.owner),
            epoch: binding.epoch,
            assigned_at: binding.assigned_at,
        }
    }
}

/// Point-in-time view of one lane. Racy by nature; for observability only.
#[derive(Debug, Clone, Serialize)]
pub struct LaneSnapshot {
    pub lane_id: LaneId,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub binding: Option<BindingSnapshot>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub task: Option<TaskStatus>,
    pub pending: usize,
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn dispatch_lane_id() {
        assert_eq!(Dispatch::Appended { lane_id: 2 }.lane_id(), Some(2));
        assert_eq!(Dispatch::Allocated { lane_id: 0 }.lane_id(), Some(0));
        assert_eq!(Dispatch::Deferred.lane_id(), None);
        assert_eq!(Dispatch::Ignored.lane_id(), None);
    }

    #[test]
    fn snapshot_serializes_without_empty_fields() {
        let snapshot = LaneSnapshot {
            lane_id: 1,
            binding: None,
            task: None,
            pending: 0,
        };
        let json = serde_json::to_value(&snapshot).unwrap();
        assert_eq!(json, serde_json::json!({ "lane_id": 1, "pending": 0 }));
    }

    #[test]
    fn binding_snapshot_formats_owner() {
        let binding = OwnerBinding {
            owner: 42_i64,
            lane_id: 0,
            epoch: 7,
            assigned_at: Utc::now(),
        };
        let snapshot = BindingSnapshot::from(&binding);
        assert_eq!(snapshot.owner, "42");
        assert_eq!(snapshot.epoch, 7);
    }
}
