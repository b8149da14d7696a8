use crate::types::LaneId;

/// Crate-wide result type for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors surfaced by the engine's public API.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// `maximum_parallel` must allow at least one lane.
    #[error("maximum_parallel must be greater than zero (got {requested})")]
    InvalidParallelism { requested: usize },

    /// The lane id is outside `0..maximum_parallel`.
    #[error("unknown lane {lane_id} (engine has {lanes} lanes)")]
    UnknownLane { lane_id: LaneId, lanes: usize },

    /// The caller's cancellation token fired while waiting.
    #[error("operation cancelled by caller")]
    Cancelled,

    /// The engine has been shut down.
    #[error("lane engine is shut down")]
    ShutDown,
}

impl EngineError {
    #[must_use]
    pub fn invalid_parallelism(requested: usize) -> Self {
        Self::InvalidParallelism { requested }
    }

    #[must_use]
    pub fn unknown_lane(lane_id: LaneId, lanes: usize) -> Self {
        Self::UnknownLane { lane_id, lanes }
    }
}

/// A fault raised while a lane processor delivered an item to the callback.
///
/// Faults are reported to the engine's error handler; the lane keeps
/// processing with the next item and the failed item is not retried.
#[derive(Debug, thiserror::Error)]
pub enum CallbackError {
    #[error("lane {lane_id} callback failed: {source}")]
    Failed {
        lane_id: LaneId,
        #[source]
        source: anyhow::Error,
    },

    #[error("lane {lane_id} callback panicked: {message}")]
    Panicked { lane_id: LaneId, message: String },
}

impl CallbackError {
    #[must_use]
    pub fn failed(lane_id: LaneId, source: anyhow::Error) -> Self {
        Self::Failed { lane_id, source }
    }

    #[must_use]
    pub fn panicked(lane_id: LaneId, message: impl Into<String>) -> Self {
        Self::Panicked {
            lane_id,
            message: message.into(),
        }
    }

    #[must_use]
    pub fn lane_id(&self) -> LaneId {
        match self {
            Self::Failed { lane_id, .. } | Self::Panicked { lane_id, .. } => *lane_id,
        }
    }

    /// Short label used for logs and metrics.
    #[must_use]
    pub fn kind(&self) -> &'static str {
        match self {
            Self::Failed { .. } => "failed",
            Self::Panicked { .. } => "panicked",
        }
    }
}

/// Extracts a readable message from a panic payload.
pub(crate) fn panic_message(payload: &(dyn std::any::Any + Send)) -> String {
    if let Some(s) = payload.downcast_ref::<&str>() {
        (*s).to_string()
    } else if let Some(s) = payload.downcast_ref::<String>() {
        s.clone()
    } else {
        "non-string panic payload".to_string()
    }
}
