//! Owner-partitioned work-queue engine.
//!
//! Items are keyed by an owner (a chat, a user, a conversation). Each owner
//! is bound to one of `maximum_parallel` lanes while it has work; a lane
//! processes its owner's items strictly in order and releases the owner once
//! its queue runs dry. Owners that arrive while every lane is busy wait in
//! an overflow list that is drained as lanes free up.
//!
//! Besides push delivery through the callback, a lane can be read directly
//! (`Engine::read_next`, `Envelope::read_next`, `Engine::yield_lane`) which is
//! how "wait for the user's next message" flows are built on top.
//!
//! ```rust,ignore
//! use lanework_engine::Engine;
//!
//! let engine = Engine::builder(
//!     4,
//!     |update: &Update| Some(update.chat_id),
//!     |envelope, cancel| async move { handle(envelope, cancel).await },
//! )
//! .on_error(|err, _| tracing::warn!(error = %err, "update handler failed"))
//! .build()?;
//!
//! engine.enqueue(update)?;
//! ```

mod admin;
mod builder;
mod dispatch;
mod engine;
mod envelope;
pub mod error;
mod lane;
mod processor;
mod reader;
pub mod types;
mod waiting;

pub use {
    builder::EngineBuilder,
    engine::Engine,
    envelope::Envelope,
    error::{CallbackError, EngineError, Result},
    types::{
        BindingSnapshot, Dispatch, LaneId, LaneSnapshot, LaneStream, OwnerBinding, OwnerKey,
        TaskStatus,
    },
};
