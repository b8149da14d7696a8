use std::{
    future::Future,
    sync::{Arc, atomic::AtomicU64},
    time::Duration,
};

use {dashmap::DashMap, tokio::sync::Notify, tokio_util::sync::CancellationToken};

use lanework_config::EngineConfig;

use crate::{
    engine::{Engine, Inner},
    envelope::Envelope,
    error::{CallbackError, EngineError, Result},
    lane::Lane,
    reader::DEFAULT_READ_TIMEOUT,
    types::{CallbackFuture, ErrorHandlerFn, IdleFn, LaneCallbackFn, OwnerKey, ResolveFn},
    waiting::{DEFAULT_IDLE_TIMEOUT, WaitingList},
};

/// Builder for [`Engine`].
///
/// ```rust,ignore
/// let engine = Engine::builder(4, |update: &Update| update.chat_id(), |envelope, _cancel| async move {
///     handle(envelope.into_value()).await
/// })
/// .on_error(|err, _cancel| tracing::warn!(error = %err, "handler failed"))
/// .build()?;
/// ```
pub struct EngineBuilder<O, V> {
    maximum_parallel: usize,
    resolve: ResolveFn<O, V>,
    callback: LaneCallbackFn<O, V>,
    on_error: Option<ErrorHandlerFn>,
    on_idle: Option<IdleFn<O, V>>,
    waiting_list_idle_timeout: Duration,
    read_timeout: Duration,
    cancel: Option<CancellationToken>,
}

impl<O: OwnerKey, V: Send + 'static> Engine<O, V> {
    /// Start building an engine with `maximum_parallel` lanes.
    pub fn builder<R, C, Fut>(maximum_parallel: usize, resolve: R, callback: C) -> EngineBuilder<O, V>
    where
        R: Fn(&V) -> Option<O> + Send + Sync + 'static,
        C: Fn(Envelope<O, V>, CancellationToken) -> Fut + Send + Sync + 'static,
        Fut: Future<Output = anyhow::Result<()>> + Send + 'static,
    {
        let callback: LaneCallbackFn<O, V> = Arc::new(
            move |envelope: Envelope<O, V>, cancel: CancellationToken| -> CallbackFuture {
                Box::pin(callback(envelope, cancel))
            },
        );
        EngineBuilder {
            maximum_parallel,
            resolve: Arc::new(resolve),
            callback,
            on_error: None,
            on_idle: None,
            waiting_list_idle_timeout: DEFAULT_IDLE_TIMEOUT,
            read_timeout: DEFAULT_READ_TIMEOUT,
            cancel: None,
        }
    }
}

impl<O: OwnerKey, V: Send + 'static> EngineBuilder<O, V> {
    /// Handler for callback failures and panics.
    #[must_use]
    pub fn on_error<F>(mut self, handler: F) -> Self
    where
        F: Fn(CallbackError, CancellationToken) + Send + Sync + 'static,
    {
        self.on_error = Some(Arc::new(handler));
        self
    }

    /// Called when the last busy lane drains and nothing is waiting.
    #[must_use]
    pub fn on_idle<F>(mut self, handler: F) -> Self
    where
        F: Fn(&Engine<O, V>) + Send + Sync + 'static,
    {
        self.on_idle = Some(Arc::new(handler));
        self
    }

    /// How long the waiting-list drainer lingers without new items before it
    /// tears itself down. Defaults to 30 seconds.
    #[must_use]
    pub fn waiting_list_idle_timeout(mut self, timeout: Duration) -> Self {
        self.waiting_list_idle_timeout = timeout;
        self
    }

    /// Timeout used by [`Envelope::read_reply`]. Defaults to 30 seconds.
    #[must_use]
    pub fn read_timeout(mut self, timeout: Duration) -> Self {
        self.read_timeout = timeout;
        self
    }

    /// Ties the engine's lifetime to `parent`: cancelling it shuts the
    /// engine's loops down. `Engine::shutdown` never cancels the parent.
    #[must_use]
    pub fn cancellation(mut self, parent: &CancellationToken) -> Self {
        self.cancel = Some(parent.child_token());
        self
    }

    /// Applies lane count and timeouts from configuration.
    #[must_use]
    pub fn config(mut self, config: &EngineConfig) -> Self {
        self.maximum_parallel = config.maximum_parallel;
        self.waiting_list_idle_timeout = config.waiting_list_idle_timeout();
        self.read_timeout = config.read_timeout();
        self
    }

    pub fn build(self) -> Result<Engine<O, V>> {
        if self.maximum_parallel == 0 {
            return Err(EngineError::invalid_parallelism(self.maximum_parallel));
        }

        let lanes = (0..self.maximum_parallel).map(Lane::new).collect();
        Ok(Engine::from_inner(Inner {
            lanes,
            owners: DashMap::new(),
            resolve: self.resolve,
            callback: self.callback,
            on_error: self.on_error,
            on_idle: self.on_idle,
            waiting: WaitingList::new(self.waiting_list_idle_timeout),
            lane_freed: Notify::new(),
            read_timeout: self.read_timeout,
            next_epoch: AtomicU64::new(1),
            shutdown: self.cancel.unwrap_or_default(),
        }))
    }
}
