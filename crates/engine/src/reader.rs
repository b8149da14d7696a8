//! Pull reads: take a lane's next item directly instead of letting the lane
//! processor deliver it.
//!
//! Readers and the processor are competing consumers of one queue. Whoever
//! holds the receiver when an item arrives gets it; nothing is duplicated.

use std::{sync::Arc, time::Duration};

use {
    tokio_util::sync::CancellationToken,
    tracing::{debug, trace},
};

#[cfg(feature = "metrics")]
use lanework_metrics::{counter, histogram, labels, reader as reader_metrics};

use crate::{
    engine::Engine,
    envelope::Envelope,
    error::{EngineError, Result},
    lane::{Lane, LaneQueue},
    types::{LaneId, LaneStream, OwnerBinding, OwnerKey},
};

pub(crate) const DEFAULT_READ_TIMEOUT: Duration = Duration::from_secs(30);

pub(crate) enum ReadOutcome<O, V> {
    Item(Envelope<O, V>),
    TimedOut,
    /// The lane is not (or no longer) bound to the binding being read.
    Unbound,
}

impl<O, V> ReadOutcome<O, V> {
    pub(crate) fn into_envelope(self) -> Option<Envelope<O, V>> {
        match self {
            Self::Item(envelope) => Some(envelope),
            Self::TimedOut | Self::Unbound => None,
        }
    }

    #[cfg(feature = "metrics")]
    fn label(&self) -> &'static str {
        match self {
            Self::Item(_) => "item",
            Self::TimedOut => "timed_out",
            Self::Unbound => "unbound",
        }
    }
}

/// Binding and queue a read can wait on, if anything can still arrive.
fn observe<O: Clone, V: Send>(
    lane: &Lane<O, V>,
    expected_epoch: Option<u64>,
) -> Option<(OwnerBinding<O>, Arc<LaneQueue<V>>)> {
    let state = lane.lock();
    let binding = state.binding.as_ref()?;
    if expected_epoch.is_some_and(|epoch| epoch != binding.epoch) {
        return None;
    }
    // Drained and finished: nothing more will come under this binding.
    if !state.processor_running() && state.pending() == 0 {
        return None;
    }
    Some((binding.clone(), state.queue.clone()?))
}

impl<O: OwnerKey, V: Send + 'static> Engine<O, V> {
    /// Takes the next item queued on `lane_id`, waiting up to `timeout`.
    ///
    /// Returns `Ok(None)` when the lane is unbound, when nothing arrives in
    /// time, or when the lane changes hands during the wait. A timed-out read
    /// consumes nothing. Cancelling `cancel` yields [`EngineError::Cancelled`]
    /// and engine shutdown yields [`EngineError::ShutDown`], so callers can
    /// tell "nobody answered" apart from "stop".
    pub async fn read_next(
        &self,
        lane_id: LaneId,
        timeout: Duration,
        cancel: &CancellationToken,
    ) -> Result<Option<Envelope<O, V>>> {
        let outcome = self.read_lane(lane_id, None, Some(timeout), cancel).await?;
        Ok(outcome.into_envelope())
    }

    /// Endless stream of envelopes read from `lane_id`.
    ///
    /// The first item pins the stream to that item's binding; the stream ends
    /// once the lane is released or rebound, `cancel` fires, or the engine
    /// shuts down.
    pub fn yield_lane(&self, lane_id: LaneId, cancel: CancellationToken) -> LaneStream<O, V> {
        self.lane_stream(lane_id, None, cancel)
    }

    pub(crate) fn lane_stream(
        &self,
        lane_id: LaneId,
        epoch: Option<u64>,
        cancel: CancellationToken,
    ) -> LaneStream<O, V> {
        let engine = self.clone();
        Box::pin(async_stream::stream! {
            let mut epoch = epoch;
            loop {
                match engine.read_lane(lane_id, epoch, None, &cancel).await {
                    Ok(ReadOutcome::Item(envelope)) => {
                        epoch = Some(envelope.epoch());
                        yield envelope;
                    },
                    Ok(ReadOutcome::TimedOut | ReadOutcome::Unbound) => break,
                    Err(e) => {
                        trace!(lane_id, error = %e, "lane stream ended");
                        break;
                    },
                }
            }
        })
    }

    pub(crate) async fn read_lane(
        &self,
        lane_id: LaneId,
        expected_epoch: Option<u64>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome<O, V>> {
        let lane = self.lane(lane_id)?;
        #[cfg(feature = "metrics")]
        let started = std::time::Instant::now();

        let outcome = self
            .wait_for_item(lane, expected_epoch, timeout, cancel)
            .await;

        #[cfg(feature = "metrics")]
        {
            let label = match &outcome {
                Ok(outcome) => outcome.label(),
                Err(EngineError::Cancelled) => "cancelled",
                Err(_) => "shut_down",
            };
            counter!(reader_metrics::READS_TOTAL, labels::OUTCOME => label).increment(1);
            histogram!(reader_metrics::WAIT_DURATION_SECONDS)
                .record(started.elapsed().as_secs_f64());
        }
        outcome
    }

    async fn wait_for_item(
        &self,
        lane: &Lane<O, V>,
        expected_epoch: Option<u64>,
        timeout: Option<Duration>,
        cancel: &CancellationToken,
    ) -> Result<ReadOutcome<O, V>> {
        let Some((binding, queue)) = observe(lane, expected_epoch) else {
            return Ok(ReadOutcome::Unbound);
        };

        let take = async {
            match timeout {
                Some(timeout) => tokio::time::timeout(timeout, queue.take())
                    .await
                    .ok()
                    .flatten(),
                None => queue.take().await,
            }
        };
        let received = tokio::select! {
            biased;
            () = cancel.cancelled() => return Err(EngineError::Cancelled),
            () = self.inner.shutdown.cancelled() => return Err(EngineError::ShutDown),
            () = queue.closed() => return Ok(ReadOutcome::Unbound),
            received = take => received,
        };

        let Some(value) = received else {
            return Ok(ReadOutcome::TimedOut);
        };
        if !lane.lock().is_bound_to(binding.epoch) {
            debug!(
                lane_id = lane.id,
                epoch = binding.epoch,
                "lane changed hands during read, item discarded"
            );
            return Ok(ReadOutcome::Unbound);
        }
        Ok(ReadOutcome::Item(Envelope::new(value, self.clone(), binding)))
    }
}

#[allow(clippy::unwrap_used, clippy::expect_used)]
#[cfg(test)]
mod tests {
    use {
        super::*,
        crate::test_support::{gated_engine, wait_until},
        futures::StreamExt,
        std::time::Instant,
    };

    #[tokio::test]
    async fn unbound_lane_reads_nothing_immediately() {
        let (engine, _gate, _seen) = gated_engine(2);
        let cancel = CancellationToken::new();
        let started = Instant::now();
        let read = engine
            .read_next(1, Duration::from_secs(5), &cancel)
            .await
            .unwrap();
        assert!(read.is_none());
        assert!(started.elapsed() < Duration::from_secs(1));
    }

    #[tokio::test]
    async fn unknown_lane_is_an_error() {
        let (engine, _gate, _seen) = gated_engine(2);
        let cancel = CancellationToken::new();
        let err = engine
            .read_next(9, Duration::from_millis(10), &cancel)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::UnknownLane { lane_id: 9, .. }));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn reader_steals_queued_item() {
        let (engine, gate, seen) = gated_engine(1);
        engine.enqueue((1, 1)).unwrap();
        engine.enqueue((1, 2)).unwrap();
        // The processor is parked in the first callback; the second item is
        // still queued.
        assert!(wait_until(Duration::from_secs(2), || engine.try_count_pending(0) == Some(1)).await);

        let cancel = CancellationToken::new();
        let stolen = engine
            .read_next(0, Duration::from_secs(1), &cancel)
            .await
            .unwrap()
            .unwrap();
        assert_eq!(stolen.value(), &(1, 2));
        assert_eq!(stolen.owner(), &1);

        gate.add_permits(1);
        assert!(wait_until(Duration::from_secs(2), || engine.is_idle()).await);
        assert_eq!(*seen.lock().unwrap(), vec![(1, 1)]);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn caller_cancellation_is_not_a_timeout() {
        let (engine, gate, _seen) = gated_engine(1);
        engine.enqueue((1, 1)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || engine.try_count_pending(0) == Some(0)).await);

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let err = engine
            .read_next(0, Duration::from_secs(5), &cancel)
            .await
            .err()
            .unwrap();
        assert!(matches!(err, EngineError::Cancelled));

        gate.add_permits(1);
        assert!(wait_until(Duration::from_secs(2), || engine.is_idle()).await);
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn shutdown_interrupts_read() {
        let (engine, _gate, _seen) = gated_engine(1);
        engine.enqueue((1, 1)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || engine.try_count_pending(0) == Some(0)).await);

        let reader = {
            let engine = engine.clone();
            tokio::spawn(async move {
                let cancel = CancellationToken::new();
                engine.read_next(0, Duration::from_secs(5), &cancel).await
            })
        };
        tokio::time::sleep(Duration::from_millis(20)).await;
        engine.shutdown().await;
        assert!(matches!(reader.await.unwrap(), Err(EngineError::ShutDown)));
    }

    #[tokio::test(flavor = "multi_thread", worker_threads = 2)]
    async fn yield_stream_ends_when_lane_is_dropped() {
        let (engine, gate, _seen) = gated_engine(1);
        engine.enqueue((1, 1)).unwrap();
        engine.enqueue((1, 2)).unwrap();
        engine.enqueue((1, 3)).unwrap();
        assert!(wait_until(Duration::from_secs(2), || engine.try_count_pending(0) == Some(2)).await);

        let mut stream = engine.yield_lane(0, CancellationToken::new());
        assert_eq!(stream.next().await.unwrap().value(), &(1, 2));
        assert_eq!(stream.next().await.unwrap().value(), &(1, 3));

        assert!(engine.drop_pending(0));
        assert!(stream.next().await.is_none());
        gate.add_permits(1);
    }
}
