//! `lanework simulate`: drive a synthetic workload through an engine.

use std::{
    collections::HashMap,
    sync::{
        Arc, Mutex, PoisonError,
        atomic::{AtomicUsize, Ordering},
    },
    time::{Duration, Instant},
};

use {
    anyhow::{Result, bail},
    serde::Serialize,
    tokio::sync::Notify,
    tokio_util::sync::CancellationToken,
    tracing::{debug, info, warn},
};

use {
    lanework_config::{EngineConfig, LaneworkConfig},
    lanework_engine::{Dispatch, Engine, Envelope, LaneSnapshot},
    lanework_metrics::{MetricsRecorderConfig, init_metrics},
};

/// Fallback re-check while waiting for the idle callback.
const IDLE_POLL: Duration = Duration::from_millis(50);

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workload {
    pub owners: usize,
    pub items_per_owner: usize,
    pub maximum_parallel: usize,
    pub work: Duration,
}

impl Workload {
    #[must_use]
    pub fn from_config(config: &LaneworkConfig) -> Self {
        Self {
            owners: config.simulate.owners,
            items_per_owner: config.simulate.items_per_owner,
            maximum_parallel: config.engine.maximum_parallel,
            work: Duration::from_millis(config.simulate.work_ms),
        }
    }

    /// Command-line flags win over the config file.
    #[must_use]
    pub fn with_overrides(
        mut self,
        owners: Option<usize>,
        items: Option<usize>,
        parallel: Option<usize>,
        work_ms: Option<u64>,
    ) -> Self {
        if let Some(owners) = owners {
            self.owners = owners;
        }
        if let Some(items) = items {
            self.items_per_owner = items;
        }
        if let Some(parallel) = parallel {
            self.maximum_parallel = parallel;
        }
        if let Some(work_ms) = work_ms {
            self.work = Duration::from_millis(work_ms);
        }
        self
    }

    fn total(&self) -> usize {
        self.owners * self.items_per_owner
    }
}

#[derive(Debug, Clone, Copy)]
struct Job {
    owner: usize,
    seq: usize,
}

/// Shared between the callback, the error handler and the driver.
#[derive(Default)]
struct Progress {
    delivered: AtomicUsize,
    failed: AtomicUsize,
    reordered: AtomicUsize,
    last_seq: Mutex<HashMap<usize, usize>>,
}

impl Progress {
    fn record(&self, job: Job) {
        self.delivered.fetch_add(1, Ordering::Relaxed);
        let mut last_seq = self.last_seq.lock().unwrap_or_else(PoisonError::into_inner);
        match last_seq.insert(job.owner, job.seq) {
            Some(previous) if previous > job.seq => {
                self.reordered.fetch_add(1, Ordering::Relaxed);
                warn!(
                    owner = job.owner,
                    seq = job.seq,
                    previous,
                    "item delivered out of order"
                );
            },
            _ => {},
        }
    }
}

#[derive(Debug, Default, Serialize)]
pub struct Summary {
    pub owners: usize,
    pub items_per_owner: usize,
    pub maximum_parallel: usize,
    pub enqueued: usize,
    pub allocated: usize,
    pub appended: usize,
    pub deferred: usize,
    pub delivered: usize,
    pub callback_errors: usize,
    pub reordered: usize,
    pub interrupted: bool,
    pub elapsed_ms: u64,
    pub lanes: Vec<LaneSnapshot>,
}

impl Summary {
    fn tally(&mut self, dispatch: Dispatch) {
        match dispatch {
            Dispatch::Allocated { .. } => self.allocated += 1,
            Dispatch::Appended { .. } => self.appended += 1,
            Dispatch::Deferred => self.deferred += 1,
            Dispatch::Ignored => return,
        }
        self.enqueued += 1;
    }
}

pub async fn handle_simulate(workload: Workload, config: &LaneworkConfig) -> Result<()> {
    let metrics = init_metrics(MetricsRecorderConfig {
        enabled: config.metrics.enabled,
        global_labels: config.metrics.labels.clone().into_iter().collect(),
    })?;

    let summary = run_simulation(&workload, &config.engine).await?;
    println!("{}", serde_json::to_string_pretty(&summary)?);

    if metrics.is_recording() {
        eprintln!("{}", metrics.render());
    }

    // Items that went through the waiting list may overtake ones placed
    // directly, so reordering only counts as a failure without overflow.
    if summary.reordered > 0 && summary.deferred == 0 {
        bail!("{} item(s) delivered out of order", summary.reordered);
    }
    if !summary.interrupted && summary.delivered != summary.enqueued {
        bail!(
            "{} of {} item(s) were delivered",
            summary.delivered,
            summary.enqueued
        );
    }
    Ok(())
}

pub async fn run_simulation(workload: &Workload, engine_config: &EngineConfig) -> Result<Summary> {
    let engine_config = EngineConfig {
        maximum_parallel: workload.maximum_parallel,
        ..engine_config.clone()
    };
    let progress = Arc::new(Progress::default());
    let idle = Arc::new(Notify::new());
    let work = workload.work;

    let engine = {
        let progress = Arc::clone(&progress);
        let failures = Arc::clone(&progress);
        let idle = Arc::clone(&idle);
        Engine::builder(
            engine_config.maximum_parallel,
            |job: &Job| Some(job.owner),
            move |envelope: Envelope<usize, Job>, cancel: CancellationToken| {
                let progress = Arc::clone(&progress);
                async move {
                    progress.record(*envelope.value());
                    if !work.is_zero() {
                        tokio::select! {
                            () = cancel.cancelled() => {},
                            () = tokio::time::sleep(work) => {},
                        }
                    }
                    Ok(())
                }
            },
        )
        .config(&engine_config)
        .on_error(move |err, _cancel| {
            failures.failed.fetch_add(1, Ordering::Relaxed);
            warn!(lane_id = err.lane_id(), error = %err, "simulated item failed");
        })
        .on_idle(move |_: &Engine<usize, Job>| idle.notify_one())
        .build()?
    };

    info!(
        owners = workload.owners,
        items_per_owner = workload.items_per_owner,
        maximum_parallel = engine.maximum_parallel(),
        total = workload.total(),
        "starting simulation"
    );

    let started = Instant::now();
    let mut summary = Summary {
        owners: workload.owners,
        items_per_owner: workload.items_per_owner,
        maximum_parallel: engine.maximum_parallel(),
        ..Summary::default()
    };
    // Round-robin across owners so lanes are contended from the start.
    for seq in 0..workload.items_per_owner {
        for owner in 0..workload.owners {
            summary.tally(engine.enqueue(Job { owner, seq })?);
        }
    }
    debug!(
        enqueued = summary.enqueued,
        waiting = engine.waiting_count(),
        "workload enqueued"
    );

    while !engine.is_idle() {
        tokio::select! {
            () = idle.notified() => {},
            () = tokio::time::sleep(IDLE_POLL) => {},
            signal = tokio::signal::ctrl_c() => {
                signal?;
                warn!("interrupted, stopping simulation");
                summary.interrupted = true;
                break;
            },
        }
    }

    summary.lanes = engine.processes();
    engine.shutdown().await;

    summary.delivered = progress.delivered.load(Ordering::Relaxed);
    summary.callback_errors = progress.failed.load(Ordering::Relaxed);
    summary.reordered = progress.reordered.load(Ordering::Relaxed);
    summary.elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    info!(
        delivered = summary.delivered,
        deferred = summary.deferred,
        reordered = summary.reordered,
        elapsed_ms = summary.elapsed_ms,
        "simulation finished"
    );
    Ok(summary)
}
