//! Job consumer loop with heartbeat and scheduler tasks

use super::types::{SupervisorConfig, WorkerInfo, WorkerState, WorkerStatus};
use crate::engine::{RunOutcome, SyncEngine};
use crate::error::Result;
use crate::model::Heartbeat;
use crate::schedule::Scheduler;
use crate::types::JobId;
use chrono::{DateTime, Utc};
use std::sync::atomic::{AtomicI64, Ordering};
use std::sync::Arc;
use tokio::sync::{mpsc, Mutex};
use tokio::task::JoinSet;
use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

/// Tasks of a started worker
struct RunningWorker {
    shutdown: CancellationToken,
    awake: mpsc::UnboundedSender<()>,
    tasks: JoinSet<()>,
    started_at: DateTime<Utc>,
}

/// One job consumer per process.
///
/// `start`/`stop`/`restart` only touch the task handles, so operator
/// commands are served while a job is in flight. Cross-process exclusion
/// comes from the dataset locks, not from this value.
#[derive(Clone)]
pub struct WorkerSupervisor {
    engine: SyncEngine,
    scheduler: Scheduler,
    config: SupervisorConfig,
    running: Arc<Mutex<Option<RunningWorker>>>,
    /// Id of the job in flight, 0 when idle
    current: Arc<AtomicI64>,
}

impl std::fmt::Debug for WorkerSupervisor {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("WorkerSupervisor")
            .field("worker_id", &self.engine.worker_id())
            .field("config", &self.config)
            .finish_non_exhaustive()
    }
}

impl WorkerSupervisor {
    pub fn new(engine: SyncEngine, scheduler: Scheduler, config: SupervisorConfig) -> Self {
        Self {
            engine,
            scheduler,
            config,
            running: Arc::new(Mutex::new(None)),
            current: Arc::new(AtomicI64::new(0)),
        }
    }

    pub fn engine(&self) -> &SyncEngine {
        &self.engine
    }

    pub async fn is_running(&self) -> bool {
        self.running.lock().await.is_some()
    }

    fn current_job(&self) -> Option<JobId> {
        match self.current.load(Ordering::Acquire) {
            0 => None,
            id => Some(id),
        }
    }

    // ========================================================================
    // Operator Commands
    // ========================================================================

    /// Start consuming jobs; a running worker is left as is
    pub async fn start(&self) -> Result<WorkerStatus> {
        {
            let mut running = self.running.lock().await;
            if running.is_none() {
                *running = Some(self.spawn());
                info!(worker_id = %self.engine.worker_id(), "Worker started");
            }
        }
        self.status().await
    }

    /// Stop consuming jobs.
    ///
    /// The in-flight job always reaches a terminal state before this returns:
    /// it runs to completion, or stops at its next read batch when
    /// `cancel_in_flight` is set.
    pub async fn stop(&self, cancel_in_flight: bool) -> Result<WorkerStatus> {
        let worker = self.running.lock().await.take();
        if let Some(mut worker) = worker {
            worker.shutdown.cancel();
            if cancel_in_flight {
                let cancelled = self.engine.tracker().registry().cancel_all();
                info!(cancelled, "Cancelling in-flight jobs");
            }
            while let Some(joined) = worker.tasks.join_next().await {
                if let Err(e) = joined {
                    error!(error = %e, "Worker task panicked");
                }
            }
            info!(worker_id = %self.engine.worker_id(), "Worker stopped");
        }
        self.status().await
    }

    /// Stop (letting the in-flight job finish), then start again
    pub async fn restart(&self) -> Result<WorkerStatus> {
        self.stop(false).await?;
        self.start().await
    }

    pub async fn status(&self) -> Result<WorkerStatus> {
        let last_heartbeat = self.engine.repository().last_heartbeat().await?;
        let now = Utc::now();
        let running = self.running.lock().await;
        let worker_info = running.as_ref().map(|w| WorkerInfo {
            worker_id: self.engine.worker_id().to_string(),
            pid: std::process::id(),
            uptime_secs: uptime_secs(w.started_at, now),
            started_at: w.started_at,
        });

        Ok(WorkerStatus {
            status: if running.is_some() {
                WorkerState::Running
            } else {
                WorkerState::Stopped
            },
            last_heartbeat,
            active_jobs: self.engine.tracker().registry().active(),
            current_job: self.current_job(),
            worker_info,
        })
    }

    /// Poll for work now instead of waiting for the next poll interval
    pub async fn wake(&self) {
        if let Some(worker) = self.running.lock().await.as_ref() {
            let _ = worker.awake.send(());
        }
    }

    // ========================================================================
    // Tasks
    // ========================================================================

    fn spawn(&self) -> RunningWorker {
        let shutdown = CancellationToken::new();
        // the heartbeat outlives the shutdown signal until the last job is done
        let consumer_done = CancellationToken::new();
        let (awake, awake_rx) = mpsc::unbounded_channel();
        let started_at = Utc::now();
        let mut tasks = JoinSet::new();

        tasks.spawn(consume(
            self.engine.clone(),
            self.config,
            self.current.clone(),
            shutdown.clone(),
            consumer_done.clone(),
            awake_rx,
        ));
        tasks.spawn(heartbeat(
            self.engine.clone(),
            self.config,
            started_at,
            consumer_done,
        ));
        if self.config.run_scheduler {
            tasks.spawn(self.scheduler.clone().run(shutdown.clone()));
        }

        RunningWorker {
            shutdown,
            awake,
            tasks,
            started_at,
        }
    }
}

fn uptime_secs(started_at: DateTime<Utc>, now: DateTime<Utc>) -> u64 {
    (now - started_at).num_seconds().max(0) as u64
}

/// Dequeue and run jobs until `shutdown` fires
async fn consume(
    engine: SyncEngine,
    config: SupervisorConfig,
    current: Arc<AtomicI64>,
    shutdown: CancellationToken,
    done: CancellationToken,
    mut awake: mpsc::UnboundedReceiver<()>,
) {
    debug!(poll_ms = config.poll_interval.as_millis() as u64, "Starting job consumer loop");

    loop {
        if shutdown.is_cancelled() {
            break;
        }

        match run_next(&engine, &current).await {
            // look for the next job straight away
            Ok(true) => continue,
            Ok(false) => {}
            Err(e) => warn!(error = %e, "Job poll failed"),
        }

        tokio::select! {
            biased;
            () = shutdown.cancelled() => break,
            Some(()) = awake.recv() => {}
            () = sleep(config.poll_interval) => {}
        }
    }

    done.cancel();
    info!("Job consumer loop stopped");
}

/// Run the oldest pending job whose dataset is not locked.
///
/// Returns whether a job was run to a terminal state.
async fn run_next(engine: &SyncEngine, current: &AtomicI64) -> Result<bool> {
    let held = engine.locks().held_datasets().await?;
    let Some(job) = engine.repository().next_pending_job(&held).await? else {
        return Ok(false);
    };

    current.store(job.id, Ordering::Release);
    let outcome = engine.run_job(job).await;
    current.store(0, Ordering::Release);

    match outcome? {
        RunOutcome::Finished(job) => {
            debug!(job_id = job.id, status = %job.status, "Job run finished");
            Ok(true)
        }
        RunOutcome::Contended { .. } => Ok(false),
    }
}

/// Record a heartbeat every interval until the consumer has stopped
async fn heartbeat(
    engine: SyncEngine,
    config: SupervisorConfig,
    started_at: DateTime<Utc>,
    done: CancellationToken,
) {
    let mut interval = tokio::time::interval(config.heartbeat_interval);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            () = done.cancelled() => break,
            _ = interval.tick() => {
                let now = Utc::now();
                let beat = Heartbeat {
                    timestamp: now,
                    worker_id: engine.worker_id().to_string(),
                    pid: std::process::id(),
                    started_at,
                    uptime_secs: uptime_secs(started_at, now),
                    active_jobs: engine.tracker().registry().active(),
                };
                if let Err(e) = engine.repository().record_heartbeat(beat).await {
                    warn!(error = %e, "Heartbeat write failed");
                }
            }
        }
    }
}
