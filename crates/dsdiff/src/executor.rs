//! Lane-based job executor.
//!
//! The executor owns a fixed set of lanes. Each lane is a bounded queue
//! drained by one dedicated worker task, so jobs submitted to the same lane
//! run strictly in submission order while different lanes run concurrently.
//!
//! - A job's error is recorded on its ticket and in the executor's failure
//!   list; it never stops the lane's worker.
//! - [`JobExecutor::wait_for_idle`] waits on an outstanding-job counter.
//! - [`JobExecutor::shutdown`] either drains the lanes or cancels the
//!   workers immediately. Cancellation is cooperative: a running job is not
//!   interrupted, queued jobs are abandoned and their tickets resolve with
//!   [`DsdiffError::Cancelled`].

use crate::error::{DsdiffError, Result};
use crate::job::{Execute, JobContext};
use futures::FutureExt;
use serde::{Deserialize, Serialize};
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex};
use tokio::sync::{mpsc, oneshot, watch};
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

/// Upper bound on the number of lanes.
pub const MAX_LANES: usize = 1024;

/// Lifecycle of a submitted job.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum JobState {
    Created,
    Submitted,
    Running,
    Succeeded,
    Failed,
    Observed,
}

impl JobState {
    /// True once the job has finished executing.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobState::Succeeded | JobState::Failed | JobState::Observed
        )
    }
}

/// A failed job captured by the executor.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobFailure {
    /// Job id assigned at submission.
    pub id: u64,
    /// Lane the job ran on.
    pub lane: usize,
    /// Job label.
    pub label: String,
    /// Error message.
    pub message: String,
}

/// Handle to a submitted job.
pub struct JobTicket<T> {
    id: u64,
    lane: usize,
    label: String,
    state: watch::Receiver<JobState>,
    outcome: Option<oneshot::Receiver<Result<T>>>,
}

impl<T> JobTicket<T> {
    /// Job id.
    pub fn id(&self) -> u64 {
        self.id
    }

    /// Lane the job was submitted to.
    pub fn lane(&self) -> usize {
        self.lane
    }

    /// Job label.
    pub fn label(&self) -> &str {
        &self.label
    }

    /// Current state of the job.
    pub fn state(&self) -> JobState {
        if self.outcome.is_none() {
            return JobState::Observed;
        }
        *self.state.borrow()
    }

    /// Wait for the job to finish and take its result.
    ///
    /// Resolves with [`DsdiffError::Cancelled`] when the job was abandoned
    /// by an immediate shutdown. A ticket can be observed once.
    pub async fn wait(&mut self) -> Result<T> {
        let outcome = self
            .outcome
            .take()
            .ok_or_else(|| DsdiffError::Executor(format!("job {} already observed", self.id)))?;
        outcome.await.unwrap_or(Err(DsdiffError::Cancelled))
    }
}

struct Envelope<J: Execute> {
    id: u64,
    label: String,
    job: J,
    state: watch::Sender<JobState>,
    outcome: oneshot::Sender<Result<J::Output>>,
}

struct Shared {
    cancel: CancellationToken,
    outstanding: watch::Sender<usize>,
    has_error: AtomicBool,
    failures: Mutex<Vec<JobFailure>>,
}

impl Shared {
    fn finish_one(&self) {
        self.outstanding.send_modify(|n| *n = n.saturating_sub(1));
    }

    fn record_failure(&self, failure: JobFailure) {
        self.has_error.store(true, Ordering::SeqCst);
        if let Ok(mut failures) = self.failures.lock() {
            failures.push(failure);
        }
    }
}

/// Executor running jobs of type `J` on a fixed set of lanes.
pub struct JobExecutor<J: Execute> {
    senders: Vec<mpsc::Sender<Envelope<J>>>,
    receivers: Mutex<Option<Vec<mpsc::Receiver<Envelope<J>>>>>,
    workers: Mutex<Vec<JoinHandle<()>>>,
    shared: Arc<Shared>,
    next_id: AtomicU64,
}

impl<J: Execute> JobExecutor<J> {
    /// Create an executor with `lanes` lanes of `queue_capacity` jobs each.
    ///
    /// Workers are not running until [`start`](Self::start) is called.
    pub fn new(lanes: usize, queue_capacity: usize) -> Result<Self> {
        if lanes == 0 || lanes > MAX_LANES {
            return Err(DsdiffError::Executor(format!(
                "lane count must be in [1, {}], got {}",
                MAX_LANES, lanes
            )));
        }
        if queue_capacity == 0 {
            return Err(DsdiffError::Executor(
                "queue capacity must be at least 1".into(),
            ));
        }

        let (senders, receivers): (Vec<_>, Vec<_>) =
            (0..lanes).map(|_| mpsc::channel(queue_capacity)).unzip();
        let (outstanding, _) = watch::channel(0usize);

        Ok(Self {
            senders,
            receivers: Mutex::new(Some(receivers)),
            workers: Mutex::new(Vec::new()),
            shared: Arc::new(Shared {
                cancel: CancellationToken::new(),
                outstanding,
                has_error: AtomicBool::new(false),
                failures: Mutex::new(Vec::new()),
            }),
            next_id: AtomicU64::new(1),
        })
    }

    /// Number of lanes.
    pub fn lanes(&self) -> usize {
        self.senders.len()
    }

    /// Spawn one worker per lane. Later calls do nothing.
    pub fn start(&self) {
        let receivers = match self.receivers.lock() {
            Ok(mut guard) => guard.take(),
            Err(_) => None,
        };
        let Some(receivers) = receivers else {
            warn!("job executor already started");
            return;
        };

        let handles: Vec<_> = receivers
            .into_iter()
            .enumerate()
            .map(|(lane, rx)| tokio::spawn(run_lane(lane, rx, self.shared.clone())))
            .collect();
        debug!("started {} lanes", handles.len());

        if let Ok(mut workers) = self.workers.lock() {
            workers.extend(handles);
        }
    }

    /// Queue a job on a lane.
    ///
    /// Waits for room when the lane's queue is full. Fails when the lane
    /// does not exist or the executor has been shut down, including while
    /// waiting for room.
    pub async fn submit(&self, job: J, lane: usize) -> Result<JobTicket<J::Output>> {
        let sender = self.senders.get(lane).ok_or_else(|| {
            DsdiffError::Executor(format!(
                "lane {} out of range (executor has {} lanes)",
                lane,
                self.senders.len()
            ))
        })?;
        if self.shared.cancel.is_cancelled() {
            return Err(DsdiffError::Cancelled);
        }

        // Counted only once a slot is reserved; a dropped submit counts nothing
        let permit = tokio::select! {
            permit = sender.reserve() => permit
                .map_err(|_| DsdiffError::Executor(format!("lane {} is closed", lane)))?,
            _ = self.shared.cancel.cancelled() => return Err(DsdiffError::Cancelled),
        };

        let id = self.next_id.fetch_add(1, Ordering::Relaxed);
        let label = job.label();
        let (state_tx, state_rx) = watch::channel(JobState::Created);
        let (outcome_tx, outcome_rx) = oneshot::channel();

        self.shared.outstanding.send_modify(|n| *n += 1);
        state_tx.send_replace(JobState::Submitted);

        permit.send(Envelope {
            id,
            label: label.clone(),
            job,
            state: state_tx,
            outcome: outcome_tx,
        });
        debug!("submitted job {} ({}) to lane {}", id, label, lane);

        Ok(JobTicket {
            id,
            lane,
            label,
            state: state_rx,
            outcome: Some(outcome_rx),
        })
    }

    /// Wait until every submitted job has finished.
    ///
    /// Also returns once the executor is cancelled, since abandoned jobs
    /// never finish.
    pub async fn wait_for_idle(&self) {
        let mut outstanding = self.shared.outstanding.subscribe();
        let idle = async move {
            let _ = outstanding.wait_for(|n| *n == 0).await;
        };
        tokio::select! {
            _ = idle => {}
            _ = self.shared.cancel.cancelled() => {}
        }
    }

    /// Number of submitted jobs that have not finished yet.
    pub fn outstanding(&self) -> usize {
        *self.shared.outstanding.borrow()
    }

    /// Whether any job failed since the previous call. Resets the flag.
    pub fn has_any_error(&self) -> bool {
        self.shared.has_error.swap(false, Ordering::SeqCst)
    }

    /// Drain the failures recorded so far.
    pub fn take_failures(&self) -> Vec<JobFailure> {
        match self.shared.failures.lock() {
            Ok(mut failures) => std::mem::take(&mut *failures),
            Err(_) => Vec::new(),
        }
    }

    /// Token cancelled by an immediate shutdown.
    pub fn cancel_token(&self) -> CancellationToken {
        self.shared.cancel.clone()
    }

    /// True once the executor has been cancelled.
    pub fn is_cancelled(&self) -> bool {
        self.shared.cancel.is_cancelled()
    }

    /// Stop the workers.
    ///
    /// With `wait`, drains all outstanding jobs first and joins the workers.
    /// Without it, cancels immediately; queued jobs are abandoned and a
    /// running job finishes in the background.
    pub async fn shutdown(&self, wait: bool) {
        if !wait {
            self.shared.cancel.cancel();
            return;
        }

        self.wait_for_idle().await;
        self.shared.cancel.cancel();

        let handles = match self.workers.lock() {
            Ok(mut workers) => std::mem::take(&mut *workers),
            Err(_) => Vec::new(),
        };
        for handle in handles {
            if let Err(e) = handle.await {
                warn!("lane worker panicked: {}", e);
            }
        }
    }
}

async fn run_lane<J: Execute>(
    lane: usize,
    mut rx: mpsc::Receiver<Envelope<J>>,
    shared: Arc<Shared>,
) {
    loop {
        let envelope = tokio::select! {
            biased;
            _ = shared.cancel.cancelled() => break,
            next = rx.recv() => match next {
                Some(envelope) => envelope,
                None => break,
            },
        };

        let Envelope {
            id,
            label,
            job,
            state,
            outcome,
        } = envelope;
        state.send_replace(JobState::Running);
        debug!("lane {}: running job {} ({})", lane, id, label);

        let ctx = JobContext {
            lane,
            cancel: shared.cancel.clone(),
        };
        let result = match AssertUnwindSafe(job.execute(ctx)).catch_unwind().await {
            Ok(result) => result,
            Err(_) => Err(DsdiffError::Executor(format!("job {} ({}) panicked", id, label))),
        };

        match &result {
            Ok(_) => {
                state.send_replace(JobState::Succeeded);
            }
            Err(e) => {
                state.send_replace(JobState::Failed);
                warn!("lane {}: job {} ({}) failed: {}", lane, id, label, e);
                shared.record_failure(JobFailure {
                    id,
                    lane,
                    label,
                    message: e.to_string(),
                });
            }
        }

        // The submitter may have dropped its ticket
        let _ = outcome.send(result);
        shared.finish_one();
    }
    debug!("lane {} stopped", lane);
}
