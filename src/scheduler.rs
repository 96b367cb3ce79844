//! In-process scheduler driving queued jobs through their operations.
//!
//! One background dispatch loop scans the store for `queued` jobs in
//! ascending ID order and hands each claimed job to its own task, capped at
//! the configured worker count. Ops within a job run strictly in order;
//! jobs run concurrently. Every op status change is persisted immediately,
//! so a crash never loses a completed op, and cancellation is observed
//! cooperatively at op boundaries.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use serde_json::json;
use tracing::{debug, info, warn};

use crate::executor::{LockManager, OpExecutor};
use crate::job::{LogKind, OpRecord, Status};
use crate::queue_store::{now_epoch_ms, QueueError, QueueStore};

pub struct QueueScheduler {
    store: Arc<QueueStore>,
    executor: Arc<dyn OpExecutor>,
    locks: Arc<dyn LockManager>,
    running: AtomicBool,
    /// Jobs currently owned by a driver task.
    claimed: Mutex<HashSet<u64>>,
    workers: usize,
}

/// Outcome of claiming a job for execution.
enum Claim {
    Start,
    AlreadyDone,
    Canceled,
}

/// What to do after beginning the next op of a job.
enum Step {
    Run(usize, OpRecord),
    Done,
    Canceled,
}

/// Outcome of recording an op's execution result.
enum OpEnd {
    Completed,
    Failed,
    Canceled,
}

impl QueueScheduler {
    pub fn new(
        store: Arc<QueueStore>,
        executor: Arc<dyn OpExecutor>,
        locks: Arc<dyn LockManager>,
    ) -> Arc<Self> {
        let workers = store.config().workers.max(1);
        Arc::new(Self {
            store,
            executor,
            locks,
            running: AtomicBool::new(false),
            claimed: Mutex::new(HashSet::new()),
            workers,
        })
    }

    /// Start the background dispatch loop.
    pub fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }

        let scheduler = Arc::clone(self);
        tokio::spawn(async move {
            let min_sleep_ms = 5;
            let max_sleep_ms = scheduler.store.config().poll_interval_ms.max(min_sleep_ms);
            let mut sleep_ms = min_sleep_ms;

            loop {
                if !scheduler.running.load(Ordering::SeqCst) {
                    break;
                }

                let spawned = scheduler.dispatch();
                sleep_ms = if spawned > 0 {
                    min_sleep_ms
                } else {
                    (sleep_ms * 2).min(max_sleep_ms)
                };

                // Sleep with early wakeup on new submissions.
                let delay = tokio::time::sleep(Duration::from_millis(sleep_ms));
                tokio::pin!(delay);
                tokio::select! {
                    _ = &mut delay => {}
                    _ = scheduler.store.notify.notified() => {
                        debug!("scheduler woken by queue notification");
                    }
                }
            }
        });
    }

    /// Stop the dispatch loop. Jobs already claimed run to completion.
    pub fn stop(&self) {
        self.running.store(false, Ordering::SeqCst);
        self.store.notify.notify_one();
    }

    /// Number of jobs currently being driven.
    pub fn active_jobs(&self) -> usize {
        self.claimed.lock().unwrap().len()
    }

    /// Claim queued jobs in FIFO order up to the worker cap, spawning one
    /// driver task per job.
    fn dispatch(self: &Arc<Self>) -> usize {
        let candidates = self.store.jobs_by_status(Status::Queued);
        let mut spawned = 0;

        for id in candidates {
            {
                let mut claimed = self.claimed.lock().unwrap();
                if claimed.len() >= self.workers {
                    break;
                }
                if !claimed.insert(id) {
                    continue;
                }
            }

            let scheduler = Arc::clone(self);
            tokio::spawn(async move {
                if let Err(err) = scheduler.drive(id).await {
                    warn!(job_id = id, error = %err, "job driver failed");
                }
                scheduler.claimed.lock().unwrap().remove(&id);
                scheduler.store.notify.notify_one();
            });
            spawned += 1;
        }
        spawned
    }

    /// Drive one job: claim it, acquire its resource locks, then execute
    /// its ops in order. Execution errors are recorded in the job record,
    /// never propagated; only store failures surface as `Err`.
    async fn drive(&self, id: u64) -> Result<(), QueueError> {
        let claim = self
            .store
            .update(id, |job| {
                if job.cancel_requested() {
                    job.cancel_pending_ops();
                    job.add_log(now_epoch_ms(), LogKind::Message, json!("job canceled"));
                    return Claim::Canceled;
                }
                match job.first_pending() {
                    // Canceled or finished between the scan and the claim.
                    None => Claim::AlreadyDone,
                    Some(first) => {
                        job.ops[first].transition(Status::Waiting);
                        Claim::Start
                    }
                }
            })
            .await?;

        match claim {
            Claim::Start => {}
            Claim::AlreadyDone => return Ok(()),
            Claim::Canceled => {
                info!(job_id = id, "job canceled before execution started");
                return Ok(());
            }
        }

        let job = self.store.fetch(id).await?;
        self.locks.acquire(&job).await;
        let outcome = self.run_ops(id).await;
        self.locks.release(&job).await;
        outcome
    }

    /// Execute the job's remaining ops strictly in order, persisting each
    /// op's terminal status the moment it is known.
    async fn run_ops(&self, id: u64) -> Result<(), QueueError> {
        loop {
            let step = self
                .store
                .update(id, |job| {
                    if job.cancel_requested() {
                        job.cancel_pending_ops();
                        job.add_log(now_epoch_ms(), LogKind::Message, json!("job canceled"));
                        return Step::Canceled;
                    }
                    let Some(index) = job.first_pending() else {
                        return Step::Done;
                    };
                    let total = job.ops.len();
                    let op = &mut job.ops[index];
                    if op.status == Status::Queued {
                        op.transition(Status::Waiting);
                    }
                    op.transition(Status::Running);
                    let kind = op.kind.clone();
                    job.add_log(
                        now_epoch_ms(),
                        LogKind::Progress,
                        json!({ "op": index + 1, "of": total, "kind": kind }),
                    );
                    Step::Run(index, job.ops[index].clone())
                })
                .await?;

            let (index, op) = match step {
                Step::Run(index, op) => (index, op),
                Step::Done => {
                    info!(job_id = id, "job finished");
                    return Ok(());
                }
                Step::Canceled => {
                    info!(job_id = id, "job canceled at op boundary");
                    return Ok(());
                }
            };

            debug!(job_id = id, op = index, kind = %op.kind, "executing op");
            let result = self.executor.execute(id, &op).await;

            let end = self
                .store
                .update(id, |job| {
                    let payload = match &result {
                        Ok(value) => value.clone(),
                        Err(detail) => json!({ "error": detail }),
                    };
                    let op = &mut job.ops[index];
                    op.result = Some(payload);

                    if op.status == Status::Canceling {
                        // Cancellation arrived while the op was running; the
                        // op was allowed to finish but the job stops here.
                        op.transition(Status::Canceled);
                        job.cancel_pending_ops();
                        job.add_log(now_epoch_ms(), LogKind::Message, json!("job canceled"));
                        return OpEnd::Canceled;
                    }

                    match &result {
                        Ok(_) => {
                            op.transition(Status::Success);
                            OpEnd::Completed
                        }
                        Err(detail) => {
                            let kind = op.kind.clone();
                            op.transition(Status::Error);
                            // Ops after a failure never run.
                            job.cancel_pending_ops();
                            job.add_log(
                                now_epoch_ms(),
                                LogKind::Message,
                                json!(format!("operation {kind} failed: {detail}")),
                            );
                            OpEnd::Failed
                        }
                    }
                })
                .await?;

            match end {
                OpEnd::Completed => continue,
                OpEnd::Failed => {
                    warn!(job_id = id, op = index, "op failed, job marked as error");
                    return Ok(());
                }
                OpEnd::Canceled => {
                    info!(job_id = id, op = index, "job canceled while op was running");
                    return Ok(());
                }
            }
        }
    }
}

impl Drop for QueueScheduler {
    fn drop(&mut self) {
        self.stop();
    }
}
