//! Job cancellation.

use tracing::info;

use crate::job::{LogKind, Status};
use crate::layout;
use crate::queue_store::helpers::{load_record_opt, now_epoch_ms, store_record};
use crate::queue_store::{QueueError, QueueStore};

/// What a cancellation request achieved.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CancelOutcome {
    /// The job had not started; it is terminally `canceled` already.
    Canceled,
    /// The job is in progress; it will stop at the next op boundary.
    Canceling,
}

impl QueueStore {
    /// Cancel a job by ID.
    ///
    /// A job the scheduler has not claimed yet (every op still `queued`) is
    /// canceled outright. A claimed job has its remaining ops marked
    /// `canceling`; the scheduler resolves them to `canceled` at the next
    /// op boundary, letting the currently running op finish first.
    /// Cancellation is monotonic and terminal jobs cannot be canceled.
    pub async fn cancel(&self, id: u64) -> Result<CancelOutcome, QueueError> {
        let outcome = {
            let _guard = self.job_lock(id).lock().await;

            let path = layout::job_file(self.root(), id);
            let Some(mut job) = load_record_opt(&path)? else {
                return Err(QueueError::JobNotFound(id));
            };

            if job.status.is_terminal() {
                return Err(QueueError::CannotCancel {
                    id,
                    status: job.status,
                });
            }

            let outcome = if job.cancel_requested() {
                // A second request changes nothing.
                CancelOutcome::Canceling
            } else if job.ops.iter().all(|op| op.status == Status::Queued) {
                job.cancel_pending_ops();
                job.add_log(
                    now_epoch_ms(),
                    LogKind::Message,
                    serde_json::json!("job canceled before execution"),
                );
                CancelOutcome::Canceled
            } else {
                job.mark_canceling();
                job.add_log(
                    now_epoch_ms(),
                    LogKind::Message,
                    serde_json::json!("cancellation requested"),
                );
                CancelOutcome::Canceling
            };

            job.refresh_status();
            store_record(&path, &job)?;
            self.live.lock().unwrap().insert(id, job.status);
            outcome
        };

        info!(job_id = id, outcome = ?outcome, "job cancellation requested");
        Ok(outcome)
    }
}
