//! Crash recovery on open.
//!
//! Jobs left `waiting` or `running` by an unclean shutdown are re-queued:
//! every non-terminal op goes back to `queued` while terminal ops keep
//! their status and result, so the scheduler resumes the job at the first
//! op that never finished and completed ops are never re-run. Jobs caught
//! mid-cancellation resolve to `canceled`, and terminal jobs that still
//! carry pending ops (a crash between recording a failure and canceling
//! the remainder) are finalized.

use tracing::warn;

use crate::job::Status;
use crate::layout;
use crate::queue_store::helpers::{load_record, store_record};
use crate::queue_store::{QueueError, QueueStore};

impl QueueStore {
    /// Runs during `open`, before the store is shared, so records are
    /// rewritten directly without taking per-job locks.
    pub(crate) fn recover(&self) -> Result<(), QueueError> {
        let ids: Vec<u64> = self.live.lock().unwrap().keys().copied().collect();

        for id in ids {
            let path = layout::job_file(self.root(), id);
            let mut job = load_record(&path)?;

            let needs_finalize =
                job.status.is_terminal() && job.ops.iter().any(|op| !op.status.is_terminal());
            let from = job.status;

            match job.status {
                Status::Queued => continue,
                _ if job.status.is_terminal() && !needs_finalize => continue,
                Status::Canceling => {
                    job.cancel_pending_ops();
                }
                Status::Waiting | Status::Running => {
                    for op in &mut job.ops {
                        if !op.status.is_terminal() {
                            op.requeue();
                        }
                    }
                }
                _ => {
                    // Terminal aggregate with pending ops left behind.
                    job.cancel_pending_ops();
                }
            }

            job.refresh_status();
            store_record(&path, &job)?;
            self.live.lock().unwrap().insert(id, job.status);

            warn!(
                job_id = id,
                from = %from,
                to = %job.status,
                "recovered job after unclean shutdown"
            );
        }
        Ok(())
    }
}
