//! Per-job-locked record mutation.

use crate::job::JobRecord;
use crate::layout;
use crate::queue_store::helpers::{load_record_opt, store_record};
use crate::queue_store::{QueueError, QueueStore};

impl QueueStore {
    /// Apply `mutator` to a live job record under its per-job lock, then
    /// persist the record atomically and refresh the status index.
    ///
    /// The aggregate status is recomputed after the mutator runs, so
    /// callers only manipulate op statuses, results and the log. Archived
    /// jobs are terminal and immutable; they cannot be updated.
    pub async fn update<T>(
        &self,
        id: u64,
        mutator: impl FnOnce(&mut JobRecord) -> T,
    ) -> Result<T, QueueError> {
        let _guard = self.job_lock(id).lock().await;

        let path = layout::job_file(self.root(), id);
        let Some(mut job) = load_record_opt(&path)? else {
            return Err(QueueError::JobNotFound(id));
        };

        let out = mutator(&mut job);
        job.refresh_status();
        store_record(&path, &job)?;

        self.live.lock().unwrap().insert(id, job.status);
        Ok(out)
    }
}
