//! Job submission: validation, serial allocation and record creation.

use tracing::{debug, warn};

use crate::job::{JobRecord, OpRecord, OpSpec, Status};
use crate::layout;
use crate::params;
use crate::queue_store::helpers::{now_epoch_ms, read_serial, store_record, write_serial};
use crate::queue_store::{QueueError, QueueStore};

impl QueueStore {
    /// Submit a job made of `ops`, in execution order. Returns the job's
    /// newly allocated serial ID.
    ///
    /// Parameters of ops that declare a subsystem are validated and coerced
    /// against the registry before any queue state is touched; a rejected
    /// submission never consumes a serial and never writes a record. The
    /// drain flag and the hard size limit also reject up front; crossing
    /// the soft size limit only logs a capacity warning.
    pub async fn submit(&self, ops: Vec<OpSpec>) -> Result<u64, QueueError> {
        if ops.is_empty() {
            return Err(QueueError::EmptyJob);
        }

        let mut records = Vec::with_capacity(ops.len());
        for spec in ops {
            let op_params = match spec.subsystem {
                Some(subsystem) => params::validate(subsystem, &spec.params)?,
                None => spec.params,
            };
            records.push(OpRecord::new(spec.kind, spec.subsystem, op_params));
        }

        let id = {
            let mut live = self.live.lock().unwrap();

            if self.is_drained() {
                return Err(QueueError::QueueDrained);
            }
            if live.len() >= self.cfg.size_hard_limit {
                return Err(QueueError::QueueFull {
                    live: live.len(),
                    limit: self.cfg.size_hard_limit,
                });
            }
            if live.len() >= self.cfg.soft_limit() {
                warn!(
                    live = live.len(),
                    soft_limit = self.cfg.soft_limit(),
                    hard_limit = self.cfg.size_hard_limit,
                    "job queue is above its soft size limit"
                );
            }

            // The serial is persisted before the ID is handed out, so a
            // crash here can skip an ID but never reuse one.
            let id = read_serial(self.root())? + 1;
            write_serial(self.root(), id)?;

            let job = JobRecord::new(id, records, now_epoch_ms());
            store_record(&layout::job_file(self.root(), id), &job)?;
            live.insert(id, Status::Queued);
            id
        };

        debug!(job_id = id, "job submitted");
        self.notify.notify_one();
        Ok(id)
    }
}
