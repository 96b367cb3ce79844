//! Collaborator seams for the scheduler.
//!
//! Actually performing cluster operations and arbitrating external resource
//! locks are both out of scope for the queue layer; the scheduler talks to
//! them through these traits.

use async_trait::async_trait;
use serde_json::Value;

use crate::job::{JobRecord, OpRecord};

/// Executes one operation of a job. The returned payload is recorded as the
/// op's result; an `Err` becomes the op's error detail and fails the job.
///
/// Timeouts, retries and the meaning of `kind` all live behind this trait.
#[async_trait]
pub trait OpExecutor: Send + Sync {
    async fn execute(&self, job_id: u64, op: &OpRecord) -> Result<Value, String>;
}

/// Acquires whatever external resource locks a job's operations require
/// before the job may run. Held for the whole job, released afterwards.
#[async_trait]
pub trait LockManager: Send + Sync {
    async fn acquire(&self, job: &JobRecord);
    async fn release(&self, job: &JobRecord);
}

/// Lock manager for deployments without an external lock service.
#[derive(Debug, Default)]
pub struct NullLockManager;

#[async_trait]
impl LockManager for NullLockManager {
    async fn acquire(&self, _job: &JobRecord) {}
    async fn release(&self, _job: &JobRecord) {}
}
