#![allow(dead_code)]

use std::collections::BTreeMap;
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use async_trait::async_trait;
use serde_json::{json, Value};
use tokio::sync::Semaphore;

use granary::executor::{NullLockManager, OpExecutor};
use granary::job::{JobRecord, OpSpec, Status};
use granary::queue_store::QueueStore;
use granary::scheduler::QueueScheduler;
use granary::settings::{LogFormat, QueueConfig};

// Helper: enforce a tight timeout for async tests likely to hang
#[macro_export]
macro_rules! with_timeout {
    ($ms:expr, $body:block) => {{
        tokio::time::timeout(std::time::Duration::from_millis($ms), async move { $body })
            .await
            .expect("test timed out")
    }};
}

pub async fn open_temp_queue() -> (tempfile::TempDir, Arc<QueueStore>) {
    open_temp_queue_with(|_| {}).await
}

/// Open a temp queue with a tweaked config (useful for limit behavior)
pub async fn open_temp_queue_with(
    tweak: impl FnOnce(&mut QueueConfig),
) -> (tempfile::TempDir, Arc<QueueStore>) {
    granary::trace::init(LogFormat::Text);
    let tmp = tempfile::tempdir().unwrap();
    let mut cfg = QueueConfig::new(tmp.path().join("queue"));
    tweak(&mut cfg);
    let store = QueueStore::open(cfg).await.expect("open queue");
    (tmp, store)
}

/// Reopen the queue under an existing temp dir, simulating a restart.
pub async fn reopen_queue(tmp: &tempfile::TempDir) -> Arc<QueueStore> {
    QueueStore::open(QueueConfig::new(tmp.path().join("queue")))
        .await
        .expect("reopen queue")
}

pub fn op(kind: &str) -> OpSpec {
    OpSpec::new(kind)
}

pub fn ops(kinds: &[&str]) -> Vec<OpSpec> {
    kinds.iter().map(|k| OpSpec::new(*k)).collect()
}

pub fn param_map(entries: &[(&str, Value)]) -> BTreeMap<String, Value> {
    entries
        .iter()
        .map(|(k, v)| (k.to_string(), v.clone()))
        .collect()
}

/// Test executor driven by op kinds: `fail:<detail>` fails, `gate` parks
/// until a permit is released, anything else succeeds immediately. Records
/// every execution it sees.
pub struct ScriptedExecutor {
    pub executed: Mutex<Vec<(u64, String)>>,
    pub gate: Arc<Semaphore>,
}

impl ScriptedExecutor {
    pub fn new_arc() -> Arc<Self> {
        Arc::new(Self {
            executed: Mutex::new(Vec::new()),
            gate: Arc::new(Semaphore::new(0)),
        })
    }

    pub fn executed_kinds(&self) -> Vec<String> {
        self.executed
            .lock()
            .unwrap()
            .iter()
            .map(|(_, kind)| kind.clone())
            .collect()
    }

    pub fn release_gate(&self) {
        self.gate.add_permits(1);
    }
}

#[async_trait]
impl OpExecutor for ScriptedExecutor {
    async fn execute(&self, job_id: u64, op: &granary::job::OpRecord) -> Result<Value, String> {
        self.executed
            .lock()
            .unwrap()
            .push((job_id, op.kind.clone()));
        if let Some(detail) = op.kind.strip_prefix("fail:") {
            return Err(detail.to_string());
        }
        if op.kind == "gate" {
            self.gate.acquire().await.expect("gate closed").forget();
        }
        Ok(json!({ "kind": op.kind, "done": true }))
    }
}

pub fn start_scheduler(
    store: &Arc<QueueStore>,
    executor: Arc<dyn OpExecutor>,
) -> Arc<QueueScheduler> {
    let scheduler = QueueScheduler::new(Arc::clone(store), executor, Arc::new(NullLockManager));
    scheduler.start();
    scheduler
}

/// Poll until the job reaches `status`, returning its record. Wrap calls in
/// `with_timeout!` so a stuck job fails the test instead of hanging it.
pub async fn wait_for_status(store: &Arc<QueueStore>, id: u64, status: Status) -> JobRecord {
    loop {
        let record = store.fetch(id).await.expect("fetch");
        if record.status == status {
            return record;
        }
        tokio::time::sleep(Duration::from_millis(10)).await;
    }
}

/// The raw serial file contents, for asserting rejected submissions leave
/// no side effects behind.
pub fn read_serial_file(tmp: &tempfile::TempDir) -> String {
    let path: std::path::PathBuf = tmp.path().join("queue").join("serial");
    read_trimmed(&path)
}

fn read_trimmed(path: &Path) -> String {
    std::fs::read_to_string(path).unwrap().trim().to_string()
}
