//! Job and operation records and their status state machine.
//!
//! A job is an ordered list of operations tracked under one serial ID. Ops
//! carry their own status; the job's status is always the aggregate of its
//! ops' statuses, recomputed after every mutation.

use std::collections::BTreeMap;
use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::Value;

use crate::params::Subsystem;

/// Lifecycle status, shared vocabulary for jobs and operations.
///
/// `queued → waiting → running → {success | error | canceled}`, with
/// `canceling` as a transient state that always resolves to `canceled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Status {
    Queued,
    Waiting,
    Running,
    Canceling,
    Canceled,
    Success,
    Error,
}

impl Status {
    pub fn as_str(&self) -> &'static str {
        match self {
            Status::Queued => "queued",
            Status::Waiting => "waiting",
            Status::Running => "running",
            Status::Canceling => "canceling",
            Status::Canceled => "canceled",
            Status::Success => "success",
            Status::Error => "error",
        }
    }

    /// Terminal statuses permit no further transition.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Status::Success | Status::Error | Status::Canceled)
    }

    /// The transition-legality table. `queued → canceled` covers direct
    /// cancellation of unclaimed work and ops skipped after a failure.
    pub fn may_transition(from: Status, to: Status) -> bool {
        use Status::*;
        matches!(
            (from, to),
            (Queued, Waiting)
                | (Queued, Canceling)
                | (Queued, Canceled)
                | (Waiting, Running)
                | (Waiting, Canceling)
                | (Running, Success)
                | (Running, Error)
                | (Running, Canceling)
                | (Canceling, Canceled)
        )
    }
}

impl fmt::Display for Status {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Execution-log entry kinds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum LogKind {
    Message,
    Progress,
}

/// One entry of a job's execution log. Serials are per-job and strictly
/// increasing so clients can poll for entries they have not seen yet.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    pub serial: u64,
    pub at_ms: i64,
    pub kind: LogKind,
    pub payload: Value,
}

/// An operation as submitted by a client, before validation.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpSpec {
    /// Opaque operation type; execution is the `OpExecutor`'s concern.
    pub kind: String,
    /// Registry to validate `params` against, if the op targets one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsystem: Option<Subsystem>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
}

impl OpSpec {
    pub fn new(kind: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            subsystem: None,
            params: BTreeMap::new(),
        }
    }

    pub fn with_params(
        kind: impl Into<String>,
        subsystem: Subsystem,
        params: BTreeMap<String, Value>,
    ) -> Self {
        Self {
            kind: kind.into(),
            subsystem: Some(subsystem),
            params,
        }
    }
}

/// A persisted operation: one indivisible step of a job.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OpRecord {
    pub kind: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub subsystem: Option<Subsystem>,
    #[serde(default)]
    pub params: BTreeMap<String, Value>,
    pub status: Status,
    /// Success payload, or error detail once the op fails.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<Value>,
}

impl OpRecord {
    pub fn new(kind: String, subsystem: Option<Subsystem>, params: BTreeMap<String, Value>) -> Self {
        Self {
            kind,
            subsystem,
            params,
            status: Status::Queued,
            result: None,
        }
    }

    /// Apply a status transition, panicking on an illegal one. An illegal
    /// transition is a scheduler bug, never a user condition.
    pub fn transition(&mut self, to: Status) {
        assert!(
            Status::may_transition(self.status, to),
            "illegal op status transition {} -> {} (kind {})",
            self.status,
            to,
            self.kind
        );
        self.status = to;
    }

    /// Reset a non-terminal op to `queued` during crash recovery. This is
    /// state reconstruction, not a runtime transition.
    pub fn requeue(&mut self) {
        assert!(
            !self.status.is_terminal(),
            "cannot requeue terminal op (kind {})",
            self.kind
        );
        self.status = Status::Queued;
    }
}

/// The persisted unit of work.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct JobRecord {
    pub id: u64,
    pub ops: Vec<OpRecord>,
    /// Cached aggregate of the ops' statuses; refreshed on every mutation.
    pub status: Status,
    pub received_at_ms: i64,
    #[serde(default)]
    pub log: Vec<LogEntry>,
}

impl JobRecord {
    pub fn new(id: u64, ops: Vec<OpRecord>, received_at_ms: i64) -> Self {
        debug_assert!(!ops.is_empty(), "a job must contain at least one op");
        let status = aggregate_status(&ops);
        Self {
            id,
            ops,
            status,
            received_at_ms,
            log: Vec::new(),
        }
    }

    /// Recompute the cached aggregate status from the ops.
    pub fn refresh_status(&mut self) {
        self.status = aggregate_status(&self.ops);
    }

    /// Index of the first op that still has work left, if any.
    pub fn first_pending(&self) -> Option<usize> {
        self.ops.iter().position(|op| !op.status.is_terminal())
    }

    /// True once a cancellation request has been recorded against any op.
    pub fn cancel_requested(&self) -> bool {
        self.ops.iter().any(|op| op.status == Status::Canceling)
    }

    /// Mark every non-terminal op `canceling`. Used when a cancellation
    /// request lands on a job the scheduler has already claimed.
    pub fn mark_canceling(&mut self) {
        for op in &mut self.ops {
            if !op.status.is_terminal() {
                op.transition(Status::Canceling);
            }
        }
    }

    /// Resolve every non-terminal op to `canceled`. Ops already terminal
    /// keep their status and result.
    pub fn cancel_pending_ops(&mut self) {
        for op in &mut self.ops {
            match op.status {
                Status::Queued | Status::Canceling => op.transition(Status::Canceled),
                Status::Waiting | Status::Running => {
                    op.transition(Status::Canceling);
                    op.transition(Status::Canceled);
                }
                _ => {}
            }
        }
    }

    /// Append a log entry, allocating the next per-job serial.
    pub fn add_log(&mut self, at_ms: i64, kind: LogKind, payload: Value) {
        let serial = self.log.last().map(|e| e.serial + 1).unwrap_or(1);
        self.log.push(LogEntry {
            serial,
            at_ms,
            kind,
            payload,
        });
    }

    /// Timestamp of the last recorded activity, used by age-based archiving.
    pub fn last_activity_ms(&self) -> i64 {
        self.log
            .last()
            .map(|e| e.at_ms)
            .unwrap_or(self.received_at_ms)
    }
}

/// The aggregate job status as a pure function of the ordered op statuses.
///
/// Walked in op order: a `canceling`, `canceled` or `error` op decides the
/// aggregate outright; otherwise the furthest-progressed op seen so far
/// decides between `queued`, `waiting` and `running`; a job whose every op
/// succeeded is `success`.
pub fn aggregate_status(ops: &[OpRecord]) -> Status {
    debug_assert!(!ops.is_empty());
    let mut status = Status::Queued;
    let mut all_success = true;
    for op in ops {
        if op.status == Status::Success {
            continue;
        }
        all_success = false;
        match op.status {
            Status::Queued => {}
            Status::Waiting => status = Status::Waiting,
            Status::Running => status = Status::Running,
            Status::Canceling => return Status::Canceling,
            Status::Canceled => return Status::Canceled,
            Status::Error => return Status::Error,
            Status::Success => unreachable!(),
        }
    }
    if all_success {
        Status::Success
    } else {
        status
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [Status; 7] = [
        Status::Queued,
        Status::Waiting,
        Status::Running,
        Status::Canceling,
        Status::Canceled,
        Status::Success,
        Status::Error,
    ];

    fn ops_with(statuses: &[Status]) -> Vec<OpRecord> {
        statuses
            .iter()
            .map(|s| {
                let mut op = OpRecord::new("noop".to_string(), None, BTreeMap::new());
                op.status = *s;
                op
            })
            .collect()
    }

    // Independent restatement of the aggregate rule, checked against the
    // implementation over every three-op status combination.
    fn expected_aggregate(statuses: &[Status]) -> Status {
        if let Some(decider) = statuses
            .iter()
            .find(|s| matches!(s, Status::Canceling | Status::Canceled | Status::Error))
        {
            return *decider;
        }
        if let Some(progress) = statuses
            .iter()
            .rev()
            .find(|s| matches!(s, Status::Waiting | Status::Running))
        {
            return *progress;
        }
        if statuses.iter().all(|s| *s == Status::Success) {
            Status::Success
        } else {
            Status::Queued
        }
    }

    #[test]
    fn aggregate_matches_rule_for_all_combinations() {
        for a in ALL {
            for b in ALL {
                for c in ALL {
                    let statuses = [a, b, c];
                    assert_eq!(
                        aggregate_status(&ops_with(&statuses)),
                        expected_aggregate(&statuses),
                        "combination {statuses:?}"
                    );
                }
            }
        }
    }

    #[test]
    fn aggregate_representative_cases() {
        let cases: &[(&[Status], Status)] = &[
            (&[Status::Queued, Status::Queued], Status::Queued),
            (&[Status::Success, Status::Queued], Status::Queued),
            (&[Status::Waiting, Status::Queued], Status::Waiting),
            (&[Status::Success, Status::Running], Status::Running),
            (&[Status::Success, Status::Success], Status::Success),
            (
                &[Status::Success, Status::Error, Status::Canceled],
                Status::Error,
            ),
            (&[Status::Canceled, Status::Canceled], Status::Canceled),
            (&[Status::Running, Status::Canceling], Status::Canceling),
        ];
        for (statuses, expected) in cases {
            assert_eq!(aggregate_status(&ops_with(statuses)), *expected);
        }
    }

    #[test]
    fn terminal_statuses_admit_no_transition() {
        for from in ALL.into_iter().filter(Status::is_terminal) {
            for to in ALL {
                assert!(
                    !Status::may_transition(from, to),
                    "{from} -> {to} must be illegal"
                );
            }
        }
    }

    #[test]
    fn canceling_only_resolves_to_canceled() {
        for to in ALL {
            assert_eq!(
                Status::may_transition(Status::Canceling, to),
                to == Status::Canceled
            );
        }
    }

    #[test]
    #[should_panic(expected = "illegal op status transition")]
    fn transitioning_a_terminal_op_panics() {
        let mut op = OpRecord::new("noop".to_string(), None, BTreeMap::new());
        op.transition(Status::Waiting);
        op.transition(Status::Running);
        op.transition(Status::Success);
        op.transition(Status::Running);
    }

    #[test]
    fn log_serials_are_strictly_increasing() {
        let mut job = JobRecord::new(1, ops_with(&[Status::Queued]), 0);
        job.add_log(10, LogKind::Message, serde_json::json!("a"));
        job.add_log(20, LogKind::Progress, serde_json::json!("b"));
        job.add_log(30, LogKind::Message, serde_json::json!("c"));
        let serials: Vec<u64> = job.log.iter().map(|e| e.serial).collect();
        assert_eq!(serials, vec![1, 2, 3]);
    }

    #[test]
    fn cancel_pending_ops_preserves_terminal_results() {
        let mut job = JobRecord::new(
            7,
            ops_with(&[Status::Success, Status::Running, Status::Queued]),
            0,
        );
        job.ops[0].result = Some(serde_json::json!("kept"));
        job.cancel_pending_ops();
        job.refresh_status();
        assert_eq!(job.ops[0].status, Status::Success);
        assert_eq!(job.ops[0].result, Some(serde_json::json!("kept")));
        assert_eq!(job.ops[1].status, Status::Canceled);
        assert_eq!(job.ops[2].status, Status::Canceled);
        assert_eq!(job.status, Status::Canceled);
    }
}
