mod test_helpers;

use serde_json::json;

use granary::job::{LogKind, Status};

use test_helpers::*;

#[tokio::test]
async fn executes_ops_in_order_and_persists_results() {
    with_timeout!(20000, {
        let (_tmp, store) = open_temp_queue().await;
        let executor = ScriptedExecutor::new_arc();
        let id = store.submit(ops(&["a", "b", "c"])).await.unwrap();

        let _scheduler = start_scheduler(&store, executor.clone());
        let record = wait_for_status(&store, id, Status::Success).await;

        assert_eq!(executor.executed_kinds(), vec!["a", "b", "c"]);
        for op in &record.ops {
            assert_eq!(op.status, Status::Success);
            assert_eq!(op.result, Some(json!({ "kind": op.kind, "done": true })));
        }
        let progress = record
            .log
            .iter()
            .filter(|e| e.kind == LogKind::Progress)
            .count();
        assert_eq!(progress, 3);
    });
}

#[tokio::test]
async fn op_failure_fails_the_job_and_cancels_the_remainder() {
    with_timeout!(20000, {
        let (_tmp, store) = open_temp_queue().await;
        let executor = ScriptedExecutor::new_arc();
        let id = store
            .submit(ops(&["a", "fail:boom", "never"]))
            .await
            .unwrap();

        let _scheduler = start_scheduler(&store, executor.clone());
        let record = wait_for_status(&store, id, Status::Error).await;

        assert_eq!(record.ops[0].status, Status::Success);
        assert_eq!(record.ops[1].status, Status::Error);
        assert_eq!(record.ops[1].result, Some(json!({ "error": "boom" })));
        assert_eq!(record.ops[2].status, Status::Canceled);
        assert!(!executor.executed_kinds().contains(&"never".to_string()));
    });
}

#[tokio::test]
async fn failing_job_does_not_stall_the_scheduler() {
    with_timeout!(20000, {
        let (_tmp, store) = open_temp_queue().await;
        let executor = ScriptedExecutor::new_arc();
        let failing = store.submit(ops(&["fail:nope"])).await.unwrap();
        let healthy = store.submit(ops(&["ok"])).await.unwrap();

        let _scheduler = start_scheduler(&store, executor.clone());
        wait_for_status(&store, failing, Status::Error).await;
        wait_for_status(&store, healthy, Status::Success).await;
    });
}

#[tokio::test]
async fn single_worker_runs_jobs_in_submission_order() {
    with_timeout!(20000, {
        let (_tmp, store) = open_temp_queue_with(|cfg| {
            cfg.workers = 1;
        })
        .await;
        let executor = ScriptedExecutor::new_arc();
        let first = store.submit(ops(&["gate"])).await.unwrap();
        let second = store.submit(ops(&["task-b"])).await.unwrap();

        let _scheduler = start_scheduler(&store, executor.clone());
        wait_for_status(&store, first, Status::Running).await;
        while executor.executed_kinds().is_empty() {
            tokio::time::sleep(std::time::Duration::from_millis(5)).await;
        }

        // With one worker the second job must not have started.
        assert_eq!(executor.executed_kinds(), vec!["gate"]);
        assert_eq!(store.fetch(second).await.unwrap().status, Status::Queued);

        executor.release_gate();
        wait_for_status(&store, first, Status::Success).await;
        wait_for_status(&store, second, Status::Success).await;
        assert_eq!(executor.executed_kinds(), vec!["gate", "task-b"]);
    });
}

#[tokio::test]
async fn jobs_run_concurrently_across_workers() {
    with_timeout!(20000, {
        let (_tmp, store) = open_temp_queue().await;
        let executor = ScriptedExecutor::new_arc();
        let blocked = store.submit(ops(&["gate"])).await.unwrap();
        let quick = store.submit(ops(&["quick"])).await.unwrap();

        let _scheduler = start_scheduler(&store, executor.clone());

        // The quick job finishes while the first is still parked.
        wait_for_status(&store, quick, Status::Success).await;
        let blocked_status = store.fetch(blocked).await.unwrap().status;
        assert!(
            matches!(blocked_status, Status::Waiting | Status::Running),
            "blocked job should still be in progress, was {blocked_status}"
        );

        executor.release_gate();
        wait_for_status(&store, blocked, Status::Success).await;
    });
}

#[tokio::test]
async fn job_canceled_before_claim_never_runs() {
    with_timeout!(20000, {
        let (_tmp, store) = open_temp_queue().await;
        let executor = ScriptedExecutor::new_arc();
        let canceled = store.submit(ops(&["a", "b"])).await.unwrap();
        store.cancel(canceled).await.unwrap();
        let witness = store.submit(ops(&["ok"])).await.unwrap();

        let _scheduler = start_scheduler(&store, executor.clone());
        wait_for_status(&store, witness, Status::Success).await;

        let record = store.fetch(canceled).await.unwrap();
        assert_eq!(record.status, Status::Canceled);
        assert!(record.ops.iter().all(|op| op.status == Status::Canceled));
        assert_eq!(executor.executed_kinds(), vec!["ok"]);
    });
}

#[tokio::test]
async fn cancel_while_running_stops_at_the_op_boundary() {
    with_timeout!(20000, {
        let (_tmp, store) = open_temp_queue().await;
        let executor = ScriptedExecutor::new_arc();
        let id = store.submit(ops(&["gate", "after"])).await.unwrap();

        let _scheduler = start_scheduler(&store, executor.clone());
        wait_for_status(&store, id, Status::Running).await;

        store.cancel(id).await.unwrap();
        // The in-flight op is allowed to finish before the job stops.
        executor.release_gate();
        let record = wait_for_status(&store, id, Status::Canceled).await;

        assert_eq!(record.ops[0].status, Status::Canceled);
        assert!(record.ops[0].result.is_some());
        assert_eq!(record.ops[1].status, Status::Canceled);
        assert_eq!(executor.executed_kinds(), vec!["gate"]);
    });
}

// Crash mid-job: op A completed, the process dies before B starts. After
// reopening, the job resumes at B; A is never re-run.
#[tokio::test]
async fn resumes_at_the_first_unfinished_op_after_a_crash() {
    with_timeout!(20000, {
        let (tmp, store) = open_temp_queue().await;
        let id = store.submit(ops(&["a", "b"])).await.unwrap();
        store
            .update(id, |job| {
                job.ops[0].transition(Status::Waiting);
                job.ops[0].transition(Status::Running);
                job.ops[0].result = Some(json!({ "kind": "a", "done": true }));
                job.ops[0].transition(Status::Success);
                job.ops[1].transition(Status::Waiting);
            })
            .await
            .unwrap();
        drop(store);

        let store = reopen_queue(&tmp).await;
        let executor = ScriptedExecutor::new_arc();
        let _scheduler = start_scheduler(&store, executor.clone());

        let record = wait_for_status(&store, id, Status::Success).await;
        assert_eq!(executor.executed_kinds(), vec!["b"]);
        assert_eq!(record.ops[0].result, Some(json!({ "kind": "a", "done": true })));
        assert_eq!(record.ops[1].status, Status::Success);
    });
}
