//! End-to-end scheduler scenarios driven through mocked seams.

use std::{
    collections::{BTreeMap, BTreeSet},
    sync::Arc,
    time::Duration,
};

use config::{RepairLockType, RepairOptions};
use repair_db::{JobId, JobStatus};
use topology::{
    NodeId, ReplicationState as _, TableReference, TokenMapHash, TokenRange,
    test_utils::StaticReplicationState,
};
use uuid::Uuid;

use super::mocks::{MockLockFactory, MockRunner, MockStore, SharedStoreState, wait_until};
use crate::{
    NoOpHistorySink, NoOpMetrics, OnDemandRepairScheduler, RepairOutcome, ScheduleJobError,
    ScheduleManager, SchedulerDependencies, store::JobRecord,
};

const WAIT: Duration = Duration::from_secs(5);

struct TestDaemon {
    scheduler: OnDemandRepairScheduler,
    store_state: Arc<SharedStoreState>,
    runner: Arc<MockRunner>,
    manager: Arc<ScheduleManager>,
}

fn daemon(
    host: NodeId,
    store_state: Arc<SharedStoreState>,
    locks: Arc<MockLockFactory>,
    oracle: Arc<StaticReplicationState>,
    runner: Arc<MockRunner>,
) -> TestDaemon {
    let manager = Arc::new(ScheduleManager::new(Duration::from_millis(10)));
    let scheduler = OnDemandRepairScheduler::new(SchedulerDependencies {
        store: MockStore::new(host, store_state.clone()),
        oracle,
        runner: runner.clone(),
        locks,
        metrics: Arc::new(NoOpMetrics),
        history: Arc::new(NoOpHistorySink),
        schedule_manager: manager.clone(),
        repair_options: RepairOptions::default(),
        lock_type: RepairLockType::Vnode,
        sweep_interval: Duration::from_millis(50),
        job_retention: Duration::from_secs(30 * 24 * 60 * 60),
    });

    TestDaemon {
        scheduler,
        store_state,
        runner,
        manager,
    }
}

fn node(n: u128) -> NodeId {
    NodeId::new(Uuid::from_u128(n))
}

fn table_ref(name: &str) -> TableReference {
    TableReference::new("ks", name, Uuid::new_v4())
}

/// Installs `table` with the given ranges, replicated on every host.
fn seed_table(
    oracle: &StaticReplicationState,
    table: &TableReference,
    ranges: &[TokenRange],
    hosts: &[NodeId],
) {
    let replicas: BTreeSet<NodeId> = hosts.iter().copied().collect();
    let token_map: BTreeMap<TokenRange, BTreeSet<NodeId>> = ranges
        .iter()
        .map(|range| (*range, replicas.clone()))
        .collect();
    oracle.set_table(table.clone(), token_map, ["dc1".to_string()]);
}

fn three_ranges() -> [TokenRange; 3] {
    [
        TokenRange::new(0, 10),
        TokenRange::new(10, 20),
        TokenRange::new(20, 30),
    ]
}

#[tokio::test]
async fn happy_path_repairs_every_range_and_finishes() {
    //* Given
    let host = node(1);
    let oracle = Arc::new(StaticReplicationState::new());
    let table = table_ref("t");
    let ranges = three_ranges();
    seed_table(&oracle, &table, &ranges, &[host, node(2)]);

    let runner = MockRunner::new();
    let daemon = daemon(
        host,
        SharedStoreState::new(),
        MockLockFactory::new(),
        oracle,
        runner,
    );

    //* When
    let view = daemon
        .scheduler
        .schedule_job(table.clone())
        .await
        .expect("schedule_job should succeed");

    //* Then
    assert_eq!(view.keyspace, "ks");
    assert_eq!(view.table, "t");

    let record = daemon
        .store_state
        .get(host, view.id)
        .expect("record should be persisted");
    assert!(!record.cluster_wide);

    // All three tasks run and the job converges to finished
    let finished = wait_until(WAIT, || {
        daemon
            .store_state
            .get(host, view.id)
            .is_some_and(|record| record.status == JobStatus::Finished)
    })
    .await;
    assert!(finished, "job should finish in time");

    let record = daemon.store_state.get(host, view.id).unwrap();
    let mut repaired = record.repaired_ranges.clone();
    repaired.sort();
    assert_eq!(repaired, ranges);
    assert!(record.completed_at_ms.is_some());

    assert_eq!(daemon.runner.invocations(), ranges);

    // The finished job leaves the in-memory map
    let drained = wait_until(WAIT, || {
        daemon.scheduler.get_active_repair_jobs().is_empty()
    })
    .await;
    assert!(drained, "finished job should leave the active set");
    assert_eq!(daemon.manager.scheduled_count(), 0);
}

#[tokio::test]
async fn unknown_table_is_rejected_without_state_change() {
    //* Given
    let host = node(1);
    let oracle = Arc::new(StaticReplicationState::new());
    let known = table_ref("t");
    seed_table(&oracle, &known, &three_ranges(), &[host]);

    let daemon = daemon(
        host,
        SharedStoreState::new(),
        MockLockFactory::new(),
        oracle,
        MockRunner::new(),
    );

    //* When
    let missing = table_ref("missing");
    let result = daemon.scheduler.schedule_job(missing).await;

    //* Then
    let err = result.expect_err("unknown table must be rejected");
    assert!(matches!(err, ScheduleJobError::TableNotFound));
    assert_eq!(err.to_string(), "keyspace/table does not exist");
    assert_eq!(daemon.store_state.record_count(), 0);
    assert!(daemon.scheduler.get_active_repair_jobs().is_empty());
}

#[tokio::test]
async fn restart_adopts_persisted_job_and_skips_repaired_ranges() {
    //* Given
    let host = node(1);
    let oracle = Arc::new(StaticReplicationState::new());
    let table = table_ref("t");
    let ranges = [TokenRange::new(0, 10), TokenRange::new(10, 20)];
    seed_table(&oracle, &table, &ranges, &[host]);
    let live_hash = oracle.token_map_hash(&table).unwrap();

    // A record left behind by a previous daemon incarnation, one range done
    let store_state = SharedStoreState::new();
    let job_id = JobId::random();
    store_state.seed(JobRecord {
        host,
        job_id,
        table: table.clone(),
        token_map_hash: live_hash,
        repaired_ranges: vec![TokenRange::new(0, 10)],
        status: JobStatus::Started,
        cluster_wide: false,
        started_at_ms: chrono::Utc::now().timestamp_millis(),
        completed_at_ms: None,
    });

    //* When
    let daemon = daemon(
        host,
        store_state,
        MockLockFactory::new(),
        oracle,
        MockRunner::new(),
    );

    //* Then
    // The sweep adopts the persisted job
    let adopted = wait_until(WAIT, || {
        daemon
            .scheduler
            .get_active_repair_jobs()
            .iter()
            .any(|view| view.id == job_id)
    })
    .await;
    assert!(adopted, "persisted job should appear in the active set");

    let finished = wait_until(WAIT, || {
        daemon
            .store_state
            .get(host, job_id)
            .is_some_and(|record| record.status == JobStatus::Finished)
    })
    .await;
    assert!(finished, "adopted job should finish");

    // Only the pending range was executed
    assert_eq!(daemon.runner.invocations(), [TokenRange::new(10, 20)]);
}

#[tokio::test]
async fn topology_change_fails_persisted_job_without_dispatching_ranges() {
    //* Given
    let host = node(1);
    let oracle = Arc::new(StaticReplicationState::new());
    let table = table_ref("t");
    let ranges = [TokenRange::new(0, 10), TokenRange::new(10, 20)];
    seed_table(&oracle, &table, &ranges, &[host]);

    // The record was created under a different token map
    let store_state = SharedStoreState::new();
    let job_id = JobId::random();
    store_state.seed(JobRecord {
        host,
        job_id,
        table: table.clone(),
        token_map_hash: TokenMapHash::from_i64(0x5eed),
        repaired_ranges: vec![TokenRange::new(0, 10)],
        status: JobStatus::Started,
        cluster_wide: false,
        started_at_ms: chrono::Utc::now().timestamp_millis(),
        completed_at_ms: None,
    });

    //* When
    let daemon = daemon(
        host,
        store_state,
        MockLockFactory::new(),
        oracle,
        MockRunner::new(),
    );

    //* Then
    let failed = wait_until(WAIT, || {
        daemon
            .store_state
            .get(host, job_id)
            .is_some_and(|record| record.status == JobStatus::Failed)
    })
    .await;
    assert!(failed, "stale job should be failed by the sweep");

    assert!(
        daemon.runner.invocations().is_empty(),
        "no range of a stale job may be dispatched"
    );

    let views = daemon
        .scheduler
        .get_all_repair_jobs()
        .await
        .expect("reporting should succeed");
    let view = views
        .iter()
        .find(|view| view.id == job_id)
        .expect("failed job should still be reported");
    assert_eq!(view.status, JobStatus::Failed);
    assert!((view.completed_ratio - 0.5).abs() < f64::EPSILON);
}

#[tokio::test]
async fn cluster_wide_job_is_visible_and_adopted_across_daemons() {
    //* Given
    let host_a = node(1);
    let host_b = node(2);
    let oracle = Arc::new(StaticReplicationState::new());
    let table = table_ref("t");
    seed_table(&oracle, &table, &three_ranges(), &[host_a, host_b]);

    let store_state = SharedStoreState::new();
    let locks = MockLockFactory::new();
    // Sessions take a while, keeping the adopted facet observable in the
    // active set before it converges.
    let runner_a = MockRunner::new();
    runner_a.set_delay(Duration::from_millis(25));
    let runner_b = MockRunner::new();
    runner_b.set_delay(Duration::from_millis(25));

    let daemon_a = daemon(
        host_a,
        store_state.clone(),
        locks.clone(),
        oracle.clone(),
        runner_a,
    );
    let daemon_b = daemon(host_b, store_state.clone(), locks, oracle, runner_b);

    //* When
    let views = daemon_a
        .scheduler
        .schedule_cluster_wide_job(table.clone())
        .await
        .expect("cluster-wide scheduling should succeed");

    //* Then
    // One record per participating host, all under the same job id
    let job_id = views.first().expect("at least the local facet").id;
    assert!(views.iter().all(|view| view.id == job_id));
    assert_eq!(store_state.record_count(), 2);
    assert!(store_state.get(host_a, job_id).is_some());
    assert!(store_state.get(host_b, job_id).is_some());

    // Daemon B sees the job in cluster-wide reporting
    let reported = daemon_b
        .scheduler
        .get_all_cluster_wide_repair_jobs()
        .await
        .expect("cluster-wide reporting should succeed");
    assert!(reported.iter().any(|view| view.id == job_id));

    // Daemon B adopts only the facet it owns
    let adopted = wait_until(WAIT, || {
        daemon_b
            .scheduler
            .get_active_repair_jobs()
            .iter()
            .any(|view| view.id == job_id)
    })
    .await;
    assert!(adopted, "daemon B should adopt its facet");
    assert!(
        daemon_b
            .scheduler
            .get_active_repair_jobs()
            .iter()
            .all(|view| view.host_id == host_b),
        "daemon B only executes records it owns"
    );

    // Both facets converge
    let both_done = wait_until(WAIT, || {
        [host_a, host_b].iter().all(|host| {
            store_state
                .get(*host, job_id)
                .is_some_and(|record| record.status == JobStatus::Finished)
        })
    })
    .await;
    assert!(both_done, "both facets should finish");
}

#[tokio::test]
async fn transient_repair_failure_is_retried_until_the_range_succeeds() {
    //* Given
    let host = node(1);
    let oracle = Arc::new(StaticReplicationState::new());
    let table = table_ref("t");
    let ranges = three_ranges();
    seed_table(&oracle, &table, &ranges, &[host]);

    let runner = MockRunner::new();
    runner.script(TokenRange::new(0, 10), [RepairOutcome::Failed]);

    let daemon = daemon(
        host,
        SharedStoreState::new(),
        MockLockFactory::new(),
        oracle,
        runner,
    );

    //* When
    let view = daemon
        .scheduler
        .schedule_job(table.clone())
        .await
        .expect("schedule_job should succeed");

    //* Then
    let finished = wait_until(WAIT, || {
        daemon
            .store_state
            .get(host, view.id)
            .is_some_and(|record| record.status == JobStatus::Finished)
    })
    .await;
    assert!(finished, "job should finish despite the transient failure");

    let record = daemon.store_state.get(host, view.id).unwrap();
    let mut repaired = record.repaired_ranges.clone();
    repaired.sort();
    assert_eq!(repaired, ranges);

    assert!(
        daemon.runner.invocation_count_for(TokenRange::new(0, 10)) >= 2,
        "the failed range must have been retried"
    );
}

#[tokio::test]
async fn contended_locks_defer_tasks_without_failing_the_job() {
    //* Given
    let host = node(1);
    let oracle = Arc::new(StaticReplicationState::new());
    let table = table_ref("t");
    seed_table(&oracle, &table, &three_ranges(), &[host]);

    let locks = MockLockFactory::new();
    locks.refuse_all(true);

    let daemon = daemon(
        host,
        SharedStoreState::new(),
        locks.clone(),
        oracle,
        MockRunner::new(),
    );

    //* When
    let view = daemon
        .scheduler
        .schedule_job(table.clone())
        .await
        .expect("schedule_job should succeed");

    // Give the manager several passes while every acquisition contends
    tokio::time::sleep(Duration::from_millis(100)).await;

    //* Then
    assert!(daemon.runner.invocations().is_empty());
    let record = daemon.store_state.get(host, view.id).unwrap();
    assert_eq!(record.status, JobStatus::Started);
    assert!(
        daemon
            .scheduler
            .get_active_repair_jobs()
            .iter()
            .any(|v| v.id == view.id),
        "a contended job stays scheduled"
    );

    // Once the contention clears, the job converges
    locks.refuse_all(false);
    let finished = wait_until(WAIT, || {
        daemon
            .store_state
            .get(host, view.id)
            .is_some_and(|record| record.status == JobStatus::Finished)
    })
    .await;
    assert!(finished, "job should finish after contention clears");
    assert_eq!(locks.held_count(), 0, "all locks must be released");
}

#[tokio::test]
async fn at_most_one_repair_per_range_across_daemons() {
    //* Given
    let host_a = node(1);
    let host_b = node(2);
    let oracle = Arc::new(StaticReplicationState::new());
    let table = table_ref("t");
    let ranges = [TokenRange::new(0, 10), TokenRange::new(10, 20)];
    seed_table(&oracle, &table, &ranges, &[host_a, host_b]);

    let store_state = SharedStoreState::new();
    let locks = MockLockFactory::new();
    // One runner shared by both daemons observes global concurrency
    let runner = MockRunner::new();
    runner.set_delay(Duration::from_millis(50));

    let daemon_a = daemon(
        host_a,
        store_state.clone(),
        locks.clone(),
        oracle.clone(),
        runner.clone(),
    );
    let daemon_b = daemon(
        host_b,
        store_state.clone(),
        locks,
        oracle,
        runner.clone(),
    );

    //* When
    let view_a = daemon_a
        .scheduler
        .schedule_job(table.clone())
        .await
        .expect("daemon A should schedule");
    let view_b = daemon_b
        .scheduler
        .schedule_job(table.clone())
        .await
        .expect("daemon B should schedule");

    //* Then
    let both_done = wait_until(WAIT, || {
        store_state
            .get(host_a, view_a.id)
            .is_some_and(|record| record.status == JobStatus::Finished)
            && store_state
                .get(host_b, view_b.id)
                .is_some_and(|record| record.status == JobStatus::Finished)
    })
    .await;
    assert!(both_done, "both daemons should finish their jobs");

    assert_eq!(
        runner.max_in_flight_per_range(),
        1,
        "a range must never be repaired concurrently"
    );
}

#[tokio::test]
async fn close_deschedules_every_job() {
    //* Given
    let host = node(1);
    let oracle = Arc::new(StaticReplicationState::new());
    let table = table_ref("t");
    seed_table(&oracle, &table, &three_ranges(), &[host]);

    let locks = MockLockFactory::new();
    // Contend everything so the job cannot finish before close
    locks.refuse_all(true);

    let daemon = daemon(
        host,
        SharedStoreState::new(),
        locks,
        oracle,
        MockRunner::new(),
    );

    daemon
        .scheduler
        .schedule_job(table.clone())
        .await
        .expect("schedule_job should succeed");
    assert_eq!(daemon.scheduler.get_active_repair_jobs().len(), 1);

    //* When
    daemon.scheduler.close();

    //* Then
    assert!(daemon.scheduler.get_active_repair_jobs().is_empty());
    assert_eq!(daemon.manager.scheduled_count(), 0);
}

#[tokio::test]
async fn view_serializes_to_the_reporting_shape() {
    //* Given
    let host = node(1);
    let oracle = Arc::new(StaticReplicationState::new());
    let table = table_ref("t");
    seed_table(&oracle, &table, &three_ranges(), &[host]);

    let locks = MockLockFactory::new();
    locks.refuse_all(true); // freeze the job in its initial state

    let daemon = daemon(
        host,
        SharedStoreState::new(),
        locks,
        oracle,
        MockRunner::new(),
    );

    //* When
    let view = daemon
        .scheduler
        .schedule_job(table.clone())
        .await
        .expect("schedule_job should succeed");
    let json = serde_json::to_value(&view).expect("view should serialize");

    //* Then
    assert_eq!(json["hostId"], serde_json::json!(host.to_string()));
    assert_eq!(json["keyspace"], serde_json::json!("ks"));
    assert_eq!(json["table"], serde_json::json!("t"));
    assert_eq!(json["status"], serde_json::json!("started"));
    assert_eq!(json["completedRatio"], serde_json::json!(0.0));
    assert!(json["startTimeMs"].is_i64());
    assert!(json.get("completedTimeMs").is_none());

    let vnodes = json["virtualNodes"]
        .as_array()
        .expect("virtualNodes should be an array");
    assert_eq!(vnodes.len(), 3);
    assert_eq!(vnodes[0]["startToken"], serde_json::json!(0));
    assert_eq!(vnodes[0]["endToken"], serde_json::json!(10));
    assert_eq!(vnodes[0]["repaired"], serde_json::json!(false));
    assert!(vnodes[0]["lastRepairedAtInMs"].is_i64());
    assert!(vnodes[0]["replicas"].is_array());
}
