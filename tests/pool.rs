//! Pool scheduling and failure recovery, against fake workers.

mod common;

use common::{pool_config, FakeWorker, Script, SleepTask};
use officeconv::{EntryState, OfficeError, OfficeManager, OfficePool, PoolConfig};
use std::sync::atomic::Ordering;
use std::sync::Arc;
use std::time::{Duration, Instant};

fn pool_of(n: usize, script: &Arc<Script>, config: &PoolConfig) -> Arc<OfficePool> {
    let workers = (0..n)
        .map(|i| FakeWorker::boxed(&format!("fake-{i}"), script.clone(), &config.working_dir))
        .collect();
    Arc::new(OfficePool::new(workers, config).unwrap())
}

#[tokio::test]
async fn two_entries_run_five_jobs_at_most_two_at_a_time() {
    let dir = tempfile::tempdir().unwrap();
    let script = Script::new();
    let config = PoolConfig::builder()
        .working_dir(dir.path())
        .task_queue_timeout(Duration::from_millis(500))
        .build()
        .unwrap();
    let pool = pool_of(2, &script, &config);
    pool.start().await.unwrap();

    let first = SleepTask::new(Duration::from_millis(100));
    let jobs: Vec<_> = (0..5)
        .map(|_| {
            let pool = pool.clone();
            let mut task = first.sibling(Duration::from_millis(100));
            tokio::spawn(async move { pool.execute(&mut task).await })
        })
        .collect();

    let started = Instant::now();
    for job in futures::future::join_all(jobs).await {
        job.unwrap().unwrap();
    }
    assert_eq!(first.peak.load(Ordering::SeqCst), 2);
    // Three waves of 100 ms.
    assert!(started.elapsed() >= Duration::from_millis(300));
    assert_eq!(pool.entry_states(), vec![EntryState::Available; 2]);

    pool.stop().await.unwrap();
}

#[tokio::test]
async fn timed_out_task_restarts_the_worker_and_the_next_job_succeeds() {
    let dir = tempfile::tempdir().unwrap();
    let script = Script::new();
    let config = PoolConfig::builder()
        .working_dir(dir.path())
        .task_execution_timeout(Duration::from_millis(200))
        .build()
        .unwrap();
    let pool = pool_of(1, &script, &config);
    pool.start().await.unwrap();

    let mut stuck = SleepTask::new(Duration::from_secs(30));
    let err = pool.execute(&mut stuck).await.unwrap_err();
    assert!(matches!(err, OfficeError::ExecutionTimeout { .. }));
    assert!(stuck.aborted.load(Ordering::SeqCst));
    assert_eq!(Script::count(&script.kills), 1);
    assert_eq!(Script::count(&script.starts), 2);
    assert_eq!(pool.entry_states(), vec![EntryState::Available]);

    let mut quick = SleepTask::new(Duration::from_millis(10));
    pool.execute(&mut quick).await.unwrap();
    assert!(!quick.aborted.load(Ordering::SeqCst));

    pool.stop().await.unwrap();
}

#[tokio::test]
async fn busy_pool_reports_no_worker_available() {
    let dir = tempfile::tempdir().unwrap();
    let script = Script::new();
    let config = PoolConfig::builder()
        .working_dir(dir.path())
        .task_queue_timeout(Duration::from_millis(100))
        .build()
        .unwrap();
    let pool = pool_of(1, &script, &config);
    pool.start().await.unwrap();

    let long = {
        let pool = pool.clone();
        tokio::spawn(async move {
            let mut task = SleepTask::new(Duration::from_millis(600));
            pool.execute(&mut task).await
        })
    };
    tokio::time::sleep(Duration::from_millis(50)).await;

    let mut waiting = SleepTask::new(Duration::from_millis(10));
    let err = pool.execute(&mut waiting).await.unwrap_err();
    assert!(matches!(err, OfficeError::NoWorkerAvailable { .. }));
    assert!(err.is_capacity_error());

    long.await.unwrap().unwrap();
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn start_is_all_or_nothing() {
    let dir = tempfile::tempdir().unwrap();
    let config = pool_config(dir.path());
    let healthy = Script::new();
    let broken = Script::new();
    broken.failing_starts.store(u32::MAX, Ordering::SeqCst);

    let pool = OfficePool::new(
        vec![
            FakeWorker::boxed("healthy", healthy.clone(), dir.path()),
            FakeWorker::boxed("broken", broken.clone(), dir.path()),
        ],
        &config,
    )
    .unwrap();

    let err = pool.start().await.unwrap_err();
    assert!(matches!(err, OfficeError::Connection { .. }));
    assert!(!pool.is_running());
    assert_eq!(Script::count(&healthy.stops), 1);
    assert_eq!(pool.entry_states(), vec![EntryState::Stopped; 2]);

    let mut task = SleepTask::new(Duration::from_millis(1));
    let err = pool.execute(&mut task).await.unwrap_err();
    assert!(matches!(err, OfficeError::PoolNotRunning));
}

#[tokio::test]
async fn start_retries_before_giving_up() {
    let dir = tempfile::tempdir().unwrap();
    let config = PoolConfig::builder()
        .working_dir(dir.path())
        .start_attempts(3)
        .start_retry_delay(Duration::from_millis(10))
        .build()
        .unwrap();
    let script = Script::new();
    script.failing_starts.store(2, Ordering::SeqCst);
    let pool = pool_of(1, &script, &config);

    pool.start().await.unwrap();
    assert_eq!(Script::count(&script.starts), 3);
    pool.stop().await.unwrap();
}

#[tokio::test]
async fn cancelled_caller_leaves_a_recovered_worker() {
    let dir = tempfile::tempdir().unwrap();
    let script = Script::new();
    let config = pool_config(dir.path());
    let pool = pool_of(1, &script, &config);
    pool.start().await.unwrap();

    let mut task = SleepTask::new(Duration::from_secs(30));
    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), pool.execute(&mut task)).await;
    assert!(cancelled.is_err());

    // Recovery runs in the background; the entry comes back on its own.
    let mut quick = SleepTask::new(Duration::from_millis(1));
    pool.execute(&mut quick).await.unwrap();
    assert_eq!(Script::count(&script.kills), 1);
    assert_eq!(Script::count(&script.starts), 2);

    pool.stop().await.unwrap();
}

#[tokio::test]
async fn stopping_during_recovery_does_not_restart_the_worker() {
    let dir = tempfile::tempdir().unwrap();
    let script = Script::new();
    let config = pool_config(dir.path());
    let pool = pool_of(1, &script, &config);
    pool.start().await.unwrap();

    let mut task = SleepTask::new(Duration::from_secs(30));
    let cancelled =
        tokio::time::timeout(Duration::from_millis(50), pool.execute(&mut task)).await;
    assert!(cancelled.is_err());
    pool.stop().await.unwrap();

    // Give the background recovery every chance to run.
    tokio::time::sleep(Duration::from_millis(500)).await;
    assert_eq!(Script::count(&script.starts), 1);
    assert_eq!(pool.entry_states(), vec![EntryState::Stopped]);
    assert!(!pool.is_running());
}

#[tokio::test]
async fn losing_every_worker_fails_waiters_fast() {
    let dir = tempfile::tempdir().unwrap();
    let script = Script::new();
    let config = PoolConfig::builder()
        .working_dir(dir.path())
        .task_execution_timeout(Duration::from_millis(100))
        .task_queue_timeout(Duration::from_secs(10))
        .start_attempts(1)
        .build()
        .unwrap();
    let pool = pool_of(1, &script, &config);
    pool.start().await.unwrap();

    script.failing_starts.store(u32::MAX, Ordering::SeqCst);
    let mut stuck = SleepTask::new(Duration::from_secs(30));
    let err = pool.execute(&mut stuck).await.unwrap_err();
    assert!(matches!(err, OfficeError::WorkerLost { .. }), "{err}");
    assert_eq!(pool.entry_states(), vec![EntryState::Stopped]);

    let started = Instant::now();
    let mut next = SleepTask::new(Duration::from_millis(1));
    let err = pool.execute(&mut next).await.unwrap_err();
    assert!(matches!(err, OfficeError::NoWorkerAvailable { .. }));
    assert!(started.elapsed() < Duration::from_secs(5));

    pool.stop().await.unwrap();
}

#[tokio::test]
async fn stopped_pool_rejects_work_and_cannot_restart() {
    let dir = tempfile::tempdir().unwrap();
    let script = Script::new();
    let config = pool_config(dir.path());
    let pool = pool_of(2, &script, &config);
    pool.start().await.unwrap();
    pool.stop().await.unwrap();

    assert!(!pool.is_running());
    assert_eq!(Script::count(&script.stops), 2);
    let mut task = SleepTask::new(Duration::from_millis(1));
    assert!(matches!(
        pool.execute(&mut task).await.unwrap_err(),
        OfficeError::PoolNotRunning
    ));
    assert!(matches!(
        pool.start().await.unwrap_err(),
        OfficeError::Configuration(_)
    ));
}

#[tokio::test]
async fn worker_is_recycled_after_max_tasks() {
    let dir = tempfile::tempdir().unwrap();
    let script = Script::new();
    let config = PoolConfig::builder()
        .working_dir(dir.path())
        .max_tasks_per_worker(2)
        .build()
        .unwrap();
    let pool = pool_of(1, &script, &config);
    pool.start().await.unwrap();

    for _ in 0..5 {
        let mut task = SleepTask::new(Duration::from_millis(1));
        pool.execute(&mut task).await.unwrap();
    }
    // One initial start plus a recycle after tasks 2 and 4.
    assert_eq!(Script::count(&script.starts), 3);
    assert_eq!(Script::count(&script.stops), 2);

    pool.stop().await.unwrap();
}
