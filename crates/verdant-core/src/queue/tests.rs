//! End-to-end scheduler behavior through the public handle.

use std::sync::{Arc, Mutex};
use std::time::Duration;

use chrono::Utc;
use rstest::rstest;
use serde::{Deserialize, Serialize};
use serde_json::json;
use tokio::time::Instant;

use crate::app::QueueBuilder;
use crate::config::QueueConfig;
use crate::domain::{EntryError, EntryId, ErrorKind, EventKind, OperationError, Priority, QueueEvent};
use crate::durable::PersistedEntry;
use crate::error::QueueError;
use crate::impls::{InMemoryKeyValueStore, NetworkMonitor};
use crate::ports::KeyValueStore;
use crate::queue::{EnqueueRequest, EntryPhase, RetryQueue};
use crate::typed::Operation;

const SNAPSHOT_KEY: &str = "retry_queue";

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
struct Step {
    name: String,
    /// Attempts that fail before one succeeds.
    fail_times: u32,
    /// Fail with a validation error instead of a network one.
    fatal: bool,
    work_ms: u64,
    panic: bool,
}

impl Operation for Step {
    const KEY: &'static str = "test.step.v1";
    type Output = String;
}

type CallLog = Arc<Mutex<Vec<(String, Duration)>>>;

async fn run_step(step: Step, log: CallLog, start: Instant) -> Result<String, OperationError> {
    let attempt = {
        let mut log = log.lock().unwrap();
        log.push((step.name.clone(), start.elapsed()));
        log.iter().filter(|(name, _)| *name == step.name).count() as u32
    };
    if step.work_ms > 0 {
        tokio::time::sleep(Duration::from_millis(step.work_ms)).await;
    }
    if step.panic {
        panic!("step {} blew up", step.name);
    }
    if attempt <= step.fail_times {
        return Err(if step.fatal {
            OperationError::validation(format!("{} rejected", step.name))
        } else {
            OperationError::network(format!("{} unreachable", step.name))
        });
    }
    Ok(format!("{} done", step.name))
}

fn step(name: &str) -> Step {
    Step {
        name: name.to_string(),
        ..Default::default()
    }
}

fn failing(name: &str, fail_times: u32) -> Step {
    Step {
        fail_times,
        ..step(name)
    }
}

fn request(step: Step) -> EnqueueRequest {
    let id = step.name.clone();
    EnqueueRequest::for_operation(&step).unwrap().with_id(id)
}

struct Harness {
    queue: RetryQueue,
    kv: Arc<InMemoryKeyValueStore>,
    monitor: Arc<NetworkMonitor>,
    log: CallLog,
}

impl Harness {
    async fn start(config: QueueConfig) -> Self {
        Self::start_with(config, true, Arc::new(InMemoryKeyValueStore::new()), |b| b).await
    }

    async fn start_with(
        config: QueueConfig,
        online: bool,
        kv: Arc<InMemoryKeyValueStore>,
        customize: impl FnOnce(QueueBuilder) -> QueueBuilder,
    ) -> Self {
        let monitor = Arc::new(NetworkMonitor::new(online));
        let log: CallLog = Arc::new(Mutex::new(Vec::new()));
        let start = Instant::now();
        let handler_log = log.clone();
        let builder = QueueBuilder::new()
            .config(config)
            .register_fn(move |step: Step| run_step(step, handler_log.clone(), start))
            .unwrap()
            .store(kv.clone())
            .connectivity(monitor.clone());
        let queue = customize(builder).spawn().await.unwrap();
        Self {
            queue,
            kv,
            monitor,
            log,
        }
    }

    fn calls(&self) -> Vec<String> {
        self.log.lock().unwrap().iter().map(|(name, _)| name.clone()).collect()
    }

    fn call_times(&self, name: &str) -> Vec<Duration> {
        self.log
            .lock()
            .unwrap()
            .iter()
            .filter(|(n, _)| n == name)
            .map(|(_, at)| *at)
            .collect()
    }

    async fn snapshot_ids(&self) -> Vec<String> {
        self.queue.flush().await.unwrap();
        match self.kv.raw(SNAPSHOT_KEY).await {
            Some(raw) => serde_json::from_str::<Vec<PersistedEntry>>(&raw)
                .unwrap()
                .into_iter()
                .map(|e| e.id.to_string())
                .collect(),
            None => Vec::new(),
        }
    }
}

fn config() -> QueueConfig {
    QueueConfig::default()
}

#[rstest]
#[case(vec![Priority::Low, Priority::High, Priority::Critical], vec!["critical", "high", "low"])]
#[case(vec![Priority::Medium, Priority::Low, Priority::Critical, Priority::High], vec!["critical", "high", "medium", "low"])]
#[case(vec![Priority::Low, Priority::Low, Priority::High], vec!["high", "low", "low-1"])]
#[tokio::test(start_paused = true)]
async fn higher_tiers_dispatch_first(#[case] admitted: Vec<Priority>, #[case] expected: Vec<&str>) {
    let h = Harness::start_with(config(), false, Arc::new(InMemoryKeyValueStore::new()), |b| b).await;

    let mut completions = Vec::new();
    let mut seen = std::collections::HashSet::new();
    for priority in admitted {
        let mut name = priority.as_str().to_string();
        if !seen.insert(name.clone()) {
            name = format!("{name}-1");
        }
        let (_, done) = h
            .queue
            .enqueue_tracked(request(step(&name)).with_priority(priority))
            .await
            .unwrap();
        completions.push(done);
    }

    h.monitor.set_online(true);
    for done in completions {
        done.wait().await.unwrap();
    }
    assert_eq!(h.calls(), expected);
}

#[tokio::test(start_paused = true)]
async fn reenqueue_of_live_id_is_idempotent() {
    let h = Harness::start_with(config(), false, Arc::new(InMemoryKeyValueStore::new()), |b| b).await;

    let first = h.queue.enqueue(request(step("water-fern"))).await.unwrap();
    let (second, done) = h
        .queue
        .enqueue_tracked(request(step("water-fern")).with_priority(Priority::Critical))
        .await
        .unwrap();

    assert_eq!(first, second);
    let stats = h.queue.stats().await.unwrap();
    assert_eq!(stats.total, 1);
    assert_eq!(stats.count(Priority::Medium), 1);
    assert_eq!(h.queue.status(&first).await.unwrap().unwrap().attempts, 0);

    h.monitor.set_online(true);
    assert_eq!(done.wait().await, Ok(json!("water-fern done")));
    assert_eq!(h.calls(), vec!["water-fern"]);
}

#[tokio::test(start_paused = true)]
async fn failures_back_off_and_error_fires_once() {
    let h = Harness::start(config()).await;
    let (_sub, mut events) = h.queue.events();
    let errors = Arc::new(Mutex::new(Vec::new()));
    let seen = errors.clone();

    let (id, done) = h
        .queue
        .enqueue_tracked(
            request(failing("sync-journal", u32::MAX))
                .with_max_retries(3)
                .on_error(move |e| seen.lock().unwrap().push(e.clone())),
        )
        .await
        .unwrap();

    let result = done.wait().await;
    assert!(matches!(result, Err(EntryError::Exhausted { attempts: 3, .. })));
    assert_eq!(
        h.call_times("sync-journal"),
        vec![Duration::ZERO, Duration::from_millis(1000), Duration::from_millis(3000)]
    );
    assert_eq!(errors.lock().unwrap().len(), 1);
    assert!(h.queue.status(&id).await.unwrap().is_none());

    let mut retries = Vec::new();
    let mut terminal_errors = 0;
    while let Ok(event) = events.try_recv() {
        match event {
            QueueEvent::Retry { attempt, .. } => retries.push(attempt),
            QueueEvent::Error { queue_size, .. } => {
                terminal_errors += 1;
                assert_eq!(queue_size, 0);
            }
            _ => {}
        }
    }
    assert_eq!(retries, vec![1, 2, 3]);
    assert_eq!(terminal_errors, 1);
}

#[tokio::test(start_paused = true)]
async fn backoff_wait_does_not_block_other_entries() {
    let h = Harness::start(config()).await;

    let (_, slow) = h
        .queue
        .enqueue_tracked(request(failing("upload-photo", 1)).with_priority(Priority::High))
        .await
        .unwrap();
    let (_, fast) = h
        .queue
        .enqueue_tracked(request(step("fetch-weather")).with_priority(Priority::Low))
        .await
        .unwrap();

    fast.wait().await.unwrap();
    slow.wait().await.unwrap();

    assert_eq!(h.calls(), vec!["upload-photo", "fetch-weather", "upload-photo"]);
    assert_eq!(h.call_times("fetch-weather"), vec![Duration::ZERO]);
    assert_eq!(h.call_times("upload-photo")[1], Duration::from_millis(1000));
}

#[tokio::test(start_paused = true)]
async fn delay_override_replaces_the_formula() {
    let h = Harness::start(config()).await;
    let (_, done) = h
        .queue
        .enqueue_tracked(request(failing("save-plant", 2)).with_delay(Duration::from_millis(250)))
        .await
        .unwrap();

    done.wait().await.unwrap();
    assert_eq!(
        h.call_times("save-plant"),
        vec![Duration::ZERO, Duration::from_millis(250), Duration::from_millis(500)]
    );
}

#[tokio::test(start_paused = true)]
async fn volatile_entries_never_reach_storage() {
    let h = Harness::start_with(config(), false, Arc::new(InMemoryKeyValueStore::new()), |b| b).await;

    let (_, durable) = h.queue.enqueue_tracked(request(step("save-plant"))).await.unwrap();
    let (_, volatile) = h
        .queue
        .enqueue_tracked(request(step("refresh-feed")).volatile())
        .await
        .unwrap();

    assert_eq!(h.snapshot_ids().await, vec!["save-plant"]);

    h.monitor.set_online(true);
    durable.wait().await.unwrap();
    volatile.wait().await.unwrap();
    assert!(h.snapshot_ids().await.is_empty());
    assert_eq!(h.kv.raw(SNAPSHOT_KEY).await, None);
}

#[tokio::test(start_paused = true)]
async fn pending_retry_is_persisted_with_attempts() {
    let h = Harness::start(config()).await;
    let (id, _done) = h
        .queue
        .enqueue_tracked(request(failing("log-mood", 5)).with_max_retries(5))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    h.queue.flush().await.unwrap();
    let raw = h.kv.raw(SNAPSHOT_KEY).await.unwrap();
    let entries: Vec<PersistedEntry> = serde_json::from_str(&raw).unwrap();
    assert_eq!(entries.len(), 1);
    assert_eq!(entries[0].id, id);
    assert_eq!(entries[0].attempts, 1);
    assert!(entries[0].last_attempt.is_some());
    assert_eq!(entries[0].operation_key, Step::KEY);
}

fn persisted(id: &str, attempts: u32, max_retries: u32, age: chrono::Duration) -> PersistedEntry {
    let now = Utc::now();
    PersistedEntry {
        id: EntryId::new(id),
        priority: Priority::Medium,
        attempts,
        last_attempt: (attempts > 0).then(|| now - chrono::Duration::seconds(10)),
        max_retries,
        delay: None,
        dependencies: vec![],
        operation_key: Step::KEY.to_string(),
        operation_data: serde_json::to_value(step(id)).unwrap(),
        created_at: now - age,
    }
}

#[tokio::test(start_paused = true)]
async fn reload_filters_and_keeps_attempts() {
    let kv = Arc::new(InMemoryKeyValueStore::new());
    let mut ghost = persisted("ghost", 0, 3, chrono::Duration::minutes(1));
    ghost.operation_key = "plants.delete.v0".to_string();
    let snapshot = vec![
        persisted("keep", 1, 3, chrono::Duration::minutes(5)),
        persisted("stale", 0, 3, chrono::Duration::hours(25)),
        ghost,
        persisted("spent", 3, 3, chrono::Duration::minutes(1)),
    ];
    kv.set(SNAPSHOT_KEY, serde_json::to_string(&snapshot).unwrap())
        .await
        .unwrap();

    let h = Harness::start_with(config(), false, kv, |b| b).await;

    let keep = h.queue.status(&EntryId::new("keep")).await.unwrap().unwrap();
    assert_eq!(keep.attempts, 1);
    assert_eq!(keep.max_retries, 3);
    // Its last attempt never reported back, so it gets that attempt again.
    let spent = h.queue.status(&EntryId::new("spent")).await.unwrap().unwrap();
    assert_eq!(spent.attempts, 2);
    assert_eq!(spent.phase, EntryPhase::Queued);
    for gone in ["stale", "ghost"] {
        assert!(h.queue.status(&EntryId::new(gone)).await.unwrap().is_none(), "{gone}");
    }
    let mut ids = h.snapshot_ids().await;
    ids.sort();
    assert_eq!(ids, vec!["keep", "spent"]);

    // Re-enqueueing a restored id attaches a completion to it.
    let (_, keep_done) = h.queue.enqueue_tracked(request(step("keep"))).await.unwrap();
    let (_, spent_done) = h.queue.enqueue_tracked(request(step("spent"))).await.unwrap();
    h.monitor.set_online(true);
    assert_eq!(keep_done.wait().await, Ok(json!("keep done")));
    assert_eq!(spent_done.wait().await, Ok(json!("spent done")));
    assert_eq!(h.calls(), vec!["keep", "spent"]);
}

#[tokio::test(start_paused = true)]
async fn interrupted_final_attempt_runs_again_after_restart() {
    let kv = Arc::new(InMemoryKeyValueStore::new());
    let entry = persisted("save-once", 1, 1, chrono::Duration::minutes(1));
    kv.set(SNAPSHOT_KEY, serde_json::to_string(&vec![entry]).unwrap())
        .await
        .unwrap();

    let h = Harness::start_with(config(), true, kv, |b| b).await;
    tokio::time::sleep(Duration::from_secs(60)).await;

    assert_eq!(h.calls(), vec!["save-once"]);
    assert_eq!(h.call_times("save-once"), vec![Duration::ZERO]);
    assert!(h.snapshot_ids().await.is_empty());
}

#[tokio::test(start_paused = true)]
async fn restored_entry_waits_out_its_backoff() {
    let kv = Arc::new(InMemoryKeyValueStore::new());
    let mut entry = persisted("water-cactus", 2, 5, chrono::Duration::minutes(1));
    entry.last_attempt = Some(Utc::now());
    kv.set(SNAPSHOT_KEY, serde_json::to_string(&vec![entry]).unwrap())
        .await
        .unwrap();

    let h = Harness::start_with(config(), true, kv, |b| b).await;
    let status = h
        .queue
        .status(&EntryId::new("water-cactus"))
        .await
        .unwrap()
        .unwrap();
    match status.phase {
        EntryPhase::Waiting { retry_in } => {
            assert!(retry_in > Duration::from_millis(1500), "{retry_in:?}");
            assert!(retry_in <= Duration::from_millis(2000), "{retry_in:?}");
        }
        other => panic!("expected waiting, got {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn dependent_waits_for_later_enqueued_prerequisite() {
    let h = Harness::start(config()).await;

    let (dependent, child) = h
        .queue
        .enqueue_tracked(request(step("tag-photo")).depends_on("upload-photo"))
        .await
        .unwrap();
    assert_eq!(
        h.queue.status(&dependent).await.unwrap().unwrap().phase,
        EntryPhase::Blocked
    );

    let (_, parent) = h
        .queue
        .enqueue_tracked(request(failing("upload-photo", 1)).with_priority(Priority::Low))
        .await
        .unwrap();

    parent.wait().await.unwrap();
    child.wait().await.unwrap();
    assert_eq!(h.calls(), vec!["upload-photo", "upload-photo", "tag-photo"]);
}

#[tokio::test(start_paused = true)]
async fn failed_prerequisite_cascades_to_dependents() {
    let h = Harness::start(config()).await;
    let (_sub, mut events) = h.queue.events();

    let (_, child) = h
        .queue
        .enqueue_tracked(request(step("tag-photo")).depends_on("upload-photo"))
        .await
        .unwrap();
    let (_, grandchild) = h
        .queue
        .enqueue_tracked(request(step("share-photo")).depends_on("tag-photo"))
        .await
        .unwrap();
    let (_, parent) = h
        .queue
        .enqueue_tracked(request(failing("upload-photo", u32::MAX)).with_max_retries(2))
        .await
        .unwrap();

    assert!(matches!(parent.wait().await, Err(EntryError::Exhausted { attempts: 2, .. })));
    let upload = EntryId::new("upload-photo");
    assert_eq!(
        child.wait().await,
        Err(EntryError::DependencyFailed { dependency: upload.clone() })
    );
    assert_eq!(
        grandchild.wait().await,
        Err(EntryError::DependencyFailed { dependency: upload })
    );
    assert_eq!(h.calls(), vec!["upload-photo", "upload-photo"]);
    assert_eq!(h.queue.stats().await.unwrap().total, 0);

    let mut failed = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let QueueEvent::Error { id, .. } = event {
            failed.push(id.to_string());
        }
    }
    assert_eq!(failed, vec!["upload-photo", "tag-photo", "share-photo"]);
}

#[tokio::test(start_paused = true)]
async fn dependent_of_recently_failed_entry_is_cancelled_on_admission() {
    let h = Harness::start(config()).await;
    let (_, parent) = h
        .queue
        .enqueue_tracked(request(failing("save-plant", 1).fatal()).with_max_retries(1))
        .await
        .unwrap();
    assert!(parent.wait().await.is_err());

    let (_, child) = h
        .queue
        .enqueue_tracked(request(step("schedule-reminder")).depends_on("save-plant"))
        .await
        .unwrap();
    assert!(matches!(
        child.wait().await,
        Err(EntryError::DependencyFailed { .. })
    ));
    assert_eq!(h.calls(), vec!["save-plant"]);
}

#[tokio::test(start_paused = true)]
async fn dequeued_prerequisite_cancels_its_dependents() {
    let h = Harness::start_with(config(), false, Arc::new(InMemoryKeyValueStore::new()), |b| b).await;
    let (_sub, mut events) = h.queue.events();

    let (parent, parent_done) = h.queue.enqueue_tracked(request(step("upload-photo"))).await.unwrap();
    let (_, child) = h
        .queue
        .enqueue_tracked(request(step("tag-photo")).depends_on("upload-photo"))
        .await
        .unwrap();

    assert!(h.queue.dequeue(&parent).await.unwrap());
    assert_eq!(parent_done.wait().await, Err(EntryError::Cancelled));
    let error = child.wait().await.unwrap_err();
    assert_eq!(error, EntryError::DependencyFailed { dependency: parent });
    assert!(error.to_string().contains("was cancelled"), "{error}");

    h.monitor.set_online(true);
    tokio::time::sleep(Duration::from_secs(1)).await;
    assert!(h.calls().is_empty());

    let mut seen = Vec::new();
    while let Ok(event) = events.try_recv() {
        match event {
            QueueEvent::Dequeued { id, .. } => seen.push(format!("dequeued {id}")),
            QueueEvent::Error { id, .. } => seen.push(format!("error {id}")),
            _ => {}
        }
    }
    assert_eq!(seen, vec!["dequeued upload-photo", "error tag-photo"]);
}

#[tokio::test(start_paused = true)]
async fn unknown_dependency_is_released_after_admission_window() {
    let h = Harness::start(config()).await;
    let (_, done) = h
        .queue
        .enqueue_tracked(request(step("tag-photo")).depends_on("never-enqueued"))
        .await
        .unwrap();

    done.wait().await.unwrap();
    assert_eq!(h.call_times("tag-photo"), vec![Duration::from_secs(30)]);
}

#[tokio::test(start_paused = true)]
async fn dependency_cycles_are_rejected() {
    let h = Harness::start_with(config(), false, Arc::new(InMemoryKeyValueStore::new()), |b| b).await;
    h.queue
        .enqueue(request(step("a")).depends_on("b"))
        .await
        .unwrap();

    let result = h.queue.enqueue(request(step("b")).depends_on("a")).await;
    assert!(matches!(result, Err(QueueError::DependencyCycle(_))));
    assert_eq!(h.queue.stats().await.unwrap().total, 1);
}

#[tokio::test(start_paused = true)]
async fn offline_holds_dispatch_until_reconnect() {
    let h = Harness::start_with(config(), false, Arc::new(InMemoryKeyValueStore::new()), |b| b).await;
    let (_, done) = h.queue.enqueue_tracked(request(step("fetch-weather"))).await.unwrap();

    tokio::time::sleep(Duration::from_millis(5500)).await;
    assert!(h.calls().is_empty());

    h.monitor.set_online(true);
    done.wait().await.unwrap();
    assert_eq!(h.call_times("fetch-weather"), vec![Duration::from_millis(5500)]);
}

#[tokio::test(start_paused = true)]
async fn dequeue_in_flight_discards_late_result() {
    let h = Harness::start(config()).await;
    let (_sub, mut events) = h.queue.events();

    let slow = Step {
        work_ms: 10_000,
        ..step("export-journal")
    };
    let (id, done) = h.queue.enqueue_tracked(request(slow)).await.unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert_eq!(
        h.queue.status(&id).await.unwrap().unwrap().phase,
        EntryPhase::Processing
    );

    assert!(h.queue.dequeue(&id).await.unwrap());
    assert!(!h.queue.cancel(&id).await.unwrap());
    assert_eq!(done.wait().await, Err(EntryError::Cancelled));

    // The slot is released at once.
    let (_, next) = h.queue.enqueue_tracked(request(step("save-plant"))).await.unwrap();
    next.wait().await.unwrap();
    assert_eq!(h.call_times("save-plant"), vec![Duration::from_millis(10)]);

    tokio::time::sleep(Duration::from_secs(15)).await;
    let mut successes = Vec::new();
    while let Ok(event) = events.try_recv() {
        if let QueueEvent::Success { id, .. } = event {
            successes.push(id.to_string());
        }
    }
    assert_eq!(successes, vec!["save-plant"]);
}

#[tokio::test(start_paused = true)]
async fn storage_failures_do_not_change_outcomes() {
    let kv = Arc::new(InMemoryKeyValueStore::new());
    kv.set_fail_writes(true);
    let h = Harness::start_with(config(), true, kv, |b| b).await;

    let (_, done) = h
        .queue
        .enqueue_tracked(request(failing("save-plant", 1)))
        .await
        .unwrap();
    assert_eq!(done.wait().await, Ok(json!("save-plant done")));
    assert_eq!(h.kv.raw(SNAPSHOT_KEY).await, None);
}

#[tokio::test(start_paused = true)]
async fn retry_predicate_settles_permanent_errors_early() {
    let h = Harness::start_with(
        config(),
        true,
        Arc::new(InMemoryKeyValueStore::new()),
        |b| b.retry_if(OperationError::is_transient),
    )
    .await;

    let (_, done) = h
        .queue
        .enqueue_tracked(request(failing("save-plant", u32::MAX).fatal()).with_max_retries(5))
        .await
        .unwrap();

    match done.wait().await {
        Err(EntryError::NonRetryable { attempts, source }) => {
            assert_eq!(attempts, 1);
            assert_eq!(source.kind(), ErrorKind::Validation);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn retry_now_skips_the_backoff_wait() {
    let h = Harness::start(config().with_base_delay(Duration::from_secs(20))).await;
    let (id, done) = h
        .queue
        .enqueue_tracked(request(failing("fetch-weather", 1)))
        .await
        .unwrap();

    tokio::time::sleep(Duration::from_millis(100)).await;
    let status = h.queue.status(&id).await.unwrap().unwrap();
    assert!(matches!(status.phase, EntryPhase::Waiting { .. }));
    assert_eq!(status.attempts, 1);
    assert_eq!(
        status.last_error,
        Some(OperationError::network("fetch-weather unreachable"))
    );
    assert!(h.queue.retry_now(&id).await.unwrap());

    done.wait().await.unwrap();
    assert_eq!(h.call_times("fetch-weather")[1], Duration::from_millis(100));
}

#[tokio::test(start_paused = true)]
async fn panicking_operation_counts_as_a_failed_attempt() {
    let h = Harness::start(config()).await;
    let boom = Step {
        panic: true,
        ..step("crash")
    };
    let (_, done) = h
        .queue
        .enqueue_tracked(request(boom).with_max_retries(1))
        .await
        .unwrap();

    match done.wait().await {
        Err(EntryError::Exhausted { attempts: 1, source }) => {
            assert_eq!(source.kind(), ErrorKind::Internal);
        }
        other => panic!("unexpected {other:?}"),
    }
}

#[tokio::test(start_paused = true)]
async fn panicking_listeners_do_not_stop_the_scheduler() {
    let h = Harness::start(config()).await;
    let _crash = h.queue.subscribe(EventKind::Success, |_| panic!("ui listener crashed"));

    let (_, done) = h
        .queue
        .enqueue_tracked(request(step("water-fern")).on_success(|_| panic!("toast crashed")))
        .await
        .unwrap();
    assert_eq!(done.wait().await, Ok(json!("water-fern done")));

    let (_, next) = h.queue.enqueue_tracked(request(step("mist-orchid"))).await.unwrap();
    assert_eq!(next.wait().await, Ok(json!("mist-orchid done")));
    assert_eq!(h.queue.stats().await.unwrap().total, 0);
    assert_eq!(h.calls(), vec!["water-fern", "mist-orchid"]);
}

#[tokio::test(start_paused = true)]
async fn invalid_requests_are_rejected() {
    let h = Harness::start(config()).await;

    let unknown = h
        .queue
        .enqueue(EnqueueRequest::raw("plants.delete.v0", json!({})))
        .await;
    assert!(matches!(unknown, Err(QueueError::UnknownOperation(key)) if key == "plants.delete.v0"));

    let zero = h.queue.enqueue(request(step("a")).with_max_retries(0)).await;
    assert!(matches!(zero, Err(QueueError::InvalidRequest(_))));
}

#[tokio::test(start_paused = true)]
async fn concurrency_limit_allows_parallel_attempts() {
    let h = Harness::start(config().with_max_concurrent(2)).await;
    let mut completions = Vec::new();
    for name in ["a", "b", "c"] {
        let slow = Step {
            work_ms: 1000,
            ..step(name)
        };
        completions.push(h.queue.enqueue_tracked(request(slow)).await.unwrap().1);
    }
    for done in completions {
        done.wait().await.unwrap();
    }
    assert_eq!(h.call_times("a"), vec![Duration::ZERO]);
    assert_eq!(h.call_times("b"), vec![Duration::ZERO]);
    assert_eq!(h.call_times("c"), vec![Duration::from_millis(1000)]);
}

#[tokio::test(start_paused = true)]
async fn shutdown_closes_the_handle() {
    let h = Harness::start(config()).await;
    h.queue.shutdown().await.unwrap();
    let result = h.queue.enqueue(request(step("late"))).await;
    assert!(matches!(result, Err(QueueError::Closed)));
}

impl Step {
    fn fatal(mut self) -> Self {
        self.fatal = true;
        self
    }
}
