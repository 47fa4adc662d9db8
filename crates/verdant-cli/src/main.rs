use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::error::Error;
use std::sync::Arc;
use std::sync::atomic::{AtomicU32, Ordering};
use tokio::time::{Duration, sleep};
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;

use verdant_core::backoff::{BackoffConfig, BackoffController};
use verdant_core::impls::{FileKeyValueStore, NetworkMonitor};
use verdant_core::ports::Connectivity;
use verdant_core::{
    EnqueueRequest, Handler, Operation, OperationError, Priority, QueueBuilder, QueueConfig,
};

#[derive(Debug, Serialize, Deserialize)]
struct SavePlant {
    plant_id: u32,
    nickname: String,
}

impl Operation for SavePlant {
    const KEY: &'static str = "plants.save.v1";
    type Output = u32;
}

#[derive(Debug, Serialize, Deserialize)]
struct FetchWeather {
    city: String,
}

impl Operation for FetchWeather {
    const KEY: &'static str = "weather.fetch.v1";
    type Output = String;
}

#[derive(Debug, Serialize, Deserialize)]
struct LogMood {
    plant_id: u32,
    mood: String,
}

impl Operation for LogMood {
    const KEY: &'static str = "journal.mood.v1";
    type Output = ();
}

/// Pretends the plant API times out a few times before accepting the save.
struct SavePlantHandler {
    remaining_failures: AtomicU32,
}

impl SavePlantHandler {
    fn new(n: u32) -> Self {
        Self {
            remaining_failures: AtomicU32::new(n),
        }
    }
}

#[async_trait]
impl Handler<SavePlant> for SavePlantHandler {
    async fn handle(&self, op: SavePlant) -> Result<u32, OperationError> {
        let left = self.remaining_failures.load(Ordering::Relaxed);
        if left > 0 {
            self.remaining_failures.fetch_sub(1, Ordering::Relaxed);
            return Err(OperationError::timeout(format!("plant api timed out (left={left})")));
        }
        info!(plant_id = op.plant_id, nickname = %op.nickname, "plant saved");
        Ok(op.plant_id)
    }
}

fn init_tracing() {
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .try_init();
}

async fn load_config() -> Result<QueueConfig, Box<dyn Error>> {
    match std::env::args().nth(1) {
        Some(path) => {
            info!(%path, "loading queue config");
            Ok(QueueConfig::from_json_file(path).await?)
        }
        None => Ok(QueueConfig::default().with_base_delay(Duration::from_millis(200))),
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn Error>> {
    init_tracing();

    // (A) Ports: file-backed storage and a connectivity switch we can flip.
    let config = load_config().await?;
    let data_dir = std::env::var("VERDANT_DATA_DIR").unwrap_or_else(|_| "verdant-data".to_string());
    let store = Arc::new(FileKeyValueStore::open(&data_dir).await?);
    let monitor = Arc::new(NetworkMonitor::offline());

    // (B) Register operations, then rehydrate and start the scheduler.
    let queue = QueueBuilder::new()
        .config(config)
        .register::<SavePlant, _>(SavePlantHandler::new(2))?
        .register_fn(|op: FetchWeather| async move {
            Ok::<_, OperationError>(format!("sunny in {}", op.city))
        })?
        .register_fn(|op: LogMood| async move {
            info!(plant_id = op.plant_id, mood = %op.mood, "mood logged");
            Ok::<_, OperationError>(())
        })?
        .expect_operations(&[SavePlant::KEY, FetchWeather::KEY, LogMood::KEY])
        .retry_if(OperationError::is_transient)
        .store(store)
        .connectivity(monitor.clone())
        .spawn()
        .await?;

    let _events = queue.subscribe_all(|event| {
        info!(kind = ?event.kind(), entry_id = %event.id(), queue_size = event.queue_size(), "queue event");
    });

    // (C) Enqueue while offline: nothing dispatches yet.
    let save = SavePlant {
        plant_id: 7,
        nickname: "Fernando".to_string(),
    };
    let (save_id, saved) = queue
        .enqueue_tracked(
            EnqueueRequest::for_operation(&save)?
                .with_id("save-plant-7")
                .with_priority(Priority::High),
        )
        .await?;
    let (_, mood) = queue
        .enqueue_tracked(
            EnqueueRequest::for_operation(&LogMood {
                plant_id: 7,
                mood: "thriving".to_string(),
            })?
            .depends_on(save_id.clone()),
        )
        .await?;
    let (_, weather) = queue
        .enqueue_tracked(
            EnqueueRequest::for_operation(&FetchWeather {
                city: "Lisbon".to_string(),
            })?
            .with_priority(Priority::Low)
            .volatile(),
        )
        .await?;
    info!(stats = ?queue.stats().await?, "queued while offline");

    // (D) Come back online; the scheduler resumes immediately.
    sleep(Duration::from_millis(300)).await;
    monitor.set_online(true);

    match saved.wait().await {
        Ok(plant) => info!(%plant, "save finished"),
        Err(e) => warn!(error = %e, "save failed"),
    }
    match mood.wait().await {
        Ok(_) => info!("mood logged after save"),
        Err(e) if e.is_dependency_failure() => warn!(error = %e, "mood entry skipped"),
        Err(e) => warn!(error = %e, "mood entry failed"),
    }
    match weather.wait().await {
        Ok(report) => info!(%report, "weather fetched"),
        Err(e) => warn!(error = %e, "weather fetch failed"),
    }

    // (E) A one-shot screen load with the standalone backoff controller.
    let attempts = AtomicU32::new(0);
    let mut controller = BackoffController::new(
        BackoffConfig::default().with_initial_delay(Duration::from_millis(100)),
    )
    .connectivity(monitor.subscribe())
    .on_retry(|attempt, delay| info!(attempt, delay_ms = delay.as_millis() as u64, "screen load retrying"));
    let screen = controller
        .run(|_| {
            let n = attempts.fetch_add(1, Ordering::Relaxed);
            async move {
                if n == 0 {
                    Err(OperationError::network("dns lookup failed"))
                } else {
                    Ok("3 plants need water")
                }
            }
        })
        .await;
    info!(?screen, "screen data");

    info!(stats = ?queue.stats().await?, "final counts");
    queue.shutdown().await?;
    Ok(())
}
