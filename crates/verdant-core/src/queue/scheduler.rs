//! Scheduler actor: the only owner of queue state.
//!
//! External calls arrive as [`Command`]s over a channel; attempt results come
//! back over a second channel. Nothing else touches the records, so enqueue,
//! dequeue and dispatch never race.
//!
//! Selection walks tiers critical -> low and, within a tier, admission order.
//! An entry is ready when it is pending, its `next_eligible_at` has passed,
//! and every dependency has succeeded (or never existed). Backoff is a
//! per-entry timestamp plus a min-heap of wakeups, so a waiting entry never
//! holds up unrelated ones.

use std::cmp::Ordering;
use std::collections::{BTreeMap, BinaryHeap, HashMap, HashSet};
use std::sync::Arc;
use std::time::Duration;

use serde_json::Value;
use tokio::sync::{mpsc, oneshot, watch};
use tokio::time::{Instant, MissedTickBehavior};
use tracing::{debug, info, warn};

use super::dependency::DependencyGraph;
use super::record::EntryRecord;
use super::request::EnqueueRequest;
use super::retry::RetryPolicy;
use super::settled::SettledLog;
use super::state::{EntryPhase, EntryStatus, Settlement};
use crate::app::EventBus;
use crate::config::QueueConfig;
use crate::domain::{EntryError, EntryId, OperationError, QueueEvent};
use crate::durable::{PersistedEntry, Persister};
use crate::error::QueueError;
use crate::observability::QueueStats;
use crate::ports::{Clock, Connectivity};
use crate::typed::OperationRegistry;

/// Decides whether a failed attempt may be retried.
pub type RetryPredicate = Arc<dyn Fn(&OperationError) -> bool + Send + Sync>;

const IDLE_WAKE: Duration = Duration::from_secs(3600);

pub(crate) enum Command {
    Enqueue {
        request: EnqueueRequest,
        reply: oneshot::Sender<Result<EntryId, QueueError>>,
    },
    Dequeue {
        id: EntryId,
        reply: oneshot::Sender<bool>,
    },
    RetryNow {
        id: EntryId,
        reply: oneshot::Sender<bool>,
    },
    Stats {
        reply: oneshot::Sender<QueueStats>,
    },
    Status {
        id: EntryId,
        reply: oneshot::Sender<Option<EntryStatus>>,
    },
    Flush {
        reply: oneshot::Sender<()>,
    },
    Shutdown {
        reply: oneshot::Sender<()>,
    },
}

pub(crate) struct AttemptFinished {
    id: EntryId,
    seq: u64,
    result: Result<Value, OperationError>,
}

/// Pending wakeup. Reverse ordering so `BinaryHeap` pops the earliest.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
struct Wakeup {
    at: Instant,
}

impl PartialOrd for Wakeup {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for Wakeup {
    fn cmp(&self, other: &Self) -> Ordering {
        other.at.cmp(&self.at)
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
enum DependencyStatus {
    Ready,
    Blocked,
    Failed(EntryId),
}

pub(crate) struct Scheduler {
    config: QueueConfig,
    policy: RetryPolicy,
    registry: Arc<OperationRegistry>,
    clock: Arc<dyn Clock>,
    retry_if: Option<RetryPredicate>,
    bus: EventBus,
    persister: Persister,
    /// Held so the connectivity source outlives the scheduler's receiver.
    _connectivity: Arc<dyn Connectivity>,

    records: HashMap<EntryId, EntryRecord>,
    /// Per-tier admission order: seq -> id.
    tiers: [BTreeMap<u64, EntryId>; 4],
    graph: DependencyGraph,
    settled: SettledLog,
    wakeups: BinaryHeap<Wakeup>,
    /// Seqs of attempts currently holding a dispatch slot.
    in_flight: HashSet<u64>,
    next_seq: u64,
    online: bool,

    done_tx: mpsc::UnboundedSender<AttemptFinished>,
}

impl Scheduler {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: QueueConfig,
        registry: Arc<OperationRegistry>,
        clock: Arc<dyn Clock>,
        connectivity: Arc<dyn Connectivity>,
        retry_if: Option<RetryPredicate>,
        bus: EventBus,
        persister: Persister,
        done_tx: mpsc::UnboundedSender<AttemptFinished>,
    ) -> Self {
        let settled = SettledLog::new(config.settled_grace, config.settled_capacity);
        Self {
            policy: RetryPolicy::from_config(&config),
            online: connectivity.is_online(),
            config,
            registry,
            clock,
            retry_if,
            bus,
            persister,
            _connectivity: connectivity,
            records: HashMap::new(),
            tiers: Default::default(),
            graph: DependencyGraph::new(),
            settled,
            wakeups: BinaryHeap::new(),
            in_flight: HashSet::new(),
            next_seq: 0,
            done_tx,
        }
    }

    pub(crate) fn completion_channel() -> (
        mpsc::UnboundedSender<AttemptFinished>,
        mpsc::UnboundedReceiver<AttemptFinished>,
    ) {
        mpsc::unbounded_channel()
    }

    /// Re-admit persisted entries, oldest first. Returns the entries that
    /// survived, for rewriting the snapshot.
    pub(crate) fn rehydrate(&mut self, mut entries: Vec<PersistedEntry>) -> Vec<PersistedEntry> {
        entries.sort_by_key(|e| e.created_at);
        let now = Instant::now();
        let wall_now = self.clock.now();
        let mut kept = Vec::with_capacity(entries.len());

        for mut entry in entries {
            // The count is persisted before an attempt runs, so a spent budget
            // means the last attempt never reported back. Give it back.
            let interrupted = entry.attempts >= entry.max_retries;
            if interrupted {
                info!(entry_id = %entry.id, attempts = entry.attempts, "re-running interrupted final attempt");
                entry.attempts = entry.max_retries.saturating_sub(1);
            }
            if self.records.contains_key(&entry.id) {
                warn!(entry_id = %entry.id, "dropping duplicate persisted entry");
                continue;
            }
            if let Some(cycle) = self.graph.cycle_through(&entry.id, &entry.dependencies) {
                warn!(entry_id = %entry.id, ?cycle, "dropping persisted entry with cyclic dependencies");
                continue;
            }

            let mut next_eligible_at = now;
            if let Some(last) = entry.last_attempt
                && entry.attempts > 0
                && !interrupted
            {
                let delay = self
                    .policy
                    .next_delay(entry.attempts, entry.delay.map(Duration::from_millis));
                let due = last + chrono::Duration::from_std(delay).unwrap_or(chrono::Duration::zero());
                if let Ok(remaining) = (due - wall_now).to_std() {
                    next_eligible_at = now + remaining;
                }
            }

            let seq = self.allocate_seq();
            kept.push(entry.clone());
            let record = EntryRecord::from_persisted(entry, seq, now, next_eligible_at);
            self.admit(record, false);
        }
        info!(restored = kept.len(), "rehydrated retry queue");
        kept
    }

    pub(crate) async fn run(
        mut self,
        mut commands: mpsc::Receiver<Command>,
        mut done_rx: mpsc::UnboundedReceiver<AttemptFinished>,
        mut connectivity: watch::Receiver<bool>,
    ) {
        let mut poll = tokio::time::interval(self.config.poll_interval.max(Duration::from_millis(1)));
        poll.set_missed_tick_behavior(MissedTickBehavior::Delay);
        let mut connectivity_open = true;

        info!(entries = self.records.len(), online = self.online, "scheduler started");
        loop {
            self.pump();
            let wake_at = self.next_wakeup().unwrap_or_else(|| Instant::now() + IDLE_WAKE);

            tokio::select! {
                command = commands.recv() => match command {
                    Some(Command::Shutdown { reply }) => {
                        let _ = self.persister.flush().await;
                        let _ = reply.send(());
                        break;
                    }
                    Some(command) => self.handle_command(command),
                    None => break,
                },
                Some(done) = done_rx.recv() => self.on_attempt_finished(done),
                changed = connectivity.changed(), if connectivity_open => match changed {
                    Ok(()) => {
                        let online = *connectivity.borrow_and_update();
                        self.set_online(online);
                    }
                    Err(_) => {
                        debug!("connectivity source closed; keeping last known state");
                        connectivity_open = false;
                    }
                },
                _ = tokio::time::sleep_until(wake_at) => {}
                _ = poll.tick() => {}
            }
        }
        info!(remaining = self.records.len(), "scheduler stopped");
    }

    fn handle_command(&mut self, command: Command) {
        match command {
            Command::Enqueue { request, reply } => {
                let _ = reply.send(self.enqueue(request));
            }
            Command::Dequeue { id, reply } => {
                let _ = reply.send(self.dequeue(&id));
            }
            Command::RetryNow { id, reply } => {
                let _ = reply.send(self.retry_now(&id));
            }
            Command::Stats { reply } => {
                let _ = reply.send(self.stats());
            }
            Command::Status { id, reply } => {
                let _ = reply.send(self.status(&id));
            }
            Command::Flush { reply } => {
                let flushed = self.persister.flush();
                tokio::spawn(async move {
                    let _ = flushed.await;
                    let _ = reply.send(());
                });
            }
            Command::Shutdown { reply } => {
                let _ = reply.send(());
            }
        }
    }

    // ---- admission -------------------------------------------------------

    fn enqueue(&mut self, request: EnqueueRequest) -> Result<EntryId, QueueError> {
        let id = request.id.clone().unwrap_or_else(EntryId::generate);

        if let Some(existing) = self.records.get_mut(&id) {
            debug!(entry_id = %id, attempts = existing.attempts, "entry already queued");
            existing.callbacks.adopt(request.callbacks);
            return Ok(id);
        }
        if !self.registry.contains(&request.operation_key) {
            return Err(QueueError::UnknownOperation(request.operation_key));
        }
        let max_retries = request.max_retries.unwrap_or(self.config.default_max_retries);
        if max_retries == 0 {
            return Err(QueueError::InvalidRequest(
                "max_retries must be at least 1".to_string(),
            ));
        }
        if let Some(cycle) = self.graph.cycle_through(&id, &request.dependencies) {
            return Err(QueueError::DependencyCycle(cycle));
        }

        self.settled.forget(&id);
        let seq = self.allocate_seq();
        let record = EntryRecord::from_request(
            id.clone(),
            request,
            max_retries,
            seq,
            Instant::now(),
            self.clock.now(),
        );
        self.admit(record, true);
        Ok(id)
    }

    fn admit(&mut self, record: EntryRecord, persist: bool) {
        let id = record.id.clone();
        let priority = record.priority;
        let now = Instant::now();

        self.tiers[priority.index()].insert(record.seq, id.clone());
        for dep in &record.dependencies {
            self.graph.add_dependency(&id, dep);
            if !self.records.contains_key(dep) && self.settled.get(dep, now).is_none() {
                self.schedule_wakeup(record.admitted_at + self.config.dependency_admission_window);
            }
        }
        if record.next_eligible_at > now {
            self.schedule_wakeup(record.next_eligible_at);
        }
        if persist && let Some(persisted) = record.to_persisted() {
            self.persister.upsert(persisted);
        }
        debug!(entry_id = %id, %priority, operation = %record.operation_key, "entry queued");
        self.records.insert(id.clone(), record);

        self.bus.publish(&QueueEvent::Queued {
            id: id.clone(),
            priority,
            queue_size: self.records.len(),
        });

        if let DependencyStatus::Failed(dep) = self.dependency_status(&id, now) {
            self.cancel_for_dependency(&id, &dep);
        }
    }

    // ---- selection and dispatch -----------------------------------------

    fn pump(&mut self) {
        let now = Instant::now();
        self.settled.prune(now);
        if !self.online {
            return;
        }
        let limit = self.config.max_concurrent.max(1);
        while self.in_flight.len() < limit {
            let (next, doomed) = self.next_ready(now);
            for (id, dep) in doomed {
                self.cancel_for_dependency(&id, &dep);
            }
            match next {
                Some(id) => self.dispatch(&id),
                None => break,
            }
        }
    }

    /// First ready entry by tier then admission order, plus any entries found
    /// to depend on a failed entry along the way.
    fn next_ready(&self, now: Instant) -> (Option<EntryId>, Vec<(EntryId, EntryId)>) {
        let mut doomed = Vec::new();
        for tier in &self.tiers {
            for id in tier.values() {
                let Some(record) = self.records.get(id) else {
                    continue;
                };
                if record.is_processing() || now < record.next_eligible_at {
                    continue;
                }
                match self.dependency_status(id, now) {
                    DependencyStatus::Ready => return (Some(id.clone()), doomed),
                    DependencyStatus::Blocked => {}
                    DependencyStatus::Failed(dep) => doomed.push((id.clone(), dep)),
                }
            }
        }
        (None, doomed)
    }

    fn dependency_status(&self, id: &EntryId, now: Instant) -> DependencyStatus {
        let Some(record) = self.records.get(id) else {
            return DependencyStatus::Blocked;
        };
        let mut blocked = false;
        for dep in &record.dependencies {
            if self.records.contains_key(dep) {
                blocked = true;
                continue;
            }
            match self.settled.get(dep, now) {
                Some(settlement) if settlement.satisfies_dependents() => {}
                Some(_) => return DependencyStatus::Failed(dep.clone()),
                None => {
                    // Not seen yet: give it a window to be admitted.
                    if now < record.admitted_at + self.config.dependency_admission_window {
                        blocked = true;
                    }
                }
            }
        }
        if blocked {
            DependencyStatus::Blocked
        } else {
            DependencyStatus::Ready
        }
    }

    fn dispatch(&mut self, id: &EntryId) {
        let wall_now = self.clock.now();
        let queue_size = self.records.len();
        let Some(record) = self.records.get_mut(id) else {
            return;
        };
        let Some(handler) = self.registry.get(&record.operation_key) else {
            let error = OperationError::internal(format!(
                "no operation registered for key={}",
                record.operation_key
            ));
            let attempts = record.attempts;
            self.settle_failure(id, EntryError::NonRetryable { attempts, source: error });
            return;
        };

        record.start_attempt(wall_now);
        let attempt = record.attempts;
        let seq = record.seq;
        let args = record.args.clone();
        if let Some(persisted) = record.to_persisted() {
            self.persister.upsert(persisted);
        }
        self.in_flight.insert(seq);
        debug!(entry_id = %id, attempt, max_retries = record.max_retries, "dispatching attempt");

        self.bus.publish(&QueueEvent::Retry {
            id: id.clone(),
            attempt,
            queue_size,
        });

        let done_tx = self.done_tx.clone();
        let id = id.clone();
        tokio::spawn(async move {
            let result = match tokio::spawn(async move { handler.handle_dyn(args).await }).await {
                Ok(result) => result,
                Err(e) => Err(OperationError::internal(format!("operation aborted: {e}"))),
            };
            let _ = done_tx.send(AttemptFinished { id, seq, result });
        });
    }

    // ---- attempt outcomes ------------------------------------------------

    fn on_attempt_finished(&mut self, done: AttemptFinished) {
        if !self.in_flight.remove(&done.seq) {
            debug!(entry_id = %done.id, "ignoring result of a cancelled attempt");
            return;
        }
        let Some(record) = self.records.get_mut(&done.id) else {
            return;
        };
        if record.seq != done.seq || !record.is_processing() {
            debug!(entry_id = %done.id, "ignoring stale attempt result");
            return;
        }

        let error = match done.result {
            Ok(output) => {
                self.settle_success(&done.id, output);
                return;
            }
            Err(error) => error,
        };

        let attempts = record.attempts;
        let retryable = self.retry_if.as_ref().is_none_or(|retry_if| retry_if(&error));
        if record.is_exhausted() {
            self.settle_failure(&done.id, EntryError::Exhausted { attempts, source: error });
        } else if !retryable {
            self.settle_failure(&done.id, EntryError::NonRetryable { attempts, source: error });
        } else {
            let delay = self.policy.next_delay(attempts, record.delay_override);
            let next_eligible_at = Instant::now() + delay;
            warn!(
                entry_id = %done.id,
                attempt = attempts,
                max_retries = record.max_retries,
                retry_in_ms = delay.as_millis() as u64,
                error = %error,
                "attempt failed; retry scheduled"
            );
            record.schedule_retry(next_eligible_at, error);
            if let Some(persisted) = record.to_persisted() {
                self.persister.upsert(persisted);
            }
            self.schedule_wakeup(next_eligible_at);
        }
    }

    fn settle_success(&mut self, id: &EntryId, output: Value) {
        let Some(mut record) = self.remove_record(id) else {
            return;
        };
        record.callbacks.succeed(&output);
        self.settled
            .record(id.clone(), Settlement::Succeeded, Instant::now());
        if !record.volatile {
            self.persister.remove(id.clone());
        }
        info!(entry_id = %id, attempts = record.attempts, "entry succeeded");
        self.bus.publish(&QueueEvent::Success {
            id: id.clone(),
            queue_size: self.records.len(),
        });
    }

    fn settle_failure(&mut self, id: &EntryId, error: EntryError) {
        let Some(mut record) = self.remove_record(id) else {
            return;
        };
        record.callbacks.fail(&error);
        self.settled
            .record(id.clone(), Settlement::Failed, Instant::now());
        if !record.volatile {
            self.persister.remove(id.clone());
        }
        warn!(entry_id = %id, error = %error, "entry failed permanently");
        self.bus.publish(&QueueEvent::Error {
            id: id.clone(),
            error: error.to_string(),
            queue_size: self.records.len(),
        });
        self.cascade(id);
    }

    /// Cancel every live entry that transitively waits for `root`.
    fn cascade(&mut self, root: &EntryId) {
        for dependent in self.graph.transitive_dependents(root) {
            self.cancel_one_for_dependency(&dependent, root);
        }
    }

    fn cancel_for_dependency(&mut self, id: &EntryId, dependency: &EntryId) {
        self.cancel_one_for_dependency(id, dependency);
        self.cascade(id);
    }

    fn cancel_one_for_dependency(&mut self, id: &EntryId, dependency: &EntryId) {
        let Some(mut record) = self.remove_record(id) else {
            return;
        };
        let error = EntryError::DependencyFailed {
            dependency: dependency.clone(),
        };
        record.callbacks.fail(&error);
        self.settled
            .record(id.clone(), Settlement::Failed, Instant::now());
        if !record.volatile {
            self.persister.remove(id.clone());
        }
        warn!(entry_id = %id, dependency = %dependency, "entry cancelled: dependency failed");
        self.bus.publish(&QueueEvent::Error {
            id: id.clone(),
            error: error.to_string(),
            queue_size: self.records.len(),
        });
    }

    // ---- manual controls and views --------------------------------------

    fn dequeue(&mut self, id: &EntryId) -> bool {
        let Some(record) = self.remove_record(id) else {
            return false;
        };
        // Dropping the callbacks resolves any tracked completion as cancelled.
        drop(record.callbacks);
        self.settled
            .record(id.clone(), Settlement::Cancelled, Instant::now());
        if !record.volatile {
            self.persister.remove(id.clone());
        }
        info!(entry_id = %id, "entry dequeued");
        self.bus.publish(&QueueEvent::Dequeued {
            id: id.clone(),
            queue_size: self.records.len(),
        });
        self.cascade(id);
        true
    }

    fn retry_now(&mut self, id: &EntryId) -> bool {
        let now = Instant::now();
        match self.records.get_mut(id) {
            Some(record) if !record.is_processing() && record.next_eligible_at > now => {
                record.next_eligible_at = now;
                debug!(entry_id = %id, "backoff wait skipped");
                true
            }
            _ => false,
        }
    }

    fn stats(&self) -> QueueStats {
        let mut stats = QueueStats::default();
        for record in self.records.values() {
            stats.record(record.priority, record.is_processing());
        }
        stats
    }

    fn status(&self, id: &EntryId) -> Option<EntryStatus> {
        let record = self.records.get(id)?;
        let now = Instant::now();
        let phase = if record.is_processing() {
            EntryPhase::Processing
        } else if self.dependency_status(id, now) != DependencyStatus::Ready {
            EntryPhase::Blocked
        } else if record.next_eligible_at > now {
            EntryPhase::Waiting {
                retry_in: record.next_eligible_at - now,
            }
        } else {
            EntryPhase::Queued
        };
        Some(EntryStatus {
            phase,
            attempts: record.attempts,
            max_retries: record.max_retries,
            last_error: record.last_error.clone(),
        })
    }

    // ---- bookkeeping -----------------------------------------------------

    fn set_online(&mut self, online: bool) {
        if self.online != online {
            info!(online, "scheduler connectivity changed");
            self.online = online;
        }
    }

    fn remove_record(&mut self, id: &EntryId) -> Option<EntryRecord> {
        let record = self.records.remove(id)?;
        self.tiers[record.priority.index()].remove(&record.seq);
        self.graph.remove_entry(id);
        self.in_flight.remove(&record.seq);
        Some(record)
    }

    fn allocate_seq(&mut self) -> u64 {
        let seq = self.next_seq;
        self.next_seq += 1;
        seq
    }

    fn schedule_wakeup(&mut self, at: Instant) {
        self.wakeups.push(Wakeup { at });
    }

    /// Earliest future wakeup; past ones are discarded (the pump that just
    /// ran already saw them).
    fn next_wakeup(&mut self) -> Option<Instant> {
        let now = Instant::now();
        while let Some(wakeup) = self.wakeups.peek() {
            if wakeup.at > now {
                return Some(wakeup.at);
            }
            self.wakeups.pop();
        }
        None
    }
}

