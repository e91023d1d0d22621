//! Per-task status polling.
//!
//! [`PollingScheduler`] owns one cancellable Tokio task per active task.
//! Each tick loads the task, asks the vendor for its status and either
//! hands a terminal signal to the [`CompletionResolver`], persists progress
//! and counters, or parks the task in `background` when the
//! [`PollTracker`] says it has stalled or timed out.

use std::collections::HashMap;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, PoisonError};

use synth_core::clock::Clock;
use synth_core::polling::{ParkReason, PollDecision, PollPolicy, PollTracker};
use synth_core::task::{Task, TaskPatch, TaskStatus};
use synth_core::types::TaskId;
use synth_core::vendor_status::TerminalSignal;
use synth_db::TaskStore;
use synth_events::{EventBus, JobEvent};
use synth_vendor::{VendorClient, VendorError};
use tokio::time::{interval_at, Instant, MissedTickBehavior};
use tokio_util::sync::CancellationToken;

use crate::resolver::CompletionResolver;

/// What one poll tick concluded.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TickOutcome {
    /// Keep polling.
    Continue,
    /// A terminal signal was handed to the resolver.
    Resolved,
    /// The task was moved to `background`.
    Parked(ParkReason),
    /// The task is gone, already final, or owned by another path.
    Abandoned,
}

impl TickOutcome {
    pub fn is_final(&self) -> bool {
        !matches!(self, TickOutcome::Continue)
    }
}

struct PollerEntry {
    cancel: CancellationToken,
    generation: u64,
}

struct SchedulerInner {
    store: Arc<dyn TaskStore>,
    vendor: Arc<dyn VendorClient>,
    resolver: Arc<CompletionResolver>,
    bus: Arc<EventBus>,
    clock: Arc<dyn Clock>,
    policy: PollPolicy,
    pollers: Mutex<HashMap<TaskId, PollerEntry>>,
    next_generation: AtomicU64,
    shutdown: CancellationToken,
}

/// Cheaply cloneable handle to the poller table.
#[derive(Clone)]
pub struct PollingScheduler {
    inner: Arc<SchedulerInner>,
}

impl PollingScheduler {
    pub fn new(
        store: Arc<dyn TaskStore>,
        vendor: Arc<dyn VendorClient>,
        resolver: Arc<CompletionResolver>,
        bus: Arc<EventBus>,
        clock: Arc<dyn Clock>,
        policy: PollPolicy,
    ) -> Self {
        Self {
            inner: Arc::new(SchedulerInner {
                store,
                vendor,
                resolver,
                bus,
                clock,
                policy,
                pollers: Mutex::new(HashMap::new()),
                next_generation: AtomicU64::new(1),
                shutdown: CancellationToken::new(),
            }),
        }
    }

    pub fn policy(&self) -> PollPolicy {
        self.inner.policy
    }

    /// Start polling `task`. Returns `false` if a poller is already
    /// attached or the scheduler is shutting down.
    pub fn attach(&self, task: &Task) -> bool {
        if self.inner.shutdown.is_cancelled() {
            return false;
        }

        let mut pollers = self.inner.pollers.lock().unwrap_or_else(PoisonError::into_inner);
        if pollers.contains_key(&task.task_id) {
            tracing::debug!(task_id = %task.task_id, "Poller already attached");
            return false;
        }

        let cancel = self.inner.shutdown.child_token();
        let generation = self.inner.next_generation.fetch_add(1, Ordering::Relaxed);
        pollers.insert(
            task.task_id.clone(),
            PollerEntry {
                cancel: cancel.clone(),
                generation,
            },
        );

        let tracker =
            PollTracker::new(self.inner.policy, self.inner.clock.now()).with_attempts(task.poll_attempts);
        let inner = Arc::clone(&self.inner);
        let task_id = task.task_id.clone();
        tokio::spawn(async move {
            run_poller(inner, task_id, tracker, cancel, generation).await;
        });

        tracing::debug!(task_id = %task.task_id, status = %task.status, "Poller attached");
        true
    }

    /// Stop the poller for `task_id`. Stopping an absent poller is a no-op
    /// and returns `false`.
    pub fn stop(&self, task_id: &str) -> bool {
        let entry = self
            .inner
            .pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(task_id);
        match entry {
            Some(entry) => {
                entry.cancel.cancel();
                tracing::debug!(task_id, "Poller stopped");
                true
            }
            None => false,
        }
    }

    pub fn is_attached(&self, task_id: &str) -> bool {
        self.inner
            .pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .contains_key(task_id)
    }

    pub fn active_count(&self) -> usize {
        self.inner
            .pollers
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .len()
    }

    /// Cancel every poller and refuse new attachments.
    pub fn shutdown(&self) {
        self.inner.shutdown.cancel();
        let drained = {
            let mut pollers = self.inner.pollers.lock().unwrap_or_else(PoisonError::into_inner);
            let count = pollers.len();
            pollers.clear();
            count
        };
        tracing::info!(pollers = drained, "Polling scheduler shut down");
    }

    /// Run one status check for `task_id` outside any timer.
    pub async fn poll_once(&self, task_id: &str, tracker: &mut PollTracker) -> TickOutcome {
        self.inner.tick(task_id, tracker).await
    }

    /// A tracker starting now with this scheduler's policy.
    pub fn new_tracker(&self) -> PollTracker {
        PollTracker::new(self.inner.policy, self.inner.clock.now())
    }
}

async fn run_poller(
    inner: Arc<SchedulerInner>,
    task_id: TaskId,
    mut tracker: PollTracker,
    cancel: CancellationToken,
    generation: u64,
) {
    let period = inner.policy.tick_interval;
    let mut ticker = interval_at(Instant::now() + period, period);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);

    loop {
        tokio::select! {
            biased;
            _ = cancel.cancelled() => break,
            _ = ticker.tick() => {
                if inner.tick(&task_id, &mut tracker).await.is_final() {
                    break;
                }
            }
        }
    }

    inner.release(&task_id, generation);
}

impl SchedulerInner {
    /// Drop our table entry unless a newer poller has replaced it.
    fn release(&self, task_id: &str, generation: u64) {
        let mut pollers = self.pollers.lock().unwrap_or_else(PoisonError::into_inner);
        if pollers.get(task_id).is_some_and(|e| e.generation == generation) {
            pollers.remove(task_id);
        }
    }

    async fn tick(&self, task_id: &str, tracker: &mut PollTracker) -> TickOutcome {
        let task = match self.store.get(task_id).await {
            Ok(Some(task)) => task,
            Ok(None) => {
                tracing::warn!(task_id, "Polled task no longer exists");
                return TickOutcome::Abandoned;
            }
            Err(e) => {
                tracing::error!(task_id, error = %e, "Failed to load polled task");
                return self.after_error(task_id, tracker);
            }
        };

        match task.status {
            TaskStatus::Completed | TaskStatus::Failed | TaskStatus::Background => {
                tracing::debug!(task_id, status = %task.status, "Task left processing, poller exits");
                return TickOutcome::Abandoned;
            }
            TaskStatus::Pending => {
                match self
                    .store
                    .compare_and_transition(task_id, &[TaskStatus::Pending], TaskStatus::Processing, TaskPatch::new())
                    .await
                {
                    Ok(true) => tracing::debug!(task_id, "Task processing"),
                    Ok(false) => {}
                    Err(e) => tracing::warn!(task_id, error = %e, "Failed to mark task processing"),
                }
            }
            TaskStatus::Processing => {}
        }

        let report = match self.vendor.fetch_status(task_id).await {
            Ok(report) => report,
            Err(VendorError::Permanent(reason)) => {
                tracing::warn!(task_id, reason = %reason, "Vendor rejected status check");
                return self.resolve(task_id, TerminalSignal::Failed { reason }).await;
            }
            Err(e) => {
                tracing::warn!(task_id, error = %e, "Status check failed, retrying next tick");
                return match tracker.record_error(self.clock.now()) {
                    PollDecision::Continue => TickOutcome::Continue,
                    PollDecision::Park(reason) => self.park(&task, tracker, reason).await,
                };
            }
        };

        if let Some(signal) = report.terminal() {
            return self.resolve(task_id, signal).await;
        }

        let previous_progress = task.progress;
        let decision = tracker.observe(report.state, report.progress, self.clock.now());
        let persisted = self
            .store
            .compare_and_transition(
                task_id,
                &[TaskStatus::Processing, TaskStatus::Pending],
                TaskStatus::Processing,
                TaskPatch::new()
                    .with_counters(tracker.attempts(), tracker.stall_count())
                    .with_progress(report.progress),
            )
            .await;
        match persisted {
            Ok(true) => {}
            Ok(false) => return TickOutcome::Abandoned,
            Err(e) => tracing::warn!(task_id, error = %e, "Failed to persist poll counters"),
        }

        if let Some(progress) = report.progress {
            if Some(progress) != previous_progress {
                self.bus.publish(JobEvent::Progress {
                    task_id: task.task_id.clone(),
                    owner_id: task.owner_id.clone(),
                    progress,
                });
            }
        }

        match decision {
            PollDecision::Continue => TickOutcome::Continue,
            PollDecision::Park(reason) => self.park(&task, tracker, reason).await,
        }
    }

    /// A store outage counts as an attempt. Parking needs the task row, so
    /// an exhausted budget is acted on by the next successful load.
    fn after_error(&self, task_id: &str, tracker: &mut PollTracker) -> TickOutcome {
        if let PollDecision::Park(reason) = tracker.record_error(self.clock.now()) {
            tracing::warn!(task_id, reason = %reason, "Poll budget exhausted while store unavailable");
        }
        TickOutcome::Continue
    }

    async fn resolve(&self, task_id: &str, signal: TerminalSignal) -> TickOutcome {
        match self.resolver.resolve(task_id, signal).await {
            Ok(_) => TickOutcome::Resolved,
            Err(e) => {
                tracing::error!(task_id, error = %e, "Resolution failed, will retry next tick");
                TickOutcome::Continue
            }
        }
    }

    /// Move the task to `background`. The parked event fires only the
    /// first time a task is parked.
    async fn park(&self, task: &Task, tracker: &PollTracker, reason: ParkReason) -> TickOutcome {
        let moved = self
            .store
            .compare_and_transition(
                &task.task_id,
                &[TaskStatus::Processing],
                TaskStatus::Background,
                TaskPatch::new()
                    .with_counters(tracker.attempts(), tracker.stall_count())
                    .with_parked_count(task.parked_count.saturating_add(1)),
            )
            .await;

        match moved {
            Ok(true) => {
                tracing::info!(
                    task_id = %task.task_id,
                    reason = %reason,
                    parked_count = task.parked_count + 1,
                    "Task parked in background",
                );
                if task.parked_count == 0 {
                    self.bus.publish(JobEvent::Parked {
                        task_id: task.task_id.clone(),
                        owner_id: task.owner_id.clone(),
                        kind: task.kind(),
                        reason: reason.to_string(),
                    });
                }
                TickOutcome::Parked(reason)
            }
            Ok(false) => TickOutcome::Abandoned,
            Err(e) => {
                tracing::error!(task_id = %task.task_id, error = %e, "Failed to park task");
                TickOutcome::Continue
            }
        }
    }
}
