//! Periodic lease reconciliation.
//!
//! The [`Reconciler`] owns a provider, a state store, and a clock. Each pass
//! lists every tracked record, asks the provider for the live status, runs
//! [`decide`](crate::decision::decide), applies the chosen action, and writes
//! back what changed. Records are handled independently: a failure on one
//! never stops the pass, and the next pass is the retry.

mod clock;

use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::{Duration, Instant};

use chrono::{DateTime, Utc};
use thiserror::Error;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::{self, MissedTickBehavior};
use tracing::{debug, error, info, warn};

use crate::decision::{Action, decide};
use crate::duration::format_duration;
use crate::instance::{InstanceId, InstanceRecord, InstanceStatus, LifecycleState};
use crate::provider::Provider;
use crate::store::{StateStore, StoreError};

pub use clock::{Clock, SystemClock};

/// Default delay between two passes.
pub const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(30);

/// Default number of consecutive failed status queries before a record is
/// escalated.
pub const DEFAULT_FAILURE_ALERT_THRESHOLD: u32 = 10;

/// Errors raised while configuring the reconciler.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ReconcileError {
    /// Raised when the polling interval is zero.
    #[error("poll interval must be greater than zero")]
    InvalidInterval,
    /// Raised when the escalation threshold is zero.
    #[error("failure alert threshold must be greater than zero")]
    InvalidThreshold,
}

/// Scheduling parameters for the reconciler.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub struct ReconcilerConfig {
    poll_interval: Duration,
    failure_alert_threshold: u32,
}

impl ReconcilerConfig {
    /// Validates and builds a configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ReconcileError`] when the interval or threshold is zero.
    pub const fn new(
        poll_interval: Duration,
        failure_alert_threshold: u32,
    ) -> Result<Self, ReconcileError> {
        if poll_interval.is_zero() {
            return Err(ReconcileError::InvalidInterval);
        }
        if failure_alert_threshold == 0 {
            return Err(ReconcileError::InvalidThreshold);
        }
        Ok(Self {
            poll_interval,
            failure_alert_threshold,
        })
    }

    /// Delay between two passes.
    #[must_use]
    pub const fn poll_interval(&self) -> Duration {
        self.poll_interval
    }

    /// Consecutive failed queries that trigger an escalation event.
    #[must_use]
    pub const fn failure_alert_threshold(&self) -> u32 {
        self.failure_alert_threshold
    }
}

impl Default for ReconcilerConfig {
    fn default() -> Self {
        Self {
            poll_interval: DEFAULT_POLL_INTERVAL,
            failure_alert_threshold: DEFAULT_FAILURE_ALERT_THRESHOLD,
        }
    }
}

/// Counters describing one reconciliation pass.
#[derive(Clone, Copy, Debug, Default, Eq, PartialEq)]
pub struct TickSummary {
    /// Set when the store could not be listed; nothing else ran.
    pub listing_failed: bool,
    /// Records enumerated from the store.
    pub examined: usize,
    /// Terminal records skipped without provider calls.
    pub skipped_terminal: usize,
    /// Records skipped because the status query failed.
    pub query_failures: usize,
    /// Records escalated as persistently unreachable.
    pub escalations: usize,
    /// Records whose state or addresses drifted and were synced.
    pub synced: usize,
    /// Expired instances successfully stopped.
    pub stopped: usize,
    /// Extended instances successfully restarted.
    pub started: usize,
    /// Stop or start calls that failed.
    pub action_failures: usize,
    /// Records whose changes could not be persisted.
    pub persist_failures: usize,
}

struct Shared<P, S, C> {
    provider: P,
    store: S,
    clock: C,
    config: ReconcilerConfig,
    query_failures: Mutex<HashMap<InstanceId, u32>>,
}

struct Driver {
    shutdown: watch::Sender<bool>,
    task: JoinHandle<()>,
}

/// Harness that drives lease decisions against every tracked record.
pub struct Reconciler<P, S, C = SystemClock> {
    shared: Arc<Shared<P, S, C>>,
    driver: Mutex<Option<Driver>>,
}

impl<P, S> Reconciler<P, S, SystemClock>
where
    P: Provider + Send + Sync + 'static,
    S: StateStore + Send + Sync + 'static,
{
    /// Creates a reconciler that reads the wall clock.
    #[must_use]
    pub fn new(provider: P, store: S, config: ReconcilerConfig) -> Self {
        Self::with_clock(provider, store, SystemClock, config)
    }
}

impl<P, S, C> Reconciler<P, S, C>
where
    P: Provider + Send + Sync + 'static,
    S: StateStore + Send + Sync + 'static,
    C: Clock + 'static,
{
    /// Creates a reconciler with an explicit time source.
    #[must_use]
    pub fn with_clock(provider: P, store: S, clock: C, config: ReconcilerConfig) -> Self {
        Self {
            shared: Arc::new(Shared {
                provider,
                store,
                clock,
                config,
                query_failures: Mutex::new(HashMap::new()),
            }),
            driver: Mutex::new(None),
        }
    }

    /// Scheduling parameters in use.
    #[must_use]
    pub fn config(&self) -> ReconcilerConfig {
        self.shared.config
    }

    /// Provider used for status queries and actions.
    #[must_use]
    pub fn provider(&self) -> &P {
        &self.shared.provider
    }

    /// Store holding the tracked records.
    #[must_use]
    pub fn store(&self) -> &S {
        &self.shared.store
    }

    /// Returns `true` while the periodic driver is active.
    #[must_use]
    pub fn is_running(&self) -> bool {
        self.driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .is_some()
    }

    /// Starts periodic reconciliation on the current tokio runtime.
    ///
    /// The first pass runs immediately. Returns `false` without side effects
    /// when the driver is already running.
    ///
    /// # Panics
    ///
    /// Panics when called outside a tokio runtime.
    #[must_use = "returns false when the reconciler was already running"]
    pub fn start(&self) -> bool {
        let mut driver = self.driver.lock().unwrap_or_else(PoisonError::into_inner);
        if driver.is_some() {
            debug!("instance reconciler already running");
            return false;
        }

        let (shutdown, signal) = watch::channel(false);
        let task = tokio::spawn(drive(Arc::clone(&self.shared), signal));
        *driver = Some(Driver { shutdown, task });
        info!(
            interval = %format_duration(self.shared.config.poll_interval),
            failure_alert_threshold = self.shared.config.failure_alert_threshold,
            "starting instance reconciler"
        );
        true
    }

    /// Stops periodic reconciliation and waits for the driver to exit.
    ///
    /// A pass already in progress is allowed to finish; no new pass begins.
    pub async fn stop(&self) {
        let driver = self
            .driver
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        let Some(Driver { shutdown, task }) = driver else {
            debug!("instance reconciler is not running");
            return;
        };

        info!("stopping instance reconciler");
        shutdown.send_replace(true);
        if let Err(err) = task.await {
            error!(error = %err, "instance reconciler driver ended abnormally");
        }
        info!("instance reconciler stopped");
    }

    /// Runs exactly one reconciliation pass.
    #[must_use]
    pub async fn run_once(&self) -> TickSummary {
        self.shared.run_pass().await
    }
}

impl<P, S, C> Drop for Reconciler<P, S, C> {
    fn drop(&mut self) {
        let driver = self
            .driver
            .get_mut()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(running) = driver {
            running.shutdown.send_replace(true);
        }
    }
}

async fn drive<P, S, C>(shared: Arc<Shared<P, S, C>>, mut shutdown: watch::Receiver<bool>)
where
    P: Provider + Send + Sync + 'static,
    S: StateStore + Send + Sync + 'static,
    C: Clock + 'static,
{
    let mut ticker = time::interval(shared.config.poll_interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Skip);

    loop {
        tokio::select! {
            biased;
            changed = shutdown.changed() => {
                let stopping = changed.is_err() || *shutdown.borrow();
                if stopping {
                    break;
                }
            }
            _ = ticker.tick() => {
                shared.run_pass().await;
            }
        }
    }

    debug!("instance reconciler driver exiting");
}

impl<P, S, C> Shared<P, S, C>
where
    P: Provider,
    S: StateStore,
    C: Clock,
{
    async fn run_pass(&self) -> TickSummary {
        let started = Instant::now();
        let now = self.clock.now();
        debug!(now = %now, "reconciliation pass started");

        let records = match self.store.list_all() {
            Ok(records) => records,
            Err(err) => {
                error!(error = %err, "failed to list instance records");
                return TickSummary {
                    listing_failed: true,
                    ..TickSummary::default()
                };
            }
        };

        let mut summary = TickSummary {
            examined: records.len(),
            ..TickSummary::default()
        };
        let seen = records
            .iter()
            .map(|record| record.id.clone())
            .collect::<HashSet<_>>();

        for record in records {
            self.reconcile_record(record, now, &mut summary).await;
        }

        self.query_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .retain(|id, _| seen.contains(id));

        info!(
            examined = summary.examined,
            skipped_terminal = summary.skipped_terminal,
            query_failures = summary.query_failures,
            synced = summary.synced,
            stopped = summary.stopped,
            started = summary.started,
            action_failures = summary.action_failures,
            persist_failures = summary.persist_failures,
            elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX),
            "reconciliation pass finished"
        );
        summary
    }

    async fn reconcile_record(
        &self,
        record: InstanceRecord,
        now: DateTime<Utc>,
        summary: &mut TickSummary,
    ) {
        if record.is_terminal() {
            summary.skipped_terminal += 1;
            debug!(
                instance_id = %record.id,
                state = %record.lifecycle_state,
                "instance is terminal, skipping"
            );
            return;
        }

        let live = match self.provider.get_status(&record.id).await {
            Ok(live) => live,
            Err(err) => {
                summary.query_failures += 1;
                let failures = self.note_query_failure(&record.id);
                warn!(
                    instance_id = %record.id,
                    error = %err,
                    consecutive_failures = failures,
                    "failed to query instance status, skipping until next pass"
                );
                if failures.checked_rem(self.config.failure_alert_threshold) == Some(0) {
                    summary.escalations += 1;
                    error!(
                        instance_id = %record.id,
                        consecutive_failures = failures,
                        "instance has been unreachable for {failures} consecutive passes"
                    );
                }
                return;
            }
        };
        self.clear_query_failures(&record.id);

        let decision = decide(&record, &live, now);
        let mut working = record.clone();
        let mut changed = false;

        if let Some(sync) = &decision.sync {
            info!(
                instance_id = %record.id,
                old_state = %record.lifecycle_state,
                new_state = %sync.lifecycle_state,
                "instance drifted from provider state, syncing"
            );
            changed |= working.observe(&sync.as_status());
            summary.synced += 1;
        }

        match decision.action {
            Action::None => {}
            Action::Stop => {
                let overdue = (now - record.expires_at).to_std().unwrap_or_default();
                warn!(
                    instance_id = %record.id,
                    expires_at = %record.expires_at,
                    overdue = %format_duration(overdue),
                    "lease expired, stopping instance"
                );
                if self.apply(Action::Stop, &record.id, summary).await {
                    working.lifecycle_state = LifecycleState::stopping();
                    changed = true;
                }
            }
            Action::Start => {
                let remaining = record.remaining_at(now).unwrap_or_default();
                info!(
                    instance_id = %record.id,
                    expires_at = %record.expires_at,
                    remaining = %format_duration(remaining),
                    "lease extended, restarting instance"
                );
                if self.apply(Action::Start, &record.id, summary).await {
                    working.lifecycle_state = LifecycleState::pending();
                    changed = true;
                }
            }
        }

        if changed {
            self.persist(&working, summary);
        }
    }

    async fn apply(&self, action: Action, id: &InstanceId, summary: &mut TickSummary) -> bool {
        let result = match action {
            Action::Stop => self.provider.stop(id).await,
            Action::Start => self.provider.start(id).await,
            Action::None => return false,
        };
        match result {
            Ok(()) => {
                match action {
                    Action::Stop => summary.stopped += 1,
                    Action::Start => summary.started += 1,
                    Action::None => {}
                }
                info!(instance_id = %id, action = action.as_str(), "instance action applied");
                true
            }
            Err(err) => {
                summary.action_failures += 1;
                error!(
                    instance_id = %id,
                    action = action.as_str(),
                    error = %err,
                    "instance action failed, retrying next pass"
                );
                false
            }
        }
    }

    fn persist(&self, working: &InstanceRecord, summary: &mut TickSummary) {
        let observed = InstanceStatus::new(working.lifecycle_state.clone())
            .with_addresses(working.public_address, working.private_address);
        let result = self
            .store
            .update(&working.id, |stored| {
                // Terminated while the pass was in flight; the record stays out.
                if stored.is_terminal() {
                    return Ok::<_, StoreError>(false);
                }
                Ok(stored.observe(&observed))
            });
        if let Err(err) = result {
            summary.persist_failures += 1;
            error!(
                instance_id = %working.id,
                error = %err,
                "failed to persist instance record"
            );
        }
    }

    fn note_query_failure(&self, id: &InstanceId) -> u32 {
        let mut failures = self
            .query_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner);
        let count = failures.entry(id.clone()).or_insert(0);
        *count = count.saturating_add(1);
        *count
    }

    fn clear_query_failures(&self, id: &InstanceId) {
        self.query_failures
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .remove(id);
    }
}
