//! Shared fixtures for reconciliation BDD scenarios.

use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use leasehold::test_support::{ManualClock, MemoryStore, ScriptedProvider};
use leasehold::{
    Clock, InstanceId, InstanceRecord, LifecycleState, Reconciler, ReconcilerConfig, TickSummary,
};
use rstest::fixture;

const SECONDS_PER_HOUR: u64 = 3600;

#[derive(Clone)]
pub struct ReconcileContext {
    pub provider: ScriptedProvider,
    pub store: MemoryStore,
    pub clock: ManualClock,
}

impl ReconcileContext {
    /// Tracks a new instance launched now, with the provider agreeing on its
    /// state.
    pub fn track(&self, raw_id: &str, state: &str, hours: u64) {
        let id = InstanceId::from(raw_id);
        let lifecycle = LifecycleState::from(state);
        let record = InstanceRecord::new(
            id.clone(),
            "DEV1-S",
            "fr-par-1",
            self.clock_now(),
            hours_to_duration(hours),
        )
        .unwrap_or_else(|err| panic!("record for {id} should be valid: {err}"))
        .with_state(lifecycle.clone());
        self.store.insert(record);
        self.provider.set_state(&id, lifecycle);
    }

    pub fn clock_now(&self) -> DateTime<Utc> {
        self.clock.now()
    }

    pub fn reconciler(&self) -> Reconciler<ScriptedProvider, MemoryStore, ManualClock> {
        Reconciler::with_clock(
            self.provider.clone(),
            self.store.clone(),
            self.clock.clone(),
            ReconcilerConfig::default(),
        )
    }

    pub fn stored(&self, id: &str) -> InstanceRecord {
        self.store
            .snapshot(&InstanceId::from(id))
            .unwrap_or_else(|| panic!("record {id} should be stored"))
    }
}

pub fn hours_to_duration(hours: u64) -> Duration {
    Duration::from_secs(hours * SECONDS_PER_HOUR)
}

fn start_time() -> DateTime<Utc> {
    Utc.with_ymd_and_hms(2026, 3, 1, 9, 0, 0)
        .single()
        .unwrap_or_else(|| panic!("start time should be unambiguous"))
}

#[fixture]
pub fn reconcile_context() -> ReconcileContext {
    ReconcileContext {
        provider: ScriptedProvider::new(),
        store: MemoryStore::new(),
        clock: ManualClock::new(start_time()),
    }
}

#[fixture]
pub fn tick_summary() -> TickSummary {
    TickSummary::default()
}
