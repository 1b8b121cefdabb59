//! Test support utilities shared across unit and integration tests.

use std::collections::{BTreeMap, BTreeSet, HashMap, HashSet};
use std::env;
use std::ffi::OsString;
use std::net::{IpAddr, Ipv4Addr};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use thiserror::Error;
use tokio::sync::{Mutex as AsyncMutex, MutexGuard as AsyncMutexGuard};

use crate::instance::{InstanceId, InstanceRecord, InstanceStatus, LifecycleState};
use crate::provider::{
    InstanceRequest, Provider, ProviderFuture, ProvisionedInstance, Provisioner,
};
use crate::reconcile::Clock;
use crate::store::{StateStore, StoreError};

/// Calls recorded by [`ScriptedProvider`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum ProviderCall {
    /// A status query.
    Status(InstanceId),
    /// A power-on request.
    Start(InstanceId),
    /// A power-off request.
    Stop(InstanceId),
    /// A creation request in the given zone.
    Create(String),
    /// A deletion request.
    Terminate(InstanceId),
}

/// Errors produced by [`ScriptedProvider`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ScriptedProviderError {
    /// Raised for calls scripted to fail.
    #[error("simulated provider failure for {0}")]
    Simulated(String),
    /// Raised when no status has been scripted for an instance.
    #[error("no scripted status for {0}")]
    Unknown(InstanceId),
}

type StopHook = Arc<dyn Fn(&InstanceId) + Send + Sync>;

#[derive(Default)]
struct ProviderState {
    statuses: HashMap<InstanceId, InstanceStatus>,
    failing_queries: HashSet<InstanceId>,
    failing_actions: HashSet<InstanceId>,
    fail_create: bool,
    launch_time: Option<DateTime<Utc>>,
    created: u32,
    calls: Vec<ProviderCall>,
    on_stop: Option<StopHook>,
}

/// In-memory provider whose live statuses and failures are scripted by the
/// test.
///
/// Successful stop and start calls move the scripted status to `stopped` and
/// `running` immediately. Clones share state, so a test can keep a handle
/// while the reconciler owns another.
#[derive(Clone, Default)]
pub struct ScriptedProvider {
    state: Arc<Mutex<ProviderState>>,
}

impl ScriptedProvider {
    /// Creates a provider with no scripted instances.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn state(&self) -> std::sync::MutexGuard<'_, ProviderState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Scripts the live status of an instance.
    pub fn set_status(&self, id: &InstanceId, status: InstanceStatus) {
        self.state().statuses.insert(id.clone(), status);
    }

    /// Scripts only the lifecycle state, keeping any scripted addresses.
    pub fn set_state(&self, id: &InstanceId, state: LifecycleState) {
        let mut guard = self.state();
        let status = guard
            .statuses
            .entry(id.clone())
            .or_insert_with(|| InstanceStatus::new(state.clone()));
        status.lifecycle_state = state;
    }

    /// Returns the scripted status of an instance.
    #[must_use]
    pub fn status(&self, id: &InstanceId) -> Option<InstanceStatus> {
        self.state().statuses.get(id).cloned()
    }

    /// Makes status queries for `id` fail until [`Self::recover`] is called.
    pub fn fail_queries(&self, id: &InstanceId) {
        self.state().failing_queries.insert(id.clone());
    }

    /// Makes start and stop calls for `id` fail until [`Self::recover`] is
    /// called.
    pub fn fail_actions(&self, id: &InstanceId) {
        self.state().failing_actions.insert(id.clone());
    }

    /// Makes every create call fail.
    pub fn fail_create(&self) {
        self.state().fail_create = true;
    }

    /// Clears scripted failures for `id`.
    pub fn recover(&self, id: &InstanceId) {
        let mut guard = self.state();
        guard.failing_queries.remove(id);
        guard.failing_actions.remove(id);
    }

    /// Fixes the launch time reported for created instances.
    pub fn set_launch_time(&self, launch_time: DateTime<Utc>) {
        self.state().launch_time = Some(launch_time);
    }

    /// Runs `hook` whenever a stop call is accepted, before it returns.
    pub fn on_stop(&self, hook: impl Fn(&InstanceId) + Send + Sync + 'static) {
        self.state().on_stop = Some(Arc::new(hook));
    }

    /// Returns every call recorded so far.
    #[must_use]
    pub fn calls(&self) -> Vec<ProviderCall> {
        self.state().calls.clone()
    }

    /// Returns only the start and stop calls recorded so far.
    #[must_use]
    pub fn actions(&self) -> Vec<ProviderCall> {
        self.calls()
            .into_iter()
            .filter(|call| matches!(call, ProviderCall::Start(_) | ProviderCall::Stop(_)))
            .collect()
    }

    /// Forgets the recorded calls.
    pub fn clear_calls(&self) {
        self.state().calls.clear();
    }

    fn transition(
        &self,
        call: ProviderCall,
        id: &InstanceId,
        target: LifecycleState,
    ) -> Result<(), ScriptedProviderError> {
        let stop_hook = {
            let mut guard = self.state();
            let is_stop = matches!(call, ProviderCall::Stop(_));
            guard.calls.push(call);
            if guard.failing_actions.contains(id) {
                return Err(ScriptedProviderError::Simulated(id.to_string()));
            }
            let Some(status) = guard.statuses.get_mut(id) else {
                return Err(ScriptedProviderError::Unknown(id.clone()));
            };
            status.lifecycle_state = target;
            if is_stop { guard.on_stop.clone() } else { None }
        };
        if let Some(hook) = stop_hook {
            hook(id);
        }
        Ok(())
    }
}

impl Provider for ScriptedProvider {
    type Error = ScriptedProviderError;

    fn get_status<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> ProviderFuture<'a, InstanceStatus, Self::Error> {
        Box::pin(async move {
            let mut guard = self.state();
            guard.calls.push(ProviderCall::Status(id.clone()));
            if guard.failing_queries.contains(id) {
                return Err(ScriptedProviderError::Simulated(id.to_string()));
            }
            guard
                .statuses
                .get(id)
                .cloned()
                .ok_or_else(|| ScriptedProviderError::Unknown(id.clone()))
        })
    }

    fn start<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.transition(ProviderCall::Start(id.clone()), id, LifecycleState::running())
        })
    }

    fn stop<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            self.transition(ProviderCall::Stop(id.clone()), id, LifecycleState::stopped())
        })
    }
}

impl Provisioner for ScriptedProvider {
    fn create<'a>(
        &'a self,
        request: &'a InstanceRequest,
    ) -> ProviderFuture<'a, ProvisionedInstance, Self::Error> {
        Box::pin(async move {
            let mut guard = self.state();
            guard.calls.push(ProviderCall::Create(request.zone.clone()));
            if guard.fail_create {
                return Err(ScriptedProviderError::Simulated(request.zone.clone()));
            }
            guard.created = guard.created.saturating_add(1);
            let serial = guard.created;
            let id = InstanceId::new(format!("{}/scripted-{serial}", request.zone));
            let octet = u8::try_from(serial.min(254)).unwrap_or(254);
            let public_address = Some(IpAddr::V4(Ipv4Addr::new(192, 0, 2, octet)));
            let status = InstanceStatus::new(LifecycleState::running())
                .with_addresses(public_address, None);
            guard.statuses.insert(id.clone(), status);
            Ok(ProvisionedInstance {
                id,
                instance_class: request.instance_class.clone(),
                zone: request.zone.clone(),
                launch_time: guard.launch_time.unwrap_or_else(Utc::now),
                lifecycle_state: LifecycleState::running(),
                public_address,
                private_address: None,
                principal: Some(String::from("root")),
            })
        })
    }

    fn terminate<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut guard = self.state();
            guard.calls.push(ProviderCall::Terminate(id.clone()));
            if guard.failing_actions.contains(id) {
                return Err(ScriptedProviderError::Simulated(id.to_string()));
            }
            guard.statuses.insert(
                id.clone(),
                InstanceStatus::new(LifecycleState::terminated()),
            );
            Ok(())
        })
    }
}

#[derive(Default)]
struct MemoryState {
    records: BTreeMap<InstanceId, InstanceRecord>,
    fail_listing: bool,
    failing_writes: HashSet<InstanceId>,
    writes: usize,
}

/// In-memory [`StateStore`] with failure injection.
///
/// Enforces the same expiry invariant as [`crate::store::FileStore`]. Clones
/// share state.
#[derive(Clone, Default)]
pub struct MemoryStore {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryStore {
    /// Creates an empty store.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a store seeded with `records`.
    #[must_use]
    pub fn with_records(records: impl IntoIterator<Item = InstanceRecord>) -> Self {
        let store = Self::new();
        for record in records {
            store.insert(record);
        }
        store
    }

    fn state(&self) -> std::sync::MutexGuard<'_, MemoryState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Inserts a record directly, bypassing invariant checks and counters.
    pub fn insert(&self, record: InstanceRecord) {
        self.state().records.insert(record.id.clone(), record);
    }

    /// Returns the stored copy of a record.
    #[must_use]
    pub fn snapshot(&self, id: &InstanceId) -> Option<InstanceRecord> {
        self.state().records.get(id).cloned()
    }

    /// Makes [`StateStore::list_all`] fail while `fail` is set.
    pub fn fail_listing(&self, fail: bool) {
        self.state().fail_listing = fail;
    }

    /// Makes writes to `id` fail.
    pub fn fail_writes_for(&self, id: &InstanceId) {
        self.state().failing_writes.insert(id.clone());
    }

    /// Number of successful writes so far.
    #[must_use]
    pub fn write_count(&self) -> usize {
        self.state().writes
    }
}

fn simulated_write_failure(id: &InstanceId) -> StoreError {
    StoreError::Io {
        path: camino::Utf8PathBuf::from("memory"),
        message: format!("simulated write failure for {id}"),
    }
}

impl StateStore for MemoryStore {
    fn list_all(&self) -> Result<Vec<InstanceRecord>, StoreError> {
        let guard = self.state();
        if guard.fail_listing {
            return Err(StoreError::Io {
                path: camino::Utf8PathBuf::from("memory"),
                message: String::from("simulated listing failure"),
            });
        }
        Ok(guard.records.values().cloned().collect())
    }

    fn get(&self, id: &InstanceId) -> Result<InstanceRecord, StoreError> {
        self.state()
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })
    }

    fn save(&self, record: &InstanceRecord) -> Result<(), StoreError> {
        let mut guard = self.state();
        if guard.failing_writes.contains(&record.id) {
            return Err(simulated_write_failure(&record.id));
        }
        if guard
            .records
            .get(&record.id)
            .is_some_and(|existing| existing.expires_at > record.expires_at)
        {
            return Err(StoreError::ExpiryRegression {
                id: record.id.clone(),
            });
        }
        guard.records.insert(record.id.clone(), record.clone());
        guard.writes += 1;
        Ok(())
    }

    fn update<T, E, F>(&self, id: &InstanceId, mutate: F) -> Result<T, E>
    where
        F: FnOnce(&mut InstanceRecord) -> Result<T, E>,
        E: From<StoreError>,
    {
        let mut guard = self.state();
        if guard.failing_writes.contains(id) {
            return Err(simulated_write_failure(id).into());
        }
        let current = guard
            .records
            .get(id)
            .cloned()
            .ok_or_else(|| StoreError::NotFound { id: id.clone() })?;
        let mut working = current.clone();
        let output = mutate(&mut working)?;
        if working.id != current.id {
            return Err(StoreError::IdChanged { id: id.clone() }.into());
        }
        if working.expires_at < current.expires_at {
            return Err(StoreError::ExpiryRegression { id: id.clone() }.into());
        }
        if working != current {
            guard.records.insert(id.clone(), working);
            guard.writes += 1;
        }
        Ok(output)
    }

    fn delete(&self, id: &InstanceId) -> Result<(), StoreError> {
        let mut guard = self.state();
        if guard.records.remove(id).is_none() {
            return Err(StoreError::NotFound { id: id.clone() });
        }
        guard.writes += 1;
        Ok(())
    }
}

/// Clock that only moves when told to.
#[derive(Clone, Debug)]
pub struct ManualClock {
    now: Arc<Mutex<DateTime<Utc>>>,
}

impl ManualClock {
    /// Creates a clock frozen at `start`.
    #[must_use]
    pub fn new(start: DateTime<Utc>) -> Self {
        Self {
            now: Arc::new(Mutex::new(start)),
        }
    }

    /// Jumps to `instant`.
    pub fn set(&self, instant: DateTime<Utc>) {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner) = instant;
    }

    /// Moves the clock forward by `by`.
    pub fn advance(&self, by: Duration) {
        let delta = TimeDelta::from_std(by).unwrap_or(TimeDelta::MAX);
        let mut now = self.now.lock().unwrap_or_else(PoisonError::into_inner);
        *now = now.checked_add_signed(delta).unwrap_or(*now);
    }
}

impl Clock for ManualClock {
    fn now(&self) -> DateTime<Utc> {
        *self.now.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Global mutex used to serialise environment mutation in tests.
pub static ENV_LOCK: AsyncMutex<()> = AsyncMutex::const_new(());

/// Guard that holds the env mutex and restores variables on drop.
pub struct EnvGuard {
    previous: Vec<(String, Option<OsString>)>,
    _guard: AsyncMutexGuard<'static, ()>,
}

impl EnvGuard {
    /// Sets multiple environment variables while holding a global mutex.
    pub async fn set_vars(pairs: &[(&str, &str)]) -> Self {
        debug_assert!(
            {
                let mut seen = BTreeSet::new();
                pairs.iter().all(|(key, _)| seen.insert(*key))
            },
            "duplicate environment variable keys passed to EnvGuard::set_vars"
        );

        let guard = ENV_LOCK.lock().await;
        let mut previous = Vec::with_capacity(pairs.len());
        for (key, value) in pairs {
            let old = env::var_os(key);
            // SAFETY: Environment mutation is serialised by `ENV_LOCK`, preventing races.
            unsafe { env::set_var(key, value) };
            previous.push((key.to_string(), old));
        }

        Self {
            previous,
            _guard: guard,
        }
    }
}

impl Drop for EnvGuard {
    fn drop(&mut self) {
        for (key, old) in &self.previous {
            // SAFETY: Environment mutation is serialised by holding `_guard`.
            unsafe {
                match old {
                    Some(val) => env::set_var(key, val),
                    None => env::remove_var(key),
                }
            }
        }
    }
}
