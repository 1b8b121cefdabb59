//! Operator-facing operations over tracked instances.
//!
//! [`Fleet`] ties a [`Provisioner`] to a [`StateStore`] for the explicit
//! commands (create, extend, sync, terminate). Periodic lease enforcement is
//! the reconciler's job; nothing here stops or starts instances.

use std::time::Duration;

use chrono::{DateTime, Utc};
use thiserror::Error;
use tracing::{info, warn};

use crate::duration::format_duration;
use crate::instance::{InstanceId, InstanceRecord, InstanceStatus, LifecycleState, RecordError};
use crate::provider::{InstanceRequest, Provisioner};
use crate::reconcile::{Clock, SystemClock};
use crate::store::{StateStore, StoreError};

/// Errors raised by fleet operations.
#[derive(Debug, Error)]
pub enum FleetError<E>
where
    E: std::error::Error + 'static,
{
    /// Raised when the provider rejects or fails a request.
    #[error("provider request failed: {0}")]
    Provider(#[source] E),
    /// Raised when the state store fails.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Raised when a record would violate its lease invariants.
    #[error(transparent)]
    Record(#[from] RecordError),
}

/// Errors raised by store-only lease operations.
#[derive(Debug, Error)]
pub enum LeaseError {
    /// Raised when the state store fails.
    #[error(transparent)]
    Store(#[from] StoreError),
    /// Raised when a record would violate its lease invariants.
    #[error(transparent)]
    Record(#[from] RecordError),
}

impl<E> From<LeaseError> for FleetError<E>
where
    E: std::error::Error + 'static,
{
    fn from(value: LeaseError) -> Self {
        match value {
            LeaseError::Store(err) => Self::Store(err),
            LeaseError::Record(err) => Self::Record(err),
        }
    }
}

/// Result of a lease extension.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ExtendOutcome {
    /// Extended instance.
    pub id: InstanceId,
    /// New lease end.
    pub expires_at: DateTime<Utc>,
    /// New total lease.
    pub lease_duration: Duration,
    /// Set when the instance is halted and the next reconciliation pass will
    /// power it back on.
    pub restart_pending: bool,
}

/// Result of [`Fleet::sync_all`].
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct SyncReport {
    /// Records whose state or addresses changed.
    pub updated: Vec<InstanceId>,
    /// Records that already matched the provider.
    pub unchanged: Vec<InstanceId>,
    /// Terminal records that were not queried.
    pub skipped: Vec<InstanceId>,
    /// Records that could not be synced, with the reason.
    pub failed: Vec<(InstanceId, String)>,
}

/// Adds `by` to the lease of the stored record `id`, evaluated at `now`.
///
/// Runs as one atomic store update, so it never races a reconciliation pass
/// into losing the extension. No provider call is made; a halted instance is
/// restarted by the next pass.
///
/// # Errors
///
/// Returns [`LeaseError::Record`] for a zero extension and
/// [`LeaseError::Store`] when the record is missing or cannot be written.
pub fn extend_lease<S: StateStore>(
    store: &S,
    id: &InstanceId,
    by: Duration,
    now: DateTime<Utc>,
) -> Result<ExtendOutcome, LeaseError> {
    let outcome = store.update(id, |record| {
        let expires_at = record.extend_lease(by)?;
        Ok::<_, LeaseError>(ExtendOutcome {
            id: record.id.clone(),
            expires_at,
            lease_duration: record.lease_duration,
            restart_pending: record.lifecycle_state.is_halted() && expires_at > now,
        })
    })?;
    info!(
        instance_id = %id,
        expires_at = %outcome.expires_at,
        extended_by = %format_duration(by),
        restart_pending = outcome.restart_pending,
        "lease extended"
    );
    Ok(outcome)
}

/// Explicit lifecycle operations backed by a provider and a store.
pub struct Fleet<P, S, C = SystemClock> {
    provider: P,
    store: S,
    clock: C,
}

impl<P, S> Fleet<P, S, SystemClock>
where
    P: Provisioner,
    S: StateStore,
{
    /// Creates a fleet that reads the wall clock.
    #[must_use]
    pub const fn new(provider: P, store: S) -> Self {
        Self::with_clock(provider, store, SystemClock)
    }
}

impl<P, S, C> Fleet<P, S, C>
where
    P: Provisioner,
    S: StateStore,
    C: Clock,
{
    /// Creates a fleet with an explicit time source.
    #[must_use]
    pub const fn with_clock(provider: P, store: S, clock: C) -> Self {
        Self {
            provider,
            store,
            clock,
        }
    }

    /// Provider used by this fleet.
    #[must_use]
    pub const fn provider(&self) -> &P {
        &self.provider
    }

    /// Store used by this fleet.
    #[must_use]
    pub const fn store(&self) -> &S {
        &self.store
    }

    /// Creates an instance and starts tracking it with a lease of `lease`.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Record`] for a zero lease (checked before any
    /// provider call), [`FleetError::Provider`] when creation fails, and
    /// [`FleetError::Store`] when the record cannot be saved.
    pub async fn provision(
        &self,
        request: &InstanceRequest,
        lease: Duration,
    ) -> Result<InstanceRecord, FleetError<P::Error>> {
        if lease.is_zero() {
            return Err(RecordError::EmptyLease {
                id: InstanceId::from("<unassigned>"),
            }
            .into());
        }

        let created = self
            .provider
            .create(request)
            .await
            .map_err(FleetError::Provider)?;
        let now = self.clock.now();
        let record = InstanceRecord::new(
            created.id,
            created.instance_class,
            created.zone,
            now,
            lease,
        )?
        .with_state(created.lifecycle_state)
        .with_addresses(created.public_address, created.private_address)
        .with_access(request.credential_ref.clone(), created.principal);

        self.store.save(&record)?;
        info!(
            instance_id = %record.id,
            expires_at = %record.expires_at,
            lease = %format_duration(lease),
            "instance provisioned"
        );
        Ok(record)
    }

    /// Adds `by` to the lease of a tracked instance.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Record`] for a zero extension and
    /// [`FleetError::Store`] when the record is missing or cannot be written.
    pub fn extend(
        &self,
        id: &InstanceId,
        by: Duration,
    ) -> Result<ExtendOutcome, FleetError<P::Error>> {
        Ok(extend_lease(&self.store, id, by, self.clock.now())?)
    }

    /// Queries the provider for the live status of an instance.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Provider`] when the query fails.
    pub async fn status(&self, id: &InstanceId) -> Result<InstanceStatus, FleetError<P::Error>> {
        self.provider
            .get_status(id)
            .await
            .map_err(FleetError::Provider)
    }

    /// Writes the provider's view of one instance into its record.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Provider`] when the query fails and
    /// [`FleetError::Store`] when the record is missing or cannot be written.
    pub async fn sync(&self, id: &InstanceId) -> Result<InstanceRecord, FleetError<P::Error>> {
        let (record, _) = self.sync_one(id).await?;
        Ok(record)
    }

    /// Syncs every non-terminal record, continuing past failures.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Store`] only when the store cannot be listed.
    pub async fn sync_all(&self) -> Result<SyncReport, FleetError<P::Error>> {
        let mut report = SyncReport::default();
        for record in self.store.list_all()? {
            if record.is_terminal() {
                report.skipped.push(record.id);
                continue;
            }
            match self.sync_one(&record.id).await {
                Ok((_, true)) => report.updated.push(record.id),
                Ok((_, false)) => report.unchanged.push(record.id),
                Err(err) => {
                    warn!(instance_id = %record.id, error = %err, "failed to sync instance");
                    report.failed.push((record.id, err.to_string()));
                }
            }
        }
        Ok(report)
    }

    async fn sync_one(
        &self,
        id: &InstanceId,
    ) -> Result<(InstanceRecord, bool), FleetError<P::Error>> {
        let live = self.status(id).await?;
        let synced = self.store.update(id, |record| {
            let changed = record.observe(&live);
            Ok::<_, FleetError<P::Error>>((record.clone(), changed))
        })?;
        if synced.1 {
            info!(
                instance_id = %id,
                state = %live.lifecycle_state,
                "instance record synced"
            );
        }
        Ok(synced)
    }

    /// Deletes an instance at the provider and marks its record terminated,
    /// or removes the record entirely when `forget` is set.
    ///
    /// An instance without a local record is still terminated.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Provider`] when termination fails and
    /// [`FleetError::Store`] when the record cannot be updated.
    pub async fn terminate(&self, id: &InstanceId, forget: bool) -> Result<(), FleetError<P::Error>> {
        self.provider
            .terminate(id)
            .await
            .map_err(FleetError::Provider)?;

        let result = if forget {
            self.store.delete(id)
        } else {
            self.store.update(id, |record| {
                record.lifecycle_state = LifecycleState::terminated();
                Ok::<_, StoreError>(())
            })
        };
        match result {
            Ok(()) => {}
            Err(StoreError::NotFound { .. }) => {
                warn!(instance_id = %id, "terminated instance was not tracked locally");
            }
            Err(err) => return Err(err.into()),
        }
        info!(instance_id = %id, forget, "instance terminated");
        Ok(())
    }

    /// Returns every tracked record.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Store`] when the store cannot be read.
    pub fn records(&self) -> Result<Vec<InstanceRecord>, FleetError<P::Error>> {
        Ok(self.store.list_all()?)
    }

    /// Returns one tracked record.
    ///
    /// # Errors
    ///
    /// Returns [`FleetError::Store`] when the record is missing or the store
    /// cannot be read.
    pub fn record(&self, id: &InstanceId) -> Result<InstanceRecord, FleetError<P::Error>> {
        Ok(self.store.get(id)?)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::{ManualClock, MemoryStore, ProviderCall, ScriptedProvider};
    use chrono::{TimeDelta, TimeZone};
    use rstest::{fixture, rstest};

    const HOUR: Duration = Duration::from_secs(3600);

    fn now() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 1, 12, 0, 0)
            .single()
            .expect("valid timestamp")
    }

    #[fixture]
    fn fleet() -> Fleet<ScriptedProvider, MemoryStore, ManualClock> {
        Fleet::with_clock(
            ScriptedProvider::new(),
            MemoryStore::new(),
            ManualClock::new(now()),
        )
    }

    fn request() -> InstanceRequest {
        InstanceRequest::builder()
            .instance_class("DEV1-S")
            .zone("fr-par-1")
            .image("ubuntu_noble")
            .credential_ref(Some(String::from("ops-key")))
            .build()
            .expect("request")
    }

    #[rstest]
    #[tokio::test]
    async fn provision_tracks_new_instance(fleet: Fleet<ScriptedProvider, MemoryStore, ManualClock>) {
        let record = fleet
            .provision(&request(), HOUR * 2)
            .await
            .expect("provision");

        assert_eq!(record.launch_time, now());
        assert_eq!(record.expires_at, now() + TimeDelta::hours(2));
        assert_eq!(record.credential_ref.as_deref(), Some("ops-key"));
        assert_eq!(record.lifecycle_state, LifecycleState::running());
        assert_eq!(fleet.record(&record.id).expect("stored"), record);
    }

    #[rstest]
    #[tokio::test]
    async fn provision_rejects_zero_lease_before_creating(
        fleet: Fleet<ScriptedProvider, MemoryStore, ManualClock>,
    ) {
        let err = fleet
            .provision(&request(), Duration::ZERO)
            .await
            .expect_err("zero lease");
        assert!(matches!(err, FleetError::Record(RecordError::EmptyLease { .. })));
        assert!(fleet.provider().calls().is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn provision_surfaces_provider_failure(
        fleet: Fleet<ScriptedProvider, MemoryStore, ManualClock>,
    ) {
        fleet.provider().fail_create();
        let err = fleet.provision(&request(), HOUR).await.expect_err("failure");
        assert!(matches!(err, FleetError::Provider(_)));
        assert!(fleet.records().expect("records").is_empty());
    }

    #[rstest]
    #[tokio::test]
    async fn extend_reports_pending_restart_for_halted_instances(
        fleet: Fleet<ScriptedProvider, MemoryStore, ManualClock>,
    ) {
        let record = fleet.provision(&request(), HOUR).await.expect("provision");
        fleet
            .store()
            .update(&record.id, |stored| {
                stored.lifecycle_state = LifecycleState::stopped();
                Ok::<_, StoreError>(())
            })
            .expect("mark stopped");

        let outcome = fleet.extend(&record.id, HOUR).expect("extend");

        assert!(outcome.restart_pending);
        assert_eq!(outcome.expires_at, now() + TimeDelta::hours(2));
        assert_eq!(outcome.lease_duration, HOUR * 2);
    }

    #[rstest]
    #[tokio::test]
    async fn extend_of_running_instance_needs_no_restart(
        fleet: Fleet<ScriptedProvider, MemoryStore, ManualClock>,
    ) {
        let record = fleet.provision(&request(), HOUR).await.expect("provision");
        let outcome = fleet.extend(&record.id, HOUR).expect("extend");
        assert!(!outcome.restart_pending);
    }

    #[rstest]
    fn extend_lease_rejects_zero_extension() {
        let store = MemoryStore::with_records([InstanceRecord::new(
            InstanceId::from("fr-par-1/a"),
            "DEV1-S",
            "fr-par-1",
            now(),
            HOUR,
        )
        .expect("record")]);
        let err = extend_lease(&store, &InstanceId::from("fr-par-1/a"), Duration::ZERO, now())
            .expect_err("zero extension");
        assert!(matches!(err, LeaseError::Record(RecordError::EmptyExtension { .. })));
        assert_eq!(store.write_count(), 0);
    }

    #[rstest]
    fn extend_rejects_unknown_instances(fleet: Fleet<ScriptedProvider, MemoryStore, ManualClock>) {
        let missing = fleet
            .extend(&InstanceId::from("fr-par-1/none"), HOUR)
            .expect_err("missing");
        assert!(matches!(missing, FleetError::Store(StoreError::NotFound { .. })));
    }

    #[rstest]
    #[tokio::test]
    async fn sync_all_continues_past_failures(
        fleet: Fleet<ScriptedProvider, MemoryStore, ManualClock>,
    ) {
        let first = fleet.provision(&request(), HOUR).await.expect("first");
        let second = fleet.provision(&request(), HOUR).await.expect("second");
        let gone = fleet.provision(&request(), HOUR).await.expect("third");
        fleet.terminate(&gone.id, false).await.expect("terminate");

        fleet.provider().fail_queries(&first.id);
        fleet
            .provider()
            .set_state(&second.id, LifecycleState::stopped());

        let report = fleet.sync_all().await.expect("sync all");

        assert_eq!(report.updated, vec![second.id.clone()]);
        assert_eq!(report.skipped, vec![gone.id]);
        assert_eq!(report.failed.len(), 1);
        assert_eq!(
            fleet.record(&second.id).expect("stored").lifecycle_state,
            LifecycleState::stopped()
        );
    }

    #[rstest]
    #[case(false)]
    #[case(true)]
    #[tokio::test]
    async fn terminate_marks_or_forgets_record(
        fleet: Fleet<ScriptedProvider, MemoryStore, ManualClock>,
        #[case] forget: bool,
    ) {
        let record = fleet.provision(&request(), HOUR).await.expect("provision");
        fleet.terminate(&record.id, forget).await.expect("terminate");

        assert!(
            fleet
                .provider()
                .calls()
                .contains(&ProviderCall::Terminate(record.id.clone()))
        );
        match fleet.store().snapshot(&record.id) {
            Some(stored) => {
                assert!(!forget);
                assert_eq!(stored.lifecycle_state, LifecycleState::terminated());
            }
            None => assert!(forget),
        }
    }

    #[rstest]
    #[tokio::test]
    async fn terminate_tolerates_untracked_instances(
        fleet: Fleet<ScriptedProvider, MemoryStore, ManualClock>,
    ) {
        fleet
            .terminate(&InstanceId::from("fr-par-1/orphan"), false)
            .await
            .expect("untracked termination succeeds");
    }
}
