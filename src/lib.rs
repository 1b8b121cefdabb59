//! Core library for the leasehold lease manager.
//!
//! Every tracked instance carries a lease (a launch time plus a duration).
//! The [`Reconciler`] periodically compares each stored lease with the
//! provider's live view: expired instances are powered off, halted instances
//! whose lease was extended are powered back on, and drifted state or
//! addresses are written back. [`Fleet`] exposes the explicit operator
//! commands (create, extend, sync, terminate) and a Scaleway implementation
//! of the provider traits backs the command-line tool.

pub mod config;
pub mod decision;
pub mod duration;
pub mod fleet;
pub mod instance;
pub mod provider;
pub mod reconcile;
pub mod report;
pub mod scaleway;
pub mod store;
pub mod telemetry;
pub mod test_support;

pub use config::{ConfigError, ScalewayConfig, ServiceConfig};
pub use decision::{Action, Decision, StateSync, decide};
pub use fleet::{ExtendOutcome, Fleet, FleetError, LeaseError, SyncReport, extend_lease};
pub use instance::{InstanceId, InstanceRecord, InstanceStatus, LifecycleState, RecordError};
pub use provider::{
    InstanceRequest, InstanceRequestBuilder, Provider, ProviderError, ProviderFuture,
    ProvisionedInstance, Provisioner,
};
pub use reconcile::{
    Clock, ReconcileError, Reconciler, ReconcilerConfig, SystemClock, TickSummary,
};
pub use scaleway::{ScalewayProvider, ScalewayProviderError};
pub use store::{FileStore, StateStore, StoreError};
