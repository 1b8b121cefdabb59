//! Leased instance records and the lifecycle vocabulary shared by the
//! reconciler, the state stores, and the providers.

use std::fmt;
use std::net::IpAddr;
use std::ops::Deref;
use std::time::Duration;

use chrono::{DateTime, TimeDelta, Utc};
use serde::{Deserialize, Serialize};
use thiserror::Error;

use crate::duration::serde_secs;

const PENDING: &str = "pending";
const RUNNING: &str = "running";
const STOPPING: &str = "stopping";
const STOPPED: &str = "stopped";
const TERMINATING: &str = "terminating";
const TERMINATED: &str = "terminated";

macro_rules! newtype {
    ($(#[$meta:meta])* $name:ident) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, Ord, PartialEq, PartialOrd, Serialize, Deserialize)]
        #[serde(transparent)]
        pub struct $name(String);

        impl $name {
            /// Wraps a raw value.
            #[must_use]
            pub fn new(value: impl Into<String>) -> Self {
                Self(value.into())
            }

            /// Borrows the raw value.
            #[must_use]
            pub const fn as_str(&self) -> &str {
                self.0.as_str()
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self(value)
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                Self(value.to_owned())
            }
        }

        impl AsRef<str> for $name {
            fn as_ref(&self) -> &str {
                self.as_str()
            }
        }

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

newtype!(
    /// Provider-assigned identifier of a leased instance.
    InstanceId
);

newtype!(
    /// Provider-reported lifecycle state.
    ///
    /// The core only compares states for equality, so values outside the
    /// well-known vocabulary are carried verbatim.
    LifecycleState
);

impl LifecycleState {
    /// The instance is booting.
    #[must_use]
    pub fn pending() -> Self {
        Self::from(PENDING)
    }

    /// The instance is up.
    #[must_use]
    pub fn running() -> Self {
        Self::from(RUNNING)
    }

    /// The instance is shutting down but will remain restartable.
    #[must_use]
    pub fn stopping() -> Self {
        Self::from(STOPPING)
    }

    /// The instance is powered off and restartable.
    #[must_use]
    pub fn stopped() -> Self {
        Self::from(STOPPED)
    }

    /// The instance is being deleted.
    #[must_use]
    pub fn terminating() -> Self {
        Self::from(TERMINATING)
    }

    /// The instance no longer exists at the provider.
    #[must_use]
    pub fn terminated() -> Self {
        Self::from(TERMINATED)
    }

    /// Returns `true` for states that are never reconciled again.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(self.as_str(), TERMINATED | TERMINATING)
    }

    /// Returns `true` when the instance is consuming its lease (`running` or
    /// `pending`).
    #[must_use]
    pub fn is_active(&self) -> bool {
        matches!(self.as_str(), RUNNING | PENDING)
    }

    /// Returns `true` when the instance is halted or halting (`stopped` or
    /// `stopping`).
    #[must_use]
    pub fn is_halted(&self) -> bool {
        matches!(self.as_str(), STOPPED | STOPPING)
    }
}

/// Live status reported by a provider for one instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceStatus {
    /// Current lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// Public address, once assigned.
    pub public_address: Option<IpAddr>,
    /// Private address, once assigned.
    pub private_address: Option<IpAddr>,
}

impl InstanceStatus {
    /// Builds a status without network addresses.
    #[must_use]
    pub const fn new(lifecycle_state: LifecycleState) -> Self {
        Self {
            lifecycle_state,
            public_address: None,
            private_address: None,
        }
    }

    /// Sets the reported addresses.
    #[must_use]
    pub const fn with_addresses(
        mut self,
        public_address: Option<IpAddr>,
        private_address: Option<IpAddr>,
    ) -> Self {
        self.public_address = public_address;
        self.private_address = private_address;
        self
    }
}

/// Errors raised when a record would violate its lease invariants.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RecordError {
    /// Raised when a record is created with a zero-length lease.
    #[error("lease duration for {id} must be greater than zero")]
    EmptyLease {
        /// Identifier of the rejected record.
        id: InstanceId,
    },
    /// Raised when an extension would not move the expiry forward.
    #[error("lease extension for {id} must be greater than zero")]
    EmptyExtension {
        /// Identifier of the record being extended.
        id: InstanceId,
    },
    /// Raised when the lease end cannot be represented as a timestamp.
    #[error("lease for {id} overflows the supported time range")]
    LeaseOverflow {
        /// Identifier of the rejected record.
        id: InstanceId,
    },
}

/// Locally tracked state of a leased instance.
#[derive(Clone, Debug, Eq, PartialEq, Serialize, Deserialize)]
pub struct InstanceRecord {
    /// Provider-assigned identifier; primary key.
    pub id: InstanceId,
    /// Provider size descriptor (for example `DEV1-S`).
    pub instance_class: String,
    /// Most recently observed lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// When the instance was created.
    pub launch_time: DateTime<Utc>,
    /// Total leased runtime, including extensions.
    #[serde(with = "serde_secs")]
    pub lease_duration: Duration,
    /// When the lease ends. Only ever moves forward.
    pub expires_at: DateTime<Utc>,
    /// Public address, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub public_address: Option<IpAddr>,
    /// Private address, once known.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub private_address: Option<IpAddr>,
    /// Placement zone.
    pub zone: String,
    /// Reference to the credential installed on the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub credential_ref: Option<String>,
    /// Login principal for the instance.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub principal: Option<String>,
}

impl InstanceRecord {
    /// Creates a `pending` record whose lease starts at `launch_time`.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::EmptyLease`] for a zero lease and
    /// [`RecordError::LeaseOverflow`] when the expiry cannot be represented.
    pub fn new(
        id: InstanceId,
        instance_class: impl Into<String>,
        zone: impl Into<String>,
        launch_time: DateTime<Utc>,
        lease_duration: Duration,
    ) -> Result<Self, RecordError> {
        if lease_duration.is_zero() {
            return Err(RecordError::EmptyLease { id });
        }
        let Some(expires_at) = offset(launch_time, lease_duration) else {
            return Err(RecordError::LeaseOverflow { id });
        };
        Ok(Self {
            id,
            instance_class: instance_class.into(),
            lifecycle_state: LifecycleState::pending(),
            launch_time,
            lease_duration,
            expires_at,
            public_address: None,
            private_address: None,
            zone: zone.into(),
            credential_ref: None,
            principal: None,
        })
    }

    /// Sets the recorded lifecycle state.
    #[must_use]
    pub fn with_state(mut self, state: LifecycleState) -> Self {
        self.lifecycle_state = state;
        self
    }

    /// Sets the recorded addresses.
    #[must_use]
    pub const fn with_addresses(
        mut self,
        public_address: Option<IpAddr>,
        private_address: Option<IpAddr>,
    ) -> Self {
        self.public_address = public_address;
        self.private_address = private_address;
        self
    }

    /// Sets the access metadata.
    #[must_use]
    pub fn with_access(mut self, credential_ref: Option<String>, principal: Option<String>) -> Self {
        self.credential_ref = credential_ref;
        self.principal = principal;
        self
    }

    /// Returns `true` when the record is in a terminal state.
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        self.lifecycle_state.is_terminal()
    }

    /// Returns `true` once `now` has reached the lease end.
    #[must_use]
    pub fn is_expired_at(&self, now: DateTime<Utc>) -> bool {
        now >= self.expires_at
    }

    /// Lease time left at `now`, or `None` once expired.
    #[must_use]
    pub fn remaining_at(&self, now: DateTime<Utc>) -> Option<Duration> {
        (self.expires_at - now).to_std().ok().filter(|left| !left.is_zero())
    }

    /// Returns `true` when the live status disagrees with the record on state
    /// or addresses.
    #[must_use]
    pub fn drifts_from(&self, status: &InstanceStatus) -> bool {
        self.lifecycle_state != status.lifecycle_state
            || self.public_address != status.public_address
            || self.private_address != status.private_address
    }

    /// Copies the observed state and addresses into the record, returning
    /// whether anything changed.
    pub fn observe(&mut self, status: &InstanceStatus) -> bool {
        if !self.drifts_from(status) {
            return false;
        }
        self.lifecycle_state = status.lifecycle_state.clone();
        self.public_address = status.public_address;
        self.private_address = status.private_address;
        true
    }

    /// Extends the lease by `by`, returning the new expiry.
    ///
    /// # Errors
    ///
    /// Returns [`RecordError::EmptyExtension`] for a zero extension and
    /// [`RecordError::LeaseOverflow`] when the new expiry cannot be
    /// represented. The record is unchanged on error.
    pub fn extend_lease(&mut self, by: Duration) -> Result<DateTime<Utc>, RecordError> {
        if by.is_zero() {
            return Err(RecordError::EmptyExtension {
                id: self.id.clone(),
            });
        }
        let (Some(expires_at), Some(lease_duration)) = (
            offset(self.expires_at, by),
            self.lease_duration.checked_add(by),
        ) else {
            return Err(RecordError::LeaseOverflow {
                id: self.id.clone(),
            });
        };
        self.expires_at = expires_at;
        self.lease_duration = lease_duration;
        Ok(expires_at)
    }

    /// SSH-style `principal@address` target, when both are known.
    #[must_use]
    pub fn ssh_target(&self) -> Option<String> {
        let principal = self.principal.as_deref()?;
        let address = self.public_address?;
        Some(format!("{principal}@{address}"))
    }
}

fn offset(start: DateTime<Utc>, by: Duration) -> Option<DateTime<Utc>> {
    TimeDelta::from_std(by)
        .ok()
        .and_then(|delta| start.checked_add_signed(delta))
}
