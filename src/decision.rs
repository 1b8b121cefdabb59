//! Pure lease decisions.
//!
//! [`decide`] compares a stored record with the provider's live status at a
//! given instant and says what the reconciler should do. It performs no I/O,
//! so every branch is testable with plain values.

use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::instance::{InstanceRecord, InstanceStatus, LifecycleState};

/// Corrective provider action chosen for a record.
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum Action {
    /// Leave the instance alone.
    None,
    /// Power the instance off because its lease has ended.
    Stop,
    /// Power the instance back on because its lease was extended.
    Start,
}

impl Action {
    /// Short label used in log events.
    #[must_use]
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::None => "none",
            Self::Stop => "stop",
            Self::Start => "start",
        }
    }
}

/// Observed fields to copy into the stored record.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StateSync {
    /// Live lifecycle state.
    pub lifecycle_state: LifecycleState,
    /// Live public address.
    pub public_address: Option<IpAddr>,
    /// Live private address.
    pub private_address: Option<IpAddr>,
}

impl StateSync {
    /// Converts the sync back into the status it was taken from.
    #[must_use]
    pub fn as_status(&self) -> InstanceStatus {
        InstanceStatus::new(self.lifecycle_state.clone())
            .with_addresses(self.public_address, self.private_address)
    }
}

/// Outcome of evaluating one record.
///
/// A drift correction and a provider action can be combined: the sync is
/// applied first and the action is chosen against the synced state.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Decision {
    /// Drift correction, if the record disagrees with the provider.
    pub sync: Option<StateSync>,
    /// Provider action to take.
    pub action: Action,
}

impl Decision {
    /// A decision that changes nothing.
    #[must_use]
    pub const fn none() -> Self {
        Self {
            sync: None,
            action: Action::None,
        }
    }

    /// Returns `true` when the decision neither syncs nor acts.
    #[must_use]
    pub const fn is_noop(&self) -> bool {
        self.sync.is_none() && matches!(self.action, Action::None)
    }
}

/// Decides what to do with `record` given the provider's `live` status at
/// `now`.
///
/// Rules, first match wins:
///
/// 1. Terminal records are never touched.
/// 2. Drift in state or addresses produces a [`StateSync`]; later rules see
///    the synced state.
/// 3. An expired lease stops an active (`running`/`pending`) instance.
/// 4. An unexpired lease restarts a halted (`stopped`/`stopping`) instance.
#[must_use]
pub fn decide(record: &InstanceRecord, live: &InstanceStatus, now: DateTime<Utc>) -> Decision {
    if record.is_terminal() {
        return Decision::none();
    }

    let sync = record.drifts_from(live).then(|| StateSync {
        lifecycle_state: live.lifecycle_state.clone(),
        public_address: live.public_address,
        private_address: live.private_address,
    });

    // After the sync the effective state is always the live one.
    let state = &live.lifecycle_state;
    let action = if record.is_expired_at(now) {
        if state.is_active() {
            Action::Stop
        } else {
            Action::None
        }
    } else if state.is_halted() {
        Action::Start
    } else {
        Action::None
    };

    Decision { sync, action }
}
