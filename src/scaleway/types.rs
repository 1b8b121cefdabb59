//! Newtypes and mappings for Scaleway lifecycle values.

use std::net::IpAddr;
use std::ops::Deref;
use std::str::FromStr;

use serde::Deserialize;

use crate::instance::{InstanceId, InstanceStatus, LifecycleState};

use super::ScalewayProviderError;

macro_rules! newtype {
    ($name:ident) => {
        #[derive(Clone, Debug, Eq, PartialEq)]
        pub(crate) struct $name(String);

        impl $name {
            pub(crate) const fn as_str(&self) -> &str {
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

        impl Deref for $name {
            type Target = str;
            fn deref(&self) -> &Self::Target {
                self.as_str()
            }
        }
    };
}

newtype!(Zone);
newtype!(ServerId);
newtype!(Action);

pub(crate) const POWER_ON: &str = "poweron";
pub(crate) const POWER_OFF: &str = "poweroff";
pub(crate) const TERMINATE: &str = "terminate";

/// Splits a zoned identifier (`fr-par-1/<uuid>`) into its parts.
pub(crate) fn split_instance_id(
    id: &InstanceId,
) -> Result<(Zone, ServerId), ScalewayProviderError> {
    match id.as_str().split_once('/') {
        Some((zone, server))
            if !zone.trim().is_empty()
                && !server.trim().is_empty()
                && !server.contains('/') =>
        {
            Ok((Zone::from(zone.trim()), ServerId::from(server.trim())))
        }
        _ => Err(ScalewayProviderError::InvalidInstanceId {
            id: id.to_string(),
        }),
    }
}

/// Joins a zone and server identifier into the form stored in records.
pub(crate) fn zoned_instance_id(zone: &Zone, server: &ServerId) -> InstanceId {
    InstanceId::new(format!("{}/{}", zone.as_str(), server.as_str()))
}

/// Maps Scaleway server states onto the lifecycle vocabulary. Unknown states
/// (such as `locked`) are carried verbatim.
pub(crate) fn lifecycle_state(scaleway_state: &str) -> LifecycleState {
    match scaleway_state {
        "running" => LifecycleState::running(),
        "starting" => LifecycleState::pending(),
        "stopping" => LifecycleState::stopping(),
        "stopped" | "stopped in place" => LifecycleState::stopped(),
        other => LifecycleState::from(other),
    }
}

#[derive(Clone, Debug, Deserialize)]
pub(crate) struct PublicIpPayload {
    pub(crate) address: String,
}

/// Subset of the server resource the provider reads.
#[derive(Clone, Debug, Deserialize)]
pub(crate) struct ServerPayload {
    pub(crate) id: String,
    pub(crate) state: String,
    #[serde(default)]
    pub(crate) commercial_type: Option<String>,
    #[serde(default)]
    pub(crate) creation_date: Option<String>,
    #[serde(default)]
    pub(crate) allowed_actions: Vec<String>,
    #[serde(default)]
    pub(crate) public_ip: Option<PublicIpPayload>,
    #[serde(default)]
    pub(crate) public_ips: Vec<PublicIpPayload>,
    #[serde(default)]
    pub(crate) private_ip: Option<String>,
}

#[derive(Debug, Deserialize)]
pub(crate) struct ServerEnvelope {
    pub(crate) server: ServerPayload,
}

/// Normalised view of a server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub(crate) struct ServerSnapshot {
    pub(crate) id: ServerId,
    pub(crate) state: String,
    pub(crate) allowed_actions: Vec<Action>,
    pub(crate) public_address: Option<IpAddr>,
    pub(crate) private_address: Option<IpAddr>,
}

impl From<ServerPayload> for ServerSnapshot {
    fn from(payload: ServerPayload) -> Self {
        let public_address = payload
            .public_ip
            .iter()
            .chain(payload.public_ips.iter())
            .find_map(|ip| IpAddr::from_str(&ip.address).ok());
        let private_address = payload
            .private_ip
            .as_deref()
            .and_then(|ip| IpAddr::from_str(ip).ok());
        Self {
            id: ServerId::from(payload.id),
            state: payload.state,
            allowed_actions: payload
                .allowed_actions
                .into_iter()
                .map(Action::from)
                .collect(),
            public_address,
            private_address,
        }
    }
}

impl ServerSnapshot {
    pub(crate) fn status(&self) -> InstanceStatus {
        InstanceStatus::new(lifecycle_state(&self.state))
            .with_addresses(self.public_address, self.private_address)
    }

    pub(crate) fn allows(&self, action: &str) -> bool {
        self.allowed_actions
            .iter()
            .any(|allowed| allowed.as_str() == action)
    }
}
