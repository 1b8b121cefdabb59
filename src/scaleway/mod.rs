//! Scaleway implementation of the provider traits.
//!
//! Instance identifiers are zoned (`fr-par-1/<server-uuid>`), the same form
//! the Scaleway CLI accepts, so every call can be routed from the identifier
//! alone.

mod error;
mod servers;
mod types;

use chrono::{DateTime, Utc};
use scaleway_rs::ScalewayApi;
use tracing::{debug, info};

use crate::config::ScalewayConfig;
use crate::instance::{InstanceId, InstanceStatus, LifecycleState};
use crate::provider::{
    InstanceRequest, Provider, ProviderFuture, ProvisionedInstance, Provisioner,
};
use types::{POWER_OFF, POWER_ON, TERMINATE, Zone, split_instance_id, zoned_instance_id};

pub use error::ScalewayProviderError;

/// Provider backed by the Scaleway Instances API.
#[derive(Clone)]
pub struct ScalewayProvider {
    api: ScalewayApi,
    config: ScalewayConfig,
    api_base: String,
}

impl ScalewayProvider {
    /// Constructs a provider from configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayProviderError::Config`] when the provided
    /// configuration fails validation.
    pub fn new(config: ScalewayConfig) -> Result<Self, ScalewayProviderError> {
        config.validate()?;
        Ok(Self {
            api: ScalewayApi::new(&config.secret_key),
            config,
            api_base: servers::SCALEWAY_INSTANCE_API_BASE.to_owned(),
        })
    }

    /// Builds an instance request from the configured defaults, replacing
    /// any of them with the supplied overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ScalewayProviderError::Config`] when configuration validation
    /// fails.
    pub fn request_with(
        &self,
        instance_type: Option<&str>,
        zone: Option<&str>,
        image: Option<&str>,
    ) -> Result<InstanceRequest, ScalewayProviderError> {
        self.config
            .request_with(instance_type, zone, image)
            .map_err(ScalewayProviderError::from)
    }

    #[cfg(test)]
    fn with_api_base(mut self, api_base: impl Into<String>) -> Self {
        self.api_base = api_base.into();
        self
    }
}

impl Provider for ScalewayProvider {
    type Error = ScalewayProviderError;

    fn get_status<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> ProviderFuture<'a, InstanceStatus, Self::Error> {
        Box::pin(async move {
            let (zone, server) = split_instance_id(id)?;
            match self.fetch_server(&zone, &server).await? {
                Some(snapshot) => Ok(snapshot.status()),
                None => {
                    debug!(instance_id = %id, "server not found, reporting terminated");
                    Ok(InstanceStatus::new(LifecycleState::terminated()))
                }
            }
        })
    }

    fn start<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let (zone, server) = split_instance_id(id)?;
            self.perform_action(&zone, &server, POWER_ON).await
        })
    }

    fn stop<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let (zone, server) = split_instance_id(id)?;
            self.perform_action(&zone, &server, POWER_OFF).await
        })
    }
}

impl Provisioner for ScalewayProvider {
    fn create<'a>(
        &'a self,
        request: &'a InstanceRequest,
    ) -> ProviderFuture<'a, ProvisionedInstance, Self::Error> {
        Box::pin(async move {
            request.validate()?;
            let zone = Zone::from(request.zone.as_str());
            let (snapshot, commercial_type, creation_date) = self.create_server(request).await?;
            let id = zoned_instance_id(&zone, &snapshot.id);
            info!(instance_id = %id, instance_type = %request.instance_class, "server created");

            self.power_on_if_needed(&zone, &snapshot).await?;
            let lifecycle_state = if snapshot.state == "running" {
                LifecycleState::running()
            } else {
                LifecycleState::pending()
            };

            Ok(ProvisionedInstance {
                id,
                instance_class: commercial_type.unwrap_or_else(|| request.instance_class.clone()),
                zone: request.zone.clone(),
                launch_time: creation_date
                    .as_deref()
                    .and_then(|date| DateTime::parse_from_rfc3339(date).ok())
                    .map_or_else(Utc::now, |date| date.with_timezone(&Utc)),
                lifecycle_state,
                public_address: snapshot.public_address,
                private_address: snapshot.private_address,
                principal: Some(self.config.ssh_user.clone()),
            })
        })
    }

    fn terminate<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let (zone, server) = split_instance_id(id)?;
            match self.fetch_server(&zone, &server).await? {
                Some(_) => self.perform_action(&zone, &server, TERMINATE).await,
                None => {
                    debug!(instance_id = %id, "server already gone");
                    Ok(())
                }
            }
        })
    }
}

#[cfg(test)]
mod tests;
