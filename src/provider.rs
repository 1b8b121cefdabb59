//! Provider abstraction for leased compute instances.
//!
//! [`Provider`] is the narrow capability the reconciler consumes: query,
//! start, and stop. [`Provisioner`] extends it with the create and terminate
//! operations that only explicit operator commands use.

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;

use chrono::{DateTime, Utc};
use thiserror::Error;

use crate::instance::{InstanceId, InstanceStatus, LifecycleState};

/// Parameters required to create a new instance.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct InstanceRequest {
    /// Commercial type or flavour to request (for example `DEV1-S`).
    pub instance_class: String,
    /// Target availability zone (for example `fr-par-1`).
    pub zone: String,
    /// Image reference passed verbatim to the provider.
    pub image: String,
    /// Optional credential installed on the instance.
    pub credential_ref: Option<String>,
}

impl InstanceRequest {
    /// Starts a builder for an [`InstanceRequest`].
    #[must_use]
    pub fn builder() -> InstanceRequestBuilder {
        InstanceRequestBuilder::new()
    }

    /// Validates the request, returning a descriptive error when a required
    /// field is missing.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when any required field is empty.
    pub fn validate(&self) -> Result<(), ProviderError> {
        if self.instance_class.is_empty() {
            return Err(ProviderError::Validation("instance_class".to_owned()));
        }
        if self.zone.is_empty() {
            return Err(ProviderError::Validation("zone".to_owned()));
        }
        if self.image.is_empty() {
            return Err(ProviderError::Validation("image".to_owned()));
        }
        Ok(())
    }
}

/// Builder for [`InstanceRequest`] that defers trimming and validation to
/// construction.
#[derive(Clone, Debug, Default, Eq, PartialEq)]
pub struct InstanceRequestBuilder {
    instance_class: String,
    zone: String,
    image: String,
    credential_ref: Option<String>,
}

impl InstanceRequestBuilder {
    /// Creates an empty builder; fields must be populated before build.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the instance class.
    #[must_use]
    pub fn instance_class(mut self, value: impl Into<String>) -> Self {
        self.instance_class = value.into();
        self
    }

    /// Sets the availability zone.
    #[must_use]
    pub fn zone(mut self, value: impl Into<String>) -> Self {
        self.zone = value.into();
        self
    }

    /// Sets the image reference.
    #[must_use]
    pub fn image(mut self, value: impl Into<String>) -> Self {
        self.image = value.into();
        self
    }

    /// Sets the optional credential reference.
    #[must_use]
    pub fn credential_ref(mut self, value: Option<String>) -> Self {
        self.credential_ref = value;
        self
    }

    /// Builds and validates the [`InstanceRequest`], trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`ProviderError::Validation`] when any required field is empty.
    pub fn build(self) -> Result<InstanceRequest, ProviderError> {
        let request = InstanceRequest {
            instance_class: self.instance_class.trim().to_owned(),
            zone: self.zone.trim().to_owned(),
            image: self.image.trim().to_owned(),
            credential_ref: self
                .credential_ref
                .map(|value| value.trim().to_owned())
                .filter(|value| !value.is_empty()),
        };
        request.validate()?;
        Ok(request)
    }
}

/// Details returned by a provisioner once an instance has been created.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionedInstance {
    /// Provider specific identifier for the instance.
    pub id: InstanceId,
    /// Instance class actually provisioned.
    pub instance_class: String,
    /// Zone in which the instance was created.
    pub zone: String,
    /// Creation timestamp reported by the provider.
    pub launch_time: DateTime<Utc>,
    /// State reported right after creation.
    pub lifecycle_state: LifecycleState,
    /// Public address, if already assigned.
    pub public_address: Option<IpAddr>,
    /// Private address, if already assigned.
    pub private_address: Option<IpAddr>,
    /// Login principal for the new instance.
    pub principal: Option<String>,
}

/// Errors raised by provider-independent request handling.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ProviderError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}

/// Future returned by provider operations.
pub type ProviderFuture<'a, T, E> = Pin<Box<dyn Future<Output = Result<T, E>> + Send + 'a>>;

/// Operations the reconciler needs from a remote provider.
pub trait Provider {
    /// Provider specific error type returned by the provider.
    type Error: std::error::Error + Send + Sync + 'static;

    /// Reports the live lifecycle state and addresses of an instance.
    fn get_status<'a>(
        &'a self,
        id: &'a InstanceId,
    ) -> ProviderFuture<'a, InstanceStatus, Self::Error>;

    /// Powers a stopped instance back on.
    fn start<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error>;

    /// Powers an instance off without deleting it.
    fn stop<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error>;
}

/// Creation and destruction, used only by explicit operator commands.
pub trait Provisioner: Provider {
    /// Creates a new instance.
    fn create<'a>(
        &'a self,
        request: &'a InstanceRequest,
    ) -> ProviderFuture<'a, ProvisionedInstance, Self::Error>;

    /// Permanently deletes an instance.
    fn terminate<'a>(&'a self, id: &'a InstanceId) -> ProviderFuture<'a, (), Self::Error>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::rstest;

    #[rstest]
    fn builder_trims_fields() {
        let request = InstanceRequest::builder()
            .instance_class(" DEV1-S ")
            .zone(" fr-par-1")
            .image("ubuntu_noble ")
            .credential_ref(Some(String::from("  ")))
            .build()
            .expect("request should build");
        assert_eq!(request.instance_class, "DEV1-S");
        assert_eq!(request.zone, "fr-par-1");
        assert_eq!(request.image, "ubuntu_noble");
        assert_eq!(request.credential_ref, None);
    }

    #[rstest]
    #[case("instance_class", "", "fr-par-1", "ubuntu_noble")]
    #[case("zone", "DEV1-S", " ", "ubuntu_noble")]
    #[case("image", "DEV1-S", "fr-par-1", "")]
    fn builder_rejects_blank_fields(
        #[case] field: &str,
        #[case] instance_class: &str,
        #[case] zone: &str,
        #[case] image: &str,
    ) {
        let err = InstanceRequest::builder()
            .instance_class(instance_class)
            .zone(zone)
            .image(image)
            .build()
            .expect_err("blank field should be rejected");
        assert_eq!(err, ProviderError::Validation(field.to_owned()));
    }
}
