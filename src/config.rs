//! Configuration loading via `ortho-config`.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8PathBuf;
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

use crate::duration::parse_lease_duration;
use crate::provider::InstanceRequest;
use crate::reconcile::ReconcilerConfig;

const APP_NAME: &str = "leasehold";
const CONFIG_FILE_NAME: &str = "leasehold.toml";
const STORE_DIR_NAME: &str = ".leasehold";
const STORE_FILE_NAME: &str = "instances.json";
const FALLBACK_STORE_DIR: &str = "/tmp/leasehold";

/// Settings for the lease reconciler and the local state store.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "LEASEHOLD",
    discovery(
        app_name = "leasehold",
        env_var = "LEASEHOLD_CONFIG_PATH",
        config_file_name = "leasehold.toml",
        dotfile_name = ".leasehold.toml",
        project_file_name = "leasehold.toml"
    )
)]
pub struct ServiceConfig {
    /// Location of the JSON state file. Defaults to
    /// `$HOME/.leasehold/instances.json`.
    pub store_path: Option<String>,
    /// Seconds between two reconciliation passes.
    #[ortho_config(default = 30)]
    pub poll_interval_secs: u64,
    /// Consecutive failed status queries after which an instance is reported
    /// as unreachable.
    #[ortho_config(default = 10)]
    pub failure_alert_threshold: u32,
    /// Lease applied to new instances when none is given (for example `1h`).
    #[ortho_config(default = "1h".to_owned())]
    pub default_lease: String,
    /// Tracing filter used when `RUST_LOG` is unset.
    #[ortho_config(default = "info".to_owned())]
    pub log_filter: String,
}

/// Scaleway specific configuration derived from environment variables,
/// configuration files, and CLI flags.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "SCW",
    discovery(
        app_name = "leasehold",
        env_var = "LEASEHOLD_CONFIG_PATH",
        config_file_name = "leasehold.toml",
        dotfile_name = ".leasehold.toml",
        project_file_name = "leasehold.toml"
    )
)]
pub struct ScalewayConfig {
    /// Access key assigned to the Scaleway application. Not needed for API
    /// calls.
    pub access_key: Option<String>,
    /// Secret key used for authentication. This value is required.
    pub secret_key: String,
    /// Organisation identifier used by some Scaleway endpoints.
    pub default_organization_id: Option<String>,
    /// Project identifier used for billing and resource scoping.
    pub default_project_id: String,
    /// Preferred availability zone. Defaults to `fr-par-1`.
    #[ortho_config(default = "fr-par-1".to_owned())]
    pub default_zone: String,
    /// Commercial type for new instances. Defaults to `DEV1-S`.
    #[ortho_config(default = "DEV1-S".to_owned())]
    pub default_instance_type: String,
    /// Image reference passed to the API verbatim (a label such as
    /// `ubuntu_noble` or an image UUID).
    #[ortho_config(default = "ubuntu_noble".to_owned())]
    pub default_image: String,
    /// Login user recorded for new instances.
    #[ortho_config(default = "root".to_owned())]
    pub ssh_user: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
    section: &'static str,
}

impl FieldMetadata {
    const fn new(
        description: &'static str,
        env_var: &'static str,
        toml_key: &'static str,
        section: &'static str,
    ) -> Self {
        Self {
            description,
            env_var,
            toml_key,
            section,
        }
    }

    fn guidance(&self) -> String {
        format!(
            "set {} or add {} to [{}] in {CONFIG_FILE_NAME}",
            self.env_var, self.toml_key, self.section
        )
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!("missing {}: {}", self.description, self.guidance()))
    }

    fn invalid(&self, problem: &str) -> ConfigError {
        ConfigError::InvalidValue(format!(
            "invalid {}: {problem}; {}",
            self.description,
            self.guidance()
        ))
    }
}

const POLL_INTERVAL: FieldMetadata = FieldMetadata::new(
    "poll interval",
    "LEASEHOLD_POLL_INTERVAL_SECS",
    "poll_interval_secs",
    "service",
);
const FAILURE_THRESHOLD: FieldMetadata = FieldMetadata::new(
    "failure alert threshold",
    "LEASEHOLD_FAILURE_ALERT_THRESHOLD",
    "failure_alert_threshold",
    "service",
);
const DEFAULT_LEASE: FieldMetadata = FieldMetadata::new(
    "default lease",
    "LEASEHOLD_DEFAULT_LEASE",
    "default_lease",
    "service",
);
const STORE_PATH: FieldMetadata =
    FieldMetadata::new("store path", "LEASEHOLD_STORE_PATH", "store_path", "service");

impl ServiceConfig {
    /// Loads service configuration without parsing CLI arguments. Values
    /// merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when merging sources fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from(APP_NAME)])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] for a zero interval, a zero
    /// threshold, a blank store path, or an unparsable default lease.
    pub fn validate(&self) -> Result<(), ConfigError> {
        self.reconciler_config()?;
        self.default_lease()?;
        if self
            .store_path
            .as_deref()
            .is_some_and(|path| path.trim().is_empty())
        {
            return Err(STORE_PATH.invalid("path is blank"));
        }
        Ok(())
    }

    /// Reconciler scheduling derived from this configuration.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the interval or threshold
    /// is zero.
    pub fn reconciler_config(&self) -> Result<ReconcilerConfig, ConfigError> {
        if self.poll_interval_secs == 0 {
            return Err(POLL_INTERVAL.invalid("must be greater than zero"));
        }
        if self.failure_alert_threshold == 0 {
            return Err(FAILURE_THRESHOLD.invalid("must be greater than zero"));
        }
        ReconcilerConfig::new(
            Duration::from_secs(self.poll_interval_secs),
            self.failure_alert_threshold,
        )
        .map_err(|err| POLL_INTERVAL.invalid(&err.to_string()))
    }

    /// Parsed default lease.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::InvalidValue`] when the value cannot be parsed.
    pub fn default_lease(&self) -> Result<Duration, ConfigError> {
        parse_lease_duration(&self.default_lease)
            .map_err(|err| DEFAULT_LEASE.invalid(&err.to_string()))
    }

    /// Resolved location of the state file.
    #[must_use]
    pub fn store_path(&self) -> Utf8PathBuf {
        self.store_path
            .as_deref()
            .map(str::trim)
            .filter(|path| !path.is_empty())
            .map_or_else(default_store_path, Utf8PathBuf::from)
    }
}

/// Default state file location: `$HOME/.leasehold/instances.json`, or
/// `/tmp/leasehold/instances.json` when `HOME` is unset or not UTF-8.
#[must_use]
pub fn default_store_path() -> Utf8PathBuf {
    std::env::var("HOME")
        .ok()
        .filter(|home| !home.trim().is_empty())
        .map_or_else(
            || Utf8PathBuf::from(FALLBACK_STORE_DIR),
            |home| Utf8PathBuf::from(home).join(STORE_DIR_NAME),
        )
        .join(STORE_FILE_NAME)
}

impl ScalewayConfig {
    fn require_field(value: &str, metadata: &FieldMetadata) -> Result<(), ConfigError> {
        if value.trim().is_empty() {
            return Err(metadata.missing());
        }
        Ok(())
    }

    /// Loads configuration without attempting to parse CLI arguments. Values
    /// still merge defaults, configuration files, and environment variables.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from(APP_NAME)])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Builds an [`InstanceRequest`] from the configured defaults, replacing
    /// any of them with the supplied overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn request_with(
        &self,
        instance_type: Option<&str>,
        zone: Option<&str>,
        image: Option<&str>,
    ) -> Result<InstanceRequest, ConfigError> {
        self.validate()?;
        InstanceRequest::builder()
            .instance_class(instance_type.unwrap_or(&self.default_instance_type))
            .zone(zone.unwrap_or(&self.default_zone))
            .image(image.unwrap_or(&self.default_image))
            .build()
            .map_err(|err| ConfigError::InvalidValue(err.to_string()))
    }

    /// Builds an [`InstanceRequest`] using the configured defaults.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError`] when validation fails.
    pub fn as_request(&self) -> Result<InstanceRequest, ConfigError> {
        self.request_with(None, None, None)
    }

    /// Performs semantic validation on required fields. Error messages include
    /// guidance on how to provide missing values via environment variables or
    /// configuration files.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when a required field is empty.
    pub fn validate(&self) -> Result<(), ConfigError> {
        Self::require_field(
            &self.secret_key,
            &FieldMetadata::new(
                "Scaleway API secret key",
                "SCW_SECRET_KEY",
                "secret_key",
                "scaleway",
            ),
        )?;
        Self::require_field(
            &self.default_project_id,
            &FieldMetadata::new(
                "Scaleway project ID",
                "SCW_DEFAULT_PROJECT_ID",
                "default_project_id",
                "scaleway",
            ),
        )?;
        Self::require_field(
            &self.default_image,
            &FieldMetadata::new("VM image", "SCW_DEFAULT_IMAGE", "default_image", "scaleway"),
        )?;
        Self::require_field(
            &self.default_instance_type,
            &FieldMetadata::new(
                "instance type",
                "SCW_DEFAULT_INSTANCE_TYPE",
                "default_instance_type",
                "scaleway",
            ),
        )?;
        Self::require_field(
            &self.default_zone,
            &FieldMetadata::new(
                "availability zone",
                "SCW_DEFAULT_ZONE",
                "default_zone",
                "scaleway",
            ),
        )?;
        Self::require_field(
            &self.ssh_user,
            &FieldMetadata::new("SSH user", "SCW_SSH_USER", "ssh_user", "scaleway"),
        )?;
        Ok(())
    }
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a configuration value is present but unusable.
    #[error("invalid configuration value: {0}")]
    InvalidValue(String),
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}
