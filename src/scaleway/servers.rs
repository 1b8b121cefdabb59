//! Raw Instances API calls for the Scaleway provider.

use std::sync::LazyLock;
use std::time::Duration;

use reqwest::StatusCode;
use serde::Serialize;
use uuid::Uuid;

use crate::provider::InstanceRequest;

use super::types::{ServerEnvelope, ServerId, ServerSnapshot, Zone};
use super::{ScalewayProvider, ScalewayProviderError};

const HTTP_TIMEOUT: Duration = Duration::from_secs(30);
pub(crate) const SCALEWAY_INSTANCE_API_BASE: &str = "https://api.scaleway.com/instance/v1";
pub(crate) const INSTANCE_TAG: &str = "leasehold";

static HTTP_CLIENT: LazyLock<reqwest::Client> = LazyLock::new(|| {
    reqwest::Client::builder()
        .timeout(HTTP_TIMEOUT)
        .build()
        .unwrap_or_else(|_| reqwest::Client::new())
});

#[derive(Serialize)]
struct CreateServerRequest {
    name: String,
    commercial_type: String,
    image: String,
    project: String,
    routed_ip_enabled: bool,
    dynamic_ip_required: bool,
    tags: Vec<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    organization: Option<String>,
}

impl ScalewayProvider {
    /// Fetches one server, returning `None` when the API reports it missing.
    pub(in crate::scaleway) async fn fetch_server(
        &self,
        zone: &Zone,
        server: &ServerId,
    ) -> Result<Option<ServerSnapshot>, ScalewayProviderError> {
        let url = format!(
            "{}/zones/{}/servers/{}",
            self.api_base,
            zone.as_str(),
            server.as_str()
        );
        let response = HTTP_CLIENT
            .get(&url)
            .header("X-Auth-Token", &self.config.secret_key)
            .send()
            .await
            .map_err(|err| ScalewayProviderError::provider(&err))?;

        let status = response.status();
        if status == StatusCode::NOT_FOUND {
            return Ok(None);
        }
        let body = response
            .bytes()
            .await
            .map_err(|err| ScalewayProviderError::provider(&err))?;
        if !status.is_success() {
            return Err(ScalewayProviderError::provider(&format!(
                "GET {url} returned {status}: {}",
                String::from_utf8_lossy(&body)
            )));
        }

        let envelope: ServerEnvelope = serde_json::from_slice(&body)
            .map_err(|err| ScalewayProviderError::provider(&err))?;
        Ok(Some(ServerSnapshot::from(envelope.server)))
    }

    pub(in crate::scaleway) async fn perform_action(
        &self,
        zone: &Zone,
        server: &ServerId,
        action: &str,
    ) -> Result<(), ScalewayProviderError> {
        self.api
            .perform_instance_action_async(zone.as_str(), server.as_str(), action)
            .await?;
        Ok(())
    }

    pub(in crate::scaleway) async fn power_on_if_needed(
        &self,
        zone: &Zone,
        snapshot: &ServerSnapshot,
    ) -> Result<(), ScalewayProviderError> {
        if matches!(snapshot.state.as_str(), "running" | "starting") {
            return Ok(());
        }

        if snapshot.allows(super::types::POWER_ON) {
            return self
                .perform_action(zone, &snapshot.id, super::types::POWER_ON)
                .await;
        }

        Err(ScalewayProviderError::PowerOnNotAllowed {
            instance_id: snapshot.id.as_str().to_owned(),
            state: snapshot.state.clone(),
        })
    }

    fn is_instance_type_error(
        api_err: &scaleway_rs::ScalewayApiError,
        request: &InstanceRequest,
    ) -> bool {
        matches!(api_err.resource.as_deref(), Some("commercial_type"))
            || api_err
                .resource_id
                .as_deref()
                .is_some_and(|id| id == request.instance_class)
            || (api_err.etype == "invalid_arguments"
                && api_err
                    .message
                    .to_ascii_lowercase()
                    .contains("commercial_type"))
    }

    /// Creates a server tagged for this tool. Scaleway leaves new servers
    /// stopped; the caller powers them on.
    pub(in crate::scaleway) async fn create_server(
        &self,
        request: &InstanceRequest,
    ) -> Result<(ServerSnapshot, Option<String>, Option<String>), ScalewayProviderError> {
        let url = format!("{}/zones/{}/servers", self.api_base, request.zone);
        let payload = CreateServerRequest {
            name: format!("{INSTANCE_TAG}-{}", Uuid::new_v4().simple()),
            commercial_type: request.instance_class.clone(),
            image: request.image.clone(),
            project: self.config.default_project_id.clone(),
            routed_ip_enabled: true,
            dynamic_ip_required: true,
            tags: vec![String::from(INSTANCE_TAG)],
            organization: self.config.default_organization_id.clone(),
        };

        let response = HTTP_CLIENT
            .post(&url)
            .header("X-Auth-Token", &self.config.secret_key)
            .json(&payload)
            .send()
            .await
            .map_err(|err| ScalewayProviderError::provider(&err))?;

        let status = response.status();
        let body = response
            .bytes()
            .await
            .map_err(|err| ScalewayProviderError::provider(&err))?;

        if status.is_success() {
            let envelope: ServerEnvelope = serde_json::from_slice(&body)
                .map_err(|err| ScalewayProviderError::provider(&err))?;
            let commercial_type = envelope.server.commercial_type.clone();
            let creation_date = envelope.server.creation_date.clone();
            return Ok((
                ServerSnapshot::from(envelope.server),
                commercial_type,
                creation_date,
            ));
        }

        if let Ok(api_err) = serde_json::from_slice::<scaleway_rs::ScalewayApiError>(&body)
            && Self::is_instance_type_error(&api_err, request)
        {
            return Err(ScalewayProviderError::InstanceTypeUnavailable {
                instance_type: request.instance_class.clone(),
                zone: request.zone.clone(),
            });
        }

        Err(ScalewayProviderError::provider(&String::from_utf8_lossy(
            &body,
        )))
    }
}
