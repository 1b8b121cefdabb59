//! Unit tests for the Scaleway provider.

use std::net::{IpAddr, Ipv4Addr};

use rstest::{fixture, rstest};
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::TcpListener;

use super::types::{ServerEnvelope, ServerSnapshot, lifecycle_state};
use super::*;

#[fixture]
fn config() -> ScalewayConfig {
    ScalewayConfig {
        access_key: None,
        secret_key: String::from("SCWSECRETKEYEXAMPLE"),
        default_organization_id: None,
        default_project_id: String::from("11111111-2222-3333-4444-555555555555"),
        default_zone: String::from("fr-par-1"),
        default_instance_type: String::from("DEV1-S"),
        default_image: String::from("ubuntu_noble"),
        ssh_user: String::from("root"),
    }
}

/// Serves a single canned HTTP response and returns the base URL.
async fn serve_once(status_line: &'static str, body: &'static str) -> String {
    let listener = TcpListener::bind("127.0.0.1:0").await.expect("bind");
    let addr = listener.local_addr().expect("local addr");
    tokio::spawn(async move {
        let (mut socket, _) = listener.accept().await.expect("accept");
        let mut request = vec![0_u8; 8192];
        socket.read(&mut request).await.expect("read request");
        let response = format!(
            "HTTP/1.1 {status_line}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n{body}",
            body.len()
        );
        socket
            .write_all(response.as_bytes())
            .await
            .expect("write response");
    });
    format!("http://{addr}")
}

#[rstest]
#[case("fr-par-1/0d4b7d0e-1111-2222-3333-444455556666", "fr-par-1", "0d4b7d0e-1111-2222-3333-444455556666")]
#[case(" nl-ams-1 / abc ", "nl-ams-1", "abc")]
fn zoned_ids_split_into_parts(#[case] raw: &str, #[case] zone: &str, #[case] server: &str) {
    let (parsed_zone, parsed_server) =
        split_instance_id(&InstanceId::from(raw)).expect("valid id");
    assert_eq!(parsed_zone.as_str(), zone);
    assert_eq!(parsed_server.as_str(), server);
}

#[rstest]
#[case("0d4b7d0e")]
#[case("/abc")]
#[case("fr-par-1/")]
#[case("fr-par-1/a/b")]
fn malformed_ids_are_rejected(#[case] raw: &str) {
    let err = split_instance_id(&InstanceId::from(raw)).expect_err("invalid id");
    assert_eq!(
        err,
        ScalewayProviderError::InvalidInstanceId {
            id: raw.to_owned()
        }
    );
}

#[rstest]
fn zoned_id_round_trips_through_split() {
    let id = zoned_instance_id(&Zone::from("fr-par-2"), &types::ServerId::from("srv"));
    assert_eq!(id.as_str(), "fr-par-2/srv");
    assert!(split_instance_id(&id).is_ok());
}

#[rstest]
#[case("running", "running")]
#[case("starting", "pending")]
#[case("stopping", "stopping")]
#[case("stopped", "stopped")]
#[case("stopped in place", "stopped")]
#[case("locked", "locked")]
fn scaleway_states_map_to_lifecycle(#[case] scaleway: &str, #[case] expected: &str) {
    assert_eq!(lifecycle_state(scaleway), LifecycleState::from(expected));
}

#[rstest]
fn snapshot_prefers_public_ip_and_falls_back_to_public_ips() {
    let legacy: ServerEnvelope = serde_json::from_str(
        r#"{"server":{"id":"a","state":"running","public_ip":{"address":"51.15.0.1"},"private_ip":"10.0.0.4","allowed_actions":["poweroff"]}}"#,
    )
    .expect("legacy payload");
    let routed: ServerEnvelope = serde_json::from_str(
        r#"{"server":{"id":"b","state":"stopped in place","public_ip":null,"public_ips":[{"address":"bogus"},{"address":"51.15.0.2"}]}}"#,
    )
    .expect("routed payload");

    let first = ServerSnapshot::from(legacy.server);
    assert_eq!(
        first.public_address,
        Some(IpAddr::V4(Ipv4Addr::new(51, 15, 0, 1)))
    );
    assert_eq!(
        first.private_address,
        Some(IpAddr::V4(Ipv4Addr::new(10, 0, 0, 4)))
    );
    assert!(first.allows("poweroff"));
    assert!(!first.allows("poweron"));

    let second = ServerSnapshot::from(routed.server);
    assert_eq!(
        second.status().public_address,
        Some(IpAddr::V4(Ipv4Addr::new(51, 15, 0, 2)))
    );
    assert_eq!(second.status().lifecycle_state, LifecycleState::stopped());
}

#[rstest]
fn new_rejects_invalid_config(config: ScalewayConfig) {
    let cfg = ScalewayConfig {
        secret_key: String::new(),
        ..config
    };
    let Err(err) = ScalewayProvider::new(cfg) else {
        panic!("blank secret should be rejected");
    };
    assert!(matches!(err, ScalewayProviderError::Config(_)));
}

#[rstest]
#[tokio::test]
async fn missing_server_reports_terminated(config: ScalewayConfig) {
    let base = serve_once("404 Not Found", r#"{"type":"not_found"}"#).await;
    let provider = ScalewayProvider::new(config)
        .expect("provider")
        .with_api_base(base);

    let status = provider
        .get_status(&InstanceId::from("fr-par-1/gone"))
        .await
        .expect("status");
    assert_eq!(status.lifecycle_state, LifecycleState::terminated());
}

#[rstest]
#[tokio::test]
async fn live_server_status_is_mapped(config: ScalewayConfig) {
    let base = serve_once(
        "200 OK",
        r#"{"server":{"id":"srv","state":"starting","public_ip":{"address":"51.15.0.3"},"private_ip":null}}"#,
    )
    .await;
    let provider = ScalewayProvider::new(config)
        .expect("provider")
        .with_api_base(base);

    let status = provider
        .get_status(&InstanceId::from("fr-par-1/srv"))
        .await
        .expect("status");
    assert_eq!(status.lifecycle_state, LifecycleState::pending());
    assert_eq!(
        status.public_address,
        Some(IpAddr::V4(Ipv4Addr::new(51, 15, 0, 3)))
    );
}

#[rstest]
#[tokio::test]
async fn server_errors_surface_as_provider_errors(config: ScalewayConfig) {
    let base = serve_once("500 Internal Server Error", r#"{"message":"boom"}"#).await;
    let provider = ScalewayProvider::new(config)
        .expect("provider")
        .with_api_base(base);

    let err = provider
        .get_status(&InstanceId::from("fr-par-1/srv"))
        .await
        .expect_err("server error");
    assert!(matches!(err, ScalewayProviderError::Provider { .. }));
}

#[rstest]
#[tokio::test]
async fn malformed_ids_fail_before_any_request(config: ScalewayConfig) {
    let provider = ScalewayProvider::new(config).expect("provider");
    let err = provider
        .stop(&InstanceId::from("no-zone"))
        .await
        .expect_err("malformed id");
    assert!(matches!(err, ScalewayProviderError::InvalidInstanceId { .. }));
}
