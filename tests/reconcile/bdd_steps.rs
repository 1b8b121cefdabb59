//! BDD step definitions for lease reconciliation.

use std::net::IpAddr;

use leasehold::duration::parse_lease_duration;
use leasehold::test_support::ProviderCall;
use leasehold::{InstanceId, InstanceStatus, LifecycleState, TickSummary, extend_lease};
use rstest_bdd_macros::{given, then, when};
use tokio::runtime::Runtime;

use super::test_helpers::{ReconcileContext, hours_to_duration};

#[derive(Debug, thiserror::Error)]
pub enum StepError {
    #[error("assertion failed: {0}")]
    Assertion(String),
}

#[given("a running instance \"{id}\" with a {hours} hour lease")]
fn running_instance(reconcile_context: &ReconcileContext, id: String, hours: u64) {
    reconcile_context.track(&id, "running", hours);
}

#[given("a stopped instance \"{id}\" with a {hours} hour lease")]
fn stopped_instance(reconcile_context: &ReconcileContext, id: String, hours: u64) {
    reconcile_context.track(&id, "stopped", hours);
}

#[given("a terminated instance \"{id}\" with a {hours} hour lease")]
fn terminated_instance(reconcile_context: &ReconcileContext, id: String, hours: u64) {
    reconcile_context.track(&id, "terminated", hours);
}

#[given("{hours} hours have passed")]
fn hours_pass(reconcile_context: &ReconcileContext, hours: u64) {
    reconcile_context.clock.advance(hours_to_duration(hours));
}

#[given("the lease of \"{id}\" is extended by \"{by}\"")]
fn lease_extended(
    reconcile_context: &ReconcileContext,
    id: String,
    by: String,
) -> Result<(), StepError> {
    let extra = parse_lease_duration(&by).map_err(|err| StepError::Assertion(err.to_string()))?;
    extend_lease(
        &reconcile_context.store,
        &InstanceId::from(id.as_str()),
        extra,
        reconcile_context.clock_now(),
    )
    .map_err(|err| StepError::Assertion(err.to_string()))?;
    Ok(())
}

#[given("the provider reports \"{id}\" with public address \"{address}\"")]
fn provider_reports_address(
    reconcile_context: &ReconcileContext,
    id: String,
    address: String,
) -> Result<(), StepError> {
    let ip: IpAddr = address
        .parse()
        .map_err(|err| StepError::Assertion(format!("{address}: {err}")))?;
    let instance = InstanceId::from(id.as_str());
    let state = reconcile_context
        .provider
        .status(&instance)
        .map_or_else(LifecycleState::running, |status| status.lifecycle_state);
    reconcile_context.provider.set_status(
        &instance,
        InstanceStatus::new(state).with_addresses(Some(ip), None),
    );
    Ok(())
}

#[given("the provider reports \"{id}\" as \"{state}\"")]
fn provider_reports_state(reconcile_context: &ReconcileContext, id: String, state: String) {
    reconcile_context
        .provider
        .set_state(&InstanceId::from(id.as_str()), LifecycleState::from(state.as_str()));
}

#[given("status queries for \"{id}\" fail")]
fn status_queries_fail(reconcile_context: &ReconcileContext, id: String) {
    reconcile_context
        .provider
        .fail_queries(&InstanceId::from(id.as_str()));
}

#[when("a reconciliation pass runs")]
fn pass_runs(reconcile_context: &ReconcileContext) -> Result<TickSummary, StepError> {
    let runtime = Runtime::new().map_err(|err| StepError::Assertion(err.to_string()))?;
    let reconciler = reconcile_context.reconciler();
    Ok(runtime.block_on(async move { reconciler.run_once().await }))
}

#[then("the provider received a stop for \"{id}\"")]
fn received_stop(reconcile_context: &ReconcileContext, id: String) -> Result<(), StepError> {
    expect_action(reconcile_context, &ProviderCall::Stop(InstanceId::from(id.as_str())))
}

#[then("the provider received a start for \"{id}\"")]
fn received_start(reconcile_context: &ReconcileContext, id: String) -> Result<(), StepError> {
    expect_action(reconcile_context, &ProviderCall::Start(InstanceId::from(id.as_str())))
}

fn expect_action(context: &ReconcileContext, expected: &ProviderCall) -> Result<(), StepError> {
    let actions = context.provider.actions();
    if actions.contains(expected) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {expected:?}, provider saw {actions:?}"
        )))
    }
}

#[then("no power actions were requested")]
fn no_actions(reconcile_context: &ReconcileContext) -> Result<(), StepError> {
    let actions = reconcile_context.provider.actions();
    if actions.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected actions: {actions:?}")))
    }
}

#[then("the provider was not queried")]
fn not_queried(reconcile_context: &ReconcileContext) -> Result<(), StepError> {
    let calls = reconcile_context.provider.calls();
    if calls.is_empty() {
        Ok(())
    } else {
        Err(StepError::Assertion(format!("unexpected calls: {calls:?}")))
    }
}

#[then("the stored state of \"{id}\" is \"{state}\"")]
fn stored_state(
    reconcile_context: &ReconcileContext,
    id: String,
    state: String,
) -> Result<(), StepError> {
    let record = reconcile_context.stored(&id);
    if record.lifecycle_state.as_str() == state {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {id} to be {state}, found {}",
            record.lifecycle_state
        )))
    }
}

#[then("the stored public address of \"{id}\" is \"{address}\"")]
fn stored_address(
    reconcile_context: &ReconcileContext,
    id: String,
    address: String,
) -> Result<(), StepError> {
    let record = reconcile_context.stored(&id);
    let stored = record.public_address.map(|ip| ip.to_string());
    if stored.as_deref() == Some(address.as_str()) {
        Ok(())
    } else {
        Err(StepError::Assertion(format!(
            "expected {id} at {address}, found {stored:?}"
        )))
    }
}

#[then("the pass synced {count} record")]
fn synced_count(tick_summary: &TickSummary, count: usize) {
    assert_eq!(tick_summary.synced, count, "summary: {tick_summary:?}");
}

#[then("the pass skipped {count} terminal record")]
fn skipped_count(tick_summary: &TickSummary, count: usize) {
    assert_eq!(tick_summary.skipped_terminal, count, "summary: {tick_summary:?}");
}

#[then("the pass recorded {count} query failure")]
fn query_failure_count(tick_summary: &TickSummary, count: usize) {
    assert_eq!(tick_summary.query_failures, count, "summary: {tick_summary:?}");
}
