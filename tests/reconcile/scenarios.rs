//! BDD scenarios for lease reconciliation.

use leasehold::TickSummary;
use rstest_bdd_macros::scenario;

use super::test_helpers::{ReconcileContext, reconcile_context, tick_summary};

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Stop an instance whose lease has expired"
)]
fn scenario_expired_stop(reconcile_context: ReconcileContext, tick_summary: TickSummary) {
    let _ = (reconcile_context, tick_summary);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Restart a stopped instance after its lease is extended"
)]
fn scenario_extension_restart(reconcile_context: ReconcileContext, tick_summary: TickSummary) {
    let _ = (reconcile_context, tick_summary);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Restart an instance found stopped before its lease ends"
)]
fn scenario_drifted_restart(reconcile_context: ReconcileContext, tick_summary: TickSummary) {
    let _ = (reconcile_context, tick_summary);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Record address drift reported by the provider"
)]
fn scenario_address_drift(reconcile_context: ReconcileContext, tick_summary: TickSummary) {
    let _ = (reconcile_context, tick_summary);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "Leave terminated instances alone"
)]
fn scenario_terminal_skip(reconcile_context: ReconcileContext, tick_summary: TickSummary) {
    let _ = (reconcile_context, tick_summary);
}

#[scenario(
    path = "tests/features/reconcile.feature",
    name = "One unreachable instance does not block the others"
)]
fn scenario_failure_isolation(reconcile_context: ReconcileContext, tick_summary: TickSummary) {
    let _ = (reconcile_context, tick_summary);
}
