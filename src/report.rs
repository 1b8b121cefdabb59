//! Plain-text rendering of records and reconciliation results.

use std::io::{self, Write};
use std::net::IpAddr;

use chrono::{DateTime, Utc};

use crate::duration::format_duration;
use crate::fleet::{ExtendOutcome, SyncReport};
use crate::instance::{InstanceRecord, InstanceStatus};
use crate::reconcile::TickSummary;

fn address(value: Option<IpAddr>) -> String {
    value.map_or_else(|| String::from("-"), |ip| ip.to_string())
}

fn remaining(record: &InstanceRecord, now: DateTime<Utc>) -> String {
    if record.is_terminal() {
        return String::from("-");
    }
    record
        .remaining_at(now)
        .map_or_else(|| String::from("expired"), format_duration)
}

/// Writes one line per record: id, state, time left, public address.
///
/// # Errors
///
/// Returns any error raised by `out`.
pub fn write_record_table(
    out: &mut impl Write,
    records: &[InstanceRecord],
    now: DateTime<Utc>,
) -> io::Result<()> {
    if records.is_empty() {
        return writeln!(out, "no tracked instances");
    }
    writeln!(
        out,
        "{:<48} {:<12} {:<10} {}",
        "ID", "STATE", "REMAINING", "PUBLIC IP"
    )?;
    for record in records {
        writeln!(
            out,
            "{:<48} {:<12} {:<10} {}",
            record.id,
            record.lifecycle_state,
            remaining(record, now),
            address(record.public_address)
        )?;
    }
    Ok(())
}

/// Writes every field of a record.
///
/// # Errors
///
/// Returns any error raised by `out`.
pub fn write_record_detail(
    out: &mut impl Write,
    record: &InstanceRecord,
    now: DateTime<Utc>,
) -> io::Result<()> {
    writeln!(out, "id:           {}", record.id)?;
    writeln!(out, "state:        {}", record.lifecycle_state)?;
    writeln!(out, "type:         {}", record.instance_class)?;
    writeln!(out, "zone:         {}", record.zone)?;
    writeln!(out, "launched:     {}", record.launch_time.to_rfc3339())?;
    writeln!(out, "lease:        {}", format_duration(record.lease_duration))?;
    writeln!(out, "expires:      {}", record.expires_at.to_rfc3339())?;
    writeln!(out, "remaining:    {}", remaining(record, now))?;
    writeln!(out, "public ip:    {}", address(record.public_address))?;
    writeln!(out, "private ip:   {}", address(record.private_address))?;
    if let Some(credential) = &record.credential_ref {
        writeln!(out, "credential:   {credential}")?;
    }
    if let Some(target) = record.ssh_target() {
        writeln!(out, "ssh:          ssh {target}")?;
    }
    Ok(())
}

/// Writes a live provider status.
///
/// # Errors
///
/// Returns any error raised by `out`.
pub fn write_status(out: &mut impl Write, status: &InstanceStatus) -> io::Result<()> {
    writeln!(out, "state:        {}", status.lifecycle_state)?;
    writeln!(out, "public ip:    {}", address(status.public_address))?;
    writeln!(out, "private ip:   {}", address(status.private_address))
}

/// Writes the result of a lease extension.
///
/// # Errors
///
/// Returns any error raised by `out`.
pub fn write_extension(out: &mut impl Write, outcome: &ExtendOutcome) -> io::Result<()> {
    writeln!(
        out,
        "{} now expires at {} (lease {})",
        outcome.id,
        outcome.expires_at.to_rfc3339(),
        format_duration(outcome.lease_duration)
    )?;
    if outcome.restart_pending {
        writeln!(out, "the instance will be restarted on the next reconciliation pass")?;
    }
    Ok(())
}

/// Writes the result of a bulk sync.
///
/// # Errors
///
/// Returns any error raised by `out`.
pub fn write_sync_report(out: &mut impl Write, report: &SyncReport) -> io::Result<()> {
    writeln!(
        out,
        "updated {}, unchanged {}, skipped {}, failed {}",
        report.updated.len(),
        report.unchanged.len(),
        report.skipped.len(),
        report.failed.len()
    )?;
    for (id, reason) in &report.failed {
        writeln!(out, "  {id}: {reason}")?;
    }
    Ok(())
}

/// Writes the counters of a reconciliation pass.
///
/// # Errors
///
/// Returns any error raised by `out`.
pub fn write_tick_summary(out: &mut impl Write, summary: &TickSummary) -> io::Result<()> {
    if summary.listing_failed {
        return writeln!(out, "reconciliation pass aborted: state store unavailable");
    }
    writeln!(
        out,
        "examined {}: stopped {}, started {}, synced {}, skipped {} terminal",
        summary.examined,
        summary.stopped,
        summary.started,
        summary.synced,
        summary.skipped_terminal
    )?;
    let failures = summary.query_failures + summary.action_failures + summary.persist_failures;
    if failures > 0 {
        writeln!(
            out,
            "failures: {} queries, {} actions, {} writes",
            summary.query_failures, summary.action_failures, summary.persist_failures
        )?;
    }
    Ok(())
}
