//! Command-line interface definitions for the `leasehold` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Args, Parser, Subcommand};

/// Top-level CLI for the `leasehold` binary.
#[derive(Debug, Parser)]
#[command(
    name = "leasehold",
    about = "Lease Scaleway instances for a bounded time and stop them when the lease runs out",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log at debug level regardless of configuration and `RUST_LOG`.
    #[arg(long, short, global = true)]
    pub(crate) verbose: bool,
    /// Operation to perform.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of the `leasehold` binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Create an instance and start tracking its lease.
    #[command(name = "create")]
    Create(CreateCommand),
    /// Query the provider for the live status of an instance.
    #[command(name = "status")]
    Status(InstanceArg),
    /// List tracked instances.
    #[command(name = "list")]
    List,
    /// Show the stored record of one or every tracked instance.
    #[command(name = "show")]
    Show(OptionalInstanceArg),
    /// Refresh stored state and addresses from the provider.
    #[command(name = "sync")]
    Sync(OptionalInstanceArg),
    /// Extend the lease of a tracked instance.
    #[command(name = "extend")]
    Extend(ExtendCommand),
    /// Delete an instance at the provider.
    #[command(name = "terminate")]
    Terminate(TerminateCommand),
    /// Run a single reconciliation pass and print its summary.
    #[command(name = "reconcile")]
    Reconcile,
    /// Run the reconciler until interrupted.
    #[command(name = "service")]
    Service,
}

/// Arguments for `leasehold create`.
#[derive(Debug, Args)]
pub(crate) struct CreateCommand {
    /// Override the Scaleway instance type (commercial type).
    #[arg(long, value_name = "TYPE")]
    pub(crate) instance_type: Option<String>,
    /// Override the availability zone.
    #[arg(long, value_name = "ZONE")]
    pub(crate) zone: Option<String>,
    /// Override the image reference (label or UUID).
    #[arg(long, value_name = "IMAGE")]
    pub(crate) image: Option<String>,
    /// Lease length such as `2`, `90m`, `1h30m`, or `2 hours`. A bare number
    /// means hours.
    #[arg(long, short, value_name = "DURATION")]
    pub(crate) duration: Option<String>,
    /// Reference to the credential installed on the instance.
    #[arg(long, value_name = "NAME")]
    pub(crate) credential: Option<String>,
}

/// A required instance identifier.
#[derive(Debug, Args)]
pub(crate) struct InstanceArg {
    /// Zoned instance identifier, `<zone>/<server-id>`.
    #[arg(value_name = "ID")]
    pub(crate) id: String,
}

/// An optional instance identifier; omitted means every instance.
#[derive(Debug, Args)]
pub(crate) struct OptionalInstanceArg {
    /// Zoned instance identifier, `<zone>/<server-id>`.
    #[arg(value_name = "ID")]
    pub(crate) id: Option<String>,
}

/// Arguments for `leasehold extend`.
#[derive(Debug, Args)]
pub(crate) struct ExtendCommand {
    /// Zoned instance identifier, `<zone>/<server-id>`.
    #[arg(value_name = "ID")]
    pub(crate) id: String,
    /// Extra lease time such as `30m` or `2 hours`. A bare number means
    /// hours.
    #[arg(long, short, value_name = "DURATION")]
    pub(crate) duration: String,
}

/// Arguments for `leasehold terminate`.
#[derive(Debug, Args)]
pub(crate) struct TerminateCommand {
    /// Zoned instance identifier, `<zone>/<server-id>`.
    #[arg(value_name = "ID")]
    pub(crate) id: String,
    /// Remove the local record instead of marking it terminated.
    #[arg(long)]
    pub(crate) forget: bool,
}
