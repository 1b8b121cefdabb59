//! Binary entry point for the leasehold CLI.

mod cli;

use std::env;
use std::io::{self, Write};
use std::process;

use chrono::Utc;
use clap::Parser;
use thiserror::Error;
use tracing::info;

use cli::{Cli, Command, CreateCommand, ExtendCommand, InstanceArg, OptionalInstanceArg};
use leasehold::duration::{DurationError, format_duration, parse_lease_duration};
use leasehold::fleet::{Fleet, FleetError, LeaseError, extend_lease};
use leasehold::report::{
    write_extension, write_record_detail, write_record_table, write_status, write_sync_report,
    write_tick_summary,
};
use leasehold::telemetry::{self, TelemetryError, select_directive};
use leasehold::{
    ConfigError, FileStore, InstanceId, Reconciler, ScalewayConfig, ScalewayProvider,
    ScalewayProviderError, ServiceConfig, StateStore, StoreError,
};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
    #[error("logging setup failed: {0}")]
    Telemetry(#[from] TelemetryError),
    #[error("provider error: {0}")]
    Provider(#[from] ScalewayProviderError),
    #[error("state store error: {0}")]
    Store(#[from] StoreError),
    #[error("lease update failed: {0}")]
    Lease(#[from] LeaseError),
    #[error("invalid duration: {0}")]
    Duration(#[from] DurationError),
    #[error(transparent)]
    Fleet(#[from] FleetError<ScalewayProviderError>),
    #[error("i/o error: {0}")]
    Io(#[from] io::Error),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let exit_code = match dispatch(cli).await {
        Ok(code) => code,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

async fn dispatch(cli: Cli) -> Result<i32, CliError> {
    let service = ServiceConfig::load_without_cli_args()?;
    service.validate()?;
    let env_directive = env::var("RUST_LOG").ok();
    telemetry::init(&select_directive(
        cli.verbose,
        env_directive.as_deref(),
        &service.log_filter,
    ))?;
    let store = FileStore::new(service.store_path());

    match cli.command {
        Command::Create(args) => create(&service, store, &args).await,
        Command::Status(args) => status(store, &args).await,
        Command::List => list(&store),
        Command::Show(args) => show(&store, &args),
        Command::Sync(args) => sync(store, &args).await,
        Command::Extend(args) => extend(&store, &args),
        Command::Terminate(args) => terminate(store, &args.id, args.forget).await,
        Command::Reconcile => reconcile(&service, store).await,
        Command::Service => serve(&service, store).await,
    }
}

fn scaleway() -> Result<ScalewayProvider, CliError> {
    let config = ScalewayConfig::load_without_cli_args()?;
    Ok(ScalewayProvider::new(config)?)
}

async fn create(
    service: &ServiceConfig,
    store: FileStore,
    args: &CreateCommand,
) -> Result<i32, CliError> {
    let lease = args.duration.as_deref().map_or_else(
        || service.default_lease().map_err(CliError::from),
        |raw| parse_lease_duration(raw).map_err(CliError::from),
    )?;
    let provider = scaleway()?;
    let mut request = provider.request_with(
        args.instance_type.as_deref(),
        args.zone.as_deref(),
        args.image.as_deref(),
    )?;
    request.credential_ref = args
        .credential
        .as_deref()
        .map(str::trim)
        .filter(|credential| !credential.is_empty())
        .map(str::to_owned);

    let fleet = Fleet::new(provider, store);
    let record = fleet.provision(&request, lease).await?;
    write_record_detail(&mut io::stdout().lock(), &record, Utc::now())?;
    Ok(0)
}

async fn status(store: FileStore, args: &InstanceArg) -> Result<i32, CliError> {
    let fleet = Fleet::new(scaleway()?, store);
    let live = fleet.status(&InstanceId::from(args.id.as_str())).await?;
    write_status(&mut io::stdout().lock(), &live)?;
    Ok(0)
}

fn list(store: &FileStore) -> Result<i32, CliError> {
    let records = store.list_all()?;
    write_record_table(&mut io::stdout().lock(), &records, Utc::now())?;
    Ok(0)
}

fn show(store: &FileStore, args: &OptionalInstanceArg) -> Result<i32, CliError> {
    let now = Utc::now();
    let mut out = io::stdout().lock();
    if let Some(id) = &args.id {
        let record = store.get(&InstanceId::from(id.as_str()))?;
        write_record_detail(&mut out, &record, now)?;
        return Ok(0);
    }

    let records = store.list_all()?;
    if records.is_empty() {
        writeln!(out, "no tracked instances")?;
    }
    for (position, record) in records.iter().enumerate() {
        if position > 0 {
            writeln!(out)?;
        }
        write_record_detail(&mut out, record, now)?;
    }
    Ok(0)
}

async fn sync(store: FileStore, args: &OptionalInstanceArg) -> Result<i32, CliError> {
    let fleet = Fleet::new(scaleway()?, store);
    if let Some(id) = &args.id {
        let record = fleet.sync(&InstanceId::from(id.as_str())).await?;
        write_record_detail(&mut io::stdout().lock(), &record, Utc::now())?;
        return Ok(0);
    }

    let report = fleet.sync_all().await?;
    write_sync_report(&mut io::stdout().lock(), &report)?;
    Ok(i32::from(!report.failed.is_empty()))
}

fn extend(store: &FileStore, args: &ExtendCommand) -> Result<i32, CliError> {
    let by = parse_lease_duration(&args.duration)?;
    let outcome = extend_lease(store, &InstanceId::from(args.id.as_str()), by, Utc::now())?;
    write_extension(&mut io::stdout().lock(), &outcome)?;
    Ok(0)
}

async fn terminate(store: FileStore, id: &str, forget: bool) -> Result<i32, CliError> {
    let fleet = Fleet::new(scaleway()?, store);
    let instance = InstanceId::from(id);
    fleet.terminate(&instance, forget).await?;
    writeln!(io::stdout(), "{instance} terminated")?;
    Ok(0)
}

async fn reconcile(service: &ServiceConfig, store: FileStore) -> Result<i32, CliError> {
    let reconciler = Reconciler::new(scaleway()?, store, service.reconciler_config()?);
    let summary = reconciler.run_once().await;
    write_tick_summary(&mut io::stdout().lock(), &summary)?;
    Ok(i32::from(summary.listing_failed))
}

async fn serve(service: &ServiceConfig, store: FileStore) -> Result<i32, CliError> {
    let config = service.reconciler_config()?;
    let store_path = store.path().to_owned();
    let reconciler = Reconciler::new(scaleway()?, store, config);
    if reconciler.start() {
        info!(
            poll_interval = %format_duration(config.poll_interval()),
            failure_alert_threshold = config.failure_alert_threshold(),
            store = %store_path,
            "reconciler service started"
        );
    }

    let signal = shutdown_signal().await;
    reconciler.stop().await;
    signal?;
    info!("reconciler service stopped");
    Ok(0)
}

#[cfg(unix)]
async fn shutdown_signal() -> io::Result<()> {
    use tokio::signal::unix::{SignalKind, signal};

    let mut terminate = signal(SignalKind::terminate())?;
    tokio::select! {
        result = tokio::signal::ctrl_c() => result,
        _ = terminate.recv() => Ok(()),
    }
}

#[cfg(not(unix))]
async fn shutdown_signal() -> io::Result<()> {
    tokio::signal::ctrl_c().await
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "{err}").ok();
}
