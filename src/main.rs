//! Binary entry point for the Templar CLI.

use std::future::Future;
use std::io::{self, Write};
use std::process;
use std::sync::Arc;

use clap::Parser;
use thiserror::Error;
use tokio_util::sync::CancellationToken;
use tracing_subscriber::EnvFilter;

use templar::provision::{SshSettings, render_remote_command, validate_command_args};
use templar::{
    Artifact, BuildConfig, BuildError, Builder, ConsoleUi, NoopProvisioner, Provisioner,
    SshProvisioner, TemplateRecord, UpCloudClient, UpCloudConfig,
};

mod cli;

use cli::{BuildCommand, Cli, Command, DestroyCommand};

#[derive(Debug, Error)]
enum CliError {
    #[error("configuration error: {0}")]
    Config(String),
    #[error("client error: {0}")]
    Client(String),
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
    #[error(transparent)]
    Build(#[from] BuildError),
    #[error(transparent)]
    Artifact(#[from] templar::ArtifactError),
}

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    init_tracing(cli.verbose);

    let exit_code = match dispatch(cli.command).await {
        Ok(()) => 0,
        Err(err) => {
            report_error(&err);
            1
        }
    };

    process::exit(exit_code);
}

fn init_tracing(verbose: bool) {
    let default_level = if verbose { "debug" } else { "warn" };
    let filter =
        EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default_level));
    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .with_writer(io::stderr)
        .init();
}

async fn dispatch(command: Command) -> Result<(), CliError> {
    match command {
        Command::Build(args) => build(args).await,
        Command::Destroy(args) => destroy(args).await,
    }
}

fn client() -> Result<Arc<UpCloudClient>, CliError> {
    let config =
        UpCloudConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    UpCloudClient::new(&config)
        .map(Arc::new)
        .map_err(|err| CliError::Client(err.to_string()))
}

fn apply_overrides(mut config: BuildConfig, args: BuildCommand) -> Result<BuildConfig, CliError> {
    if !args.zones.is_empty() {
        config.zones = Some(args.zones.join(","));
    }
    if args.storage_uuid.is_some() {
        config.storage_uuid = args.storage_uuid;
    }
    if let Some(prefix) = args.template_prefix {
        config.template_prefix = prefix;
    }
    if !args.command.is_empty() {
        validate_command_args(&args.command)
            .map_err(|err| CliError::InvalidCommand(err.to_string()))?;
        config.provision_command = Some(render_remote_command(&args.command));
    }
    Ok(config)
}

fn provisioner_for(config: &BuildConfig) -> Arc<dyn Provisioner> {
    match config.provision_command.as_deref().map(str::trim) {
        Some(command) if !command.is_empty() => Arc::new(SshProvisioner::with_process_runner(
            SshSettings::from_build_config(config),
            command.to_owned(),
        )),
        _ => Arc::new(NoopProvisioner),
    }
}

async fn build(args: BuildCommand) -> Result<(), CliError> {
    let loaded =
        BuildConfig::load_without_cli_args().map_err(|err| CliError::Config(err.to_string()))?;
    let build_config = apply_overrides(loaded, args)?;
    let run_config = build_config
        .run_config()
        .map_err(|err| CliError::Config(err.to_string()))?;
    let provisioner = provisioner_for(&build_config);

    let builder = Builder::prepare(client()?, run_config).await?;
    let cancel = builder.cancellation();
    tokio::spawn(async move {
        if await_interrupts(tokio::signal::ctrl_c, &cancel).await {
            writeln!(io::stderr(), "Interrupted again; exiting without cleanup").ok();
            process::exit(130);
        }
    });

    let artifact = builder.run(Arc::new(ConsoleUi), provisioner).await?;
    let mut stdout = io::stdout();
    writeln!(stdout, "{artifact}").ok();
    write!(stdout, "{}", artifact.id()).ok();
    Ok(())
}

/// Cancels the build on the first interrupt so cleanup can run, then waits
/// for another. Returns `true` when a second interrupt arrives.
async fn await_interrupts<F, Fut>(mut next_interrupt: F, cancel: &CancellationToken) -> bool
where
    F: FnMut() -> Fut,
    Fut: Future<Output = io::Result<()>>,
{
    if next_interrupt().await.is_err() {
        return false;
    }
    tracing::warn!("interrupt received; cancelling build");
    writeln!(
        io::stderr(),
        "Cleaning up build resources; press Ctrl-C again to exit without cleanup"
    )
    .ok();
    cancel.cancel();
    next_interrupt().await.is_ok()
}

async fn destroy(args: DestroyCommand) -> Result<(), CliError> {
    let records = args
        .templates
        .into_iter()
        .map(|reference| TemplateRecord::parse(&reference))
        .collect::<Result<Vec<_>, _>>()?;
    let artifact = Artifact::from_records(records, client()?);
    artifact.destroy().await?;
    writeln!(io::stdout(), "deleted {} template(s)", artifact.templates().len()).ok();
    Ok(())
}

fn report_error(err: &CliError) {
    write_error(io::stderr(), err);
}

fn write_error(mut target: impl Write, err: &CliError) {
    writeln!(target, "Error: {err}").ok();
}
