//! Creates one build server per zone and tears them down afterwards.

use std::sync::Arc;

use futures::future::join_all;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::cloud::{CloudClient, CreateServerRequest, ServerState, WaitTarget};
use crate::config::RunConfig;
use crate::ui::Ui;

use super::fanout::{bounded, call, ensure_running, for_each_zone, interruptible};
use super::{CleanupError, RunContext, RunError, Step, StepAction, StepFuture, ZoneSlot};

const STEP_NAME: &str = "create-servers";

/// Step that clones the source template into a started server per zone.
///
/// Cleanup always runs and removes every recorded server together with its
/// primary disk.
#[derive(Clone, Copy, Debug, Default)]
pub struct CreateServers;

impl CreateServers {
    /// Creates the step.
    #[must_use]
    pub const fn new() -> Self {
        Self
    }
}

fn build_request(config: &RunConfig, zone: &str) -> Result<CreateServerRequest, RunError> {
    let mut builder = CreateServerRequest::builder()
        .zone(zone)
        .title(config.server_title())
        .source_storage(&config.storage_uuid)
        .disk_size_gb(config.storage_size_gb)
        .username(&config.ssh_username);
    if !config.ssh_public_key.is_empty() {
        builder = builder.ssh_key(&config.ssh_public_key);
    }
    builder
        .build()
        .map_err(|err| RunError::Structural(format!("invalid server request: {err}")))
}

async fn create_in_zone<C: CloudClient>(
    client: &C,
    ui: &dyn Ui,
    config: &RunConfig,
    slot: &mut ZoneSlot,
    halt: &CancellationToken,
) -> Result<(), RunError> {
    let request = build_request(config, &slot.zone)?;
    ensure_running(halt)?;
    ui.say(&format!("Creating server \"{}\" ...", request.title));

    let created = call(
        || format!("create server in zone {}", slot.zone),
        client.create_server(&request),
    )
    .await?;
    tracing::info!(zone = %slot.zone, server = %created.uuid, "server created");
    let uuid = created.uuid.clone();
    slot.server = Some(created);

    ui.say(&format!(
        "Waiting for server \"{}\" to enter the \"started\" state ...",
        request.title
    ));
    let started = interruptible(
        halt,
        bounded(
            format!("wait for server {uuid} to start"),
            config.state_timeout,
            client.wait_for_server_state(&uuid, WaitTarget::Reach(ServerState::Started), config.state_timeout),
        ),
    )
    .await?;
    ui.say(&format!(
        "Server \"{}\" is now in \"started\" state",
        started.title
    ));
    slot.server = Some(started);
    Ok(())
}

/// Stops and deletes one server, then deletes its primary disk.
async fn teardown_server<C: CloudClient>(
    client: &C,
    ui: &dyn Ui,
    config: &RunConfig,
    slot: &mut ZoneSlot,
) -> Result<(), CleanupError> {
    let Some(ref recorded) = slot.server else {
        return Ok(());
    };
    let uuid = recorded.uuid.clone();
    let resource = format!("server {uuid} in zone {}", slot.zone);
    let failed = |source: RunError| CleanupError {
        resource: resource.clone(),
        source,
    };

    bounded(
        format!("wait for server {uuid} to leave maintenance"),
        config.state_timeout,
        client.wait_for_server_state(&uuid, WaitTarget::Leave(ServerState::Maintenance), config.state_timeout),
    )
    .await
    .map_err(failed)?;

    let mut details = call(
        || format!("get details of server {uuid}"),
        client.get_server_details(&uuid),
    )
    .await
    .map_err(failed)?;

    if details.state != ServerState::Stopped {
        ui.say(&format!("Stopping server \"{}\" ...", details.title));
        call(|| format!("stop server {uuid}"), client.stop_server(&uuid))
            .await
            .map_err(failed)?;
        details = bounded(
            format!("wait for server {uuid} to stop"),
            config.state_timeout,
            client.wait_for_server_state(&uuid, WaitTarget::Reach(ServerState::Stopped), config.state_timeout),
        )
        .await
        .map_err(failed)?;
    }

    let disk = details.primary_disk().cloned();

    ui.say(&format!("Deleting server \"{}\" ...", details.title));
    call(|| format!("delete server {uuid}"), client.delete_server(&uuid))
        .await
        .map_err(failed)?;
    tracing::info!(zone = %slot.zone, server = %uuid, "server deleted");
    slot.server = None;

    if let Some(disk) = disk {
        ui.say(&format!("Deleting disk \"{}\" ...", disk.title));
        call(
            || format!("delete disk {}", disk.uuid),
            client.delete_storage(&disk.uuid),
        )
        .await
        .map_err(|source| CleanupError {
            resource: format!("disk {} in zone {}", disk.uuid, slot.zone),
            source,
        })?;
        tracing::info!(zone = %slot.zone, storage = %disk.uuid, "disk deleted");
    }
    Ok(())
}

impl<C: CloudClient + 'static> Step<C> for CreateServers {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    fn run<'a>(&'a mut self, ctx: &'a mut RunContext<C>) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let client = Arc::clone(&ctx.client);
            let ui = Arc::clone(&ctx.ui);
            let config = ctx.config.clone();

            let outcome = for_each_zone(
                &mut ctx.slots,
                &ctx.cancel,
                STEP_NAME,
                config.step_timeout,
                |slot, halt| {
                    let (cloud, sink, inputs) = (client.as_ref(), ui.as_ref(), &config);
                    async move { create_in_zone(cloud, sink, inputs, slot, &halt).await }
                },
            )
            .await;

            match outcome {
                Ok(()) => StepAction::Continue,
                Err(err) => ctx.halt(err),
            }
        })
    }

    fn cleanup<'a>(&'a mut self, ctx: &'a mut RunContext<C>) -> StepFuture<'a, ()> {
        Box::pin(async move {
            let client = Arc::clone(&ctx.client);
            let ui = Arc::clone(&ctx.ui);
            let config = ctx.config.clone();

            let teardowns = ctx
                .slots
                .iter_mut()
                .filter(|slot| slot.server.is_some())
                .map(|slot| teardown_server(client.as_ref(), ui.as_ref(), &config, slot));

            match timeout(config.step_timeout, join_all(teardowns)).await {
                Ok(results) => {
                    for err in results.into_iter().filter_map(Result::err) {
                        tracing::warn!(error = %err, "server cleanup failed");
                        ui.error(&err.to_string());
                    }
                }
                Err(_) => {
                    let err = RunError::StepDeadline {
                        step: STEP_NAME,
                        timeout: config.step_timeout,
                    };
                    tracing::warn!(error = %err, "server cleanup did not finish");
                    ui.error(&format!("server cleanup incomplete: {err}"));
                }
            }
        })
    }
}
