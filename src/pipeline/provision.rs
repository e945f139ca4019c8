//! Hands every started server to a [`Provisioner`].

use std::sync::Arc;

use crate::cloud::CloudClient;
use crate::provision::{ProvisionTarget, Provisioner};

use super::fanout::{for_each_zone, interruptible};
use super::{RunContext, RunError, Step, StepAction, StepFuture, ZoneSlot};

const STEP_NAME: &str = "provision";

/// Step that runs the configured provisioner against every zone's server.
/// It creates nothing, so its cleanup does nothing.
pub struct ProvisionServers {
    provisioner: Arc<dyn Provisioner>,
}

impl ProvisionServers {
    /// Creates the step.
    #[must_use]
    pub fn new(provisioner: Arc<dyn Provisioner>) -> Self {
        Self { provisioner }
    }
}

fn target_for(slot: &ZoneSlot, username: &str) -> Result<ProvisionTarget, RunError> {
    let Some(ref server) = slot.server else {
        return Err(RunError::Structural(String::from(
            "no server recorded for provisioning",
        )));
    };
    let address = server.public_ipv4().ok_or_else(|| {
        RunError::Structural(format!("server {} has no public IPv4 address", server.uuid))
    })?;
    Ok(ProvisionTarget {
        zone: slot.zone.clone(),
        server_uuid: server.uuid.clone(),
        title: server.title.clone(),
        address,
        username: username.to_owned(),
    })
}

impl<C: CloudClient + 'static> Step<C> for ProvisionServers {
    fn name(&self) -> &'static str {
        STEP_NAME
    }

    fn run<'a>(&'a mut self, ctx: &'a mut RunContext<C>) -> StepFuture<'a, StepAction> {
        Box::pin(async move {
            let ui = Arc::clone(&ctx.ui);
            let provisioner = Arc::clone(&self.provisioner);
            let username = ctx.config.ssh_username.clone();
            let step_timeout = ctx.config.step_timeout;

            let outcome = for_each_zone(
                &mut ctx.slots,
                &ctx.cancel,
                STEP_NAME,
                step_timeout,
                |slot, halt| {
                    let prepared = target_for(slot, &username);
                    let (zone_ui, hook) = (ui.as_ref(), provisioner.as_ref());
                    async move {
                        let target = prepared?;
                        zone_ui.say(&format!("Provisioning server \"{}\" ...", target.title));
                        interruptible(&halt, async {
                            hook.provision(&target).await.map_err(RunError::from)
                        })
                        .await?;
                        tracing::info!(zone = %target.zone, server = %target.server_uuid, "server provisioned");
                        Ok(())
                    }
                },
            )
            .await;

            match outcome {
                Ok(()) => StepAction::Continue,
                Err(err) => ctx.halt(err),
            }
        })
    }

    fn cleanup<'a>(&'a mut self, _ctx: &'a mut RunContext<C>) -> StepFuture<'a, ()> {
        Box::pin(async {})
    }
}
