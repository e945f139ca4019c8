//! Converts each build server's primary disk into a private template.

use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::{SystemTime, UNIX_EPOCH};

use futures::future::join_all;
use tokio::time::timeout;
use tokio_util::sync::CancellationToken;

use crate::cloud::{CloudClient, ServerState, StorageState, TemplatizeRequest, WaitTarget};
use crate::config::RunConfig;
use crate::ui::Ui;

use super::fanout::{bounded, call, ensure_running, for_each_zone, interruptible};
use super::{CleanupError, RunContext, RunError, Step, StepAction, StepFuture, ZoneSlot};

const STEP_NAME: &str = "templatize";

static LAST_SUFFIX: AtomicU64 = AtomicU64::new(0);

/// Returns the current unix time in seconds, bumped past any suffix already
/// handed out by this process so titles never repeat.
fn next_title_suffix() -> u64 {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .map_or(0, |elapsed| elapsed.as_secs());
    let mut last = LAST_SUFFIX.load(Ordering::SeqCst);
    loop {
        let candidate = now.max(last.saturating_add(1));
        match LAST_SUFFIX.compare_exchange(last, candidate, Ordering::SeqCst, Ordering::SeqCst) {
            Ok(_) => return candidate,
            Err(current) => last = current,
        }
    }
}

/// Step that stops every server and templatizes its primary disk.
///
/// Templates are only removed on cleanup when this step did not complete.
#[derive(Clone, Copy, Debug, Default)]
pub struct Templatize {
    succeeded: bool,
}

impl Templatize {
    /// Creates the step.
    #[must_use]
    pub const fn new() -> Self {
        Self { succeeded: false }
    }
}

async fn templatize_in_zone<C: CloudClient>(
    client: &C,
    ui: &dyn Ui,
    config: &RunConfig,
    slot: &mut ZoneSlot,
    halt: &CancellationToken,
) -> Result<(), RunError> {
    let Some(ref server) = slot.server else {
        return Err(RunError::Structural(String::from(
            "no server recorded for templatize",
        )));
    };
    let uuid = server.uuid.clone();
    let title = server.title.clone();

    ui.say(&format!("Stopping server \"{title}\" ..."));
    let stopped = interruptible(halt, async {
        call(|| format!("stop server {uuid}"), client.stop_server(&uuid)).await?;
        bounded(
            format!("wait for server {uuid} to stop"),
            config.state_timeout,
            client.wait_for_server_state(&uuid, WaitTarget::Reach(ServerState::Stopped), config.state_timeout),
        )
        .await
    })
    .await?;

    let Some(disk) = stopped.primary_disk().cloned() else {
        return Err(RunError::Structural(format!(
            "no disk to templatize on server {uuid}"
        )));
    };
    slot.server = Some(stopped);

    let prefix = if config.template_prefix.is_empty() {
        disk.title.as_str()
    } else {
        config.template_prefix.as_str()
    };
    let request = TemplatizeRequest {
        storage_uuid: disk.uuid.clone(),
        title: format!("{prefix}-template-{}", next_title_suffix()),
    };

    ensure_running(halt)?;
    ui.say(&format!("Templatizing storage device \"{}\" ...", disk.title));
    let created = call(
        || format!("templatize disk {}", disk.uuid),
        client.templatize_storage(&request),
    )
    .await?;
    tracing::info!(zone = %slot.zone, storage = %created.uuid, title = %created.title, "template created");
    let template_uuid = created.uuid.clone();
    slot.template = Some(created);

    ui.say(&format!(
        "Waiting for storage \"{template_uuid}\" to enter the \"online\" state ..."
    ));
    let online = interruptible(
        halt,
        bounded(
            format!("wait for template {template_uuid} to come online"),
            config.state_timeout,
            client.wait_for_storage_state(
                &template_uuid,
                WaitTarget::Reach(StorageState::Online),
                config.state_timeout,
            ),
        ),
    )
    .await?;
    slot.template = Some(online);
    Ok(())
}

async fn delete_template<C: CloudClient>(
    client: &C,
    ui: &dyn Ui,
    config: &RunConfig,
    slot: &mut ZoneSlot,
) -> Result<(), CleanupError> {
    let Some(ref template) = slot.template else {
        return Ok(());
    };
    let uuid = template.uuid.clone();
    let failed = |source: RunError| CleanupError {
        resource: format!("template {uuid} in zone {}", slot.zone),
        source,
    };

    let waited = bounded(
        format!("wait for template {uuid} to leave maintenance"),
        config.state_timeout,
        client.wait_for_storage_state(&uuid, WaitTarget::Leave(StorageState::Maintenance), config.state_timeout),
    )
    .await;
    if let Err(err) = waited {
        tracing::warn!(zone = %slot.zone, storage = %uuid, error = %err, "deleting template without settled state");
    }

    ui.say(&format!("Deleting template \"{uuid}\" ..."));
    call(|| format!("delete template {uuid}"), client.delete_storage(&uuid))
        .await
        .map_err(failed)?;
    tracing::info!(zone = %slot.zone, storage = %uuid, "template deleted");
    slot.template = None;
    Ok(())
}

impl<C: CloudClient + 'static> Step<C> for Templatize {
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
                    async move { templatize_in_zone(cloud, sink, inputs, slot, &halt).await }
                },
            )
            .await;

            match outcome {
                Ok(()) => {
                    self.succeeded = true;
                    StepAction::Continue
                }
                Err(err) => ctx.halt(err),
            }
        })
    }

    fn cleanup<'a>(&'a mut self, ctx: &'a mut RunContext<C>) -> StepFuture<'a, ()> {
        Box::pin(async move {
            if self.succeeded {
                return;
            }
            let client = Arc::clone(&ctx.client);
            let ui = Arc::clone(&ctx.ui);
            let config = ctx.config.clone();

            let deletions = ctx
                .slots
                .iter_mut()
                .filter(|slot| slot.template.is_some())
                .map(|slot| delete_template(client.as_ref(), ui.as_ref(), &config, slot));

            match timeout(config.step_timeout, join_all(deletions)).await {
                Ok(results) => {
                    for err in results.into_iter().filter_map(Result::err) {
                        tracing::warn!(error = %err, "template cleanup failed");
                        ui.error(&err.to_string());
                    }
                }
                Err(_) => {
                    let err = RunError::StepDeadline {
                        step: STEP_NAME,
                        timeout: config.step_timeout,
                    };
                    tracing::warn!(error = %err, "template cleanup did not finish");
                    ui.error(&format!("template cleanup incomplete: {err}"));
                }
            }
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::pipeline::CreateServers;
    use crate::test_support::{FakeCloud, RecordingUi};
    use std::time::Duration;
    use tokio_util::sync::CancellationToken;

    fn context(zones: &[&str], prefix: &str, cloud: &Arc<FakeCloud>) -> RunContext<FakeCloud> {
        let template = cloud.add_source_template("fi-hel1");
        let config = RunConfig::new(zones.iter().copied(), template)
            .with_template_prefix(prefix)
            .with_timeouts(Duration::from_secs(2), Duration::from_secs(5));
        RunContext::new(
            config,
            Arc::clone(cloud),
            Arc::new(RecordingUi::default()),
            CancellationToken::new(),
        )
    }

    #[test]
    fn suffixes_strictly_increase() {
        let first = next_title_suffix();
        let second = next_title_suffix();
        assert!(second > first);
    }

    #[tokio::test]
    async fn templates_are_named_after_prefix() {
        let cloud = Arc::new(FakeCloud::new());
        let mut ctx = context(&["fi-hel1"], "base", &cloud);
        CreateServers::new().run(&mut ctx).await;

        let action = Templatize::new().run(&mut ctx).await;

        assert_eq!(action, StepAction::Continue);
        let template = ctx
            .slots()
            .first()
            .and_then(|slot| slot.template.as_ref())
            .expect("template recorded");
        assert!(template.title.starts_with("base-template-"), "{}", template.title);
        assert_eq!(template.state, StorageState::Online);
    }

    #[tokio::test]
    async fn empty_prefix_falls_back_to_disk_title() {
        let cloud = Arc::new(FakeCloud::new());
        let mut ctx = context(&["fi-hel1"], "", &cloud);
        CreateServers::new().run(&mut ctx).await;

        Templatize::new().run(&mut ctx).await;

        let title = ctx
            .slots()
            .first()
            .and_then(|slot| slot.template.as_ref())
            .map(|template| template.title.clone())
            .unwrap_or_default();
        assert!(title.starts_with("templar-disk1-template-"), "{title}");
    }

    #[tokio::test]
    async fn successful_step_keeps_templates_on_cleanup() {
        let cloud = Arc::new(FakeCloud::new());
        let mut ctx = context(&["fi-hel1", "de-fra1"], "base", &cloud);
        CreateServers::new().run(&mut ctx).await;
        let mut step = Templatize::new();
        step.run(&mut ctx).await;

        step.cleanup(&mut ctx).await;

        assert_eq!(cloud.template_count(), 2);
    }

    #[tokio::test]
    async fn failure_removes_templates_of_other_zones() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.fail_templatize_in("de-fra1");
        let mut ctx = context(&["fi-hel1", "de-fra1"], "base", &cloud);
        CreateServers::new().run(&mut ctx).await;
        let mut step = Templatize::new();

        let action = step.run(&mut ctx).await;
        assert_eq!(action, StepAction::Halt);
        step.cleanup(&mut ctx).await;

        assert_eq!(cloud.template_count(), 0);
        assert!(ctx.slots().iter().all(|slot| slot.template.is_none()));
        let err = ctx.take_error().expect("error recorded");
        assert_eq!(err.zone(), Some("de-fra1"));
    }

    #[tokio::test]
    async fn server_without_disk_is_a_structural_error() {
        let cloud = Arc::new(FakeCloud::new());
        cloud.strip_disks_in("fi-hel1");
        let mut ctx = context(&["fi-hel1"], "base", &cloud);
        CreateServers::new().run(&mut ctx).await;

        Templatize::new().run(&mut ctx).await;

        let err = ctx.take_error().expect("error recorded");
        assert!(matches!(err.root(), RunError::Structural(message) if message.contains("no disk")), "{err}");
    }
}
