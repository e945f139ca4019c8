//! Entry point tying configuration, the pipeline and the artifact together.

use std::sync::Arc;

use thiserror::Error;
use tokio_util::sync::CancellationToken;

use crate::artifact::{Artifact, ArtifactError};
use crate::cloud::{CloudClient, StorageType};
use crate::config::{ConfigError, RunConfig};
use crate::pipeline::{
    CreateServers, ProvisionServers, RunContext, RunError, Step, StepRunner, Templatize,
};
use crate::provision::Provisioner;
use crate::ui::Ui;

/// Builds private templates from a source template in every configured zone.
pub struct Builder<C> {
    client: Arc<C>,
    config: RunConfig,
    cancel: CancellationToken,
}

impl<C: CloudClient + 'static> Builder<C> {
    /// Validates `config` and checks the account and source storage before
    /// anything billable is created.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Config`] for invalid inputs,
    /// [`BuildError::Account`] when the credentials are rejected, and
    /// [`BuildError::Validation`] when the source storage is missing or not
    /// a template.
    pub async fn prepare(client: Arc<C>, config: RunConfig) -> Result<Self, BuildError> {
        config.validate()?;

        let account = client
            .get_account()
            .await
            .map_err(|err| BuildError::Account(err.to_string()))?;
        tracing::debug!(username = %account.username, "account verified");

        let source = client
            .get_storage_details(&config.storage_uuid)
            .await
            .map_err(|err| {
                BuildError::Validation(format!(
                    "source storage {} not found: {err}",
                    config.storage_uuid
                ))
            })?;
        if source.kind != StorageType::Template {
            return Err(BuildError::Validation(format!(
                "source storage {} is of type {}, expected template",
                config.storage_uuid, source.kind
            )));
        }

        Ok(Self {
            client,
            config,
            cancel: CancellationToken::new(),
        })
    }

    /// Inputs this builder runs with.
    #[must_use]
    pub const fn config(&self) -> &RunConfig {
        &self.config
    }

    /// Requests cancellation. In-flight zone work is dropped and every
    /// created resource is cleaned up.
    pub fn cancel(&self) {
        self.cancel.cancel();
    }

    /// Token observed by the running pipeline.
    #[must_use]
    pub fn cancellation(&self) -> CancellationToken {
        self.cancel.clone()
    }

    /// Runs create, provision and templatize, returning the templates.
    ///
    /// # Errors
    ///
    /// Returns [`BuildError::Run`] with the first recorded failure once all
    /// created resources have been cleaned up.
    pub async fn run(
        &self,
        ui: Arc<dyn Ui>,
        provisioner: Arc<dyn Provisioner>,
    ) -> Result<Artifact<C>, BuildError> {
        let steps: Vec<Box<dyn Step<C>>> = vec![
            Box::new(CreateServers::new()),
            Box::new(ProvisionServers::new(provisioner)),
            Box::new(Templatize::new()),
        ];
        let mut ctx = RunContext::new(
            self.config.clone(),
            Arc::clone(&self.client),
            ui,
            self.cancel.clone(),
        );

        tracing::info!(zones = ?self.config.zones, source = %self.config.storage_uuid, "starting build");
        StepRunner::new(steps).run(&mut ctx).await?;

        let artifact = Artifact::from_slots(ctx.slots(), Arc::clone(&self.client))?;
        tracing::info!(templates = artifact.templates().len(), "build finished");
        Ok(artifact)
    }
}

/// Errors raised by [`Builder`].
#[derive(Debug, Error)]
pub enum BuildError {
    /// The run inputs are invalid.
    #[error(transparent)]
    Config(#[from] ConfigError),
    /// The account check failed.
    #[error("account check failed: {0}")]
    Account(String),
    /// The source storage is unusable.
    #[error("{0}")]
    Validation(String),
    /// The pipeline failed or was cancelled.
    #[error("build failed: {0}")]
    Run(#[from] RunError),
    /// The finished slots could not be turned into an artifact.
    #[error(transparent)]
    Artifact(#[from] ArtifactError),
}
