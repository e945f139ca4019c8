//! Core library for the Templar template builder.
//!
//! The crate clones a source storage template into a short-lived UpCloud
//! server per zone, optionally provisions each server over SSH, converts the
//! servers' disks into private templates, and tears down everything it
//! created when any zone fails (create → provision → templatize → cleanup).

pub mod artifact;
pub mod builder;
pub mod cloud;
pub mod config;
pub mod pipeline;
pub mod provision;
pub mod test_support;
pub mod ui;
pub mod upcloud;

pub use artifact::{Artifact, ArtifactError, BUILDER_ID, TemplateRecord};
pub use builder::{BuildError, Builder};
pub use cloud::{CloudClient, CloudError, CloudFuture};
pub use config::{BuildConfig, ConfigError, RunConfig, UpCloudConfig};
pub use pipeline::{RunContext, RunError, Step, StepAction, StepRunner, ZoneSlot};
pub use provision::{NoopProvisioner, ProvisionError, ProvisionTarget, Provisioner, SshProvisioner};
pub use ui::{ConsoleUi, Ui};
pub use upcloud::{UpCloudClient, UpCloudError};
