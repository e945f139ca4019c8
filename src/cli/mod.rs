//! Command-line interface definitions for the `templar` binary.
//!
//! This module centralises the clap parser structures so both the main binary
//! and the build script can reuse them when generating the manual page.

use clap::{Parser, Subcommand};

/// Top-level CLI for the `templar` binary.
#[derive(Debug, Parser)]
#[command(
    name = "templar",
    about = "Build private UpCloud storage templates in one or more zones",
    arg_required_else_help = true
)]
pub(crate) struct Cli {
    /// Log lifecycle events at debug level (overridden by `RUST_LOG`).
    #[arg(long, short, global = true)]
    pub(crate) verbose: bool,
    /// Subcommand to run.
    #[command(subcommand)]
    pub(crate) command: Command,
}

/// Subcommands of the `templar` binary.
#[derive(Debug, Subcommand)]
pub(crate) enum Command {
    /// Clone, provision and templatize a server in every zone.
    #[command(name = "build", about = "Build one template per zone")]
    Build(BuildCommand),
    /// Delete templates produced by an earlier build.
    #[command(name = "destroy", about = "Delete templates by ZONE:UUID reference")]
    Destroy(DestroyCommand),
}

/// Arguments for the `templar build` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct BuildCommand {
    /// Zone to build in; repeat for several zones. Overrides `zones` from
    /// configuration.
    #[arg(long = "zone", value_name = "ZONE")]
    pub(crate) zones: Vec<String>,
    /// UUID of the source template to clone.
    #[arg(long, value_name = "UUID")]
    pub(crate) storage_uuid: Option<String>,
    /// Prefix for server and template titles.
    #[arg(long, value_name = "PREFIX")]
    pub(crate) template_prefix: Option<String>,
    /// Command run over SSH on every server before templatizing (use -- to
    /// separate flags). Overrides `provision_command` from configuration.
    #[arg(trailing_var_arg = true, value_name = "COMMAND")]
    pub(crate) command: Vec<String>,
}

/// Arguments for the `templar destroy` subcommand.
#[derive(Debug, Parser)]
pub(crate) struct DestroyCommand {
    /// Templates to delete, as printed by `templar build`.
    #[arg(required = true, value_name = "ZONE:UUID")]
    pub(crate) templates: Vec<String>,
}
