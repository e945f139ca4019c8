//! Hook for customising build servers before their disks are templatized.

mod command;
mod ssh;

use std::future::Future;
use std::net::IpAddr;
use std::pin::Pin;
use std::time::Duration;

use thiserror::Error;

pub use command::{
    CommandFuture, CommandOutput, CommandRunner, ProcessCommandRunner, render_remote_command,
    validate_command_args,
};
pub use ssh::{SshProvisioner, SshSettings};

/// Future returned by [`Provisioner::provision`].
pub type ProvisionFuture<'a> = Pin<Box<dyn Future<Output = Result<(), ProvisionError>> + Send + 'a>>;

/// A started build server ready to be provisioned.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ProvisionTarget {
    /// Zone hosting the server.
    pub zone: String,
    /// Server identifier.
    pub server_uuid: String,
    /// Server title.
    pub title: String,
    /// Public address used to reach the server.
    pub address: IpAddr,
    /// Login user injected at creation.
    pub username: String,
}

/// Installs software on a build server.
pub trait Provisioner: Send + Sync {
    /// Provisions one server. Called concurrently for every zone.
    fn provision<'a>(&'a self, target: &'a ProvisionTarget) -> ProvisionFuture<'a>;
}

/// [`Provisioner`] that leaves servers untouched.
#[derive(Clone, Copy, Debug, Default)]
pub struct NoopProvisioner;

impl Provisioner for NoopProvisioner {
    fn provision<'a>(&'a self, target: &'a ProvisionTarget) -> ProvisionFuture<'a> {
        Box::pin(async move {
            tracing::debug!(zone = %target.zone, server = %target.server_uuid, "no provisioner configured");
            Ok(())
        })
    }
}

/// Errors raised while provisioning a server.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum ProvisionError {
    /// Raised when the remote command is unusable.
    #[error("invalid command argument: {0}")]
    InvalidCommand(String),
    /// Raised when the SSH port never accepts connections.
    #[error("{address}:{port} not reachable within {timeout:?}")]
    Unreachable {
        /// Address that was checked.
        address: IpAddr,
        /// Port that was checked.
        port: u16,
        /// How long reachability was awaited.
        timeout: Duration,
    },
    /// Raised when a command cannot be spawned.
    #[error("failed to spawn {program}: {message}")]
    Spawn {
        /// Command that failed to start.
        program: String,
        /// Operating system error string.
        message: String,
    },
    /// Raised when the remote command exits unsuccessfully.
    #[error("provisioning command on {host} exited with status {status_text}: {stderr}")]
    CommandFailed {
        /// Host the command ran on.
        host: String,
        /// Human readable representation of the exit status.
        status_text: String,
        /// Stderr captured from the process.
        stderr: String,
    },
}
