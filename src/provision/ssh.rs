//! Runs a provisioning command on build servers with the system `ssh` client.

use std::ffi::OsString;
use std::net::IpAddr;
use std::time::{Duration, Instant};

use tokio::net::TcpStream;
use tokio::time::{sleep, timeout};

use crate::config::{BuildConfig, expand_tilde};

use super::{
    CommandRunner, ProcessCommandRunner, ProvisionError, ProvisionFuture, ProvisionTarget,
    Provisioner,
};

const DEFAULT_SSH_PORT: u16 = 22;
const CONNECT_ATTEMPT_TIMEOUT: Duration = Duration::from_secs(2);
const DEFAULT_READY_TIMEOUT: Duration = Duration::from_secs(300);
const DEFAULT_POLL_INTERVAL: Duration = Duration::from_secs(5);

/// SSH client settings used by [`SshProvisioner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct SshSettings {
    /// Path to the `ssh` executable.
    pub ssh_bin: String,
    /// Private key passed with `-i`.
    pub identity_file: Option<String>,
    /// TCP port of the SSH daemon.
    pub port: u16,
    /// How long to wait for the port to accept connections.
    pub ready_timeout: Duration,
    /// Interval between reachability checks.
    pub poll_interval: Duration,
}

impl Default for SshSettings {
    fn default() -> Self {
        Self {
            ssh_bin: String::from("ssh"),
            identity_file: None,
            port: DEFAULT_SSH_PORT,
            ready_timeout: DEFAULT_READY_TIMEOUT,
            poll_interval: DEFAULT_POLL_INTERVAL,
        }
    }
}

impl SshSettings {
    /// Derives settings from the build configuration.
    #[must_use]
    pub fn from_build_config(config: &BuildConfig) -> Self {
        Self {
            ssh_bin: config.ssh_bin.clone(),
            identity_file: config
                .ssh_identity_file
                .as_deref()
                .map(str::trim)
                .filter(|path| !path.is_empty())
                .map(str::to_owned),
            ready_timeout: Duration::from_secs(u64::from(config.state_timeout_secs)),
            ..Self::default()
        }
    }
}

/// [`Provisioner`] that waits for SSH and runs one remote command.
#[derive(Clone, Debug)]
pub struct SshProvisioner<R = ProcessCommandRunner> {
    settings: SshSettings,
    command: String,
    runner: R,
}

impl SshProvisioner<ProcessCommandRunner> {
    /// Creates a provisioner that shells out to the real `ssh` binary.
    #[must_use]
    pub const fn with_process_runner(settings: SshSettings, command: String) -> Self {
        Self::new(settings, command, ProcessCommandRunner)
    }
}

impl<R> SshProvisioner<R>
where
    R: CommandRunner,
{
    /// Creates a provisioner using a custom command runner.
    #[must_use]
    pub const fn new(settings: SshSettings, command: String, runner: R) -> Self {
        Self {
            settings,
            command,
            runner,
        }
    }

    async fn wait_for_ssh_ready(&self, address: IpAddr) -> Result<(), ProvisionError> {
        let deadline = Instant::now() + self.settings.ready_timeout;
        while Instant::now() <= deadline {
            let connect = timeout(
                CONNECT_ATTEMPT_TIMEOUT,
                TcpStream::connect((address, self.settings.port)),
            )
            .await;
            if matches!(connect, Ok(Ok(_))) {
                return Ok(());
            }
            sleep(self.settings.poll_interval).await;
        }

        Err(ProvisionError::Unreachable {
            address,
            port: self.settings.port,
            timeout: self.settings.ready_timeout,
        })
    }

    fn build_ssh_args(&self, target: &ProvisionTarget) -> Vec<OsString> {
        let mut args = vec![
            OsString::from("-p"),
            OsString::from(self.settings.port.to_string()),
        ];

        if let Some(ref identity_file) = self.settings.identity_file {
            args.push(OsString::from("-i"));
            args.push(OsString::from(expand_tilde(identity_file)));
        }

        for option in [
            "BatchMode=yes",
            "StrictHostKeyChecking=no",
            "UserKnownHostsFile=/dev/null",
        ] {
            args.push(OsString::from("-o"));
            args.push(OsString::from(option));
        }

        args.push(OsString::from(format!(
            "{}@{}",
            target.username, target.address
        )));
        args.push(OsString::from(&self.command));
        args
    }
}

impl<R> Provisioner for SshProvisioner<R>
where
    R: CommandRunner,
{
    fn provision<'a>(&'a self, target: &'a ProvisionTarget) -> ProvisionFuture<'a> {
        Box::pin(async move {
            self.wait_for_ssh_ready(target.address).await?;
            tracing::info!(zone = %target.zone, server = %target.server_uuid, "running provisioning command");

            let args = self.build_ssh_args(target);
            let output = self.runner.run(&self.settings.ssh_bin, &args).await?;

            if output.is_success() {
                return Ok(());
            }
            Err(ProvisionError::CommandFailed {
                host: target.address.to_string(),
                status_text: output.status_text(),
                stderr: output.stderr.trim().to_owned(),
            })
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_support::ScriptedRunner;
    use std::net::Ipv4Addr;
    use tokio::net::TcpListener;

    fn target() -> ProvisionTarget {
        ProvisionTarget {
            zone: String::from("fi-hel1"),
            server_uuid: String::from("srv-1"),
            title: String::from("base"),
            address: IpAddr::V4(Ipv4Addr::LOCALHOST),
            username: String::from("root"),
        }
    }

    async fn local_settings() -> (TcpListener, SshSettings) {
        let listener = TcpListener::bind((Ipv4Addr::LOCALHOST, 0))
            .await
            .expect("bind listener");
        let port = listener.local_addr().expect("local addr").port();
        let settings = SshSettings {
            port,
            ready_timeout: Duration::from_secs(2),
            poll_interval: Duration::from_millis(10),
            ..SshSettings::default()
        };
        (listener, settings)
    }

    #[test]
    fn ssh_args_include_identity_and_host_options() {
        let settings = SshSettings {
            identity_file: Some(String::from("/keys/id_ed25519")),
            ..SshSettings::default()
        };
        let provisioner = SshProvisioner::new(
            settings,
            String::from("apt-get update"),
            ScriptedRunner::new(),
        );
        let args: Vec<String> = provisioner
            .build_ssh_args(&target())
            .into_iter()
            .map(|arg| arg.to_string_lossy().into_owned())
            .collect();

        assert_eq!(
            args,
            vec![
                "-p",
                "22",
                "-i",
                "/keys/id_ed25519",
                "-o",
                "BatchMode=yes",
                "-o",
                "StrictHostKeyChecking=no",
                "-o",
                "UserKnownHostsFile=/dev/null",
                "root@127.0.0.1",
                "apt-get update",
            ]
        );
    }

    #[tokio::test]
    async fn provision_runs_command_once_port_is_open() {
        let (_listener, settings) = local_settings().await;
        let runner = ScriptedRunner::new();
        runner.push_success();
        let provisioner = SshProvisioner::new(settings, String::from("true"), runner.clone());

        provisioner
            .provision(&target())
            .await
            .unwrap_or_else(|err| panic!("provision should succeed: {err}"));

        let invocations = runner.invocations();
        assert_eq!(invocations.len(), 1);
        assert_eq!(
            invocations.first().map(|call| call.program.as_str()),
            Some("ssh")
        );
    }

    #[tokio::test]
    async fn provision_reports_non_zero_exit() {
        let (_listener, settings) = local_settings().await;
        let runner = ScriptedRunner::new();
        runner.push_failure(3, "package not found");
        let provisioner = SshProvisioner::new(settings, String::from("false"), runner);

        let err = provisioner
            .provision(&target())
            .await
            .expect_err("non-zero exit should fail");
        assert_eq!(
            err,
            ProvisionError::CommandFailed {
                host: String::from("127.0.0.1"),
                status_text: String::from("3"),
                stderr: String::from("package not found"),
            }
        );
    }

    #[tokio::test]
    async fn provision_fails_when_port_stays_closed() {
        let (listener, settings) = local_settings().await;
        drop(listener);
        let closed = SshSettings {
            ready_timeout: Duration::from_millis(50),
            ..settings
        };
        let runner = ScriptedRunner::new();
        let provisioner = SshProvisioner::new(closed, String::from("true"), runner.clone());

        let err = provisioner
            .provision(&target())
            .await
            .expect_err("closed port should fail");
        assert!(matches!(err, ProvisionError::Unreachable { .. }), "{err}");
        assert!(runner.invocations().is_empty());
    }
}
