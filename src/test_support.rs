//! Test support utilities shared across unit and integration tests.
//!
//! [`FakeCloud`] is an in-memory [`CloudClient`] with failure injection.
//! Its waits poll until the target state is reached and enforce no deadline
//! of their own, so a stalled resource only fails when the caller bounds the
//! wait.

use std::collections::{HashMap, HashSet, VecDeque};
use std::ffi::OsString;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use thiserror::Error;
use tokio::time::sleep;
use uuid::Uuid;

use crate::cloud::{
    Account, CloudClient, CloudError, CloudFuture, CreateServerRequest, IpAccess, IpAddress,
    IpFamily, ServerDetails, ServerState, StorageDetails, StorageDevice, StorageState,
    StorageType, TemplatizeRequest, WaitTarget,
};
use crate::provision::{CommandFuture, CommandOutput, CommandRunner};
use crate::ui::Ui;

const FAKE_POLL_INTERVAL: Duration = Duration::from_millis(1);

/// Errors returned by [`FakeCloud`].
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum FakeCloudError {
    /// The resource does not exist.
    #[error("{0} not found")]
    NotFound(String),
    /// The operation is not allowed in the resource's current state.
    #[error("{0}")]
    Rejected(String),
    /// A failure scripted by the test.
    #[error("injected failure: {0}")]
    Injected(String),
}

impl CloudError for FakeCloudError {
    fn is_timeout(&self) -> bool {
        false
    }
}

#[derive(Clone, Debug)]
struct Tracked<T, S> {
    details: T,
    pending: Option<S>,
}

#[derive(Debug, Default)]
struct FakeState {
    servers: HashMap<String, Tracked<ServerDetails, ServerState>>,
    storages: HashMap<String, Tracked<StorageDetails, StorageState>>,
    sources: HashSet<String>,
    address_counter: u8,
    reject_account: bool,
    fail_create: HashSet<String>,
    fail_templatize: HashSet<String>,
    fail_storage_delete: HashSet<String>,
    stall_start: HashSet<String>,
    strip_disks: HashSet<String>,
    create_delay: HashMap<String, Duration>,
    templatize_delay: HashMap<String, Duration>,
}

impl FakeState {
    fn advance_server(&mut self, uuid: &str) -> Result<ServerDetails, FakeCloudError> {
        let server = self
            .servers
            .get_mut(uuid)
            .ok_or_else(|| FakeCloudError::NotFound(format!("server {uuid}")))?;
        if let Some(next) = server.pending.take() {
            server.details.state = next;
        }
        Ok(server.details.clone())
    }

    fn advance_storage(&mut self, uuid: &str) -> Result<StorageDetails, FakeCloudError> {
        let storage = self
            .storages
            .get_mut(uuid)
            .ok_or_else(|| FakeCloudError::NotFound(format!("storage {uuid}")))?;
        if let Some(next) = storage.pending.take() {
            storage.details.state = next;
        }
        Ok(storage.details.clone())
    }

    fn count_storage(&self, kind: &StorageType) -> usize {
        self.storages
            .values()
            .filter(|storage| &storage.details.kind == kind)
            .filter(|storage| !self.sources.contains(&storage.details.uuid))
            .count()
    }

    fn create_server(&mut self, request: &CreateServerRequest) -> ServerDetails {
        self.address_counter = self.address_counter.wrapping_add(1);
        let mut devices = Vec::new();
        if !self.strip_disks.contains(&request.zone) {
            let disk = StorageDetails {
                uuid: Uuid::new_v4().to_string(),
                title: request.disk_title.clone(),
                zone: request.zone.clone(),
                kind: StorageType::Disk,
                state: StorageState::Online,
                size_gb: request.disk_size_gb,
            };
            devices.push(StorageDevice {
                uuid: disk.uuid.clone(),
                title: disk.title.clone(),
                kind: StorageType::Disk,
                size_gb: disk.size_gb,
            });
            self.storages.insert(
                disk.uuid.clone(),
                Tracked {
                    details: disk,
                    pending: None,
                },
            );
        }

        let details = ServerDetails {
            uuid: Uuid::new_v4().to_string(),
            title: request.title.clone(),
            hostname: request.hostname.clone(),
            zone: request.zone.clone(),
            state: ServerState::Maintenance,
            storage_devices: devices,
            ip_addresses: vec![
                IpAddress {
                    access: IpAccess::Private,
                    family: IpFamily::V4,
                    address: Some(format!("10.0.0.{}", self.address_counter)),
                },
                IpAddress {
                    access: IpAccess::Public,
                    family: IpFamily::V4,
                    address: Some(format!("127.0.0.{}", self.address_counter)),
                },
            ],
        };
        let pending = (!self.stall_start.contains(&request.zone)).then_some(ServerState::Started);
        self.servers.insert(
            details.uuid.clone(),
            Tracked {
                details: details.clone(),
                pending,
            },
        );
        details
    }
}

/// In-memory [`CloudClient`] for tests.
#[derive(Debug, Default)]
pub struct FakeCloud {
    state: Mutex<FakeState>,
}

impl FakeCloud {
    /// Creates an empty cloud.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, FakeState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Adds an online storage of `kind` and returns its UUID.
    #[must_use]
    pub fn add_storage(&self, zone: &str, kind: StorageType) -> String {
        let uuid = Uuid::new_v4().to_string();
        let details = StorageDetails {
            uuid: uuid.clone(),
            title: format!("{kind} in {zone}"),
            zone: zone.to_owned(),
            kind,
            state: StorageState::Online,
            size_gb: 10,
        };
        self.lock().storages.insert(
            uuid.clone(),
            Tracked {
                details,
                pending: None,
            },
        );
        uuid
    }

    /// Adds a source template, excluded from [`FakeCloud::template_count`].
    #[must_use]
    pub fn add_source_template(&self, zone: &str) -> String {
        let uuid = self.add_storage(zone, StorageType::Template);
        self.lock().sources.insert(uuid.clone());
        uuid
    }

    /// Makes `get_account` fail.
    pub fn reject_account(&self) {
        self.lock().reject_account = true;
    }

    /// Makes server creation fail in `zone`.
    pub fn fail_create_in(&self, zone: &str) {
        self.lock().fail_create.insert(zone.to_owned());
    }

    /// Holds back the response to server creation in `zone`. The server
    /// and its disk exist before the delay starts.
    pub fn delay_create_in(&self, zone: &str, delay: Duration) {
        self.lock().create_delay.insert(zone.to_owned(), delay);
    }

    /// Holds back the response to templatization in `zone`. The template
    /// exists before the delay starts.
    pub fn delay_templatize_in(&self, zone: &str, delay: Duration) {
        self.lock().templatize_delay.insert(zone.to_owned(), delay);
    }

    /// Keeps servers created in `zone` in maintenance forever.
    pub fn stall_start_in(&self, zone: &str) {
        self.lock().stall_start.insert(zone.to_owned());
    }

    /// Creates servers in `zone` without any attached disk.
    pub fn strip_disks_in(&self, zone: &str) {
        self.lock().strip_disks.insert(zone.to_owned());
    }

    /// Makes templatization fail in `zone`.
    pub fn fail_templatize_in(&self, zone: &str) {
        self.lock().fail_templatize.insert(zone.to_owned());
    }

    /// Makes storage deletion fail in `zone`.
    pub fn fail_storage_delete_in(&self, zone: &str) {
        self.lock().fail_storage_delete.insert(zone.to_owned());
    }

    /// Number of servers that still exist.
    #[must_use]
    pub fn server_count(&self) -> usize {
        self.lock().servers.len()
    }

    /// Number of disks that still exist.
    #[must_use]
    pub fn disk_count(&self) -> usize {
        self.lock().count_storage(&StorageType::Disk)
    }

    /// Number of templates that still exist, excluding sources.
    #[must_use]
    pub fn template_count(&self) -> usize {
        self.lock().count_storage(&StorageType::Template)
    }

    /// Titles of templates that still exist, excluding sources.
    #[must_use]
    pub fn template_titles(&self) -> Vec<String> {
        let state = self.lock();
        let mut titles: Vec<String> = state
            .storages
            .values()
            .filter(|storage| storage.details.kind == StorageType::Template)
            .filter(|storage| !state.sources.contains(&storage.details.uuid))
            .map(|storage| storage.details.title.clone())
            .collect();
        titles.sort();
        titles
    }
}

impl CloudClient for FakeCloud {
    type Error = FakeCloudError;

    fn get_account(&self) -> CloudFuture<'_, Account, Self::Error> {
        Box::pin(async move {
            if self.lock().reject_account {
                return Err(FakeCloudError::Rejected(String::from("invalid credentials")));
            }
            Ok(Account {
                username: String::from("fake"),
            })
        })
    }

    fn create_server<'a>(
        &'a self,
        request: &'a CreateServerRequest,
    ) -> CloudFuture<'a, ServerDetails, Self::Error> {
        Box::pin(async move {
            let (created, delay) = {
                let mut state = self.lock();
                if state.fail_create.contains(&request.zone) {
                    return Err(FakeCloudError::Injected(format!(
                        "create server in {}",
                        request.zone
                    )));
                }
                let delay = state.create_delay.get(&request.zone).copied();
                (state.create_server(request), delay)
            };
            if let Some(pause) = delay {
                sleep(pause).await;
            }
            Ok(created)
        })
    }

    fn get_server_details<'a>(
        &'a self,
        uuid: &'a str,
    ) -> CloudFuture<'a, ServerDetails, Self::Error> {
        Box::pin(async move { self.lock().advance_server(uuid) })
    }

    fn wait_for_server_state<'a>(
        &'a self,
        uuid: &'a str,
        target: WaitTarget<ServerState>,
        _timeout: Duration,
    ) -> CloudFuture<'a, ServerDetails, Self::Error> {
        Box::pin(async move {
            loop {
                let details = self.lock().advance_server(uuid)?;
                if target.is_satisfied(&details.state) {
                    return Ok(details);
                }
                sleep(FAKE_POLL_INTERVAL).await;
            }
        })
    }

    fn stop_server<'a>(&'a self, uuid: &'a str) -> CloudFuture<'a, ServerDetails, Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let server = state
                .servers
                .get_mut(uuid)
                .ok_or_else(|| FakeCloudError::NotFound(format!("server {uuid}")))?;
            if server.details.state != ServerState::Started {
                return Err(FakeCloudError::Rejected(format!(
                    "server {uuid} is {} and cannot be stopped",
                    server.details.state
                )));
            }
            server.details.state = ServerState::Maintenance;
            server.pending = Some(ServerState::Stopped);
            Ok(server.details.clone())
        })
    }

    fn delete_server<'a>(&'a self, uuid: &'a str) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let server = state
                .servers
                .get(uuid)
                .ok_or_else(|| FakeCloudError::NotFound(format!("server {uuid}")))?;
            if server.details.state != ServerState::Stopped {
                return Err(FakeCloudError::Rejected(format!(
                    "server {uuid} must be stopped before deletion"
                )));
            }
            state.servers.remove(uuid);
            Ok(())
        })
    }

    fn get_storage_details<'a>(
        &'a self,
        uuid: &'a str,
    ) -> CloudFuture<'a, StorageDetails, Self::Error> {
        Box::pin(async move { self.lock().advance_storage(uuid) })
    }

    fn delete_storage<'a>(&'a self, uuid: &'a str) -> CloudFuture<'a, (), Self::Error> {
        Box::pin(async move {
            let mut state = self.lock();
            let storage = state
                .storages
                .get(uuid)
                .ok_or_else(|| FakeCloudError::NotFound(format!("storage {uuid}")))?;
            if state.fail_storage_delete.contains(&storage.details.zone) {
                return Err(FakeCloudError::Injected(format!("delete storage {uuid}")));
            }
            state.storages.remove(uuid);
            Ok(())
        })
    }

    fn templatize_storage<'a>(
        &'a self,
        request: &'a TemplatizeRequest,
    ) -> CloudFuture<'a, StorageDetails, Self::Error> {
        Box::pin(async move {
            let (template, delay) = {
                let mut state = self.lock();
                let disk = state
                    .storages
                    .get(&request.storage_uuid)
                    .map(|storage| storage.details.clone())
                    .ok_or_else(|| {
                        FakeCloudError::NotFound(format!("storage {}", request.storage_uuid))
                    })?;
                if state.fail_templatize.contains(&disk.zone) {
                    return Err(FakeCloudError::Injected(format!(
                        "templatize storage {}",
                        disk.uuid
                    )));
                }
                let delay = state.templatize_delay.get(&disk.zone).copied();
                let template = StorageDetails {
                    uuid: Uuid::new_v4().to_string(),
                    title: request.title.clone(),
                    zone: disk.zone,
                    kind: StorageType::Template,
                    state: StorageState::Maintenance,
                    size_gb: disk.size_gb,
                };
                state.storages.insert(
                    template.uuid.clone(),
                    Tracked {
                        details: template.clone(),
                        pending: Some(StorageState::Online),
                    },
                );
                (template, delay)
            };
            if let Some(pause) = delay {
                sleep(pause).await;
            }
            Ok(template)
        })
    }

    fn wait_for_storage_state<'a>(
        &'a self,
        uuid: &'a str,
        target: WaitTarget<StorageState>,
        _timeout: Duration,
    ) -> CloudFuture<'a, StorageDetails, Self::Error> {
        Box::pin(async move {
            loop {
                let details = self.lock().advance_storage(uuid)?;
                if target.is_satisfied(&details.state) {
                    return Ok(details);
                }
                sleep(FAKE_POLL_INTERVAL).await;
            }
        })
    }
}

/// [`Ui`] that records every notice for assertions.
#[derive(Debug, Default)]
pub struct RecordingUi {
    messages: Mutex<Vec<String>>,
    errors: Mutex<Vec<String>>,
}

impl RecordingUi {
    /// Progress notices received so far.
    #[must_use]
    pub fn messages(&self) -> Vec<String> {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Error notices received so far.
    #[must_use]
    pub fn errors(&self) -> Vec<String> {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }
}

impl Ui for RecordingUi {
    fn say(&self, message: &str) {
        self.messages
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_owned());
    }

    fn error(&self, message: &str) {
        self.errors
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(message.to_owned());
    }
}

/// Scripted command runner that returns pre-seeded outputs in FIFO order.
///
/// Once the script is exhausted every command succeeds. Clones share the
/// same script and invocation log.
#[derive(Clone, Debug, Default)]
pub struct ScriptedRunner {
    responses: Arc<Mutex<VecDeque<CommandOutput>>>,
    invocations: Arc<Mutex<Vec<CommandInvocation>>>,
}

/// Records a single invocation made through [`ScriptedRunner`].
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CommandInvocation {
    /// Program name as passed to the runner.
    pub program: String,
    /// Arguments passed to the program.
    pub args: Vec<OsString>,
}

impl CommandInvocation {
    /// Returns a shell-like command string for assertions.
    #[must_use]
    pub fn command_string(&self) -> String {
        std::iter::once(self.program.clone())
            .chain(
                self.args
                    .iter()
                    .map(|arg| arg.to_string_lossy().into_owned()),
            )
            .collect::<Vec<_>>()
            .join(" ")
    }
}

impl ScriptedRunner {
    /// Creates a new runner with no queued responses.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns a snapshot of all invocations recorded so far.
    #[must_use]
    pub fn invocations(&self) -> Vec<CommandInvocation> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .clone()
    }

    /// Pushes a successful exit status.
    pub fn push_success(&self) {
        self.push(CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        });
    }

    /// Pushes a failing exit code with stderr text.
    pub fn push_failure(&self, code: i32, stderr: &str) {
        self.push(CommandOutput {
            code: Some(code),
            stdout: String::new(),
            stderr: stderr.to_owned(),
        });
    }

    fn push(&self, output: CommandOutput) {
        self.responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push_back(output);
    }
}

impl CommandRunner for ScriptedRunner {
    fn run<'a>(&'a self, program: &'a str, args: &'a [OsString]) -> CommandFuture<'a> {
        self.invocations
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .push(CommandInvocation {
                program: program.to_owned(),
                args: args.to_vec(),
            });
        let scripted = self
            .responses
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .pop_front();
        let output = scripted.unwrap_or(CommandOutput {
            code: Some(0),
            stdout: String::new(),
            stderr: String::new(),
        });
        Box::pin(async move { Ok(output) })
    }
}
