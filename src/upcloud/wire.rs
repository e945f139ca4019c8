//! JSON payloads exchanged with the UpCloud API.

use serde::{Deserialize, Serialize};

use crate::cloud::{
    Account, CreateServerRequest, IpAddress, ServerDetails, StorageDetails, StorageDevice,
};

#[derive(Debug, Serialize)]
pub(super) struct CreateServerBody<'a> {
    pub(super) server: CreateServer<'a>,
}

#[derive(Debug, Serialize)]
pub(super) struct CreateServer<'a> {
    zone: &'a str,
    title: &'a str,
    hostname: &'a str,
    core_number: String,
    memory_amount: String,
    password_delivery: &'static str,
    storage_devices: CreateStorageDevices<'a>,
    ip_addresses: CreateIpAddresses<'a>,
    login_user: CreateLoginUser<'a>,
}

#[derive(Debug, Serialize)]
struct CreateStorageDevices<'a> {
    storage_device: Vec<CreateStorageDevice<'a>>,
}

#[derive(Debug, Serialize)]
struct CreateStorageDevice<'a> {
    action: &'static str,
    storage: &'a str,
    title: &'a str,
    size: u32,
    tier: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateIpAddresses<'a> {
    ip_address: Vec<CreateIpAddress<'a>>,
}

#[derive(Debug, Serialize)]
struct CreateIpAddress<'a> {
    access: &'a str,
    family: &'a str,
}

#[derive(Debug, Serialize)]
struct CreateLoginUser<'a> {
    create_password: &'static str,
    username: &'a str,
    #[serde(skip_serializing_if = "Option::is_none")]
    ssh_keys: Option<SshKeys<'a>>,
}

#[derive(Debug, Serialize)]
struct SshKeys<'a> {
    ssh_key: Vec<&'a str>,
}

impl<'a> From<&'a CreateServerRequest> for CreateServerBody<'a> {
    fn from(request: &'a CreateServerRequest) -> Self {
        let ssh_keys = (!request.login_user.ssh_keys.is_empty()).then(|| SshKeys {
            ssh_key: request
                .login_user
                .ssh_keys
                .iter()
                .map(String::as_str)
                .collect(),
        });
        Self {
            server: CreateServer {
                zone: &request.zone,
                title: &request.title,
                hostname: &request.hostname,
                core_number: request.core_number.to_string(),
                memory_amount: request.memory_mb.to_string(),
                password_delivery: "none",
                storage_devices: CreateStorageDevices {
                    storage_device: vec![CreateStorageDevice {
                        action: "clone",
                        storage: &request.source_storage,
                        title: &request.disk_title,
                        size: request.disk_size_gb,
                        tier: request.disk_tier.as_str(),
                    }],
                },
                ip_addresses: CreateIpAddresses {
                    ip_address: request
                        .ip_addresses
                        .iter()
                        .map(|ip| CreateIpAddress {
                            access: ip.access.as_str(),
                            family: ip.family.as_str(),
                        })
                        .collect(),
                },
                login_user: CreateLoginUser {
                    create_password: "no",
                    username: &request.login_user.username,
                    ssh_keys,
                },
            },
        }
    }
}

#[derive(Debug, Serialize)]
pub(super) struct StopServerBody {
    pub(super) stop_server: StopServer,
}

#[derive(Debug, Serialize)]
pub(super) struct StopServer {
    pub(super) stop_type: &'static str,
    pub(super) timeout: String,
}

#[derive(Debug, Serialize)]
pub(super) struct TemplatizeBody<'a> {
    pub(super) storage: TemplatizeStorage<'a>,
}

#[derive(Debug, Serialize)]
pub(super) struct TemplatizeStorage<'a> {
    pub(super) title: &'a str,
}

#[derive(Debug, Deserialize)]
pub(super) struct ServerEnvelope {
    pub(super) server: WireServer,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireServer {
    uuid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    hostname: String,
    #[serde(default)]
    zone: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    storage_devices: WireStorageDevices,
    #[serde(default)]
    ip_addresses: WireIpAddresses,
}

#[derive(Debug, Default, Deserialize)]
struct WireStorageDevices {
    #[serde(default)]
    storage_device: Vec<WireStorageDevice>,
}

#[derive(Debug, Deserialize)]
struct WireStorageDevice {
    storage: String,
    #[serde(default)]
    storage_title: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    storage_size: u32,
}

#[derive(Debug, Default, Deserialize)]
struct WireIpAddresses {
    #[serde(default)]
    ip_address: Vec<WireIpAddress>,
}

#[derive(Debug, Deserialize)]
struct WireIpAddress {
    #[serde(default)]
    access: String,
    #[serde(default)]
    family: String,
    address: Option<String>,
}

impl From<WireServer> for ServerDetails {
    fn from(server: WireServer) -> Self {
        Self {
            uuid: server.uuid,
            title: server.title,
            hostname: server.hostname,
            zone: server.zone,
            state: server.state.into(),
            storage_devices: server
                .storage_devices
                .storage_device
                .into_iter()
                .map(|device| StorageDevice {
                    uuid: device.storage,
                    title: device.storage_title,
                    kind: device.kind.into(),
                    size_gb: device.storage_size,
                })
                .collect(),
            ip_addresses: server
                .ip_addresses
                .ip_address
                .into_iter()
                .map(|ip| IpAddress {
                    access: ip.access.into(),
                    family: ip.family.into(),
                    address: ip.address,
                })
                .collect(),
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct StorageEnvelope {
    pub(super) storage: WireStorage,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireStorage {
    uuid: String,
    #[serde(default)]
    title: String,
    #[serde(default)]
    zone: String,
    #[serde(default, rename = "type")]
    kind: String,
    #[serde(default)]
    state: String,
    #[serde(default)]
    size: u32,
}

impl From<WireStorage> for StorageDetails {
    fn from(storage: WireStorage) -> Self {
        Self {
            uuid: storage.uuid,
            title: storage.title,
            zone: storage.zone,
            kind: storage.kind.into(),
            state: storage.state.into(),
            size_gb: storage.size,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct AccountEnvelope {
    pub(super) account: WireAccount,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireAccount {
    username: String,
}

impl From<WireAccount> for Account {
    fn from(account: WireAccount) -> Self {
        Self {
            username: account.username,
        }
    }
}

#[derive(Debug, Deserialize)]
pub(super) struct ErrorEnvelope {
    pub(super) error: WireError,
}

#[derive(Debug, Deserialize)]
pub(super) struct WireError {
    #[serde(default)]
    pub(super) error_code: String,
    #[serde(default)]
    pub(super) error_message: String,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cloud::{IpAccess, ServerState, StorageState, StorageType};
    use serde_json::json;

    #[test]
    fn create_body_matches_api_shape() {
        let request = CreateServerRequest::builder()
            .zone("fi-hel1")
            .title("base")
            .source_storage("01000000-0000-4000-8000-000030200200")
            .disk_size_gb(25)
            .username("root")
            .ssh_key("ssh-ed25519 AAAA")
            .build()
            .expect("request");

        let body = serde_json::to_value(CreateServerBody::from(&request)).expect("serialise");
        assert_eq!(
            body,
            json!({
                "server": {
                    "zone": "fi-hel1",
                    "title": "base",
                    "hostname": "base",
                    "core_number": "1",
                    "memory_amount": "1024",
                    "password_delivery": "none",
                    "storage_devices": {"storage_device": [{
                        "action": "clone",
                        "storage": "01000000-0000-4000-8000-000030200200",
                        "title": "base-disk1",
                        "size": 25,
                        "tier": "maxiops"
                    }]},
                    "ip_addresses": {"ip_address": [
                        {"access": "private", "family": "IPv4"},
                        {"access": "public", "family": "IPv4"},
                        {"access": "public", "family": "IPv6"}
                    ]},
                    "login_user": {
                        "create_password": "no",
                        "username": "root",
                        "ssh_keys": {"ssh_key": ["ssh-ed25519 AAAA"]}
                    }
                }
            })
        );
    }

    #[test]
    fn server_envelope_decodes_nested_lists() {
        let payload = json!({
            "server": {
                "uuid": "srv-1",
                "title": "base",
                "hostname": "base",
                "zone": "fi-hel1",
                "state": "maintenance",
                "storage_devices": {"storage_device": [{
                    "storage": "disk-1",
                    "storage_title": "base-disk1",
                    "type": "disk",
                    "storage_size": 25
                }]},
                "ip_addresses": {"ip_address": [
                    {"access": "public", "family": "IPv4", "address": "94.237.1.2"}
                ]},
                "plan": "1xCPU-1GB"
            }
        });
        let envelope: ServerEnvelope = serde_json::from_value(payload).expect("decode");
        let details = ServerDetails::from(envelope.server);

        assert_eq!(details.state, ServerState::Maintenance);
        assert_eq!(
            details.primary_disk().map(|disk| disk.kind.clone()),
            Some(StorageType::Disk)
        );
        assert_eq!(
            details.ip_addresses.first().map(|ip| ip.access.clone()),
            Some(IpAccess::Public)
        );
    }

    #[test]
    fn server_without_devices_decodes_to_empty_lists() {
        let payload = json!({"server": {"uuid": "srv-2", "state": "started"}});
        let envelope: ServerEnvelope = serde_json::from_value(payload).expect("decode");
        let details = ServerDetails::from(envelope.server);
        assert!(details.storage_devices.is_empty());
        assert!(details.ip_addresses.is_empty());
    }

    #[test]
    fn storage_envelope_decodes_type_and_state() {
        let payload = json!({"storage": {
            "uuid": "tmpl-1",
            "title": "base-template-1700000000",
            "zone": "fi-hel1",
            "type": "template",
            "state": "online",
            "size": 25
        }});
        let envelope: StorageEnvelope = serde_json::from_value(payload).expect("decode");
        let details = StorageDetails::from(envelope.storage);
        assert_eq!(details.kind, StorageType::Template);
        assert_eq!(details.state, StorageState::Online);
        assert_eq!(details.size_gb, 25);
    }
}
