//! Provider-neutral resource types exchanged with a [`super::CloudClient`].

use std::fmt;
use std::net::IpAddr;
use std::str::FromStr;

use thiserror::Error;

/// Declares a string-backed enum whose unknown values are preserved verbatim.
macro_rules! wire_enum {
    (
        $(#[$meta:meta])*
        $name:ident { $($(#[$vmeta:meta])* $variant:ident => $text:literal),+ $(,)? }
    ) => {
        $(#[$meta])*
        #[derive(Clone, Debug, Eq, Hash, PartialEq)]
        pub enum $name {
            $($(#[$vmeta])* $variant,)+
            /// Value not modelled by this crate, kept as reported.
            Other(String),
        }

        impl $name {
            /// Returns the provider's textual form of the value.
            #[must_use]
            pub fn as_str(&self) -> &str {
                match self {
                    $(Self::$variant => $text,)+
                    Self::Other(value) => value.as_str(),
                }
            }
        }

        impl From<&str> for $name {
            fn from(value: &str) -> Self {
                match value {
                    $($text => Self::$variant,)+
                    other => Self::Other(other.to_owned()),
                }
            }
        }

        impl From<String> for $name {
            fn from(value: String) -> Self {
                Self::from(value.as_str())
            }
        }

        impl fmt::Display for $name {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }
    };
}

wire_enum! {
    /// Lifecycle state of a server.
    ServerState {
        /// Server is running.
        Started => "started",
        /// Server is powered off.
        Stopped => "stopped",
        /// Server is transitioning and rejects most operations.
        Maintenance => "maintenance",
        /// Server failed.
        Error => "error",
    }
}

wire_enum! {
    /// Lifecycle state of a storage device.
    StorageState {
        /// Storage is usable.
        Online => "online",
        /// Storage is being modified.
        Maintenance => "maintenance",
        /// Storage is being cloned.
        Cloning => "cloning",
        /// Storage is being backed up.
        Backuponly => "backuponly",
        /// Storage is being synchronised.
        Syncing => "syncing",
        /// Storage failed.
        Error => "error",
    }
}

wire_enum! {
    /// Kind of storage device.
    StorageType {
        /// Regular disk attached to a server.
        Disk => "disk",
        /// Optical media.
        Cdrom => "cdrom",
        /// Reusable template image.
        Template => "template",
        /// Backup image.
        Backup => "backup",
    }
}

wire_enum! {
    /// Performance tier requested for new storage.
    StorageTier {
        /// High-IOPS tier.
        Maxiops => "maxiops",
        /// Spinning-disk tier.
        Hdd => "hdd",
        /// Standard SSD tier.
        Standard => "standard",
    }
}

wire_enum! {
    /// Network reachability of an IP address.
    IpAccess {
        /// Routable from the internet.
        Public => "public",
        /// Routable inside the provider network only.
        Private => "private",
        /// Provider utility network.
        Utility => "utility",
    }
}

wire_enum! {
    /// IP protocol family.
    IpFamily {
        /// IPv4.
        V4 => "IPv4",
        /// IPv6.
        V6 => "IPv6",
    }
}

/// Storage device attached to a server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageDevice {
    /// Storage identifier.
    pub uuid: String,
    /// Storage title.
    pub title: String,
    /// Storage kind.
    pub kind: StorageType,
    /// Size in GiB.
    pub size_gb: u32,
}

/// IP address assigned to a server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IpAddress {
    /// Reachability of the address.
    pub access: IpAccess,
    /// Protocol family.
    pub family: IpFamily,
    /// Address text, absent until the provider assigns one.
    pub address: Option<String>,
}

/// Server as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct ServerDetails {
    /// Server identifier.
    pub uuid: String,
    /// Human readable title.
    pub title: String,
    /// Hostname configured on the server.
    pub hostname: String,
    /// Zone hosting the server.
    pub zone: String,
    /// Current lifecycle state.
    pub state: ServerState,
    /// Attached storage devices in attachment order.
    pub storage_devices: Vec<StorageDevice>,
    /// Assigned IP addresses.
    pub ip_addresses: Vec<IpAddress>,
}

impl ServerDetails {
    /// Returns the first attached device of type `disk`, which is the one
    /// cloned from the source template.
    #[must_use]
    pub fn primary_disk(&self) -> Option<&StorageDevice> {
        self.storage_devices
            .iter()
            .find(|device| device.kind == StorageType::Disk)
    }

    /// Returns the first parseable public IPv4 address.
    #[must_use]
    pub fn public_ipv4(&self) -> Option<IpAddr> {
        self.ip_addresses
            .iter()
            .filter(|ip| ip.access == IpAccess::Public && ip.family == IpFamily::V4)
            .filter_map(|ip| ip.address.as_deref())
            .find_map(|text| IpAddr::from_str(text).ok())
    }
}

/// Storage as reported by the provider.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct StorageDetails {
    /// Storage identifier.
    pub uuid: String,
    /// Human readable title.
    pub title: String,
    /// Zone holding the storage.
    pub zone: String,
    /// Storage kind.
    pub kind: StorageType,
    /// Current lifecycle state.
    pub state: StorageState,
    /// Size in GiB.
    pub size_gb: u32,
}

/// Account owning the credentials.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct Account {
    /// API user name.
    pub username: String,
}

/// Condition a polling wait is looking for.
#[derive(Clone, Debug, Eq, PartialEq)]
pub enum WaitTarget<S> {
    /// Wait until the resource reports exactly this state.
    Reach(S),
    /// Wait until the resource reports any state other than this one.
    Leave(S),
}

impl<S: PartialEq + fmt::Display> WaitTarget<S> {
    /// Returns `true` when `current` satisfies the target.
    #[must_use]
    pub fn is_satisfied(&self, current: &S) -> bool {
        match self {
            Self::Reach(state) => current == state,
            Self::Leave(state) => current != state,
        }
    }
}

impl<S: fmt::Display> fmt::Display for WaitTarget<S> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Reach(state) => write!(f, "enter the \"{state}\" state"),
            Self::Leave(state) => write!(f, "exit the \"{state}\" state"),
        }
    }
}

/// Requested network interface for a new server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct IpAddressRequest {
    /// Reachability of the interface.
    pub access: IpAccess,
    /// Protocol family of the interface.
    pub family: IpFamily,
}

/// Login user injected into a new server.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct LoginUser {
    /// Account name created on the server.
    pub username: String,
    /// Authorised public keys.
    pub ssh_keys: Vec<String>,
}

/// Parameters for creating a server cloned from a template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateServerRequest {
    /// Target zone.
    pub zone: String,
    /// Server title.
    pub title: String,
    /// Server hostname.
    pub hostname: String,
    /// Number of CPU cores.
    pub core_number: u32,
    /// Memory in MiB.
    pub memory_mb: u32,
    /// Template storage cloned into the boot disk.
    pub source_storage: String,
    /// Title of the cloned disk.
    pub disk_title: String,
    /// Size of the cloned disk in GiB.
    pub disk_size_gb: u32,
    /// Tier of the cloned disk.
    pub disk_tier: StorageTier,
    /// Network interfaces to attach.
    pub ip_addresses: Vec<IpAddressRequest>,
    /// Injected login credential.
    pub login_user: LoginUser,
}

impl CreateServerRequest {
    /// Starts a builder for a [`CreateServerRequest`].
    #[must_use]
    pub fn builder() -> CreateServerRequestBuilder {
        CreateServerRequestBuilder::new()
    }

    /// Validates the request, naming the first missing field.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Validation`] when a required string is empty or
    /// a size is zero.
    pub fn validate(&self) -> Result<(), RequestError> {
        let required = [
            ("zone", self.zone.as_str()),
            ("title", self.title.as_str()),
            ("hostname", self.hostname.as_str()),
            ("source_storage", self.source_storage.as_str()),
            ("login_user.username", self.login_user.username.as_str()),
        ];
        if let Some((field, _)) = required.iter().find(|(_, value)| value.is_empty()) {
            return Err(RequestError::Validation((*field).to_owned()));
        }
        if self.disk_size_gb == 0 {
            return Err(RequestError::Validation(String::from("disk_size_gb")));
        }
        if self.core_number == 0 {
            return Err(RequestError::Validation(String::from("core_number")));
        }
        if self.memory_mb == 0 {
            return Err(RequestError::Validation(String::from("memory_mb")));
        }
        Ok(())
    }
}

/// Builder for [`CreateServerRequest`] with the defaults used for template
/// builds: one core, 1 GiB of memory, a `maxiops` disk, and private IPv4,
/// public IPv4 and public IPv6 interfaces.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct CreateServerRequestBuilder {
    zone: String,
    title: String,
    source_storage: String,
    disk_size_gb: u32,
    username: String,
    ssh_keys: Vec<String>,
    core_number: u32,
    memory_mb: u32,
}

impl Default for CreateServerRequestBuilder {
    fn default() -> Self {
        Self {
            zone: String::new(),
            title: String::new(),
            source_storage: String::new(),
            disk_size_gb: 0,
            username: String::new(),
            ssh_keys: Vec::new(),
            core_number: 1,
            memory_mb: 1024,
        }
    }
}

impl CreateServerRequestBuilder {
    /// Creates a builder populated with the build defaults.
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Sets the target zone.
    #[must_use]
    pub fn zone(mut self, value: impl Into<String>) -> Self {
        self.zone = value.into();
        self
    }

    /// Sets the server title, also used as hostname and disk title stem.
    #[must_use]
    pub fn title(mut self, value: impl Into<String>) -> Self {
        self.title = value.into();
        self
    }

    /// Sets the template storage to clone.
    #[must_use]
    pub fn source_storage(mut self, value: impl Into<String>) -> Self {
        self.source_storage = value.into();
        self
    }

    /// Sets the disk size in GiB.
    #[must_use]
    pub const fn disk_size_gb(mut self, value: u32) -> Self {
        self.disk_size_gb = value;
        self
    }

    /// Sets the login user name.
    #[must_use]
    pub fn username(mut self, value: impl Into<String>) -> Self {
        self.username = value.into();
        self
    }

    /// Adds an authorised public key.
    #[must_use]
    pub fn ssh_key(mut self, value: impl Into<String>) -> Self {
        self.ssh_keys.push(value.into());
        self
    }

    /// Builds and validates the request, trimming string inputs.
    ///
    /// # Errors
    ///
    /// Returns [`RequestError::Validation`] when a required field is empty.
    pub fn build(self) -> Result<CreateServerRequest, RequestError> {
        let title = self.title.trim().to_owned();
        let request = CreateServerRequest {
            zone: self.zone.trim().to_owned(),
            hostname: title.clone(),
            disk_title: format!("{title}-disk1"),
            title,
            core_number: self.core_number,
            memory_mb: self.memory_mb,
            source_storage: self.source_storage.trim().to_owned(),
            disk_size_gb: self.disk_size_gb,
            disk_tier: StorageTier::Maxiops,
            ip_addresses: vec![
                IpAddressRequest {
                    access: IpAccess::Private,
                    family: IpFamily::V4,
                },
                IpAddressRequest {
                    access: IpAccess::Public,
                    family: IpFamily::V4,
                },
                IpAddressRequest {
                    access: IpAccess::Public,
                    family: IpFamily::V6,
                },
            ],
            login_user: LoginUser {
                username: self.username.trim().to_owned(),
                ssh_keys: self
                    .ssh_keys
                    .into_iter()
                    .map(|key| key.trim().to_owned())
                    .filter(|key| !key.is_empty())
                    .collect(),
            },
        };
        request.validate()?;
        Ok(request)
    }
}

/// Parameters for converting a disk into a template.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct TemplatizeRequest {
    /// Disk to convert.
    pub storage_uuid: String,
    /// Title of the new template.
    pub title: String,
}

/// Errors raised while building provider requests.
#[derive(Clone, Debug, Error, Eq, PartialEq)]
pub enum RequestError {
    /// Raised when a request is missing a required field.
    #[error("missing or empty field: {0}")]
    Validation(String),
}
