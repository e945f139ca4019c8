//! Configuration loading via `ortho-config`.
//!
//! Two layered structs are loaded from defaults, `templar.toml` and the
//! environment: [`UpCloudConfig`] carries API credentials and
//! [`BuildConfig`] carries the template build inputs. A validated
//! [`RunConfig`] is derived from the latter once per run and never mutated.

use std::ffi::OsString;
use std::time::Duration;

use camino::Utf8Path;
use cap_std::{ambient_authority, fs_utf8::Dir};
use ortho_config::OrthoConfig;
use serde::Deserialize;
use thiserror::Error;

/// Default UpCloud API endpoint.
pub const DEFAULT_API_BASE: &str = "https://api.upcloud.com/1.3";

/// Server title used when no template prefix is configured.
pub const DEFAULT_SERVER_TITLE: &str = "templar";

const DEFAULT_STORAGE_SIZE_GB: u32 = 25;
const DEFAULT_STATE_TIMEOUT_SECS: u32 = 300;
const DEFAULT_STEP_TIMEOUT_SECS: u32 = 1200;
const DEFAULT_SSH_USERNAME: &str = "root";

/// UpCloud API credentials.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "UPCLOUD",
    discovery(
        app_name = "templar",
        env_var = "TEMPLAR_CONFIG_PATH",
        config_file_name = "templar.toml",
        dotfile_name = ".templar.toml",
        project_file_name = "templar.toml"
    )
)]
pub struct UpCloudConfig {
    /// API user name.
    pub username: Option<String>,
    /// API password.
    pub password: Option<String>,
    /// Base URL of the API, without a trailing slash.
    #[ortho_config(default = DEFAULT_API_BASE.to_owned())]
    pub api_base: String,
}

/// Template build inputs.
#[derive(Clone, Debug, Deserialize, OrthoConfig, PartialEq, Eq)]
#[ortho_config(
    prefix = "TEMPLAR",
    discovery(
        app_name = "templar",
        env_var = "TEMPLAR_CONFIG_PATH",
        config_file_name = "templar.toml",
        dotfile_name = ".templar.toml",
        project_file_name = "templar.toml"
    )
)]
pub struct BuildConfig {
    /// Comma separated list of zones, one template per entry.
    pub zones: Option<String>,
    /// UUID of the template storage cloned into every build server.
    pub storage_uuid: Option<String>,
    /// Size of the cloned disk in GiB.
    #[ortho_config(default = DEFAULT_STORAGE_SIZE_GB)]
    pub storage_size_gb: u32,
    /// Prefix for server and template titles. When empty the server is
    /// titled `templar` and templates are named after the cloned disk.
    #[ortho_config(default = String::new())]
    pub template_prefix: String,
    /// Upper bound for each individual state wait, in seconds.
    #[ortho_config(default = DEFAULT_STATE_TIMEOUT_SECS)]
    pub state_timeout_secs: u32,
    /// Upper bound for a whole step across all zones, in seconds.
    #[ortho_config(default = DEFAULT_STEP_TIMEOUT_SECS)]
    pub step_timeout_secs: u32,
    /// Login user injected into build servers.
    #[ortho_config(default = DEFAULT_SSH_USERNAME.to_owned())]
    pub ssh_username: String,
    /// Public key authorised for the login user. Supports `~/` expansion.
    pub ssh_public_key_path: Option<String>,
    /// Private key passed to `ssh -i` when provisioning.
    pub ssh_identity_file: Option<String>,
    /// Path to the `ssh` executable.
    #[ortho_config(default = "ssh".to_owned())]
    pub ssh_bin: String,
    /// Remote command run on every build server before templatizing.
    pub provision_command: Option<String>,
}

/// Validated, immutable inputs for one template build.
#[derive(Clone, Debug, Eq, PartialEq)]
pub struct RunConfig {
    /// Zones in build order. Duplicates are independent builds.
    pub zones: Vec<String>,
    /// Template storage cloned into every build server.
    pub storage_uuid: String,
    /// Size of the cloned disk in GiB.
    pub storage_size_gb: u32,
    /// Prefix for server and template titles; may be empty.
    pub template_prefix: String,
    /// Upper bound for each individual state wait.
    pub state_timeout: Duration,
    /// Upper bound for a whole step across all zones.
    pub step_timeout: Duration,
    /// Login user injected into build servers.
    pub ssh_username: String,
    /// Public key text authorised for the login user; may be empty.
    pub ssh_public_key: String,
}

/// Metadata for a configuration field, used to generate actionable error messages.
struct FieldMetadata {
    description: &'static str,
    env_var: &'static str,
    toml_key: &'static str,
}

impl FieldMetadata {
    const fn new(description: &'static str, env_var: &'static str, toml_key: &'static str) -> Self {
        Self {
            description,
            env_var,
            toml_key,
        }
    }

    fn missing(&self) -> ConfigError {
        ConfigError::MissingField(format!(
            "missing {}: set {} or add {} to templar.toml",
            self.description, self.env_var, self.toml_key
        ))
    }
}

fn require_field<'a>(value: Option<&'a str>, metadata: &FieldMetadata) -> Result<&'a str, ConfigError> {
    match value.map(str::trim) {
        Some(text) if !text.is_empty() => Ok(text),
        _ => Err(metadata.missing()),
    }
}

impl UpCloudConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("templar")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Performs semantic validation on the credentials.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] naming the environment variable
    /// and TOML key to set.
    pub fn validate(&self) -> Result<(), ConfigError> {
        require_field(
            self.username.as_deref(),
            &FieldMetadata::new("UpCloud API username", "UPCLOUD_USERNAME", "username"),
        )?;
        require_field(
            self.password.as_deref(),
            &FieldMetadata::new("UpCloud API password", "UPCLOUD_PASSWORD", "password"),
        )?;
        require_field(
            Some(self.api_base.as_str()),
            &FieldMetadata::new("UpCloud API base URL", "UPCLOUD_API_BASE", "api_base"),
        )?;
        Ok(())
    }
}

impl BuildConfig {
    /// Loads configuration without attempting to parse CLI arguments.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Parse`] when the merge fails.
    pub fn load_without_cli_args() -> Result<Self, ConfigError> {
        Self::load_from_iter([OsString::from("templar")])
            .map_err(|err| ConfigError::Parse(err.to_string()))
    }

    /// Splits the configured zone list, dropping blank entries.
    #[must_use]
    pub fn zone_list(&self) -> Vec<String> {
        self.zones
            .as_deref()
            .unwrap_or_default()
            .split(',')
            .map(str::trim)
            .filter(|zone| !zone.is_empty())
            .map(str::to_owned)
            .collect()
    }

    /// Validates the build inputs and reads the public key, producing the
    /// immutable [`RunConfig`] for one run.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] when zones or the source storage
    /// are missing, [`ConfigError::Invalid`] for zero sizes or timeouts, and
    /// [`ConfigError::KeyRead`] when the public key file cannot be read.
    pub fn run_config(&self) -> Result<RunConfig, ConfigError> {
        let zones = self.zone_list();
        if zones.is_empty() {
            return Err(
                FieldMetadata::new("zone list", "TEMPLAR_ZONES", "zones").missing(),
            );
        }
        let storage_uuid = require_field(
            self.storage_uuid.as_deref(),
            &FieldMetadata::new("source template UUID", "TEMPLAR_STORAGE_UUID", "storage_uuid"),
        )?;
        let ssh_public_key = match self.ssh_public_key_path.as_deref() {
            Some(path) => read_public_key(path)?,
            None => String::new(),
        };

        let config = RunConfig {
            zones,
            storage_uuid: storage_uuid.to_owned(),
            storage_size_gb: self.storage_size_gb,
            template_prefix: self.template_prefix.trim().to_owned(),
            state_timeout: Duration::from_secs(u64::from(self.state_timeout_secs)),
            step_timeout: Duration::from_secs(u64::from(self.step_timeout_secs)),
            ssh_username: self.ssh_username.trim().to_owned(),
            ssh_public_key,
        };
        config.validate()?;
        Ok(config)
    }
}

impl RunConfig {
    /// Creates a configuration with default sizes and timeouts.
    #[must_use]
    pub fn new<Z, S>(zones: Z, storage_uuid: impl Into<String>) -> Self
    where
        Z: IntoIterator<Item = S>,
        S: Into<String>,
    {
        Self {
            zones: zones.into_iter().map(Into::into).collect(),
            storage_uuid: storage_uuid.into(),
            storage_size_gb: DEFAULT_STORAGE_SIZE_GB,
            template_prefix: String::new(),
            state_timeout: Duration::from_secs(u64::from(DEFAULT_STATE_TIMEOUT_SECS)),
            step_timeout: Duration::from_secs(u64::from(DEFAULT_STEP_TIMEOUT_SECS)),
            ssh_username: DEFAULT_SSH_USERNAME.to_owned(),
            ssh_public_key: String::new(),
        }
    }

    /// Sets the template prefix.
    #[must_use]
    pub fn with_template_prefix(mut self, prefix: impl Into<String>) -> Self {
        self.template_prefix = prefix.into();
        self
    }

    /// Sets the per-wait and per-step timeouts.
    #[must_use]
    pub const fn with_timeouts(mut self, state_timeout: Duration, step_timeout: Duration) -> Self {
        self.state_timeout = state_timeout;
        self.step_timeout = step_timeout;
        self
    }

    /// Sets the authorised public key text.
    #[must_use]
    pub fn with_ssh_public_key(mut self, key: impl Into<String>) -> Self {
        self.ssh_public_key = key.into();
        self
    }

    /// Title and hostname given to every build server.
    #[must_use]
    pub fn server_title(&self) -> &str {
        if self.template_prefix.is_empty() {
            DEFAULT_SERVER_TITLE
        } else {
            &self.template_prefix
        }
    }

    /// Checks invariants the pipeline relies on.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::MissingField`] or [`ConfigError::Invalid`]
    /// naming the offending field.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.zones.is_empty() {
            return Err(FieldMetadata::new("zone list", "TEMPLAR_ZONES", "zones").missing());
        }
        if self.zones.iter().any(|zone| zone.trim().is_empty()) {
            return Err(ConfigError::Invalid {
                field: "zones",
                reason: "zone names must not be blank",
            });
        }
        if self.storage_uuid.trim().is_empty() {
            return Err(FieldMetadata::new(
                "source template UUID",
                "TEMPLAR_STORAGE_UUID",
                "storage_uuid",
            )
            .missing());
        }
        if self.ssh_username.is_empty() {
            return Err(
                FieldMetadata::new("SSH username", "TEMPLAR_SSH_USERNAME", "ssh_username")
                    .missing(),
            );
        }
        if self.storage_size_gb == 0 {
            return Err(ConfigError::Invalid {
                field: "storage_size_gb",
                reason: "must be greater than zero",
            });
        }
        if self.state_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "state_timeout_secs",
                reason: "must be greater than zero",
            });
        }
        if self.step_timeout.is_zero() {
            return Err(ConfigError::Invalid {
                field: "step_timeout_secs",
                reason: "must be greater than zero",
            });
        }
        Ok(())
    }
}

/// Expands a leading `~/` using `HOME`.
#[must_use]
pub fn expand_tilde(path: &str) -> String {
    if let Some(rest) = path.strip_prefix("~/")
        && let Some(home) = std::env::var_os("HOME")
    {
        return format!("{}/{rest}", home.to_string_lossy());
    }
    path.to_owned()
}

fn read_public_key(path: &str) -> Result<String, ConfigError> {
    let expanded = expand_tilde(path.trim());
    let key_read = |message: String| ConfigError::KeyRead {
        path: expanded.clone(),
        message,
    };
    let full = Utf8Path::new(&expanded);
    let (dir_path, file_name) = match (full.parent(), full.file_name()) {
        (Some(parent), Some(name)) if !parent.as_str().is_empty() => (parent, name),
        (_, Some(name)) => (Utf8Path::new("."), name),
        (_, None) => return Err(key_read(String::from("path has no file name"))),
    };
    let dir = Dir::open_ambient_dir(dir_path, ambient_authority())
        .map_err(|err| key_read(err.to_string()))?;
    let content = dir
        .read_to_string(file_name)
        .map_err(|err| key_read(err.to_string()))?;
    let key = content.trim();
    if key.is_empty() {
        return Err(key_read(String::from("file is empty")));
    }
    Ok(key.to_owned())
}

/// Errors raised during configuration loading and validation.
#[derive(Debug, Error, Eq, PartialEq)]
pub enum ConfigError {
    /// Indicates a required configuration field is empty or missing.
    #[error("missing configuration field: {0}")]
    MissingField(String),
    /// Indicates a field holds an unusable value.
    #[error("invalid {field}: {reason}")]
    Invalid {
        /// TOML key of the field.
        field: &'static str,
        /// Why the value was rejected.
        reason: &'static str,
    },
    /// Raised when the SSH public key cannot be read.
    #[error("failed to read SSH public key `{path}`: {message}")]
    KeyRead {
        /// Expanded path that failed to read.
        path: String,
        /// Underlying error message.
        message: String,
    },
    /// Surfaces errors from the `ortho-config` loader.
    #[error("configuration parsing failed: {0}")]
    Parse(String),
}

impl From<ortho_config::OrthoError> for ConfigError {
    fn from(value: ortho_config::OrthoError) -> Self {
        Self::Parse(value.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use rstest::{fixture, rstest};
    use std::io::Write;

    #[fixture]
    fn build_config() -> BuildConfig {
        BuildConfig {
            zones: Some(String::from("fi-hel1, de-fra1,,fi-hel1")),
            storage_uuid: Some(String::from("01000000-0000-4000-8000-000030200200")),
            storage_size_gb: 25,
            template_prefix: String::from(" base "),
            state_timeout_secs: 300,
            step_timeout_secs: 1200,
            ssh_username: String::from("root"),
            ssh_public_key_path: None,
            ssh_identity_file: None,
            ssh_bin: String::from("ssh"),
            provision_command: None,
        }
    }

    #[rstest]
    fn zone_list_keeps_order_and_duplicates(build_config: BuildConfig) {
        assert_eq!(
            build_config.zone_list(),
            vec!["fi-hel1", "de-fra1", "fi-hel1"]
        );
    }

    #[rstest]
    fn run_config_trims_prefix_and_converts_timeouts(build_config: BuildConfig) {
        let config = build_config
            .run_config()
            .unwrap_or_else(|err| panic!("config should validate: {err}"));
        assert_eq!(config.template_prefix, "base");
        assert_eq!(config.server_title(), "base");
        assert_eq!(config.state_timeout, Duration::from_secs(300));
        assert_eq!(config.step_timeout, Duration::from_secs(1200));
        assert!(config.ssh_public_key.is_empty());
    }

    #[rstest]
    fn missing_zones_names_env_var(mut build_config: BuildConfig) {
        build_config.zones = Some(String::from(" , "));
        let err = build_config.run_config().expect_err("zones are required");
        assert!(err.to_string().contains("TEMPLAR_ZONES"), "{err}");
    }

    #[rstest]
    fn missing_storage_names_toml_key(mut build_config: BuildConfig) {
        build_config.storage_uuid = None;
        let err = build_config.run_config().expect_err("storage is required");
        assert!(err.to_string().contains("storage_uuid"), "{err}");
    }

    #[rstest]
    fn zero_state_timeout_is_rejected(mut build_config: BuildConfig) {
        build_config.state_timeout_secs = 0;
        let err = build_config.run_config().expect_err("timeout must be positive");
        assert_eq!(
            err,
            ConfigError::Invalid {
                field: "state_timeout_secs",
                reason: "must be greater than zero",
            }
        );
    }

    #[rstest]
    fn public_key_is_read_and_trimmed(mut build_config: BuildConfig) {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        writeln!(file, "ssh-ed25519 AAAAC3Nza user@host").expect("write key");
        build_config.ssh_public_key_path = Some(file.path().to_string_lossy().into_owned());

        let config = build_config.run_config().expect("config");
        assert_eq!(config.ssh_public_key, "ssh-ed25519 AAAAC3Nza user@host");
    }

    #[rstest]
    fn unreadable_public_key_reports_path(mut build_config: BuildConfig) {
        build_config.ssh_public_key_path = Some(String::from("/nonexistent/templar/key.pub"));
        let err = build_config.run_config().expect_err("missing key file");
        assert!(
            matches!(err, ConfigError::KeyRead { ref path, .. } if path == "/nonexistent/templar/key.pub"),
            "{err}"
        );
    }

    #[test]
    fn server_title_falls_back_without_prefix() {
        let config = RunConfig::new(["fi-hel1"], "tmpl");
        assert_eq!(config.server_title(), DEFAULT_SERVER_TITLE);
    }

    #[test]
    fn credentials_validation_names_env_var() {
        let config = UpCloudConfig {
            username: Some(String::from("user")),
            password: Some(String::from("  ")),
            api_base: DEFAULT_API_BASE.to_owned(),
        };
        let err = config.validate().expect_err("password is required");
        assert!(err.to_string().contains("UPCLOUD_PASSWORD"), "{err}");
    }
}
