//! Configuration validation seen from outside the crate.

use std::time::Duration;

use rstest::*;
use templar::config::ConfigError;
use templar::{BuildConfig, RunConfig, UpCloudClient, UpCloudConfig, UpCloudError};

#[fixture]
fn credentials() -> UpCloudConfig {
    UpCloudConfig {
        username: Some(String::from("api-user")),
        password: Some(String::from("s3cret")),
        api_base: String::from(templar::config::DEFAULT_API_BASE),
    }
}

#[fixture]
fn build_config() -> BuildConfig {
    BuildConfig {
        zones: Some(String::from("fi-hel1,de-fra1")),
        storage_uuid: Some(String::from("01000000-0000-4000-8000-000030220200")),
        storage_size_gb: 25,
        template_prefix: String::new(),
        state_timeout_secs: 300,
        step_timeout_secs: 1200,
        ssh_username: String::from("root"),
        ssh_public_key_path: None,
        ssh_identity_file: None,
        ssh_bin: String::from("ssh"),
        provision_command: None,
    }
}

fn assert_actionable(error: &ConfigError, env_var: &str, toml_key: &str) {
    let message = error.to_string();
    assert!(
        message.contains(env_var),
        "error should mention env var {env_var}: {message}"
    );
    assert!(
        message.contains("templar.toml"),
        "error should mention config file: {message}"
    );
    assert!(
        message.contains(toml_key),
        "error should mention TOML key {toml_key}: {message}"
    );
}

#[rstest]
#[case::username(|cfg: &mut UpCloudConfig| cfg.username = None, "UPCLOUD_USERNAME", "username")]
#[case::blank_password(
    |cfg: &mut UpCloudConfig| cfg.password = Some(String::from("  ")),
    "UPCLOUD_PASSWORD",
    "password"
)]
#[case::api_base(|cfg: &mut UpCloudConfig| cfg.api_base.clear(), "UPCLOUD_API_BASE", "api_base")]
fn credential_errors_are_actionable(
    mut credentials: UpCloudConfig,
    #[case] mutate: fn(&mut UpCloudConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut credentials);
    let error = credentials.validate().expect_err("validation should fail");
    assert_actionable(&error, env_var, toml_key);
}

#[rstest]
#[case::zones(|cfg: &mut BuildConfig| cfg.zones = Some(String::from(" , ")), "TEMPLAR_ZONES", "zones")]
#[case::storage(|cfg: &mut BuildConfig| cfg.storage_uuid = None, "TEMPLAR_STORAGE_UUID", "storage_uuid")]
#[case::ssh_username(
    |cfg: &mut BuildConfig| cfg.ssh_username.clear(),
    "TEMPLAR_SSH_USERNAME",
    "ssh_username"
)]
fn build_errors_are_actionable(
    mut build_config: BuildConfig,
    #[case] mutate: fn(&mut BuildConfig),
    #[case] env_var: &str,
    #[case] toml_key: &str,
) {
    mutate(&mut build_config);
    let error = build_config.run_config().expect_err("validation should fail");
    assert_actionable(&error, env_var, toml_key);
}

#[rstest]
fn run_config_carries_build_inputs(build_config: BuildConfig) {
    let config = BuildConfig {
        template_prefix: String::from("web"),
        state_timeout_secs: 30,
        ..build_config
    }
    .run_config()
    .unwrap_or_else(|err| panic!("valid config: {err}"));

    assert_eq!(config.zones, vec!["fi-hel1", "de-fra1"]);
    assert_eq!(config.server_title(), "web");
    assert_eq!(config.state_timeout, Duration::from_secs(30));
    assert_eq!(config.step_timeout, Duration::from_secs(1200));
    assert!(config.ssh_public_key.is_empty());
}

#[test]
fn run_config_rejects_blank_zone_entries() {
    let config = RunConfig::new(["fi-hel1", " "], "tmpl");
    let error = config.validate().expect_err("blank zone rejected");
    assert!(
        matches!(error, ConfigError::Invalid { field: "zones", .. }),
        "{error}"
    );
}

#[test]
fn run_config_rejects_zero_step_timeout() {
    let config = RunConfig::new(["fi-hel1"], "tmpl")
        .with_timeouts(Duration::from_secs(1), Duration::ZERO);
    let error = config.validate().expect_err("zero step timeout rejected");
    assert!(
        matches!(error, ConfigError::Invalid { field: "step_timeout_secs", .. }),
        "{error}"
    );
}

#[rstest]
fn client_requires_credentials(credentials: UpCloudConfig) {
    let config = UpCloudConfig {
        password: None,
        ..credentials
    };
    let Err(error) = UpCloudClient::new(&config) else {
        panic!("client should reject missing password");
    };
    assert!(matches!(error, UpCloudError::Config(_)), "{error}");
    assert!(error.to_string().contains("UPCLOUD_PASSWORD"), "{error}");
}

#[rstest]
fn client_accepts_valid_credentials(credentials: UpCloudConfig) {
    UpCloudClient::new(&credentials).unwrap_or_else(|err| panic!("client builds: {err}"));
}
