//! Loader tests for the `courier-config` crate.
//!
//! These tests exercise the configuration loader across default handling,
//! file discovery, environment overrides, and validation behaviour.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serial_test::serial;
use tempfile::TempDir;

use courier_config::{load, AppConfig, ClientConfig, HttpConfig, HubConfig};

const ENV_VARS_TO_RESET: &[&str] = &[
    "COURIER_CONFIG",
    "COURIER__AUTH__JWT_SECRET",
    "COURIER__AUTH__ISSUER",
    "COURIER__CLIENT__HEARTBEAT_INTERVAL_SECONDS",
    "COURIER__CLIENT__MAX_ATTEMPTS",
    "COURIER__CLIENT__URL",
    "COURIER__DATABASE__MAX_CONNECTIONS",
    "COURIER__DATABASE__URL",
    "COURIER__HTTP__ADDRESS",
    "COURIER__HTTP__PORT",
    "COURIER__HUB__HEARTBEAT_TIMEOUT_SECONDS",
    "COURIER__HUB__OUTBOUND_CAPACITY",
];

struct TestContext {
    vars: Vec<(String, Option<String>)>,
    original_dir: Option<PathBuf>,
}

impl TestContext {
    fn new() -> Self {
        Self {
            vars: Vec::new(),
            original_dir: None,
        }
    }

    fn reset_environment(&mut self) {
        for key in ENV_VARS_TO_RESET {
            self.remove_var(key);
        }
    }

    fn set_var(&mut self, key: &str, value: impl AsRef<str>) {
        let previous = std::env::var(key).ok();
        std::env::set_var(key, value.as_ref());
        self.vars.push((key.to_string(), previous));
    }

    fn remove_var(&mut self, key: &str) {
        let previous = std::env::var(key).ok();
        std::env::remove_var(key);
        self.vars.push((key.to_string(), previous));
    }

    fn set_current_dir(&mut self, dir: &Path) {
        if self.original_dir.is_none() {
            self.original_dir =
                Some(std::env::current_dir().expect("failed to capture current directory"));
        }
        std::env::set_current_dir(dir).expect("failed to set current directory");
    }
}

impl Drop for TestContext {
    fn drop(&mut self) {
        if let Some(original) = self.original_dir.take() {
            let _ = std::env::set_current_dir(original);
        }

        while let Some((key, value)) = self.vars.pop() {
            match value {
                Some(val) => std::env::set_var(&key, val),
                None => std::env::remove_var(&key),
            }
        }
    }
}

fn write_config_file(root: &Path, relative: &str, contents: &str) {
    let path = root.join(relative);
    if let Some(parent) = path.parent() {
        fs::create_dir_all(parent).expect("failed to create config directories");
    }
    fs::write(path, contents).expect("failed to write config file");
}

#[test]
#[serial]
fn load_uses_default_values_when_no_files_found() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    let config = load().expect("configuration load should succeed without files");
    let defaults = AppConfig::default();

    assert_eq!(config.http.address, defaults.http.address);
    assert_eq!(config.http.port, defaults.http.port);
    assert_eq!(config.database.url, defaults.database.url);
    assert_eq!(config.auth.issuer, defaults.auth.issuer);
    assert_eq!(config.hub.outbound_capacity, defaults.hub.outbound_capacity);
    assert_eq!(config.client.max_attempts, defaults.client.max_attempts);
}

#[test]
#[serial]
fn load_picks_first_available_file_in_search_order() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "courier.toml",
        r#"
        [http]
        port = 4242
        "#,
    );
    write_config_file(
        temp_dir.path(),
        "config/courier.toml",
        r#"
        [http]
        port = 5151
        "#,
    );

    let config = load().expect("configuration load should pick the first file");
    assert_eq!(config.http.port, 4242);
}

#[test]
#[serial]
fn load_merges_partial_hub_section_with_defaults() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "courier.toml",
        r#"
        [hub]
        outbound_capacity = 8
        heartbeat_timeout_seconds = 30
        "#,
    );

    let config = load().expect("configuration load should succeed");
    let defaults = HubConfig::default();

    assert_eq!(config.hub.outbound_capacity, 8);
    assert_eq!(config.hub.heartbeat_timeout(), Duration::from_secs(30));
    assert_eq!(config.hub.ping_interval(), Duration::from_secs(20));
    assert_eq!(config.hub.write_timeout_seconds, defaults.write_timeout_seconds);
    assert_eq!(config.hub.command_capacity, defaults.command_capacity);
}

#[test]
#[serial]
fn load_applies_environment_overrides() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "courier.toml",
        r#"
        [http]
        port = 3030
        "#,
    );

    ctx.set_var("COURIER__HTTP__PORT", "8080");
    ctx.set_var("COURIER__CLIENT__MAX_ATTEMPTS", "9");

    let config = load().expect("configuration load should honour env overrides");
    assert_eq!(config.http.port, 8080);
    assert_eq!(config.client.max_attempts, 9);
}

#[test]
#[serial]
fn load_reads_explicit_config_path() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "elsewhere/hub.toml",
        r#"
        [database]
        url = "memory"
        "#,
    );
    ctx.set_var(
        "COURIER_CONFIG",
        temp_dir.path().join("elsewhere/hub.toml").display().to_string(),
    );

    let config = load().expect("configuration load should use COURIER_CONFIG");
    assert!(config.database.is_memory());
}

#[test]
#[serial]
fn load_rejects_zero_capacity_queue() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    ctx.set_var("COURIER__HUB__OUTBOUND_CAPACITY", "0");

    let error = load().expect_err("zero capacity must be rejected");
    assert!(
        format!("{error:#}").contains("outbound_capacity"),
        "unexpected error message: {error:#}"
    );
}

#[test]
#[serial]
fn load_errors_on_invalid_toml_contents() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    write_config_file(
        temp_dir.path(),
        "courier.toml",
        r#"
        [http]
        port = "not-a-number
        "#,
    );

    let error = load().expect_err("invalid TOML should cause load to fail");
    let message = error.to_string();
    assert!(
        message.contains("invalid configuration") || message.contains("unable to build configuration"),
        "unexpected error message: {message}"
    );
}

#[test]
fn client_config_durations_follow_millisecond_fields() {
    let client = ClientConfig {
        base_delay_ms: 250,
        max_delay_ms: 4_000,
        ..ClientConfig::default()
    };
    assert_eq!(client.base_delay(), Duration::from_millis(250));
    assert_eq!(client.max_delay(), Duration::from_secs(4));
}

#[test]
fn validate_rejects_delay_cap_below_base() {
    let mut config = AppConfig::default();
    config.client.base_delay_ms = 5_000;
    config.client.max_delay_ms = 1_000;
    assert!(config.validate().is_err());
}

#[test]
#[serial]
fn load_rejects_zero_client_heartbeat_interval() {
    let temp_dir = TempDir::new().expect("failed to create temp dir");
    let mut ctx = TestContext::new();
    ctx.reset_environment();
    ctx.set_current_dir(temp_dir.path());

    ctx.set_var("COURIER__CLIENT__HEARTBEAT_INTERVAL_SECONDS", "0");

    let error = load().expect_err("zero heartbeat interval must be rejected");
    assert!(
        format!("{error:#}").contains("heartbeat_interval_seconds"),
        "unexpected error message: {error:#}"
    );
}

#[test]
fn validate_rejects_zero_client_and_hub_timeouts() {
    let mut config = AppConfig::default();
    config.client.connect_timeout_seconds = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.client.write_timeout_seconds = 0;
    assert!(config.validate().is_err());

    let mut config = AppConfig::default();
    config.hub.write_timeout_seconds = 0;
    assert!(config.validate().is_err());
}

#[test]
fn http_config_defaults_match_expected_host_and_port() {
    let defaults = HttpConfig::default();
    assert_eq!(defaults.address, "127.0.0.1");
    assert_eq!(defaults.port, 7070);
}
