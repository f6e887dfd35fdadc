use anyhow::{ensure, Context};
use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use std::time::Duration;
use tracing::debug;

const DEFAULT_CONFIG_FILES: &[&str] = &[
    "courier.toml",
    "config/courier.toml",
    "crates/config/courier.toml",
    "../courier.toml",
    "../config/courier.toml",
];

/// Database URL value that selects the in-memory message store.
pub const MEMORY_DATABASE_URL: &str = "memory";

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub http: HttpConfig,
    #[serde(default)]
    pub database: DatabaseConfig,
    #[serde(default)]
    pub auth: AuthConfig,
    #[serde(default)]
    pub hub: HubConfig,
    #[serde(default)]
    pub client: ClientConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HttpConfig {
    pub address: String,
    pub port: u16,
}

impl Default for HttpConfig {
    fn default() -> Self {
        Self {
            address: "127.0.0.1".to_string(),
            port: 7070,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DatabaseConfig {
    pub url: String,
    pub max_connections: u32,
}

impl DatabaseConfig {
    pub fn is_memory(&self) -> bool {
        self.url == MEMORY_DATABASE_URL
    }
}

impl Default for DatabaseConfig {
    fn default() -> Self {
        Self {
            url: "sqlite://courier.db".to_string(),
            max_connections: 10,
        }
    }
}

/// Settings for verifying the bearer tokens presented on upgrade.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct AuthConfig {
    pub jwt_secret: String,
    pub issuer: String,
    pub audience: String,
    pub token_ttl_seconds: u64,
}

impl Default for AuthConfig {
    fn default() -> Self {
        Self {
            jwt_secret: "default_secret_change_in_production".to_string(),
            issuer: "courier".to_string(),
            audience: "courier-clients".to_string(),
            token_ttl_seconds: 86_400,
        }
    }
}

/// Connection hub and per-session tuning.
///
/// ```
/// use courier_config::HubConfig;
///
/// let hub = HubConfig::default();
/// assert_eq!(hub.ping_interval().as_secs(), 40);
/// ```
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct HubConfig {
    /// Capacity of each session's outbound queue
    pub outbound_capacity: usize,
    /// Capacity of the hub's command queue
    pub command_capacity: usize,
    /// Read deadline; a silent peer is dropped after this long
    pub heartbeat_timeout_seconds: u64,
    pub write_timeout_seconds: u64,
    /// Upper bound on queued frames written per flush
    pub max_batch: usize,
}

impl HubConfig {
    pub fn heartbeat_timeout(&self) -> Duration {
        Duration::from_secs(self.heartbeat_timeout_seconds)
    }

    /// Pings go out at two thirds of the read deadline.
    pub fn ping_interval(&self) -> Duration {
        self.heartbeat_timeout() * 2 / 3
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }
}

impl Default for HubConfig {
    fn default() -> Self {
        Self {
            outbound_capacity: 256,
            command_capacity: 1024,
            heartbeat_timeout_seconds: 60,
            write_timeout_seconds: 10,
            max_batch: 32,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ClientConfig {
    pub url: String,
    pub base_delay_ms: u64,
    pub max_delay_ms: u64,
    pub max_attempts: u32,
    pub heartbeat_interval_seconds: u64,
    pub connect_timeout_seconds: u64,
    pub write_timeout_seconds: u64,
}

impl ClientConfig {
    pub fn base_delay(&self) -> Duration {
        Duration::from_millis(self.base_delay_ms)
    }

    pub fn max_delay(&self) -> Duration {
        Duration::from_millis(self.max_delay_ms)
    }

    pub fn heartbeat_interval(&self) -> Duration {
        Duration::from_secs(self.heartbeat_interval_seconds)
    }

    pub fn connect_timeout(&self) -> Duration {
        Duration::from_secs(self.connect_timeout_seconds)
    }

    pub fn write_timeout(&self) -> Duration {
        Duration::from_secs(self.write_timeout_seconds)
    }
}

impl Default for ClientConfig {
    fn default() -> Self {
        Self {
            url: "ws://127.0.0.1:7070/ws".to_string(),
            base_delay_ms: 1_000,
            max_delay_ms: 30_000,
            max_attempts: 5,
            heartbeat_interval_seconds: 25,
            connect_timeout_seconds: 10,
            write_timeout_seconds: 10,
        }
    }
}

impl AppConfig {
    /// Reject settings the hub and client cannot run with.
    pub fn validate(&self) -> anyhow::Result<()> {
        ensure!(self.hub.outbound_capacity > 0, "hub.outbound_capacity must be non-zero");
        ensure!(self.hub.command_capacity > 0, "hub.command_capacity must be non-zero");
        ensure!(self.hub.max_batch > 0, "hub.max_batch must be non-zero");
        ensure!(
            self.hub.heartbeat_timeout_seconds >= 3,
            "hub.heartbeat_timeout_seconds must be at least 3"
        );
        ensure!(
            self.hub.write_timeout_seconds > 0,
            "hub.write_timeout_seconds must be non-zero"
        );
        ensure!(self.client.max_attempts > 0, "client.max_attempts must be non-zero");
        ensure!(
            self.client.heartbeat_interval_seconds > 0,
            "client.heartbeat_interval_seconds must be non-zero"
        );
        ensure!(
            self.client.connect_timeout_seconds > 0,
            "client.connect_timeout_seconds must be non-zero"
        );
        ensure!(
            self.client.write_timeout_seconds > 0,
            "client.write_timeout_seconds must be non-zero"
        );
        ensure!(
            self.client.max_delay_ms >= self.client.base_delay_ms,
            "client.max_delay_ms must not be below client.base_delay_ms"
        );
        Ok(())
    }
}

/// Load the application configuration by combining defaults, files, and environment overrides.
///
/// ```
/// use courier_config::load;
///
/// std::env::remove_var("COURIER_CONFIG");
///
/// let config = load().expect("configuration should load with defaults");
/// assert!(!config.http.address.is_empty());
/// ```
pub fn load() -> anyhow::Result<AppConfig> {
    let defaults = AppConfig::default();

    let mut builder = config::Config::builder()
        .set_default("http.address", defaults.http.address.clone())?
        .set_default("http.port", i64::from(defaults.http.port))?
        .set_default("database.url", defaults.database.url.clone())?
        .set_default(
            "database.max_connections",
            i64::from(defaults.database.max_connections),
        )?
        .set_default("auth.issuer", defaults.auth.issuer.clone())?
        .set_default("auth.audience", defaults.auth.audience.clone())?;

    let environment_overrides = config::Environment::with_prefix("COURIER").separator("__");

    let mut config_file_attached = false;

    if let Ok(path) = std::env::var("COURIER_CONFIG") {
        builder = builder.add_source(config::File::from(PathBuf::from(&path)));
        config_file_attached = true;
        debug!(path, "loading configuration via COURIER_CONFIG");
    } else if let Ok(cwd) = std::env::current_dir() {
        let fallback = DEFAULT_CONFIG_FILES
            .iter()
            .map(|candidate| cwd.join(candidate))
            .find(|path| path.exists());

        if let Some(path) = fallback {
            debug!(path = %path.display(), "loading configuration file");
            builder = builder.add_source(config::File::from(path));
            config_file_attached = true;
        }
    }

    if !config_file_attached {
        debug!("no configuration file found, relying on defaults and environment overrides");
    }

    builder = builder.add_source(environment_overrides);

    let cfg = builder.build().context("unable to build configuration")?;

    let config = cfg
        .try_deserialize::<AppConfig>()
        .context("invalid configuration")?;

    config.validate().context("invalid configuration")?;

    debug!(?config, "loaded courier configuration");
    Ok(config)
}
