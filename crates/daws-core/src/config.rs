//! Configuration loading and typed config structures for DAWS processes.
//!
//! The canonical configuration lives in `daws-config.yaml` at the project
//! root. Every section and every field is optional; missing values fall
//! back to the defaults below. A handful of environment variables override
//! the YAML so containers can be wired without editing the file:
//!
//! | Variable | Overrides |
//! |----------|-----------|
//! | `NATS_URL` | `bus.url` |
//! | `DRAGONFLY_URL` | `store.url` |
//! | `DAWS_STORE` | `store.backend` (`dragonfly` or `memory`) |
//! | `OBSERVER_PORT` | `observer.port` |
//! | `LOG_FORMAT` | `logging.format` (`pretty` or `json`) |

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use daws_bus::{JetStreamOptions, RetryPolicy};
use daws_store::SeedPlan;
use daws_types::Domain;
use serde::Deserialize;

/// Errors that can occur when loading configuration.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    /// Failed to read the configuration file from disk.
    #[error("failed to read config file: {source}")]
    Io {
        /// The underlying I/O error.
        #[from]
        source: std::io::Error,
    },

    /// Failed to parse YAML content.
    #[error("failed to parse config YAML: {source}")]
    Yaml {
        /// The underlying YAML parse error.
        source: serde_yml::Error,
    },

    /// The configuration parsed but is not usable.
    #[error("invalid configuration: {0}")]
    Invalid(String),
}

impl From<serde_yml::Error> for ConfigError {
    fn from(source: serde_yml::Error) -> Self {
        Self::Yaml { source }
    }
}

/// Top-level configuration shared by every DAWS process.
#[derive(Debug, Clone, Default, PartialEq, Eq, Deserialize)]
pub struct DawsConfig {
    /// Simulated world parameters.
    #[serde(default)]
    pub world: WorldConfig,

    /// Message bus connection and delivery settings.
    #[serde(default)]
    pub bus: BusConfig,

    /// World store backend.
    #[serde(default)]
    pub store: StoreConfig,

    /// Tick coordinator settings.
    #[serde(default)]
    pub coordinator: CoordinatorConfig,

    /// Domain controller settings.
    #[serde(default)]
    pub controller: ControllerConfig,

    /// Worker pool settings.
    #[serde(default)]
    pub worker: WorkerConfig,

    /// HTTP status server settings.
    #[serde(default)]
    pub observer: ObserverConfig,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,
}

impl DawsConfig {
    /// Load configuration from a YAML file and apply environment overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Io`] if the file cannot be read,
    /// [`ConfigError::Yaml`] if the content is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn from_file(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path)?;
        Self::parse(&contents)
    }

    /// Parse configuration from a YAML string and apply environment
    /// overrides.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Yaml`] if the string is not valid YAML, or
    /// [`ConfigError::Invalid`] if a value is out of range.
    pub fn parse(yaml: &str) -> Result<Self, ConfigError> {
        let mut config: Self = serde_yml::from_str(yaml)?;
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Load `path` if it exists, otherwise start from defaults. Environment
    /// overrides apply either way.
    ///
    /// # Errors
    ///
    /// Same as [`from_file`](Self::from_file).
    pub fn load_or_default(path: &Path) -> Result<Self, ConfigError> {
        if path.exists() {
            return Self::from_file(path);
        }
        let mut config = Self::default();
        config.apply_env_overrides()?;
        config.validate()?;
        Ok(config)
    }

    /// Override values from the process environment.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable holds an unusable value.
    pub fn apply_env_overrides(&mut self) -> Result<(), ConfigError> {
        self.apply_overrides(|key| std::env::var(key).ok())
    }

    /// Override values from an arbitrary variable lookup.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] if a variable holds an unusable value.
    pub fn apply_overrides<F>(&mut self, lookup: F) -> Result<(), ConfigError>
    where
        F: Fn(&str) -> Option<String>,
    {
        if let Some(val) = lookup("NATS_URL") {
            self.bus.url = val;
        }
        if let Some(val) = lookup("DRAGONFLY_URL") {
            self.store.url = val;
        }
        if let Some(val) = lookup("DAWS_STORE") {
            self.store.backend = match val.trim().to_ascii_lowercase().as_str() {
                "dragonfly" | "redis" => StoreBackend::Dragonfly,
                "memory" => StoreBackend::Memory,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "DAWS_STORE must be dragonfly or memory, got {other}"
                    )));
                }
            };
        }
        if let Some(val) = lookup("OBSERVER_PORT") {
            self.observer.port = val.trim().parse().map_err(|e| {
                ConfigError::Invalid(format!("OBSERVER_PORT is not a port number: {e}"))
            })?;
        }
        if let Some(val) = lookup("LOG_FORMAT") {
            self.logging.format = match val.trim().to_ascii_lowercase().as_str() {
                "json" => LogFormat::Json,
                "pretty" | "text" => LogFormat::Pretty,
                other => {
                    return Err(ConfigError::Invalid(format!(
                        "LOG_FORMAT must be pretty or json, got {other}"
                    )));
                }
            };
        }
        Ok(())
    }

    /// Reject values the processes cannot run with.
    ///
    /// # Errors
    ///
    /// Returns [`ConfigError::Invalid`] naming the first bad value.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.world.step_seconds == 0 {
            return Err(ConfigError::Invalid(
                "world.step_seconds must be at least 1".to_owned(),
            ));
        }
        if self.world.required_domains.is_empty() {
            return Err(ConfigError::Invalid(
                "world.required_domains must name at least one domain".to_owned(),
            ));
        }
        if self.worker.concurrency == 0 {
            return Err(ConfigError::Invalid(
                "worker.concurrency must be at least 1".to_owned(),
            ));
        }
        if self.controller.fanout_concurrency == 0 {
            return Err(ConfigError::Invalid(
                "controller.fanout_concurrency must be at least 1".to_owned(),
            ));
        }
        if self.world.traveling_percent > 100 {
            return Err(ConfigError::Invalid(
                "world.traveling_percent must be at most 100".to_owned(),
            ));
        }
        Ok(())
    }
}

/// Simulated world parameters.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorldConfig {
    /// Simulated seconds per tick.
    #[serde(default = "default_step_seconds")]
    pub step_seconds: u64,

    /// Domains that must have a live controller before a tick is emitted.
    #[serde(default = "default_required_domains")]
    pub required_domains: Vec<Domain>,

    /// Simulated start time used when the store holds no settings.
    #[serde(default)]
    pub start_time: Option<DateTime<Utc>>,

    /// Seed the starting world when the store is empty.
    #[serde(default = "default_true")]
    pub seed_world: bool,

    /// RNG seed for world generation; random when absent.
    #[serde(default)]
    pub seed: Option<u64>,

    /// Buildings generated per starting city.
    #[serde(default = "default_buildings_per_city")]
    pub buildings_per_city: u32,

    /// People generated per starting city.
    #[serde(default = "default_people_per_city")]
    pub people_per_city: u32,

    /// Percentage of generated people already travelling.
    #[serde(default = "default_traveling_percent")]
    pub traveling_percent: u8,
}

impl WorldConfig {
    /// The world-generation plan described by this section.
    pub const fn seed_plan(&self) -> SeedPlan {
        SeedPlan {
            buildings_per_city: self.buildings_per_city,
            people_per_city: self.people_per_city,
            traveling_percent: self.traveling_percent,
        }
    }
}

impl Default for WorldConfig {
    fn default() -> Self {
        Self {
            step_seconds: default_step_seconds(),
            required_domains: default_required_domains(),
            start_time: None,
            seed_world: true,
            seed: None,
            buildings_per_city: default_buildings_per_city(),
            people_per_city: default_people_per_city(),
            traveling_percent: default_traveling_percent(),
        }
    }
}

/// Which bus adapter to run on.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BusBackend {
    /// NATS `JetStream`.
    #[default]
    Nats,
    /// In-process bus; only meaningful when every role runs in one process.
    Memory,
}

/// Message bus connection and delivery settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct BusConfig {
    /// Adapter to use.
    #[serde(default)]
    pub backend: BusBackend,

    /// NATS server URL.
    #[serde(default = "default_nats_url")]
    pub url: String,

    /// Connection attempts before giving up.
    #[serde(default = "default_connect_attempts")]
    pub connect_attempts: u32,

    /// Delay after the first failed attempt in milliseconds.
    #[serde(default = "default_initial_backoff_ms")]
    pub initial_backoff_ms: u64,

    /// Cap on any single retry delay in milliseconds.
    #[serde(default = "default_max_backoff_ms")]
    pub max_backoff_ms: u64,

    /// Publish attempts before a publish failure is surfaced.
    #[serde(default = "default_publish_attempts")]
    pub publish_attempts: u32,

    /// Broker acknowledgement timeout for one publish in milliseconds.
    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Time a delivery may stay unsettled before redelivery in milliseconds.
    #[serde(default = "default_ack_wait_ms")]
    pub ack_wait_ms: u64,

    /// Deliveries of one job before it is discarded.
    #[serde(default = "default_max_deliver")]
    pub max_deliver: u32,

    /// Idle seconds after which the broker drops an abandoned group.
    #[serde(default = "default_inactive_threshold_secs")]
    pub inactive_threshold_secs: u64,

    /// Long-poll duration of one fetch in milliseconds.
    #[serde(default = "default_fetch_expiry_ms")]
    pub fetch_expiry_ms: u64,
}

impl BusConfig {
    /// Retry schedule for connecting.
    pub const fn connect_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.connect_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    /// Retry schedule for publishing.
    pub const fn publish_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.publish_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
        }
    }

    /// Adapter tunables for `JetStream`.
    pub fn jetstream_options(&self) -> JetStreamOptions {
        JetStreamOptions {
            publish_timeout: Duration::from_millis(self.publish_timeout_ms),
            ack_wait: Duration::from_millis(self.ack_wait_ms),
            // The broker cap sits above the worker's own limit so the worker
            // always sees the last delivery and can discard it explicitly.
            max_deliver: i64::from(self.max_deliver).saturating_add(1),
            inactive_threshold: Duration::from_secs(self.inactive_threshold_secs),
            fetch_expiry: Duration::from_millis(self.fetch_expiry_ms),
        }
    }
}

impl Default for BusConfig {
    fn default() -> Self {
        Self {
            backend: BusBackend::default(),
            url: default_nats_url(),
            connect_attempts: default_connect_attempts(),
            initial_backoff_ms: default_initial_backoff_ms(),
            max_backoff_ms: default_max_backoff_ms(),
            publish_attempts: default_publish_attempts(),
            publish_timeout_ms: default_publish_timeout_ms(),
            ack_wait_ms: default_ack_wait_ms(),
            max_deliver: default_max_deliver(),
            inactive_threshold_secs: default_inactive_threshold_secs(),
            fetch_expiry_ms: default_fetch_expiry_ms(),
        }
    }
}

/// Which world store to use.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StoreBackend {
    /// `Dragonfly` or any Redis-compatible server.
    #[default]
    Dragonfly,
    /// In-process store.
    Memory,
}

/// World store settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct StoreConfig {
    /// Backend to use.
    #[serde(default)]
    pub backend: StoreBackend,

    /// Redis-scheme URL of the `Dragonfly` instance.
    #[serde(default = "default_dragonfly_url")]
    pub url: String,
}

impl Default for StoreConfig {
    fn default() -> Self {
        Self {
            backend: StoreBackend::default(),
            url: default_dragonfly_url(),
        }
    }
}

/// Tick coordinator settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct CoordinatorConfig {
    /// Milliseconds a controller may stay not-ready after an emission before
    /// it is evicted.
    #[serde(default = "default_ready_timeout_ms")]
    pub ready_timeout_ms: u64,

    /// Milliseconds between stale-controller sweeps.
    #[serde(default = "default_sweep_interval_ms")]
    pub sweep_interval_ms: u64,

    /// Begin emitting as soon as controllers are ready, without a `start`.
    #[serde(default = "default_true")]
    pub autostart: bool,

    /// Save a clock checkpoint every this many ticks; 0 saves only on
    /// shutdown.
    #[serde(default = "default_checkpoint_every_ticks")]
    pub checkpoint_every_ticks: u64,
}

impl CoordinatorConfig {
    /// Eviction threshold as a [`Duration`].
    pub const fn ready_timeout(&self) -> Duration {
        Duration::from_millis(self.ready_timeout_ms)
    }

    /// Sweep period as a [`Duration`].
    pub const fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms)
    }
}

impl Default for CoordinatorConfig {
    fn default() -> Self {
        Self {
            ready_timeout_ms: default_ready_timeout_ms(),
            sweep_interval_ms: default_sweep_interval_ms(),
            autostart: true,
            checkpoint_every_ticks: default_checkpoint_every_ticks(),
        }
    }
}

/// Domain controller settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ControllerConfig {
    /// Milliseconds between drain checks.
    #[serde(default = "default_drain_poll_ms")]
    pub drain_poll_ms: u64,

    /// Milliseconds a tick may stay undrained before Ready is forced.
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Concurrent job publishes during fan-out.
    #[serde(default = "default_fanout_concurrency")]
    pub fanout_concurrency: usize,

    /// Ticks kept in the fan-out ledger for redelivery de-duplication.
    #[serde(default = "default_retain_ticks")]
    pub retain_ticks: u64,

    /// Milliseconds without a tick after which an idle controller re-sends
    /// its join report.
    #[serde(default = "default_rejoin_interval_ms")]
    pub rejoin_interval_ms: u64,
}

impl Default for ControllerConfig {
    fn default() -> Self {
        Self {
            drain_poll_ms: default_drain_poll_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            fanout_concurrency: default_fanout_concurrency(),
            retain_ticks: default_retain_ticks(),
            rejoin_interval_ms: default_rejoin_interval_ms(),
        }
    }
}

/// Worker pool settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct WorkerConfig {
    /// Workers per process.
    #[serde(default = "default_worker_concurrency")]
    pub concurrency: usize,

    /// Unsettled jobs per worker.
    #[serde(default = "default_prefetch")]
    pub prefetch: usize,

    /// Artificial per-job delay in milliseconds, to emulate slow updates.
    #[serde(default)]
    pub step_delay_ms: u64,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            concurrency: default_worker_concurrency(),
            prefetch: default_prefetch(),
            step_delay_ms: 0,
        }
    }
}

/// HTTP status server settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ObserverConfig {
    /// Serve the HTTP API.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Bind address.
    #[serde(default = "default_observer_host")]
    pub host: String,

    /// TCP port.
    #[serde(default = "default_observer_port")]
    pub port: u16,
}

impl Default for ObserverConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            host: default_observer_host(),
            port: default_observer_port(),
        }
    }
}

/// Log output format.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum LogFormat {
    /// Human-readable lines.
    #[default]
    Pretty,
    /// One JSON object per line.
    Json,
}

/// Logging settings.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct LoggingConfig {
    /// Default filter directive when `RUST_LOG` is unset.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Output format.
    #[serde(default)]
    pub format: LogFormat,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            format: LogFormat::default(),
        }
    }
}

const fn default_true() -> bool {
    true
}

const fn default_step_seconds() -> u64 {
    1
}

fn default_required_domains() -> Vec<Domain> {
    Domain::ALL.to_vec()
}

const fn default_buildings_per_city() -> u32 {
    12
}

const fn default_people_per_city() -> u32 {
    40
}

const fn default_traveling_percent() -> u8 {
    25
}

fn default_nats_url() -> String {
    "nats://localhost:4222".to_owned()
}

const fn default_connect_attempts() -> u32 {
    10
}

const fn default_initial_backoff_ms() -> u64 {
    200
}

const fn default_max_backoff_ms() -> u64 {
    5_000
}

const fn default_publish_attempts() -> u32 {
    3
}

const fn default_publish_timeout_ms() -> u64 {
    5_000
}

const fn default_ack_wait_ms() -> u64 {
    30_000
}

const fn default_max_deliver() -> u32 {
    5
}

const fn default_inactive_threshold_secs() -> u64 {
    300
}

const fn default_fetch_expiry_ms() -> u64 {
    1_000
}

fn default_dragonfly_url() -> String {
    "redis://localhost:6379".to_owned()
}

const fn default_ready_timeout_ms() -> u64 {
    180_000
}

const fn default_sweep_interval_ms() -> u64 {
    1_000
}

const fn default_checkpoint_every_ticks() -> u64 {
    10
}

const fn default_drain_poll_ms() -> u64 {
    100
}

const fn default_drain_timeout_ms() -> u64 {
    120_000
}

const fn default_fanout_concurrency() -> usize {
    64
}

const fn default_retain_ticks() -> u64 {
    4
}

const fn default_rejoin_interval_ms() -> u64 {
    15_000
}

const fn default_worker_concurrency() -> usize {
    4
}

const fn default_prefetch() -> usize {
    1
}

fn default_observer_host() -> String {
    "0.0.0.0".to_owned()
}

const fn default_observer_port() -> u16 {
    8080
}

fn default_log_level() -> String {
    "info".to_owned()
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    fn no_env(_: &str) -> Option<String> {
        None
    }

    #[test]
    fn empty_yaml_yields_defaults() {
        let mut config: DawsConfig = serde_yml::from_str("{}").unwrap();
        config.apply_overrides(no_env).unwrap();
        assert_eq!(config, DawsConfig::default());
        assert_eq!(config.world.required_domains, vec![Domain::City, Domain::Traffic]);
        assert_eq!(config.controller.drain_poll_ms, 100);
        assert_eq!(config.worker.prefetch, 1);
        assert_eq!(config.coordinator.checkpoint_every_ticks, 10);
    }

    #[test]
    fn parse_partial_yaml() {
        let yaml = r"
world:
  step_seconds: 60
  required_domains: [city]
bus:
  url: nats://bus:4222
  max_deliver: 3
controller:
  drain_timeout_ms: 500
logging:
  format: json
";
        let mut config: DawsConfig = serde_yml::from_str(yaml).unwrap();
        config.apply_overrides(no_env).unwrap();
        config.validate().unwrap();
        assert_eq!(config.world.step_seconds, 60);
        assert_eq!(config.world.required_domains, vec![Domain::City]);
        assert_eq!(config.bus.url, "nats://bus:4222");
        assert_eq!(config.bus.jetstream_options().max_deliver, 4);
        assert_eq!(config.controller.drain_timeout_ms, 500);
        assert_eq!(config.controller.fanout_concurrency, 64);
        assert_eq!(config.logging.format, LogFormat::Json);
    }

    #[test]
    fn environment_overrides_yaml() {
        let mut config = DawsConfig::default();
        config
            .apply_overrides(|key| match key {
                "NATS_URL" => Some("nats://env:4222".to_owned()),
                "DAWS_STORE" => Some("memory".to_owned()),
                "OBSERVER_PORT" => Some("9090".to_owned()),
                _ => None,
            })
            .unwrap();
        assert_eq!(config.bus.url, "nats://env:4222");
        assert_eq!(config.store.backend, StoreBackend::Memory);
        assert_eq!(config.observer.port, 9090);
    }

    #[test]
    fn bad_override_is_rejected() {
        let mut config = DawsConfig::default();
        let result = config.apply_overrides(|key| {
            (key == "OBSERVER_PORT").then(|| "eighty".to_owned())
        });
        assert!(matches!(result, Err(ConfigError::Invalid(_))));
    }

    #[test]
    fn empty_required_domains_is_invalid() {
        let mut config = DawsConfig::default();
        config.world.required_domains.clear();
        assert!(config.validate().is_err());
    }
}
