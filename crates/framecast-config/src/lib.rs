//! Persisted configuration for the framecast daemon.
//!
//! One TOML file plus `FRAMECAST_*` environment overrides, loaded in two
//! phases: [`ConfigLoader::identity`] resolves the device identity
//! cheaply at process start, [`ConfigLoader::load_full`] loads and
//! validates everything else before any component needs it. The result
//! translates into `framecast_core::CoreConfig` and
//! `framecast_mqtt::MqttSettings`.

use std::path::{Path, PathBuf};
use std::time::Duration;

use directories::ProjectDirs;
use figment::{
    Figment,
    providers::{Env, Format, Serialized, Toml},
    value::Value,
};
use secrecy::SecretString;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;
use url::Url;

use framecast_core::{CoreConfig, DeviceIdentity, RetryPolicy, Settings};
use framecast_mqtt::{Credentials, MqttSettings};

/// Environment prefix for overrides. Nested keys use `__`, e.g.
/// `FRAMECAST_BROKER__HOST`.
pub const ENV_PREFIX: &str = "FRAMECAST_";

// ── Error ───────────────────────────────────────────────────────────

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("invalid {field}: {reason}")]
    Validation { field: String, reason: String },

    #[error("no device identity: set device_id, or run on hardware exposing {tried}")]
    NoIdentity { tried: String },

    #[error("failed to serialize config: {0}")]
    Serialization(#[from] toml::ser::Error),

    #[error("config loading failed: {0}")]
    Figment(Box<figment::Error>),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl From<figment::Error> for ConfigError {
    fn from(err: figment::Error) -> Self {
        Self::Figment(Box::new(err))
    }
}

fn invalid(field: &str, reason: impl Into<String>) -> ConfigError {
    ConfigError::Validation {
        field: field.into(),
        reason: reason.into(),
    }
}

// ── TOML config structs ─────────────────────────────────────────────

/// Top-level daemon configuration.
#[derive(Debug, Clone, Default, Deserialize, Serialize)]
pub struct AppConfig {
    /// Overrides the hardware-derived identity.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub device_id: Option<String>,

    #[serde(default)]
    pub broker: BrokerConfig,

    #[serde(default)]
    pub display: DisplayConfig,

    #[serde(default)]
    pub startup: StartupConfig,

    #[serde(default)]
    pub shutdown: ShutdownConfig,

    #[serde(default)]
    pub switch: SwitchConfig,
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct BrokerConfig {
    #[serde(default = "default_host")]
    pub host: String,

    #[serde(default = "default_port")]
    pub port: u16,

    #[serde(default = "default_true")]
    pub tls: bool,

    /// Extra CA certificate (PEM) for private brokers.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub ca_cert: Option<PathBuf>,

    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub username: Option<String>,

    /// Plaintext password. Prefer `password_file` or the environment.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password: Option<String>,

    /// File holding the password; trailing whitespace is ignored.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub password_file: Option<PathBuf>,

    #[serde(default = "default_keep_alive")]
    pub keep_alive_secs: u64,

    /// The MQTT client id is `{prefix}-{device_id}`.
    #[serde(default = "default_client_id_prefix")]
    pub client_id_prefix: String,
}

impl Default for BrokerConfig {
    fn default() -> Self {
        Self {
            host: default_host(),
            port: default_port(),
            tls: true,
            ca_cert: None,
            username: None,
            password: None,
            password_file: None,
            keep_alive_secs: default_keep_alive(),
            client_id_prefix: default_client_id_prefix(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct DisplayConfig {
    /// Renderer program. Without one the daemon runs in degraded mode.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub command: Option<PathBuf>,

    #[serde(default)]
    pub args: Vec<String>,

    #[serde(default = "default_brightness")]
    pub default_brightness: f64,

    #[serde(default = "default_init_attempts")]
    pub init_attempts: u32,

    #[serde(default = "default_init_delay_ms")]
    pub init_delay_ms: u64,

    #[serde(default = "default_render_timeout")]
    pub render_timeout_secs: u64,

    /// Blank the panel when the daemon stops.
    #[serde(default)]
    pub clear_on_close: bool,
}

impl Default for DisplayConfig {
    fn default() -> Self {
        Self {
            command: None,
            args: Vec::new(),
            default_brightness: default_brightness(),
            init_attempts: default_init_attempts(),
            init_delay_ms: default_init_delay_ms(),
            render_timeout_secs: default_render_timeout(),
            clear_on_close: false,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct StartupConfig {
    #[serde(default = "default_startup_timeout")]
    pub startup_timeout_secs: u64,

    #[serde(default = "default_connect_timeout")]
    pub connect_timeout_secs: u64,

    #[serde(default = "default_aux_delay_ms")]
    pub aux_delay_ms: u64,
}

impl Default for StartupConfig {
    fn default() -> Self {
        Self {
            startup_timeout_secs: default_startup_timeout(),
            connect_timeout_secs: default_connect_timeout(),
            aux_delay_ms: default_aux_delay_ms(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct ShutdownConfig {
    #[serde(default = "default_grace_ms")]
    pub grace_ms: u64,

    #[serde(default = "default_disconnect_grace_ms")]
    pub disconnect_grace_ms: u64,

    /// Program and arguments that power the platform off.
    #[serde(default = "default_power_off_command")]
    pub power_off_command: Vec<String>,
}

impl Default for ShutdownConfig {
    fn default() -> Self {
        Self {
            grace_ms: default_grace_ms(),
            disconnect_grace_ms: default_disconnect_grace_ms(),
            power_off_command: default_power_off_command(),
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
pub struct SwitchConfig {
    #[serde(default)]
    pub enabled: bool,

    /// sysfs-style GPIO value file, e.g. `/sys/class/gpio/gpio17/value`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub gpio_value_path: Option<PathBuf>,

    /// A closed switch reads `0` (pull-up wiring).
    #[serde(default = "default_true")]
    pub active_low: bool,

    #[serde(default = "default_poll_interval_ms")]
    pub poll_interval_ms: u64,
}

impl Default for SwitchConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            gpio_value_path: None,
            active_low: true,
            poll_interval_ms: default_poll_interval_ms(),
        }
    }
}

fn default_host() -> String {
    "localhost".into()
}
fn default_port() -> u16 {
    8883
}
fn default_true() -> bool {
    true
}
fn default_keep_alive() -> u64 {
    30
}
fn default_client_id_prefix() -> String {
    "framecast".into()
}
fn default_brightness() -> f64 {
    framecast_core::store::BRIGHTNESS_DEFAULT
}
fn default_init_attempts() -> u32 {
    3
}
fn default_init_delay_ms() -> u64 {
    500
}
fn default_render_timeout() -> u64 {
    30
}
fn default_startup_timeout() -> u64 {
    15
}
fn default_connect_timeout() -> u64 {
    3
}
fn default_aux_delay_ms() -> u64 {
    2_000
}
fn default_grace_ms() -> u64 {
    3_000
}
fn default_disconnect_grace_ms() -> u64 {
    2_000
}
fn default_power_off_command() -> Vec<String> {
    vec!["systemctl".into(), "poweroff".into()]
}
fn default_poll_interval_ms() -> u64 {
    250
}

// ── Validation & translation ────────────────────────────────────────

impl AppConfig {
    /// Reject values the runtime cannot work with.
    pub fn validate(&self) -> Result<(), ConfigError> {
        let broker = &self.broker;
        if broker.host.trim().is_empty() {
            return Err(invalid("broker.host", "must not be empty"));
        }
        if broker.port == 0 {
            return Err(invalid("broker.port", "must be greater than 0"));
        }
        self.broker_url()?;
        if broker.keep_alive_secs < 5 {
            return Err(invalid("broker.keep_alive_secs", "must be at least 5"));
        }
        if broker.username.is_none() && (broker.password.is_some() || broker.password_file.is_some())
        {
            return Err(invalid("broker.username", "required when a password is set"));
        }

        let display = &self.display;
        let range = framecast_core::store::BRIGHTNESS_MIN..=framecast_core::store::BRIGHTNESS_MAX;
        if !range.contains(&display.default_brightness) {
            return Err(invalid(
                "display.default_brightness",
                format!(
                    "{} is outside {}..={}",
                    display.default_brightness,
                    range.start(),
                    range.end()
                ),
            ));
        }
        if display.init_attempts == 0 {
            return Err(invalid("display.init_attempts", "must be at least 1"));
        }
        if display.render_timeout_secs == 0 {
            return Err(invalid("display.render_timeout_secs", "must be greater than 0"));
        }

        if self.startup.startup_timeout_secs == 0 {
            return Err(invalid("startup.startup_timeout_secs", "must be greater than 0"));
        }
        if self.startup.connect_timeout_secs == 0 {
            return Err(invalid("startup.connect_timeout_secs", "must be greater than 0"));
        }

        if self.shutdown.disconnect_grace_ms == 0 {
            return Err(invalid("shutdown.disconnect_grace_ms", "must be greater than 0"));
        }
        if self
            .shutdown
            .power_off_command
            .first()
            .is_none_or(|program| program.trim().is_empty())
        {
            return Err(invalid("shutdown.power_off_command", "must name a program"));
        }

        if self.switch.enabled && self.switch.gpio_value_path.is_none() {
            return Err(invalid("switch.gpio_value_path", "required when the switch is enabled"));
        }
        if self.switch.poll_interval_ms == 0 {
            return Err(invalid("switch.poll_interval_ms", "must be greater than 0"));
        }

        Ok(())
    }

    /// `mqtts://host:port` (or `mqtt://` without TLS).
    pub fn broker_url(&self) -> Result<Url, ConfigError> {
        let scheme = if self.broker.tls { "mqtts" } else { "mqtt" };
        let raw = format!("{scheme}://{}:{}", self.broker.host.trim(), self.broker.port);
        let url = Url::parse(&raw).map_err(|e| invalid("broker.host", format!("{raw}: {e}")))?;
        if url.host_str().is_none() {
            return Err(invalid("broker.host", format!("{raw}: missing host")));
        }
        Ok(url)
    }

    /// Timeouts and budgets for the orchestration core.
    pub fn core_config(&self) -> CoreConfig {
        CoreConfig {
            connect_timeout: Duration::from_secs(self.startup.connect_timeout_secs),
            startup_timeout: Duration::from_secs(self.startup.startup_timeout_secs),
            aux_delay: Duration::from_millis(self.startup.aux_delay_ms),
            device_init: RetryPolicy::fixed(
                self.display.init_attempts,
                Duration::from_millis(self.display.init_delay_ms),
            ),
            render_timeout: Duration::from_secs(self.display.render_timeout_secs),
            clear_on_close: self.display.clear_on_close,
            shutdown_grace: Duration::from_millis(self.shutdown.grace_ms),
            disconnect_grace: Duration::from_millis(self.shutdown.disconnect_grace_ms),
            switch_poll_interval: Duration::from_millis(self.switch.poll_interval_ms),
        }
    }

    /// Settings in effect before the first config message. Auto-shutdown
    /// starts disarmed; only a config message can arm it.
    pub fn initial_settings(&self) -> Settings {
        Settings {
            brightness: self.display.default_brightness,
            auto_shutdown_enabled: false,
        }
    }

    /// Broker client settings for `identity`. Reads `password_file` if set.
    pub fn mqtt_settings(&self, identity: &DeviceIdentity) -> Result<MqttSettings, ConfigError> {
        let broker = &self.broker;
        let credentials = match &broker.username {
            Some(username) => Some(Credentials {
                username: username.clone(),
                password: self
                    .resolve_password()?
                    .unwrap_or_else(|| SecretString::from(String::new())),
            }),
            None => None,
        };

        let mut settings = MqttSettings::new(
            self.broker_url()?,
            format!("{}-{identity}", broker.client_id_prefix),
        );
        settings.keep_alive = Duration::from_secs(broker.keep_alive_secs);
        settings.credentials = credentials;
        settings.ca_cert.clone_from(&broker.ca_cert);
        Ok(settings)
    }

    fn resolve_password(&self) -> Result<Option<SecretString>, ConfigError> {
        // 1. Plaintext (config file or FRAMECAST_BROKER__PASSWORD)
        if let Some(ref pw) = self.broker.password {
            return Ok(Some(SecretString::from(pw.clone())));
        }

        // 2. Password file
        if let Some(ref path) = self.broker.password_file {
            let raw = std::fs::read_to_string(path)?;
            return Ok(Some(SecretString::from(raw.trim_end().to_owned())));
        }

        Ok(None)
    }

    /// The effective configuration as TOML, with secrets redacted.
    pub fn to_redacted_toml(&self) -> Result<String, ConfigError> {
        let mut redacted = self.clone();
        if redacted.broker.password.is_some() {
            redacted.broker.password = Some("********".into());
        }
        Ok(toml::to_string_pretty(&redacted)?)
    }
}

// ── Config file path ────────────────────────────────────────────────

/// System-wide fallback used when no per-user config directory exists.
pub const SYSTEM_CONFIG_PATH: &str = "/etc/framecast/config.toml";

/// Resolve the config file path via XDG / platform conventions.
pub fn config_path() -> PathBuf {
    ProjectDirs::from("io", "framecast", "framecast").map_or_else(
        || PathBuf::from(SYSTEM_CONFIG_PATH),
        |dirs| dirs.config_dir().join("config.toml"),
    )
}

// ── Identity sources ────────────────────────────────────────────────

/// Where the hardware-derived identity is read from.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct IdentitySources {
    pub cpuinfo: PathBuf,
    pub machine_id: PathBuf,
}

impl Default for IdentitySources {
    fn default() -> Self {
        Self {
            cpuinfo: PathBuf::from("/proc/cpuinfo"),
            machine_id: PathBuf::from("/etc/machine-id"),
        }
    }
}

/// Extract the `Serial` line from a `/proc/cpuinfo` dump. All-zero
/// serials (emulators, some boards) count as absent.
pub fn parse_cpuinfo_serial(cpuinfo: &str) -> Option<String> {
    cpuinfo
        .lines()
        .filter_map(|line| line.split_once(':'))
        .find(|(key, _)| key.trim().eq_ignore_ascii_case("serial"))
        .map(|(_, value)| value.trim().to_ascii_lowercase())
        .filter(|serial| !serial.is_empty() && serial.chars().any(|c| c != '0'))
}

fn read_optional(path: &Path) -> Option<String> {
    match std::fs::read_to_string(path) {
        Ok(text) => Some(text),
        Err(e) => {
            debug!(path = %path.display(), error = %e, "identity source unavailable");
            None
        }
    }
}

// ── ConfigLoader ────────────────────────────────────────────────────

/// Two-phase loader over one config file plus the environment.
#[derive(Debug, Clone)]
pub struct ConfigLoader {
    path: PathBuf,
    sources: IdentitySources,
}

impl ConfigLoader {
    /// Load from `path`, or the platform default when `None`.
    pub fn new(path: Option<PathBuf>) -> Self {
        Self {
            path: path.unwrap_or_else(config_path),
            sources: IdentitySources::default(),
        }
    }

    pub fn with_identity_sources(mut self, sources: IdentitySources) -> Self {
        self.sources = sources;
        self
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    fn figment(&self) -> Figment {
        Figment::new()
            .merge(Serialized::defaults(AppConfig::default()))
            .merge(Toml::file(&self.path))
            .merge(Env::prefixed(ENV_PREFIX).split("__"))
    }

    /// Phase one: resolve the device identity.
    ///
    /// Order: configured `device_id` → `Serial` from cpuinfo →
    /// machine-id. Touches nothing else in the config.
    pub fn identity(&self) -> Result<DeviceIdentity, ConfigError> {
        if let Some(id) = self.configured_device_id() {
            debug!(source = "config", "device identity resolved");
            return to_identity(&id);
        }

        if let Some(serial) = read_optional(&self.sources.cpuinfo)
            .as_deref()
            .and_then(parse_cpuinfo_serial)
        {
            debug!(source = "cpuinfo", "device identity resolved");
            return to_identity(&serial);
        }

        if let Some(machine_id) = read_optional(&self.sources.machine_id)
            .map(|text| text.trim().to_owned())
            .filter(|text| !text.is_empty())
        {
            debug!(source = "machine-id", "device identity resolved");
            return to_identity(&machine_id);
        }

        Err(ConfigError::NoIdentity {
            tried: format!(
                "{} or {}",
                self.sources.cpuinfo.display(),
                self.sources.machine_id.display()
            ),
        })
    }

    fn configured_device_id(&self) -> Option<String> {
        match self.figment().find_value("device_id").ok()? {
            Value::String(_, id) => Some(id),
            // Env values that look numeric arrive as numbers.
            Value::Num(_, n) => n.to_u128().map(|n| n.to_string()),
            _ => None,
        }
    }

    /// Phase two: load and validate the whole configuration.
    pub fn load_full(&self) -> Result<AppConfig, ConfigError> {
        debug!(path = %self.path.display(), "loading configuration");
        let config: AppConfig = self.figment().extract()?;
        config.validate()?;
        Ok(config)
    }
}

fn to_identity(raw: &str) -> Result<DeviceIdentity, ConfigError> {
    DeviceIdentity::new(raw).map_err(|e| invalid("device_id", e.to_string()))
}
