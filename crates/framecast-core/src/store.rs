// ── Identity & config store ──
//
// Holds the immutable device identity next to the live, mutable
// runtime settings. Settings are published through a `watch` channel
// so the display controller always reads the newest brightness.

use serde_json::Value;
use tokio::sync::watch;

use crate::error::CoreError;
use crate::identity::DeviceIdentity;

pub const BRIGHTNESS_MIN: f64 = 0.0;
pub const BRIGHTNESS_MAX: f64 = 2.0;
pub const BRIGHTNESS_DEFAULT: f64 = 1.0;

/// Config payload field carrying the display brightness.
pub const FIELD_BRIGHTNESS: &str = "displayBrightness";
/// Config payload field arming auto-shutdown.
pub const FIELD_AUTO_SHUTDOWN: &str = "enableAutoShutdown";

/// Live runtime settings.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Settings {
    pub brightness: f64,
    pub auto_shutdown_enabled: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            brightness: BRIGHTNESS_DEFAULT,
            auto_shutdown_enabled: false,
        }
    }
}

/// Clamp a brightness into the supported range.
pub fn clamp_brightness(value: f64) -> f64 {
    value.clamp(BRIGHTNESS_MIN, BRIGHTNESS_MAX)
}

// ── ConfigUpdate ─────────────────────────────────────────────────

/// An incremental settings update parsed from a config message.
///
/// `None` means "absent or unusable" for both fields. The store treats
/// them differently: an absent brightness keeps the stored value, an
/// absent auto-shutdown flag disarms auto-shutdown.
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct ConfigUpdate {
    pub brightness: Option<f64>,
    pub auto_shutdown_enabled: Option<bool>,
}

impl ConfigUpdate {
    /// Parse a JSON config payload.
    ///
    /// The payload must be a JSON object. Unknown fields are ignored and
    /// a recognized field with the wrong type is treated as absent.
    pub fn from_json(payload: &[u8]) -> Result<Self, CoreError> {
        let value: Value =
            serde_json::from_slice(payload).map_err(|e| CoreError::MalformedConfig {
                reason: e.to_string(),
            })?;
        let Some(fields) = value.as_object() else {
            return Err(CoreError::MalformedConfig {
                reason: format!("expected a JSON object, got {}", json_kind(&value)),
            });
        };

        let brightness = fields
            .get(FIELD_BRIGHTNESS)
            .and_then(Value::as_f64)
            .filter(|v| v.is_finite());
        let auto_shutdown_enabled = fields.get(FIELD_AUTO_SHUTDOWN).and_then(Value::as_bool);

        if fields.contains_key(FIELD_BRIGHTNESS) && brightness.is_none() {
            tracing::debug!(field = FIELD_BRIGHTNESS, "ignoring non-numeric brightness");
        }

        Ok(Self {
            brightness,
            auto_shutdown_enabled,
        })
    }
}

fn json_kind(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}

// ── ConfigStore ──────────────────────────────────────────────────

/// Device identity plus live settings.
pub struct ConfigStore {
    identity: DeviceIdentity,
    settings: watch::Sender<Settings>,
}

impl ConfigStore {
    pub fn new(identity: DeviceIdentity, initial: Settings) -> Self {
        let initial = Settings {
            brightness: clamp_brightness(initial.brightness),
            ..initial
        };
        let (settings, _) = watch::channel(initial);
        Self { identity, settings }
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.identity
    }

    /// Current settings snapshot.
    pub fn settings(&self) -> Settings {
        *self.settings.borrow()
    }

    /// Subscribe to settings changes.
    pub fn subscribe(&self) -> watch::Receiver<Settings> {
        self.settings.subscribe()
    }

    /// Merge an update and return the resulting settings.
    ///
    /// The auto-shutdown flag is always overwritten: silence in an
    /// update means "disarmed", never "keep what was there".
    pub fn apply(&self, update: &ConfigUpdate) -> Settings {
        self.settings.send_modify(|s| {
            if let Some(brightness) = update.brightness {
                s.brightness = clamp_brightness(brightness);
            }
            s.auto_shutdown_enabled = update.auto_shutdown_enabled.unwrap_or(false);
        });
        self.settings()
    }
}
