// ── Device identity & topic routing ──
//
// The identity is resolved once at process start and never changes.
// Every inbound topic is matched against it before anything else
// looks at the message.

use std::fmt;
use std::sync::Arc;

use crate::error::CoreError;

/// First path segment of every device-scoped topic.
pub const TOPIC_ROOT: &str = "device";
/// Topic suffix carrying rendering assets.
pub const ASSET_SUFFIX: &str = "image/display";
/// Topic suffix carrying runtime configuration.
pub const CONFIG_SUFFIX: &str = "config";

/// Immutable device identity. Cheap to clone.
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct DeviceIdentity(Arc<str>);

impl DeviceIdentity {
    /// Validate and wrap a device id. Surrounding whitespace is trimmed;
    /// MQTT separators and wildcards are rejected so the id always forms
    /// exactly one topic segment.
    pub fn new(raw: impl AsRef<str>) -> Result<Self, CoreError> {
        let value = raw.as_ref().trim();
        let invalid = |reason: &str| CoreError::InvalidIdentity {
            value: raw.as_ref().to_owned(),
            reason: reason.to_owned(),
        };

        if value.is_empty() {
            return Err(invalid("must not be empty"));
        }
        if value.contains(['/', '+', '#']) {
            return Err(invalid("must not contain '/', '+' or '#'"));
        }
        if value.chars().any(char::is_control) {
            return Err(invalid("must not contain control characters"));
        }

        Ok(Self(Arc::from(value)))
    }

    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// `device/{id}/image/display`
    pub fn asset_topic(&self) -> String {
        format!("{TOPIC_ROOT}/{}/{ASSET_SUFFIX}", self.0)
    }

    /// `device/{id}/config`
    pub fn config_topic(&self) -> String {
        format!("{TOPIC_ROOT}/{}/{CONFIG_SUFFIX}", self.0)
    }

    /// Decide what to do with an inbound topic.
    pub fn route(&self, topic: &str) -> Route {
        let Some((segment, suffix)) = split_device_topic(topic) else {
            return Route::Unrecognized;
        };
        if segment != self.as_str() {
            return Route::Foreign;
        }
        match suffix {
            CONFIG_SUFFIX => Route::Accept(MessageClass::Config),
            ASSET_SUFFIX => Route::Accept(MessageClass::Asset),
            _ => Route::Unrecognized,
        }
    }
}

impl fmt::Display for DeviceIdentity {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Class of an accepted inbound message.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum MessageClass {
    Asset,
    Config,
}

/// Routing decision for an inbound topic.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Route {
    /// Addressed to this device with a known suffix.
    Accept(MessageClass),
    /// Addressed to a different device.
    Foreign,
    /// Not a device topic, or an unknown suffix for this device.
    Unrecognized,
}

/// Extract the device segment from `device/{id}/...`.
pub fn device_segment(topic: &str) -> Option<&str> {
    split_device_topic(topic).map(|(segment, _)| segment)
}

fn split_device_topic(topic: &str) -> Option<(&str, &str)> {
    let rest = topic.strip_prefix(TOPIC_ROOT)?.strip_prefix('/')?;
    let (segment, suffix) = rest.split_once('/')?;
    if segment.is_empty() || suffix.is_empty() {
        return None;
    }
    Some((segment, suffix))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn abc() -> DeviceIdentity {
        DeviceIdentity::new("abc").expect("valid id")
    }

    #[test]
    fn builds_device_topics() {
        let id = abc();
        assert_eq!(id.asset_topic(), "device/abc/image/display");
        assert_eq!(id.config_topic(), "device/abc/config");
    }

    #[test]
    fn trims_and_rejects_bad_ids() {
        assert_eq!(DeviceIdentity::new("  abc \n").expect("trimmed").as_str(), "abc");
        assert!(DeviceIdentity::new("").is_err());
        assert!(DeviceIdentity::new("   ").is_err());
        assert!(DeviceIdentity::new("a/b").is_err());
        assert!(DeviceIdentity::new("a+").is_err());
        assert!(DeviceIdentity::new("#").is_err());
    }

    #[test]
    fn routes_own_topics_by_suffix() {
        let id = abc();
        assert_eq!(
            id.route("device/abc/image/display"),
            Route::Accept(MessageClass::Asset)
        );
        assert_eq!(id.route("device/abc/config"), Route::Accept(MessageClass::Config));
        assert_eq!(id.route("device/abc/status"), Route::Unrecognized);
    }

    #[test]
    fn only_the_display_image_topic_is_an_asset() {
        let id = abc();
        assert_eq!(id.route("device/abc/image/thumbnail"), Route::Unrecognized);
        assert_eq!(id.route("device/abc/image/display/extra"), Route::Unrecognized);
        assert_eq!(id.route("device/abc/image/"), Route::Unrecognized);
    }

    #[test]
    fn foreign_devices_are_rejected() {
        let id = abc();
        assert_eq!(id.route("device/xyz/image/display"), Route::Foreign);
        assert_eq!(id.route("device/abcd/config"), Route::Foreign);
    }

    #[test]
    fn non_device_topics_are_unrecognized() {
        let id = abc();
        assert_eq!(id.route("devices/abc/config"), Route::Unrecognized);
        assert_eq!(id.route("device/abc"), Route::Unrecognized);
        assert_eq!(id.route("device//config"), Route::Unrecognized);
        assert_eq!(id.route(""), Route::Unrecognized);
    }

    #[test]
    fn extracts_device_segment() {
        assert_eq!(device_segment("device/abc/config"), Some("abc"));
        assert_eq!(device_segment("other/abc/config"), None);
    }
}
