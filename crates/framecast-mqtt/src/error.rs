use std::path::PathBuf;

use thiserror::Error;

/// Failures building the MQTT client. Runtime failures are reported as
/// `framecast_core::TransportError` instead.
#[derive(Debug, Error)]
pub enum MqttError {
    #[error("unsupported broker scheme '{scheme}' (expected mqtt or mqtts)")]
    UnsupportedScheme { scheme: String },

    #[error("broker URL has no host: {url}")]
    MissingHost { url: String },

    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    #[error("failed to read CA certificate {}: {source}", path.display())]
    CaCert {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}
