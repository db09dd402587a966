//! Daemon error types with miette diagnostics.
//!
//! Only startup can fail; once the appliance runs, every failure is
//! absorbed by the core.

use miette::Diagnostic;
use thiserror::Error;

use framecast_config::ConfigError;
use framecast_mqtt::MqttError;

/// Exit codes, following sysexits(3) where one fits.
pub mod exit_code {
    pub const GENERAL: i32 = 1;
    pub const CONFIG: i32 = 78;
}

#[derive(Debug, Error, Diagnostic)]
pub enum DaemonError {
    #[error("No device identity available")]
    #[diagnostic(
        code(framecast::no_identity),
        help(
            "Set device_id in the config file or FRAMECAST_DEVICE_ID.\n\
             Looked for a hardware serial in: {tried}"
        )
    )]
    NoIdentity { tried: String },

    #[error("Invalid configuration in {path}")]
    #[diagnostic(
        code(framecast::config),
        help("Check the config file and any FRAMECAST_* environment overrides.")
    )]
    Config {
        path: String,
        #[source]
        source: ConfigError,
    },

    #[error("Invalid broker settings")]
    #[diagnostic(
        code(framecast::broker),
        help("broker.host must be reachable as mqtt:// or mqtts://, and ca_cert must be a readable PEM file.")
    )]
    Broker(#[from] MqttError),

    #[error("IO error: {0}")]
    #[diagnostic(code(framecast::io))]
    Io(#[from] std::io::Error),
}

impl DaemonError {
    pub fn config(source: ConfigError, path: &std::path::Path) -> Self {
        match source {
            ConfigError::NoIdentity { tried } => Self::NoIdentity { tried },
            source => Self::Config {
                path: path.display().to_string(),
                source,
            },
        }
    }

    pub fn exit_code(&self) -> i32 {
        match self {
            Self::NoIdentity { .. } | Self::Config { .. } | Self::Broker(_) => exit_code::CONFIG,
            Self::Io(_) => exit_code::GENERAL,
        }
    }
}
