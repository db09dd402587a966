// ── Broker connection settings ──
//
// Everything needed to build a rumqttc client. Constructed by the
// config crate; never touches disk except for the optional CA file.

use std::path::PathBuf;
use std::time::Duration;

use rumqttc::{MqttOptions, TlsConfiguration, Transport};
use secrecy::{ExposeSecret, SecretString};
use url::Url;

use framecast_core::RetryPolicy;

use crate::error::MqttError;

pub const DEFAULT_PORT: u16 = 1883;
pub const DEFAULT_TLS_PORT: u16 = 8883;

/// Minimum keep-alive the client accepts.
pub const MIN_KEEP_ALIVE: Duration = Duration::from_secs(5);

/// Broker username and password.
#[derive(Debug, Clone)]
pub struct Credentials {
    pub username: String,
    pub password: SecretString,
}

/// MQTT client configuration.
#[derive(Debug, Clone)]
pub struct MqttSettings {
    /// `mqtt://host[:port]` or `mqtts://host[:port]`.
    pub broker: Url,
    pub client_id: String,
    pub keep_alive: Duration,
    pub credentials: Option<Credentials>,
    /// PEM bundle trusted instead of the platform roots.
    pub ca_cert: Option<PathBuf>,
    /// Capacity of the client's outgoing request queue.
    pub request_capacity: usize,
    /// Capacity of the `TransportEvent` channel.
    pub event_capacity: usize,
    /// How long `subscribe()` waits for the SUBACK.
    pub subscribe_timeout: Duration,
    /// Delay schedule between reconnection attempts.
    pub reconnect: RetryPolicy,
}

impl MqttSettings {
    pub fn new(broker: Url, client_id: impl Into<String>) -> Self {
        Self {
            broker,
            client_id: client_id.into(),
            keep_alive: Duration::from_secs(30),
            credentials: None,
            ca_cert: None,
            request_capacity: 16,
            event_capacity: 64,
            subscribe_timeout: Duration::from_secs(10),
            reconnect: RetryPolicy::exponential(Duration::from_secs(1), Duration::from_secs(30)),
        }
    }

    /// Whether the broker URL asks for TLS.
    pub fn uses_tls(&self) -> Result<bool, MqttError> {
        match self.broker.scheme() {
            "mqtt" | "tcp" => Ok(false),
            "mqtts" | "ssl" => Ok(true),
            other => Err(MqttError::UnsupportedScheme {
                scheme: other.to_owned(),
            }),
        }
    }

    /// Translate into client options with a persistent session, so
    /// broker-side subscriptions survive reconnects.
    pub fn to_options(&self) -> Result<MqttOptions, MqttError> {
        let tls = self.uses_tls()?;
        let host = self
            .broker
            .host_str()
            .filter(|h| !h.is_empty())
            .ok_or_else(|| MqttError::MissingHost {
                url: self.broker.to_string(),
            })?;
        let port = self
            .broker
            .port()
            .unwrap_or(if tls { DEFAULT_TLS_PORT } else { DEFAULT_PORT });

        if self.client_id.trim().is_empty() {
            return Err(MqttError::Invalid {
                field: "client_id",
                reason: "must not be empty".into(),
            });
        }
        if self.keep_alive < MIN_KEEP_ALIVE {
            return Err(MqttError::Invalid {
                field: "keep_alive",
                reason: format!("must be at least {}s", MIN_KEEP_ALIVE.as_secs()),
            });
        }

        let mut options = MqttOptions::new(self.client_id.clone(), host, port);
        options.set_keep_alive(self.keep_alive);
        options.set_clean_session(false);

        if let Some(credentials) = &self.credentials {
            options.set_credentials(
                credentials.username.clone(),
                credentials.password.expose_secret(),
            );
        }

        if tls {
            options.set_transport(self.tls_transport()?);
        }

        Ok(options)
    }

    fn tls_transport(&self) -> Result<Transport, MqttError> {
        let Some(path) = &self.ca_cert else {
            return Ok(Transport::tls_with_default_config());
        };
        let ca = std::fs::read(path).map_err(|source| MqttError::CaCert {
            path: path.clone(),
            source,
        })?;
        Ok(Transport::tls_with_config(TlsConfiguration::Simple {
            ca,
            alpn: None,
            client_auth: None,
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn settings(url: &str) -> MqttSettings {
        MqttSettings::new(Url::parse(url).unwrap(), "framecast-abc")
    }

    #[test]
    fn plain_broker_uses_default_port() {
        let options = settings("mqtt://broker.local").to_options().unwrap();
        assert_eq!(options.broker_address(), ("broker.local".to_string(), DEFAULT_PORT));
        assert!(!options.clean_session());
        assert_eq!(options.keep_alive(), Duration::from_secs(30));
    }

    #[test]
    fn explicit_port_wins() {
        let options = settings("mqtts://broker.local:9000").to_options().unwrap();
        assert_eq!(options.broker_address().1, 9000);
    }

    #[test]
    fn unknown_scheme_is_rejected() {
        assert!(matches!(
            settings("https://broker.local").to_options(),
            Err(MqttError::UnsupportedScheme { .. })
        ));
    }

    #[test]
    fn short_keep_alive_is_rejected() {
        let mut s = settings("mqtt://broker.local");
        s.keep_alive = Duration::from_secs(1);
        assert!(matches!(
            s.to_options(),
            Err(MqttError::Invalid { field: "keep_alive", .. })
        ));
    }

    #[test]
    fn missing_ca_file_is_reported() {
        let mut s = settings("mqtts://broker.local");
        s.ca_cert = Some(PathBuf::from("/nonexistent/ca.pem"));
        assert!(matches!(s.to_options(), Err(MqttError::CaCert { .. })));
    }

    #[test]
    fn credentials_are_forwarded() {
        let mut s = settings("mqtt://broker.local");
        s.credentials = Some(Credentials {
            username: "frame".into(),
            password: SecretString::from("hunter2".to_string()),
        });
        let options = s.to_options().unwrap();
        assert_eq!(
            options.credentials(),
            Some(("frame".to_string(), "hunter2".to_string()))
        );
    }
}
