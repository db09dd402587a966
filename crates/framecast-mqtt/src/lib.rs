//! MQTT transport for the framecast device runtime.
//!
//! [`MqttTransport`] implements [`framecast_core::Transport`] over
//! `rumqttc`: a persistent session (`clean_session = false`), optional
//! TLS with a custom CA, and a background event loop that reconnects
//! forever with exponential backoff, publishing
//! [`TransportEvent`](framecast_core::TransportEvent)s on a bounded
//! channel.

pub mod error;
pub mod settings;
pub mod transport;

pub use error::MqttError;
pub use settings::{Credentials, MqttSettings};
pub use transport::{MqttTransport, classify};
