// ── Transport collaborator interface ──
//
// The pub/sub client is consumed as a black box. Each operation is a
// future; connection changes and inbound publishes arrive as
// `TransportEvent`s on a bounded channel handed to the connection
// manager at construction.

use std::future::Future;

use bytes::Bytes;
use thiserror::Error;

/// Per-topic delivery guarantee.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum DeliveryGuarantee {
    /// Best effort; only the newest state matters.
    AtMostOnce,
    /// Redelivered until acknowledged.
    AtLeastOnce,
}

/// Coarse classification of a transport failure, used for logging and
/// for deciding whether an operator needs to act (credentials) or just
/// wait (network).
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum TransportErrorKind {
    /// Broker rejected the credentials or the client is not authorized.
    Auth,
    /// Broker refused the connection for a non-auth reason.
    Refused,
    /// TLS handshake or certificate failure.
    Tls,
    /// No response in time.
    Timeout,
    /// Socket-level failure (DNS, reset, unreachable).
    Network,
    /// The client was shut down.
    Closed,
    /// Unexpected packet or client state.
    Protocol,
}

/// A classified transport failure.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} error: {message}")]
pub struct TransportError {
    pub kind: TransportErrorKind,
    pub message: String,
}

impl TransportError {
    pub fn new(kind: TransportErrorKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn is_auth(&self) -> bool {
        self.kind == TransportErrorKind::Auth
    }
}

/// A raw inbound publish.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InboundMessage {
    pub topic: String,
    pub payload: Bytes,
}

impl InboundMessage {
    pub fn new(topic: impl Into<String>, payload: impl Into<Bytes>) -> Self {
        Self {
            topic: topic.into(),
            payload: payload.into(),
        }
    }
}

/// Notifications pushed by the transport.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TransportEvent {
    /// The broker acknowledged a (re)connection.
    Connected,
    /// The session dropped. The transport keeps retrying on its own.
    Disconnected { error: Option<TransportError> },
    /// A reconnection attempt is about to start.
    Reconnecting { attempt: u32 },
    /// An inbound publish.
    Message(InboundMessage),
}

/// Connect / subscribe / disconnect primitives of the pub/sub client.
///
/// Implementations own their reconnection loop; callers never retry a
/// failed connect themselves.
pub trait Transport: Send + Sync + 'static {
    /// Resolve once the broker confirms the first connection, or with the
    /// first classified failure. The transport keeps trying after a failure.
    fn connect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// Subscribe to a single topic.
    fn subscribe(
        &self,
        topic: &str,
        guarantee: DeliveryGuarantee,
    ) -> impl Future<Output = Result<(), TransportError>> + Send;

    /// End the session.
    fn disconnect(&self) -> impl Future<Output = Result<(), TransportError>> + Send;
}
