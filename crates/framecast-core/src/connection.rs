// ── Transport connection manager ──
//
// Owns the single logical broker connection: idempotent connect and
// subscribe, the observable connection state, and the demultiplexing
// of inbound messages by device identity and message class.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use tokio::sync::{Mutex, OnceCell, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};

use crate::asset::AssetMessage;
use crate::config::CoreConfig;
use crate::identity::{DeviceIdentity, MessageClass, Route};
use crate::transport::{
    DeliveryGuarantee, InboundMessage, Transport, TransportError, TransportErrorKind,
    TransportEvent,
};

// ── ConnectionState ──────────────────────────────────────────────

/// Connection state observable by every component.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum ConnectionState {
    Disconnected,
    Connecting,
    Connected,
    Reconnecting,
    Closed,
}

/// What `connect()` reports to its callers. Never an error: a slow or
/// failing broker must not block startup.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ConnectOutcome {
    /// The broker confirmed the connection within the connect timeout.
    Connected,
    /// Timed out waiting; the transport keeps trying in the background.
    Pending,
    /// The first attempt failed; the transport keeps retrying.
    Failed(TransportErrorKind),
}

// ── InboundHandler ───────────────────────────────────────────────

/// Receiver of demultiplexed traffic.
///
/// Called from the dispatch loop, so implementations must not block:
/// assets go straight to the display, config payloads are queued for a
/// later tick.
pub trait InboundHandler: Send + Sync + 'static {
    fn on_asset(&self, asset: AssetMessage);

    fn on_config(&self, payload: Bytes);

    fn on_connection(&self, connected: bool);
}

// ── SubscriptionSet ──────────────────────────────────────────────

/// Topics already subscribed, with their delivery guarantee.
#[derive(Debug, Default, Clone, PartialEq, Eq)]
pub struct SubscriptionSet {
    topics: HashMap<String, DeliveryGuarantee>,
}

impl SubscriptionSet {
    pub fn contains(&self, topic: &str) -> bool {
        self.topics.contains_key(topic)
    }

    pub fn guarantee(&self, topic: &str) -> Option<DeliveryGuarantee> {
        self.topics.get(topic).copied()
    }

    pub fn len(&self) -> usize {
        self.topics.len()
    }

    pub fn is_empty(&self) -> bool {
        self.topics.is_empty()
    }

    fn insert(&mut self, topic: String, guarantee: DeliveryGuarantee) {
        self.topics.insert(topic, guarantee);
    }
}

// ── ConnectionManager ────────────────────────────────────────────

/// Cheaply cloneable handle to the broker connection.
pub struct ConnectionManager<T: Transport> {
    inner: Arc<ConnectionInner<T>>,
}

impl<T: Transport> Clone for ConnectionManager<T> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ConnectionInner<T> {
    transport: Arc<T>,
    identity: DeviceIdentity,
    handler: Arc<dyn InboundHandler>,
    connect_timeout: Duration,
    disconnect_grace: Duration,
    state: watch::Sender<ConnectionState>,
    connect_once: OnceCell<ConnectOutcome>,
    /// Held across the network subscribe so concurrent callers never
    /// issue the same subscribe twice.
    subscriptions: Mutex<SubscriptionSet>,
    events: Mutex<Option<mpsc::Receiver<TransportEvent>>>,
}

impl<T: Transport> ConnectionManager<T> {
    /// Create a manager. Does NOT connect -- call [`connect()`](Self::connect)
    /// and spawn [`run()`](Self::run) to start dispatching.
    pub fn new(
        transport: T,
        events: mpsc::Receiver<TransportEvent>,
        identity: DeviceIdentity,
        config: &CoreConfig,
        handler: Arc<dyn InboundHandler>,
    ) -> Self {
        let (state, _) = watch::channel(ConnectionState::Disconnected);
        Self {
            inner: Arc::new(ConnectionInner {
                transport: Arc::new(transport),
                identity,
                handler,
                connect_timeout: config.connect_timeout,
                disconnect_grace: config.disconnect_grace,
                state,
                connect_once: OnceCell::new(),
                subscriptions: Mutex::new(SubscriptionSet::default()),
                events: Mutex::new(Some(events)),
            }),
        }
    }

    pub fn transport(&self) -> &T {
        &self.inner.transport
    }

    pub fn identity(&self) -> &DeviceIdentity {
        &self.inner.identity
    }

    // ── Connection lifecycle ─────────────────────────────────────

    /// Connect to the broker.
    ///
    /// Every call shares one underlying attempt. Returns once the broker
    /// confirms, the first attempt fails, or the connect timeout elapses;
    /// in the last case the attempt keeps running and updates the state
    /// whenever it finishes.
    pub async fn connect(&self) -> ConnectOutcome {
        *self
            .inner
            .connect_once
            .get_or_init(|| self.start_connect())
            .await
    }

    async fn start_connect(&self) -> ConnectOutcome {
        self.transition(ConnectionState::Connecting);

        let manager = self.clone();
        let mut attempt = tokio::spawn(async move {
            let result = manager.inner.transport.connect().await;
            manager.finish_connect(&result);
            result
        });

        let limit = self.inner.connect_timeout;
        match tokio::time::timeout(limit, &mut attempt).await {
            Ok(Ok(Ok(()))) => ConnectOutcome::Connected,
            Ok(Ok(Err(e))) => ConnectOutcome::Failed(e.kind),
            Ok(Err(e)) => {
                warn!(error = %e, "connect task aborted");
                self.transition(ConnectionState::Disconnected);
                ConnectOutcome::Failed(TransportErrorKind::Protocol)
            }
            Err(_) => {
                info!(
                    timeout_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                    "broker not confirmed yet, continuing in background"
                );
                ConnectOutcome::Pending
            }
        }
    }

    fn finish_connect(&self, result: &Result<(), TransportError>) {
        match result {
            Ok(()) => {
                self.transition(ConnectionState::Connected);
            }
            Err(e) => {
                log_transport_error(e, "broker connection failed");
                self.transition(ConnectionState::Disconnected);
            }
        }
    }

    /// Subscribe to every topic not already in the subscription set.
    /// Returns how many new subscriptions were made.
    pub async fn subscribe(&self, topics: &[(String, DeliveryGuarantee)]) -> usize {
        let mut subscriptions = self.inner.subscriptions.lock().await;
        let mut added = 0;

        for (topic, guarantee) in topics {
            if subscriptions.contains(topic) {
                trace!(topic = %topic, "already subscribed");
                continue;
            }
            match self.inner.transport.subscribe(topic, *guarantee).await {
                Ok(()) => {
                    info!(topic = %topic, %guarantee, "subscribed");
                    subscriptions.insert(topic.clone(), *guarantee);
                    added += 1;
                }
                Err(e) => log_transport_error(&e, "subscribe failed"),
            }
        }

        added
    }

    /// Subscribe to this device's asset and config topics.
    pub async fn subscribe_device_topics(&self) -> usize {
        let topics = self.device_topics();
        self.subscribe(&topics).await
    }

    /// Asset topic at-least-once, config topic at-most-once.
    pub fn device_topics(&self) -> Vec<(String, DeliveryGuarantee)> {
        vec![
            (
                self.inner.identity.asset_topic(),
                DeliveryGuarantee::AtLeastOnce,
            ),
            (
                self.inner.identity.config_topic(),
                DeliveryGuarantee::AtMostOnce,
            ),
        ]
    }

    /// End the session, waiting at most the disconnect grace period.
    pub async fn disconnect(&self) {
        if self.state_now() == ConnectionState::Closed {
            return;
        }

        let limit = self.inner.disconnect_grace;
        match tokio::time::timeout(limit, self.inner.transport.disconnect()).await {
            Ok(Ok(())) => debug!("broker session closed"),
            Ok(Err(e)) => warn!(error = %e, "broker disconnect failed"),
            Err(_) => warn!(
                grace_ms = u64::try_from(limit.as_millis()).unwrap_or(u64::MAX),
                "broker did not confirm disconnect in time"
            ),
        }

        self.transition(ConnectionState::Closed);
    }

    // ── Dispatch loop ────────────────────────────────────────────

    /// Consume transport events until cancelled or the transport hangs up.
    ///
    /// Only the first call does anything; the event receiver is taken.
    pub async fn run(&self, cancel: CancellationToken) {
        let Some(mut events) = self.inner.events.lock().await.take() else {
            warn!("dispatch loop already running");
            return;
        };

        loop {
            tokio::select! {
                biased;
                () = cancel.cancelled() => break,
                event = events.recv() => {
                    let Some(event) = event else {
                        debug!("transport event stream ended");
                        break;
                    };
                    self.handle_event(event);
                }
            }
        }
    }

    fn handle_event(&self, event: TransportEvent) {
        match event {
            TransportEvent::Connected => self.transition(ConnectionState::Connected),
            TransportEvent::Reconnecting { attempt } => {
                debug!(attempt, "transport reconnecting");
                self.transition(ConnectionState::Reconnecting);
            }
            TransportEvent::Disconnected { error } => {
                match error {
                    Some(e) => log_transport_error(&e, "broker connection lost"),
                    None => info!("broker connection closed"),
                }
                self.transition(ConnectionState::Disconnected);
            }
            TransportEvent::Message(message) => self.dispatch(message),
        }
    }

    /// Route one inbound publish. Messages for other devices or with an
    /// unknown suffix have no effect beyond a trace.
    pub fn dispatch(&self, message: InboundMessage) {
        match self.inner.identity.route(&message.topic) {
            Route::Accept(MessageClass::Asset) => {
                trace!(topic = %message.topic, bytes = message.payload.len(), "asset received");
                self.inner
                    .handler
                    .on_asset(AssetMessage::new(message.topic, message.payload));
            }
            Route::Accept(MessageClass::Config) => {
                trace!(topic = %message.topic, "config received");
                self.inner.handler.on_config(message.payload);
            }
            Route::Foreign => {
                debug!(topic = %message.topic, "dropping message for another device");
            }
            Route::Unrecognized => {
                debug!(topic = %message.topic, "dropping message on unrecognized topic");
            }
        }
    }

    // ── State ────────────────────────────────────────────────────

    /// Observe connection state changes.
    pub fn state(&self) -> watch::Receiver<ConnectionState> {
        self.inner.state.subscribe()
    }

    pub fn state_now(&self) -> ConnectionState {
        *self.inner.state.borrow()
    }

    pub fn is_connected(&self) -> bool {
        self.state_now() == ConnectionState::Connected
    }

    /// Snapshot of the subscription set.
    pub async fn subscriptions(&self) -> SubscriptionSet {
        self.inner.subscriptions.lock().await.clone()
    }

    /// Move to `next` unless already there or closed. Crossing into or out
    /// of `Connected` is reported to the handler, and every arrival at
    /// `Connected` re-runs the (idempotent) device subscribe.
    fn transition(&self, next: ConnectionState) {
        let mut previous = next;
        let changed = self.inner.state.send_if_modified(|state| {
            if *state == next || *state == ConnectionState::Closed {
                return false;
            }
            previous = *state;
            *state = next;
            true
        });
        if !changed {
            return;
        }

        debug!(from = %previous, to = %next, "connection state changed");
        if next == ConnectionState::Connected {
            self.inner.handler.on_connection(true);
            let manager = self.clone();
            tokio::spawn(async move {
                manager.subscribe_device_topics().await;
            });
        } else if previous == ConnectionState::Connected {
            self.inner.handler.on_connection(false);
        }
    }
}

fn log_transport_error(error: &TransportError, context: &str) {
    match error.kind {
        TransportErrorKind::Auth => {
            warn!(error = %error, kind = %error.kind, "{context}: check broker credentials");
        }
        TransportErrorKind::Tls => {
            warn!(error = %error, kind = %error.kind, "{context}: check TLS configuration");
        }
        kind => warn!(error = %error, kind = %kind, "{context}"),
    }
}
