// ── MQTT transport ──
//
// `framecast_core::Transport` over a rumqttc client. A background task
// drives the rumqttc event loop, turns packets into `TransportEvent`s,
// and reconnects forever with backoff. The first connection outcome is
// published on a watch channel so `connect()` can resolve on it.

use std::sync::{Mutex, PoisonError};
use std::time::Duration;

use rumqttc::{
    AsyncClient, ClientError, ConnectReturnCode, ConnectionError, Event, EventLoop, Outgoing,
    Packet, QoS, StateError, SubAck, SubscribeReasonCode,
};
use tokio::sync::{mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, trace, warn};
use url::Url;

use framecast_core::{
    DeliveryGuarantee, InboundMessage, RetryPolicy, Transport, TransportError,
    TransportErrorKind, TransportEvent,
};

use crate::error::MqttError;
use crate::settings::MqttSettings;

/// How long `disconnect()` lets the event loop flush the DISCONNECT
/// packet before stopping it.
const DISCONNECT_FLUSH: Duration = Duration::from_secs(1);

type FirstOutcome = Option<Result<(), TransportError>>;

// ── MqttTransport ────────────────────────────────────────────────────

pub struct MqttTransport {
    client: AsyncClient,
    broker: Url,
    /// The event loop until `connect()` starts it.
    pending: Mutex<Option<EventLoopTask>>,
    outcome: watch::Receiver<FirstOutcome>,
    /// SUBACK results, consumed by one subscriber at a time.
    acks: tokio::sync::Mutex<mpsc::UnboundedReceiver<Result<(), TransportError>>>,
    subscribe_timeout: Duration,
    cancel: CancellationToken,
    stopped: CancellationToken,
}

impl MqttTransport {
    /// Build the client. Nothing touches the network until
    /// [`Transport::connect`] is called.
    pub fn new(settings: &MqttSettings) -> Result<(Self, mpsc::Receiver<TransportEvent>), MqttError> {
        let options = settings.to_options()?;
        let (client, eventloop) = AsyncClient::new(options, settings.request_capacity);

        let (events_tx, events_rx) = mpsc::channel(settings.event_capacity);
        let (outcome_tx, outcome_rx) = watch::channel(None);
        let (acks_tx, acks_rx) = mpsc::unbounded_channel();
        let cancel = CancellationToken::new();
        let stopped = CancellationToken::new();

        let task = EventLoopTask {
            eventloop,
            events: events_tx,
            outcome: outcome_tx,
            acks: acks_tx,
            reconnect: settings.reconnect.clone(),
            cancel: cancel.clone(),
            stopped: stopped.clone(),
        };

        let transport = Self {
            client,
            broker: settings.broker.clone(),
            pending: Mutex::new(Some(task)),
            outcome: outcome_rx,
            acks: tokio::sync::Mutex::new(acks_rx),
            subscribe_timeout: settings.subscribe_timeout,
            cancel,
            stopped,
        };
        Ok((transport, events_rx))
    }

    pub fn broker(&self) -> &Url {
        &self.broker
    }

    fn take_pending(&self) -> Option<EventLoopTask> {
        self.pending
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take()
    }
}

impl Transport for MqttTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        if let Some(task) = self.take_pending() {
            info!(broker = %self.broker, "connecting to broker");
            tokio::spawn(task.run());
        }

        let mut outcome = self.outcome.clone();
        match outcome.wait_for(Option::is_some).await {
            Ok(first) => (*first).clone().unwrap_or(Ok(())),
            Err(_) => Err(TransportError::new(
                TransportErrorKind::Closed,
                "event loop stopped before connecting",
            )),
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        guarantee: DeliveryGuarantee,
    ) -> Result<(), TransportError> {
        let mut acks = self.acks.lock().await;
        // Drop acknowledgements left over from timed-out requests.
        while acks.try_recv().is_ok() {}

        self.client
            .subscribe(topic, qos(guarantee))
            .await
            .map_err(|e| client_error(&e))?;

        match tokio::time::timeout(self.subscribe_timeout, acks.recv()).await {
            Ok(Some(result)) => result,
            Ok(None) => Err(TransportError::new(
                TransportErrorKind::Closed,
                "event loop stopped",
            )),
            Err(_) => Err(TransportError::new(
                TransportErrorKind::Timeout,
                format!("no SUBACK for {topic}"),
            )),
        }
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        if self.take_pending().is_some() {
            debug!("disconnect before connect, nothing to close");
            self.cancel.cancel();
            return Ok(());
        }

        let sent = self.client.disconnect().await.map_err(|e| client_error(&e));
        if tokio::time::timeout(DISCONNECT_FLUSH, self.stopped.cancelled())
            .await
            .is_err()
        {
            debug!("event loop did not flush DISCONNECT, stopping it");
        }
        self.cancel.cancel();
        sent
    }
}

// ── Event loop task ──────────────────────────────────────────────────

struct EventLoopTask {
    eventloop: EventLoop,
    events: mpsc::Sender<TransportEvent>,
    outcome: watch::Sender<FirstOutcome>,
    acks: mpsc::UnboundedSender<Result<(), TransportError>>,
    reconnect: RetryPolicy,
    cancel: CancellationToken,
    stopped: CancellationToken,
}

impl EventLoopTask {
    /// Main loop: poll → translate → on error, backoff → poll again
    /// (which reconnects).
    async fn run(mut self) {
        let mut failures: u32 = 0;
        let mut connected = false;

        loop {
            let polled = tokio::select! {
                biased;
                () = self.cancel.cancelled() => break,
                polled = self.eventloop.poll() => polled,
            };

            match polled {
                Ok(Event::Incoming(Packet::ConnAck(ack))) => {
                    failures = 0;
                    connected = true;
                    info!(session_present = ack.session_present, "broker connection established");
                    self.report_first(Ok(()));
                    self.emit(TransportEvent::Connected).await;
                }
                Ok(Event::Incoming(Packet::Publish(publish))) => {
                    trace!(topic = %publish.topic, bytes = publish.payload.len(), "publish received");
                    self.emit(TransportEvent::Message(InboundMessage::new(
                        publish.topic,
                        publish.payload,
                    )))
                    .await;
                }
                Ok(Event::Incoming(Packet::SubAck(ack))) => {
                    let _ = self.acks.send(suback_result(&ack));
                }
                Ok(Event::Outgoing(Outgoing::Disconnect)) => {
                    info!("disconnected from broker");
                    self.emit(TransportEvent::Disconnected { error: None }).await;
                    break;
                }
                Ok(_) => {}
                Err(e) => {
                    let error = classify(&e);
                    self.report_first(Err(error.clone()));
                    if connected {
                        connected = false;
                        self.emit(TransportEvent::Disconnected {
                            error: Some(error.clone()),
                        })
                        .await;
                    } else {
                        warn!(
                            error = %error,
                            kind = %error.kind,
                            attempt = failures.saturating_add(1),
                            "broker connection attempt failed"
                        );
                    }

                    failures = failures.saturating_add(1);
                    let delay = self.reconnect.delay_for(failures - 1);
                    info!(
                        delay_ms = u64::try_from(delay.as_millis()).unwrap_or(u64::MAX),
                        attempt = failures,
                        "waiting before reconnect"
                    );
                    self.emit(TransportEvent::Reconnecting { attempt: failures })
                        .await;

                    tokio::select! {
                        biased;
                        () = self.cancel.cancelled() => break,
                        () = tokio::time::sleep(delay) => {}
                    }
                }
            }
        }

        self.stopped.cancel();
        debug!("MQTT event loop exiting");
    }

    fn report_first(&self, result: Result<(), TransportError>) {
        self.outcome.send_if_modified(|outcome| {
            if outcome.is_some() {
                return false;
            }
            *outcome = Some(result);
            true
        });
    }

    async fn emit(&mut self, event: TransportEvent) {
        // Ignore send errors -- the dispatch loop has stopped.
        let _ = self.events.send(event).await;
    }
}

// ── Translation helpers ──────────────────────────────────────────────

fn qos(guarantee: DeliveryGuarantee) -> QoS {
    match guarantee {
        DeliveryGuarantee::AtMostOnce => QoS::AtMostOnce,
        DeliveryGuarantee::AtLeastOnce => QoS::AtLeastOnce,
    }
}

fn suback_result(ack: &SubAck) -> Result<(), TransportError> {
    if ack
        .return_codes
        .iter()
        .any(|code| matches!(code, SubscribeReasonCode::Failure))
    {
        return Err(TransportError::new(
            TransportErrorKind::Refused,
            format!("broker rejected subscription (pkid {})", ack.pkid),
        ));
    }
    Ok(())
}

fn client_error(error: &ClientError) -> TransportError {
    TransportError::new(TransportErrorKind::Closed, error.to_string())
}

/// Map a rumqttc connection error onto the transport error classes.
pub fn classify(error: &ConnectionError) -> TransportError {
    let kind = match error {
        ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword | ConnectReturnCode::NotAuthorized,
        ) => TransportErrorKind::Auth,
        ConnectionError::ConnectionRefused(_) => TransportErrorKind::Refused,
        ConnectionError::Tls(_) => TransportErrorKind::Tls,
        ConnectionError::NetworkTimeout
        | ConnectionError::FlushTimeout
        | ConnectionError::MqttState(StateError::AwaitPingResp) => TransportErrorKind::Timeout,
        ConnectionError::Io(e) | ConnectionError::MqttState(StateError::Io(e)) => io_kind(e),
        ConnectionError::RequestsDone => TransportErrorKind::Closed,
        _ => TransportErrorKind::Protocol,
    };
    TransportError::new(kind, error.to_string())
}

fn io_kind(error: &std::io::Error) -> TransportErrorKind {
    match error.kind() {
        std::io::ErrorKind::TimedOut => TransportErrorKind::Timeout,
        _ => TransportErrorKind::Network,
    }
}

#[cfg(test)]
mod tests {
    use std::io;

    use pretty_assertions::assert_eq;

    use super::*;

    #[test]
    fn refused_credentials_are_auth_errors() {
        let err = classify(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::BadUserNamePassword,
        ));
        assert_eq!(err.kind, TransportErrorKind::Auth);
        assert!(err.is_auth());

        let err = classify(&ConnectionError::ConnectionRefused(
            ConnectReturnCode::NotAuthorized,
        ));
        assert_eq!(err.kind, TransportErrorKind::Auth);
    }

    #[test]
    fn other_refusals_and_transport_failures() {
        let cases = [
            (
                ConnectionError::ConnectionRefused(ConnectReturnCode::ServiceUnavailable),
                TransportErrorKind::Refused,
            ),
            (ConnectionError::NetworkTimeout, TransportErrorKind::Timeout),
            (
                ConnectionError::Io(io::Error::new(io::ErrorKind::ConnectionRefused, "refused")),
                TransportErrorKind::Network,
            ),
            (
                ConnectionError::Io(io::Error::new(io::ErrorKind::TimedOut, "slow")),
                TransportErrorKind::Timeout,
            ),
            (ConnectionError::RequestsDone, TransportErrorKind::Closed),
        ];
        for (error, kind) in cases {
            assert_eq!(classify(&error).kind, kind, "{error}");
        }
    }

    #[test]
    fn guarantees_map_to_qos() {
        assert_eq!(qos(DeliveryGuarantee::AtMostOnce), QoS::AtMostOnce);
        assert_eq!(qos(DeliveryGuarantee::AtLeastOnce), QoS::AtLeastOnce);
    }

    #[test]
    fn failed_suback_is_refused() {
        let ok = SubAck::new(1, vec![SubscribeReasonCode::Success(QoS::AtLeastOnce)]);
        assert!(suback_result(&ok).is_ok());

        let rejected = SubAck::new(2, vec![SubscribeReasonCode::Failure]);
        assert_eq!(
            suback_result(&rejected).unwrap_err().kind,
            TransportErrorKind::Refused
        );
    }

    #[tokio::test]
    async fn unreachable_broker_reports_network_error_and_keeps_retrying() {
        let settings = MqttSettings::new(Url::parse("mqtt://127.0.0.1:1").unwrap(), "framecast-test");
        let (transport, mut events) = MqttTransport::new(&settings).unwrap();

        let err = transport.connect().await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Network);

        // A second connect shares the first outcome.
        assert_eq!(transport.connect().await.unwrap_err(), err);

        assert_eq!(
            events.recv().await,
            Some(TransportEvent::Reconnecting { attempt: 1 })
        );

        transport.disconnect().await.unwrap();
    }

    #[test]
    fn event_loop_task_can_be_spawned() {
        fn assert_send<F: std::future::Future + Send>(_: &F) {}

        let settings = MqttSettings::new(Url::parse("mqtt://127.0.0.1:1").unwrap(), "framecast-test");
        let (transport, _events) = MqttTransport::new(&settings).unwrap();
        let run = transport.take_pending().unwrap().run();
        assert_send(&run);
    }

    #[tokio::test]
    async fn disconnect_before_connect_is_a_no_op() {
        let settings = MqttSettings::new(Url::parse("mqtt://127.0.0.1:1").unwrap(), "framecast-test");
        let (transport, _events) = MqttTransport::new(&settings).unwrap();
        transport.disconnect().await.unwrap();

        let err = transport.connect().await.unwrap_err();
        assert_eq!(err.kind, TransportErrorKind::Closed);
    }
}
