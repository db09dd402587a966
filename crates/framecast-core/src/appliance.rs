// ── Appliance ──
//
// The one explicitly owned instance that wires every component
// together: config store, connection manager, display controller,
// auxiliary hardware, and the shutdown gate. Constructed once at
// process start; nothing here is global.

use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{Mutex, mpsc, watch};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::asset::AssetMessage;
use crate::config::CoreConfig;
use crate::connection::{ConnectionManager, InboundHandler};
use crate::display::{DisplayController, DisplayDriver};
use crate::gate::{GatePhase, GateSignal, ShutdownGate, ShutdownLatch};
use crate::hardware::{AuxHardware, watch_switch};
use crate::orchestrator::{Orchestrator, StartupReport};
use crate::store::{ConfigStore, ConfigUpdate};
use crate::transport::{Transport, TransportEvent};

/// Why the appliance is shutting down.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "kebab-case")]
pub enum ShutdownReason {
    /// The shutdown gate fired.
    AutoShutdown,
    /// The physical switch closed.
    Switch,
    /// The process received SIGINT/SIGTERM.
    Signal,
}

impl ShutdownReason {
    /// Whether the sequence ends by powering the platform off.
    pub fn powers_off(self) -> bool {
        matches!(self, Self::AutoShutdown | Self::Switch)
    }
}

// ── Dispatcher ───────────────────────────────────────────────────

/// Fan-out target of the connection manager's dispatch loop.
struct Dispatcher<D: DisplayDriver> {
    display: DisplayController<D>,
    config_tx: mpsc::UnboundedSender<Bytes>,
    signals: mpsc::UnboundedSender<GateSignal>,
}

impl<D: DisplayDriver> InboundHandler for Dispatcher<D> {
    fn on_asset(&self, asset: AssetMessage) {
        self.display.offer(asset);
    }

    fn on_config(&self, payload: Bytes) {
        // Handled by the config worker on a later tick, in arrival order.
        if self.config_tx.send(payload).is_err() {
            debug!("config worker stopped, dropping config update");
        }
    }

    fn on_connection(&self, connected: bool) {
        let _ = self.signals.send(GateSignal::Connection(connected));
    }
}

// ── Appliance ────────────────────────────────────────────────────

/// The device runtime. Cheaply cloneable.
pub struct Appliance<T: Transport, D: DisplayDriver, H: AuxHardware> {
    inner: Arc<ApplianceInner<T, D, H>>,
}

impl<T: Transport, D: DisplayDriver, H: AuxHardware> Clone for Appliance<T, D, H> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct ApplianceInner<T: Transport, D: DisplayDriver, H: AuxHardware> {
    config: CoreConfig,
    store: Arc<ConfigStore>,
    connection: ConnectionManager<T>,
    display: DisplayController<D>,
    hardware: Arc<H>,
    latch: Arc<ShutdownLatch>,
    gate_phase: watch::Sender<GatePhase>,
    signals_rx: Mutex<Option<mpsc::UnboundedReceiver<GateSignal>>>,
    config_rx: Mutex<Option<mpsc::UnboundedReceiver<Bytes>>>,
    signals_tx: mpsc::UnboundedSender<GateSignal>,
    cancel: CancellationToken,
    finished: watch::Sender<Option<ShutdownReason>>,
}

impl<T: Transport, D: DisplayDriver, H: AuxHardware> Appliance<T, D, H> {
    /// Wire the components. Nothing starts until [`run()`](Self::run).
    pub fn new(
        config: CoreConfig,
        store: ConfigStore,
        transport: T,
        events: mpsc::Receiver<TransportEvent>,
        driver: D,
        hardware: H,
    ) -> Self {
        let (signals_tx, signals_rx) = mpsc::unbounded_channel();
        let (config_tx, config_rx) = mpsc::unbounded_channel();
        let (gate_phase, _) = watch::channel(GatePhase::Idle);
        let (finished, _) = watch::channel(None);

        let store = Arc::new(store);
        let display = DisplayController::new(driver, store.subscribe(), &config, signals_tx.clone());
        let dispatcher = Arc::new(Dispatcher {
            display: display.clone(),
            config_tx,
            signals: signals_tx.clone(),
        });
        let connection = ConnectionManager::new(
            transport,
            events,
            store.identity().clone(),
            &config,
            dispatcher,
        );

        Self {
            inner: Arc::new(ApplianceInner {
                config,
                store,
                connection,
                display,
                hardware: Arc::new(hardware),
                latch: Arc::new(ShutdownLatch::new()),
                gate_phase,
                signals_rx: Mutex::new(Some(signals_rx)),
                config_rx: Mutex::new(Some(config_rx)),
                signals_tx,
                cancel: CancellationToken::new(),
                finished,
            }),
        }
    }

    pub fn store(&self) -> &ConfigStore {
        &self.inner.store
    }

    pub fn connection(&self) -> &ConnectionManager<T> {
        &self.inner.connection
    }

    pub fn display(&self) -> &DisplayController<D> {
        &self.inner.display
    }

    pub fn hardware(&self) -> &H {
        &self.inner.hardware
    }

    /// Observe the shutdown gate's phase.
    pub fn gate_phase(&self) -> watch::Receiver<GatePhase> {
        self.inner.gate_phase.subscribe()
    }

    // ── Run ──────────────────────────────────────────────────────

    /// Start every task, run the startup race, then wait for a shutdown
    /// sequence to complete. Returns the reason the appliance stopped.
    pub async fn run(&self) -> ShutdownReason {
        let mut finished = self.inner.finished.subscribe();
        let cancel = self.inner.cancel.clone();

        {
            let connection = self.inner.connection.clone();
            let cancel = cancel.clone();
            tokio::spawn(async move { connection.run(cancel).await });
        }
        if let Some(rx) = self.inner.config_rx.lock().await.take() {
            let appliance = self.clone();
            tokio::spawn(async move { appliance.config_worker(rx).await });
        }
        if let Some(rx) = self.inner.signals_rx.lock().await.take() {
            let appliance = self.clone();
            tokio::spawn(async move { appliance.gate_worker(rx).await });
        }

        let report = self.start().await;
        debug!(?report, "startup report");

        loop {
            if let Some(reason) = *finished.borrow_and_update() {
                return reason;
            }
            if finished.changed().await.is_err() {
                // Unreachable while `self` holds the sender.
                return ShutdownReason::Signal;
            }
        }
    }

    async fn start(&self) -> StartupReport {
        let orchestrator = Orchestrator::new(self.inner.config.startup_timeout, self.inner.config.aux_delay);

        let appliance = self.clone();
        let auxiliary = async move {
            let closed = watch_switch(
                Arc::clone(&appliance.inner.hardware),
                appliance.inner.config.switch_poll_interval,
                appliance.inner.cancel.clone(),
            )
            .await;
            if closed {
                appliance.request_shutdown(ShutdownReason::Switch);
            }
        };

        orchestrator
            .start(&self.inner.connection, &self.inner.display, auxiliary)
            .await
    }

    // ── Config ───────────────────────────────────────────────────

    async fn config_worker(&self, mut rx: mpsc::UnboundedReceiver<Bytes>) {
        loop {
            tokio::select! {
                biased;
                () = self.inner.cancel.cancelled() => break,
                payload = rx.recv() => {
                    let Some(payload) = payload else { break };
                    self.apply_config(&payload).await;
                }
            }
        }
    }

    /// Parse and merge one config payload, push brightness to the device,
    /// and report the result to the gate. Malformed payloads are dropped.
    pub async fn apply_config(&self, payload: &[u8]) {
        let update = match ConfigUpdate::from_json(payload) {
            Ok(update) => update,
            Err(e) => {
                warn!(error = %e, bytes = payload.len(), "dropping config update");
                return;
            }
        };

        let settings = self.inner.store.apply(&update);
        info!(
            brightness = settings.brightness,
            auto_shutdown = settings.auto_shutdown_enabled,
            "config applied"
        );

        if update.brightness.is_some() {
            self.inner.display.set_brightness(settings.brightness).await;
        }

        let _ = self.inner.signals_tx.send(GateSignal::ConfigProcessed {
            auto_shutdown_enabled: settings.auto_shutdown_enabled,
        });
    }

    // ── Shutdown ─────────────────────────────────────────────────

    async fn gate_worker(&self, mut rx: mpsc::UnboundedReceiver<GateSignal>) {
        let mut gate = ShutdownGate::new(Arc::clone(&self.inner.latch));

        while let Some(signal) = rx.recv().await {
            let fired = gate.observe(signal);
            self.inner.gate_phase.send_replace(gate.phase());
            if fired {
                self.spawn_sequence(ShutdownReason::AutoShutdown);
            }
            if gate.phase() == GatePhase::Fired {
                break;
            }
        }
    }

    /// Start the shutdown sequence unless one already started.
    /// Returns `true` if this call started it.
    pub fn request_shutdown(&self, reason: ShutdownReason) -> bool {
        if !self.inner.latch.try_begin() {
            debug!(%reason, "shutdown already in progress");
            return false;
        }
        self.inner.gate_phase.send_replace(GatePhase::Fired);
        self.spawn_sequence(reason);
        true
    }

    pub fn shutdown_started(&self) -> bool {
        self.inner.latch.is_started()
    }

    fn spawn_sequence(&self, reason: ShutdownReason) {
        let appliance = self.clone();
        tokio::spawn(async move { appliance.shutdown_sequence(reason).await });
    }

    /// Grace delay, then transport → output device → auxiliary hardware
    /// → platform power-off (when the reason calls for it).
    async fn shutdown_sequence(&self, reason: ShutdownReason) {
        let grace = self.inner.config.shutdown_grace;
        info!(
            %reason,
            grace_ms = u64::try_from(grace.as_millis()).unwrap_or(u64::MAX),
            "shutdown sequence started"
        );
        tokio::time::sleep(grace).await;

        self.inner.connection.disconnect().await;
        self.inner.display.close().await;
        self.inner.cancel.cancel();
        self.inner.hardware.release().await;

        if reason.powers_off() {
            info!("requesting platform power-off");
            if let Err(e) = self.inner.hardware.request_shutdown().await {
                warn!(error = %e, "platform power-off failed");
            }
        }

        info!(%reason, "shutdown sequence complete");
        self.inner.finished.send_replace(Some(reason));
    }
}
