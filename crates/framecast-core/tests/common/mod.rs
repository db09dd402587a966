// Shared fakes for the orchestration integration tests.
//
// Every fake appends to one `CallLog` so tests can assert the global
// order of transport, output device and hardware calls.

#![allow(dead_code)]

use std::sync::atomic::{AtomicBool, AtomicU32, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;

use tokio::sync::{Semaphore, mpsc};

use framecast_core::{
    Appliance, AssetMessage, AuxHardware, ConfigStore, CoreConfig, DeliveryGuarantee,
    DeviceIdentity, DisplayDriver, DriverError, HardwareError, InboundHandler, InboundMessage,
    Settings, Transport, TransportError, TransportErrorKind, TransportEvent,
};

pub const DEVICE: &str = "abc";
pub const ASSET_TOPIC: &str = "device/abc/image/display";
pub const CONFIG_TOPIC: &str = "device/abc/config";

// ── Call log ────────────────────────────────────────────────────────

#[derive(Debug, Clone, Default)]
pub struct CallLog(Arc<Mutex<Vec<String>>>);

impl CallLog {
    pub fn push(&self, entry: impl Into<String>) {
        self.0.lock().unwrap().push(entry.into());
    }

    pub fn entries(&self) -> Vec<String> {
        self.0.lock().unwrap().clone()
    }

    pub fn count(&self, entry: &str) -> usize {
        self.entries().iter().filter(|e| *e == entry).count()
    }

    /// Entries that start with `prefix`, in order.
    pub fn matching(&self, prefix: &str) -> Vec<String> {
        self.entries()
            .into_iter()
            .filter(|e| e.starts_with(prefix))
            .collect()
    }

    pub fn position(&self, entry: &str) -> Option<usize> {
        self.entries().iter().position(|e| e == entry)
    }
}

// ── Transport ───────────────────────────────────────────────────────

pub struct FakeTransport {
    pub log: CallLog,
    pub connect_calls: AtomicU32,
    pub connect_delay: Duration,
    pub connect_error: Option<TransportErrorKind>,
}

impl FakeTransport {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            connect_calls: AtomicU32::new(0),
            connect_delay: Duration::ZERO,
            connect_error: None,
        }
    }

    pub fn with_delay(mut self, delay: Duration) -> Self {
        self.connect_delay = delay;
        self
    }

    pub fn failing(mut self, kind: TransportErrorKind) -> Self {
        self.connect_error = Some(kind);
        self
    }

    pub fn connect_calls(&self) -> u32 {
        self.connect_calls.load(Ordering::SeqCst)
    }
}

impl Transport for FakeTransport {
    async fn connect(&self) -> Result<(), TransportError> {
        self.connect_calls.fetch_add(1, Ordering::SeqCst);
        self.log.push("transport.connect");
        if !self.connect_delay.is_zero() {
            tokio::time::sleep(self.connect_delay).await;
        }
        match self.connect_error {
            Some(kind) => Err(TransportError::new(kind, "rejected by fake broker")),
            None => Ok(()),
        }
    }

    async fn subscribe(
        &self,
        topic: &str,
        guarantee: DeliveryGuarantee,
    ) -> Result<(), TransportError> {
        // Yield so concurrent subscribers get a chance to interleave.
        tokio::task::yield_now().await;
        self.log.push(format!("transport.subscribe {topic} {guarantee}"));
        Ok(())
    }

    async fn disconnect(&self) -> Result<(), TransportError> {
        self.log.push("transport.disconnect");
        Ok(())
    }
}

// ── Display driver ──────────────────────────────────────────────────

pub struct FakeDriver {
    pub log: CallLog,
    pub init_calls: AtomicU32,
    /// Number of leading `init()` calls that fail. `u32::MAX` fails forever.
    pub init_failures: u32,
    pub init_delay: Duration,
    /// When set, each render waits for one permit.
    pub render_gate: Option<Arc<Semaphore>>,
    /// Payloads whose render fails.
    pub failing_payload: Option<Vec<u8>>,
    pub renders: Mutex<Vec<Vec<u8>>>,
    pub brightness: Mutex<Vec<f64>>,
}

impl FakeDriver {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            init_calls: AtomicU32::new(0),
            init_failures: 0,
            init_delay: Duration::ZERO,
            render_gate: None,
            failing_payload: None,
            renders: Mutex::new(Vec::new()),
            brightness: Mutex::new(Vec::new()),
        }
    }

    pub fn init_failures(mut self, failures: u32) -> Self {
        self.init_failures = failures;
        self
    }

    pub fn init_delay(mut self, delay: Duration) -> Self {
        self.init_delay = delay;
        self
    }

    pub fn gated(mut self, gate: Arc<Semaphore>) -> Self {
        self.render_gate = Some(gate);
        self
    }

    pub fn failing_on(mut self, payload: &[u8]) -> Self {
        self.failing_payload = Some(payload.to_vec());
        self
    }

    pub fn renders(&self) -> Vec<Vec<u8>> {
        self.renders.lock().unwrap().clone()
    }

    pub fn brightness(&self) -> Vec<f64> {
        self.brightness.lock().unwrap().clone()
    }

    pub fn init_calls(&self) -> u32 {
        self.init_calls.load(Ordering::SeqCst)
    }
}

impl DisplayDriver for FakeDriver {
    async fn init(&self) -> Result<(), DriverError> {
        let n = self.init_calls.fetch_add(1, Ordering::SeqCst);
        self.log.push("driver.init");
        if !self.init_delay.is_zero() {
            tokio::time::sleep(self.init_delay).await;
        }
        if n < self.init_failures {
            return Err(DriverError::Init("panel not responding".into()));
        }
        Ok(())
    }

    async fn render(&self, payload: &[u8]) -> Result<(), DriverError> {
        if let Some(gate) = &self.render_gate {
            gate.acquire().await.unwrap().forget();
        }
        self.log.push("driver.render");
        if self.failing_payload.as_deref() == Some(payload) {
            return Err(DriverError::Render("bad image".into()));
        }
        self.renders.lock().unwrap().push(payload.to_vec());
        Ok(())
    }

    async fn set_brightness(&self, value: f64) -> Result<(), DriverError> {
        self.log.push(format!("driver.brightness {value}"));
        self.brightness.lock().unwrap().push(value);
        Ok(())
    }

    async fn clear(&self) -> Result<(), DriverError> {
        self.log.push("driver.clear");
        Ok(())
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.log.push("driver.close");
        Ok(())
    }
}

// ── Hardware ────────────────────────────────────────────────────────

pub struct FakeHardware {
    pub log: CallLog,
    pub switch: AtomicBool,
}

impl FakeHardware {
    pub fn new(log: CallLog) -> Self {
        Self {
            log,
            switch: AtomicBool::new(false),
        }
    }

    pub fn close_switch(&self) {
        self.switch.store(true, Ordering::SeqCst);
    }
}

impl AuxHardware for FakeHardware {
    async fn switch_closed(&self) -> Result<bool, HardwareError> {
        Ok(self.switch.load(Ordering::SeqCst))
    }

    async fn release(&self) {
        self.log.push("hardware.release");
    }

    async fn request_shutdown(&self) -> Result<(), HardwareError> {
        self.log.push("hardware.power_off");
        Ok(())
    }
}

// ── Handler ─────────────────────────────────────────────────────────

#[derive(Debug, Default)]
pub struct RecordingHandler {
    pub assets: Mutex<Vec<AssetMessage>>,
    pub configs: Mutex<Vec<Vec<u8>>>,
    pub connection: Mutex<Vec<bool>>,
}

impl InboundHandler for RecordingHandler {
    fn on_asset(&self, asset: AssetMessage) {
        self.assets.lock().unwrap().push(asset);
    }

    fn on_config(&self, payload: bytes::Bytes) {
        self.configs.lock().unwrap().push(payload.to_vec());
    }

    fn on_connection(&self, connected: bool) {
        self.connection.lock().unwrap().push(connected);
    }
}

// ── Builders ────────────────────────────────────────────────────────

pub fn identity() -> DeviceIdentity {
    DeviceIdentity::new(DEVICE).unwrap()
}

pub fn store() -> ConfigStore {
    ConfigStore::new(identity(), Settings::default())
}

pub fn asset(payload: &[u8]) -> TransportEvent {
    TransportEvent::Message(InboundMessage::new(ASSET_TOPIC, payload.to_vec()))
}

pub fn config(json: &str) -> TransportEvent {
    TransportEvent::Message(InboundMessage::new(CONFIG_TOPIC, json.as_bytes().to_vec()))
}

pub type TestAppliance = Appliance<FakeTransport, FakeDriver, FakeHardware>;

/// An appliance over the given fakes, plus the sender that feeds its
/// transport event channel.
pub fn appliance(
    config: CoreConfig,
    transport: FakeTransport,
    driver: FakeDriver,
    hardware: FakeHardware,
) -> (TestAppliance, mpsc::Sender<TransportEvent>) {
    let (events_tx, events_rx) = mpsc::channel(64);
    let appliance = Appliance::new(config, store(), transport, events_rx, driver, hardware);
    (appliance, events_tx)
}

/// Let spawned tasks run and the paused clock advance by `ms`.
pub async fn settle(ms: u64) {
    tokio::time::sleep(Duration::from_millis(ms)).await;
}
