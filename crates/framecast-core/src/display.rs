// ── Output device controller ──
//
// Wraps a `DisplayDriver` with the readiness-gated, single-slot asset
// buffer. One render runs at a time; anything arriving meanwhile (or
// before the device is ready) lands in the slot and the newest asset
// wins. The state lock is never held across an await.

use std::future::Future;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::sync::{mpsc, watch};
use tracing::{debug, info, warn};

use crate::asset::{AssetMessage, AssetSlot};
use crate::config::CoreConfig;
use crate::error::DriverError;
use crate::gate::GateSignal;
use crate::retry::{RetryPolicy, retry};
use crate::store::Settings;

/// Device-specific rendering driver.
pub trait DisplayDriver: Send + Sync + 'static {
    fn init(&self) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn render(&self, payload: &[u8]) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn set_brightness(&self, value: f64) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn clear(&self) -> impl Future<Output = Result<(), DriverError>> + Send;

    fn close(&self) -> impl Future<Output = Result<(), DriverError>> + Send;
}

/// How the controller is driving the output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
#[strum(serialize_all = "snake_case")]
pub enum DisplayMode {
    /// `init()` has not finished yet.
    Uninitialized,
    /// Driver initialized; renders reach the hardware.
    Hardware,
    /// Driver unusable; renders complete as no-ops.
    Degraded,
}

#[derive(Debug)]
struct DisplayState {
    mode: DisplayMode,
    busy: bool,
    closed: bool,
    slot: AssetSlot,
    applied_brightness: Option<f64>,
}

impl DisplayState {
    /// Take the buffered asset and mark a render in flight, if the device
    /// is ready, idle and open.
    fn claim_pending(&mut self) -> Option<AssetMessage> {
        if self.closed || self.busy || self.mode == DisplayMode::Uninitialized {
            return None;
        }
        let asset = self.slot.take()?;
        self.busy = true;
        Some(asset)
    }
}

// ── DisplayController ────────────────────────────────────────────

/// Cheaply cloneable handle to the output device.
pub struct DisplayController<D: DisplayDriver> {
    inner: Arc<DisplayInner<D>>,
}

impl<D: DisplayDriver> Clone for DisplayController<D> {
    fn clone(&self) -> Self {
        Self {
            inner: Arc::clone(&self.inner),
        }
    }
}

struct DisplayInner<D> {
    driver: D,
    settings: watch::Receiver<Settings>,
    init_policy: RetryPolicy,
    render_timeout: Duration,
    clear_on_close: bool,
    state: Mutex<DisplayState>,
    signals: mpsc::UnboundedSender<GateSignal>,
}

impl<D: DisplayDriver> DisplayController<D> {
    /// Wrap `driver`. Successful renders are reported on `signals`.
    pub fn new(
        driver: D,
        settings: watch::Receiver<Settings>,
        config: &CoreConfig,
        signals: mpsc::UnboundedSender<GateSignal>,
    ) -> Self {
        Self {
            inner: Arc::new(DisplayInner {
                driver,
                settings,
                init_policy: config.device_init.clone(),
                render_timeout: config.render_timeout,
                clear_on_close: config.clear_on_close,
                state: Mutex::new(DisplayState {
                    mode: DisplayMode::Uninitialized,
                    busy: false,
                    closed: false,
                    slot: AssetSlot::default(),
                    applied_brightness: None,
                }),
                signals,
            }),
        }
    }

    pub fn driver(&self) -> &D {
        &self.inner.driver
    }

    // ── Lifecycle ────────────────────────────────────────────────

    /// Initialize the driver within the retry budget, falling back to
    /// degraded mode when every attempt fails. The device is ready
    /// afterwards either way, and anything buffered meanwhile is drained.
    pub async fn init(&self) -> DisplayMode {
        let current = self.mode();
        if current != DisplayMode::Uninitialized {
            return current;
        }

        let driver = &self.inner.driver;
        let result = retry(&self.inner.init_policy, "output device init", |attempt| {
            debug!(attempt, "initializing output device");
            driver.init()
        })
        .await;

        let mode = match result {
            Ok(()) => {
                info!("output device initialized");
                DisplayMode::Hardware
            }
            Err(e) => {
                warn!(error = %e, "output device unavailable, continuing in degraded mode");
                DisplayMode::Degraded
            }
        };

        // Readiness and the hand-off of the buffered asset happen under
        // one lock, so a concurrent offer() either lands in the slot first
        // or queues behind this render.
        let (closed, pending) = {
            let mut state = self.state();
            state.mode = mode;
            (state.closed, state.claim_pending())
        };

        if closed {
            // close() ran while init was in flight
            if mode == DisplayMode::Hardware {
                self.release_driver().await;
            }
        } else if let Some(asset) = pending {
            debug!(bytes = asset.len(), "draining buffered asset");
            self.spawn_render(asset);
        }
        mode
    }

    /// Release driver resources. Idempotent; a no-op when the driver was
    /// never initialized.
    pub async fn close(&self) {
        let mode = {
            let mut state = self.state();
            if state.closed {
                return;
            }
            state.closed = true;
            if let Some(dropped) = state.slot.take() {
                debug!(bytes = dropped.len(), "discarding pending asset on close");
            }
            state.mode
        };

        match mode {
            DisplayMode::Hardware => self.release_driver().await,
            DisplayMode::Uninitialized | DisplayMode::Degraded => {
                debug!(%mode, "no driver resources to release");
            }
        }
    }

    async fn release_driver(&self) {
        let driver = &self.inner.driver;
        if self.inner.clear_on_close {
            if let Err(e) = driver.clear().await {
                warn!(error = %e, "failed to clear output device");
            }
        }
        match driver.close().await {
            Ok(()) => info!("output device closed"),
            Err(e) => warn!(error = %e, "failed to close output device"),
        }
    }

    // ── Assets ───────────────────────────────────────────────────

    /// Hand an asset to the device.
    ///
    /// Renders right away when the device is ready and idle. Otherwise the
    /// asset replaces whatever is pending in the slot.
    pub fn offer(&self, asset: AssetMessage) {
        {
            let mut state = self.state();
            if state.closed {
                debug!(topic = %asset.source_topic, "output device closed, dropping asset");
                return;
            }
            if state.mode == DisplayMode::Uninitialized || state.busy {
                let reason = if state.busy {
                    "render in flight"
                } else {
                    "device not ready"
                };
                if let Some(old) = state.slot.put(asset) {
                    debug!(bytes = old.len(), "pending asset superseded");
                }
                debug!(reason, "asset buffered");
                return;
            }
            state.busy = true;
        }
        self.spawn_render(asset);
    }

    /// Render the pending asset if the device is ready and idle.
    /// Returns `true` if a render was started.
    pub fn drain_pending(&self) -> bool {
        let Some(asset) = self.state().claim_pending() else {
            return false;
        };
        debug!(bytes = asset.len(), "draining buffered asset");
        self.spawn_render(asset);
        true
    }

    fn spawn_render(&self, asset: AssetMessage) {
        let display = self.clone();
        tokio::spawn(async move { display.render_loop(asset).await });
    }

    /// Render `asset`, then keep rendering whatever the slot holds until
    /// it is empty. Clears `busy` on exit.
    async fn render_loop(&self, first: AssetMessage) {
        let mut asset = first;
        loop {
            match self.render_one(&asset).await {
                Ok(()) => {
                    debug!(bytes = asset.len(), topic = %asset.source_topic, "asset rendered");
                    let _ = self.inner.signals.send(GateSignal::AssetRendered);
                }
                Err(e) => {
                    warn!(
                        error = %e,
                        bytes = asset.len(),
                        topic = %asset.source_topic,
                        "render failed, dropping asset"
                    );
                }
            }

            let next = {
                let mut state = self.state();
                let next = if state.closed { None } else { state.slot.take() };
                if next.is_none() {
                    state.busy = false;
                }
                next
            };

            match next {
                Some(pending) => asset = pending,
                None => break,
            }
        }
    }

    async fn render_one(&self, asset: &AssetMessage) -> Result<(), DriverError> {
        if self.mode() == DisplayMode::Degraded {
            debug!(bytes = asset.len(), "degraded mode, render skipped");
            return Ok(());
        }

        self.sync_brightness().await;

        let limit = self.inner.render_timeout;
        match tokio::time::timeout(limit, self.inner.driver.render(&asset.payload)).await {
            Ok(result) => result,
            Err(_) => Err(DriverError::Timeout {
                timeout_secs: limit.as_secs(),
            }),
        }
    }

    // ── Brightness ───────────────────────────────────────────────

    /// Apply a brightness now if the hardware is up. Otherwise the stored
    /// setting is picked up by the next render.
    pub async fn set_brightness(&self, value: f64) {
        let mode = self.mode();
        if mode != DisplayMode::Hardware {
            debug!(brightness = value, %mode, "brightness deferred to next render");
            return;
        }
        self.push_brightness(value).await;
    }

    async fn sync_brightness(&self) {
        let wanted = self.inner.settings.borrow().brightness;
        let applied = self.state().applied_brightness;
        if applied.is_some_and(|a| (a - wanted).abs() < f64::EPSILON) {
            return;
        }
        self.push_brightness(wanted).await;
    }

    async fn push_brightness(&self, value: f64) {
        match self.inner.driver.set_brightness(value).await {
            Ok(()) => {
                self.state().applied_brightness = Some(value);
                debug!(brightness = value, "brightness applied");
            }
            Err(e) => warn!(error = %e, brightness = value, "failed to apply brightness"),
        }
    }

    // ── Observers ────────────────────────────────────────────────

    pub fn mode(&self) -> DisplayMode {
        self.state().mode
    }

    pub fn is_ready(&self) -> bool {
        self.mode() != DisplayMode::Uninitialized
    }

    pub fn is_busy(&self) -> bool {
        self.state().busy
    }

    pub fn has_pending(&self) -> bool {
        !self.state().slot.is_empty()
    }

    pub fn is_closed(&self) -> bool {
        self.state().closed
    }

    fn state(&self) -> MutexGuard<'_, DisplayState> {
        self.inner
            .state
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
    }
}
