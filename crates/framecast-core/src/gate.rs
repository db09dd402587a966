// ── Shutdown gate ──
//
// Four independent conditions plus a single-fire latch. The latch is
// shared with every other shutdown trigger (signals, the hardware
// switch) so exactly one shutdown sequence ever runs per process.

use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

/// Inputs that can change the gate's conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GateSignal {
    /// Broker connection came up (`true`) or went away (`false`).
    Connection(bool),
    /// An asset finished rendering successfully.
    AssetRendered,
    /// A config update was applied; carries the resulting flag.
    ConfigProcessed { auto_shutdown_enabled: bool },
}

/// Observable gate phase.
#[derive(Debug, Clone, Copy, PartialEq, Eq, strum::Display)]
pub enum GatePhase {
    /// Auto-shutdown not armed.
    Idle,
    /// Armed, waiting for the remaining conditions.
    Armed,
    /// Shutdown started. Terminal.
    Fired,
}

/// Process-wide single-fire latch.
#[derive(Debug, Default)]
pub struct ShutdownLatch(AtomicBool);

impl ShutdownLatch {
    pub fn new() -> Self {
        Self::default()
    }

    /// Close the latch. Returns `true` only for the first caller.
    pub fn try_begin(&self) -> bool {
        self.0
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_ok()
    }

    pub fn is_started(&self) -> bool {
        self.0.load(Ordering::Acquire)
    }
}

/// Auto-shutdown condition tracker.
#[derive(Debug)]
pub struct ShutdownGate {
    connected: bool,
    asset_rendered: bool,
    config_processed: bool,
    auto_shutdown_enabled: bool,
    latch: Arc<ShutdownLatch>,
}

impl ShutdownGate {
    pub fn new(latch: Arc<ShutdownLatch>) -> Self {
        Self {
            connected: false,
            asset_rendered: false,
            config_processed: false,
            auto_shutdown_enabled: false,
            latch,
        }
    }

    /// Record a signal and evaluate. Returns `true` if this call fired.
    pub fn observe(&mut self, signal: GateSignal) -> bool {
        if self.latch.is_started() {
            return false;
        }
        match signal {
            GateSignal::Connection(up) => self.connected = up,
            GateSignal::AssetRendered => self.asset_rendered = true,
            GateSignal::ConfigProcessed {
                auto_shutdown_enabled,
            } => {
                self.config_processed = true;
                self.auto_shutdown_enabled = auto_shutdown_enabled;
            }
        }
        self.evaluate()
    }

    /// Fire iff every condition holds and nothing has fired yet. The latch
    /// closes before this returns, so re-entrant evaluations while the
    /// shutdown sequence runs are no-ops.
    pub fn evaluate(&mut self) -> bool {
        if self.latch.is_started() || !self.conditions_met() {
            return false;
        }
        self.latch.try_begin()
    }

    pub fn phase(&self) -> GatePhase {
        if self.latch.is_started() {
            GatePhase::Fired
        } else if self.auto_shutdown_enabled {
            GatePhase::Armed
        } else {
            GatePhase::Idle
        }
    }

    fn conditions_met(&self) -> bool {
        self.connected && self.asset_rendered && self.config_processed && self.auto_shutdown_enabled
    }
}
