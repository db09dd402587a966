// ── Core error types ──
//
// Errors surfaced by framecast-core. Only construction and startup
// wiring return them to callers; once the appliance is running every
// failure is absorbed, logged, and turned into a state change.

use thiserror::Error;

use crate::transport::TransportError;

/// Unified error type for the core crate.
#[derive(Debug, Error)]
pub enum CoreError {
    // ── Identity ─────────────────────────────────────────────────────
    #[error("Invalid device identity {value:?}: {reason}")]
    InvalidIdentity { value: String, reason: String },

    // ── Inbound data ─────────────────────────────────────────────────
    #[error("Malformed config update: {reason}")]
    MalformedConfig { reason: String },

    // ── Collaborators ────────────────────────────────────────────────
    #[error(transparent)]
    Transport(#[from] TransportError),

    #[error(transparent)]
    Driver(#[from] DriverError),

    #[error(transparent)]
    Hardware(#[from] HardwareError),
}

/// Failures reported by an output device driver.
#[derive(Debug, Error)]
pub enum DriverError {
    #[error("driver initialization failed: {0}")]
    Init(String),

    #[error("render failed: {0}")]
    Render(String),

    #[error("render timed out after {timeout_secs}s")]
    Timeout { timeout_secs: u64 },

    #[error("driver rejected brightness {value}: {reason}")]
    Brightness { value: f64, reason: String },

    #[error("driver I/O error: {0}")]
    Io(#[from] std::io::Error),
}

/// Failures reported by auxiliary hardware (shutdown switch, power control).
#[derive(Debug, Error)]
pub enum HardwareError {
    #[error("switch read failed: {0}")]
    Switch(String),

    #[error("`{program}` exited with {status}")]
    Command { program: String, status: String },

    #[error("hardware I/O error: {0}")]
    Io(#[from] std::io::Error),
}
