// ── Runtime orchestration configuration ──
//
// Timeouts and budgets for the orchestration core. These never touch
// disk: the daemon loads its TOML file through `framecast-config` and
// hands a `CoreConfig` in.

use std::time::Duration;

use crate::retry::RetryPolicy;

/// Tuning for startup, rendering, and shutdown.
#[derive(Debug, Clone, PartialEq)]
pub struct CoreConfig {
    /// How long `connect()` waits for the broker before returning anyway.
    pub connect_timeout: Duration,
    /// Overall bound on the startup race.
    pub startup_timeout: Duration,
    /// Delay before auxiliary hardware starts, measured from startup.
    pub aux_delay: Duration,
    /// Output device initialization attempts and pause.
    pub device_init: RetryPolicy,
    /// Upper bound on a single render.
    pub render_timeout: Duration,
    /// Blank the output device when closing it.
    pub clear_on_close: bool,
    /// Pause between the shutdown decision and the first teardown step.
    pub shutdown_grace: Duration,
    /// Bound on waiting for the broker to confirm a disconnect.
    pub disconnect_grace: Duration,
    /// Polling period of the shutdown switch.
    pub switch_poll_interval: Duration,
}

impl Default for CoreConfig {
    fn default() -> Self {
        Self {
            connect_timeout: Duration::from_secs(3),
            startup_timeout: Duration::from_secs(15),
            aux_delay: Duration::from_secs(2),
            device_init: RetryPolicy::fixed(3, Duration::from_millis(500)),
            render_timeout: Duration::from_secs(30),
            clear_on_close: false,
            shutdown_grace: Duration::from_secs(3),
            disconnect_grace: Duration::from_secs(2),
            switch_poll_interval: Duration::from_millis(250),
        }
    }
}
