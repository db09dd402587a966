// ── Startup orchestrator ──
//
// Races broker connection and output-device initialization under one
// soft timeout. Whatever is still running when the timeout elapses keeps
// running in the background and becomes usable when it finishes.

use std::future::Future;
use std::time::Duration;

use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::connection::{ConnectOutcome, ConnectionManager};
use crate::display::{DisplayController, DisplayDriver, DisplayMode};
use crate::transport::Transport;

/// What the startup race produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StartupReport {
    /// `None` if the connect path had not finished when startup moved on.
    pub connect: Option<ConnectOutcome>,
    /// `None` if device init had not finished when startup moved on.
    pub display: Option<DisplayMode>,
    pub timed_out: bool,
    pub elapsed: Duration,
}

/// Startup timing knobs.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Orchestrator {
    startup_timeout: Duration,
    aux_delay: Duration,
}

impl Orchestrator {
    pub fn new(startup_timeout: Duration, aux_delay: Duration) -> Self {
        Self {
            startup_timeout,
            aux_delay,
        }
    }

    /// Launch the critical paths, schedule `auxiliary` after the aux delay,
    /// and return once both paths finished or the startup timeout elapsed.
    /// Anything buffered during startup is drained before returning.
    pub async fn start<T, D, A>(
        &self,
        connection: &ConnectionManager<T>,
        display: &DisplayController<D>,
        auxiliary: A,
    ) -> StartupReport
    where
        T: Transport,
        D: DisplayDriver,
        A: Future<Output = ()> + Send + 'static,
    {
        let started = Instant::now();
        info!("startup: connecting to broker and initializing output device");

        let conn = connection.clone();
        let mut connect_task = tokio::spawn(async move {
            let outcome = conn.connect().await;
            if outcome == ConnectOutcome::Connected {
                conn.subscribe_device_topics().await;
            }
            outcome
        });

        let disp = display.clone();
        let mut init_task = tokio::spawn(async move { disp.init().await });

        // Low-priority work waits out the critical window.
        let aux_delay = self.aux_delay;
        tokio::spawn(async move {
            tokio::time::sleep_until(started + aux_delay).await;
            debug!("startup: starting auxiliary hardware");
            auxiliary.await;
        });

        let race = async { tokio::join!(&mut connect_task, &mut init_task) };
        let report = match tokio::time::timeout(self.startup_timeout, race).await {
            Ok((connect, init)) => StartupReport {
                connect: connect
                    .inspect_err(|e| warn!(error = %e, "connect task failed"))
                    .ok(),
                display: init
                    .inspect_err(|e| warn!(error = %e, "device init task failed"))
                    .ok(),
                timed_out: false,
                elapsed: started.elapsed(),
            },
            Err(_) => {
                // `display` is shadowed inside tracing macros.
                let connected = connection.is_connected();
                let display_ready = display.is_ready();
                warn!(
                    timeout_ms = u64::try_from(self.startup_timeout.as_millis()).unwrap_or(u64::MAX),
                    connected,
                    display_ready,
                    "startup timeout elapsed, continuing while initialization finishes"
                );
                StartupReport {
                    connect: None,
                    display: display_ready.then(|| display.mode()),
                    timed_out: true,
                    elapsed: started.elapsed(),
                }
            }
        };

        if display.drain_pending() {
            debug!("startup: rendering asset received during startup");
        }

        info!(
            elapsed_ms = u64::try_from(report.elapsed.as_millis()).unwrap_or(u64::MAX),
            timed_out = report.timed_out,
            "startup complete"
        );
        report
    }
}
