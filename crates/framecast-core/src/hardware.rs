// ── Auxiliary hardware ──
//
// The physical shutdown switch and the platform power control. Both
// are optional niceties: failures are logged and never stop the core.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::error::HardwareError;

/// Switch input plus power control.
pub trait AuxHardware: Send + Sync + 'static {
    /// Read the switch once. `true` means the switch is closed.
    fn switch_closed(&self) -> impl Future<Output = Result<bool, HardwareError>> + Send;

    /// Release any handles held on the hardware.
    fn release(&self) -> impl Future<Output = ()> + Send;

    /// Ask the platform to power off.
    fn request_shutdown(&self) -> impl Future<Output = Result<(), HardwareError>> + Send;
}

/// Hardware stand-in for devices without a switch or power control.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoHardware;

impl AuxHardware for NoHardware {
    async fn switch_closed(&self) -> Result<bool, HardwareError> {
        Ok(false)
    }

    async fn release(&self) {}

    async fn request_shutdown(&self) -> Result<(), HardwareError> {
        info!("no power control configured, skipping power-off");
        Ok(())
    }
}

/// Poll the switch until it closes or `cancel` fires.
///
/// Returns `true` when the switch closed. Read errors are logged once
/// per streak and polling continues.
pub async fn watch_switch<H: AuxHardware>(
    hardware: Arc<H>,
    period: Duration,
    cancel: CancellationToken,
) -> bool {
    let mut interval = tokio::time::interval(period);
    interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);
    let mut failing = false;

    debug!(period_ms = u64::try_from(period.as_millis()).unwrap_or(u64::MAX), "switch poller started");

    loop {
        tokio::select! {
            biased;
            () = cancel.cancelled() => return false,
            _ = interval.tick() => {
                match hardware.switch_closed().await {
                    Ok(true) => {
                        info!("shutdown switch closed");
                        return true;
                    }
                    Ok(false) => failing = false,
                    Err(e) => {
                        if !failing {
                            warn!(error = %e, "failed to read shutdown switch");
                        }
                        failing = true;
                    }
                }
            }
        }
    }
}
