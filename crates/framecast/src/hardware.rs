// ── Sysfs switch and power control ──
//
// The shutdown switch is read from a GPIO `value` file exported through
// sysfs. Power-off runs a configured command, `systemctl poweroff` by
// default.

use std::path::PathBuf;

use tokio::process::Command;
use tracing::{debug, info};

use framecast_config::{ShutdownConfig, SwitchConfig};
use framecast_core::{AuxHardware, HardwareError};

#[derive(Debug, Clone, Default)]
pub struct SysfsHardware {
    /// `None` when no switch is wired; reads then always report open.
    switch: Option<PathBuf>,
    active_low: bool,
    power_off: Vec<String>,
}

impl SysfsHardware {
    pub fn new(switch: Option<PathBuf>, active_low: bool, power_off: Vec<String>) -> Self {
        Self {
            switch,
            active_low,
            power_off,
        }
    }

    pub fn from_config(switch: &SwitchConfig, shutdown: &ShutdownConfig) -> Self {
        let path = if switch.enabled {
            switch.gpio_value_path.clone()
        } else {
            None
        };
        Self::new(path, switch.active_low, shutdown.power_off_command.clone())
    }

    fn level_means_closed(&self, level: &str) -> Result<bool, HardwareError> {
        let high = match level.trim() {
            "1" => true,
            "0" => false,
            other => {
                return Err(HardwareError::Switch(format!(
                    "unexpected GPIO value {other:?}"
                )));
            }
        };
        Ok(high != self.active_low)
    }
}

impl AuxHardware for SysfsHardware {
    async fn switch_closed(&self) -> Result<bool, HardwareError> {
        let Some(path) = &self.switch else {
            return Ok(false);
        };
        let level = tokio::fs::read_to_string(path).await?;
        self.level_means_closed(&level)
    }

    async fn release(&self) {
        // Sysfs reads hold no handle between polls.
        debug!("switch released");
    }

    async fn request_shutdown(&self) -> Result<(), HardwareError> {
        let Some((program, args)) = self.power_off.split_first() else {
            info!("no power-off command configured");
            return Ok(());
        };

        info!(command = %self.power_off.join(" "), "powering off");
        let status = Command::new(program).args(args).status().await?;
        if status.success() {
            Ok(())
        } else {
            Err(HardwareError::Command {
                program: program.clone(),
                status: status.to_string(),
            })
        }
    }
}

#[cfg(test)]
mod tests {
    use tempfile::TempDir;

    use super::*;

    fn gpio(dir: &TempDir, level: &str) -> PathBuf {
        let path = dir.path().join("value");
        std::fs::write(&path, format!("{level}\n")).unwrap();
        path
    }

    #[tokio::test]
    async fn active_low_switch_closes_on_zero() {
        let dir = TempDir::new().unwrap();
        let hw = SysfsHardware::new(Some(gpio(&dir, "0")), true, Vec::new());
        assert!(hw.switch_closed().await.unwrap());

        let hw = SysfsHardware::new(Some(gpio(&dir, "1")), true, Vec::new());
        assert!(!hw.switch_closed().await.unwrap());
    }

    #[tokio::test]
    async fn active_high_switch_closes_on_one() {
        let dir = TempDir::new().unwrap();
        let hw = SysfsHardware::new(Some(gpio(&dir, "1")), false, Vec::new());
        assert!(hw.switch_closed().await.unwrap());
    }

    #[tokio::test]
    async fn garbage_level_is_an_error() {
        let dir = TempDir::new().unwrap();
        let hw = SysfsHardware::new(Some(gpio(&dir, "high")), true, Vec::new());
        assert!(matches!(
            hw.switch_closed().await,
            Err(HardwareError::Switch(_))
        ));
    }

    #[tokio::test]
    async fn unwired_switch_reads_open() {
        let hw = SysfsHardware::default();
        assert!(!hw.switch_closed().await.unwrap());
    }

    #[tokio::test]
    async fn disabled_switch_ignores_configured_path() {
        let switch = SwitchConfig {
            enabled: false,
            gpio_value_path: Some(PathBuf::from("/sys/class/gpio/gpio17/value")),
            ..SwitchConfig::default()
        };
        let hw = SysfsHardware::from_config(&switch, &ShutdownConfig::default());
        assert!(!hw.switch_closed().await.unwrap());
    }

    #[tokio::test]
    async fn power_off_reports_failing_command() {
        let ok = SysfsHardware::new(None, true, vec!["true".into()]);
        ok.request_shutdown().await.unwrap();

        let failing = SysfsHardware::new(None, true, vec!["false".into()]);
        assert!(matches!(
            failing.request_shutdown().await,
            Err(HardwareError::Command { ref program, .. }) if program == "false"
        ));

        SysfsHardware::default().request_shutdown().await.unwrap();
    }
}
