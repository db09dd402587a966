// ── External display command ──
//
// Drives the panel through a helper program, one invocation per
// operation:
//
//   <command> <args> --init     bring the panel up
//   <command> <args>            render; asset bytes on stdin
//   <command> <args> --clear    blank the panel
//
// The current brightness travels in FRAMECAST_BRIGHTNESS on every call.

use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::{Mutex, PoisonError};

use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio_util::sync::CancellationToken;
use tracing::{debug, trace};

use framecast_config::DisplayConfig;
use framecast_core::{DisplayDriver, DriverError};

pub const BRIGHTNESS_ENV: &str = "FRAMECAST_BRIGHTNESS";

pub struct CommandDriver {
    program: Option<PathBuf>,
    args: Vec<String>,
    brightness: Mutex<f64>,
    /// Fires on `close()`, killing any invocation still running.
    closed: CancellationToken,
}

impl CommandDriver {
    pub fn new(program: Option<PathBuf>, args: Vec<String>, brightness: f64) -> Self {
        Self {
            program,
            args,
            brightness: Mutex::new(brightness),
            closed: CancellationToken::new(),
        }
    }

    pub fn from_config(config: &DisplayConfig) -> Self {
        Self::new(
            config.command.clone(),
            config.args.clone(),
            config.default_brightness,
        )
    }

    fn brightness(&self) -> f64 {
        *self.brightness.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn command(&self, program: &Path, extra: Option<&str>) -> Command {
        let mut cmd = Command::new(program);
        cmd.args(&self.args)
            .args(extra)
            .env(BRIGHTNESS_ENV, format!("{:.2}", self.brightness()))
            .stdout(Stdio::null())
            .stderr(Stdio::piped())
            .kill_on_drop(true);
        cmd
    }

    /// Run one invocation to completion, feeding `stdin` if given.
    async fn invoke(
        &self,
        extra: Option<&str>,
        stdin: Option<&[u8]>,
        fail: fn(String) -> DriverError,
    ) -> Result<(), DriverError> {
        let program = self
            .program
            .as_ref()
            .ok_or_else(|| DriverError::Init("no display command configured".into()))?;
        if self.closed.is_cancelled() {
            return Err(fail("driver closed".into()));
        }

        let mut cmd = self.command(program, extra);
        cmd.stdin(if stdin.is_some() {
            Stdio::piped()
        } else {
            Stdio::null()
        });
        let mut child = cmd.spawn()?;
        trace!(program = %program.display(), ?extra, "display command started");

        // Feed stdin and drain stderr while waiting; either pipe filling
        // up would otherwise stall the helper.
        let stdin_pipe = child.stdin.take();
        let feed = async move {
            match (stdin, stdin_pipe) {
                // Dropping the pipe afterwards signals end of input.
                (Some(bytes), Some(mut pipe)) => pipe.write_all(bytes).await,
                _ => Ok(()),
            }
        };
        let stderr_pipe = child.stderr.take();
        let drain = async move {
            let mut buf = Vec::new();
            if let Some(mut pipe) = stderr_pipe {
                let _ = pipe.read_to_end(&mut buf).await;
            }
            buf
        };

        let (fed, stderr, status) = tokio::select! {
            biased;
            () = self.closed.cancelled() => {
                debug!("driver closed, killing display command");
                child.kill().await?;
                return Err(fail("interrupted by close".into()));
            }
            outcome = async { tokio::join!(feed, drain, child.wait()) } => outcome,
        };
        let status = status?;

        if !status.success() {
            let stderr = String::from_utf8_lossy(&stderr);
            return Err(fail(format!(
                "{} exited with {}: {}",
                program.display(),
                status,
                stderr.trim()
            )));
        }
        match fed {
            // The helper may exit successfully without reading all input.
            Err(e) if e.kind() != std::io::ErrorKind::BrokenPipe => Err(fail(format!(
                "writing asset to {}: {e}",
                program.display()
            ))),
            _ => Ok(()),
        }
    }
}

impl DisplayDriver for CommandDriver {
    async fn init(&self) -> Result<(), DriverError> {
        self.invoke(Some("--init"), None, DriverError::Init).await
    }

    async fn render(&self, payload: &[u8]) -> Result<(), DriverError> {
        self.invoke(None, Some(payload), DriverError::Render).await
    }

    async fn set_brightness(&self, value: f64) -> Result<(), DriverError> {
        if !value.is_finite() || value < 0.0 {
            return Err(DriverError::Brightness {
                value,
                reason: "must be a finite, non-negative number".into(),
            });
        }
        *self.brightness.lock().unwrap_or_else(PoisonError::into_inner) = value;
        Ok(())
    }

    async fn clear(&self) -> Result<(), DriverError> {
        self.invoke(Some("--clear"), None, DriverError::Render).await
    }

    async fn close(&self) -> Result<(), DriverError> {
        self.closed.cancel();
        Ok(())
    }
}
