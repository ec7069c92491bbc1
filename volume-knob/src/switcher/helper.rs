//! Out-of-process helper that changes the OS default output device.
//!
//! The helper script is written to a temporary file for the duration of one
//! run and removed afterwards whatever the outcome. The endpoint ID travels
//! as a process argument, never as script text.

use super::protocol::HelperOutput;
use crate::audio::AudioError;
use crate::config::HelperConfig;
use std::borrow::Cow;
use std::io::{self, Read, Write};
use std::process::{Child, Command, Stdio};
use std::sync::mpsc::{self, Receiver};
use std::sync::{Arc, Mutex};
use std::thread;
use std::time::{Duration, Instant};
use thiserror::Error;
use tracing::{debug, warn};

/// The PowerShell script that calls IPolicyConfig::SetDefaultEndpoint.
pub const SET_DEFAULT_ENDPOINT_SCRIPT: &str = include_str!("set_default_endpoint.ps1");

const POLL_INTERVAL: Duration = Duration::from_millis(20);

/// Minimum wait for the pipes to close after the helper exited.
const DRAIN_GRACE: Duration = Duration::from_millis(250);

/// Failure to obtain any output from the helper.
#[derive(Debug, Error)]
pub enum LaunchError {
    #[error("failed to stage helper script: {0}")]
    Staging(#[source] io::Error),

    #[error("failed to spawn {program}: {source}")]
    Spawn {
        program: String,
        #[source]
        source: io::Error,
    },

    #[error("helper did not finish within {0:?}")]
    TimedOut(Duration),

    #[error("failed waiting for helper: {0}")]
    Wait(#[source] io::Error),
}

impl From<LaunchError> for AudioError {
    fn from(err: LaunchError) -> Self {
        match err {
            LaunchError::Spawn { program, source } => {
                AudioError::HelperSpawnFailed { program, source }
            }
            other => AudioError::SwitchFailed(other.to_string()),
        }
    }
}

/// Runs the default-device helper for one endpoint ID and reports what it
/// printed. Blocks until the helper finishes or times out.
pub trait HelperLauncher: Send + Sync {
    fn launch(&self, device_id: &str) -> Result<HelperOutput, LaunchError>;
}

/// Runs a script through a shell program, as configured by [`HelperConfig`].
#[derive(Debug, Clone)]
pub struct ScriptHelper {
    config: HelperConfig,
    script: Cow<'static, str>,
}

impl ScriptHelper {
    /// The PowerShell helper with the given launch configuration.
    pub fn powershell(config: HelperConfig) -> Self {
        Self::new(config, SET_DEFAULT_ENDPOINT_SCRIPT)
    }

    /// A helper running an arbitrary script.
    pub fn new(config: HelperConfig, script: impl Into<Cow<'static, str>>) -> Self {
        Self {
            config,
            script: script.into(),
        }
    }

    pub fn config(&self) -> &HelperConfig {
        &self.config
    }

    fn command(&self, script_path: &str, device_id: &str) -> Command {
        let mut command = Command::new(&self.config.program);
        command
            .args(self.config.expand_args(script_path, device_id))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        #[cfg(windows)]
        {
            use std::os::windows::process::CommandExt;
            // CREATE_NO_WINDOW: no console flash over the widget
            command.creation_flags(0x0800_0000);
        }

        command
    }
}

impl HelperLauncher for ScriptHelper {
    fn launch(&self, device_id: &str) -> Result<HelperOutput, LaunchError> {
        let mut staged = tempfile::Builder::new()
            .prefix("volume-knob-")
            .suffix(&self.config.script_extension)
            .tempfile()
            .map_err(LaunchError::Staging)?;
        staged
            .write_all(self.script.as_bytes())
            .and_then(|()| staged.flush())
            .map_err(LaunchError::Staging)?;
        // Close the handle so the shell can open the file; the path is
        // deleted when `script` goes out of scope.
        let script = staged.into_temp_path();
        let script_path = script.to_string_lossy().into_owned();

        let program = self.config.program.to_string_lossy().into_owned();
        debug!(%program, script = %script_path, device_id, "Launching default-device helper");

        let mut child = self
            .command(&script_path, device_id)
            .spawn()
            .map_err(|source| LaunchError::Spawn {
                program: program.clone(),
                source,
            })?;

        let stdout = child.stdout.take().map(drain);
        let stderr = child.stderr.take().map(drain);

        let deadline = Instant::now() + self.config.timeout;
        let status = wait_with_deadline(&mut child, deadline, self.config.timeout)?;

        // A grandchild may still hold the pipes open; take what is there.
        let drain_until = deadline.max(Instant::now() + DRAIN_GRACE);
        let output = HelperOutput {
            stdout: collect(stdout, drain_until),
            stderr: collect(stderr, drain_until),
            exit_code: status,
        };

        if let Err(e) = script.close() {
            warn!(script = %script_path, error = %e, "Failed to remove helper script");
        }
        Ok(output)
    }
}

/// Wait for `child` to exit, killing it once `timeout` has passed.
/// Returns the exit code (`None` if killed by a signal).
fn wait_with_deadline(
    child: &mut Child,
    deadline: Instant,
    timeout: Duration,
) -> Result<Option<i32>, LaunchError> {
    loop {
        match child.try_wait().map_err(LaunchError::Wait)? {
            Some(status) => return Ok(status.code()),
            None if Instant::now() >= deadline => {
                warn!(pid = child.id(), ?timeout, "Helper timed out, killing it");
                let _ = child.kill();
                let _ = child.wait();
                return Err(LaunchError::TimedOut(timeout));
            }
            None => thread::sleep(POLL_INTERVAL),
        }
    }
}

/// Output of one pipe, filled by a reader thread.
struct Drain {
    bytes: Arc<Mutex<Vec<u8>>>,
    closed: Receiver<()>,
}

/// Read a pipe on its own thread so a chatty child cannot block on a full
/// pipe while we poll for exit.
fn drain<R: Read + Send + 'static>(mut pipe: R) -> Drain {
    let bytes = Arc::new(Mutex::new(Vec::new()));
    let (closed_tx, closed) = mpsc::channel();
    let sink = Arc::clone(&bytes);
    thread::spawn(move || {
        let mut chunk = [0u8; 4096];
        loop {
            match pipe.read(&mut chunk) {
                Ok(0) | Err(_) => break,
                Ok(n) => sink
                    .lock()
                    .unwrap_or_else(|poisoned| poisoned.into_inner())
                    .extend_from_slice(&chunk[..n]),
            }
        }
        let _ = closed_tx.send(());
    });
    Drain { bytes, closed }
}

/// Wait until the pipe closes or `until` passes, then return what was read.
/// A reader still blocked after that is left behind.
fn collect(drain: Option<Drain>, until: Instant) -> String {
    let Some(drain) = drain else {
        return String::new();
    };
    let wait = until.saturating_duration_since(Instant::now());
    if drain.closed.recv_timeout(wait).is_err() {
        warn!("Helper output pipe still open after exit, using partial output");
    }
    let bytes = drain
        .bytes
        .lock()
        .unwrap_or_else(|poisoned| poisoned.into_inner());
    String::from_utf8_lossy(&bytes).into_owned()
}
