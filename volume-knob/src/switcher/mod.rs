//! Output device selection.
//!
//! Two operations with different reach:
//! - [`OutputDeviceSwitcher::select_for_control`] points the knob at another
//!   endpoint, in process, leaving the OS default alone.
//! - [`OutputDeviceSwitcher::set_system_default`] changes the OS default for
//!   every role through an out-of-process helper. It blocks for as long as
//!   the helper runs; [`OutputDeviceSwitcher::begin_system_default`] runs the
//!   helper on a worker thread instead.

pub mod helper;
pub mod protocol;

pub use helper::{HelperLauncher, LaunchError, ScriptHelper, SET_DEFAULT_ENDPOINT_SCRIPT};
pub use protocol::{judge, parse_return_marker, HelperOutput, MarkerError, SwitchVerdict};

use crate::audio::{AudioBackend, AudioError};
use crate::binding::DeviceBinding;
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use tracing::{debug, info, warn};

/// A default-device switch running on a worker thread.
pub struct PendingSwitch {
    device_id: String,
    worker: JoinHandle<Result<HelperOutput, LaunchError>>,
}

impl PendingSwitch {
    /// Endpoint being made default.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    /// True once the helper has exited (or timed out).
    pub fn is_finished(&self) -> bool {
        self.worker.is_finished()
    }
}

/// Changes which endpoint the knob, or the whole system, uses.
pub struct OutputDeviceSwitcher<L> {
    launcher: Arc<L>,
}

impl<L: HelperLauncher + 'static> OutputDeviceSwitcher<L> {
    pub fn new(launcher: L) -> Self {
        Self {
            launcher: Arc::new(launcher),
        }
    }

    /// Rebind `binding` to `device_id` without touching the OS default.
    pub fn select_for_control<B: AudioBackend>(
        &self,
        binding: &mut DeviceBinding<B::Volume>,
        backend: &B,
        device_id: &str,
    ) -> bool {
        match binding.bind_to(backend, device_id) {
            Ok(()) => {
                debug!(
                    device_id,
                    name = binding.bound_device_name().unwrap_or_default(),
                    "Now controlling volume of selected device"
                );
                true
            }
            Err(e) => {
                warn!(device_id, error = %e, "Selecting output device failed");
                false
            }
        }
    }

    /// Make `device_id` the OS default output for every role, then rebind
    /// `binding` to the new default.
    ///
    /// `Ok(false)` for any helper-reported failure; `Err` only when the
    /// helper could not be started at all.
    pub fn set_system_default<B: AudioBackend>(
        &self,
        binding: &mut DeviceBinding<B::Volume>,
        backend: &B,
        device_id: &str,
    ) -> Result<bool, AudioError> {
        if device_id.trim().is_empty() {
            warn!("Refusing to set an empty device ID as default");
            return Ok(false);
        }
        let result = self.launcher.launch(device_id);
        Self::settle(device_id, result, binding, backend)
    }

    /// Start a default-device switch on a worker thread.
    pub fn begin_system_default(&self, device_id: &str) -> PendingSwitch {
        let launcher = Arc::clone(&self.launcher);
        let id = device_id.to_string();
        let worker = thread::spawn(move || {
            if id.trim().is_empty() {
                return Ok(HelperOutput::default());
            }
            launcher.launch(&id)
        });
        PendingSwitch {
            device_id: device_id.to_string(),
            worker,
        }
    }

    /// Wait for a switch started with [`Self::begin_system_default`] and
    /// apply its result. Same contract as [`Self::set_system_default`].
    pub fn finish_system_default<B: AudioBackend>(
        &self,
        pending: PendingSwitch,
        binding: &mut DeviceBinding<B::Volume>,
        backend: &B,
    ) -> Result<bool, AudioError> {
        let PendingSwitch { device_id, worker } = pending;
        if device_id.trim().is_empty() {
            warn!("Refusing to set an empty device ID as default");
            return Ok(false);
        }
        let result = worker.join().unwrap_or_else(|_| {
            Err(LaunchError::Wait(std::io::Error::other(
                "helper worker thread panicked",
            )))
        });
        Self::settle(&device_id, result, binding, backend)
    }

    fn settle<B: AudioBackend>(
        device_id: &str,
        result: Result<HelperOutput, LaunchError>,
        binding: &mut DeviceBinding<B::Volume>,
        backend: &B,
    ) -> Result<bool, AudioError> {
        let output = match result {
            Ok(output) => output,
            Err(e) => {
                let err = AudioError::from(e);
                if err.is_fatal() {
                    return Err(err);
                }
                warn!(device_id, error = %err, "Default device switch failed");
                return Ok(false);
            }
        };

        if !output.stdout.trim().is_empty() {
            debug!(stdout = %output.stdout.trim(), "Helper stdout");
        }
        if !output.stderr.trim().is_empty() {
            debug!(stderr = %output.stderr.trim(), "Helper stderr");
        }

        match judge(&output) {
            SwitchVerdict::Succeeded => {
                info!(device_id, "Default output device switched");
                if let Err(e) = binding.bind_to_default(backend) {
                    warn!(error = %e, "Rebinding after default switch failed");
                }
                Ok(true)
            }
            SwitchVerdict::Rejected { code, exit_code } => {
                warn!(device_id, code, ?exit_code, "Helper rejected default switch");
                Ok(false)
            }
            SwitchVerdict::Unreadable { error, exit_code } => {
                warn!(device_id, ?error, ?exit_code, "Helper output had no usable result");
                Ok(false)
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::MemoryBackend;
    use std::io;
    use std::sync::Mutex;

    /// Launcher that replays a canned result and records the IDs it saw.
    struct ScriptedLauncher {
        reply: Box<dyn Fn(&str) -> Result<HelperOutput, LaunchError> + Send + Sync>,
        calls: Mutex<Vec<String>>,
    }

    impl ScriptedLauncher {
        fn new(
            reply: impl Fn(&str) -> Result<HelperOutput, LaunchError> + Send + Sync + 'static,
        ) -> Self {
            Self {
                reply: Box::new(reply),
                calls: Mutex::new(Vec::new()),
            }
        }
    }

    impl HelperLauncher for ScriptedLauncher {
        fn launch(&self, device_id: &str) -> Result<HelperOutput, LaunchError> {
            self.calls.lock().unwrap().push(device_id.to_string());
            (self.reply)(device_id)
        }
    }

    fn ok_output() -> HelperOutput {
        HelperOutput {
            stdout: "PSRETURN:0\r\n".to_string(),
            stderr: String::new(),
            exit_code: Some(0),
        }
    }

    fn setup() -> (MemoryBackend, DeviceBinding<crate::audio::memory::MemoryVolume>) {
        let backend = MemoryBackend::new()
            .with_output("a", "Speakers")
            .with_output("b", "Headphones");
        let mut binding = DeviceBinding::new();
        binding.bind_to_default(&backend).unwrap();
        (backend, binding)
    }

    #[test]
    fn test_select_for_control() {
        let (backend, mut binding) = setup();
        let switcher = OutputDeviceSwitcher::new(ScriptedLauncher::new(|_| Ok(ok_output())));

        assert!(switcher.select_for_control(&mut binding, &backend, "b"));
        assert_eq!(binding.bound_device_id(), Some("b"));
        assert_eq!(backend.default_id().as_deref(), Some("a"));

        assert!(!switcher.select_for_control(&mut binding, &backend, "nope"));
        assert_eq!(binding.bound_device_id(), Some("b"));
        assert!(switcher.launcher.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_set_system_default_rebinds_on_success() {
        let (backend, mut binding) = setup();
        let os = backend.clone();
        let switcher = OutputDeviceSwitcher::new(ScriptedLauncher::new(move |id| {
            os.set_default(Some(id));
            Ok(ok_output())
        }));

        assert!(switcher.set_system_default(&mut binding, &backend, "b").unwrap());
        assert_eq!(binding.bound_device_id(), Some("b"));
        assert_eq!(*switcher.launcher.calls.lock().unwrap(), vec!["b".to_string()]);
    }

    #[test]
    fn test_set_system_default_failure_keeps_binding() {
        let (backend, mut binding) = setup();
        let switcher = OutputDeviceSwitcher::new(ScriptedLauncher::new(|_| {
            Ok(HelperOutput {
                stdout: String::new(),
                stderr: "Exception calling \"Set\"".to_string(),
                exit_code: Some(1),
            })
        }));

        assert!(!switcher.set_system_default(&mut binding, &backend, "bad-id").unwrap());
        assert_eq!(binding.bound_device_id(), Some("a"));
    }

    #[test]
    fn test_nonzero_marker_is_failure() {
        let (backend, mut binding) = setup();
        let switcher = OutputDeviceSwitcher::new(ScriptedLauncher::new(|_| {
            Ok(HelperOutput {
                stdout: "PSRETURN:-2147024809".to_string(),
                stderr: String::new(),
                exit_code: Some(0),
            })
        }));

        assert!(!switcher.set_system_default(&mut binding, &backend, "b").unwrap());
    }

    #[test]
    fn test_timeout_is_failure_not_fatal() {
        let (backend, mut binding) = setup();
        let switcher = OutputDeviceSwitcher::new(ScriptedLauncher::new(|_| {
            Err(LaunchError::TimedOut(std::time::Duration::from_secs(15)))
        }));

        assert!(!switcher.set_system_default(&mut binding, &backend, "b").unwrap());
    }

    #[test]
    fn test_spawn_failure_is_fatal() {
        let (backend, mut binding) = setup();
        let switcher = OutputDeviceSwitcher::new(ScriptedLauncher::new(|_| {
            Err(LaunchError::Spawn {
                program: "powershell.exe".to_string(),
                source: io::Error::from(io::ErrorKind::NotFound),
            })
        }));

        let err = switcher.set_system_default(&mut binding, &backend, "b").unwrap_err();
        assert!(err.is_fatal());
        assert_eq!(binding.bound_device_id(), Some("a"));
    }

    #[test]
    fn test_empty_id_never_launches() {
        let (backend, mut binding) = setup();
        let switcher = OutputDeviceSwitcher::new(ScriptedLauncher::new(|_| Ok(ok_output())));

        assert!(!switcher.set_system_default(&mut binding, &backend, "  ").unwrap());
        assert!(switcher.launcher.calls.lock().unwrap().is_empty());
    }

    #[test]
    fn test_background_switch() {
        let (backend, mut binding) = setup();
        let os = backend.clone();
        let switcher = OutputDeviceSwitcher::new(ScriptedLauncher::new(move |id| {
            os.set_default(Some(id));
            Ok(ok_output())
        }));

        let pending = switcher.begin_system_default("b");
        assert_eq!(pending.device_id(), "b");
        while !pending.is_finished() {
            std::thread::sleep(std::time::Duration::from_millis(5));
        }
        assert_eq!(binding.bound_device_id(), Some("a"));
        assert!(switcher
            .finish_system_default(pending, &mut binding, &backend)
            .unwrap());
        assert_eq!(binding.bound_device_id(), Some("b"));
    }
}
