//! The controller the UI drives.
//!
//! Composes the device binding, the session directory and the device
//! switcher behind a synchronous surface where every call returns a value
//! with a safe default or a success flag.

use crate::audio::{AudioBackend, AudioError, SessionControl, GENERIC_OUTPUT_NAME};
use crate::binding::{clamp_level, DeviceBinding};
use crate::config::ControllerConfig;
use crate::directory::{ApplicationSession, AudioSessionDirectory, OutputDevice};
use crate::switcher::{HelperLauncher, OutputDeviceSwitcher, PendingSwitch, ScriptHelper};
use tracing::{debug, warn};

/// Master volume, application sessions and output devices of one machine.
pub struct VolumeController<B: AudioBackend, L = ScriptHelper> {
    // Field order matters: handles are released before the backend.
    binding: DeviceBinding<B::Volume>,
    applications: Vec<ApplicationSession<B::Session>>,
    switcher: OutputDeviceSwitcher<L>,
    backend: B,
}

impl<B: AudioBackend> VolumeController<B, ScriptHelper> {
    /// Controller with configuration taken from the environment.
    pub fn new(backend: B) -> Self {
        Self::with_config(backend, ControllerConfig::from_env())
    }

    /// Controller with an explicit configuration.
    pub fn with_config(backend: B, config: ControllerConfig) -> Self {
        Self::with_launcher(backend, ScriptHelper::powershell(config.helper))
    }
}

impl<B: AudioBackend, L: HelperLauncher + 'static> VolumeController<B, L> {
    /// Controller using `launcher` for default-device switches.
    ///
    /// Binds to the current default output; if there is none the controller
    /// starts unbound and reads volume as 0.0 until a later rebind succeeds.
    pub fn with_launcher(backend: B, launcher: L) -> Self {
        let mut binding = DeviceBinding::new();
        if let Err(e) = binding.bind_to_default(&backend) {
            warn!(error = %e, "No output device bound at startup");
        }

        Self {
            binding,
            applications: Vec::new(),
            switcher: OutputDeviceSwitcher::new(launcher),
            backend,
        }
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    /// Master volume of the controlled device, in [0.0, 1.0].
    pub fn master_volume(&self) -> f32 {
        self.binding.volume()
    }

    /// Set the master volume, clamped to [0.0, 1.0].
    pub fn set_master_volume(&self, level: f32) {
        self.binding.set_volume(level);
    }

    /// Change the master volume by `delta`, clamped to [0.0, 1.0].
    ///
    /// Nothing is written if the current level cannot be read.
    pub fn adjust_master_volume(&self, delta: f32) {
        match self.binding.try_volume() {
            Ok(level) => self.set_master_volume(clamp_level(level) + delta),
            Err(e) => warn!(delta, error = %e, "Skipping volume adjustment, read failed"),
        }
    }

    /// Re-list active application sessions.
    ///
    /// Handles from the previous listing are released.
    pub fn applications(&mut self) -> &[ApplicationSession<B::Session>] {
        self.applications = AudioSessionDirectory::new(&self.backend).list_applications();
        debug!(count = self.applications.len(), "Listed application sessions");
        &self.applications
    }

    /// Volume of the `index`-th session of the last listing, 0.0 on failure.
    pub fn application_volume(&self, index: usize) -> f32 {
        let result = self
            .applications
            .get(index)
            .ok_or_else(|| AudioError::QueryFailed(format!("no session at index {index}")))
            .and_then(|app| app.session.volume());

        match result {
            Ok(level) => clamp_level(level),
            Err(e) => {
                warn!(index, error = %e, "Reading session volume failed");
                0.0
            }
        }
    }

    /// Set the volume of the `index`-th session of the last listing.
    pub fn set_application_volume(&self, index: usize, level: f32) -> bool {
        let level = clamp_level(level);
        let result = self
            .applications
            .get(index)
            .ok_or_else(|| AudioError::QueryFailed(format!("no session at index {index}")))
            .and_then(|app| app.session.set_volume(level));

        match result {
            Ok(()) => true,
            Err(e) => {
                warn!(index, level, error = %e, "Setting session volume failed");
                false
            }
        }
    }

    /// Selectable output devices. Never empty while a default device exists.
    pub fn output_devices(&self) -> Vec<OutputDevice> {
        AudioSessionDirectory::new(&self.backend).list_output_devices()
    }

    /// Control `device_id` from now on, without changing the OS default.
    pub fn select_output_device(&mut self, device_id: &str) -> bool {
        self.switcher
            .select_for_control(&mut self.binding, &self.backend, device_id)
    }

    /// Make `device_id` the OS default output and control it.
    ///
    /// Blocks while the helper process runs. `Err` only if the helper could
    /// not be started, which means the environment is broken.
    pub fn set_default_output_device(&mut self, device_id: &str) -> Result<bool, AudioError> {
        self.switcher
            .set_system_default(&mut self.binding, &self.backend, device_id)
    }

    /// Start [`Self::set_default_output_device`] on a worker thread.
    pub fn begin_set_default_output_device(&self, device_id: &str) -> PendingSwitch {
        self.switcher.begin_system_default(device_id)
    }

    /// Complete a switch started with
    /// [`Self::begin_set_default_output_device`].
    pub fn finish_default_switch(&mut self, pending: PendingSwitch) -> Result<bool, AudioError> {
        self.switcher
            .finish_system_default(pending, &mut self.binding, &self.backend)
    }

    /// Rebind to the current OS default output.
    pub fn force_rebind(&mut self) -> bool {
        match self.binding.bind_to_default(&self.backend) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Rebind to default output failed");
                false
            }
        }
    }

    /// Rebind if the OS default output changed since the last bind.
    pub fn detect_default_changed(&mut self) -> bool {
        self.binding.detect_default_changed(&self.backend)
    }

    /// Friendly name of the controlled device.
    pub fn current_device_name(&self) -> String {
        self.binding
            .bound_device_name()
            .unwrap_or(GENERIC_OUTPUT_NAME)
            .to_string()
    }

    /// ID of the controlled device.
    pub fn current_device_id(&self) -> Option<&str> {
        self.binding.bound_device_id()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{MemoryBackend, SessionState};
    use crate::switcher::{HelperOutput, LaunchError};

    struct NeverLaunch;

    impl HelperLauncher for NeverLaunch {
        fn launch(&self, _device_id: &str) -> Result<HelperOutput, LaunchError> {
            panic!("helper must not run in this test");
        }
    }

    fn controller(backend: &MemoryBackend) -> VolumeController<MemoryBackend, NeverLaunch> {
        VolumeController::with_launcher(backend.clone(), NeverLaunch)
    }

    #[test]
    fn test_binds_default_at_startup() {
        let backend = MemoryBackend::new().with_output("a", "Speakers");
        let vc = controller(&backend);
        assert_eq!(vc.current_device_id(), Some("a"));
        assert_eq!(vc.current_device_name(), "Speakers");
        assert_eq!(vc.master_volume(), 0.5);
    }

    #[test]
    fn test_starts_unbound_without_default() {
        let backend = MemoryBackend::new();
        let mut vc = controller(&backend);
        assert_eq!(vc.current_device_id(), None);
        assert_eq!(vc.current_device_name(), GENERIC_OUTPUT_NAME);
        assert_eq!(vc.master_volume(), 0.0);
        vc.set_master_volume(0.7);

        backend.add_device(crate::audio::DeviceRecord::output("a", Some("Speakers")));
        assert!(vc.force_rebind());
        assert_eq!(vc.current_device_name(), "Speakers");
    }

    #[test]
    fn test_adjust_master_volume() {
        let backend = MemoryBackend::new().with_output("a", "Speakers");
        let vc = controller(&backend);

        vc.set_master_volume(0.9);
        vc.adjust_master_volume(0.25);
        assert_eq!(vc.master_volume(), 1.0);

        vc.set_master_volume(0.5);
        vc.adjust_master_volume(0.0);
        assert_eq!(vc.master_volume(), 0.5);

        vc.adjust_master_volume(-0.75);
        assert_eq!(vc.master_volume(), 0.0);
    }

    #[test]
    fn test_adjust_skips_write_when_read_fails() {
        let backend = MemoryBackend::new().with_output("a", "Speakers");
        let vc = controller(&backend);
        vc.set_master_volume(0.8);

        backend.fail_volume_reads(true);
        vc.adjust_master_volume(0.02);
        assert_eq!(backend.device_volume("a"), Some(0.8));

        backend.fail_volume_reads(false);
        vc.adjust_master_volume(0.1);
        assert_eq!(backend.device_volume("a"), Some(0.8 + 0.1));
    }

    #[test]
    fn test_application_volume() {
        let backend = MemoryBackend::new().with_output("a", "Speakers");
        backend.add_session(Some("idle.exe"), SessionState::Inactive);
        let spotify = backend.add_session(Some("spotify.exe"), SessionState::Active);
        let mut vc = controller(&backend);

        let names: Vec<_> = vc
            .applications()
            .iter()
            .map(|a| a.display_name.clone())
            .collect();
        assert_eq!(names, vec!["Spotify.exe"]);

        assert!(vc.set_application_volume(0, 1.4));
        assert_eq!(backend.session_volume(spotify), Some(1.0));
        assert_eq!(vc.application_volume(0), 1.0);

        assert!(!vc.set_application_volume(5, 0.5));
        assert_eq!(vc.application_volume(5), 0.0);
    }

    #[test]
    fn test_vanished_session_reads_zero() {
        let backend = MemoryBackend::new().with_output("a", "Speakers");
        let index = backend.add_session(Some("game.exe"), SessionState::Active);
        let mut vc = controller(&backend);
        assert_eq!(vc.applications().len(), 1);

        backend.break_session(index);
        assert_eq!(vc.application_volume(0), 0.0);
        assert!(!vc.set_application_volume(0, 0.2));
    }

    #[test]
    fn test_empty_id_default_switch_is_rejected() {
        let backend = MemoryBackend::new().with_output("a", "Speakers");
        let mut vc = controller(&backend);
        assert!(!vc.set_default_output_device("").unwrap());
    }
}
