//! Binding to the endpoint whose master volume the knob controls.
//!
//! Holds the one native volume handle. A new handle is always activated
//! fully before the old one is dropped, so a failed rebind leaves the
//! previous binding usable.

use crate::audio::{
    resolve_friendly_name, AudioBackend, AudioError, DataFlow, DeviceRecord, DeviceState,
    EndpointVolume,
};
use tracing::{debug, info, warn};

/// The endpoint currently under control, with its handle.
struct BoundEndpoint<V> {
    device_id: String,
    device_name: String,
    volume: V,
}

/// Revocable binding to one output endpoint's volume interface.
pub struct DeviceBinding<V> {
    bound: Option<BoundEndpoint<V>>,
}

impl<V: EndpointVolume> DeviceBinding<V> {
    /// Create an unbound binding.
    pub fn new() -> Self {
        Self { bound: None }
    }

    /// ID of the bound endpoint.
    pub fn bound_device_id(&self) -> Option<&str> {
        self.bound.as_ref().map(|b| b.device_id.as_str())
    }

    /// Resolved friendly name of the bound endpoint.
    pub fn bound_device_name(&self) -> Option<&str> {
        self.bound.as_ref().map(|b| b.device_name.as_str())
    }

    pub fn is_bound(&self) -> bool {
        self.bound.is_some()
    }

    /// Bind to the OS default output endpoint.
    ///
    /// On failure the previous binding is kept.
    pub fn bind_to_default<B>(&mut self, backend: &B) -> Result<(), AudioError>
    where
        B: AudioBackend<Volume = V>,
    {
        let device = backend.default_output_device()?;
        self.activate_and_swap(backend, &device)
    }

    /// Bind to an explicit endpoint without touching the OS default.
    ///
    /// On failure the previous binding is kept.
    pub fn bind_to<B>(&mut self, backend: &B, device_id: &str) -> Result<(), AudioError>
    where
        B: AudioBackend<Volume = V>,
    {
        let device = DeviceRecord {
            id: device_id.to_string(),
            friendly_name: None,
            flow: DataFlow::Render,
            state: DeviceState::Active,
        };
        self.activate_and_swap(backend, &device)
    }

    fn activate_and_swap<B>(&mut self, backend: &B, device: &DeviceRecord) -> Result<(), AudioError>
    where
        B: AudioBackend<Volume = V>,
    {
        let volume = backend.activate_volume(&device.id)?;

        let enumerated = backend.all_devices().unwrap_or_else(|e| {
            debug!(error = %e, "Device enumeration failed during name resolution");
            Vec::new()
        });
        let device_name = resolve_friendly_name(device, &enumerated);

        info!(device_id = %device.id, name = %device_name, "Bound output device");

        // Replacing the whole value drops the old handle only now.
        self.bound = Some(BoundEndpoint {
            device_id: device.id.clone(),
            device_name,
            volume,
        });
        Ok(())
    }

    /// Master volume of the bound endpoint, 0.0 if unbound or unreadable.
    pub fn volume(&self) -> f32 {
        match self.try_volume() {
            Ok(level) => clamp_level(level),
            Err(e) => {
                warn!(error = %e, "Reading master volume failed");
                0.0
            }
        }
    }

    /// Master volume of the bound endpoint, without the safe default.
    pub(crate) fn try_volume(&self) -> Result<f32, AudioError> {
        let bound = self.bound.as_ref().ok_or(AudioError::NotBound)?;
        bound.volume.master_volume()
    }

    /// Set the master volume of the bound endpoint, clamped to [0.0, 1.0].
    ///
    /// Failures are logged and otherwise ignored.
    pub fn set_volume(&self, level: f32) {
        let level = clamp_level(level);
        let result = self
            .bound
            .as_ref()
            .ok_or(AudioError::NotBound)
            .and_then(|bound| bound.volume.set_master_volume(level));

        if let Err(e) = result {
            warn!(level, error = %e, "Setting master volume failed");
        }
    }

    /// Rebind if the OS default output endpoint is no longer the bound one.
    ///
    /// Returns true if a rebind happened.
    pub fn detect_default_changed<B>(&mut self, backend: &B) -> bool
    where
        B: AudioBackend<Volume = V>,
    {
        let current = match backend.default_output_device() {
            Ok(device) => device,
            Err(e) => {
                debug!(error = %e, "Default output lookup failed");
                return false;
            }
        };

        if self.bound_device_id() == Some(current.id.as_str()) {
            return false;
        }

        info!(
            previous = ?self.bound_device_id(),
            current = %current.id,
            "Default output device changed"
        );
        match self.activate_and_swap(backend, &current) {
            Ok(()) => true,
            Err(e) => {
                warn!(error = %e, "Rebinding to new default failed");
                false
            }
        }
    }
}

impl<V: EndpointVolume> Default for DeviceBinding<V> {
    fn default() -> Self {
        Self::new()
    }
}

/// Clamp a requested level to [0.0, 1.0]. NaN maps to 0.0.
pub fn clamp_level(level: f32) -> f32 {
    if level.is_nan() {
        0.0
    } else {
        level.clamp(0.0, 1.0)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::memory::MemoryVolume;
    use crate::audio::MemoryBackend;

    fn two_outputs() -> MemoryBackend {
        MemoryBackend::new()
            .with_output("a", "Speakers")
            .with_output("b", "Headphones")
    }

    #[test]
    fn test_bind_to_default() {
        let backend = two_outputs();
        let mut binding = DeviceBinding::<MemoryVolume>::new();
        assert!(!binding.is_bound());

        binding.bind_to_default(&backend).unwrap();
        assert_eq!(binding.bound_device_id(), Some("a"));
        assert_eq!(binding.bound_device_name(), Some("Speakers"));
    }

    #[test]
    fn test_default_name_resolved_from_enumeration() {
        let backend = two_outputs();
        backend.hide_default_name(true);

        let mut binding = DeviceBinding::new();
        binding.bind_to_default(&backend).unwrap();
        assert_eq!(binding.bound_device_name(), Some("Speakers"));
    }

    #[test]
    fn test_bind_to_missing_device_keeps_binding() {
        let backend = two_outputs();
        let mut binding = DeviceBinding::new();
        binding.bind_to_default(&backend).unwrap();

        let err = binding.bind_to(&backend, "missing").unwrap_err();
        assert!(matches!(err, AudioError::DeviceNotFound { .. }));
        assert_eq!(binding.bound_device_id(), Some("a"));
        assert_eq!(backend.live_volume_handles(), 1);
    }

    #[test]
    fn test_denied_activation_keeps_binding() {
        let backend = two_outputs();
        backend.deny_activation("b");
        let mut binding = DeviceBinding::new();
        binding.bind_to_default(&backend).unwrap();

        assert!(binding.bind_to(&backend, "b").is_err());
        assert_eq!(binding.bound_device_id(), Some("a"));
    }

    #[test]
    fn test_rebind_releases_old_handle() {
        let backend = two_outputs();
        let mut binding = DeviceBinding::new();
        binding.bind_to_default(&backend).unwrap();
        binding.bind_to(&backend, "b").unwrap();
        binding.bind_to(&backend, "a").unwrap();

        assert_eq!(backend.live_volume_handles(), 1);
    }

    #[test]
    fn test_no_default_leaves_unbound() {
        let backend = MemoryBackend::new();
        let mut binding = DeviceBinding::<MemoryVolume>::new();
        assert!(matches!(
            binding.bind_to_default(&backend),
            Err(AudioError::NoDefaultDevice)
        ));
        assert!(!binding.is_bound());
    }

    #[test]
    fn test_volume_safe_defaults() {
        let backend = two_outputs();
        let mut binding = DeviceBinding::new();
        assert_eq!(binding.volume(), 0.0);
        binding.set_volume(0.3);

        binding.bind_to_default(&backend).unwrap();
        backend.fail_volume_queries(true);
        assert_eq!(binding.volume(), 0.0);
        binding.set_volume(0.9);

        backend.fail_volume_queries(false);
        assert_eq!(binding.volume(), 0.5);
    }

    #[test]
    fn test_set_volume_clamps() {
        let backend = two_outputs();
        let mut binding = DeviceBinding::new();
        binding.bind_to_default(&backend).unwrap();

        binding.set_volume(1.7);
        assert_eq!(backend.device_volume("a"), Some(1.0));
        binding.set_volume(-0.2);
        assert_eq!(backend.device_volume("a"), Some(0.0));
        binding.set_volume(f32::NAN);
        assert_eq!(backend.device_volume("a"), Some(0.0));
    }

    #[test]
    fn test_detect_default_changed() {
        let backend = two_outputs();
        let mut binding = DeviceBinding::new();
        binding.bind_to_default(&backend).unwrap();
        assert!(!binding.detect_default_changed(&backend));

        backend.set_default(Some("b"));
        assert!(binding.detect_default_changed(&backend));
        assert_eq!(binding.bound_device_id(), Some("b"));
        assert_eq!(binding.bound_device_name(), Some("Headphones"));
    }

    #[test]
    fn test_detect_default_gone_keeps_binding() {
        let backend = two_outputs();
        let mut binding = DeviceBinding::new();
        binding.bind_to_default(&backend).unwrap();

        backend.set_default(None);
        assert!(!binding.detect_default_changed(&backend));
        assert_eq!(binding.bound_device_id(), Some("a"));
    }
}
