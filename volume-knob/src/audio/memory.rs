//! In-memory audio backend.
//!
//! Behaves like a small audio subsystem: devices can be plugged, unplugged
//! and made default, sessions come and go, and individual operations can be
//! made to fail. Clones share state, so a test can keep one clone to act as
//! "the OS" while a controller owns another.

use super::backend::{AudioBackend, EndpointVolume, SessionControl};
use super::device::{AudioError, DeviceRecord, DeviceState, SessionState};
use std::collections::{HashMap, HashSet};
use std::sync::{Arc, Mutex, MutexGuard};

#[derive(Debug, Default)]
struct MemoryState {
    devices: Vec<DeviceRecord>,
    default_id: Option<String>,
    hide_default_name: bool,
    fail_enumeration: bool,
    fail_volume_queries: bool,
    fail_volume_reads: bool,
    denied: HashSet<String>,
    volumes: HashMap<String, f32>,
    sessions: Vec<SessionData>,
    live_volume_handles: usize,
}

#[derive(Debug, Clone)]
struct SessionData {
    process: Option<String>,
    state: SessionState,
    volume: f32,
    broken: bool,
}

/// Shared in-memory audio subsystem.
#[derive(Debug, Clone, Default)]
pub struct MemoryBackend {
    state: Arc<Mutex<MemoryState>>,
}

impl MemoryBackend {
    /// Create an empty backend with no devices and no default.
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, MemoryState> {
        // A panicking test thread must not take the whole fixture down with it.
        self.state
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// Add an active output device. The first one added becomes default.
    pub fn with_output(self, id: &str, name: &str) -> Self {
        self.add_device(DeviceRecord::output(id, Some(name)));
        self
    }

    /// Add (or replace) a device record.
    pub fn add_device(&self, record: DeviceRecord) {
        let mut state = self.lock();
        if state.default_id.is_none() && record.is_render_active() {
            state.default_id = Some(record.id.clone());
        }
        state.volumes.entry(record.id.clone()).or_insert(0.5);
        state.devices.retain(|d| d.id != record.id);
        state.devices.push(record);
    }

    /// Append a record even if its ID is already listed, the way some
    /// drivers report one endpoint under several enumeration flags.
    pub fn add_duplicate_device(&self, record: DeviceRecord) {
        let mut state = self.lock();
        state.volumes.entry(record.id.clone()).or_insert(0.5);
        state.devices.push(record);
    }

    /// Mark a device as unplugged. Outstanding handles to it go stale.
    pub fn unplug(&self, id: &str) {
        let mut state = self.lock();
        if let Some(device) = state.devices.iter_mut().find(|d| d.id == id) {
            device.state = DeviceState::Unplugged;
        }
        if state.default_id.as_deref() == Some(id) {
            state.default_id = None;
        }
    }

    /// Change the OS default output device, as if done from outside.
    pub fn set_default(&self, id: Option<&str>) {
        self.lock().default_id = id.map(str::to_string);
    }

    /// Current default device ID.
    pub fn default_id(&self) -> Option<String> {
        self.lock().default_id.clone()
    }

    /// Report the default device without its friendly name, the way some
    /// single-device queries do.
    pub fn hide_default_name(&self, hide: bool) {
        self.lock().hide_default_name = hide;
    }

    /// Refuse volume activation on a device.
    pub fn deny_activation(&self, id: &str) {
        self.lock().denied.insert(id.to_string());
    }

    /// Make device enumeration fail.
    pub fn fail_enumeration(&self, fail: bool) {
        self.lock().fail_enumeration = fail;
    }

    /// Make every master-volume read and write fail.
    pub fn fail_volume_queries(&self, fail: bool) {
        self.lock().fail_volume_queries = fail;
    }

    /// Make master-volume reads fail while writes still go through.
    pub fn fail_volume_reads(&self, fail: bool) {
        self.lock().fail_volume_reads = fail;
    }

    /// Master volume of a device as stored by "the OS".
    pub fn device_volume(&self, id: &str) -> Option<f32> {
        self.lock().volumes.get(id).copied()
    }

    /// Number of volume handles not yet released.
    pub fn live_volume_handles(&self) -> usize {
        self.lock().live_volume_handles
    }

    /// Start a session owned by `process` (`None` for system sounds).
    /// Returns the session's index.
    pub fn add_session(&self, process: Option<&str>, state: SessionState) -> usize {
        let mut inner = self.lock();
        inner.sessions.push(SessionData {
            process: process.map(str::to_string),
            state,
            volume: 1.0,
            broken: false,
        });
        inner.sessions.len() - 1
    }

    /// Make every query on a session fail, as if it vanished mid-listing.
    pub fn break_session(&self, index: usize) {
        if let Some(session) = self.lock().sessions.get_mut(index) {
            session.broken = true;
        }
    }

    /// Volume of a session as stored by "the OS".
    pub fn session_volume(&self, index: usize) -> Option<f32> {
        self.lock().sessions.get(index).map(|s| s.volume)
    }

    fn present_device(state: &MemoryState, id: &str) -> Option<DeviceRecord> {
        state
            .devices
            .iter()
            .find(|d| d.id == id && d.state == DeviceState::Active)
            .cloned()
    }
}

impl AudioBackend for MemoryBackend {
    type Volume = MemoryVolume;
    type Session = MemorySession;

    fn default_output_device(&self) -> Result<DeviceRecord, AudioError> {
        let state = self.lock();
        let id = state
            .default_id
            .as_deref()
            .ok_or(AudioError::NoDefaultDevice)?;
        let mut device = Self::present_device(&state, id)
            .ok_or(AudioError::NoDefaultDevice)?;
        if state.hide_default_name {
            device.friendly_name = None;
        }
        Ok(device)
    }

    fn all_devices(&self) -> Result<Vec<DeviceRecord>, AudioError> {
        let state = self.lock();
        if state.fail_enumeration {
            return Err(AudioError::EnumerationFailed {
                what: "devices",
                reason: "enumeration disabled".to_string(),
            });
        }
        Ok(state.devices.clone())
    }

    fn sessions(&self) -> Result<Vec<MemorySession>, AudioError> {
        let state = self.lock();
        if state.fail_enumeration {
            return Err(AudioError::EnumerationFailed {
                what: "sessions",
                reason: "enumeration disabled".to_string(),
            });
        }
        Ok((0..state.sessions.len())
            .map(|index| MemorySession {
                backend: self.clone(),
                index,
            })
            .collect())
    }

    fn activate_volume(&self, device_id: &str) -> Result<MemoryVolume, AudioError> {
        let mut state = self.lock();
        if Self::present_device(&state, device_id).is_none() {
            return Err(AudioError::DeviceNotFound {
                device_id: device_id.to_string(),
            });
        }
        if state.denied.contains(device_id) {
            return Err(AudioError::ActivationDenied {
                device_id: device_id.to_string(),
                reason: "access denied".to_string(),
            });
        }
        state.live_volume_handles += 1;
        Ok(MemoryVolume {
            backend: self.clone(),
            device_id: device_id.to_string(),
        })
    }
}

/// Volume handle on one in-memory endpoint.
#[derive(Debug)]
pub struct MemoryVolume {
    backend: MemoryBackend,
    device_id: String,
}

impl MemoryVolume {
    /// Endpoint this handle was activated on.
    pub fn device_id(&self) -> &str {
        &self.device_id
    }

    fn check(&self, state: &MemoryState) -> Result<(), AudioError> {
        if state.fail_volume_queries {
            return Err(AudioError::QueryFailed("volume query failed".to_string()));
        }
        if MemoryBackend::present_device(state, &self.device_id).is_none() {
            return Err(AudioError::QueryFailed(format!(
                "device {} is no longer present",
                self.device_id
            )));
        }
        Ok(())
    }
}

impl EndpointVolume for MemoryVolume {
    fn master_volume(&self) -> Result<f32, AudioError> {
        let state = self.backend.lock();
        self.check(&state)?;
        if state.fail_volume_reads {
            return Err(AudioError::QueryFailed("volume read failed".to_string()));
        }
        Ok(state.volumes.get(&self.device_id).copied().unwrap_or(0.0))
    }

    fn set_master_volume(&self, level: f32) -> Result<(), AudioError> {
        let mut state = self.backend.lock();
        self.check(&state)?;
        state.volumes.insert(self.device_id.clone(), level);
        Ok(())
    }
}

impl Drop for MemoryVolume {
    fn drop(&mut self) {
        let mut state = self.backend.lock();
        state.live_volume_handles = state.live_volume_handles.saturating_sub(1);
    }
}

/// Handle to one in-memory session.
#[derive(Debug, Clone)]
pub struct MemorySession {
    backend: MemoryBackend,
    index: usize,
}

impl MemorySession {
    fn with_data<T>(&self, f: impl FnOnce(&mut SessionData) -> T) -> Result<T, AudioError> {
        let mut state = self.backend.lock();
        match state.sessions.get_mut(self.index) {
            Some(data) if !data.broken => Ok(f(data)),
            _ => Err(AudioError::QueryFailed(format!(
                "session {} disappeared",
                self.index
            ))),
        }
    }
}

impl SessionControl for MemorySession {
    fn state(&self) -> Result<SessionState, AudioError> {
        self.with_data(|data| data.state)
    }

    fn process_name(&self) -> Result<Option<String>, AudioError> {
        self.with_data(|data| data.process.clone())
    }

    fn volume(&self) -> Result<f32, AudioError> {
        self.with_data(|data| data.volume)
    }

    fn set_volume(&self, level: f32) -> Result<(), AudioError> {
        self.with_data(|data| data.volume = level)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_first_output_becomes_default() {
        let backend = MemoryBackend::new()
            .with_output("a", "Speakers")
            .with_output("b", "Headphones");
        assert_eq!(backend.default_id().as_deref(), Some("a"));
        assert_eq!(backend.default_output_device().unwrap().id, "a");
    }

    #[test]
    fn test_handles_are_counted() {
        let backend = MemoryBackend::new().with_output("a", "Speakers");
        let handle = backend.activate_volume("a").unwrap();
        assert_eq!(handle.device_id(), "a");
        assert_eq!(backend.live_volume_handles(), 1);
        drop(handle);
        assert_eq!(backend.live_volume_handles(), 0);
    }

    #[test]
    fn test_unplugged_handle_goes_stale() {
        let backend = MemoryBackend::new().with_output("a", "Speakers");
        let handle = backend.activate_volume("a").unwrap();
        assert!(handle.master_volume().is_ok());

        backend.unplug("a");
        assert!(handle.master_volume().is_err());
        assert!(matches!(
            backend.default_output_device(),
            Err(AudioError::NoDefaultDevice)
        ));
        assert!(matches!(
            backend.activate_volume("a"),
            Err(AudioError::DeviceNotFound { .. })
        ));
    }
}
