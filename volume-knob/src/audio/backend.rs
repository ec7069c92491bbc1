//! The OS audio adapter seam.
//!
//! Everything above this module talks to the audio subsystem only through
//! these traits. One implementation exists per platform audio API, plus an
//! in-memory one.

use super::device::{AudioError, DeviceRecord, SessionState};

/// Query surface of the OS audio subsystem.
pub trait AudioBackend {
    /// Exclusively owned master-volume handle for one endpoint.
    /// Dropping it releases the native interface.
    type Volume: EndpointVolume;

    /// Handle to one per-application session, valid for one listing pass.
    type Session: SessionControl;

    /// Current default output endpoint.
    fn default_output_device(&self) -> Result<DeviceRecord, AudioError>;

    /// Every endpoint the OS knows about, in any state and direction.
    fn all_devices(&self) -> Result<Vec<DeviceRecord>, AudioError>;

    /// Sessions of the engine that is currently mixing.
    fn sessions(&self) -> Result<Vec<Self::Session>, AudioError>;

    /// Activate a master-volume interface on the given endpoint.
    fn activate_volume(&self, device_id: &str) -> Result<Self::Volume, AudioError>;
}

/// Master volume of one endpoint, as a scalar in [0.0, 1.0].
pub trait EndpointVolume {
    fn master_volume(&self) -> Result<f32, AudioError>;
    fn set_master_volume(&self, level: f32) -> Result<(), AudioError>;
}

/// One per-application audio session.
pub trait SessionControl {
    fn state(&self) -> Result<SessionState, AudioError>;

    /// Name of the owning process.
    ///
    /// `Ok(None)` when no process is attached (system sounds) or the process
    /// could not be resolved any more.
    fn process_name(&self) -> Result<Option<String>, AudioError>;

    fn volume(&self) -> Result<f32, AudioError>;
    fn set_volume(&self, level: f32) -> Result<(), AudioError>;
}
