//! Audio endpoint data models.
//!
//! Defines the device-metadata record the OS adapter produces, the state
//! enums shared by devices and sessions, and the error taxonomy of the
//! control layer.

use thiserror::Error;

/// Placeholder shown when no better name for an output device can be found.
pub const GENERIC_OUTPUT_NAME: &str = "Output Device";

/// One audio endpoint as reported by the OS audio subsystem.
///
/// Never constructed by the control layer itself; records come from an
/// [`AudioBackend`](super::AudioBackend) enumeration or default lookup and
/// go stale as soon as the OS removes or disables the device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct DeviceRecord {
    /// Opaque endpoint ID (from IMMDevice::GetId). Key for equality.
    pub id: String,

    /// Friendly name, when the OS populated it for this query.
    pub friendly_name: Option<String>,

    /// Render (output) or capture (input)
    pub flow: DataFlow,

    /// Current device state
    pub state: DeviceState,
}

impl DeviceRecord {
    /// Create an active render device record.
    pub fn output(id: impl Into<String>, friendly_name: Option<&str>) -> Self {
        Self {
            id: id.into(),
            friendly_name: friendly_name.map(str::to_string),
            flow: DataFlow::Render,
            state: DeviceState::Active,
        }
    }

    /// The friendly name if present and non-empty.
    pub fn name(&self) -> Option<&str> {
        self.friendly_name
            .as_deref()
            .map(str::trim)
            .filter(|name| !name.is_empty())
    }

    /// True for active output devices.
    pub fn is_render_active(&self) -> bool {
        self.flow == DataFlow::Render && self.state == DeviceState::Active
    }
}

/// Direction of an endpoint (maps to Windows EDataFlow).
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum DataFlow {
    Render,
    Capture,
}

/// Windows device state flags.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeviceState {
    /// Device is active and available for use
    Active,

    /// Device is disabled in Windows Sound settings
    Disabled,

    /// Device is not present (driver issue)
    NotPresent,

    /// Device is unplugged (for pluggable devices)
    Unplugged,
}

impl DeviceState {
    /// Convert a raw DEVICE_STATE_* flag.
    pub fn from_raw(state: u32) -> Self {
        match state {
            1 => DeviceState::Active,
            2 => DeviceState::Disabled,
            8 => DeviceState::Unplugged,
            _ => DeviceState::NotPresent,
        }
    }
}

/// State of a per-application audio session (maps to AudioSessionState).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SessionState {
    Inactive,
    Active,
    Expired,
}

/// Failure classes of the control layer.
///
/// Everything except [`ErrorKind::Fatal`] is recoverable and is turned into a
/// safe default or a `false` before it reaches the UI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// No device, or activation denied. Prior binding is kept.
    BindingFailed,

    /// A read or write against a bound handle failed.
    QueryFailed,

    /// One item of a listing could not be read and was skipped.
    EnumerationPartialFailure,

    /// The default-device helper reported failure or garbled output.
    SwitchFailed,

    /// The environment cannot run the helper at all.
    Fatal,
}

/// Audio service error types.
#[derive(Debug, Error)]
pub enum AudioError {
    #[error("Device not found: {device_id}")]
    DeviceNotFound { device_id: String },

    #[error("No default output device available")]
    NoDefaultDevice,

    #[error("Volume activation denied for {device_id}: {reason}")]
    ActivationDenied { device_id: String, reason: String },

    #[error("No output device is bound")]
    NotBound,

    #[error("Audio query failed: {0}")]
    QueryFailed(String),

    #[error("Failed to enumerate {what}: {reason}")]
    EnumerationFailed { what: &'static str, reason: String },

    #[error("Default device switch failed: {0}")]
    SwitchFailed(String),

    #[error("Failed to launch helper {program}: {source}")]
    HelperSpawnFailed {
        program: String,
        #[source]
        source: std::io::Error,
    },

    #[error("String conversion error: {0}")]
    StringConversion(String),

    #[cfg(windows)]
    #[error("COM initialization failed: {0}")]
    ComInitFailed(#[source] windows::core::Error),

    #[cfg(windows)]
    #[error("Windows API error: {0}")]
    WindowsError(#[source] windows::core::Error),
}

impl AudioError {
    /// Classify this error.
    pub fn kind(&self) -> ErrorKind {
        match self {
            AudioError::DeviceNotFound { .. }
            | AudioError::NoDefaultDevice
            | AudioError::ActivationDenied { .. }
            | AudioError::NotBound => ErrorKind::BindingFailed,
            AudioError::QueryFailed(_) | AudioError::StringConversion(_) => ErrorKind::QueryFailed,
            AudioError::EnumerationFailed { .. } => ErrorKind::EnumerationPartialFailure,
            AudioError::SwitchFailed(_) => ErrorKind::SwitchFailed,
            AudioError::HelperSpawnFailed { .. } => ErrorKind::Fatal,
            #[cfg(windows)]
            AudioError::ComInitFailed(_) => ErrorKind::Fatal,
            #[cfg(windows)]
            AudioError::WindowsError(_) => ErrorKind::QueryFailed,
        }
    }

    /// True if this error points at a broken environment rather than a
    /// transient device condition.
    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }
}
