//! Audio module: the OS adapter seam and its implementations.
//!
//! The control layer above only sees [`AudioBackend`] and the records it
//! produces. Windows builds get the Core Audio backend; every build gets the
//! in-memory one.

pub mod backend;
#[cfg(windows)]
pub mod core_audio;
pub mod device;
pub mod memory;
pub mod names;

pub use backend::{AudioBackend, EndpointVolume, SessionControl};
#[cfg(windows)]
pub use core_audio::WindowsAudioBackend;
pub use device::{
    AudioError, DataFlow, DeviceRecord, DeviceState, ErrorKind, SessionState, GENERIC_OUTPUT_NAME,
};
pub use memory::MemoryBackend;
pub use names::{resolve_friendly_name, session_display_name, SYSTEM_SOUNDS};
