//! Volume Knob - control layer
//!
//! Master volume, per-application sessions and output device selection for
//! the Volume Knob desktop widget. The UI calls into [`VolumeController`];
//! everything below it talks to the OS through [`audio::AudioBackend`].
//!
//! ## Features
//!
//! - Read, set and nudge the master volume of the controlled output device
//! - Rebind when the OS default output changes (polled, not pushed)
//! - List active application sessions and adjust their volume
//! - List selectable output devices
//! - Control a non-default device without touching the OS default
//! - Change the OS default output for every role via a helper process

pub mod audio;
pub mod binding;
pub mod config;
pub mod controller;
pub mod directory;
pub mod switcher;

pub use audio::{AudioBackend, AudioError, ErrorKind, MemoryBackend};
#[cfg(windows)]
pub use audio::WindowsAudioBackend;
pub use binding::DeviceBinding;
pub use config::{ControllerConfig, HelperConfig};
pub use controller::VolumeController;
pub use directory::{ApplicationSession, AudioSessionDirectory, OutputDevice};
pub use switcher::{HelperLauncher, OutputDeviceSwitcher, PendingSwitch, ScriptHelper};
