//! Listing of application sessions and selectable output devices.

use crate::audio::{
    resolve_friendly_name, session_display_name, AudioBackend, AudioError, DeviceRecord,
    SessionControl, SessionState,
};
use std::collections::HashSet;
use tracing::{debug, warn};

/// Name fragments of input-oriented endpoints that are never offered as
/// outputs. Compared against the lower-cased friendly name.
pub const INPUT_NAME_KEYWORDS: [&str; 6] = [
    "microphone",
    "hands-free",
    "hands free",
    "headset (",
    "line in",
    "line-in",
];

/// An active application session from one listing pass.
#[derive(Debug, Clone)]
pub struct ApplicationSession<S> {
    /// Capitalized process name, or "System Sounds"
    pub display_name: String,

    /// Handle for per-session volume, valid until the next listing
    pub session: S,
}

/// A selectable output device.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OutputDevice {
    pub name: String,
    pub id: String,
}

/// True if a device name looks like an input endpoint.
pub fn is_input_like(name: &str) -> bool {
    let lower = name.to_lowercase();
    INPUT_NAME_KEYWORDS.iter().any(|keyword| lower.contains(keyword))
}

/// Read-only view of sessions and devices through a backend.
pub struct AudioSessionDirectory<'a, B> {
    backend: &'a B,
}

impl<'a, B: AudioBackend> AudioSessionDirectory<'a, B> {
    pub fn new(backend: &'a B) -> Self {
        Self { backend }
    }

    /// Active sessions in OS order.
    ///
    /// Sessions that fail a query are skipped; the rest are still returned.
    pub fn list_applications(&self) -> Vec<ApplicationSession<B::Session>> {
        let sessions = match self.backend.sessions() {
            Ok(sessions) => sessions,
            Err(e) => {
                warn!(error = %e, "Session enumeration failed");
                return Vec::new();
            }
        };

        sessions
            .into_iter()
            .enumerate()
            .filter_map(|(index, session)| match Self::describe(&session) {
                Ok(Some(display_name)) => Some(ApplicationSession {
                    display_name,
                    session,
                }),
                Ok(None) => None,
                Err(e) => {
                    debug!(index, error = %e, "Skipping session");
                    None
                }
            })
            .collect()
    }

    /// Display name of an active session, `None` for inactive ones.
    fn describe(session: &B::Session) -> Result<Option<String>, AudioError> {
        if session.state()? != SessionState::Active {
            return Ok(None);
        }
        let process = session.process_name()?;
        Ok(Some(session_display_name(process.as_deref())))
    }

    /// Active output devices, de-duplicated by ID, without input-like names.
    ///
    /// Falls back to the default endpoint alone if nothing else qualifies.
    pub fn list_output_devices(&self) -> Vec<OutputDevice> {
        let enumerated = self.backend.all_devices().unwrap_or_else(|e| {
            warn!(error = %e, "Device enumeration failed");
            Vec::new()
        });

        let mut seen = HashSet::new();
        let devices: Vec<OutputDevice> = enumerated
            .iter()
            .filter(|d| d.is_render_active() && !d.id.is_empty())
            .filter_map(|d| d.name().map(|name| (name, d)))
            .filter(|(name, _)| !is_input_like(name))
            .filter(|(_, d)| seen.insert(d.id.clone()))
            .map(|(name, d)| OutputDevice {
                name: name.to_string(),
                id: d.id.clone(),
            })
            .collect();

        if !devices.is_empty() {
            debug!(count = devices.len(), "Listed output devices");
            return devices;
        }

        match self.backend.default_output_device() {
            Ok(default) => {
                debug!(device_id = %default.id, "No selectable outputs, offering default only");
                vec![Self::default_entry(&default, &enumerated)]
            }
            Err(e) => {
                warn!(error = %e, "No output devices available");
                Vec::new()
            }
        }
    }

    fn default_entry(default: &DeviceRecord, enumerated: &[DeviceRecord]) -> OutputDevice {
        OutputDevice {
            name: resolve_friendly_name(default, enumerated),
            id: default.id.clone(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{DataFlow, DeviceState, MemoryBackend, SYSTEM_SOUNDS};

    #[test]
    fn test_is_input_like() {
        assert!(is_input_like("Microphone (USB Audio)"));
        assert!(is_input_like("Headset (Hands-Free AG Audio)"));
        assert!(is_input_like("Line In (Realtek)"));
        assert!(!is_input_like("Speakers (Realtek)"));
        assert!(!is_input_like("Headset Earphone"));
    }

    #[test]
    fn test_list_applications_filters_and_names() {
        let backend = MemoryBackend::new().with_output("a", "Speakers");
        backend.add_session(Some("spotify.exe"), SessionState::Active);
        backend.add_session(Some("idle.exe"), SessionState::Inactive);
        backend.add_session(None, SessionState::Active);
        backend.add_session(Some("gone.exe"), SessionState::Expired);

        let apps = AudioSessionDirectory::new(&backend).list_applications();
        let names: Vec<_> = apps.iter().map(|a| a.display_name.as_str()).collect();
        assert_eq!(names, vec!["Spotify.exe", SYSTEM_SOUNDS]);
    }

    #[test]
    fn test_list_applications_skips_broken_session() {
        let backend = MemoryBackend::new();
        backend.add_session(Some("a.exe"), SessionState::Active);
        let broken = backend.add_session(Some("b.exe"), SessionState::Active);
        backend.add_session(Some("c.exe"), SessionState::Active);
        backend.break_session(broken);

        let apps = AudioSessionDirectory::new(&backend).list_applications();
        let names: Vec<_> = apps.iter().map(|a| a.display_name.as_str()).collect();
        assert_eq!(names, vec!["A.exe", "C.exe"]);
    }

    #[test]
    fn test_list_applications_enumeration_failure() {
        let backend = MemoryBackend::new();
        backend.add_session(Some("a.exe"), SessionState::Active);
        backend.fail_enumeration(true);

        assert!(AudioSessionDirectory::new(&backend).list_applications().is_empty());
    }

    #[test]
    fn test_list_output_devices_filters() {
        let backend = MemoryBackend::new()
            .with_output("a", "Speakers (Realtek)")
            .with_output("mic", "Microphone (USB)")
            .with_output("hf", "Headset (Hands-Free)");
        backend.add_device(DeviceRecord::output("a", Some("Speakers (Realtek)")));
        backend.add_device(DeviceRecord::output("noname", None));

        let mut capture = DeviceRecord::output("cap", Some("Stereo Mix"));
        capture.flow = DataFlow::Capture;
        backend.add_device(capture);

        let mut disabled = DeviceRecord::output("off", Some("HDMI Output"));
        disabled.state = DeviceState::Disabled;
        backend.add_device(disabled);

        backend.add_device(DeviceRecord::output("b", Some("Headphones")));

        let devices = AudioSessionDirectory::new(&backend).list_output_devices();
        assert_eq!(
            devices,
            vec![
                OutputDevice {
                    name: "Speakers (Realtek)".to_string(),
                    id: "a".to_string()
                },
                OutputDevice {
                    name: "Headphones".to_string(),
                    id: "b".to_string()
                },
            ]
        );
    }

    #[test]
    fn test_list_output_devices_dedups_by_id() {
        let backend = MemoryBackend::new().with_output("a", "Speakers");
        backend.add_duplicate_device(DeviceRecord::output("a", Some("Speakers (2)")));

        let devices = AudioSessionDirectory::new(&backend).list_output_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].name, "Speakers");
    }

    #[test]
    fn test_list_output_devices_falls_back_to_default() {
        let backend = MemoryBackend::new().with_output("hf", "Headset (Hands-Free)");
        backend.set_default(Some("hf"));

        let devices = AudioSessionDirectory::new(&backend).list_output_devices();
        assert_eq!(devices.len(), 1);
        assert_eq!(devices[0].id, "hf");
    }

    #[test]
    fn test_list_output_devices_empty_without_default() {
        let backend = MemoryBackend::new();
        assert!(AudioSessionDirectory::new(&backend).list_output_devices().is_empty());
    }
}
