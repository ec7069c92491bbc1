//! Display-name resolution for devices and sessions.

use super::device::{DeviceRecord, GENERIC_OUTPUT_NAME};

/// Display name used for sessions without an owning process.
pub const SYSTEM_SOUNDS: &str = "System Sounds";

/// Resolve the friendly name of `device`.
///
/// Single-device queries do not always carry the name, while a full
/// enumeration does. First hit wins:
/// 1. the name already on the record
/// 2. the name of the enumerated device with the same ID
/// 3. the first active output device in the enumeration that has a name
/// 4. the raw ID, or [`GENERIC_OUTPUT_NAME`] if even that is empty
pub fn resolve_friendly_name(device: &DeviceRecord, enumerated: &[DeviceRecord]) -> String {
    if let Some(name) = device.name() {
        return name.to_string();
    }

    if let Some(name) = enumerated
        .iter()
        .find(|d| d.id == device.id)
        .and_then(DeviceRecord::name)
    {
        return name.to_string();
    }

    if let Some(name) = enumerated
        .iter()
        .filter(|d| d.is_render_active())
        .find_map(DeviceRecord::name)
    {
        return name.to_string();
    }

    if device.id.trim().is_empty() {
        GENERIC_OUTPUT_NAME.to_string()
    } else {
        device.id.clone()
    }
}

/// Display name for a session owned by `process_name`.
pub fn session_display_name(process_name: Option<&str>) -> String {
    match process_name.map(str::trim).filter(|name| !name.is_empty()) {
        Some(name) => capitalize(name),
        None => SYSTEM_SOUNDS.to_string(),
    }
}

/// Upper-case the first character and lower-case the rest.
fn capitalize(name: &str) -> String {
    let mut chars = name.chars();
    match chars.next() {
        Some(first) => first
            .to_uppercase()
            .chain(chars.flat_map(char::to_lowercase))
            .collect(),
        None => String::new(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::audio::{DataFlow, DeviceState};

    fn unnamed(id: &str) -> DeviceRecord {
        DeviceRecord::output(id, None)
    }

    #[test]
    fn test_cached_name_wins() {
        let device = DeviceRecord::output("a", Some("Speakers"));
        let enumerated = vec![DeviceRecord::output("a", Some("Other"))];
        assert_eq!(resolve_friendly_name(&device, &enumerated), "Speakers");
    }

    #[test]
    fn test_name_from_enumeration_by_id() {
        let enumerated = vec![
            DeviceRecord::output("b", Some("Headphones")),
            DeviceRecord::output("a", Some("Speakers")),
        ];
        assert_eq!(
            resolve_friendly_name(&unnamed("a"), &enumerated),
            "Speakers"
        );
    }

    #[test]
    fn test_falls_back_to_first_active_output() {
        let mut capture = DeviceRecord::output("mic", Some("Microphone"));
        capture.flow = DataFlow::Capture;
        let mut unplugged = DeviceRecord::output("old", Some("Old DAC"));
        unplugged.state = DeviceState::Unplugged;

        let enumerated = vec![
            capture,
            unplugged,
            unnamed("a"),
            DeviceRecord::output("b", Some("Headphones")),
        ];
        assert_eq!(
            resolve_friendly_name(&unnamed("a"), &enumerated),
            "Headphones"
        );
    }

    #[test]
    fn test_falls_back_to_id_then_placeholder() {
        assert_eq!(
            resolve_friendly_name(&unnamed("{0.0.0}.{abc}"), &[]),
            "{0.0.0}.{abc}"
        );
        assert_eq!(resolve_friendly_name(&unnamed(""), &[]), GENERIC_OUTPUT_NAME);
    }

    #[test]
    fn test_session_display_name() {
        assert_eq!(session_display_name(Some("chrome.exe")), "Chrome.exe");
        assert_eq!(session_display_name(Some("SPOTIFY.EXE")), "Spotify.exe");
        assert_eq!(session_display_name(Some("")), SYSTEM_SOUNDS);
        assert_eq!(session_display_name(None), SYSTEM_SOUNDS);
    }
}
