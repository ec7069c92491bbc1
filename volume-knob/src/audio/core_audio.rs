//! Windows Core Audio backend.
//!
//! Endpoint enumeration and default lookup go through the MMDevice API,
//! master volume through IAudioEndpointVolume, and application sessions
//! through IAudioSessionManager2 on the default render endpoint.

use super::backend::{AudioBackend, EndpointVolume, SessionControl};
use super::device::{AudioError, DataFlow, DeviceRecord, DeviceState, SessionState};
use std::path::Path;
use tracing::debug;
use windows::core::{Interface, PCWSTR, PWSTR};
use windows::Win32::Devices::Properties::DEVPKEY_Device_FriendlyName;
use windows::Win32::Foundation::{CloseHandle, MAX_PATH};
use windows::Win32::Media::Audio::Endpoints::IAudioEndpointVolume;
use windows::Win32::Media::Audio::{
    eAll, eCapture, eMultimedia, eRender, AudioSessionStateActive, AudioSessionStateExpired,
    IAudioSessionControl2, IAudioSessionManager2, IMMDevice, IMMDeviceEnumerator, IMMEndpoint,
    ISimpleAudioVolume, MMDeviceEnumerator, DEVICE_STATEMASK_ALL,
};
use windows::Win32::System::Com::{
    CoCreateInstance, CoInitializeEx, CoTaskMemFree, CoUninitialize, CLSCTX_ALL,
    COINIT_APARTMENTTHREADED, STGM,
};
use windows::Win32::System::Threading::{
    OpenProcess, QueryFullProcessImageNameW, PROCESS_NAME_WIN32,
    PROCESS_QUERY_LIMITED_INFORMATION,
};
use windows::Win32::UI::Shell::PropertiesSystem::{IPropertyStore, PROPERTYKEY};

/// COM initialization guard that uninitializes COM on drop.
pub struct ComGuard {
    initialized: bool,
}

impl ComGuard {
    /// Initialize COM for the current thread.
    pub fn new() -> Result<Self, AudioError> {
        unsafe {
            // Use apartment-threaded for UI compatibility
            CoInitializeEx(None, COINIT_APARTMENTTHREADED)
                .ok()
                .map_err(AudioError::ComInitFailed)?;
        }
        Ok(Self { initialized: true })
    }
}

impl Drop for ComGuard {
    fn drop(&mut self) {
        if self.initialized {
            unsafe {
                CoUninitialize();
            }
        }
    }
}

/// Core Audio backend bound to the thread that created it.
pub struct WindowsAudioBackend {
    enumerator: IMMDeviceEnumerator,
    // Declared last so COM outlives the enumerator.
    _com: ComGuard,
}

impl WindowsAudioBackend {
    /// Initialize COM on this thread and create the device enumerator.
    pub fn new() -> Result<Self, AudioError> {
        let com = ComGuard::new()?;
        let enumerator: IMMDeviceEnumerator = unsafe {
            CoCreateInstance(&MMDeviceEnumerator, None, CLSCTX_ALL).map_err(|e| {
                AudioError::EnumerationFailed {
                    what: "device enumerator",
                    reason: e.to_string(),
                }
            })?
        };

        Ok(Self {
            enumerator,
            _com: com,
        })
    }

    fn device_by_id(&self, device_id: &str) -> Result<IMMDevice, AudioError> {
        let device_id_wide: Vec<u16> = device_id.encode_utf16().chain(std::iter::once(0)).collect();
        unsafe {
            self.enumerator
                .GetDevice(PCWSTR::from_raw(device_id_wide.as_ptr()))
                .map_err(|_| AudioError::DeviceNotFound {
                    device_id: device_id.to_string(),
                })
        }
    }

    /// Build a record from an IMMDevice. Only the ID is mandatory.
    fn device_record(device: &IMMDevice) -> Result<DeviceRecord, AudioError> {
        let id = device_id(device)?;
        let state = unsafe { device.GetState() }
            .map(|s| DeviceState::from_raw(s.0))
            .unwrap_or(DeviceState::NotPresent);
        let flow = match device
            .cast::<IMMEndpoint>()
            .and_then(|e| unsafe { e.GetDataFlow() })
        {
            Ok(flow) if flow == eCapture => DataFlow::Capture,
            _ => DataFlow::Render,
        };

        Ok(DeviceRecord {
            id,
            friendly_name: friendly_name(device),
            flow,
            state,
        })
    }
}

impl AudioBackend for WindowsAudioBackend {
    type Volume = WindowsEndpointVolume;
    type Session = WindowsSession;

    fn default_output_device(&self) -> Result<DeviceRecord, AudioError> {
        let device = unsafe { self.enumerator.GetDefaultAudioEndpoint(eRender, eMultimedia) }
            .map_err(|_| AudioError::NoDefaultDevice)?;
        Self::device_record(&device)
    }

    fn all_devices(&self) -> Result<Vec<DeviceRecord>, AudioError> {
        let enumeration_failed = |e: windows::core::Error| AudioError::EnumerationFailed {
            what: "devices",
            reason: e.to_string(),
        };

        unsafe {
            let collection = self
                .enumerator
                .EnumAudioEndpoints(eAll, DEVICE_STATEMASK_ALL)
                .map_err(enumeration_failed)?;
            let count = collection.GetCount().map_err(enumeration_failed)?;

            let mut devices = Vec::with_capacity(count as usize);
            for i in 0..count {
                let record = collection
                    .Item(i)
                    .map_err(enumeration_failed)
                    .and_then(|device| Self::device_record(&device));
                match record {
                    Ok(record) => devices.push(record),
                    Err(e) => debug!(index = i, error = %e, "Skipping unreadable device"),
                }
            }

            Ok(devices)
        }
    }

    fn sessions(&self) -> Result<Vec<WindowsSession>, AudioError> {
        let enumeration_failed = |e: windows::core::Error| AudioError::EnumerationFailed {
            what: "sessions",
            reason: e.to_string(),
        };

        unsafe {
            let device = self
                .enumerator
                .GetDefaultAudioEndpoint(eRender, eMultimedia)
                .map_err(|_| AudioError::NoDefaultDevice)?;
            let manager: IAudioSessionManager2 = device
                .Activate(CLSCTX_ALL, None)
                .map_err(enumeration_failed)?;
            let sessions = manager.GetSessionEnumerator().map_err(enumeration_failed)?;
            let count = sessions.GetCount().map_err(enumeration_failed)?;

            let mut result = Vec::with_capacity(count.max(0) as usize);
            for i in 0..count {
                let session = sessions.GetSession(i).and_then(|control| {
                    Ok(WindowsSession {
                        control: control.cast()?,
                        volume: control.cast()?,
                    })
                });
                match session {
                    Ok(session) => result.push(session),
                    Err(e) => debug!(index = i, error = %e, "Skipping unreadable session"),
                }
            }

            Ok(result)
        }
    }

    fn activate_volume(&self, device_id: &str) -> Result<WindowsEndpointVolume, AudioError> {
        let device = self.device_by_id(device_id)?;
        unsafe {
            let endpoint_volume: IAudioEndpointVolume = device
                .Activate(CLSCTX_ALL, None)
                .map_err(|e| AudioError::ActivationDenied {
                    device_id: device_id.to_string(),
                    reason: e.to_string(),
                })?;

            Ok(WindowsEndpointVolume { endpoint_volume })
        }
    }
}

/// Master volume of one endpoint via IAudioEndpointVolume.
pub struct WindowsEndpointVolume {
    endpoint_volume: IAudioEndpointVolume,
}

impl EndpointVolume for WindowsEndpointVolume {
    fn master_volume(&self) -> Result<f32, AudioError> {
        unsafe {
            self.endpoint_volume
                .GetMasterVolumeLevelScalar()
                .map_err(AudioError::WindowsError)
        }
    }

    fn set_master_volume(&self, level: f32) -> Result<(), AudioError> {
        unsafe {
            self.endpoint_volume
                .SetMasterVolumeLevelScalar(level, std::ptr::null())
                .map_err(AudioError::WindowsError)
        }
    }
}

/// One application session.
pub struct WindowsSession {
    control: IAudioSessionControl2,
    volume: ISimpleAudioVolume,
}

impl SessionControl for WindowsSession {
    fn state(&self) -> Result<SessionState, AudioError> {
        let state = unsafe { self.control.GetState() }
            .map_err(AudioError::WindowsError)?;
        Ok(if state == AudioSessionStateActive {
            SessionState::Active
        } else if state == AudioSessionStateExpired {
            SessionState::Expired
        } else {
            SessionState::Inactive
        })
    }

    fn process_name(&self) -> Result<Option<String>, AudioError> {
        let pid = unsafe { self.control.GetProcessId() }
            .map_err(AudioError::WindowsError)?;
        if pid == 0 {
            return Ok(None);
        }
        Ok(process_image_name(pid))
    }

    fn volume(&self) -> Result<f32, AudioError> {
        unsafe { self.volume.GetMasterVolume() }
            .map_err(AudioError::WindowsError)
    }

    fn set_volume(&self, level: f32) -> Result<(), AudioError> {
        unsafe { self.volume.SetMasterVolume(level, std::ptr::null()) }
            .map_err(AudioError::WindowsError)
    }
}

fn device_id(device: &IMMDevice) -> Result<String, AudioError> {
    unsafe {
        let id: PWSTR = device.GetId().map_err(AudioError::WindowsError)?;
        let id_string = id
            .to_string()
            .map_err(|e| AudioError::StringConversion(e.to_string()));
        CoTaskMemFree(Some(id.0 as *const _));
        id_string
    }
}

/// Get the friendly name of a device from its property store.
fn friendly_name(device: &IMMDevice) -> Option<String> {
    unsafe {
        let props: IPropertyStore = device.OpenPropertyStore(STGM(0)).ok()?;

        // Convert DEVPROPKEY to PROPERTYKEY
        let key = PROPERTYKEY {
            fmtid: DEVPKEY_Device_FriendlyName.fmtid,
            pid: DEVPKEY_Device_FriendlyName.pid,
        };
        let prop = props.GetValue(&key).ok()?;

        let name = prop.to_string();
        if name.is_empty() {
            None
        } else {
            Some(name)
        }
    }
}

/// Executable file name of a process, if it can still be opened.
fn process_image_name(pid: u32) -> Option<String> {
    unsafe {
        let handle = OpenProcess(PROCESS_QUERY_LIMITED_INFORMATION, false, pid)
            .ok()?;
        let mut buffer = [0u16; MAX_PATH as usize];
        let mut size = buffer.len() as u32;
        let queried = QueryFullProcessImageNameW(
            handle,
            PROCESS_NAME_WIN32,
            PWSTR(buffer.as_mut_ptr()),
            &mut size,
        );
        let _ = CloseHandle(handle);
        queried.ok()?;

        let full_path = String::from_utf16_lossy(&buffer[..size as usize]);
        Path::new(&full_path)
            .file_name()
            .map(|name| name.to_string_lossy().into_owned())
    }
}
