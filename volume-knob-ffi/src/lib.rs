//! FFI bindings for Volume Knob.
//!
//! This crate provides C ABI functions for the desktop widget. All functions
//! use panic::catch_unwind to prevent Rust panics from unwinding across the
//! FFI boundary.
//!
//! A handle owns one controller and, on Windows, the COM apartment of the
//! thread that created it. Use each handle from that thread only.

use anyhow::Context;
use serde::{Deserialize, Serialize};
use std::cell::RefCell;
use std::ffi::{c_char, c_void, CStr, CString};
use std::panic::{self, UnwindSafe};
use std::ptr;
use std::time::Duration;
use tracing::{info, warn};
use tracing_subscriber::EnvFilter;
use volume_knob::{AudioError, ControllerConfig, ErrorKind, VolumeController};

#[cfg(windows)]
type PlatformBackend = volume_knob::WindowsAudioBackend;
#[cfg(not(windows))]
type PlatformBackend = volume_knob::MemoryBackend;

// ============================================================================
// Error Handling
// ============================================================================

/// Error codes returned by FFI functions.
#[repr(i32)]
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorCode {
    Success = 0,
    InvalidHandle = -1,
    InvalidArgument = -2,
    DeviceNotFound = -3,
    ComError = -4,
    JsonError = -5,
    VolumeNotAvailable = -6,
    SwitchFailed = -7,
    HelperUnavailable = -8,
    Panic = -99,
}

impl From<&AudioError> for ErrorCode {
    fn from(err: &AudioError) -> Self {
        match err {
            AudioError::DeviceNotFound { .. } | AudioError::NoDefaultDevice => {
                ErrorCode::DeviceNotFound
            }
            AudioError::HelperSpawnFailed { .. } => ErrorCode::HelperUnavailable,
            AudioError::StringConversion(_) => ErrorCode::InvalidArgument,
            _ => match err.kind() {
                ErrorKind::BindingFailed | ErrorKind::QueryFailed => ErrorCode::VolumeNotAvailable,
                ErrorKind::SwitchFailed => ErrorCode::SwitchFailed,
                ErrorKind::EnumerationPartialFailure | ErrorKind::Fatal => ErrorCode::ComError,
            },
        }
    }
}

/// Thread-local storage for the last error.
thread_local! {
    static LAST_ERROR: RefCell<Option<(ErrorCode, String)>> = const { RefCell::new(None) };
}

fn set_last_error(code: ErrorCode, message: impl Into<String>) {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = Some((code, message.into()));
    });
}

fn clear_last_error() {
    LAST_ERROR.with(|e| {
        *e.borrow_mut() = None;
    });
}

// ============================================================================
// Data Types for JSON Serialization
// ============================================================================

/// Configuration for engine creation.
#[derive(Debug, Default, Serialize, Deserialize)]
pub struct EngineConfig {
    /// tracing filter directive, e.g. "info" or "volume_knob=debug".
    /// `RUST_LOG` wins when set.
    #[serde(default)]
    pub log_level: Option<String>,

    /// Overrides the default-device helper timeout.
    #[serde(default)]
    pub helper_timeout_ms: Option<u64>,
}

/// An application session from the last listing.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApplicationDto {
    /// Pass to the application volume functions
    pub index: usize,
    pub name: String,
}

/// A selectable output device.
#[derive(Debug, Serialize, Deserialize)]
pub struct OutputDeviceDto {
    pub name: String,
    pub id: String,
}

impl From<volume_knob::OutputDevice> for OutputDeviceDto {
    fn from(device: volume_knob::OutputDevice) -> Self {
        Self {
            name: device.name,
            id: device.id,
        }
    }
}

/// Response containing the application sessions.
#[derive(Debug, Serialize, Deserialize)]
pub struct ApplicationListResponse {
    pub applications: Vec<ApplicationDto>,
}

/// Response containing the output devices.
#[derive(Debug, Serialize, Deserialize)]
pub struct DeviceListResponse {
    pub devices: Vec<OutputDeviceDto>,
}

// ============================================================================
// Engine Handle Type
// ============================================================================

/// Opaque handle to the engine. Actually points to a VolumeEngine struct.
pub type VolumeKnobHandle = *mut c_void;

/// Internal engine state.
struct VolumeEngine {
    controller: VolumeController<PlatformBackend>,
}

fn init_logging(level: Option<&str>) {
    let filter = EnvFilter::try_from_default_env()
        .or_else(|_| EnvFilter::try_new(level.unwrap_or("info")))
        .unwrap_or_else(|_| EnvFilter::new("info"));
    // The host may already have installed a subscriber.
    let _ = tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(true)
        .try_init();
}

#[cfg(windows)]
fn open_backend() -> Result<PlatformBackend, AudioError> {
    volume_knob::WindowsAudioBackend::new()
}

#[cfg(not(windows))]
fn open_backend() -> Result<PlatformBackend, AudioError> {
    Ok(volume_knob::MemoryBackend::new())
}

fn controller_config(config: &EngineConfig) -> ControllerConfig {
    let mut controller = ControllerConfig::from_env();
    if let Some(ms) = config.helper_timeout_ms {
        controller.helper.timeout = Duration::from_millis(ms);
    }
    controller
}

fn build_engine(config: &EngineConfig) -> anyhow::Result<VolumeEngine> {
    let backend = open_backend().context("Failed to open the audio backend")?;
    let controller = VolumeController::with_config(backend, controller_config(config));
    info!(
        device = %controller.current_device_name(),
        "Volume engine created"
    );
    Ok(VolumeEngine { controller })
}

fn into_handle(engine: VolumeEngine) -> VolumeKnobHandle {
    Box::into_raw(Box::new(engine)) as VolumeKnobHandle
}

// ============================================================================
// Helper Functions
// ============================================================================

/// Allocate a C string from a Rust string. Caller must free with volume_knob_free_string.
fn alloc_c_string(s: &str) -> *mut c_char {
    // Interior NULs cannot cross the boundary; drop them.
    let cs = CString::new(s).unwrap_or_else(|_| {
        CString::new(s.replace('\0', "")).unwrap_or_default()
    });
    cs.into_raw()
}

/// Parse a C string to a Rust string slice.
unsafe fn parse_c_str<'a>(ptr: *const c_char) -> Option<&'a str> {
    if ptr.is_null() {
        return None;
    }
    CStr::from_ptr(ptr).to_str().ok()
}

/// Borrow the engine behind a handle, recording InvalidHandle if null.
unsafe fn engine<'a>(handle: VolumeKnobHandle) -> Option<&'a mut VolumeEngine> {
    let engine = (handle as *mut VolumeEngine).as_mut();
    if engine.is_none() {
        set_last_error(ErrorCode::InvalidHandle, "Null engine handle");
    }
    engine
}

/// Run `f`, turning a panic into `fallback` and a Panic error.
fn guarded<T>(what: &str, fallback: T, f: impl FnOnce() -> T + UnwindSafe) -> T {
    match panic::catch_unwind(f) {
        Ok(value) => value,
        Err(_) => {
            set_last_error(ErrorCode::Panic, format!("Panic during {what}"));
            fallback
        }
    }
}

fn to_json<T: Serialize>(value: &T) -> *mut c_char {
    match serde_json::to_string(value) {
        Ok(json) => alloc_c_string(&json),
        Err(e) => {
            set_last_error(ErrorCode::JsonError, e.to_string());
            ptr::null_mut()
        }
    }
}

/// 1 for true, 0 for false.
fn flag(value: bool) -> i32 {
    i32::from(value)
}

// ============================================================================
// FFI Functions - Lifecycle
// ============================================================================

/// Create a new engine instance bound to the default output device.
///
/// # Arguments
/// * `config_json` - JSON configuration string (can be null for defaults)
///
/// # Returns
/// Handle to the engine, or null on failure. Check volume_knob_last_error_code() on failure.
///
/// # Safety
/// The returned handle must be freed with volume_knob_destroy().
#[no_mangle]
pub extern "C" fn volume_knob_create(config_json: *const c_char) -> VolumeKnobHandle {
    clear_last_error();

    guarded("engine creation", ptr::null_mut(), || {
        let config = match unsafe { parse_c_str(config_json) } {
            Some(json) => match serde_json::from_str::<EngineConfig>(json) {
                Ok(config) => config,
                Err(e) => {
                    init_logging(None);
                    warn!(error = %e, "Ignoring malformed engine config");
                    EngineConfig::default()
                }
            },
            None => EngineConfig::default(),
        };
        init_logging(config.log_level.as_deref());

        match build_engine(&config) {
            Ok(engine) => into_handle(engine),
            Err(e) => {
                let code = e
                    .downcast_ref::<AudioError>()
                    .map(ErrorCode::from)
                    .unwrap_or(ErrorCode::ComError);
                set_last_error(code, format!("{e:#}"));
                ptr::null_mut()
            }
        }
    })
}

/// Destroy an engine instance.
///
/// # Safety
/// The handle must have been created by volume_knob_create() and must not be used after this call.
#[no_mangle]
pub extern "C" fn volume_knob_destroy(handle: VolumeKnobHandle) {
    if handle.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| unsafe {
        let _ = Box::from_raw(handle as *mut VolumeEngine);
    });
}

// ============================================================================
// FFI Functions - Master Volume
// ============================================================================

/// Get the master volume of the controlled device.
///
/// # Returns
/// Volume in [0.0, 1.0]. 0.0 if the device cannot be read.
#[no_mangle]
pub extern "C" fn volume_knob_get_master_volume(handle: VolumeKnobHandle) -> f32 {
    clear_last_error();

    guarded("get master volume", 0.0, || match unsafe { engine(handle) } {
        Some(engine) => engine.controller.master_volume(),
        None => 0.0,
    })
}

/// Set the master volume of the controlled device. Values are clamped to [0.0, 1.0].
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn volume_knob_set_master_volume(handle: VolumeKnobHandle, volume: f32) -> i32 {
    clear_last_error();

    guarded("set master volume", ErrorCode::Panic as i32, || {
        match unsafe { engine(handle) } {
            Some(engine) => {
                engine.controller.set_master_volume(volume);
                ErrorCode::Success as i32
            }
            None => ErrorCode::InvalidHandle as i32,
        }
    })
}

/// Change the master volume by `delta`, clamped to [0.0, 1.0].
///
/// # Returns
/// 0 on success, negative error code on failure.
#[no_mangle]
pub extern "C" fn volume_knob_adjust_master_volume(handle: VolumeKnobHandle, delta: f32) -> i32 {
    clear_last_error();

    guarded("adjust master volume", ErrorCode::Panic as i32, || {
        match unsafe { engine(handle) } {
            Some(engine) => {
                engine.controller.adjust_master_volume(delta);
                ErrorCode::Success as i32
            }
            None => ErrorCode::InvalidHandle as i32,
        }
    })
}

// ============================================================================
// FFI Functions - Application Sessions
// ============================================================================

/// List active application sessions.
///
/// Each call replaces the previous listing; indices refer to the latest one.
///
/// # Returns
/// JSON string `{"applications":[{"index":0,"name":"Spotify.exe"}]}`.
/// Caller must free with volume_knob_free_string(). Returns null on failure.
#[no_mangle]
pub extern "C" fn volume_knob_get_applications(handle: VolumeKnobHandle) -> *mut c_char {
    clear_last_error();

    guarded("application listing", ptr::null_mut(), || {
        let Some(engine) = (unsafe { engine(handle) }) else {
            return ptr::null_mut();
        };
        let applications = engine
            .controller
            .applications()
            .iter()
            .enumerate()
            .map(|(index, app)| ApplicationDto {
                index,
                name: app.display_name.clone(),
            })
            .collect();
        to_json(&ApplicationListResponse { applications })
    })
}

/// Get the volume of an application session from the last listing.
///
/// # Returns
/// Volume in [0.0, 1.0]. 0.0 if the session is gone.
#[no_mangle]
pub extern "C" fn volume_knob_get_application_volume(handle: VolumeKnobHandle, index: u32) -> f32 {
    clear_last_error();

    guarded("get application volume", 0.0, || match unsafe { engine(handle) } {
        Some(engine) => engine.controller.application_volume(index as usize),
        None => 0.0,
    })
}

/// Set the volume of an application session from the last listing.
///
/// # Returns
/// 1 on success, 0 if the session could not be changed, negative error code on failure.
#[no_mangle]
pub extern "C" fn volume_knob_set_application_volume(
    handle: VolumeKnobHandle,
    index: u32,
    volume: f32,
) -> i32 {
    clear_last_error();

    guarded("set application volume", ErrorCode::Panic as i32, || {
        match unsafe { engine(handle) } {
            Some(engine) => flag(
                engine
                    .controller
                    .set_application_volume(index as usize, volume),
            ),
            None => ErrorCode::InvalidHandle as i32,
        }
    })
}

// ============================================================================
// FFI Functions - Output Devices
// ============================================================================

/// List selectable output devices.
///
/// # Returns
/// JSON string `{"devices":[{"name":"Speakers","id":"{0.0.0.00000000}.{...}"}]}`.
/// Caller must free with volume_knob_free_string(). Returns null on failure.
#[no_mangle]
pub extern "C" fn volume_knob_get_output_devices(handle: VolumeKnobHandle) -> *mut c_char {
    clear_last_error();

    guarded("output device listing", ptr::null_mut(), || {
        let Some(engine) = (unsafe { engine(handle) }) else {
            return ptr::null_mut();
        };
        let devices = engine
            .controller
            .output_devices()
            .into_iter()
            .map(Into::into)
            .collect();
        to_json(&DeviceListResponse { devices })
    })
}

/// Control the volume of `device_id` without changing the OS default.
///
/// # Returns
/// 1 if now controlling the device, 0 if it could not be bound (the previous
/// device stays in control), negative error code on failure.
#[no_mangle]
pub extern "C" fn volume_knob_select_output_device(
    handle: VolumeKnobHandle,
    device_id: *const c_char,
) -> i32 {
    clear_last_error();

    guarded("select output device", ErrorCode::Panic as i32, || {
        let Some(engine) = (unsafe { engine(handle) }) else {
            return ErrorCode::InvalidHandle as i32;
        };
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "Invalid device ID");
            return ErrorCode::InvalidArgument as i32;
        };
        flag(engine.controller.select_output_device(device_id))
    })
}

/// Make `device_id` the OS default output for every role, then control it.
///
/// Blocks while the helper process runs.
///
/// # Returns
/// 1 on success, 0 if the switch was refused, negative error code if the
/// helper could not be started.
#[no_mangle]
pub extern "C" fn volume_knob_set_default_output_device(
    handle: VolumeKnobHandle,
    device_id: *const c_char,
) -> i32 {
    clear_last_error();

    guarded("set default output device", ErrorCode::Panic as i32, || {
        let Some(engine) = (unsafe { engine(handle) }) else {
            return ErrorCode::InvalidHandle as i32;
        };
        let Some(device_id) = (unsafe { parse_c_str(device_id) }) else {
            set_last_error(ErrorCode::InvalidArgument, "Invalid device ID");
            return ErrorCode::InvalidArgument as i32;
        };
        match engine.controller.set_default_output_device(device_id) {
            Ok(switched) => flag(switched),
            Err(e) => {
                let code = ErrorCode::from(&e);
                set_last_error(code, e.to_string());
                code as i32
            }
        }
    })
}

/// Rebind to the current OS default output.
///
/// # Returns
/// 1 on success, 0 if no default could be bound, negative error code on failure.
#[no_mangle]
pub extern "C" fn volume_knob_force_rebind(handle: VolumeKnobHandle) -> i32 {
    clear_last_error();

    guarded("force rebind", ErrorCode::Panic as i32, || {
        match unsafe { engine(handle) } {
            Some(engine) => flag(engine.controller.force_rebind()),
            None => ErrorCode::InvalidHandle as i32,
        }
    })
}

/// Rebind if the OS default output changed since the last bind. Meant to be polled.
///
/// # Returns
/// 1 if the engine rebound, 0 otherwise, negative error code on failure.
#[no_mangle]
pub extern "C" fn volume_knob_detect_default_changed(handle: VolumeKnobHandle) -> i32 {
    clear_last_error();

    guarded("default change detection", ErrorCode::Panic as i32, || {
        match unsafe { engine(handle) } {
            Some(engine) => flag(engine.controller.detect_default_changed()),
            None => ErrorCode::InvalidHandle as i32,
        }
    })
}

/// Friendly name of the controlled device.
///
/// # Returns
/// Name string. Caller must free with volume_knob_free_string(). Returns null on failure.
#[no_mangle]
pub extern "C" fn volume_knob_current_device_name(handle: VolumeKnobHandle) -> *mut c_char {
    clear_last_error();

    guarded("current device name", ptr::null_mut(), || {
        match unsafe { engine(handle) } {
            Some(engine) => alloc_c_string(&engine.controller.current_device_name()),
            None => ptr::null_mut(),
        }
    })
}

// ============================================================================
// FFI Functions - Memory Management
// ============================================================================

/// Free a string allocated by this library.
///
/// # Safety
/// The pointer must have been returned by one of the volume_knob_* functions.
/// Do not call this on strings from other sources.
#[no_mangle]
pub extern "C" fn volume_knob_free_string(ptr: *mut c_char) {
    if ptr.is_null() {
        return;
    }

    let _ = panic::catch_unwind(|| unsafe {
        let _ = CString::from_raw(ptr);
    });
}

// ============================================================================
// FFI Functions - Error Handling
// ============================================================================

/// Get the last error code.
///
/// # Returns
/// The error code from the last failed operation, or 0 if no error.
#[no_mangle]
pub extern "C" fn volume_knob_last_error_code() -> i32 {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(code, _)| *code as i32)
            .unwrap_or(0)
    })
}

/// Get the last error message.
///
/// # Returns
/// Error message string. Caller must free with volume_knob_free_string().
/// Returns null if no error.
#[no_mangle]
pub extern "C" fn volume_knob_last_error_message() -> *mut c_char {
    LAST_ERROR.with(|e| {
        e.borrow()
            .as_ref()
            .map(|(_, msg)| alloc_c_string(msg))
            .unwrap_or(ptr::null_mut())
    })
}

// ============================================================================
// FFI Functions - Utility
// ============================================================================

/// Get the library version.
///
/// # Returns
/// Version string. Caller must free with volume_knob_free_string().
#[no_mangle]
pub extern "C" fn volume_knob_version() -> *mut c_char {
    alloc_c_string(env!("CARGO_PKG_VERSION"))
}

// ============================================================================
// Tests
// ============================================================================
