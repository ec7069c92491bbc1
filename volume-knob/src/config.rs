//! Runtime configuration.
//!
//! Nothing is persisted. Defaults can be overridden from the environment:
//! - `VOLUME_KNOB_POWERSHELL`: shell used to run the default-device helper
//! - `VOLUME_KNOB_HELPER_TIMEOUT_MS`: how long to wait for the helper

use std::path::PathBuf;
use std::time::Duration;

/// Placeholder in helper arguments replaced by the staged script path.
pub const SCRIPT_PLACEHOLDER: &str = "{script}";

/// Placeholder in helper arguments replaced by the target endpoint ID.
pub const DEVICE_ID_PLACEHOLDER: &str = "{device_id}";

/// Default helper timeout. Compiling the interop type alone takes a few
/// seconds on a cold PowerShell.
pub const DEFAULT_HELPER_TIMEOUT: Duration = Duration::from_secs(15);

const POWERSHELL_ENV: &str = "VOLUME_KNOB_POWERSHELL";
const HELPER_TIMEOUT_ENV: &str = "VOLUME_KNOB_HELPER_TIMEOUT_MS";

/// How the default-device helper process is launched.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct HelperConfig {
    /// Program to run
    pub program: PathBuf,

    /// Arguments; [`SCRIPT_PLACEHOLDER`] and [`DEVICE_ID_PLACEHOLDER`] are
    /// substituted per argument
    pub args: Vec<String>,

    /// Extension of the staged script file, including the dot
    pub script_extension: String,

    /// Wall-clock limit for one run
    pub timeout: Duration,
}

impl Default for HelperConfig {
    fn default() -> Self {
        Self {
            program: PathBuf::from("powershell.exe"),
            args: [
                "-NoProfile",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Bypass",
                "-File",
                SCRIPT_PLACEHOLDER,
                "-DeviceId",
                DEVICE_ID_PLACEHOLDER,
            ]
            .iter()
            .map(|arg| arg.to_string())
            .collect(),
            script_extension: ".ps1".to_string(),
            timeout: DEFAULT_HELPER_TIMEOUT,
        }
    }
}

impl HelperConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        let mut config = Self::default();
        if let Some(program) = std::env::var_os(POWERSHELL_ENV).filter(|p| !p.is_empty()) {
            config.program = PathBuf::from(program);
        }
        if let Some(ms) = std::env::var(HELPER_TIMEOUT_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<u64>().ok())
        {
            config.timeout = Duration::from_millis(ms);
        }
        config
    }

    /// Arguments with placeholders filled in.
    pub fn expand_args(&self, script: &str, device_id: &str) -> Vec<String> {
        self.args
            .iter()
            .map(|arg| {
                arg.replace(SCRIPT_PLACEHOLDER, script)
                    .replace(DEVICE_ID_PLACEHOLDER, device_id)
            })
            .collect()
    }
}

/// Configuration of a [`VolumeController`](crate::VolumeController).
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct ControllerConfig {
    pub helper: HelperConfig,
}

impl ControllerConfig {
    /// Defaults with environment overrides applied.
    pub fn from_env() -> Self {
        Self {
            helper: HelperConfig::from_env(),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_default_helper_is_powershell() {
        let config = HelperConfig::default();
        assert_eq!(config.program, PathBuf::from("powershell.exe"));
        assert_eq!(config.script_extension, ".ps1");
        assert_eq!(config.timeout, DEFAULT_HELPER_TIMEOUT);
    }

    #[test]
    fn test_expand_args() {
        let config = HelperConfig::default();
        let args = config.expand_args(r"C:\Temp\vk.ps1", "{0.0.0.00000000}.{guid}");
        assert_eq!(
            args,
            vec![
                "-NoProfile",
                "-NonInteractive",
                "-ExecutionPolicy",
                "Bypass",
                "-File",
                r"C:\Temp\vk.ps1",
                "-DeviceId",
                "{0.0.0.00000000}.{guid}",
            ]
        );
    }

    #[test]
    fn test_device_id_is_not_reexpanded() {
        let config = HelperConfig {
            args: vec![DEVICE_ID_PLACEHOLDER.to_string()],
            ..HelperConfig::default()
        };
        assert_eq!(config.expand_args("s", "{script}"), vec!["{script}"]);
    }
}
