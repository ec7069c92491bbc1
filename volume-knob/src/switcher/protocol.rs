//! Result protocol of the default-device helper.
//!
//! The helper prints `PSRETURN:<int>` on stdout and exits with a status.
//! A switch succeeded only if the marker is present, parses, equals 0, and
//! the process exit status is 0 too.

use thiserror::Error;

/// Prefix of the result line.
pub const RETURN_MARKER: &str = "PSRETURN:";

/// Everything captured from one helper run.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct HelperOutput {
    pub stdout: String,
    pub stderr: String,

    /// Process exit code; `None` if it was terminated by a signal
    pub exit_code: Option<i32>,
}

/// Why a helper's stdout could not be decoded.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum MarkerError {
    /// No `PSRETURN:` anywhere in the output.
    #[error("no PSRETURN line in helper output")]
    Missing,

    /// Marker present but not followed by an integer.
    #[error("PSRETURN not followed by an integer: {0:?}")]
    Malformed(String),
}

/// Outcome of one helper run.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SwitchVerdict {
    Succeeded,

    /// Marker and exit status decoded, at least one non-zero.
    Rejected { code: i64, exit_code: Option<i32> },

    /// Output did not carry a usable marker.
    Unreadable {
        error: MarkerError,
        exit_code: Option<i32>,
    },
}

impl SwitchVerdict {
    pub fn is_success(&self) -> bool {
        matches!(self, SwitchVerdict::Succeeded)
    }
}

/// Decode the return code from helper stdout. The first marker decides.
pub fn parse_return_marker(stdout: &str) -> Result<i64, MarkerError> {
    let at = stdout.find(RETURN_MARKER).ok_or(MarkerError::Missing)?;
    let rest = &stdout[at + RETURN_MARKER.len()..];

    let token = rest.split_whitespace().next().unwrap_or("");
    if rest.starts_with(char::is_whitespace) || token.is_empty() {
        return Err(MarkerError::Malformed(String::new()));
    }
    token
        .parse::<i64>()
        .map_err(|_| MarkerError::Malformed(token.to_string()))
}

/// Judge a helper run.
pub fn judge(output: &HelperOutput) -> SwitchVerdict {
    match parse_return_marker(&output.stdout) {
        Ok(0) if output.exit_code == Some(0) => SwitchVerdict::Succeeded,
        Ok(code) => SwitchVerdict::Rejected {
            code,
            exit_code: output.exit_code,
        },
        Err(error) => SwitchVerdict::Unreadable {
            error,
            exit_code: output.exit_code,
        },
    }
}
