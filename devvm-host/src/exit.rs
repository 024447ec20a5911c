//! Process exit codes.

use crate::error::HostError;

/// Exit codes used by the `devvm` binary (BSD `sysexits` values).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Failure = 1,
    /// Bad input, such as an unknown driver.
    Usage = 64,
    /// The machine is missing or not running.
    Unavailable = 69,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Classify a lifecycle error.
    pub fn for_error(err: &HostError) -> Self {
        match err {
            HostError::UnsupportedDriver(_) => ExitCode::Usage,
            HostError::NotRunning(_) | HostError::MachineNotFound(_) => ExitCode::Unavailable,
            HostError::Step { source, .. } | HostError::Retriable(source) => {
                ExitCode::for_error(source)
            }
            _ => ExitCode::Failure,
        }
    }
}

/// Print `message` to stderr and terminate the process with `code`.
pub fn exit_with(code: ExitCode, message: impl AsRef<str>) -> ! {
    eprintln!("❌ {}", message.as_ref());
    std::process::exit(code.code())
}
