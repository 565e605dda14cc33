//! Error types for external-process steps

use std::fmt;

/// Result type alias for subprocess steps.
pub type ProcessResult<T> = Result<T, ProcessError>;

/// Errors from an invoked external utility.
///
/// Optional backup steps degrade to a logged warning on one of these;
/// mandatory steps abort the job and carry the message into the job record.
#[derive(Debug)]
pub enum ProcessError {
    /// The process outlived its timeout and was terminated.
    Timeout { program: String, secs: u64 },

    /// The process exited with a non-zero status.
    NonZeroExit {
        program: String,
        code: i32,
        stderr: String,
    },

    /// The process could not be spawned or its output read.
    Io(std::io::Error),
}

impl fmt::Display for ProcessError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            ProcessError::Timeout { program, secs } => {
                write!(f, "{} timed out after {}s", program, secs)
            }
            ProcessError::NonZeroExit {
                program,
                code,
                stderr,
            } => {
                write!(f, "{} exited with code {}: {}", program, code, stderr.trim())
            }
            ProcessError::Io(err) => write!(f, "failed to run process: {}", err),
        }
    }
}

impl std::error::Error for ProcessError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            ProcessError::Io(err) => Some(err),
            _ => None,
        }
    }
}

impl From<std::io::Error> for ProcessError {
    fn from(err: std::io::Error) -> Self {
        ProcessError::Io(err)
    }
}
