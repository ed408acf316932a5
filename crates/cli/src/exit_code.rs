// Consistent exit codes for the storyverse CLI.
//
//   0  = success
//   1  = general error
//   2  = usage/argument error
//   11 = authentication error
//   12 = conflict pending
//   13 = network error
//   14 = file permission denied

use storyverse_engine::backend::{BackendError, FailureKind};
use storyverse_engine::engine::SaveFailure;
use storyverse_engine::reconcile::ReconcileError;

/// Named exit codes for the CLI.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i32)]
pub enum ExitCode {
    Success = 0,
    Error = 1,
    Usage = 2,
    Auth = 11,
    Conflict = 12,
    Network = 13,
    Permission = 14,
}

impl ExitCode {
    pub fn code(self) -> i32 {
        self as i32
    }

    /// Map an anyhow error to an exit code by inspecting the error chain.
    pub fn from_error(err: &anyhow::Error) -> Self {
        for cause in err.chain() {
            if let Some(backend) = cause.downcast_ref::<BackendError>() {
                return Self::from_backend(backend);
            }
            if let Some(failure) = cause.downcast_ref::<SaveFailure>() {
                return Self::from_failure_kind(failure.kind);
            }
            if let Some(reconcile) = cause.downcast_ref::<ReconcileError>() {
                match reconcile {
                    ReconcileError::InvalidState { .. } => return Self::Usage,
                    ReconcileError::Backend(error) => return Self::from_backend(error),
                    ReconcileError::Save(failure) => return Self::from_failure_kind(failure.kind),
                    _ => {}
                }
            }
            if let Some(io_err) = cause.downcast_ref::<std::io::Error>() {
                return match io_err.kind() {
                    std::io::ErrorKind::PermissionDenied => Self::Permission,
                    std::io::ErrorKind::TimedOut => Self::Network,
                    _ => Self::Error,
                };
            }
        }

        let msg = format!("{err:#}");
        if msg.contains("conflict is pending") {
            return Self::Conflict;
        }
        Self::Error
    }

    fn from_backend(error: &BackendError) -> Self {
        match error {
            BackendError::Transport(_) => Self::Network,
            other => Self::from_failure_kind(other.kind()),
        }
    }

    fn from_failure_kind(kind: FailureKind) -> Self {
        match kind {
            FailureKind::Permission => Self::Permission,
            FailureKind::Unauthorized => Self::Auth,
            FailureKind::Cancelled | FailureKind::Transient => Self::Error,
        }
    }
}

impl From<ExitCode> for std::process::ExitCode {
    fn from(code: ExitCode) -> Self {
        std::process::ExitCode::from(code.code() as u8)
    }
}
