//! Call outcome classification.
//!
//! Derives a canonical status code and message from the error (if any) that
//! an RPC produced. Both the inbound interceptors and the outbound call
//! wrapper classify through this module so the same error shape always maps
//! to the same outcome.

use std::error::Error as StdError;
use std::fmt;

use tonic::{Code, Status};

/// Message attached to successful outcomes.
pub const OK_MESSAGE: &str = "ok";

/// Canonical outcome of a single RPC.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallOutcome {
    code: Code,
    message: String,
}

impl CallOutcome {
    /// Successful outcome with the fixed `"ok"` message.
    #[must_use]
    pub fn ok() -> Self {
        Self {
            code: Code::Ok,
            message: OK_MESSAGE.to_string(),
        }
    }

    /// Extracts code and message verbatim from a structured status.
    #[must_use]
    pub fn from_status(status: &Status) -> Self {
        Self {
            code: status.code(),
            message: status.message().to_string(),
        }
    }

    /// Classifies the result of a call whose error type is already a status.
    #[must_use]
    pub fn from_result<T>(result: &Result<T, Status>) -> Self {
        match result {
            Ok(_) => Self::ok(),
            Err(status) => Self::from_status(status),
        }
    }

    #[must_use]
    pub fn code(&self) -> Code {
        self.code
    }

    #[must_use]
    pub fn message(&self) -> &str {
        &self.message
    }

    #[must_use]
    pub fn is_ok(&self) -> bool {
        self.code == Code::Ok
    }

    /// Whether the outcome warrants a diagnostic record on the calling side.
    #[must_use]
    pub fn is_severe(&self) -> bool {
        is_severe(self.code)
    }
}

impl fmt::Display for CallOutcome {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:?}) {}", self.code, self.message)
    }
}

/// Codes that indicate an unexpected failure of the remote side or the link.
#[must_use]
pub fn is_severe(code: Code) -> bool {
    matches!(
        code,
        Code::DeadlineExceeded
            | Code::PermissionDenied
            | Code::Unimplemented
            | Code::Internal
            | Code::Unavailable
    )
}

/// Classifies an optional error into a [`CallOutcome`].
///
/// A `tonic::Status` found on the error itself or anywhere in its `source()`
/// chain wins. Any other error is reported as `Unknown` with its display text.
#[must_use]
pub fn classify(err: Option<&(dyn StdError + 'static)>) -> CallOutcome {
    let Some(err) = err else {
        return CallOutcome::ok();
    };

    let mut current = Some(err);
    while let Some(e) = current {
        if let Some(status) = e.downcast_ref::<Status>() {
            return CallOutcome::from_status(status);
        }
        current = e.source();
    }

    CallOutcome {
        code: Code::Unknown,
        message: err.to_string(),
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
