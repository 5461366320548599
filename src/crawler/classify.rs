//! Failure classification for upstream errors

use crate::crawler::FetchError;
use crate::ArchiveError;

/// How a failed upstream call should be handled
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureClass {
    /// Retry later through queue redelivery; no state may change
    Transient,
    /// Surface to the operator
    Fatal,
}

/// Classifies an HTTP status: only 429 is transient
pub fn classify_status(status: u16) -> FailureClass {
    if status == 429 {
        FailureClass::Transient
    } else {
        FailureClass::Fatal
    }
}

/// Classifies a fetch error
///
/// Rate limiting and network-level failures (no response, timeout) are
/// transient. Every other status, malformed responses and oversized bodies
/// are fatal.
pub fn classify(err: &FetchError) -> FailureClass {
    match err {
        FetchError::Status { status, .. } => classify_status(*status),
        FetchError::Transport { .. } | FetchError::Timeout { .. } => FailureClass::Transient,
        FetchError::Decode { .. } | FetchError::TooLarge { .. } | FetchError::InvalidRequest { .. } => {
            FailureClass::Fatal
        }
    }
}

/// Wraps a fetch error in the matching `ArchiveError` variant
pub fn upstream_error(context: impl Into<String>, err: FetchError) -> ArchiveError {
    let context = context.into();
    match classify(&err) {
        FailureClass::Transient => ArchiveError::TransientUpstream {
            context,
            source: err,
        },
        FailureClass::Fatal => ArchiveError::FatalUpstream {
            context,
            source: err,
        },
    }
}
