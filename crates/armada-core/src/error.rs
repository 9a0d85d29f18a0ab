//! Provisioning error taxonomy
//!
//! Every failure surfaced by the provisioning core is classified into a
//! closed set of kinds. The cluster scheduler reacts to the kind, not the
//! underlying transport error: `Unavailable` means "try another instance
//! type", `Fatal` means "abandon this workload", everything retryable is
//! handled inside the launcher itself.

use thiserror::Error;

/// Result type for provisioning operations
pub type Result<T> = std::result::Result<T, ProvisionError>;

/// EC2 error codes that indicate capacity exhaustion rather than a broken
/// request. See the EC2 API error reference.
pub const CAPACITY_ERROR_CODES: &[&str] = &[
    "InsufficientCapacity",
    "InsufficientInstanceCapacity",
    "InsufficientHostCapacity",
    "InsufficientReservedInstanceCapacity",
    "InstanceLimitExceeded",
];

/// Classification of a provisioning failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    /// This instance type cannot be obtained now; try another.
    Unavailable,
    /// Configuration is broken; abandon the workload.
    Fatal,
    /// Transient condition; retry with backoff.
    Temporary,
    /// A bounded wait expired; treated like Temporary.
    Timeout,
    /// The caller's cancellation token fired.
    Cancelled,
    /// Anything else; logged and retried up to the attempt ceiling.
    Unknown,
}

/// Errors that can occur while provisioning an instance
#[derive(Error, Debug)]
pub enum ProvisionError {
    /// Capacity for this instance type is exhausted
    #[error("unavailable: {0}")]
    Unavailable(String),

    /// Unrecoverable configuration or credential failure
    #[error("fatal: {0}")]
    Fatal(String),

    /// Transient failure, safe to retry
    #[error("temporary: {0}")]
    Temporary(String),

    /// A bounded wait expired
    #[error("timeout: {0}")]
    Timeout(String),

    /// The operation was cancelled by the caller
    #[error("cancelled")]
    Cancelled,

    /// Cloud API error with its service error code, when one was reported
    #[error("cloud error{}: {message}", .code.as_deref().map(|c| format!(" [{c}]")).unwrap_or_default())]
    Cloud {
        code: Option<String>,
        message: String,
    },

    /// HTTP transport error from the worker probe
    #[error("http: {0}")]
    Http(String),

    /// Anything else
    #[error("{0}")]
    Other(String),
}

impl ProvisionError {
    pub fn unavailable(msg: impl Into<String>) -> Self {
        Self::Unavailable(msg.into())
    }

    pub fn fatal(msg: impl Into<String>) -> Self {
        Self::Fatal(msg.into())
    }

    pub fn temporary(msg: impl Into<String>) -> Self {
        Self::Temporary(msg.into())
    }

    pub fn timeout(msg: impl Into<String>) -> Self {
        Self::Timeout(msg.into())
    }

    pub fn other(msg: impl Into<String>) -> Self {
        Self::Other(msg.into())
    }

    /// Cloud API error carrying the service's string error code
    pub fn cloud(code: Option<String>, message: impl Into<String>) -> Self {
        Self::Cloud {
            code,
            message: message.into(),
        }
    }

    /// The service error code, for `Cloud` errors that reported one
    pub fn cloud_code(&self) -> Option<&str> {
        match self {
            Self::Cloud { code, .. } => code.as_deref(),
            _ => None,
        }
    }

    /// Collapse this error onto the closed kind taxonomy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Unavailable(_) => ErrorKind::Unavailable,
            Self::Fatal(_) => ErrorKind::Fatal,
            Self::Temporary(_) => ErrorKind::Temporary,
            Self::Timeout(_) => ErrorKind::Timeout,
            Self::Cancelled => ErrorKind::Cancelled,
            Self::Cloud { code: Some(c), .. } if CAPACITY_ERROR_CODES.contains(&c.as_str()) => {
                ErrorKind::Unavailable
            }
            Self::Cloud { .. } | Self::Http(_) | Self::Other(_) => ErrorKind::Unknown,
        }
    }

    /// Rewrite cloud capacity codes into `Unavailable` so callers can match
    /// on the variant directly. All other errors pass through untouched.
    pub fn classify(self) -> Self {
        match self {
            Self::Cloud {
                code: Some(ref c), ..
            } if CAPACITY_ERROR_CODES.contains(&c.as_str()) => Self::Unavailable(self.to_string()),
            other => other,
        }
    }

    /// Whether the launcher should keep retrying after this error
    pub fn should_retry(&self) -> bool {
        matches!(
            self.kind(),
            ErrorKind::Temporary | ErrorKind::Timeout | ErrorKind::Unknown
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_capacity_codes_classify_unavailable() {
        for code in CAPACITY_ERROR_CODES {
            let err = ProvisionError::cloud(Some(code.to_string()), "no capacity");
            assert_eq!(err.kind(), ErrorKind::Unavailable, "code {code}");
            assert!(matches!(err.classify(), ProvisionError::Unavailable(_)));
        }
    }

    #[test]
    fn test_non_capacity_code_stays_unknown() {
        let err = ProvisionError::cloud(Some("RequestLimitExceeded".into()), "slow down");
        assert_eq!(err.kind(), ErrorKind::Unknown);
        assert!(err.should_retry());
        assert!(matches!(err.classify(), ProvisionError::Cloud { .. }));
    }

    #[test]
    fn test_retry_discipline() {
        assert!(ProvisionError::temporary("not yet").should_retry());
        assert!(ProvisionError::timeout("10s elapsed").should_retry());
        assert!(!ProvisionError::fatal("bad credentials").should_retry());
        assert!(!ProvisionError::unavailable("exhausted").should_retry());
        assert!(!ProvisionError::Cancelled.should_retry());
    }

    #[test]
    fn test_cloud_display_includes_code() {
        let err = ProvisionError::cloud(Some("DryRunOperation".into()), "would have succeeded");
        assert_eq!(
            err.to_string(),
            "cloud error [DryRunOperation]: would have succeeded"
        );
        let bare = ProvisionError::cloud(None, "opaque");
        assert_eq!(bare.to_string(), "cloud error: opaque");
    }
}
