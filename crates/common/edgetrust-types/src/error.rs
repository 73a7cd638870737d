use serde::{Deserialize, Serialize};
use std::fmt;

/// Coarse classification shared by every error type in the workspace.
///
/// `InvariantViolation` and `Configuration` are fatal: the owning subsystem
/// must stop rather than keep running on inconsistent state.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorClass {
    /// Pin of a missing key or an unbalanced unpin.
    InvariantViolation,
    /// A single inbound message was rejected; keep serving.
    ProtocolRejection,
    /// A candidate was skipped during selection.
    PolicyAnomaly,
    /// Bad or missing configuration detected at startup.
    Configuration,
    /// Failure reported by an external collaborator.
    External,
}

impl ErrorClass {
    pub fn is_fatal(self) -> bool {
        matches!(self, ErrorClass::InvariantViolation | ErrorClass::Configuration)
    }
}

impl fmt::Display for ErrorClass {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let s = match self {
            ErrorClass::InvariantViolation => "invariant violation",
            ErrorClass::ProtocolRejection => "protocol rejection",
            ErrorClass::PolicyAnomaly => "policy anomaly",
            ErrorClass::Configuration => "configuration error",
            ErrorClass::External => "external failure",
        };
        f.write_str(s)
    }
}
