//! Verification policy: maps a verification attempt to a check-in disposition.

use crate::types::{Decision, VerificationAttemptResult};
use std::fmt;

/// Whether a reviewed check-in may be committed, and on what terms.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Disposition {
    /// Verification passed; a plain confirm commits.
    Allowed,
    /// Verification denied; commit is refused until a new capture.
    Blocked,
    /// The service could not be used; commit needs an explicit acknowledgment.
    AllowedWithWarning,
}

impl Disposition {
    /// True only for the service-unavailable bypass.
    pub fn requires_acknowledgment(&self) -> bool {
        matches!(self, Self::AllowedWithWarning)
    }

    pub fn permits_commit(&self) -> bool {
        !matches!(self, Self::Blocked)
    }
}

impl fmt::Display for Disposition {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Allowed => "allowed",
            Self::Blocked => "blocked",
            Self::AllowedWithWarning => "allowed with warning",
        })
    }
}

/// Policy output: a disposition and the message shown to the operator.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct PolicyDecision {
    pub disposition: Disposition,
    pub message: String,
}

/// Decide the disposition for a verification attempt.
pub fn decide(result: &VerificationAttemptResult) -> PolicyDecision {
    match result {
        VerificationAttemptResult::Succeeded(outcome) => {
            let disposition = match outcome.decision() {
                Decision::Allow => Disposition::Allowed,
                Decision::Deny => Disposition::Blocked,
            };
            PolicyDecision {
                disposition,
                message: outcome.reason().to_string(),
            }
        }
        VerificationAttemptResult::ServiceUnavailable(detail) => PolicyDecision {
            disposition: Disposition::AllowedWithWarning,
            message: format!(
                "Face verification service is unavailable ({detail}). Proceeding is a \
                 temporary bypass: the check-in will be recorded as unverified for manual review."
            ),
        },
    }
}
