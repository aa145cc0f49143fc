use chrono::{DateTime, Utc};
use serde::Serialize;
use std::sync::Arc;

/// A registered employee. Read-only to the check-in flow.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Employee {
    pub id: String,
    pub name: String,
    pub email: String,
    /// Locator of the reference photo in photo storage, if one was registered.
    pub photo_locator: Option<String>,
}

/// Input for registering a new employee.
#[derive(Debug, Clone)]
pub struct NewEmployee {
    pub name: String,
    pub email: String,
    pub photo_locator: Option<String>,
}

/// An encoded still frame (JPEG) captured for one check-in attempt.
///
/// The pixel payload is reference-counted so the verification request can
/// hold it without copying while the flow keeps its own handle.
#[derive(Debug, Clone, PartialEq)]
pub struct CapturedImage {
    bytes: Arc<[u8]>,
    pub captured_at: DateTime<Utc>,
}

impl CapturedImage {
    pub fn new(bytes: impl Into<Arc<[u8]>>, captured_at: DateTime<Utc>) -> Self {
        Self {
            bytes: bytes.into(),
            captured_at,
        }
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }
}

/// The verification service's own recommendation.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Decision {
    Allow,
    Deny,
}

/// Normalized result of one verification call.
///
/// Fields are private so the outcome can only be built through
/// [`VerificationOutcome::new`], which forces `Deny` whenever the face did not
/// match or the capture failed liveness, whatever the service recommended.
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationOutcome {
    matched: bool,
    is_live: bool,
    confidence: f32,
    decision: Decision,
    reason: String,
}

impl VerificationOutcome {
    pub fn new(
        matched: bool,
        is_live: bool,
        confidence: f32,
        recommended: Decision,
        reason: impl Into<String>,
    ) -> Self {
        let decision = if matched && is_live {
            recommended
        } else {
            Decision::Deny
        };
        let confidence = if confidence.is_finite() {
            confidence.clamp(0.0, 1.0)
        } else {
            0.0
        };
        Self {
            matched,
            is_live,
            confidence,
            decision,
            reason: reason.into(),
        }
    }

    pub fn matched(&self) -> bool {
        self.matched
    }

    pub fn is_live(&self) -> bool {
        self.is_live
    }

    /// Overall confidence in [0, 1], as reported by the service.
    pub fn confidence(&self) -> f32 {
        self.confidence
    }

    pub fn decision(&self) -> Decision {
        self.decision
    }

    pub fn reason(&self) -> &str {
        &self.reason
    }
}

/// Outcome of one verification attempt: either the service answered, or it
/// could not be used.
#[derive(Debug, Clone, PartialEq)]
pub enum VerificationAttemptResult {
    Succeeded(VerificationOutcome),
    ServiceUnavailable(String),
}

impl VerificationAttemptResult {
    pub fn unavailable(detail: impl Into<String>) -> Self {
        Self::ServiceUnavailable(detail.into())
    }

    pub fn outcome(&self) -> Option<&VerificationOutcome> {
        match self {
            Self::Succeeded(outcome) => Some(outcome),
            Self::ServiceUnavailable(_) => None,
        }
    }
}

/// How a committed check-in was verified.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
#[serde(tag = "status", rename_all = "lowercase")]
pub enum VerificationStatus {
    /// The verification service approved the capture.
    Verified,
    /// The service was unavailable and the operator acknowledged the bypass.
    Bypassed { note: String },
}

impl VerificationStatus {
    pub fn label(&self) -> &'static str {
        match self {
            Self::Verified => "verified",
            Self::Bypassed { .. } => "bypassed",
        }
    }

    pub fn note(&self) -> Option<&str> {
        match self {
            Self::Verified => None,
            Self::Bypassed { note } => Some(note),
        }
    }
}

/// Photo storage buckets.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PhotoCategory {
    Employees,
    Attendance,
}

impl PhotoCategory {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Employees => "employees",
            Self::Attendance => "attendance",
        }
    }
}

/// Input for creating an attendance record.
#[derive(Debug, Clone, PartialEq)]
pub struct NewAttendance {
    pub employee_id: String,
    pub checked_in_at: DateTime<Utc>,
    pub photo_locator: String,
    pub verification: VerificationStatus,
}

/// A persisted check-in.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceRecord {
    pub id: String,
    pub employee_id: String,
    pub checked_in_at: DateTime<Utc>,
    pub photo_locator: String,
    pub verification: VerificationStatus,
}

/// An attendance record joined with its employee.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AttendanceEntry {
    pub record: AttendanceRecord,
    pub employee: Employee,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_outcome_mismatch_forces_deny() {
        let outcome = VerificationOutcome::new(false, true, 0.99, Decision::Allow, "x");
        assert_eq!(outcome.decision(), Decision::Deny);
    }

    #[test]
    fn test_outcome_spoof_forces_deny() {
        let outcome = VerificationOutcome::new(true, false, 0.99, Decision::Allow, "x");
        assert_eq!(outcome.decision(), Decision::Deny);
    }

    #[test]
    fn test_outcome_keeps_service_recommendation_when_checks_pass() {
        let allow = VerificationOutcome::new(true, true, 0.92, Decision::Allow, "ok");
        assert_eq!(allow.decision(), Decision::Allow);
        // A low-confidence deny from the service stands even with both checks passing.
        let deny = VerificationOutcome::new(true, true, 0.31, Decision::Deny, "low");
        assert_eq!(deny.decision(), Decision::Deny);
    }

    #[test]
    fn test_outcome_confidence_clamped() {
        assert_eq!(
            VerificationOutcome::new(true, true, 1.7, Decision::Allow, "").confidence(),
            1.0
        );
        assert_eq!(
            VerificationOutcome::new(true, true, -0.2, Decision::Allow, "").confidence(),
            0.0
        );
        assert_eq!(
            VerificationOutcome::new(true, true, f32::NAN, Decision::Allow, "").confidence(),
            0.0
        );
    }

    #[test]
    fn test_captured_image_shares_bytes() {
        let image = CapturedImage::new(vec![0xFF, 0xD8, 0xFF], Utc::now());
        let copy = image.clone();
        assert_eq!(copy.bytes(), image.bytes());
        assert_eq!(image.len(), 3);
        assert!(!image.is_empty());
    }
}
