//! Check-in flow state machine.
//!
//! The flow owns the decision-relevant data of one check-in attempt and
//! enforces which actions are legal in which state. It performs no I/O: the
//! verification call and the commit are driven from outside (see
//! [`crate::session::CheckInSession`]) and report back through
//! [`CheckInFlow::complete_verification`], [`CheckInFlow::commit_succeeded`]
//! and [`CheckInFlow::commit_failed`].
//!
//! ```text
//! SelectingEmployee -> CapturingPhoto -> Verifying -> ReviewingResult -> Committing -> Committed
//!                          ^                              |    ^              |
//!                          +---------- retry -------------+    +-- failed ----+
//! any non-terminal state --cancel--> Cancelled
//! ```

use crate::policy::{self, Disposition, PolicyDecision};
use crate::types::{AttendanceRecord, CapturedImage, Employee, VerificationAttemptResult};
use std::fmt;
use thiserror::Error;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlowState {
    SelectingEmployee,
    CapturingPhoto,
    Verifying,
    ReviewingResult,
    Committing,
    Committed,
    Cancelled,
}

impl FlowState {
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Committed | Self::Cancelled)
    }
}

impl fmt::Display for FlowState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::SelectingEmployee => "selecting employee",
            Self::CapturingPhoto => "capturing photo",
            Self::Verifying => "verifying",
            Self::ReviewingResult => "reviewing result",
            Self::Committing => "committing",
            Self::Committed => "committed",
            Self::Cancelled => "cancelled",
        })
    }
}

/// Operator and driver actions accepted by the flow.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Action {
    Select,
    Capture,
    AcknowledgeBypass,
    Confirm,
    Retry,
    Cancel,
    FinishCommit,
}

impl fmt::Display for Action {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Select => "select an employee",
            Self::Capture => "capture a photo",
            Self::AcknowledgeBypass => "acknowledge the verification bypass",
            Self::Confirm => "confirm check-in",
            Self::Retry => "retry capture",
            Self::Cancel => "cancel",
            Self::FinishCommit => "finish commit",
        })
    }
}

/// An action was requested that the current state does not permit.
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum FlowError {
    #[error("cannot {action} while {state}")]
    InvalidAttemptState { action: Action, state: FlowState },
    /// Confirm requested while the review disposition is `Blocked`.
    #[error("check-in denied: {reason}")]
    CheckInBlocked { reason: String },
    /// Confirm requested on `AllowedWithWarning` before the bypass was acknowledged.
    #[error("verification service bypass must be acknowledged before check-in")]
    AcknowledgmentRequired,
    /// Commit requested for an attempt that has no verification decision yet.
    #[error("check-in has not been verified yet")]
    NotReviewed,
}

/// Identifies one verification call. Completions carrying an outdated ticket
/// are discarded.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct VerificationTicket(u64);

/// Everything the driver needs to run a verification call.
#[derive(Debug, Clone)]
pub struct VerificationRequest {
    pub ticket: VerificationTicket,
    pub employee_id: String,
    /// `None` when the employee never registered a reference photo.
    pub reference: Option<String>,
    pub image: CapturedImage,
}

/// What happened to a verification completion.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Completion {
    Applied(PolicyDecision),
    Discarded,
}

/// Decision-relevant data for one check-in attempt.
#[derive(Debug, Clone)]
pub struct CheckInAttempt {
    employee: Employee,
    image: Option<CapturedImage>,
    result: Option<VerificationAttemptResult>,
    decision: Option<PolicyDecision>,
    acknowledged: bool,
}

impl CheckInAttempt {
    fn new(employee: Employee) -> Self {
        Self {
            employee,
            image: None,
            result: None,
            decision: None,
            acknowledged: false,
        }
    }

    pub fn employee(&self) -> &Employee {
        &self.employee
    }

    pub fn image(&self) -> Option<&CapturedImage> {
        self.image.as_ref()
    }

    pub fn result(&self) -> Option<&VerificationAttemptResult> {
        self.result.as_ref()
    }

    pub fn decision(&self) -> Option<&PolicyDecision> {
        self.decision.as_ref()
    }

    pub fn disposition(&self) -> Option<Disposition> {
        self.decision.as_ref().map(|d| d.disposition)
    }

    pub fn is_acknowledged(&self) -> bool {
        self.acknowledged
    }

    /// Check that this attempt may be committed.
    pub fn check_commit_allowed(&self) -> Result<(), FlowError> {
        match &self.decision {
            None => Err(FlowError::NotReviewed),
            Some(d) if d.disposition == Disposition::Blocked => Err(FlowError::CheckInBlocked {
                reason: d.message.clone(),
            }),
            Some(d) if d.disposition.requires_acknowledgment() && !self.acknowledged => {
                Err(FlowError::AcknowledgmentRequired)
            }
            Some(_) => Ok(()),
        }
    }

    fn clear_capture(&mut self) {
        self.image = None;
        self.result = None;
        self.decision = None;
        self.acknowledged = false;
    }
}

/// The check-in state machine.
#[derive(Debug)]
pub struct CheckInFlow {
    state: FlowState,
    attempt: Option<CheckInAttempt>,
    /// Bumped on every capture, cancel and reset; tickets from older epochs are stale.
    epoch: u64,
    committed: Option<AttendanceRecord>,
}

impl Default for CheckInFlow {
    fn default() -> Self {
        Self::new()
    }
}

impl CheckInFlow {
    pub fn new() -> Self {
        Self {
            state: FlowState::SelectingEmployee,
            attempt: None,
            epoch: 0,
            committed: None,
        }
    }

    pub fn state(&self) -> FlowState {
        self.state
    }

    pub fn attempt(&self) -> Option<&CheckInAttempt> {
        self.attempt.as_ref()
    }

    /// The record created by a successful commit.
    pub fn committed_record(&self) -> Option<&AttendanceRecord> {
        self.committed.as_ref()
    }

    /// Actions that would currently be accepted, for presentation.
    pub fn available_actions(&self) -> Vec<Action> {
        match self.state {
            FlowState::SelectingEmployee => vec![Action::Select, Action::Cancel],
            FlowState::CapturingPhoto => vec![Action::Capture, Action::Cancel],
            FlowState::Verifying | FlowState::Committing => vec![Action::Cancel],
            FlowState::ReviewingResult => {
                let mut actions = Vec::new();
                match self.attempt.as_ref().and_then(|a| a.disposition()) {
                    Some(Disposition::Allowed) => actions.push(Action::Confirm),
                    Some(Disposition::AllowedWithWarning) => {
                        if self.attempt.as_ref().is_some_and(|a| a.acknowledged) {
                            actions.push(Action::Confirm);
                        } else {
                            actions.push(Action::AcknowledgeBypass);
                        }
                    }
                    Some(Disposition::Blocked) | None => {}
                }
                actions.push(Action::Retry);
                actions.push(Action::Cancel);
                actions
            }
            FlowState::Committed | FlowState::Cancelled => Vec::new(),
        }
    }

    fn invalid(&self, action: Action) -> FlowError {
        FlowError::InvalidAttemptState {
            action,
            state: self.state,
        }
    }

    fn transition(&mut self, to: FlowState) {
        tracing::debug!(from = %self.state, to = %to, "check-in flow transition");
        self.state = to;
    }

    /// `SelectingEmployee -> CapturingPhoto`.
    pub fn select_employee(&mut self, employee: Employee) -> Result<(), FlowError> {
        if self.state != FlowState::SelectingEmployee {
            return Err(self.invalid(Action::Select));
        }
        tracing::info!(employee = %employee.id, name = %employee.name, "employee selected");
        self.attempt = Some(CheckInAttempt::new(employee));
        self.committed = None;
        self.transition(FlowState::CapturingPhoto);
        Ok(())
    }

    /// `CapturingPhoto -> Verifying`. Returns the request the driver must
    /// run against the verification service.
    pub fn capture(&mut self, image: CapturedImage) -> Result<VerificationRequest, FlowError> {
        if self.state != FlowState::CapturingPhoto {
            return Err(self.invalid(Action::Capture));
        }
        let attempt = self
            .attempt
            .as_mut()
            .ok_or(FlowError::InvalidAttemptState {
                action: Action::Capture,
                state: FlowState::SelectingEmployee,
            })?;

        self.epoch += 1;
        attempt.image = Some(image.clone());
        let request = VerificationRequest {
            ticket: VerificationTicket(self.epoch),
            employee_id: attempt.employee.id.clone(),
            reference: attempt.employee.photo_locator.clone(),
            image,
        };
        self.transition(FlowState::Verifying);
        Ok(request)
    }

    /// `Verifying -> ReviewingResult`, storing the policy decision.
    ///
    /// Completions for a ticket that is no longer current, or arriving when
    /// the flow is not verifying, are dropped.
    pub fn complete_verification(
        &mut self,
        ticket: VerificationTicket,
        result: VerificationAttemptResult,
    ) -> Completion {
        if self.state != FlowState::Verifying || ticket.0 != self.epoch {
            tracing::debug!(
                state = %self.state,
                ticket = ticket.0,
                current = self.epoch,
                "discarding stale verification completion"
            );
            return Completion::Discarded;
        }
        let Some(attempt) = self.attempt.as_mut() else {
            return Completion::Discarded;
        };

        let decision = policy::decide(&result);
        tracing::info!(
            employee = %attempt.employee.id,
            disposition = %decision.disposition,
            message = %decision.message,
            "verification reviewed"
        );
        attempt.result = Some(result);
        attempt.decision = Some(decision.clone());
        attempt.acknowledged = false;
        self.transition(FlowState::ReviewingResult);
        Completion::Applied(decision)
    }

    /// Record the operator's explicit acknowledgment of a service bypass.
    ///
    /// Only legal while reviewing an `AllowedWithWarning` result.
    pub fn acknowledge_bypass(&mut self) -> Result<(), FlowError> {
        let warned = self.attempt.as_ref().and_then(|a| a.disposition())
            == Some(Disposition::AllowedWithWarning);
        if self.state != FlowState::ReviewingResult || !warned {
            return Err(self.invalid(Action::AcknowledgeBypass));
        }
        if let Some(attempt) = self.attempt.as_mut() {
            tracing::warn!(employee = %attempt.employee.id, "verification bypass acknowledged");
            attempt.acknowledged = true;
        }
        Ok(())
    }

    /// `ReviewingResult -> Committing`, refused while blocked or while a
    /// required acknowledgment is missing.
    pub fn confirm(&mut self) -> Result<&CheckInAttempt, FlowError> {
        if self.state != FlowState::ReviewingResult {
            return Err(self.invalid(Action::Confirm));
        }
        let attempt = self.attempt.as_ref().ok_or_else(|| self.invalid(Action::Confirm))?;
        attempt.check_commit_allowed()?;
        self.transition(FlowState::Committing);
        self.attempt.as_ref().ok_or_else(|| self.invalid(Action::Confirm))
    }

    /// `ReviewingResult -> CapturingPhoto`, discarding the capture and result.
    pub fn retry(&mut self) -> Result<(), FlowError> {
        if self.state != FlowState::ReviewingResult {
            return Err(self.invalid(Action::Retry));
        }
        if let Some(attempt) = self.attempt.as_mut() {
            attempt.clear_capture();
        }
        self.transition(FlowState::CapturingPhoto);
        Ok(())
    }

    /// `Committing -> Committed`. The attempt is released.
    pub fn commit_succeeded(&mut self, record: AttendanceRecord) -> Result<(), FlowError> {
        if self.state != FlowState::Committing {
            return Err(self.invalid(Action::FinishCommit));
        }
        self.attempt = None;
        self.committed = Some(record);
        self.transition(FlowState::Committed);
        Ok(())
    }

    /// `Committing -> ReviewingResult`, keeping image, result and
    /// acknowledgment so the commit can be retried as-is.
    pub fn commit_failed(&mut self) -> Result<(), FlowError> {
        if self.state != FlowState::Committing {
            return Err(self.invalid(Action::FinishCommit));
        }
        self.transition(FlowState::ReviewingResult);
        Ok(())
    }

    /// Any non-terminal state `-> Cancelled`. Cancelling twice is a no-op.
    pub fn cancel(&mut self) -> Result<(), FlowError> {
        match self.state {
            FlowState::Cancelled => Ok(()),
            FlowState::Committed => Err(self.invalid(Action::Cancel)),
            _ => {
                self.epoch += 1;
                self.attempt = None;
                self.transition(FlowState::Cancelled);
                Ok(())
            }
        }
    }

    /// Start over from employee selection, dropping any attempt in progress.
    pub fn reset(&mut self) {
        self.epoch += 1;
        self.attempt = None;
        self.committed = None;
        self.transition(FlowState::SelectingEmployee);
    }
}
