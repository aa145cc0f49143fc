//! Async driver for one check-in flow.
//!
//! [`CheckInSession`] owns a [`CheckInFlow`] and the collaborators it needs,
//! and performs the two asynchronous steps: the verification call (the only
//! suspension point that can be cancelled) and the commit.

use crate::commit::{self, CommitError};
use crate::flow::{Action, CheckInFlow, Completion, FlowError, FlowState, VerificationRequest};
use crate::ports::{
    AttendanceStore, CaptureError, CaptureSource, FaceVerifier, PhotoStorage, StoreError,
};
use crate::types::{AttendanceRecord, CapturedImage, Employee, VerificationAttemptResult};
use chrono::Utc;
use thiserror::Error;
use tokio_util::sync::CancellationToken;

/// Detail reported when an employee has no reference photo to verify against.
pub const NO_REFERENCE_DETAIL: &str = "no reference photo on file for this employee";

#[derive(Error, Debug)]
pub enum CheckInError {
    #[error(transparent)]
    Flow(#[from] FlowError),
    #[error("check-in not recorded: {0}")]
    Commit(#[from] CommitError),
    #[error("capture failed: {0}")]
    Capture(#[from] CaptureError),
    #[error("employee lookup failed: {0}")]
    Store(#[from] StoreError),
}

/// Run the verification call for a request, short-circuiting when there is
/// no reference photo.
pub async fn run_verification<V: FaceVerifier>(
    verifier: &V,
    request: &VerificationRequest,
) -> VerificationAttemptResult {
    match request.reference.as_deref() {
        Some(reference) => verifier.verify(reference, &request.image).await,
        None => {
            tracing::warn!(
                employee = %request.employee_id,
                "no reference photo; skipping face verification"
            );
            VerificationAttemptResult::unavailable(NO_REFERENCE_DETAIL)
        }
    }
}

pub struct CheckInSession<V, P, A> {
    flow: CheckInFlow,
    verifier: V,
    photos: P,
    store: A,
}

impl<V, P, A> CheckInSession<V, P, A>
where
    V: FaceVerifier,
    P: PhotoStorage,
    A: AttendanceStore,
{
    pub fn new(verifier: V, photos: P, store: A) -> Self {
        Self {
            flow: CheckInFlow::new(),
            verifier,
            photos,
            store,
        }
    }

    pub fn flow(&self) -> &CheckInFlow {
        &self.flow
    }

    pub fn store(&self) -> &A {
        &self.store
    }

    pub async fn employees(&self) -> Result<Vec<Employee>, CheckInError> {
        Ok(self.store.employees().await?)
    }

    pub fn select(&mut self, employee: Employee) -> Result<(), CheckInError> {
        Ok(self.flow.select_employee(employee)?)
    }

    /// Capture from `source`, then verify. A capture error leaves the flow in
    /// `CapturingPhoto` so the operator can try again.
    pub async fn capture_and_verify<C: CaptureSource>(
        &mut self,
        source: &mut C,
        cancel: &CancellationToken,
    ) -> Result<Completion, CheckInError> {
        if self.flow.state() != FlowState::CapturingPhoto {
            return Err(FlowError::InvalidAttemptState {
                action: Action::Capture,
                state: self.flow.state(),
            }
            .into());
        }
        let image = source.capture()?;
        self.verify_image(image, cancel).await
    }

    /// Submit an already captured image for verification.
    ///
    /// If `cancel` fires while the call is in flight the flow is cancelled
    /// and the eventual result is dropped.
    pub async fn verify_image(
        &mut self,
        image: CapturedImage,
        cancel: &CancellationToken,
    ) -> Result<Completion, CheckInError> {
        let request = self.flow.capture(image)?;
        tracing::debug!(employee = %request.employee_id, bytes = request.image.len(), "verifying capture");

        let result = tokio::select! {
            result = run_verification(&self.verifier, &request) => result,
            _ = cancel.cancelled() => {
                tracing::info!(employee = %request.employee_id, "verification cancelled");
                self.flow.cancel()?;
                return Ok(Completion::Discarded);
            }
        };
        Ok(self.flow.complete_verification(request.ticket, result))
    }

    pub fn acknowledge_bypass(&mut self) -> Result<(), CheckInError> {
        Ok(self.flow.acknowledge_bypass()?)
    }

    pub fn retry(&mut self) -> Result<(), CheckInError> {
        Ok(self.flow.retry()?)
    }

    pub fn cancel(&mut self) -> Result<(), CheckInError> {
        Ok(self.flow.cancel()?)
    }

    pub fn reset(&mut self) {
        self.flow.reset();
    }

    /// Confirm the reviewed attempt and commit it. On failure the flow is
    /// back in `ReviewingResult` with everything preserved.
    pub async fn confirm_and_commit(&mut self) -> Result<AttendanceRecord, CheckInError> {
        let attempt = self.flow.confirm()?;
        let committed = commit::commit(attempt, &self.photos, &self.store, Utc::now()).await;
        match committed {
            Ok(record) => {
                self.flow.commit_succeeded(record.clone())?;
                Ok(record)
            }
            Err(e) => {
                self.flow.commit_failed()?;
                Err(e.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::fakes::{FakeCamera, FakePhotos, FakeStore, FakeVerifier};
    use crate::policy::Disposition;
    use crate::types::{Decision, VerificationOutcome, VerificationStatus};
    use std::time::Duration;

    fn employee(with_photo: bool) -> Employee {
        Employee {
            id: "emp-1".into(),
            name: "Ada".into(),
            email: "ada@example.com".into(),
            photo_locator: with_photo.then(|| "employees/ada.jpg".to_string()),
        }
    }

    fn session(
        verifier: FakeVerifier,
    ) -> CheckInSession<FakeVerifier, FakePhotos, FakeStore> {
        CheckInSession::new(
            verifier,
            FakePhotos::default(),
            FakeStore::with_employees(vec![employee(true)]),
        )
    }

    fn outcome(
        matched: bool,
        live: bool,
        confidence: f32,
        decision: Decision,
        reason: &str,
    ) -> VerificationAttemptResult {
        VerificationAttemptResult::Succeeded(VerificationOutcome::new(
            matched, live, confidence, decision, reason,
        ))
    }

    fn disposition<V, P, A>(s: &CheckInSession<V, P, A>) -> Option<Disposition> {
        s.flow.attempt().and_then(|a| a.disposition())
    }

    #[tokio::test]
    async fn test_allowed_outcome_commits_one_record() {
        let mut s = session(FakeVerifier::returning(outcome(
            true,
            true,
            0.92,
            Decision::Allow,
            "Verification successful",
        )));
        s.select(employee(true)).unwrap();
        let completion = s
            .capture_and_verify(&mut FakeCamera::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert!(matches!(completion, Completion::Applied(_)));
        assert_eq!(disposition(&s), Some(Disposition::Allowed));

        let record = s.confirm_and_commit().await.unwrap();
        assert_eq!(record.verification, VerificationStatus::Verified);
        assert_eq!(s.flow().state(), FlowState::Committed);
        assert_eq!(s.store().records().len(), 1);
    }

    #[tokio::test]
    async fn test_denied_outcome_blocks_commit() {
        let mut s = session(FakeVerifier::returning(outcome(
            false,
            true,
            0.81,
            Decision::Deny,
            "face mismatch",
        )));
        s.select(employee(true)).unwrap();
        s.capture_and_verify(&mut FakeCamera::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(disposition(&s), Some(Disposition::Blocked));

        let err = s.confirm_and_commit().await.unwrap_err();
        assert!(matches!(err, CheckInError::Flow(FlowError::CheckInBlocked { .. })));
        assert_eq!(s.flow().state(), FlowState::ReviewingResult);
        assert!(s.store().records().is_empty());

        s.retry().unwrap();
        assert_eq!(s.flow().state(), FlowState::CapturingPhoto);
    }

    #[tokio::test]
    async fn test_service_unavailable_requires_acknowledgment() {
        let mut s = session(FakeVerifier::returning(VerificationAttemptResult::unavailable(
            "request timed out",
        )));
        s.select(employee(true)).unwrap();
        s.capture_and_verify(&mut FakeCamera::new(), &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(disposition(&s), Some(Disposition::AllowedWithWarning));

        let err = s.confirm_and_commit().await.unwrap_err();
        assert!(matches!(err, CheckInError::Flow(FlowError::AcknowledgmentRequired)));
        assert!(s.store().records().is_empty());

        s.acknowledge_bypass().unwrap();
        let record = s.confirm_and_commit().await.unwrap();
        assert_eq!(record.verification.label(), "bypassed");
        assert_eq!(s.flow().state(), FlowState::Committed);
    }

    #[tokio::test]
    async fn test_missing_reference_skips_service() {
        let verifier = FakeVerifier::returning(outcome(true, true, 0.99, Decision::Allow, "ok"));
        let mut s = session(verifier);
        s.select(employee(false)).unwrap();
        s.capture_and_verify(&mut FakeCamera::new(), &CancellationToken::new())
            .await
            .unwrap();

        assert_eq!(s.verifier.calls(), 0);
        assert_eq!(disposition(&s), Some(Disposition::AllowedWithWarning));
        let attempt = s.flow().attempt().unwrap();
        assert_eq!(
            attempt.result(),
            Some(&VerificationAttemptResult::unavailable(NO_REFERENCE_DETAIL))
        );
    }

    #[tokio::test]
    async fn test_commit_retry_reuses_capture() {
        let mut s = session(FakeVerifier::returning(outcome(
            true,
            true,
            0.9,
            Decision::Allow,
            "ok",
        )));
        let mut camera = FakeCamera::new();
        s.select(employee(true)).unwrap();
        s.capture_and_verify(&mut camera, &CancellationToken::new())
            .await
            .unwrap();
        let image_before = s.flow().attempt().unwrap().image().cloned();

        s.store().fail_next_creates(1);
        let err = s.confirm_and_commit().await.unwrap_err();
        let orphaned = match err {
            CheckInError::Commit(CommitError::RecordCreation { photo_locator, .. }) => photo_locator,
            other => panic!("unexpected error: {other:?}"),
        };
        assert_eq!(s.flow().state(), FlowState::ReviewingResult);
        let attempt = s.flow().attempt().unwrap();
        assert_eq!(attempt.image().cloned(), image_before);
        assert_eq!(attempt.disposition(), Some(Disposition::Allowed));

        let record = s.confirm_and_commit().await.unwrap();
        assert_eq!(s.store().records().len(), 1);
        assert_eq!(camera.captures, 1);
        assert_eq!(s.verifier.calls(), 1);
        assert_eq!(s.photos.uploads(), 2);
        assert_eq!(record.photo_locator, orphaned);
    }

    #[tokio::test]
    async fn test_cancel_while_verifying_discards_result() {
        let mut s = session(FakeVerifier::slow(
            outcome(true, true, 0.9, Decision::Allow, "ok"),
            Duration::from_secs(30),
        ));
        s.select(employee(true)).unwrap();

        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });

        let completion = s
            .capture_and_verify(&mut FakeCamera::new(), &cancel)
            .await
            .unwrap();
        assert_eq!(completion, Completion::Discarded);
        assert_eq!(s.flow().state(), FlowState::Cancelled);
        assert!(s.flow().attempt().is_none());
    }

    #[tokio::test]
    async fn test_capture_failure_stays_in_capturing() {
        let mut s = session(FakeVerifier::returning(outcome(
            true,
            true,
            0.9,
            Decision::Allow,
            "ok",
        )));
        s.select(employee(true)).unwrap();
        let mut camera = FakeCamera::new();
        camera.fail = true;
        let err = s
            .capture_and_verify(&mut camera, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, CheckInError::Capture(_)));
        assert_eq!(s.flow().state(), FlowState::CapturingPhoto);
        assert_eq!(s.verifier.calls(), 0);
    }

    #[tokio::test]
    async fn test_capture_before_selection_is_rejected() {
        let mut s = session(FakeVerifier::returning(VerificationAttemptResult::unavailable(
            "x",
        )));
        let mut camera = FakeCamera::new();
        let err = s
            .capture_and_verify(&mut camera, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(
            err,
            CheckInError::Flow(FlowError::InvalidAttemptState { .. })
        ));
        assert_eq!(camera.captures, 0);
    }

    #[tokio::test]
    async fn test_employees_come_from_store() {
        let s = session(FakeVerifier::returning(VerificationAttemptResult::unavailable(
            "x",
        )));
        let employees = s.employees().await.unwrap();
        assert_eq!(employees.len(), 1);
        assert_eq!(employees[0].name, "Ada");
    }

    #[tokio::test]
    async fn test_reset_allows_next_check_in() {
        let mut s = session(FakeVerifier::returning(outcome(
            true,
            true,
            0.9,
            Decision::Allow,
            "ok",
        )));
        let mut camera = FakeCamera::new();
        for _ in 0..2 {
            s.select(employee(true)).unwrap();
            s.capture_and_verify(&mut camera, &CancellationToken::new())
                .await
                .unwrap();
            s.confirm_and_commit().await.unwrap();
            assert_eq!(s.flow().state(), FlowState::Committed);
            s.reset();
            assert_eq!(s.flow().state(), FlowState::SelectingEmployee);
            assert!(s.flow().committed_record().is_none());
        }
        assert_eq!(s.store().records().len(), 2);
    }
}
