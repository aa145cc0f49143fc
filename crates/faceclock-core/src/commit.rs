//! Attendance commit: persists an approved check-in.

use crate::flow::{CheckInAttempt, FlowError};
use crate::policy::Disposition;
use crate::ports::{AttendanceStore, PhotoStorage, StoreError};
use crate::types::{AttendanceRecord, NewAttendance, PhotoCategory, VerificationStatus};
use chrono::{DateTime, Utc};
use thiserror::Error;

#[derive(Error, Debug, Clone, PartialEq)]
pub enum CommitError {
    #[error(transparent)]
    NotPermitted(#[from] FlowError),
    #[error("no captured photo to commit")]
    MissingPhoto,
    #[error("photo upload failed: {0}")]
    Upload(#[source] StoreError),
    /// The photo was stored but the record was not; the operator needs to
    /// know the orphaned locator.
    #[error("attendance record not saved (photo already stored at {photo_locator}): {source}")]
    RecordCreation {
        photo_locator: String,
        #[source]
        source: StoreError,
    },
}

/// Upload the attempt's photo and create its attendance record.
///
/// The attempt must have passed review: not blocked, and acknowledged when
/// the verification service was bypassed.
pub async fn commit<P, A>(
    attempt: &CheckInAttempt,
    photos: &P,
    store: &A,
    now: DateTime<Utc>,
) -> Result<AttendanceRecord, CommitError>
where
    P: PhotoStorage,
    A: AttendanceStore,
{
    attempt.check_commit_allowed()?;
    let image = attempt.image().ok_or(CommitError::MissingPhoto)?;
    let employee = attempt.employee();

    let verification = match attempt.decision() {
        Some(d) if d.disposition == Disposition::AllowedWithWarning => {
            VerificationStatus::Bypassed {
                note: d.message.clone(),
            }
        }
        _ => VerificationStatus::Verified,
    };

    let photo_locator = photos
        .upload(image.bytes(), PhotoCategory::Attendance)
        .await
        .map_err(|e| {
            tracing::warn!(employee = %employee.id, error = %e, "check-in photo upload failed");
            CommitError::Upload(e)
        })?;
    tracing::debug!(employee = %employee.id, locator = %photo_locator, "check-in photo stored");

    let record = store
        .create_attendance(NewAttendance {
            employee_id: employee.id.clone(),
            checked_in_at: now,
            photo_locator: photo_locator.clone(),
            verification,
        })
        .await
        .map_err(|source| {
            tracing::warn!(
                employee = %employee.id,
                locator = %photo_locator,
                error = %source,
                "attendance record creation failed after photo upload"
            );
            CommitError::RecordCreation {
                photo_locator: photo_locator.clone(),
                source,
            }
        })?;

    tracing::info!(
        employee = %employee.id,
        record = %record.id,
        verification = record.verification.label(),
        "attendance committed"
    );
    Ok(record)
}
