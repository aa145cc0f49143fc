//! Collaborator interfaces the check-in core depends on.
//!
//! Concrete implementations live in `faceclock-io`; tests use in-memory fakes.

use crate::types::{
    AttendanceEntry, AttendanceRecord, CapturedImage, Employee, NewAttendance, NewEmployee,
    PhotoCategory, VerificationAttemptResult,
};
use std::future::Future;
use thiserror::Error;

/// Failure reported by a storage collaborator (records or photos).
#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum StoreError {
    #[error("storage unavailable: {0}")]
    Unavailable(String),
    #[error("not found: {0}")]
    NotFound(String),
    #[error("invalid locator: {0}")]
    InvalidLocator(String),
    #[error("storage backend error: {0}")]
    Backend(String),
}

#[derive(Error, Debug)]
pub enum CaptureError {
    #[error("no image source: {0}")]
    SourceUnavailable(String),
    #[error("could not decode captured image: {0}")]
    Decode(String),
    #[error("captured frame is too dark")]
    TooDark,
    #[error("io: {0}")]
    Io(#[from] std::io::Error),
}

/// Face-verification service.
///
/// Implementations never fail: any degradation is reported as
/// [`VerificationAttemptResult::ServiceUnavailable`].
pub trait FaceVerifier {
    fn verify(
        &self,
        reference_locator: &str,
        image: &CapturedImage,
    ) -> impl Future<Output = VerificationAttemptResult> + Send;
}

/// Object storage for employee reference photos and check-in photos.
pub trait PhotoStorage {
    /// Store the bytes and return their locator.
    fn upload(
        &self,
        bytes: &[u8],
        category: PhotoCategory,
    ) -> impl Future<Output = Result<String, StoreError>> + Send;
}

/// Employee and attendance persistence.
pub trait AttendanceStore {
    /// All employees, ordered by name.
    fn employees(&self) -> impl Future<Output = Result<Vec<Employee>, StoreError>> + Send;

    fn register_employee(
        &self,
        employee: NewEmployee,
    ) -> impl Future<Output = Result<Employee, StoreError>> + Send;

    fn create_attendance(
        &self,
        attendance: NewAttendance,
    ) -> impl Future<Output = Result<AttendanceRecord, StoreError>> + Send;

    /// Today's check-ins joined with their employee, newest first.
    fn today_attendance(
        &self,
    ) -> impl Future<Output = Result<Vec<AttendanceEntry>, StoreError>> + Send;
}

/// Produces a still image from a live source.
pub trait CaptureSource {
    fn capture(&mut self) -> Result<CapturedImage, CaptureError>;
}
