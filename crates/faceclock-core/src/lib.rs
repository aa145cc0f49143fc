//! faceclock-core: attendance check-in gated on face verification.
//!
//! Holds the check-in state machine, the verification policy and the
//! attendance commit step. All I/O goes through the collaborator traits in
//! [`ports`]; concrete implementations live in `faceclock-io`.

pub mod commit;
pub mod flow;
pub mod policy;
pub mod ports;
pub mod session;
pub mod types;

#[cfg(test)]
mod fakes;

pub use commit::CommitError;
pub use flow::{Action, CheckInAttempt, CheckInFlow, Completion, FlowError, FlowState};
pub use policy::{decide, Disposition, PolicyDecision};
pub use ports::{AttendanceStore, CaptureError, CaptureSource, FaceVerifier, PhotoStorage, StoreError};
pub use session::{CheckInError, CheckInSession};
pub use types::{
    AttendanceEntry, AttendanceRecord, CapturedImage, Decision, Employee, NewAttendance,
    NewEmployee, PhotoCategory, VerificationAttemptResult, VerificationOutcome,
    VerificationStatus,
};
