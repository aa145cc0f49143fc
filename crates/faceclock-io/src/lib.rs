//! faceclock-io: concrete collaborators for the check-in flow.
//!
//! - [`verifier`]: HTTP client for the face-verification service
//! - [`photos`]: content-addressed photo storage on disk
//! - [`store`]: SQLite employee/attendance store on a dedicated thread
//! - [`capture`]: still-image capture with dark-frame rejection

pub mod capture;
pub mod photos;
pub mod store;
pub mod verifier;

pub use capture::StillImageCapture;
pub use photos::LocalPhotoStore;
pub use store::{open_in_memory, open_store, StoreHandle};
pub use verifier::{HttpVerifier, ServiceHealth, VerifierError};
