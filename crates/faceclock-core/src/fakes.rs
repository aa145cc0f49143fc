//! In-memory collaborators for unit tests.

use crate::ports::{
    AttendanceStore, CaptureError, CaptureSource, FaceVerifier, PhotoStorage, StoreError,
};
use crate::types::{
    AttendanceEntry, AttendanceRecord, CapturedImage, Employee, NewAttendance, NewEmployee,
    PhotoCategory, VerificationAttemptResult,
};
use chrono::Utc;
use std::collections::hash_map::DefaultHasher;
use std::hash::{Hash, Hasher};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Mutex;
use std::time::Duration;

pub struct FakeVerifier {
    result: VerificationAttemptResult,
    delay: Option<Duration>,
    calls: AtomicUsize,
}

impl FakeVerifier {
    pub fn returning(result: VerificationAttemptResult) -> Self {
        Self {
            result,
            delay: None,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn slow(result: VerificationAttemptResult, delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::returning(result)
        }
    }

    pub fn calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl FaceVerifier for FakeVerifier {
    async fn verify(&self, _reference: &str, _image: &CapturedImage) -> VerificationAttemptResult {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            tokio::time::sleep(delay).await;
        }
        self.result.clone()
    }
}

#[derive(Default)]
pub struct FakePhotos {
    fail: bool,
    uploads: AtomicUsize,
}

impl FakePhotos {
    pub fn failing() -> Self {
        Self {
            fail: true,
            ..Self::default()
        }
    }

    pub fn uploads(&self) -> usize {
        self.uploads.load(Ordering::SeqCst)
    }
}

impl PhotoStorage for FakePhotos {
    async fn upload(&self, bytes: &[u8], category: PhotoCategory) -> Result<String, StoreError> {
        if self.fail {
            return Err(StoreError::Unavailable("bucket offline".into()));
        }
        self.uploads.fetch_add(1, Ordering::SeqCst);
        let mut hasher = DefaultHasher::new();
        bytes.hash(&mut hasher);
        Ok(format!("{}/{:016x}.jpg", category.as_str(), hasher.finish()))
    }
}

#[derive(Default)]
pub struct FakeStore {
    employees: Mutex<Vec<Employee>>,
    records: Mutex<Vec<AttendanceRecord>>,
    failures_left: AtomicUsize,
}

impl FakeStore {
    pub fn with_employees(employees: Vec<Employee>) -> Self {
        Self {
            employees: Mutex::new(employees),
            ..Self::default()
        }
    }

    /// Make the next `n` record creations fail.
    pub fn fail_next_creates(&self, n: usize) {
        self.failures_left.store(n, Ordering::SeqCst);
    }

    pub fn records(&self) -> Vec<AttendanceRecord> {
        self.records.lock().unwrap().clone()
    }
}

impl AttendanceStore for FakeStore {
    async fn employees(&self) -> Result<Vec<Employee>, StoreError> {
        let mut list = self.employees.lock().unwrap().clone();
        list.sort_by(|a, b| a.name.cmp(&b.name));
        Ok(list)
    }

    async fn register_employee(&self, employee: NewEmployee) -> Result<Employee, StoreError> {
        let mut employees = self.employees.lock().unwrap();
        let created = Employee {
            id: format!("emp-{}", employees.len() + 1),
            name: employee.name,
            email: employee.email,
            photo_locator: employee.photo_locator,
        };
        employees.push(created.clone());
        Ok(created)
    }

    async fn create_attendance(&self, new: NewAttendance) -> Result<AttendanceRecord, StoreError> {
        let failing = self
            .failures_left
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok();
        if failing {
            return Err(StoreError::Backend("insert rejected".into()));
        }
        let mut records = self.records.lock().unwrap();
        let record = AttendanceRecord {
            id: format!("rec-{}", records.len() + 1),
            employee_id: new.employee_id,
            checked_in_at: new.checked_in_at,
            photo_locator: new.photo_locator,
            verification: new.verification,
        };
        records.push(record.clone());
        Ok(record)
    }

    async fn today_attendance(&self) -> Result<Vec<AttendanceEntry>, StoreError> {
        let employees = self.employees.lock().unwrap().clone();
        let mut entries: Vec<AttendanceEntry> = self
            .records
            .lock()
            .unwrap()
            .iter()
            .filter_map(|r| {
                let employee = employees.iter().find(|e| e.id == r.employee_id)?.clone();
                Some(AttendanceEntry {
                    record: r.clone(),
                    employee,
                })
            })
            .collect();
        entries.sort_by(|a, b| b.record.checked_in_at.cmp(&a.record.checked_in_at));
        Ok(entries)
    }
}

/// Yields a fixed frame, or an error once `fail` is set.
pub struct FakeCamera {
    pub fail: bool,
    pub captures: usize,
}

impl FakeCamera {
    pub fn new() -> Self {
        Self {
            fail: false,
            captures: 0,
        }
    }
}

impl CaptureSource for FakeCamera {
    fn capture(&mut self) -> Result<CapturedImage, CaptureError> {
        if self.fail {
            return Err(CaptureError::SourceUnavailable("camera unplugged".into()));
        }
        self.captures += 1;
        Ok(CapturedImage::new(vec![0xFF, 0xD8, 0xFF, 0xE0, 0x00], Utc::now()))
    }
}
