//! SQLite-backed employee and attendance store.
//!
//! The connection lives on a dedicated OS thread; async callers talk to it
//! through a bounded request channel and receive replies on oneshot channels,
//! so no tokio worker ever blocks on disk I/O.

use chrono::{DateTime, Local, SecondsFormat, TimeZone, Utc};
use faceclock_core::{
    AttendanceEntry, AttendanceRecord, AttendanceStore, Employee, NewAttendance, NewEmployee,
    StoreError, VerificationStatus,
};
use rusqlite::{params, Connection, OptionalExtension, Row};
use std::path::Path;
use tokio::sync::{mpsc, oneshot};

const SCHEMA: &str = "
    PRAGMA foreign_keys = ON;
    CREATE TABLE IF NOT EXISTS employees (
        id            TEXT PRIMARY KEY,
        name          TEXT NOT NULL,
        email         TEXT NOT NULL UNIQUE,
        photo_locator TEXT,
        created_at    TEXT NOT NULL
    );
    CREATE TABLE IF NOT EXISTS attendance (
        id                TEXT PRIMARY KEY,
        employee_id       TEXT NOT NULL REFERENCES employees(id),
        checked_in_at     TEXT NOT NULL,
        photo_locator     TEXT NOT NULL,
        verification      TEXT NOT NULL,
        verification_note TEXT
    );
    CREATE INDEX IF NOT EXISTS attendance_checked_in_at ON attendance(checked_in_at);
";

type Reply<T> = oneshot::Sender<Result<T, StoreError>>;

/// Messages sent from async callers to the store thread.
enum StoreRequest {
    ListEmployees {
        reply: Reply<Vec<Employee>>,
    },
    RegisterEmployee {
        employee: NewEmployee,
        reply: Reply<Employee>,
    },
    CreateAttendance {
        attendance: NewAttendance,
        reply: Reply<AttendanceRecord>,
    },
    AttendanceSince {
        since: DateTime<Utc>,
        reply: Reply<Vec<AttendanceEntry>>,
    },
}

/// Clone-safe handle to the store thread.
#[derive(Clone)]
pub struct StoreHandle {
    tx: mpsc::Sender<StoreRequest>,
}

/// Open (or create) the database at `db_path` and spawn the store thread.
pub fn open_store(db_path: &Path) -> Result<StoreHandle, StoreError> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)
            .map_err(|e| StoreError::Unavailable(format!("{}: {e}", parent.display())))?;
    }
    let conn = Connection::open(db_path).map_err(backend)?;
    tracing::info!(path = %db_path.display(), "attendance database opened");
    spawn_store(conn)
}

/// In-memory database, for tests and dry runs.
pub fn open_in_memory() -> Result<StoreHandle, StoreError> {
    spawn_store(Connection::open_in_memory().map_err(backend)?)
}

fn spawn_store(conn: Connection) -> Result<StoreHandle, StoreError> {
    conn.execute_batch(SCHEMA).map_err(backend)?;

    let (tx, mut rx) = mpsc::channel::<StoreRequest>(16);

    std::thread::Builder::new()
        .name("faceclock-store".into())
        .spawn(move || {
            tracing::debug!("store thread started");
            while let Some(req) = rx.blocking_recv() {
                match req {
                    StoreRequest::ListEmployees { reply } => {
                        let _ = reply.send(list_employees(&conn));
                    }
                    StoreRequest::RegisterEmployee { employee, reply } => {
                        let _ = reply.send(insert_employee(&conn, employee));
                    }
                    StoreRequest::CreateAttendance { attendance, reply } => {
                        let _ = reply.send(insert_attendance(&conn, attendance));
                    }
                    StoreRequest::AttendanceSince { since, reply } => {
                        let _ = reply.send(attendance_since(&conn, since));
                    }
                }
            }
            tracing::debug!("store thread exiting");
        })
        .map_err(|e| StoreError::Unavailable(format!("failed to spawn store thread: {e}")))?;

    Ok(StoreHandle { tx })
}

impl StoreHandle {
    async fn request<T>(
        &self,
        make: impl FnOnce(Reply<T>) -> StoreRequest,
    ) -> Result<T, StoreError> {
        let (reply_tx, reply_rx) = oneshot::channel();
        self.tx
            .send(make(reply_tx))
            .await
            .map_err(|_| StoreError::Unavailable("store thread exited".into()))?;
        reply_rx
            .await
            .map_err(|_| StoreError::Unavailable("store thread exited".into()))?
    }

    /// Check-ins at or after `since`, newest first.
    pub async fn attendance_since(
        &self,
        since: DateTime<Utc>,
    ) -> Result<Vec<AttendanceEntry>, StoreError> {
        self.request(|reply| StoreRequest::AttendanceSince { since, reply })
            .await
    }
}

impl AttendanceStore for StoreHandle {
    async fn employees(&self) -> Result<Vec<Employee>, StoreError> {
        self.request(|reply| StoreRequest::ListEmployees { reply }).await
    }

    async fn register_employee(&self, employee: NewEmployee) -> Result<Employee, StoreError> {
        self.request(|reply| StoreRequest::RegisterEmployee { employee, reply })
            .await
    }

    async fn create_attendance(
        &self,
        attendance: NewAttendance,
    ) -> Result<AttendanceRecord, StoreError> {
        self.request(|reply| StoreRequest::CreateAttendance { attendance, reply })
            .await
    }

    async fn today_attendance(&self) -> Result<Vec<AttendanceEntry>, StoreError> {
        self.attendance_since(start_of_local_day(Local::now())).await
    }
}

/// Midnight of `now`'s local calendar day, in UTC.
pub fn start_of_local_day(now: DateTime<Local>) -> DateTime<Utc> {
    now.date_naive()
        .and_hms_opt(0, 0, 0)
        .and_then(|midnight| Local.from_local_datetime(&midnight).earliest())
        .map(|d| d.with_timezone(&Utc))
        .unwrap_or_else(|| now.with_timezone(&Utc))
}

fn backend(e: rusqlite::Error) -> StoreError {
    StoreError::Backend(e.to_string())
}

/// Fixed-width RFC 3339 so timestamps compare correctly as text.
fn timestamp(t: DateTime<Utc>) -> String {
    t.to_rfc3339_opts(SecondsFormat::Micros, true)
}

fn parse_timestamp(s: &str) -> Result<DateTime<Utc>, StoreError> {
    DateTime::parse_from_rfc3339(s)
        .map(|d| d.with_timezone(&Utc))
        .map_err(|e| StoreError::Backend(format!("bad timestamp {s:?}: {e}")))
}

fn employee_from_row(row: &Row<'_>, offset: usize) -> rusqlite::Result<Employee> {
    Ok(Employee {
        id: row.get(offset)?,
        name: row.get(offset + 1)?,
        email: row.get(offset + 2)?,
        photo_locator: row.get(offset + 3)?,
    })
}

fn list_employees(conn: &Connection) -> Result<Vec<Employee>, StoreError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT id, name, email, photo_locator FROM employees ORDER BY name COLLATE NOCASE, id",
        )
        .map_err(backend)?;
    let rows = stmt
        .query_map([], |row| employee_from_row(row, 0))
        .map_err(backend)?;
    rows.collect::<rusqlite::Result<Vec<_>>>().map_err(backend)
}

fn insert_employee(conn: &Connection, new: NewEmployee) -> Result<Employee, StoreError> {
    let employee = Employee {
        id: uuid::Uuid::new_v4().to_string(),
        name: new.name,
        email: new.email,
        photo_locator: new.photo_locator,
    };
    conn.execute(
        "INSERT INTO employees (id, name, email, photo_locator, created_at) VALUES (?1, ?2, ?3, ?4, ?5)",
        params![
            employee.id,
            employee.name,
            employee.email,
            employee.photo_locator,
            timestamp(Utc::now())
        ],
    )
    .map_err(|e| match e {
        rusqlite::Error::SqliteFailure(f, _) if f.code == rusqlite::ErrorCode::ConstraintViolation => {
            StoreError::Backend(format!("an employee with email {} already exists", employee.email))
        }
        other => backend(other),
    })?;
    tracing::info!(employee = %employee.id, name = %employee.name, "employee registered");
    Ok(employee)
}

fn insert_attendance(conn: &Connection, new: NewAttendance) -> Result<AttendanceRecord, StoreError> {
    let exists = conn
        .query_row(
            "SELECT 1 FROM employees WHERE id = ?1",
            params![new.employee_id],
            |_| Ok(()),
        )
        .optional()
        .map_err(backend)?;
    if exists.is_none() {
        return Err(StoreError::NotFound(format!("employee {}", new.employee_id)));
    }

    let record = AttendanceRecord {
        id: uuid::Uuid::new_v4().to_string(),
        employee_id: new.employee_id,
        checked_in_at: new.checked_in_at,
        photo_locator: new.photo_locator,
        verification: new.verification,
    };
    conn.execute(
        "INSERT INTO attendance (id, employee_id, checked_in_at, photo_locator, verification, verification_note)
         VALUES (?1, ?2, ?3, ?4, ?5, ?6)",
        params![
            record.id,
            record.employee_id,
            timestamp(record.checked_in_at),
            record.photo_locator,
            record.verification.label(),
            record.verification.note(),
        ],
    )
    .map_err(backend)?;
    Ok(record)
}

fn attendance_since(conn: &Connection, since: DateTime<Utc>) -> Result<Vec<AttendanceEntry>, StoreError> {
    let mut stmt = conn
        .prepare_cached(
            "SELECT e.id, e.name, e.email, e.photo_locator,
                    a.id, a.checked_in_at, a.photo_locator, a.verification, a.verification_note
             FROM attendance a JOIN employees e ON e.id = a.employee_id
             WHERE a.checked_in_at >= ?1
             ORDER BY a.checked_in_at DESC",
        )
        .map_err(backend)?;
    let rows = stmt
        .query_map(params![timestamp(since)], |row| {
            Ok((
                employee_from_row(row, 0)?,
                row.get::<_, String>(4)?,
                row.get::<_, String>(5)?,
                row.get::<_, String>(6)?,
                row.get::<_, String>(7)?,
                row.get::<_, Option<String>>(8)?,
            ))
        })
        .map_err(backend)?;

    let mut entries = Vec::new();
    for row in rows {
        let (employee, id, checked_in_at, photo_locator, verification, note) = row.map_err(backend)?;
        let verification = match verification.as_str() {
            "verified" => VerificationStatus::Verified,
            "bypassed" => VerificationStatus::Bypassed {
                note: note.unwrap_or_default(),
            },
            other => {
                return Err(StoreError::Backend(format!("unknown verification status {other:?}")))
            }
        };
        entries.push(AttendanceEntry {
            record: AttendanceRecord {
                id,
                employee_id: employee.id.clone(),
                checked_in_at: parse_timestamp(&checked_in_at)?,
                photo_locator,
                verification,
            },
            employee,
        });
    }
    Ok(entries)
}
