//! Text rendering for the interactive check-in and the attendance listing.

use chrono::Local;
use faceclock_core::{
    Action, AttendanceEntry, CheckInAttempt, Decision, Disposition, Employee,
    VerificationAttemptResult, VerificationStatus,
};

/// Review summary shown after verification completes.
pub fn summary(attempt: &CheckInAttempt) -> String {
    let mut lines = vec![format!("Employee:     {}", attempt.employee().name)];

    match attempt.result() {
        Some(VerificationAttemptResult::Succeeded(outcome)) => {
            lines.push(format!("Face match:   {}", yes_no(outcome.matched())));
            lines.push(format!(
                "Liveness:     {}",
                if outcome.is_live() { "live" } else { "not live" }
            ));
            lines.push(format!("Confidence:   {:.1}%", outcome.confidence() * 100.0));
            lines.push(format!(
                "Service says: {}",
                match outcome.decision() {
                    Decision::Allow => "allow",
                    Decision::Deny => "deny",
                }
            ));
        }
        Some(VerificationAttemptResult::ServiceUnavailable(_)) => {
            lines.push("Verification: not performed".to_string());
        }
        None => {}
    }

    if let Some(decision) = attempt.decision() {
        let headline = match decision.disposition {
            Disposition::Allowed => "CHECK-IN ALLOWED",
            Disposition::Blocked => "CHECK-IN BLOCKED",
            Disposition::AllowedWithWarning => "WARNING: UNVERIFIED CHECK-IN",
        };
        lines.push(String::new());
        lines.push(headline.to_string());
        lines.push(decision.message.clone());
        if decision.disposition.requires_acknowledgment() && attempt.is_acknowledged() {
            lines.push("(bypass acknowledged)".to_string());
        }
    }
    lines.join("\n")
}

/// Keyword and one-letter shortcut the operator types for an action, if it
/// is offered at a prompt.
fn keyword(action: Action) -> Option<(&'static str, &'static str)> {
    match action {
        Action::Confirm => Some(("confirm", "y")),
        Action::AcknowledgeBypass => Some(("acknowledge", "a")),
        Action::Retry => Some(("retry", "r")),
        Action::Cancel => Some(("cancel", "q")),
        Action::Select | Action::Capture | Action::FinishCommit => None,
    }
}

/// e.g. `[confirm/retry/cancel]`
pub fn choices(actions: &[Action]) -> String {
    let words: Vec<&str> = actions
        .iter()
        .filter_map(|a| keyword(*a).map(|(word, _)| word))
        .collect();
    format!("[{}]", words.join("/"))
}

/// Match operator input against the offered actions. Accepts the full
/// keyword or its shortcut.
pub fn parse_choice(input: &str, actions: &[Action]) -> Option<Action> {
    let input = input.trim().to_ascii_lowercase();
    if input.is_empty() {
        return None;
    }
    actions.iter().copied().find(|a| {
        keyword(*a).is_some_and(|(word, short)| input == word || input == short)
    })
}

pub fn employee_line(employee: &Employee) -> String {
    format!(
        "{}  {:<24} {:<32} {}",
        employee.id,
        employee.name,
        employee.email,
        if employee.photo_locator.is_some() {
            "photo"
        } else {
            "no photo"
        }
    )
}

pub fn attendance_line(entry: &AttendanceEntry) -> String {
    let time = entry
        .record
        .checked_in_at
        .with_timezone(&Local)
        .format("%H:%M:%S");
    let status = match &entry.record.verification {
        VerificationStatus::Verified => "verified".to_string(),
        VerificationStatus::Bypassed { note } => format!("UNVERIFIED ({note})"),
    };
    format!("{time}  {:<24} {status}", entry.employee.name)
}

/// Employees as a JSON array, for scripting.
pub fn employees_json(employees: &[Employee]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(employees)
}

/// Check-ins as a JSON array of `{record, employee}` objects.
pub fn attendance_json(entries: &[AttendanceEntry]) -> serde_json::Result<String> {
    serde_json::to_string_pretty(entries)
}

fn yes_no(b: bool) -> &'static str {
    if b {
        "yes"
    } else {
        "no"
    }
}
