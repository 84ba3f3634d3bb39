use serde_json::Value;

use crate::models::{CanonicalMetrics, Identity, RawSubjectRecord};

// Lookup order per field: snake_case, camelCase, title-cased.
const ATTENDANCE: &[&str] = &["attendance", "Attendance"];
const ACADEMIC_SCORE: &[&str] = &["cgpa", "academic_score", "academicScore", "CGPA"];
const FINANCIAL_SCORE: &[&str] = &["financial_score", "financialScore", "FinancialScore"];
const STUDY_HOURS: &[&str] = &["study_hours", "studyHours", "StudyHours"];
const BACKLOGS: &[&str] = &[
    "previous_year_backlogs",
    "previousYearBacklogs",
    "PreviousYearBacklogs",
];

const NAME: &[&str] = &["name", "Name"];
const EXTERNAL_ID: &[&str] = &["usn", "USN"];
const CONTACT: &[&str] = &["email", "Email"];

/// Shared by scoring and rendering. Never fails: absent or non-numeric
/// fields come out as 0.
pub fn normalize(record: &RawSubjectRecord) -> CanonicalMetrics {
    CanonicalMetrics {
        attendance: metric(record, ATTENDANCE),
        academic_score: metric(record, ACADEMIC_SCORE),
        financial_score: metric(record, FINANCIAL_SCORE),
        study_hours: metric(record, STUDY_HOURS),
        prior_backlog_count: count(record, BACKLOGS),
    }
}

pub fn identity(record: &RawSubjectRecord) -> Identity {
    Identity {
        name: text(record, NAME),
        external_id: text(record, EXTERNAL_ID),
        contact: text(record, CONTACT),
    }
}

/// First key holding something other than null or an empty string.
fn resolve<'a>(record: &'a RawSubjectRecord, keys: &[&str]) -> Option<&'a Value> {
    keys.iter()
        .filter_map(|key| record.get(key))
        .find(|value| match value {
            Value::Null => false,
            Value::String(s) => !s.trim().is_empty(),
            _ => true,
        })
}

fn metric(record: &RawSubjectRecord, keys: &[&str]) -> f64 {
    resolve(record, keys).map(coerce).unwrap_or(0.0)
}

/// The backlog count as supplied, before clamping. Zero when absent.
pub fn signed_backlogs(record: &RawSubjectRecord) -> f64 {
    metric(record, BACKLOGS)
}

fn count(record: &RawSubjectRecord, keys: &[&str]) -> u32 {
    let value = metric(record, keys);
    if value <= 0.0 {
        0
    } else if value >= u32::MAX as f64 {
        u32::MAX
    } else {
        value.trunc() as u32
    }
}

fn coerce(value: &Value) -> f64 {
    let number = match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    };
    number.filter(|n| n.is_finite()).unwrap_or(0.0)
}

fn text(record: &RawSubjectRecord, keys: &[&str]) -> Option<String> {
    resolve(record, keys).map(|value| match value {
        Value::String(s) => s.trim().to_string(),
        other => other.to_string(),
    })
}
