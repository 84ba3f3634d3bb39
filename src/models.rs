use std::fmt;

use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};

/// Loosely-typed subject record as handed over by the store or a request body.
///
/// Metrics may appear under snake_case, camelCase or title-cased keys; the
/// normalizer is the only code that interprets them.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(transparent)]
pub struct RawSubjectRecord(Map<String, Value>);

impl RawSubjectRecord {
    pub fn new(fields: Map<String, Value>) -> Self {
        Self(fields)
    }

    /// Returns `None` unless the value is a JSON object.
    pub fn from_value(value: Value) -> Option<Self> {
        match value {
            Value::Object(fields) => Some(Self(fields)),
            _ => None,
        }
    }

    pub fn get(&self, key: &str) -> Option<&Value> {
        self.0.get(key)
    }
}

/// The five indicators in one schema, shared by inference and rendering.
///
/// Serialized field names are the ones the scoring process reads.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
pub struct CanonicalMetrics {
    pub attendance: f64,
    #[serde(rename = "cgpa")]
    pub academic_score: f64,
    pub financial_score: f64,
    pub study_hours: f64,
    #[serde(rename = "previous_year_backlogs")]
    pub prior_backlog_count: u32,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Identity {
    pub name: Option<String>,
    pub external_id: Option<String>,
    pub contact: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize)]
pub enum RiskLevel {
    Low,
    Moderate,
    High,
}

impl RiskLevel {
    /// Case-insensitive; "medium" is accepted for `Moderate`.
    pub fn parse(label: &str) -> Option<Self> {
        match label.trim().to_ascii_lowercase().as_str() {
            "low" => Some(RiskLevel::Low),
            "moderate" | "medium" => Some(RiskLevel::Moderate),
            "high" => Some(RiskLevel::High),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            RiskLevel::Low => "Low",
            RiskLevel::Moderate => "Moderate",
            RiskLevel::High => "High",
        }
    }
}

impl fmt::Display for RiskLevel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.label())
    }
}

/// A successful scoring outcome. Unsuccessful responses never become one.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct InferenceResult {
    pub risk_level: RiskLevel,
    pub risk_score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct Assessment {
    pub risk_level: RiskLevel,
    pub risk_score: f64,
    pub recommendations: Vec<String>,
}

#[derive(Debug, Clone, PartialEq)]
pub struct Report {
    pub bytes: Vec<u8>,
    pub filename: String,
    pub content_type: &'static str,
}

#[derive(Debug, Clone)]
pub struct SubjectScore {
    pub name: String,
    pub email: String,
    pub usn: String,
    pub assessment: Assessment,
}
