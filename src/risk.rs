use async_trait::async_trait;
use serde_json::{json, Value};

use crate::error::InferenceError;
use crate::inference::Scorer;
use crate::models::{CanonicalMetrics, InferenceResult, RawSubjectRecord, RiskLevel};
use crate::normalize;

/// 0 to 10, one decimal place.
pub fn risk_score(metrics: &CanonicalMetrics) -> f64 {
    let raw = (100.0 - metrics.attendance) * 0.05
        + (10.0 - metrics.academic_score) * 0.6
        + metrics.prior_backlog_count as f64 * 0.5;
    (raw.clamp(0.0, 10.0) * 10.0).round() / 10.0
}

pub fn classify(score: f64) -> RiskLevel {
    match (score * 10.0).round() as i64 {
        60.. => RiskLevel::High,
        30..=59 => RiskLevel::Moderate,
        _ => RiskLevel::Low,
    }
}

pub fn validate(metrics: &CanonicalMetrics) -> Result<(), String> {
    let checks = [
        ((0.0..=100.0).contains(&metrics.attendance), "Attendance must be 0-100"),
        ((0.0..=10.0).contains(&metrics.academic_score), "CGPA must be 0-10"),
        ((0.0..=100.0).contains(&metrics.financial_score), "Financial score must be 0-100"),
        ((0.0..=24.0).contains(&metrics.study_hours), "Study hours must be 0-24"),
    ];

    match checks.iter().find(|(ok, _)| !ok) {
        Some((_, message)) => Err(message.to_string()),
        None => Ok(()),
    }
}

pub fn evaluate(metrics: &CanonicalMetrics) -> Result<InferenceResult, String> {
    validate(metrics)?;
    let risk_score = risk_score(metrics);
    Ok(InferenceResult {
        risk_level: classify(risk_score),
        risk_score,
    })
}

/// Handles one request message. `Ok` goes to stdout, `Err` to stderr with
/// a failing exit code.
pub fn respond(input: &str) -> Result<Value, Value> {
    let failure = |error: String, kind: &str| {
        json!({
            "success": false,
            "error": error,
            "type": kind,
        })
    };

    let record = serde_json::from_str::<Value>(input)
        .ok()
        .and_then(RawSubjectRecord::from_value)
        .ok_or_else(|| failure("Invalid JSON input received".to_string(), "ValueError"))?;
    if normalize::signed_backlogs(&record) < 0.0 {
        return Err(failure("Backlogs cannot be negative".to_string(), "ValueError"));
    }
    let metrics = normalize::normalize(&record);
    let result = evaluate(&metrics).map_err(|message| failure(message, "ValueError"))?;

    Ok(json!({
        "success": true,
        "risk_level": result.risk_level.label(),
        "risk_score": result.risk_score,
        "input_data": metrics,
    }))
}

#[derive(Debug, Clone, Copy, Default)]
pub struct HeuristicScorer;

#[async_trait]
impl Scorer for HeuristicScorer {
    async fn score(&self, metrics: &CanonicalMetrics) -> Result<InferenceResult, InferenceError> {
        evaluate(metrics).map_err(|detail| InferenceError::PredictionFailure { detail })
    }
}
