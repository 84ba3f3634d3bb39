use std::io::Write;

use chrono::{DateTime, Utc};

use crate::error::RenderError;
use crate::models::{Assessment, Identity, RawSubjectRecord, Report};
use crate::normalize;

pub const CONTENT_TYPE: &str = "text/markdown";

const MISSING: &str = "N/A";

/// Writes the full document to `out`. Any write error aborts rendering.
pub fn write_report<W: Write>(
    out: &mut W,
    title: &str,
    record: &RawSubjectRecord,
    assessment: &Assessment,
    generated_at: DateTime<Utc>,
) -> Result<(), RenderError> {
    let identity = normalize::identity(record);
    let metrics = normalize::normalize(record);
    let field = |value: &Option<String>| value.clone().unwrap_or_else(|| MISSING.to_string());

    writeln!(out, "# {title}")?;
    writeln!(out)?;

    writeln!(out, "## Student Information")?;
    writeln!(out, "- Name: {}", field(&identity.name))?;
    writeln!(out, "- USN: {}", field(&identity.external_id))?;
    writeln!(out, "- Email: {}", field(&identity.contact))?;
    writeln!(out)?;

    writeln!(out, "## Academic Information")?;
    writeln!(out, "- Attendance: {}%", metrics.attendance)?;
    writeln!(out, "- CGPA: {}", metrics.academic_score)?;
    writeln!(out, "- Financial Score: {}", metrics.financial_score)?;
    writeln!(out, "- Study Hours: {}", metrics.study_hours)?;
    writeln!(out, "- Previous Year Backlogs: {}", metrics.prior_backlog_count)?;
    writeln!(out)?;

    writeln!(out, "## Risk Assessment")?;
    writeln!(out, "- Risk Level: {}", assessment.risk_level)?;
    writeln!(out, "- Risk Score: {}", assessment.risk_score)?;
    writeln!(out)?;

    writeln!(out, "## Recommendations")?;
    for (index, tip) in assessment.recommendations.iter().enumerate() {
        writeln!(out, "{}. {}", index + 1, tip)?;
    }
    writeln!(out)?;

    writeln!(
        out,
        "_Generated on: {}_",
        generated_at.format("%Y-%m-%d %H:%M:%S UTC")
    )?;
    out.flush()?;

    Ok(())
}

pub fn build_report(
    title: &str,
    record: &RawSubjectRecord,
    assessment: &Assessment,
    generated_at: DateTime<Utc>,
) -> Result<Report, RenderError> {
    let mut bytes = Vec::new();
    write_report(&mut bytes, title, record, assessment, generated_at)?;

    Ok(Report {
        bytes,
        filename: report_filename(&normalize::identity(record)),
        content_type: CONTENT_TYPE,
    })
}

pub fn report_filename(identity: &Identity) -> String {
    let stem: String = identity
        .external_id
        .as_deref()
        .unwrap_or_default()
        .chars()
        .filter(|c| c.is_ascii_alphanumeric() || *c == '-' || *c == '_')
        .collect();

    if stem.is_empty() {
        "student_report.md".to_string()
    } else {
        format!("{stem}_report.md")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::RiskLevel;
    use chrono::TimeZone;
    use serde_json::json;
    use std::io;

    fn assessment() -> Assessment {
        Assessment {
            risk_level: RiskLevel::Moderate,
            risk_score: 4.5,
            recommendations: vec!["Study at least 1 hour daily.".to_string(), "Revise concepts weekly.".to_string()],
        }
    }

    fn record() -> RawSubjectRecord {
        RawSubjectRecord::from_value(json!({
            "name": "Kavya Rao",
            "usn": "1MS22IS019",
            "email": "kavya@college.edu",
            "attendance": 72,
            "CGPA": 6.8,
            "financialScore": 35,
            "studyHours": "2",
            "previous_year_backlogs": 1
        }))
        .unwrap()
    }

    fn generated_at() -> DateTime<Utc> {
        Utc.with_ymd_and_hms(2026, 3, 14, 9, 30, 0).unwrap()
    }

    struct BrokenSink {
        budget: usize,
    }

    impl Write for BrokenSink {
        fn write(&mut self, buf: &[u8]) -> io::Result<usize> {
            if self.budget < buf.len() {
                return Err(io::Error::new(io::ErrorKind::BrokenPipe, "sink closed"));
            }
            self.budget -= buf.len();
            Ok(buf.len())
        }

        fn flush(&mut self) -> io::Result<()> {
            Ok(())
        }
    }

    #[test]
    fn sections_render_in_fixed_order() {
        let report = build_report("Student Risk Report", &record(), &assessment(), generated_at()).unwrap();
        let text = String::from_utf8(report.bytes).unwrap();

        let order = [
            "# Student Risk Report",
            "## Student Information",
            "- Name: Kavya Rao",
            "- USN: 1MS22IS019",
            "- Email: kavya@college.edu",
            "## Academic Information",
            "- Attendance: 72%",
            "- CGPA: 6.8",
            "- Financial Score: 35",
            "- Study Hours: 2",
            "- Previous Year Backlogs: 1",
            "## Risk Assessment",
            "- Risk Level: Moderate",
            "- Risk Score: 4.5",
            "## Recommendations",
            "1. Study at least 1 hour daily.",
            "2. Revise concepts weekly.",
            "_Generated on: 2026-03-14 09:30:00 UTC_",
        ];
        let mut cursor = 0;
        for needle in order {
            let found = text[cursor..]
                .find(needle)
                .unwrap_or_else(|| panic!("missing or out of order: {needle}"));
            cursor += found + needle.len();
        }
        assert_eq!(report.filename, "1MS22IS019_report.md");
        assert_eq!(report.content_type, "text/markdown");
    }

    #[test]
    fn rendering_is_deterministic() {
        let a = build_report("T", &record(), &assessment(), generated_at()).unwrap();
        let b = build_report("T", &record(), &assessment(), generated_at()).unwrap();
        assert_eq!(a, b);
    }

    #[test]
    fn missing_fields_render_as_zero_and_placeholder() {
        let bare = RawSubjectRecord::default();
        let report = build_report("T", &bare, &assessment(), generated_at()).unwrap();
        let text = String::from_utf8(report.bytes).unwrap();
        assert!(text.contains("- Attendance: 0%"));
        assert!(text.contains("- Previous Year Backlogs: 0"));
        assert!(text.contains("- Name: N/A"));
        assert!(!text.contains("undefined"));
        assert_eq!(report.filename, "student_report.md");
    }

    #[test]
    fn stream_failure_rejects_the_whole_report() {
        let mut sink = BrokenSink { budget: 64 };
        let err = write_report(&mut sink, "T", &record(), &assessment(), generated_at()).unwrap_err();
        assert!(matches!(err, RenderError::Stream(_)));
    }

    #[test]
    fn filename_drops_unsafe_characters() {
        let identity = Identity {
            name: None,
            external_id: Some("../1RV/21 CS".to_string()),
            contact: None,
        };
        assert_eq!(report_filename(&identity), "1RV21CS_report.md");
    }
}
