use std::io;
use std::sync::Arc;

use chrono::{DateTime, Utc};
use tracing::{debug, instrument};

use crate::config::{Config, ReportConfig, ScorerKind};
use crate::error::{ErrorKind, PipelineError};
use crate::inference::{ProcessScorer, Scorer};
use crate::models::{Assessment, RawSubjectRecord, Report};
use crate::normalize;
use crate::recommend;
use crate::report;
use crate::risk::HeuristicScorer;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Stage {
    Normalizing,
    Invoking,
    Selecting,
    Rendering,
    Done,
    Failed(ErrorKind),
}

struct Progress {
    stage: Stage,
}

impl Progress {
    fn start() -> Self {
        debug!(stage = ?Stage::Normalizing, "pipeline started");
        Self {
            stage: Stage::Normalizing,
        }
    }

    fn advance(&mut self, next: Stage) {
        debug!(from = ?self.stage, to = ?next, "pipeline stage");
        self.stage = next;
    }

    fn fail(&mut self, err: impl Into<PipelineError>) -> PipelineError {
        let err = err.into();
        self.advance(Stage::Failed(err.kind()));
        err
    }
}

#[derive(Clone)]
pub struct Pipeline {
    scorer: Arc<dyn Scorer>,
    report: ReportConfig,
}

impl Pipeline {
    pub fn new(scorer: Arc<dyn Scorer>, report: ReportConfig) -> Self {
        Self { scorer, report }
    }

    pub fn from_config(config: &Config) -> io::Result<Self> {
        let scorer: Arc<dyn Scorer> = match config.scorer.kind {
            ScorerKind::Process => Arc::new(ProcessScorer::from_config(&config.scorer)?),
            ScorerKind::Builtin => Arc::new(HeuristicScorer),
        };
        Ok(Self::new(scorer, config.report.clone()))
    }

    pub async fn assess(&self, record: &RawSubjectRecord) -> Result<Assessment, PipelineError> {
        self.assess_traced(record).await.1
    }

    /// Like [`Pipeline::assess`], also returning the stage the run ended in:
    /// `Done`, or `Failed` with the kind of error that stopped it.
    #[instrument(skip_all)]
    pub async fn assess_traced(
        &self,
        record: &RawSubjectRecord,
    ) -> (Stage, Result<Assessment, PipelineError>) {
        let mut progress = Progress::start();
        let outcome = self.assess_with(&mut progress, record).await;
        if outcome.is_ok() {
            progress.advance(Stage::Done);
        }
        (progress.stage, outcome)
    }

    /// Renders with the current time in the footer.
    pub fn render(
        &self,
        record: &RawSubjectRecord,
        assessment: &Assessment,
    ) -> Result<Report, PipelineError> {
        self.render_at(record, assessment, Utc::now())
    }

    pub fn render_at(
        &self,
        record: &RawSubjectRecord,
        assessment: &Assessment,
        generated_at: DateTime<Utc>,
    ) -> Result<Report, PipelineError> {
        let report = report::build_report(&self.report.title, record, assessment, generated_at)?;
        Ok(report)
    }

    pub async fn assess_and_render(
        &self,
        record: &RawSubjectRecord,
    ) -> Result<(Assessment, Report), PipelineError> {
        self.assess_and_render_traced(record).await.1
    }

    #[instrument(skip_all)]
    pub async fn assess_and_render_traced(
        &self,
        record: &RawSubjectRecord,
    ) -> (Stage, Result<(Assessment, Report), PipelineError>) {
        let mut progress = Progress::start();
        let outcome = self.assess_then_render(&mut progress, record).await;
        if outcome.is_ok() {
            progress.advance(Stage::Done);
        }
        (progress.stage, outcome)
    }

    async fn assess_then_render(
        &self,
        progress: &mut Progress,
        record: &RawSubjectRecord,
    ) -> Result<(Assessment, Report), PipelineError> {
        let assessment = self.assess_with(progress, record).await?;

        progress.advance(Stage::Rendering);
        let report = self
            .render(record, &assessment)
            .map_err(|err| progress.fail(err))?;
        Ok((assessment, report))
    }

    async fn assess_with(
        &self,
        progress: &mut Progress,
        record: &RawSubjectRecord,
    ) -> Result<Assessment, PipelineError> {
        let metrics = normalize::normalize(record);

        progress.advance(Stage::Invoking);
        let result = self
            .scorer
            .score(&metrics)
            .await
            .map_err(|err| progress.fail(err))?;

        progress.advance(Stage::Selecting);
        let recommendations = recommend::recommendations_for(Some(result.risk_level.label()))
            .iter()
            .map(|tip| tip.to_string())
            .collect();

        Ok(Assessment {
            risk_level: result.risk_level,
            risk_score: result.risk_score,
            recommendations,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::InferenceError;
    use crate::models::{CanonicalMetrics, InferenceResult, RiskLevel};
    use async_trait::async_trait;
    use serde_json::json;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct StubScorer {
        reply: fn() -> Result<InferenceResult, InferenceError>,
        seen: Mutex<Vec<CanonicalMetrics>>,
        calls: AtomicUsize,
    }

    impl StubScorer {
        fn new(reply: fn() -> Result<InferenceResult, InferenceError>) -> Arc<Self> {
            Arc::new(Self {
                reply,
                seen: Mutex::new(Vec::new()),
                calls: AtomicUsize::new(0),
            })
        }
    }

    #[async_trait]
    impl Scorer for StubScorer {
        async fn score(&self, metrics: &CanonicalMetrics) -> Result<InferenceResult, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.seen.lock().unwrap().push(*metrics);
            (self.reply)()
        }
    }

    fn high() -> Result<InferenceResult, InferenceError> {
        Ok(InferenceResult {
            risk_level: RiskLevel::High,
            risk_score: 8.0,
        })
    }

    fn unavailable() -> Result<InferenceResult, InferenceError> {
        Err(InferenceError::PredictionFailure {
            detail: "model unavailable".to_string(),
        })
    }

    fn subject() -> RawSubjectRecord {
        RawSubjectRecord::from_value(json!({
            "name": "Arjun Shetty",
            "usn": "4NI21EC007",
            "email": "arjun@college.edu",
            "attendance": 60,
            "cgpa": 5.5,
            "study_hours": 1,
            "previous_year_backlogs": 3,
            "financial_score": 40
        }))
        .unwrap()
    }

    #[tokio::test]
    async fn assessment_carries_selected_recommendations() {
        let scorer = StubScorer::new(high);
        let pipeline = Pipeline::new(scorer.clone(), ReportConfig::default());

        let assessment = pipeline.assess(&subject()).await.unwrap();
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert_eq!(assessment.risk_score, 8.0);
        assert_eq!(assessment.recommendations.len(), 5);
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn scorer_sees_normalized_metrics() {
        let scorer = StubScorer::new(high);
        let pipeline = Pipeline::new(scorer.clone(), ReportConfig::default());
        let camel = RawSubjectRecord::from_value(json!({
            "Attendance": "60",
            "CGPA": 5.5,
            "studyHours": 1,
            "previousYearBacklogs": 3,
            "financialScore": 40
        }))
        .unwrap();

        pipeline.assess(&subject()).await.unwrap();
        pipeline.assess(&camel).await.unwrap();

        let seen = scorer.seen.lock().unwrap();
        assert_eq!(seen.len(), 2);
        assert_eq!(seen[0], seen[1]);
        assert_eq!(seen[0].prior_backlog_count, 3);
    }

    #[tokio::test]
    async fn failures_propagate_without_substitution() {
        let scorer = StubScorer::new(unavailable);
        let pipeline = Pipeline::new(scorer.clone(), ReportConfig::default());

        let err = pipeline.assess(&subject()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::PredictionFailure);
        assert!(err.to_string().contains("model unavailable"));
        assert_eq!(scorer.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn failed_assessment_never_produces_a_report() {
        let pipeline = Pipeline::new(StubScorer::new(unavailable), ReportConfig::default());

        let outcome = pipeline.assess_and_render(&subject()).await;
        match outcome {
            Err(PipelineError::Inference(InferenceError::PredictionFailure { .. })) => {}
            Err(other) => panic!("unexpected error: {other:?}"),
            Ok(_) => panic!("report rendered for a failed assessment"),
        }
    }

    #[tokio::test]
    async fn runs_end_in_done_or_failed_with_the_error_kind() {
        let ok = Pipeline::new(StubScorer::new(high), ReportConfig::default());
        let (stage, outcome) = ok.assess_traced(&subject()).await;
        assert_eq!(stage, Stage::Done);
        assert!(outcome.is_ok());

        let (stage, outcome) = ok.assess_and_render_traced(&subject()).await;
        assert_eq!(stage, Stage::Done);
        assert!(outcome.is_ok());

        let failing = Pipeline::new(StubScorer::new(unavailable), ReportConfig::default());
        let (stage, outcome) = failing.assess_traced(&subject()).await;
        assert_eq!(stage, Stage::Failed(ErrorKind::PredictionFailure));
        assert!(outcome.is_err());

        let (stage, outcome) = failing.assess_and_render_traced(&subject()).await;
        assert_eq!(stage, Stage::Failed(ErrorKind::PredictionFailure));
        assert!(outcome.is_err());
    }

    #[tokio::test]
    async fn report_shows_the_scored_numbers() {
        let pipeline = Pipeline::new(StubScorer::new(high), ReportConfig::default());
        let (assessment, report) = pipeline.assess_and_render(&subject()).await.unwrap();
        let text = String::from_utf8(report.bytes).unwrap();

        assert_eq!(assessment.recommendations.len(), 5);
        assert!(text.contains("Attendance: 60%"));
        assert!(text.contains("CGPA: 5.5"));
        assert!(text.contains("Risk Level: High"));
        assert!(text.contains("5. Reduce distractions"));
        assert_eq!(report.filename, "4NI21EC007_report.md");
    }

    #[tokio::test]
    async fn builtin_scorer_is_wired_from_config() {
        let mut config = Config::default();
        config.scorer.kind = ScorerKind::Builtin;
        let pipeline = Pipeline::from_config(&config).unwrap();

        // 40 * 0.05 + 4.5 * 0.6 + 3 * 0.5 = 6.2
        let assessment = pipeline.assess(&subject()).await.unwrap();
        assert_eq!(assessment.risk_level, RiskLevel::High);
        assert_eq!(assessment.risk_score, 6.2);
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn end_to_end_through_a_scoring_process() {
        let scorer = ProcessScorer::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"cat > /dev/null; printf '%s' '{"success":true,"risk_level":"High","risk_score":8}'"#
                    .to_string(),
            ],
            std::time::Duration::from_secs(10),
            2,
        );
        let pipeline = Pipeline::new(Arc::new(scorer), ReportConfig::default());

        let (assessment, report) = pipeline.assess_and_render(&subject()).await.unwrap();
        assert_eq!(assessment.recommendations.len(), 5);
        assert!(!report.bytes.is_empty());

        let text = String::from_utf8(report.bytes).unwrap();
        assert!(text.contains("Attendance: 60%"));
        assert!(text.contains("Risk Level: High"));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn process_diagnostics_block_the_report() {
        let scorer = ProcessScorer::new(
            "sh",
            vec![
                "-c".to_string(),
                r#"cat > /dev/null; echo 'Traceback: model missing' >&2"#.to_string(),
            ],
            std::time::Duration::from_secs(10),
            1,
        );
        let pipeline = Pipeline::new(Arc::new(scorer), ReportConfig::default());

        let err = pipeline.assess_and_render(&subject()).await.unwrap_err();
        assert_eq!(err.kind(), ErrorKind::ProcessExecutionError);
    }
}
