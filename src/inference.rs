//! Scoring capability and its process-backed implementation.

use std::io;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::process::Command;
use tokio::sync::Semaphore;
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::config::ScorerConfig;
use crate::error::InferenceError;
use crate::models::{CanonicalMetrics, InferenceResult, RiskLevel};

#[async_trait]
pub trait Scorer: Send + Sync {
    async fn score(&self, metrics: &CanonicalMetrics) -> Result<InferenceResult, InferenceError>;
}

/// Wire shape of the scorer's reply. The `risk`/`score` spellings are
/// accepted for older scoring scripts.
#[derive(Debug, Deserialize)]
struct ScorerResponse {
    #[serde(default)]
    success: bool,
    #[serde(default, alias = "risk")]
    risk_level: Option<String>,
    #[serde(default, alias = "score")]
    risk_score: Option<f64>,
    #[serde(default)]
    error: Option<String>,
}

#[derive(Debug, Clone)]
pub struct ProcessScorer {
    program: PathBuf,
    args: Vec<String>,
    timeout: Duration,
    gate: Arc<Semaphore>,
}

impl ProcessScorer {
    pub fn new(
        program: impl Into<PathBuf>,
        args: Vec<String>,
        timeout: Duration,
        max_concurrent: usize,
    ) -> Self {
        Self {
            program: program.into(),
            args,
            timeout,
            gate: Arc::new(Semaphore::new(max_concurrent.max(1))),
        }
    }

    /// Without an explicit program the current executable's `scorer`
    /// subcommand is used.
    pub fn from_config(config: &ScorerConfig) -> io::Result<Self> {
        let (program, args) = match &config.program {
            Some(program) => (program.clone(), config.args.clone()),
            None => (std::env::current_exe()?, vec!["scorer".to_string()]),
        };
        Ok(Self::new(
            program,
            args,
            config.timeout(),
            config.max_concurrent,
        ))
    }

    fn program_label(&self) -> String {
        self.program.display().to_string()
    }

    fn spawn_error(&self, source: io::Error) -> InferenceError {
        InferenceError::ProcessSpawn {
            program: self.program_label(),
            source,
        }
    }
}

#[async_trait]
impl Scorer for ProcessScorer {
    #[instrument(skip_all, fields(invocation_id = %Uuid::new_v4(), program = %self.program.display()))]
    async fn score(&self, metrics: &CanonicalMetrics) -> Result<InferenceResult, InferenceError> {
        // Metrics are always finite, so this only fails on allocation.
        let payload = serde_json::to_vec(metrics).map_err(|err| self.spawn_error(err.into()))?;

        let _permit = self
            .gate
            .acquire()
            .await
            .map_err(|_| self.spawn_error(io::Error::other("scoring gate closed")))?;

        debug!(?metrics, "spawning scoring process");
        let mut child = Command::new(&self.program)
            .args(&self.args)
            .stdin(Stdio::piped())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|source| self.spawn_error(source))?;

        let (Some(mut stdin), Some(mut stdout), Some(mut stderr)) =
            (child.stdin.take(), child.stdout.take(), child.stderr.take())
        else {
            return Err(self.spawn_error(io::Error::other("scoring process stdio unavailable")));
        };

        let exchange = async {
            let write = async move {
                stdin.write_all(&payload).await?;
                stdin.shutdown().await
            };
            let read_out = async {
                let mut buf = Vec::new();
                stdout.read_to_end(&mut buf).await.map(|_| buf)
            };
            let read_err = async {
                let mut buf = Vec::new();
                stderr.read_to_end(&mut buf).await.map(|_| buf)
            };
            let (written, out, err) = tokio::join!(write, read_out, read_err);
            let status = child.wait().await;
            (written, out, err, status)
        };

        let outcome = tokio::time::timeout(self.timeout, exchange).await;
        let (written, out, err, status) = match outcome {
            Ok(parts) => parts,
            Err(_) => {
                warn!(timeout = ?self.timeout, "scoring process timed out, killing it");
                if let Err(err) = child.kill().await {
                    warn!(error = %err, "failed to kill scoring process");
                }
                return Err(InferenceError::ProcessTimeout {
                    timeout: self.timeout,
                });
            }
        };

        if let Err(err) = written {
            debug!(error = %err, "scoring process closed its input early");
        }
        match status {
            Ok(status) if !status.success() => warn!(%status, "scoring process exited unsuccessfully"),
            Ok(status) => debug!(%status, "scoring process exited"),
            Err(err) => warn!(error = %err, "failed to reap scoring process"),
        }

        let stdout = out.map_err(|err| InferenceError::ProcessExecution {
            diagnostics: format!("failed to read scoring output: {err}"),
        })?;
        let stderr = err.map_err(|err| InferenceError::ProcessExecution {
            diagnostics: format!("failed to read scoring diagnostics: {err}"),
        })?;

        let result = interpret(
            &String::from_utf8_lossy(&stdout),
            &String::from_utf8_lossy(&stderr),
        );
        match &result {
            Ok(res) => info!(risk_level = %res.risk_level, risk_score = res.risk_score, "scoring succeeded"),
            Err(err) => warn!(kind = %err.kind(), error = %err, "scoring failed"),
        }
        result
    }
}

/// Resolves collected output in fixed precedence: diagnostics, empty
/// output, unparsable output, unsuccessful prediction, result.
pub fn interpret(stdout: &str, stderr: &str) -> Result<InferenceResult, InferenceError> {
    if !stderr.trim().is_empty() {
        return Err(InferenceError::ProcessExecution {
            diagnostics: stderr.to_string(),
        });
    }

    let body = stdout.trim();
    if body.is_empty() {
        return Err(InferenceError::EmptyOutput);
    }

    let invalid = |reason: String| InferenceError::InvalidOutputFormat {
        raw: stdout.to_string(),
        reason,
    };

    let response: ScorerResponse =
        serde_json::from_str(body).map_err(|err| invalid(err.to_string()))?;

    if !response.success {
        return Err(InferenceError::PredictionFailure {
            detail: response
                .error
                .unwrap_or_else(|| "scorer reported failure without detail".to_string()),
        });
    }

    let label = response
        .risk_level
        .ok_or_else(|| invalid("missing risk level".to_string()))?;
    let risk_level = RiskLevel::parse(&label)
        .ok_or_else(|| invalid(format!("unrecognized risk level `{label}`")))?;
    let risk_score = response
        .risk_score
        .filter(|score| score.is_finite())
        .ok_or_else(|| invalid("missing risk score".to_string()))?;

    Ok(InferenceResult {
        risk_level,
        risk_score,
    })
}
