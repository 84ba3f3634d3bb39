use std::env;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use anyhow::{Context, Result};
use serde::Deserialize;

const DEFAULT_CONFIG_FILE: &str = "risk-assessor.toml";

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    pub scorer: ScorerConfig,
    pub report: ReportConfig,
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ScorerKind {
    /// One child process per assessment
    #[default]
    Process,
    /// The reference heuristic, evaluated in-process
    Builtin,
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ScorerConfig {
    pub kind: ScorerKind,
    /// Executable speaking the JSON stdin/stdout contract. Unset means this
    /// binary's own `scorer` subcommand.
    pub program: Option<PathBuf>,
    pub args: Vec<String>,
    /// Wall-clock budget for one invocation before the process is killed
    pub timeout_secs: u64,
    /// Upper bound on scoring processes alive at once
    pub max_concurrent: usize,
}

impl Default for ScorerConfig {
    fn default() -> Self {
        Self {
            kind: ScorerKind::Process,
            program: None,
            args: Vec::new(),
            timeout_secs: 30,
            max_concurrent: 4,
        }
    }
}

impl ScorerConfig {
    pub fn timeout(&self) -> Duration {
        Duration::from_secs(self.timeout_secs.max(1))
    }
}

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct ReportConfig {
    pub title: String,
}

impl Default for ReportConfig {
    fn default() -> Self {
        Self {
            title: "Student Risk Report".to_string(),
        }
    }
}

impl Config {
    /// Explicit path first, then `RISK_ASSESSOR_CONFIG`, then
    /// `risk-assessor.toml` in the working directory, then defaults with
    /// environment overrides.
    pub fn load(path: Option<&Path>) -> Result<Self> {
        let candidate = path
            .map(Path::to_path_buf)
            .or_else(|| env::var_os("RISK_ASSESSOR_CONFIG").map(PathBuf::from));

        if let Some(path) = candidate {
            return Self::from_file(&path);
        }

        let local = Path::new(DEFAULT_CONFIG_FILE);
        if local.exists() {
            return Self::from_file(local);
        }

        Self::from_env()
    }

    pub fn from_file(path: &Path) -> Result<Self> {
        let content = fs::read_to_string(path)
            .with_context(|| format!("failed to read config file {}", path.display()))?;
        Self::from_toml(&content)
            .with_context(|| format!("failed to parse config file {}", path.display()))
    }

    pub fn from_toml(content: &str) -> Result<Self> {
        let config: Config = toml::from_str(content)?;
        Ok(config)
    }

    pub fn from_env() -> Result<Self> {
        let mut config = Config::default();

        if let Some(program) = env::var_os("SCORER_PROGRAM") {
            config.scorer.program = Some(PathBuf::from(program));
        }
        if let Ok(value) = env::var("SCORER_TIMEOUT_SECS") {
            config.scorer.timeout_secs = value.parse().context("invalid SCORER_TIMEOUT_SECS")?;
        }
        if let Ok(value) = env::var("SCORER_MAX_CONCURRENT") {
            config.scorer.max_concurrent =
                value.parse().context("invalid SCORER_MAX_CONCURRENT")?;
        }

        Ok(config)
    }
}
