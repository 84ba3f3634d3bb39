use std::io::Read;
use std::path::{Path, PathBuf};

use anyhow::Context;
use clap::{ArgGroup, Args, Parser, Subcommand};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use tokio::task::JoinSet;
use tracing::{error, info};

mod config;
mod db;
mod error;
mod inference;
mod models;
mod normalize;
mod pipeline;
mod recommend;
mod report;
mod risk;

use crate::config::Config;
use crate::models::{RawSubjectRecord, SubjectScore};
use crate::pipeline::Pipeline;

#[derive(Parser)]
#[command(name = "cohort-risk-assessor")]
#[command(about = "Student risk assessment and report generation", long_about = None)]
struct Cli {
    /// Path to a TOML configuration file
    #[arg(long, global = true)]
    config: Option<PathBuf>,
    #[command(subcommand)]
    command: Commands,
}

#[derive(Args)]
#[command(group(
    ArgGroup::new("subject")
        .args(["email", "usn", "input"])
        .required(true)
        .multiple(false)
))]
struct SubjectArgs {
    #[arg(long)]
    email: Option<String>,
    #[arg(long)]
    usn: Option<String>,
    /// JSON file holding the subject record
    #[arg(long)]
    input: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Create or upgrade the database schema
    InitDb,
    /// Load sample students
    Seed,
    /// Import students from a CSV file
    Import {
        #[arg(long)]
        csv: PathBuf,
    },
    /// Assess one student's risk
    Assess {
        #[command(flatten)]
        subject: SubjectArgs,
    },
    /// Assess every stored student
    Score {
        #[arg(long, default_value_t = 10)]
        limit: usize,
    },
    /// Assess one student and write the risk report
    Report {
        #[command(flatten)]
        subject: SubjectArgs,
        /// Defaults to `<usn>_report.md`
        #[arg(long)]
        out: Option<PathBuf>,
    },
    /// Built-in scoring process: one JSON request on stdin, one JSON reply on stdout
    #[command(hide = true)]
    Scorer,
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    // Anything the scorer writes to stderr counts as a failed run, so it
    // must not install the log subscriber.
    if let Commands::Scorer = cli.command {
        return run_scorer();
    }

    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| "cohort_risk_assessor=info".into()),
        )
        .with_writer(std::io::stderr)
        .init();

    let config = Config::load(cli.config.as_deref())?;

    match cli.command {
        Commands::InitDb => {
            let pool = connect().await?;
            db::init_db(&pool).await?;
            println!("Schema ready.");
        }
        Commands::Seed => {
            let pool = connect().await?;
            db::seed(&pool).await?;
            println!("Seed data inserted.");
        }
        Commands::Import { csv } => {
            let pool = connect().await?;
            let summary = db::import_csv(&pool, &csv).await?;
            println!(
                "Inserted {} students from {} ({} duplicates, {} failed).",
                summary.inserted,
                csv.display(),
                summary.duplicates,
                summary.failed
            );
        }
        Commands::Assess { subject } => {
            let pipeline = build_pipeline(&config)?;
            let record = load_subject(&subject).await?;
            let assessment = pipeline.assess(&record).await?;
            println!("{}", serde_json::to_string_pretty(&assessment)?);
        }
        Commands::Score { limit } => {
            let pipeline = build_pipeline(&config)?;
            let pool = connect().await?;
            let students = db::fetch_students(&pool).await?;

            if students.is_empty() {
                println!("No students found.");
                return Ok(());
            }

            let scores = score_all(&pipeline, students).await;
            if scores.is_empty() {
                println!("No student could be assessed.");
                return Ok(());
            }

            println!("Top students by risk score:");
            for score in scores.iter().take(limit) {
                println!(
                    "- {} ({}, {}) {} risk, score {:.1}",
                    score.name,
                    score.usn,
                    score.email,
                    score.assessment.risk_level,
                    score.assessment.risk_score
                );
            }
        }
        Commands::Report { subject, out } => {
            let pipeline = build_pipeline(&config)?;
            let record = load_subject(&subject).await?;
            let (assessment, report) = pipeline.assess_and_render(&record).await?;
            let out = out.unwrap_or_else(|| PathBuf::from(&report.filename));
            std::fs::write(&out, &report.bytes)
                .with_context(|| format!("failed to write {}", out.display()))?;
            println!(
                "Report written to {} ({} risk, {}).",
                out.display(),
                assessment.risk_level,
                report.content_type
            );
        }
        Commands::Scorer => run_scorer()?,
    }

    Ok(())
}

fn run_scorer() -> anyhow::Result<()> {
    let mut input = String::new();
    std::io::stdin().read_to_string(&mut input)?;

    match risk::respond(&input) {
        Ok(reply) => {
            println!("{reply}");
            Ok(())
        }
        Err(reply) => {
            eprintln!("{reply}");
            std::process::exit(1);
        }
    }
}

async fn connect() -> anyhow::Result<PgPool> {
    let database_url = std::env::var("DATABASE_URL")
        .context("DATABASE_URL must be set to a production Postgres instance")?;

    PgPoolOptions::new()
        .max_connections(5)
        .connect(&database_url)
        .await
        .context("failed to connect to Postgres")
}

fn build_pipeline(config: &Config) -> anyhow::Result<Pipeline> {
    Pipeline::from_config(config).context("failed to resolve scoring process")
}

async fn load_subject(subject: &SubjectArgs) -> anyhow::Result<RawSubjectRecord> {
    if let Some(path) = &subject.input {
        return read_subject_file(path);
    }

    let pool = connect().await?;
    let key = match (&subject.email, &subject.usn) {
        (Some(email), _) => db::StudentKey::Email(email),
        (None, Some(usn)) => db::StudentKey::Usn(usn),
        (None, None) => anyhow::bail!("one of --email, --usn or --input is required"),
    };

    db::fetch_student(&pool, key)
        .await?
        .context("student not found")
}

fn read_subject_file(path: &Path) -> anyhow::Result<RawSubjectRecord> {
    let content = std::fs::read_to_string(path)
        .with_context(|| format!("failed to read {}", path.display()))?;
    let value: serde_json::Value = serde_json::from_str(&content)
        .with_context(|| format!("{} is not valid JSON", path.display()))?;
    RawSubjectRecord::from_value(value)
        .with_context(|| format!("{} must hold a JSON object", path.display()))
}

/// Runs every assessment as its own task; the scorer's gate bounds how many
/// processes are alive at once. Failed assessments are logged and left out.
async fn score_all(pipeline: &Pipeline, students: Vec<RawSubjectRecord>) -> Vec<SubjectScore> {
    let mut tasks = JoinSet::new();
    for record in students {
        let pipeline = pipeline.clone();
        tasks.spawn(async move {
            let outcome = pipeline.assess(&record).await;
            (record, outcome)
        });
    }

    let mut scores = Vec::new();
    while let Some(joined) = tasks.join_next().await {
        let (record, outcome) = match joined {
            Ok(pair) => pair,
            Err(err) => {
                error!(error = %err, "assessment task panicked");
                continue;
            }
        };
        let identity = normalize::identity(&record);
        let usn = identity.external_id.unwrap_or_default();
        match outcome {
            Ok(assessment) => scores.push(SubjectScore {
                name: identity.name.unwrap_or_default(),
                email: identity.contact.unwrap_or_default(),
                usn,
                assessment,
            }),
            Err(err) => error!(%usn, kind = %err.kind(), error = %err, "assessment failed"),
        }
    }

    scores.sort_by(|a, b| {
        b.assessment
            .risk_score
            .partial_cmp(&a.assessment.risk_score)
            .unwrap_or(std::cmp::Ordering::Equal)
    });
    info!(assessed = scores.len(), "scoring finished");
    scores
}
