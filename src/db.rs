use std::io::Read;

use anyhow::Context;
use serde_json::{json, Map, Value};
use sqlx::postgres::PgRow;
use sqlx::{PgPool, Row};
use tracing::{info, warn};
use uuid::Uuid;

use crate::models::RawSubjectRecord;

const STUDENT_COLUMNS: &str = "name, email, usn, cgpa, attendance, financial_score, \
     study_hours, previous_year_backlogs, mentor_email";

#[derive(Debug, Clone, Copy)]
pub enum StudentKey<'a> {
    Email(&'a str),
    Usn(&'a str),
}

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct ImportSummary {
    pub inserted: usize,
    pub duplicates: usize,
    pub failed: usize,
}

#[derive(Debug, serde::Deserialize)]
struct StudentRow {
    name: String,
    email: String,
    usn: String,
    #[serde(alias = "CGPA")]
    cgpa: f64,
    #[serde(alias = "Attendance")]
    attendance: f64,
    #[serde(default, alias = "financialScore")]
    financial_score: Option<f64>,
    #[serde(default, alias = "studyHours")]
    study_hours: Option<f64>,
    #[serde(default, alias = "previousYearBacklogs")]
    previous_year_backlogs: Option<i32>,
    #[serde(default, alias = "mentorEmail")]
    mentor_email: Option<String>,
}

pub async fn init_db(pool: &PgPool) -> anyhow::Result<()> {
    sqlx::migrate!("./migrations").run(pool).await?;
    Ok(())
}

pub async fn seed(pool: &PgPool) -> anyhow::Result<()> {
    let students = vec![
        (
            Uuid::parse_str("6b1f0c2e-8d4a-4f3b-9a57-1c2d3e4f5a61")?,
            "Ananya Iyer",
            "ananya.iyer@college.edu",
            "1RV21CS001",
            8.6,
            92.0,
            Some(70.0),
            Some(4.0),
            Some(0),
        ),
        (
            Uuid::parse_str("a4c83e19-5b7d-4e02-b6f1-7d9e0a1b2c34")?,
            "Rahul Menon",
            "rahul.menon@college.edu",
            "1RV21CS017",
            6.4,
            74.0,
            Some(45.0),
            Some(2.0),
            Some(1),
        ),
        (
            Uuid::parse_str("f0e9d8c7-1a2b-4c3d-8e4f-5a6b7c8d9e0f")?,
            "Sneha Kulkarni",
            "sneha.kulkarni@college.edu",
            "1RV21CS042",
            5.1,
            58.0,
            None,
            Some(1.0),
            Some(3),
        ),
    ];

    for (id, name, email, usn, cgpa, attendance, financial, hours, backlogs) in students {
        sqlx::query(
            r#"
            INSERT INTO risk_assessor.students
            (id, name, email, usn, cgpa, attendance, financial_score, study_hours, previous_year_backlogs)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9)
            ON CONFLICT (email) DO UPDATE
            SET name = EXCLUDED.name, cgpa = EXCLUDED.cgpa, attendance = EXCLUDED.attendance,
                financial_score = EXCLUDED.financial_score, study_hours = EXCLUDED.study_hours,
                previous_year_backlogs = EXCLUDED.previous_year_backlogs
            "#,
        )
        .bind(id)
        .bind(name)
        .bind(email)
        .bind(usn)
        .bind(cgpa)
        .bind(attendance)
        .bind(financial)
        .bind(hours)
        .bind(backlogs)
        .execute(pool)
        .await?;
    }

    Ok(())
}

pub async fn fetch_student(
    pool: &PgPool,
    key: StudentKey<'_>,
) -> anyhow::Result<Option<RawSubjectRecord>> {
    let (column, value) = match key {
        StudentKey::Email(email) => ("email", email.trim().to_lowercase()),
        StudentKey::Usn(usn) => ("usn", usn.trim().to_string()),
    };
    let query = format!("SELECT {STUDENT_COLUMNS} FROM risk_assessor.students WHERE {column} = $1");

    let row = sqlx::query(&query)
        .bind(value)
        .fetch_optional(pool)
        .await
        .context("failed to fetch student")?;

    row.as_ref().map(record_from_row).transpose()
}

pub async fn fetch_students(pool: &PgPool) -> anyhow::Result<Vec<RawSubjectRecord>> {
    let query =
        format!("SELECT {STUDENT_COLUMNS} FROM risk_assessor.students ORDER BY created_at DESC");
    let rows = sqlx::query(&query)
        .fetch_all(pool)
        .await
        .context("failed to fetch students")?;

    rows.iter().map(record_from_row).collect()
}

fn record_from_row(row: &PgRow) -> anyhow::Result<RawSubjectRecord> {
    let mut fields = Map::new();
    fields.insert("name".into(), json!(row.try_get::<String, _>("name")?));
    fields.insert("email".into(), json!(row.try_get::<String, _>("email")?));
    fields.insert("usn".into(), json!(row.try_get::<String, _>("usn")?));
    fields.insert("cgpa".into(), json!(row.try_get::<f64, _>("cgpa")?));
    fields.insert("attendance".into(), json!(row.try_get::<f64, _>("attendance")?));
    fields.insert(
        "financial_score".into(),
        json!(row.try_get::<Option<f64>, _>("financial_score")?),
    );
    fields.insert(
        "study_hours".into(),
        json!(row.try_get::<Option<f64>, _>("study_hours")?),
    );
    fields.insert(
        "previous_year_backlogs".into(),
        json!(row.try_get::<Option<i32>, _>("previous_year_backlogs")?),
    );
    fields.insert(
        "mentor_email".into(),
        row.try_get::<Option<String>, _>("mentor_email")?
            .map(Value::String)
            .unwrap_or(Value::Null),
    );
    Ok(RawSubjectRecord::new(fields))
}

fn read_rows<R: Read>(reader: R) -> Vec<Result<StudentRow, csv::Error>> {
    csv::ReaderBuilder::new()
        .trim(csv::Trim::All)
        .from_reader(reader)
        .into_deserialize::<StudentRow>()
        .collect()
}

/// Best-effort bulk load: each row stands alone. Rows that collide with an
/// existing email or USN are counted as duplicates, rows the store rejects
/// as failed, and the rest of the file is still loaded.
pub async fn import_csv(pool: &PgPool, csv_path: &std::path::Path) -> anyhow::Result<ImportSummary> {
    let file = std::fs::File::open(csv_path)
        .with_context(|| format!("failed to open {}", csv_path.display()))?;
    let mut summary = ImportSummary::default();

    for (index, result) in read_rows(file).into_iter().enumerate() {
        let line = index + 2;
        let row = match result {
            Ok(row) => row,
            Err(err) => {
                warn!(line, error = %err, "skipping unreadable row");
                summary.failed += 1;
                continue;
            }
        };

        let outcome = sqlx::query(
            r#"
            INSERT INTO risk_assessor.students
            (id, name, email, usn, cgpa, attendance, financial_score, study_hours,
             previous_year_backlogs, mentor_email)
            VALUES ($1, $2, $3, $4, $5, $6, $7, $8, $9, $10)
            ON CONFLICT DO NOTHING
            "#,
        )
        .bind(Uuid::new_v4())
        .bind(row.name.trim())
        .bind(row.email.trim().to_lowercase())
        .bind(row.usn.trim())
        .bind(row.cgpa)
        .bind(row.attendance)
        .bind(row.financial_score)
        .bind(row.study_hours)
        .bind(row.previous_year_backlogs)
        .bind(row.mentor_email.map(|email| email.trim().to_lowercase()))
        .execute(pool)
        .await;

        match outcome {
            Ok(result) if result.rows_affected() > 0 => summary.inserted += 1,
            Ok(_) => summary.duplicates += 1,
            Err(err) => {
                warn!(line, error = %err, "store rejected row");
                summary.failed += 1;
            }
        }
    }

    info!(
        inserted = summary.inserted,
        duplicates = summary.duplicates,
        failed = summary.failed,
        "bulk import finished"
    );
    Ok(summary)
}
