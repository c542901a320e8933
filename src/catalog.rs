//! Data access for the reference tables the upload pipeline reconciles against.

use crate::db::now_rfc3339;
use crate::grading::{letter_grade, ResultStatus};
use crate::reconcile::normalize::{name_key, student_name_key};
use crate::reconcile::resolver::ReferenceLookup;
use crate::reconcile::row::SubjectSpec;
use rusqlite::{Connection, OptionalExtension};
use uuid::Uuid;

fn query_ids(conn: &Connection, sql: &str, params: impl rusqlite::Params) -> anyhow::Result<Vec<String>> {
    let mut stmt = conn.prepare_cached(sql)?;
    let ids = stmt
        .query_map(params, |r| r.get::<_, String>(0))?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(ids)
}

impl ReferenceLookup for Connection {
    fn regions_by_key(&self, key: &str) -> anyhow::Result<Vec<String>> {
        query_ids(self, "SELECT id FROM regions WHERE name_key = ? ORDER BY id", [key])
    }

    fn clusters_by_key(&self, region_id: &str, key: &str) -> anyhow::Result<Vec<String>> {
        query_ids(
            self,
            "SELECT id FROM clusters WHERE region_id = ? AND name_key = ? ORDER BY id",
            [region_id, key],
        )
    }

    fn schools_by_key(&self, cluster_id: &str, key: &str) -> anyhow::Result<Vec<String>> {
        query_ids(
            self,
            "SELECT id FROM schools WHERE cluster_id = ? AND name_key = ? ORDER BY id",
            [cluster_id, key],
        )
    }

    fn schools_by_code(&self, cluster_id: &str, code: &str) -> anyhow::Result<Vec<String>> {
        query_ids(
            self,
            "SELECT id FROM schools
             WHERE cluster_id = ? AND code IS NOT NULL AND UPPER(TRIM(code)) = UPPER(TRIM(?))
             ORDER BY id",
            [cluster_id, code],
        )
    }

    fn school_names(&self, cluster_id: &str) -> anyhow::Result<Vec<String>> {
        query_ids(
            self,
            "SELECT name FROM schools WHERE cluster_id = ? ORDER BY name",
            [cluster_id],
        )
    }

    fn students_by_key(
        &self,
        school_id: &str,
        grade: i64,
        key: &str,
    ) -> anyhow::Result<Vec<String>> {
        query_ids(
            self,
            "SELECT id FROM students WHERE school_id = ? AND grade = ? AND name_key = ? ORDER BY id",
            rusqlite::params![school_id, grade, key],
        )
    }
}

/// Contact metadata stamped on schools the pipeline provisions.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct SchoolDefaults {
    pub address: String,
    pub phone: String,
    pub email: String,
}

pub fn insert_region(conn: &Connection, name: &str) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO regions(id, name, name_key, created_at) VALUES(?, ?, ?, ?)",
        (&id, name.trim(), name_key(name), now_rfc3339()),
    )?;
    Ok(id)
}

pub fn insert_cluster(conn: &Connection, region_id: &str, name: &str) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO clusters(id, region_id, name, name_key, created_at) VALUES(?, ?, ?, ?, ?)",
        (&id, region_id, name.trim(), name_key(name), now_rfc3339()),
    )?;
    Ok(id)
}

pub fn insert_school(
    conn: &Connection,
    cluster_id: &str,
    name: &str,
    code: Option<&str>,
    defaults: &SchoolDefaults,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO schools(id, cluster_id, code, name, name_key, address, phone, email, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            cluster_id,
            code.map(|c| c.trim()),
            name.trim(),
            name_key(name),
            &defaults.address,
            &defaults.phone,
            &defaults.email,
            now_rfc3339(),
        ),
    )?;
    Ok(id)
}

pub fn insert_student(
    conn: &Connection,
    school_id: &str,
    first_name: &str,
    last_name: &str,
    grade: i64,
    index_number: Option<&str>,
) -> rusqlite::Result<String> {
    let id = Uuid::new_v4().to_string();
    conn.execute(
        "INSERT INTO students(id, school_id, first_name, last_name, name_key, grade, index_number, created_at)
         VALUES(?, ?, ?, ?, ?, ?, ?, ?)",
        (
            &id,
            school_id,
            first_name.trim(),
            last_name.trim(),
            student_name_key(first_name, last_name),
            grade,
            index_number,
            now_rfc3339(),
        ),
    )?;
    Ok(id)
}

pub fn exam_year_exists(conn: &Connection, exam_year_id: &str) -> rusqlite::Result<bool> {
    let found: Option<i64> = conn
        .query_row(
            "SELECT 1 FROM exam_years WHERE id = ?",
            [exam_year_id],
            |r| r.get(0),
        )
        .optional()?;
    Ok(found.is_some())
}

pub fn subjects_for_grade(conn: &Connection, grade: i64) -> rusqlite::Result<Vec<SubjectSpec>> {
    let mut stmt = conn.prepare(
        "SELECT id, name, arabic_name, max_score FROM subjects WHERE grade = ? ORDER BY name COLLATE NOCASE",
    )?;
    let rows = stmt
        .query_map([grade], |r| {
            Ok(SubjectSpec {
                id: r.get(0)?,
                name: r.get(1)?,
                arabic_name: r.get(2)?,
                max_score: r.get(3)?,
            })
        })?
        .collect::<Result<Vec<_>, _>>()?;
    Ok(rows)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UpsertOutcome {
    Created,
    Updated,
}

/// Writes one score at (student, subject, exam year). Existing rows are
/// updated in place and keep their status and first-term score.
pub fn upsert_result(
    conn: &Connection,
    student_id: &str,
    subject_id: &str,
    exam_year_id: &str,
    score: f64,
    max_score: f64,
) -> Result<UpsertOutcome, crate::reconcile::error::ApplyError> {
    let existing: Option<(String, String)> = conn
        .query_row(
            "SELECT id, status FROM results WHERE student_id = ? AND subject_id = ? AND exam_year_id = ?",
            (student_id, subject_id, exam_year_id),
            |r| Ok((r.get(0)?, r.get(1)?)),
        )
        .optional()?;
    let grade = letter_grade(score, max_score).as_str();
    let now = now_rfc3339();
    match existing {
        Some((id, status)) => {
            let status = ResultStatus::parse(&status).unwrap_or(ResultStatus::Pending);
            if status.is_locked() {
                let subject: String = conn
                    .query_row("SELECT name FROM subjects WHERE id = ?", [subject_id], |r| {
                        r.get(0)
                    })
                    .optional()?
                    .unwrap_or_else(|| subject_id.to_string());
                return Err(crate::reconcile::error::ApplyError::ResultLocked { subject });
            }
            conn.execute(
                "UPDATE results SET exam_score = ?, total_score = ?, grade = ?, updated_at = ? WHERE id = ?",
                (score, score, grade, &now, &id),
            )?;
            Ok(UpsertOutcome::Updated)
        }
        None => {
            let id = Uuid::new_v4().to_string();
            conn.execute(
                "INSERT INTO results(id, student_id, subject_id, exam_year_id, exam_score, total_score, grade, status, created_at, updated_at)
                 VALUES(?, ?, ?, ?, ?, ?, ?, ?, ?, ?)",
                (
                    &id,
                    student_id,
                    subject_id,
                    exam_year_id,
                    score,
                    score,
                    grade,
                    ResultStatus::Pending.as_str(),
                    &now,
                    &now,
                ),
            )?;
            Ok(UpsertOutcome::Created)
        }
    }
}
