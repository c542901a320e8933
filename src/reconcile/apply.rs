//! Commit engine: turns a consumed upload session into rows in the database.
//!
//! Each applicable row is its own transaction. The row is re-resolved against
//! live data inside that transaction, so entities created by an earlier row of
//! the same batch (or by anyone else since the preview) are matched instead of
//! duplicated.

use super::error::ApplyError;
use super::marks::RowMarks;
use super::resolver::{resolve_row, AutoCreate, Tier, TierKind, Why};
use super::row::UploadRow;
use super::{AnalyzedRow, RowClass, UploadAnalysis};
use crate::catalog::{self, SchoolDefaults, UpsertOutcome};
use crate::provisioning::{CredentialProvisioner, SchoolLogin};
use rusqlite::Connection;
use serde::Serialize;

/// Operator-supplied values for blank Region/Location cells.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Hints {
    pub default_region: Option<String>,
    pub default_cluster: Option<String>,
}

impl Hints {
    pub fn is_empty(&self) -> bool {
        self.default_region.is_none() && self.default_cluster.is_none()
    }

    /// Fills the row's blank location cells. `None` when the row was not
    /// unmatched because of a blank the hints can supply.
    fn recover(&self, analyzed: &AnalyzedRow) -> Option<UploadRow> {
        if analyzed.class != RowClass::Unmatched
            || matches!(analyzed.marks, RowMarks::InvalidMarks(_))
        {
            return None;
        }
        let reason = analyzed.resolution.unresolved_reason()?;
        let fillable = reason.why == Why::Blank
            && match reason.tier {
                TierKind::Region => self.default_region.is_some(),
                TierKind::Cluster => self.default_cluster.is_some(),
                _ => false,
            };
        if !fillable {
            return None;
        }
        let mut row = analyzed.row.clone();
        if row.region.trim().is_empty() {
            if let Some(r) = &self.default_region {
                row.region = r.clone();
            }
        }
        if row.location.trim().is_empty() {
            if let Some(c) = &self.default_cluster {
                row.location = c.clone();
            }
        }
        Some(row)
    }
}

#[derive(Debug, Clone)]
pub struct ApplyOptions {
    pub policy: AutoCreate,
    pub school_defaults: SchoolDefaults,
    pub provision_logins: bool,
}

impl Default for ApplyOptions {
    fn default() -> Self {
        Self {
            policy: AutoCreate::default(),
            school_defaults: SchoolDefaults::default(),
            provision_logins: true,
        }
    }
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RowApplyError {
    pub row: usize,
    pub line: usize,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ProvisioningError {
    pub school_id: String,
    pub school_name: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct ApplySummary {
    pub regions_created: usize,
    pub clusters_created: usize,
    pub schools_created: usize,
    pub students_created: usize,
    pub results_created: usize,
    pub results_updated: usize,
    pub rows_applied: usize,
    pub rows_skipped_no_marks: usize,
    pub rows_recovered_by_hints: usize,
    pub row_errors: Vec<RowApplyError>,
    pub school_logins: Vec<SchoolLogin>,
    pub provisioning_errors: Vec<ProvisioningError>,
}

/// What one committed row added.
#[derive(Debug, Default)]
struct RowOutcome {
    regions: usize,
    clusters: usize,
    students: usize,
    schools: Vec<(String, String)>,
    results_created: usize,
    results_updated: usize,
    no_marks: bool,
}

pub fn apply(
    conn: &Connection,
    analysis: &UploadAnalysis,
    hints: &Hints,
    opts: &ApplyOptions,
    provisioner: &dyn CredentialProvisioner,
) -> ApplySummary {
    let mut summary = ApplySummary::default();

    for analyzed in &analysis.rows {
        let (row, recovered) = if analyzed.class.is_applicable() {
            (analyzed.row.clone(), false)
        } else if let Some(row) = hints.recover(analyzed) {
            (row, true)
        } else {
            continue;
        };

        match apply_row(conn, &row, &analyzed.marks, analysis, opts) {
            Ok(outcome) => {
                summary.rows_applied += 1;
                if recovered {
                    summary.rows_recovered_by_hints += 1;
                }
                if outcome.no_marks {
                    summary.rows_skipped_no_marks += 1;
                }
                summary.regions_created += outcome.regions;
                summary.clusters_created += outcome.clusters;
                summary.students_created += outcome.students;
                summary.schools_created += outcome.schools.len();
                summary.results_created += outcome.results_created;
                summary.results_updated += outcome.results_updated;
                if opts.provision_logins {
                    for (school_id, school_name) in outcome.schools {
                        provision(conn, provisioner, &school_id, &school_name, &mut summary);
                    }
                }
            }
            Err(e) => {
                tracing::warn!(row = row.row, line = row.line, code = e.code(), "row not applied: {}", e);
                summary.row_errors.push(RowApplyError {
                    row: row.row,
                    line: row.line,
                    code: e.code().to_string(),
                    message: e.to_string(),
                });
            }
        }
    }

    tracing::info!(
        rows_applied = summary.rows_applied,
        results_created = summary.results_created,
        results_updated = summary.results_updated,
        row_errors = summary.row_errors.len(),
        "upload applied"
    );
    summary
}

fn provision(
    conn: &Connection,
    provisioner: &dyn CredentialProvisioner,
    school_id: &str,
    school_name: &str,
    summary: &mut ApplySummary,
) {
    match provisioner.provision(conn, school_id, school_name) {
        Ok(login) => summary.school_logins.push(login),
        Err(e) => {
            tracing::warn!(school_id, "login provisioning failed: {:#}", e);
            summary.provisioning_errors.push(ProvisioningError {
                school_id: school_id.to_string(),
                school_name: school_name.to_string(),
                message: format!("{:#}", e),
            });
        }
    }
}

fn apply_row(
    conn: &Connection,
    row: &UploadRow,
    marks: &RowMarks,
    analysis: &UploadAnalysis,
    opts: &ApplyOptions,
) -> Result<RowOutcome, ApplyError> {
    let grade = analysis.params.grade;
    let tx = conn.unchecked_transaction()?;
    let mut out = RowOutcome::default();

    let resolution = resolve_row(&*tx, row, grade, &opts.policy)
        .map_err(|e| ApplyError::Lookup(format!("{:#}", e)))?;
    if let Some(reason) = resolution.unresolved_reason() {
        return Err(ApplyError::Unresolved(reason.code()));
    }

    let region_id = match resolution.region {
        Tier::Existing(id) => id,
        Tier::ToCreate(n) => {
            out.regions += 1;
            catalog::insert_region(&tx, &n.name)?
        }
        Tier::Unresolved(r) => return Err(ApplyError::Unresolved(r.code())),
    };
    let cluster_id = match resolution.cluster {
        Tier::Existing(id) => id,
        Tier::ToCreate(n) => {
            out.clusters += 1;
            catalog::insert_cluster(&tx, &region_id, &n.name)?
        }
        Tier::Unresolved(r) => return Err(ApplyError::Unresolved(r.code())),
    };
    let school_id = match resolution.school {
        Tier::Existing(id) => id,
        Tier::ToCreate(n) => {
            let id = catalog::insert_school(
                &tx,
                &cluster_id,
                &n.name,
                n.code.as_deref(),
                &opts.school_defaults,
            )?;
            out.schools.push((id.clone(), n.name.trim().to_string()));
            id
        }
        Tier::Unresolved(r) => return Err(ApplyError::Unresolved(r.code())),
    };
    let student_id = match resolution.student {
        Tier::Existing(id) => id,
        Tier::ToCreate(n) => {
            out.students += 1;
            catalog::insert_student(
                &tx,
                &school_id,
                &n.first_name,
                &n.last_name,
                grade,
                n.index_number.as_deref(),
            )?
        }
        Tier::Unresolved(r) => return Err(ApplyError::Unresolved(r.code())),
    };

    match marks {
        RowMarks::Valid(valid) => {
            for m in valid {
                match catalog::upsert_result(
                    &tx,
                    &student_id,
                    &m.subject_id,
                    &analysis.params.exam_year_id,
                    m.score,
                    m.max_score,
                )? {
                    UpsertOutcome::Created => out.results_created += 1,
                    UpsertOutcome::Updated => out.results_updated += 1,
                }
            }
        }
        RowMarks::NoValidMarks => out.no_marks = true,
        RowMarks::InvalidMarks(_) => {
            return Err(ApplyError::Unresolved("invalid_marks".to_string()))
        }
    }

    tx.commit()?;
    tracing::debug!(row = row.row, student_id = %student_id, "row applied");
    Ok(out)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::{analyze, tabular, UploadParams};

    struct FailingProvisioner;

    impl CredentialProvisioner for FailingProvisioner {
        fn provision(&self, _: &Connection, _: &str, _: &str) -> anyhow::Result<SchoolLogin> {
            anyhow::bail!("directory unavailable")
        }
    }

    fn workspace() -> Connection {
        let conn = Connection::open_in_memory().expect("open");
        crate::db::init_schema(&conn).expect("schema");
        conn.execute_batch(
            "INSERT INTO subjects(id, name, arabic_name, grade, max_score, pass_score)
               VALUES('quran', 'Quran', 'القرآن', 6, 100, 50),
                     ('hadith', 'Hadith', 'الحديث', 6, 100, 50);
             INSERT INTO exam_years(id, label, is_active) VALUES('y1', '2024', 1);",
        )
        .expect("seed");
        let r = catalog::insert_region(&conn, "Region A").expect("region");
        let c = catalog::insert_cluster(&conn, &r, "Central").expect("cluster");
        let s = catalog::insert_school(&conn, &c, "Al Noor", Some("S1"), &SchoolDefaults::default())
            .expect("school");
        catalog::insert_student(&conn, &s, "Amina", "Yusuf", 6, None).expect("student");
        conn
    }

    fn preview(conn: &Connection, csv: &str) -> UploadAnalysis {
        let table = tabular::parse_table(csv.as_bytes(), 1 << 20).expect("parse");
        let subjects = catalog::subjects_for_grade(conn, 6).expect("subjects");
        analyze(
            conn,
            table,
            &subjects,
            UploadParams {
                grade: 6,
                exam_year_id: "y1".into(),
            },
            &AutoCreate::default(),
        )
        .expect("analyze")
    }

    fn count(conn: &Connection, table: &str) -> i64 {
        conn.query_row(&format!("SELECT COUNT(*) FROM {}", table), [], |r| r.get(0))
            .expect("count")
    }

    const HEADER: &str = "School Code,School Name,Location,Region,Student Number,Student Name,Quran,Hadith\n";

    #[test]
    fn applies_the_three_row_scenario_and_reapplies_idempotently() {
        let conn = workspace();
        let csv = format!(
            "{}S1,Al Noor,Central,Region A,,Amina Yusuf,85,\nS9,Hope Academy,Central,Region A,,Omar Haddad,90,70\nS1,Al Noor,Central,Region A,,Amina Yusuf,150,\n",
            HEADER
        );
        let a = preview(&conn, &csv);
        let s = apply(&conn, &a, &Hints::default(), &ApplyOptions::default(), &crate::provisioning::HashedLoginProvisioner);
        assert_eq!(s.rows_applied, 2);
        assert_eq!(s.schools_created, 1);
        assert_eq!(s.students_created, 1);
        assert_eq!(s.results_created, 3);
        assert_eq!(s.results_updated, 0);
        assert!(s.row_errors.is_empty());
        assert_eq!(s.school_logins.len(), 1);
        assert_eq!(s.school_logins[0].school_name, "Hope Academy");
        assert_eq!(count(&conn, "school_logins"), 1);

        let again = apply(&conn, &preview(&conn, &csv), &Hints::default(), &ApplyOptions::default(), &crate::provisioning::HashedLoginProvisioner);
        assert_eq!(again.schools_created, 0);
        assert_eq!(again.students_created, 0);
        assert_eq!(again.results_created, 0);
        assert_eq!(again.results_updated, 3);
        assert_eq!(count(&conn, "schools"), 2);
        assert_eq!(count(&conn, "students"), 2);
        assert_eq!(count(&conn, "results"), 3);
    }

    #[test]
    fn new_school_named_twice_is_created_once() {
        let conn = workspace();
        let csv = format!(
            "{},Hope Academy,North,Region B,,Kid One,50,\n,hope academy,NORTH,region b,,Kid Two,,60\n,Hope Academy,North,Region B,,Kid Three,,\n",
            HEADER
        );
        let s = apply(&conn, &preview(&conn, &csv), &Hints::default(), &ApplyOptions::default(), &crate::provisioning::HashedLoginProvisioner);
        assert_eq!(s.regions_created, 1);
        assert_eq!(s.clusters_created, 1);
        assert_eq!(s.schools_created, 1);
        assert_eq!(s.students_created, 3);
        assert_eq!(s.rows_skipped_no_marks, 1);
        assert_eq!(s.rows_applied, 3);
        assert_eq!(s.results_created, 2);
    }

    #[test]
    fn create_if_still_missing_after_preview() {
        let conn = workspace();
        let csv = format!("{}S9,Hope Academy,Central,Region A,,Omar Haddad,90,\n", HEADER);
        let a = preview(&conn, &csv);
        assert_eq!(a.summary.new_schools_count, 1);

        // Someone else creates the school between preview and confirm.
        let cluster: String = conn
            .query_row("SELECT id FROM clusters", [], |r| r.get(0))
            .expect("cluster");
        catalog::insert_school(&conn, &cluster, "Hope Academy", None, &SchoolDefaults::default())
            .expect("school");

        let s = apply(&conn, &a, &Hints::default(), &ApplyOptions::default(), &crate::provisioning::HashedLoginProvisioner);
        assert_eq!(s.schools_created, 0);
        assert_eq!(s.students_created, 1);
        assert_eq!(count(&conn, "schools"), 2);
    }

    #[test]
    fn published_results_are_locked_per_row() {
        let conn = workspace();
        let csv = format!(
            "{}S1,Al Noor,Central,Region A,,Amina Yusuf,85,\nS1,Al Noor,Central,Region A,,Bilal Musa,70,\n",
            HEADER
        );
        apply(&conn, &preview(&conn, &csv), &Hints::default(), &ApplyOptions::default(), &crate::provisioning::HashedLoginProvisioner);
        conn.execute(
            "UPDATE results SET status = 'published' WHERE student_id IN (SELECT id FROM students WHERE first_name = 'Amina')",
            [],
        )
        .expect("publish");

        let s = apply(&conn, &preview(&conn, &csv), &Hints::default(), &ApplyOptions::default(), &crate::provisioning::HashedLoginProvisioner);
        assert_eq!(s.rows_applied, 1);
        assert_eq!(s.results_updated, 1);
        assert_eq!(s.row_errors.len(), 1);
        assert_eq!(s.row_errors[0].code, "result_locked");
        assert_eq!(s.row_errors[0].row, 1);
        let total: f64 = conn
            .query_row(
                "SELECT total_score FROM results r JOIN students s ON s.id = r.student_id WHERE s.first_name = 'Amina'",
                [],
                |r| r.get(0),
            )
            .expect("total");
        assert_eq!(total, 85.0);
    }

    #[test]
    fn hints_recover_rows_with_blank_location() {
        let conn = workspace();
        let csv = format!(
            "{}S1,Al Noor,,Region A,,Amina Yusuf,88,\nS1,Al Noor,Central,,,Amina Yusuf,89,\nS1,,Central,Region A,,Lost Kid,70,\n",
            HEADER
        );
        let a = preview(&conn, &csv);
        assert_eq!(a.summary.unmatched_location_rows, 3);
        assert!(!a.summary.can_confirm);

        let hints = Hints {
            default_region: Some("Region A".into()),
            default_cluster: Some("Central".into()),
        };
        let s = apply(&conn, &a, &hints, &ApplyOptions::default(), &crate::provisioning::HashedLoginProvisioner);
        assert_eq!(s.rows_recovered_by_hints, 2);
        assert_eq!(s.rows_applied, 2);
        assert_eq!(s.results_created, 1);
        assert_eq!(s.results_updated, 1);
        assert_eq!(s.regions_created, 0);
        assert_eq!(s.clusters_created, 0);
    }

    #[test]
    fn provisioning_failures_do_not_fail_the_row() {
        let conn = workspace();
        let csv = format!("{},Hope Academy,Central,Region A,,Omar Haddad,90,\n", HEADER);
        let s = apply(&conn, &preview(&conn, &csv), &Hints::default(), &ApplyOptions::default(), &FailingProvisioner);
        assert_eq!(s.rows_applied, 1);
        assert_eq!(s.schools_created, 1);
        assert!(s.school_logins.is_empty());
        assert_eq!(s.provisioning_errors.len(), 1);
        assert!(s.provisioning_errors[0].message.contains("directory unavailable"));

        let opts = ApplyOptions {
            provision_logins: false,
            ..Default::default()
        };
        let csv = format!("{},Other School,Central,Region A,,Omar Haddad,90,\n", HEADER);
        let s = apply(&conn, &preview(&conn, &csv), &Hints::default(), &opts, &FailingProvisioner);
        assert_eq!(s.schools_created, 1);
        assert!(s.provisioning_errors.is_empty());
    }
}
