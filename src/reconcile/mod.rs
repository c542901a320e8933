//! Comprehensive results upload: parse, resolve, validate, hold, apply.

pub mod apply;
pub mod error;
pub mod export;
pub mod marks;
pub mod normalize;
pub mod resolver;
pub mod row;
pub mod session;
pub mod tabular;

use marks::{validate_row, RowMarks};
use resolver::{resolve_row, AutoCreate, EntityKeys, ReferenceLookup, RowResolution, Tier};
use row::{RowSchema, SubjectSpec, UploadRow};
use serde::Serialize;
use std::collections::{HashMap, HashSet};
use tabular::{ParsedTable, StructuralError};

#[derive(Debug, Clone, PartialEq)]
pub struct UploadParams {
    pub grade: i64,
    pub exam_year_id: String,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum RowClass {
    /// Resolved and carrying at least one valid mark.
    Matched,
    /// Resolved, every subject cell blank. Entities are created, no results.
    NoMarks,
    /// Resolved, at least one bad cell. Nothing is written for the row.
    InvalidMarks,
    /// A location or student tier could not be resolved.
    Unmatched,
}

impl RowClass {
    /// Rows the commit engine will touch.
    pub fn is_applicable(self) -> bool {
        matches!(self, Self::Matched | Self::NoMarks)
    }
}

#[derive(Debug, Clone)]
pub struct AnalyzedRow {
    pub row: UploadRow,
    pub resolution: RowResolution,
    pub marks: RowMarks,
    pub class: RowClass,
    pub keys: Option<EntityKeys>,
    pub school_suggestion: Option<String>,
}

#[derive(Debug, Clone, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct RowWarning {
    pub row: usize,
    pub line: usize,
    pub code: String,
    pub message: String,
}

#[derive(Debug, Clone, Default, Serialize, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct UploadSummary {
    pub total_rows: usize,
    pub resolved_rows: usize,
    pub matched_rows: usize,
    pub unmatched_location_rows: usize,
    pub structural_error_rows: usize,
    pub no_marks_rows: usize,
    pub invalid_marks_rows: usize,
    pub existing_regions_count: usize,
    pub new_regions_count: usize,
    pub existing_clusters_count: usize,
    pub new_clusters_count: usize,
    pub existing_schools_count: usize,
    pub new_schools_count: usize,
    pub existing_students_count: usize,
    pub new_students_count: usize,
    pub can_confirm: bool,
}

#[derive(Debug, Clone)]
pub struct UploadAnalysis {
    pub params: UploadParams,
    pub subject_columns: Vec<String>,
    pub ignored_columns: Vec<String>,
    pub missing_columns: Vec<String>,
    pub rows: Vec<AnalyzedRow>,
    pub structural_errors: Vec<StructuralError>,
    pub warnings: Vec<RowWarning>,
    pub summary: UploadSummary,
}

fn classify(resolution: &RowResolution, marks: &RowMarks) -> RowClass {
    if !resolution.is_resolved() {
        return RowClass::Unmatched;
    }
    match marks {
        RowMarks::InvalidMarks(_) => RowClass::InvalidMarks,
        RowMarks::NoValidMarks => RowClass::NoMarks,
        RowMarks::Valid(_) => RowClass::Matched,
    }
}

/// Read-only pass over a parsed upload. Nothing is written.
pub fn analyze<L: ReferenceLookup + ?Sized>(
    lookup: &L,
    table: ParsedTable,
    subjects: &[SubjectSpec],
    params: UploadParams,
    policy: &AutoCreate,
) -> anyhow::Result<UploadAnalysis> {
    let schema = RowSchema::build(&table.headers, subjects);
    let mut rows = Vec::with_capacity(table.rows.len());
    for raw in &table.rows {
        let row = schema.read(raw);
        rows.push(analyze_row(lookup, row, params.grade, policy)?);
    }

    let mut warnings = Vec::new();
    let mut seen_students = HashMap::<String, usize>::new();
    for r in rows.iter().filter(|r| r.class.is_applicable()) {
        let Some(keys) = &r.keys else { continue };
        if let Some(first) = seen_students.get(&keys.student) {
            warnings.push(RowWarning {
                row: r.row.row,
                line: r.row.line,
                code: "duplicate_student_row".to_string(),
                message: format!(
                    "{} already appears in row {}; the later marks win",
                    r.row.student_name(),
                    first
                ),
            });
        } else {
            seen_students.insert(keys.student.clone(), r.row.row);
        }
    }

    let summary = summarize(&rows, table.structural_errors.len());
    tracing::debug!(
        rows = table.total_rows(),
        structural = table.structural_errors.len(),
        "analyzed upload"
    );

    Ok(UploadAnalysis {
        params,
        subject_columns: schema.subject_columns(),
        ignored_columns: schema.ignored_columns().to_vec(),
        missing_columns: schema
            .missing_columns()
            .into_iter()
            .map(|s| s.to_string())
            .collect(),
        rows,
        structural_errors: table.structural_errors,
        warnings,
        summary,
    })
}

pub fn analyze_row<L: ReferenceLookup + ?Sized>(
    lookup: &L,
    row: UploadRow,
    grade: i64,
    policy: &AutoCreate,
) -> anyhow::Result<AnalyzedRow> {
    let resolution = resolve_row(lookup, &row, grade, policy)?;
    let marks = validate_row(&row);
    let class = classify(&resolution, &marks);
    let keys = resolution.entity_keys(&row, grade);

    let school_suggestion = match (&resolution.cluster, &resolution.school) {
        (Tier::Existing(cluster_id), school) if school.existing_id().is_none() => {
            let names = lookup.school_names(cluster_id)?;
            normalize::closest_name(&row.school_name, names.iter().map(|s| s.as_str()))
                .map(|s| s.to_string())
        }
        _ => None,
    };

    Ok(AnalyzedRow {
        row,
        resolution,
        marks,
        class,
        keys,
        school_suggestion,
    })
}

pub fn summarize(rows: &[AnalyzedRow], structural_error_rows: usize) -> UploadSummary {
    let mut s = UploadSummary {
        total_rows: rows.len() + structural_error_rows,
        structural_error_rows,
        ..Default::default()
    };

    let mut regions = (HashSet::new(), HashSet::new());
    let mut clusters = (HashSet::new(), HashSet::new());
    let mut schools = (HashSet::new(), HashSet::new());
    let mut students = (HashSet::new(), HashSet::new());
    fn tally<'a>(sets: &mut (HashSet<&'a str>, HashSet<&'a str>), key: &'a str) {
        if EntityKeys::is_new(key) {
            sets.1.insert(key);
        } else {
            sets.0.insert(key);
        }
    }

    for r in rows {
        match r.class {
            RowClass::Unmatched => s.unmatched_location_rows += 1,
            RowClass::InvalidMarks => s.invalid_marks_rows += 1,
            RowClass::NoMarks => s.no_marks_rows += 1,
            RowClass::Matched => {}
        }
        if r.class != RowClass::Unmatched {
            s.resolved_rows += 1;
        }
        if !r.class.is_applicable() {
            continue;
        }
        s.matched_rows += 1;
        if let Some(k) = &r.keys {
            tally(&mut regions, &k.region);
            tally(&mut clusters, &k.cluster);
            tally(&mut schools, &k.school);
            tally(&mut students, &k.student);
        }
    }

    s.existing_regions_count = regions.0.len();
    s.new_regions_count = regions.1.len();
    s.existing_clusters_count = clusters.0.len();
    s.new_clusters_count = clusters.1.len();
    s.existing_schools_count = schools.0.len();
    s.new_schools_count = schools.1.len();
    s.existing_students_count = students.0.len();
    s.new_students_count = students.1.len();
    s.can_confirm = s.matched_rows > 0;
    s
}
