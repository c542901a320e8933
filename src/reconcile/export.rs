//! CSV rendering for the upload template and the per-class error exports.

use super::marks::RowMarks;
use super::resolver::TierKind;
use super::row::{SubjectSpec, TEMPLATE_FIELDS};
use super::{AnalyzedRow, RowClass, UploadAnalysis};

pub const BOM: &str = "\u{feff}";

pub fn csv_quote(s: &str) -> String {
    if s.contains(',') || s.contains('"') || s.contains('\n') || s.contains('\r') {
        format!("\"{}\"", s.replace('"', "\"\""))
    } else {
        s.to_string()
    }
}

fn push_record<S: AsRef<str>>(out: &mut String, fields: &[S]) {
    let line = fields
        .iter()
        .map(|f| csv_quote(f.as_ref()))
        .collect::<Vec<_>>()
        .join(",");
    out.push_str(&line);
    out.push_str("\r\n");
}

pub fn format_score(v: f64) -> String {
    if v.fract() == 0.0 {
        format!("{}", v as i64)
    } else {
        format!("{}", v)
    }
}

/// Blank upload sheet for one grade: fixed columns, then subjects A-Z.
pub fn template_csv(subjects: &[SubjectSpec]) -> String {
    let mut sorted = subjects.iter().collect::<Vec<_>>();
    sorted.sort_by(|a, b| {
        a.name
            .to_lowercase()
            .cmp(&b.name.to_lowercase())
            .then_with(|| a.name.cmp(&b.name))
    });

    let mut header = TEMPLATE_FIELDS
        .iter()
        .map(|f| f.label().to_string())
        .collect::<Vec<_>>();
    header.extend(sorted.iter().map(|s| s.name.clone()));

    let mut sample = vec![
        "SCH-001".to_string(),
        "Sample School".to_string(),
        "Sample Location".to_string(),
        "Sample Region".to_string(),
        "1001".to_string(),
        "Student Name".to_string(),
    ];
    sample.extend(sorted.iter().map(|s| format_score((s.max_score * 0.8).round())));

    let mut out = String::from(BOM);
    push_record(&mut out, &header);
    push_record(&mut out, &sample);
    out
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ExportKind {
    UnmatchedSchools,
    UnmatchedStudents,
    NoMarks,
    InvalidMarks,
}

impl ExportKind {
    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "unmatched" | "unmatchedSchools" => Some(Self::UnmatchedSchools),
            "unmatchedstudents" | "unmatchedStudents" => Some(Self::UnmatchedStudents),
            "nomarks" | "noMarks" => Some(Self::NoMarks),
            "invalid" | "invalidMarks" => Some(Self::InvalidMarks),
            _ => None,
        }
    }

    fn includes(self, r: &AnalyzedRow) -> bool {
        match self {
            Self::UnmatchedSchools | Self::UnmatchedStudents => {
                if r.class != RowClass::Unmatched {
                    return false;
                }
                let student_tier = r
                    .resolution
                    .unresolved_reason()
                    .map(|reason| reason.tier == TierKind::Student)
                    .unwrap_or(false);
                student_tier == (self == Self::UnmatchedStudents)
            }
            Self::NoMarks => r.class == RowClass::NoMarks,
            Self::InvalidMarks => r.class == RowClass::InvalidMarks,
        }
    }
}

fn reason_code(r: &AnalyzedRow) -> String {
    r.resolution
        .unresolved_reason()
        .map(|reason| reason.code())
        .unwrap_or_default()
}

/// Renders the session rows of one class. Returns the text and the number of
/// data records written.
pub fn render_export(analysis: &UploadAnalysis, kind: ExportKind) -> (String, usize) {
    let mut out = String::from(BOM);
    let mut written = 0;
    let rows = analysis.rows.iter().filter(|r| kind.includes(r));

    match kind {
        ExportKind::UnmatchedSchools => {
            push_record(
                &mut out,
                &[
                    "Row", "Line", "School Code", "School Name", "Location", "Region",
                    "Reason", "Suggested School",
                ],
            );
            for r in rows {
                let u = &r.row;
                push_record(
                    &mut out,
                    &[
                        u.row.to_string(),
                        u.line.to_string(),
                        u.school_code.clone(),
                        u.school_name.clone(),
                        u.location.clone(),
                        u.region.clone(),
                        reason_code(r),
                        r.school_suggestion.clone().unwrap_or_default(),
                    ],
                );
                written += 1;
            }
        }
        ExportKind::UnmatchedStudents | ExportKind::NoMarks => {
            let mut header = vec![
                "Row", "Line", "School Name", "Location", "Region", "Student Number",
                "Student Name",
            ];
            if kind == ExportKind::UnmatchedStudents {
                header.push("Reason");
            }
            push_record(&mut out, &header);
            for r in rows {
                let u = &r.row;
                let mut rec = vec![
                    u.row.to_string(),
                    u.line.to_string(),
                    u.school_name.clone(),
                    u.location.clone(),
                    u.region.clone(),
                    u.student_number.clone(),
                    u.student_name(),
                ];
                if kind == ExportKind::UnmatchedStudents {
                    rec.push(reason_code(r));
                }
                push_record(&mut out, &rec);
                written += 1;
            }
        }
        ExportKind::InvalidMarks => {
            push_record(
                &mut out,
                &[
                    "Row", "Line", "School Name", "Student Name", "Subject", "Value",
                    "Max Score", "Reason",
                ],
            );
            for r in rows {
                let RowMarks::InvalidMarks(bad) = &r.marks else {
                    continue;
                };
                for m in bad {
                    push_record(
                        &mut out,
                        &[
                            r.row.row.to_string(),
                            r.row.line.to_string(),
                            r.row.school_name.clone(),
                            r.row.student_name(),
                            m.subject_name.clone(),
                            m.value.clone(),
                            format_score(m.max_score),
                            m.reason.code().to_string(),
                        ],
                    );
                    written += 1;
                }
            }
        }
    }
    (out, written)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::reconcile::resolver::memory::MemoryLookup;
    use crate::reconcile::resolver::AutoCreate;
    use crate::reconcile::{analyze, tabular, UploadParams};

    fn subject(name: &str) -> SubjectSpec {
        SubjectSpec {
            id: name.to_lowercase(),
            name: name.to_string(),
            arabic_name: String::new(),
            max_score: 100.0,
        }
    }

    #[test]
    fn grade_six_template_lists_subjects_alphabetically() {
        let csv = template_csv(&[subject("Quran"), subject("Hadith")]);
        assert!(csv.starts_with(BOM));
        let mut lines = csv.trim_start_matches(BOM).lines();
        assert_eq!(
            lines.next(),
            Some("School Code,School Name,Location,Region,Student Number,Student Name,Hadith,Quran")
        );
        let sample = lines.next().expect("sample row");
        assert_eq!(sample.split(',').count(), 8);
        assert!(sample.ends_with(",80,80"));
        assert_eq!(lines.next(), None);

        let mixed = template_csv(&[subject("fiqh"), subject("Arabic"), subject("Tajweed")]);
        assert!(mixed.contains("Student Name,Arabic,fiqh,Tajweed\r\n"));
    }

    #[test]
    fn template_round_trips_through_the_parser() {
        let csv = template_csv(&[subject("Quran"), subject("Hadith")]);
        let table = tabular::parse_table(csv.as_bytes(), 1 << 20).expect("parse");
        assert_eq!(table.headers[0], "School Code");
        assert_eq!(table.rows.len(), 1);
        assert!(table.structural_errors.is_empty());
    }

    #[test]
    fn quoting_only_when_needed() {
        assert_eq!(csv_quote("plain"), "plain");
        assert_eq!(csv_quote("a,b"), "\"a,b\"");
        assert_eq!(csv_quote("say \"hi\""), "\"say \"\"hi\"\"\"");
        assert_eq!(format_score(85.0), "85");
        assert_eq!(format_score(72.5), "72.5");
    }

    fn session() -> UploadAnalysis {
        let lookup = MemoryLookup::default()
            .region("rA", "Region A")
            .cluster("cA", "rA", "Central")
            .school("sA", "cA", "Al Noor", None)
            .school("sB", "cA", "Twin", None)
            .school("sC", "cA", "twin", None);
        let csv = "School Code,School Name,Location,Region,Student Number,Student Name,Quran,Hadith\n\
            S1,Al Nour,Central,Region X,,Kid A,80,\n\
            S1,Al Noor,Central,Region A,,Kid B,,\n\
            S1,Al Noor,Central,Region A,,Kid C,abc,150\n\
            S1,Al Noor,Central,Region A,,,70,\n\
            S1,\"Noor, Main\",Central,Region A,,Kid D,70,\n";
        let table = tabular::parse_table(csv.as_bytes(), 1 << 20).expect("parse");
        let strict = AutoCreate {
            regions: false,
            clusters: true,
            schools: false,
        };
        analyze(
            &lookup,
            table,
            &[subject("Quran"), subject("Hadith")],
            UploadParams {
                grade: 6,
                exam_year_id: "y1".into(),
            },
            &strict,
        )
        .expect("analyze")
    }

    #[test]
    fn error_exports_render_each_class() {
        let a = session();

        let (text, n) = render_export(&a, ExportKind::UnmatchedSchools);
        assert_eq!(n, 2);
        assert!(text.starts_with(BOM));
        assert!(text.contains("1,2,S1,Al Nour,Central,Region X,region_not_found,\r\n"));
        assert!(text.contains("\"Noor, Main\""));
        assert!(text.contains("school_not_found"));

        let (text, n) = render_export(&a, ExportKind::UnmatchedStudents);
        assert_eq!(n, 1);
        assert!(text.contains("student_blank"));

        let (text, n) = render_export(&a, ExportKind::NoMarks);
        assert_eq!(n, 1);
        assert!(text.contains(",Kid B\r\n"));

        let (text, n) = render_export(&a, ExportKind::InvalidMarks);
        assert_eq!(n, 2);
        assert!(text.contains("3,4,Al Noor,Kid C,Quran,abc,100,not_numeric\r\n"));
        assert!(text.contains("3,4,Al Noor,Kid C,Hadith,150,100,out_of_range\r\n"));
    }

    #[test]
    fn export_kinds_accept_legacy_names() {
        assert_eq!(ExportKind::parse("unmatched"), Some(ExportKind::UnmatchedSchools));
        assert_eq!(ExportKind::parse("unmatchedstudents"), Some(ExportKind::UnmatchedStudents));
        assert_eq!(ExportKind::parse("nomarks"), Some(ExportKind::NoMarks));
        assert_eq!(ExportKind::parse("invalid"), Some(ExportKind::InvalidMarks));
        assert_eq!(ExportKind::parse("other"), None);
    }
}
