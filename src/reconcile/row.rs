use super::normalize::{name_key, split_full_name};
use super::tabular::RawRow;
use std::collections::HashMap;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum KnownField {
    SchoolCode,
    SchoolName,
    Location,
    Region,
    StudentNumber,
    StudentName,
    FirstName,
    LastName,
}

impl KnownField {
    pub fn from_header(label: &str) -> Option<Self> {
        match name_key(label).replace(['_', '-'], " ").as_str() {
            "school code" | "code" => Some(Self::SchoolCode),
            "school name" | "school" => Some(Self::SchoolName),
            "location" | "cluster" | "cluster name" => Some(Self::Location),
            "region" | "region name" => Some(Self::Region),
            "student number" | "index number" | "student no" => Some(Self::StudentNumber),
            "student name" | "name" | "full name" => Some(Self::StudentName),
            "first name" => Some(Self::FirstName),
            "last name" | "surname" => Some(Self::LastName),
            _ => None,
        }
    }

    pub fn label(self) -> &'static str {
        match self {
            Self::SchoolCode => "School Code",
            Self::SchoolName => "School Name",
            Self::Location => "Location",
            Self::Region => "Region",
            Self::StudentNumber => "Student Number",
            Self::StudentName => "Student Name",
            Self::FirstName => "First Name",
            Self::LastName => "Last Name",
        }
    }
}

/// Columns every template starts with, in order.
pub const TEMPLATE_FIELDS: [KnownField; 6] = [
    KnownField::SchoolCode,
    KnownField::SchoolName,
    KnownField::Location,
    KnownField::Region,
    KnownField::StudentNumber,
    KnownField::StudentName,
];

/// A subject offered at the upload's grade.
#[derive(Debug, Clone, PartialEq)]
pub struct SubjectSpec {
    pub id: String,
    pub name: String,
    pub arabic_name: String,
    pub max_score: f64,
}

#[derive(Debug, Clone, PartialEq)]
pub struct ScoreCell {
    pub subject_id: String,
    pub subject_name: String,
    pub max_score: f64,
    pub raw: String,
}

#[derive(Debug, Clone, PartialEq)]
pub struct UploadRow {
    pub row: usize,
    pub line: usize,
    pub school_code: String,
    pub school_name: String,
    pub location: String,
    pub region: String,
    pub student_number: String,
    pub first_name: String,
    pub last_name: String,
    pub scores: Vec<ScoreCell>,
}

impl UploadRow {
    pub fn student_name(&self) -> String {
        if self.last_name.is_empty() {
            self.first_name.clone()
        } else {
            format!("{} {}", self.first_name, self.last_name)
        }
    }
}

/// Column layout of one upload, checked against the grade's live subject list.
#[derive(Debug, Clone)]
pub struct RowSchema {
    known: HashMap<KnownField, usize>,
    subjects: Vec<(usize, SubjectSpec)>,
    ignored: Vec<String>,
}

impl RowSchema {
    pub fn build(headers: &[String], subjects: &[SubjectSpec]) -> Self {
        let mut known = HashMap::new();
        let mut mapped = Vec::<(usize, SubjectSpec)>::new();
        let mut ignored = Vec::new();
        for (col, header) in headers.iter().enumerate() {
            if header.trim().is_empty() {
                continue;
            }
            if let Some(field) = KnownField::from_header(header) {
                known.entry(field).or_insert(col);
                continue;
            }
            let key = name_key(header);
            let subject = subjects.iter().find(|s| {
                name_key(&s.name) == key
                    || (!s.arabic_name.trim().is_empty() && name_key(&s.arabic_name) == key)
            });
            match subject {
                Some(s) if !mapped.iter().any(|(_, m)| m.id == s.id) => {
                    mapped.push((col, s.clone()));
                }
                _ => ignored.push(header.clone()),
            }
        }
        Self {
            known,
            subjects: mapped,
            ignored,
        }
    }

    pub fn subject_columns(&self) -> Vec<String> {
        self.subjects.iter().map(|(_, s)| s.name.clone()).collect()
    }

    pub fn ignored_columns(&self) -> &[String] {
        &self.ignored
    }

    pub fn has(&self, field: KnownField) -> bool {
        self.known.contains_key(&field)
    }

    /// Required location/student columns the header does not carry.
    pub fn missing_columns(&self) -> Vec<&'static str> {
        let mut out = Vec::new();
        for f in [KnownField::SchoolName, KnownField::Location, KnownField::Region] {
            if !self.has(f) {
                out.push(f.label());
            }
        }
        if !self.has(KnownField::StudentName) && !self.has(KnownField::FirstName) {
            out.push(KnownField::StudentName.label());
        }
        out
    }

    fn field(&self, raw: &RawRow, f: KnownField) -> String {
        self.known
            .get(&f)
            .map(|col| raw.get(*col).to_string())
            .unwrap_or_default()
    }

    pub fn read(&self, raw: &RawRow) -> UploadRow {
        let (first_name, last_name) = if self.has(KnownField::StudentName) {
            split_full_name(&self.field(raw, KnownField::StudentName))
        } else {
            (
                self.field(raw, KnownField::FirstName),
                self.field(raw, KnownField::LastName),
            )
        };
        let scores = self
            .subjects
            .iter()
            .map(|(col, s)| ScoreCell {
                subject_id: s.id.clone(),
                subject_name: s.name.clone(),
                max_score: s.max_score,
                raw: raw.get(*col).to_string(),
            })
            .collect();
        UploadRow {
            row: raw.row,
            line: raw.line,
            school_code: self.field(raw, KnownField::SchoolCode),
            school_name: self.field(raw, KnownField::SchoolName),
            location: self.field(raw, KnownField::Location),
            region: self.field(raw, KnownField::Region),
            student_number: self.field(raw, KnownField::StudentNumber),
            first_name,
            last_name,
            scores,
        }
    }
}
