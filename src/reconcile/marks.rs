use super::row::{ScoreCell, UploadRow};
use serde::Serialize;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum InvalidReason {
    NotNumeric,
    OutOfRange,
}

impl InvalidReason {
    pub fn code(self) -> &'static str {
        match self {
            Self::NotNumeric => "not_numeric",
            Self::OutOfRange => "out_of_range",
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub enum MarkOutcome {
    Absent,
    Valid(f64),
    Invalid(InvalidReason),
}

pub fn validate_cell(raw: &str, max_score: f64) -> MarkOutcome {
    let t = raw.trim();
    if t.is_empty() {
        return MarkOutcome::Absent;
    }
    let Ok(v) = t.parse::<f64>() else {
        return MarkOutcome::Invalid(InvalidReason::NotNumeric);
    };
    if !v.is_finite() {
        return MarkOutcome::Invalid(InvalidReason::NotNumeric);
    }
    // Rejected, never clamped.
    if v < 0.0 || v > max_score {
        return MarkOutcome::Invalid(InvalidReason::OutOfRange);
    }
    MarkOutcome::Valid(v)
}

#[derive(Debug, Clone, PartialEq)]
pub struct ValidMark {
    pub subject_id: String,
    pub subject_name: String,
    pub max_score: f64,
    pub score: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct InvalidMark {
    pub subject_name: String,
    pub value: String,
    pub max_score: f64,
    pub reason: InvalidReason,
}

#[derive(Debug, Clone, PartialEq)]
pub enum RowMarks {
    /// At least one valid mark and no invalid cell.
    Valid(Vec<ValidMark>),
    /// Every subject cell blank.
    NoValidMarks,
    /// Any invalid cell keeps the whole row out of the write.
    InvalidMarks(Vec<InvalidMark>),
}

pub fn validate_row(row: &UploadRow) -> RowMarks {
    validate_cells(&row.scores)
}

pub fn validate_cells(cells: &[ScoreCell]) -> RowMarks {
    let mut valid = Vec::new();
    let mut invalid = Vec::new();
    for cell in cells {
        match validate_cell(&cell.raw, cell.max_score) {
            MarkOutcome::Absent => {}
            MarkOutcome::Valid(score) => valid.push(ValidMark {
                subject_id: cell.subject_id.clone(),
                subject_name: cell.subject_name.clone(),
                max_score: cell.max_score,
                score,
            }),
            MarkOutcome::Invalid(reason) => invalid.push(InvalidMark {
                subject_name: cell.subject_name.clone(),
                value: cell.raw.clone(),
                max_score: cell.max_score,
                reason,
            }),
        }
    }
    if !invalid.is_empty() {
        RowMarks::InvalidMarks(invalid)
    } else if valid.is_empty() {
        RowMarks::NoValidMarks
    } else {
        RowMarks::Valid(valid)
    }
}
