use serde::Serialize;

/// Grade levels that sit the comprehensive exam.
pub const VALID_GRADES: [i64; 4] = [3, 6, 9, 12];

pub const DEFAULT_MAX_SCORE: f64 = 100.0;
pub const DEFAULT_PASS_SCORE: f64 = 50.0;

pub fn is_valid_grade(grade: i64) -> bool {
    VALID_GRADES.contains(&grade)
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub enum LetterGrade {
    A,
    B,
    C,
    D,
    E,
    F,
}

impl LetterGrade {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::A => "A",
            Self::B => "B",
            Self::C => "C",
            Self::D => "D",
            Self::E => "E",
            Self::F => "F",
        }
    }
}

/// Lower bounds (percent of max score) for each band, highest first.
const GRADE_BANDS: [(f64, LetterGrade); 5] = [
    (90.0, LetterGrade::A),
    (80.0, LetterGrade::B),
    (70.0, LetterGrade::C),
    (60.0, LetterGrade::D),
    (50.0, LetterGrade::E),
];

pub fn percent_of(total: f64, max_score: f64) -> f64 {
    if max_score > 0.0 {
        100.0 * total / max_score
    } else {
        0.0
    }
}

pub fn letter_grade(total: f64, max_score: f64) -> LetterGrade {
    let pct = percent_of(total, max_score);
    GRADE_BANDS
        .iter()
        .find(|(min, _)| pct >= *min)
        .map(|(_, g)| *g)
        .unwrap_or(LetterGrade::F)
}

pub fn is_pass(total: f64, pass_score: f64) -> bool {
    total >= pass_score
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize)]
#[serde(rename_all = "lowercase")]
pub enum ResultStatus {
    Pending,
    Validated,
    Published,
}

impl ResultStatus {
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "pending" => Some(Self::Pending),
            "validated" => Some(Self::Validated),
            "published" => Some(Self::Published),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Validated => "validated",
            Self::Published => "published",
        }
    }

    /// Status only moves forward; staying put is allowed.
    pub fn can_transition_to(self, next: ResultStatus) -> bool {
        next >= self
    }

    /// Published results are frozen against bulk re-uploads.
    pub fn is_locked(self) -> bool {
        self == Self::Published
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn bands_follow_percent_of_max_score() {
        assert_eq!(letter_grade(95.0, 100.0), LetterGrade::A);
        assert_eq!(letter_grade(90.0, 100.0), LetterGrade::A);
        assert_eq!(letter_grade(89.9, 100.0), LetterGrade::B);
        assert_eq!(letter_grade(70.0, 100.0), LetterGrade::C);
        assert_eq!(letter_grade(60.0, 100.0), LetterGrade::D);
        assert_eq!(letter_grade(50.0, 100.0), LetterGrade::E);
        assert_eq!(letter_grade(49.0, 100.0), LetterGrade::F);
        // 40 out of 50 is 80%.
        assert_eq!(letter_grade(40.0, 50.0), LetterGrade::B);
        assert_eq!(letter_grade(10.0, 0.0), LetterGrade::F);
    }

    #[test]
    fn status_never_regresses() {
        use ResultStatus::*;
        assert!(Pending.can_transition_to(Validated));
        assert!(Validated.can_transition_to(Published));
        assert!(Pending.can_transition_to(Published));
        assert!(Validated.can_transition_to(Validated));
        assert!(!Published.can_transition_to(Validated));
        assert!(!Validated.can_transition_to(Pending));
        assert_eq!(ResultStatus::parse(" Published "), Some(Published));
        assert_eq!(ResultStatus::parse("draft"), None);
    }

    #[test]
    fn grade_set_is_fixed() {
        assert!(is_valid_grade(6));
        assert!(!is_valid_grade(7));
        assert!(is_pass(50.0, DEFAULT_PASS_SCORE));
        assert!(!is_pass(49.5, DEFAULT_PASS_SCORE));
    }
}
