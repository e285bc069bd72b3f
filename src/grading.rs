//! Pure grading math: final-mark aggregation over the four quarterly scores
//! and the graduation-standing rule applied to one enrollment's finals.

pub const QUARTER_COUNT: usize = 4;

/// Default passing threshold for a final mark; overridable via the
/// `setup.promotion` settings section.
pub const DEFAULT_PASSING_FINAL: f64 = 75.0;

/// Enrollment status labels. Informational only; the caller picks them and
/// no transition logic applies.
pub const ENROLLMENT_STATUSES: [&str; 5] =
    ["new", "promoted", "retained", "transferred", "dropped"];

pub fn is_valid_enrollment_status(status: &str) -> bool {
    ENROLLMENT_STATUSES.contains(&status)
}

/// Round-half-up at 2 decimals: `Int(100*x + 0.5) / 100`.
pub fn round_off_2_decimals(x: f64) -> f64 {
    ((100.0 * x) + 0.5).floor() / 100.0
}

/// Quarterly and final scores live on a 0-100 scale.
pub fn score_in_range(value: f64) -> bool {
    value.is_finite() && (0.0..=100.0).contains(&value)
}

/// Final mark for one (enrollment, offering) pair: the mean of the four
/// quarters, rounded to 2 decimals.
///
/// All four quarters must be present before a final is produced; a partially
/// scored grade has no final (None).
pub fn compute_final(quarters: [Option<f64>; QUARTER_COUNT]) -> Option<f64> {
    let mut sum = 0.0;
    for q in quarters {
        sum += q?;
    }
    Some(round_off_2_decimals(sum / QUARTER_COUNT as f64))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Standing {
    Eligible,
    NoFinals,
    IncompleteFinal,
    FailingFinal,
}

impl Standing {
    pub fn reason_code(self) -> Option<&'static str> {
        match self {
            Standing::Eligible => None,
            Standing::NoFinals => Some("no_finals"),
            Standing::IncompleteFinal => Some("incomplete_final"),
            Standing::FailingFinal => Some("failing_final"),
        }
    }
}

/// Graduation standing of one enrollment given its grade finals.
///
/// Eligible iff there is at least one grade row and every final is present
/// and at or above `passing`. An enrollment with no grade rows proves
/// nothing, so it does not qualify.
pub fn graduation_standing(finals: &[Option<f64>], passing: f64) -> Standing {
    if finals.is_empty() {
        return Standing::NoFinals;
    }
    for f in finals {
        match f {
            None => return Standing::IncompleteFinal,
            Some(v) if *v < passing => return Standing::FailingFinal,
            Some(_) => {}
        }
    }
    Standing::Eligible
}
