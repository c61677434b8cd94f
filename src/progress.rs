// Course progress calculation and the enrollment status derived from it.
//
// Everything here is pure: callers load a full snapshot of a course's items
// for one learner and the percentage is recomputed from scratch every time.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// What a learner has done for a single course item.
///
/// Modules are complete once they carry a completion timestamp, workshops
/// once a grader has attached a score.
#[derive(Debug, Clone, PartialEq)]
pub enum CompletionFact {
    Module { completed_at: Option<DateTime<Utc>> },
    Workshop { score: Option<f64> },
}

impl CompletionFact {
    pub fn is_completed(&self) -> bool {
        match self {
            CompletionFact::Module { completed_at } => completed_at.is_some(),
            CompletionFact::Workshop { score } => score.is_some(),
        }
    }
}

/// One position in a course, seen from one learner.
///
/// `fact` is `None` for malformed items (unknown kind, or the referenced
/// module/workshop is missing). Those count toward the total but never as
/// completed.
#[derive(Debug, Clone, PartialEq)]
pub struct ItemSnapshot {
    pub item_id: Uuid,
    pub position: i32,
    pub fact: Option<CompletionFact>,
}

impl ItemSnapshot {
    pub fn is_completed(&self) -> bool {
        self.fact.as_ref().is_some_and(CompletionFact::is_completed)
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Progress {
    pub completed_count: u32,
    pub total_count: u32,
    pub percentage: u8,
}

/// Percentage of completed items, rounded half-up. An empty course is 0%.
pub fn compute_progress(items: &[ItemSnapshot]) -> Progress {
    let total_count = items.len() as u32;
    let completed_count = items.iter().filter(|i| i.is_completed()).count() as u32;
    Progress {
        completed_count,
        total_count,
        percentage: percentage(completed_count, total_count),
    }
}

pub fn percentage(completed: u32, total: u32) -> u8 {
    if total == 0 {
        return 0;
    }
    let completed = u64::from(completed.min(total));
    let total = u64::from(total);
    // round(100 * c / t) with halves going up, in integers
    ((200 * completed + total) / (2 * total)) as u8
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum EnrollmentStatus {
    InProgress,
    Completed,
}

impl EnrollmentStatus {
    /// Status is never set on its own; it always follows the percentage.
    pub fn from_percentage(percentage: u8) -> Self {
        if percentage >= 100 {
            EnrollmentStatus::Completed
        } else {
            EnrollmentStatus::InProgress
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            EnrollmentStatus::InProgress => "IN_PROGRESS",
            EnrollmentStatus::Completed => "COMPLETED",
        }
    }
}

impl fmt::Display for EnrollmentStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for EnrollmentStatus {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "IN_PROGRESS" => Ok(EnrollmentStatus::InProgress),
            "COMPLETED" => Ok(EnrollmentStatus::Completed),
            other => Err(format!("unknown enrollment status: {other}")),
        }
    }
}

/// Percentage and status as they are written to an enrollment, always together.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Recomputed {
    pub progress: Progress,
    pub status: EnrollmentStatus,
}

pub fn recompute(items: &[ItemSnapshot]) -> Recomputed {
    let progress = compute_progress(items);
    Recomputed {
        progress,
        status: EnrollmentStatus::from_percentage(progress.percentage),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn module(done: bool) -> ItemSnapshot {
        ItemSnapshot {
            item_id: Uuid::new_v4(),
            position: 0,
            fact: Some(CompletionFact::Module {
                completed_at: done.then(Utc::now),
            }),
        }
    }

    fn workshop(score: Option<f64>) -> ItemSnapshot {
        ItemSnapshot {
            item_id: Uuid::new_v4(),
            position: 0,
            fact: Some(CompletionFact::Workshop { score }),
        }
    }

    fn malformed() -> ItemSnapshot {
        ItemSnapshot {
            item_id: Uuid::new_v4(),
            position: 0,
            fact: None,
        }
    }

    #[test]
    fn empty_course_is_zero() {
        let p = compute_progress(&[]);
        assert_eq!(p.total_count, 0);
        assert_eq!(p.percentage, 0);
    }

    #[test]
    fn nothing_completed_is_zero() {
        let p = compute_progress(&[module(false), workshop(None), workshop(None)]);
        assert_eq!(p.completed_count, 0);
        assert_eq!(p.percentage, 0);
    }

    #[test]
    fn mixed_item_types() {
        let items = [module(true), module(false), workshop(Some(80.0)), workshop(None)];
        let p = compute_progress(&items);
        assert_eq!(p.completed_count, 2);
        assert_eq!(p.total_count, 4);
        assert_eq!(p.percentage, 50);
    }

    #[test]
    fn zero_score_still_counts_as_graded() {
        assert_eq!(compute_progress(&[workshop(Some(0.0))]).percentage, 100);
    }

    #[test]
    fn malformed_item_counts_as_incomplete() {
        let items = [module(true), workshop(Some(10.0)), module(false), malformed()];
        let p = compute_progress(&items);
        assert_eq!(p.completed_count, 2);
        assert_eq!(p.total_count, 4);
        assert_eq!(p.percentage, 50);
    }

    #[test]
    fn rounds_half_up() {
        assert_eq!(percentage(1, 8), 13); // 12.5
        assert_eq!(percentage(1, 3), 33);
        assert_eq!(percentage(2, 3), 67);
        assert_eq!(percentage(1, 200), 1); // 0.5
        assert_eq!(percentage(199, 200), 100); // 99.5
    }

    #[test]
    fn percentage_stays_in_bounds() {
        for total in 0..=40u32 {
            for completed in 0..=total {
                let p = percentage(completed, total);
                assert!(p <= 100);
                if completed == 0 {
                    assert_eq!(p, 0);
                }
                if total > 0 && completed == total {
                    assert_eq!(p, 100);
                }
            }
        }
    }

    #[test]
    fn status_follows_percentage() {
        for p in 0..=100u8 {
            let status = EnrollmentStatus::from_percentage(p);
            assert_eq!(status == EnrollmentStatus::Completed, p == 100);
        }
    }

    #[test]
    fn recompute_pairs_status_with_percentage() {
        let done = recompute(&[module(true), workshop(Some(1.0))]);
        assert_eq!(done.progress.percentage, 100);
        assert_eq!(done.status, EnrollmentStatus::Completed);

        let partial = recompute(&[module(true), workshop(None)]);
        assert_eq!(partial.status, EnrollmentStatus::InProgress);
    }

    #[test]
    fn status_text_round_trips() {
        assert_eq!("COMPLETED".parse::<EnrollmentStatus>(), Ok(EnrollmentStatus::Completed));
        assert_eq!(EnrollmentStatus::InProgress.to_string(), "IN_PROGRESS");
        assert!("done".parse::<EnrollmentStatus>().is_err());
    }
}
