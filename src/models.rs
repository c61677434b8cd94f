use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::progress::{EnrollmentStatus, Progress};

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct Course {
    pub id: Uuid,
    pub title: String,
    pub created_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, Copy, PartialEq, Eq)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ItemKind {
    Module,
    Workshop,
}

impl ItemKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            ItemKind::Module => "module",
            ItemKind::Workshop => "workshop",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "module" => Some(ItemKind::Module),
            "workshop" => Some(ItemKind::Workshop),
            _ => None,
        }
    }
}

/// A course item as stored. `kind` stays raw text so rows written with an
/// unknown kind can still be loaded and reported.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct CourseItemRow {
    pub id: Uuid,
    pub course_id: Uuid,
    pub position: i32,
    pub kind: String,
    pub module_id: Option<Uuid>,
    pub workshop_id: Option<Uuid>,
}

/// Course item joined with one learner's completion records.
#[derive(sqlx::FromRow, Debug, Clone)]
pub struct ItemProgressRow {
    pub id: Uuid,
    pub position: i32,
    pub kind: String,
    pub module_id: Option<Uuid>,
    pub workshop_id: Option<Uuid>,
    pub completed_at: Option<DateTime<Utc>>,
    pub score: Option<f64>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CourseItem {
    pub id: Uuid,
    pub course_id: Uuid,
    pub position: i32,
    pub kind: ItemKind,
    pub title: String,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct ModuleProgress {
    pub id: Uuid,
    pub user_id: String,
    pub module_id: Uuid,
    pub completed_at: Option<DateTime<Utc>>,
    pub updated_at: DateTime<Utc>,
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct WorkshopSubmission {
    pub id: Uuid,
    pub user_id: String,
    pub workshop_id: Uuid,
    pub submission_url: String,
    pub score: Option<f64>,
    pub submitted_at: DateTime<Utc>,
    pub graded_at: Option<DateTime<Utc>>,
}

#[derive(sqlx::FromRow, Debug, Clone)]
pub struct EnrollmentRow {
    pub id: Uuid,
    pub user_id: String,
    pub course_id: Uuid,
    pub progress_percent: i32,
    pub status: String,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct EnrollmentSnapshot {
    pub enrollment_id: Uuid,
    pub user_id: String,
    pub course_id: Uuid,
    pub progress_percent: u8,
    pub status: EnrollmentStatus,
}

impl EnrollmentRow {
    /// Status is re-derived from the stored percentage, so a row edited by hand
    /// can never be reported as COMPLETED below 100%.
    pub fn snapshot(&self) -> EnrollmentSnapshot {
        let progress_percent = self.progress_percent.clamp(0, 100) as u8;
        let status = EnrollmentStatus::from_percentage(progress_percent);
        if self.status.parse::<EnrollmentStatus>().ok() != Some(status) {
            tracing::warn!(
                enrollment_id = %self.id,
                stored = %self.status,
                derived = %status,
                "stored enrollment status disagrees with its percentage"
            );
        }
        EnrollmentSnapshot {
            enrollment_id: self.id,
            user_id: self.user_id.clone(),
            course_id: self.course_id,
            progress_percent,
            status,
        }
    }
}

#[derive(sqlx::FromRow, Serialize, Deserialize, Debug, Clone, PartialEq)]
#[serde(rename_all = "camelCase")]
pub struct Certificate {
    pub id: Uuid,
    pub enrollment_id: Uuid,
    #[serde(rename = "certificateCode")]
    pub code: String,
    pub file_url: String,
    pub issued_at: DateTime<Utc>,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ItemProgress {
    pub item_id: Uuid,
    pub position: i32,
    pub kind: Option<ItemKind>,
    pub completed: bool,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct ToggleOutcome {
    pub completed: bool,
    pub progress: Progress,
    pub enrollment: EnrollmentSnapshot,
}

// --- request bodies ---

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct CreateCourseReq {
    pub title: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AddModuleReq {
    pub title: String,
    pub content_url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct AddWorkshopReq {
    pub title: String,
    pub instructions: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct EnrollReq {
    pub user_id: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct MarkItemReq {
    pub user_id: String,
    pub course_item_id: Uuid,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct SubmitWorkshopReq {
    pub user_id: String,
    pub submission_url: String,
}

#[derive(Serialize, Deserialize, Debug, Clone)]
#[serde(rename_all = "camelCase")]
pub struct GradeReq {
    pub user_id: String,
    pub score: f64,
}
