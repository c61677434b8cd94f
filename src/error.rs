use axum::{
    http::StatusCode,
    response::{IntoResponse, Response},
    Json,
};
use serde_json::json;
use thiserror::Error;
use uuid::Uuid;

#[derive(Debug, Error)]
pub enum ProgressError {
    #[error("user {user_id} is not enrolled in course {course_id}")]
    NotEnrolled { user_id: String, course_id: Uuid },

    #[error("course item {item_id} is a {kind} item and cannot be changed this way")]
    UnsupportedItemType { item_id: Uuid, kind: String },

    #[error("certificate not available yet for enrollment {enrollment_id}")]
    CertificateNotAvailable { enrollment_id: Uuid },

    #[error("course {0} not found")]
    CourseNotFound(Uuid),

    #[error("course item {0} not found")]
    ItemNotFound(Uuid),

    #[error("enrollment {0} not found")]
    EnrollmentNotFound(Uuid),

    #[error("no submission from user {user_id} for course item {item_id}")]
    SubmissionNotFound { user_id: String, item_id: Uuid },

    #[error("invalid score {0}: must be between 0 and 100")]
    InvalidScore(f64),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("certificate rendering failed: {0}")]
    Render(String),

    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("migration error: {0}")]
    Migration(#[from] sqlx::migrate::MigrateError),
}

pub type ProgressResult<T> = Result<T, ProgressError>;

impl ProgressError {
    pub fn status_code(&self) -> StatusCode {
        match self {
            ProgressError::Database(e) if is_busy(e) => StatusCode::SERVICE_UNAVAILABLE,
            ProgressError::NotEnrolled { .. } => StatusCode::FORBIDDEN,
            ProgressError::CertificateNotAvailable { .. } => StatusCode::CONFLICT,
            ProgressError::CourseNotFound(_)
            | ProgressError::ItemNotFound(_)
            | ProgressError::EnrollmentNotFound(_)
            | ProgressError::SubmissionNotFound { .. } => StatusCode::NOT_FOUND,
            ProgressError::UnsupportedItemType { .. }
            | ProgressError::InvalidScore(_)
            | ProgressError::Validation(_) => StatusCode::BAD_REQUEST,
            ProgressError::Render(_)
            | ProgressError::Database(_)
            | ProgressError::Migration(_) => StatusCode::INTERNAL_SERVER_ERROR,
        }
    }

    pub fn code(&self) -> &'static str {
        match self {
            ProgressError::Database(e) if is_busy(e) => "DATABASE_BUSY",
            ProgressError::NotEnrolled { .. } => "NOT_ENROLLED",
            ProgressError::UnsupportedItemType { .. } => "UNSUPPORTED_ITEM_TYPE",
            ProgressError::CertificateNotAvailable { .. } => "CERTIFICATE_NOT_AVAILABLE",
            ProgressError::CourseNotFound(_) => "COURSE_NOT_FOUND",
            ProgressError::ItemNotFound(_) => "ITEM_NOT_FOUND",
            ProgressError::EnrollmentNotFound(_) => "ENROLLMENT_NOT_FOUND",
            ProgressError::SubmissionNotFound { .. } => "SUBMISSION_NOT_FOUND",
            ProgressError::InvalidScore(_) => "INVALID_SCORE",
            ProgressError::Validation(_) => "VALIDATION_ERROR",
            ProgressError::Render(_) => "RENDER_ERROR",
            ProgressError::Database(_) | ProgressError::Migration(_) => "DATABASE_ERROR",
        }
    }
}

impl IntoResponse for ProgressError {
    fn into_response(self) -> Response {
        let status = self.status_code();
        // internal details stay in the logs
        let message = if status.is_server_error() {
            tracing::error!(error = %self, "internal error");
            "An internal server error occurred".to_string()
        } else {
            self.to_string()
        };

        let body = Json(json!({
            "error": {
                "code": self.code(),
                "message": message,
            }
        }));

        (status, body).into_response()
    }
}

/// True when the storage layer rejected a write on a UNIQUE constraint.
pub(crate) fn is_unique_violation(err: &sqlx::Error) -> bool {
    matches!(err, sqlx::Error::Database(db) if db.is_unique_violation())
}

/// SQLITE_BUSY or SQLITE_LOCKED, including extended codes. The lock wait
/// timed out, so the request may be retried as a whole.
pub(crate) fn is_busy(err: &sqlx::Error) -> bool {
    let sqlx::Error::Database(db) = err else {
        return false;
    };
    db.code()
        .and_then(|code| code.parse::<i32>().ok())
        .is_some_and(|code| matches!(code & 0xff, 5 | 6))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn maps_user_facing_errors_to_client_statuses() {
        let cases = [
            (
                ProgressError::NotEnrolled {
                    user_id: "u".into(),
                    course_id: Uuid::nil(),
                },
                StatusCode::FORBIDDEN,
            ),
            (
                ProgressError::CertificateNotAvailable {
                    enrollment_id: Uuid::nil(),
                },
                StatusCode::CONFLICT,
            ),
            (ProgressError::ItemNotFound(Uuid::nil()), StatusCode::NOT_FOUND),
            (ProgressError::InvalidScore(101.0), StatusCode::BAD_REQUEST),
            (ProgressError::Render("disk full".into()), StatusCode::INTERNAL_SERVER_ERROR),
        ];
        for (err, expected) in cases {
            assert_eq!(err.status_code(), expected, "{err}");
        }
    }

    #[test]
    fn certificate_refusal_reads_as_not_yet_eligible() {
        let err = ProgressError::CertificateNotAvailable {
            enrollment_id: Uuid::nil(),
        };
        assert!(err.to_string().starts_with("certificate not available yet"));
        assert_eq!(err.code(), "CERTIFICATE_NOT_AVAILABLE");
    }

    #[test]
    fn other_database_errors_stay_internal() {
        let err = ProgressError::Database(sqlx::Error::RowNotFound);
        assert!(!is_busy(&sqlx::Error::RowNotFound));
        assert_eq!(err.status_code(), StatusCode::INTERNAL_SERVER_ERROR);
        assert_eq!(err.code(), "DATABASE_ERROR");
    }
}
