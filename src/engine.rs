use std::sync::Arc;

use chrono::Utc;
use sqlx::{SqliteConnection, SqlitePool};
use tracing::{debug, info, instrument, warn};
use uuid::Uuid;

use crate::certificate::{generate_code, CertificateDocument, CertificateRenderer};
use crate::db::WriteTx;
use crate::error::{is_unique_violation, ProgressError, ProgressResult};
use crate::models::*;
use crate::progress::{compute_progress, recompute, EnrollmentStatus, Progress, Recomputed};
use crate::repo;

/// Course progress tracking for learners.
///
/// Every write that changes what a learner has completed recomputes the
/// enrollment inside the same transaction, so the stored percentage and
/// status never lag behind item state.
#[derive(Clone)]
pub struct ProgressEngine {
    pool: SqlitePool,
    renderer: Arc<dyn CertificateRenderer>,
}

impl ProgressEngine {
    pub fn new(pool: SqlitePool, renderer: Arc<dyn CertificateRenderer>) -> Self {
        Self { pool, renderer }
    }

    pub fn pool(&self) -> &SqlitePool {
        &self.pool
    }

    // --- catalog ---

    #[instrument(skip(self))]
    pub async fn create_course(&self, title: &str) -> ProgressResult<Course> {
        let title = non_blank("title", title)?;
        let mut conn = self.pool.acquire().await?;
        let course = repo::insert_course(&mut conn, title, Utc::now()).await?;
        info!(course_id = %course.id, "course created");
        Ok(course)
    }

    #[instrument(skip(self))]
    pub async fn add_module(
        &self,
        course_id: Uuid,
        title: &str,
        content_url: &str,
    ) -> ProgressResult<CourseItem> {
        let title = non_blank("title", title)?;
        let content_url = non_blank("contentUrl", content_url)?;

        let mut tx = WriteTx::begin(&self.pool).await?;
        ensure_course(&mut tx, course_id).await?;
        let module_id = repo::insert_module(&mut tx, title, content_url).await?;
        let item = append_item(&mut tx, course_id, ItemKind::Module, Some(module_id), None).await?;
        recompute_course(&mut tx, course_id).await?;
        tx.commit().await?;

        Ok(CourseItem {
            id: item.id,
            course_id,
            position: item.position,
            kind: ItemKind::Module,
            title: title.to_string(),
        })
    }

    #[instrument(skip(self, instructions))]
    pub async fn add_workshop(
        &self,
        course_id: Uuid,
        title: &str,
        instructions: &str,
    ) -> ProgressResult<CourseItem> {
        let title = non_blank("title", title)?;

        let mut tx = WriteTx::begin(&self.pool).await?;
        ensure_course(&mut tx, course_id).await?;
        let workshop_id = repo::insert_workshop(&mut tx, title, instructions).await?;
        let item =
            append_item(&mut tx, course_id, ItemKind::Workshop, None, Some(workshop_id)).await?;
        recompute_course(&mut tx, course_id).await?;
        tx.commit().await?;

        Ok(CourseItem {
            id: item.id,
            course_id,
            position: item.position,
            kind: ItemKind::Workshop,
            title: title.to_string(),
        })
    }

    // --- enrollment ---

    /// Enrolls the learner, or returns the existing enrollment untouched.
    #[instrument(skip(self))]
    pub async fn enroll(&self, user_id: &str, course_id: Uuid) -> ProgressResult<EnrollmentSnapshot> {
        let user_id = non_blank("userId", user_id)?;

        let mut tx = WriteTx::begin(&self.pool).await?;
        ensure_course(&mut tx, course_id).await?;
        let items = repo::item_snapshots(&mut tx, user_id, course_id).await?;
        let computed = recompute(&items);
        let created =
            repo::insert_enrollment(&mut tx, user_id, course_id, &computed, Utc::now()).await?;
        let row = repo::find_enrollment(&mut tx, user_id, course_id)
            .await?
            .ok_or_else(|| ProgressError::NotEnrolled {
                user_id: user_id.to_string(),
                course_id,
            })?;
        tx.commit().await?;

        if created {
            info!(enrollment_id = %row.id, "learner enrolled");
        }
        Ok(row.snapshot())
    }

    pub async fn enrollment(
        &self,
        user_id: &str,
        course_id: Uuid,
    ) -> ProgressResult<Option<EnrollmentSnapshot>> {
        let mut conn = self.pool.acquire().await?;
        let row = repo::find_enrollment(&mut conn, user_id, course_id).await?;
        Ok(row.map(|r| r.snapshot()))
    }

    // --- progress ---

    /// Live progress computed from item state, independent of the stored
    /// enrollment values.
    pub async fn progress(&self, user_id: &str, course_id: Uuid) -> ProgressResult<Progress> {
        let mut conn = self.pool.acquire().await?;
        ensure_course(&mut conn, course_id).await?;
        let items = repo::item_snapshots(&mut conn, user_id, course_id).await?;
        Ok(compute_progress(&items))
    }

    pub async fn course_items(
        &self,
        user_id: &str,
        course_id: Uuid,
    ) -> ProgressResult<Vec<ItemProgress>> {
        let mut conn = self.pool.acquire().await?;
        ensure_course(&mut conn, course_id).await?;
        let rows = repo::item_progress(&mut conn, user_id, course_id).await?;
        Ok(rows
            .into_iter()
            .map(|row| {
                let kind = ItemKind::parse(&row.kind);
                let snapshot = row.into_snapshot();
                ItemProgress {
                    item_id: snapshot.item_id,
                    position: snapshot.position,
                    kind,
                    completed: snapshot.is_completed(),
                }
            })
            .collect())
    }

    /// Flips a module between complete and incomplete for this learner.
    ///
    /// This is a toggle, not "mark complete": retrying a call that already
    /// succeeded undoes it. Callers should read the returned state.
    #[instrument(skip(self))]
    pub async fn toggle_module(
        &self,
        user_id: &str,
        course_item_id: Uuid,
    ) -> ProgressResult<ToggleOutcome> {
        let mut tx = WriteTx::begin(&self.pool).await?;

        let item = repo::find_course_item(&mut tx, course_item_id)
            .await?
            .ok_or(ProgressError::ItemNotFound(course_item_id))?;
        let module_id = match (ItemKind::parse(&item.kind), item.module_id) {
            (Some(ItemKind::Module), Some(module_id)) => module_id,
            (Some(ItemKind::Module), None) => {
                warn!(item_id = %item.id, "module item without a module");
                return Err(ProgressError::UnsupportedItemType {
                    item_id: item.id,
                    kind: "malformed module".to_string(),
                });
            }
            _ => {
                return Err(ProgressError::UnsupportedItemType {
                    item_id: item.id,
                    kind: item.kind,
                });
            }
        };

        let enrollment = require_enrollment(&mut tx, user_id, item.course_id).await?;

        let now = Utc::now();
        let completed = match repo::find_module_progress(&mut tx, user_id, module_id).await? {
            None => {
                repo::insert_module_progress(&mut tx, user_id, module_id, Some(now), now).await?;
                true
            }
            Some(existing) => {
                let next = match existing.completed_at {
                    Some(_) => None,
                    None => Some(now),
                };
                repo::set_module_completed_at(&mut tx, existing.id, next, now).await?;
                next.is_some()
            }
        };

        let computed = apply_recompute(&mut tx, &enrollment).await?;
        tx.commit().await?;

        debug!(completed, percentage = computed.progress.percentage, "module toggled");
        Ok(ToggleOutcome {
            completed,
            progress: computed.progress,
            enrollment: snapshot_after(&enrollment, &computed),
        })
    }

    // --- workshops ---

    /// Records (or replaces) a learner's workshop submission. Any previous
    /// grade is cleared, so the workshop stops counting until it is regraded.
    #[instrument(skip(self))]
    pub async fn submit_workshop(
        &self,
        user_id: &str,
        course_item_id: Uuid,
        submission_url: &str,
    ) -> ProgressResult<EnrollmentSnapshot> {
        let submission_url = non_blank("submissionUrl", submission_url)?;

        let mut tx = WriteTx::begin(&self.pool).await?;
        let (course_id, workshop_id) = workshop_item(&mut tx, course_item_id).await?;
        let enrollment = require_enrollment(&mut tx, user_id, course_id).await?;

        repo::upsert_submission(&mut tx, user_id, workshop_id, submission_url, Utc::now()).await?;
        let computed = apply_recompute(&mut tx, &enrollment).await?;
        tx.commit().await?;

        Ok(snapshot_after(&enrollment, &computed))
    }

    /// Grades an existing submission. Grading is the only way a workshop
    /// becomes complete.
    #[instrument(skip(self))]
    pub async fn grade_submission(
        &self,
        user_id: &str,
        course_item_id: Uuid,
        score: f64,
    ) -> ProgressResult<EnrollmentSnapshot> {
        if !score.is_finite() || !(0.0..=100.0).contains(&score) {
            return Err(ProgressError::InvalidScore(score));
        }

        let mut tx = WriteTx::begin(&self.pool).await?;
        let (course_id, workshop_id) = workshop_item(&mut tx, course_item_id).await?;
        let enrollment = require_enrollment(&mut tx, user_id, course_id).await?;

        let submission = repo::find_submission(&mut tx, user_id, workshop_id)
            .await?
            .ok_or_else(|| ProgressError::SubmissionNotFound {
                user_id: user_id.to_string(),
                item_id: course_item_id,
            })?;
        repo::set_submission_score(&mut tx, submission.id, score, Utc::now()).await?;
        let computed = apply_recompute(&mut tx, &enrollment).await?;
        tx.commit().await?;

        Ok(snapshot_after(&enrollment, &computed))
    }

    // --- certificates ---

    pub async fn certificate(&self, enrollment_id: Uuid) -> ProgressResult<Option<Certificate>> {
        let mut conn = self.pool.acquire().await?;
        Ok(repo::find_certificate(&mut conn, enrollment_id).await?)
    }

    /// Returns the enrollment's certificate, issuing it on first request.
    ///
    /// The document is rendered before the record is written. Concurrent
    /// requests may both render, but only one record survives the
    /// UNIQUE(enrollment_id) constraint and the loser returns the winner's.
    #[instrument(skip(self))]
    pub async fn issue_certificate(&self, enrollment_id: Uuid) -> ProgressResult<Certificate> {
        let (enrollment, course) = {
            let mut conn = self.pool.acquire().await?;
            let enrollment = repo::find_enrollment_by_id(&mut conn, enrollment_id)
                .await?
                .ok_or(ProgressError::EnrollmentNotFound(enrollment_id))?;
            if enrollment.snapshot().status != EnrollmentStatus::Completed {
                return Err(ProgressError::CertificateNotAvailable { enrollment_id });
            }
            if let Some(existing) = repo::find_certificate(&mut conn, enrollment_id).await? {
                return Ok(existing);
            }
            let course = repo::find_course(&mut conn, enrollment.course_id)
                .await?
                .ok_or(ProgressError::CourseNotFound(enrollment.course_id))?;
            (enrollment, course)
        };

        let issued_at = Utc::now();
        let doc = CertificateDocument {
            code: generate_code(),
            user_id: enrollment.user_id.clone(),
            course_title: course.title,
            issued_at,
        };
        let file_url = self
            .renderer
            .render(&doc)
            .await
            .map_err(|e| ProgressError::Render(format!("{e:#}")))?;

        let cert = Certificate {
            id: Uuid::new_v4(),
            enrollment_id,
            code: doc.code,
            file_url,
            issued_at,
        };

        let mut conn = self.pool.acquire().await?;
        match repo::insert_certificate_if_completed(&mut conn, &cert).await {
            Ok(true) => {
                info!(code = %cert.code, "certificate issued");
                Ok(cert)
            }
            // the enrollment dropped below 100% while the document was rendered
            Ok(false) => Err(ProgressError::CertificateNotAvailable { enrollment_id }),
            Err(e) if is_unique_violation(&e) => {
                debug!(orphaned_file = %cert.file_url, "certificate issued concurrently, using existing");
                repo::find_certificate(&mut conn, enrollment_id)
                    .await?
                    .ok_or(ProgressError::Database(e))
            }
            Err(e) => Err(e.into()),
        }
    }
}

// --- helpers shared by the operations above ---

fn non_blank<'a>(field: &str, value: &'a str) -> ProgressResult<&'a str> {
    let trimmed = value.trim();
    if trimmed.is_empty() {
        return Err(ProgressError::Validation(format!("{field} must not be empty")));
    }
    Ok(trimmed)
}

async fn ensure_course(conn: &mut SqliteConnection, course_id: Uuid) -> ProgressResult<Course> {
    repo::find_course(conn, course_id)
        .await?
        .ok_or(ProgressError::CourseNotFound(course_id))
}

async fn require_enrollment(
    conn: &mut SqliteConnection,
    user_id: &str,
    course_id: Uuid,
) -> ProgressResult<EnrollmentRow> {
    repo::find_enrollment(conn, user_id, course_id)
        .await?
        .ok_or_else(|| ProgressError::NotEnrolled {
            user_id: user_id.to_string(),
            course_id,
        })
}

async fn workshop_item(
    conn: &mut SqliteConnection,
    course_item_id: Uuid,
) -> ProgressResult<(Uuid, Uuid)> {
    let item = repo::find_course_item(conn, course_item_id)
        .await?
        .ok_or(ProgressError::ItemNotFound(course_item_id))?;
    match (ItemKind::parse(&item.kind), item.workshop_id) {
        (Some(ItemKind::Workshop), Some(workshop_id)) => Ok((item.course_id, workshop_id)),
        _ => Err(ProgressError::UnsupportedItemType {
            item_id: item.id,
            kind: item.kind,
        }),
    }
}

async fn append_item(
    conn: &mut SqliteConnection,
    course_id: Uuid,
    kind: ItemKind,
    module_id: Option<Uuid>,
    workshop_id: Option<Uuid>,
) -> ProgressResult<CourseItemRow> {
    let row = CourseItemRow {
        id: Uuid::new_v4(),
        course_id,
        position: repo::next_position(conn, course_id).await?,
        kind: kind.as_str().to_string(),
        module_id,
        workshop_id,
    };
    repo::insert_course_item(conn, &row).await?;
    Ok(row)
}

/// Recomputes one enrollment from the full item list and stores percentage
/// and status together.
async fn apply_recompute(
    conn: &mut SqliteConnection,
    enrollment: &EnrollmentRow,
) -> ProgressResult<Recomputed> {
    let items = repo::item_snapshots(conn, &enrollment.user_id, enrollment.course_id).await?;
    let computed = recompute(&items);
    repo::update_enrollment_progress(conn, enrollment.id, &computed, Utc::now()).await?;

    let before = enrollment.snapshot().status;
    if before != computed.status {
        info!(
            enrollment_id = %enrollment.id,
            from = %before,
            to = %computed.status,
            percentage = computed.progress.percentage,
            "enrollment status changed"
        );
    }
    Ok(computed)
}

/// A course's item count changed: every enrollment's denominator moved.
async fn recompute_course(conn: &mut SqliteConnection, course_id: Uuid) -> ProgressResult<()> {
    let enrollments = repo::list_course_enrollments(conn, course_id).await?;
    for enrollment in &enrollments {
        apply_recompute(conn, enrollment).await?;
    }
    Ok(())
}

fn snapshot_after(enrollment: &EnrollmentRow, computed: &Recomputed) -> EnrollmentSnapshot {
    EnrollmentSnapshot {
        enrollment_id: enrollment.id,
        user_id: enrollment.user_id.clone(),
        course_id: enrollment.course_id,
        progress_percent: computed.progress.percentage,
        status: computed.status,
    }
}
