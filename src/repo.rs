// SQL for courses, per-learner completion records, enrollments and certificates.
//
// Every function takes a bare connection so the engine can run several of
// them inside one transaction (`&mut *tx`) or on a pooled connection.

use chrono::{DateTime, Utc};
use sqlx::{query, query_as, query_scalar, SqliteConnection};
use uuid::Uuid;

use crate::models::*;
use crate::progress::{CompletionFact, ItemSnapshot, Recomputed};

// --- courses & items ---

pub async fn insert_course(
    conn: &mut SqliteConnection,
    title: &str,
    now: DateTime<Utc>,
) -> Result<Course, sqlx::Error> {
    let id = Uuid::new_v4();
    query("INSERT INTO courses (id, title, created_at) VALUES (?, ?, ?)")
        .bind(id)
        .bind(title)
        .bind(now)
        .execute(&mut *conn)
        .await?;
    Ok(Course {
        id,
        title: title.to_string(),
        created_at: now,
    })
}

pub async fn find_course(
    conn: &mut SqliteConnection,
    course_id: Uuid,
) -> Result<Option<Course>, sqlx::Error> {
    query_as::<_, Course>("SELECT id, title, created_at FROM courses WHERE id = ?")
        .bind(course_id)
        .fetch_optional(&mut *conn)
        .await
}

pub async fn next_position(
    conn: &mut SqliteConnection,
    course_id: Uuid,
) -> Result<i32, sqlx::Error> {
    let next: i64 = query_scalar(
        "SELECT COALESCE(MAX(position) + 1, 0) FROM course_items WHERE course_id = ?",
    )
    .bind(course_id)
    .fetch_one(&mut *conn)
    .await?;
    Ok(next as i32)
}

pub async fn insert_module(
    conn: &mut SqliteConnection,
    title: &str,
    content_url: &str,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    query("INSERT INTO modules (id, title, content_url) VALUES (?, ?, ?)")
        .bind(id)
        .bind(title)
        .bind(content_url)
        .execute(&mut *conn)
        .await?;
    Ok(id)
}

pub async fn insert_workshop(
    conn: &mut SqliteConnection,
    title: &str,
    instructions: &str,
) -> Result<Uuid, sqlx::Error> {
    let id = Uuid::new_v4();
    query("INSERT INTO workshops (id, title, instructions) VALUES (?, ?, ?)")
        .bind(id)
        .bind(title)
        .bind(instructions)
        .execute(&mut *conn)
        .await?;
    Ok(id)
}

pub async fn insert_course_item(
    conn: &mut SqliteConnection,
    item: &CourseItemRow,
) -> Result<(), sqlx::Error> {
    query(
        r#"
        INSERT INTO course_items (id, course_id, position, kind, module_id, workshop_id)
        VALUES (?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(item.id)
    .bind(item.course_id)
    .bind(item.position)
    .bind(&item.kind)
    .bind(item.module_id)
    .bind(item.workshop_id)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn find_course_item(
    conn: &mut SqliteConnection,
    item_id: Uuid,
) -> Result<Option<CourseItemRow>, sqlx::Error> {
    query_as::<_, CourseItemRow>(
        r#"
        SELECT id, course_id, position, kind, module_id, workshop_id
        FROM course_items
        WHERE id = ?
        "#,
    )
    .bind(item_id)
    .fetch_optional(&mut *conn)
    .await
}

/// All items of a course in position order, with this learner's module
/// completion timestamp and workshop score attached where they exist.
///
/// `module_id`/`workshop_id` come from the joined tables, so a reference to a
/// deleted module or workshop shows up as missing.
pub async fn item_progress(
    conn: &mut SqliteConnection,
    user_id: &str,
    course_id: Uuid,
) -> Result<Vec<ItemProgressRow>, sqlx::Error> {
    query_as::<_, ItemProgressRow>(
        r#"
        SELECT ci.id, ci.position, ci.kind,
               m.id AS module_id, w.id AS workshop_id,
               mp.completed_at, ws.score
        FROM course_items ci
        LEFT JOIN modules m ON m.id = ci.module_id
        LEFT JOIN workshops w ON w.id = ci.workshop_id
        LEFT JOIN module_progress mp ON mp.module_id = m.id AND mp.user_id = ?
        LEFT JOIN workshop_submissions ws ON ws.workshop_id = w.id AND ws.user_id = ?
        WHERE ci.course_id = ?
        ORDER BY ci.position
        "#,
    )
    .bind(user_id)
    .bind(user_id)
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await
}

impl ItemProgressRow {
    /// The item kind picks which record is consulted. Anything else is a
    /// data-integrity anomaly: logged and treated as not completed.
    pub fn into_snapshot(self) -> ItemSnapshot {
        let fact = match ItemKind::parse(&self.kind) {
            Some(ItemKind::Module) if self.module_id.is_some() => {
                if self.workshop_id.is_some() {
                    tracing::warn!(item_id = %self.id, "module item also references a workshop");
                }
                Some(CompletionFact::Module {
                    completed_at: self.completed_at,
                })
            }
            Some(ItemKind::Workshop) if self.workshop_id.is_some() => {
                if self.module_id.is_some() {
                    tracing::warn!(item_id = %self.id, "workshop item also references a module");
                }
                Some(CompletionFact::Workshop { score: self.score })
            }
            _ => {
                tracing::warn!(
                    item_id = %self.id,
                    kind = %self.kind,
                    "malformed course item counted as incomplete"
                );
                None
            }
        };
        ItemSnapshot {
            item_id: self.id,
            position: self.position,
            fact,
        }
    }
}

pub async fn item_snapshots(
    conn: &mut SqliteConnection,
    user_id: &str,
    course_id: Uuid,
) -> Result<Vec<ItemSnapshot>, sqlx::Error> {
    let rows = item_progress(conn, user_id, course_id).await?;
    Ok(rows.into_iter().map(ItemProgressRow::into_snapshot).collect())
}

// --- module progress ---

pub async fn find_module_progress(
    conn: &mut SqliteConnection,
    user_id: &str,
    module_id: Uuid,
) -> Result<Option<ModuleProgress>, sqlx::Error> {
    query_as::<_, ModuleProgress>(
        r#"
        SELECT id, user_id, module_id, completed_at, updated_at
        FROM module_progress
        WHERE user_id = ? AND module_id = ?
        "#,
    )
    .bind(user_id)
    .bind(module_id)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn insert_module_progress(
    conn: &mut SqliteConnection,
    user_id: &str,
    module_id: Uuid,
    completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    query(
        r#"
        INSERT INTO module_progress (id, user_id, module_id, completed_at, updated_at)
        VALUES (?, ?, ?, ?, ?)
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(module_id)
    .bind(completed_at)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn set_module_completed_at(
    conn: &mut SqliteConnection,
    progress_id: Uuid,
    completed_at: Option<DateTime<Utc>>,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    query("UPDATE module_progress SET completed_at = ?, updated_at = ? WHERE id = ?")
        .bind(completed_at)
        .bind(now)
        .bind(progress_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// --- workshop submissions ---

pub async fn find_submission(
    conn: &mut SqliteConnection,
    user_id: &str,
    workshop_id: Uuid,
) -> Result<Option<WorkshopSubmission>, sqlx::Error> {
    query_as::<_, WorkshopSubmission>(
        r#"
        SELECT id, user_id, workshop_id, submission_url, score, submitted_at, graded_at
        FROM workshop_submissions
        WHERE user_id = ? AND workshop_id = ?
        "#,
    )
    .bind(user_id)
    .bind(workshop_id)
    .fetch_optional(&mut *conn)
    .await
}

/// A resubmission replaces the URL and drops any earlier grade.
pub async fn upsert_submission(
    conn: &mut SqliteConnection,
    user_id: &str,
    workshop_id: Uuid,
    submission_url: &str,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    query(
        r#"
        INSERT INTO workshop_submissions (id, user_id, workshop_id, submission_url, score, submitted_at, graded_at)
        VALUES (?, ?, ?, ?, NULL, ?, NULL)
        ON CONFLICT(user_id, workshop_id) DO UPDATE SET
            submission_url = excluded.submission_url,
            submitted_at = excluded.submitted_at,
            score = NULL,
            graded_at = NULL
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(workshop_id)
    .bind(submission_url)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(())
}

pub async fn set_submission_score(
    conn: &mut SqliteConnection,
    submission_id: Uuid,
    score: f64,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    query("UPDATE workshop_submissions SET score = ?, graded_at = ? WHERE id = ?")
        .bind(score)
        .bind(now)
        .bind(submission_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// --- enrollments ---

const ENROLLMENT_COLUMNS: &str =
    "id, user_id, course_id, progress_percent, status, created_at, updated_at";

pub async fn find_enrollment(
    conn: &mut SqliteConnection,
    user_id: &str,
    course_id: Uuid,
) -> Result<Option<EnrollmentRow>, sqlx::Error> {
    query_as::<_, EnrollmentRow>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE user_id = ? AND course_id = ?"
    ))
    .bind(user_id)
    .bind(course_id)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn find_enrollment_by_id(
    conn: &mut SqliteConnection,
    enrollment_id: Uuid,
) -> Result<Option<EnrollmentRow>, sqlx::Error> {
    query_as::<_, EnrollmentRow>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE id = ?"
    ))
    .bind(enrollment_id)
    .fetch_optional(&mut *conn)
    .await
}

pub async fn list_course_enrollments(
    conn: &mut SqliteConnection,
    course_id: Uuid,
) -> Result<Vec<EnrollmentRow>, sqlx::Error> {
    query_as::<_, EnrollmentRow>(&format!(
        "SELECT {ENROLLMENT_COLUMNS} FROM enrollments WHERE course_id = ? ORDER BY created_at"
    ))
    .bind(course_id)
    .fetch_all(&mut *conn)
    .await
}

/// Inserts the enrollment unless one already exists for (user, course).
/// Returns true when a row was created.
pub async fn insert_enrollment(
    conn: &mut SqliteConnection,
    user_id: &str,
    course_id: Uuid,
    computed: &Recomputed,
    now: DateTime<Utc>,
) -> Result<bool, sqlx::Error> {
    let result = query(
        r#"
        INSERT INTO enrollments (id, user_id, course_id, progress_percent, status, created_at, updated_at)
        VALUES (?, ?, ?, ?, ?, ?, ?)
        ON CONFLICT(user_id, course_id) DO NOTHING
        "#,
    )
    .bind(Uuid::new_v4())
    .bind(user_id)
    .bind(course_id)
    .bind(i32::from(computed.progress.percentage))
    .bind(computed.status.as_str())
    .bind(now)
    .bind(now)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}

/// Percentage and status go out in a single statement.
pub async fn update_enrollment_progress(
    conn: &mut SqliteConnection,
    enrollment_id: Uuid,
    computed: &Recomputed,
    now: DateTime<Utc>,
) -> Result<(), sqlx::Error> {
    query("UPDATE enrollments SET progress_percent = ?, status = ?, updated_at = ? WHERE id = ?")
        .bind(i32::from(computed.progress.percentage))
        .bind(computed.status.as_str())
        .bind(now)
        .bind(enrollment_id)
        .execute(&mut *conn)
        .await?;
    Ok(())
}

// --- certificates ---

pub async fn find_certificate(
    conn: &mut SqliteConnection,
    enrollment_id: Uuid,
) -> Result<Option<Certificate>, sqlx::Error> {
    query_as::<_, Certificate>(
        r#"
        SELECT id, enrollment_id, code, file_url, issued_at
        FROM certificates
        WHERE enrollment_id = ?
        "#,
    )
    .bind(enrollment_id)
    .fetch_optional(&mut *conn)
    .await
}

/// Writes the certificate only while the enrollment is still COMPLETED.
/// Returns false when the enrollment no longer qualifies. A second writer for
/// the same enrollment fails on the UNIQUE(enrollment_id) constraint.
pub async fn insert_certificate_if_completed(
    conn: &mut SqliteConnection,
    cert: &Certificate,
) -> Result<bool, sqlx::Error> {
    let result = query(
        r#"
        INSERT INTO certificates (id, enrollment_id, code, file_url, issued_at)
        SELECT ?, e.id, ?, ?, ?
        FROM enrollments e
        WHERE e.id = ? AND e.status = 'COMPLETED'
        "#,
    )
    .bind(cert.id)
    .bind(&cert.code)
    .bind(&cert.file_url)
    .bind(cert.issued_at)
    .bind(cert.enrollment_id)
    .execute(&mut *conn)
    .await?;
    Ok(result.rows_affected() == 1)
}
