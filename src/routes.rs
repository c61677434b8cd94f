use std::path::Path as FsPath;

use axum::{
    extract::{Path, State},
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use tower_http::services::ServeDir;
use uuid::Uuid;

use crate::certificate::CERTIFICATES_DIR;
use crate::{config::CONTENT_PREFIX, engine::ProgressEngine, error::ProgressError, models::*};
use crate::progress::Progress;

type ApiResult<T> = Result<Json<T>, ProgressError>;

pub fn router(engine: ProgressEngine, data_dir: &FsPath) -> Router {
    // DATA_DIR may also hold the database file, so only the certificate
    // documents are exposed
    let certificates = format!("{CONTENT_PREFIX}/{CERTIFICATES_DIR}");

    Router::new()
        // catalog
        .route("/api/courses", post(create_course))
        .route("/api/courses/:course_id/modules", post(add_module))
        .route("/api/courses/:course_id/workshops", post(add_workshop))
        // enrollment + progress
        .route("/api/courses/:course_id/enrollments", post(enroll))
        .route("/api/courses/:course_id/users/:user_id/progress", get(progress))
        .route("/api/courses/:course_id/users/:user_id/enrollment", get(enrollment))
        .route("/api/courses/:course_id/users/:user_id/items", get(items))
        // completion
        .route("/api/items/toggle", post(toggle_item))
        .route("/api/items/:item_id/submissions", post(submit_workshop))
        .route("/api/items/:item_id/grades", post(grade_submission))
        // certificates
        .route(
            "/api/enrollments/:enrollment_id/certificate",
            get(get_certificate).post(issue_certificate),
        )
        .nest_service(&certificates, ServeDir::new(data_dir.join(CERTIFICATES_DIR)))
        .with_state(engine)
}

async fn create_course(
    State(engine): State<ProgressEngine>,
    Json(req): Json<CreateCourseReq>,
) -> Result<(StatusCode, Json<Course>), ProgressError> {
    let course = engine.create_course(&req.title).await?;
    Ok((StatusCode::CREATED, Json(course)))
}

async fn add_module(
    State(engine): State<ProgressEngine>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<AddModuleReq>,
) -> Result<(StatusCode, Json<CourseItem>), ProgressError> {
    let item = engine
        .add_module(course_id, &req.title, &req.content_url)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn add_workshop(
    State(engine): State<ProgressEngine>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<AddWorkshopReq>,
) -> Result<(StatusCode, Json<CourseItem>), ProgressError> {
    let item = engine
        .add_workshop(course_id, &req.title, &req.instructions)
        .await?;
    Ok((StatusCode::CREATED, Json(item)))
}

async fn enroll(
    State(engine): State<ProgressEngine>,
    Path(course_id): Path<Uuid>,
    Json(req): Json<EnrollReq>,
) -> ApiResult<EnrollmentSnapshot> {
    Ok(Json(engine.enroll(&req.user_id, course_id).await?))
}

async fn progress(
    State(engine): State<ProgressEngine>,
    Path((course_id, user_id)): Path<(Uuid, String)>,
) -> ApiResult<Progress> {
    Ok(Json(engine.progress(&user_id, course_id).await?))
}

async fn enrollment(
    State(engine): State<ProgressEngine>,
    Path((course_id, user_id)): Path<(Uuid, String)>,
) -> ApiResult<EnrollmentSnapshot> {
    let snapshot = engine.enrollment(&user_id, course_id).await?;
    snapshot
        .map(Json)
        .ok_or(ProgressError::NotEnrolled { user_id, course_id })
}

async fn items(
    State(engine): State<ProgressEngine>,
    Path((course_id, user_id)): Path<(Uuid, String)>,
) -> ApiResult<Vec<ItemProgress>> {
    Ok(Json(engine.course_items(&user_id, course_id).await?))
}

// The caller re-reads progress afterwards; nothing is returned here.
async fn toggle_item(
    State(engine): State<ProgressEngine>,
    Json(req): Json<MarkItemReq>,
) -> Result<StatusCode, ProgressError> {
    engine
        .toggle_module(&req.user_id, req.course_item_id)
        .await?;
    Ok(StatusCode::NO_CONTENT)
}

async fn submit_workshop(
    State(engine): State<ProgressEngine>,
    Path(item_id): Path<Uuid>,
    Json(req): Json<SubmitWorkshopReq>,
) -> ApiResult<EnrollmentSnapshot> {
    Ok(Json(
        engine
            .submit_workshop(&req.user_id, item_id, &req.submission_url)
            .await?,
    ))
}

async fn grade_submission(
    State(engine): State<ProgressEngine>,
    Path(item_id): Path<Uuid>,
    Json(req): Json<GradeReq>,
) -> ApiResult<EnrollmentSnapshot> {
    Ok(Json(
        engine
            .grade_submission(&req.user_id, item_id, req.score)
            .await?,
    ))
}

async fn get_certificate(
    State(engine): State<ProgressEngine>,
    Path(enrollment_id): Path<Uuid>,
) -> ApiResult<Certificate> {
    engine
        .certificate(enrollment_id)
        .await?
        .map(Json)
        .ok_or(ProgressError::CertificateNotAvailable { enrollment_id })
}

async fn issue_certificate(
    State(engine): State<ProgressEngine>,
    Path(enrollment_id): Path<Uuid>,
) -> ApiResult<Certificate> {
    Ok(Json(engine.issue_certificate(enrollment_id).await?))
}
