use axum::{
    body::Bytes,
    extract::{multipart::MultipartRejection, DefaultBodyLimit, Multipart, State},
    http::{header::CONTENT_TYPE, StatusCode},
    response::{IntoResponse, Response},
    routing::{delete, get, post},
    Json, Router,
};
use image::{DynamicImage, ImageFormat};
use openeye_core::{pipeline, Person, PhotoInfo};
use serde::Deserialize;
use serde_json::{json, Value};
use std::collections::BTreeMap;
use std::io::Cursor;
use std::sync::Arc;

use crate::auth::{Caller, Role};
use crate::cameras::CameraDetections;
use crate::error::ApiError;
use crate::extract::{JsonBody, Path, Query};
use crate::faces::{FaceSettings, FaceStatistics, SettingsUpdate};
use crate::state::AppState;
use crate::store::{DetectionStatistics, FaceDetectionEvent, RecentQuery, TimelineHour};

const MAX_UPLOAD_BYTES: usize = 32 * 1024 * 1024;

type ApiResult<T> = Result<T, ApiError>;

pub fn router(state: Arc<AppState>) -> Router {
    let faces = Router::new()
        .route("/people", get(list_people).post(add_person))
        .route("/people/{name}", get(get_person).put(rename_person).delete(delete_person))
        .route("/people/{name}/photos", get(list_photos).post(upload_photos))
        .route("/people/{name}/photos/{filename}", delete(delete_photo))
        .route("/train", post(train))
        .route("/statistics", get(statistics))
        .route("/detections", get(detections))
        .route("/settings", get(get_settings).put(update_settings))
        .route("/camera/{camera_id}/enable", post(enable_camera))
        .route("/recognize", post(recognize))
        .route("/history/detections", get(history_detections))
        .route("/history/statistics", get(history_statistics))
        .route("/history/person/{name}", get(history_person))
        .route("/history/timeline", get(history_timeline))
        .route("/history/cleanup", post(history_cleanup));

    Router::new()
        .route("/api/health", get(health))
        .nest("/api/faces", faces)
        .layer(DefaultBodyLimit::max(MAX_UPLOAD_BYTES))
        .with_state(state)
}

async fn health() -> Json<Value> {
    Json(json!({ "status": "ok", "version": env!("CARGO_PKG_VERSION") }))
}

#[derive(Deserialize)]
struct PersonName {
    name: String,
}

async fn list_people(caller: Caller, State(state): State<Arc<AppState>>) -> ApiResult<Json<Vec<Person>>> {
    caller.require(Role::Viewer)?;
    Ok(Json(state.faces.library().list_people()?))
}

async fn add_person(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    JsonBody(body): JsonBody<PersonName>,
) -> ApiResult<(StatusCode, Json<Person>)> {
    caller.require(Role::User)?;
    let person = state.faces.library().add_person(&body.name)?;
    Ok((StatusCode::CREATED, Json(person)))
}

async fn get_person(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Person>> {
    caller.require(Role::Viewer)?;
    Ok(Json(state.faces.library().get_person(&name)?))
}

async fn rename_person(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    JsonBody(body): JsonBody<PersonName>,
) -> ApiResult<Json<Person>> {
    caller.require(Role::User)?;
    Ok(Json(state.faces.rename_person(&name, &body.name).await?))
}

async fn delete_person(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Value>> {
    caller.require(Role::Admin)?;
    state.faces.delete_person(&name).await?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Person '{name}' deleted successfully"),
    })))
}

async fn list_photos(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
) -> ApiResult<Json<Vec<PhotoInfo>>> {
    caller.require(Role::Viewer)?;
    Ok(Json(state.faces.library().list_photos(&name)?))
}

async fn upload_photos(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    multipart: Result<Multipart, MultipartRejection>,
) -> ApiResult<Json<Value>> {
    caller.require(Role::User)?;
    let mut multipart = multipart?;
    let library = state.faces.library();
    library.get_person(&name)?;

    let mut files = Vec::new();
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ApiError::BadRequest(e.to_string()))?
    {
        let Some(filename) = field.file_name().map(str::to_string) else {
            continue;
        };
        let bytes = field.bytes().await.map_err(|e| ApiError::BadRequest(e.to_string()))?;
        files.push((filename, bytes));
    }
    let uploaded = library.save_photos(&name, &files)?;

    if uploaded == 0 {
        return Err(ApiError::BadRequest(
            "No valid image files uploaded (must be .jpg, .jpeg, or .png)".into(),
        ));
    }
    Ok(Json(json!({
        "uploaded_count": uploaded,
        "person_name": name,
        "message": format!("Successfully uploaded {uploaded} photo(s)"),
        "success": true,
    })))
}

async fn delete_photo(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path((name, filename)): Path<(String, String)>,
) -> ApiResult<Json<Value>> {
    caller.require(Role::User)?;
    state.faces.library().delete_photo(&name, &filename)?;
    Ok(Json(json!({
        "success": true,
        "message": format!("Photo '{filename}' deleted successfully"),
    })))
}

async fn train(caller: Caller, State(state): State<Arc<AppState>>) -> ApiResult<Json<Value>> {
    caller.require(Role::Admin)?;
    let report = state.faces.train().await?;
    Ok(Json(json!({
        "total_people": report.total_people,
        "total_encodings": report.total_encodings,
        "training_time": report.training_time,
        "success": true,
        "message": format!(
            "Training completed: {} encodings for {} people",
            report.total_encodings, report.total_people
        ),
    })))
}

async fn statistics(caller: Caller, State(state): State<Arc<AppState>>) -> ApiResult<Json<FaceStatistics>> {
    caller.require(Role::Viewer)?;
    Ok(Json(state.faces.statistics().await))
}

async fn detections(
    caller: Caller,
    State(state): State<Arc<AppState>>,
) -> ApiResult<Json<BTreeMap<String, CameraDetections>>> {
    caller.require(Role::Viewer)?;
    let ready = !state.faces.gallery().await.is_empty();
    Ok(Json(state.faces.cameras().all_detections(ready)))
}

async fn get_settings(caller: Caller, State(state): State<Arc<AppState>>) -> ApiResult<Json<FaceSettings>> {
    caller.require(Role::Viewer)?;
    Ok(Json(state.faces.settings().await))
}

async fn update_settings(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    JsonBody(update): JsonBody<SettingsUpdate>,
) -> ApiResult<Json<FaceSettings>> {
    caller.require(Role::Admin)?;
    Ok(Json(state.faces.update_settings(update).await?))
}

#[derive(Deserialize)]
struct EnableParams {
    #[serde(default = "default_true")]
    enabled: bool,
}

fn default_true() -> bool {
    true
}

async fn enable_camera(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(camera_id): Path<String>,
    Query(params): Query<EnableParams>,
) -> ApiResult<Json<Value>> {
    caller.require(Role::User)?;
    state.faces.cameras().enable_face_detection(&camera_id, params.enabled)?;
    let verb = if params.enabled { "enabled" } else { "disabled" };
    Ok(Json(json!({
        "camera_id": camera_id,
        "face_detection_enabled": params.enabled,
        "message": format!("Face detection {verb} for camera '{camera_id}'"),
    })))
}

#[derive(Deserialize)]
struct RecognizeParams {
    camera_id: Option<String>,
    #[serde(default)]
    motion: bool,
    #[serde(default)]
    annotate: bool,
}

/// Body is an encoded image (JPEG or PNG). With `annotate=true` the reply is
/// the frame as JPEG with face boxes drawn.
async fn recognize(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Query(params): Query<RecognizeParams>,
    body: Bytes,
) -> ApiResult<Response> {
    caller.require(Role::User)?;
    let image = image::load_from_memory(&body)
        .map_err(|e| ApiError::BadRequest(format!("Invalid image: {e}")))?
        .to_rgb8();
    let canvas = params.annotate.then(|| image.clone());

    let result = state
        .faces
        .recognize(image, params.camera_id.as_deref(), params.motion)
        .await?;

    let Some(mut canvas) = canvas else {
        return Ok(Json(result).into_response());
    };
    pipeline::annotate(&mut canvas, &result.detections);
    let mut jpeg = Vec::new();
    DynamicImage::ImageRgb8(canvas)
        .write_to(&mut Cursor::new(&mut jpeg), ImageFormat::Jpeg)
        .map_err(|e| ApiError::Internal(e.to_string()))?;
    Ok(([(CONTENT_TYPE, "image/jpeg")], jpeg).into_response())
}

#[derive(Deserialize)]
struct HistoryParams {
    camera_id: Option<String>,
    person_name: Option<String>,
    limit: Option<u32>,
    hours: Option<u32>,
}

async fn history_detections(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Query(params): Query<HistoryParams>,
) -> ApiResult<Json<Vec<FaceDetectionEvent>>> {
    caller.require(Role::Viewer)?;
    let events = state
        .faces
        .store()
        .recent_detections(RecentQuery {
            camera_id: params.camera_id,
            person_name: params.person_name,
            limit: params.limit.unwrap_or(50),
            hours: params.hours.unwrap_or(24),
        })
        .await?;
    Ok(Json(events))
}

#[derive(Deserialize)]
struct StatisticsParams {
    camera_id: Option<String>,
    days: Option<u32>,
}

async fn history_statistics(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Query(params): Query<StatisticsParams>,
) -> ApiResult<Json<DetectionStatistics>> {
    caller.require(Role::Viewer)?;
    let stats = state
        .faces
        .store()
        .statistics(params.camera_id, params.days.unwrap_or(7))
        .await?;
    Ok(Json(stats))
}

#[derive(Deserialize)]
struct LimitParams {
    limit: Option<u32>,
}

async fn history_person(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Path(name): Path<String>,
    Query(params): Query<LimitParams>,
) -> ApiResult<Json<Vec<FaceDetectionEvent>>> {
    caller.require(Role::Viewer)?;
    let events = state
        .faces
        .store()
        .person_history(name, params.limit.unwrap_or(100))
        .await?;
    Ok(Json(events))
}

#[derive(Deserialize)]
struct TimelineParams {
    camera_id: Option<String>,
    hours: Option<u32>,
}

async fn history_timeline(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Query(params): Query<TimelineParams>,
) -> ApiResult<Json<Value>> {
    caller.require(Role::Viewer)?;
    let timeline: Vec<TimelineHour> = state
        .faces
        .store()
        .timeline(params.camera_id, params.hours.unwrap_or(24))
        .await?;
    Ok(Json(json!({ "total_hours": timeline.len(), "timeline": timeline })))
}

#[derive(Deserialize)]
struct CleanupParams {
    days_to_keep: Option<u32>,
}

async fn history_cleanup(
    caller: Caller,
    State(state): State<Arc<AppState>>,
    Query(params): Query<CleanupParams>,
) -> ApiResult<Json<Value>> {
    caller.require(Role::Admin)?;
    let deleted = state.faces.store().cleanup(params.days_to_keep.unwrap_or(30)).await?;
    Ok(Json(json!({
        "message": "Cleanup completed successfully",
        "deleted_face_events": deleted,
    })))
}
