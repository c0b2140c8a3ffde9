//! HTTP request handlers for the document service.

use axum::extract::{Multipart, Path, State};
use axum::http::{header, HeaderMap, StatusCode};
use axum::response::IntoResponse;
use axum::{Form, Json};
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use super::auth::Caller;
use super::AppState;
use crate::error::ServiceError;
use crate::models::Document;
use crate::pipeline;
use crate::queue::NewJob;

/// Health check endpoint for container orchestration.
pub async fn health() -> impl IntoResponse {
    Json(serde_json::json!({ "status": "ok" }))
}

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub id: i64,
    pub filename: String,
    pub status: String,
}

#[derive(Debug, Serialize)]
pub struct DocumentResponse {
    pub id: i64,
    pub filename: String,
    pub status: String,
    pub created_at: String,
    pub updated_at: String,
}

impl From<Document> for DocumentResponse {
    fn from(doc: Document) -> Self {
        Self {
            id: doc.id,
            filename: doc.filename,
            status: doc.status.as_str().to_string(),
            created_at: doc.created_at.to_rfc3339(),
            updated_at: doc.updated_at.to_rfc3339(),
        }
    }
}

/// Upload a document. Accepts one multipart `file` field; the bytes are
/// persisted before the record is created, so a record never points at a
/// missing file.
pub async fn upload_document(
    caller: Caller,
    State(state): State<AppState>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, ServiceError> {
    caller.require_user()?;

    let mut upload: Option<(String, Vec<u8>)> = None;
    while let Some(field) = multipart
        .next_field()
        .await
        .map_err(|e| ServiceError::BadRequest(format!("invalid multipart body: {e}")))?
    {
        if field.name() == Some("file") {
            let filename = field
                .file_name()
                .map(|n| n.to_string())
                .ok_or_else(|| ServiceError::BadRequest("file field has no filename".into()))?;
            let bytes = field
                .bytes()
                .await
                .map_err(|e| ServiceError::BadRequest(format!("failed to read upload: {e}")))?;
            upload = Some((filename, bytes.to_vec()));
        }
    }

    let (filename, bytes) =
        upload.ok_or_else(|| ServiceError::BadRequest("missing file field".into()))?;
    if bytes.is_empty() {
        return Err(ServiceError::BadRequest("uploaded file is empty".into()));
    }

    // Unsupported formats are still accepted; the worker rejects them at
    // load time. Flag them early for operators.
    if !pipeline::is_supported(&filename) {
        warn!(filename = %filename, "uploaded format is unsupported; processing will fail");
    }

    state.storage.save_upload(&filename, &bytes)?;
    let doc = state.repo.create(&filename)?;
    state.metrics.jobs_created.inc();
    info!(
        document_id = doc.id,
        filename = %doc.filename,
        size = bytes.len(),
        "document uploaded"
    );

    Ok((
        StatusCode::CREATED,
        Json(UploadResponse {
            id: doc.id,
            filename: doc.filename,
            status: doc.status.as_str().to_string(),
        }),
    ))
}

#[derive(Debug, Deserialize, Default)]
pub struct EnqueueForm {
    pub prompt: Option<String>,
}

#[derive(Debug, Serialize)]
pub struct EnqueueResponse {
    pub job_id: i64,
    pub status: String,
}

/// Enqueue a document for processing. Re-enqueueing is allowed from any
/// state and clears a previous result.
///
/// Ordering matters: the job is enqueued before the status flips to
/// `queued`, so a queue failure leaves the document untouched and the
/// caller gets 503.
pub async fn enqueue_document(
    caller: Caller,
    State(state): State<AppState>,
    Path(doc_id): Path<i64>,
    form: Option<Form<EnqueueForm>>,
) -> Result<impl IntoResponse, ServiceError> {
    caller.require_user()?;

    let doc = state.repo.get_required(doc_id)?;
    let prompt = form
        .and_then(|Form(f)| f.prompt)
        .filter(|p| !p.trim().is_empty())
        .unwrap_or_else(|| state.default_prompt.clone());

    let file_path = state.storage.raw_path(&doc.filename);
    let job_id = state
        .queue
        .enqueue(NewJob {
            document_id: doc.id,
            file_path: file_path.display().to_string(),
            prompt,
        })
        .await?;
    state.repo.mark_queued(doc.id)?;
    info!(document_id = doc.id, job_id, "document enqueued");

    Ok((
        StatusCode::ACCEPTED,
        Json(EnqueueResponse {
            job_id,
            status: "queued".to_string(),
        }),
    ))
}

/// Fetch a document record.
pub async fn get_document(
    caller: Caller,
    State(state): State<AppState>,
    Path(doc_id): Path<i64>,
) -> Result<Json<DocumentResponse>, ServiceError> {
    caller.require_user()?;
    let doc = state.repo.get_required(doc_id)?;
    Ok(Json(DocumentResponse::from(doc)))
}

/// Download the inference result as a JSON attachment.
///
/// 404 until the document is `done` with a stored result. The result file
/// is re-materialized from the database on each request, so the database
/// row stays the source of truth.
pub async fn get_result(
    caller: Caller,
    State(state): State<AppState>,
    Path(doc_id): Path<i64>,
) -> Result<impl IntoResponse, ServiceError> {
    caller.require_user()?;

    let doc = state.repo.get_required(doc_id)?;
    if !doc.has_result() {
        return Err(ServiceError::NotFound);
    }
    let payload = doc.result_json.unwrap_or_default();

    state.storage.write_result(doc_id, &payload)?;

    let mut headers = HeaderMap::new();
    headers.insert(
        header::CONTENT_TYPE,
        header::HeaderValue::from_static("application/json"),
    );
    if let Ok(value) = header::HeaderValue::from_str(&format!(
        "attachment; filename=\"{doc_id}.json\""
    )) {
        headers.insert(header::CONTENT_DISPOSITION, value);
    }
    Ok((headers, payload))
}

#[derive(Debug, Serialize)]
pub struct DeleteResponse {
    pub deleted: bool,
}

/// Delete a document: stored files first, then the record. A failure to
/// remove files leaves the record in place so nothing is orphaned.
pub async fn delete_document(
    caller: Caller,
    State(state): State<AppState>,
    Path(doc_id): Path<i64>,
) -> Result<Json<DeleteResponse>, ServiceError> {
    caller.require_user()?;

    let doc = state.repo.get_required(doc_id)?;
    state.storage.remove_document_files(&doc.filename, doc.id)?;
    state.repo.delete(doc.id)?;
    info!(document_id = doc.id, "document deleted");

    Ok(Json(DeleteResponse { deleted: true }))
}

/// Prometheus text exposition. Unauthenticated, for scrapers.
pub async fn metrics(State(state): State<AppState>) -> impl IntoResponse {
    (
        [(header::CONTENT_TYPE, "text/plain; version=0.0.4")],
        state.metrics.render(),
    )
}
