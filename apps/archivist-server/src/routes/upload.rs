//! Upload Routes
//!
//! Endpoints:
//! - POST / - Upload the raw request body as one file
//! - POST /api/v1/files - Same, under the versioned prefix
//!
//! The file name comes from `Archivist-File-Name`, the media type from
//! `Content-Type`. The body is buffered and SHA-1 hashed in one pass, then
//! handed to the uploader as a replayable source.

use axum::{
    body::{Body, Bytes},
    extract::State,
    http::{header, HeaderMap},
    routing::post,
    Extension, Json, Router,
};
use bytes::BytesMut;
use futures::StreamExt;
use serde::{Deserialize, Serialize};
use sha1::{Digest, Sha1};
use tokio_util::sync::CancellationToken;

use crate::error::{AppError, Result};
use crate::request_id::RequestId;
use crate::state::AppState;
use crate::storage::{ByteSource, UploadContext, UploadRequest};

pub const FILE_NAME_HEADER: &str = "archivist-file-name";

/// Success body
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct UploadResponse {
    pub id: String,
    pub name: String,
    pub media_type: String,
    pub sha1: String,
    pub size: u64,
}

/// Create the upload router
pub fn router() -> Router<AppState> {
    Router::new()
        .route("/", post(upload_file))
        .route("/api/v1/files", post(upload_file))
}

// ============================================================================
// Handlers
// ============================================================================

async fn upload_file(
    State(state): State<AppState>,
    request_id: Option<Extension<RequestId>>,
    headers: HeaderMap,
    body: Body,
) -> Result<Json<UploadResponse>> {
    let request_id = request_id.map(|Extension(id)| id.0);
    let rid = request_id.as_deref().unwrap_or("");

    let file_name = header_value(&headers, FILE_NAME_HEADER);
    let media_type = header_value(&headers, header::CONTENT_TYPE.as_str());

    if file_name.is_empty() || media_type.is_empty() {
        tracing::warn!(
            request_id = %rid,
            file_name = %file_name,
            file_media_type = %media_type,
            "Bad request, name or media type missing"
        );
        return Err(AppError::BadRequest(
            "file name and media type required".to_string(),
        ));
    }

    let buffered = buffer_and_hash(body, state.upload_config().max_body_bytes)
        .await
        .map_err(|e| {
            tracing::error!(request_id = %rid, error = %e, "Failed to read body");
            e
        })?;

    let request = UploadRequest::new(
        file_name,
        media_type,
        buffered.sha1,
        ByteSource::new(buffered.data),
    )
    .map_err(|e| AppError::BadRequest(e.to_string()))?;

    let ctx = UploadContext::new(request_id.clone(), CancellationToken::new());

    let result = {
        let upload = state
            .uploader()
            .upload(&ctx, state.bucket_id(), &request);
        tokio::pin!(upload);

        match state.upload_config().deadline {
            Some(deadline) => tokio::select! {
                result = &mut upload => result,
                _ = tokio::time::sleep(deadline) => {
                    tracing::warn!(request_id = %rid, ?deadline, "Upload deadline reached, cancelling");
                    ctx.cancel.cancel();
                    upload.await
                }
            },
            None => upload.await,
        }
    };

    let file_id = result.map_err(|e| {
        tracing::error!(request_id = %rid, error = %e, "Failed to upload file");
        AppError::Upload(e)
    })?;

    let metadata = request.metadata;

    tracing::info!(
        request_id = %rid,
        file_id = %file_id,
        file_name = %metadata.file_name,
        file_media_type = %metadata.media_type,
        file_hash = %metadata.sha1,
        file_size = metadata.size,
        "File successfully uploaded"
    );

    Ok(Json(UploadResponse {
        id: file_id,
        name: metadata.file_name,
        media_type: metadata.media_type,
        sha1: metadata.sha1,
        size: metadata.size,
    }))
}

// ============================================================================
// Helpers
// ============================================================================

fn header_value(headers: &HeaderMap, name: &str) -> String {
    headers
        .get(name)
        .and_then(|v| v.to_str().ok())
        .unwrap_or("")
        .trim()
        .to_string()
}

/// A fully read request body and its hex SHA-1
#[derive(Debug)]
pub struct BufferedBody {
    pub data: Bytes,
    pub sha1: String,
}

/// Read `body` into memory, hashing each chunk as it arrives
pub async fn buffer_and_hash(body: Body, max_bytes: usize) -> Result<BufferedBody> {
    let mut stream = body.into_data_stream();
    let mut hasher = Sha1::new();
    let mut buf = BytesMut::new();

    while let Some(chunk) = stream.next().await {
        let chunk = chunk.map_err(|e| AppError::Body(e.to_string()))?;

        if buf.len() + chunk.len() > max_bytes {
            return Err(AppError::PayloadTooLarge { max: max_bytes });
        }

        hasher.update(&chunk);
        buf.extend_from_slice(&chunk);
    }

    Ok(BufferedBody {
        data: buf.freeze(),
        sha1: hex::encode(hasher.finalize()),
    })
}
