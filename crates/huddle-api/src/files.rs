use std::path::{Path, PathBuf};

use anyhow::Context;
use axum::{
    Extension, Json,
    extract::{Multipart, State},
    http::StatusCode,
    response::IntoResponse,
};
use tokio::io::AsyncWriteExt;
use tracing::{error, info, warn};
use uuid::Uuid;

use huddle_gateway::auth::Identity;
use huddle_types::api::UploadResponse;

use crate::AppState;

/// 10 MB upload limit for attachments
pub const MAX_FILE_SIZE: usize = 10 * 1024 * 1024;

/// Request body limit for the upload route: the file plus multipart framing.
pub const MAX_UPLOAD_BODY: usize = MAX_FILE_SIZE + 64 * 1024;

/// Exact types, or prefixes ending in `/`.
const ALLOWED_TYPES: &[&str] = &[
    "image/",
    "video/",
    "audio/",
    "application/pdf",
    "application/msword",
    "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
    "application/vnd.ms-excel",
    "application/vnd.openxmlformats-officedocument.spreadsheetml.sheet",
    "text/plain",
];

pub fn mime_allowed(mime_type: &str) -> bool {
    let mime_type = mime_type.trim().to_ascii_lowercase();
    ALLOWED_TYPES.iter().any(|allowed| mime_type.starts_with(allowed))
}

/// Local directory of uploaded blobs, served back under `/files/{id}`.
#[derive(Debug, Clone)]
pub struct BlobStore {
    root: PathBuf,
}

impl BlobStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn url_for(&self, blob_id: &str) -> String {
        format!("/files/{}", blob_id)
    }

    /// Write a blob and return its id. The id is a fresh UUID, keeping the
    /// original extension when it is a plain one.
    pub async fn put(&self, filename: &str, bytes: &[u8]) -> anyhow::Result<String> {
        tokio::fs::create_dir_all(&self.root)
            .await
            .with_context(|| format!("create upload dir {}", self.root.display()))?;

        let blob_id = match extension(filename) {
            Some(ext) => format!("{}.{}", Uuid::new_v4(), ext),
            None => Uuid::new_v4().to_string(),
        };

        let path = self.root.join(&blob_id);
        let mut file = tokio::fs::File::create(&path)
            .await
            .with_context(|| format!("create {}", path.display()))?;
        file.write_all(bytes)
            .await
            .with_context(|| format!("write {}", path.display()))?;
        file.flush().await?;

        Ok(blob_id)
    }
}

fn extension(filename: &str) -> Option<String> {
    Path::new(filename)
        .extension()?
        .to_str()
        .filter(|ext| !ext.is_empty() && ext.len() <= 10)
        .filter(|ext| ext.chars().all(|c| c.is_ascii_alphanumeric()))
        .map(str::to_ascii_lowercase)
}

/// POST /upload: multipart form with a `file` field. Stores the blob and
/// returns the attachment metadata a `message` event can carry.
pub async fn upload_attachment(
    State(state): State<AppState>,
    Extension(identity): Extension<Identity>,
    mut multipart: Multipart,
) -> Result<impl IntoResponse, StatusCode> {
    while let Some(field) = multipart.next_field().await.map_err(|e| {
        warn!("multipart error from {}: {}", identity.user_id, e);
        e.status()
    })? {
        if field.name() != Some("file") {
            continue;
        }

        let filename = field.file_name().unwrap_or("upload").to_string();
        let mime_type = field
            .content_type()
            .unwrap_or("application/octet-stream")
            .to_string();
        if !mime_allowed(&mime_type) {
            return Err(StatusCode::BAD_REQUEST);
        }

        let bytes = field.bytes().await.map_err(|e| e.status())?;
        if bytes.is_empty() {
            return Err(StatusCode::BAD_REQUEST);
        }
        if bytes.len() > MAX_FILE_SIZE {
            return Err(StatusCode::PAYLOAD_TOO_LARGE);
        }

        let blob_id = state.blobs.put(&filename, &bytes).await.map_err(|e| {
            error!("Failed to store upload {}: {:#}", filename, e);
            StatusCode::INTERNAL_SERVER_ERROR
        })?;
        info!(
            "{} uploaded {} ({} bytes, {}) as {}",
            identity.user_id,
            filename,
            bytes.len(),
            mime_type,
            blob_id
        );

        return Ok(Json(UploadResponse {
            url: state.blobs.url_for(&blob_id),
            size: bytes.len() as i64,
            mime_type,
            filename,
        }));
    }

    Err(StatusCode::BAD_REQUEST)
}
