//! Image uploads stored on local disk and served from `/uploads`.
//!
//! Product writes accept either `multipart/form-data` (text fields plus up
//! to [`MAX_PRODUCT_FILES`] files in `images`) or a plain JSON body; both
//! end up as a [`ProductForm`].

use crate::catalog::normalize::Payload;
use crate::error::ServiceError;
use crate::state::AppState;
use axum::{
    body::{self, Bytes},
    extract::{FromRequest, Multipart, Request, multipart::MultipartError},
    http::header::CONTENT_TYPE,
};
use chrono::Utc;
use rand::Rng;
use serde_json::Value;
use std::path::{Path, PathBuf};
use thiserror::Error;
use tracing::{debug, info};

pub const MAX_FILE_BYTES: usize = 5 * 1024 * 1024;
pub const MAX_PRODUCT_FILES: usize = 5;
pub const PRODUCT_IMAGE_FIELD: &str = "images";
pub const SINGLE_IMAGE_FIELD: &str = "image";
/// Body cap for multipart routes: every allowed file at full size plus
/// room for text fields and part headers.
pub const MULTIPART_BODY_LIMIT: usize = MAX_PRODUCT_FILES * MAX_FILE_BYTES + 1024 * 1024;

#[derive(Debug, Error)]
pub enum UploadError {
    #[error("No file uploaded")]
    Missing,
    #[error("File size too large. Maximum size is 5MB.")]
    TooLarge,
    #[error("Only image files are allowed!")]
    NotImage,
    #[error("Too many files. Maximum is {MAX_PRODUCT_FILES} images per request.")]
    TooMany,
    #[error("Request body too large")]
    RequestTooLarge,
    #[error("Unexpected file field `{0}`")]
    UnexpectedField(String),
    #[error("Malformed multipart body")]
    Multipart(String),
    #[error("Invalid request body")]
    Body(String),
    #[error("could not store upload: {0}")]
    Io(#[from] std::io::Error),
}

impl From<UploadError> for ServiceError {
    fn from(err: UploadError) -> Self {
        match err {
            UploadError::Io(io) => {
                ServiceError::internal("uploads", "Error uploading file").with_detail(io.to_string())
            }
            UploadError::Multipart(ref detail) | UploadError::Body(ref detail) => {
                let detail = detail.clone();
                ServiceError::invalid_input("uploads", err.to_string()).with_detail(detail)
            }
            UploadError::RequestTooLarge => {
                ServiceError::payload_too_large("uploads", err.to_string())
            }
            other => ServiceError::invalid_input("uploads", other.to_string()),
        }
    }
}

#[derive(Debug, Clone)]
pub struct IncomingFile {
    pub field: String,
    pub file_name: Option<String>,
    pub content_type: String,
    pub bytes: Bytes,
}

/// Text fields and image files of one product write.
#[derive(Debug, Default)]
pub struct ProductForm {
    pub fields: Payload,
    pub files: Vec<IncomingFile>,
}

/// Multipart product routes carry [`MULTIPART_BODY_LIMIT`]; JSON bodies stay
/// under the configured `request_max_bytes`.
impl FromRequest<AppState> for ProductForm {
    type Rejection = ServiceError;

    async fn from_request(req: Request, state: &AppState) -> Result<Self, Self::Rejection> {
        let content_type = req
            .headers()
            .get(CONTENT_TYPE)
            .and_then(|v| v.to_str().ok())
            .unwrap_or_default()
            .to_ascii_lowercase();
        if content_type.starts_with("multipart/form-data") {
            let multipart = Multipart::from_request(req, state)
                .await
                .map_err(|rejection| UploadError::Multipart(rejection.body_text()))?;
            return Ok(read_product_form(multipart).await?);
        }
        if !(content_type.starts_with("application/json") || content_type.contains("+json")) {
            return Err(UploadError::Body("Expected `Content-Type: application/json`".into()).into());
        }

        // reading only fails past the limit or when the client goes away
        let bytes = body::to_bytes(req.into_body(), state.config.request_max_bytes)
            .await
            .map_err(|err| {
                debug!(target = "storefront.uploads", error = %err, "json body rejected");
                UploadError::RequestTooLarge
            })?;
        match serde_json::from_slice::<Value>(&bytes) {
            Ok(Value::Object(fields)) => Ok(Self {
                fields,
                files: Vec::new(),
            }),
            Ok(_) => Err(UploadError::Body("expected a JSON object".into()).into()),
            Err(err) => Err(UploadError::Body(err.to_string()).into()),
        }
    }
}

async fn read_product_form(mut multipart: Multipart) -> Result<ProductForm, UploadError> {
    let mut form = ProductForm::default();
    while let Some(field) = multipart.next_field().await.map_err(multipart_err)? {
        let name = field.name().unwrap_or_default().to_string();
        if field.file_name().is_none() {
            let text = field.text().await.map_err(multipart_err)?;
            form.fields.insert(name, Value::String(text));
            continue;
        }
        if name != PRODUCT_IMAGE_FIELD {
            return Err(UploadError::UnexpectedField(name));
        }
        if let Some(file) = read_image(field).await? {
            if form.files.len() == MAX_PRODUCT_FILES {
                return Err(UploadError::TooMany);
            }
            form.files.push(file);
        }
    }
    debug!(
        target = "storefront.uploads",
        fields = form.fields.len(),
        files = form.files.len(),
        "product form parsed"
    );
    Ok(form)
}

/// Pulls the `image` file out of a standalone upload request.
pub async fn read_single_image(mut multipart: Multipart) -> Result<IncomingFile, UploadError> {
    let mut found = None;
    while let Some(field) = multipart.next_field().await.map_err(multipart_err)? {
        if field.file_name().is_none() {
            continue;
        }
        let name = field.name().unwrap_or_default().to_string();
        if name != SINGLE_IMAGE_FIELD {
            return Err(UploadError::UnexpectedField(name));
        }
        if found.is_some() {
            return Err(UploadError::TooMany);
        }
        found = read_image(field).await?;
    }
    found.ok_or(UploadError::Missing)
}

/// Reads one file part, enforcing type and size. Empty parts (a file input
/// left blank) yield `None`.
async fn read_image(
    mut field: axum::extract::multipart::Field<'_>,
) -> Result<Option<IncomingFile>, UploadError> {
    let field_name = field.name().unwrap_or_default().to_string();
    let file_name = field
        .file_name()
        .map(str::to_string)
        .filter(|n| !n.is_empty());
    let content_type = field.content_type().unwrap_or_default().to_string();

    let mut data = Vec::new();
    while let Some(chunk) = field.chunk().await.map_err(multipart_err)? {
        if data.len() + chunk.len() > MAX_FILE_BYTES {
            return Err(UploadError::TooLarge);
        }
        data.extend_from_slice(&chunk);
    }
    if file_name.is_none() && data.is_empty() {
        return Ok(None);
    }
    if !content_type.starts_with("image/") {
        return Err(UploadError::NotImage);
    }
    Ok(Some(IncomingFile {
        field: field_name,
        file_name,
        content_type,
        bytes: Bytes::from(data),
    }))
}

/// Writes `files` under `dir` as `<prefix>-<millis>-<random>.<ext>` and
/// returns the stored file names in order.
pub async fn store_files(
    dir: &Path,
    prefix: &str,
    files: &[IncomingFile],
) -> Result<Vec<String>, UploadError> {
    tokio::fs::create_dir_all(dir).await?;
    let mut stored = Vec::with_capacity(files.len());
    for file in files {
        let name = stored_name(prefix, file);
        tokio::fs::write(dir.join(&name), &file.bytes).await?;
        info!(
            target = "storefront.uploads",
            file = %name,
            field = %file.field,
            bytes = file.bytes.len(),
            "image stored"
        );
        stored.push(name);
    }
    Ok(stored)
}

pub async fn ensure_dirs(dirs: &[PathBuf]) -> Result<(), UploadError> {
    for dir in dirs {
        tokio::fs::create_dir_all(dir).await?;
    }
    Ok(())
}

fn stored_name(prefix: &str, file: &IncomingFile) -> String {
    let suffix: u32 = rand::rng().random_range(0..1_000_000_000);
    format!(
        "{prefix}-{}-{suffix}.{}",
        Utc::now().timestamp_millis(),
        extension(file)
    )
}

/// Extension from the client file name, else from the content type.
fn extension(file: &IncomingFile) -> String {
    let from_name = file
        .file_name
        .as_deref()
        .and_then(|name| Path::new(name).extension())
        .and_then(|ext| ext.to_str())
        .and_then(clean_extension);
    from_name
        .or_else(|| {
            let subtype = file.content_type.split('/').nth(1).unwrap_or_default();
            match subtype.split(['+', ';']).next().unwrap_or_default() {
                "jpeg" => Some("jpg".to_string()),
                other => clean_extension(other),
            }
        })
        .unwrap_or_else(|| "img".to_string())
}

fn clean_extension(raw: &str) -> Option<String> {
    let ext = raw.trim().to_ascii_lowercase();
    (!ext.is_empty() && ext.chars().all(|c| c.is_ascii_alphanumeric())).then_some(ext)
}

fn multipart_err(err: MultipartError) -> UploadError {
    match err.status() {
        axum::http::StatusCode::PAYLOAD_TOO_LARGE => UploadError::RequestTooLarge,
        _ => UploadError::Multipart(err.body_text()),
    }
}
