use crate::error::ServiceError;
use crate::state::AppState;
use crate::uploads::{self, UploadError};
use axum::{
    Json,
    extract::{Multipart, State},
};
use serde::Serialize;

#[derive(Debug, Serialize)]
pub struct UploadResponse {
    pub success: bool,
    pub message: String,
    #[serde(rename = "imageUrl")]
    pub image_url: String,
}

/// Store one image from the `image` field.
///
/// - Method: `POST`
/// - Path: `/api/upload`
/// - Body: `multipart/form-data`
/// - Response: `{success, message, imageUrl}` with `imageUrl` under
///   `/uploads/`
pub async fn upload_image(
    State(state): State<AppState>,
    multipart: Result<Multipart, axum::extract::multipart::MultipartRejection>,
) -> Result<Json<UploadResponse>, ServiceError> {
    crate::metrics::inc_requests("/api/upload");
    let multipart = multipart.map_err(|_| UploadError::Missing)?;
    let file = uploads::read_single_image(multipart).await?;
    let names = uploads::store_files(&state.config.upload_dir, "image", &[file]).await?;
    let name = names.into_iter().next().ok_or(UploadError::Missing)?;
    Ok(Json(UploadResponse {
        success: true,
        message: "File uploaded successfully".into(),
        image_url: format!("/uploads/{name}"),
    }))
}
