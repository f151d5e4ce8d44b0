use crate::catalog::product::ProductView;
use crate::catalog::service::{self, ListParams};
use crate::error::ServiceError;
use crate::models::ApiResponse;
use crate::security::AuthUser;
use crate::state::AppState;
use crate::uploads::{self, IncomingFile, ProductForm};
use axum::{
    Extension, Json,
    extract::{Path, Query, State},
    http::StatusCode,
};
use std::time::Instant;
use tracing::warn;

const PUBLIC_PREFIX: &str = "/uploads/products";

/// Active catalog with filters, sorting and pagination.
///
/// - Method: `GET`
/// - Path: `/api/products`
/// - Query: `page`, `limit`, `category`, `featured`, `search`, `minPrice`,
///   `maxPrice`, `sort` (`price_asc` | `price_desc` | `newest`)
pub async fn list_products(
    State(state): State<AppState>,
    Query(params): Query<ListParams>,
) -> Result<Json<ApiResponse<Vec<ProductView>>>, ServiceError> {
    crate::metrics::inc_requests("/api/products");
    let started = Instant::now();
    let (products, pagination) = service::list_products(&state.db, &params).await?;
    crate::metrics::stage_elapsed("catalog_list", started.elapsed().as_millis());
    let count = products.len();
    Ok(Json(
        ApiResponse::data(products)
            .with_count(count)
            .with_pagination(pagination),
    ))
}

/// One active product by id or slug.
pub async fn get_product(
    State(state): State<AppState>,
    Path(identifier): Path<String>,
) -> Result<Json<ApiResponse<ProductView>>, ServiceError> {
    crate::metrics::inc_requests("/api/products/{identifier}");
    let product = service::get_product(&state.db, &identifier).await?;
    Ok(Json(ApiResponse::data(product)))
}

/// Create a product from JSON or `multipart/form-data` (up to five files in
/// `images`). Admin only.
pub async fn create_product(
    State(state): State<AppState>,
    Extension(AuthUser(user)): Extension<AuthUser>,
    form: ProductForm,
) -> Result<(StatusCode, Json<ApiResponse<ProductView>>), ServiceError> {
    crate::metrics::inc_requests("POST /api/products");
    let stored = store_images(&state, &form.files).await?;
    let urls = public_urls(&stored);
    match service::create_product(&state.db, form.fields, &urls, &user).await {
        Ok(product) => Ok((
            StatusCode::CREATED,
            Json(ApiResponse::data(product).with_message("Product created successfully")),
        )),
        Err(err) => {
            discard_images(&state, &stored).await;
            Err(err)
        }
    }
}

/// Partial update; uploaded files are appended to the stored images.
pub async fn update_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
    form: ProductForm,
) -> Result<Json<ApiResponse<ProductView>>, ServiceError> {
    crate::metrics::inc_requests("PUT /api/products/{id}");
    let stored = store_images(&state, &form.files).await?;
    let urls = public_urls(&stored);
    match service::update_product(&state.db, &id, form.fields, &urls).await {
        Ok(product) => Ok(Json(
            ApiResponse::data(product).with_message("Product updated successfully"),
        )),
        Err(err) => {
            discard_images(&state, &stored).await;
            Err(err)
        }
    }
}

/// Soft delete: the product disappears from the storefront.
pub async fn delete_product(
    State(state): State<AppState>,
    Path(id): Path<String>,
) -> Result<Json<ApiResponse<()>>, ServiceError> {
    crate::metrics::inc_requests("DELETE /api/products/{id}");
    service::delete_product(&state.db, &id).await?;
    Ok(Json(ApiResponse::message("Product deleted successfully")))
}

async fn store_images(
    state: &AppState,
    files: &[IncomingFile],
) -> Result<Vec<String>, ServiceError> {
    if files.is_empty() {
        return Ok(Vec::new());
    }
    let names = uploads::store_files(&state.config.product_upload_dir(), "product", files).await?;
    Ok(names)
}

/// Removes files stored for a write that was then rejected.
async fn discard_images(state: &AppState, names: &[String]) {
    let dir = state.config.product_upload_dir();
    for name in names {
        if let Err(err) = tokio::fs::remove_file(dir.join(name)).await {
            warn!(target = "storefront.uploads", file = %name, error = %err, "could not remove orphaned upload");
        }
    }
}

fn public_urls(names: &[String]) -> Vec<String> {
    names
        .iter()
        .map(|name| format!("{PUBLIC_PREFIX}/{name}"))
        .collect()
}
