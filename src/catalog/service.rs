use crate::catalog::normalize::{Payload, build_product_payload, strip_server_owned, uploaded_images};
use crate::catalog::product::{Category, DEFAULT_IMAGE_ALT, Product, ProductView};
use crate::catalog::slug::slugify;
use crate::error::ServiceError;
use crate::models::{Pagination, is_object_id, new_object_id};
use crate::store::{Database, ProductQuery, ProductSort};
use crate::users::User;
use chrono::Utc;
use serde::Deserialize;
use serde_json::Value;
use tracing::info;

const SCOPE: &str = "products";
const DEFAULT_PAGE_SIZE: u64 = 20;
const MAX_PAGE_SIZE: u64 = 100;

/// Catalog query string. Everything arrives as text and is parsed leniently:
/// unusable values fall back to defaults instead of failing the request.
#[derive(Debug, Clone, Default, Deserialize)]
pub struct ListParams {
    pub page: Option<String>,
    pub limit: Option<String>,
    pub category: Option<String>,
    pub featured: Option<String>,
    pub search: Option<String>,
    #[serde(rename = "minPrice")]
    pub min_price: Option<String>,
    #[serde(rename = "maxPrice")]
    pub max_price: Option<String>,
    pub sort: Option<String>,
}

pub async fn create_product(
    db: &Database,
    mut body: Payload,
    uploaded_urls: &[String],
    user: &User,
) -> Result<ProductView, ServiceError> {
    strip_server_owned(&mut body);
    let title = string_field(&body, "title");
    let uploaded = uploaded_images(
        uploaded_urls,
        title.as_deref().unwrap_or(DEFAULT_IMAGE_ALT),
        true,
    );
    let mut payload = build_product_payload(body, &uploaded, title.as_deref());

    require_short_description(&payload)?;
    require_price(&payload)?;

    let now = Value::String(Utc::now().to_rfc3339());
    payload.insert("_id".into(), Value::String(new_object_id()));
    payload.insert("createdBy".into(), Value::String(user.id.clone()));
    payload.insert("createdAt".into(), now.clone());
    payload.insert("updatedAt".into(), now);

    let mut product: Product = serde_json::from_value(Value::Object(payload)).map_err(|err| {
        ServiceError::invalid_input(SCOPE, "Error creating product").with_detail(err.to_string())
    })?;
    product.title = product.title.trim().to_string();
    product.slug = slug_for(&product.title)?;
    product
        .validate()
        .map_err(|violation| ServiceError::invalid_input(SCOPE, violation.to_string()))?;

    db.insert_product(&product)
        .await
        .map_err(|err| ServiceError::from_store(SCOPE, err))?;
    info!(
        target = "storefront.catalog",
        product_id = %product.id,
        sku = %product.sku,
        images = product.images.len(),
        "product created"
    );
    Ok(product.view())
}

/// Applies a partial write: top-level fields present in the normalized body
/// replace the stored ones, everything else is kept.
pub async fn update_product(
    db: &Database,
    id: &str,
    mut body: Payload,
    uploaded_urls: &[String],
) -> Result<ProductView, ServiceError> {
    let existing = find_any(db, id).await?;
    strip_server_owned(&mut body);

    let title = string_field(&body, "title").unwrap_or_else(|| existing.title.clone());
    let uploaded = if uploaded_urls.is_empty() {
        Vec::new()
    } else {
        let mut images = existing.images.clone();
        images.extend(uploaded_images(uploaded_urls, &title, false));
        images
    };
    let payload = build_product_payload(body, &uploaded, Some(&title));

    if payload.contains_key("description") {
        require_short_description(&payload)?;
    }
    if payload.contains_key("price") {
        require_price(&payload)?;
    }

    let mut document = match serde_json::to_value(&existing) {
        Ok(Value::Object(document)) => document,
        Ok(_) | Err(_) => {
            return Err(ServiceError::internal(SCOPE, "Error updating product")
                .with_detail("stored product is not an object"));
        }
    };
    for (key, value) in payload {
        document.insert(key, value);
    }
    document.insert("updatedAt".into(), Value::String(Utc::now().to_rfc3339()));

    let mut product: Product = serde_json::from_value(Value::Object(document)).map_err(|err| {
        ServiceError::invalid_input(SCOPE, "Error updating product").with_detail(err.to_string())
    })?;
    product.title = product.title.trim().to_string();
    if product.title != existing.title {
        product.slug = slug_for(&product.title)?;
    }
    product
        .validate()
        .map_err(|violation| ServiceError::invalid_input(SCOPE, violation.to_string()))?;

    db.replace_product(&product)
        .await
        .map_err(|err| ServiceError::from_store(SCOPE, err))?;
    info!(
        target = "storefront.catalog",
        product_id = %product.id,
        added_images = uploaded_urls.len(),
        "product updated"
    );
    Ok(product.view())
}

/// Looks up an active product by id or, for anything that is not an id, by
/// slug.
pub async fn get_product(db: &Database, identifier: &str) -> Result<ProductView, ServiceError> {
    let found = if is_object_id(identifier) {
        db.find_product(identifier).await
    } else {
        db.find_product_by_slug(identifier).await
    }
    .map_err(|err| ServiceError::from_store(SCOPE, err))?;
    match found {
        Some(product) if product.is_active => Ok(product.view()),
        _ => Err(ServiceError::not_found(SCOPE, "Product not found")),
    }
}

pub async fn list_products(
    db: &Database,
    params: &ListParams,
) -> Result<(Vec<ProductView>, Pagination), ServiceError> {
    let page = parse_param::<u64>(&params.page).filter(|p| *p >= 1).unwrap_or(1);
    let limit = parse_param::<u64>(&params.limit)
        .filter(|l| *l >= 1)
        .unwrap_or(DEFAULT_PAGE_SIZE)
        .min(MAX_PAGE_SIZE);

    let category = match params.category.as_deref().map(str::trim) {
        None | Some("") => None,
        Some(raw) => match Category::parse(raw) {
            Some(category) => Some(category),
            // nothing can match an unknown category
            None => return Ok((Vec::new(), Pagination::new(page, limit, 0))),
        },
    };
    let query = ProductQuery {
        active_only: true,
        category,
        featured: parse_param::<bool>(&params.featured),
        search: params
            .search
            .as_deref()
            .map(str::trim)
            .filter(|s| !s.is_empty())
            .map(str::to_string),
        min_price: parse_param::<f64>(&params.min_price),
        max_price: parse_param::<f64>(&params.max_price),
        sort: params
            .sort
            .as_deref()
            .map(ProductSort::parse)
            .unwrap_or_default(),
        skip: (page - 1).saturating_mul(limit),
        limit,
    };

    let (products, total) = db
        .list_products(&query)
        .await
        .map_err(|err| ServiceError::from_store(SCOPE, err))?;
    let views = products.into_iter().map(Product::view).collect();
    Ok((views, Pagination::new(page, limit, total)))
}

/// Hides a product from the storefront; the document stays for order
/// history.
pub async fn delete_product(db: &Database, id: &str) -> Result<(), ServiceError> {
    let mut product = find_any(db, id).await?;
    product.is_active = false;
    product.updated_at = Utc::now();
    db.replace_product(&product)
        .await
        .map_err(|err| ServiceError::from_store(SCOPE, err))?;
    info!(target = "storefront.catalog", product_id = %product.id, "product deactivated");
    Ok(())
}

async fn find_any(db: &Database, id: &str) -> Result<Product, ServiceError> {
    db.find_product(id)
        .await
        .map_err(|err| ServiceError::from_store(SCOPE, err))?
        .ok_or_else(|| ServiceError::not_found(SCOPE, "Product not found"))
}

fn slug_for(title: &str) -> Result<String, ServiceError> {
    let slug = slugify(title);
    if slug.is_empty() {
        return Err(ServiceError::invalid_input(
            SCOPE,
            "Title must contain at least one letter or digit",
        ));
    }
    Ok(slug)
}

fn require_short_description(payload: &Payload) -> Result<(), ServiceError> {
    let present = payload
        .get("description")
        .and_then(|d| d.get("short"))
        .and_then(Value::as_str)
        .is_some_and(|s| !s.trim().is_empty());
    if present {
        Ok(())
    } else {
        Err(ServiceError::invalid_input(SCOPE, "Short description is required"))
    }
}

fn require_price(payload: &Payload) -> Result<(), ServiceError> {
    let present = payload
        .get("price")
        .and_then(|p| p.get("regular"))
        .is_some_and(Value::is_number);
    if present {
        Ok(())
    } else {
        Err(ServiceError::invalid_input(SCOPE, "Price is required"))
    }
}

fn string_field(payload: &Payload, key: &str) -> Option<String> {
    payload
        .get(key)
        .and_then(Value::as_str)
        .map(str::trim)
        .filter(|s| !s.is_empty())
        .map(str::to_string)
}

fn parse_param<T: std::str::FromStr>(raw: &Option<String>) -> Option<T> {
    raw.as_deref().and_then(|v| v.trim().parse().ok())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::ServiceErrorKind;
    use crate::users::{Profile, Role};
    use axum::http::StatusCode;
    use serde_json::json;

    fn admin() -> User {
        let now = Utc::now();
        User {
            id: "65f0c0ffee00000000000001".into(),
            username: "admin".into(),
            email: "admin@storefront.local".into(),
            password_hash: "x".into(),
            role: Role::Admin,
            profile: Profile::default(),
            email_verified: true,
            is_active: true,
            last_login: None,
            created_at: now,
            updated_at: now,
        }
    }

    fn body(value: Value) -> Payload {
        match value {
            Value::Object(map) => map,
            _ => panic!("body must be an object"),
        }
    }

    fn form_body(title: &str, sku: &str) -> Payload {
        body(json!({
            "title": title,
            "shortDescription": "Hand-crocheted with cotton yarn",
            "category": "Keychains",
            "price": "249",
            "sku": sku,
            "tags": "[\"gift\",\"crochet\"]",
            "featured": "true",
            "availability": "In Stock",
            "inventory": "{\"quantity\":\"4\"}",
        }))
    }

    #[tokio::test]
    async fn create_normalizes_form_fields() {
        let db = Database::in_memory();
        let view = create_product(&db, form_body("  Tulip Keychain!  ", "KC-01"), &[], &admin())
            .await
            .expect("created");
        let product = &view.product;
        assert_eq!(product.title, "Tulip Keychain!");
        assert_eq!(product.slug, "tulip-keychain");
        assert_eq!(product.price.regular, 249.0);
        assert_eq!(product.description.short, "Hand-crocheted with cotton yarn");
        assert_eq!(product.inventory.quantity, 4);
        assert_eq!(product.tags, vec!["gift", "crochet"]);
        assert!(product.featured);
        assert!(product.is_active);
        assert_eq!(product.created_by, admin().id);
        assert_eq!(view.current_price, 249.0);
    }

    #[tokio::test]
    async fn create_with_uploads_marks_first_primary() {
        let db = Database::in_memory();
        let mut payload = form_body("Rose Bouquet", "FL-01");
        payload.insert("images".into(), json!(["https://cdn.example.com/ignored.jpg"]));
        let urls = vec![
            "/uploads/products/product-1-1.jpg".to_string(),
            "/uploads/products/product-1-2.jpg".to_string(),
        ];
        let view = create_product(&db, payload, &urls, &admin()).await.unwrap();
        let images = &view.product.images;
        assert_eq!(images.len(), 2);
        assert_eq!(images[0].url, urls[0]);
        assert!(images[0].is_primary);
        assert!(!images[1].is_primary);
        assert_eq!(images[1].alt, "Rose Bouquet");
    }

    #[tokio::test]
    async fn create_requires_short_description_and_price() {
        let db = Database::in_memory();
        let mut payload = form_body("Bag", "BG-01");
        payload.remove("shortDescription");
        let err = create_product(&db, payload, &[], &admin()).await.unwrap_err();
        assert_eq!(err.message(), "Short description is required");

        let mut payload = form_body("Bag", "BG-01");
        payload.insert("price".into(), json!("free"));
        let err = create_product(&db, payload, &[], &admin()).await.unwrap_err();
        assert_eq!(err.message(), "Price is required");
        assert_eq!(err.status(), StatusCode::BAD_REQUEST);

        let mut payload = form_body("Bag", "BG-01");
        payload.insert("price".into(), json!(""));
        let err = create_product(&db, payload, &[], &admin()).await.unwrap_err();
        assert_eq!(err.message(), "Price is required");
    }

    #[tokio::test]
    async fn create_rejects_unknown_category() {
        let db = Database::in_memory();
        let mut payload = form_body("Bag", "BG-01");
        payload.insert("category".into(), json!("Furniture"));
        let err = create_product(&db, payload, &[], &admin()).await.unwrap_err();
        assert_eq!(err.message(), "Error creating product");
        assert!(err.detail().is_some());
    }

    #[tokio::test]
    async fn duplicate_sku_and_slug_conflict_by_field() {
        let db = Database::in_memory();
        create_product(&db, form_body("Sunflower", "FL-02"), &[], &admin())
            .await
            .unwrap();

        let err = create_product(&db, form_body("Another", "FL-02"), &[], &admin())
            .await
            .unwrap_err();
        assert_eq!(err.message(), "SKU already exists");

        let err = create_product(&db, form_body("Sunflower", "FL-03"), &[], &admin())
            .await
            .unwrap_err();
        assert_eq!(
            err.kind(),
            &ServiceErrorKind::Conflict {
                field: "slug".into()
            }
        );
    }

    #[tokio::test]
    async fn update_appends_uploads_and_regenerates_slug() {
        let db = Database::in_memory();
        let mut payload = form_body("Lily", "FL-04");
        payload.insert("imageUrl".into(), json!("https://cdn.example.com/lily.jpg"));
        let created = create_product(&db, payload, &[], &admin()).await.unwrap();
        let id = created.product.id.clone();

        let urls = vec!["/uploads/products/product-2-1.png".to_string()];
        let changes = body(json!({ "title": "White Lily", "price": "{\"regular\":\"300\",\"sale\":240}" }));
        let updated = update_product(&db, &id, changes, &urls).await.unwrap();
        let product = &updated.product;
        assert_eq!(product.slug, "white-lily");
        assert_eq!(product.images.len(), 2);
        assert!(product.images[0].is_primary);
        assert!(!product.images[1].is_primary);
        assert_eq!(product.images[1].alt, "White Lily");
        assert_eq!(product.description.short, "Hand-crocheted with cotton yarn");
        assert_eq!(updated.current_price, 240.0);
        assert_eq!(updated.discount_percentage, 20);
        assert_eq!(product.created_at, created.product.created_at);
    }

    #[tokio::test]
    async fn update_keeps_slug_when_title_unchanged() {
        let db = Database::in_memory();
        let created = create_product(&db, form_body("Daisy Clip", "AC-01"), &[], &admin())
            .await
            .unwrap();
        let changes = body(json!({ "title": "Daisy Clip", "slug": "hijacked", "featured": false }));
        let updated = update_product(&db, &created.product.id, changes, &[])
            .await
            .unwrap();
        assert_eq!(updated.product.slug, "daisy-clip");
        assert!(!updated.product.featured);
    }

    #[tokio::test]
    async fn update_unknown_product_is_not_found() {
        let db = Database::in_memory();
        let err = update_product(&db, "65f0c0ffee0000000000ffff", Payload::new(), &[])
            .await
            .unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert_eq!(err.message(), "Product not found");
    }

    #[tokio::test]
    async fn get_by_id_or_slug_hides_inactive() {
        let db = Database::in_memory();
        let created = create_product(&db, form_body("Bunny Toy", "TY-01"), &[], &admin())
            .await
            .unwrap();
        let id = created.product.id.clone();
        assert_eq!(get_product(&db, &id).await.unwrap().product.sku, "TY-01");
        assert_eq!(get_product(&db, "bunny-toy").await.unwrap().product.id, id);

        delete_product(&db, &id).await.unwrap();
        let err = get_product(&db, "bunny-toy").await.unwrap_err();
        assert_eq!(err.status(), StatusCode::NOT_FOUND);
        assert!(db.find_product(&id).await.unwrap().is_some());
    }

    #[tokio::test]
    async fn list_filters_sorts_and_paginates() {
        let db = Database::in_memory();
        for (title, sku, price) in [
            ("Cheap Clip", "AC-10", "99"),
            ("Mid Bag", "BG-10", "499"),
            ("Fancy Bag", "BG-11", "1299"),
        ] {
            let mut payload = form_body(title, sku);
            payload.insert("price".into(), json!(price));
            payload.insert("featured".into(), json!("false"));
            create_product(&db, payload, &[], &admin()).await.unwrap();
        }

        let params = ListParams {
            sort: Some("price_desc".into()),
            limit: Some("2".into()),
            ..ListParams::default()
        };
        let (page, pagination) = list_products(&db, &params).await.unwrap();
        assert_eq!(pagination, Pagination::new(1, 2, 3));
        assert_eq!(pagination.pages, 2);
        assert_eq!(page[0].product.sku, "BG-11");

        let params = ListParams {
            search: Some("BAG".into()),
            min_price: Some("500".into()),
            ..ListParams::default()
        };
        let (page, _) = list_products(&db, &params).await.unwrap();
        assert_eq!(page.len(), 1);
        assert_eq!(page[0].product.sku, "BG-11");

        let params = ListParams {
            category: Some("Furniture".into()),
            ..ListParams::default()
        };
        let (page, pagination) = list_products(&db, &params).await.unwrap();
        assert!(page.is_empty());
        assert_eq!(pagination.total, 0);
    }

    #[tokio::test]
    async fn list_clamps_paging_params() {
        let db = Database::in_memory();
        let params = ListParams {
            page: Some("0".into()),
            limit: Some("5000".into()),
            ..ListParams::default()
        };
        let (_, pagination) = list_products(&db, &params).await.unwrap();
        assert_eq!(pagination.page, 1);
        assert_eq!(pagination.limit, 100);
    }
}
